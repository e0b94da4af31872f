//! hearth_web - small, security-minded HTTP/1.x server engine
//!
//! Built directly on tokio sockets: one task per connection, hand-written
//! wire parsing and response assembly, with form bodies decoded either in
//! one piece or streamed through a bounded cursor.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections unless `Connection: close`
//! - **HTTP/1.0**: closes after each response unless `Connection: keep-alive`
//! - **Ranges**: a single `bytes=` range for file responses
//! - **Compression**: gzip for `text/*` bodies when the client accepts it
//!
//! Chunked request bodies are not decoded; such requests see an empty
//! unrecognized body and the connection closes after the response.
//!
//! # Security
//!
//! Every request limit in [`limits::ReqLimits`] is enforced while parsing.
//! A client that exceeds one, or asks for a path on the [`Watchlist`], is
//! disconnected without a response and banned through the [`BanList`].
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use hearth_web::{Endpoint, Method, Request, Response, Server};
//!
//! struct Hello;
//!
//! impl Endpoint for Hello {
//!     async fn handle(&self, _: &mut Request<'_>) -> anyhow::Result<Response> {
//!         Ok(Response::html_ok("<p>Hello World!</p>"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
//!         .route(Method::Get, "hello", Hello)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//! Streaming a large upload:
//! ```no_run
//! use hearth_web::{Endpoint, Request, Response, StatusCode};
//!
//! struct Upload;
//!
//! impl Endpoint for Upload {
//!     async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
//!         let mut total = 0;
//!         let mut parts = request.multipart()?;
//!
//!         while let Some(mut part) = parts.next_partition().await? {
//!             let mut chunk = [0u8; 4096];
//!             loop {
//!                 let read = part.read_chunk(&mut chunk).await?;
//!                 if read == 0 {
//!                     break;
//!                 }
//!                 total += read;
//!             }
//!         }
//!
//!         Ok(Response::new(StatusCode::Ok)
//!             .header("Content-Type", "text/plain")
//!             .body(format!("received {total} bytes")))
//!     }
//! }
//! ```
//! Advanced configuration:
//! ```no_run
//! # hearth_web::impt_default_endpoint!{Hello}
//! use hearth_web::{Method, Server, limits::{ConnLimits, ReqLimits, SecurityLimits}};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
//!         .route(Method::Get, "hello", Hello)
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 30,          // Fewer headers for a small API
//!             body_size: 16 * 1024,      // 16KB bodies
//!             ..ReqLimits::default()
//!         })
//!         .security_limits(SecurityLimits {
//!             suspicious_paths: vec![".env".into(), "wp-login.php".into()],
//!             ..SecurityLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod body;
    pub(crate) mod headers;
    pub(crate) mod mime;
    pub(crate) mod query;
    pub(crate) mod range;
    pub(crate) mod request;
    pub(crate) mod request_line;
    pub(crate) mod response;
    pub(crate) mod source;
    pub(crate) mod status_line;
    pub(crate) mod streaming;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod routes;
    pub(crate) mod server_impl;
    pub(crate) mod socket;
}
pub mod config;
pub(crate) mod errors;
pub mod limits;
pub(crate) mod security;

pub use crate::{
    errors::{Error, Result},
    http::{
        body::{Body, BodyKind, ContentDisposition, Partition},
        headers::Headers,
        mime::MimeTypes,
        range::Range,
        request::{BodyState, Request},
        request_line::{PathDetails, RequestLine},
        response::{Response, ResponseBody},
        source::{BodySource, ByteSource},
        status_line::StatusLine,
        streaming::{MultipartCursor, RingBuffer, StreamingPartition, UrlEncodedCursor, UrlEncodedValue},
        types::{Method, StatusCode, Version},
    },
    security::{BanList, Brig, Suspicion, Watchlist},
    server::{
        routes::{Endpoint, LastMinute, Route, Router},
        server_impl::{Server, ServerBuilder, ShutdownHandle},
        socket::{LiveSockets, SocketWrapper, Transport},
    },
};

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_endpoint {
    ($name:ident) => {
        use hearth_web::{Endpoint, Request, Response};
        struct $name;

        impl Endpoint for $name {
            async fn handle(&self, _: &mut Request<'_>) -> anyhow::Result<Response> {
                Ok(Response::html_ok("<p>Hello world!</p>"))
            }
        }
    };
}
