use crate::{
    errors::{Error, Result},
    http::{
        body::{self, Body},
        headers::Headers,
        request_line::{PathDetails, RequestLine},
        source::{BodySource, ByteSource},
        streaming::{MultipartCursor, UrlEncodedCursor},
        types::{Method, Version},
    },
    limits::ReqLimits,
    server::socket::SocketWrapper,
};
use std::net::SocketAddr;

/// An HTTP request as seen by an [`Endpoint`](crate::Endpoint).
///
/// The start line and headers are parsed before the endpoint runs. The body
/// stays on the socket until the endpoint asks for it, in exactly one of
/// three ways:
///
/// | Method                                 | Reads                                  |
/// |----------------------------------------|----------------------------------------|
/// | [`body()`](Request::body)              | everything at once, decoded to [`Body`] |
/// | [`url_encoded()`](Request::url_encoded) | key/value pairs one at a time          |
/// | [`multipart()`](Request::multipart)     | partitions one at a time               |
///
/// A second access, in any mode, is an [`Error::Invariant`]. Whatever the
/// endpoint leaves unread is drained by the server before the next request
/// on the connection.
///
/// # Body framing
///
/// Only bodies with an exact `Content-Length` are read. A body sent with
/// `Transfer-Encoding: chunked` is not decoded and the connection is closed
/// after the response.
pub struct Request<'s> {
    line: RequestLine,
    headers: Headers,
    remote: SocketAddr,
    pub(crate) source: BodySource<'s>,
    limits: &'s ReqLimits,
    state: BodyState,
}

/// How the body of a request has been accessed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Unread,
    BulkRead,
    Streaming,
}

impl BodyState {
    fn transition(&mut self, next: BodyState) -> Result<()> {
        match *self {
            BodyState::Unread => {
                *self = next;
                Ok(())
            }
            current => Err(Error::Invariant(format!(
                "the request body was already accessed ({current:?}), it can be read only once"
            ))),
        }
    }
}

impl<'s> Request<'s> {
    pub(crate) fn new(
        line: RequestLine,
        headers: Headers,
        socket: &'s mut SocketWrapper,
        limits: &'s ReqLimits,
    ) -> Result<Self> {
        let length = if headers.is_chunked() {
            0
        } else {
            headers.content_length()?.unwrap_or(0)
        };

        Ok(Self {
            line,
            headers,
            remote: socket.remote_addr(),
            source: BodySource::new(socket, length),
            limits,
            state: BodyState::Unread,
        })
    }

    #[inline]
    pub fn line(&self) -> &RequestLine {
        &self.line
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.line.method()
    }

    #[inline]
    pub fn path(&self) -> &PathDetails {
        self.line.path()
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.line.version()
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    #[inline]
    pub fn body_state(&self) -> BodyState {
        self.state
    }

    /// Reads and decodes the whole body.
    ///
    /// - no `Content-Length` (or zero): [`Body::None`]
    /// - chunked: [`Body::Unrecognized`] with no bytes
    /// - `Content-Length` at or above [`ReqLimits::body_size`]:
    ///   [`Error::ForbiddenUse`]
    ///
    /// Malformed forms degrade to [`Body::Unrecognized`] holding the raw
    /// bytes.
    ///
    /// # Examples
    /// ```no_run
    /// use hearth_web::{Endpoint, Request, Response, StatusCode};
    ///
    /// struct Echo;
    ///
    /// impl Endpoint for Echo {
    ///     async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
    ///         let body = request.body().await?;
    ///         let value = body.as_string("value_a").unwrap_or_default();
    ///
    ///         Ok(Response::new(StatusCode::Ok)
    ///             .header("Content-Type", "text/plain")
    ///             .body(value))
    ///     }
    /// }
    /// ```
    pub async fn body(&mut self) -> Result<Body> {
        self.state.transition(BodyState::BulkRead)?;

        if self.headers.is_chunked() {
            tracing::debug!("chunked request bodies are not decoded, from {}", self.remote);
            return Ok(Body::Unrecognized(Vec::new()));
        }

        let length = match self.headers.content_length()? {
            None | Some(0) => return Ok(Body::None),
            Some(length) => length,
        };

        if length >= self.limits.body_size {
            return Err(Error::ForbiddenUse(format!(
                "body of {length} bytes is over the maximum of {}",
                self.limits.body_size
            )));
        }

        let mut raw = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            filled += self.source.read_chunk(&mut raw[filled..]).await?;
        }
        tracing::trace!("read a body of {length} bytes from {}", self.remote);

        let content_type = self.headers.content_type()?.unwrap_or_default();
        body::decode(content_type, raw, self.limits)
    }

    /// Reads an `application/x-www-form-urlencoded` body one pair at a
    /// time.
    ///
    /// Errors with [`Error::Invariant`] for any other content type.
    pub fn url_encoded(&mut self) -> Result<UrlEncodedCursor<&mut BodySource<'s>>> {
        let content_type = self.headers.content_type()?.unwrap_or_default();
        if !content_type.contains("application/x-www-form-urlencoded") {
            return Err(Error::Invariant(format!(
                "streaming url-encoded data needs a matching content type, got {content_type:?}"
            )));
        }

        self.state.transition(BodyState::Streaming)?;
        Ok(UrlEncodedCursor::new(&mut self.source, self.limits))
    }

    /// Reads a `multipart/form-data` body one partition at a time.
    ///
    /// Errors with [`Error::Invariant`] for any other content type or a
    /// missing boundary.
    pub fn multipart(&mut self) -> Result<MultipartCursor<&mut BodySource<'s>>> {
        let content_type = self.headers.content_type()?.unwrap_or_default();
        if !content_type.contains("multipart/form-data") {
            return Err(Error::Invariant(format!(
                "streaming multipart data needs a matching content type, got {content_type:?}"
            )));
        }

        let boundary = body::boundary(content_type)
            .ok_or_else(|| Error::Invariant(format!("no boundary in {content_type:?}")))?
            .to_string();

        self.state.transition(BodyState::Streaming)?;
        Ok(MultipartCursor::new(&mut self.source, &boundary, self.limits))
    }
}

impl std::fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("line", &self.line.raw())
            .field("headers", &self.headers.lines())
            .field("remote", &self.remote)
            .field("state", &self.state)
            .finish()
    }
}
