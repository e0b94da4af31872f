//! Server configuration limits and timeouts
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Header and form-field flooding
//! - Slowloris attacks
//! - Probing for well-known vulnerable paths
//!
//! Exceeding a request limit is never silently truncated: the request fails
//! with [`Error::ForbiddenUse`](crate::Error::ForbiddenUse), the connection is
//! closed and the client address is handed to the [`BanList`](crate::BanList)
//! for [`SecurityLimits::jail_duration`].
//!
//! Every struct deserializes with `#[serde(default)]`, so a configuration file
//! only needs the fields it changes. Durations are written in milliseconds.
//!
//! # Examples
//!
//! ```no_run
//! # hearth_web::impt_default_endpoint!{Hello}
//! use hearth_web::{Method, Server, limits::{ConnLimits, ReqLimits}};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(Server::bind("127.0.0.1:8080".parse().unwrap()).unwrap())
//!         .route(Method::Get, "hello", Hello)
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(3),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 40,
//!             body_size: 1024 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Timeouts that apply to a single connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnLimits {
    /// Maximum time a single socket read may block (default: `7s`).
    ///
    /// A read that times out ends the connection quietly (logged at `trace`).
    /// Shorter timeouts protect against slowloris-style clients.
    #[serde(deserialize_with = "millis")]
    pub socket_read_timeout: Duration,

    /// Maximum time a single socket write may block (default: `3s`).
    #[serde(deserialize_with = "millis")]
    pub socket_write_timeout: Duration,

    /// Idle time advertised to keep-alive clients (default: `3s`).
    ///
    /// Sent as `Keep-Alive: timeout=<seconds>` on every keep-alive response.
    #[serde(deserialize_with = "millis")]
    pub keep_alive_timeout: Duration,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(7),
            socket_write_timeout: Duration::from_secs(3),
            keep_alive_timeout: Duration::from_secs(3),

            _priv: (),
        }
    }
}

/// Limits on what a client may send in one request.
///
/// # Where each limit applies
/// ```text
/// POST /form?a=1&b=2 HTTP/1.1       <- max_line_size, query_keys
/// Content-Type: multipart/...       <- max_line_size, header_count
/// Content-Length: 2048              <- body_size
///
/// --boundary                        <- partitions
/// Content-Disposition: ...          <- header_count (per partition)
/// ...
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReqLimits {
    /// Maximum length of one line (start line or header line) in bytes
    /// (default: `1024`).
    pub max_line_size: usize,

    /// Maximum number of header lines (default: `70`).
    ///
    /// Exactly `header_count` lines are accepted; one more is a forbidden use.
    /// The same cap applies to the headers of each multipart partition.
    pub header_count: usize,

    /// Maximum number of `key=value` pairs in the query string (default: `50`).
    pub query_keys: usize,

    /// Maximum number of pairs in a URL-encoded body (default: `1000`).
    pub form_pairs: usize,

    /// Maximum size of a key read by the streaming URL-encoded cursor in
    /// bytes (default: `50`).
    pub form_key_size: usize,

    /// Maximum number of partitions in a multipart body (default: `1000`).
    pub partitions: usize,

    /// Upper bound for `Content-Length` in bytes (default: `10 MiB`).
    ///
    /// A request announcing this many bytes or more is a forbidden use when
    /// its body is read in bulk. Streaming cursors are not bound by it since
    /// they never hold the body in memory.
    pub body_size: usize,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            max_line_size: 1024,
            header_count: 70,
            query_keys: 50,
            form_pairs: 1000,
            form_key_size: 50,
            partitions: 1000,
            body_size: 10 * 1024 * 1024,

            _priv: (),
        }
    }
}

/// Settings applied while assembling responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RespLimits {
    /// Smallest `text/*` body that is gzip-compressed for clients sending
    /// `Accept-Encoding: gzip`, in bytes (default: `2048`).
    pub compression_threshold: usize,

    /// Value of the `Server` header (default: `hearth`).
    pub server_token: String,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            compression_threshold: 2048,
            server_token: "hearth".to_string(),

            _priv: (),
        }
    }
}

/// Inputs for the default [`Watchlist`](crate::Watchlist) and for bans.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityLimits {
    /// How long an address stays banned after a forbidden use
    /// (default: `10s`).
    #[serde(deserialize_with = "millis")]
    pub jail_duration: Duration,

    /// Isolated paths that only vulnerability scanners ask for
    /// (default: empty), e.g. `"owa/auth/logon.aspx"`.
    ///
    /// Compared for exact equality against the path without its leading `/`.
    pub suspicious_paths: Vec<String>,

    /// Fragments of I/O error messages that indicate probing
    /// (default: empty), e.g. `"no cipher suites in common"`.
    pub suspicious_errors: Vec<String>,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            jail_duration: Duration::from_secs(10),
            suspicious_paths: Vec::new(),
            suspicious_errors: Vec::new(),

            _priv: (),
        }
    }
}

fn millis<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml() {
        let limits: ConnLimits = toml::from_str("socket_read_timeout = 1500").unwrap();

        assert_eq!(limits.socket_read_timeout, Duration::from_millis(1500));
        assert_eq!(limits.keep_alive_timeout, ConnLimits::default().keep_alive_timeout);
    }

    #[test]
    fn defaults() {
        let req = ReqLimits::default();
        assert_eq!(req.header_count, 70);
        assert_eq!(req.query_keys, 50);
        assert_eq!(req.partitions, 1000);

        let resp = RespLimits::default();
        assert_eq!(resp.compression_threshold, 2048);
        assert_eq!(resp.server_token, "hearth");
    }
}
