use std::io;

/// Errors produced while reading requests and writing responses.
///
/// The variants follow how the connection loop reacts to them:
///
/// - [`ForbiddenUse`](Error::ForbiddenUse): a resource limit was exceeded or
///   the client looks abusive. The connection is closed and the address is
///   reported to the [`BanList`](crate::BanList).
/// - [`Invariant`](Error::Invariant): a programming error, such as reading a
///   body twice. Logged at error level.
/// - [`InvalidRange`](Error::InvalidRange): a `Range` header that cannot be
///   honored.
/// - [`UnknownStatus`](Error::UnknownStatus): a status line with a code that
///   is not a known [`StatusCode`](crate::StatusCode).
/// - [`Io`](Error::Io): the socket failed, timed out or was closed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("forbidden use: {0}")]
    ForbiddenUse(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("unknown status code in status line: {0}")]
    UnknownStatus(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for I/O conditions that are part of normal traffic:
    /// read timeouts and peers that went away.
    pub fn is_quiet(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    #[inline]
    pub(crate) fn closed_unexpectedly() -> Self {
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "the stream closed unexpectedly while reading",
        ))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::ForbiddenUse(a), Error::ForbiddenUse(b))
            | (Error::Invariant(a), Error::Invariant(b))
            | (Error::InvalidRange(a), Error::InvalidRange(b))
            | (Error::UnknownStatus(a), Error::UnknownStatus(b)) => a == b,
            (Error::Io(a), Error::Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

/// Shorthand used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
