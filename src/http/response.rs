//! Response values and their wire assembly.

use crate::{
    errors::{Error, Result},
    http::{headers::Headers, mime::MimeTypes, range::Range, types::StatusCode},
    limits::RespLimits,
    server::socket::SocketWrapper,
};
use flate2::{write::GzEncoder, Compression};
use std::{
    io::{self, SeekFrom, Write},
    path::PathBuf,
    time::{Duration, SystemTime},
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const FILE_CHUNK: usize = 8 * 1024;

/// What follows the header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Bytes(Vec<u8>),
    /// A region of a file, read from disk while sending.
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

impl ResponseBody {
    pub fn len(&self) -> u64 {
        match self {
            ResponseBody::Bytes(bytes) => bytes.len() as u64,
            ResponseBody::File { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An HTTP response returned by an [`Endpoint`](crate::Endpoint).
///
/// Holds the status, the extra headers and the body. The server adds `Date`,
/// `Server`, `Keep-Alive`, `Content-Length` and, when it compresses,
/// `Content-Encoding` and `Vary` while sending.
///
/// Header names are unique ignoring case: setting a header twice keeps the
/// first position and the last value.
///
/// A body without a `Content-Type` header cannot be sent; the connection is
/// closed and the error logged instead.
///
/// # Examples
/// ```
/// use hearth_web::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .header("Cache-Control", "no-store")
///     .body(r#"{"status": "ok"}"#);
///
/// assert_eq!(response.header_value("content-type"), Some("application/json"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: ResponseBody,
}

impl Response {
    /// A response with no extra headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Bytes(Vec::new()),
        }
    }

    /// A headers-only response, e.g. `204 No Content` or a plain `404`.
    #[inline]
    pub fn lean(status: StatusCode) -> Self {
        Self::new(status)
    }

    /// `200 OK` with an HTML body.
    pub fn html_ok(body: impl Into<String>) -> Self {
        Self::new(StatusCode::Ok)
            .header("Content-Type", "text/html; charset=UTF-8")
            .body(body.into())
    }

    /// `303 See Other` pointing the browser at `location`.
    pub fn redirect_to(location: &str) -> Self {
        Self::new(StatusCode::SeeOther)
            .header("Location", location)
            .header("Content-Type", "text/html; charset=UTF-8")
            .body(format!("<p>See <a href=\"{location}\">this link</a></p>"))
    }

    /// Streams a file from disk, honoring a single byte `Range` from the
    /// request.
    ///
    /// With a usable range the status is `206 Partial Content` and a
    /// `Content-Range` header is added. Without a `Content-Type` among
    /// `extra_headers`, the server picks one from the file suffix.
    ///
    /// The path is used as given; check it first if it comes from the client.
    ///
    /// # Errors
    /// I/O errors from reading the file metadata, and
    /// [`Error::InvalidRange`] for a range that cannot be served.
    pub async fn large_file<K, V>(
        path: impl Into<PathBuf>,
        extra_headers: impl IntoIterator<Item = (K, V)>,
        request_headers: &Headers,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: ToString,
    {
        let path = path.into();
        let full_length = tokio::fs::metadata(&path).await?.len();
        let range = Range::new(request_headers, full_length)?;

        let mut response = Self::new(match range.has_range() {
            true => StatusCode::PartialContent,
            false => StatusCode::Ok,
        });
        for (name, value) in extra_headers {
            response = response.header(name, value);
        }

        response = response.header("Accept-Ranges", "bytes");
        if range.has_range() {
            response = response.header(
                "Content-Range",
                format!("bytes {}-{}/{}", range.offset(), range.last(), full_length),
            );
        }

        response.body = ResponseBody::File {
            path,
            offset: range.offset(),
            length: range.length(),
        };
        Ok(response)
    }

    /// Sets a header, replacing any header with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        let name = name.into();
        let value = value.to_string();

        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = ResponseBody::Bytes(body.into());
        self
    }

    /// Replaces the status, keeping headers and body.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Extra headers in the order they were set.
    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[inline]
    pub fn content(&self) -> &ResponseBody {
        &self.body
    }

    /// Builds the header block and settles the body to send.
    pub(crate) fn prepare(self, out: &Outgoing<'_>) -> Result<Prepared> {
        let Response {
            status,
            mut headers,
            body,
        } = self;

        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));

        match &body {
            ResponseBody::File { path, .. } if !has_content_type => {
                headers.push(("Content-Type".into(), out.mime.for_path(path).into()));
            }
            ResponseBody::Bytes(bytes) if !bytes.is_empty() && !has_content_type => {
                return Err(Error::Invariant(format!(
                    "a Content-Type header must be set on a response with a body ({status:?}, {} bytes)",
                    bytes.len()
                )));
            }
            _ => {}
        }

        let mut head = String::with_capacity(256);
        push_line(&mut head, status.status_line());
        push_header(&mut head, "Date", &httpdate::fmt_http_date(SystemTime::now()));
        push_header(&mut head, "Server", &out.limits.server_token);

        for (name, value) in &headers {
            push_header(&mut head, name, value);
        }

        if let Some(timeout) = out.keep_alive {
            push_header(&mut head, "Keep-Alive", &format!("timeout={}", timeout.as_secs()));
        }

        let is_text = headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("content-type") && value.to_ascii_lowercase().contains("text/")
        });

        let body = match body {
            ResponseBody::Bytes(bytes)
                if is_text
                    && bytes.len() >= out.limits.compression_threshold
                    && accepts_gzip(out.request_headers) =>
            {
                push_header(&mut head, "Content-Encoding", "gzip");
                ResponseBody::Bytes(gzip(&bytes)?)
            }
            other => other,
        };

        push_header(&mut head, "Content-Length", &body.len().to_string());
        if is_text {
            push_header(&mut head, "Vary", "accept-encoding");
        }
        head.push_str("\r\n");

        Ok(Prepared { head, body })
    }
}

/// Per-request facts that shape the header block.
pub(crate) struct Outgoing<'a> {
    /// `Some(timeout)` when the connection stays open.
    pub keep_alive: Option<Duration>,
    pub request_headers: &'a Headers,
    pub limits: &'a RespLimits,
    pub mime: &'a MimeTypes,
}

/// A response ready for the wire.
#[derive(Debug)]
pub(crate) struct Prepared {
    head: String,
    body: ResponseBody,
}

impl Prepared {
    #[cfg(test)]
    pub(crate) fn head(&self) -> &str {
        &self.head
    }

    /// Writes the header block, then the body unless `head_only`.
    pub(crate) async fn send(self, socket: &mut SocketWrapper, head_only: bool) -> Result<()> {
        socket.send(self.head.as_bytes()).await?;

        if !head_only {
            match self.body {
                ResponseBody::Bytes(bytes) => socket.send(&bytes).await?,
                ResponseBody::File {
                    path,
                    offset,
                    length,
                } => send_file(socket, path, offset, length).await?,
            }
        }

        socket.flush().await
    }
}

async fn send_file(socket: &mut SocketWrapper, path: PathBuf, offset: u64, length: u64) -> Result<()> {
    let mut file = tokio::fs::File::open(&path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buf = vec![0u8; FILE_CHUNK];
    let mut remaining = length;

    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let count = file.read(&mut buf[..want]).await?;
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} ended {remaining} bytes early", path.display()),
            )
            .into());
        }

        socket.send(&buf[..count]).await?;
        remaining -= count as u64;
    }

    Ok(())
}

#[inline]
fn push_line(head: &mut String, line: &str) {
    head.push_str(line);
    head.push_str("\r\n");
}

#[inline]
fn push_header(head: &mut String, name: &str, value: &str) {
    head.push_str(name);
    head.push_str(": ");
    head.push_str(value);
    head.push_str("\r\n");
}

fn accepts_gzip(request_headers: &Headers) -> bool {
    request_headers
        .value_by_key("accept-encoding")
        .is_some_and(|values| values.iter().any(|value| value.contains("gzip")))
}

fn gzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}
