//! Request bodies read incrementally, straight from the connection.
//!
//! Neither cursor holds more than one key (URL-encoded) or one boundary
//! marker (multipart) in memory, so they are not subject to
//! [`ReqLimits::body_size`].

use crate::{
    errors::{Error, Result},
    http::{body::ContentDisposition, headers::Headers, query::decode_value, source::ByteSource},
    limits::ReqLimits,
};
use std::io;

// RING BUFFER

/// Fixed-size byte window over the most recent input.
///
/// Used as a delay line: once full, every pushed byte evicts the oldest one,
/// which is then known not to be part of a marker still being matched.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");

        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Appends a byte, returning the evicted one when the buffer was full.
    #[inline]
    pub fn push(&mut self, byte: u8) -> Option<u8> {
        let capacity = self.buf.len();

        if self.len < capacity {
            self.buf[(self.head + self.len) % capacity] = byte;
            self.len += 1;
            return None;
        }

        let evicted = std::mem::replace(&mut self.buf[self.head], byte);
        self.head = (self.head + 1) % capacity;
        Some(evicted)
    }

    /// `true` when the buffer is full and holds exactly `pattern`,
    /// oldest byte first.
    #[inline]
    pub fn matches(&self, pattern: &[u8]) -> bool {
        self.len == self.buf.len()
            && pattern.len() == self.len
            && pattern
                .iter()
                .enumerate()
                .all(|(i, &b)| self.buf[(self.head + i) % self.len] == b)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

// URL-ENCODED

/// Pulls `key=value` pairs off a URL-encoded body one at a time.
///
/// # Examples
/// ```no_run
/// # use hearth_web::{Request, Response, StatusCode};
/// # async fn handler(request: &mut Request<'_>) -> anyhow::Result<Response> {
/// let mut pairs = request.url_encoded()?;
///
/// while let Some(mut value) = pairs.next_pair().await? {
///     if value.key() == "comment" {
///         let text = value.read_decoded().await?;
///         println!("{}", String::from_utf8_lossy(&text));
///     }
/// }
/// # Ok(Response::lean(StatusCode::Ok))
/// # }
/// ```
pub struct UrlEncodedCursor<R> {
    source: R,
    pairs: usize,
    max_pairs: usize,
    max_key: usize,
    value_open: bool,
    finished: bool,
}

impl<R: ByteSource> UrlEncodedCursor<R> {
    pub fn new(source: R, limits: &ReqLimits) -> Self {
        Self {
            source,
            pairs: 0,
            max_pairs: limits.form_pairs,
            max_key: limits.form_key_size,
            value_open: false,
            finished: false,
        }
    }

    /// Reads the next key, returning a reader for its value.
    ///
    /// Whatever the previous value reader left unread is skipped first.
    /// A key longer than [`ReqLimits::form_key_size`], or more pairs than
    /// [`ReqLimits::form_pairs`], is a forbidden use.
    pub async fn next_pair(&mut self) -> Result<Option<UrlEncodedValue<'_, R>>> {
        while self.value_byte().await?.is_some() {}

        if self.finished {
            return Ok(None);
        }

        let mut key = Vec::new();
        let mut has_value = true;

        loop {
            match self.source.read_byte().await? {
                Some(b'=') => break,
                Some(b'&') => {
                    has_value = false;
                    break;
                }
                Some(byte) => {
                    if key.len() >= self.max_key {
                        return Err(Error::ForbiddenUse(format!(
                            "url-encoded key longer than allowed, max: {}",
                            self.max_key
                        )));
                    }
                    key.push(byte);
                }
                None => {
                    self.finished = true;
                    if key.is_empty() {
                        return Ok(None);
                    }
                    has_value = false;
                    break;
                }
            }
        }

        if self.pairs >= self.max_pairs {
            return Err(Error::ForbiddenUse(format!(
                "too many pairs in the url-encoded body, max: {}",
                self.max_pairs
            )));
        }
        self.pairs += 1;
        self.value_open = has_value;

        Ok(Some(UrlEncodedValue {
            key: String::from_utf8_lossy(&key).into_owned(),
            cursor: self,
        }))
    }

    async fn value_byte(&mut self) -> Result<Option<u8>> {
        if !self.value_open {
            return Ok(None);
        }

        match self.source.read_byte().await? {
            Some(b'&') => {
                self.value_open = false;
                Ok(None)
            }
            Some(byte) => Ok(Some(byte)),
            None => {
                self.value_open = false;
                self.finished = true;
                Ok(None)
            }
        }
    }
}

/// The value of one URL-encoded pair, readable until the next `&` or the
/// end of the body.
pub struct UrlEncodedValue<'c, R> {
    key: String,
    cursor: &'c mut UrlEncodedCursor<R>,
}

impl<R: ByteSource> UrlEncodedValue<'_, R> {
    /// The key as sent (not percent-decoded).
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next raw byte of the value.
    #[inline]
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        self.cursor.value_byte().await
    }

    /// The rest of the value, still percent-encoded.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut value = Vec::new();
        while let Some(byte) = self.cursor.value_byte().await? {
            value.push(byte);
        }
        Ok(value)
    }

    /// The rest of the value, percent-decoded.
    pub async fn read_decoded(&mut self) -> Result<Vec<u8>> {
        self.read_to_end().await.map(|raw| decode_value(&raw))
    }
}

// MULTIPART

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Start,
    Content { at_marker: bool },
    Between,
    Finished,
}

/// Pulls partitions off a multipart body one at a time.
///
/// Partition content is scanned byte by byte through a [`RingBuffer`] as
/// long as `"\r\n--" + boundary`; content is released only once it can no
/// longer be the start of that marker.
pub struct MultipartCursor<R> {
    source: R,
    boundary: String,
    marker: Vec<u8>,
    ring: RingBuffer,
    limits: ReqLimits,
    position: Position,
    partitions: usize,
}

impl<R: ByteSource> MultipartCursor<R> {
    pub fn new(source: R, boundary: &str, limits: &ReqLimits) -> Self {
        let marker = format!("\r\n--{boundary}").into_bytes();

        Self {
            source,
            boundary: boundary.to_string(),
            ring: RingBuffer::new(marker.len()),
            marker,
            limits: limits.clone(),
            position: Position::Start,
            partitions: 0,
        }
    }

    /// Moves to the next partition, skipping what is left of the current one.
    ///
    /// The first line of the body must contain the boundary, else this is an
    /// I/O error (`InvalidData`). More partitions than
    /// [`ReqLimits::partitions`] is a forbidden use.
    pub async fn next_partition(&mut self) -> Result<Option<StreamingPartition<'_, R>>> {
        match self.position {
            Position::Start => {
                let Some(line) = self.source.read_line(self.limits.max_line_size).await? else {
                    self.position = Position::Finished;
                    return Ok(None);
                };

                if !line.contains(&self.boundary) {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("the first line of a multipart body must contain the boundary, got {line:?}"),
                    )));
                }

                self.position = match line.trim_end().ends_with("--") {
                    true => Position::Finished,
                    false => Position::Between,
                };
            }
            Position::Content { .. } => while self.content_byte().await?.is_some() {},
            Position::Between | Position::Finished => {}
        }

        if self.position == Position::Finished {
            return Ok(None);
        }

        if self.partitions >= self.limits.partitions {
            return Err(Error::ForbiddenUse(format!(
                "too many partitions in the multipart body, max: {}",
                self.limits.partitions
            )));
        }
        self.partitions += 1;

        let headers = Headers::read(&mut self.source, &self.limits).await?;
        let disposition = ContentDisposition::from_headers(&headers).unwrap_or_else(|| {
            tracing::debug!("no name value found in the headers of a partition: {headers:?}");
            ContentDisposition::default()
        });

        self.ring.clear();
        self.position = Position::Content { at_marker: false };

        Ok(Some(StreamingPartition {
            headers,
            disposition,
            cursor: self,
        }))
    }

    async fn content_byte(&mut self) -> Result<Option<u8>> {
        loop {
            match self.position {
                Position::Content { at_marker: false } => {}
                Position::Content { at_marker: true } => {
                    self.finish_partition().await?;
                    return Ok(None);
                }
                _ => return Ok(None),
            }

            let Some(byte) = self.source.read_byte().await? else {
                tracing::debug!("multipart body ended inside a partition");
                self.position = Position::Finished;
                return Ok(None);
            };

            let evicted = self.ring.push(byte);
            if self.ring.matches(&self.marker) {
                self.position = Position::Content { at_marker: true };
            }

            if evicted.is_some() {
                return Ok(evicted);
            }
        }
    }

    /// Consumes the two bytes after a marker: `--` ends the body, anything
    /// else (normally CRLF) starts the next partition.
    ///
    /// The CRLF after the closing marker is consumed too, so a fully read
    /// body leaves nothing behind.
    async fn finish_partition(&mut self) -> Result<()> {
        let first = self.source.read_byte().await?;
        let second = self.source.read_byte().await?;

        self.ring.clear();
        self.position = match (first, second) {
            (Some(b'-'), Some(b'-')) => {
                if self.source.read_byte().await? == Some(b'\r') {
                    self.source.read_byte().await?;
                }
                Position::Finished
            }
            (None, _) | (_, None) => Position::Finished,
            _ => Position::Between,
        };
        Ok(())
    }
}

/// One partition of a multipart body, read as a stream.
pub struct StreamingPartition<'c, R> {
    headers: Headers,
    disposition: ContentDisposition,
    cursor: &'c mut MultipartCursor<R>,
}

impl<R: ByteSource> StreamingPartition<'_, R> {
    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Disposition of this partition; the name is empty when none was sent.
    #[inline]
    pub fn content_disposition(&self) -> &ContentDisposition {
        &self.disposition
    }

    #[inline]
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        self.cursor.content_byte().await
    }

    /// Fills `buf` with content, returning how many bytes were written
    /// (`0` once the partition is done).
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut count = 0;
        while count < buf.len() {
            match self.cursor.content_byte().await? {
                Some(byte) => buf[count] = byte,
                None => break,
            }
            count += 1;
        }
        Ok(count)
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        while let Some(byte) = self.cursor.content_byte().await? {
            content.push(byte);
        }
        Ok(content)
    }

    /// Skips the rest of the content.
    pub async fn close(mut self) -> Result<()> {
        while self.read_byte().await?.is_some() {}
        Ok(())
    }
}
