//! Header block collection and lookup.

use crate::{
    errors::{Error, Result},
    http::{
        source::{line_to_string, ByteSource},
        types::slice_to_usize,
    },
    limits::ReqLimits,
};
use memchr::memchr;
use std::collections::HashMap;

/// Header lines of a request (or of one multipart partition).
///
/// Keeps the raw lines in arrival order plus a lookup map with lowercased
/// keys and trimmed values. Lines without a usable `name:` prefix stay in
/// [`Headers::lines`] but are not in the map.
///
/// # Examples
/// ```
/// use hearth_web::Headers;
///
/// let headers = Headers::from_lines(["Content-Length: 12", "Accept: a", "accept: b"]);
///
/// assert_eq!(headers.content_length().unwrap(), Some(12));
/// assert_eq!(headers.value_by_key("ACCEPT").unwrap(), ["a", "b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    lines: Vec<String>,
    map: HashMap<String, Vec<String>>,
}

impl Headers {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds headers from already separated lines, with no limits applied.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let mut map: HashMap<String, Vec<String>> = HashMap::new();

        for line in &lines {
            match line.find(':') {
                Some(colon) if colon > 0 => map
                    .entry(line[..colon].to_ascii_lowercase())
                    .or_default()
                    .push(line[colon + 1..].trim().to_string()),
                _ => tracing::trace!("header line without a name: {line:?}"),
            }
        }

        Self { lines, map }
    }

    /// Reads header lines until a blank line or the end of the source.
    ///
    /// More than [`ReqLimits::header_count`] lines, or a line longer than
    /// [`ReqLimits::max_line_size`], is a forbidden use.
    pub async fn read<R: ByteSource>(source: &mut R, limits: &ReqLimits) -> Result<Self> {
        let mut lines = Vec::new();

        while let Some(line) = source.read_line(limits.max_line_size).await? {
            if line.trim().is_empty() {
                break;
            }
            push_line(&mut lines, line, limits.header_count)?;
        }

        Ok(Self::from_lines(lines))
    }

    /// Splits a header block off the front of `block`, returning the headers
    /// and what follows the blank line.
    pub(crate) fn read_block<'b>(block: &'b [u8], limits: &ReqLimits) -> Result<(Self, &'b [u8])> {
        let mut lines = Vec::new();
        let mut rest = block;

        while !rest.is_empty() {
            let end = memchr(b'\n', rest).map(|i| i + 1).unwrap_or(rest.len());
            if end > limits.max_line_size {
                return Err(Error::ForbiddenUse(format!(
                    "client sent more bytes than allowed for a single line, max: {}",
                    limits.max_line_size
                )));
            }

            let line = line_to_string(
                rest[..end]
                    .iter()
                    .copied()
                    .filter(|&b| b != b'\r' && b != b'\n')
                    .collect(),
            );
            rest = &rest[end..];

            if line.trim().is_empty() {
                break;
            }
            push_line(&mut lines, line, limits.header_count)?;
        }

        Ok((Self::from_lines(lines), rest))
    }

    /// Raw lines in arrival order.
    #[inline]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All values of a header, case-insensitively, in arrival order.
    pub fn value_by_key(&self, key: &str) -> Option<&[String]> {
        self.map.get(&key.to_ascii_lowercase()).map(Vec::as_slice)
    }

    /// The `Content-Type` value.
    ///
    /// More than one `Content-Type` header is an invariant violation.
    pub fn content_type(&self) -> Result<Option<&str>> {
        self.single("content-type")
    }

    /// The `Content-Length` value, `None` when absent.
    ///
    /// Anything but a single header made of ASCII digits is an invariant
    /// violation.
    pub fn content_length(&self) -> Result<Option<usize>> {
        match self.single("content-length")? {
            None => Ok(None),
            Some(value) => slice_to_usize(value.as_bytes())
                .map(Some)
                .ok_or_else(|| Error::Invariant(format!("content length must be a non-negative integer, got {value:?}"))),
        }
    }

    /// `true` when a `Connection` header asks for keep-alive.
    pub fn has_keep_alive(&self) -> bool {
        self.connection_contains("keep-alive")
    }

    /// `true` when a `Connection` header asks to close.
    pub fn has_connection_close(&self) -> bool {
        self.connection_contains("close")
    }

    /// `true` when the body uses `Transfer-Encoding: chunked`.
    pub fn is_chunked(&self) -> bool {
        self.value_by_key("transfer-encoding")
            .is_some_and(|values| values.iter().any(|v| v.to_ascii_lowercase().contains("chunked")))
    }

    fn single(&self, key: &str) -> Result<Option<&str>> {
        match self.map.get(key).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([value]) => Ok(Some(value.as_str())),
            Some(values) => Err(Error::Invariant(format!(
                "the number of {key} headers must be zero or one, received: {values:?}"
            ))),
        }
    }

    fn connection_contains(&self, token: &str) -> bool {
        self.value_by_key("connection")
            .is_some_and(|values| values.iter().any(|v| v.to_ascii_lowercase().contains(token)))
    }
}

#[inline]
fn push_line(lines: &mut Vec<String>, line: String, limit: usize) -> Result<()> {
    if lines.len() >= limit {
        return Err(Error::ForbiddenUse(format!(
            "client tried sending too many headers, max: {limit}"
        )));
    }
    lines.push(line);
    Ok(())
}
