//! `key=value&key=value` tokenizer shared by query strings and URL-encoded bodies.

use memchr::memchr;
use std::{borrow::Cow, collections::HashMap, fmt};

/// Splits `&`-separated pairs on their first `=`.
///
/// The splitting is zero-copy: collectors receive slices of the input and
/// decide themselves what to decode and what to reject.
///
/// ```text
/// a=1&b=two+words&c=%40
/// ^^^ ^^^^^^^^^^^ ^^^^^  three tokens, at most `limit`
/// ```
pub(crate) struct Pairs;

impl Pairs {
    #[inline]
    pub(crate) fn parse_into<'a, C: PairCollector<'a>>(
        result: &mut C,
        data: &'a [u8],
        limit: usize,
    ) -> Result<(), Rejected> {
        let mut start = 0;
        let mut tokens = 0;

        loop {
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());
            let token = &data[start..end];

            if !(token.is_empty() && C::SKIP_EMPTY) {
                if tokens >= limit {
                    return Err(Rejected::OverLimit(limit));
                }
                tokens += 1;

                let (key, value) = match memchr(b'=', token) {
                    Some(index) => (&token[..index], Some(&token[index + 1..])),
                    None => (token, None),
                };
                result.add_pair(key, value)?;
            }

            if end >= data.len() {
                return Ok(());
            }
            start = end + 1;
        }
    }
}

/// Receives the pairs found by [`Pairs::parse_into`].
pub(crate) trait PairCollector<'a> {
    /// Zero-length tokens (`a=1&&b=2`, a trailing `&`) are skipped without
    /// counting toward the limit.
    const SKIP_EMPTY: bool = false;

    /// `value` is `None` when the token has no `=`.
    fn add_pair(&mut self, key: &'a [u8], value: Option<&'a [u8]>) -> Result<(), Rejected>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Rejected {
    /// More tokens than the configured limit.
    OverLimit(usize),
    /// A token the collector does not accept.
    Malformed(String),
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::OverLimit(limit) => write!(f, "too many key-value pairs, limit: {limit}"),
            Rejected::Malformed(reason) => f.write_str(reason),
        }
    }
}

/// Percent-decodes a value, treating `+` as a space.
pub(crate) fn decode_value(raw: &[u8]) -> Vec<u8> {
    let spaced: Cow<'_, [u8]> = match memchr(b'+', raw) {
        Some(_) => Cow::Owned(
            raw.iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect(),
        ),
        None => Cow::Borrowed(raw),
    };

    urlencoding::decode_binary(&spaced).into_owned()
}

// QUERY STRING

/// Decoded query string: keys as sent, values percent-decoded.
#[derive(Debug, Default)]
pub(crate) struct QueryMap(pub(crate) HashMap<String, String>);

impl<'a> PairCollector<'a> for QueryMap {
    const SKIP_EMPTY: bool = true;

    fn add_pair(&mut self, key: &'a [u8], value: Option<&'a [u8]>) -> Result<(), Rejected> {
        match value {
            Some(value) if !key.is_empty() => {
                let value = decode_value(value);
                // last duplicate wins
                self.0.insert(
                    String::from_utf8_lossy(key).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                );
                Ok(())
            }
            _ => Err(Rejected::Malformed(format!(
                "query token without a key: {}",
                String::from_utf8_lossy(key)
            ))),
        }
    }
}

/// Decodes a raw query string.
///
/// A token without `=` or with an empty key discards the whole query,
/// yielding an empty map; empty tokens are skipped. More than `limit`
/// tokens is a forbidden use.
pub(crate) fn parse_query(raw: &str, limit: usize) -> crate::Result<HashMap<String, String>> {
    if raw.is_empty() {
        return Ok(HashMap::new());
    }

    let mut map = QueryMap::default();
    match Pairs::parse_into(&mut map, raw.as_bytes(), limit) {
        Ok(()) => Ok(map.0),
        Err(Rejected::OverLimit(limit)) => Err(crate::Error::ForbiddenUse(format!(
            "too many query keys, limit: {limit}"
        ))),
        Err(Rejected::Malformed(reason)) => {
            tracing::trace!("ignoring query string {raw:?}: {reason}");
            Ok(HashMap::new())
        }
    }
}
