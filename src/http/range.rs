//! Single byte-range requests (`Range: bytes=first-last`).

use crate::{
    errors::{Error, Result},
    http::headers::Headers,
};
use once_cell::sync::Lazy;
use regex::Regex;

static RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^bytes=([0-9]{0,13})-([0-9]{0,13})$").expect("range regex should be valid")
});

/// The part of a resource a request asked for.
///
/// Only a single range is honored. A header that does not parse (multiple
/// ranges included) selects the whole resource.
///
/// # Examples
/// ```
/// use hearth_web::{Headers, Range};
///
/// let headers = Headers::from_lines(["Range: bytes=-499"]);
/// let range = Range::new(&headers, 1000).unwrap();
///
/// assert_eq!((range.offset(), range.length()), (501, 499));
/// assert!(range.has_range());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    first: Option<u64>,
    second: Option<u64>,
    full_length: u64,
    offset: u64,
    length: u64,
    has_range: bool,
}

impl Range {
    /// Computes the range requested by `headers` for a resource of
    /// `full_length` bytes.
    ///
    /// Errors with [`Error::InvalidRange`] for more than one `Range` header,
    /// a first offset past the second or past the end of the resource, and a
    /// suffix range that selects no bytes (`bytes=-0`).
    pub fn new(headers: &Headers, full_length: u64) -> Result<Self> {
        let whole = Self {
            first: None,
            second: None,
            full_length,
            offset: 0,
            length: full_length,
            has_range: false,
        };

        let value = match headers.value_by_key("range") {
            None | Some([]) => return Ok(whole),
            Some([value]) => value,
            Some(_) => {
                return Err(Error::InvalidRange(
                    "request contained more than one Range header".into(),
                ))
            }
        };

        let Some(captures) = RANGE.captures(value) else {
            tracing::trace!("ignoring unsupported range {value:?}");
            return Ok(whole);
        };

        // at most 13 digits each, so these always fit
        let first = captures[1].parse::<u64>().ok();
        let second = captures[2].parse::<u64>().ok();

        let (offset, length) = match (first, second) {
            (Some(first), Some(second)) if first > second => {
                return Err(Error::InvalidRange(format!(
                    "the first part of the range ({first}) was larger than the second ({second})"
                )))
            }
            (Some(first), _) if first >= full_length => {
                return Err(Error::InvalidRange(format!(
                    "range starts at {first}, past the end of a {full_length} byte resource"
                )))
            }
            (Some(first), Some(second)) => (first, second.min(full_length - 1) - first + 1),
            (Some(first), None) => (first, full_length - first),
            (None, Some(second)) if second == 0 || full_length == 0 => {
                return Err(Error::InvalidRange(format!(
                    "suffix range of {second} bytes selects nothing from a {full_length} byte resource"
                )))
            }
            (None, Some(second)) => {
                let second = second.min(full_length);
                (full_length - second, second)
            }
            (None, None) => return Ok(whole),
        };

        Ok(Self {
            first,
            second,
            full_length,
            offset,
            length,
            has_range: true,
        })
    }

    /// Start of the selected bytes.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of selected bytes.
    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    #[inline]
    pub fn full_length(&self) -> u64 {
        self.full_length
    }

    /// The numbers as sent, before clamping.
    #[inline]
    pub fn parts(&self) -> (Option<u64>, Option<u64>) {
        (self.first, self.second)
    }

    /// `true` when a usable `Range` header selected part of the resource.
    #[inline]
    pub fn has_range(&self) -> bool {
        self.has_range
    }

    /// Last selected byte, as used in `Content-Range`.
    #[inline]
    pub fn last(&self) -> u64 {
        (self.offset + self.length).saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges() {
        #[rustfmt::skip]
        let cases: [(&[&str], (u64, u64), bool); 10] = [
            (&[],                          (0, 1000),   false),
            (&["Range: bytes=0-499"],      (0, 500),    true),
            (&["Range: bytes=-499"],       (501, 499),  true),
            (&["Range: bytes=2-"],         (2, 998),    true),
            (&["Range: bytes=10-10"],      (10, 1),     true),
            (&["Range: bytes=900-5000"],   (900, 100),  true),
            (&["Range: bytes=-5000"],      (0, 1000),   true),
            (&["Range: bytes=0-1,5-9"],    (0, 1000),   false),
            (&["Range: lines=1-2"],        (0, 1000),   false),
            (&["Range: bytes=-"],          (0, 1000),   false),
        ];

        for (lines, (offset, length), has_range) in cases {
            let headers = Headers::from_lines(lines.iter().copied());
            let range = Range::new(&headers, 1000).unwrap();

            assert_eq!((range.offset(), range.length()), (offset, length), "{lines:?}");
            assert_eq!(range.has_range(), has_range, "{lines:?}");
            assert_eq!(range.full_length(), 1000);
        }
    }

    #[test]
    fn invalid_ranges() {
        #[rustfmt::skip]
        let cases: [(&[&str], u64); 6] = [
            (&["Range: bytes=500-100"],                 1000),
            (&["Range: bytes=0-1", "Range: bytes=2-3"], 1000),
            (&["Range: bytes=1000-"],                   1000),
            (&["Range: bytes=-0"],                      1000),
            (&["Range: bytes=-000"],                    1000),
            (&["Range: bytes=-10"],                     0),
        ];

        for (lines, full_length) in cases {
            let headers = Headers::from_lines(lines.iter().copied());
            assert!(
                matches!(Range::new(&headers, full_length), Err(Error::InvalidRange(_))),
                "{lines:?}"
            );
        }
    }

    #[test]
    fn last_byte() {
        let headers = Headers::from_lines(["Range: bytes=0-499"]);
        let range = Range::new(&headers, 1000).unwrap();

        assert_eq!(range.last(), 499);
        assert_eq!(range.parts(), (Some(0), Some(499)));
    }
}
