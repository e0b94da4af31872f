//! Response status line: `HTTP/(1.1|1.0) CODE REASON`.

use crate::{
    errors::{Error, Result},
    http::types::{StatusCode, Version},
};
use once_cell::sync::Lazy;
use regex::Regex;

static STATUS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^HTTP/(1\.1|1\.0) ([0-9]{3}) (.*)$").expect("status line regex should be valid")
});

/// A parsed status line, as a client would read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    status: Option<StatusCode>,
    version: Version,
    raw: String,
}

impl StatusLine {
    /// The "nothing here" value.
    pub fn empty() -> Self {
        Self {
            status: None,
            version: Version::None,
            raw: String::new(),
        }
    }

    /// Parses a status line.
    ///
    /// Blank or non-matching lines give [`StatusLine::empty`]. A well-formed
    /// line whose code is not a [`StatusCode`] is [`Error::UnknownStatus`].
    pub fn parse(line: &str) -> Result<Self> {
        if line.trim().is_empty() {
            return Ok(Self::empty());
        }

        let Some(captures) = STATUS_LINE.captures(line) else {
            tracing::debug!("not a status line: {line:?}");
            return Ok(Self::empty());
        };

        let status = captures[2]
            .parse::<u16>()
            .ok()
            .and_then(StatusCode::from_code)
            .ok_or_else(|| Error::UnknownStatus(line.to_string()))?;

        Ok(Self {
            status: Some(status),
            version: Version::from_digits(&captures[1]),
            raw: line.to_string(),
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    #[inline]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}
