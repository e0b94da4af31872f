//! Request start line: `METHOD [/]TARGET HTTP/(1.1|1.0)`.

use crate::{
    errors::Result,
    http::{
        query::parse_query,
        types::{Method, Version},
    },
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static START_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]{3,8}) /?(.*) HTTP/(1\.1|1\.0)$").expect("start line regex should be valid")
});

/// The request target split into path and query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathDetails {
    isolated_path: String,
    raw_query: Option<String>,
    query: HashMap<String, String>,
}

impl PathDetails {
    fn from_target(target: &str, query_keys: usize) -> Result<Self> {
        match target.find('?') {
            Some(index) if index > 0 => {
                let raw_query = &target[index + 1..];

                Ok(Self {
                    isolated_path: target[..index].to_string(),
                    query: parse_query(raw_query, query_keys)?,
                    raw_query: Some(raw_query.to_string()),
                })
            }
            _ => Ok(Self {
                isolated_path: target.to_string(),
                ..Self::default()
            }),
        }
    }

    /// Path without the leading `/` and without the query,
    /// e.g. `"users/42"` for `GET /users/42?full=1 HTTP/1.1`.
    #[inline]
    pub fn isolated_path(&self) -> &str {
        &self.isolated_path
    }

    /// Everything after the first `?`, if there was one.
    #[inline]
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    /// Decoded query pairs.
    #[inline]
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }
}

/// A parsed request start line.
///
/// Malformed input never fails: it yields [`RequestLine::empty`], which is
/// told apart from a valid request for `/` by [`RequestLine::is_empty`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    path: PathDetails,
    version: Version,
    raw: String,
}

impl RequestLine {
    /// The "could not parse" value.
    pub fn empty() -> Self {
        Self {
            method: Method::None,
            path: PathDetails::default(),
            version: Version::None,
            raw: String::new(),
        }
    }

    /// Parses a start line (without its line terminator).
    ///
    /// The only error is [`Error::ForbiddenUse`](crate::Error::ForbiddenUse)
    /// for a query string with more than `query_keys` pairs.
    ///
    /// # Examples
    /// ```
    /// use hearth_web::{Method, RequestLine, Version};
    ///
    /// let line = RequestLine::parse("GET /search?q=rust+book HTTP/1.1", 50).unwrap();
    /// assert_eq!(line.method(), Method::Get);
    /// assert_eq!(line.path().isolated_path(), "search");
    /// assert_eq!(line.path().query()["q"], "rust book");
    /// assert_eq!(line.version(), Version::Http11);
    ///
    /// assert!(RequestLine::parse("nonsense", 50).unwrap().is_empty());
    /// ```
    pub fn parse(line: &str, query_keys: usize) -> Result<Self> {
        let Some(captures) = START_LINE.captures(line) else {
            return Ok(Self::empty());
        };

        let method = Method::from_token(&captures[1]);
        if method == Method::None {
            tracing::debug!("unable to convert method to enum: {}", &captures[1]);
        }

        Ok(Self {
            method,
            path: PathDetails::from_target(&captures[2], query_keys)?,
            version: Version::from_digits(&captures[3]),
            raw: line.to_string(),
        })
    }

    /// `true` for the "could not parse" value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn path(&self) -> &PathDetails {
        &self.path
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// The line exactly as received.
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Serializes the line back to wire form, always with a leading `/`.
    pub fn to_line(&self) -> String {
        match &self.path.raw_query {
            Some(query) => format!(
                "{} /{}?{} {}",
                self.method,
                self.path.isolated_path,
                query,
                self.version.as_str()
            ),
            None => format!(
                "{} /{} {}",
                self.method,
                self.path.isolated_path,
                self.version.as_str()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_lines() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1",                   Method::Get,     "",            None,           Version::Http11),
            ("GET /index.html HTTP/1.0",         Method::Get,     "index.html",  None,           Version::Http10),
            ("POST upload HTTP/1.1",             Method::Post,    "upload",      None,           Version::Http11),
            ("GET /find?a=1&b=2 HTTP/1.1",       Method::Get,     "find",        Some("a=1&b=2"), Version::Http11),
            ("GET /?a=1 HTTP/1.1",               Method::Get,     "?a=1",        None,           Version::Http11),
            ("GET /x?a=1&b HTTP/1.1",            Method::Get,     "x",           Some("a=1&b"),  Version::Http11),
            ("BREW /pot HTTP/1.1",               Method::None,    "pot",         None,           Version::Http11),
            ("OPTIONS /a/b/c HTTP/1.1",          Method::Options, "a/b/c",       None,           Version::Http11),
        ];

        for (raw, method, path, query, version) in cases {
            let line = RequestLine::parse(raw, 50).unwrap();

            assert!(!line.is_empty(), "{raw}");
            assert_eq!(line.method(), method, "{raw}");
            assert_eq!(line.path().isolated_path(), path, "{raw}");
            assert_eq!(line.path().raw_query(), query, "{raw}");
            assert_eq!(line.version(), version, "{raw}");
            assert_eq!(line.raw(), raw);
        }
    }

    #[test]
    fn malformed_lines() {
        #[rustfmt::skip]
        let cases = [
            "",
            "GET",
            "GET / HTTP/2.0",
            "get / HTTP/1.1",
            "GE / HTTP/1.1",
            "VERYLONGMETHOD / HTTP/1.1",
            "GET / HTTP/1.1 extra",
            "GET /HTTP/1.1",
        ];

        for raw in cases {
            let line = RequestLine::parse(raw, 50).unwrap();
            assert!(line.is_empty(), "{raw:?}");
            assert_eq!(line, RequestLine::empty());
        }
    }

    #[test]
    fn reserialize() {
        #[rustfmt::skip]
        let cases = [
            ("GET /hello HTTP/1.1",         "GET /hello HTTP/1.1"),
            ("DELETE /a?x=1 HTTP/1.0",      "DELETE /a?x=1 HTTP/1.0"),
            ("PUT users/7 HTTP/1.1",        "PUT /users/7 HTTP/1.1"),
        ];

        for (raw, expected) in cases {
            let line = RequestLine::parse(raw, 50).unwrap();
            assert_eq!(line.to_line(), expected);

            let again = RequestLine::parse(&line.to_line(), 50).unwrap();
            assert_eq!(again.method(), line.method());
            assert_eq!(again.path(), line.path());
            assert_eq!(again.version(), line.version());
        }
    }

    #[test]
    fn too_many_query_keys() {
        let query = (0..51).map(|i| format!("k{i}=v")).collect::<Vec<_>>().join("&");
        let result = RequestLine::parse(&format!("GET /q?{query} HTTP/1.1"), 50);

        assert!(matches!(result, Err(crate::Error::ForbiddenUse(_))));
    }
}
