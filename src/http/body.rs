//! Request bodies decoded in one piece.

use crate::{
    errors::{Error, Result},
    http::{
        headers::Headers,
        query::{decode_value, PairCollector, Pairs, Rejected},
    },
    limits::ReqLimits,
};
use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

const MAX_LOGGED_DATA: usize = 1024;

static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bname\b="(.*?)""#).expect("name regex should be valid"));

static FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bfilename\b="(.*?)""#).expect("filename regex should be valid"));

/// A request body, decoded according to its `Content-Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// No body was sent.
    None,
    /// Bytes that were not (or could not be) decoded.
    Unrecognized(Vec<u8>),
    /// `application/x-www-form-urlencoded` pairs with decoded values.
    FormUrlEncoded(HashMap<String, Vec<u8>>),
    /// `multipart/form-data` partitions in arrival order.
    Multipart(Vec<Partition>),
}

/// Discriminant of [`Body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    Unrecognized,
    FormUrlEncoded,
    Multipart,
}

impl Body {
    pub fn kind(&self) -> BodyKind {
        match self {
            Body::None => BodyKind::None,
            Body::Unrecognized(_) => BodyKind::Unrecognized,
            Body::FormUrlEncoded(_) => BodyKind::FormUrlEncoded,
            Body::Multipart(_) => BodyKind::Multipart,
        }
    }

    /// Value of a form field, or content of the first partition with that name.
    pub fn as_bytes(&self, key: &str) -> Option<&[u8]> {
        match self {
            Body::FormUrlEncoded(map) => map.get(key).map(Vec::as_slice),
            Body::Multipart(partitions) => partitions
                .iter()
                .find(|p| p.disposition.name == key)
                .map(Partition::content),
            _ => None,
        }
    }

    /// Same as [`Body::as_bytes`], decoded as UTF-8 (lossy).
    pub fn as_string(&self, key: &str) -> Option<String> {
        self.as_bytes(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// The undecoded bytes of an [`Body::Unrecognized`] body.
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Body::Unrecognized(raw) => Some(raw),
            _ => None,
        }
    }

    /// All partitions of a multipart body (empty for other kinds).
    pub fn partitions(&self) -> &[Partition] {
        match self {
            Body::Multipart(partitions) => partitions,
            _ => &[],
        }
    }

    /// Partitions whose Content-Disposition carries `name`.
    pub fn partitions_by_name<'b>(&'b self, name: &'b str) -> impl Iterator<Item = &'b Partition> + 'b {
        self.partitions()
            .iter()
            .filter(move |p| p.disposition.name == name)
    }
}

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    headers: Headers,
    disposition: ContentDisposition,
    content: Vec<u8>,
}

impl Partition {
    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn content_disposition(&self) -> &ContentDisposition {
        &self.disposition
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// `name` and `filename` from a partition's `Content-Disposition`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDisposition {
    name: String,
    filename: String,
}

impl ContentDisposition {
    /// Extracts the disposition; `None` when there is no `name="..."`.
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        let joined = headers
            .value_by_key("content-disposition")
            .map(|values| values.join(";"))
            .unwrap_or_default();

        let name = NAME.captures(&joined)?[1].to_string();
        let filename = FILENAME
            .captures(&joined)
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        Some(Self { name, filename })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sent file name, empty when the partition is not a file.
    #[inline]
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

// DECODING

/// Decodes a complete body.
///
/// Only limit violations are errors. Anything else that cannot be decoded is
/// logged and returned as [`Body::Unrecognized`].
pub(crate) fn decode(content_type: &str, raw: Vec<u8>, limits: &ReqLimits) -> Result<Body> {
    if content_type.contains("application/x-www-form-urlencoded") {
        decode_form(raw, limits)
    } else if content_type.contains("multipart/form-data") {
        match boundary(content_type) {
            Some(boundary) => decode_multipart(raw, boundary, limits),
            None => {
                tracing::debug!(
                    "did not find a valid boundary value for the multipart input, header was: {content_type}"
                );
                Ok(Body::Unrecognized(Vec::new()))
            }
        }
    } else {
        tracing::trace!("content type {content_type:?} is not decoded");
        Ok(Body::Unrecognized(raw))
    }
}

/// The `boundary=` parameter of a multipart content type.
pub(crate) fn boundary(content_type: &str) -> Option<&str> {
    const KEY: &str = "boundary=";

    let index = content_type.find(KEY).filter(|&i| i > 0)?;
    let value = &content_type[index + KEY.len()..];
    let value = value.split(';').next().unwrap_or(value).trim().trim_matches('"');

    (!value.is_empty()).then_some(value)
}

#[derive(Default)]
struct FormCollector(HashMap<String, Vec<u8>>);

impl<'a> PairCollector<'a> for FormCollector {
    fn add_pair(&mut self, key: &'a [u8], value: Option<&'a [u8]>) -> Result<(), Rejected> {
        let key = String::from_utf8_lossy(key);
        let Some(value) = value else {
            return Err(Rejected::Malformed(format!("no '=' after key {key}")));
        };

        if key.trim().is_empty() {
            return Err(Rejected::Malformed("the key must not be blank".into()));
        }

        let value = decode_value(value);
        if let Some(previous) = self.0.insert(key.to_string(), value) {
            return Err(Rejected::Malformed(format!(
                "{key} was duplicated in the post body, had values of {} and {}",
                String::from_utf8_lossy(&previous),
                String::from_utf8_lossy(&self.0[&*key]),
            )));
        }

        Ok(())
    }
}

pub(crate) fn decode_form(raw: Vec<u8>, limits: &ReqLimits) -> Result<Body> {
    if raw.is_empty() {
        return Ok(Body::None);
    }

    let mut form = FormCollector::default();
    match Pairs::parse_into(&mut form, &raw, limits.form_pairs) {
        Ok(()) => Ok(Body::FormUrlEncoded(form.0)),
        Err(Rejected::OverLimit(limit)) => Err(Error::ForbiddenUse(format!(
            "too many pairs in the url-encoded body, max: {limit}"
        ))),
        Err(Rejected::Malformed(reason)) => Ok(unrecognized(raw, &reason)),
    }
}

pub(crate) fn decode_multipart(raw: Vec<u8>, boundary: &str, limits: &ReqLimits) -> Result<Body> {
    match split_partitions(&raw, boundary, limits)? {
        Ok(partitions) => Ok(Body::Multipart(partitions)),
        Err(reason) => Ok(unrecognized(raw, &reason)),
    }
}

/// The outer error aborts the request, the inner one degrades the body.
fn split_partitions(
    raw: &[u8],
    boundary: &str,
    limits: &ReqLimits,
) -> Result<Result<Vec<Partition>, String>> {
    let delimiter = format!("--{boundary}");
    let marker = format!("\r\n--{boundary}");
    let marker_finder = memmem::Finder::new(marker.as_bytes());

    let Some(first) = memmem::find(raw, delimiter.as_bytes()) else {
        return Ok(Err(format!("boundary {boundary} not found in the body")));
    };

    let mut partitions = Vec::new();
    let mut rest = &raw[first + delimiter.len()..];

    loop {
        if rest.is_empty() || rest.starts_with(b"--") {
            return Ok(Ok(partitions));
        }

        let part = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        let Some(end) = marker_finder.find(part) else {
            return Ok(Err("a partition is not closed by a boundary".into()));
        };

        if partitions.len() >= limits.partitions {
            return Err(Error::ForbiddenUse(format!(
                "too many partitions in the multipart body, max: {}",
                limits.partitions
            )));
        }

        let (headers, content) = Headers::read_block(&part[..end], limits)?;
        let Some(disposition) = ContentDisposition::from_headers(&headers) else {
            return Ok(Err("no name value found in the headers of a partition".into()));
        };

        partitions.push(Partition {
            headers,
            disposition,
            content: content.to_vec(),
        });
        rest = &part[end + marker.len()..];
    }
}

fn unrecognized(raw: Vec<u8>, reason: &str) -> Body {
    tracing::debug!(
        "unable to parse this body, returning the raw bytes: {reason}. Data: {}",
        preview(&raw)
    );
    Body::Unrecognized(raw)
}

pub(crate) fn preview(data: &[u8]) -> String {
    match data.len() > MAX_LOGGED_DATA {
        true => format!(
            "{} ... (remainder of data trimmed)",
            String::from_utf8_lossy(&data[..MAX_LOGGED_DATA])
        ),
        false => String::from_utf8_lossy(data).into_owned(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a multipart body: `(name, filename, content)` per partition.
    pub(crate) fn multipart(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();

        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match filename {
                Some(file) => body.extend_from_slice(
                    format!(
                        "Content-Type: application/octet-stream\r\n\
                         Content-Disposition: form-data; name=\"{name}\"; filename=\"{file}\"\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    #[test]
    fn url_encoded() {
        #[rustfmt::skip]
        let cases: [(&str, &[(&str, &[u8])]); 4] = [
            ("value_a=123&value_b=456",       &[("value_a", b"123"), ("value_b", b"456")]),
            ("text=hello+world&sym=%26%3D",   &[("text", b"hello world"), ("sym", b"&=")]),
            ("empty=",                        &[("empty", b"")]),
            ("bin=%00%FF",                    &[("bin", &[0x00, 0xff])]),
        ];

        for (raw, expected) in cases {
            let body = decode_form(raw.as_bytes().to_vec(), &ReqLimits::default()).unwrap();
            assert_eq!(body.kind(), BodyKind::FormUrlEncoded, "{raw}");

            for (key, value) in expected {
                assert_eq!(body.as_bytes(key), Some(*value), "{raw}");
            }
        }
    }

    #[test]
    fn url_encoded_degrades() {
        #[rustfmt::skip]
        let cases = [
            "a=1&a=2",
            "=1",
            " =1",
            "a=1&novalue",
        ];

        for raw in cases {
            let body = decode_form(raw.as_bytes().to_vec(), &ReqLimits::default()).unwrap();
            assert_eq!(body, Body::Unrecognized(raw.as_bytes().to_vec()), "{raw}");
        }
    }

    #[test]
    fn url_encoded_round_trip() {
        let map: HashMap<String, Vec<u8>> = [
            ("name", "Ferris the crab"),
            ("symbols", "a&b=c+d%e"),
            ("unicode", "\u{1f980} \u{e9}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect();

        let encoded = map
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode_binary(v)))
            .collect::<Vec<_>>()
            .join("&");

        let body = decode_form(encoded.into_bytes(), &ReqLimits::default()).unwrap();
        assert_eq!(body, Body::FormUrlEncoded(map));
    }

    #[test]
    fn pair_limit() {
        let limits = ReqLimits {
            form_pairs: 3,
            ..ReqLimits::default()
        };

        assert!(decode_form(b"a=1&b=2&c=3".to_vec(), &limits).is_ok());
        assert!(matches!(
            decode_form(b"a=1&b=2&c=3&d=4".to_vec(), &limits),
            Err(Error::ForbiddenUse(_))
        ));
    }

    #[test]
    fn multipart_partitions() {
        let binary: Vec<u8> = (0..=255u8).chain(*b"\r\n--boun").chain(*b"\r\n-").collect();
        let raw = multipart(
            "bound",
            &[
                ("text1", None, b"I am a value that is text"),
                ("image_uploads", Some("photo.jpg"), &binary),
                ("empty", None, b""),
            ],
        );

        let body = decode("multipart/form-data; boundary=bound", raw, &ReqLimits::default()).unwrap();
        let partitions = body.partitions();

        assert_eq!(partitions.len(), 3);
        assert_eq!(body.as_string("text1").unwrap(), "I am a value that is text");
        assert_eq!(partitions[1].content(), binary);
        assert_eq!(partitions[1].content_disposition().filename(), "photo.jpg");
        assert_eq!(partitions[0].content_disposition().filename(), "");
        assert_eq!(body.as_bytes("empty"), Some(&b""[..]));
        assert_eq!(body.partitions_by_name("image_uploads").count(), 1);
    }

    #[test]
    fn lookups_outlive_the_key() {
        let raw = multipart("bound", &[("photo", Some("a.png"), b"png bytes")]);
        let body = decode("multipart/form-data; boundary=bound", raw, &ReqLimits::default()).unwrap();

        let content = {
            let key = String::from("photo");
            body.as_bytes(&key)
        };
        assert_eq!(content, Some(&b"png bytes"[..]));

        let form = decode_form(b"a=1".to_vec(), &ReqLimits::default()).unwrap();
        let value = {
            let key = format!("{}", 'a');
            form.as_bytes(&key)
        };
        assert_eq!(value, Some(&b"1"[..]));
    }

    #[test]
    fn multipart_degrades() {
        let limits = ReqLimits::default();

        // no name in the Content-Disposition
        let raw = b"--b\r\nContent-Disposition: form-data\r\n\r\nx\r\n--b--\r\n".to_vec();
        let body = decode("multipart/form-data; boundary=b", raw.clone(), &limits).unwrap();
        assert_eq!(body, Body::Unrecognized(raw));

        // missing boundary parameter
        let body = decode("multipart/form-data", b"whatever".to_vec(), &limits).unwrap();
        assert_eq!(body, Body::Unrecognized(Vec::new()));

        // boundary never appears
        let body = decode("multipart/form-data; boundary=zzz", b"abc".to_vec(), &limits).unwrap();
        assert_eq!(body.kind(), BodyKind::Unrecognized);
    }

    #[test]
    fn partition_limit() {
        let limits = ReqLimits {
            partitions: 2,
            ..ReqLimits::default()
        };
        let parts: [(&str, Option<&str>, &[u8]); 3] =
            [("a", None, b"1"), ("b", None, b"2"), ("c", None, b"3")];

        let result = decode_multipart(multipart("x", &parts), "x", &limits);
        assert!(matches!(result, Err(Error::ForbiddenUse(_))));
        assert!(decode_multipart(multipart("x", &parts[..2]), "x", &limits).is_ok());
    }

    #[test]
    fn boundaries() {
        #[rustfmt::skip]
        let cases = [
            ("multipart/form-data; boundary=abc",            Some("abc")),
            ("multipart/form-data; boundary=\"quoted\"",     Some("quoted")),
            ("multipart/form-data; boundary=abc; x=y",       Some("abc")),
            ("multipart/form-data; boundary=",               None),
            ("multipart/form-data",                          None),
            ("boundary=abc",                                 None),
        ];

        for (content_type, expected) in cases {
            assert_eq!(boundary(content_type), expected, "{content_type}");
        }
    }

    #[test]
    fn other_content_types() {
        let body = decode("application/json", b"{\"a\":1}".to_vec(), &ReqLimits::default()).unwrap();

        assert_eq!(body.raw(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(body.as_bytes("a"), None);
        assert!(body.partitions().is_empty());
    }

    #[test]
    fn log_preview() {
        assert_eq!(preview(b"short"), "short");

        let long = vec![b'a'; 2000];
        let shown = preview(&long);
        assert!(shown.starts_with(&"a".repeat(1024)));
        assert!(shown.ends_with("(remainder of data trimmed)"));
    }
}
