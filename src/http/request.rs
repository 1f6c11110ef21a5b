//! HTTP/1.1 request parsing using the [`httparse`] crate, plus construction of
//! outbound requests from locators.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use super::{Headers, Locator, LocatorError, Method, Origin};

/// Errors that can occur while parsing or building an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete: more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid request target: {0}")]
    Target(#[from] LocatorError),

    #[error("invalid Content-Length header")]
    InvalidContentLength,
}

/// A parsed or constructed HTTP/1.1 request.
///
/// `origin` is set when the request target was absolute (`http://host/path`),
/// either because a proxy client sent absolute-form or because the request was
/// built from an absolute locator. Origin-form requests leave it `None`.
///
/// # Examples
///
/// ```
/// use offcache::http::request::Request;
///
/// let raw = b"GET /static/custom.css?v=1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, consumed) = Request::parse(raw).unwrap();
///
/// assert_eq!(consumed, raw.len());
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/static/custom.css");
/// assert_eq!(request.query_param("v"), Some("1"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    origin: Option<Origin>,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    params: HashMap<String, String>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse one HTTP/1.1 request from the front of `buf`.
    ///
    /// Returns the `Request` and the total number of bytes it occupies
    /// (head plus `Content-Length` body), so the caller can drop exactly
    /// that many bytes from a pipelined connection buffer.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head or the declared body has not fully arrived.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::Target`]: the request target is not a usable locator.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => m.parse().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target: Locator = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .parse()?;

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            match std::str::from_utf8(header.value) {
                Ok(value) => header_map.insert(header.name, value),
                Err(_) => debug!(header = header.name, "dropping non-UTF-8 header value"),
            }
        }

        let content_length = match header_map.get("content-length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| RequestError::InvalidContentLength)?,
            None => 0,
        };
        let total = body_offset + content_length;
        if buf.len() < total {
            return Err(RequestError::Incomplete);
        }

        let mut request = Self::from_parts(method, target, version, header_map);
        request.body = Bytes::copy_from_slice(&buf[body_offset..total]);
        Ok((request, total))
    }

    /// Builds an outbound HTTP/1.1 request for `locator` with no headers or body.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Target`] if `locator` cannot be parsed.
    pub fn new(method: Method, locator: &str) -> Result<Self, RequestError> {
        let target: Locator = locator.parse()?;
        Ok(Self::from_parts(method, target, 1, Headers::new()))
    }

    /// Shorthand for `Request::new(Method::Get, locator)`.
    pub fn get(locator: &str) -> Result<Self, RequestError> {
        Self::new(Method::Get, locator)
    }

    fn from_parts(method: Method, target: Locator, version: u8, headers: Headers) -> Self {
        let (origin, path, query) = target.into_parts();
        let params = query.as_deref().map(parse_query_string).unwrap_or_default();
        Self {
            method,
            origin,
            path,
            version,
            headers,
            query,
            body: Bytes::new(),
            params,
        }
    }

    /// Appends a header, builder style.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the body, builder style.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The origin of an absolute-form target, if any.
    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The request-target in origin-form (`/path?query`).
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Only `+` is decoded (as a space); cache keys use the raw query string, so
/// these values are informational.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, consumed) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert!(req.origin().is_none());
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn parse_absolute_form_target() {
        let raw = b"GET http://cdn.example.com/lib.js?v=3 HTTP/1.1\r\nHost: cdn.example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.origin().unwrap().host(), "cdn.example.com");
        assert_eq!(req.path_and_query(), "/lib.js?v=3");
    }

    #[test]
    fn incomplete_head() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn incomplete_body() {
        let raw = b"POST /api/data HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn pipelined_requests_are_split() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\n\r\n";
        let (first, consumed) = Request::parse(raw).unwrap();
        assert_eq!(first.body().as_ref(), b"hello");
        let (second, _) = Request::parse(&raw[consumed..]).unwrap();
        assert_eq!(second.path(), "/b");
    }

    #[test]
    fn rejects_bad_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidContentLength)
        ));
    }

    #[test]
    fn keep_alive_defaults() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn built_from_locator() {
        let req = Request::get("/static/manifest.json").unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/static/manifest.json");
        assert!(req.body().is_empty());

        assert!(matches!(
            Request::get("manifest.json"),
            Err(RequestError::Target(_))
        ));
    }

    #[test]
    fn non_utf8_header_value_is_dropped() {
        let raw = b"GET / HTTP/1.1\r\nX-Name: caf\xe9\r\nAccept: */*\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.headers().get("x-name"), None);
        assert_eq!(req.headers().get("accept"), Some("*/*"));
    }
}
