//! HTTP/1.1 request parsing on top of [`httparse`].

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request.
///
/// The transport stamps the peer address on with [`Request::with_remote_addr`]
/// after parsing; the session store binds sessions to that address.
///
/// # Examples
///
/// ```
/// use waypost::http::request::Request;
///
/// let raw = b"GET /users/7?tab=posts HTTP/1.1\r\nHost: localhost\r\nCookie: data=abc; theme=dark\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/users/7");
/// assert_eq!(request.query_param("tab"), Some("posts"));
/// assert_eq!(request.cookie("data"), Some("abc"));
/// assert_eq!(request.remote_ip(), "");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request and the offset where the body starts. The body is
    /// whatever follows the head in `buf`; the caller waits for `Content-Length`
    /// bytes before parsing.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head has not fully arrived.
    /// - [`RequestError::Parse`]: the head is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.append(header.name, value);
            }
        }

        let params = query.as_deref().map(parse_query_string).unwrap_or_default();
        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
                params,
                remote_addr: None,
            },
            body_offset,
        ))
    }

    /// Records the peer address of the connection the request arrived on.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Peer IP without the port, or an empty string when the request did not
    /// come through the transport.
    pub fn remote_ip(&self) -> String {
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// `User-Agent` header value, empty when absent.
    pub fn user_agent(&self) -> &str {
        self.headers.get("user-agent").unwrap_or("")
    }

    /// Value of the named cookie across every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all("cookie")
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 only with an explicit header.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// Splits `key=value&key2=value2`, decoding `+` as a space.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn query_string_is_split_from_path() {
        let raw = b"GET /search?q=rust+lang&page=2&flag HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(req.query_param("page"), Some("2"));
        assert_eq!(req.query_param("flag"), Some(""));
    }

    #[test]
    fn incomplete_head() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn cookies_across_headers() {
        let raw = b"GET / HTTP/1.1\r\nCookie: a=1; b=2\r\nCookie: data=tok\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.cookie("b"), Some("2"));
        assert_eq!(req.cookie("data"), Some("tok"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn remote_ip_strips_port() {
        let raw = b"GET / HTTP/1.1\r\nUser-Agent: probe\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let req = req.with_remote_addr("10.1.2.3:55000".parse().unwrap());
        assert_eq!(req.remote_ip(), "10.1.2.3");
        assert_eq!(req.user_agent(), "probe");
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn content_length_marks_body() {
        let raw = b"POST /login HTTP/1.1\r\nContent-Length: 5\r\n\r\nalice";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&raw[body_offset..], b"alice");
        assert_eq!(req.body().as_ref(), b"alice");
    }
}
