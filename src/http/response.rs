//! HTTP/1.1 response value and its wire serialization.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// A response ready to be written to the socket.
///
/// The dispatcher materializes one of these from a request context; the
/// transport serializes it with [`Response::into_bytes`].
///
/// # Examples
///
/// ```
/// use waypost::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::SeeOther).header("Location", "/login");
/// assert!(response.body_slice().is_empty());
///
/// let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
/// assert!(text.starts_with("HTTP/1.1 303 See Other\r\n"));
/// assert!(text.contains("Location: /login\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// Sets a header, replacing any earlier value for the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Chooses between `Connection: keep-alive` and `Connection: close`.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_slice(&self) -> &[u8] {
        &self.body
    }

    /// Writes the status line, headers and body in HTTP/1.1 format.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` for a non-empty body without
    /// an explicit type, a `Connection` header, and `Content-Length` last.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.set("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);
        self.headers.remove("content-length");

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + content_length);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_slice());

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn body_gets_length_and_default_type() {
        let s = to_string(Response::new(StatusCode::Ok).body("Hello").into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn explicit_content_type_wins() {
        let r = Response::new(StatusCode::Ok)
            .header("Content-Type", "text/html")
            .body("<p>");
        let s = to_string(r.into_bytes());
        assert!(s.contains("Content-Type: text/html\r\n"));
        assert!(!s.contains("text/plain"));
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let s = to_string(Response::new(StatusCode::NoContent).into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let s = to_string(Response::new(StatusCode::Ok).keep_alive(false).into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn error_statuses_use_their_reason_phrase() {
        let s = to_string(Response::new(StatusCode::PaymentRequired).into_bytes());
        assert!(s.starts_with("HTTP/1.1 402 Payment Required\r\n"));
    }
}
