//! Ordered header map with case-insensitive names.
//!
//! Inbound requests may legitimately repeat a header, so [`Headers::append`] keeps
//! duplicates. Handlers write through [`Headers::set`], which gives the
//! unique-key, last-write-wins behaviour the dispatcher relies on when it copies a
//! context's headers onto the response.

use std::fmt;

/// Case-insensitive header map that preserves insertion order.
///
/// # Examples
///
/// ```
/// use waypost::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.set("Content-Type", "text/plain");
/// headers.set("content-type", "text/html");
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Adds an entry, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with `value`.
    ///
    /// The entry keeps the position of the first previous occurrence, or goes to
    /// the end when the name is new.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .inner
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(idx) => {
                self.inner[idx] = (name.clone(), value);
                let mut seen = 0usize;
                self.inner.retain(|(k, _)| {
                    if k.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.inner.push((name, value)),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Drops every value for `name`. Returns `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of entries, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.append("User-Agent", "curl/8");
        assert_eq!(h.get("user-agent"), Some("curl/8"));
        assert_eq!(h.get("USER-AGENT"), Some("curl/8"));
    }

    #[test]
    fn append_keeps_duplicates() {
        let mut h = Headers::new();
        h.append("Cookie", "a=1");
        h.append("Cookie", "b=2");
        let vals: Vec<_> = h.get_all("cookie").collect();
        assert_eq!(vals, vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_collapses_duplicates_and_keeps_position() {
        let mut h = Headers::new();
        h.append("X-A", "1");
        h.append("X-B", "1");
        h.append("x-a", "2");
        h.set("X-A", "3");

        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(pairs, vec![("X-A", "3"), ("X-B", "1")]);
    }

    #[test]
    fn remove_reports_whether_anything_went() {
        let mut h = Headers::new();
        h.set("Location", "/");
        assert!(h.remove("location"));
        assert!(!h.remove("location"));
        assert!(h.is_empty());
    }
}
