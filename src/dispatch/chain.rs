use std::fmt;

use crate::http::Method;

/// The `METHOD path` targets one request has visited, in order. Bounded so a
/// misconfigured error route cannot bounce a request forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallChain {
    hops: Vec<String>,
    max: usize,
}

impl CallChain {
    pub fn new(max: usize) -> Self {
        Self {
            hops: Vec::with_capacity(max.min(8)),
            max,
        }
    }

    /// Records a hop. Returns `false` once the chain is longer than its bound; the
    /// offending hop is still recorded so it shows up in the log.
    pub fn push(&mut self, method: &Method, path: &str) -> bool {
        self.hops.push(format!("{method} {path}"));
        self.hops.len() <= self.max
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn hops(&self) -> &[String] {
        &self.hops
    }
}

/// One hop per line, each indented one step deeper than the last.
impl fmt::Display for CallChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, hop) in self.hops.iter().enumerate() {
            if depth > 0 {
                writeln!(f)?;
            }
            write!(f, "{:width$}{hop}", "", width = depth * 2)?;
        }
        Ok(())
    }
}
