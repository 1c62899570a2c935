//! Pre- and post-hooks run by the dispatcher around every handler.
//!
//! Hooks have the same shape as handlers: they take the [`Context`] by value and
//! hand it back, or fail with a [`Fault`](crate::router::Fault) that sends the
//! request to the 500 route. Pre-hooks run in registration order before the
//! handler. Post-hooks run in registration order after the response has been
//! materialized, and are skipped for `303` redirects.
//!
//! ## Core types
//!
//! - [`Hook`]: trait for hooks that carry configuration.
//! - [`from_hook`]: erases a [`Hook`] into the shared [`Handler`] type.
//! - [`Hooks`]: the ordered pre/post lists.
//! - [`SessionHook`], [`CookieConsentHook`], [`AccessLog`]: built-ins.

use std::sync::Arc;

use tracing::{info, warn};

use crate::context::Context;
use crate::router::{Handler, HandlerFuture, IntoHandler, boxed};
use crate::session::SessionHandle;

/// A hook with its own state.
///
/// Plain `async fn(Context) -> HandlerResult` functions work as hooks without
/// implementing this; see [`Hooks::pre`].
pub trait Hook: Send + Sync {
    fn call(&self, ctx: Context) -> HandlerFuture;
}

/// Converts a [`Hook`] into a [`Handler`].
pub fn from_hook<H>(hook: Arc<H>) -> Handler
where
    H: Hook + 'static,
{
    Arc::new(move |ctx: Context| hook.call(ctx))
}

/// Ordered hook lists.
#[derive(Clone, Default)]
pub struct Hooks {
    pre: Vec<Handler>,
    post: Vec<Handler>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pre-hook.
    #[must_use]
    pub fn pre(mut self, hook: impl IntoHandler) -> Self {
        self.pre.push(boxed(hook));
        self
    }

    /// Appends a post-hook.
    #[must_use]
    pub fn post(mut self, hook: impl IntoHandler) -> Self {
        self.post.push(boxed(hook));
        self
    }

    pub fn push_pre(&mut self, hook: Handler) {
        self.pre.push(hook);
    }

    pub fn push_post(&mut self, hook: Handler) {
        self.post.push(hook);
    }

    pub fn pre_hooks(&self) -> &[Handler] {
        &self.pre
    }

    pub fn post_hooks(&self) -> &[Handler] {
        &self.post
    }
}

/// Path prefixes the session hook leaves alone.
pub const STATIC_PREFIXES: [&str; 4] = ["/css", "/favico", "/res", "/js"];

/// Pre-hook that attaches the caller's session to the context.
///
/// Requests under a static prefix skip the lookup. A session store that has gone
/// away is logged and treated as "no session" rather than failing the request.
pub struct SessionHook {
    sessions: SessionHandle,
    skip_prefixes: Vec<String>,
}

impl SessionHook {
    pub fn new(sessions: SessionHandle) -> Self {
        Self {
            sessions,
            skip_prefixes: STATIC_PREFIXES.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    #[must_use]
    pub fn skip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.skip_prefixes.push(prefix.into());
        self
    }

    fn skips(&self, path: &str) -> bool {
        self.skip_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl Hook for SessionHook {
    fn call(&self, mut ctx: Context) -> HandlerFuture {
        if self.skips(ctx.path()) {
            return Box::pin(async move { ctx.done() });
        }
        let sessions = self.sessions.clone();
        Box::pin(async move {
            match sessions.get(ctx.request()).await {
                Ok(session) => ctx.set_session(session),
                Err(err) => warn!(error = %err, "session lookup failed"),
            }
            ctx.done()
        })
    }
}

/// Whether the client has accepted cookies, as recorded by [`CookieConsentHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieConsent(pub bool);

/// Pre-hook that records whether the consent cookie is present with value `true`.
pub struct CookieConsentHook {
    cookie_name: String,
}

impl Default for CookieConsentHook {
    fn default() -> Self {
        Self {
            cookie_name: "cookiesAccepted".to_owned(),
        }
    }
}

impl CookieConsentHook {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }
}

impl Hook for CookieConsentHook {
    fn call(&self, mut ctx: Context) -> HandlerFuture {
        let accepted = ctx.request().cookie(&self.cookie_name) == Some("true");
        ctx.extensions_mut().insert(CookieConsent(accepted));
        Box::pin(async move { ctx.done() })
    }
}

/// Post-hook that logs one line per served response.
///
/// ```text
/// METHOD /path -> STATUS (controller)
/// ```
pub struct AccessLog;

impl Hook for AccessLog {
    fn call(&self, ctx: Context) -> HandlerFuture {
        Box::pin(async move {
            info!(
                method = %ctx.method(),
                path = %ctx.path(),
                status = ctx.status().as_u16(),
                controller = %ctx.controller(),
                "served"
            );
            ctx.done()
        })
    }
}
