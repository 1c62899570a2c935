//! Handler and controller types bound to routes.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// Error value a handler or hook returns to fail the hop. The dispatcher treats it
/// exactly like a panic: the request is re-entered on the 500 route.
pub type Fault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a handler or hook: the context to continue with, or a fault.
pub type HandlerResult = Result<Context, Fault>;

/// Boxed future produced by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Type-erased async handler. Takes the context by value and hands it back.
///
/// Hooks share this shape, so the same function can serve as a route handler or
/// as a pre/post hook.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Blanket-implemented for every `Fn(Context) -> impl Future<Output = HandlerResult>`,
/// so both `async fn` items and closures returning `async move` blocks qualify.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> HandlerFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        Box::pin((self)(ctx))
    }
}

/// Erases a concrete handler into a [`Handler`].
pub fn boxed(handler: impl IntoHandler) -> Handler {
    Arc::new(move |ctx| handler.call(ctx))
}

/// A named set of actions. Routes bind to `(controller, action)` pairs, and an
/// action missing from the controller is caught when the route is registered.
///
/// # Examples
///
/// ```
/// use waypost::context::Context;
/// use waypost::router::{Controller, HandlerResult};
///
/// async fn index(mut ctx: Context) -> HandlerResult {
///     ctx.write("home");
///     ctx.done()
/// }
///
/// let pages = Controller::new("Pages").action("index", index);
/// assert!(pages.get("index").is_some());
/// assert!(pages.get("missing").is_none());
/// ```
#[derive(Clone)]
pub struct Controller {
    name: String,
    actions: HashMap<String, Handler>,
}

impl Controller {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: HashMap::new(),
        }
    }

    /// Adds (or replaces) the action `name`.
    #[must_use]
    pub fn action(mut self, name: impl Into<String>, handler: impl IntoHandler) -> Self {
        self.actions.insert(name.into(), boxed(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, action: &str) -> Option<&Handler> {
        self.actions.get(action)
    }

    /// Action names, sorted.
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("actions", &self.action_names())
            .finish()
    }
}

/// The handler a route resolves to, plus the identity it was registered under.
#[derive(Clone)]
pub struct HandlerBinding {
    controller: String,
    action: String,
    handler: Handler,
}

impl HandlerBinding {
    pub fn new(
        controller: impl Into<String>,
        action: impl Into<String>,
        handler: impl IntoHandler,
    ) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
            handler: boxed(handler),
        }
    }

    pub(crate) fn from_handler(controller: &str, action: &str, handler: Handler) -> Self {
        Self {
            controller: controller.to_owned(),
            action: action.to_owned(),
            handler,
        }
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.controller, self.action)
    }
}
