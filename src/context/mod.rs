//! Per-request context, the unit of work a handler reads and writes.
//!
//! A fresh [`Context`] is built for every dispatch hop, including each internal
//! re-entry on an error route. Handlers buffer output into it, set headers and the
//! status, and hand it back; the dispatcher turns it into a
//! [`Response`](crate::http::Response).
//!
//! Values that only make sense to one controller go in the type-keyed
//! [`Extensions`] side-map instead of growing the struct.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::Diagnostics;
use crate::error_pages::ErrorRoutes;
use crate::http::{Headers, Method, Request, StatusCode};
use crate::router::HandlerResult;
use crate::session::Session;

/// Type-keyed map for controller-specific per-request values.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.contains_key(&TypeId::of::<T>())
    }
}

/// The single path variable a matched route binds, e.g. `id = "42"` for
/// `/users/:id` against `/users/42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathVar {
    pub name: String,
    pub value: String,
}

/// Mutable per-request state.
///
/// # Examples
///
/// ```
/// use waypost::context::Context;
/// use waypost::http::{Request, StatusCode};
///
/// let (request, _) = Request::parse(b"GET /logout HTTP/1.1\r\n\r\n").unwrap();
/// let mut ctx = Context::for_request(request);
/// ctx.redirect("/");
/// assert_eq!(ctx.status(), StatusCode::SeeOther);
/// assert_eq!(ctx.location(), Some("/"));
/// ```
pub struct Context {
    request: Request,
    method: Method,
    path: String,
    controller: String,
    path_var: Option<PathVar>,
    body: Vec<u8>,
    headers: Headers,
    status: StatusCode,
    content_type: Option<String>,
    location: Option<String>,
    session: Option<Session>,
    diagnostics: Option<Arc<Diagnostics>>,
    error_routes: Arc<ErrorRoutes>,
    extensions: Extensions,
}

impl Context {
    /// Context for a request outside the dispatcher, with default error routes.
    /// Mostly useful for exercising handlers directly.
    pub fn for_request(request: Request) -> Self {
        let method = request.method().clone();
        let path = request.path().to_owned();
        Self::new(request, method, path, Arc::new(ErrorRoutes::default()))
    }

    /// Context for one dispatch hop. `method`/`path` are the hop's target, which
    /// differs from the request line on an error-route re-entry.
    pub(crate) fn new(
        request: Request,
        method: Method,
        path: String,
        error_routes: Arc<ErrorRoutes>,
    ) -> Self {
        Self {
            request,
            method,
            path,
            controller: String::new(),
            path_var: None,
            body: Vec::new(),
            headers: Headers::new(),
            status: StatusCode::Ok,
            content_type: None,
            location: None,
            session: None,
            diagnostics: None,
            error_routes,
            extensions: Extensions::new(),
        }
    }

    pub(crate) fn bind_controller(&mut self, controller: &str) {
        self.controller = controller.to_owned();
    }

    pub(crate) fn bind_path_var(&mut self, var: PathVar) {
        self.path_var = Some(var);
    }

    pub(crate) fn attach_diagnostics(&mut self, diagnostics: Arc<Diagnostics>) {
        self.diagnostics = Some(diagnostics);
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Method of the current hop.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path of the current hop.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name of the controller that owns the matched route.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn path_var(&self) -> Option<&PathVar> {
        self.path_var.as_ref()
    }

    /// Value bound to the route variable `name`, if the matched route declared it.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_var
            .as_ref()
            .filter(|var| var.name == name)
            .map(|var| var.value.as_str())
    }

    /// Appends to the output buffer.
    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        self.body.extend_from_slice(bytes.as_ref());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Sets a response header; the last write for a name wins.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Turns the response into a `303 See Other` to `path`. The body is dropped and
    /// post-hooks are skipped for redirects.
    pub fn redirect(&mut self, path: impl Into<String>) {
        self.status = StatusCode::SeeOther;
        self.location = Some(path.into());
    }

    /// Redirects the client to the page registered for `status`. Falls back to the
    /// 500 page for a status without a reserved route.
    pub fn redirect_to_error(&mut self, status: StatusCode) {
        let path = self
            .error_routes
            .path_for(status)
            .or_else(|| self.error_routes.path_for(StatusCode::InternalServerError))
            .unwrap_or("/")
            .to_owned();
        self.redirect(path);
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn set_session(&mut self, session: Option<Session>) {
        self.session = session;
    }

    /// Fault captured on the hop that redirected here, when this hop is the
    /// 500 page.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_deref()
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.headers
            .set("Set-Cookie", format!("{name}={value}; Path=/; HttpOnly"));
    }

    /// Overwrites the cookie with an empty value that expired at the epoch.
    pub fn clear_cookie(&mut self, name: &str) {
        self.headers.set(
            "Set-Cookie",
            format!("{name}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0"),
        );
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Parses the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    /// Hands the context back to the dispatcher as a successful outcome.
    pub fn done(self) -> HandlerResult {
        Ok(self)
    }

    /// Takes the buffered body, leaving the context otherwise intact for post-hooks.
    pub(crate) fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}
