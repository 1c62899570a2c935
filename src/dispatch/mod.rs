//! Request dispatch: route lookup, hooks, handler and error-route re-entry.
//!
//! A request is served in one or more *hops*. The first hop targets the request
//! line; a miss re-enters on the 404 route, and a fault (a panic or a returned
//! [`Fault`]) re-enters on the 500 route carrying [`Diagnostics`]. Every hop is
//! recorded in a [`CallChain`] whose bound stops a misconfigured error route from
//! bouncing forever. When dispatch gives up, the client gets a bare `500` with an
//! empty body.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::error_pages::ErrorRoutes;
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::Hooks;
use crate::router::{Fault, Handler, RouteMatch, RouteTable};

mod chain;
mod recovery;

pub use chain::CallChain;
pub use recovery::Diagnostics;

use recovery::Guarded;

pub const DEFAULT_CHAIN_MAX: usize = 4;
pub const DEFAULT_STACK_FRAMES_MAX: usize = 64;

/// Outcome of one dispatched request, with the hops it took.
#[derive(Debug)]
pub struct Dispatched {
    pub response: Response,
    pub chain: CallChain,
}

/// Routes requests through the hook lists and the route table.
///
/// Immutable once built; share it behind an `Arc`.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    error_routes: Arc<ErrorRoutes>,
    hooks: Hooks,
    chain_max: usize,
    stack_frames_max: usize,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteTable>, error_routes: Arc<ErrorRoutes>) -> Self {
        recovery::install_panic_hook();
        Self {
            routes,
            error_routes,
            hooks: Hooks::default(),
            chain_max: DEFAULT_CHAIN_MAX,
            stack_frames_max: DEFAULT_STACK_FRAMES_MAX,
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Maximum hops per request before dispatch gives up.
    #[must_use]
    pub fn with_chain_max(mut self, max: usize) -> Self {
        self.chain_max = max;
        self
    }

    /// Maximum stack lines kept in [`Diagnostics`].
    #[must_use]
    pub fn with_stack_frames_max(mut self, max: usize) -> Self {
        self.stack_frames_max = max;
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn error_routes(&self) -> &ErrorRoutes {
        &self.error_routes
    }

    /// Serves `request`. Never fails: every outcome is some response.
    pub async fn route(&self, request: Request) -> Response {
        self.dispatch(request).await.response
    }

    /// Like [`route`](Self::route), also returning the hops taken.
    pub async fn dispatch(&self, request: Request) -> Dispatched {
        let started = Instant::now();
        let mut chain = CallChain::new(self.chain_max);

        if self.routes.is_ignored(request.path()) {
            debug!(path = %request.path(), "ignored path");
            return Dispatched {
                response: Response::new(StatusCode::Ok),
                chain,
            };
        }

        let mut method = request.method().clone();
        let mut path = request.path().to_owned();
        let mut carried: Option<Arc<Diagnostics>> = None;

        let response = loop {
            if !chain.push(&method, &path) {
                error!(limit = self.chain_max, "call chain limit exceeded:\n{chain}");
                break terminal();
            }

            let reserved = self.error_routes.status_for(&method, &path);

            let Some(hit) = self.routes.lookup(&method, &path) else {
                if reserved.is_some() {
                    error!(%method, %path, "error route is not registered");
                    break terminal();
                }
                debug!(%method, %path, "no route");
                let Some(target) = self.error_routes.path_for(StatusCode::NotFound) else {
                    break terminal();
                };
                method = Method::Get;
                path = target.to_owned();
                continue;
            };

            let outcome = self
                .run_hop(&request, &method, &path, hit, reserved, carried.clone())
                .await;
            match outcome {
                Ok(response) => break response,
                Err(diagnostics) if reserved == Some(StatusCode::InternalServerError) => {
                    error!(
                        fault = %diagnostics.fault,
                        stack = ?diagnostics.stack,
                        original = carried.as_ref().map_or("", |d| d.fault.as_str()),
                        original_stack = ?carried.as_ref().map(|d| &d.stack),
                        "500 route faulted while reporting a fault:\n{chain}"
                    );
                    break terminal();
                }
                Err(diagnostics) => {
                    error!(
                        %method,
                        %path,
                        fault = %diagnostics.fault,
                        stack = ?diagnostics.stack,
                        "handler faulted"
                    );
                    let Some(target) = self
                        .error_routes
                        .path_for(StatusCode::InternalServerError)
                    else {
                        break terminal();
                    };
                    carried = Some(Arc::new(diagnostics));
                    method = Method::Get;
                    path = target.to_owned();
                }
            }
        };

        let status = response.status().as_u16();
        let elapsed = started.elapsed();
        if chain.len() > 1 {
            warn!(
                method = %request.method(),
                path = %request.path(),
                status,
                hops = chain.len(),
                ?elapsed,
                "dispatched via error route"
            );
        } else {
            info!(
                method = %request.method(),
                path = %request.path(),
                status,
                hops = chain.len(),
                ?elapsed,
                "dispatched"
            );
        }

        Dispatched { response, chain }
    }

    /// Runs one hop inside the recovery boundary. Any fault comes back as
    /// [`Diagnostics`].
    async fn run_hop(
        &self,
        request: &Request,
        method: &Method,
        path: &str,
        hit: RouteMatch<'_>,
        reserved: Option<StatusCode>,
        carried: Option<Arc<Diagnostics>>,
    ) -> Result<Response, Diagnostics> {
        let binding = hit.entry.binding();
        let handler = Arc::clone(binding.handler());

        let mut ctx = Context::new(
            request.clone(),
            method.clone(),
            path.to_owned(),
            Arc::clone(&self.error_routes),
        );
        ctx.bind_controller(binding.controller());
        if let Some(var) = hit.var {
            ctx.bind_path_var(var);
        }
        if let Some(status) = reserved {
            ctx.set_status(status);
        }
        if let Some(diagnostics) = carried {
            ctx.attach_diagnostics(diagnostics);
        }

        let outcome = AssertUnwindSafe(Guarded::new(self.pipeline(ctx, handler)))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(fault)) => Err(Diagnostics::from_fault(&fault, self.stack_frames_max)),
            Err(payload) => Err(Diagnostics::from_panic(payload, self.stack_frames_max)),
        }
    }

    async fn pipeline(&self, mut ctx: Context, handler: Handler) -> Result<Response, Fault> {
        for hook in self.hooks.pre_hooks() {
            ctx = hook(ctx).await?;
        }

        ctx = handler(ctx).await?;

        let (response, mut ctx) = materialize(ctx);
        if response.status().is_redirect_sentinel() {
            return Ok(response);
        }

        for hook in self.hooks.post_hooks() {
            ctx = hook(ctx).await?;
        }
        Ok(response)
    }
}

/// Builds the response from the context: `content_type` and `location` first,
/// then the header map over them, then the status. A `303` carries no body.
fn materialize(mut ctx: Context) -> (Response, Context) {
    let status = ctx.status();
    let mut response = Response::new(status);

    let headers = response.headers_mut();
    if let Some(content_type) = ctx.content_type() {
        headers.set("Content-Type", content_type);
    }
    if let Some(location) = ctx.location() {
        headers.set("Location", location);
    }
    for (name, value) in ctx.headers().iter() {
        headers.set(name, value);
    }

    if !status.is_redirect_sentinel() {
        response = response.body_bytes(ctx.take_body());
    }
    (response, ctx)
}

fn terminal() -> Response {
    Response::new(StatusCode::InternalServerError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_pages::install_error_pages;
    use crate::router::HandlerResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("record {0} is locked")]
    struct Locked(u32);

    fn get(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn table_with_pages() -> RouteTable {
        let mut table = RouteTable::new();
        install_error_pages(&mut table, &ErrorRoutes::default()).unwrap();
        table
    }

    fn dispatcher(table: RouteTable) -> Dispatcher {
        Dispatcher::new(Arc::new(table), Arc::new(ErrorRoutes::default()))
    }

    fn body(response: &Response) -> String {
        String::from_utf8_lossy(response.body_slice()).into_owned()
    }

    async fn hello(mut ctx: Context) -> HandlerResult {
        ctx.set_content_type("text/plain");
        ctx.write("hello");
        ctx.done()
    }

    async fn explode(_ctx: Context) -> HandlerResult {
        panic!("handler exploded");
    }

    async fn locked(_ctx: Context) -> HandlerResult {
        Err(Box::new(Locked(7)))
    }

    async fn explode_numbered(ctx: Context) -> HandlerResult {
        let n = ctx.param("n").unwrap_or_default().to_owned();
        tokio::task::yield_now().await;
        panic!("request {n} exploded");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("{what} failed")]
    struct Failed {
        what: &'static str,
        #[source]
        cause: std::io::Error,
    }

    fn failed(what: &'static str, cause: &str) -> Fault {
        Box::new(Failed {
            what,
            cause: std::io::Error::other(cause.to_owned()),
        })
    }

    /// Log sink for asserting on formatted events.
    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLog {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn plain_hit_is_one_hop() {
        let mut table = table_with_pages();
        table.get("/hello", hello).unwrap();
        let out = dispatcher(table).dispatch(get("/hello")).await;

        assert_eq!(out.response.status(), StatusCode::Ok);
        assert_eq!(body(&out.response), "hello");
        assert_eq!(out.response.headers().get("content-type"), Some("text/plain"));
        assert_eq!(out.chain.len(), 1);
    }

    #[tokio::test]
    async fn miss_redirects_to_404_exactly_once() {
        let out = dispatcher(table_with_pages()).dispatch(get("/nowhere")).await;

        assert_eq!(out.response.status(), StatusCode::NotFound);
        assert!(body(&out.response).contains("Error 404"));
        assert_eq!(out.chain.hops(), ["GET /nowhere", "GET /error/404"]);
    }

    #[tokio::test]
    async fn faulting_404_page_falls_through_to_500_page() {
        let mut table = table_with_pages();
        // exact route shadows the stock /error/:code page
        table.get("/error/404", explode).unwrap();
        let out = dispatcher(table).dispatch(get("/missing")).await;

        assert_eq!(out.response.status(), StatusCode::InternalServerError);
        let page = body(&out.response);
        assert!(page.contains("Error 500"));
        assert!(page.contains("handler exploded"));
        assert_eq!(
            out.chain.hops(),
            ["GET /missing", "GET /error/404", "GET /error/500"]
        );
    }

    #[tokio::test]
    async fn miss_on_missing_404_route_is_terminal() {
        let out = dispatcher(RouteTable::new()).dispatch(get("/nowhere")).await;

        assert_eq!(out.response.status(), StatusCode::InternalServerError);
        assert!(out.response.body_slice().is_empty());
        assert_eq!(out.chain.len(), 2);
    }

    #[tokio::test]
    async fn panic_reaches_500_page_with_diagnostics() {
        let mut table = table_with_pages();
        table.get("/boom", explode).unwrap();
        let out = dispatcher(table).dispatch(get("/boom")).await;

        assert_eq!(out.response.status(), StatusCode::InternalServerError);
        let page = body(&out.response);
        assert!(page.contains("Error 500"));
        assert!(page.contains("handler exploded"));
        assert!(page.contains("panicked at"));
        assert_eq!(out.chain.hops(), ["GET /boom", "GET /error/500"]);
    }

    #[tokio::test]
    async fn returned_error_is_a_fault() {
        let mut table = table_with_pages();
        table.post("/save", locked).unwrap();
        let raw = b"POST /save HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        let out = dispatcher(table).dispatch(request).await;

        assert_eq!(out.response.status(), StatusCode::InternalServerError);
        assert!(body(&out.response).contains("record 7 is locked"));
    }

    #[tokio::test]
    async fn faulting_500_route_halts_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let mut table = table_with_pages();
        table.get("/boom", explode).unwrap();
        // exact route shadows the stock /error/:code page
        table
            .get("/error/500", move |ctx: Context| {
                seen.fetch_add(1, Ordering::SeqCst);
                explode(ctx)
            })
            .unwrap();

        let out = dispatcher(table).dispatch(get("/boom")).await;
        assert_eq!(out.response.status(), StatusCode::InternalServerError);
        assert!(out.response.body_slice().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.chain.len(), 2);
    }

    #[tokio::test]
    async fn faulting_500_route_logs_both_faults_with_stacks() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut table = table_with_pages();
        table
            .get("/save", |_ctx: Context| async move {
                Err::<Context, Fault>(failed("save", "disk full"))
            })
            .unwrap();
        table
            .get("/error/500", |_ctx: Context| async move {
                Err::<Context, Fault>(failed("error page", "template missing"))
            })
            .unwrap();

        let out = dispatcher(table).dispatch(get("/save")).await;
        assert_eq!(out.response.status(), StatusCode::InternalServerError);
        assert!(out.response.body_slice().is_empty());

        let text = log.text();
        let start = text.find("500 route faulted").unwrap();
        let event = &text[start..];
        assert!(event.contains("error page failed"));
        assert!(event.contains("caused by: template missing"));
        assert!(event.contains("save failed"));
        assert!(event.contains("caused by: disk full"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_faults_keep_their_own_diagnostics() {
        const REQUESTS: usize = 64;

        let mut table = table_with_pages();
        table.get("/boom/:n", explode_numbered).unwrap();
        let dispatcher = Arc::new(dispatcher(table));

        let tasks: Vec<_> = (0..REQUESTS)
            .map(|n| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { (n, dispatcher.route(get(&format!("/boom/{n}"))).await) })
            })
            .collect();

        for task in tasks {
            let (n, response) = task.await.unwrap();
            assert_eq!(response.status(), StatusCode::InternalServerError);
            let page = body(&response);
            assert!(page.contains(&format!("request {n} exploded")));
            assert!(page.contains("panicked at"));
            for other in (0..REQUESTS).filter(|m| *m != n) {
                assert!(!page.contains(&format!("request {other} exploded")));
            }
        }
    }

    #[tokio::test]
    async fn chain_bound_stops_redirection() {
        let mut table = table_with_pages();
        table.get("/boom", explode).unwrap();
        let out = dispatcher(table)
            .with_chain_max(1)
            .dispatch(get("/boom"))
            .await;

        assert_eq!(out.response.status(), StatusCode::InternalServerError);
        assert!(out.response.body_slice().is_empty());
        // the refused hop is still recorded
        assert_eq!(out.chain.hops(), ["GET /boom", "GET /error/500"]);
    }

    #[tokio::test]
    async fn redirect_drops_body_and_skips_post_hooks() {
        let post_runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&post_runs);

        let mut table = table_with_pages();
        table
            .get("/logout", |mut ctx: Context| async move {
                ctx.write("bye");
                ctx.redirect("/");
                ctx.done()
            })
            .unwrap();
        table.get("/hello", hello).unwrap();

        let hooks = Hooks::new().post(move |ctx: Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { ctx.done() }
        });
        let dispatcher = dispatcher(table).with_hooks(hooks);

        let redirected = dispatcher.route(get("/logout")).await;
        assert_eq!(redirected.status(), StatusCode::SeeOther);
        assert_eq!(redirected.headers().get("Location"), Some("/"));
        assert!(redirected.body_slice().is_empty());
        assert_eq!(post_runs.load(Ordering::SeqCst), 0);

        dispatcher.route(get("/hello")).await;
        assert_eq!(post_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_hook_output_reaches_the_handler() {
        let mut table = table_with_pages();
        table
            .get("/whoami", |mut ctx: Context| async move {
                let tag = ctx.headers().get("X-Tag").unwrap_or("none").to_owned();
                ctx.write(tag);
                ctx.done()
            })
            .unwrap();
        let hooks = Hooks::new().pre(|mut ctx: Context| async move {
            ctx.set_header("X-Tag", "pre");
            ctx.done()
        });

        let response = dispatcher(table).with_hooks(hooks).route(get("/whoami")).await;
        assert_eq!(body(&response), "pre");
        assert_eq!(response.headers().get("x-tag"), Some("pre"));
    }

    #[tokio::test]
    async fn post_hook_fault_goes_to_500_page() {
        let mut table = table_with_pages();
        table.get("/hello", hello).unwrap();
        let hooks = Hooks::new().post(|_ctx: Context| async move {
            Err::<Context, Fault>("audit log unavailable".into())
        });

        let response = dispatcher(table).with_hooks(hooks).route(get("/hello")).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert!(body(&response).contains("audit log unavailable"));
    }

    #[tokio::test]
    async fn header_map_overrides_content_type_field() {
        let mut table = table_with_pages();
        table
            .get("/data", |mut ctx: Context| async move {
                ctx.set_content_type("text/plain");
                ctx.set_header("Content-Type", "application/json");
                ctx.write("{}");
                ctx.done()
            })
            .unwrap();
        let response = dispatcher(table).route(get("/data")).await;
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn direct_error_route_is_served_with_its_status() {
        let response = dispatcher(table_with_pages()).route(get("/error/403")).await;
        assert_eq!(response.status(), StatusCode::Forbidden);
        assert!(body(&response).contains("Error 403"));
    }

    #[tokio::test]
    async fn path_variable_is_bound() {
        let mut table = table_with_pages();
        table
            .get("/users/:id/posts", |mut ctx: Context| async move {
                let id = ctx.param("id").unwrap_or_default().to_owned();
                ctx.write(id);
                ctx.done()
            })
            .unwrap();
        let response = dispatcher(table).route(get("/users/42/posts")).await;
        assert_eq!(body(&response), "42");
    }

    #[tokio::test]
    async fn ignored_path_gets_empty_200() {
        let mut table = table_with_pages();
        table.get("/favicon.ico", explode).unwrap();
        table.ignore("/favicon.ico");
        let out = dispatcher(table).dispatch(get("/favicon.ico")).await;
        assert_eq!(out.response.status(), StatusCode::Ok);
        assert!(out.response.body_slice().is_empty());
        assert!(out.chain.is_empty());
    }
}
