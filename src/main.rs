//! Demo server wiring every component together.
//!
//! Usage: `waypost [settings.json]`. Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use waypost::app::AppBuilder;
use waypost::config::Settings;
use waypost::context::Context;
use waypost::database::MemoryDirectory;
use waypost::http::StatusCode;
use waypost::middleware::{AccessLog, CookieConsentHook, SessionHook, from_hook};
use waypost::router::{Controller, HandlerResult};
use waypost::server::Server;
use waypost::session::{SessionError, SessionHandle};
use waypost::template::{FunctionRegistry, TextRenderer, render_into};

const INDEX_PAGE: &str = "<!DOCTYPE html><html><body>\
<h1>Hello {{greet $user}}</h1>\
<p>Admin tools: {{roleOrHigher $role admin}}</p>\
</body></html>\n";

#[derive(Debug, Deserialize)]
struct LoginForm {
    login: String,
}

async fn index(mut ctx: Context, renderer: Arc<TextRenderer>) -> HandlerResult {
    render_into(renderer.as_ref(), &mut ctx, "index")?;
    ctx.done()
}

async fn login(mut ctx: Context, sessions: SessionHandle) -> HandlerResult {
    let Ok(form) = ctx.json::<LoginForm>() else {
        ctx.redirect_to_error(StatusCode::BadRequest);
        return ctx.done();
    };
    let outcome = sessions.login(&mut ctx, &form.login).await;
    match outcome {
        Ok(_) => ctx.redirect("/"),
        Err(SessionError::UnknownUser { .. }) => ctx.redirect_to_error(StatusCode::Unauthorized),
        Err(err) => return Err(err.into()),
    }
    ctx.done()
}

async fn logout(mut ctx: Context, sessions: SessionHandle) -> HandlerResult {
    sessions.logout(&mut ctx).await?;
    ctx.redirect("/");
    ctx.done()
}

async fn admin_panel(mut ctx: Context) -> HandlerResult {
    if !ctx.session().is_some_and(|s| s.role_or_higher("admin")) {
        ctx.redirect_to_error(StatusCode::Forbidden);
        return ctx.done();
    }
    ctx.write("admin panel");
    ctx.done()
}

async fn show_user(mut ctx: Context) -> HandlerResult {
    let id: i64 = ctx.param("id").unwrap_or_default().parse()?;
    let body = serde_json::json!({ "id": id, "controller": ctx.controller() });
    ctx.set_content_type("application/json");
    ctx.write(body.to_string());
    ctx.done()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        error!(error = %err, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load_or_default(settings_path.as_deref())?;

    let directory = MemoryDirectory::new()
        .with_user("root", 1, Some("root"))
        .with_user("ada", 2, Some("admin"))
        .with_user("guest", 3, None);

    let mut functions = FunctionRegistry::with_builtins();
    functions.register("greet", |_ctx: &mut Context, args: &[serde_json::Value]| {
        let name = args.first().and_then(|v| v.as_str()).unwrap_or_default();
        Ok(serde_json::Value::from(if name.is_empty() { "stranger" } else { name }))
    })?;
    let functions = Arc::new(functions);
    let renderer = Arc::new(TextRenderer::new(Arc::clone(&functions)).page("index", INDEX_PAGE));

    let builder = AppBuilder::new(settings, Arc::new(directory)).await;
    let sessions = builder.sessions();

    let pages = Controller::new("Pages")
        .action("index", move |ctx| index(ctx, Arc::clone(&renderer)))
        .action("admin", admin_panel);
    let auth = {
        let for_login = sessions.clone();
        let for_logout = sessions.clone();
        Controller::new("Auth")
            .action("login", move |ctx| login(ctx, for_login.clone()))
            .action("logout", move |ctx| logout(ctx, for_logout.clone()))
    };
    let users = Controller::new("Users").action("show", show_user);

    let mut builder = builder
        .functions(functions)
        .route("GET /", &pages, "index")?
        .route("GET /admin", &pages, "admin")?
        .route("POST /login", &auth, "login")?
        .route("GET /logout", &auth, "logout")?
        .route("GET /users/:id", &users, "show")?
        .default_error_pages()?
        .pre_hook(from_hook(Arc::new(SessionHook::new(sessions))))
        .pre_hook(from_hook(Arc::new(CookieConsentHook::default())))
        .post_hook(from_hook(Arc::new(AccessLog)));
    builder.routes_mut().ignore("/favicon.ico");

    let app = builder.build()?;
    let server = Server::bind(&app.settings().bind_addr).await?;
    info!(address = %server.local_addr(), "waypost ready");

    app.serve(server, async {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("cannot listen for ctrl-c, serving until killed");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    info!("bye");
    Ok(())
}
