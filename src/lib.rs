//! # waypost
//!
//! Request routing with error-route recovery and an actor-owned session store,
//! on a small async HTTP/1.1 transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use waypost::app::AppBuilder;
//! use waypost::config::Settings;
//! use waypost::context::Context;
//! use waypost::database::MemoryDirectory;
//! use waypost::router::{Controller, HandlerResult};
//! use waypost::server::Server;
//!
//! async fn index(mut ctx: Context) -> HandlerResult {
//!     ctx.write("Hello, World!");
//!     ctx.done()
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::default();
//!     let pages = Controller::new("Pages").action("index", index);
//!     let app = AppBuilder::new(settings, Arc::new(MemoryDirectory::new()))
//!         .await
//!         .route("GET /", &pages, "index")?
//!         .default_error_pages()?
//!         .build()?;
//!
//!     let server = Server::bind(&app.settings().bind_addr).await?;
//!     app.serve(server, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod context;
pub mod database;
pub mod dispatch;
pub mod error_pages;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;
pub mod session;
pub mod template;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::{App, AppBuilder};
pub use context::Context;
pub use dispatch::Dispatcher;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Controller, HandlerResult, RouteTable};
pub use server::{Server, ServerError};
