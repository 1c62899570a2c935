//! The application value built once at startup.
//!
//! [`AppBuilder`] starts the session store first (restoring the archive when
//! enabled) so route handlers can capture its handle, then collects routes,
//! hooks and page functions. [`AppBuilder::build`] checks the reserved error
//! routes and freezes everything into an [`App`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::database::UserDirectory;
use crate::dispatch::Dispatcher;
use crate::error_pages::{ErrorRoutes, install_error_pages};
use crate::http::Request;
use crate::middleware::Hooks;
use crate::router::{ConfigError, Controller, Handler, RouteTable};
use crate::server::{Server, ServerError};
use crate::session::{PersistError, SessionHandle, persist, spawn_session_store};
use crate::template::FunctionRegistry;

pub struct AppBuilder {
    settings: Settings,
    routes: RouteTable,
    error_routes: ErrorRoutes,
    hooks: Hooks,
    functions: Arc<FunctionRegistry>,
    sessions: SessionHandle,
}

impl AppBuilder {
    /// Starts the session store and returns an empty builder.
    ///
    /// With `restore_sessions` set, the archive at `sessions_file` is loaded
    /// first. A missing or unreadable archive is logged and skipped.
    pub async fn new(settings: Settings, directory: Arc<dyn UserDirectory>) -> Self {
        let restored = if settings.restore_sessions {
            match persist::restore(&settings.sessions_file).await {
                Ok(sessions) => {
                    info!(
                        count = sessions.len(),
                        path = %settings.sessions_file.display(),
                        "sessions restored"
                    );
                    sessions
                }
                Err(err) => {
                    warn!(error = %err, "cannot restore sessions, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        let sessions = spawn_session_store(directory, &settings.session_config(), restored);
        let error_routes = ErrorRoutes::with_prefix(&settings.error_route_prefix);

        Self {
            settings,
            routes: RouteTable::new(),
            error_routes,
            hooks: Hooks::new(),
            functions: Arc::new(FunctionRegistry::with_builtins()),
            sessions,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> SessionHandle {
        self.sessions.clone()
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    /// Binds `"METHOD path"` to an action of `controller`.
    pub fn route(
        mut self,
        key: &str,
        controller: &Controller,
        action: &str,
    ) -> Result<Self, ConfigError> {
        self.routes.register_path(key, controller, action)?;
        Ok(self)
    }

    /// Registers the stock page for every reserved error route.
    pub fn default_error_pages(mut self) -> Result<Self, ConfigError> {
        install_error_pages(&mut self.routes, &self.error_routes)?;
        Ok(self)
    }

    #[must_use]
    pub fn pre_hook(mut self, hook: Handler) -> Self {
        self.hooks.push_pre(hook);
        self
    }

    #[must_use]
    pub fn post_hook(mut self, hook: Handler) -> Self {
        self.hooks.push_post(hook);
        self
    }

    /// Replaces the page function registry. Build it up front when a renderer
    /// captured by a handler needs to share it.
    #[must_use]
    pub fn functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    /// Checks that every reserved error route resolves and freezes the app.
    pub fn build(self) -> Result<App, ConfigError> {
        self.error_routes.verify(&self.routes)?;

        for entry in self.routes.entries() {
            debug!(route = %entry.key(), handler = ?entry.binding(), "route");
        }
        info!(
            routes = self.routes.len(),
            pre_hooks = self.hooks.pre_hooks().len(),
            post_hooks = self.hooks.post_hooks().len(),
            "application built"
        );

        let dispatcher = Dispatcher::new(Arc::new(self.routes), Arc::new(self.error_routes))
            .with_hooks(self.hooks)
            .with_chain_max(self.settings.routing_chain_max)
            .with_stack_frames_max(self.settings.stack_frames_max);

        Ok(App {
            settings: self.settings,
            dispatcher: Arc::new(dispatcher),
            sessions: self.sessions,
            functions: self.functions,
        })
    }
}

/// Everything a running server needs, owned in one place.
pub struct App {
    settings: Settings,
    dispatcher: Arc<Dispatcher>,
    sessions: SessionHandle,
    functions: Arc<FunctionRegistry>,
}

impl App {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn sessions(&self) -> &SessionHandle {
        &self.sessions
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Serves on `server` until `shutdown` resolves, then archives the sessions
    /// when `archive_sessions` is set.
    pub async fn serve<S>(&self, server: Server, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let dispatcher = self.dispatcher();
        server
            .run_until(
                move |request: Request| {
                    let dispatcher = Arc::clone(&dispatcher);
                    async move { dispatcher.route(request).await }
                },
                shutdown,
            )
            .await?;

        if self.settings.archive_sessions {
            if let Err(err) = self.archive_sessions().await {
                warn!(error = %err, "cannot archive sessions");
            }
        }
        Ok(())
    }

    /// Writes the current session map to `sessions_file`.
    pub async fn archive_sessions(&self) -> Result<usize, ArchiveError> {
        let sessions = self.sessions.snapshot().await?;
        persist::archive(&self.settings.sessions_file, &sessions).await?;
        info!(
            count = sessions.len(),
            path = %self.settings.sessions_file.display(),
            "sessions archived"
        );
        Ok(sessions.len())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Session(#[from] crate::session::SessionError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}
