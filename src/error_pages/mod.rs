//! Reserved error routes and the stock error page.
//!
//! Every failure class the dispatcher can redirect to has one `GET` route. The
//! routes must all be registered before an [`App`](crate::app::App) will build;
//! [`install_error_pages`] registers a single `GET /error/:code` route that covers
//! all of them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::context::Context;
use crate::http::{Method, StatusCode};
use crate::router::{ConfigError, Controller, HandlerResult, RouteTable};

/// The failure classes that get a reserved route.
pub const RESERVED_STATUSES: [StatusCode; 8] = [
    StatusCode::BadRequest,
    StatusCode::Unauthorized,
    StatusCode::PaymentRequired,
    StatusCode::Forbidden,
    StatusCode::NotFound,
    StatusCode::MethodNotAllowed,
    StatusCode::NotAcceptable,
    StatusCode::InternalServerError,
];

const DEFAULT_PREFIX: &str = "/error/";

/// Maps each reserved status to the path of its `GET` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRoutes {
    prefix: String,
    paths: BTreeMap<StatusCode, String>,
}

impl Default for ErrorRoutes {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }
}

impl ErrorRoutes {
    /// Routes of the form `{prefix}{code}`. A missing trailing slash is added.
    pub fn with_prefix(prefix: &str) -> Self {
        let mut prefix = prefix.to_owned();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let paths = RESERVED_STATUSES
            .iter()
            .map(|status| (*status, format!("{prefix}{}", status.as_u16())))
            .collect();
        Self { prefix, paths }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path_for(&self, status: StatusCode) -> Option<&str> {
        self.paths.get(&status).map(String::as_str)
    }

    /// The status whose reserved route is `GET path`, if any.
    pub fn status_for(&self, method: &Method, path: &str) -> Option<StatusCode> {
        if method != &Method::Get {
            return None;
        }
        self.paths
            .iter()
            .find(|(_, p)| p.as_str() == path)
            .map(|(status, _)| *status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StatusCode, &str)> {
        self.paths.iter().map(|(status, path)| (*status, path.as_str()))
    }

    /// Fails with the first reserved route the table cannot resolve.
    pub fn verify(&self, table: &RouteTable) -> Result<(), ConfigError> {
        for (status, path) in self.iter() {
            if table.lookup(&Method::Get, path).is_none() {
                return Err(ConfigError::MissingErrorRoute {
                    status: status.as_u16(),
                    path: path.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Registers `GET {prefix}:code` bound to [`error_page`].
pub fn install_error_pages(table: &mut RouteTable, routes: &ErrorRoutes) -> Result<(), ConfigError> {
    let errors = Controller::new("Errors").action("describe", error_page);
    table.register_path(&format!("GET {}:code", routes.prefix()), &errors, "describe")?;
    Ok(())
}

/// Stock error page. Prints the failure class and, on the 500 page, the fault
/// value and stack snapshot carried over from the failed hop.
pub async fn error_page(mut ctx: Context) -> HandlerResult {
    let code = ctx.param("code").unwrap_or("500").to_owned();
    let mut page = String::from("<!DOCTYPE html><html><head><title>Error</title></head><body>\n");
    let _ = writeln!(
        page,
        "<h1>Error {}</h1><p>Ooops! It seems that error {} occurred. Try to refresh the page or pick another link.</p>",
        escape_html(&code),
        escape_html(&code)
    );

    if let Some(diagnostics) = ctx.diagnostics() {
        let _ = writeln!(
            page,
            "<p style=\"text-align: left;\">{}</p>",
            escape_html(&diagnostics.fault)
        );
        page.push_str("<p style=\"text-align: left;\">");
        for frame in &diagnostics.stack {
            let _ = write!(page, "{}<br>", escape_html(frame));
        }
        page.push_str("</p>\n");
    }
    page.push_str("</body></html>\n");

    ctx.set_content_type("text/html; charset=utf-8");
    ctx.write(page);
    ctx.done()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
