//! Page rendering contract and the functions pages may call.
//!
//! Rendering itself sits behind the [`Renderer`] trait. The crate ships
//! [`TextRenderer`], which only knows one construct: `{{name arg ...}}` calls the
//! registered function `name` and splices in its result. Arguments are literal
//! words, or `$role`, `$user` and `$path` to read from the request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::context::Context;
use crate::session::{ANON_ROLE, role_or_higher, role_or_lower};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no template named {name:?}")]
    NotFound { name: String },

    #[error("template function {name:?} is already registered")]
    DuplicateFunction { name: String },

    #[error("unknown template function {name:?}")]
    UnknownFunction { name: String },

    #[error("template function {name:?} failed: {reason}")]
    Function { name: String, reason: String },

    #[error("template {name:?} has an unclosed call at byte {offset}")]
    Unclosed { name: String, offset: usize },
}

/// A function callable from a page. May modify the context, e.g. to redirect.
pub type TemplateFn =
    Arc<dyn Fn(&mut Context, &[Value]) -> Result<Value, TemplateError> + Send + Sync>;

/// Named page functions. Each name can be registered once; the first
/// registration wins.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, TemplateFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `roleOrHigher`, `roleOrLower` and `redirect`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, TemplateFn); 3] = [
            ("roleOrHigher", Arc::new(builtin_role_or_higher)),
            ("roleOrLower", Arc::new(builtin_role_or_lower)),
            ("redirect", Arc::new(builtin_redirect)),
        ];
        for (name, function) in builtins {
            registry.functions.insert(name.to_owned(), function);
        }
        registry
    }

    /// Adds `function` under `name`. A taken name is reported and left as it was.
    pub fn register<F>(&mut self, name: &str, function: F) -> Result<(), TemplateError>
    where
        F: Fn(&mut Context, &[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        if self.functions.contains_key(name) {
            warn!(function = %name, "template function already registered, keeping the first");
            return Err(TemplateError::DuplicateFunction {
                name: name.to_owned(),
            });
        }
        self.functions.insert(name.to_owned(), Arc::new(function));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn call(&self, name: &str, ctx: &mut Context, args: &[Value]) -> Result<Value, TemplateError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFunction {
                name: name.to_owned(),
            })?;
        function(ctx, args)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

fn builtin_role_or_higher(_ctx: &mut Context, args: &[Value]) -> Result<Value, TemplateError> {
    let (role, min) = two_strings("roleOrHigher", args)?;
    Ok(Value::Bool(role_or_higher(role, min)))
}

fn builtin_role_or_lower(_ctx: &mut Context, args: &[Value]) -> Result<Value, TemplateError> {
    let (role, max) = two_strings("roleOrLower", args)?;
    Ok(Value::Bool(role_or_lower(role, max)))
}

/// Redirects the response and yields the resulting status code.
fn builtin_redirect(ctx: &mut Context, args: &[Value]) -> Result<Value, TemplateError> {
    let path = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| TemplateError::Function {
            name: "redirect".into(),
            reason: "expects a path".into(),
        })?;
    ctx.redirect(path);
    Ok(Value::from(ctx.status().as_u16()))
}

fn two_strings<'a>(name: &str, args: &'a [Value]) -> Result<(&'a str, &'a str), TemplateError> {
    match args {
        [Value::String(a), Value::String(b)] => Ok((a.as_str(), b.as_str())),
        _ => Err(TemplateError::Function {
            name: name.to_owned(),
            reason: "expects two strings".into(),
        }),
    }
}

/// Turns a named page into bytes for the given request.
pub trait Renderer: Send + Sync {
    fn render(&self, ctx: &mut Context, name: &str) -> Result<Vec<u8>, TemplateError>;
}

/// Renders `name` into the context's output buffer as HTML.
pub fn render_into(
    renderer: &dyn Renderer,
    ctx: &mut Context,
    name: &str,
) -> Result<(), TemplateError> {
    let page = renderer.render(ctx, name)?;
    if ctx.content_type().is_none() {
        ctx.set_content_type("text/html; charset=utf-8");
    }
    ctx.write(page);
    Ok(())
}

/// In-memory pages with `{{function arg ...}}` calls.
pub struct TextRenderer {
    pages: HashMap<String, String>,
    functions: Arc<FunctionRegistry>,
}

impl TextRenderer {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self {
            pages: HashMap::new(),
            functions,
        }
    }

    #[must_use]
    pub fn page(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.pages.insert(name.into(), source.into());
        self
    }

    fn argument(ctx: &Context, word: &str) -> Value {
        match word {
            "$role" => Value::from(ctx.session().map_or(ANON_ROLE, |s| s.role.as_str())),
            "$user" => Value::from(ctx.session().map_or("", |s| s.user_name.as_str())),
            "$path" => Value::from(ctx.path()),
            literal => Value::from(literal.trim_matches('"')),
        }
    }
}

impl Renderer for TextRenderer {
    fn render(&self, ctx: &mut Context, name: &str) -> Result<Vec<u8>, TemplateError> {
        let source = self.pages.get(name).ok_or_else(|| TemplateError::NotFound {
            name: name.to_owned(),
        })?;

        let mut out = String::with_capacity(source.len());
        let mut rest = source.as_str();
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| TemplateError::Unclosed {
                name: name.to_owned(),
                offset: source.len() - rest.len() + open,
            })?;

            let mut words = after[..close].split_whitespace();
            if let Some(function) = words.next() {
                let args: Vec<Value> = words.map(|word| Self::argument(ctx, word)).collect();
                match self.functions.call(function, ctx, &args)? {
                    Value::Null => {}
                    Value::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                }
            }
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, StatusCode};
    use crate::session::Session;

    fn ctx() -> Context {
        let (request, _) = Request::parse(b"GET /home HTTP/1.1\r\n\r\n").unwrap();
        Context::for_request(request)
    }

    fn admin() -> Session {
        Session {
            id: "s".into(),
            user_id: 1,
            user_name: "ada".into(),
            role: "admin".into(),
            agent: String::new(),
            remote_addr: "127.0.0.1".into(),
            last_access: 0,
        }
    }

    #[test]
    fn duplicate_registration_keeps_the_first() {
        let mut registry = FunctionRegistry::with_builtins();
        registry
            .register("greet", |_ctx: &mut Context, _args: &[Value]| Ok(Value::from("hi")))
            .unwrap();
        let err = registry
            .register("greet", |_ctx: &mut Context, _args: &[Value]| Ok(Value::from("bye")))
            .unwrap_err();
        assert_eq!(err, TemplateError::DuplicateFunction { name: "greet".into() });

        let mut c = ctx();
        assert_eq!(registry.call("greet", &mut c, &[]).unwrap(), Value::from("hi"));
        assert!(registry.register("redirect", |_c: &mut Context, _a: &[Value]| Ok(Value::Null)).is_err());
    }

    #[test]
    fn builtins_compare_roles_and_redirect() {
        let registry = FunctionRegistry::with_builtins();
        let mut c = ctx();
        let args = [Value::from("user"), Value::from("admin")];
        assert_eq!(registry.call("roleOrHigher", &mut c, &args).unwrap(), Value::Bool(false));
        assert_eq!(registry.call("roleOrLower", &mut c, &args).unwrap(), Value::Bool(true));

        let status = registry.call("redirect", &mut c, &[Value::from("/login")]).unwrap();
        assert_eq!(status, Value::from(303));
        assert_eq!(c.status(), StatusCode::SeeOther);
        assert_eq!(c.location(), Some("/login"));
    }

    #[test]
    fn text_renderer_calls_functions_with_context_values() {
        let registry = Arc::new(FunctionRegistry::with_builtins());
        let renderer = TextRenderer::new(registry)
            .page("home", "<p>admin: {{roleOrHigher $role admin}}</p>");

        let mut anonymous = ctx();
        let page = renderer.render(&mut anonymous, "home").unwrap();
        assert_eq!(page, b"<p>admin: false</p>");

        let mut signed_in = ctx();
        signed_in.set_session(Some(admin()));
        render_into(&renderer, &mut signed_in, "home").unwrap();
        assert_eq!(signed_in.body(), b"<p>admin: true</p>");
        assert_eq!(signed_in.content_type(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn text_renderer_errors() {
        let renderer = TextRenderer::new(Arc::new(FunctionRegistry::new()))
            .page("open", "a {{nope")
            .page("unknown", "{{nope}}");
        let mut c = ctx();
        assert!(matches!(
            renderer.render(&mut c, "missing"),
            Err(TemplateError::NotFound { .. })
        ));
        assert_eq!(
            renderer.render(&mut c, "open"),
            Err(TemplateError::Unclosed { name: "open".into(), offset: 2 })
        );
        assert!(matches!(
            renderer.render(&mut c, "unknown"),
            Err(TemplateError::UnknownFunction { .. })
        ));
    }
}
