//! Client side of the session actor.
//!
//! Channel failures map to [`SessionError::ChannelClosed`]; nothing here panics.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::Session;
use super::commands::{SessionCommand, SessionError};
use crate::context::Context;
use crate::http::Request;

/// Cheap-to-clone handle for the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    cookie_name: Arc<str>,
}

impl SessionHandle {
    pub fn new(sender: mpsc::Sender<SessionCommand>, cookie_name: &str) -> Self {
        Self {
            sender,
            cookie_name: Arc::from(cookie_name),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Session named by the request's cookie, if it exists and was created from
    /// the same client address. A request without the cookie never reaches the
    /// actor.
    pub async fn get(&self, request: &Request) -> Result<Option<Session>, SessionError> {
        let Some(id) = request
            .cookie(&self.cookie_name)
            .filter(|value| !value.is_empty())
        else {
            return Ok(None);
        };
        let id = id.to_owned();
        let remote_ip = request.remote_ip();
        self.ask(|respond_to| SessionCommand::Get {
            id,
            remote_ip,
            respond_to,
        })
        .await
    }

    /// Creates a session for `user`, bound to the request's client address and
    /// user agent. Setting the cookie is up to the caller; see [`login`](Self::login).
    pub async fn create(&self, user: &str, request: &Request) -> Result<Session, SessionError> {
        let user = user.to_owned();
        let agent = request.user_agent().to_owned();
        let remote_ip = request.remote_ip();
        self.ask(|respond_to| SessionCommand::Create {
            user,
            agent,
            remote_ip,
            respond_to,
        })
        .await?
    }

    pub async fn expire_by_id(&self, id: &str) -> Result<bool, SessionError> {
        let id = id.to_owned();
        self.ask(|respond_to| SessionCommand::ExpireById { id, respond_to })
            .await
    }

    /// Removes one session of `user_id`, returning its id.
    pub async fn expire_by_user_id(&self, user_id: i64) -> Result<Option<String>, SessionError> {
        self.ask(|respond_to| SessionCommand::ExpireByUserId {
            user_id,
            respond_to,
        })
        .await
    }

    /// Removes every session of `user_id`, returning how many there were.
    pub async fn expire_all_for_user(&self, user_id: i64) -> Result<usize, SessionError> {
        self.ask(|respond_to| SessionCommand::ExpireAllForUser {
            user_id,
            respond_to,
        })
        .await
    }

    pub async fn sweep_expired(&self) -> Result<usize, SessionError> {
        self.ask(|respond_to| SessionCommand::SweepExpired {
            respond_to: Some(respond_to),
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<HashMap<String, Session>, SessionError> {
        self.ask(|respond_to| SessionCommand::Snapshot { respond_to })
            .await
    }

    pub async fn count(&self) -> Result<usize, SessionError> {
        self.ask(|respond_to| SessionCommand::Count { respond_to })
            .await
    }

    /// Creates a session for `user`, attaches it to `ctx` and sets the cookie.
    pub async fn login(&self, ctx: &mut Context, user: &str) -> Result<Session, SessionError> {
        let session = self.create(user, ctx.request()).await?;
        ctx.set_cookie(&self.cookie_name, &session.id);
        ctx.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Expires the session attached to `ctx`, if any, and clears the cookie.
    pub async fn logout(&self, ctx: &mut Context) -> Result<(), SessionError> {
        if let Some(session) = ctx.session() {
            let id = session.id.clone();
            self.expire_by_id(&id).await?;
            ctx.set_session(None);
        }
        ctx.clear_cookie(&self.cookie_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDirectory;
    use crate::session::{SessionConfig, spawn_session_store};
    use std::net::SocketAddr;

    fn request(raw: &str, peer: &str) -> Request {
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        request.with_remote_addr(peer.parse::<SocketAddr>().unwrap())
    }

    fn store() -> SessionHandle {
        let directory = MemoryDirectory::new().with_user("ada", 1, Some("user"));
        spawn_session_store(Arc::new(directory), &SessionConfig::default(), HashMap::new())
    }

    #[tokio::test]
    async fn missing_or_empty_cookie_is_none() {
        let sessions = store();
        let bare = request("GET / HTTP/1.1\r\n\r\n", "10.0.0.1:5000");
        assert_eq!(sessions.get(&bare).await.unwrap(), None);

        let empty = request("GET / HTTP/1.1\r\nCookie: data=\r\n\r\n", "10.0.0.1:5000");
        assert_eq!(sessions.get(&empty).await.unwrap(), None);
    }

    #[tokio::test]
    async fn login_then_get_follows_the_address() {
        let sessions = store();
        let login = request("POST /login HTTP/1.1\r\nUser-Agent: t\r\n\r\n", "10.0.0.1:5000");
        let mut ctx = Context::for_request(login);
        let session = sessions.login(&mut ctx, "ada").await.unwrap();
        let cookie = ctx.headers().get("Set-Cookie").unwrap();
        assert!(cookie.starts_with(&format!("data={}", session.id)));
        assert!(ctx.session().is_some());

        let raw = format!("GET / HTTP/1.1\r\nCookie: data={}\r\n\r\n", session.id);
        // A new port on the same host still matches.
        let same = request(&raw, "10.0.0.1:6000");
        assert_eq!(sessions.get(&same).await.unwrap().map(|s| s.id), Some(session.id.clone()));

        let other = request(&raw, "10.0.0.9:6000");
        assert_eq!(sessions.get(&other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn logout_expires_and_clears() {
        let sessions = store();
        let login = request("POST /login HTTP/1.1\r\n\r\n", "10.0.0.1:5000");
        let mut ctx = Context::for_request(login);
        sessions.login(&mut ctx, "ada").await.unwrap();
        assert_eq!(sessions.count().await.unwrap(), 1);

        sessions.logout(&mut ctx).await.unwrap();
        assert_eq!(sessions.count().await.unwrap(), 0);
        assert!(ctx.session().is_none());
        assert!(ctx.headers().get("Set-Cookie").unwrap().contains("1970"));
    }

    #[tokio::test]
    async fn closed_actor_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sessions = SessionHandle::new(tx, "data");
        assert_eq!(sessions.count().await, Err(SessionError::ChannelClosed));
    }
}
