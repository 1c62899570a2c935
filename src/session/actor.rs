//! The task that owns the session map.
//!
//! Nothing outside this loop reads or writes the map; callers go through
//! [`SessionHandle`](super::SessionHandle), which turns each call into a
//! [`SessionCommand`] and awaits the reply.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::commands::{SessionCommand, SessionError};
use super::{ANON_ROLE, Session, id};
use crate::database::UserDirectory;

pub struct SessionActor {
    receiver: mpsc::Receiver<SessionCommand>,
    sessions: HashMap<String, Session>,
    directory: Arc<dyn UserDirectory>,
    idle_timeout_secs: i64,
}

impl SessionActor {
    pub fn new(
        receiver: mpsc::Receiver<SessionCommand>,
        directory: Arc<dyn UserDirectory>,
        idle_timeout_secs: u64,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            directory,
            idle_timeout_secs: i64::try_from(idle_timeout_secs).unwrap_or(i64::MAX),
        }
    }

    /// Seeds the map, typically from a restored archive.
    #[must_use]
    pub fn with_sessions(mut self, sessions: HashMap<String, Session>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Processes commands until every handle has been dropped.
    pub async fn run(mut self) {
        info!(sessions = self.sessions.len(), "session actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "session actor stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        // Send errors only mean the caller stopped waiting.
        match cmd {
            SessionCommand::Get {
                id,
                remote_ip,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_get(&id, &remote_ip));
            }
            SessionCommand::Create {
                user,
                agent,
                remote_ip,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_create(user, agent, remote_ip));
            }
            SessionCommand::ExpireById { id, respond_to } => {
                let _ = respond_to.send(self.handle_expire_by_id(&id));
            }
            SessionCommand::ExpireByUserId {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_expire_by_user_id(user_id));
            }
            SessionCommand::ExpireAllForUser {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_expire_all_for_user(user_id));
            }
            SessionCommand::SweepExpired { respond_to } => {
                let removed = self.handle_sweep_expired(Utc::now().timestamp());
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(removed);
                }
            }
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.sessions.clone());
            }
            SessionCommand::Count { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
        }
    }

    fn handle_get(&mut self, id: &str, remote_ip: &str) -> Option<Session> {
        let Some(session) = self.sessions.get_mut(id) else {
            debug!(session = %id, "no such session");
            return None;
        };
        if session.remote_addr != remote_ip {
            debug!(
                session = %id,
                stored = %session.remote_addr,
                remote = %remote_ip,
                "session address mismatch"
            );
            return None;
        }
        session.last_access = Utc::now().timestamp();
        Some(session.clone())
    }

    fn handle_create(
        &mut self,
        user: String,
        agent: String,
        remote_ip: String,
    ) -> Result<Session, SessionError> {
        let user_id = self.directory.user_id(&user)?;
        let role = self
            .directory
            .role(user_id)?
            .unwrap_or_else(|| ANON_ROLE.to_owned());

        let session = Session {
            id: id::generate(&user, &agent, &remote_ip),
            user_id,
            user_name: user,
            role,
            agent,
            remote_addr: remote_ip,
            last_access: Utc::now().timestamp(),
        };
        info!(
            session = %session.id,
            user = %session.user_name,
            role = %session.role,
            "session created"
        );
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn handle_expire_by_id(&mut self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session = %id, "session expired");
        }
        removed
    }

    fn handle_expire_by_user_id(&mut self, user_id: i64) -> Option<String> {
        let id = self
            .sessions
            .values()
            .find(|session| session.user_id == user_id)
            .map(|session| session.id.clone())?;
        self.sessions.remove(&id);
        info!(session = %id, user_id, "session expired for user");
        Some(id)
    }

    fn handle_expire_all_for_user(&mut self, user_id: i64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.user_id != user_id);
        let removed = before - self.sessions.len();
        if removed > 0 {
            info!(user_id, removed, "all sessions expired for user");
        }
        removed
    }

    fn handle_sweep_expired(&mut self, now: i64) -> usize {
        let before = self.sessions.len();
        let timeout = self.idle_timeout_secs;
        self.sessions
            .retain(|_, session| now.saturating_sub(session.last_access) <= timeout);
        let removed = before - self.sessions.len();
        if removed > 0 {
            info!(removed, remaining = self.sessions.len(), "idle sessions swept");
        } else {
            debug!("no idle sessions to sweep");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
