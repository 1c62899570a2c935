//! Session store built on the actor pattern.
//!
//! ```text
//!  handlers / hooks             SessionActor               sweeper task
//!  ────────────────   command   ─────────────   SweepExpired  ────────────
//!  SessionHandle  ──────────▶  HashMap<id,   ◀──────────── interval tick
//!  (cloneable)    ◀──────────  Session>
//!                   oneshot
//! ```
//!
//! The actor is the only owner of the map, so every read and write is serialized
//! through its command loop. A session is bound to the client address it was
//! created from and expires after a configurable idle period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::debug;

use crate::database::UserDirectory;

mod actor;
mod commands;
mod handle;
mod id;
pub mod persist;

pub use actor::SessionActor;
pub use commands::{SessionCommand, SessionError};
pub use handle::SessionHandle;
pub use persist::PersistError;

/// Role given to a user without any role membership.
pub const ANON_ROLE: &str = "anon";

const COMMAND_BUFFER: usize = 256;

/// Rank of a role label. Unknown labels rank below every known role.
pub fn role_rank(role: &str) -> u8 {
    match role {
        "anon" => 1,
        "user" => 2,
        "admin" => 3,
        "root" => 4,
        _ => 0,
    }
}

/// Whether `role` is at least `min`.
pub fn role_or_higher(role: &str, min: &str) -> bool {
    role_rank(role) >= role_rank(min)
}

/// Whether `role` is at most `max`.
pub fn role_or_lower(role: &str, max: &str) -> bool {
    role_rank(role) <= role_rank(max)
}

/// An authenticated user's session. Handlers only ever see copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub user_name: String,
    pub role: String,
    pub agent: String,
    /// Client IP the session was created from, without the port.
    pub remote_addr: String,
    /// Unix seconds.
    pub last_access: i64,
}

impl Session {
    pub fn role_or_higher(&self, min: &str) -> bool {
        role_or_higher(&self.role, min)
    }

    pub fn role_or_lower(&self, max: &str) -> bool {
        role_or_lower(&self.role, max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "data".to_owned(),
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(600),
        }
    }
}

/// Spawns the session actor seeded with `restored`, plus the periodic sweeper,
/// and returns a handle to it.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_session_store(
    directory: Arc<dyn UserDirectory>,
    config: &SessionConfig,
    restored: HashMap<String, Session>,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = SessionActor::new(cmd_rx, directory, config.idle_timeout.as_secs())
        .with_sessions(restored);
    tokio::spawn(actor.run());

    spawn_sweeper(cmd_tx.downgrade(), config.sweep_interval);

    SessionHandle::new(cmd_tx, &config.cookie_name)
}

/// Sends `SweepExpired` every `every`. Holds only a weak sender, so the
/// sweeper never keeps the actor alive once every handle is dropped.
fn spawn_sweeper(sender: mpsc::WeakSender<SessionCommand>, every: Duration) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);

        loop {
            ticker.tick().await;

            let Some(sender) = sender.upgrade() else {
                debug!("session sweeper stopping: no handles left");
                break;
            };
            if sender
                .send(SessionCommand::SweepExpired { respond_to: None })
                .await
                .is_err()
            {
                debug!("session sweeper stopping: actor gone");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ranking() {
        assert!(role_or_higher("admin", "user"));
        assert!(role_or_higher("user", "user"));
        assert!(!role_or_higher("anon", "user"));
        assert!(role_or_lower("anon", "user"));
        assert!(!role_or_lower("root", "admin"));
        // unknown roles rank lowest
        assert!(!role_or_higher("guest", "anon"));
        assert!(role_or_lower("guest", "anon"));
    }

    #[test]
    fn session_serializes_with_field_names() {
        let session = Session {
            id: "abc".into(),
            user_id: 3,
            user_name: "ada".into(),
            role: "user".into(),
            agent: "curl".into(),
            remote_addr: "127.0.0.1".into(),
            last_access: 10,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["user_id"], 3);
        assert_eq!(json["remote_addr"], "127.0.0.1");
        assert!(session.role_or_higher("anon"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_idle_sessions() {
        let mut restored = HashMap::new();
        restored.insert(
            "stale".to_owned(),
            Session {
                id: "stale".into(),
                user_id: 1,
                user_name: "ada".into(),
                role: "user".into(),
                agent: String::new(),
                remote_addr: "127.0.0.1".into(),
                last_access: 0,
            },
        );
        let config = SessionConfig {
            sweep_interval: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let sessions = spawn_session_store(
            Arc::new(crate::database::MemoryDirectory::new()),
            &config,
            restored,
        );
        assert_eq!(sessions.count().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sessions.count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_once_every_handle_is_gone() {
        let (tx, mut rx) = mpsc::channel(4);
        let sweeper = spawn_sweeper(tx.downgrade(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(matches!(
            rx.recv().await,
            Some(SessionCommand::SweepExpired { respond_to: None })
        ));

        drop(tx);
        tokio::time::sleep(Duration::from_secs(6)).await;
        sweeper.await.unwrap();
        // the sweeper held no strong sender, so the channel is closed
        assert!(rx.recv().await.is_none());
    }
}
