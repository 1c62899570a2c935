//! Messages for the session actor and the errors its callers can see.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::oneshot;

use super::Session;
use crate::database::DirectoryError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The actor task is gone; nothing can be read or written.
    #[error("session store is not running")]
    ChannelClosed,

    #[error("cannot create a session for unknown user {login:?}")]
    UnknownUser { login: String },

    #[error("user directory failed: {0}")]
    Directory(#[source] DirectoryError),
}

impl From<DirectoryError> for SessionError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::UnknownUser { login } => Self::UnknownUser { login },
            other => Self::Directory(other),
        }
    }
}

/// Commands processed by the session actor, strictly in arrival order.
#[derive(Debug)]
pub enum SessionCommand {
    /// Look up a session. Answers `None` unless the stored address matches.
    /// A hit refreshes the session's last access time.
    Get {
        id: String,
        remote_ip: String,
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Create and store a session for `user`.
    Create {
        user: String,
        agent: String,
        remote_ip: String,
        respond_to: oneshot::Sender<Result<Session, SessionError>>,
    },

    /// Remove one session. Answers whether it existed.
    ExpireById {
        id: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Remove the first session owned by `user_id`. Answers the removed id.
    ExpireByUserId {
        user_id: i64,
        respond_to: oneshot::Sender<Option<String>>,
    },

    /// Remove every session owned by `user_id`. Answers how many went.
    ExpireAllForUser {
        user_id: i64,
        respond_to: oneshot::Sender<usize>,
    },

    /// Drop idle sessions. The periodic sweeper sends this without a reply channel.
    SweepExpired {
        respond_to: Option<oneshot::Sender<usize>>,
    },

    /// Copy of the whole map, for archiving.
    Snapshot {
        respond_to: oneshot::Sender<HashMap<String, Session>>,
    },

    Count {
        respond_to: oneshot::Sender<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_keeps_its_own_variant() {
        let err: SessionError = DirectoryError::UnknownUser {
            login: "eve".into(),
        }
        .into();
        assert_eq!(
            err,
            SessionError::UnknownUser {
                login: "eve".into()
            }
        );

        let err: SessionError = DirectoryError::Unavailable("down".into()).into();
        assert!(matches!(err, SessionError::Directory(_)));
    }
}
