//! User directory: the lookups a session needs at login time.
//!
//! The session store only asks two questions of the backing store: which id a
//! login maps to, and which role that id holds. [`UserDirectory`] captures those,
//! [`MemoryDirectory`] answers them from a fixed table, and [`DirectoryPool`]
//! hands out one shared directory per credential triple.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("no user with login {login:?}")]
    UnknownUser { login: String },

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of users and their roles.
///
/// Calls are synchronous: the session actor makes them from inside its command
/// loop, which owns no other suspension point.
pub trait UserDirectory: Send + Sync {
    /// Id of the user registered under `login`.
    fn user_id(&self, login: &str) -> Result<i64, DirectoryError>;

    /// Name of the role `user_id` belongs to, or `None` without a membership.
    fn role(&self, user_id: i64) -> Result<Option<String>, DirectoryError>;
}

#[derive(Debug, Clone)]
struct UserRecord {
    id: i64,
    role: Option<String>,
}

/// Fixed in-memory user table.
///
/// ```
/// use waypost::database::{MemoryDirectory, UserDirectory};
///
/// let users = MemoryDirectory::new()
///     .with_user("ada", 1, Some("admin"))
///     .with_user("bob", 2, None);
/// assert_eq!(users.user_id("ada").unwrap(), 1);
/// assert_eq!(users.role(2).unwrap(), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    by_login: HashMap<String, UserRecord>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, login: &str, id: i64, role: Option<&str>) -> Self {
        self.insert(login, id, role);
        self
    }

    pub fn insert(&mut self, login: &str, id: i64, role: Option<&str>) {
        self.by_login.insert(
            login.to_owned(),
            UserRecord {
                id,
                role: role.map(str::to_owned),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.by_login.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_login.is_empty()
    }
}

impl UserDirectory for MemoryDirectory {
    fn user_id(&self, login: &str) -> Result<i64, DirectoryError> {
        self.by_login
            .get(login)
            .map(|record| record.id)
            .ok_or_else(|| DirectoryError::UnknownUser {
                login: login.to_owned(),
            })
    }

    fn role(&self, user_id: i64) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .by_login
            .values()
            .find(|record| record.id == user_id)
            .and_then(|record| record.role.clone()))
    }
}

/// Connection credentials. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Credentials {
    pub fn new(user: &str, password: &str, database: &str) -> Self {
        Self {
            user: user.to_owned(),
            password: password.to_owned(),
            database: database.to_owned(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Opens a directory for a credential triple.
pub type Connector =
    Arc<dyn Fn(&Credentials) -> Result<Arc<dyn UserDirectory>, DirectoryError> + Send + Sync>;

/// Caches one open directory per credential triple.
pub struct DirectoryPool {
    connector: Connector,
    open: Mutex<HashMap<Credentials, Arc<dyn UserDirectory>>>,
}

impl DirectoryPool {
    pub fn new<F>(connector: F) -> Self
    where
        F: Fn(&Credentials) -> Result<Arc<dyn UserDirectory>, DirectoryError> + Send + Sync + 'static,
    {
        Self {
            connector: Arc::new(connector),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached directory for `credentials`, opening it on first use.
    /// A failed open is not cached.
    pub async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn UserDirectory>, DirectoryError> {
        let mut open = self.open.lock().await;
        if let Some(directory) = open.get(credentials) {
            return Ok(Arc::clone(directory));
        }
        let directory = (self.connector)(credentials)?;
        debug!(user = %credentials.user, database = %credentials.database, "directory opened");
        open.insert(credentials.clone(), Arc::clone(&directory));
        Ok(directory)
    }

    pub async fn open_count(&self) -> usize {
        self.open.lock().await.len()
    }
}
