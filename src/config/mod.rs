//! Runtime settings, loaded from an optional JSON file.
//!
//! Every field has a default, so an empty object (or no file at all) is a valid
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionConfig;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {} is not valid: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Listener address, e.g. `127.0.0.1:8080`.
    pub bind_addr: String,
    /// Dispatch hops per request before giving up.
    pub routing_chain_max: usize,
    /// Stack lines kept when a handler faults.
    pub stack_frames_max: usize,
    /// Prefix of the reserved error routes.
    pub error_route_prefix: String,
    pub session_cookie: String,
    pub session_idle_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,
    pub sessions_file: PathBuf,
    /// Write the session map to `sessions_file` at shutdown.
    pub archive_sessions: bool,
    /// Read `sessions_file` back at startup.
    pub restore_sessions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_owned(),
            routing_chain_max: 4,
            stack_frames_max: 64,
            error_route_prefix: "/error/".to_owned(),
            session_cookie: "data".to_owned(),
            session_idle_timeout_secs: 3600,
            session_sweep_interval_secs: 600,
            sessions_file: PathBuf::from("sessions.json"),
            archive_sessions: true,
            restore_sessions: true,
        }
    }
}

impl Settings {
    /// Reads and validates the settings at `path`.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self =
            serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.routing_chain_max == 0 {
            return Err(SettingsError::Invalid {
                field: "routing_chain_max",
                reason: "must allow at least one hop".into(),
            });
        }
        if self.session_cookie.is_empty()
            || self
                .session_cookie
                .contains(|c: char| c.is_whitespace() || matches!(c, ';' | '=' | ','))
        {
            return Err(SettingsError::Invalid {
                field: "session_cookie",
                reason: format!("{:?} is not a usable cookie name", self.session_cookie),
            });
        }
        if self.session_sweep_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "session_sweep_interval_secs",
                reason: "must be positive".into(),
            });
        }
        if !self.error_route_prefix.starts_with('/') {
            return Err(SettingsError::Invalid {
                field: "error_route_prefix",
                reason: "must start with '/'".into(),
            });
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            cookie_name: self.session_cookie.clone(),
            idle_timeout: Duration::from_secs(self.session_idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.session_sweep_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_object_is_all_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "bind_addr": "0.0.0.0:9000", "routing_chain_max": 6, "restore_sessions": false }"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:9000");
        assert_eq!(settings.routing_chain_max, 6);
        assert!(!settings.restore_sessions);
        assert_eq!(settings.session_cookie, "data");
    }

    #[test]
    fn zero_chain_is_rejected() {
        let settings = Settings {
            routing_chain_max: 0,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "routing_chain_max",
                ..
            })
        ));
    }

    #[test]
    fn bad_cookie_name_is_rejected() {
        let settings = Settings {
            session_cookie: "a b".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_errors_name_the_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        let err = Settings::load(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.json"));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(matches!(
            Settings::load(&broken),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn session_config_uses_seconds() {
        let config = Settings::default().session_config();
        assert_eq!(config.idle_timeout, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.cookie_name, "data");
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(
            Settings::load_or_default(None).unwrap(),
            Settings::default()
        );
    }
}
