//! Session archive: the whole map as one JSON object keyed by session id.
//!
//! Writes go to a sibling temp file first and are renamed into place, so a crash
//! mid-write leaves the previous archive intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use super::Session;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("session archive I/O at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session archive is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub async fn archive(path: &Path, sessions: &HashMap<String, Session>) -> Result<(), PersistError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistError::io(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(sessions)?;
    let temp_path = path.with_extension("json.tmp");

    fs::write(&temp_path, &json)
        .await
        .map_err(|e| PersistError::io(&temp_path, e))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| PersistError::io(path, e))?;
    Ok(())
}

pub async fn restore(path: &Path) -> Result<HashMap<String, Session>, PersistError> {
    let bytes = fs::read(path).await.map_err(|e| PersistError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}
