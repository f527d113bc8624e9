//! Session snapshot persistence
//!
//! Lets a transcript survive a restart of the hosting process.

use super::Session;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Storage for session snapshots
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Overwrite the stored snapshot for this session
    async fn save(&self, session: &Session) -> Result<(), String>;

    /// Load a previously stored snapshot, if any
    async fn load(&self, session_id: &str) -> Result<Option<Session>, String>;
}

#[async_trait]
impl<T: SessionPersistence + ?Sized> SessionPersistence for Arc<T> {
    async fn save(&self, session: &Session) -> Result<(), String> {
        (**self).save(session).await
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, String> {
        (**self).load(session_id).await
    }
}

/// Process-local persistence; snapshots die with the process
#[derive(Default)]
pub struct MemoryPersistence {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionPersistence for MemoryPersistence {
    async fn save(&self, session: &Session) -> Result<(), String> {
        self.sessions
            .lock()
            .map_err(|e| e.to_string())?
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, String> {
        Ok(self
            .sessions
            .lock()
            .map_err(|e| e.to_string())?
            .get(session_id)
            .cloned())
    }
}

/// One JSON file per session under a state directory
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }
}

/// Injective file stem: ASCII alphanumerics and `-` stay, every other byte
/// (including `_`, the escape) becomes `_XX` in hex
fn file_stem(session_id: &str) -> String {
    let mut stem = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "_{byte:02X}");
        }
    }
    stem
}

#[async_trait]
impl SessionPersistence for FilePersistence {
    async fn save(&self, session: &Session) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| format!("Cannot create {}: {e}", self.dir.display()))?;

        let path = self.path_for(&session.session_id);
        let json = serde_json::to_vec_pretty(session).map_err(|e| e.to_string())?;

        // Write to a sibling temp file, then rename over the snapshot
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| format!("Cannot write {}: {e}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| format!("Cannot replace {}: {e}", path.display()))
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, String> {
        let path = self.path_for(session_id);
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| format!("Corrupt snapshot {}: {e}", path.display()))
    }
}
