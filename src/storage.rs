use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::events::Conversation;

/// Name of the durable record holding every conversation
pub const STORAGE_KEY: &str = "gemini_chat_sessions.json";

/// Durable home of the session list.
///
/// `load` never fails: a missing or unreadable record is reported as `None` and
/// the caller starts fresh.
pub trait SessionStorage: Send {
    fn load(&self) -> Option<Vec<Conversation>>;
    fn save(&self, sessions: &[Conversation]) -> Result<(), StorageError>;
}

/// Stores the session list as a JSON array in a single file
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Option<Vec<Conversation>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored sessions");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read stored sessions");
                return None;
            }
        };

        match serde_json::from_str::<Vec<Conversation>>(&content) {
            Ok(sessions) => Some(sessions),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed session record");
                None
            }
        }
    }

    fn save(&self, sessions: &[Conversation]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(sessions)?;
        // Replace the record atomically.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Keeps the serialized record in memory; used by `--no-persist`
#[derive(Default)]
pub struct MemoryStorage {
    record: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_record(record: impl Into<String>) -> Self {
        Self {
            record: Mutex::new(Some(record.into())),
        }
    }

    #[cfg(test)]
    pub fn record(&self) -> Option<String> {
        self.record.lock().ok().and_then(|r| r.clone())
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Option<Vec<Conversation>> {
        let record = self.record.lock().ok()?.clone()?;
        serde_json::from_str(&record).ok()
    }

    fn save(&self, sessions: &[Conversation]) -> Result<(), StorageError> {
        let content = serde_json::to_string(sessions)?;
        if let Ok(mut record) = self.record.lock() {
            *record = Some(content);
        }
        Ok(())
    }
}
