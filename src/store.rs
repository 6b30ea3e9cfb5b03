//! Durable session map.
//!
//! The whole map lives in one JSON file shaped
//! `{ "sessions": { "<id>": SessionRecord }, "lastSync": "<timestamp>" }`.
//! Writes go to a sibling temp file and are renamed into place, so readers
//! never see a half-written store. Writers serialize through an exclusive
//! lock on `<store>.lock`, see [`SessionStore::lock`].

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::tmux::SessionRecord;

pub type SessionMap = BTreeMap<String, SessionRecord>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    sessions: SessionMap,
    last_sync: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load every stored session.
    ///
    /// A missing, empty or unparsable file yields an empty map; the next
    /// save replaces it.
    pub fn load(&self) -> SessionMap {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SessionMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read session store, starting empty");
                return SessionMap::new();
            }
        };

        if content.trim().is_empty() {
            return SessionMap::new();
        }

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(file) => file.sessions,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "session store is corrupt, starting empty");
                SessionMap::new()
            }
        }
    }

    /// Replace the stored map with `sessions`, stamping `lastSync`.
    pub fn save(&self, sessions: &SessionMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let file = StoreFileRef {
            sessions,
            last_sync: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp_path = self.temp_path();
        let mut tmp = File::create(&tmp_path).map_err(|e| self.io_error(e))?;
        tmp.write_all(json.as_bytes()).map_err(|e| self.io_error(e))?;
        tmp.sync_all().map_err(|e| self.io_error(e))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;
        debug!(path = %self.path.display(), count = sessions.len(), "session store saved");
        Ok(())
    }

    /// Take the single-writer lock for one load-mutate-save cycle.
    ///
    /// Blocks until no other keeper process holds it. Released on drop.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Lock {
                    path: lock_path.clone(),
                    source,
                })?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| StoreError::Lock {
                path: lock_path.clone(),
                source,
            })?;

        FileExt::lock_exclusive(&file).map_err(|source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        })?;

        Ok(StoreLock { file })
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sessions.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreFileRef<'a> {
    sessions: &'a SessionMap,
    last_sync: DateTime<Utc>,
}

/// Exclusive hold on the store; the lock file stays behind for the next writer.
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::Category;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(
            id.to_string(),
            "build".to_string(),
            Category::Task,
            PathBuf::from("/tmp/k.sock"),
            "make".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().join("nope.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(SessionStore::new(&path).load().is_empty());

        fs::write(&path, "   \n").unwrap();
        assert!(SessionStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_save_then_load_keeps_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().join("nested").join("sessions.json"));

        let mut sessions = SessionMap::new();
        for id in ["task-a-1", "task-b-2"] {
            sessions.insert(id.to_string(), record(id));
        }
        store.save(&sessions).unwrap();

        assert_eq!(store.load(), sessions);
        assert!(!tmp.path().join("nested").join(".sessions.json.tmp").exists());
    }

    #[test]
    fn test_resave_only_changes_last_sync() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");
        let store = SessionStore::new(&path);
        let mut sessions = SessionMap::new();
        sessions.insert("task-a-1".to_string(), record("task-a-1"));
        store.save(&sessions).unwrap();

        let read = || -> serde_json::Value {
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap()
        };
        let before = read();
        store.save(&store.load()).unwrap();
        let after = read();

        assert_eq!(before["sessions"], after["sessions"]);
        assert!(after["lastSync"].is_string());
        let synced: DateTime<Utc> = serde_json::from_value(after["lastSync"].clone()).unwrap();
        let earlier: DateTime<Utc> = serde_json::from_value(before["lastSync"].clone()).unwrap();
        assert!(synced >= earlier);
    }

    #[test]
    fn test_lock_is_reacquirable_after_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().join("sessions.json"));

        let guard = store.lock().unwrap();
        assert!(tmp.path().join("sessions.lock").exists());
        drop(guard);

        let _again = store.lock().unwrap();
    }

    #[test]
    fn test_lock_excludes_second_holder_until_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");
        let guard = SessionStore::new(&path).lock().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let contender = {
            let path = path.clone();
            std::thread::spawn(move || {
                let _held = SessionStore::new(path).lock().unwrap();
                tx.send(()).unwrap();
            })
        };

        let blocked = rx.recv_timeout(std::time::Duration::from_millis(300));
        assert!(blocked.is_err(), "second lock acquired while the first was held");

        drop(guard);
        rx.recv_timeout(std::time::Duration::from_secs(5))
            .expect("second lock never acquired after release");
        contender.join().unwrap();
    }
}
