//! Session lifecycle: create, inspect, drive, reconcile and reap.
//!
//! Every mutating operation runs one load-mutate-save cycle while holding the
//! store lock, so concurrent keeper processes cannot overwrite each other.
//! Pane interactions (send, capture, wait) run outside the lock and only take
//! it to record activity afterwards.

use chrono::{DateTime, Duration as Age, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{SessionError, StoreError, TmuxError};
use crate::store::{SessionMap, SessionStore, StoreLock};
use crate::tmux::{
    self, target_for, Category, Multiplexer, SessionRecord, SessionStatus, WaitOptions,
    WaitOutcome,
};

/// Characters tmux mangles or rejects in session names
static RE_UNSAFE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    pub category: Option<Category>,
    pub status: Option<SessionStatus>,
}

impl ListFilter {
    fn accepts(&self, record: &SessionRecord) -> bool {
        self.category.map_or(true, |c| record.category == c)
            && self.status.map_or(true, |s| record.status == s)
    }
}

/// How tearing down a tmux session went when the caller does not care.
#[derive(Debug)]
pub enum Teardown {
    Killed,
    /// tmux refused; the session is most likely gone already
    AlreadyGone(TmuxError),
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// Sessions removed from the store whose tmux kill failed
    pub soft_failures: Vec<(String, TmuxError)>,
}

impl CleanupReport {
    pub fn count(&self) -> usize {
        self.removed.len()
    }
}

pub struct SessionManager<M> {
    config: Config,
    store: SessionStore,
    mux: M,
}

impl<M: Multiplexer> SessionManager<M> {
    pub fn new(config: Config, mux: M) -> Self {
        let store = SessionStore::new(config.store_path.clone());
        Self { config, store, mux }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start `command` in a fresh detached tmux session and record it.
    ///
    /// Nothing is persisted unless both the spawn and the keystrokes succeed.
    pub async fn create(
        &self,
        name: &str,
        command: &str,
        category: Category,
    ) -> Result<SessionRecord, SessionError> {
        let _lock = self.lock_store().await?;
        let mut sessions = self.store.load();

        let now = Utc::now();
        let id = allocate_id(&sessions, category, name, now);
        let socket = self.config.socket.clone();
        let target = target_for(&id);

        self.mux.new_session(&socket, &id).await?;
        let keystrokes = [command.to_string()];
        let enter = ["Enter".to_string()];
        let started = match self.mux.send_keys(&socket, &target, &keystrokes, true).await {
            Ok(()) => self.mux.send_keys(&socket, &target, &enter, false).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            if let Teardown::AlreadyGone(kill_err) = self.teardown(&socket, &id).await {
                warn!(id, error = %kill_err, "could not remove half-created session");
            }
            return Err(e.into());
        }

        let record = SessionRecord::new(
            id.clone(),
            name.to_string(),
            category,
            socket,
            command.to_string(),
            now,
        );
        sessions.insert(id.clone(), record.clone());
        self.store.save(&sessions)?;

        info!(id, command, "session created");
        Ok(record)
    }

    /// Stored sessions matching `filter`, newest first.
    pub fn list(&self, filter: ListFilter) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .store
            .load()
            .into_values()
            .filter(|r| filter.accepts(r))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        records
    }

    pub fn get(&self, id: &str) -> Option<SessionRecord> {
        self.store.load().remove(id)
    }

    /// Kill the tmux session and forget the record.
    ///
    /// A session tmux no longer knows about is not an error; the record is
    /// removed either way.
    pub async fn kill(&self, id: &str) -> Result<Teardown, SessionError> {
        let _lock = self.lock_store().await?;
        let mut sessions = self.store.load();
        let record = sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let outcome = self.teardown(&record.socket, id).await;
        if let Teardown::AlreadyGone(e) = &outcome {
            info!(id, error = %e, "tmux session was already gone");
        }

        self.store.save(&sessions)?;
        info!(id, "session killed");
        Ok(outcome)
    }

    /// Type into a session's pane.
    pub async fn send(&self, id: &str, keys: &[String], literal: bool) -> Result<(), SessionError> {
        self.with_record(id, |mux, record| async move {
            mux.send_keys(&record.socket, &record.target, keys, literal).await
        })
        .await
    }

    /// The last `lines` lines of a session's pane.
    pub async fn capture(&self, id: &str, lines: usize) -> Result<String, SessionError> {
        self.with_record(id, |mux, record| async move {
            mux.capture_pane(&record.socket, &record.target, lines).await
        })
        .await
    }

    /// Poll a session until `pattern` appears in its pane or `opts.timeout` runs out.
    pub async fn wait_for_text(
        &self,
        id: &str,
        pattern: &str,
        opts: WaitOptions,
    ) -> Result<WaitOutcome, SessionError> {
        let pattern = Regex::new(pattern)?;
        let outcome = self
            .with_record(id, |mux, record| async move {
                tmux::wait_for_text(mux, &record.socket, &record.target, &pattern, opts).await
            })
            .await?;
        info!(id, matched = outcome.is_match(), "wait finished");
        Ok(outcome)
    }

    /// Ask tmux how the session is doing and remember the answer.
    pub async fn status(&self, id: &str) -> Result<SessionRecord, SessionError> {
        let _lock = self.lock_store().await?;
        let mut sessions = self.store.load();
        let record = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        record.status = tmux::session_status(&self.mux, &record.socket, &record.target).await?;
        let record = record.clone();
        self.store.save(&sessions)?;
        Ok(record)
    }

    /// Correct stored statuses against the sessions tmux actually has.
    ///
    /// One `list-sessions` call per distinct socket.
    pub async fn sync(&self) -> Result<Vec<SessionRecord>, SessionError> {
        let _lock = self.lock_store().await?;
        let mut sessions = self.store.load();

        let sockets: HashSet<PathBuf> = sessions.values().map(|r| r.socket.clone()).collect();
        let mut live: BTreeMap<PathBuf, HashSet<String>> = BTreeMap::new();
        for socket in sockets {
            let names = self.mux.list_sessions(&socket).await?;
            live.insert(socket, names.into_iter().collect());
        }

        let mut changed = Vec::new();
        for record in sessions.values_mut() {
            let alive = live
                .get(&record.socket)
                .map_or(false, |names| names.contains(&record.id));
            let status = if alive {
                SessionStatus::Running
            } else {
                SessionStatus::Exited
            };
            if record.status != status {
                info!(id = %record.id, from = %record.status, to = %status, "status corrected");
                record.status = status;
                changed.push(record.clone());
            }
        }

        self.store.save(&sessions)?;
        Ok(changed)
    }

    /// Forget sessions idle for longer than `max_age`, killing them in tmux
    /// when they are still there.
    pub async fn cleanup_old_sessions(&self, max_age: Age) -> Result<CleanupReport, SessionError> {
        let _lock = self.lock_store().await?;
        let mut sessions = self.store.load();
        let now = Utc::now();

        let stale: Vec<String> = sessions
            .values()
            .filter(|r| is_stale(r, now, max_age))
            .map(|r| r.id.clone())
            .collect();

        let mut report = CleanupReport::default();
        for id in stale {
            let Some(record) = sessions.remove(&id) else {
                continue;
            };
            if let Teardown::AlreadyGone(e) = self.teardown(&record.socket, &id).await {
                report.soft_failures.push((id.clone(), e));
            }
            report.removed.push(id);
        }

        if report.count() > 0 {
            self.store.save(&sessions)?;
            info!(removed = report.count(), "stale sessions cleaned up");
        }
        Ok(report)
    }

    /// Shell command a user can run to attach to the session.
    pub fn attach_instruction(&self, id: &str) -> Result<String, SessionError> {
        let record = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(format!(
            "{} -S {} attach -t {}",
            self.config.tmux_bin.display(),
            record.socket.display(),
            record.id
        ))
    }

    /// Run one tmux interaction against a stored session, then refresh its
    /// `lastActivityAt`.
    ///
    /// The interaction itself runs unlocked; only the activity update takes
    /// the store lock.
    async fn with_record<'a, T, F, Fut>(&'a self, id: &str, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&'a M, SessionRecord) -> Fut,
        Fut: std::future::Future<Output = Result<T, TmuxError>>,
    {
        let record = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let value = op(&self.mux, record).await?;

        let _lock = self.lock_store().await?;
        let mut sessions = self.store.load();
        if let Some(record) = sessions.get_mut(id) {
            record.touch(Utc::now());
            self.store.save(&sessions)?;
        }
        Ok(value)
    }

    /// Wait for the store lock on the blocking pool.
    async fn lock_store(&self) -> Result<StoreLock, SessionError> {
        let store = self.store.clone();
        let lock = tokio::task::spawn_blocking(move || store.lock())
            .await
            .map_err(|e| StoreError::Lock {
                path: self.config.store_path.clone(),
                source: std::io::Error::other(e),
            })??;
        Ok(lock)
    }

    async fn teardown(&self, socket: &Path, id: &str) -> Teardown {
        match self.mux.kill_session(socket, id).await {
            Ok(()) => Teardown::Killed,
            Err(e) => Teardown::AlreadyGone(e),
        }
    }
}

fn is_stale(record: &SessionRecord, now: DateTime<Utc>, max_age: Age) -> bool {
    now.signed_duration_since(record.last_activity_at) > max_age
}

/// `{category}-{name}-{millis}`, suffixed when that is already taken.
fn allocate_id(sessions: &SessionMap, category: Category, name: &str, now: DateTime<Utc>) -> String {
    let name = RE_UNSAFE_NAME.replace_all(name.trim(), "_");
    let name = if name.is_empty() { "session".into() } else { name };
    let base = format!("{}-{}-{}", category, name, now.timestamp_millis());

    let mut id = base.clone();
    let mut n = 1;
    while sessions.contains_key(&id) {
        id = format!("{}-{}", base, n);
        n += 1;
    }
    id
}
