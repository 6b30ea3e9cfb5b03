mod client;
mod wait;

pub use client::TmuxClient;
pub use wait::{wait_for_text, WaitOptions, WaitOutcome};

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TmuxError;

/// What a session is for. Only used for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Task,
    Service,
    Agent,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Task => "task",
            Category::Service => "service",
            Category::Agent => "agent",
        })
    }
}

/// Best-effort liveness of a session. Live tmux state always wins over this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The window reported recent activity
    Running,
    /// The pane exists but is quiet
    Idle,
    /// tmux does not know the session any more
    Exited,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Running => "running",
            SessionStatus::Idle => "idle",
            SessionStatus::Exited => "exited",
        })
    }
}

/// A session the keeper believes exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// `{category}-{name}-{millis}`, also the tmux session name
    pub id: String,
    pub name: String,
    pub category: Category,
    /// Control socket of the tmux server that owns the session
    pub socket: PathBuf,
    /// Pane address, always `target_for(id)`
    pub target: String,
    /// Command started at creation, kept for display only
    pub command: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        id: String,
        name: String,
        category: Category,
        socket: PathBuf,
        command: String,
        now: DateTime<Utc>,
    ) -> Self {
        let target = target_for(&id);
        Self {
            id,
            name,
            category,
            socket,
            target,
            command,
            status: SessionStatus::Running,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Refresh `last_activity_at`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

/// Address of the single pane of session `id`.
///
/// Exact session match, then the current window and its active pane, so
/// `base-index` and `pane-base-index` settings do not matter.
pub fn target_for(id: &str) -> String {
    format!("={}:", id)
}

/// The subset of the tmux command surface the keeper relies on.
///
/// Every call is addressed by control socket; there is no implicit default
/// server.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// `new -d -s <name>`
    async fn new_session(&self, socket: &Path, name: &str) -> Result<(), TmuxError>;

    /// `send-keys -t <target> [-l] <keys...>`
    async fn send_keys(
        &self,
        socket: &Path,
        target: &str,
        keys: &[String],
        literal: bool,
    ) -> Result<(), TmuxError>;

    /// `capture-pane -p -J -t <target> -S -<lines>`, trimmed
    async fn capture_pane(&self, socket: &Path, target: &str, lines: usize)
        -> Result<String, TmuxError>;

    /// `kill-session -t <name>`
    async fn kill_session(&self, socket: &Path, name: &str) -> Result<(), TmuxError>;

    /// Names of every live session on `socket`; empty when no server is up.
    async fn list_sessions(&self, socket: &Path) -> Result<Vec<String>, TmuxError>;

    /// `display-message -p '#{window_activity_flag}' -t <target>`
    async fn window_activity(&self, socket: &Path, target: &str) -> Result<bool, TmuxError>;
}

/// Classify a pane as running, idle or exited.
///
/// An address tmux cannot resolve means the session is gone. A tmux binary
/// that cannot be started at all is still an error.
pub async fn session_status<M: Multiplexer + ?Sized>(
    mux: &M,
    socket: &Path,
    target: &str,
) -> Result<SessionStatus, TmuxError> {
    match mux.window_activity(socket, target).await {
        Ok(true) => Ok(SessionStatus::Running),
        Ok(false) => Ok(SessionStatus::Idle),
        Err(TmuxError::Failed { stderr, .. }) => {
            tracing::debug!(target, %stderr, "pane did not resolve");
            Ok(SessionStatus::Exited)
        }
        Err(e) => Err(e),
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeTmux;
    use super::*;

    #[test]
    fn test_target_is_derived_from_id() {
        assert_eq!(target_for("task-build-1700000000000"), "=task-build-1700000000000:");
        assert_eq!(target_for("task-a-1"), "=task-a-1:");

        let record = SessionRecord::new(
            "agent-x-1".into(),
            "x".into(),
            Category::Agent,
            PathBuf::from("/tmp/s.sock"),
            "true".into(),
            Utc::now(),
        );
        assert_eq!(record.target, target_for(&record.id));
        assert_eq!(record.status, SessionStatus::Running);
        assert_eq!(record.created_at, record.last_activity_at);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let now = Utc::now();
        let mut record = SessionRecord::new(
            "task-a-1".into(),
            "a".into(),
            Category::Task,
            PathBuf::from("/tmp/s.sock"),
            "true".into(),
            now,
        );
        record.touch(now - chrono::Duration::hours(1));
        assert_eq!(record.last_activity_at, now);

        let later = now + chrono::Duration::seconds(5);
        record.touch(later);
        assert_eq!(record.last_activity_at, later);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = SessionRecord::new(
            "service-web-1".into(),
            "web".into(),
            Category::Service,
            PathBuf::from("/tmp/s.sock"),
            "npm start".into(),
            Utc::now(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["category"], "service");
        assert_eq!(json["status"], "running");
        assert!(json.get("lastActivityAt").is_some());
        assert!(json.get("createdAt").is_some());
    }

    #[tokio::test]
    async fn test_session_status_classification() {
        let tmux = FakeTmux::new();
        let socket = PathBuf::from("/tmp/s.sock");
        tmux.new_session(&socket, "task-a-1").await.unwrap();
        tmux.new_session(&socket, "task-b-1").await.unwrap();
        tmux.set_active("task-a-1");

        let running = session_status(&tmux, &socket, &target_for("task-a-1")).await.unwrap();
        let idle = session_status(&tmux, &socket, &target_for("task-b-1")).await.unwrap();
        let gone = session_status(&tmux, &socket, &target_for("task-c-1")).await.unwrap();

        assert_eq!(running, SessionStatus::Running);
        assert_eq!(idle, SessionStatus::Idle);
        assert_eq!(gone, SessionStatus::Exited);
    }
}
