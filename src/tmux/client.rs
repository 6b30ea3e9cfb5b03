use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use super::Multiplexer;
use crate::error::TmuxError;

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: PathBuf,
}

impl TmuxClient {
    pub fn new(tmux_path: impl Into<PathBuf>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
        }
    }

    /// Run `tmux -S <socket> <args>` and hand back its output only if it succeeded.
    async fn run(&self, socket: &Path, target: &str, args: &[&str]) -> Result<Output, TmuxError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        debug!(socket = %socket.display(), ?args, "tmux");

        let output = Command::new(&self.tmux_path)
            .arg("-S")
            .arg(socket)
            .args(args)
            .output()
            .await
            .map_err(|source| TmuxError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TmuxError::Failed {
                command,
                target: target.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn new_session(&self, socket: &Path, name: &str) -> Result<(), TmuxError> {
        self.run(socket, name, &["new", "-d", "-s", name]).await?;
        Ok(())
    }

    async fn send_keys(
        &self,
        socket: &Path,
        target: &str,
        keys: &[String],
        literal: bool,
    ) -> Result<(), TmuxError> {
        let args = send_keys_args(target, keys, literal);
        self.run(socket, target, &args).await?;
        Ok(())
    }

    async fn capture_pane(
        &self,
        socket: &Path,
        target: &str,
        lines: usize,
    ) -> Result<String, TmuxError> {
        let start = format!("-{}", lines);
        let output = self
            .run(socket, target, &["capture-pane", "-p", "-J", "-t", target, "-S", &start])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn kill_session(&self, socket: &Path, name: &str) -> Result<(), TmuxError> {
        let exact = format!("={}", name);
        self.run(socket, name, &["kill-session", "-t", &exact]).await?;
        Ok(())
    }

    async fn list_sessions(&self, socket: &Path) -> Result<Vec<String>, TmuxError> {
        let target = socket.display().to_string();
        match self
            .run(socket, &target, &["list-sessions", "-F", "#{session_name}"])
            .await
        {
            Ok(output) => Ok(parse_session_names(&String::from_utf8_lossy(&output.stdout))),
            Err(TmuxError::Failed { stderr, .. }) if is_no_server(&stderr) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn window_activity(&self, socket: &Path, target: &str) -> Result<bool, TmuxError> {
        let output = self
            .run(
                socket,
                target,
                &["display-message", "-p", "-t", target, "#{window_activity_flag}"],
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "1")
    }
}

/// `--` ends option parsing so text starting with `-` is sent, not parsed.
fn send_keys_args<'a>(target: &'a str, keys: &'a [String], literal: bool) -> Vec<&'a str> {
    let mut args = vec!["send-keys", "-t", target];
    if literal {
        args.push("-l");
    }
    args.push("--");
    args.extend(keys.iter().map(String::as_str));
    args
}

fn parse_session_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// tmux's ways of saying there is nothing on this socket.
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("no sessions")
        || stderr.contains("error connecting to")
        || stderr.contains("No such file or directory")
}
