use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

mod config;
mod error;
mod manager;
mod store;
mod tmux;

use config::Config;
use manager::{ListFilter, SessionManager, Teardown};
use tmux::{Category, SessionRecord, SessionStatus, TmuxClient, WaitOptions, WaitOutcome};

/// Keep long-running commands alive in detached tmux sessions
#[derive(Parser, Debug)]
#[command(name = "tmux-keeper", version, about)]
struct Cli {
    /// tmux control socket for new sessions (overrides TMUX_KEEPER_SOCKET)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Session store file (overrides TMUX_KEEPER_STORE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CategoryArg {
    Task,
    Service,
    Agent,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Task => Category::Task,
            CategoryArg::Service => Category::Service,
            CategoryArg::Agent => Category::Agent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusArg {
    Running,
    Idle,
    Exited,
}

impl From<StatusArg> for SessionStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Running => SessionStatus::Running,
            StatusArg::Idle => SessionStatus::Idle,
            StatusArg::Exited => SessionStatus::Exited,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a command in a new detached session
    Create {
        name: String,
        command: String,
        #[arg(value_enum, default_value = "task")]
        category: CategoryArg,
    },
    /// List known sessions, newest first
    List {
        #[arg(value_enum)]
        category: Option<CategoryArg>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a session with its live status
    Status { id: String },
    /// Type into a session
    Send {
        id: String,
        #[arg(required = true, num_args = 1..)]
        keys: Vec<String>,
        /// Treat arguments as tmux key names (C-c, Enter) instead of text
        #[arg(long)]
        key_names: bool,
        /// Press Enter after the text
        #[arg(long)]
        enter: bool,
    },
    /// Print the last lines of a session's pane
    Capture {
        id: String,
        #[arg(default_value_t = 200)]
        lines: usize,
    },
    /// Wait until a regex appears in a session's pane
    Wait {
        id: String,
        pattern: String,
        /// Seconds before giving up
        #[arg(long, default_value_t = 15.0)]
        timeout: f64,
        /// Seconds between polls
        #[arg(long, default_value_t = 0.5)]
        interval: f64,
        /// Scroll-back lines to search
        #[arg(long, default_value_t = 1000)]
        lines: usize,
    },
    /// Kill a session and forget it
    Kill { id: String },
    /// Kill and forget sessions idle for more than the given hours
    Cleanup {
        #[arg(default_value_t = 24)]
        hours: u32,
    },
    /// Print how to attach to a session
    Attach { id: String },
    /// Reconcile stored statuses with live tmux sessions
    Sync,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::from_env();
    if let Some(socket) = cli.socket {
        config.socket = socket;
    }
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    let client = TmuxClient::new(config.tmux_bin.clone());
    let manager = SessionManager::new(config, client);

    match cli.command {
        Command::Create {
            name,
            command,
            category,
        } => {
            manager
                .config()
                .ensure_socket_dir()
                .context("Failed to create socket directory")?;
            let record = manager.create(&name, &command, category.into()).await?;
            println!("{}", record.id);
            println!("attach: {}", manager.attach_instruction(&record.id)?);
        }
        Command::List {
            category,
            status,
            json,
        } => {
            let records = manager.list(ListFilter {
                category: category.map(Into::into),
                status: status.map(Into::into),
            });
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_table(&records);
            }
        }
        Command::Status { id } => {
            let record = manager.status(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Send {
            id,
            keys,
            key_names,
            enter,
        } => {
            if key_names {
                manager.send(&id, &keys, false).await?;
            } else {
                manager.send(&id, &[keys.join(" ")], true).await?;
            }
            if enter {
                manager.send(&id, &["Enter".to_string()], false).await?;
            }
        }
        Command::Capture { id, lines } => {
            println!("{}", manager.capture(&id, lines).await?);
        }
        Command::Wait {
            id,
            pattern,
            timeout,
            interval,
            lines,
        } => {
            let opts = WaitOptions {
                timeout: seconds(timeout, "--timeout")?,
                interval: seconds(interval, "--interval")?,
                lines,
            };
            match manager.wait_for_text(&id, &pattern, opts).await? {
                WaitOutcome::Matched => println!("found"),
                WaitOutcome::TimedOut { last_capture } => {
                    eprintln!(
                        "Timed out after {:.1}s waiting for /{}/ in {}. Last output:",
                        timeout, pattern, id
                    );
                    eprintln!("{}", last_capture);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Kill { id } => {
            if let Teardown::AlreadyGone(e) = manager.kill(&id).await? {
                eprintln!("tmux session was already gone ({})", e);
            }
            println!("killed {}", id);
        }
        Command::Cleanup { hours } => {
            let report = manager
                .cleanup_old_sessions(chrono::Duration::hours(i64::from(hours)))
                .await?;
            for (id, e) in &report.soft_failures {
                eprintln!("{}: {}", id, e);
            }
            println!("removed {} session(s)", report.count());
        }
        Command::Attach { id } => {
            println!("{}", manager.attach_instruction(&id)?);
        }
        Command::Sync => {
            let changed = manager.sync().await?;
            for record in &changed {
                println!("{} -> {}", record.id, record.status);
            }
            println!("{} session(s) updated", changed.len());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("{} must be a non-negative number of seconds", flag))
}

fn print_table(records: &[SessionRecord]) {
    if records.is_empty() {
        println!("no sessions");
        return;
    }
    println!("{:<40} {:<8} {:<8} {:<20} COMMAND", "ID", "CATEGORY", "STATUS", "LAST ACTIVITY");
    for r in records {
        println!(
            "{:<40} {:<8} {:<8} {:<20} {}",
            r.id,
            r.category,
            r.status,
            r.last_activity_at.format("%Y-%m-%d %H:%M:%S"),
            r.command
        );
    }
}
