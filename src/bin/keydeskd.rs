//! keydesk daemon - chat bot that lends out office keys
//!
//! Watches one chat channel for borrow/return messages, answers status
//! queries, and posts a reminder for keys held too long.
//!
//! # Usage
//!
//! ```bash
//! # Start the bot (foreground)
//! keydeskd start
//!
//! # Start the bot (background/daemonized) with an explicit config
//! keydeskd start -d --config ~/.config/keydesk/config.toml
//!
//! # Stop the bot
//! keydeskd stop
//!
//! # Check bot status
//! keydeskd status
//!
//! # List channels the bot token can see
//! keydeskd channels
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keydesk_core::Ledger;
use keydesk_protocol::ChatBus;
use keydesk_slack::SlackBus;
use keydeskd::config::Config;
use keydeskd::session::{SessionController, SessionSettings};

/// keydesk daemon - chat-driven key lending
#[derive(Parser, Debug)]
#[command(name = "keydeskd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the bot
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Config file (default: $XDG_CONFIG_HOME/keydesk/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running bot
    Stop,
    /// Show bot status
    Status,
    /// List channels visible to the bot
    Channels {
        /// Config file (default: $XDG_CONFIG_HOME/keydesk/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("keydesk")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("keydeskd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("keydesk.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Returns the PID of a live daemon, cleaning up a stale PID file.
fn running_daemon() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = i32::try_from(pid).context("PID out of range")?;
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = running_daemon() {
                eprintln!("keydeskd is already running (PID {pid})");
                eprintln!("Use 'keydeskd stop' to stop it first.");
                process::exit(1);
            }

            // Load before forking so config errors reach the terminal.
            let config = load_config(config.as_deref())?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_bot(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = running_daemon() else {
                println!("keydeskd is not running.");
                return Ok(());
            };

            println!("Stopping keydeskd (PID {pid})...");
            stop_daemon(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("keydeskd stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("keydeskd did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            if let Some(pid) = running_daemon() {
                println!("keydeskd is running (PID {pid})");
                println!("Log: {}", log_file_path().display());
                Ok(())
            } else {
                println!("keydeskd is not running.");
                process::exit(1);
            }
        }
        Command::Channels { config } => {
            let config = load_config(config.as_deref())?;
            list_channels(config)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("keydeskd=info".parse()?)
                .add_directive("keydesk_core=info".parse()?)
                .add_directive("keydesk_slack=info".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn run_bot(config: Config) -> Result<()> {
    init_tracing()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        channel_name = %config.channel_name,
        "keydesk daemon starting"
    );

    let bus = SlackBus::new(config.slack_config()?).context("Failed to build Slack client")?;
    let bus: Arc<dyn ChatBus> = Arc::new(bus);
    let ledger = Arc::new(Ledger::with_defaults());
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let controller = SessionController::new(
        bus,
        ledger,
        SessionSettings::from_config(&config),
        cancel_token,
    );

    if let Err(e) = controller.run().await {
        error!(error = %e, "Session ended with fatal error");
        return Err(e.into());
    }

    info!("keydesk daemon stopped");
    Ok(())
}

#[tokio::main]
async fn list_channels(config: Config) -> Result<()> {
    let bus = SlackBus::new(config.slack_config()?).context("Failed to build Slack client")?;
    let channels = bus
        .list_channels()
        .await
        .context("Failed to list channels")?;

    for channel in channels {
        let visibility = if channel.is_private { "private" } else { "public" };
        let member = if channel.is_member { "member" } else { "-" };
        println!("{}\t#{}\t{visibility}\t{member}", channel.id, channel.name);
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
