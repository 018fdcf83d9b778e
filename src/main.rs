//! Call Trigger Daemon
//!
//! CLI and daemon for the WebSocket call trigger.

use call_trigger::call::{CallAction, DialerCommand};
use call_trigger::client::parse_endpoint;
use call_trigger::config::Config;
use call_trigger::notifier::{read_status, spawn_status_file, write_status};
use call_trigger::reachability::{InterfaceProbe, Reachability, StaticReachability};
use call_trigger::store::{JsonFileStore, SettingsStore};
use call_trigger::supervisor::Supervisor;
use call_trigger::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Call Trigger - place a phone call when the server says so
#[derive(Parser)]
#[command(name = "call-trigger")]
#[command(about = "Keep a WebSocket open to a command server and dial on CALL")]
struct Cli {
    /// Base directory for settings, state and logs
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start,

    /// Stop the daemon
    Stop,

    /// Restart the daemon
    Restart,

    /// Show daemon status
    Status,

    /// Tail the log file
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: u32,

        /// Don't follow the log
        #[arg(long = "no-follow")]
        no_follow: bool,
    },

    /// Save the server endpoint (empty string clears it)
    SetEndpoint {
        /// e.g. ws://10.0.0.5:8080
        url: String,
    },

    /// Save the phone number to dial
    SetNumber {
        /// Separators such as '-' are allowed
        number: String,
    },

    /// Show saved settings
    Show,

    /// Run the daemon in the foreground
    Run {
        /// Skip the network interface check
        #[arg(long)]
        assume_online: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match &cli.dir {
        Some(dir) => Config::with_base_dir(dir),
        None => Config::default(),
    };

    match cli.command {
        Commands::Start => cmd_start(&config),
        Commands::Stop => cmd_stop(&config),
        Commands::Restart => cmd_restart(&config),
        Commands::Status => cmd_status(&config),
        Commands::Logs { lines, no_follow } => cmd_logs(&config, lines, !no_follow),
        Commands::SetEndpoint { url } => cmd_set_endpoint(&config, &url),
        Commands::SetNumber { number } => cmd_set_number(&config, &number),
        Commands::Show => cmd_show(&config),
        Commands::Run { assume_online } => cmd_run(&config, assume_online),
    }
}

// ============================================================================
// CLI Commands
// ============================================================================

fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn get_pid(config: &Config) -> Option<u32> {
    let content = fs::read_to_string(&config.pid_file).ok()?;
    let pid: u32 = content.trim().parse().ok()?;

    if process_alive(pid) {
        Some(pid)
    } else {
        // PID file exists but process is dead
        let _ = fs::remove_file(&config.pid_file);
        None
    }
}

fn send_signal(pid: u32, signal: &str) -> bool {
    Command::new("kill")
        .args([signal, &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn cmd_start(config: &Config) -> Result<()> {
    if let Some(pid) = get_pid(config) {
        println!("Daemon already running (PID {})", pid);
        return Ok(());
    }

    // Ensure directories exist
    fs::create_dir_all(&config.state_dir)?;
    fs::create_dir_all(&config.logs_dir)?;

    let log_file = config.log_file();
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;

    let exe = std::env::current_exe()?;

    let child = Command::new(&exe)
        .arg("--dir")
        .arg(&config.base_dir)
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .spawn()?;

    fs::write(&config.pid_file, child.id().to_string())?;

    println!("Daemon started (PID {})", child.id());
    println!("Logs: {}", log_file.display());

    Ok(())
}

fn cmd_stop(config: &Config) -> Result<()> {
    let pid = match get_pid(config) {
        Some(p) => p,
        None => {
            println!("Daemon not running");
            return Ok(());
        }
    };

    println!("Stopping daemon (PID {})...", pid);
    send_signal(pid, "-TERM");

    // Wait for it to die
    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(500));
        if !process_alive(pid) {
            break;
        }
    }

    if process_alive(pid) {
        println!("Force killing...");
        send_signal(pid, "-KILL");
    }

    let _ = fs::remove_file(&config.pid_file);

    println!("Daemon stopped");
    Ok(())
}

fn cmd_restart(config: &Config) -> Result<()> {
    if get_pid(config).is_some() {
        cmd_stop(config)?;
        std::thread::sleep(Duration::from_secs(1));
    }
    cmd_start(config)
}

fn cmd_status(config: &Config) -> Result<()> {
    match get_pid(config) {
        Some(pid) => println!("Daemon running (PID {})", pid),
        None => println!("Daemon not running"),
    }

    match read_status(&config.status_file)? {
        Some(record) => println!(
            "Connection: {} (as of {})",
            record.summary,
            record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("Connection: unknown"),
    }

    Ok(())
}

fn cmd_logs(config: &Config, lines: u32, follow: bool) -> Result<()> {
    let log_file = config.log_file();
    if !log_file.exists() {
        println!("Log file not found: {}", log_file.display());
        return Ok(());
    }

    let mut cmd = Command::new("tail");
    if follow {
        cmd.arg("-f");
    }
    cmd.arg("-n").arg(lines.to_string()).arg(&log_file);

    match cmd.status() {
        Ok(status) if !status.success() => warn!("tail exited with {}", status),
        Ok(_) => {}
        Err(e) => warn!("Failed to run tail: {}", e),
    }
    Ok(())
}

fn cmd_set_endpoint(config: &Config, url: &str) -> Result<()> {
    let store = JsonFileStore::new(config);
    store.set_endpoint(url)?;

    let saved = store.endpoint()?;
    if saved.is_empty() {
        println!("Endpoint cleared");
    } else {
        if let Err(e) = parse_endpoint(&saved) {
            println!("Warning: {}", e);
        }
        println!("Endpoint: {}", saved);
    }

    // Reconnect right away instead of waiting for the old socket to drop
    if let Some(pid) = get_pid(config) {
        if send_signal(pid, "-HUP") {
            println!("Daemon (PID {}) reloading", pid);
        }
    }

    Ok(())
}

fn cmd_set_number(config: &Config, number: &str) -> Result<()> {
    let store = JsonFileStore::new(config);
    let dest = store.set_destination(number)?;
    println!("Phone number: {} (dials {})", dest.raw, dest.normalized);
    Ok(())
}

fn cmd_show(config: &Config) -> Result<()> {
    let store = JsonFileStore::new(config);
    let endpoint = store.endpoint()?;
    let dest = store.destination()?;

    println!(
        "Endpoint: {}",
        if endpoint.is_empty() { "(not set)" } else { endpoint.as_str() }
    );
    if dest.is_empty() {
        println!("Phone number: (not set)");
    } else {
        println!("Phone number: {} (dials {})", dest.raw, dest.normalized);
    }
    println!("Settings: {}", store.path().display());

    Ok(())
}

// ============================================================================
// Daemon
// ============================================================================

fn cmd_run(config: &Config, assume_online: bool) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_daemon(config, assume_online))
}

async fn run_daemon(config: &Config, assume_online: bool) -> Result<()> {
    info!("Call Trigger daemon starting (PID {})", std::process::id());
    fs::create_dir_all(&config.state_dir)?;

    let store: Arc<dyn SettingsStore> = Arc::new(JsonFileStore::new(config));
    let reachability: Arc<dyn Reachability> = if assume_online {
        Arc::new(StaticReachability::new(true))
    } else {
        Arc::new(InterfaceProbe::new(config))
    };
    let action: Arc<dyn CallAction> = Arc::new(DialerCommand::new(config));

    let mut supervisor = Supervisor::new(config, store, reachability, action);
    let status_file = spawn_status_file(supervisor.status(), config.status_file.clone());

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    supervisor.start().await;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("Settings changed, reconnecting");
                supervisor.restart().await;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt");
                break;
            }
        }
    }

    supervisor.stop().await;
    drop(status_file);

    // Final state, written directly so it is not lost with the writer task
    if let Err(e) = write_status(&config.status_file, &supervisor.current_state()) {
        warn!("Failed to write final status: {}", e);
    }

    info!("Call Trigger daemon stopped");
    Ok(())
}
