//! Bidwatch CLI - live auction notifications from the terminal.
//!
//! This is the main binary entry point. See the `bidwatch` library for the
//! core functionality.

use anyhow::{Context, Result};
use bidwatch::env::Environment;
use bidwatch::{commands, Config};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
use clap::{Parser, Subcommand};

// CLI
#[derive(Parser)]
#[command(name = "bidwatch")]
#[command(version)]
#[command(about = "Live auction notifications: push channel, history and session guard")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print alerts and live updates until Ctrl-C
    Listen,
    /// Inspect or maintain a user's persisted notifications
    Notifications {
        /// User whose namespace to open
        #[arg(long)]
        user: String,
        #[command(subcommand)]
        action: NotificationsAction,
    },
    /// Show identity and configuration summary
    Status,
    /// Show or set configuration values
    Config {
        key: Option<String>,
        value: Option<String>,
    },
    /// Store the session cookie used for the push channel and REST calls
    SaveSession {
        /// Cookie value
        cookie: String,
    },
    /// Log out server-side and forget the stored session
    Logout,
}

#[derive(Subcommand)]
enum NotificationsAction {
    /// List notifications, newest first
    List,
    /// Mark one notification read
    Read {
        /// Notification id
        id: String,
    },
    /// Mark every notification read
    ReadAll,
    /// Remove read notifications past the retention window
    Prune,
    /// Delete the user's notifications
    Clear,
}

/// Log to `BIDWATCH_LOG_FILE`, else `<config_dir>/bidwatch.log` for the
/// long-running listener, else stderr. Development defaults to `debug`.
fn init_logging(long_running: bool) -> Result<()> {
    let log_path = if let Ok(path) = std::env::var("BIDWATCH_LOG_FILE") {
        Some(std::path::PathBuf::from(path))
    } else if long_running {
        Some(Config::config_dir()?.join("bidwatch.log"))
    } else {
        None
    };

    let default_filter = if Environment::current().is_development() {
        "debug"
    } else {
        "info"
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format_timestamp_secs();
    if let Some(log_path) = log_path {
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file at {}", log_path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Commands::Listen))?;

    match cli.command {
        Commands::Listen => {
            let config = Config::load()?;
            runtime()?.block_on(commands::listen::run(config))?;
        }
        Commands::Notifications { user, action } => {
            let config = Config::load()?;
            match action {
                NotificationsAction::List => commands::notifications::list(&config, &user)?,
                NotificationsAction::Read { id } => {
                    commands::notifications::read(&config, &user, &id)?;
                }
                NotificationsAction::ReadAll => commands::notifications::read_all(&config, &user)?,
                NotificationsAction::Prune => commands::notifications::prune(&config, &user)?,
                NotificationsAction::Clear => commands::notifications::clear(&config, &user)?,
            }
        }
        Commands::Status => {
            let config = Config::load()?;
            runtime()?.block_on(commands::session::status(&config))?;
        }
        Commands::Config { key, value } => {
            commands::config::run(key.as_deref(), value.as_deref())?;
        }
        Commands::SaveSession { cookie } => {
            let mut config = Config::load()?;
            commands::session::save(&mut config, &cookie)?;
        }
        Commands::Logout => {
            let mut config = Config::load()?;
            runtime()?.block_on(commands::session::logout(&mut config))?;
        }
    }

    Ok(())
}
