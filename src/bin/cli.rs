//! CLI binary for zkfleet.

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use zkfleet::{Endpoint, FleetConfig, SyncCursorStore};

/// zkfleet: attendance terminal download scheduling and sync state.
#[derive(Parser)]
#[command(name = "zkfleet", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Show when the next automatic download will run.
    NextRun {
        /// Compute from this local time instead of now ("YYYY-MM-DD HH:MM").
        #[arg(long, value_parser = parse_local_time)]
        from: Option<NaiveDateTime>,
    },

    /// Inspect or clear persisted sync cursors.
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CursorAction {
    /// Print the cursor for a terminal, or every stored key.
    Show {
        /// Terminal address, `host[:port]`.
        endpoint: Option<String>,
    },
    /// Forget the cursor so the next download takes everything.
    Reset {
        /// Terminal address, `host[:port]`.
        endpoint: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(FleetConfig::default_config_path);
    let config = FleetConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let _log_guard = zkfleet::logging::init(&config.logging)?;
    debug!("using config {}", config_path.display());

    match cli.command {
        Command::NextRun { from } => next_run(&config, from),
        Command::Cursor { action } => cursor(&config, action),
        Command::Config { action } => match action {
            ConfigAction::Init { force } => config_init(&config_path, force),
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}

fn next_run(config: &FleetConfig, from: Option<NaiveDateTime>) -> anyhow::Result<()> {
    let schedule = &config.schedule;
    let now = from.unwrap_or_else(|| chrono::Local::now().naive_local());
    let fire_at = schedule.next_fire_at(now);
    let display = schedule.clock_display;

    if !schedule.enabled {
        println!("Automatic download is disabled.");
    }
    println!("Schedule: {}", schedule.describe());
    println!("Next run: {}", display.format_datetime(fire_at));
    let wait = schedule.next_fire_delay(now);
    println!(
        "Starts in: {}h {:02}m",
        wait.as_secs() / 3600,
        (wait.as_secs() % 3600) / 60
    );
    Ok(())
}

fn cursor(config: &FleetConfig, action: CursorAction) -> anyhow::Result<()> {
    let store = SyncCursorStore::new(config.sync.cursor_path());
    match action {
        CursorAction::Show { endpoint: None } => {
            let keys = store.endpoints()?;
            if keys.is_empty() {
                println!("No sync state in {}", store.path().display());
            }
            for key in keys {
                println!("{key}");
            }
        }
        CursorAction::Show {
            endpoint: Some(address),
        } => {
            let endpoint = parse_endpoint(&address, config)?;
            let cursor = store.load(&endpoint)?;
            let last = cursor.last_attendance_ts.map_or_else(
                || "never".to_owned(),
                |ts| config.schedule.clock_display.format_datetime(ts),
            );
            println!("{endpoint}");
            println!("  last attendance: {last}");
            println!("  known users:     {}", cursor.known_user_ids.len());
        }
        CursorAction::Reset { endpoint } => {
            let endpoint = parse_endpoint(&endpoint, config)?;
            if store.reset(&endpoint)? {
                println!("Cursor for {endpoint} cleared.");
            } else {
                println!("No cursor stored for {endpoint}.");
            }
        }
    }
    Ok(())
}

fn config_init(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    FleetConfig::default().save_to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// `host` alone takes the configured default port.
fn parse_endpoint(address: &str, config: &FleetConfig) -> anyhow::Result<Endpoint> {
    if address.contains(':') {
        return Ok(address.parse::<Endpoint>()?);
    }
    anyhow::ensure!(!address.trim().is_empty(), "empty terminal address");
    Ok(Endpoint::new(address.trim(), config.session.default_port))
}

fn parse_local_time(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .map_err(|e| format!("expected \"YYYY-MM-DD HH:MM\": {e}"))
}
