//! Command-line surface: argument parsing and the `get` / `set` / `watch`
//! flows, writing pretty JSON to any `io::Write`.

use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::warn;

use crate::error::GuardError;
use crate::settings::SettingsApi;

#[derive(Parser, Debug)]
#[command(name = "settings-guard", about = "Load and save dashboard settings through the settings guard")]
pub struct Cli {
    /// Dashboard origin; overrides the rest of the environment config.
    #[arg(long, env = "SETTINGS_GUARD_BASE_URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print an application's settings.
    Get { app: String },
    /// Replace an application's settings with a JSON document.
    Set {
        app: String,
        #[arg(long)]
        data: String,
    },
    /// Schedule reloads and print each value the watcher receives.
    Watch {
        app: String,
        #[arg(long, default_value_t = 1)]
        reloads: u32,
        #[arg(long, default_value_t = 2_000)]
        wait_ms: u64,
    },
}

/// Run one command against `api`, printing results to `out`.
///
/// # Errors
///
/// Any error from the settings API, `GuardError::Json` for a `set` payload
/// that is not JSON, and `GuardError::Io` when `out` cannot be written.
pub async fn run<W: Write>(api: &SettingsApi, command: Command, out: &mut W) -> Result<(), GuardError> {
    match command {
        Command::Get { app } => {
            let value = api.load(&app).await?;
            print_json(out, &value)?;
        }
        Command::Set { app, data } => {
            let value: Value = serde_json::from_str(&data)?;
            let reply = api.save(&app, &value).await?;
            print_json(out, &reply)?;
        }
        Command::Watch { app, reloads, wait_ms } => {
            let mut watch = api.watch(&app)?;
            let wait = Duration::from_millis(wait_ms);
            for round in 1..=reloads {
                api.guard().schedule_reload(&app)?;
                match tokio::time::timeout(wait, watch.changed()).await {
                    Ok(Some(value)) => print_json(out, &value)?,
                    Ok(None) => break,
                    Err(_) => warn!(%app, round, "no reload delivered in time"),
                }
            }
        }
    }
    Ok(())
}

fn print_json<W: Write>(out: &mut W, value: &Value) -> Result<(), GuardError> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
