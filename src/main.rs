use clap::Parser;
use settings_guard::cli::{self, Cli};
use settings_guard::{GuardConfig, GuardError, SettingsApi};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), GuardError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let mut config = GuardConfig::from_env()?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    tracing::debug!(base_url = %config.base_url, policy = ?config.timeout_policy, "settings guard configured");

    let api = SettingsApi::from_config(&config)?;
    cli::run(&api, args.command, &mut std::io::stdout()).await
}
