mod commands;
mod config;
mod error;
mod http_client;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::Command;
use config::Config;
use http_client::Client;

#[derive(Parser, Debug)]
#[command(name = "nginx-fleet")]
#[command(about = "Manage nginx configuration across a fleet of nodes", long_about = None)]
struct Cli {
    /// Control plane URL
    #[arg(long, env = "NGINX_FLEET_URL", global = true)]
    base_url: Option<String>,

    /// Admin token sent as a bearer token
    #[arg(long, env = "NGINX_FLEET_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Settings file (default: <config dir>/nginx-fleet/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Request timeout
    #[arg(long, default_value_t = 120, global = true)]
    timeout_secs: u64,

    /// Retries for idempotent requests
    #[arg(long, default_value_t = 2, global = true)]
    retries: u32,

    /// Log level
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let cfg = Config::load(&config_path)?;

    if let Command::Config(cmd) = cli.command {
        return commands::config(cmd, cfg, &config_path);
    }

    let client = Client::new(
        &cfg.resolve_base_url(cli.base_url.as_deref()),
        cfg.resolve_token(cli.token.as_deref()),
        Duration::from_secs(cli.timeout_secs),
        cli.retries,
    )?;

    commands::run(cli.command, &client).await
}
