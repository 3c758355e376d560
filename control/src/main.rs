use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use nginx_fleet_control::api::{self, auth, AppState};
use nginx_fleet_control::config::{self, FleetConfig, HostKeyPolicy, RemoteLayout, Timeouts};
use nginx_fleet_control::remote::ssh::SshConnector;
use nginx_fleet_control::services::ManagementKeyManager;
use nginx_fleet_control::tls::TlsFiles;

#[derive(Parser, Debug)]
#[command(name = "nginx-fleet-control")]
#[command(about = "nginx fleet control plane", long_about = None)]
struct Args {
    /// Bind address for HTTP server
    #[arg(long, env = "FLEET_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Directory for nodes.json, cluster.log and the management key
    #[arg(long, env = "FLEET_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory of local nginx configs (default: <data-dir>/configs)
    #[arg(long, env = "CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Require `Authorization: Bearer <token>` on management routes
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// TLS certificate (PEM)
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// CA bundle for verifying client certificates (enables mTLS)
    #[arg(long)]
    tls_client_ca: Option<PathBuf>,

    /// How node host keys are verified
    #[arg(long, value_enum, default_value_t = HostKeyPolicy::None)]
    host_key_check: HostKeyPolicy,

    /// Timeout for a single remote command
    #[arg(long, default_value_t = 10)]
    command_timeout_secs: u64,

    /// Timeout for establishing an SSH session
    #[arg(long, default_value_t = 15)]
    connect_timeout_secs: u64,

    /// Timeout for a single file transfer
    #[arg(long, default_value_t = 60)]
    transfer_timeout_secs: u64,

    #[arg(long, default_value = "/etc/nginx/sites-available")]
    sites_available: String,

    #[arg(long, default_value = "/etc/nginx/sites-enabled")]
    sites_enabled: String,

    /// Staging directory for uploads on the nodes
    #[arg(long, default_value = "/tmp")]
    remote_tmp_dir: String,

    /// Default certificate directory on the nodes
    #[arg(long, default_value = "/etc/ssl/nginx")]
    cert_dir: String,
}

impl Args {
    fn fleet_config(&self) -> FleetConfig {
        let data_dir = self.data_dir.clone().unwrap_or_else(config::default_data_dir);
        let mut cfg = FleetConfig::new(data_dir);
        if let Some(dir) = &self.config_dir {
            cfg.config_dir = dir.clone();
        }
        cfg.admin_token = self.admin_token.clone().filter(|t| !t.is_empty());
        cfg.host_key_policy = self.host_key_check;
        cfg.remote = RemoteLayout {
            sites_available: self.sites_available.clone(),
            sites_enabled: self.sites_enabled.clone(),
            tmp_dir: self.remote_tmp_dir.clone(),
            cert_dir: self.cert_dir.clone(),
        };
        cfg.timeouts = Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            command: Duration::from_secs(self.command_timeout_secs),
            transfer: Duration::from_secs(self.transfer_timeout_secs),
            ..Timeouts::default()
        };
        cfg
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting nginx fleet control plane");

    let cfg = args.fleet_config();
    for dir in [&cfg.data_dir, &cfg.config_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    info!("Data dir: {:?}, config dir: {:?}", cfg.data_dir, cfg.config_dir);

    match &cfg.admin_token {
        Some(token) => info!("Admin token required (sha256 {}...)", auth::fingerprint(token)),
        None => warn!("No admin token configured; management API is open"),
    }

    let keys = Arc::new(ManagementKeyManager::new(
        cfg.key_dir(),
        cfg.timeouts.key_generation,
    ));
    if !keys.has_key() {
        info!("No management key yet; it is generated on first GET /api/cluster/key");
    }

    let connector = Arc::new(SshConnector::new(
        keys.clone(),
        cfg.host_key_policy,
        cfg.timeouts,
    ));

    let state = AppState::new(&cfg, keys, connector)
        .with_context(|| format!("Failed to load node registry {:?}", cfg.nodes_file()))?;
    info!("Loaded {} node(s)", state.registry.list().len());

    let app = api::create_router(Arc::new(state));

    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", args.bind))?;

    let tls = TlsFiles::from_args(
        args.tls_cert.clone(),
        args.tls_key.clone(),
        args.tls_client_ca.clone(),
    )?;

    match tls {
        Some(files) => {
            let rustls = files.rustls_config()?;
            info!("Listening on https://{}", addr);
            axum_server::bind_rustls(addr, rustls)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
