use std::path::PathBuf;
use std::time::Duration;

/// How the SSH client verifies node host keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum HostKeyPolicy {
    /// Accept any host key.
    #[default]
    None,
    /// Verify against the user's `~/.ssh/known_hosts`.
    KnownHosts,
}

/// nginx and staging paths on the managed nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub sites_available: String,
    pub sites_enabled: String,
    pub tmp_dir: String,
    pub cert_dir: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            sites_available: "/etc/nginx/sites-available".to_string(),
            sites_enabled: "/etc/nginx/sites-enabled".to_string(),
            tmp_dir: "/tmp".to_string(),
            cert_dir: "/etc/ssl/nginx".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub command: Duration,
    pub transfer: Duration,
    pub key_generation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            command: Duration::from_secs(10),
            transfer: Duration::from_secs(60),
            key_generation: Duration::from_secs(60),
        }
    }
}

/// Resolved server configuration shared by all components.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub admin_token: Option<String>,
    pub host_key_policy: HostKeyPolicy,
    pub remote: RemoteLayout,
    pub timeouts: Timeouts,
}

impl FleetConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            config_dir: data_dir.join("configs"),
            data_dir,
            admin_token: None,
            host_key_policy: HostKeyPolicy::default(),
            remote: RemoteLayout::default(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn nodes_file(&self) -> PathBuf {
        self.data_dir.join("nodes.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("cluster.log")
    }

    pub fn key_dir(&self) -> PathBuf {
        self.data_dir.join("ssh")
    }
}

/// `~/.local/share/nginx-fleet` (or the platform equivalent).
pub fn default_data_dir() -> PathBuf {
    let mut dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("nginx-fleet");
    dir
}
