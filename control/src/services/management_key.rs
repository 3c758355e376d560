use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::FleetError;

pub const KEY_NAME: &str = "id_manage";
const KEY_COMMENT: &str = "nginx-fleet management key";

/// Owns the single key pair used to authenticate to every node.
pub struct ManagementKeyManager {
    dir: PathBuf,
    keygen_program: PathBuf,
    timeout: Duration,
    generation: Mutex<()>,
}

impl ManagementKeyManager {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            keygen_program: PathBuf::from("ssh-keygen"),
            timeout,
            generation: Mutex::new(()),
        }
    }

    /// Use a different `ssh-keygen` binary.
    pub fn with_keygen_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.keygen_program = program.into();
        self
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(KEY_NAME)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pub", KEY_NAME))
    }

    /// Both halves of the pair are present.
    pub fn has_key(&self) -> bool {
        self.private_key_path().is_file() && self.public_key_path().is_file()
    }

    /// Return the public key, generating the pair first if it is missing.
    pub async fn ensure_key(&self) -> Result<String, FleetError> {
        let _guard = self.generation.lock().await;

        if self.has_key() {
            return self.read_public_key().await;
        }

        self.generate().await?;
        self.read_public_key().await
    }

    async fn read_public_key(&self) -> Result<String, FleetError> {
        let path = self.public_key_path();
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            FleetError::KeyGeneration(format!("Failed to read {}: {}", path.display(), e))
        })
    }

    async fn generate(&self) -> Result<(), FleetError> {
        let keygen_err = |context: &str, e: std::io::Error| {
            FleetError::KeyGeneration(format!("{}: {}", context, e))
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| keygen_err("Failed to create key directory", e))?;
        set_mode(&self.dir, 0o700).map_err(|e| keygen_err("Failed to restrict key directory", e))?;

        // Generated inside the key directory so the final rename stays on one
        // filesystem. Dropping `staging` removes whatever is left in it.
        let staging = tempfile::Builder::new()
            .prefix(".keygen-")
            .tempdir_in(&self.dir)
            .map_err(|e| keygen_err("Failed to create staging directory", e))?;
        let staged_private = staging.path().join(KEY_NAME);
        let staged_public = staging.path().join(format!("{}.pub", KEY_NAME));

        info!("Generating management key pair in {:?}", self.dir);

        let mut cmd = tokio::process::Command::new(&self.keygen_program);
        cmd.args(["-t", "rsa", "-b", "4096", "-N", "", "-C", KEY_COMMENT, "-q", "-f"])
            .arg(&staged_private)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                FleetError::KeyGeneration(format!(
                    "ssh-keygen timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| keygen_err("Failed to run ssh-keygen", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("ssh-keygen failed: {}", stderr.trim());
            return Err(FleetError::KeyGeneration(format!(
                "ssh-keygen failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        set_mode(&staged_private, 0o600).map_err(|e| keygen_err("Failed to restrict private key", e))?;
        set_mode(&staged_public, 0o644).map_err(|e| keygen_err("Failed to set public key mode", e))?;

        tokio::fs::rename(&staged_private, self.private_key_path())
            .await
            .map_err(|e| keygen_err("Failed to install private key", e))?;
        tokio::fs::rename(&staged_public, self.public_key_path())
            .await
            .map_err(|e| keygen_err("Failed to install public key", e))?;

        info!("Management key written to {:?}", self.private_key_path());
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
