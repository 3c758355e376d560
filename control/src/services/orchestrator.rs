use base64::prelude::{Engine as _, BASE64_STANDARD};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::config::RemoteLayout;
use crate::error::FleetError;
use crate::remote::command::{
    join_remote, remote_tmp_path, sanitize_filename, sanitize_remote_dir, RemoteCommand,
};
use crate::remote::{Connector, ExecOutput, RemoteSession};
use crate::services::local_configs::LocalConfigStore;
use crate::services::operation_log::OperationLog;
use crate::types::{CertFile, CertResult, Node, PulledConfig, PushOutcome, ReloadOutcome};

/// Runs push, pull, enable-and-reload and push-certs against one node.
///
/// Every operation opens its own session and disposes it exactly once before
/// returning, whether the steps in between succeeded or not.
pub struct ConfigOrchestrator {
    connector: Arc<dyn Connector>,
    configs: LocalConfigStore,
    layout: RemoteLayout,
    log: OperationLog,
}

impl ConfigOrchestrator {
    pub fn new(
        connector: Arc<dyn Connector>,
        configs: LocalConfigStore,
        layout: RemoteLayout,
        log: OperationLog,
    ) -> Self {
        Self {
            connector,
            configs,
            layout,
            log,
        }
    }

    /// Upload a local config into the node's sites-available directory.
    ///
    /// Any stderr from the install step marks the push as failed even when the
    /// shell exit code is zero.
    pub async fn push(&self, node: &Node, filename: &str) -> Result<PushOutcome, FleetError> {
        let name = sanitize_filename(filename)?;
        if !self.configs.exists(&name).await? {
            return Err(FleetError::NotFound("local config not found".to_string()));
        }
        let local = self.configs.path_for(&name)?;
        let dest = join_remote(&self.layout.sites_available, &name);

        info!("Pushing {} to {} ({})", name, node.host, dest);
        let session = self.connector.connect(node).await?;
        let result = self.push_steps(session.as_ref(), &local, &name, &dest).await;
        session.dispose().await;

        match &result {
            Ok(outcome) => {
                if !outcome.ok {
                    warn!("Push of {} to {} reported: {}", name, node.host, outcome.stderr.trim());
                }
                self.log.append(
                    "push-config",
                    &node.host,
                    &format!("{} -> {} : {}", name, dest, outcome.exit_code),
                );
            }
            Err(e) => {
                self.log.append("push-config", &node.host, &format!("{} failed: {}", name, e));
            }
        }
        result
    }

    async fn push_steps(
        &self,
        session: &dyn RemoteSession,
        local: &Path,
        name: &str,
        dest: &str,
    ) -> Result<PushOutcome, FleetError> {
        let staged = remote_tmp_path(&self.layout.tmp_dir, name);
        session.put_file(local, &staged).await?;

        let install = RemoteCommand::Install {
            staged: &staged,
            dest,
            create_dir: None,
        };
        let out = session.exec(&install.render()).await?;

        Ok(PushOutcome {
            ok: out.success() && out.stderr.is_empty(),
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.exit_code,
        })
    }

    /// Fetch the node's copy of `filename` from sites-available.
    pub async fn pull(&self, node: &Node, filename: &str) -> Result<PulledConfig, FleetError> {
        let name = sanitize_filename(filename)?;
        let remote = join_remote(&self.layout.sites_available, &name);

        let session = self.connector.connect(node).await?;
        let result = pull_steps(session.as_ref(), &remote, &name).await;
        session.dispose().await;

        let content = match result {
            Ok(content) => content,
            Err(e) => {
                self.log.append("pull-config", &node.host, &format!("{} failed: {}", name, e));
                return Err(e);
            }
        };

        self.log.append("pull-config", &node.host, &name);
        Ok(PulledConfig { name, content })
    }

    /// Enable the site, test the configuration and reload only if the test
    /// passed.
    pub async fn enable_and_reload(
        &self,
        node: &Node,
        filename: &str,
    ) -> Result<ReloadOutcome, FleetError> {
        let name = sanitize_filename(filename)?;
        let available = join_remote(&self.layout.sites_available, &name);
        let enabled = join_remote(&self.layout.sites_enabled, &name);

        let session = self.connector.connect(node).await?;
        let result = enable_and_reload_steps(session.as_ref(), &available, &enabled).await;
        session.dispose().await;

        let detail = match &result {
            Ok(outcome) if outcome.ok => format!("{} enabled, test ok, reloaded", name),
            Ok(outcome) if outcome.test_out.is_empty() => format!("{} could not be enabled", name),
            Ok(outcome) if outcome.reload_out.is_empty() => {
                format!("{} test failed, reload skipped", name)
            }
            Ok(_) => format!("{} reload failed", name),
            Err(e) => format!("{} failed: {}", name, e),
        };
        self.log.append("enable-and-reload", &node.host, &detail);
        result
    }

    /// Install certificate files under `target_dir` (default: the configured
    /// certificate directory). Each file succeeds or fails on its own.
    pub async fn push_certs(
        &self,
        node: &Node,
        files: &[CertFile],
        target_dir: Option<&str>,
    ) -> Result<Vec<CertResult>, FleetError> {
        if files.is_empty() {
            return Err(FleetError::Validation("no files".to_string()));
        }
        let dir = sanitize_remote_dir(target_dir.unwrap_or(&self.layout.cert_dir))?;

        let session = self.connector.connect(node).await?;
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            results.push(self.push_cert(session.as_ref(), &dir, file).await);
        }
        session.dispose().await;

        let failed = results.iter().filter(|r| !r.ok).count();
        self.log.append(
            "push-certs",
            &node.host,
            &format!("files:{} failed:{} dir:{}", files.len(), failed, dir),
        );
        Ok(results)
    }

    async fn push_cert(&self, session: &dyn RemoteSession, dir: &str, file: &CertFile) -> CertResult {
        let requested = if file.name.is_empty() { "cert" } else { file.name.as_str() };
        let name = match sanitize_filename(requested) {
            Ok(name) => name,
            Err(e) => return CertResult::failed(requested, e.to_string()),
        };

        let bytes = match BASE64_STANDARD.decode(file.content_base64.trim()) {
            Ok(bytes) => bytes,
            Err(e) => return CertResult::failed(&name, format!("invalid base64 content: {}", e)),
        };

        // Removed when dropped, on every path below.
        let local = match write_local_temp(&name, &bytes).await {
            Ok(local) => local,
            Err(e) => return CertResult::failed(&name, e.to_string()),
        };

        let staged = remote_tmp_path(&self.layout.tmp_dir, &name);
        let dest = join_remote(dir, &name);
        let result = async {
            session.put_file(local.path(), &staged).await?;
            let install = RemoteCommand::Install {
                staged: &staged,
                dest: &dest,
                create_dir: Some(dir),
            };
            session.exec(&install.render()).await
        }
        .await;
        drop(local);

        match result {
            Ok(out) => CertResult {
                ok: out.success() && out.stderr.is_empty(),
                name,
                stdout: out.stdout,
                stderr: out.stderr,
                code: out.exit_code,
                error: None,
            },
            Err(e) => CertResult::failed(&name, e.to_string()),
        }
    }
}

impl CertResult {
    /// A file that never reached the install step. `code` is -1.
    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            stdout: String::new(),
            stderr: String::new(),
            code: -1,
            error: Some(error),
        }
    }
}

async fn pull_steps(
    session: &dyn RemoteSession,
    remote: &str,
    name: &str,
) -> Result<String, FleetError> {
    let local = tempfile::Builder::new()
        .prefix("nginx-fleet-")
        .suffix(&format!("-{}", name))
        .tempfile()
        .map_err(|e| FleetError::Storage(format!("Failed to create temp file: {}", e)))?;

    session.get_file(remote, local.path()).await?;
    let bytes = tokio::fs::read(local.path())
        .await
        .map_err(|e| FleetError::Storage(format!("Failed to read fetched file: {}", e)))?;
    drop(local);

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn enable_and_reload_steps(
    session: &dyn RemoteSession,
    available: &str,
    enabled: &str,
) -> Result<ReloadOutcome, FleetError> {
    let mut outcome = ReloadOutcome::default();

    let link = session
        .exec(&RemoteCommand::EnableSite { available, enabled }.render())
        .await?;
    if !link.success() {
        outcome.enable_out = match link.combined() {
            out if out.is_empty() => format!("available config not found: {}", available),
            out => out,
        };
        return Ok(outcome);
    }
    outcome.enable_out = link.combined();

    let test = session.exec(&RemoteCommand::TestConfig.render()).await?;
    outcome.test_out = describe(&test);
    if !test.success() {
        warn!("nginx -t failed, skipping reload: {}", test.stderr.trim());
        return Ok(outcome);
    }

    let reload = session.exec(&RemoteCommand::Reload.render()).await?;
    outcome.reload_out = describe(&reload);
    outcome.ok = reload.success();
    Ok(outcome)
}

/// Command output, or its exit status when it printed nothing.
fn describe(out: &ExecOutput) -> String {
    match out.combined() {
        text if text.is_empty() => format!("exit status {}", out.exit_code),
        text => text,
    }
}

async fn write_local_temp(name: &str, bytes: &[u8]) -> Result<NamedTempFile, FleetError> {
    let file = tempfile::Builder::new()
        .prefix("nginx-fleet-cert-")
        .suffix(&format!("-{}", name))
        .tempfile()
        .map_err(|e| FleetError::Storage(format!("Failed to create temp file: {}", e)))?;
    tokio::fs::write(file.path(), bytes)
        .await
        .map_err(|e| FleetError::Storage(format!("Failed to write temp file: {}", e)))?;
    Ok(file)
}
