use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::ServerCheckMethod;
use async_trait::async_trait;
use russh::ChannelMsg;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::command::{privileged, quote};
use super::{Connector, ExecOutput, RemoteSession};
use crate::config::{HostKeyPolicy, Timeouts};
use crate::error::FleetError;
use crate::services::management_key::ManagementKeyManager;
use crate::types::Node;

pub const MISSING_KEY_MESSAGE: &str =
    "management key not found on server; generate it first via GET /api/cluster/key";

/// Opens SSH sessions authenticated with the management key.
pub struct SshConnector {
    keys: Arc<ManagementKeyManager>,
    host_key_policy: HostKeyPolicy,
    timeouts: Timeouts,
}

impl SshConnector {
    pub fn new(
        keys: Arc<ManagementKeyManager>,
        host_key_policy: HostKeyPolicy,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            keys,
            host_key_policy,
            timeouts,
        }
    }

    fn server_check(&self) -> ServerCheckMethod {
        match self.host_key_policy {
            HostKeyPolicy::None => ServerCheckMethod::NoCheck,
            HostKeyPolicy::KnownHosts => ServerCheckMethod::DefaultKnownHostsFile,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>, FleetError> {
        let addr = format!("{}@{}:{}", node.user, node.host, node.port);

        if !node.use_management_key {
            return Err(FleetError::Authentication(format!(
                "node {} is not configured for management-key authentication",
                node.name
            )));
        }

        let key_path = self.keys.private_key_path();
        if !key_path.is_file() {
            return Err(FleetError::Authentication(MISSING_KEY_MESSAGE.to_string()));
        }

        debug!("{} connecting", addr);
        let connect = Client::connect(
            (node.host.clone(), node.port),
            &node.user,
            AuthMethod::with_key_file(&key_path, None),
            self.server_check(),
        );

        let client = with_timeout(self.timeouts.connect, connect)
            .await
            .map_err(|_| {
                FleetError::Execution(format!(
                    "{} connect timed out after {}s",
                    addr,
                    self.timeouts.connect.as_secs()
                ))
            })?
            .map_err(|e| classify_connect_error(&addr, e))?;
        debug!("{} connected", addr);

        Ok(Box::new(SshSession {
            client,
            addr,
            timeouts: self.timeouts,
        }))
    }
}

fn classify_connect_error(addr: &str, e: async_ssh2_tokio::Error) -> FleetError {
    use async_ssh2_tokio::Error;

    match &e {
        Error::KeyAuthFailed | Error::KeyInvalid(_) | Error::PasswordWrong => {
            FleetError::Authentication(format!("{} rejected the management key: {}", addr, e))
        }
        _ => FleetError::Execution(format!("{} connection failed: {}", addr, e)),
    }
}

async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Result<F::Output, ()> {
    tokio::time::timeout(limit, fut).await.map_err(|_| ())
}

#[derive(Default)]
struct ChannelOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

struct SshSession {
    client: Client,
    addr: String,
    timeouts: Timeouts,
}

impl SshSession {
    /// Run `command` on a fresh channel, optionally feeding `input` to its
    /// stdin, and collect everything until the channel closes.
    async fn run_channel(&self, command: &str, input: Option<&[u8]>) -> Result<ChannelOutput, String> {
        let mut channel = self.client.get_channel().await.map_err(|e| e.to_string())?;
        channel.exec(true, command).await.map_err(|e| e.to_string())?;
        if let Some(bytes) = input {
            channel.data(bytes).await.map_err(|e| e.to_string())?;
        }
        channel.eof().await.map_err(|e| e.to_string())?;

        let mut out = ChannelOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => out.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => out.stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => out.exit_status = Some(exit_status),
                _ => {}
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), FleetError> {
        let bytes = tokio::fs::read(local).await.map_err(|e| {
            FleetError::Transfer(format!("Failed to read {}: {}", local.display(), e))
        })?;
        debug!("{} upload {} bytes -> {}", self.addr, bytes.len(), remote);

        let command = format!("cat > {}", quote(remote));
        let upload = self.run_channel(&command, Some(&bytes));
        let out = with_timeout(self.timeouts.transfer, upload)
            .await
            .map_err(|_| FleetError::Transfer(format!("{} upload to {} timed out", self.addr, remote)))?
            .map_err(|e| FleetError::Transfer(format!("{} upload to {} failed: {}", self.addr, remote, e)))?;

        if out.exit_status != Some(0) {
            return Err(FleetError::Transfer(format!(
                "{} upload to {} failed: {}",
                self.addr,
                remote,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), FleetError> {
        debug!("{} download {} -> {:?}", self.addr, remote, local);

        let command = format!("cat {}", quote(remote));
        let download = self.run_channel(&command, None);
        let out = with_timeout(self.timeouts.transfer, download)
            .await
            .map_err(|_| FleetError::Transfer(format!("{} download of {} timed out", self.addr, remote)))?
            .map_err(|e| FleetError::Transfer(format!("{} download of {} failed: {}", self.addr, remote, e)))?;

        if out.exit_status != Some(0) {
            return Err(FleetError::Transfer(format!(
                "{}: {}",
                remote,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }

        tokio::fs::write(local, &out.stdout).await.map_err(|e| {
            FleetError::Transfer(format!("Failed to write {}: {}", local.display(), e))
        })
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, FleetError> {
        debug!("{} exec: {}", self.addr, command);

        let wrapped = privileged(command);
        let out = with_timeout(self.timeouts.command, self.run_channel(&wrapped, None))
            .await
            .map_err(|_| {
                FleetError::Execution(format!(
                    "{} command timed out after {}s",
                    self.addr,
                    self.timeouts.command.as_secs()
                ))
            })?
            .map_err(|e| FleetError::Execution(format!("{} exec failed: {}", self.addr, e)))?;

        let exit_code = out.exit_status.ok_or_else(|| {
            FleetError::Execution(format!("{} command did not report an exit status", self.addr))
        })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: exit_code as i32,
        })
    }

    async fn dispose(self: Box<Self>) {
        if let Err(e) = self.client.disconnect().await {
            debug!("{} disconnect failed: {}", self.addr, e);
        }
        debug!("{} session closed", self.addr);
    }
}
