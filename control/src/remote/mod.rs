//! Remote execution transport.
//!
//! The orchestrator only needs three primitives per node: upload a file,
//! download a file and run a privileged command. [`Connector`] opens one
//! [`RemoteSession`] per node operation; [`ssh::SshConnector`] provides them
//! over SSH using the management key.

pub mod command;
#[cfg(any(test, feature = "dev-stubs"))]
pub mod fake;
pub mod ssh;

use async_trait::async_trait;
use std::path::Path;

use crate::error::FleetError;
use crate::types::Node;

/// Captured result of a remote command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, as an operator would see it in a terminal.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open an authenticated session to `node`.
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>, FleetError>;
}

#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Copy `local` to `remote` byte for byte.
    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), FleetError>;

    /// Copy `remote` to `local`. `local` is only written once the whole remote
    /// file has been read.
    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), FleetError>;

    /// Run `command` with elevated privileges. A non-zero exit is returned in
    /// the output; only transport failures and timeouts are errors.
    async fn exec(&self, command: &str) -> Result<ExecOutput, FleetError>;

    /// Release the connection.
    async fn dispose(self: Box<Self>);
}
