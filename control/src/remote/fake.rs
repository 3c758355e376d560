//! Scripted in-memory transport for tests.
//!
//! Each node host gets its own map of remote files. `exec` understands the
//! commands rendered by [`super::command::RemoteCommand`] well enough to move
//! files, create site links and answer `nginx -t` / reload.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Connector, ExecOutput, RemoteSession};
use crate::error::FleetError;
use crate::types::Node;

#[derive(Default)]
struct FleetState {
    files: HashMap<(String, String), Vec<u8>>,
    links: HashSet<(String, String)>,
    commands: Vec<(String, String)>,
    connects: usize,
    disposes: usize,
    unreachable: HashSet<String>,
    panicking: HashSet<String>,
    rejected: HashSet<String>,
    broken_config: HashSet<String>,
    failing_reload: HashSet<String>,
    failing_uploads: Vec<String>,
    install_stderr: Option<String>,
}

/// Shared handle to the simulated fleet; cloning shares state.
#[derive(Clone, Default)]
pub struct FakeFleet {
    state: Arc<Mutex<FleetState>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            fleet: self.clone(),
        })
    }

    /// Connections to `host` fail at the transport level.
    pub fn set_unreachable(&self, host: &str) {
        self.lock().unreachable.insert(host.to_string());
    }

    /// Connecting to `host` panics, as a bug in the transport would.
    pub fn panic_on_connect(&self, host: &str) {
        self.lock().panicking.insert(host.to_string());
    }

    /// `host` refuses the management key.
    pub fn reject_key(&self, host: &str) {
        self.lock().rejected.insert(host.to_string());
    }

    /// `nginx -t` fails on `host`.
    pub fn break_config(&self, host: &str) {
        self.lock().broken_config.insert(host.to_string());
    }

    /// The reload command exits non-zero on `host`.
    pub fn fail_reload(&self, host: &str) {
        self.lock().failing_reload.insert(host.to_string());
    }

    /// Uploads whose remote path contains `needle` fail.
    pub fn fail_uploads_containing(&self, needle: &str) {
        self.lock().failing_uploads.push(needle.to_string());
    }

    /// Install commands succeed but print `stderr`.
    pub fn set_install_stderr(&self, stderr: &str) {
        self.lock().install_stderr = Some(stderr.to_string());
    }

    pub fn put_remote_file(&self, host: &str, path: &str, content: &[u8]) {
        self.lock()
            .files
            .insert((host.to_string(), path.to_string()), content.to_vec());
    }

    pub fn remote_file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    /// Remote paths present on `host`, sorted.
    pub fn remote_paths(&self, host: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .lock()
            .files
            .keys()
            .filter(|(h, _)| h == host)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn is_linked(&self, host: &str, enabled_path: &str) -> bool {
        self.lock()
            .links
            .contains(&(host.to_string(), enabled_path.to_string()))
    }

    pub fn commands(&self, host: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disposes(&self) -> usize {
        self.lock().disposes
    }
}

struct FakeConnector {
    fleet: FakeFleet,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>, FleetError> {
        if self.fleet.lock().panicking.contains(&node.host) {
            panic!("transport crashed connecting to {}", node.host);
        }

        let mut state = self.fleet.lock();
        if state.unreachable.contains(&node.host) {
            return Err(FleetError::Execution(format!(
                "{} connection failed: connection refused",
                node.host
            )));
        }
        if state.rejected.contains(&node.host) {
            return Err(FleetError::Authentication(format!(
                "{} rejected the management key",
                node.host
            )));
        }
        state.connects += 1;

        Ok(Box::new(FakeSession {
            host: node.host.clone(),
            fleet: self.fleet.clone(),
        }))
    }
}

struct FakeSession {
    host: String,
    fleet: FakeFleet,
}

/// Arguments wrapped in single quotes, in order.
fn quoted_args(command: &str) -> Vec<String> {
    command
        .split('\'')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

fn exit(code: i32, stdout: &str, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: code,
    }
}

impl FakeSession {
    fn run(&self, state: &mut FleetState, command: &str) -> ExecOutput {
        let host = self.host.clone();

        if command.starts_with("test -f ") {
            let args = quoted_args(command);
            let (available, enabled) = (&args[0], &args[1]);
            if !state.files.contains_key(&(host.clone(), available.clone())) {
                return exit(1, "", "");
            }
            state.links.insert((host, enabled.clone()));
            return exit(0, "", "");
        }

        if command == "nginx -t" {
            return if state.broken_config.contains(&host) {
                exit(
                    1,
                    "",
                    "nginx: [emerg] unexpected \"}\" in /etc/nginx/sites-enabled/site.conf:12\n\
                     nginx: configuration file /etc/nginx/nginx.conf test failed\n",
                )
            } else {
                exit(
                    0,
                    "",
                    "nginx: the configuration file /etc/nginx/nginx.conf syntax is ok\n\
                     nginx: configuration file /etc/nginx/nginx.conf test is successful\n",
                )
            };
        }

        if command.starts_with("systemctl reload nginx") {
            return if state.failing_reload.contains(&host) {
                exit(1, "", "nginx.service is not active, cannot reload.\n")
            } else {
                exit(0, "reloaded\n", "")
            };
        }

        for step in command.split(" && ") {
            let args = quoted_args(step);
            if step.starts_with("mv ") {
                let (from, to) = (&args[0], &args[1]);
                match state.files.remove(&(host.clone(), from.clone())) {
                    Some(content) => {
                        state.files.insert((host.clone(), to.clone()), content);
                    }
                    None => {
                        return exit(
                            1,
                            "",
                            &format!("mv: cannot stat '{}': No such file or directory\n", from),
                        )
                    }
                }
            } else if step.starts_with("mkdir ")
                || step.starts_with("chown ")
                || step.starts_with("chmod ")
            {
                continue;
            } else {
                return exit(127, "", &format!("sh: {}: command not found\n", step));
            }
        }

        let stderr = state.install_stderr.clone().unwrap_or_default();
        exit(0, "", &stderr)
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), FleetError> {
        let content = std::fs::read(local).map_err(|e| {
            FleetError::Transfer(format!("Failed to read {}: {}", local.display(), e))
        })?;

        let mut state = self.fleet.lock();
        if state.failing_uploads.iter().any(|needle| remote.contains(needle)) {
            return Err(FleetError::Transfer(format!(
                "{} upload to {} failed: broken pipe",
                self.host, remote
            )));
        }
        state.files.insert((self.host.clone(), remote.to_string()), content);
        Ok(())
    }

    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), FleetError> {
        let content = self
            .fleet
            .lock()
            .files
            .get(&(self.host.clone(), remote.to_string()))
            .cloned()
            .ok_or_else(|| {
                FleetError::Transfer(format!("{}: No such file or directory", remote))
            })?;

        std::fs::write(local, content).map_err(|e| {
            FleetError::Transfer(format!("Failed to write {}: {}", local.display(), e))
        })
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, FleetError> {
        let mut state = self.fleet.lock();
        state.commands.push((self.host.clone(), command.to_string()));
        Ok(self.run(&mut state, command))
    }

    async fn dispose(self: Box<Self>) {
        self.fleet.lock().disposes += 1;
    }
}
