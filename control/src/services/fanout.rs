use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{AggregateError, FleetError};
use crate::services::node_registry::NodeRegistry;
use crate::services::operation_log::OperationLog;
use crate::services::orchestrator::ConfigOrchestrator;
use crate::types::{FanOutOperation, RemoteOperationResult, SyncResult};

const NODE_NOT_FOUND: &str = "node not found";

/// Applies one operation to many nodes concurrently.
///
/// Each node runs in its own spawned task with its own session, so a slow or
/// failing node never holds up the others, and a client that disconnects
/// mid-batch does not cancel work already in flight.
#[derive(Clone)]
pub struct FanOutExecutor {
    registry: NodeRegistry,
    orchestrator: Arc<ConfigOrchestrator>,
    log: OperationLog,
}

impl FanOutExecutor {
    pub fn new(registry: NodeRegistry, orchestrator: Arc<ConfigOrchestrator>, log: OperationLog) -> Self {
        Self {
            registry,
            orchestrator,
            log,
        }
    }

    /// Run `op` on every node in `node_ids`. Results are in input order.
    pub async fn run(&self, node_ids: &[String], op: &FanOutOperation) -> Vec<RemoteOperationResult> {
        info!("Fan-out {} over {} node(s)", op.name(), node_ids.len());

        let handles = spawn_per_node(node_ids, |id| {
            let this = self.clone();
            let op = op.clone();
            async move { this.run_one(&id, &op).await }
        });

        let results: Vec<RemoteOperationResult> = node_ids
            .iter()
            .zip(join_all(handles).await)
            .map(|(id, joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Fan-out task for node {} failed: {}", id, e);
                    RemoteOperationResult::failure(id, format!("task failed: {}", e))
                }
            })
            .collect();

        let failed = results.iter().filter(|r| !r.ok).count();
        self.log.append(
            &format!("cluster:{}", op.name()),
            "-",
            &format!("nodes:{} failed:{}", node_ids.len(), failed),
        );
        results
    }

    async fn run_one(&self, node_id: &str, op: &FanOutOperation) -> RemoteOperationResult {
        let Some(node) = self.registry.get(node_id) else {
            return RemoteOperationResult::failure(node_id, NODE_NOT_FOUND);
        };

        match op {
            FanOutOperation::PushConfig { filename } => {
                match self.orchestrator.push(&node, filename).await {
                    Ok(outcome) => RemoteOperationResult {
                        node_id: node.id,
                        ok: outcome.ok,
                        stdout: outcome.stdout,
                        stderr: outcome.stderr,
                        exit_code: Some(outcome.exit_code),
                        error: None,
                    },
                    Err(e) => RemoteOperationResult::failure(node_id, e.to_string()),
                }
            }
            FanOutOperation::EnableAndReload { filename } => {
                match self.orchestrator.enable_and_reload(&node, filename).await {
                    Ok(outcome) => {
                        let error = if outcome.ok {
                            None
                        } else if outcome.test_out.is_empty() {
                            Some("site could not be enabled".to_string())
                        } else if outcome.reload_out.is_empty() {
                            Some("configuration test failed; reload skipped".to_string())
                        } else {
                            Some("reload failed".to_string())
                        };
                        let stdout = [&outcome.enable_out, &outcome.test_out, &outcome.reload_out]
                            .iter()
                            .filter(|s| !s.is_empty())
                            .map(|s| s.trim_end())
                            .collect::<Vec<_>>()
                            .join("\n");
                        RemoteOperationResult {
                            node_id: node.id,
                            ok: outcome.ok,
                            stdout,
                            stderr: String::new(),
                            exit_code: None,
                            error,
                        }
                    }
                    Err(e) => RemoteOperationResult::failure(node_id, e.to_string()),
                }
            }
            FanOutOperation::PushCerts { files, target_dir } => {
                match self
                    .orchestrator
                    .push_certs(&node, files, target_dir.as_deref())
                    .await
                {
                    Ok(results) => {
                        let failed: Vec<&str> = results
                            .iter()
                            .filter(|r| !r.ok)
                            .map(|r| r.name.as_str())
                            .collect();
                        let stdout = results
                            .iter()
                            .map(|r| format!("{}: {}", r.name, if r.ok { "ok" } else { "failed" }))
                            .collect::<Vec<_>>()
                            .join("\n");
                        let stderr = results
                            .iter()
                            .filter(|r| !r.stderr.is_empty() || r.error.is_some())
                            .map(|r| {
                                format!(
                                    "{}: {}",
                                    r.name,
                                    r.error.as_deref().unwrap_or(r.stderr.trim())
                                )
                            })
                            .collect::<Vec<_>>()
                            .join("\n");
                        RemoteOperationResult {
                            node_id: node.id,
                            ok: failed.is_empty(),
                            stdout,
                            stderr,
                            exit_code: None,
                            error: (!failed.is_empty())
                                .then(|| format!("failed: {}", failed.join(", "))),
                        }
                    }
                    Err(e) => RemoteOperationResult::failure(node_id, e.to_string()),
                }
            }
        }
    }

    /// Push every file to every node. Results are node-major: all files for
    /// the first node, then all files for the second, and so on.
    pub async fn sync(&self, files: &[String], node_ids: &[String]) -> Result<Vec<SyncResult>, FleetError> {
        if files.is_empty() {
            return Err(FleetError::Validation("no files".to_string()));
        }
        if node_ids.is_empty() {
            return Err(FleetError::Validation("no nodes".to_string()));
        }

        let handles = spawn_per_node(node_ids, |id| {
            let this = self.clone();
            let files = files.to_vec();
            async move { this.sync_node(&id, &files).await }
        });

        let mut results = Vec::with_capacity(files.len() * node_ids.len());
        for (id, joined) in node_ids.iter().zip(join_all(handles).await) {
            match joined {
                Ok(node_results) => results.extend(node_results),
                Err(e) => {
                    warn!("Sync task for node {} failed: {}", id, e);
                    results.extend(files.iter().map(|file| SyncResult {
                        ok: false,
                        node: id.clone(),
                        node_id: id.clone(),
                        file: file.clone(),
                        error: Some(format!("task failed: {}", e)),
                    }));
                }
            }
        }

        self.log.append(
            "cluster:sync",
            "-",
            &format!("nodes:{} files:{}", node_ids.len(), files.len()),
        );
        Ok(results)
    }

    async fn sync_node(&self, node_id: &str, files: &[String]) -> Vec<SyncResult> {
        let node = self.registry.get(node_id);
        let mut results = Vec::with_capacity(files.len());

        for file in files {
            let Some(node) = &node else {
                results.push(SyncResult {
                    ok: false,
                    node: node_id.to_string(),
                    node_id: node_id.to_string(),
                    file: file.clone(),
                    error: Some(NODE_NOT_FOUND.to_string()),
                });
                continue;
            };

            let error = match self.orchestrator.push(node, file).await {
                Ok(outcome) if outcome.ok => None,
                Ok(outcome) if !outcome.stderr.trim().is_empty() => {
                    Some(outcome.stderr.trim().to_string())
                }
                Ok(outcome) => Some(format!("exit code {}", outcome.exit_code)),
                Err(e) => Some(e.to_string()),
            };
            results.push(SyncResult {
                ok: error.is_none(),
                node: node.host.clone(),
                node_id: node.id.clone(),
                file: file.clone(),
                error,
            });
        }
        results
    }
}

/// Summary of the failed entries of a batch, if any.
pub fn failures(results: &[RemoteOperationResult]) -> Option<AggregateError> {
    AggregateError::from_results(results)
}

fn spawn_per_node<T, F, Fut>(node_ids: &[String], mut task: F) -> Vec<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    node_ids
        .iter()
        .map(|id| tokio::spawn(task(id.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteLayout;
    use crate::remote::fake::FakeFleet;
    use crate::services::local_configs::LocalConfigStore;
    use crate::types::{CertFile, Node};
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        fleet: FakeFleet,
        registry: NodeRegistry,
        configs: LocalConfigStore,
        log: OperationLog,
        executor: FanOutExecutor,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let fleet = FakeFleet::new();
        let registry = NodeRegistry::open(dir.path().join("nodes.json")).unwrap();
        let configs = LocalConfigStore::new(dir.path().join("configs"));
        let log = OperationLog::new(dir.path().join("cluster.log"));
        let orchestrator = Arc::new(ConfigOrchestrator::new(
            fleet.connector(),
            configs.clone(),
            RemoteLayout::default(),
            log.clone(),
        ));
        let executor = FanOutExecutor::new(registry.clone(), orchestrator, log.clone());
        Harness {
            _dir: dir,
            fleet,
            registry,
            configs,
            log,
            executor,
        }
    }

    async fn add(h: &Harness, host: &str) -> Node {
        h.registry.add(host, host, 22, "root", true).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_node_fails_in_place() {
        let h = harness();
        h.configs.write("site.conf", b"server {}").await.unwrap();
        let a = add(&h, "web1").await;

        let ids = vec![a.id.clone(), "missing".to_string()];
        let results = h
            .executor
            .run(&ids, &FanOutOperation::PushConfig { filename: "site.conf".into() })
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node_id, a.id);
        assert!(results[0].ok);
        assert_eq!(results[0].exit_code, Some(0));
        assert_eq!(results[1].node_id, "missing");
        assert!(!results[1].ok);
        assert_eq!(results[1].error.as_deref(), Some("node not found"));

        let agg = failures(&results).unwrap();
        assert_eq!(agg.failures, vec![("missing".to_string(), "node not found".to_string())]);
    }

    #[tokio::test]
    async fn test_one_failing_node_does_not_affect_others() {
        let h = harness();
        h.configs.write("site.conf", b"server {}").await.unwrap();
        let a = add(&h, "web1").await;
        let b = add(&h, "web2").await;
        let c = add(&h, "web3").await;
        h.fleet.set_unreachable("web2");

        let ids = vec![a.id, b.id, c.id];
        let results = h
            .executor
            .run(&ids, &FanOutOperation::PushConfig { filename: "site.conf".into() })
            .await;

        let oks: Vec<bool> = results.iter().map(|r| r.ok).collect();
        assert_eq!(oks, vec![true, false, true]);
        assert!(results[1].error.as_deref().unwrap().contains("connection failed"));
        assert!(h.fleet.remote_file("web3", "/etc/nginx/sites-available/site.conf").is_some());
        assert_eq!(h.fleet.connects(), h.fleet.disposes());
    }

    #[tokio::test]
    async fn test_panicking_node_becomes_failed_result() {
        let h = harness();
        h.configs.write("site.conf", b"server {}").await.unwrap();
        let a = add(&h, "web1").await;
        let b = add(&h, "web2").await;
        let c = add(&h, "web3").await;
        h.fleet.panic_on_connect("web2");

        let ids = vec![a.id.clone(), b.id.clone(), c.id.clone()];
        let results = h
            .executor
            .run(&ids, &FanOutOperation::PushConfig { filename: "site.conf".into() })
            .await;

        let order: Vec<&str> = results.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(order, vec![a.id.as_str(), b.id.as_str(), c.id.as_str()]);
        assert!(results[0].ok);
        assert!(!results[1].ok);
        assert!(results[1].error.as_deref().unwrap().starts_with("task failed"));
        assert!(results[2].ok);

        let entries = h.log.recent(10).await.unwrap();
        let batch = entries.last().unwrap();
        assert_eq!(batch.action, "cluster:push-config");
        assert_eq!(batch.detail, "nodes:3 failed:1");
    }

    #[tokio::test]
    async fn test_panicking_node_in_sync_fails_each_file() {
        let h = harness();
        h.configs.write("a.conf", b"a").await.unwrap();
        h.configs.write("b.conf", b"b").await.unwrap();
        let a = add(&h, "web1").await;
        let b = add(&h, "web2").await;
        h.fleet.panic_on_connect("web1");

        let files = vec!["a.conf".to_string(), "b.conf".to_string()];
        let results = h
            .executor
            .sync(&files, &[a.id.clone(), b.id.clone()])
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        for r in &results[..2] {
            assert_eq!(r.node_id, a.id);
            assert!(!r.ok);
            assert!(r.error.as_deref().unwrap().starts_with("task failed"));
        }
        assert_eq!(results[0].file, "a.conf");
        assert_eq!(results[1].file, "b.conf");
        assert!(results[2..].iter().all(|r| r.ok && r.node_id == b.id));
    }

    #[tokio::test]
    async fn test_enable_and_reload_over_nodes() {
        let h = harness();
        let a = add(&h, "web1").await;
        let b = add(&h, "web2").await;
        for host in ["web1", "web2"] {
            h.fleet
                .put_remote_file(host, "/etc/nginx/sites-available/site.conf", b"server {}");
        }
        h.fleet.break_config("web2");

        let ids = vec![a.id, b.id];
        let results = h
            .executor
            .run(&ids, &FanOutOperation::EnableAndReload { filename: "site.conf".into() })
            .await;

        assert!(results[0].ok);
        assert!(results[0].stdout.contains("reloaded"));
        assert!(!results[1].ok);
        assert_eq!(
            results[1].error.as_deref(),
            Some("configuration test failed; reload skipped")
        );
        assert!(!h
            .fleet
            .commands("web2")
            .iter()
            .any(|c| c.starts_with("systemctl")));
    }

    #[tokio::test]
    async fn test_push_certs_over_nodes() {
        let h = harness();
        let a = add(&h, "web1").await;
        let op = FanOutOperation::PushCerts {
            files: vec![CertFile {
                name: "site.pem".into(),
                content_base64: BASE64_STANDARD.encode(b"PEM"),
            }],
            target_dir: None,
        };

        let results = h.executor.run(&[a.id], &op).await;

        assert!(results[0].ok);
        assert_eq!(results[0].stdout, "site.pem: ok");
        assert_eq!(
            h.fleet.remote_file("web1", "/etc/ssl/nginx/site.pem").unwrap(),
            b"PEM"
        );
    }

    #[tokio::test]
    async fn test_sync_is_node_major() {
        let h = harness();
        h.configs.write("a.conf", b"a").await.unwrap();
        h.configs.write("b.conf", b"b").await.unwrap();
        let n1 = add(&h, "web1").await;
        let n2 = add(&h, "web2").await;

        let files = vec!["a.conf".to_string(), "b.conf".to_string()];
        let nodes = vec![n1.id.clone(), "ghost".to_string(), n2.id.clone()];
        let results = h.executor.sync(&files, &nodes).await.unwrap();

        let order: Vec<(&str, &str, bool)> = results
            .iter()
            .map(|r| (r.node.as_str(), r.file.as_str(), r.ok))
            .collect();
        assert_eq!(
            order,
            vec![
                ("web1", "a.conf", true),
                ("web1", "b.conf", true),
                ("ghost", "a.conf", false),
                ("ghost", "b.conf", false),
                ("web2", "a.conf", true),
                ("web2", "b.conf", true),
            ]
        );
        assert_eq!(results[2].error.as_deref(), Some("node not found"));
        assert_eq!(results[4].node_id, n2.id);

        let entries = h.log.recent(100).await.unwrap();
        let last = entries.last().unwrap();
        assert_eq!(last.action, "cluster:sync");
        assert_eq!(last.detail, "nodes:3 files:2");
    }

    #[tokio::test]
    async fn test_sync_reports_missing_local_file() {
        let h = harness();
        let n1 = add(&h, "web1").await;

        let results = h
            .executor
            .sync(&["absent.conf".to_string()], &[n1.id])
            .await
            .unwrap();

        assert!(!results[0].ok);
        assert_eq!(results[0].error.as_deref(), Some("local config not found"));
        assert_eq!(h.fleet.connects(), 0);
    }

    #[tokio::test]
    async fn test_sync_requires_files_and_nodes() {
        let h = harness();
        let err = h.executor.sync(&[], &["x".to_string()]).await.unwrap_err();
        assert_eq!(err.to_string(), "no files");
        let err = h.executor.sync(&["a".to_string()], &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "no nodes");
    }
}
