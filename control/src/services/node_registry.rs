use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::error::FleetError;
use crate::store;
use crate::types::Node;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_USER: &str = "root";

struct Inner {
    path: PathBuf,
    /// Serializes load-modify-persist for writers.
    writer: Mutex<()>,
    /// Last persisted snapshot; readers clone it without waiting on writers.
    current: RwLock<Arc<Vec<Node>>>,
}

/// Durable list of managed nodes backed by a flat JSON document.
#[derive(Clone)]
pub struct NodeRegistry {
    inner: Arc<Inner>,
}

impl NodeRegistry {
    /// Open the registry at `path`. A missing document is an empty registry;
    /// a malformed one is an error so operator data is never overwritten.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FleetError> {
        let path = path.into();
        let nodes: Vec<Node> = store::load_document(&path)?.unwrap_or_default();
        info!("Loaded {} node(s) from {:?}", nodes.len(), path);

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                writer: Mutex::new(()),
                current: RwLock::new(Arc::new(nodes)),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// All nodes in insertion order.
    pub fn list(&self) -> Vec<Node> {
        self.snapshot().as_ref().clone()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.snapshot().iter().find(|n| n.id == id).cloned()
    }

    /// Register a new node and persist it before returning.
    pub async fn add(
        &self,
        name: &str,
        host: &str,
        port: u16,
        user: &str,
        use_management_key: bool,
    ) -> Result<Node, FleetError> {
        let name = name.trim();
        let host = host.trim();
        if name.is_empty() || host.is_empty() {
            return Err(FleetError::Validation("name and host required".to_string()));
        }
        let user = match user.trim() {
            "" => DEFAULT_USER,
            u => u,
        };

        let node = Node {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            user: user.to_string(),
            use_management_key,
        };

        let added = node.clone();
        self.mutate(move |nodes| {
            nodes.push(added);
            true
        })
        .await?;

        info!("Node added: id={}, host={}", node.id, node.host);
        Ok(node)
    }

    /// Remove a node. Unknown ids are a no-op; returns whether a record was
    /// removed.
    pub async fn remove(&self, id: &str) -> Result<bool, FleetError> {
        let id = id.to_string();
        let removed = self
            .mutate(move |nodes| {
                let before = nodes.len();
                nodes.retain(|n| n.id != id);
                nodes.len() != before
            })
            .await?;
        Ok(removed)
    }

    fn snapshot(&self) -> Arc<Vec<Node>> {
        let guard = self
            .inner
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Apply `f` to a copy of the list and persist it. `f` returns whether it
    /// changed anything; unchanged lists are not rewritten. Memory is only
    /// updated after the document was replaced on disk.
    async fn mutate<F>(&self, f: F) -> Result<bool, FleetError>
    where
        F: FnOnce(&mut Vec<Node>) -> bool + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        store::execute_async(move || {
            let _guard = inner
                .writer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let mut nodes = {
                let current = inner
                    .current
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                current.as_ref().clone()
            };

            if !f(&mut nodes) {
                return Ok(false);
            }

            store::write_document(&inner.path, &nodes)?;

            let mut current = inner
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = Arc::new(nodes);
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn open_registry(dir: &TempDir) -> NodeRegistry {
        NodeRegistry::open(dir.path().join("nodes.json")).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);

        let node = registry
            .add("web-1", "10.0.0.5", DEFAULT_PORT, "", true)
            .await
            .unwrap();

        let nodes = registry.list();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0], node);
        assert_eq!(node.user, "root");
        assert_eq!(node.port, 22);
        assert!(!node.id.is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_blank_name_or_host() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);

        for (name, host) in [("", "10.0.0.1"), ("web", ""), ("   ", "10.0.0.1"), ("web", "\t")] {
            let err = registry.add(name, host, 22, "root", true).await.unwrap_err();
            assert!(matches!(err, FleetError::Validation(_)));
        }

        assert!(registry.list().is_empty());
        assert!(!registry.path().exists());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);

        for _ in 0..5 {
            registry.add("web", "10.0.0.1", 22, "root", true).await.unwrap();
        }

        let ids: HashSet<String> = registry.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);

        let a = registry.add("a", "10.0.0.1", 22, "root", true).await.unwrap();
        let b = registry.add("b", "10.0.0.2", 22, "root", true).await.unwrap();

        assert!(registry.remove(&a.id).await.unwrap());
        assert!(!registry.remove(&a.id).await.unwrap());
        assert!(!registry.remove("never-issued").await.unwrap());

        assert_eq!(registry.list(), vec![b]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        let node = registry.add("a", "10.0.0.1", 2222, "deploy", false).await.unwrap();

        let reopened = open_registry(&dir);
        assert_eq!(reopened.list(), vec![node.clone()]);
        assert_eq!(reopened.get(&node.id), Some(node));
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);

        let mut handles = Vec::new();
        for i in 0..10 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .add(&format!("node-{}", i), "10.0.0.1", 22, "root", true)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.list().len(), 10);
        assert_eq!(open_registry(&dir).list().len(), 10);
    }

    #[test]
    fn test_malformed_document_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("nodes.json"), "[{").unwrap();
        assert!(NodeRegistry::open(dir.path().join("nodes.json")).is_err());
    }
}
