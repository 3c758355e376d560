use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::FleetError;

/// Load a JSON document, or `None` when the file does not exist yet.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FleetError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(FleetError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }

    let doc = serde_json::from_slice(&bytes).map_err(|e| {
        FleetError::Storage(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    Ok(Some(doc))
}

/// Replace `path` with the pretty-printed document.
///
/// The document is written to a temporary file in the same directory and
/// renamed over the target, so readers see either the old or the new version.
pub fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), FleetError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| {
        FleetError::Storage(format!("Failed to create dir {}: {}", dir.display(), e))
    })?;

    let bytes = serde_json::to_vec_pretty(doc)
        .map_err(|e| FleetError::Storage(format!("Failed to serialize document: {}", e)))?;

    let storage_err =
        |e: std::io::Error| FleetError::Storage(format!("Failed to write {}: {}", path.display(), e));

    let mut tmp = NamedTempFile::new_in(dir).map_err(storage_err)?;
    tmp.write_all(&bytes).map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;

    Ok(())
}

/// Helper for blocking file operations (spawn_blocking wrapper)
pub async fn execute_async<F, T>(f: F) -> Result<T, FleetError>
where
    F: FnOnce() -> Result<T, FleetError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FleetError::Storage(format!("Task join error: {}", e)))?
}
