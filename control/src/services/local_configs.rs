use std::path::PathBuf;

use crate::error::FleetError;
use crate::remote::command::sanitize_filename;

/// Local directory of nginx site configs that push operations read from.
#[derive(Debug, Clone)]
pub struct LocalConfigStore {
    dir: PathBuf,
}

impl LocalConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Sanitized local path for `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, FleetError> {
        Ok(self.dir.join(sanitize_filename(name)?))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, FleetError> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, FleetError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FleetError::NotFound("local config not found".to_string()))
            }
            Err(e) => Err(FleetError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub async fn write(&self, name: &str, content: &[u8]) -> Result<String, FleetError> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            FleetError::Storage(format!("Failed to create {}: {}", self.dir.display(), e))
        })?;
        tokio::fs::write(&path, content).await.map_err(|e| {
            FleetError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;
        sanitize_filename(name)
    }

    /// Regular files in the directory, sorted by name.
    pub async fn list(&self) -> Result<Vec<String>, FleetError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FleetError::Storage(format!(
                    "Failed to list {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FleetError::Storage(e.to_string()))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = TempDir::new().unwrap();
        let store = LocalConfigStore::new(dir.path().join("configs"));

        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.exists("b.conf").await.unwrap());

        store.write("b.conf", b"server {}").await.unwrap();
        store.write("a.conf", b"").await.unwrap();

        assert!(store.exists("b.conf").await.unwrap());
        assert_eq!(store.read("b.conf").await.unwrap(), b"server {}");
        assert_eq!(store.list().await.unwrap(), vec!["a.conf", "b.conf"]);
    }

    #[tokio::test]
    async fn test_names_are_confined_to_the_directory() {
        let dir = TempDir::new().unwrap();
        let store = LocalConfigStore::new(dir.path().join("configs"));

        let written = store.write("../../escape.conf", b"x").await.unwrap();
        assert_eq!(written, "escape.conf");
        assert!(dir.path().join("configs").join("escape.conf").exists());
        assert!(!dir.path().join("escape.conf").exists());

        assert!(matches!(
            store.read("missing.conf").await,
            Err(FleetError::NotFound(_))
        ));
    }
}
