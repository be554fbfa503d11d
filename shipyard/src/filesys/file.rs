//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::ShipyardError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, ShipyardError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, ShipyardError> {
        let contents = self.read_string().await?;
        serde_json::from_str(&contents).map_err(|e| {
            ShipyardError::StorageError(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Read JSON, falling back to `T::default()` when the file is missing
    pub async fn read_json_or_default<T: DeserializeOwned + Default>(
        &self,
    ) -> Result<T, ShipyardError> {
        if !self.exists().await {
            return Ok(T::default());
        }
        self.read_json().await
    }

    /// Replace the file with the JSON encoding of `value`.
    ///
    /// Readers see either the previous or the new contents.
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), ShipyardError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Atomic write using a temporary file in the same directory
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), ShipyardError> {
        self.ensure_parent().await?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Append one JSON document as a line
    pub async fn append_json_line<T: Serialize>(&self, value: &T) -> Result<(), ShipyardError> {
        self.ensure_parent().await?;

        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every JSON line, skipping blank lines.
    ///
    /// A torn trailing line (crash mid-append) is ignored; corruption anywhere
    /// else is an error.
    pub async fn read_json_lines<T: DeserializeOwned>(&self) -> Result<Vec<T>, ShipyardError> {
        if !self.exists().await {
            return Ok(Vec::new());
        }
        let contents = self.read_string().await?;
        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();

        let mut values = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(value) => values.push(value),
                Err(_) if idx + 1 == lines.len() && !contents.ends_with('\n') => break,
                Err(e) => {
                    return Err(ShipyardError::StorageError(format!(
                        "{}:{}: {}",
                        self.path.display(),
                        idx + 1,
                        e
                    )))
                }
            }
        }
        Ok(values)
    }

    async fn ensure_parent(&self) -> Result<(), ShipyardError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}
