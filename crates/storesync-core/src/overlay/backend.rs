use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Overlay I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Overlay contents are not a JSON id list: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value string storage the overlay persists through.
pub trait OverlayBackend: Send + Sync {
    fn read(&self, namespace: &str) -> Result<Option<String>, OverlayError>;

    fn write(&self, namespace: &str, contents: &str) -> Result<(), OverlayError>;
}

/// One JSON file per namespace under a directory.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: PathBuf) -> Result<Self, OverlayError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, namespace: &str) -> PathBuf {
        let name: String = namespace
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl OverlayBackend for FileBackend {
    fn read(&self, namespace: &str) -> Result<Option<String>, OverlayError> {
        let path = self.path(namespace);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn write(&self, namespace: &str, contents: &str) -> Result<(), OverlayError> {
        let path = self.path(namespace);
        // Write then rename so a crash never leaves half a file behind
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Process-local storage, for tests and hosts without a writable disk.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlayBackend for MemoryBackend {
    fn read(&self, namespace: &str) -> Result<Option<String>, OverlayError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(namespace).cloned())
    }

    fn write(&self, namespace: &str, contents: &str) -> Result<(), OverlayError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(namespace.to_string(), contents.to_string());
        Ok(())
    }
}
