//! Token persistence backed by a JSON file.

use beacon_core::TokenStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A [`TokenStore`] persisted as one JSON object.
///
/// The file is read once at construction and rewritten on every `set`.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileTokenStore {
    /// Open the store at `path`.
    ///
    /// A missing file is an empty store. An unreadable or malformed file is
    /// logged and treated as empty; it is replaced on the next write.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring malformed token file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read token file");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = values.len(), "Token store loaded");

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(values)?;
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, body)?;
        std::fs::rename(&staging, &self.path)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }
}
