//! Persisted process-wide preferences (active forecast method, active demand
//! method).
//!
//! Read once at startup, mutated only via an explicit setter, never reset
//! mid-session. The in-memory value sits behind an `RwLock` so a method
//! change never corrupts an in-flight read: callers read the setting once per
//! computation and keep using that snapshot.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::errors::EngineResult;

/// A single JSON-persisted preference value.
#[derive(Debug)]
pub struct JsonPrefs<T> {
    path: PathBuf,
    current: RwLock<T>,
}

impl<T> JsonPrefs<T>
where
    T: Serialize + DeserializeOwned + Clone + std::fmt::Debug,
{
    /// Loads the persisted value, falling back to `default` when no file
    /// exists yet. A present-but-unparseable file (including an unknown enum
    /// value) is an error: preferences never silently default.
    pub fn load_or(path: PathBuf, default: T) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let current = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            default
        };
        info!(path = %path.display(), value = ?current, "preference loaded");
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.current.read().expect("prefs lock").clone()
    }

    /// Persists the new value atomically, then swaps it in. Takes effect on
    /// the next computation; in-flight calls keep the snapshot they read.
    pub fn set(&self, value: T) -> EngineResult<()> {
        let payload = serde_json::to_vec_pretty(&value)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;

        let mut current = self.current.write().expect("prefs lock");
        *current = value;
        info!(path = %self.path.display(), value = ?current, "preference updated");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
