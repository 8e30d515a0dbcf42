//! Session snapshot persistence.
//!
//! Stores the last known [`SessionSnapshot`] as JSON under the platform
//! config directory so the app can render a logged-in shell immediately on
//! startup. The snapshot is a hint, not a credential: the session store
//! always re-verifies against the server before trusting it.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use pingline_shared::SessionSnapshot;

const SNAPSHOT_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Snapshot store under the platform config directory.
    pub fn new() -> Result<Self> {
        let dir = dirs::config_dir()
            .context("no config directory on this platform")?
            .join("pingline");
        Ok(Self { dir })
    }

    /// Snapshot store rooted at an explicit directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(self.path(), json)
            .with_context(|| format!("writing {}", self.path().display()))?;
        Ok(())
    }

    /// Load the stored snapshot, if any. A corrupt file is treated as
    /// absent and removed.
    pub fn load(&self) -> Option<SessionSnapshot> {
        let json = fs::read_to_string(self.path()).ok()?;
        match serde_json::from_str(&json) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "discarding corrupt session snapshot");
                self.remove();
                None
            }
        }
    }

    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(self.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "failed to remove session snapshot");
            }
        }
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }
}
