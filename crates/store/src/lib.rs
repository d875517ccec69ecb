//! The single-writer state store.
//!
//! One JSON document backs every durable byte of the gateway. This crate
//! is the only legitimate handle to it: readers run concurrently under a
//! shared lock, writers serialize under the exclusive lock, and every
//! successful write is persisted atomically (write-to-temp + rename)
//! before the lock is released. On write error the in-memory document
//! reverts to the pre-call snapshot, so observers never see a half-applied
//! transaction.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use nx_domain::error::{Error, Result};
use nx_domain::state::StateDoc;

/// Process-wide state store. Cheap to share behind an `Arc`.
pub struct StateStore {
    path: PathBuf,
    state: RwLock<StateDoc>,
}

impl StateStore {
    /// Load the document at `path`, or start from an empty document when
    /// the file does not exist yet. Unknown keys in old documents are
    /// dropped; missing keys default (forward-only migration).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Internal(format!("state document corrupt: {e}")))?
        } else {
            StateDoc::default()
        };

        tracing::info!(path = %path.display(), "state store loaded");

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Run `f` against a read view. Readers do not block each other.
    pub fn read<R>(&self, f: impl FnOnce(&StateDoc) -> R) -> R {
        f(&self.state.read())
    }

    /// Run `f` against the mutable document under the exclusive lock.
    ///
    /// On `Ok`, the mutated document is serialized and atomically
    /// persisted before the lock is released; a persistence failure also
    /// rolls back. On `Err`, the in-memory document reverts to the
    /// pre-call snapshot and nothing is written.
    pub fn write<R>(&self, f: impl FnOnce(&mut StateDoc) -> Result<R>) -> Result<R> {
        let mut guard = self.state.write();
        let snapshot = guard.clone();

        match f(&mut guard) {
            Ok(value) => {
                if let Err(e) = persist(&self.path, &guard) {
                    *guard = snapshot;
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                *guard = snapshot;
                Err(e)
            }
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Serialize `doc` and atomically replace the file at `path`.
/// The temp file is created in the same directory so the rename cannot
/// cross filesystems, and the file ends up mode 0600.
fn persist(path: &Path, doc: &StateDoc) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("state path has no parent: {}", path.display())))?;

    let json = serde_json::to_vec_pretty(doc)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    tmp.persist(path)
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}
