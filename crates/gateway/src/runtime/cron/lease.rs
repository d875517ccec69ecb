//! File leases — one slot file per unit of a job's concurrency budget.
//!
//! Path: `<data>/cron-leases/<base64url(job_id)>/slot-<k>.json`, mode
//! 0600. Exclusive create (`O_CREAT|O_EXCL`) is the mutex, so two
//! processes on the same data dir contend correctly. Slots whose
//! `expires_at` has passed are reclaimed lazily on acquisition, which
//! makes a crashed run self-healing. Release only deletes the file when
//! the stored `lease_id` still matches the caller's, so a lease that was
//! GC'd and re-issued is never killed by its previous owner.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nx_domain::error::{Error, Result};

/// Grace added on top of the job timeout before a slot is reclaimable.
const TTL_MARGIN_SECS: u64 = 30;
const MIN_TTL_SECS: u64 = 30;

/// On-disk lease slot record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseSlot {
    pub lease_id: String,
    pub job_id: String,
    pub owner: String,
    pub slot: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A held lease. Release explicitly with [`release`]; an unreleased
/// lease expires on its own after the TTL.
#[derive(Debug)]
pub struct LeaseHandle {
    pub path: PathBuf,
    pub lease_id: String,
    pub slot: u32,
}

/// Lease TTL for a job: `timeout + 30s`, at least 30s.
pub fn lease_ttl(timeout_seconds: u64) -> chrono::Duration {
    chrono::Duration::seconds((timeout_seconds + TTL_MARGIN_SECS).max(MIN_TTL_SECS) as i64)
}

/// Per-job lease directory under `root`.
pub fn job_lease_dir(root: &Path, job_id: &str) -> PathBuf {
    root.join(URL_SAFE_NO_PAD.encode(job_id.as_bytes()))
}

fn slot_path(root: &Path, job_id: &str, slot: u32) -> PathBuf {
    job_lease_dir(root, job_id).join(format!("slot-{slot}.json"))
}

/// Create the slot file exclusively, mode 0600. `AlreadyExists` means
/// the slot is held.
fn create_exclusive(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Try to acquire one of the job's `max_concurrency` slots.
///
/// For each slot: GC the file if its lease expired, then attempt an
/// exclusive create. All slots taken means the concurrency budget is
/// exhausted.
pub fn acquire(
    root: &Path,
    job_id: &str,
    max_concurrency: u32,
    ttl: chrono::Duration,
    owner: &str,
) -> Result<LeaseHandle> {
    let dir = job_lease_dir(root, job_id);
    std::fs::create_dir_all(&dir)?;

    let now = Utc::now();
    for slot in 0..max_concurrency.max(1) {
        let path = slot_path(root, job_id, slot);

        if path.exists() {
            let expired = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<LeaseSlot>(&raw).ok())
                .map_or(true, |lease| lease.expires_at < now);
            if expired {
                tracing::debug!(job_id, slot, "reclaiming expired lease slot");
                let _ = std::fs::remove_file(&path);
            }
        }

        let mut file = match create_exclusive(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::Io(e)),
        };

        let lease = LeaseSlot {
            lease_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            owner: owner.to_string(),
            slot,
            acquired_at: now,
            expires_at: now + ttl,
        };
        let json = serde_json::to_vec_pretty(&lease)?;
        file.write_all(&json)?;
        file.flush()?;

        tracing::debug!(job_id, slot, lease_id = %lease.lease_id, "lease acquired");
        return Ok(LeaseHandle {
            path,
            lease_id: lease.lease_id,
            slot,
        });
    }

    Err(Error::CronMaxConcurrencyReached(max_concurrency))
}

/// Release a held lease. Only deletes the slot file when its `lease_id`
/// still matches; a mismatch means the lease was GC'd and re-issued to
/// another owner, and must be left alone.
pub fn release(handle: &LeaseHandle) {
    let current = std::fs::read_to_string(&handle.path)
        .ok()
        .and_then(|raw| serde_json::from_str::<LeaseSlot>(&raw).ok());

    match current {
        Some(lease) if lease.lease_id == handle.lease_id => {
            if let Err(e) = std::fs::remove_file(&handle.path) {
                tracing::warn!(path = %handle.path.display(), error = %e, "lease release failed");
            }
        }
        Some(_) => {
            tracing::debug!(
                path = %handle.path.display(),
                "lease was re-issued to another owner; leaving slot file"
            );
        }
        None => {}
    }
}
