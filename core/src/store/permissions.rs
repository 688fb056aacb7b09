// Permission result storage
//
// Keeps the last decided result per permission name so the "permanently
// denied" state survives process restarts. Entries are only ever overwritten.

use super::backend::{StorageBackend, StoreError};
use crate::permission::PermissionResult;
use std::sync::Arc;
use tracing::warn;

/// Namespace holding one entry per permission name
pub const PERMISSION_NAMESPACE: &str = "PERMISSION_RESULT";

/// Storage backend for permission results
#[derive(Clone)]
pub enum PermissionStore {
    /// No store reachable (e.g. during teardown); reads are empty, writes no-op
    Unavailable,
    Persistent(Arc<dyn StorageBackend>),
}

impl PermissionStore {
    pub fn unavailable() -> Self {
        Self::Unavailable
    }

    pub fn persistent(backend: Arc<dyn StorageBackend>) -> Self {
        Self::Persistent(backend)
    }

    /// Store a result. Returns only once the write is flushed.
    pub fn put(&self, permission: &str, result: PermissionResult) -> Result<(), StoreError> {
        match self {
            Self::Unavailable => Ok(()),
            Self::Persistent(db) => {
                db.put(
                    PERMISSION_NAMESPACE,
                    permission.as_bytes(),
                    result.as_str().as_bytes(),
                )?;
                db.flush()
            }
        }
    }

    /// Last stored result for `permission`, if any
    pub fn get(&self, permission: &str) -> Result<Option<PermissionResult>, StoreError> {
        match self {
            Self::Unavailable => Ok(None),
            Self::Persistent(db) => {
                let Some(bytes) = db.get(PERMISSION_NAMESPACE, permission.as_bytes())? else {
                    return Ok(None);
                };
                Ok(decode(permission, &bytes))
            }
        }
    }

    /// All stored results, ordered by permission name
    pub fn list(&self) -> Result<Vec<(String, PermissionResult)>, StoreError> {
        match self {
            Self::Unavailable => Ok(Vec::new()),
            Self::Persistent(db) => {
                let mut results = Vec::new();
                for (key, value) in db.scan(PERMISSION_NAMESPACE)? {
                    let name = String::from_utf8_lossy(&key).into_owned();
                    if let Some(result) = decode(&name, &value) {
                        results.push((name, result));
                    }
                }
                results.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(results)
            }
        }
    }
}

fn decode(permission: &str, bytes: &[u8]) -> Option<PermissionResult> {
    let parsed = std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<PermissionResult>().ok());
    if parsed.is_none() {
        warn!("Ignoring unreadable stored result for {}", permission);
    }
    parsed
}
