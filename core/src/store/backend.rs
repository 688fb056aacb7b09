// Storage abstraction shared by every execution context
//
// Values live under a namespace (one sled tree per namespace). Any context
// holding the backend sees the same data, and every committed insert or
// removal is fanned out to the watchers of that namespace.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A committed write, as seen by a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Inserted { key: Vec<u8>, value: Vec<u8> },
    Removed { key: Vec<u8> },
}

impl Change {
    pub fn key(&self) -> &[u8] {
        match self {
            Change::Inserted { key, .. } | Change::Removed { key } => key,
        }
    }
}

/// Result of waiting on a change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Change(Change),
    /// Nothing arrived before the timeout
    Idle,
    /// The backend went away; no further changes will arrive
    Closed,
}

/// Blocking stream of changes for one namespace
pub trait ChangeFeed: Send {
    fn next_timeout(&mut self, timeout: Duration) -> FeedEvent;
}

/// Unified storage trait for namespaced, watchable persistence
pub trait StorageBackend: Send + Sync {
    fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn remove(&self, namespace: &str, key: &[u8]) -> Result<(), StoreError>;

    /// Atomically replace `current` with `new`.
    ///
    /// Returns `false` without writing when the stored value no longer
    /// equals `current` (`None` meaning "absent").
    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &[u8],
        current: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError>;

    fn scan(&self, namespace: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Open a change feed for `namespace`. Changes committed after this call
    /// returns are guaranteed to be delivered to the feed.
    fn watch(&self, namespace: &str) -> Result<Box<dyn ChangeFeed>, StoreError>;

    fn flush(&self) -> Result<(), StoreError>;
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

type Namespaces = HashMap<String, HashMap<Vec<u8>, Vec<u8>>>;

struct Watcher {
    id: u64,
    namespace: String,
    tx: Sender<Change>,
}

type Watchers = Arc<Mutex<Vec<Watcher>>>;

/// In-memory storage, used when no storage path is configured and in tests
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<Namespaces>>,
    watchers: Watchers,
    next_watcher: Arc<AtomicU64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live watchers on `namespace`
    pub fn watcher_count(&self, namespace: &str) -> usize {
        self.watchers
            .lock()
            .iter()
            .filter(|w| w.namespace == namespace)
            .count()
    }

    fn notify(&self, namespace: &str, change: Change) {
        for watcher in self.watchers.lock().iter() {
            if watcher.namespace == namespace {
                let _ = watcher.tx.send(change.clone());
            }
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        // Notify under the write lock so watchers observe writes in commit order
        self.notify(
            namespace,
            Change::Inserted {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        );
        Ok(())
    }

    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .data
            .read()
            .get(namespace)
            .and_then(|tree| tree.get(key))
            .cloned())
    }

    fn remove(&self, namespace: &str, key: &[u8]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        let removed = data
            .get_mut(namespace)
            .and_then(|tree| tree.remove(key))
            .is_some();
        if removed {
            self.notify(namespace, Change::Removed { key: key.to_vec() });
        }
        Ok(())
    }

    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &[u8],
        current: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let mut data = self.data.write();
        let tree = data.entry(namespace.to_string()).or_default();
        if tree.get(key).map(Vec::as_slice) != current {
            return Ok(false);
        }
        tree.insert(key.to_vec(), new.to_vec());
        self.notify(
            namespace,
            Change::Inserted {
                key: key.to_vec(),
                value: new.to_vec(),
            },
        );
        Ok(true)
    }

    fn scan(&self, namespace: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut results: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .read()
            .get(namespace)
            .map(|tree| tree.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        results.sort();
        Ok(results)
    }

    fn watch(&self, namespace: &str) -> Result<Box<dyn ChangeFeed>, StoreError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.watchers.lock().push(Watcher {
            id,
            namespace: namespace.to_string(),
            tx,
        });
        Ok(Box::new(MemoryFeed {
            id,
            rx,
            watchers: Arc::downgrade(&self.watchers),
        }))
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryFeed {
    id: u64,
    rx: Receiver<Change>,
    watchers: Weak<Mutex<Vec<Watcher>>>,
}

impl Drop for MemoryFeed {
    fn drop(&mut self) {
        if let Some(watchers) = self.watchers.upgrade() {
            watchers.lock().retain(|w| w.id != self.id);
        }
    }
}

impl ChangeFeed for MemoryFeed {
    fn next_timeout(&mut self, timeout: Duration) -> FeedEvent {
        match self.rx.recv_timeout(timeout) {
            Ok(change) => FeedEvent::Change(change),
            Err(RecvTimeoutError::Timeout) => FeedEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => FeedEvent::Closed,
        }
    }
}

// ============================================================================
// SLED BACKEND
// ============================================================================

pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(backend_err)?;
        Ok(Self { db })
    }

    fn tree(&self, namespace: &str) -> Result<sled::Tree, StoreError> {
        self.db.open_tree(namespace).map_err(backend_err)
    }
}

fn backend_err(e: sled::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl StorageBackend for SledStorage {
    fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tree(namespace)?.insert(key, value).map_err(backend_err)?;
        Ok(())
    }

    fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.tree(namespace)?.get(key).map_err(backend_err)?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn remove(&self, namespace: &str, key: &[u8]) -> Result<(), StoreError> {
        self.tree(namespace)?.remove(key).map_err(backend_err)?;
        Ok(())
    }

    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &[u8],
        current: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let swapped = self
            .tree(namespace)?
            .compare_and_swap(key, current, Some(new))
            .map_err(backend_err)?;
        Ok(swapped.is_ok())
    }

    fn scan(&self, namespace: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        for item in self.tree(namespace)?.iter() {
            let (k, v) = item.map_err(backend_err)?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    fn watch(&self, namespace: &str) -> Result<Box<dyn ChangeFeed>, StoreError> {
        let subscriber = self.tree(namespace)?.watch_prefix(Vec::<u8>::new());
        Ok(Box::new(SledFeed { subscriber }))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend_err)?;
        Ok(())
    }
}

struct SledFeed {
    subscriber: sled::Subscriber,
}

impl ChangeFeed for SledFeed {
    fn next_timeout(&mut self, timeout: Duration) -> FeedEvent {
        use std::sync::mpsc::RecvTimeoutError as SledTimeout;

        match self.subscriber.next_timeout(timeout) {
            Ok(sled::Event::Insert { key, value }) => FeedEvent::Change(Change::Inserted {
                key: key.to_vec(),
                value: value.to_vec(),
            }),
            Ok(sled::Event::Remove { key }) => {
                FeedEvent::Change(Change::Removed { key: key.to_vec() })
            }
            Err(SledTimeout::Timeout) => FeedEvent::Idle,
            Err(SledTimeout::Disconnected) => FeedEvent::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const NS: &str = "TEST_NAMESPACE";

    #[test]
    fn test_memory_namespaces_are_isolated() {
        let storage = MemoryStorage::new();
        storage.put("A", b"key", b"one").unwrap();
        storage.put("B", b"key", b"two").unwrap();

        assert_eq!(storage.get("A", b"key").unwrap(), Some(b"one".to_vec()));
        assert_eq!(storage.get("B", b"key").unwrap(), Some(b"two".to_vec()));
        assert_eq!(storage.get("C", b"key").unwrap(), None);
    }

    #[test]
    fn test_memory_compare_and_swap() {
        let storage = MemoryStorage::new();

        assert!(storage.compare_and_swap(NS, b"k", None, b"v1").unwrap());
        assert!(!storage.compare_and_swap(NS, b"k", None, b"v2").unwrap());
        assert!(storage
            .compare_and_swap(NS, b"k", Some(b"v1"), b"v2")
            .unwrap());
        assert_eq!(storage.get(NS, b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_memory_watch_sees_inserts_and_removes() {
        let storage = MemoryStorage::new();
        let mut feed = storage.watch(NS).unwrap();

        storage.put(NS, b"k", b"v").unwrap();
        storage.put("OTHER", b"k", b"ignored").unwrap();
        storage.remove(NS, b"k").unwrap();

        let timeout = Duration::from_millis(200);
        assert_eq!(
            feed.next_timeout(timeout),
            FeedEvent::Change(Change::Inserted {
                key: b"k".to_vec(),
                value: b"v".to_vec()
            })
        );
        assert_eq!(
            feed.next_timeout(timeout),
            FeedEvent::Change(Change::Removed { key: b"k".to_vec() })
        );
        assert_eq!(feed.next_timeout(Duration::from_millis(20)), FeedEvent::Idle);
    }

    #[test]
    fn test_memory_dropped_feed_is_pruned() {
        let storage = MemoryStorage::new();
        let feed = storage.watch(NS).unwrap();
        assert_eq!(storage.watcher_count(NS), 1);

        drop(feed);
        assert_eq!(storage.watcher_count(NS), 0);
    }

    #[test]
    fn test_sled_storage_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let storage = SledStorage::new(path.to_str().unwrap()).unwrap();

        storage.put(NS, b"b", b"2").unwrap();
        storage.put(NS, b"a", b"1").unwrap();
        storage.flush().unwrap();

        assert_eq!(storage.get(NS, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(
            storage.scan(NS).unwrap(),
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec())
            ]
        );

        storage.remove(NS, b"a").unwrap();
        assert_eq!(storage.get(NS, b"a").unwrap(), None);
    }

    #[test]
    fn test_sled_compare_and_swap_and_watch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let storage = SledStorage::new(path.to_str().unwrap()).unwrap();
        let mut feed = storage.watch(NS).unwrap();

        assert!(storage.compare_and_swap(NS, b"k", None, b"v1").unwrap());
        assert!(!storage.compare_and_swap(NS, b"k", None, b"v2").unwrap());

        match feed.next_timeout(Duration::from_secs(2)) {
            FeedEvent::Change(change) => {
                assert_eq!(change.key(), b"k");
                assert_eq!(
                    change,
                    Change::Inserted {
                        key: b"k".to_vec(),
                        value: b"v1".to_vec()
                    }
                );
            }
            other => panic!("expected a change, got {:?}", other),
        }
    }
}
