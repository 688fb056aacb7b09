// Store module: namespaced persistence shared across execution contexts

pub mod backend;
pub mod permissions;

pub use backend::{
    Change, ChangeFeed, FeedEvent, MemoryStorage, SledStorage, StorageBackend, StoreError,
};
pub use permissions::PermissionStore;
