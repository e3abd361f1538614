//! # Synchronization-Root Registry
//!
//! Tracks which repository nodes each principal has chosen to synchronize
//! to a local client, and resolves the roots they may still synchronize.
//!
//! ## Core Concepts
//!
//! - **Subscriptions**: per-node records, one per principal, soft-disabled
//!   on unregistration
//! - **No nesting**: a principal never holds two enabled roots on one
//!   ancestor/descendant chain; registering an ancestor supersedes its
//!   descendant roots, registering below a root is a no-op
//! - **Live filtering**: resolution re-checks read access and lifecycle
//!   state on every cache miss
//! - **Invalidation**: registrations and structural repository changes drop
//!   cached root sets
//!
//! ## Example
//!
//! ```ignore
//! use sync_roots::{MemoryRepository, Principal, RegistryConfig, RootRegistry, Session};
//! use std::sync::Arc;
//!
//! let repo = Arc::new(MemoryRepository::new("default"));
//! let ws = repo.create_node("/", "workspace", "Workspace")?;
//! repo.set_read_access(ws.id, "members", true)?;
//!
//! let registry = RootRegistry::new(RegistryConfig::default());
//! registry.add_repository(repo.clone())?;
//!
//! let session = Session::new(Principal::user("user1").with_group("members"), "default");
//! registry.register_synchronization_root(&session.principal, ws.id, &session)?;
//!
//! let roots = registry.get_synchronization_roots(&session.principal)?;
//! assert!(roots["default"].refs.contains(&ws.id));
//! ```

pub mod cache;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use cache::{CacheKey, RootCache};
pub use error::{RegistryError, Result};
pub use events::{
    DropReason, FeedConfig, FeedFilter, FeedHandle, FeedId, InvalidationScope, RootEvent,
    RootEventBus,
};
pub use hierarchy::{HierarchyResolver, Resolution};
pub use registry::{RegistryConfig, RootRegistry};
pub use repository::{
    ChangeKind, FacetWrite, MemoryRepository, Repository, StructuralChange,
    StructuralChangeListener, DELETED_STATE, PROJECT_STATE,
};
pub use resolver::AccessFilteredResolver;
pub use subscriptions::{KeyedLocks, SubscriptionChange, SubscriptionStore};
pub use types::*;
