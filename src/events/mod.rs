//! Root change feed.
//!
//! In-process subscriptions to registry events:
//! - Root registrations, unregistrations and supersessions
//! - Cache invalidations (consumers should re-resolve their roots)
//!
//! Subscriptions filter by principal and repository and use bounded
//! buffers; slow subscribers are dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = registry.subscribe(FeedConfig {
//!     filter: FeedFilter::principals(vec!["user1".to_string()]),
//!     ..Default::default()
//! });
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         RootEvent::Registered { node, path, .. } => println!("sync {} at {}", node, path),
//!         RootEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::RootEventBus;
pub use types::{
    DropReason, FeedConfig, FeedFilter, FeedHandle, FeedId, InvalidationScope, RootEvent,
};
