//! Persistence of per-node subscription records.
//!
//! Subscriptions are stored as an ordered list of
//! [`SubscriptionRecord`](crate::types::SubscriptionRecord)s in a facet
//! property of the subscribed node, one record per principal. Unregistering
//! disables a record instead of removing it.

mod locks;
mod store;

pub use locks::KeyedLocks;
pub use store::{SubscriptionChange, SubscriptionStore};
