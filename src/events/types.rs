//! Root change feed types.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};

/// Configuration for a feed subscription.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: FeedFilter,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: FeedFilter::all(),
        }
    }
}

/// Filter criteria for feed subscriptions.
#[derive(Clone, Debug, Default)]
pub struct FeedFilter {
    /// Only events about these principals (None = all principals).
    pub principals: Option<Vec<String>>,

    /// Only events about this repository (None = all repositories).
    pub repository: Option<String>,

    /// Include registration events.
    pub include_registrations: bool,

    /// Include cache invalidation events.
    pub include_invalidations: bool,
}

impl FeedFilter {
    /// Registrations of specific principals.
    pub fn principals(names: Vec<String>) -> Self {
        Self {
            principals: Some(names),
            include_registrations: true,
            ..Default::default()
        }
    }

    /// Invalidations only.
    pub fn invalidations() -> Self {
        Self {
            include_invalidations: true,
            ..Default::default()
        }
    }

    /// Everything.
    pub fn all() -> Self {
        Self {
            include_registrations: true,
            include_invalidations: true,
            ..Default::default()
        }
    }
}

/// What an invalidation covered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum InvalidationScope {
    /// One principal in one repository.
    Principal {
        principal: String,
        repository: String,
    },
    /// Every principal in a repository.
    Repository { repository: String },
    /// The whole cache.
    All,
}

impl InvalidationScope {
    pub fn repository(&self) -> Option<&str> {
        match self {
            InvalidationScope::Principal { repository, .. } => Some(repository),
            InvalidationScope::Repository { repository } => Some(repository),
            InvalidationScope::All => None,
        }
    }

    pub fn principal(&self) -> Option<&str> {
        match self {
            InvalidationScope::Principal { principal, .. } => Some(principal),
            _ => None,
        }
    }
}

/// Events emitted by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RootEvent {
    /// A node became an effective root.
    Registered {
        principal: String,
        repository: String,
        node: NodeId,
        path: String,
    },

    /// A root was unregistered.
    Unregistered {
        principal: String,
        repository: String,
        node: NodeId,
    },

    /// A descendant root was disabled by registration of an ancestor.
    Superseded {
        principal: String,
        repository: String,
        node: NodeId,
        by: NodeId,
    },

    /// Cached root sets were dropped; consumers should re-resolve.
    Invalidated { scope: InvalidationScope },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl RootEvent {
    fn principal(&self) -> Option<&str> {
        match self {
            RootEvent::Registered { principal, .. }
            | RootEvent::Unregistered { principal, .. }
            | RootEvent::Superseded { principal, .. } => Some(principal),
            RootEvent::Invalidated { scope } => scope.principal(),
            RootEvent::Dropped { .. } => None,
        }
    }

    fn repository(&self) -> Option<&str> {
        match self {
            RootEvent::Registered { repository, .. }
            | RootEvent::Unregistered { repository, .. }
            | RootEvent::Superseded { repository, .. } => Some(repository),
            RootEvent::Invalidated { scope } => scope.repository(),
            RootEvent::Dropped { .. } => None,
        }
    }

    /// Whether `filter` selects this event.
    ///
    /// Invalidations wider than one principal match every principal filter.
    pub(crate) fn matches(&self, filter: &FeedFilter) -> bool {
        let kind_wanted = match self {
            RootEvent::Invalidated { .. } => filter.include_invalidations,
            RootEvent::Dropped { .. } => true,
            _ => filter.include_registrations,
        };
        if !kind_wanted {
            return false;
        }

        if let (Some(wanted), Some(repository)) = (&filter.repository, self.repository()) {
            if wanted != repository {
                return false;
            }
        }

        if let (Some(names), Some(principal)) = (&filter.principals, self.principal()) {
            if !names.iter().any(|n| n == principal) {
                return false;
            }
        }

        true
    }
}

/// Why a feed subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a feed subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

/// Handle to a feed subscription.
pub struct FeedHandle {
    pub id: FeedId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<RootEvent>,
}

impl FeedHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<RootEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<RootEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<RootEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every event currently buffered.
    pub fn drain(&self) -> Vec<RootEvent> {
        self.receiver.try_iter().collect()
    }
}
