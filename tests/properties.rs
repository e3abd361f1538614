//! Property tests for the no-nesting invariant.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use sync_roots::{
    MemoryRepository, NodeId, Principal, RegistryConfig, Repository, RootRegistry, Session,
};

const USERS: [&str; 2] = ["user1", "user2"];

/// Tree used by every case:
///
/// ```text
/// /a
/// /a/b
/// /a/b/c
/// /a/d
/// /e
/// /e/f
/// ```
fn build() -> (Arc<RootRegistry>, Arc<MemoryRepository>, Vec<NodeId>) {
    let repo = Arc::new(MemoryRepository::new("default"));
    let mut nodes = Vec::new();
    for (parent, name) in [
        ("/", "a"),
        ("/a", "b"),
        ("/a/b", "c"),
        ("/a", "d"),
        ("/", "e"),
        ("/e", "f"),
    ] {
        nodes.push(repo.create_node(parent, name, "Folder").unwrap().id);
    }
    repo.set_read_access(repo.root(), "members", true).unwrap();

    let registry = RootRegistry::new(RegistryConfig::default());
    registry.add_repository(repo.clone()).unwrap();
    (registry, repo, nodes)
}

#[derive(Clone, Debug)]
enum Op {
    Register { user: usize, node: usize },
    Unregister { user: usize, node: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..USERS.len(), 0..6usize).prop_map(|(user, node)| Op::Register { user, node }),
        (0..USERS.len(), 0..6usize).prop_map(|(user, node)| Op::Unregister { user, node }),
    ]
}

fn session(user: usize) -> Session {
    Session::new(Principal::user(USERS[user]).with_group("members"), "default")
}

fn is_ancestor(repo: &MemoryRepository, ancestor: NodeId, node: NodeId) -> bool {
    repo.get_ancestors(node)
        .unwrap()
        .iter()
        .any(|a| a.id == ancestor)
}

proptest! {
    #[test]
    fn resolved_roots_never_nest(ops in prop::collection::vec(op(), 1..40)) {
        let (registry, repo, nodes) = build();

        for op in ops {
            match op {
                Op::Register { user, node } => {
                    let s = session(user);
                    registry.register_synchronization_root(&s.principal, nodes[node], &s).unwrap();
                }
                Op::Unregister { user, node } => {
                    let s = session(user);
                    registry.unregister_synchronization_root(&s.principal, nodes[node], &s).unwrap();
                }
            }

            for user in 0..USERS.len() {
                let refs: Vec<NodeId> = registry
                    .get_synchronization_root_references(&session(user))
                    .unwrap()
                    .into_iter()
                    .collect();
                for &x in &refs {
                    for &y in &refs {
                        prop_assert!(!is_ancestor(&repo, x, y));
                    }
                }

                // The cached view agrees with the persisted subscriptions
                let persisted: HashSet<NodeId> = nodes
                    .iter()
                    .copied()
                    .filter(|&n| registry.is_subscribed(USERS[user], "default", n).unwrap())
                    .collect();
                prop_assert_eq!(refs.into_iter().collect::<HashSet<_>>(), persisted);
            }
        }
    }

    #[test]
    fn register_is_idempotent(ops in prop::collection::vec(op(), 0..20), user in 0..2usize, node in 0..6usize) {
        let (registry, _repo, nodes) = build();
        for op in ops {
            if let Op::Register { user, node } = op {
                let s = session(user);
                registry.register_synchronization_root(&s.principal, nodes[node], &s).unwrap();
            }
        }

        let s = session(user);
        registry.register_synchronization_root(&s.principal, nodes[node], &s).unwrap();
        let once = registry.get_synchronization_roots(&s.principal).unwrap();
        registry.register_synchronization_root(&s.principal, nodes[node], &s).unwrap();
        let twice = registry.get_synchronization_roots(&s.principal).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn users_are_independent(ops in prop::collection::vec(op(), 1..30)) {
        let (registry, _repo, nodes) = build();
        let observer = session(1);
        let before = registry.get_synchronization_roots(&observer.principal).unwrap();

        // Only user1 acts
        for op in ops {
            let s = session(0);
            match op {
                Op::Register { node, .. } => {
                    registry.register_synchronization_root(&s.principal, nodes[node], &s).unwrap();
                }
                Op::Unregister { node, .. } => {
                    registry.unregister_synchronization_root(&s.principal, nodes[node], &s).unwrap();
                }
            }
        }

        let after = registry.get_synchronization_roots(&observer.principal).unwrap();
        prop_assert_eq!(before, after);
    }
}
