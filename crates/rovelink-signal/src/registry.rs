//! Role → connection bookkeeping.
//!
//! The registry holds at most one connection per role. Registering a role that is already
//! taken silently replaces the previous occupant. Callers serialize mutations; the relay does
//! this by keeping the registry inside the mutex-guarded [`crate::router::MessageRouter`].

use std::collections::HashMap;

use rovelink_common::Role;
use uuid::Uuid;

/// Opaque id of one transport connection to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: HashMap<Role, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `role` to `conn`, returning the connection it displaced.
    ///
    /// Re-registering the current occupant is not a displacement and returns `None`.
    pub fn register(&mut self, role: Role, conn: ConnectionId) -> Option<ConnectionId> {
        self.slots
            .insert(role, conn)
            .filter(|previous| *previous != conn)
    }

    /// Removes `conn` from every role slot it occupies and returns those roles.
    pub fn unregister(&mut self, conn: ConnectionId) -> Vec<Role> {
        let mut removed = Vec::new();
        self.slots.retain(|role, occupant| {
            if *occupant == conn {
                removed.push(*role);
                false
            } else {
                true
            }
        });
        removed.sort();
        removed
    }

    pub fn lookup(&self, role: Role) -> Option<ConnectionId> {
        self.slots.get(&role).copied()
    }

    /// Role held by `conn`, or `None` while it is unassigned.
    pub fn role_of(&self, conn: ConnectionId) -> Option<Role> {
        self.slots
            .iter()
            .find(|(_, occupant)| **occupant == conn)
            .map(|(role, _)| *role)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{thread_rng, Rng};

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();

        assert_eq!(registry.lookup(Role::Device), None);
        assert_eq!(registry.register(Role::Device, conn), None);
        assert_eq!(registry.lookup(Role::Device), Some(conn));
        assert_eq!(registry.role_of(conn), Some(Role::Device));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ConnectionRegistry::new();
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        registry.register(Role::Device, first);
        assert_eq!(registry.register(Role::Device, second), Some(first));
        assert_eq!(registry.lookup(Role::Device), Some(second));
        assert_eq!(registry.role_of(first), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_same_connection_is_not_a_replacement() {
        let mut registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();

        registry.register(Role::Device, conn);
        assert_eq!(registry.register(Role::Device, conn), None);
    }

    #[test]
    fn test_unregister_clears_slot() {
        let mut registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();

        registry.register(Role::Device, conn);
        assert_eq!(registry.unregister(conn), vec![Role::Device]);
        assert_eq!(registry.lookup(Role::Device), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_of_displaced_connection_keeps_new_occupant() {
        let mut registry = ConnectionRegistry::new();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        registry.register(Role::Device, old);
        registry.register(Role::Device, new);
        assert!(registry.unregister(old).is_empty());
        assert_eq!(registry.lookup(Role::Device), Some(new));
    }

    #[test]
    fn test_random_sequences_track_most_recent_registration() {
        let mut rng = thread_rng();
        let pool: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::new()).collect();

        for _ in 0..500 {
            let mut registry = ConnectionRegistry::new();
            let mut expected: Option<ConnectionId> = None;

            for _ in 0..32 {
                let conn = pool[rng.gen_range(0..pool.len())];
                if rng.gen_bool(0.6) {
                    registry.register(Role::Device, conn);
                    expected = Some(conn);
                } else {
                    registry.unregister(conn);
                    if expected == Some(conn) {
                        expected = None;
                    }
                }
                assert_eq!(registry.lookup(Role::Device), expected);
            }
        }
    }
}
