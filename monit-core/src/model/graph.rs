//! Per-walk traversal state and the global control lock.
//!
//! REDESIGN FLAG (spec §9): the original design keeps two sentinel fields,
//! `visited` and `depend_visited`, directly on every service and resets
//! them before each top-level walk. That shares mutable state on the graph
//! across unrelated calls and is easy to leave dirty on an early return.
//! Here a [`VisitSet`] is built fresh by the caller of `control()` for the
//! duration of one top-level walk and dropped at the end of it — there is
//! nothing to reset, because there is nothing left over.

use std::collections::HashSet;

use tokio::sync::{Mutex, MutexGuard};

use crate::model::ServiceName;

/// Ephemeral, per-walk visitation marks. One `VisitSet` is created at the
/// start of a top-level `control()` call and discarded at the end; two
/// concurrent walks never observe each other's marks because each gets its
/// own set (ordering between them is instead provided by [`ControlLock`]).
#[derive(Debug, Default)]
pub struct VisitSet {
    visited: HashSet<ServiceName>,
    depend_visited: HashSet<ServiceName>,
}

impl VisitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_visited(&mut self, name: &str) -> bool {
        self.visited.insert(name.to_string())
    }

    pub fn is_visited(&self, name: &str) -> bool {
        self.visited.contains(name)
    }

    pub fn mark_depend_visited(&mut self, name: &str) -> bool {
        self.depend_visited.insert(name.to_string())
    }

    pub fn is_depend_visited(&self, name: &str) -> bool {
        self.depend_visited.contains(name)
    }
}

/// The "global control lock" spec §5 requires: held for the duration of
/// one top-level `control()` walk so two concurrent calls on overlapping
/// subgraphs serialize, and so the validator and control engine never
/// mutate service state concurrently.
#[derive(Debug, Default)]
pub struct ControlLock(Mutex<()>);

impl ControlLock {
    pub fn new() -> Self {
        Self(Mutex::new(()))
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_set_starts_empty_every_time() {
        let mut set = VisitSet::new();
        assert!(!set.is_visited("a"));
        set.mark_visited("a");
        assert!(set.is_visited("a"));

        // A fresh set for the "next walk" has no memory of the last one.
        let fresh = VisitSet::new();
        assert!(!fresh.is_visited("a"));
    }

    #[tokio::test]
    async fn control_lock_serializes_two_walks() {
        let lock = std::sync::Arc::new(ControlLock::new());
        let l2 = lock.clone();
        let guard = lock.acquire().await;
        let handle = tokio::spawn(async move {
            let _g = l2.acquire().await;
        });
        // The spawned task cannot proceed while we hold the guard.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }
}
