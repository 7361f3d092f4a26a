//! Visited-state set.

use crate::arena::NodeId;
use crate::state::Fingerprint;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::error;

/// Set of visited states, keyed by fingerprint, mapping to the arena
/// node that was expanded for the state.
///
/// Owned by one run of the scheduler: constructed at run start,
/// discarded at run end, grows monotonically in between. Insertion uses
/// the dashmap entry API so check-and-insert is a single atomic step —
/// if two inserters race on the same fingerprint, exactly one wins and
/// the loser sees the winner's node id.
pub struct VisitedSet {
    map: DashMap<Fingerprint, NodeId>,
    /// Different states observed under the same fingerprint.
    collisions: AtomicUsize,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            collisions: AtomicUsize::new(0),
        }
    }

    /// Atomically insert a fingerprint. `Ok(())` if it was new,
    /// `Err(existing)` with the previously inserted node otherwise.
    pub fn insert(&self, fp: Fingerprint, id: NodeId) -> Result<(), NodeId> {
        use dashmap::mapref::entry::Entry;
        match self.map.entry(fp) {
            Entry::Occupied(occupied) => Err(*occupied.get()),
            Entry::Vacant(entry) => {
                entry.insert(id);
                Ok(())
            }
        }
    }

    #[inline]
    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.map.contains_key(fp)
    }

    /// Node id previously inserted for this fingerprint, if any.
    pub fn get(&self, fp: &Fingerprint) -> Option<NodeId> {
        self.map.get(fp).map(|r| *r.value())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Record a fingerprint collision: two structurally different states
    /// with the same fingerprint. Logged once; results may be unsound.
    pub fn note_collision(&self, fp: Fingerprint) {
        let n = self.collisions.fetch_add(1, Ordering::Relaxed);
        if n == 0 {
            error!(
                fingerprint = %fp,
                "fingerprint collision: different states share a fingerprint, results may be unsound"
            );
        }
    }

    #[inline]
    pub fn collisions(&self) -> usize {
        self.collisions.load(Ordering::Relaxed)
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::NodeArena;
    use crate::state::State;
    use strider_model::Value;

    #[test]
    fn test_insert_and_duplicate() {
        let mut arena = NodeArena::new();
        let visited = VisitedSet::new();

        let s1 = State::new(vec![Value::Int(1)], vec![], 0);
        let s2 = State::new(vec![Value::Int(2)], vec![], 0);
        let n1 = arena.push(s1.clone(), None, None, 0);
        let n2 = arena.push(s2.clone(), None, None, 0);

        assert!(visited.insert(s1.fingerprint(), n1).is_ok());
        assert_eq!(visited.insert(s1.fingerprint(), n2), Err(n1));
        assert!(visited.insert(s2.fingerprint(), n2).is_ok());
        assert_eq!(visited.len(), 2);
        assert!(visited.contains(&s1.fingerprint()));
        assert_eq!(visited.get(&s1.fingerprint()), Some(n1));
    }

    #[test]
    fn test_concurrent_insert_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let visited = Arc::new(VisitedSet::new());
        let fp = Fingerprint::from_u64(42);
        let mut handles = vec![];

        for _ in 0..8 {
            let visited = Arc::clone(&visited);
            let mut arena = NodeArena::new();
            let id = arena.push(State::new(vec![], vec![], 0), None, None, 0);
            handles.push(thread::spawn(move || visited.insert(fp, id).is_ok()));
        }

        let winners: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(winners, 1);
        assert_eq!(visited.len(), 1);
    }
}
