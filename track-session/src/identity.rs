//! Identity pool
//!
//! FIFO queue of object ids a reviewer may assign. The pool is refilled with
//! the initial id range at startup and with the tracker's `lost_ids` after each
//! reply; claiming removes the head until the next refill.

use crate::types::ObjectId;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct IdentityPool {
    ids: VecDeque<ObjectId>,
}

impl IdentityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pool contents, preserving the given order
    ///
    /// Repeated ids are dropped after their first occurrence.
    pub fn refill(&mut self, ids: impl IntoIterator<Item = ObjectId>) {
        let mut seen = HashSet::new();
        self.ids.clear();
        for id in ids {
            if seen.insert(id) {
                self.ids.push_back(id);
            } else {
                log::warn!("Ignoring repeated id {} in identity refill", id);
            }
        }
        log::debug!("Identity pool refilled: {:?}", self.ids);
    }

    pub fn peek_next(&self) -> Option<ObjectId> {
        self.ids.front().copied()
    }

    pub fn claim_next(&mut self) -> Option<ObjectId> {
        self.ids.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Current contents, head first
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.ids.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_claim_order() {
        let mut pool = IdentityPool::new();
        pool.refill([5, 6, 7]);

        assert_eq!(pool.peek_next(), Some(5));
        assert_eq!(pool.claim_next(), Some(5));
        assert_eq!(pool.claim_next(), Some(6));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.claim_next(), Some(7));
        assert!(pool.is_empty());
        assert_eq!(pool.claim_next(), None);
        assert_eq!(pool.peek_next(), None);
    }

    #[test]
    fn test_refill_replaces_contents() {
        let mut pool = IdentityPool::new();
        pool.refill([1, 2, 3]);
        pool.claim_next();
        pool.refill([9, 8]);

        assert_eq!(pool.ids().collect::<Vec<_>>(), vec![9, 8]);
    }

    #[test]
    fn test_refill_drops_repeats() {
        let mut pool = IdentityPool::new();
        pool.refill([4, 4, 2, 4]);
        assert_eq!(pool.ids().collect::<Vec<_>>(), vec![4, 2]);
    }
}
