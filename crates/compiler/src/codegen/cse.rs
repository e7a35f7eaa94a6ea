//! Common-subexpression cache over identifier pairs
//!
//! Conservative by construction: only pure binary operations whose
//! operands are both bare identifiers are keyed. The cached value lives
//! in one reserved scratch register, so a hit requires the key to be
//! the register's current occupant; the key table remembers which
//! computations are eligible, bounded at 32 entries per function.
//!
//! `r11` is caller-saved and clobbered by `syscall`, so the occupant is
//! dropped at every call or syscall emission, at control-flow
//! boundaries, and whenever an operand variable is stored to. The whole
//! cache is flushed at function entry.

use crate::ast::BinOp;

/// Key table capacity per function.
pub(super) const CSE_CAPACITY: usize = 32;

/// The reserved scratch register holding the most recent cached value.
pub(super) const CSE_SCRATCH: &str = "r11";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CseKey {
    pub left: String,
    pub op: BinOp,
    pub right: String,
}

#[derive(Debug, Default)]
pub(super) struct CseCache {
    /// Computations seen this function, in first-seen order
    keys: Vec<CseKey>,
    /// Key whose value currently sits in the scratch register
    live: Option<CseKey>,
}

impl CseCache {
    pub fn new() -> Self {
        CseCache::default()
    }

    /// Drop everything; called at function entry.
    pub fn flush(&mut self) {
        self.keys.clear();
        self.live = None;
    }

    /// True when the scratch register currently holds this computation.
    pub fn hit(&self, key: &CseKey) -> bool {
        self.live.as_ref() == Some(key)
    }

    /// Record a freshly computed value as the scratch occupant.
    /// Returns false when the key table is full and the key is new;
    /// the computation is then left uncached.
    pub fn record(&mut self, key: CseKey) -> bool {
        if !self.keys.contains(&key) {
            if self.keys.len() >= CSE_CAPACITY {
                return false;
            }
            self.keys.push(key.clone());
        }
        self.live = Some(key);
        true
    }

    /// The scratch register does not survive calls, syscalls, or
    /// control-flow merges.
    pub fn invalidate_scratch(&mut self) {
        self.live = None;
    }

    /// A store to `name` invalidates every computation reading it.
    pub fn invalidate_var(&mut self, name: &str) {
        self.keys.retain(|k| k.left != name && k.right != name);
        if self
            .live
            .as_ref()
            .is_some_and(|k| k.left == name || k.right == name)
        {
            self.live = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(l: &str, op: BinOp, r: &str) -> CseKey {
        CseKey {
            left: l.to_string(),
            op,
            right: r.to_string(),
        }
    }

    #[test]
    fn test_hit_requires_recorded_occupant() {
        let mut cache = CseCache::new();
        let k = key("a", BinOp::Mul, "b");
        assert!(!cache.hit(&k));
        assert!(cache.record(k.clone()));
        assert!(cache.hit(&k));
        // a different computation takes the register over
        let other = key("c", BinOp::Add, "d");
        cache.record(other.clone());
        assert!(!cache.hit(&k));
        assert!(cache.hit(&other));
    }

    #[test]
    fn test_store_to_operand_invalidates() {
        let mut cache = CseCache::new();
        let k = key("a", BinOp::Mul, "b");
        cache.record(k.clone());
        cache.invalidate_var("b");
        assert!(!cache.hit(&k));
    }

    #[test]
    fn test_scratch_invalidation_keeps_keys() {
        let mut cache = CseCache::new();
        let k = key("a", BinOp::Mul, "b");
        cache.record(k.clone());
        cache.invalidate_scratch();
        assert!(!cache.hit(&k));
        // re-recording a known key does not consume capacity
        assert!(cache.record(k.clone()));
        assert!(cache.hit(&k));
    }

    #[test]
    fn test_capacity_bound() {
        let mut cache = CseCache::new();
        for i in 0..CSE_CAPACITY {
            assert!(cache.record(key(&format!("a{}", i), BinOp::Add, "b")));
        }
        // table full: a brand-new key is left uncached
        assert!(!cache.record(key("fresh", BinOp::Add, "b")));
        // but known keys still work
        assert!(cache.record(key("a0", BinOp::Add, "b")));
    }

    #[test]
    fn test_flush_clears_everything() {
        let mut cache = CseCache::new();
        cache.record(key("a", BinOp::Mul, "b"));
        cache.flush();
        assert!(!cache.hit(&key("a", BinOp::Mul, "b")));
    }
}
