//! Disjoint sets over photo ids.

use std::collections::{BTreeMap, HashMap};

/// Union-find keyed by photo id; every root is the smallest id in its set
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: HashMap<i64, i64>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` as its own singleton set if it is not already known
    pub fn insert(&mut self, id: i64) {
        self.parent.entry(id).or_insert(id);
    }

    /// Root of the set containing `id`, with path compression
    pub fn find(&mut self, id: i64) -> i64 {
        let mut root = id;
        while let Some(&parent) = self.parent.get(&root) {
            if parent == root {
                break;
            }
            root = parent;
        }

        // Point every node on the way at the root
        let mut node = id;
        while node != root {
            let next = self.parent.get(&node).copied().unwrap_or(root);
            self.parent.insert(node, root);
            node = next;
        }
        root
    }

    /// Merge the sets containing `a` and `b`
    pub fn union(&mut self, a: i64, b: i64) {
        self.insert(a);
        self.insert(b);
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let (keep, fold) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent.insert(fold, keep);
    }

    /// Every set keyed by its root (smallest id), members ascending
    pub fn sets(&mut self) -> BTreeMap<i64, Vec<i64>> {
        let ids: Vec<i64> = self.parent.keys().copied().collect();
        let mut sets: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for id in ids {
            let root = self.find(id);
            sets.entry(root).or_default().push(id);
        }
        for members in sets.values_mut() {
            members.sort_unstable();
        }
        sets
    }
}
