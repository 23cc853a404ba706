// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashMap;
use std::hash::Hash;

use super::bit_vec::Idx;

/// A growable bijection between objects and dense indices.
///
/// Indices are handed out in insertion order and never reused.
#[derive(Debug, Clone)]
pub struct IndexMapping<K, I> {
    objects: Vec<K>,
    indices: HashMap<K, I>,
}

impl<K: Clone + Eq + Hash, I: Idx> Default for IndexMapping<K, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash, I: Idx> IndexMapping<K, I> {
    pub fn new() -> Self {
        IndexMapping {
            objects: Vec::new(),
            indices: HashMap::new(),
        }
    }

    /// Returns the index of `object`, adding it first if necessary.
    pub fn add(&mut self, object: K) -> I {
        if let Some(idx) = self.indices.get(&object) {
            return *idx;
        }
        let idx = I::new(self.objects.len());
        self.objects.push(object.clone());
        self.indices.insert(object, idx);
        idx
    }

    #[inline]
    pub fn index_of(&self, object: &K) -> Option<I> {
        self.indices.get(object).copied()
    }

    #[inline]
    pub fn get(&self, idx: I) -> &K {
        &self.objects[idx.index()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &K)> {
        self.objects.iter().enumerate().map(|(i, k)| (I::new(i), k))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indices_are_dense_and_stable() {
        let mut mapping: IndexMapping<String, u32> = IndexMapping::new();
        assert_eq!(mapping.add("a".to_string()), 0);
        assert_eq!(mapping.add("b".to_string()), 1);
        assert_eq!(mapping.add("a".to_string()), 0);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.get(1), "b");
        assert_eq!(mapping.index_of(&"c".to_string()), None);
    }
}
