// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;
use std::slice;

use crate::util::bit_vec::{BitIter, BitVec, Idx};

const SMALL_SET_CAPACITY: usize = 32;

/// Sets of instance indices. Points-to sets only grow during solving, so
/// removal is limited to whole-set operations.
pub trait PointsToSet<T> {
    type Iter<'a>: Iterator<Item = T>
    where
        Self: 'a;

    fn new() -> Self;
    fn clear(&mut self);
    fn count(&self) -> usize;
    fn contains(&self, elem: T) -> bool;
    fn is_empty(&self) -> bool;
    fn superset(&self, other: &Self) -> bool;
    fn insert(&mut self, elem: T) -> bool;
    fn union(&mut self, other: &Self) -> bool;
    fn subtract(&mut self, other: &Self) -> bool;
    fn intersect(&mut self, other: &Self) -> bool;
    fn iter<'a>(&'a self) -> Self::Iter<'a>;
}

/// Points-to set stored as an unsorted vector while small, and as a bit
/// vector once it outgrows `SMALL_SET_CAPACITY`.
#[derive(Clone)]
pub struct HybridPointsToSet<T> {
    points_to: HybridSet<T>,
}

impl<T: Idx> HybridPointsToSet<T> {
    /// Iterates over the elements of `self` that are not in `excluded`.
    pub fn iter_excluding<'a>(&'a self, excluded: &'a HybridPointsToSet<T>) -> impl Iterator<Item = T> + 'a {
        self.iter().filter(move |elem| !excluded.contains(*elem))
    }

    /// The elements of `self` not in `excluded`, as a new set.
    pub fn difference(&self, excluded: &HybridPointsToSet<T>) -> HybridPointsToSet<T> {
        let mut result = self.clone();
        result.subtract(excluded);
        result
    }

    pub fn to_sorted_vec(&self) -> Vec<T> {
        let mut elems: Vec<T> = self.iter().collect();
        elems.sort();
        elems
    }
}

impl<T: Idx> Default for HybridPointsToSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Idx> PartialEq for HybridPointsToSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.count() == other.count() && self.superset(other)
    }
}

impl<T: Idx> Eq for HybridPointsToSet<T> {}

impl<T: Idx> fmt::Debug for HybridPointsToSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.to_sorted_vec()).finish()
    }
}

impl<'a, T: Idx> IntoIterator for &'a HybridPointsToSet<T> {
    type Item = T;
    type IntoIter = HybridIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Idx> FromIterator<T> for HybridPointsToSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for elem in iter {
            set.insert(elem);
        }
        set
    }
}

impl<T: Idx> PointsToSet<T> for HybridPointsToSet<T> {
    fn new() -> Self {
        HybridPointsToSet {
            points_to: HybridSet::new(),
        }
    }

    fn clear(&mut self) {
        self.points_to.clear();
    }

    fn count(&self) -> usize {
        self.points_to.count()
    }

    fn contains(&self, elem: T) -> bool {
        self.points_to.contains(elem)
    }

    fn is_empty(&self) -> bool {
        self.points_to.is_empty()
    }

    fn superset(&self, other: &HybridPointsToSet<T>) -> bool {
        self.points_to.superset(&other.points_to)
    }

    /// Returns true if `elem` was not already present.
    fn insert(&mut self, elem: T) -> bool {
        self.points_to.insert(elem)
    }

    fn union(&mut self, other: &HybridPointsToSet<T>) -> bool {
        self.points_to.union(&other.points_to)
    }

    fn subtract(&mut self, other: &HybridPointsToSet<T>) -> bool {
        self.points_to.subtract(&other.points_to)
    }

    fn intersect(&mut self, other: &HybridPointsToSet<T>) -> bool {
        self.points_to.intersect(&other.points_to)
    }

    type Iter<'a> = HybridIter<'a, T>;
    fn iter(&self) -> HybridIter<'_, T> {
        self.points_to.iter()
    }
}

#[derive(Clone)]
enum HybridSet<T> {
    SmallSet(Vec<T>),
    LargeSet(BitVec<T>),
}

impl<T: Idx> HybridSet<T> {
    fn new() -> Self {
        HybridSet::SmallSet(Vec::new())
    }

    fn clear(&mut self) {
        *self = HybridSet::SmallSet(Vec::new());
    }

    fn count(&self) -> usize {
        match self {
            HybridSet::SmallSet(small) => small.len(),
            HybridSet::LargeSet(large) => large.count(),
        }
    }

    fn contains(&self, elem: T) -> bool {
        match self {
            HybridSet::SmallSet(small) => small.contains(&elem),
            HybridSet::LargeSet(large) => large.contains(elem),
        }
    }

    fn superset(&self, other: &HybridSet<T>) -> bool {
        match (self, other) {
            (HybridSet::LargeSet(self_large), HybridSet::LargeSet(other_large)) => self_large.superset(other_large),
            _ => other.iter().all(|elem| self.contains(elem)),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            HybridSet::SmallSet(small) => small.is_empty(),
            HybridSet::LargeSet(large) => large.is_empty(),
        }
    }

    fn to_large(small: &[T]) -> BitVec<T> {
        small.iter().copied().collect()
    }

    fn insert(&mut self, elem: T) -> bool {
        match self {
            HybridSet::SmallSet(small) if small.contains(&elem) => false,
            HybridSet::SmallSet(small) if small.len() < SMALL_SET_CAPACITY => {
                small.push(elem);
                true
            }
            HybridSet::SmallSet(small) => {
                let mut large = Self::to_large(small);
                large.insert(elem);
                *self = HybridSet::LargeSet(large);
                true
            }
            HybridSet::LargeSet(large) => large.insert(elem),
        }
    }

    fn iter(&self) -> HybridIter<'_, T> {
        match self {
            HybridSet::SmallSet(small) => HybridIter::SmallIter(small.iter()),
            HybridSet::LargeSet(large) => HybridIter::LargeIter(large.iter()),
        }
    }

    fn union(&mut self, other: &HybridSet<T>) -> bool {
        match (&mut *self, other) {
            (HybridSet::LargeSet(self_large), HybridSet::LargeSet(other_large)) => self_large.union(other_large),
            (HybridSet::SmallSet(self_small), HybridSet::LargeSet(other_large)) => {
                let mut large = Self::to_large(self_small);
                let changed = large.union(other_large);
                *self = HybridSet::LargeSet(large);
                changed
            }
            (_, HybridSet::SmallSet(other_small)) => {
                let mut changed = false;
                for &elem in other_small {
                    changed |= self.insert(elem);
                }
                changed
            }
        }
    }

    fn subtract(&mut self, other: &HybridSet<T>) -> bool {
        match (&mut *self, other) {
            (HybridSet::LargeSet(self_large), HybridSet::LargeSet(other_large)) => self_large.subtract(other_large),
            (HybridSet::LargeSet(self_large), HybridSet::SmallSet(other_small)) => {
                let mut changed = false;
                for &elem in other_small {
                    changed |= self_large.remove(elem);
                }
                changed
            }
            (HybridSet::SmallSet(self_small), _) => {
                let before = self_small.len();
                self_small.retain(|&elem| !other.contains(elem));
                before != self_small.len()
            }
        }
    }

    fn intersect(&mut self, other: &HybridSet<T>) -> bool {
        match (&mut *self, other) {
            (HybridSet::LargeSet(self_large), HybridSet::LargeSet(other_large)) => self_large.intersect(other_large),
            (HybridSet::LargeSet(self_large), HybridSet::SmallSet(other_small)) => {
                let before = self_large.count();
                let kept: Vec<T> = other_small.iter().copied().filter(|e| self_large.contains(*e)).collect();
                let changed = kept.len() != before;
                *self = HybridSet::SmallSet(kept);
                changed
            }
            (HybridSet::SmallSet(self_small), _) => {
                let before = self_small.len();
                self_small.retain(|&elem| other.contains(elem));
                before != self_small.len()
            }
        }
    }
}

pub enum HybridIter<'a, T: Idx> {
    SmallIter(slice::Iter<'a, T>),
    LargeIter(BitIter<'a, T>),
}

impl<'a, T: Idx> Iterator for HybridIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self {
            HybridIter::SmallIter(small) => small.next().copied(),
            HybridIter::LargeIter(large) => large.next(),
        }
    }
}
