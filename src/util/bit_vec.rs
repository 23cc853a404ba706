// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! A dense, growable bit vector keyed by newtyped indices, in the manner of
//! `rustc_index::bit_set`. It backs large points-to sets, worklist membership and
//! the root marks of the points-to map.

use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

const WORD_BITS: usize = u64::BITS as usize;

/// A dense index. Newtypes keep the domains of different bit vectors apart.
pub trait Idx: Copy + 'static + Eq + PartialEq + Debug + Hash + Ord {
    fn new(idx: usize) -> Self;

    fn index(self) -> usize;
}

impl Idx for u32 {
    fn new(idx: usize) -> Self {
        u32::try_from(idx).unwrap_or_else(|_| panic!("index {} overflows u32", idx))
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Declares a `u32`-backed index newtype implementing [`Idx`].
#[macro_export]
macro_rules! newtype_index {
    ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        $vis struct $name(u32);

        impl $crate::util::bit_vec::Idx for $name {
            #[inline]
            fn new(idx: usize) -> Self {
                $name(<u32 as $crate::util::bit_vec::Idx>::new(idx))
            }
            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $name {
            #[inline]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// A set of indices stored one bit per index. Trailing zero words are
/// allowed, so equality of two vectors is only meaningful for vectors built
/// the same way; compare sets with [`BitVec::superset`] instead.
#[derive(Eq, PartialEq, Hash)]
pub struct BitVec<T> {
    words: Vec<u64>,
    marker: PhantomData<T>,
}

#[inline]
fn locate(index: usize) -> (usize, u64) {
    (index / WORD_BITS, 1u64 << (index % WORD_BITS))
}

impl<T: Idx> BitVec<T> {
    pub fn new_empty() -> BitVec<T> {
        BitVec {
            words: Vec::new(),
            marker: PhantomData,
        }
    }

    fn grow_to(&mut self, num_words: usize) {
        if self.words.len() < num_words {
            self.words.resize(num_words, 0);
        }
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    #[inline]
    pub fn contains(&self, elem: T) -> bool {
        let (word, mask) = locate(elem.index());
        self.words.get(word).map_or(false, |w| w & mask != 0)
    }

    /// Whether every element of `other` is in `self`.
    pub fn superset(&self, other: &BitVec<T>) -> bool {
        other
            .words
            .iter()
            .enumerate()
            .all(|(i, theirs)| theirs & !self.words.get(i).copied().unwrap_or(0) == 0)
    }

    /// Returns whether `elem` was absent.
    #[inline]
    pub fn insert(&mut self, elem: T) -> bool {
        let (word, mask) = locate(elem.index());
        self.grow_to(word + 1);
        let absent = self.words[word] & mask == 0;
        self.words[word] |= mask;
        absent
    }

    /// Returns whether `elem` was present.
    #[inline]
    pub fn remove(&mut self, elem: T) -> bool {
        let (word, mask) = locate(elem.index());
        match self.words.get_mut(word) {
            Some(w) if *w & mask != 0 => {
                *w &= !mask;
                true
            }
            _ => false,
        }
    }

    /// The elements in increasing order.
    pub fn iter(&self) -> BitIter<'_, T> {
        BitIter {
            words: &self.words,
            next_word: 0,
            current: 0,
            base: 0,
            marker: PhantomData,
        }
    }

    /// `self ∪= other`. Returns whether `self` changed.
    pub fn union(&mut self, other: &BitVec<T>) -> bool {
        self.grow_to(other.words.len());
        self.combine(other, |ours, theirs| ours | theirs)
    }

    /// `self −= other`. Returns whether `self` changed.
    pub fn subtract(&mut self, other: &BitVec<T>) -> bool {
        self.combine(other, |ours, theirs| ours & !theirs)
    }

    /// `self ∩= other`. Returns whether `self` changed.
    pub fn intersect(&mut self, other: &BitVec<T>) -> bool {
        let mut changed = self.combine(other, |ours, theirs| ours & theirs);
        for w in self.words.iter_mut().skip(other.words.len()) {
            changed |= *w != 0;
            *w = 0;
        }
        changed
    }

    /// Applies `op` to the words both vectors have.
    fn combine(&mut self, other: &BitVec<T>, op: impl Fn(u64, u64) -> u64) -> bool {
        let mut changed = false;
        for (ours, theirs) in self.words.iter_mut().zip(&other.words) {
            let updated = op(*ours, *theirs);
            changed |= updated != *ours;
            *ours = updated;
        }
        changed
    }
}

impl<T> Clone for BitVec<T> {
    fn clone(&self) -> Self {
        BitVec {
            words: self.words.clone(),
            marker: PhantomData,
        }
    }
}

impl<T: Idx> Default for BitVec<T> {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl<T: Idx> Debug for BitVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Idx> FromIterator<T> for BitVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut bits = Self::new_empty();
        iter.into_iter().for_each(|elem| {
            bits.insert(elem);
        });
        bits
    }
}

pub struct BitIter<'a, T> {
    words: &'a [u64],
    next_word: usize,
    /// Unvisited bits of the word at `base`.
    current: u64,
    base: usize,
    marker: PhantomData<T>,
}

impl<'a, T: Idx> Iterator for BitIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.current == 0 {
            self.current = *self.words.get(self.next_word)?;
            self.base = self.next_word * WORD_BITS;
            self.next_word += 1;
        }
        let bit = self.current.trailing_zeros() as usize;
        // Clear the lowest set bit.
        self.current &= self.current - 1;
        Some(T::new(self.base + bit))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_remove_contains() {
        let mut bv: BitVec<u32> = BitVec::new_empty();
        assert!(bv.is_empty());
        assert!(bv.insert(3));
        assert!(!bv.insert(3));
        assert!(bv.insert(130));
        assert!(bv.contains(130));
        assert!(!bv.contains(1000));
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![3, 130]);
        assert!(bv.remove(3));
        assert!(!bv.remove(3));
        assert!(!bv.remove(5000));
        assert_eq!(bv.count(), 1);
    }

    #[test]
    fn iteration_crosses_empty_words() {
        let bv: BitVec<u32> = [0, 63, 64, 300].into_iter().collect();
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![0, 63, 64, 300]);
        assert_eq!(BitVec::<u32>::new_empty().iter().next(), None);
    }

    #[test]
    fn intersect_clears_tail_words() {
        let mut a: BitVec<u32> = [1, 200].into_iter().collect();
        let b: BitVec<u32> = [1].into_iter().collect();
        assert!(a.intersect(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1]);
        assert!(!a.intersect(&b));
    }

    #[test]
    fn union_and_subtract_report_changes() {
        let mut a: BitVec<u32> = [1].into_iter().collect();
        let b: BitVec<u32> = [1, 129].into_iter().collect();
        assert!(a.union(&b));
        assert!(!a.union(&b));
        assert!(a.subtract(&[129u32].into_iter().collect()));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn superset_with_different_lengths() {
        let a: BitVec<u32> = [1, 2].into_iter().collect();
        let b: BitVec<u32> = [1, 300].into_iter().collect();
        assert!(!a.superset(&b));
        assert!(b.superset(&[1u32].into_iter().collect()));
        assert!(a.superset(&BitVec::new_empty()));
    }
}
