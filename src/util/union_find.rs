// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Union-find over dense indices, with union by rank.
//!
//! Elements are added lazily: any index beyond the current size is a singleton.

use std::marker::PhantomData;

use super::bit_vec::Idx;

#[derive(Debug, Clone)]
pub struct UnionFind<T> {
    parent: Vec<u32>,
    rank: Vec<u8>,
    marker: PhantomData<T>,
}

impl<T: Idx> Default for UnionFind<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Idx> UnionFind<T> {
    pub fn new() -> Self {
        UnionFind {
            parent: Vec::new(),
            rank: Vec::new(),
            marker: PhantomData,
        }
    }

    fn make_set(&mut self, x: usize) {
        let old_len = self.parent.len();
        if x >= old_len {
            self.parent.extend((old_len..=x).map(|i| i as u32));
            self.rank.resize(x + 1, 0);
        }
    }

    /// Returns the representative of `x` without compressing the path.
    pub fn find(&self, x: T) -> T {
        let mut current = x.index();
        while current < self.parent.len() && self.parent[current] as usize != current {
            current = self.parent[current] as usize;
        }
        T::new(current)
    }

    /// Returns the representative of `x`, halving the path on the way.
    pub fn find_mut(&mut self, x: T) -> T {
        let mut current = x.index();
        if current >= self.parent.len() {
            return x;
        }
        while self.parent[current] as usize != current {
            let grand = self.parent[self.parent[current] as usize];
            self.parent[current] = grand;
            current = grand as usize;
        }
        T::new(current)
    }

    /// Merges the classes of `x` and `y` and returns the new representative.
    pub fn union(&mut self, x: T, y: T) -> T {
        self.make_set(x.index().max(y.index()));
        let root_x = self.find_mut(x).index();
        let root_y = self.find_mut(y).index();
        if root_x == root_y {
            return T::new(root_x);
        }
        let (rank_x, rank_y) = (self.rank[root_x], self.rank[root_y]);
        if rank_x < rank_y {
            self.parent[root_x] = root_y as u32;
            T::new(root_y)
        } else {
            self.parent[root_y] = root_x as u32;
            if rank_x == rank_y {
                self.rank[root_x] += 1;
            }
            T::new(root_x)
        }
    }

    pub fn same(&self, x: T, y: T) -> bool {
        self.find(x) == self.find(y)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;

    #[test]
    fn singletons_are_their_own_representative() {
        let uf: UnionFind<u32> = UnionFind::new();
        assert_eq!(uf.find(7), 7);
        assert!(!uf.same(1, 2));
    }

    #[test]
    fn union_is_transitive() {
        let mut uf: UnionFind<u32> = UnionFind::new();
        uf.union(1, 2);
        uf.union(3, 4);
        assert!(!uf.same(1, 4));
        let rep = uf.union(2, 3);
        for x in 1..=4 {
            assert_eq!(uf.find(x), rep);
            assert_eq!(uf.find_mut(x), rep);
        }
    }

    #[test]
    fn random_unions_agree_with_naive_labels() {
        let mut rng = rand::thread_rng();
        let n = 200;
        let mut uf: UnionFind<u32> = UnionFind::new();
        let mut label: Vec<u32> = (0..n).collect();
        for _ in 0..150 {
            let a = rng.gen_range(0..n);
            let b = rng.gen_range(0..n);
            uf.union(a, b);
            let (la, lb) = (label[a as usize], label[b as usize]);
            for l in label.iter_mut() {
                if *l == lb {
                    *l = la;
                }
            }
        }
        for a in 0..n {
            for b in 0..n {
                assert_eq!(uf.same(a, b), label[a as usize] == label[b as usize]);
            }
        }
    }
}
