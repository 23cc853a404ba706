// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::BTreeSet;

use log::*;

use super::variable::PointsToSetVariable;
use super::PointerId;
use crate::heap::pointer_key::{PointerKey, TypeFilter};
use crate::util::bit_vec::{BitVec, Idx};
use crate::util::mapping::IndexMapping;
use crate::util::union_find::UnionFind;

#[derive(Debug)]
enum Slot {
    /// Indexed but not yet given a variable.
    Unassigned,
    /// Never materialized; its set is recomputed on demand.
    Implicit,
    /// Merged into another representative.
    Unified,
    Live(PointsToSetVariable),
}

/// Maps pointer keys to points-to set variables.
///
/// Keys are interned into dense `PointerId`s. Unified keys share the variable
/// of their union-find representative, and only representatives own a
/// `Live` slot.
#[derive(Debug, Default)]
pub struct PointsToMap {
    keys: IndexMapping<PointerKey, PointerId>,
    slots: Vec<Slot>,
    union_find: UnionFind<PointerId>,
    roots: BitVec<PointerId>,
}

/// Filters are fixed when a variable is created: typed keys carry their own,
/// cast results and array contents get theirs at every request, and receivers
/// are filtered through a typed view of `this`. Cycle collapsing skips
/// filtered variables, so a representative never meets a second filter.
fn install_filter(var: &mut PointsToSetVariable, filter: &TypeFilter) {
    match var.filter() {
        None => var.set_filter(filter.clone()),
        Some(existing) if existing == filter => {}
        Some(existing) => unreachable!("conflicting filters {:?} and {:?} on one variable", existing, filter),
    }
}

impl PointsToMap {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn index_of(&self, key: &PointerKey) -> Option<PointerId> {
        self.keys.index_of(key)
    }

    #[inline]
    pub fn key(&self, id: PointerId) -> &PointerKey {
        self.keys.get(id)
    }

    pub fn find_or_create_index(&mut self, key: &PointerKey) -> PointerId {
        if let Some(id) = self.keys.index_of(key) {
            return id;
        }
        let id = self.keys.add(key.clone());
        self.slots.push(Slot::Unassigned);
        id
    }

    #[inline]
    pub fn representative(&self, id: PointerId) -> PointerId {
        self.union_find.find(id)
    }

    /// The representative variable of `key`, if it has one. A requested filter
    /// is installed on an unfiltered variable.
    pub fn get(&mut self, key: &PointerKey, filter: Option<&TypeFilter>) -> Option<PointerId> {
        let rep = self.representative(self.index_of(key)?);
        match &mut self.slots[rep.index()] {
            Slot::Live(var) => {
                if let Some(filter) = filter.or(key.intrinsic_filter()) {
                    install_filter(var, filter);
                }
                Some(rep)
            }
            Slot::Unassigned => None,
            Slot::Implicit => panic!("implicit key {:?} has no variable", key),
            Slot::Unified => unreachable!("representative {:?} is unified", rep),
        }
    }

    /// The representative variable of `key`, created on first request.
    pub fn find_or_create(&mut self, key: &PointerKey, filter: Option<&TypeFilter>) -> PointerId {
        let id = self.find_or_create_index(key);
        let rep = self.representative(id);
        let filter = filter.or(key.intrinsic_filter());
        match &mut self.slots[rep.index()] {
            slot @ Slot::Unassigned => {
                *slot = Slot::Live(PointsToSetVariable::new(filter.cloned()));
            }
            Slot::Live(var) => {
                if let Some(filter) = filter {
                    install_filter(var, filter);
                }
            }
            Slot::Implicit => panic!("implicit key {:?} cannot own a variable", key),
            Slot::Unified => unreachable!("representative {:?} is unified", rep),
        }
        rep
    }

    /// The variable `key` resolves to, without creating one.
    pub fn lookup(&self, key: &PointerKey) -> Option<&PointsToSetVariable> {
        let rep = self.representative(self.index_of(key)?);
        match &self.slots[rep.index()] {
            Slot::Live(var) => Some(var),
            _ => None,
        }
    }

    /// The variable of a representative.
    pub fn var(&self, id: PointerId) -> &PointsToSetVariable {
        match &self.slots[self.representative(id).index()] {
            Slot::Live(var) => var,
            slot => panic!("no variable for {:?}: {:?}", self.key(id), slot),
        }
    }

    pub fn var_mut(&mut self, id: PointerId) -> &mut PointsToSetVariable {
        let rep = self.representative(id);
        match &mut self.slots[rep.index()] {
            Slot::Live(var) => var,
            slot => panic!("no variable for representative {:?}: {:?}", rep, slot),
        }
    }

    pub fn record_implicit(&mut self, key: &PointerKey) {
        let id = self.find_or_create_index(key);
        match &mut self.slots[id.index()] {
            slot @ Slot::Unassigned => *slot = Slot::Implicit,
            Slot::Implicit => {}
            _ => panic!("cannot record {:?} implicit after it got a variable", key),
        }
    }

    pub fn record_root(&mut self, id: PointerId) {
        let rep = self.representative(id);
        self.roots.insert(rep);
    }

    pub fn is_implicit(&self, key: &PointerKey) -> bool {
        self.index_of(key)
            .map_or(false, |id| matches!(self.slots[id.index()], Slot::Implicit))
    }

    pub fn is_unified(&self, key: &PointerKey) -> bool {
        self.index_of(key)
            .map_or(false, |id| matches!(self.slots[id.index()], Slot::Unified))
    }

    pub fn is_root(&self, id: PointerId) -> bool {
        self.roots.contains(self.representative(id))
    }

    /// Merges the variables of `ids` into one representative, returned along
    /// with the former representatives it absorbed.
    pub fn unify(&mut self, ids: &[PointerId]) -> (PointerId, Vec<PointerId>) {
        assert!(ids.len() > 1, "unify needs at least two pointer keys, got {:?}", ids);
        let old_reps: BTreeSet<PointerId> = ids.iter().map(|id| self.representative(*id)).collect();
        let mut rep = ids[0];
        for id in &ids[1..] {
            rep = self.union_find.union(rep, *id);
        }
        let rep = self.union_find.find(rep);

        if let slot @ Slot::Unassigned = &mut self.slots[rep.index()] {
            *slot = Slot::Live(PointsToSetVariable::new(None));
        }
        let mut merged = Vec::new();
        for old in old_reps.into_iter().filter(|old| *old != rep) {
            let absorbed = match std::mem::replace(&mut self.slots[old.index()], Slot::Unified) {
                Slot::Live(var) => Some(var),
                Slot::Unassigned => None,
                slot => panic!("cannot unify {:?} slot of {:?}", slot, self.keys.get(old)),
            };
            if self.roots.remove(old) {
                self.roots.insert(rep);
            }
            if let Some(var) = absorbed {
                let Slot::Live(rep_var) = &mut self.slots[rep.index()] else {
                    unreachable!("representative {:?} lost its variable", rep)
                };
                if let Some(filter) = var.filter() {
                    install_filter(rep_var, filter);
                }
                rep_var.absorb(var);
            }
            merged.push(old);
        }
        trace!("Unified {:?} into {:?}", merged, rep);
        (rep, merged)
    }

    /// Clears the sets of non-root variables. Root variables keep their value
    /// and mark it pending, so a fresh propagation recomputes everything else.
    pub fn revert_to_pre_transitive(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Live(var) = slot {
                if self.roots.contains(PointerId::new(i)) {
                    var.repropagate_all();
                } else {
                    var.clear();
                }
            }
        }
    }

    /// Ids of all representatives owning a variable.
    pub fn live_ids(&self) -> impl Iterator<Item = PointerId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(i, _)| PointerId::new(i))
    }

    pub fn keys(&self) -> impl Iterator<Item = (PointerId, &PointerKey)> {
        self.keys.iter()
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn num_implicit(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Implicit)).count()
    }

    pub fn num_unified(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Unified)).count()
    }

    pub fn num_roots(&self) -> usize {
        self.roots.count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::call_graph::CGNodeId;
    use crate::heap::InstanceId;
    use crate::ir::ClassId;

    fn local(vn: u32) -> PointerKey {
        PointerKey::local(CGNodeId::new(0), vn)
    }

    fn inst(i: usize) -> InstanceId {
        InstanceId::new(i)
    }

    #[test]
    fn variables_are_created_on_demand() {
        let mut map = PointsToMap::new();
        assert_eq!(map.get(&local(1), None), None);
        let id = map.find_or_create(&local(1), None);
        assert_eq!(map.get(&local(1), None), Some(id));
        map.var_mut(id).add(inst(3));
        assert!(map.var(id).contains(inst(3)));
    }

    #[test]
    fn filters_are_installed_once() {
        let mut map = PointsToMap::new();
        let filter = TypeFilter::SingleClass(ClassId::new(2));
        let id = map.find_or_create(&local(1), None);
        assert_eq!(map.get(&local(1), Some(&filter)), Some(id));
        assert_eq!(map.var(id).filter(), Some(&filter));
        map.find_or_create(&local(1), Some(&filter));
    }

    #[test]
    #[should_panic]
    fn conflicting_filters_panic() {
        let mut map = PointsToMap::new();
        map.find_or_create(&local(1), Some(&TypeFilter::SingleClass(ClassId::new(2))));
        map.find_or_create(&local(1), Some(&TypeFilter::SingleClass(ClassId::new(3))));
    }

    #[test]
    #[should_panic]
    fn implicit_keys_have_no_variable() {
        let mut map = PointsToMap::new();
        map.record_implicit(&local(4));
        assert!(map.is_implicit(&local(4)));
        map.find_or_create(&local(4), None);
    }

    #[test]
    #[should_panic]
    fn unify_needs_two_keys() {
        let mut map = PointsToMap::new();
        let id = map.find_or_create(&local(1), None);
        map.unify(&[id]);
    }

    #[test]
    fn unify_merges_values_roots_and_filters() {
        let mut map = PointsToMap::new();
        let filter = TypeFilter::SingleClass(ClassId::new(1));
        let a = map.find_or_create(&local(1), None);
        let b = map.find_or_create(&local(2), Some(&filter));
        let c = map.find_or_create(&local(3), None);
        map.var_mut(a).add(inst(1));
        map.var_mut(b).add(inst(2));
        map.record_root(c);
        let (rep, merged) = map.unify(&[a, b, c]);
        assert_eq!(merged.len(), 2);
        for id in [a, b, c] {
            assert_eq!(map.representative(id), rep);
            assert!(map.is_root(id));
        }
        assert_eq!(map.var(a).value().to_sorted_vec(), vec![inst(1), inst(2)]);
        assert_eq!(map.var(c).filter(), Some(&filter));
        assert_eq!(map.num_unified(), 2);
        assert_eq!(map.live_ids().count(), 1);
    }

    #[test]
    fn revert_keeps_only_roots() {
        let mut map = PointsToMap::new();
        let a = map.find_or_create(&local(1), None);
        let b = map.find_or_create(&local(2), None);
        map.var_mut(a).add(inst(1));
        map.var_mut(b).add(inst(1));
        map.record_root(a);
        map.revert_to_pre_transitive();
        assert!(map.var(a).has_pending());
        assert!(map.var(b).is_empty());
    }
}
