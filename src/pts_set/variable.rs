// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

use super::points_to::PointsToSet;
use crate::heap::pointer_key::TypeFilter;
use crate::heap::InstanceId;
use crate::pta::PointsTo;

/// The points-to set owned by one representative pointer key.
///
/// The set is split into a propagated part, already pushed along the outgoing
/// constraints, and a pending diff. The two parts are always disjoint.
#[derive(Clone, Default)]
pub struct PointsToSetVariable {
    propagated: PointsTo<InstanceId>,
    diff: PointsTo<InstanceId>,
    filter: Option<TypeFilter>,
}

impl fmt::Debug for PointsToSetVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointsToSetVariable")
            .field("value", &self.value())
            .field("filter", &self.filter)
            .finish()
    }
}

impl PointsToSetVariable {
    pub fn new(filter: Option<TypeFilter>) -> Self {
        PointsToSetVariable {
            propagated: PointsTo::new(),
            diff: PointsTo::new(),
            filter,
        }
    }

    pub fn filter(&self) -> Option<&TypeFilter> {
        self.filter.as_ref()
    }

    pub(crate) fn set_filter(&mut self, filter: TypeFilter) {
        self.filter = Some(filter);
    }

    pub fn contains(&self, elem: InstanceId) -> bool {
        self.propagated.contains(elem) || self.diff.contains(elem)
    }

    pub fn count(&self) -> usize {
        self.propagated.count() + self.diff.count()
    }

    pub fn is_empty(&self) -> bool {
        self.propagated.is_empty() && self.diff.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.diff.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.propagated.iter().chain(self.diff.iter())
    }

    /// The full current value.
    pub fn value(&self) -> PointsTo<InstanceId> {
        let mut value = self.propagated.clone();
        value.union(&self.diff);
        value
    }

    pub fn add(&mut self, elem: InstanceId) -> bool {
        !self.propagated.contains(elem) && self.diff.insert(elem)
    }

    pub fn add_all(&mut self, elems: &PointsTo<InstanceId>) -> bool {
        let mut fresh = elems.difference(&self.propagated);
        if fresh.is_empty() {
            return false;
        }
        fresh.subtract(&self.diff);
        self.diff.union(&fresh)
    }

    /// Moves the pending diff into the propagated part and returns it.
    pub fn take_diff(&mut self) -> PointsTo<InstanceId> {
        let diff = std::mem::take(&mut self.diff);
        self.propagated.union(&diff);
        diff
    }

    /// Marks the whole value as pending again, so it is re-propagated.
    pub fn repropagate_all(&mut self) {
        let propagated = std::mem::take(&mut self.propagated);
        self.diff.union(&propagated);
    }

    /// Absorbs the value of a variable unified into this one. Everything
    /// becomes pending.
    pub(crate) fn absorb(&mut self, other: PointsToSetVariable) {
        self.repropagate_all();
        self.diff.union(&other.propagated);
        self.diff.union(&other.diff);
    }

    pub fn clear(&mut self) {
        self.propagated.clear();
        self.diff.clear();
    }
}
