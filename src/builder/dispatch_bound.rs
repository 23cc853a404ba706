// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Estimating how many targets a dispatched call site may have. The estimate
//! only lets the builder skip dispatch enumeration; it is never needed for
//! soundness.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::ir::{CallSiteRef, ClassHierarchy, MethodId, MethodRef};

/// Estimates above this are reported as unbounded.
pub const BOUND_CUTOFF: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchBoundMode {
    /// Never bound.
    None,
    /// Only final or private targets, and targets in final classes.
    Cheap,
    /// Count the implementors among the concrete subtypes of the declared class.
    Full,
}

#[derive(Debug)]
pub struct DispatchBoundEstimator {
    mode: DispatchBoundMode,
    /// Possible targets per declared method, `None` when unbounded.
    cache: HashMap<MethodRef, Option<Vec<MethodId>>>,
}

impl DispatchBoundEstimator {
    pub fn new(mode: DispatchBoundMode) -> Self {
        DispatchBoundEstimator {
            mode,
            cache: HashMap::new(),
        }
    }

    pub fn mode(&self) -> DispatchBoundMode {
        self.mode
    }

    fn targets(&mut self, h: &dyn ClassHierarchy, site: &CallSiteRef) -> Option<&[MethodId]> {
        if self.mode == DispatchBoundMode::None {
            return None;
        }
        let mode = self.mode;
        self.cache
            .entry(site.target.clone())
            .or_insert_with(|| match mode {
                DispatchBoundMode::Cheap => cheap_targets(h, &site.target),
                _ => full_targets(h, &site.target),
            })
            .as_deref()
    }

    /// Bound on the call edges of `site`: the number of targets times the
    /// number of contexts per target.
    pub fn bound(&mut self, h: &dyn ClassHierarchy, site: &CallSiteRef, context_bound: Option<usize>) -> Option<usize> {
        let per_target = context_bound?;
        let bound = self.targets(h, site)?.len().checked_mul(per_target)?;
        (bound <= BOUND_CUTOFF).then_some(bound)
    }

    /// The only target of `site`, when its bound is exactly one.
    pub fn unique_target(
        &mut self,
        h: &dyn ClassHierarchy,
        site: &CallSiteRef,
        context_bound: Option<usize>,
    ) -> Option<MethodId> {
        if self.bound(h, site, context_bound)? != 1 {
            return None;
        }
        self.targets(h, site)?.first().copied()
    }
}

fn cheap_targets(h: &dyn ClassHierarchy, target: &MethodRef) -> Option<Vec<MethodId>> {
    let class = h.lookup_class(&target.class)?;
    let method = h.resolve_method(class, &target.selector)?;
    let info = h.method(method);
    if info.is_abstract {
        return None;
    }
    if info.is_final || info.is_private || h.class(class).is_final {
        Some(vec![method])
    } else {
        None
    }
}

fn full_targets(h: &dyn ClassHierarchy, target: &MethodRef) -> Option<Vec<MethodId>> {
    let class = h.lookup_class(&target.class)?;
    let targets: Vec<MethodId> = h
        .concrete_subtypes(class)
        .iter()
        .filter_map(|c| h.resolve_method(*c, &target.selector))
        .filter(|m| !h.method(*m).is_abstract)
        .sorted()
        .dedup()
        .collect();
    (targets.len() <= BOUND_CUTOFF).then_some(targets)
}
