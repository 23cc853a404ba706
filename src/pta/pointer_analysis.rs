// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use super::context::ContextCache;
use super::implicit::ImplicitPointsTo;
use super::propagator::system::PropagationSystem;
use super::PointsTo;
use crate::graph::call_graph::{CGNodeId, CallGraph};
use crate::heap::{InstanceId, InstanceKey, InstanceKeyFactory, PointerKey};
use crate::ir::{ClassHierarchy, ClassId, Instruction, Pc};
use crate::util::warnings::Warnings;

/// Read-only view of the results of a call-graph construction.
pub struct PointerAnalysis<'a> {
    h: &'a dyn ClassHierarchy,
    system: &'a PropagationSystem,
    call_graph: &'a CallGraph,
    contexts: &'a ContextCache,
    warnings: &'a Warnings,
    implicit: ImplicitPointsTo<'a>,
}

impl<'a> PointerAnalysis<'a> {
    pub fn new(
        h: &'a dyn ClassHierarchy,
        system: &'a PropagationSystem,
        call_graph: &'a CallGraph,
        contexts: &'a ContextCache,
        warnings: &'a Warnings,
        heap: &'a dyn InstanceKeyFactory,
    ) -> Self {
        PointerAnalysis {
            h,
            system,
            call_graph,
            contexts,
            warnings,
            implicit: ImplicitPointsTo::new(h, system, call_graph, heap),
        }
    }

    /// The instances `key` may point to. Implicit locals are recomputed.
    pub fn points_to(&self, key: &PointerKey) -> PointsTo<InstanceId> {
        match key {
            PointerKey::Local { node, vn } => self.implicit.local(*node, *vn),
            _ => self.system.points_to(key).unwrap_or_default(),
        }
    }

    /// Shorthand for the local `vn` of `node`.
    pub fn local(&self, node: CGNodeId, vn: u32) -> PointsTo<InstanceId> {
        self.implicit.local(node, vn)
    }

    pub fn hierarchy(&self) -> &'a dyn ClassHierarchy {
        self.h
    }

    pub fn call_graph(&self) -> &'a CallGraph {
        self.call_graph
    }

    pub fn contexts(&self) -> &'a ContextCache {
        self.contexts
    }

    pub fn warnings(&self) -> &'a Warnings {
        self.warnings
    }

    /// Whether the variable of `key` carries a type filter. An implicit local
    /// defined by a cast reports the filter of the cast.
    pub fn is_filtered(&self, key: &PointerKey) -> bool {
        match self.system.map().lookup(key) {
            Some(var) => var.filter().is_some(),
            None => key.intrinsic_filter().is_some() || self.cast_class(key).is_some(),
        }
    }

    /// The class a local defined by a checkcast is restricted to.
    fn cast_class(&self, key: &PointerKey) -> Option<ClassId> {
        let PointerKey::Local { node, vn } = key else {
            return None;
        };
        let body = self.h.method(self.call_graph.node(*node).method).body.as_ref()?;
        let pc = body.def_use().def_of(*vn)?;
        match body.instruction(pc)? {
            Instruction::CheckCast { ty, .. } => self.h.lookup_class(ty).filter(|c| *c != self.h.root_class()),
            _ => None,
        }
    }

    pub fn is_implicit(&self, key: &PointerKey) -> bool {
        self.system.map().is_implicit(key)
    }

    /// All pointer keys, explicit and implicit.
    pub fn pointer_keys(&self) -> impl Iterator<Item = &'a PointerKey> + 'a {
        self.system.map().keys().map(|(_, key)| key)
    }

    pub fn instance_keys(&self) -> impl Iterator<Item = (InstanceId, &'a InstanceKey)> + 'a {
        self.system.instances()
    }

    pub fn instance_key(&self, id: InstanceId) -> &'a InstanceKey {
        self.system.instance_key(id)
    }

    /// The allocation sites an instance stands for, as (node, pc) pairs.
    /// Synthetic instances have none.
    pub fn creation_sites(&self, id: InstanceId) -> Vec<(CGNodeId, Pc)> {
        match self.instance_key(id) {
            InstanceKey::Allocation { node, pc, .. }
            | InstanceKey::MultiNewArray { node, pc, .. }
            | InstanceKey::Pei { node, pc, .. } => vec![(*node, *pc)],
            InstanceKey::SmushedAllocations { node, class } => self
                .allocation_sites(*node, *class)
                .into_iter()
                .map(|pc| (*node, pc))
                .collect(),
            InstanceKey::ConcreteType { class } => self
                .call_graph
                .nodes()
                .flat_map(|node| self.allocation_sites(node, *class).into_iter().map(move |pc| (node, pc)))
                .collect(),
            InstanceKey::Constant { .. } | InstanceKey::Metadata { .. } => Vec::new(),
        }
    }

    /// Pcs of the allocations in `node` creating objects of `class`, inner
    /// arrays of multi-dimensional allocations included.
    fn allocation_sites(&self, node: CGNodeId, class: ClassId) -> Vec<Pc> {
        let h = self.h;
        let Some(body) = h.method(self.call_graph.node(node).method).body.as_ref() else {
            return Vec::new();
        };
        body.iter()
            .filter(|(_, instruction)| match instruction {
                Instruction::New { ty, dims, .. } => {
                    let mut ty = Some(ty.clone());
                    (0..*dims).any(|_| {
                        let current = ty.take();
                        let found = current.as_ref().and_then(|t| h.lookup_class(t)) == Some(class);
                        ty = current.and_then(|t| t.element_type());
                        found
                    })
                }
                _ => false,
            })
            .map(|(pc, _)| pc)
            .collect()
    }
}
