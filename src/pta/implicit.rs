// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! On-demand points-to sets of locals that never got a variable.

use super::PointsTo;
use crate::graph::call_graph::{CGNodeId, CallGraph};
use crate::heap::{AllocationSite, InstanceId, InstanceKey, InstanceKeyFactory, PointerKey};
use crate::ir::{ClassHierarchy, ConstantValue, Instruction, MethodBody, Pc, TypeName, ValueNumber, STRING_TYPE};
use crate::pta::propagator::system::PropagationSystem;
use crate::pts_set::points_to::PointsToSet;

pub struct ImplicitPointsTo<'a> {
    h: &'a dyn ClassHierarchy,
    system: &'a PropagationSystem,
    call_graph: &'a CallGraph,
    heap: &'a dyn InstanceKeyFactory,
}

impl<'a> ImplicitPointsTo<'a> {
    pub fn new(
        h: &'a dyn ClassHierarchy,
        system: &'a PropagationSystem,
        call_graph: &'a CallGraph,
        heap: &'a dyn InstanceKeyFactory,
    ) -> Self {
        ImplicitPointsTo {
            h,
            system,
            call_graph,
            heap,
        }
    }

    /// The points-to set of local `vn` of `node`, implicit or not.
    pub fn local(&self, node: CGNodeId, vn: ValueNumber) -> PointsTo<InstanceId> {
        let key = PointerKey::local(node, vn);
        if self.system.map().is_implicit(&key) {
            self.compute(node, vn)
        } else {
            self.explicit(&key)
        }
    }

    fn explicit(&self, key: &PointerKey) -> PointsTo<InstanceId> {
        self.system.points_to(key).unwrap_or_default()
    }

    fn singleton(&self, key: Option<InstanceKey>) -> PointsTo<InstanceId> {
        key.and_then(|key| self.system.instance_id(&key)).into_iter().collect()
    }

    fn site(&self, node: CGNodeId, pc: Pc) -> AllocationSite {
        AllocationSite {
            node,
            method: self.call_graph.node(node).method,
            pc,
        }
    }

    /// Recomputes an implicit local from its defining instruction.
    fn compute(&self, node: CGNodeId, vn: ValueNumber) -> PointsTo<InstanceId> {
        let h = self.h;
        let method = self.call_graph.node(node).method;
        let Some(body) = h.method(method).body.as_ref() else {
            panic!("implicit local {} of {} without a body", vn, h.method_name(method));
        };
        let def_use = body.def_use();
        let Some(pc) = def_use.def_of(vn) else {
            panic!("implicit local {} of {} has no definition", vn, h.method_name(method));
        };
        let instruction = body.instruction(pc);
        match instruction {
            Some(Instruction::New { ty, .. }) => {
                self.singleton(self.heap.instance_for_allocation(h, self.site(node, pc), ty))
            }
            Some(Instruction::Constant { value, .. }) => match value {
                ConstantValue::Null | ConstantValue::Int(_) => PointsTo::new(),
                ConstantValue::Str(s) => self.singleton(self.heap.instance_for_constant(h, &TypeName::new(STRING_TYPE), s)),
                ConstantValue::Class(ty) => {
                    self.singleton(h.lookup_class(ty).and_then(|c| self.heap.instance_for_metadata(h, c)))
                }
            },
            Some(Instruction::Phi { uses, .. }) => {
                let mut values = PointsTo::new();
                for u in uses {
                    values.union(&self.local(node, *u));
                }
                values
            }
            Some(Instruction::Pi { val, .. }) => self.local(node, *val),
            Some(Instruction::CheckCast { val, ty, .. }) => {
                let values = self.local(node, *val);
                match h.lookup_class(ty) {
                    Some(class) => values
                        .iter()
                        .filter(|o| h.is_assignable(self.system.instance_key(*o).concrete_type(), class))
                        .collect(),
                    None => values,
                }
            }
            Some(Instruction::GetField { base, field, .. }) => {
                let Some(field) = h.resolve_field(field) else {
                    return PointsTo::new();
                };
                match base {
                    None => self.explicit(&PointerKey::StaticField { field }),
                    Some(base) => {
                        let mut values = PointsTo::new();
                        for o in self.local(node, *base).iter() {
                            if let Some(slot) = self.system.instance_field_key(h, o, field) {
                                values.union(&self.explicit(&slot));
                            }
                        }
                        values
                    }
                }
            }
            Some(Instruction::ArrayLoad { array, .. }) => {
                let mut values = PointsTo::new();
                for o in self.local(node, *array).iter() {
                    if let Some((contents, _)) = self.system.array_contents_key(h, o) {
                        values.union(&self.explicit(&contents));
                    }
                }
                values
            }
            Some(Instruction::Invoke { def, exception, .. }) => {
                let mut values = PointsTo::new();
                for target in self.call_graph.targets(node, pc) {
                    let key = if *def == Some(vn) {
                        PointerKey::ReturnValue { node: target }
                    } else {
                        debug_assert_eq!(*exception, vn);
                        PointerKey::ExceptionalReturnValue { node: target }
                    };
                    values.union(&self.explicit(&key));
                }
                values
            }
            Some(Instruction::Catch { types, covers, .. }) => self.caught(node, body, types, covers),
            other => panic!(
                "unexpected definition {:?} of implicit local {} in {}",
                other,
                vn,
                h.method_name(method)
            ),
        }
    }

    /// Exceptions raised at `covers` that a handler for `types` catches.
    fn caught(&self, node: CGNodeId, body: &MethodBody, types: &[TypeName], covers: &[Pc]) -> PointsTo<InstanceId> {
        let h = self.h;
        let mut raised = PointsTo::new();
        for pc in covers {
            match body.instruction(*pc) {
                Some(Instruction::Invoke { exception, .. }) | Some(Instruction::Throw { exception }) => {
                    raised.union(&self.local(node, *exception));
                }
                _ => {}
            }
            for implicit in body.implicit_exceptions.iter().filter(|e| e.pc == *pc) {
                raised.union(&self.singleton(self.heap.instance_for_pei(h, self.site(node, *pc), &implicit.ty)));
            }
        }
        let classes: Vec<_> = types.iter().filter_map(|ty| h.lookup_class(ty)).collect();
        raised
            .iter()
            .filter(|o| {
                let class = self.system.instance_key(*o).concrete_type();
                classes.iter().any(|c| h.is_assignable(class, *c))
            })
            .collect()
    }
}
