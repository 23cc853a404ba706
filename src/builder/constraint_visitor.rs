// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Translates the instructions of one call-graph node into constraints.

use std::collections::HashMap;

use super::call_graph_builder::{PendingCall, PropagationCallGraphBuilder, ReceiverPassing, ValueSource};
use crate::graph::call_graph::CGNodeId;
use crate::heap::{AllocationSite, FilteredPointerKey, InstanceId, InstanceKey, PointerKey, TypeFilter};
use crate::ir::{
    CallSiteRef, ClassHierarchy, ClassId, ConstantValue, DefUse, DispatchKind, FieldId, FieldRef, Instruction,
    MethodBody, MethodId, MethodRef, Pc, TypeName, ValueNumber, STRING_TYPE,
};
use crate::pta::propagator::operators::{SideEffect, UnaryOp};
use crate::util::warnings::{Severity, WarningKind};

pub(crate) struct ConstraintVisitor<'b, 'h> {
    builder: &'b mut PropagationCallGraphBuilder<'h>,
    h: &'h dyn ClassHierarchy,
    node: CGNodeId,
    method: MethodId,
    body: &'h MethodBody,
    def_use: DefUse,
    /// Operand sources computed so far.
    sources: HashMap<ValueNumber, ValueSource>,
}

impl<'b, 'h> ConstraintVisitor<'b, 'h> {
    /// A visitor for `node`, whose method must have a body.
    pub fn new(builder: &'b mut PropagationCallGraphBuilder<'h>, node: CGNodeId) -> Self {
        let h = builder.hierarchy();
        let method = builder.resolver.call_graph.node(node).method;
        let Some(body) = h.method(method).body.as_ref() else {
            panic!("visiting {} without a body", h.method_name(method));
        };
        ConstraintVisitor {
            builder,
            h,
            node,
            method,
            body,
            def_use: body.def_use(),
            sources: HashMap::new(),
        }
    }

    pub fn visit(&mut self) {
        let body = self.body;
        for (pc, instruction) in body.iter() {
            self.visit_instruction(pc, instruction);
        }
        for (pc, instruction) in body.iter() {
            self.visit_exceptions(pc, instruction);
        }
    }

    fn local(&self, vn: ValueNumber) -> PointerKey {
        PointerKey::local(self.node, vn)
    }

    fn warn(&mut self, severity: Severity, kind: WarningKind, message: String) {
        self.builder.resolver.warnings.add(severity, kind, message);
    }

    fn record_implicit(&mut self, vn: ValueNumber) {
        let key = self.local(vn);
        self.builder.system.map_mut().record_implicit(&key);
    }

    /// Records `def` implicit if nothing uses it, and reports whether it did.
    fn implicit_unless_used(&mut self, def: ValueNumber) -> bool {
        if self.def_use.is_used(def) {
            false
        } else {
            self.record_implicit(def);
            true
        }
    }

    /// Where the objects of `vn` come from. Values defined by allocations and
    /// constants are fixed instances; all others are variables.
    fn source(&mut self, vn: ValueNumber) -> ValueSource {
        if let Some(source) = self.sources.get(&vn) {
            return source.clone();
        }
        let body = self.body;
        let definition = self.def_use.def_of(vn).and_then(|pc| body.instruction(pc).map(|i| (pc, i)));
        let source = match definition {
            Some((pc, Instruction::New { def, ty, .. })) if *def == vn => self.allocation(pc, ty),
            Some((_, Instruction::Constant { def, value })) if *def == vn => self.constant(value),
            _ => ValueSource::Var(self.local(vn)),
        };
        self.sources.insert(vn, source.clone());
        source
    }

    fn intern(&mut self, key: Option<InstanceKey>) -> Option<InstanceId> {
        let key = key?;
        Some(self.builder.system.find_or_create_instance(self.h, key))
    }

    fn site(&self, pc: Pc) -> AllocationSite {
        AllocationSite {
            node: self.node,
            method: self.method,
            pc,
        }
    }

    fn allocation(&mut self, pc: Pc, ty: &TypeName) -> ValueSource {
        let key = self.builder.heap.instance_for_allocation(self.h, self.site(pc), ty);
        match self.intern(key) {
            Some(id) => ValueSource::Instances(vec![id]),
            None => {
                self.warn(
                    Severity::Moderate,
                    WarningKind::UnresolvedType,
                    format!("allocation of {} in {}", ty, self.h.method_name(self.method)),
                );
                ValueSource::Empty
            }
        }
    }

    fn constant(&mut self, value: &ConstantValue) -> ValueSource {
        let h = self.h;
        let key = match value {
            ConstantValue::Null | ConstantValue::Int(_) => return ValueSource::Empty,
            ConstantValue::Str(s) => self.builder.heap.instance_for_constant(h, &TypeName::new(STRING_TYPE), s),
            ConstantValue::Class(ty) => match h.lookup_class(ty) {
                Some(described) => self.builder.heap.instance_for_metadata(h, described),
                None => None,
            },
        };
        match self.intern(key) {
            Some(id) => ValueSource::Instances(vec![id]),
            None => {
                self.warn(
                    Severity::Mild,
                    WarningKind::UnresolvedType,
                    format!("constant {:?} in {}", value, h.method_name(self.method)),
                );
                ValueSource::Empty
            }
        }
    }

    fn lookup_class(&mut self, ty: &TypeName) -> Option<ClassId> {
        let class = self.h.lookup_class(ty);
        if class.is_none() {
            self.warn(
                Severity::Mild,
                WarningKind::UnresolvedType,
                format!("{} in {}", ty, self.h.method_name(self.method)),
            );
        }
        class
    }

    /// The field if it resolves and holds references.
    fn reference_field(&mut self, field: &FieldRef) -> Option<FieldId> {
        let Some(id) = self.h.resolve_field(field) else {
            self.warn(
                Severity::Mild,
                WarningKind::UnresolvedField,
                format!("{} in {}", field, self.h.method_name(self.method)),
            );
            return None;
        };
        self.h.field(id).ty.is_reference().then_some(id)
    }

    fn visit_instruction(&mut self, pc: Pc, instruction: &'h Instruction) {
        match instruction {
            Instruction::New { def, ty, dims } => {
                self.record_implicit(*def);
                let source = self.source(*def);
                if let ValueSource::Instances(ids) = &source {
                    if *dims > 1 {
                        self.visit_multi_new_array(pc, ty, *dims, ids[0]);
                    }
                }
            }
            Instruction::Constant { def, .. } => {
                self.record_implicit(*def);
                self.source(*def);
            }
            Instruction::Phi { def, uses } => {
                if !self.implicit_unless_used(*def) {
                    let lhs = self.local(*def);
                    for u in uses {
                        let source = self.source(*u);
                        source.flow_into(&mut self.builder.system, self.h, &lhs);
                    }
                }
            }
            Instruction::Pi { def, val } => {
                if !self.implicit_unless_used(*def) {
                    let lhs = self.local(*def);
                    let source = self.source(*val);
                    source.flow_into(&mut self.builder.system, self.h, &lhs);
                }
            }
            Instruction::CheckCast { def, val, ty } => self.visit_check_cast(*def, *val, ty),
            Instruction::GetField { def, base, field } => self.visit_get_field(*def, *base, field),
            Instruction::PutField { base, field, val } => self.visit_put_field(*base, field, *val),
            Instruction::ArrayLoad { def, array } => self.visit_array_load(*def, *array),
            Instruction::ArrayStore { array, val } => self.visit_array_store(*array, *val),
            Instruction::Invoke {
                def,
                exception,
                target,
                kind,
                args,
            } => self.visit_invoke(pc, *def, *exception, target, *kind, args),
            Instruction::Return { val: Some(val) } => {
                if self.h.method(self.method).returns_reference() {
                    let source = self.source(*val);
                    source.flow_into(&mut self.builder.system, self.h, &PointerKey::ReturnValue { node: self.node });
                }
            }
            Instruction::Return { val: None } | Instruction::Throw { .. } | Instruction::Catch { .. } => {}
        }
    }

    /// Links the inner arrays of a multi-dimensional allocation into the
    /// contents of their enclosing arrays.
    fn visit_multi_new_array(&mut self, pc: Pc, ty: &TypeName, dims: u32, outer: InstanceId) {
        let h = self.h;
        let mut array = outer;
        let mut array_ty = ty.clone();
        for dim in 1..dims {
            let Some(inner_ty) = array_ty.element_type() else {
                break;
            };
            let key = self.builder.heap.instance_for_multi_new_array(h, self.site(pc), dim, &inner_ty);
            let Some(inner) = self.intern(key) else {
                self.warn(
                    Severity::Moderate,
                    WarningKind::UnresolvedType,
                    format!("allocation of {} in {}", inner_ty, h.method_name(self.method)),
                );
                break;
            };
            let system = &mut self.builder.system;
            if let Some((contents, filter)) = system.array_contents_key(h, array) {
                let op = if filter.is_some() { UnaryOp::Filter } else { UnaryOp::Assign };
                system.new_instance_constraint(h, op, &contents, filter.as_ref(), inner);
            }
            array = inner;
            array_ty = inner_ty;
        }
    }

    fn visit_check_cast(&mut self, def: ValueNumber, val: ValueNumber, ty: &TypeName) {
        // A cast of a call result may tell a factory what it creates.
        if let Some(call_pc) = self.def_use.def_of(val) {
            if let Some(Instruction::Invoke { def: Some(result), .. }) = self.body.instruction(call_pc) {
                if *result == val {
                    if let Some(class) = self.h.lookup_class(ty) {
                        self.builder.reflection.record_cast(self.node, call_pc, class);
                    }
                }
            }
        }
        if self.implicit_unless_used(def) {
            return;
        }
        let h = self.h;
        let source = self.source(val);
        let lhs = self.local(def);
        match self.lookup_class(ty) {
            Some(class) if class != h.root_class() => {
                let lhs = FilteredPointerKey::new(lhs, TypeFilter::SingleClass(class));
                source.flow_filtered(&mut self.builder.system, h, UnaryOp::Filter, &lhs);
            }
            _ => source.flow_into(&mut self.builder.system, h, &lhs),
        }
    }

    fn visit_get_field(&mut self, def: ValueNumber, base: Option<ValueNumber>, field: &FieldRef) {
        if self.implicit_unless_used(def) {
            return;
        }
        let Some(field) = self.reference_field(field) else {
            return;
        };
        let h = self.h;
        let lhs = self.local(def);
        let Some(base) = base else {
            self.builder.system.new_assign(h, &lhs, &PointerKey::StaticField { field });
            return;
        };
        let base = self.source(base);
        let system = &mut self.builder.system;
        match base {
            ValueSource::Var(base) => {
                let def = system.find_or_create_var(&lhs, None);
                system.new_statement(SideEffect::GetField { field, def }, &base);
            }
            ValueSource::Instances(bases) => {
                for o in bases {
                    if let Some(slot) = system.instance_field_key(h, o, field) {
                        system.new_assign(h, &lhs, &slot);
                    }
                }
            }
            ValueSource::Empty => {}
        }
    }

    fn visit_put_field(&mut self, base: Option<ValueNumber>, field: &FieldRef, val: ValueNumber) {
        let Some(field) = self.reference_field(field) else {
            return;
        };
        let h = self.h;
        let value = self.source(val);
        let Some(base) = base else {
            value.flow_into(&mut self.builder.system, h, &PointerKey::StaticField { field });
            return;
        };
        let base = self.source(base);
        let system = &mut self.builder.system;
        match (base, value) {
            (_, ValueSource::Empty) | (ValueSource::Empty, _) => {}
            (ValueSource::Var(base), ValueSource::Var(value)) => {
                let val = system.find_or_create_var(&value, None);
                system.new_statement(SideEffect::PutField { field, val }, &base);
            }
            (ValueSource::Var(base), ValueSource::Instances(values)) => {
                for instance in values {
                    system.new_statement(SideEffect::InstancePutField { field, instance }, &base);
                }
            }
            (ValueSource::Instances(bases), value) => {
                for o in bases {
                    if let Some(slot) = system.instance_field_key(h, o, field) {
                        value.flow_into(system, h, &slot);
                    }
                }
            }
        }
    }

    fn visit_array_load(&mut self, def: ValueNumber, array: ValueNumber) {
        if self.implicit_unless_used(def) {
            return;
        }
        let h = self.h;
        let lhs = self.local(def);
        let array = self.source(array);
        let system = &mut self.builder.system;
        match array {
            ValueSource::Var(array) => {
                let def = system.find_or_create_var(&lhs, None);
                system.new_statement(SideEffect::ArrayLoad { def }, &array);
            }
            ValueSource::Instances(arrays) => {
                for o in arrays {
                    if let Some((contents, filter)) = system.array_contents_key(h, o) {
                        system.find_or_create_var(&contents, filter.as_ref());
                        system.new_assign(h, &lhs, &contents);
                    }
                }
            }
            ValueSource::Empty => {}
        }
    }

    fn visit_array_store(&mut self, array: ValueNumber, val: ValueNumber) {
        let h = self.h;
        let value = self.source(val);
        let array = self.source(array);
        let system = &mut self.builder.system;
        match (array, value) {
            (_, ValueSource::Empty) | (ValueSource::Empty, _) => {}
            (ValueSource::Var(array), ValueSource::Var(value)) => {
                let val = system.find_or_create_var(&value, None);
                system.new_statement(SideEffect::ArrayStore { val }, &array);
            }
            (ValueSource::Var(array), ValueSource::Instances(values)) => {
                for instance in values {
                    system.new_statement(SideEffect::InstanceArrayStore { instance }, &array);
                }
            }
            (ValueSource::Instances(arrays), value) => {
                for o in arrays {
                    match system.array_contents_key(h, o) {
                        Some((contents, Some(filter))) => {
                            let contents = FilteredPointerKey::new(contents, filter);
                            value.flow_filtered(system, h, UnaryOp::Filter, &contents);
                        }
                        Some((contents, None)) => value.flow_into(system, h, &contents),
                        None => {}
                    }
                }
            }
        }
    }

    fn visit_invoke(
        &mut self,
        pc: Pc,
        def: Option<ValueNumber>,
        exception: ValueNumber,
        target: &MethodRef,
        kind: DispatchKind,
        args: &[ValueNumber],
    ) {
        let h = self.h;
        let node = self.node;
        let site = CallSiteRef::new(pc, target.clone(), kind);
        let args: Vec<ValueSource> = args.iter().map(|a| self.source(*a)).collect();
        let def = match def {
            Some(def) if !self.implicit_unless_used(def) => Some(self.local(def)),
            _ => None,
        };
        let call = PendingCall {
            site: site.clone(),
            args,
            def,
            exception: self.local(exception),
        };
        let builder = &mut *self.builder;
        let call = builder.resolver.register_call(node, call);
        let needs_receiver = builder.resolver.context_selector().needs_receiver(&site);
        let system = &mut builder.system;
        let resolver = &mut builder.resolver;

        if !kind.has_receiver() || (!kind.is_dispatch() && !needs_receiver) {
            if let Some(callee) = resolver.resolve_call(h, node, &site, None) {
                resolver.connect_call(system, h, node, &call, callee, ReceiverPassing::Plain);
            }
            return;
        }
        match call.args.first() {
            Some(ValueSource::Instances(receivers)) => {
                for o in receivers {
                    let key = system.instance_key(*o).clone();
                    if let Some(callee) = resolver.resolve_call(h, node, &site, Some((*o, &key))) {
                        resolver.connect_call(system, h, node, &call, callee, ReceiverPassing::Instance(*o));
                    }
                }
            }
            Some(ValueSource::Var(receiver)) => {
                if kind.is_dispatch() && !needs_receiver {
                    let context_bound = resolver.context_selector().context_bound();
                    if let Some(m) = builder.bounds.unique_target(h, &site, context_bound) {
                        let declaring_class = h.method(m).declaring_class;
                        if let Some(callee) = resolver.resolve_for_type(h, node, &site, Some(declaring_class), None) {
                            resolver.connect_call(system, h, node, &call, callee, ReceiverPassing::Filtered(m));
                        }
                        return;
                    }
                }
                system.new_statement(SideEffect::Dispatch { caller: node, pc }, receiver);
            }
            Some(ValueSource::Empty) | None => {}
        }
    }

    /// Routes the exceptions raised at `pc` to the covering handlers, and the
    /// rest to the exceptional return value.
    fn visit_exceptions(&mut self, pc: Pc, instruction: &Instruction) {
        let mut raised = Vec::new();
        match instruction {
            Instruction::Invoke { exception, .. } => raised.push(ValueSource::Var(self.local(*exception))),
            Instruction::Throw { exception } => raised.push(self.source(*exception)),
            _ => {}
        }
        let body = self.body;
        for implicit in body.implicit_exceptions.iter().filter(|e| e.pc == pc) {
            let key = self.builder.heap.instance_for_pei(self.h, self.site(pc), &implicit.ty);
            match self.intern(key) {
                Some(id) => raised.push(ValueSource::Instances(vec![id])),
                None => {
                    self.lookup_class(&implicit.ty);
                }
            }
        }
        if raised.iter().all(|s| *s == ValueSource::Empty) {
            return;
        }

        let h = self.h;
        let root = h.root_class();
        let throwable = h.throwable_class();
        let mut caught = Vec::new();
        let mut catches_all = false;
        for handler in self.def_use.handlers_of(pc).to_vec() {
            let Some(Instruction::Catch { def, types, .. }) = body.instruction(handler) else {
                continue;
            };
            let implicit = self.implicit_unless_used(*def);
            let lhs = self.local(*def);
            for ty in types {
                let Some(class) = self.lookup_class(ty) else {
                    continue;
                };
                let is_all = class == root || Some(class) == throwable;
                if is_all {
                    catches_all = true;
                } else {
                    caught.push(class);
                }
                if implicit {
                    continue;
                }
                let system = &mut self.builder.system;
                if is_all {
                    for source in &raised {
                        source.flow_into(system, h, &lhs);
                    }
                } else {
                    let typed = FilteredPointerKey::typed(lhs.clone(), TypeFilter::SingleClass(class));
                    for source in &raised {
                        source.flow_filtered(system, h, UnaryOp::Filter, &typed);
                    }
                    system.new_assign(h, &lhs, &typed.key);
                }
            }
        }
        if catches_all {
            return;
        }
        let escape = PointerKey::ExceptionalReturnValue { node: self.node };
        let system = &mut self.builder.system;
        if caught.is_empty() {
            for source in &raised {
                source.flow_into(system, h, &escape);
            }
        } else {
            let uncaught = FilteredPointerKey::typed(escape.clone(), TypeFilter::classes(caught));
            for source in &raised {
                source.flow_filtered(system, h, UnaryOp::InverseFilter, &uncaught);
            }
            system.new_assign(h, &escape, &uncaught.key);
        }
    }
}
