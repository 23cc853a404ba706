// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The worklist engine propagating points-to sets along the constraint graph.

use std::collections::{HashMap, VecDeque};

use log::*;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use super::operators::{SideEffect, Statement, UnaryOp};
use crate::graph::call_graph::CGNodeId;
use crate::graph::propagation_graph::{PropagationGraph, StmtId};
use crate::heap::{FilteredPointerKey, InstanceId, InstanceKey, PointerKey, TypeFilter};
use crate::ir::{ClassHierarchy, ClassId, FieldId, MethodId, Pc};
use crate::pta::{PointsTo, VarId, WorklistOrder};
use crate::pts_set::points_to::PointsToSet;
use crate::pts_set::points_to_map::PointsToMap;
use crate::util::bit_vec::BitVec;
use crate::util::cancel::CancelToken;
use crate::util::error::PtaResult;
use crate::util::mapping::IndexMapping;

/// Resolves the call at `pc` of `caller` for newly seen receivers. Called
/// while a dispatch statement is evaluated.
pub trait DispatchHandler {
    fn dispatch(
        &mut self,
        system: &mut PropagationSystem,
        h: &dyn ClassHierarchy,
        caller: CGNodeId,
        pc: Pc,
        receivers: &[InstanceId],
    );
}

/// Ignores dispatch statements.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDispatch;

impl DispatchHandler for NoDispatch {
    fn dispatch(&mut self, _: &mut PropagationSystem, _: &dyn ClassHierarchy, _: CGNodeId, _: Pc, _: &[InstanceId]) {}
}

/// Whether `method` is what the concrete type `class` dispatches its selector to.
pub fn dispatches_to(h: &dyn ClassHierarchy, class: ClassId, method: MethodId) -> bool {
    h.resolve_method(class, &h.method(method).selector) == Some(method)
}

/// Owns the points-to map, the constraint graph and the instance keys of one
/// analysis run.
///
/// New unary constraints are evaluated against the full current value of
/// their right-hand side as soon as they are added. New statements are queued
/// and evaluated on the next `solve`, since they may need to dispatch calls.
pub struct PropagationSystem {
    map: PointsToMap,
    graph: PropagationGraph,
    instances: IndexMapping<InstanceKey, InstanceId>,
    /// Instances assignable to each class, root excluded.
    class_instances: HashMap<ClassId, PointsTo<InstanceId>>,
    worklist: VecDeque<VarId>,
    in_worklist: BitVec<VarId>,
    order: WorklistOrder,
    pending_statements: Vec<StmtId>,
    simple_only: bool,
    num_changes: usize,
    num_constraint_changes: usize,
    num_steps: usize,
    scratch: Vec<(UnaryOp, VarId)>,
}

impl Default for PropagationSystem {
    fn default() -> Self {
        Self::new(WorklistOrder::Fifo)
    }
}

impl PropagationSystem {
    pub fn new(order: WorklistOrder) -> Self {
        PropagationSystem {
            map: PointsToMap::new(),
            graph: PropagationGraph::new(),
            instances: IndexMapping::new(),
            class_instances: HashMap::new(),
            worklist: VecDeque::new(),
            in_worklist: BitVec::new_empty(),
            order,
            pending_statements: Vec::new(),
            simple_only: false,
            num_changes: 0,
            num_constraint_changes: 0,
            num_steps: 0,
            scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn map(&self) -> &PointsToMap {
        &self.map
    }

    #[inline]
    pub(crate) fn map_mut(&mut self) -> &mut PointsToMap {
        &mut self.map
    }

    #[inline]
    pub fn graph(&self) -> &PropagationGraph {
        &self.graph
    }

    pub fn order(&self) -> WorklistOrder {
        self.order
    }

    /// Monotone counter of every change made to the constraint system.
    pub fn num_changes(&self) -> usize {
        self.num_changes
    }

    /// Monotone counter of changes to the constraints themselves: new edges,
    /// statements, root instances and unifications. Set growth is not counted.
    pub fn num_constraint_changes(&self) -> usize {
        self.num_constraint_changes
    }

    /// Number of variables popped from the worklist so far.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn has_pending_work(&self) -> bool {
        !self.worklist.is_empty() || !self.pending_statements.is_empty()
    }

    // Instances

    /// Interns `key`. A new instance is registered with all its supertypes.
    pub fn find_or_create_instance(&mut self, h: &dyn ClassHierarchy, key: InstanceKey) -> InstanceId {
        if let Some(id) = self.instances.index_of(&key) {
            return id;
        }
        let class = key.concrete_type();
        let id = self.instances.add(key);
        let root = h.root_class();
        for sup in h.supertypes(class) {
            if *sup != root {
                self.class_instances.entry(*sup).or_default().insert(id);
            }
        }
        id
    }

    pub fn instance_id(&self, key: &InstanceKey) -> Option<InstanceId> {
        self.instances.index_of(key)
    }

    #[inline]
    pub fn instance_key(&self, id: InstanceId) -> &InstanceKey {
        self.instances.get(id)
    }

    pub fn instances(&self) -> impl Iterator<Item = (InstanceId, &InstanceKey)> {
        self.instances.iter()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Instances assignable to `class`. Not meaningful for the root class.
    pub fn instances_of_class(&self, class: ClassId) -> Option<&PointsTo<InstanceId>> {
        self.class_instances.get(&class)
    }

    /// The field slot of `instance`, if its type declares or inherits `field`.
    pub fn instance_field_key(&self, h: &dyn ClassHierarchy, instance: InstanceId, field: FieldId) -> Option<PointerKey> {
        let declaring_class = h.field(field).declaring_class;
        let class = self.instance_key(instance).concrete_type();
        if h.is_assignable(class, declaring_class) {
            Some(PointerKey::InstanceField { instance, field })
        } else {
            None
        }
    }

    /// The contents slot of an array instance holding references, filtered by
    /// the element class unless that is the root class.
    pub fn array_contents_key(&self, h: &dyn ClassHierarchy, instance: InstanceId) -> Option<(PointerKey, Option<TypeFilter>)> {
        let class = self.instance_key(instance).concrete_type();
        let element = h.class(class).array_element.as_ref()?;
        if element.is_primitive() {
            return None;
        }
        let filter = match h.lookup_class(element) {
            Some(elem) if elem != h.root_class() => Some(TypeFilter::SingleClass(elem)),
            _ => None,
        };
        Some((PointerKey::ArrayContents { instance }, filter))
    }

    // Filters

    pub fn accepts(&self, h: &dyn ClassHierarchy, filter: &TypeFilter, instance: InstanceId) -> bool {
        match filter {
            TypeFilter::SingleClass(class) => self.is_instance_of(h, *class, instance),
            TypeFilter::MultipleClasses(classes) => classes.iter().any(|c| self.is_instance_of(h, *c, instance)),
            TypeFilter::SingleInstance(only) => *only == instance,
            TypeFilter::TargetMethod(method) => dispatches_to(h, self.instance_key(instance).concrete_type(), *method),
        }
    }

    fn is_instance_of(&self, h: &dyn ClassHierarchy, class: ClassId, instance: InstanceId) -> bool {
        class == h.root_class()
            || self
                .class_instances
                .get(&class)
                .map_or(false, |set| set.contains(instance))
    }

    /// The members of `values` accepted by `filter`.
    pub fn filter_set(&self, h: &dyn ClassHierarchy, filter: &TypeFilter, values: &PointsTo<InstanceId>) -> PointsTo<InstanceId> {
        let root = h.root_class();
        let by_class = |class: ClassId| -> PointsTo<InstanceId> {
            if class == root {
                return values.clone();
            }
            match self.class_instances.get(&class) {
                Some(instances) => {
                    let mut accepted = values.clone();
                    accepted.intersect(instances);
                    accepted
                }
                None => PointsTo::new(),
            }
        };
        match filter {
            TypeFilter::SingleClass(class) => by_class(*class),
            TypeFilter::MultipleClasses(classes) => {
                let mut accepted = PointsTo::new();
                for class in classes {
                    accepted.union(&by_class(*class));
                }
                accepted
            }
            TypeFilter::SingleInstance(only) => values.iter().filter(|o| o == only).collect(),
            TypeFilter::TargetMethod(_) => values.iter().filter(|o| self.accepts(h, filter, *o)).collect(),
        }
    }

    fn filter_of(&self, op: UnaryOp, lhs: VarId) -> TypeFilter {
        match self.map.var(lhs).filter() {
            Some(filter) => filter.clone(),
            None => panic!("{:?} constraint into unfiltered {:?}", op, self.map.key(lhs)),
        }
    }

    /// Adds `op(values)` to `lhs`.
    fn apply(&mut self, h: &dyn ClassHierarchy, op: UnaryOp, lhs: VarId, values: &PointsTo<InstanceId>) -> bool {
        let changed = match op {
            UnaryOp::Assign => self.map.var_mut(lhs).add_all(values),
            UnaryOp::Filter => {
                let accepted = self.filter_set(h, &self.filter_of(op, lhs), values);
                self.map.var_mut(lhs).add_all(&accepted)
            }
            UnaryOp::InverseFilter => {
                let accepted = self.filter_set(h, &self.filter_of(op, lhs), values);
                self.map.var_mut(lhs).add_all(&values.difference(&accepted))
            }
        };
        if changed {
            self.num_changes += 1;
            self.enqueue(lhs);
        }
        changed
    }

    // Constraints

    pub fn find_or_create_var(&mut self, key: &PointerKey, filter: Option<&TypeFilter>) -> VarId {
        self.map.find_or_create(key, filter)
    }

    /// Adds `lhs ⊇ op(rhs)`. A filter operator needs a filter on `lhs`, either
    /// given here or installed earlier.
    pub fn new_constraint(
        &mut self,
        h: &dyn ClassHierarchy,
        op: UnaryOp,
        lhs: &PointerKey,
        filter: Option<&TypeFilter>,
        rhs: &PointerKey,
    ) -> bool {
        let lhs = self.map.find_or_create(lhs, filter);
        let rhs = self.map.find_or_create(rhs, None);
        self.new_unary(h, op, lhs, rhs)
    }

    pub fn new_assign(&mut self, h: &dyn ClassHierarchy, lhs: &PointerKey, rhs: &PointerKey) -> bool {
        self.new_constraint(h, UnaryOp::Assign, lhs, None, rhs)
    }

    pub fn new_filtered(&mut self, h: &dyn ClassHierarchy, op: UnaryOp, lhs: &FilteredPointerKey, rhs: &PointerKey) -> bool {
        self.new_constraint(h, op, &lhs.key, Some(&lhs.filter), rhs)
    }

    /// Adds the edge `lhs ⊇ op(rhs)` between variables, and pushes the current
    /// value of `rhs` across it.
    pub fn new_unary(&mut self, h: &dyn ClassHierarchy, op: UnaryOp, lhs: VarId, rhs: VarId) -> bool {
        let lhs = self.map.representative(lhs);
        let rhs = self.map.representative(rhs);
        if lhs == rhs && op == UnaryOp::Assign {
            return false;
        }
        if op != UnaryOp::Assign {
            assert!(
                self.map.var(lhs).filter().is_some(),
                "{:?} constraint into unfiltered {:?}",
                op,
                self.map.key(lhs)
            );
        }
        if !self.graph.add_unary(op, lhs, rhs) {
            return false;
        }
        self.num_changes += 1;
        self.num_constraint_changes += 1;
        let value = self.map.var(rhs).value();
        if !value.is_empty() {
            self.apply(h, op, lhs, &value);
        }
        true
    }

    /// Adds `lhs ∋ instance`. Under a filter operator the instance is checked
    /// against the filter of `lhs`. The variable becomes a root.
    pub fn new_instance_constraint(
        &mut self,
        h: &dyn ClassHierarchy,
        op: UnaryOp,
        lhs: &PointerKey,
        filter: Option<&TypeFilter>,
        instance: InstanceId,
    ) -> bool {
        let var = self.map.find_or_create(lhs, filter);
        let admitted = match op {
            UnaryOp::Assign => true,
            UnaryOp::Filter => self.accepts(h, &self.filter_of(op, var), instance),
            UnaryOp::InverseFilter => !self.accepts(h, &self.filter_of(op, var), instance),
        };
        if !admitted {
            return false;
        }
        self.map.record_root(var);
        if self.map.var_mut(var).add(instance) {
            self.num_changes += 1;
            self.num_constraint_changes += 1;
            self.enqueue(var);
            true
        } else {
            false
        }
    }

    pub fn add_instance(&mut self, h: &dyn ClassHierarchy, lhs: &PointerKey, instance: InstanceId) -> bool {
        self.new_instance_constraint(h, UnaryOp::Assign, lhs, None, instance)
    }

    /// Adds a side-effect statement on `rhs`. It is evaluated on the next solve.
    pub fn new_statement(&mut self, op: SideEffect, rhs: &PointerKey) -> bool {
        let rhs = self.map.find_or_create(rhs, None);
        self.new_statement_on(op, rhs)
    }

    pub fn new_statement_on(&mut self, mut op: SideEffect, rhs: VarId) -> bool {
        let rhs = self.map.representative(rhs);
        if let Some(fixed) = op.fixed_var() {
            op.replace_fixed_var(fixed, self.map.representative(fixed));
        }
        match self.graph.add_statement(op, rhs) {
            Some(id) => {
                self.num_changes += 1;
                self.num_constraint_changes += 1;
                self.pending_statements.push(id);
                true
            }
            None => false,
        }
    }

    /// The current value of an explicit pointer key.
    pub fn points_to(&self, key: &PointerKey) -> Option<PointsTo<InstanceId>> {
        self.map.lookup(key).map(|var| var.value())
    }

    // Solving

    fn enqueue(&mut self, var: VarId) {
        if self.in_worklist.insert(var) {
            self.worklist.push_back(var);
        }
    }

    fn pop(&mut self) -> Option<VarId> {
        let var = match self.order {
            WorklistOrder::Fifo => self.worklist.pop_front(),
            WorklistOrder::Lifo => self.worklist.pop_back(),
        }?;
        self.in_worklist.remove(var);
        Some(var)
    }

    /// Pushes the pending diff of `var` along its constraints.
    fn process(&mut self, h: &dyn ClassHierarchy, handler: &mut dyn DispatchHandler, var: VarId) {
        self.num_steps += 1;
        let var = self.map.representative(var);
        let diff = self.map.var_mut(var).take_diff();
        if diff.is_empty() {
            return;
        }
        let mut uses = std::mem::take(&mut self.scratch);
        uses.clear();
        self.graph.collect_unary_uses(var, &mut uses);
        for (op, lhs) in &uses {
            self.apply(h, *op, *lhs, &diff);
        }
        self.scratch = uses;

        if !self.simple_only {
            let statements = self.graph.statements_using(var).to_vec();
            for id in statements {
                self.evaluate_statement(h, handler, id, Some(&diff));
            }
        }
    }

    /// Evaluates a statement on `values`, or on the full value of its
    /// right-hand side when `values` is `None`.
    fn evaluate_statement(
        &mut self,
        h: &dyn ClassHierarchy,
        handler: &mut dyn DispatchHandler,
        id: StmtId,
        values: Option<&PointsTo<InstanceId>>,
    ) {
        let Some(mut stmt) = self.graph.take_statement(id) else {
            return;
        };
        let fresh = match values {
            Some(values) => values.difference(&stmt.prior),
            None => self.map.var(stmt.rhs).value().difference(&stmt.prior),
        };
        if !fresh.is_empty() {
            stmt.prior.union(&fresh);
            self.evaluate(h, handler, &stmt, &fresh);
        }
        self.graph.restore_statement(id, stmt);
    }

    fn evaluate(
        &mut self,
        h: &dyn ClassHierarchy,
        handler: &mut dyn DispatchHandler,
        stmt: &Statement,
        fresh: &PointsTo<InstanceId>,
    ) {
        match &stmt.op {
            SideEffect::GetField { field, def } => {
                for o in fresh.iter() {
                    if let Some(key) = self.instance_field_key(h, o, *field) {
                        let slot = self.map.find_or_create(&key, None);
                        self.new_unary(h, UnaryOp::Assign, *def, slot);
                    }
                }
            }
            SideEffect::PutField { field, val } => {
                for o in fresh.iter() {
                    if let Some(key) = self.instance_field_key(h, o, *field) {
                        let slot = self.map.find_or_create(&key, None);
                        self.new_unary(h, UnaryOp::Assign, slot, *val);
                    }
                }
            }
            SideEffect::ArrayLoad { def } => {
                for o in fresh.iter() {
                    if let Some((key, filter)) = self.array_contents_key(h, o) {
                        let slot = self.map.find_or_create(&key, filter.as_ref());
                        self.new_unary(h, UnaryOp::Assign, *def, slot);
                    }
                }
            }
            SideEffect::ArrayStore { val } => {
                for o in fresh.iter() {
                    if let Some((key, filter)) = self.array_contents_key(h, o) {
                        let op = if filter.is_some() { UnaryOp::Filter } else { UnaryOp::Assign };
                        let slot = self.map.find_or_create(&key, filter.as_ref());
                        self.new_unary(h, op, slot, *val);
                    }
                }
            }
            SideEffect::InstancePutField { field, instance } => {
                for o in fresh.iter() {
                    if let Some(key) = self.instance_field_key(h, o, *field) {
                        self.add_instance(h, &key, *instance);
                    }
                }
            }
            SideEffect::InstanceArrayStore { instance } => {
                for o in fresh.iter() {
                    if let Some((key, filter)) = self.array_contents_key(h, o) {
                        let op = if filter.is_some() { UnaryOp::Filter } else { UnaryOp::Assign };
                        self.new_instance_constraint(h, op, &key, filter.as_ref(), *instance);
                    }
                }
            }
            SideEffect::Dispatch { caller, pc } => {
                let receivers: Vec<InstanceId> = fresh.iter().collect();
                handler.dispatch(self, h, *caller, *pc, &receivers);
            }
        }
    }

    fn evaluate_pending(&mut self, h: &dyn ClassHierarchy, handler: &mut dyn DispatchHandler) {
        while !self.pending_statements.is_empty() {
            let pending = std::mem::take(&mut self.pending_statements);
            for id in pending {
                self.evaluate_statement(h, handler, id, None);
            }
        }
    }

    /// Runs the worklist to a fixed point. Returns whether anything changed.
    pub fn solve(
        &mut self,
        h: &dyn ClassHierarchy,
        handler: &mut dyn DispatchHandler,
        cancel: &CancelToken,
    ) -> PtaResult<bool> {
        let before = self.num_changes;
        self.simple_only = false;
        loop {
            self.evaluate_pending(h, handler);
            let Some(var) = self.pop() else {
                if self.pending_statements.is_empty() {
                    break;
                }
                continue;
            };
            cancel.check()?;
            self.process(h, handler, var);
        }
        debug!("Solved the propagation system after {} steps", self.num_steps);
        Ok(self.num_changes != before)
    }

    /// Processes at most one worklist entry. Returns false when there was none.
    pub fn step(&mut self, h: &dyn ClassHierarchy, handler: &mut dyn DispatchHandler) -> bool {
        self.simple_only = false;
        self.evaluate_pending(h, handler);
        match self.pop() {
            Some(var) => {
                self.process(h, handler, var);
                true
            }
            None => false,
        }
    }

    /// Propagates along unary edges only. Statements are left to
    /// [`Self::evaluate_complex`].
    pub fn propagate_simple(&mut self, h: &dyn ClassHierarchy, cancel: &CancelToken) -> PtaResult<()> {
        self.simple_only = true;
        while let Some(var) = self.pop() {
            if let Err(e) = cancel.check() {
                self.simple_only = false;
                return Err(e);
            }
            self.process(h, &mut NoDispatch, var);
        }
        self.simple_only = false;
        Ok(())
    }

    /// Evaluates every statement once on the instances it has not seen yet.
    /// Returns whether anything changed.
    pub fn evaluate_complex(&mut self, h: &dyn ClassHierarchy, handler: &mut dyn DispatchHandler) -> bool {
        let before = self.num_changes;
        self.pending_statements.clear();
        for id in self.graph.statement_ids() {
            self.evaluate_statement(h, handler, id, None);
        }
        // Statements added during this pass have seen nothing yet.
        let added = std::mem::take(&mut self.pending_statements);
        for id in added {
            self.evaluate_statement(h, handler, id, None);
        }
        self.num_changes != before
    }

    // Unification

    /// Merges the variables of `ids` and redirects their constraints to the
    /// representative, which is returned.
    pub fn unify(&mut self, ids: &[VarId]) -> VarId {
        let (rep, merged) = self.map.unify(ids);
        for old in &merged {
            self.graph.replace_var(*old, rep);
        }
        self.num_changes += 1;
        self.num_constraint_changes += 1;
        self.enqueue(rep);
        rep
    }

    /// Unifies the strongly connected components of the assignment relation.
    /// Filtered variables never take part. Returns the number of components
    /// collapsed.
    pub fn collapse_cycles(&mut self) -> usize {
        let Some(assign) = self.graph.relation(UnaryOp::Assign) else {
            return 0;
        };
        let mut flow = DiGraphMap::<VarId, ()>::new();
        for (lhs, rhs) in assign.edges() {
            if self.map.var(lhs).filter().is_some() || self.map.var(rhs).filter().is_some() {
                continue;
            }
            flow.add_edge(rhs, lhs, ());
        }
        let cycles: Vec<Vec<VarId>> = tarjan_scc(&flow).into_iter().filter(|scc| scc.len() > 1).collect();
        for cycle in &cycles {
            self.unify(cycle);
        }
        if !cycles.is_empty() {
            debug!("Collapsed {} assignment cycles", cycles.len());
        }
        cycles.len()
    }

    /// Clears every derived set and queues the roots, so the next propagation
    /// recomputes the derived sets from scratch.
    pub fn revert_to_pre_transitive(&mut self) {
        self.map.revert_to_pre_transitive();
        let roots: Vec<VarId> = self.map.live_ids().filter(|id| self.map.is_root(*id)).collect();
        for root in roots {
            self.enqueue(root);
        }
    }
}
