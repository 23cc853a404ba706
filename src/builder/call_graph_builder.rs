// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! On-the-fly call-graph construction. Reachable nodes get their constraints
//! generated once; solving the constraints then discovers new call targets,
//! whose nodes are processed in turn.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use itertools::Itertools;
use log::*;

use super::concrete_types_of;
use super::constraint_visitor::ConstraintVisitor;
use super::dispatch_bound::DispatchBoundEstimator;
use super::reflection::ReflectionHandler;
use super::target_selector::{ClassHierarchyTargetSelector, ExclusionTargetSelector, MethodTargetSelector};
use crate::graph::call_graph::{CGNodeId, CallGraph};
use crate::heap::{
    make_instance_factory, AllocationSite, FilteredPointerKey, InstanceId, InstanceKey, InstanceKeyFactory, PointerKey,
    TypeFilter,
};
use crate::ir::{CallSiteRef, ClassHierarchy, ClassId, MethodId, MethodRef, Pc};
use crate::pta::context::{ContextCache, ContextId};
use crate::pta::context_strategy::{make_context_selector, ContextSelector};
use crate::pta::pointer_analysis::PointerAnalysis;
use crate::pta::propagator::operators::UnaryOp;
use crate::pta::propagator::system::{DispatchHandler, PropagationSystem};
use crate::pta::make_solver;
use crate::util::cancel::CancelToken;
use crate::util::error::{PtaError, PtaResult};
use crate::util::options::AnalysisOptions;
use crate::util::warnings::{Severity, WarningKind, Warnings};

/// Synthetic allocation sites of entry-point arguments are numbered from here,
/// by parameter index.
pub const ENTRYPOINT_PC_BASE: Pc = 1 << 31;
/// Synthetic allocation sites of factory methods are numbered from here, by
/// allocated class.
pub const REFLECTION_PC_BASE: Pc = 1 << 30;

/// Where the objects of an operand come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueSource {
    /// The variable of a pointer key.
    Var(PointerKey),
    /// Fixed instances, for operands defined by allocations or constants.
    Instances(Vec<InstanceId>),
    /// No objects at all: null and primitive constants.
    Empty,
}

impl ValueSource {
    /// Adds `lhs ⊇ self`.
    pub fn flow_into(&self, system: &mut PropagationSystem, h: &dyn ClassHierarchy, lhs: &PointerKey) {
        match self {
            ValueSource::Var(rhs) => {
                system.new_assign(h, lhs, rhs);
            }
            ValueSource::Instances(ids) => {
                for id in ids {
                    system.add_instance(h, lhs, *id);
                }
            }
            ValueSource::Empty => {}
        }
    }

    /// Adds `lhs ⊇ op(self)` under the filter of `lhs`.
    pub fn flow_filtered(
        &self,
        system: &mut PropagationSystem,
        h: &dyn ClassHierarchy,
        op: UnaryOp,
        lhs: &FilteredPointerKey,
    ) {
        match self {
            ValueSource::Var(rhs) => {
                system.new_filtered(h, op, lhs, rhs);
            }
            ValueSource::Instances(ids) => {
                for id in ids {
                    system.new_instance_constraint(h, op, &lhs.key, Some(&lhs.filter), *id);
                }
            }
            ValueSource::Empty => {}
        }
    }
}

/// A call site of a visited node, with everything needed to connect it to
/// targets found later.
#[derive(Debug)]
pub struct PendingCall {
    pub site: CallSiteRef,
    /// Sources of the actual arguments, receiver first.
    pub args: Vec<ValueSource>,
    /// The local receiving the result; `None` when absent or implicit.
    pub def: Option<PointerKey>,
    pub exception: PointerKey,
}

/// How the receiver of a resolved call reaches the callee.
#[derive(Clone, Copy, Debug)]
pub enum ReceiverPassing {
    /// Exactly this receiver object.
    Instance(InstanceId),
    /// The receiver variable, restricted to objects dispatching to the method.
    Filtered(MethodId),
    /// The whole receiver variable.
    Plain,
}

/// Resolves calls to call-graph nodes and wires arguments to parameters.
pub struct CallResolver {
    pub call_graph: CallGraph,
    pub contexts: ContextCache,
    pub warnings: Warnings,
    context_selector: Box<dyn ContextSelector>,
    target_selector: Box<dyn MethodTargetSelector>,
    /// Nodes created since the last time they were taken.
    discovered: Vec<CGNodeId>,
    calls: HashMap<(CGNodeId, Pc), Rc<PendingCall>>,
}

impl CallResolver {
    pub fn new(context_selector: Box<dyn ContextSelector>, target_selector: Box<dyn MethodTargetSelector>) -> Self {
        CallResolver {
            call_graph: CallGraph::new(),
            contexts: ContextCache::new(),
            warnings: Warnings::new(),
            context_selector,
            target_selector,
            discovered: Vec::new(),
            calls: HashMap::new(),
        }
    }

    pub fn context_selector(&self) -> &dyn ContextSelector {
        self.context_selector.as_ref()
    }

    pub fn register_call(&mut self, caller: CGNodeId, call: PendingCall) -> Rc<PendingCall> {
        let call = Rc::new(call);
        self.calls.insert((caller, call.site.pc), call.clone());
        call
    }

    pub fn pending_call(&self, caller: CGNodeId, pc: Pc) -> Option<&Rc<PendingCall>> {
        self.calls.get(&(caller, pc))
    }

    fn take_discovered(&mut self) -> Vec<CGNodeId> {
        std::mem::take(&mut self.discovered)
    }

    /// The node `site` of `caller` invokes, for the given receiver object.
    /// `None` means no edge: the target is unresolvable, excluded or abstract.
    pub fn resolve_call(
        &mut self,
        h: &dyn ClassHierarchy,
        caller: CGNodeId,
        site: &CallSiteRef,
        receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> Option<CGNodeId> {
        let receiver_type = receiver.map(|(_, key)| key.concrete_type());
        self.resolve_for_type(h, caller, site, receiver_type, receiver)
    }

    pub(crate) fn resolve_for_type(
        &mut self,
        h: &dyn ClassHierarchy,
        caller: CGNodeId,
        site: &CallSiteRef,
        receiver_type: Option<ClassId>,
        receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> Option<CGNodeId> {
        let Some(target) = self.target_selector.select_target(h, site, receiver_type) else {
            let receiver_name = receiver_type.map_or("none", |c| h.class(c).name.as_str());
            self.warnings.add(
                Severity::Mild,
                WarningKind::UnresolvedCallTarget,
                format!("no target for {} with receiver type {}", site, receiver_name),
            );
            return None;
        };
        if h.method(target).is_abstract {
            return None;
        }
        let caller_node = *self.call_graph.node(caller);
        let context = self.context_selector.callee_context(
            h,
            &self.call_graph,
            &mut self.contexts,
            &caller_node,
            site,
            target,
            receiver,
        );
        let (node, created) = self.call_graph.find_or_create_node(target, context);
        if created {
            trace!("Discovered {}", self.call_graph.node_label(h, &self.contexts, node));
            self.discovered.push(node);
        }
        Some(node)
    }

    /// Adds the edge `caller -> callee` at the site of `call`. Arguments,
    /// result and exceptions are connected the first time the edge is seen;
    /// a receiver object is passed on every call.
    pub fn connect_call(
        &mut self,
        system: &mut PropagationSystem,
        h: &dyn ClassHierarchy,
        caller: CGNodeId,
        call: &PendingCall,
        callee: CGNodeId,
        receiver: ReceiverPassing,
    ) {
        let is_new = self.call_graph.add_edge(caller, call.site.pc, callee);
        let method = h.method(self.call_graph.node(callee).method);
        let mut first_param = 0;
        if call.site.kind.has_receiver() && !method.is_static {
            first_param = 1;
            let this = PointerKey::local(callee, method.param_value(0));
            match (receiver, call.args.first()) {
                (ReceiverPassing::Instance(o), _) => {
                    system.add_instance(h, &this, o);
                }
                (ReceiverPassing::Filtered(m), Some(arg)) if is_new => {
                    // `this` itself never carries the filter.
                    let typed = FilteredPointerKey::typed(this.clone(), TypeFilter::TargetMethod(m));
                    arg.flow_filtered(system, h, UnaryOp::Filter, &typed);
                    system.new_assign(h, &this, &typed.key);
                }
                (ReceiverPassing::Plain, Some(arg)) if is_new => arg.flow_into(system, h, &this),
                _ => {}
            }
        }
        if !is_new {
            return;
        }
        for i in first_param..method.num_params() {
            if !method.is_reference_param(i) {
                continue;
            }
            let Some(arg) = call.args.get(i) else {
                break;
            };
            arg.flow_into(system, h, &PointerKey::local(callee, method.param_value(i)));
        }
        if let Some(def) = &call.def {
            if method.returns_reference() {
                system.new_assign(h, def, &PointerKey::ReturnValue { node: callee });
            }
        }
        system.new_assign(h, &call.exception, &PointerKey::ExceptionalReturnValue { node: callee });
    }
}

impl DispatchHandler for CallResolver {
    fn dispatch(
        &mut self,
        system: &mut PropagationSystem,
        h: &dyn ClassHierarchy,
        caller: CGNodeId,
        pc: Pc,
        receivers: &[InstanceId],
    ) {
        let Some(call) = self.pending_call(caller, pc).cloned() else {
            panic!("dispatch at pc {} of {:?} without a registered call", pc, caller);
        };
        for o in receivers {
            let key = system.instance_key(*o).clone();
            if let Some(callee) = self.resolve_call(h, caller, &call.site, Some((*o, &key))) {
                self.connect_call(system, h, caller, &call, callee, ReceiverPassing::Instance(*o));
            }
        }
    }
}

/// Builds a call graph together with the points-to sets of its nodes.
pub struct PropagationCallGraphBuilder<'h> {
    h: &'h dyn ClassHierarchy,
    options: AnalysisOptions,
    pub(crate) system: PropagationSystem,
    pub(crate) resolver: CallResolver,
    pub(crate) heap: Box<dyn InstanceKeyFactory>,
    pub(crate) bounds: DispatchBoundEstimator,
    pub(crate) reflection: ReflectionHandler,
    visited: HashSet<CGNodeId>,
    /// Visited nodes whose constraints must be generated again.
    changed: BTreeSet<CGNodeId>,
    cancel: CancelToken,
}

impl<'h> PropagationCallGraphBuilder<'h> {
    /// A builder with the policies named by `options`.
    pub fn new(h: &'h dyn ClassHierarchy, options: AnalysisOptions) -> PtaResult<Self> {
        let context_selector = make_context_selector(options.context_policy, options.context_depth, options.zero_x);
        let heap = make_instance_factory(options.heap_policy, options.zero_x);
        let target_selector: Box<dyn MethodTargetSelector> = if options.exclusions.is_empty() {
            Box::new(ClassHierarchyTargetSelector)
        } else {
            let selector =
                ExclusionTargetSelector::from_patterns(Box::new(ClassHierarchyTargetSelector), &options.exclusions)
                    .map_err(|e| PtaError::InvalidOption(e.to_string()))?;
            Box::new(selector)
        };
        Ok(Self::with_policies(h, options, context_selector, heap, target_selector))
    }

    /// A builder with caller-supplied policies. The policy fields of `options`
    /// are ignored, except for the dispatch bound and the worklist order.
    pub fn with_policies(
        h: &'h dyn ClassHierarchy,
        options: AnalysisOptions,
        context_selector: Box<dyn ContextSelector>,
        heap: Box<dyn InstanceKeyFactory>,
        target_selector: Box<dyn MethodTargetSelector>,
    ) -> Self {
        PropagationCallGraphBuilder {
            h,
            system: PropagationSystem::new(options.worklist_order),
            resolver: CallResolver::new(context_selector, target_selector),
            heap,
            bounds: DispatchBoundEstimator::new(options.dispatch_bound),
            reflection: ReflectionHandler::new(),
            visited: HashSet::new(),
            changed: BTreeSet::new(),
            cancel: CancelToken::new(),
            options,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[inline]
    pub fn hierarchy(&self) -> &'h dyn ClassHierarchy {
        self.h
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn system(&self) -> &PropagationSystem {
        &self.system
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.resolver.call_graph
    }

    pub fn contexts(&self) -> &ContextCache {
        &self.resolver.contexts
    }

    pub fn warnings(&self) -> &Warnings {
        &self.resolver.warnings
    }

    pub fn heap(&self) -> &dyn InstanceKeyFactory {
        self.heap.as_ref()
    }

    pub fn reflection(&self) -> &ReflectionHandler {
        &self.reflection
    }

    pub fn num_visited(&self) -> usize {
        self.visited.len()
    }

    /// Read access to the results.
    pub fn pointer_analysis(&self) -> PointerAnalysis<'_> {
        PointerAnalysis::new(
            self.h,
            &self.system,
            &self.resolver.call_graph,
            &self.resolver.contexts,
            &self.resolver.warnings,
            self.heap.as_ref(),
        )
    }

    /// Builds the call graph reachable from `entrypoints` and the points-to
    /// sets of its nodes.
    pub fn make_call_graph(&mut self, entrypoints: &[MethodRef]) -> PtaResult<()> {
        let now = Instant::now();
        self.add_entrypoints(entrypoints)?;
        let solver = make_solver(self.options.solver);
        info!("Solving with the {} solver", solver.name());
        solver.solve(self)?;
        info!(
            "Call graph construction completed: {} nodes, {} edges, {} instances",
            self.resolver.call_graph.num_nodes(),
            self.resolver.call_graph.num_edges(),
            self.system.num_instances()
        );
        info!("Analysis time: {}", humantime::format_duration(now.elapsed()));
        Ok(())
    }

    /// Adds a root node for each entry point.
    pub fn add_entrypoints(&mut self, entrypoints: &[MethodRef]) -> PtaResult<()> {
        let h = self.h;
        let mut num_roots = 0;
        for entry in entrypoints {
            let Some(method) = h.lookup_method(entry) else {
                self.resolver.warnings.add(
                    Severity::Severe,
                    WarningKind::UnresolvedEntrypoint,
                    format!("cannot resolve entry point {}", entry),
                );
                continue;
            };
            if h.method(method).is_abstract {
                self.resolver.warnings.add(
                    Severity::Severe,
                    WarningKind::UnresolvedEntrypoint,
                    format!("entry point {} is abstract", entry),
                );
                continue;
            }
            let (node, created) = self.resolver.call_graph.find_or_create_node(method, ContextId::EMPTY);
            if created {
                self.resolver.call_graph.add_entrypoint(node);
                self.resolver.discovered.push(node);
                self.add_entrypoint_arguments(node, method);
            }
            num_roots += 1;
        }
        if num_roots == 0 {
            return Err(PtaError::NoEntrypoints(entrypoints.iter().join(", ")));
        }
        debug!("Added {} entry points", num_roots);
        Ok(())
    }

    /// Seeds every reference parameter of an entry point with synthetic
    /// objects of the concrete types it may hold.
    fn add_entrypoint_arguments(&mut self, node: CGNodeId, method: MethodId) {
        let h = self.h;
        let info = h.method(method);
        for i in 0..info.num_params() {
            let ty = &info.params[i];
            if !ty.is_reference() {
                continue;
            }
            let Some(class) = h.lookup_class(ty) else {
                self.resolver.warnings.add(
                    Severity::Moderate,
                    WarningKind::UnresolvedType,
                    format!("parameter type {} of entry point {}", ty, h.method_name(method)),
                );
                continue;
            };
            let param = PointerKey::local(node, info.param_value(i));
            for concrete in concrete_types_of(h, class) {
                let site = AllocationSite {
                    node,
                    method,
                    pc: ENTRYPOINT_PC_BASE + i as Pc,
                };
                if let Some(key) = self.heap.instance_for_allocation(h, site, &h.class(concrete).name) {
                    let id = self.system.find_or_create_instance(h, key);
                    self.system.add_instance(h, &param, id);
                }
            }
        }
    }

    /// Generates the constraints of newly discovered and changed nodes, until
    /// generation discovers nothing more. Returns whether any node was
    /// processed.
    pub fn add_constraints_from_new_nodes(&mut self) -> PtaResult<bool> {
        let mut processed = false;
        loop {
            let discovered = self.resolver.take_discovered();
            let changed = std::mem::take(&mut self.changed);
            if discovered.is_empty() && changed.is_empty() {
                break;
            }
            for node in discovered {
                self.cancel.check()?;
                if self.visited.insert(node) {
                    self.add_constraints_from_node(node);
                    processed = true;
                }
            }
            for node in changed {
                self.cancel.check()?;
                if self.visited.insert(node) {
                    trace!("Changed node {:?} was not visited yet", node);
                }
                self.add_constraints_from_node(node);
                processed = true;
            }
        }
        Ok(processed)
    }

    fn add_constraints_from_node(&mut self, node: CGNodeId) {
        let h = self.h;
        let method = self.resolver.call_graph.node(node).method;
        debug!(
            "Processing {}",
            self.resolver.call_graph.node_label(h, &self.resolver.contexts, node)
        );
        let info = h.method(method);
        if info.body.is_some() {
            ConstraintVisitor::new(self, node).visit();
        } else if !info.is_factory {
            self.resolver.warnings.add(
                Severity::Mild,
                WarningKind::MissingBody,
                format!("no body for {}", h.method_name(method)),
            );
        }
        if info.is_factory {
            self.add_factory_allocations(node, method);
        }
    }

    /// Allocates the types recorded for a factory node into its return value.
    fn add_factory_allocations(&mut self, node: CGNodeId, method: MethodId) {
        let h = self.h;
        let types: Vec<_> = self.reflection.types_of(node).collect();
        let ret = PointerKey::ReturnValue { node };
        for class in types {
            for concrete in concrete_types_of(h, class) {
                let site = AllocationSite {
                    node,
                    method,
                    pc: REFLECTION_PC_BASE + concrete.as_u32(),
                };
                if let Some(key) = self.heap.instance_for_allocation(h, site, &h.class(concrete).name) {
                    let id = self.system.find_or_create_instance(h, key);
                    self.system.add_instance(h, &ret, id);
                }
            }
        }
    }

    /// Matches recorded casts against factory targets. Factory nodes that
    /// gained types are marked changed. Returns whether there were any.
    pub fn update_reflection(&mut self) -> bool {
        if !self.options.reflection {
            return false;
        }
        let changed = self.reflection.update(self.h, &self.resolver.call_graph);
        if changed.is_empty() {
            return false;
        }
        debug!("Reflection changed {} factory nodes", changed.len());
        self.changed.extend(changed);
        true
    }

    /// Runs the propagation system to a fixed point, dispatching calls.
    pub fn solve_system(&mut self) -> PtaResult<bool> {
        self.system.solve(self.h, &mut self.resolver, &self.cancel)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{ClassDecl, DispatchKind, Instruction, MethodDecl, SimpleHierarchy, TypeName};
    use crate::pts_set::points_to::PointsToSet;

    fn hierarchy() -> SimpleHierarchy {
        SimpleHierarchy::from_decls(vec![
            ClassDecl::new("A").method(MethodDecl::new("id(Object)").params(&["Object"]).returns("Object").body(
                vec![Instruction::Return { val: Some(2) }],
            )),
            ClassDecl::new("Main").method(
                MethodDecl::new("main(A)")
                    .static_method()
                    .params(&["A"])
                    .body(vec![
                        Instruction::New {
                            def: 2,
                            ty: TypeName::new("Main"),
                            dims: 1,
                        },
                        Instruction::Invoke {
                            def: Some(3),
                            exception: 4,
                            target: MethodRef::new("A", "id(Object)"),
                            kind: DispatchKind::Virtual,
                            args: vec![1, 2],
                        },
                        Instruction::Return { val: Some(3) },
                    ])
                    .returns("Object"),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn entry_arguments_flow_through_dispatched_calls() {
        let h = hierarchy();
        let mut builder = PropagationCallGraphBuilder::new(&h, AnalysisOptions::default()).unwrap();
        builder.make_call_graph(&[MethodRef::new("Main", "main(A)")]).unwrap();
        let cg = builder.call_graph();
        assert_eq!(cg.num_nodes(), 2);
        let main = cg.entrypoints()[0];
        let pa = builder.pointer_analysis();
        let ret = pa.points_to(&PointerKey::ReturnValue { node: main });
        assert_eq!(ret.count(), 1);
        let o = ret.iter().next().unwrap();
        assert!(matches!(pa.instance_key(o), InstanceKey::Allocation { pc: 0, .. }));
    }

    #[test]
    fn unresolvable_entrypoints_are_fatal() {
        let h = hierarchy();
        let mut builder = PropagationCallGraphBuilder::new(&h, AnalysisOptions::default()).unwrap();
        let result = builder.make_call_graph(&[MethodRef::new("Main", "missing()")]);
        assert!(matches!(result, Err(PtaError::NoEntrypoints(_))));
        assert_eq!(builder.warnings().of_kind(WarningKind::UnresolvedEntrypoint).count(), 1);
    }

    #[test]
    fn invalid_exclusions_are_rejected() {
        let h = hierarchy();
        let options = AnalysisOptions {
            exclusions: vec!["(".to_string()],
            ..AnalysisOptions::default()
        };
        assert!(matches!(
            PropagationCallGraphBuilder::new(&h, options),
            Err(PtaError::InvalidOption(_))
        ));
    }
}
