// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};

use super::context::{Context, ContextCache, ContextElem, ContextId};
use crate::graph::call_graph::{CallGraph, CallGraphNode};
use crate::heap::{InstanceId, InstanceKey, ZeroXPolicy};
use crate::ir::{CallSiteRef, ClassHierarchy, ClassId, MethodId, TypeName};

/// Chooses the context a callee is analyzed in.
pub trait ContextSelector {
    /// The context for `callee` invoked at `site` of `caller`. `receiver` is
    /// the receiver object when the call is resolved per receiver.
    #[allow(clippy::too_many_arguments)]
    fn callee_context(
        &self,
        h: &dyn ClassHierarchy,
        call_graph: &CallGraph,
        contexts: &mut ContextCache,
        caller: &CallGraphNode,
        site: &CallSiteRef,
        callee: MethodId,
        receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> ContextId;

    /// Whether contexts at `site` depend on the receiver object. Such calls
    /// are resolved once per receiver even when non-virtual.
    fn needs_receiver(&self, _site: &CallSiteRef) -> bool {
        false
    }

    /// Maximal number of distinct contexts one callee can get from one call
    /// site, or `None` when unbounded.
    fn context_bound(&self) -> Option<usize> {
        Some(1)
    }

    fn name(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextPolicy {
    Insensitive,
    ReceiverType,
    Object,
    CallString,
    Container,
}

pub fn make_context_selector(policy: ContextPolicy, depth: usize, zero_x: ZeroXPolicy) -> Box<dyn ContextSelector> {
    match policy {
        ContextPolicy::Insensitive => Box::new(ContextInsensitive),
        ContextPolicy::ReceiverType => Box::new(ReceiverTypeSensitive),
        ContextPolicy::Object => Box::new(ObjectSensitive::new(depth)),
        ContextPolicy::CallString => Box::new(CallStringSensitive::new(depth)),
        ContextPolicy::Container => Box::new(ContainerSensitive::new(zero_x)),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContextInsensitive;

impl ContextSelector for ContextInsensitive {
    fn callee_context(
        &self,
        _h: &dyn ClassHierarchy,
        _call_graph: &CallGraph,
        _contexts: &mut ContextCache,
        _caller: &CallGraphNode,
        _site: &CallSiteRef,
        _callee: MethodId,
        _receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> ContextId {
        ContextId::EMPTY
    }

    fn name(&self) -> &'static str {
        "insensitive"
    }
}

/// Distinguishes callees by the concrete type of their receiver. Calls without
/// a receiver are analyzed in the empty context.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReceiverTypeSensitive;

impl ContextSelector for ReceiverTypeSensitive {
    fn callee_context(
        &self,
        _h: &dyn ClassHierarchy,
        _call_graph: &CallGraph,
        contexts: &mut ContextCache,
        _caller: &CallGraphNode,
        _site: &CallSiteRef,
        _callee: MethodId,
        receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> ContextId {
        match receiver {
            Some((_, key)) => contexts.get_context_id(&Context::new(vec![ContextElem::ReceiverType(key.concrete_type())])),
            None => ContextId::EMPTY,
        }
    }

    fn needs_receiver(&self, site: &CallSiteRef) -> bool {
        site.kind.has_receiver()
    }

    fn context_bound(&self) -> Option<usize> {
        None
    }

    fn name(&self) -> &'static str {
        "receiver-type"
    }
}

/// k-limited object sensitivity: the receiver object is pushed onto the
/// caller's context. Static calls inherit the caller's context.
#[derive(Debug, Clone, Copy)]
pub struct ObjectSensitive {
    k: usize,
}

impl ObjectSensitive {
    pub fn new(k: usize) -> Self {
        ObjectSensitive { k }
    }
}

impl ContextSelector for ObjectSensitive {
    fn callee_context(
        &self,
        _h: &dyn ClassHierarchy,
        _call_graph: &CallGraph,
        contexts: &mut ContextCache,
        caller: &CallGraphNode,
        _site: &CallSiteRef,
        _callee: MethodId,
        receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> ContextId {
        match receiver {
            Some((id, _)) => {
                let caller_ctx = contexts.context(caller.context).clone();
                let ctx = Context::new_k_limited_context(&caller_ctx, ContextElem::Receiver(id), self.k);
                contexts.get_context_id(&ctx)
            }
            None => caller.context,
        }
    }

    fn needs_receiver(&self, site: &CallSiteRef) -> bool {
        site.kind.has_receiver()
    }

    fn context_bound(&self) -> Option<usize> {
        None
    }

    fn name(&self) -> &'static str {
        "object"
    }
}

/// k-limited call-string sensitivity.
#[derive(Debug, Clone, Copy)]
pub struct CallStringSensitive {
    k: usize,
}

impl CallStringSensitive {
    pub fn new(k: usize) -> Self {
        CallStringSensitive { k }
    }
}

impl ContextSelector for CallStringSensitive {
    fn callee_context(
        &self,
        _h: &dyn ClassHierarchy,
        _call_graph: &CallGraph,
        contexts: &mut ContextCache,
        caller: &CallGraphNode,
        site: &CallSiteRef,
        _callee: MethodId,
        _receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> ContextId {
        let elem = ContextElem::CallSite {
            method: caller.method,
            pc: site.pc,
        };
        let caller_ctx = contexts.context(caller.context).clone();
        let ctx = Context::new_k_limited_context(&caller_ctx, elem, self.k);
        contexts.get_context_id(&ctx)
    }

    fn name(&self) -> &'static str {
        "call-string"
    }
}

/// Types whose subtypes are containers, besides arrays of references.
const CONTAINER_ROOTS: [&str; 2] = ["Collection", "Map"];

/// Static helpers that copy or wrap their arguments, as `(class, method name)`.
const STATIC_FACTORIES: [(&str, &str); 7] = [
    ("System", "arraycopy"),
    ("Arrays", "asList"),
    ("Arrays", "copyOf"),
    ("Arrays", "copyOfRange"),
    ("Arrays", "toString"),
    ("String", "valueOf"),
    ("Hashtable", "newEntry"),
];

/// Container sensitivity. Methods declared by containers are analyzed once
/// per receiver object, and so are methods whose receiver was allocated in
/// such a node. Well-known static copy helpers are analyzed once per caller
/// node and site. Everything else shares the empty context.
#[derive(Debug, Clone, Copy)]
pub struct ContainerSensitive {
    zero_x: ZeroXPolicy,
}

impl ContainerSensitive {
    pub fn new(zero_x: ZeroXPolicy) -> Self {
        ContainerSensitive { zero_x }
    }

    pub fn is_container(h: &dyn ClassHierarchy, class: ClassId) -> bool {
        if class == h.root_class() {
            return false;
        }
        if h.class(class).is_array() {
            return h.array_element_class(class).is_some();
        }
        CONTAINER_ROOTS
            .iter()
            .filter_map(|name| h.lookup_class(&TypeName::new(*name)))
            .any(|root| h.is_assignable(class, root))
    }

    fn is_static_factory(h: &dyn ClassHierarchy, method: MethodId) -> bool {
        let info = h.method(method);
        if !info.is_static {
            return false;
        }
        let class = h.class(info.declaring_class).name.as_str();
        let name = info.selector.split('(').next().unwrap_or_default();
        STATIC_FACTORIES.iter().any(|(c, m)| *c == class && *m == name)
    }

    /// Whether a call on `receiver` is analyzed per receiver object.
    fn is_receiver_specific(
        &self,
        h: &dyn ClassHierarchy,
        call_graph: &CallGraph,
        contexts: &ContextCache,
        callee: MethodId,
        receiver: &InstanceKey,
    ) -> bool {
        let declaring = h.method(callee).declaring_class;
        if declaring == h.root_class() {
            return false;
        }
        if Self::is_container(h, declaring) {
            return true;
        }
        if !self.zero_x.is_interesting(h, receiver.concrete_type()) {
            return false;
        }
        match receiver {
            InstanceKey::Allocation { node, .. } | InstanceKey::MultiNewArray { node, .. } => {
                let allocator = call_graph.node(*node);
                matches!(
                    contexts.context(allocator.context).first_context_element(),
                    Some(ContextElem::Receiver(_))
                )
            }
            _ => false,
        }
    }
}

impl ContextSelector for ContainerSensitive {
    fn callee_context(
        &self,
        h: &dyn ClassHierarchy,
        call_graph: &CallGraph,
        contexts: &mut ContextCache,
        caller: &CallGraphNode,
        site: &CallSiteRef,
        callee: MethodId,
        receiver: Option<(InstanceId, &InstanceKey)>,
    ) -> ContextId {
        if Self::is_static_factory(h, callee) {
            let elem = ContextElem::CallerSite {
                method: caller.method,
                context: caller.context,
                pc: site.pc,
            };
            return contexts.get_context_id(&Context::new(vec![elem]));
        }
        match receiver {
            Some((id, key))
                if site.kind.has_receiver() && self.is_receiver_specific(h, call_graph, contexts, callee, key) =>
            {
                contexts.get_context_id(&Context::new(vec![ContextElem::Receiver(id)]))
            }
            _ => ContextId::EMPTY,
        }
    }

    fn needs_receiver(&self, site: &CallSiteRef) -> bool {
        site.kind.is_dispatch()
    }

    fn context_bound(&self) -> Option<usize> {
        None
    }

    fn name(&self) -> &'static str {
        "container"
    }
}
