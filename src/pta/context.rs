// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

use crate::heap::InstanceId;
use crate::ir::{ClassId, MethodId, Pc};
use crate::newtype_index;
use crate::util::bit_vec::Idx;

newtype_index! {
    /// The unique identifier for each context.
    pub struct ContextId;
}

impl ContextId {
    /// The empty context, interned first by every cache.
    pub const EMPTY: ContextId = ContextId(0);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContextElem {
    /// A call site, identified by the calling method and pc.
    CallSite { method: MethodId, pc: Pc },
    /// A call site of one caller node.
    CallerSite { method: MethodId, context: ContextId, pc: Pc },
    /// A receiver object.
    Receiver(InstanceId),
    /// The concrete type of a receiver object.
    ReceiverType(ClassId),
}

/// A sequence of context elements, most recent first. The empty context
/// stands for "everywhere".
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Context {
    pub(crate) context_elems: Vec<ContextElem>,
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.context_elems.fmt(f)
    }
}

impl Context {
    pub fn new_empty() -> Rc<Self> {
        Rc::new(Context {
            context_elems: Vec::new(),
        })
    }

    pub fn new(context_elems: Vec<ContextElem>) -> Rc<Self> {
        Rc::new(Context { context_elems })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.context_elems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.context_elems.is_empty()
    }

    pub fn elems(&self) -> &[ContextElem] {
        &self.context_elems
    }

    /// Compose a new context from a given context and a new context element.
    /// The oldest elements are dropped beyond depth `k`.
    pub fn new_k_limited_context(old_ctx: &Context, elem: ContextElem, k: usize) -> Rc<Self> {
        let mut elems = Vec::with_capacity(k);
        if k > 0 {
            elems.push(elem);
            let kept = old_ctx.len().min(k - 1);
            elems.extend_from_slice(&old_ctx.context_elems[..kept]);
        }
        Rc::new(Context { context_elems: elems })
    }

    pub fn first_context_element(&self) -> Option<&ContextElem> {
        self.context_elems.first()
    }
}

#[derive(Debug)]
pub struct ContextCache {
    context_list: Vec<Rc<Context>>,
    context_to_index_map: HashMap<Rc<Context>, ContextId>,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextCache {
    pub fn new() -> ContextCache {
        let mut cache = ContextCache {
            context_list: Vec::new(),
            context_to_index_map: HashMap::new(),
        };
        let empty = cache.get_context_id(&Context::new_empty());
        debug_assert_eq!(empty, ContextId::EMPTY);
        cache
    }

    /// Interns `context` and returns its id.
    pub fn get_context_id(&mut self, context: &Rc<Context>) -> ContextId {
        if let Some(id) = self.context_to_index_map.get(context) {
            *id
        } else {
            let id = ContextId::new(self.context_list.len());
            self.context_list.push(context.clone());
            self.context_to_index_map.insert(context.clone(), id);
            id
        }
    }

    pub fn get_context(&self, id: ContextId) -> Option<Rc<Context>> {
        self.context_list.get(id.index()).cloned()
    }

    /// The context of an id handed out by this cache.
    pub fn context(&self, id: ContextId) -> &Context {
        &self.context_list[id.index()]
    }

    pub fn len(&self) -> usize {
        self.context_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.context_list.is_empty()
    }
}
