// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Bridging reflective object creation. A factory method produces objects of
//! whatever type its result is later cast to.

use std::collections::{BTreeMap, BTreeSet};

use log::*;

use crate::graph::call_graph::{CGNodeId, CallGraph};
use crate::ir::{ClassHierarchy, ClassId, Pc};

/// A checked cast of the result of the call at `call_pc` in `node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct FactoryCast {
    node: CGNodeId,
    call_pc: Pc,
    class: ClassId,
}

#[derive(Debug, Default)]
pub struct ReflectionHandler {
    casts: BTreeSet<FactoryCast>,
    factory_types: BTreeMap<CGNodeId, BTreeSet<ClassId>>,
}

impl ReflectionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cast(&mut self, node: CGNodeId, call_pc: Pc, class: ClassId) {
        self.casts.insert(FactoryCast { node, call_pc, class });
    }

    /// Matches the recorded casts against the current call targets. Returns the
    /// factory nodes that gained a type.
    pub fn update(&mut self, h: &dyn ClassHierarchy, call_graph: &CallGraph) -> BTreeSet<CGNodeId> {
        let mut changed = BTreeSet::new();
        for cast in &self.casts {
            for target in call_graph.targets(cast.node, cast.call_pc) {
                if !h.method(call_graph.node(target).method).is_factory {
                    continue;
                }
                if self.factory_types.entry(target).or_default().insert(cast.class) {
                    debug!(
                        "Factory {} may create {}",
                        h.method_name(call_graph.node(target).method),
                        h.class(cast.class).name
                    );
                    changed.insert(target);
                }
            }
        }
        changed
    }

    /// Types recorded for the factory node `node`.
    pub fn types_of(&self, node: CGNodeId) -> impl Iterator<Item = ClassId> + '_ {
        self.factory_types.get(&node).into_iter().flatten().copied()
    }

    pub fn num_factory_nodes(&self) -> usize {
        self.factory_types.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{ClassDecl, MethodDecl, MethodRef, SimpleHierarchy, TypeName};
    use crate::pta::context::ContextId;

    #[test]
    fn casts_reach_factory_targets_once() {
        let h = SimpleHierarchy::from_decls(vec![
            ClassDecl::new("A"),
            ClassDecl::new("Main")
                .method(MethodDecl::new("main()").static_method())
                .method(MethodDecl::new("make()").static_method().factory())
                .method(MethodDecl::new("plain()").static_method()),
        ])
        .unwrap();
        let method = |sel: &str| h.lookup_method(&MethodRef::new("Main", sel)).unwrap();
        let mut cg = CallGraph::new();
        let (main, _) = cg.find_or_create_node(method("main()"), ContextId::EMPTY);
        let (make, _) = cg.find_or_create_node(method("make()"), ContextId::EMPTY);
        let (plain, _) = cg.find_or_create_node(method("plain()"), ContextId::EMPTY);
        cg.add_edge(main, 0, make);
        cg.add_edge(main, 2, plain);
        let a = h.lookup_class(&TypeName::new("A")).unwrap();

        let mut reflection = ReflectionHandler::new();
        reflection.record_cast(main, 0, a);
        reflection.record_cast(main, 2, a);
        assert_eq!(reflection.update(&h, &cg).into_iter().collect::<Vec<_>>(), vec![make]);
        assert!(reflection.update(&h, &cg).is_empty());
        assert_eq!(reflection.types_of(make).collect::<Vec<_>>(), vec![a]);
        assert_eq!(reflection.types_of(plain).count(), 0);
    }
}
