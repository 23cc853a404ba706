// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use petgraph::dot::Dot;
use petgraph::graph::{DefaultIx, EdgeIndex, NodeIndex};
use petgraph::{Direction, Graph};

use crate::ir::{ClassHierarchy, MethodId, Pc};
use crate::pta::context::{ContextCache, ContextId};

/// Unique identifiers for call graph nodes.
pub type CGNodeId = NodeIndex<DefaultIx>;
/// Unique identifiers for call graph edges.
pub type CGEdgeId = EdgeIndex<DefaultIx>;

/// A method analyzed under one context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallGraphNode {
    pub method: MethodId,
    pub context: ContextId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallGraphEdge {
    pub pc: Pc,
}

/// Context-sensitive call graph. Edges are labeled with the call site's pc in
/// the caller, and each (caller, pc, callee) triple appears at most once.
#[derive(Debug, Default)]
pub struct CallGraph {
    pub graph: Graph<CallGraphNode, CallGraphEdge>,
    node_ids: HashMap<CallGraphNode, CGNodeId>,
    site_targets: HashMap<(CGNodeId, Pc), BTreeSet<CGNodeId>>,
    entrypoints: Vec<CGNodeId>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node of `method` under `context`, and whether it was created.
    pub fn find_or_create_node(&mut self, method: MethodId, context: ContextId) -> (CGNodeId, bool) {
        let node = CallGraphNode { method, context };
        match self.node_ids.entry(node) {
            Entry::Occupied(o) => (*o.get(), false),
            Entry::Vacant(v) => {
                let id = self.graph.add_node(node);
                v.insert(id);
                (id, true)
            }
        }
    }

    pub fn get_node(&self, method: MethodId, context: ContextId) -> Option<CGNodeId> {
        self.node_ids.get(&CallGraphNode { method, context }).copied()
    }

    #[inline]
    pub fn node(&self, id: CGNodeId) -> &CallGraphNode {
        &self.graph[id]
    }

    pub fn add_entrypoint(&mut self, id: CGNodeId) {
        if !self.entrypoints.contains(&id) {
            self.entrypoints.push(id);
        }
    }

    pub fn entrypoints(&self) -> &[CGNodeId] {
        &self.entrypoints
    }

    /// Adds a call from `caller` at `pc` to `callee`.
    /// Returns false if the edge already existed.
    pub fn add_edge(&mut self, caller: CGNodeId, pc: Pc, callee: CGNodeId) -> bool {
        let targets = self.site_targets.entry((caller, pc)).or_default();
        if targets.insert(callee) {
            self.graph.add_edge(caller, callee, CallGraphEdge { pc });
            true
        } else {
            false
        }
    }

    pub fn has_edge(&self, caller: CGNodeId, pc: Pc, callee: CGNodeId) -> bool {
        self.site_targets
            .get(&(caller, pc))
            .map_or(false, |targets| targets.contains(&callee))
    }

    /// Targets of the call site at `pc` in `caller`.
    pub fn targets(&self, caller: CGNodeId, pc: Pc) -> impl Iterator<Item = CGNodeId> + '_ {
        self.site_targets.get(&(caller, pc)).into_iter().flatten().copied()
    }

    pub fn callees(&self, caller: CGNodeId) -> BTreeSet<CGNodeId> {
        self.graph.neighbors_directed(caller, Direction::Outgoing).collect()
    }

    pub fn callers(&self, callee: CGNodeId) -> BTreeSet<CGNodeId> {
        self.graph.neighbors_directed(callee, Direction::Incoming).collect()
    }

    /// Call sites in `caller` with at least one target, sorted by pc.
    pub fn call_sites(&self, caller: CGNodeId) -> BTreeSet<Pc> {
        self.graph.edges(caller).map(|e| e.weight().pc).collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = CGNodeId> {
        self.graph.node_indices()
    }

    pub fn nodes_of_method(&self, method: MethodId) -> impl Iterator<Item = CGNodeId> + '_ {
        self.graph
            .node_indices()
            .filter(move |id| self.graph[*id].method == method)
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_label(&self, h: &dyn ClassHierarchy, contexts: &ContextCache, id: CGNodeId) -> String {
        let node = self.node(id);
        format!("{} {:?}", h.method_name(node.method), contexts.get_context(node.context))
    }

    /// Produce a dot file representation of the call graph
    /// for displaying with Graphviz.
    pub fn to_dot(&self, h: &dyn ClassHierarchy, contexts: &ContextCache, dot_path: &Path) -> std::io::Result<()> {
        let labeled = self.graph.map(
            |id, _| self.node_label(h, contexts, id),
            |_, edge| format!("pc {}", edge.pc),
        );
        std::fs::write(dot_path, format!("{}", Dot::new(&labeled)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::bit_vec::Idx;

    #[test]
    fn nodes_are_unique_per_method_and_context() {
        let mut cg = CallGraph::new();
        let m = MethodId::new(0);
        let (a, new_a) = cg.find_or_create_node(m, ContextId::new(0));
        let (b, new_b) = cg.find_or_create_node(m, ContextId::new(0));
        let (c, _) = cg.find_or_create_node(m, ContextId::new(1));
        assert!(new_a && !new_b);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cg.nodes_of_method(m).count(), 2);
    }

    #[test]
    fn edges_are_deduplicated_per_call_site() {
        let mut cg = CallGraph::new();
        let (caller, _) = cg.find_or_create_node(MethodId::new(0), ContextId::new(0));
        let (callee, _) = cg.find_or_create_node(MethodId::new(1), ContextId::new(0));
        assert!(cg.add_edge(caller, 3, callee));
        assert!(!cg.add_edge(caller, 3, callee));
        assert!(cg.add_edge(caller, 4, callee));
        assert_eq!(cg.num_edges(), 2);
        assert!(cg.has_edge(caller, 3, callee));
        assert_eq!(cg.targets(caller, 3).collect::<Vec<_>>(), vec![callee]);
        assert_eq!(cg.targets(caller, 5).count(), 0);
        assert_eq!(cg.callers(callee).into_iter().collect::<Vec<_>>(), vec![caller]);
        assert_eq!(cg.call_sites(caller).into_iter().collect::<Vec<_>>(), vec![3, 4]);
    }
}
