// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Call-graph construction: constraint generation for reachable nodes and
//! the policies steering it.

use crate::ir::{ClassHierarchy, ClassId};

pub mod call_graph_builder;
pub mod constraint_visitor;
pub mod dispatch_bound;
pub mod reflection;
pub mod target_selector;

pub use call_graph_builder::PropagationCallGraphBuilder;

/// The concrete classes whose objects a value declared as `class` may hold,
/// as used for synthetic allocations.
pub fn concrete_types_of(h: &dyn ClassHierarchy, class: ClassId) -> Vec<ClassId> {
    if h.class(class).is_concrete() {
        vec![class]
    } else {
        h.concrete_subtypes(class).to_vec()
    }
}
