// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

#![allow(dead_code)]

use propta::builder::PropagationCallGraphBuilder;
use propta::graph::call_graph::CGNodeId;
use propta::ir::{ClassHierarchy, ClassId, DispatchKind, FieldRef, Instruction, MethodRef, SimpleHierarchy, TypeName};
use propta::pta::PointerAnalysis;
use propta::pts_set::points_to::PointsToSet;
use propta::util::options::AnalysisOptions;
use propta::util::results_dumper::instance_label;

pub fn new(def: u32, ty: &str) -> Instruction {
    Instruction::New {
        def,
        ty: TypeName::new(ty),
        dims: 1,
    }
}

pub fn get_field(def: u32, base: u32, class: &str, field: &str) -> Instruction {
    Instruction::GetField {
        def,
        base: Some(base),
        field: FieldRef::new(class, field),
    }
}

pub fn put_field(base: u32, class: &str, field: &str, val: u32) -> Instruction {
    Instruction::PutField {
        base: Some(base),
        field: FieldRef::new(class, field),
        val,
    }
}

pub fn invoke(def: Option<u32>, exception: u32, class: &str, selector: &str, kind: DispatchKind, args: &[u32]) -> Instruction {
    Instruction::Invoke {
        def,
        exception,
        target: MethodRef::new(class, selector),
        kind,
        args: args.to_vec(),
    }
}

/// Builds the call graph from `Main.main()`.
pub fn analyze<'h>(h: &'h SimpleHierarchy, options: AnalysisOptions) -> PropagationCallGraphBuilder<'h> {
    let mut builder = PropagationCallGraphBuilder::new(h, options).unwrap();
    builder.make_call_graph(&[MethodRef::new("Main", "main()")]).unwrap();
    builder
}

pub fn class(h: &dyn ClassHierarchy, name: &str) -> ClassId {
    h.lookup_class(&TypeName::new(name)).unwrap()
}

/// The call-graph nodes of `class.selector`.
pub fn nodes_of(builder: &PropagationCallGraphBuilder<'_>, class: &str, selector: &str) -> Vec<CGNodeId> {
    let h = builder.hierarchy();
    let method = h.lookup_method(&MethodRef::new(class, selector)).unwrap();
    builder.call_graph().nodes_of_method(method).collect()
}

pub fn main_node(builder: &PropagationCallGraphBuilder<'_>) -> CGNodeId {
    builder.call_graph().entrypoints()[0]
}

/// Concrete type names of the objects local `vn` of `node` points to, sorted.
pub fn types_of(pa: &PointerAnalysis<'_>, node: CGNodeId, vn: u32) -> Vec<String> {
    let h = pa.hierarchy();
    let mut types: Vec<String> = pa
        .local(node, vn)
        .iter()
        .map(|o| h.class(pa.instance_key(o).concrete_type()).name.to_string())
        .collect();
    types.sort();
    types
}

/// Printable labels of the objects local `vn` of `node` points to, sorted.
pub fn labels_of(pa: &PointerAnalysis<'_>, node: CGNodeId, vn: u32) -> Vec<String> {
    let mut labels: Vec<String> = pa.local(node, vn).iter().map(|o| instance_label(pa, pa.instance_key(o))).collect();
    labels.sort();
    labels
}
