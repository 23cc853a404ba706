// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use crate::graph::call_graph::CGNodeId;
use crate::ir::{ClassId, Pc};

/// An abstract heap object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstanceKey {
    /// Objects allocated at one site of one call-graph node.
    Allocation { node: CGNodeId, pc: Pc, class: ClassId },
    /// The inner arrays of a multi-dimensional allocation; `dim` counts from 1.
    MultiNewArray {
        node: CGNodeId,
        pc: Pc,
        dim: u32,
        class: ClassId,
    },
    /// All objects of one concrete type.
    ConcreteType { class: ClassId },
    /// All objects of one type allocated in one call-graph node.
    SmushedAllocations { node: CGNodeId, class: ClassId },
    /// A constant distinguished by its value.
    Constant { class: ClassId, value: String },
    /// Exceptions raised implicitly by the instruction at `pc`.
    Pei { node: CGNodeId, pc: Pc, class: ClassId },
    /// A metadata object of type `class` describing type `described`.
    Metadata { class: ClassId, described: ClassId },
}

impl InstanceKey {
    pub fn concrete_type(&self) -> ClassId {
        match self {
            InstanceKey::Allocation { class, .. }
            | InstanceKey::MultiNewArray { class, .. }
            | InstanceKey::ConcreteType { class }
            | InstanceKey::SmushedAllocations { class, .. }
            | InstanceKey::Constant { class, .. }
            | InstanceKey::Pei { class, .. }
            | InstanceKey::Metadata { class, .. } => *class,
        }
    }

    /// The call-graph node the key is tied to, if any.
    pub fn node(&self) -> Option<CGNodeId> {
        match self {
            InstanceKey::Allocation { node, .. }
            | InstanceKey::MultiNewArray { node, .. }
            | InstanceKey::SmushedAllocations { node, .. }
            | InstanceKey::Pei { node, .. } => Some(*node),
            _ => None,
        }
    }
}
