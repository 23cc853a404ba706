// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The heap abstraction: abstract objects, abstract pointer locations and the
//! policies deciding how concrete allocations map to abstract objects.

use serde::{Deserialize, Serialize};

use crate::graph::call_graph::CGNodeId;
use crate::ir::{MethodId, Pc};
use crate::newtype_index;

pub mod instance_factory;
pub mod instance_key;
pub mod pointer_key;

pub use instance_factory::{
    AllocationSiteFactory, ClassBasedFactory, InstanceKeyFactory, SmushedFactory, ZeroXFactory, ZeroXPolicy,
};
pub use instance_key::InstanceKey;
pub use pointer_key::{FilteredPointerKey, PointerKey, TypeFilter};

newtype_index! {
    /// Dense index of an interned [`InstanceKey`].
    pub struct InstanceId;
}

/// An instruction position inside a call-graph node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocationSite {
    pub node: CGNodeId,
    pub method: MethodId,
    pub pc: Pc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeapPolicy {
    ClassBased,
    AllocationSite,
    Smushed,
    ZeroX,
}

pub fn make_instance_factory(policy: HeapPolicy, zero_x: ZeroXPolicy) -> Box<dyn InstanceKeyFactory> {
    match policy {
        HeapPolicy::ClassBased => Box::new(ClassBasedFactory),
        HeapPolicy::AllocationSite => Box::new(AllocationSiteFactory),
        HeapPolicy::Smushed => Box::new(SmushedFactory),
        HeapPolicy::ZeroX => Box::new(ZeroXFactory::new(zero_x)),
    }
}
