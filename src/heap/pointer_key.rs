// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use itertools::Itertools;

use super::InstanceId;
use crate::graph::call_graph::CGNodeId;
use crate::ir::{ClassId, FieldId, MethodId, ValueNumber};

/// An abstract pointer location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PointerKey {
    Local { node: CGNodeId, vn: ValueNumber },
    ReturnValue { node: CGNodeId },
    ExceptionalReturnValue { node: CGNodeId },
    InstanceField { instance: InstanceId, field: FieldId },
    StaticField { field: FieldId },
    ArrayContents { instance: InstanceId },
    /// A typed view of `base`; its filter is part of its identity.
    Typed { base: Box<PointerKey>, filter: TypeFilter },
}

impl PointerKey {
    pub fn local(node: CGNodeId, vn: ValueNumber) -> Self {
        PointerKey::Local { node, vn }
    }

    pub fn typed(base: PointerKey, filter: TypeFilter) -> Self {
        PointerKey::Typed {
            base: Box::new(base),
            filter,
        }
    }

    /// The filter a variable for this key must carry regardless of request.
    pub fn intrinsic_filter(&self) -> Option<&TypeFilter> {
        match self {
            PointerKey::Typed { filter, .. } => Some(filter),
            _ => None,
        }
    }

    /// The call-graph node owning this key.
    pub fn node(&self) -> Option<CGNodeId> {
        match self {
            PointerKey::Local { node, .. }
            | PointerKey::ReturnValue { node }
            | PointerKey::ExceptionalReturnValue { node } => Some(*node),
            PointerKey::Typed { base, .. } => base.node(),
            _ => None,
        }
    }
}

/// Restricts which instances may flow into a variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeFilter {
    /// Instances assignable to the class.
    SingleClass(ClassId),
    /// Instances assignable to any of the classes (sorted, deduplicated).
    MultipleClasses(Vec<ClassId>),
    SingleInstance(InstanceId),
    /// Instances whose concrete type dispatches the method's selector to the method.
    TargetMethod(MethodId),
}

impl TypeFilter {
    /// A filter over `classes`, collapsed to `SingleClass` when possible.
    pub fn classes(classes: impl IntoIterator<Item = ClassId>) -> Self {
        let mut classes: Vec<ClassId> = classes.into_iter().sorted().dedup().collect();
        if classes.len() == 1 {
            TypeFilter::SingleClass(classes.remove(0))
        } else {
            TypeFilter::MultipleClasses(classes)
        }
    }
}

/// A pointer key paired with the filter requested for its variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilteredPointerKey {
    pub key: PointerKey,
    pub filter: TypeFilter,
}

impl FilteredPointerKey {
    pub fn new(key: PointerKey, filter: TypeFilter) -> Self {
        FilteredPointerKey { key, filter }
    }

    /// A typed key whose intrinsic filter is `filter`.
    pub fn typed(base: PointerKey, filter: TypeFilter) -> Self {
        FilteredPointerKey {
            key: PointerKey::typed(base, filter.clone()),
            filter,
        }
    }
}
