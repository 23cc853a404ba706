// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Heap abstraction policies. Every factory answers `None` when the requested
//! type cannot be resolved in the class hierarchy.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::instance_key::InstanceKey;
use super::AllocationSite;
use crate::ir::{ClassHierarchy, ClassId, Instruction, MethodId, TypeName, CLASS_TYPE, STRING_TYPE};

/// Types with more allocation sites than this in one method are smushed.
pub const SMUSH_LIMIT: usize = 25;

pub trait InstanceKeyFactory {
    fn instance_for_allocation(
        &self,
        h: &dyn ClassHierarchy,
        site: AllocationSite,
        ty: &TypeName,
    ) -> Option<InstanceKey>;

    /// The inner arrays of a multi-dimensional allocation. `ty` is the array
    /// type at dimension `dim`.
    fn instance_for_multi_new_array(
        &self,
        h: &dyn ClassHierarchy,
        site: AllocationSite,
        dim: u32,
        ty: &TypeName,
    ) -> Option<InstanceKey>;

    fn instance_for_constant(&self, h: &dyn ClassHierarchy, ty: &TypeName, value: &str) -> Option<InstanceKey>;

    fn instance_for_pei(&self, h: &dyn ClassHierarchy, site: AllocationSite, ty: &TypeName) -> Option<InstanceKey>;

    fn instance_for_metadata(&self, h: &dyn ClassHierarchy, described: ClassId) -> Option<InstanceKey>;
}

fn metadata_key(h: &dyn ClassHierarchy, described: ClassId) -> Option<InstanceKey> {
    let class = h.lookup_class(&TypeName::new(CLASS_TYPE))?;
    Some(InstanceKey::Metadata { class, described })
}

/// One abstract object per concrete type.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassBasedFactory;

impl InstanceKeyFactory for ClassBasedFactory {
    fn instance_for_allocation(&self, h: &dyn ClassHierarchy, _: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::ConcreteType { class })
    }

    fn instance_for_multi_new_array(
        &self,
        h: &dyn ClassHierarchy,
        _: AllocationSite,
        _: u32,
        ty: &TypeName,
    ) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::ConcreteType { class })
    }

    fn instance_for_constant(&self, h: &dyn ClassHierarchy, ty: &TypeName, _: &str) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::ConcreteType { class })
    }

    fn instance_for_pei(&self, h: &dyn ClassHierarchy, _: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::ConcreteType { class })
    }

    fn instance_for_metadata(&self, h: &dyn ClassHierarchy, described: ClassId) -> Option<InstanceKey> {
        metadata_key(h, described)
    }
}

/// One abstract object per allocation site and call-graph node.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocationSiteFactory;

impl InstanceKeyFactory for AllocationSiteFactory {
    fn instance_for_allocation(&self, h: &dyn ClassHierarchy, site: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::Allocation {
            node: site.node,
            pc: site.pc,
            class,
        })
    }

    fn instance_for_multi_new_array(
        &self,
        h: &dyn ClassHierarchy,
        site: AllocationSite,
        dim: u32,
        ty: &TypeName,
    ) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::MultiNewArray {
            node: site.node,
            pc: site.pc,
            dim,
            class,
        })
    }

    fn instance_for_constant(&self, h: &dyn ClassHierarchy, ty: &TypeName, value: &str) -> Option<InstanceKey> {
        ClassBasedFactory.instance_for_constant(h, ty, value)
    }

    fn instance_for_pei(&self, h: &dyn ClassHierarchy, site: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::Pei {
            node: site.node,
            pc: site.pc,
            class,
        })
    }

    fn instance_for_metadata(&self, h: &dyn ClassHierarchy, described: ClassId) -> Option<InstanceKey> {
        metadata_key(h, described)
    }
}

/// One abstract object per type and call-graph node.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmushedFactory;

impl InstanceKeyFactory for SmushedFactory {
    fn instance_for_allocation(&self, h: &dyn ClassHierarchy, site: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        Some(InstanceKey::SmushedAllocations { node: site.node, class })
    }

    fn instance_for_multi_new_array(
        &self,
        h: &dyn ClassHierarchy,
        site: AllocationSite,
        _: u32,
        ty: &TypeName,
    ) -> Option<InstanceKey> {
        self.instance_for_allocation(h, site, ty)
    }

    fn instance_for_constant(&self, h: &dyn ClassHierarchy, ty: &TypeName, value: &str) -> Option<InstanceKey> {
        ClassBasedFactory.instance_for_constant(h, ty, value)
    }

    fn instance_for_pei(&self, h: &dyn ClassHierarchy, site: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        ClassBasedFactory.instance_for_pei(h, site, ty)
    }

    fn instance_for_metadata(&self, h: &dyn ClassHierarchy, described: ClassId) -> Option<InstanceKey> {
        metadata_key(h, described)
    }
}

/// The combinable heap policy flags of [`ZeroXFactory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroXPolicy {
    /// Site-based objects for interesting types; type-based otherwise.
    pub allocations: bool,
    pub smush_strings: bool,
    pub smush_throwables: bool,
    /// Objects whose fields are all primitive (and arrays of primitives) are type-based.
    pub smush_primitive_holders: bool,
    /// Types allocated at more than `SMUSH_LIMIT` sites of one method are smushed.
    pub smush_many: bool,
    /// Constants are distinguished by value.
    pub constant_specific: bool,
}

impl Default for ZeroXPolicy {
    fn default() -> Self {
        ZeroXPolicy {
            allocations: true,
            smush_strings: true,
            smush_throwables: true,
            smush_primitive_holders: true,
            smush_many: true,
            constant_specific: false,
        }
    }
}

impl ZeroXPolicy {
    pub fn none() -> Self {
        ZeroXPolicy {
            allocations: false,
            smush_strings: false,
            smush_throwables: false,
            smush_primitive_holders: false,
            smush_many: false,
            constant_specific: false,
        }
    }

    /// Whether objects of `class` are kept apart per allocation site.
    pub fn is_interesting(&self, h: &dyn ClassHierarchy, class: ClassId) -> bool {
        if !self.allocations {
            return false;
        }
        let info = h.class(class);
        if self.smush_strings && info.name.as_str() == STRING_TYPE {
            return false;
        }
        if self.smush_throwables {
            if let Some(throwable) = h.throwable_class() {
                if h.is_subclass_of(class, throwable) {
                    return false;
                }
            }
        }
        !(self.smush_primitive_holders && all_fields_primitive(h, class))
    }
}

/// Chooses between site-based, type-based and smushed objects per type.
#[derive(Debug, Default)]
pub struct ZeroXFactory {
    policy: ZeroXPolicy,
    smushed_types: RefCell<HashMap<MethodId, HashSet<ClassId>>>,
}

impl ZeroXFactory {
    pub fn new(policy: ZeroXPolicy) -> Self {
        ZeroXFactory {
            policy,
            smushed_types: RefCell::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> ZeroXPolicy {
        self.policy
    }

    fn exceeds_smush_limit(&self, h: &dyn ClassHierarchy, method: MethodId, class: ClassId) -> bool {
        let mut cache = self.smushed_types.borrow_mut();
        let smushees = cache.entry(method).or_insert_with(|| {
            let mut counts: HashMap<ClassId, usize> = HashMap::new();
            if let Some(body) = &h.method(method).body {
                for instr in &body.instructions {
                    if let Instruction::New { ty, .. } = instr {
                        if let Some(c) = h.lookup_class(ty) {
                            *counts.entry(c).or_default() += 1;
                        }
                    }
                }
            }
            counts
                .into_iter()
                .filter(|(_, count)| *count > SMUSH_LIMIT)
                .map(|(c, _)| c)
                .collect()
        });
        smushees.contains(&class)
    }
}

fn all_fields_primitive(h: &dyn ClassHierarchy, class: ClassId) -> bool {
    let info = h.class(class);
    if let Some(elem) = &info.array_element {
        return elem.is_primitive();
    }
    let mut current = Some(class);
    while let Some(c) = current {
        let info = h.class(c);
        let has_reference_field = info.fields.iter().any(|f| {
            let field = h.field(*f);
            !field.is_static && field.ty.is_reference()
        });
        if has_reference_field {
            return false;
        }
        current = info.superclass;
    }
    true
}

impl InstanceKeyFactory for ZeroXFactory {
    fn instance_for_allocation(&self, h: &dyn ClassHierarchy, site: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        if !self.policy.is_interesting(h, class) {
            ClassBasedFactory.instance_for_allocation(h, site, ty)
        } else if self.policy.smush_many && self.exceeds_smush_limit(h, site.method, class) {
            SmushedFactory.instance_for_allocation(h, site, ty)
        } else {
            AllocationSiteFactory.instance_for_allocation(h, site, ty)
        }
    }

    fn instance_for_multi_new_array(
        &self,
        h: &dyn ClassHierarchy,
        site: AllocationSite,
        dim: u32,
        ty: &TypeName,
    ) -> Option<InstanceKey> {
        if self.policy.allocations {
            AllocationSiteFactory.instance_for_multi_new_array(h, site, dim, ty)
        } else {
            ClassBasedFactory.instance_for_multi_new_array(h, site, dim, ty)
        }
    }

    fn instance_for_constant(&self, h: &dyn ClassHierarchy, ty: &TypeName, value: &str) -> Option<InstanceKey> {
        if self.policy.constant_specific {
            let class = h.lookup_class(ty)?;
            Some(InstanceKey::Constant {
                class,
                value: value.to_string(),
            })
        } else {
            ClassBasedFactory.instance_for_constant(h, ty, value)
        }
    }

    fn instance_for_pei(&self, h: &dyn ClassHierarchy, site: AllocationSite, ty: &TypeName) -> Option<InstanceKey> {
        let class = h.lookup_class(ty)?;
        if self.policy.is_interesting(h, class) {
            AllocationSiteFactory.instance_for_pei(h, site, ty)
        } else {
            ClassBasedFactory.instance_for_pei(h, site, ty)
        }
    }

    fn instance_for_metadata(&self, h: &dyn ClassHierarchy, described: ClassId) -> Option<InstanceKey> {
        metadata_key(h, described)
    }
}
