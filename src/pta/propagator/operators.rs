// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The operator library of the constraint system.
//!
//! Unary operators are "simple": they only move instances from the right-hand
//! variable into the left-hand one and are stored implicitly as graph edges.
//! Side-effect operators are "complex": evaluating them on new instances of
//! their right-hand variable adds new constraints.

use std::fmt;

use crate::graph::call_graph::CGNodeId;
use crate::heap::InstanceId;
use crate::ir::{FieldId, Pc};
use crate::pta::{PointsTo, VarId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnaryOp {
    /// `lhs ⊇ rhs`
    Assign,
    /// `lhs ⊇ { o ∈ rhs | filter(lhs) accepts o }`
    Filter,
    /// `lhs ⊇ { o ∈ rhs | filter(lhs) rejects o }`
    InverseFilter,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 3] = [UnaryOp::Assign, UnaryOp::Filter, UnaryOp::InverseFilter];
}

/// A complex operator. The right-hand variable of its statement supplies the
/// base instances (or receivers); the variables named inside the operator are
/// its fixed operands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SideEffect {
    /// `def ⊇ o.field` for each base `o`
    GetField { field: FieldId, def: VarId },
    /// `o.field ⊇ val` for each base `o`
    PutField { field: FieldId, val: VarId },
    /// `def ⊇ o[]` for each array `o`
    ArrayLoad { def: VarId },
    /// `o[] ⊇ val` for each array `o`
    ArrayStore { val: VarId },
    /// `o.field ∋ instance` for each base `o`
    InstancePutField { field: FieldId, instance: InstanceId },
    /// `o[] ∋ instance` for each array `o`
    InstanceArrayStore { instance: InstanceId },
    /// Resolve the call at `pc` in `caller` for each receiver.
    Dispatch { caller: CGNodeId, pc: Pc },
}

impl SideEffect {
    /// The variable operand fixed inside the operator.
    pub fn fixed_var(&self) -> Option<VarId> {
        match self {
            SideEffect::GetField { def, .. } | SideEffect::ArrayLoad { def } => Some(*def),
            SideEffect::PutField { val, .. } | SideEffect::ArrayStore { val } => Some(*val),
            _ => None,
        }
    }

    /// Rewrites the fixed operand after unification. Returns true if it changed.
    pub fn replace_fixed_var(&mut self, old: VarId, new: VarId) -> bool {
        match self {
            SideEffect::GetField { def: v, .. }
            | SideEffect::ArrayLoad { def: v }
            | SideEffect::PutField { val: v, .. }
            | SideEffect::ArrayStore { val: v } if *v == old => {
                *v = new;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideEffect::GetField { field, def } => write!(f, "{:?} = *.{:?}", def, field),
            SideEffect::PutField { field, val } => write!(f, "*.{:?} = {:?}", field, val),
            SideEffect::ArrayLoad { def } => write!(f, "{:?} = *[]", def),
            SideEffect::ArrayStore { val } => write!(f, "*[] = {:?}", val),
            SideEffect::InstancePutField { field, instance } => write!(f, "*.{:?} = {:?}", field, instance),
            SideEffect::InstanceArrayStore { instance } => write!(f, "*[] = {:?}", instance),
            SideEffect::Dispatch { caller, pc } => write!(f, "dispatch {:?}@{}", caller, pc),
        }
    }
}

/// An explicit complex statement. `prior` holds the right-hand instances it
/// has already been evaluated on.
#[derive(Clone, Debug)]
pub struct Statement {
    pub op: SideEffect,
    pub rhs: VarId,
    pub prior: PointsTo<InstanceId>,
}

impl Statement {
    pub fn new(op: SideEffect, rhs: VarId) -> Self {
        Statement {
            op,
            rhs,
            prior: PointsTo::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::bit_vec::Idx;

    #[test]
    fn fixed_operands_are_rewritten() {
        let (a, b) = (VarId::new(1), VarId::new(2));
        let mut op = SideEffect::GetField {
            field: FieldId::new(0),
            def: a,
        };
        assert!(op.replace_fixed_var(a, b));
        assert_eq!(op.fixed_var(), Some(b));
        assert!(!op.replace_fixed_var(a, b));
        let mut dispatch = SideEffect::Dispatch {
            caller: CGNodeId::new(0),
            pc: 1,
        };
        assert_eq!(dispatch.fixed_var(), None);
        assert!(!dispatch.replace_fixed_var(a, b));
    }
}
