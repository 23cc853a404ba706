// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{MethodRef, Pc};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How the target of an invocation is selected.
pub enum DispatchKind {
    // Dispatch on the receiver's concrete class
    Virtual,
    // Dispatch on the receiver's concrete class, declared through an interface
    Interface,
    // Non-virtual call on a receiver: constructors, private and super calls
    Special,
    // No receiver
    Static,
}

impl DispatchKind {
    /// Whether the callee is selected by the receiver's concrete type.
    pub fn is_dispatch(self) -> bool {
        matches!(self, DispatchKind::Virtual | DispatchKind::Interface)
    }

    pub fn has_receiver(self) -> bool {
        !matches!(self, DispatchKind::Static)
    }
}

/// A call site within one method body.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CallSiteRef {
    pub pc: Pc,
    pub target: MethodRef,
    pub kind: DispatchKind,
}

impl CallSiteRef {
    pub fn new(pc: Pc, target: MethodRef, kind: DispatchKind) -> Self {
        CallSiteRef { pc, target, kind }
    }

    pub fn is_dispatch(&self) -> bool {
        self.kind.is_dispatch()
    }
}

impl fmt::Display for CallSiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}@{}", self.kind, self.target, self.pc)
    }
}
