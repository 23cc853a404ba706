// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The program representation the analysis consumes: type names, a class
//! hierarchy, and SSA method bodies.

pub mod call_site;
pub mod hierarchy;
pub mod instruction;
pub mod program;
pub mod types;

pub use call_site::{CallSiteRef, DispatchKind};
pub use hierarchy::{ClassHierarchy, ClassInfo, FieldInfo, MethodInfo, SimpleHierarchy};
pub use instruction::{ConstantValue, DefUse, ImplicitException, Instruction, MethodBody};
pub use program::{ClassDecl, FieldDecl, MethodDecl, Program};
pub use types::*;
