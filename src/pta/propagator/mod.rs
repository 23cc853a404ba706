// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

pub mod operators;
pub mod system;

pub use operators::{SideEffect, Statement, UnaryOp};
pub use system::{DispatchHandler, NoDispatch, PropagationSystem};
