// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Andersen-style, optionally context-sensitive, points-to analysis with
//! on-the-fly call-graph construction for class-based object-oriented
//! programs in SSA form.

#![allow(
    clippy::single_match,
    clippy::needless_lifetimes,
    clippy::needless_return,
    clippy::len_zero
)]

pub mod builder;
pub mod graph;
pub mod heap;
pub mod ir;
pub mod pta;
pub mod pts_set;
pub mod util;
