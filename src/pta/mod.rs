// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};

use crate::builder::call_graph_builder::PropagationCallGraphBuilder;
use crate::pts_set::points_to::HybridPointsToSet;
use crate::pts_set::PointerId;
use crate::util::error::PtaResult;

pub mod context;
pub mod context_strategy;
pub mod implicit;
pub mod pointer_analysis;
pub mod pre_transitive;
pub mod propagator;
pub mod standard;

pub use pointer_analysis::PointerAnalysis;

pub type PointsTo<T> = HybridPointsToSet<T>;
/// A points-to set variable, named by the id of its representative key.
pub type VarId = PointerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorklistOrder {
    Fifo,
    Lifo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    /// Worklist propagation interleaved with call-graph discovery.
    Standard,
    /// Cycle elimination followed by a full re-propagation each round.
    PreTransitive,
}

/// Drives a builder to a joint fixed point of points-to sets and call graph.
pub trait PointsToSolver {
    fn solve(&self, builder: &mut PropagationCallGraphBuilder<'_>) -> PtaResult<()>;

    fn name(&self) -> &'static str;
}

pub fn make_solver(kind: SolverKind) -> Box<dyn PointsToSolver> {
    match kind {
        SolverKind::Standard => Box::new(standard::StandardSolver),
        SolverKind::PreTransitive => Box::new(pre_transitive::PreTransitiveSolver),
    }
}
