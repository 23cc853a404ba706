// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use log::*;

use super::PointsToSolver;
use crate::builder::call_graph_builder::PropagationCallGraphBuilder;
use crate::util::error::PtaResult;

/// Alternates worklist propagation with constraint generation for the nodes
/// the propagation discovered. Reflection is consulted only once both are
/// stable.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardSolver;

impl PointsToSolver for StandardSolver {
    fn solve(&self, builder: &mut PropagationCallGraphBuilder<'_>) -> PtaResult<()> {
        let mut rounds = 0;
        loop {
            rounds += 1;
            builder.cancel_token().check()?;
            builder.add_constraints_from_new_nodes()?;
            builder.solve_system()?;
            if builder.add_constraints_from_new_nodes()? {
                continue;
            }
            if builder.update_reflection() {
                continue;
            }
            break;
        }
        debug!("Standard solver finished after {} rounds", rounds);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}
