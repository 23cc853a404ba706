// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use log::*;

use super::PointsToSolver;
use crate::builder::call_graph_builder::PropagationCallGraphBuilder;
use crate::util::error::PtaResult;

/// Each round collapses assignment cycles, recomputes every derived set from
/// the roots along simple edges, and then evaluates each complex statement
/// once. Rounds repeat until neither the constraints nor the call graph
/// change.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreTransitiveSolver;

impl PointsToSolver for PreTransitiveSolver {
    fn solve(&self, builder: &mut PropagationCallGraphBuilder<'_>) -> PtaResult<()> {
        let h = builder.hierarchy();
        let cancel = builder.cancel_token().clone();
        let mut rounds = 0;
        loop {
            rounds += 1;
            cancel.check()?;
            let mut changed = builder.add_constraints_from_new_nodes()?;
            let before = builder.system.num_constraint_changes();

            let collapsed = builder.system.collapse_cycles();
            if collapsed > 0 {
                trace!("Round {}: collapsed {} cycles", rounds, collapsed);
            }
            builder.system.revert_to_pre_transitive();
            builder.system.propagate_simple(h, &cancel)?;
            builder.system.evaluate_complex(h, &mut builder.resolver);
            // Statements may have left work behind for the simple edges.
            builder.system.propagate_simple(h, &cancel)?;

            changed |= builder.system.num_constraint_changes() != before;
            changed |= builder.add_constraints_from_new_nodes()?;
            if !changed && builder.update_reflection() {
                changed = true;
            }
            if !changed {
                break;
            }
        }
        debug!("Pre-transitive solver finished after {} rounds", rounds);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pre-transitive"
    }
}
