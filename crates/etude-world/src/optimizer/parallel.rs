//! Parallel execution planning.

use crate::builder::GraphBuilder;
use crate::schedule::{self, ParallelPlan};
use crate::{Error, Result};

/// Level-order groups, with groups wider than `max_threads` split into
/// consecutive chunks. The plan is checked against the connections before it
/// is returned.
pub fn plan_parallel_execution(builder: &GraphBuilder, max_threads: usize) -> Result<ParallelPlan> {
    let count = builder.node_count();
    let width = max_threads.max(1);
    let groups = schedule::level_groups(count, builder.connections())?
        .into_iter()
        .flat_map(|level| {
            level
                .chunks(width)
                .map(<[usize]>::to_vec)
                .collect::<Vec<_>>()
        })
        .collect();

    let plan = ParallelPlan::from_groups(groups);
    if !plan.is_valid(count, builder.connections()) {
        return Err(Error::InvalidState(
            "parallel plan violates a dependency".into(),
        ));
    }
    Ok(plan)
}
