//! Error kinds — §7.
//!
//! Structural failures (cycles, dangling references) are fatal and surface
//! immediately as `Err`. Capacity exhaustion and scenario infeasibility are
//! data-dependent outcomes reported on a successful `Schedule`/`ScenarioRun`
//! rather than thrown, per §7's policy.

use prodsched_core::TaskId;
use thiserror::Error;

use crate::dag::GraphError;

/// Fatal errors that abort a scheduling pass before any task is placed.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("dependency graph is invalid: {0}")]
    Graph(#[from] GraphError),

    #[error("bundle failed validation: {0:?}")]
    InvalidInput(Vec<prodsched_core::BundleError>),
}

/// Why a single task could not be placed during a scheduling pass. Recorded
/// per `Schedule::unscheduled` entry rather than aborting the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementFailure {
    /// No window satisfying calendar + capacity constraints was found within
    /// the search horizon.
    UnschedulableTask(TaskId),
    /// No quality team works any candidate shift with enough capacity.
    NoQualityTeam(TaskId),
}

impl std::fmt::Display for PlacementFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementFailure::UnschedulableTask(id) => {
                write!(f, "task {id} could not be scheduled within the search horizon")
            }
            PlacementFailure::NoQualityTeam(id) => {
                write!(f, "task {id} has no eligible quality team in any shift")
            }
        }
    }
}

/// Scenario 3 Phase 1 exhausted all growth without finding a fully
/// schedulable configuration. The scenario still returns the best partial
/// solution found; this type documents why none was complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfeasibleScenario {
    pub iterations_used: u32,
    pub unscheduled_count: usize,
}

impl std::fmt::Display for InfeasibleScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scenario 3 phase 1 exhausted growth after {} iterations with {} tasks still unscheduled",
            self.iterations_used, self.unscheduled_count
        )
    }
}

/// Errors a scenario search can surface: either a structural graph failure
/// from some trial configuration, or Phase 1 never reaching a complete
/// schedule before its growth budget ran out.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("{0}")]
    Infeasible(InfeasibleScenario),
}
