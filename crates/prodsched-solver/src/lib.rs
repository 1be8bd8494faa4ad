//! # prodsched-solver
//!
//! The scheduling engine: dependency graph construction, a
//! resource-constrained list scheduler, priority and critical-path
//! analysis, post-hoc metrics, and the three headcount-optimization
//! scenarios built on top of them.
//!
//! This crate provides:
//! - Effective dependency graph construction with quality/rework interposition
//! - A deterministic, priority-ordered list scheduler
//! - Critical-path, priority, and slack analysis
//! - Capacity-timeline bookkeeping and team load balancing
//! - Post-schedule metrics and an independent resource-conflict auditor
//! - Headcount optimization scenarios (fixed, makespan-minimizing, per-team)
//!
//! ## Example
//!
//! ```rust,no_run
//! use prodsched_core::{Bundle, RunConfig};
//! use prodsched_solver::{dag, scheduler};
//!
//! let bundle = Bundle::default();
//! let effective_dag = dag::build_effective_dag(&bundle).unwrap();
//! let schedule = scheduler::schedule(&bundle, &effective_dag, &RunConfig::default());
//! assert!(schedule.unscheduled.is_empty());
//! ```

pub mod capacity;
pub mod dag;
pub mod error;
pub mod metrics;
pub mod priority;
pub mod scenario;
pub mod scheduler;

pub use capacity::{CapacityTimeline, QualityCandidate};
pub use dag::{build_effective_dag, EffectiveDag, EffectiveEdge, GraphError, GraphWarning};
pub use error::{InfeasibleScenario, PlacementFailure, ScenarioError, ScheduleError};
pub use metrics::{check_resource_conflicts, ResourceConflict};
pub use priority::task_priority;
pub use scenario::{scenario1, scenario2_minimize_makespan, scenario3_per_team_optimization, ScenarioRun};
pub use scheduler::schedule;
