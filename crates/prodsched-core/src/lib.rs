//! # prodsched-core
//!
//! Domain model, run configuration and error types for the production
//! scheduling engine.
//!
//! This crate provides:
//! - Domain types: `Task`, `Team`, `Product`, `Bundle`, `Schedule`
//! - The ambient `RunConfig` surface (late-part delay, search bounds, iteration caps)
//! - Error types shared by the solver crate
//!
//! ## Example
//!
//! ```rust
//! use prodsched_core::{Task, TaskKind, Team, TeamRole, Shift};
//!
//! let task = Task::new(1)
//!     .duration_minutes(60)
//!     .workers_required(1)
//!     .team("M1")
//!     .kind(TaskKind::Production);
//!
//! let team = Team::new("M1", TeamRole::Mechanic, 2).shift(Shift::Shift1);
//! assert_eq!(team.capacity, 2);
//! assert_eq!(task.team.as_deref(), Some("M1"));
//! ```

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a task. Tasks, quality inspections and late-part /
/// rework tasks all share this id space.
pub type TaskId = i64;

/// Team name, used as its own identifier (team names are unique by construction).
pub type TeamName = String;

/// Product line name.
pub type ProductName = String;

// ============================================================================
// Shift & Calendar data
// ============================================================================

/// One of the three global shift windows. Boundaries are fixed by the
/// facility, not configurable per team: a team either works a shift or it
/// doesn't.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Shift {
    /// 06:00 - 14:30
    Shift1,
    /// 14:30 - 23:00
    Shift2,
    /// 23:00 - 06:00, wraps midnight
    Shift3,
}

impl Shift {
    pub const ALL: [Shift; 3] = [Shift::Shift1, Shift::Shift2, Shift::Shift3];

    /// Minutes-from-midnight window for this shift. `Shift3`'s window wraps
    /// past midnight and is represented as two half-open ranges.
    pub const fn minute_ranges(self) -> &'static [(u16, u16)] {
        match self {
            Shift::Shift1 => &[(360, 870)],
            Shift::Shift2 => &[(870, 1380)],
            Shift::Shift3 => &[(1380, 1440), (0, 360)],
        }
    }

    /// The shift containing a given minute-of-day, if any (always `Some` —
    /// the three windows partition the day).
    pub fn containing_minute(minute_of_day: u16) -> Shift {
        for shift in Shift::ALL {
            for &(start, end) in shift.minute_ranges() {
                if minute_of_day >= start && minute_of_day < end {
                    return shift;
                }
            }
        }
        unreachable!("shift windows partition the day")
    }

    pub fn containing_instant(instant: NaiveDateTime) -> Shift {
        let minute_of_day = (instant.hour() * 60 + instant.minute()) as u16;
        Shift::containing_minute(minute_of_day)
    }

    /// Start-of-day minute offset at which this shift begins, for the day it
    /// is conventionally anchored to (`Shift3` is anchored to 23:00 of the
    /// day it starts on).
    pub const fn start_minute(self) -> u16 {
        match self {
            Shift::Shift1 => 360,
            Shift::Shift2 => 870,
            Shift::Shift3 => 1380,
        }
    }

    pub const fn duration_minutes(self) -> i64 {
        510
    }
}

impl std::fmt::Display for Shift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shift::Shift1 => write!(f, "1st"),
            Shift::Shift2 => write!(f, "2nd"),
            Shift::Shift3 => write!(f, "3rd"),
        }
    }
}

// ============================================================================
// Team
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamRole {
    Mechanic,
    Quality,
}

/// A mechanic or quality team. `capacity` is mutable: scenarios vary it
/// across runs while everything else about the team stays fixed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: TeamName,
    pub role: TeamRole,
    pub capacity: u32,
    pub shifts: BTreeSet<Shift>,
}

impl Team {
    pub fn new(name: impl Into<String>, role: TeamRole, capacity: u32) -> Self {
        Self {
            name: name.into(),
            role,
            capacity,
            shifts: BTreeSet::new(),
        }
    }

    pub fn shift(mut self, shift: Shift) -> Self {
        self.shifts.insert(shift);
        self
    }

    pub fn shifts(mut self, shifts: impl IntoIterator<Item = Shift>) -> Self {
        self.shifts.extend(shifts);
        self
    }

    pub fn works_shift(&self, shift: Shift) -> bool {
        self.shifts.contains(&shift)
    }
}

// ============================================================================
// Task
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Production,
    LatePart,
    Rework,
    QualityInspection,
}

/// A single schedulable unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub duration_minutes: i64,
    pub workers_required: u32,
    /// Mechanic team the task runs on. `None` for quality inspections, whose
    /// team is resolved at scheduling time by the load-balanced selector.
    pub team: Option<TeamName>,
    pub kind: TaskKind,
    /// For a `QualityInspection`, the primary task it inspects.
    pub primary_task: Option<TaskId>,
}

impl Task {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            duration_minutes: 0,
            workers_required: 1,
            team: None,
            kind: TaskKind::Production,
            primary_task: None,
        }
    }

    pub fn duration_minutes(mut self, minutes: i64) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn workers_required(mut self, workers: u32) -> Self {
        self.workers_required = workers;
        self
    }

    pub fn team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn primary_task(mut self, primary: TaskId) -> Self {
        self.primary_task = Some(primary);
        self
    }

    pub fn is_quality(&self) -> bool {
        matches!(self.kind, TaskKind::QualityInspection)
    }
}

// ============================================================================
// Dependencies
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyRelation {
    FinishBeforeStart,
    FinishEqualsStart,
    StartBeforeStart,
}

/// A raw precedence edge as supplied by the loader, before quality
/// interposition. `first` must finish (or start, for `StartBeforeStart`)
/// before `second` starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedenceEdge {
    pub first: TaskId,
    pub second: TaskId,
    pub relation: DependencyRelation,
}

/// primary -> quality mapping. Every primary has at most one inspection.
/// Carries the inspection's own duration and crew size, since a quality
/// task is not separately listed in the task catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLink {
    pub primary: TaskId,
    pub quality: TaskId,
    pub duration_minutes: i64,
    pub workers_required: u32,
}

/// A late-part task's arrival constraint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatePartInfo {
    pub task: TaskId,
    pub dependent: TaskId,
    pub on_dock: NaiveDate,
    pub product_line: Option<ProductName>,
}

/// A rework task's precedence edge, carrying its own optional relation and
/// product-line hint (rework edges default to `FinishBeforeStart`). Since
/// quality is synthesized for every rework task, its inspection's duration
/// and crew size travel with the edge rather than a separate `QualityLink`
/// (the rework's quality id does not exist until the graph is built).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReworkEdge {
    pub rework: TaskId,
    pub dependent: TaskId,
    pub relation: Option<DependencyRelation>,
    pub product_line: Option<ProductName>,
    pub quality_duration_minutes: i64,
    pub quality_workers_required: u32,
}

// ============================================================================
// Product
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: ProductName,
    pub delivery: NaiveDateTime,
    pub task_ids: BTreeSet<TaskId>,
    pub holidays: BTreeSet<NaiveDate>,
}

impl Product {
    pub fn new(name: impl Into<String>, delivery: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            delivery,
            task_ids: BTreeSet::new(),
            holidays: BTreeSet::new(),
        }
    }

    pub fn task_range(mut self, start: TaskId, end: TaskId) -> Self {
        self.task_ids.extend(start..=end);
        self
    }

    pub fn holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().num_days_from_monday();
        weekday < 5 && !self.holidays.contains(&date)
    }
}

// ============================================================================
// RunConfig
// ============================================================================

/// Every tunable named in the configuration surface, collected into one
/// value. Constructible directly or (in the CLI crate) from flags/env/a TOML
/// file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Minimum days after on-dock before a LatePart task may start.
    pub late_part_delay_days: f64,
    /// Verbose diagnostic output (surfaced as `tracing::debug!`/`trace!`, not
    /// direct printing).
    pub debug: bool,
    pub min_mechanics: u32,
    pub max_mechanics: u32,
    pub min_quality: u32,
    pub max_quality: u32,
    /// Iteration cap for scenario 3 Phase 1.
    pub max_iterations: u32,
    /// Scheduler continues past deadlines; affects reporting only.
    pub allow_late_delivery: bool,
    /// Instant the scheduler treats as "now" for priority scoring and as the
    /// earliest possible placement instant.
    pub start_instant: NaiveDateTime,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            late_part_delay_days: 1.0,
            debug: false,
            min_mechanics: 1,
            max_mechanics: 50,
            min_quality: 1,
            max_quality: 20,
            max_iterations: 300,
            allow_late_delivery: true,
            start_instant: NaiveDate::from_ymd_opt(2025, 8, 22)
                .expect("valid default start date")
                .and_time(NaiveTime::from_hms_opt(6, 0, 0).expect("valid default start time")),
        }
    }
}

// ============================================================================
// Bundle — the fully-loaded input
// ============================================================================

/// The complete, already-parsed input to the engine. The tabular loader that
/// produces this value from CSV sections is out of scope; this crate only
/// consumes it (and, via `serde`, can read it back from JSON).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bundle {
    pub tasks: Vec<Task>,
    pub quality_links: Vec<QualityLink>,
    pub precedence: Vec<PrecedenceEdge>,
    pub late_parts: Vec<LatePartInfo>,
    pub reworks: Vec<ReworkEdge>,
    pub teams: Vec<Team>,
    pub products: Vec<Product>,
}

impl Bundle {
    /// Validate the bundle's internal references and value ranges. Reports
    /// every violation it can find rather than failing on the first, since
    /// the loader this replaces is expected to skip bad rows and keep going
    /// (§7, InvalidInput).
    pub fn validate(&self) -> Result<(), Vec<BundleError>> {
        let mut errors = Vec::new();
        let task_ids: BTreeSet<TaskId> = self.tasks.iter().map(|t| t.id).collect();
        let team_names: BTreeSet<&str> = self.teams.iter().map(|t| t.name.as_str()).collect();

        for task in &self.tasks {
            if task.duration_minutes < 0 {
                errors.push(BundleError::NegativeDuration(task.id));
            }
            if let Some(team) = &task.team {
                if !team_names.contains(team.as_str()) {
                    errors.push(BundleError::UnknownTeam {
                        task: task.id,
                        team: team.clone(),
                    });
                }
            }
        }

        for link in &self.quality_links {
            if !task_ids.contains(&link.primary) {
                errors.push(BundleError::UnknownTask(link.primary));
            }
        }

        for edge in &self.precedence {
            if !task_ids.contains(&edge.first) {
                errors.push(BundleError::UnknownTask(edge.first));
            }
            if !task_ids.contains(&edge.second) {
                errors.push(BundleError::UnknownTask(edge.second));
            }
        }

        for team in &self.teams {
            if team.name.trim() != team.name || team.name.is_empty() {
                errors.push(BundleError::UntrimmedName(team.name.clone()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BundleError {
    #[error("task {0} has a negative duration")]
    NegativeDuration(TaskId),
    #[error("task {task} references unknown team {team:?}")]
    UnknownTeam { task: TaskId, team: String },
    #[error("reference to unknown task id {0}")]
    UnknownTask(TaskId),
    #[error("name {0:?} is empty or has leading/trailing whitespace")]
    UntrimmedName(String),
}

// ============================================================================
// Schedule output
// ============================================================================

/// Where a single task landed after a scheduling pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub team: TeamName,
    pub shift: Shift,
    pub product: Option<ProductName>,
    pub slack_hours: f64,
}

/// The full result of a scheduling pass: placements plus anything that could
/// not be placed within the retry budget.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schedule {
    pub placements: BTreeMap<TaskId, ScheduledTask>,
    pub unscheduled: Vec<TaskId>,
}

impl Schedule {
    pub fn is_complete(&self) -> bool {
        self.unscheduled.is_empty()
    }

    pub fn filter_by_team<'a>(&'a self, team: &str) -> Vec<&'a ScheduledTask> {
        self.placements
            .values()
            .filter(|t| t.team == team)
            .collect()
    }

    pub fn daily_schedule(&self, date: NaiveDate) -> Vec<&ScheduledTask> {
        self.placements
            .values()
            .filter(|t| t.start.date() <= date && date <= t.end.date())
            .collect()
    }
}
