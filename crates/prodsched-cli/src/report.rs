//! Report types emitted by the `schedule`, `scenario2` and `scenario3` subcommands.
//!
//! Each report is `Serialize` and rendered either as JSON or as an aligned
//! text table, so `main.rs` builds one of these from a `Schedule`/`Bundle`
//! pair and hands it to the chosen formatter.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use prodsched_core::{Bundle, ProductName, RunConfig, Schedule, TaskId, TeamName};
use prodsched_solver::dag::{duration_table, workers_table, EffectiveDag};
use prodsched_solver::priority::task_priority;
use prodsched_solver::{metrics, scenario::ScenarioRun};
use serde::Serialize;

/// One row of the globally prioritized, annotated task list.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReportRow {
    pub priority_rank: usize,
    pub task_id: TaskId,
    pub kind: &'static str,
    pub display_name: String,
    pub product: Option<ProductName>,
    pub team: String,
    pub shift: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_minutes: i64,
    pub workers_required: u32,
    pub slack_hours: f64,
    pub depends_on: Vec<TaskId>,
    pub on_dock: Option<String>,
}

/// Every scheduled task, ranked by the same priority score the scheduler
/// used to order placement, lowest (highest-priority) first.
pub fn task_report(bundle: &Bundle, dag: &EffectiveDag, schedule: &Schedule, config: &RunConfig) -> Vec<TaskReportRow> {
    let durations = duration_table(bundle, dag);
    let workers = workers_table(bundle, dag);
    let deliveries: BTreeMap<ProductName, NaiveDateTime> =
        bundle.products.iter().map(|p| (p.name.clone(), p.delivery)).collect();
    let late_part_on_dock: BTreeMap<TaskId, String> =
        bundle.late_parts.iter().map(|lp| (lp.task, lp.on_dock.to_string())).collect();
    let node_kind: BTreeMap<TaskId, &'static str> = bundle
        .tasks
        .iter()
        .map(|t| {
            (
                t.id,
                match t.kind {
                    prodsched_core::TaskKind::Production => "production",
                    prodsched_core::TaskKind::LatePart => "late_part",
                    prodsched_core::TaskKind::Rework => "rework",
                    prodsched_core::TaskKind::QualityInspection => "quality_inspection",
                },
            )
        })
        .chain(dag.primary_of_quality.keys().map(|&q| (q, "quality_inspection")))
        .collect();

    let nodes: BTreeMap<TaskId, prodsched_core::Task> = bundle
        .tasks
        .iter()
        .map(|t| (t.id, t.clone()))
        .chain(dag.primary_of_quality.iter().map(|(&quality, &primary)| {
            (
                quality,
                prodsched_core::Task::new(quality)
                    .duration_minutes(durations.get(&quality).copied().unwrap_or(0))
                    .workers_required(workers.get(&quality).copied().unwrap_or(1))
                    .kind(prodsched_core::TaskKind::QualityInspection)
                    .primary_task(primary),
            )
        }))
        .collect();

    let mut cp_cache = BTreeMap::new();
    let mut rows: Vec<(f64, TaskReportRow)> = schedule
        .placements
        .values()
        .map(|placement| {
            let task = nodes.get(&placement.task_id);
            let priority = task.map_or(priority_fallback(), |t| {
                task_priority(t, dag, &durations, &mut cp_cache, &deliveries, config.start_instant)
            });
            let depends_on: Vec<TaskId> =
                dag.predecessors_of(placement.task_id).iter().map(|e| e.from).collect();
            let kind = node_kind.get(&placement.task_id).copied().unwrap_or("production");
            let display_name = match kind {
                "quality_inspection" => format!("QC-{}", placement.task_id),
                _ => format!("Task-{}", placement.task_id),
            };
            let on_dock = late_part_on_dock.get(&placement.task_id).cloned();
            let row = TaskReportRow {
                priority_rank: 0,
                task_id: placement.task_id,
                kind,
                display_name,
                product: placement.product.clone(),
                team: placement.team.clone(),
                shift: placement.shift.to_string(),
                start: placement.start,
                end: placement.end,
                duration_minutes: durations.get(&placement.task_id).copied().unwrap_or(0),
                workers_required: workers.get(&placement.task_id).copied().unwrap_or(1),
                slack_hours: placement.slack_hours,
                depends_on,
                on_dock,
            };
            (priority, row)
        })
        .collect();

    rows.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.1.task_id.cmp(&b.1.task_id)));
    rows.into_iter()
        .enumerate()
        .map(|(idx, (_, mut row))| {
            row.priority_rank = idx + 1;
            row
        })
        .collect()
}

fn priority_fallback() -> f64 {
    f64::MAX
}

/// Delivery performance for a single product.
#[derive(Debug, Clone, Serialize)]
pub struct ProductMetricsRow {
    pub product: ProductName,
    pub delivery_date: NaiveDateTime,
    pub projected_completion: Option<NaiveDateTime>,
    pub lateness_days: i64,
    pub on_time: bool,
    pub production_tasks: usize,
    pub quality_tasks: usize,
    pub rework_tasks: usize,
    pub late_part_tasks: usize,
}

/// Per-product metrics: delivery performance plus a breakdown of scheduled
/// task kinds.
pub fn product_metrics_report(bundle: &Bundle, dag: &EffectiveDag, schedule: &Schedule) -> Vec<ProductMetricsRow> {
    bundle
        .products
        .iter()
        .map(|product| {
            let placements: Vec<_> = schedule
                .placements
                .values()
                .filter(|t| t.product.as_deref() == Some(product.name.as_str()))
                .collect();
            let projected_completion = placements.iter().map(|t| t.end).max();
            let lateness_days = metrics::lateness(bundle, schedule, &product.name);

            let mut production_tasks = 0;
            let mut quality_tasks = 0;
            let mut rework_tasks = 0;
            let mut late_part_tasks = 0;
            for placement in &placements {
                match classify(bundle, dag, placement.task_id) {
                    "quality_inspection" => quality_tasks += 1,
                    "rework" => rework_tasks += 1,
                    "late_part" => late_part_tasks += 1,
                    _ => production_tasks += 1,
                }
            }

            ProductMetricsRow {
                product: product.name.clone(),
                delivery_date: product.delivery,
                projected_completion,
                lateness_days,
                on_time: lateness_days <= 0,
                production_tasks,
                quality_tasks,
                rework_tasks,
                late_part_tasks,
            }
        })
        .collect()
}

fn classify(bundle: &Bundle, dag: &EffectiveDag, task_id: TaskId) -> &'static str {
    if dag.primary_of_quality.contains_key(&task_id) {
        return "quality_inspection";
    }
    match bundle.tasks.iter().find(|t| t.id == task_id) {
        Some(t) => match t.kind {
            prodsched_core::TaskKind::Production => "production",
            prodsched_core::TaskKind::LatePart => "late_part",
            prodsched_core::TaskKind::Rework => "rework",
            prodsched_core::TaskKind::QualityInspection => "quality_inspection",
        },
        None => "production",
    }
}

/// Headcount, makespan and utilization summary for one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub scenario: &'static str,
    pub makespan_days: i64,
    pub total_mechanics: u32,
    pub total_quality: u32,
    pub utilization_by_team: BTreeMap<TeamName, f64>,
    pub max_lateness_days: i64,
    pub total_lateness_days: i64,
    pub iterations_used: u32,
    pub unscheduled_count: usize,
}

/// Summarize a finished scenario run for reporting: workforce totals,
/// per-team utilization, and aggregate lateness.
pub fn scenario_summary(scenario: &'static str, bundle: &Bundle, run: &ScenarioRun) -> ScenarioSummary {
    let total_mechanics: u32 = run.mechanic_capacities.values().sum();
    let total_quality: u32 = run.quality_capacities.values().sum();

    let utilization_by_team: BTreeMap<TeamName, f64> = bundle
        .teams
        .iter()
        .filter_map(|t| metrics::utilization(&run.schedule, bundle, &t.name).map(|u| (t.name.clone(), u)))
        .collect();

    let max_lateness_days = run.lateness_days.values().copied().max().unwrap_or(0);
    let total_lateness_days = run.lateness_days.values().filter(|&&d| d > 0).sum();

    ScenarioSummary {
        scenario,
        makespan_days: run.makespan_days,
        total_mechanics,
        total_quality,
        utilization_by_team,
        max_lateness_days,
        total_lateness_days,
        iterations_used: run.iterations_used,
        unscheduled_count: run.schedule.unscheduled.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use prodsched_core::{RunConfig, Shift, Task, Team, TeamRole};

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn simple_bundle() -> Bundle {
        Bundle {
            tasks: vec![Task::new(1).duration_minutes(60).workers_required(1).team("M1")],
            teams: vec![Team::new("M1", TeamRole::Mechanic, 1).shift(Shift::Shift1)],
            products: vec![prodsched_core::Product::new("P", dt(2025, 9, 1, 0, 0)).task_range(1, 1)],
            ..Default::default()
        }
    }

    #[test]
    fn task_report_ranks_every_placement() {
        let bundle = simple_bundle();
        let dag = prodsched_solver::dag::build_effective_dag(&bundle).unwrap();
        let config = RunConfig { start_instant: dt(2025, 8, 22, 6, 0), ..Default::default() };
        let schedule = prodsched_solver::scheduler::schedule(&bundle, &dag, &config);
        let rows = task_report(&bundle, &dag, &schedule, &config);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].priority_rank, 1);
        assert_eq!(rows[0].task_id, 1);
    }

    #[test]
    fn product_metrics_report_flags_on_time_delivery() {
        let bundle = simple_bundle();
        let dag = prodsched_solver::dag::build_effective_dag(&bundle).unwrap();
        let config = RunConfig { start_instant: dt(2025, 8, 22, 6, 0), ..Default::default() };
        let schedule = prodsched_solver::scheduler::schedule(&bundle, &dag, &config);
        let rows = product_metrics_report(&bundle, &dag, &schedule);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].on_time);
        assert_eq!(rows[0].production_tasks, 1);
    }
}
