//! Resource-constrained list scheduler — §4.5.
//!
//! Priority-driven placement: pop the lowest-priority ready task off a
//! min-heap, find it a calendar-valid, capacity-respecting window, reserve
//! it, and release its successors. Quality inspections additionally pick a
//! team via the load-balanced selector in `capacity`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Timelike};
use prodsched_core::{
    DependencyRelation, Product, ProductName, RunConfig, Schedule, ScheduledTask, Shift, Task,
    TaskId, TaskKind, Team, TeamName, TeamRole,
};

use crate::capacity::{select_quality_team, CapacityTimeline, QualityCandidate};
use crate::dag::{duration_table, resolve_product_line, workers_table, EffectiveDag};
use crate::error::PlacementFailure;
use crate::priority::{slack_hours, task_priority};

/// A task ready to be popped, ordered so the lowest-priority, lowest-id task
/// sorts first out of a `BinaryHeap` (a max-heap by default).
#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapItem {
    priority: f64,
    task_id: TaskId,
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .partial_cmp(&self.priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

/// Every node the scheduler can place: the real task catalog plus a
/// synthetic `Task` for each quality inspection id (explicit or
/// rework-synthesized), so priority scoring and placement can treat both
/// uniformly.
fn build_node_table(bundle: &prodsched_core::Bundle, dag: &EffectiveDag) -> BTreeMap<TaskId, Task> {
    let mut nodes: BTreeMap<TaskId, Task> = bundle.tasks.iter().map(|t| (t.id, t.clone())).collect();
    let durations = duration_table(bundle, dag);
    let workers = workers_table(bundle, dag);
    for (&quality_id, &primary) in &dag.primary_of_quality {
        nodes.entry(quality_id).or_insert_with(|| {
            Task::new(quality_id)
                .duration_minutes(durations.get(&quality_id).copied().unwrap_or(0))
                .workers_required(workers.get(&quality_id).copied().unwrap_or(1))
                .kind(TaskKind::QualityInspection)
                .primary_task(primary)
        });
    }
    nodes
}

/// Distinct-predecessor dependency sets derived from the effective DAG: all
/// three relation kinds contribute a dependency, matching the reference
/// scheduler's `dependencies`/`dependents` maps.
fn dependency_sets(dag: &EffectiveDag) -> (BTreeMap<TaskId, BTreeSet<TaskId>>, BTreeMap<TaskId, BTreeSet<TaskId>>) {
    let mut deps: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
    let mut dependents: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
    for edge in &dag.edges {
        deps.entry(edge.to).or_default().insert(edge.from);
        dependents.entry(edge.from).or_default().insert(edge.to);
    }
    (deps, dependents)
}

fn is_weekend(date: NaiveDate) -> bool {
    date.weekday().num_days_from_monday() >= 5
}

/// Advance to the start of the next shift boundary (06:00, 14:30, 23:00 or
/// next day's 06:00), used when the current instant falls in a shift the
/// team does not work.
fn advance_to_next_shift_boundary(current: NaiveDateTime) -> NaiveDateTime {
    let minute = u16::try_from(current.hour() * 60 + current.minute()).unwrap_or(0);
    let date = current.date();
    if minute < 360 {
        date.and_hms_opt(6, 0, 0).expect("valid time")
    } else if minute < 870 {
        date.and_hms_opt(14, 30, 0).expect("valid time")
    } else if minute < 1380 {
        date.and_hms_opt(23, 0, 0).expect("valid time")
    } else {
        (date + Days::new(1)).and_hms_opt(6, 0, 0).expect("valid time")
    }
}

/// The wall-clock end of the shift occurrence `current` falls within.
fn shift_end_instant(current: NaiveDateTime, shift: Shift) -> NaiveDateTime {
    let date = current.date();
    match shift {
        Shift::Shift1 => date.and_hms_opt(14, 30, 0).expect("valid time"),
        Shift::Shift2 => date.and_hms_opt(23, 0, 0).expect("valid time"),
        Shift::Shift3 => {
            let minute = u16::try_from(current.hour() * 60 + current.minute()).unwrap_or(0);
            if minute >= 1380 {
                (date + Days::new(1)).and_hms_opt(6, 0, 0).expect("valid time")
            } else {
                date.and_hms_opt(6, 0, 0).expect("valid time")
            }
        }
    }
}

/// Scan forward from `start` for the next instant at which `duration_minutes`
/// fits entirely inside one working shift `team` works, on a working day,
/// with enough spare capacity throughout. `None` if the team works no shift
/// at all, or no window exists within a two-year search horizon.
fn next_window(
    team: &Team,
    product: Option<&Product>,
    start: NaiveDateTime,
    duration_minutes: i64,
    workers_needed: u32,
    timeline: &CapacityTimeline,
) -> Option<(NaiveDateTime, NaiveDateTime, Shift)> {
    if team.shifts.is_empty() {
        return None;
    }
    let horizon = start + chrono::Duration::days(730);
    let mut current = start;

    loop {
        if current > horizon {
            return None;
        }

        let date = current.date();
        let working_day = product.map_or(!is_weekend(date), |p| p.is_working_day(date));
        if !working_day {
            current = (date + Days::new(1)).and_hms_opt(6, 0, 0).expect("valid time");
            continue;
        }

        let shift = Shift::containing_instant(current);
        if !team.works_shift(shift) {
            current = advance_to_next_shift_boundary(current);
            continue;
        }

        let shift_end = shift_end_instant(current, shift);
        let candidate_end = current + chrono::Duration::minutes(duration_minutes);
        if candidate_end > shift_end {
            current = advance_to_next_shift_boundary(current);
            continue;
        }

        if timeline.available(&team.name, team.capacity, current, candidate_end, workers_needed) {
            return Some((current, candidate_end, shift));
        }

        match timeline.next_event_after(&team.name, current) {
            Some(next) => current = next,
            None => current += chrono::Duration::minutes(1),
        }
    }
}

/// Earliest start of the on-dock date plus the configured delay, floored to
/// 06:00 of the resulting calendar day (§3, §4.5.d).
fn late_part_earliest(on_dock: NaiveDate, delay_days: f64) -> NaiveDateTime {
    let midnight = on_dock.and_hms_opt(0, 0, 0).expect("valid time");
    let shifted = midnight + chrono::Duration::minutes((delay_days * 1440.0).round() as i64);
    shifted.date().and_hms_opt(6, 0, 0).expect("valid time")
}

/// Tighten `earliest` by every already-placed predecessor's edge relation:
/// `FinishBeforeStart` and `StartBeforeStart` widen via `max`;
/// `FinishEqualsStart` forces equality (also folded through `max` against
/// any other binding constraint, since exact equality cannot be honored if a
/// later-finishing predecessor also applies).
fn tighten_earliest(
    task_id: TaskId,
    mut earliest: NaiveDateTime,
    predecessor_ids: &BTreeSet<TaskId>,
    dag: &EffectiveDag,
    placed: &BTreeMap<TaskId, ScheduledTask>,
) -> NaiveDateTime {
    let mut forced_equal: Option<NaiveDateTime> = None;
    for &dep in predecessor_ids {
        let Some(placement) = placed.get(&dep) else { continue };
        for edge in dag.successors_of(dep).iter().filter(|e| e.to == task_id) {
            match edge.relation {
                DependencyRelation::FinishEqualsStart => {
                    forced_equal = Some(forced_equal.map_or(placement.end, |f| f.max(placement.end)));
                }
                DependencyRelation::FinishBeforeStart => {
                    earliest = earliest.max(placement.end);
                }
                DependencyRelation::StartBeforeStart => {
                    earliest = earliest.max(placement.start);
                }
            }
        }
    }
    if let Some(forced) = forced_equal {
        earliest = earliest.max(forced);
    }
    earliest
}

/// Try every shift in order, pick the best load-balanced team for each, and
/// return the earliest resulting candidate across the three (§4.5.e).
fn place_quality(
    quality_teams: &[&Team],
    product: Option<&Product>,
    earliest: NaiveDateTime,
    duration_minutes: i64,
    workers_needed: u32,
    timeline: &CapacityTimeline,
) -> Option<(NaiveDateTime, NaiveDateTime, Shift, TeamName)> {
    let candidates: Vec<QualityCandidate<'_>> = quality_teams
        .iter()
        .map(|t| QualityCandidate { name: t.name.as_str(), capacity: t.capacity })
        .collect();
    let works_shift = |name: &str, shift: Shift| {
        quality_teams.iter().any(|t| t.name == name && t.works_shift(shift))
    };

    let mut best: Option<(NaiveDateTime, NaiveDateTime, Shift, TeamName)> = None;
    for shift in Shift::ALL {
        let Some(team_name) = select_quality_team(&candidates, shift, workers_needed, works_shift, timeline) else {
            continue;
        };
        let Some(team) = quality_teams.iter().find(|t| t.name == team_name) else { continue };
        let Some((start, end, actual_shift)) = next_window(team, product, earliest, duration_minutes, workers_needed, timeline) else {
            continue;
        };
        let better = match &best {
            Some((best_start, ..)) => start < *best_start,
            None => true,
        };
        if better {
            best = Some((start, end, actual_shift, team_name.to_string()));
        }
    }
    best
}

/// Run the list scheduler once over `bundle`'s current team capacities.
/// Team capacities are read directly off `bundle.teams` — callers that want
/// a scenario's trial capacities in effect must mutate them first (see
/// `scenario::CapacityGuard`).
pub fn schedule(bundle: &prodsched_core::Bundle, dag: &EffectiveDag, config: &RunConfig) -> Schedule {
    let nodes = build_node_table(bundle, dag);
    let durations = duration_table(bundle, dag);
    let (deps, dependents) = dependency_sets(dag);

    let teams_by_name: BTreeMap<&str, &Team> = bundle.teams.iter().map(|t| (t.name.as_str(), t)).collect();
    let products_by_name: BTreeMap<&str, &Product> = bundle.products.iter().map(|p| (p.name.as_str(), p)).collect();
    let deliveries: BTreeMap<ProductName, NaiveDateTime> =
        bundle.products.iter().map(|p| (p.name.clone(), p.delivery)).collect();
    let late_part_on_dock: BTreeMap<TaskId, NaiveDate> =
        bundle.late_parts.iter().map(|lp| (lp.task, lp.on_dock)).collect();
    let mut quality_teams: Vec<&Team> = bundle.teams.iter().filter(|t| t.role == TeamRole::Quality).collect();
    quality_teams.sort_by(|a, b| a.name.cmp(&b.name));

    let mut cp_cache: BTreeMap<TaskId, i64> = BTreeMap::new();
    let priority_of = |task_id: TaskId, cache: &mut BTreeMap<TaskId, i64>| {
        let task = &nodes[&task_id];
        task_priority(task, dag, &durations, cache, &deliveries, config.start_instant)
    };

    let mut in_degree: BTreeMap<TaskId, usize> =
        nodes.keys().map(|&id| (id, deps.get(&id).map_or(0, BTreeSet::len))).collect();

    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::new();
    for (&id, &degree) in &in_degree {
        if degree == 0 {
            heap.push(HeapItem { priority: priority_of(id, &mut cp_cache), task_id: id });
        }
    }

    let mut timeline = CapacityTimeline::new();
    let mut placed: BTreeMap<TaskId, ScheduledTask> = BTreeMap::new();
    let mut failed: BTreeSet<TaskId> = BTreeSet::new();
    let mut retry_counts: BTreeMap<TaskId, u32> = BTreeMap::new();

    let total_nodes = nodes.len();
    let max_total_iterations = total_nodes.saturating_mul(10).max(1000);
    let mut iterations = 0usize;

    loop {
        if placed.len() + failed.len() >= total_nodes {
            break;
        }
        if heap.is_empty() {
            let mut newly_ready = Vec::new();
            for &id in nodes.keys() {
                if placed.contains_key(&id) || failed.contains(&id) {
                    continue;
                }
                let unresolved = deps
                    .get(&id)
                    .map(|set| set.iter().any(|d| !placed.contains_key(d) && !failed.contains(d)))
                    .unwrap_or(false);
                if !unresolved {
                    newly_ready.push(id);
                }
            }
            if newly_ready.is_empty() {
                tracing::warn!(
                    unscheduled = total_nodes - placed.len() - failed.len(),
                    "no more tasks can be scheduled; terminating with a partial schedule"
                );
                break;
            }
            for id in newly_ready {
                heap.push(HeapItem { priority: priority_of(id, &mut cp_cache), task_id: id });
            }
        }

        iterations += 1;
        if iterations > max_total_iterations {
            tracing::warn!("scheduler iteration cap reached; terminating with a partial schedule");
            break;
        }

        let Some(HeapItem { priority, task_id }) = heap.pop() else { break };
        if placed.contains_key(&task_id) || failed.contains(&task_id) {
            continue;
        }

        if *retry_counts.get(&task_id).unwrap_or(&0) >= 3 {
            failed.insert(task_id);
            tracing::warn!(task_id, "task failed too many times, skipping permanently");
            continue;
        }

        let task = &nodes[&task_id];
        let Some(product_line) = resolve_product_line(task_id, &dag.primary_of_quality, &dag.task_to_product) else {
            // No resolvable product: still place it (lowest priority already
            // pushed it last) against the bare weekday calendar.
            place_and_advance(
                task,
                None,
                None,
                priority,
                &deps,
                &dependents,
                &durations,
                dag,
                &teams_by_name,
                &quality_teams,
                &late_part_on_dock,
                config,
                &mut timeline,
                &mut placed,
                &mut failed,
                &mut retry_counts,
                &mut heap,
                &mut cp_cache,
                &deliveries,
                &priority_of,
                config.start_instant,
            );
            continue;
        };
        let product = products_by_name.get(product_line.as_str()).copied();

        place_and_advance(
            task,
            Some(product_line),
            product,
            priority,
            &deps,
            &dependents,
            &durations,
            dag,
            &teams_by_name,
            &quality_teams,
            &late_part_on_dock,
            config,
            &mut timeline,
            &mut placed,
            &mut failed,
            &mut retry_counts,
            &mut heap,
            &mut cp_cache,
            &deliveries,
            &priority_of,
            config.start_instant,
        );
    }

    let unscheduled: Vec<TaskId> = nodes.keys().copied().filter(|id| !placed.contains_key(id)).collect();
    if !config.allow_late_delivery && !unscheduled.is_empty() {
        tracing::warn!(scheduled = placed.len(), total = total_nodes, "schedule is incomplete");
    }
    Schedule { placements: placed, unscheduled }
}

#[allow(clippy::too_many_arguments)]
fn place_and_advance(
    task: &Task,
    product_line: Option<ProductName>,
    product: Option<&Product>,
    priority: f64,
    deps: &BTreeMap<TaskId, BTreeSet<TaskId>>,
    dependents: &BTreeMap<TaskId, BTreeSet<TaskId>>,
    durations: &BTreeMap<TaskId, i64>,
    dag: &EffectiveDag,
    teams_by_name: &BTreeMap<&str, &Team>,
    quality_teams: &[&Team],
    late_part_on_dock: &BTreeMap<TaskId, NaiveDate>,
    config: &RunConfig,
    timeline: &mut CapacityTimeline,
    placed: &mut BTreeMap<TaskId, ScheduledTask>,
    failed: &mut BTreeSet<TaskId>,
    retry_counts: &mut BTreeMap<TaskId, u32>,
    heap: &mut BinaryHeap<HeapItem>,
    cp_cache: &mut BTreeMap<TaskId, i64>,
    deliveries: &BTreeMap<ProductName, NaiveDateTime>,
    priority_of: &impl Fn(TaskId, &mut BTreeMap<TaskId, i64>) -> f64,
    start_instant: NaiveDateTime,
) {
    let task_id = task.id;
    let duration_minutes = durations.get(&task_id).copied().unwrap_or(task.duration_minutes);
    let workers_needed = task.workers_required;

    let mut earliest = start_instant;
    if task.kind == TaskKind::LatePart {
        if let Some(&on_dock) = late_part_on_dock.get(&task_id) {
            earliest = earliest.max(late_part_earliest(on_dock, config.late_part_delay_days));
        }
    }
    let predecessor_ids = deps.get(&task_id).cloned().unwrap_or_default();
    earliest = tighten_earliest(task_id, earliest, &predecessor_ids, dag, placed);

    let placement = if task.kind == TaskKind::QualityInspection {
        place_quality(quality_teams, product, earliest, duration_minutes, workers_needed, timeline)
    } else {
        let Some(&team) = task.team.as_deref().and_then(|name| teams_by_name.get(name)) else {
            failed.insert(task_id);
            tracing::error!(task_id, "task has no resolvable mechanic team; failing permanently");
            return;
        };
        if team.shifts.is_empty() {
            failed.insert(task_id);
            let failure = PlacementFailure::UnschedulableTask(task_id);
            tracing::error!(task_id, %failure, "team works no shifts; failing permanently");
            return;
        }
        next_window(team, product, earliest, duration_minutes, workers_needed, timeline)
            .map(|(start, end, shift)| (start, end, shift, team.name.clone()))
    };

    let Some((start, end, shift, team_name)) = placement else {
        let retries = retry_counts.entry(task_id).or_insert(0);
        *retries += 1;
        if *retries < 3 {
            heap.push(HeapItem { priority: priority + 0.1, task_id });
        } else {
            failed.insert(task_id);
            let failure = if task.kind == TaskKind::QualityInspection {
                PlacementFailure::NoQualityTeam(task_id)
            } else {
                PlacementFailure::UnschedulableTask(task_id)
            };
            tracing::warn!(task_id, %failure, "no viable window found after 3 retries; failing permanently");
        }
        return;
    };

    timeline.reserve(&team_name, start, end, workers_needed);
    let slack = slack_hours(task_id, start, dag, durations, deliveries);
    placed.insert(
        task_id,
        ScheduledTask {
            task_id,
            start,
            end,
            team: team_name,
            shift,
            product: product_line,
            slack_hours: slack,
        },
    );

    if let Some(dependent_ids) = dependents.get(&task_id) {
        for &dependent in dependent_ids {
            if placed.contains_key(&dependent) || failed.contains(&dependent) {
                continue;
            }
            let dependent_deps = deps.get(&dependent).cloned().unwrap_or_default();
            let ready = dependent_deps.iter().all(|d| placed.contains_key(d) || failed.contains(d));
            if ready {
                heap.push(HeapItem { priority: priority_of(dependent, cp_cache), task_id: dependent });
            }
        }
    }
}
