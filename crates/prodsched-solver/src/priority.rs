//! Critical-path length, task priority scoring and slack — §4.3.
//!
//! All three are pure functions of the effective DAG plus a snapshot of
//! product deliveries; none of them touch the capacity timeline.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::NaiveDateTime;
use prodsched_core::{ProductName, Task, TaskId, TaskKind};

use crate::dag::{resolve_product_line, EffectiveDag};

/// Priority assigned to a task with no resolvable product line — scheduled
/// dead last.
pub const NO_PRODUCT_PRIORITY: f64 = 999_999.0;

/// Memoized recursive longest duration-sum along any directed path starting
/// at `task`, counting `task`'s own duration. The DAG's acyclicity (checked
/// at build time) guarantees this terminates.
pub fn critical_path_length(
    task: TaskId,
    dag: &EffectiveDag,
    durations: &BTreeMap<TaskId, i64>,
    cache: &mut BTreeMap<TaskId, i64>,
) -> i64 {
    if let Some(&cached) = cache.get(&task) {
        return cached;
    }
    let own = durations.get(&task).copied().unwrap_or(0);
    let best_successor = dag
        .successors_of(task)
        .iter()
        .map(|edge| critical_path_length(edge.to, dag, durations, cache))
        .max()
        .unwrap_or(0);
    let length = own + best_successor;
    cache.insert(task, length);
    length
}

/// Per-task priority score (lower = higher priority), §4.3.
pub fn task_priority(
    task: &Task,
    dag: &EffectiveDag,
    durations: &BTreeMap<TaskId, i64>,
    cp_cache: &mut BTreeMap<TaskId, i64>,
    deliveries: &BTreeMap<ProductName, NaiveDateTime>,
    now: NaiveDateTime,
) -> f64 {
    match task.kind {
        TaskKind::LatePart => return -2000.0,
        TaskKind::QualityInspection => return -1000.0,
        TaskKind::Rework => return -500.0,
        TaskKind::Production => {}
    }

    let Some(product) = resolve_product_line(task.id, &dag.primary_of_quality, &dag.task_to_product) else {
        return NO_PRODUCT_PRIORITY;
    };
    let Some(&delivery) = deliveries.get(&product) else {
        return NO_PRODUCT_PRIORITY;
    };

    let days_to_delivery = (delivery - now).num_days() as f64;
    let cp_len = critical_path_length(task.id, dag, durations, cp_cache) as f64;
    let out_degree = dag.out_degree(task.id) as f64;
    let duration_min = durations.get(&task.id).copied().unwrap_or(0) as f64;

    (100.0 - days_to_delivery) * 10.0
        + (10_000.0 - cp_len) * 5.0
        + (100.0 - out_degree) * 3.0
        + (100.0 - duration_min / 10.0) * 2.0
}

/// All transitive successors of `task` (not including `task` itself).
fn transitive_successors(task: TaskId, dag: &EffectiveDag) -> BTreeSet<TaskId> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<TaskId> = dag.successors_of(task).iter().map(|e| e.to).collect();
    while let Some(node) = queue.pop_front() {
        if seen.insert(node) {
            for edge in dag.successors_of(node) {
                queue.push_back(edge.to);
            }
        }
    }
    seen
}

/// Slack, in hours, between `scheduled_start` and the latest start that
/// still meets the task's product deadline, after accounting for downstream
/// duration and a fixed 2-day safety margin. Returns 0.0 when no product can
/// be resolved (matches the reference behavior of reporting no slack rather
/// than failing).
pub fn slack_hours(
    task: TaskId,
    scheduled_start: NaiveDateTime,
    dag: &EffectiveDag,
    durations: &BTreeMap<TaskId, i64>,
    deliveries: &BTreeMap<ProductName, NaiveDateTime>,
) -> f64 {
    let Some(product) = resolve_product_line(task, &dag.primary_of_quality, &dag.task_to_product) else {
        return 0.0;
    };
    let Some(&delivery) = deliveries.get(&product) else {
        return 0.0;
    };

    let total_successor_minutes: i64 = transitive_successors(task, dag)
        .iter()
        .map(|id| durations.get(id).copied().unwrap_or(0))
        .sum();
    let buffer_days = total_successor_minutes as f64 / (8.0 * 60.0);
    let latest_start = delivery - chrono::Duration::minutes(((buffer_days + 2.0) * 24.0 * 60.0) as i64);

    (latest_start - scheduled_start).num_minutes() as f64 / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use prodsched_core::{Bundle, DependencyRelation, PrecedenceEdge, Product};

    fn bundle_chain() -> Bundle {
        Bundle {
            tasks: vec![
                prodsched_core::Task::new(1).duration_minutes(60),
                prodsched_core::Task::new(2).duration_minutes(120),
                prodsched_core::Task::new(3).duration_minutes(30),
            ],
            precedence: vec![
                PrecedenceEdge { first: 1, second: 2, relation: DependencyRelation::FinishBeforeStart },
                PrecedenceEdge { first: 2, second: 3, relation: DependencyRelation::FinishBeforeStart },
            ],
            products: vec![Product::new(
                "P",
                NaiveDate::from_ymd_opt(2025, 9, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            )
            .task_range(1, 3)],
            ..Default::default()
        }
    }

    #[test]
    fn critical_path_length_sums_longest_suffix() {
        let bundle = bundle_chain();
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let durations = crate::dag::duration_table(&bundle, &dag);
        let mut cache = BTreeMap::new();
        assert_eq!(critical_path_length(1, &dag, &durations, &mut cache), 60 + 120 + 30);
        assert_eq!(critical_path_length(3, &dag, &durations, &mut cache), 30);
    }

    #[test]
    fn critical_path_length_is_memoized_and_stable() {
        let bundle = bundle_chain();
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let durations = crate::dag::duration_table(&bundle, &dag);
        let mut cache = BTreeMap::new();
        let first = critical_path_length(1, &dag, &durations, &mut cache);
        let second = critical_path_length(1, &dag, &durations, &mut cache);
        assert_eq!(first, second);
    }

    #[test]
    fn late_part_rework_and_quality_have_fixed_overrides() {
        let bundle = bundle_chain();
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let durations = crate::dag::duration_table(&bundle, &dag);
        let mut cache = BTreeMap::new();
        let deliveries = BTreeMap::new();
        let now = bundle.products[0].delivery;

        let late_part = prodsched_core::Task::new(301).kind(prodsched_core::TaskKind::LatePart);
        assert_eq!(task_priority(&late_part, &dag, &durations, &mut cache, &deliveries, now), -2000.0);

        let quality = prodsched_core::Task::new(100).kind(prodsched_core::TaskKind::QualityInspection);
        assert_eq!(task_priority(&quality, &dag, &durations, &mut cache, &deliveries, now), -1000.0);

        let rework = prodsched_core::Task::new(50).kind(prodsched_core::TaskKind::Rework);
        assert_eq!(task_priority(&rework, &dag, &durations, &mut cache, &deliveries, now), -500.0);
    }

    #[test]
    fn task_without_product_sorts_last() {
        let bundle = bundle_chain();
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let durations = crate::dag::duration_table(&bundle, &dag);
        let mut cache = BTreeMap::new();
        let orphan = prodsched_core::Task::new(999).duration_minutes(10);
        let priority = task_priority(&orphan, &dag, &durations, &mut cache, &BTreeMap::new(), bundle.products[0].delivery);
        assert_eq!(priority, NO_PRODUCT_PRIORITY);
    }

    #[test]
    fn slack_is_zero_without_a_product() {
        let bundle = bundle_chain();
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let durations = crate::dag::duration_table(&bundle, &dag);
        let now = bundle.products[0].delivery;
        let hours = slack_hours(999, now, &dag, &durations, &BTreeMap::new());
        assert_eq!(hours, 0.0);
    }
}
