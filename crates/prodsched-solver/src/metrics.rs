//! Post-hoc schedule analytics — §4.6/§4.7: makespan, lateness, utilization,
//! bottleneck identification and resource-conflict auditing.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use prodsched_core::{Bundle, ProductName, Schedule, TaskId, TeamName, TeamRole};

use crate::dag::{workers_table, EffectiveDag};

/// A large sentinel makespan reported when the schedule is incomplete,
/// mirroring the reference's "failure means unbounded" convention rather
/// than a panic or `Option`.
pub const INCOMPLETE_MAKESPAN_DAYS: i64 = 999_999;

/// Sentinel `lateness` for a product with no scheduled tasks (unknown
/// product name or nothing placed yet), matching the reference's literal
/// `999999` rather than an absent value.
pub const UNSCHEDULED_LATENESS_DAYS: i64 = 999_999;

fn any_product_working_day(bundle: &Bundle, date: NaiveDate) -> bool {
    if bundle.products.is_empty() {
        return date.weekday().num_days_from_monday() < 5;
    }
    bundle.products.iter().any(|p| p.is_working_day(date))
}

/// Total makespan in working days, counting a day if ANY product in the
/// bundle treats it as a working day (§9: the literal union semantics are
/// kept; see `per_product_business_days` for the per-product alternative).
pub fn makespan(bundle: &Bundle, schedule: &Schedule) -> i64 {
    if schedule.placements.is_empty() {
        return 0;
    }
    if !schedule.is_complete() {
        return INCOMPLETE_MAKESPAN_DAYS;
    }

    let start = schedule.placements.values().map(|t| t.start).min().expect("non-empty");
    let end = schedule.placements.values().map(|t| t.end).max().expect("non-empty");

    let mut current = start.date();
    let end_date = end.date();
    let mut working_days = 0i64;
    while current <= end_date {
        if any_product_working_day(bundle, current) {
            working_days += 1;
        }
        current = current.succ_opt().expect("date does not overflow");
    }
    working_days
}

/// Calendar days between a product's last scheduled task and its delivery
/// date; negative means early, zero or positive means late.
///
/// An unknown product name or a product with no scheduled tasks yields
/// `UNSCHEDULED_LATENESS_DAYS` rather than `None` — the reference always
/// reports a literal lateness figure, never an absent field.
pub fn lateness(bundle: &Bundle, schedule: &Schedule, product: &str) -> i64 {
    let Some(product) = bundle.products.iter().find(|p| p.name == product) else {
        return UNSCHEDULED_LATENESS_DAYS;
    };
    let last_end = schedule
        .placements
        .values()
        .filter(|t| t.product.as_deref() == Some(product.name.as_str()))
        .map(|t| t.end)
        .max();
    match last_end {
        Some(end) => (end - product.delivery).num_days(),
        None => UNSCHEDULED_LATENESS_DAYS,
    }
}

/// Working business days spent on a single product, from its earliest
/// scheduled start to its latest scheduled end, counted against that
/// product's own calendar (resolves the ambiguity `makespan`'s union
/// semantics leaves open for per-product reporting — §9).
pub fn per_product_business_days(bundle: &Bundle, schedule: &Schedule, product: &str) -> Option<i64> {
    let product = bundle.products.iter().find(|p| p.name == product)?;
    let placements: Vec<_> = schedule
        .placements
        .values()
        .filter(|t| t.product.as_deref() == Some(product.name.as_str()))
        .collect();
    let start = placements.iter().map(|t| t.start).min()?;
    let end = placements.iter().map(|t| t.end).max()?;

    let mut current = start.date();
    let end_date = end.date();
    let mut days = 0i64;
    while current <= end_date {
        if product.is_working_day(current) {
            days += 1;
        }
        current = current.succ_opt().expect("date does not overflow");
    }
    Some(days)
}

/// Scheduled worker-minutes for `team` as a fraction of its theoretical
/// capacity across the placements' own span (shift-width-agnostic: it
/// compares against `capacity * elapsed minutes`, not a fixed shift length).
/// Minutes in the reference implementation's nominal 8.5-hour shift; the
/// denominator of `utilization` is expressed in units of this, not wall-clock
/// elapsed time, so two teams working the same span but different shift
/// counts per day are compared fairly.
const MINUTES_PER_SHIFT: f64 = 8.5 * 60.0;

pub fn utilization(schedule: &Schedule, bundle: &Bundle, team: &str) -> Option<f64> {
    let team_def = bundle.teams.iter().find(|t| t.name == team)?;
    let placements = schedule.filter_by_team(team);
    if placements.is_empty() {
        return Some(0.0);
    }

    let makespan_days = makespan(bundle, schedule).max(1) as f64;

    let durations = bundle
        .tasks
        .iter()
        .map(|t| (t.id, t.duration_minutes))
        .chain(bundle.quality_links.iter().map(|l| (l.quality, l.duration_minutes)))
        .collect::<BTreeMap<_, _>>();
    let workers = bundle
        .tasks
        .iter()
        .map(|t| (t.id, t.workers_required))
        .chain(bundle.quality_links.iter().map(|l| (l.quality, l.workers_required)))
        .collect::<BTreeMap<_, _>>();

    let scheduled_minutes: f64 = placements
        .iter()
        .map(|p| {
            let duration = durations.get(&p.task_id).copied().unwrap_or((p.end - p.start).num_minutes());
            let crew = workers.get(&p.task_id).copied().unwrap_or(1) as f64;
            duration as f64 * crew
        })
        .sum();

    let shifts_worked = team_def.shifts.len().max(1) as f64;
    let available_minutes = f64::from(team_def.capacity) * shifts_worked * MINUTES_PER_SHIFT * makespan_days;
    if available_minutes <= 0.0 {
        return Some(0.0);
    }
    Some((scheduled_minutes / available_minutes).clamp(0.0, 1.0))
}

/// Teams whose peak concurrent demand reached at least 90% of their
/// capacity at some point in the schedule.
pub fn bottleneck_teams(bundle: &Bundle, dag: &EffectiveDag, schedule: &Schedule) -> BTreeMap<TeamName, TeamRole> {
    let workers = workers_table(bundle, dag);
    let mut peak_concurrent: BTreeMap<&str, i64> = BTreeMap::new();

    for placement in schedule.placements.values() {
        let crew = i64::from(workers.get(&placement.task_id).copied().unwrap_or(1));
        let concurrent: i64 = schedule
            .placements
            .values()
            .filter(|other| {
                other.team == placement.team && other.start <= placement.start && placement.start < other.end
            })
            .map(|other| i64::from(workers.get(&other.task_id).copied().unwrap_or(1)))
            .sum::<i64>()
            .max(crew);
        let entry = peak_concurrent.entry(placement.team.as_str()).or_insert(0);
        *entry = (*entry).max(concurrent);
    }

    let mut bottlenecks = BTreeMap::new();
    for team in &bundle.teams {
        let peak = peak_concurrent.get(team.name.as_str()).copied().unwrap_or(0);
        if (peak as f64) >= f64::from(team.capacity) * 0.9 {
            bottlenecks.insert(team.name.clone(), team.role);
        }
    }
    bottlenecks
}

/// A capacity violation surfaced by auditing a finished schedule: `usage`
/// exceeded `capacity` for `team` at `at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConflict {
    pub team: TeamName,
    pub at: NaiveDateTime,
    pub usage: i64,
    pub capacity: i64,
    pub task: TaskId,
}

/// Re-derive a full event sweep over the finished schedule and report any
/// instant at which usage exceeded capacity. A supplemented feature (§6):
/// the placer should never produce these, so a non-empty result means the
/// placement logic itself has a bug, not that the input was infeasible.
pub fn check_resource_conflicts(bundle: &Bundle, dag: &EffectiveDag, schedule: &Schedule) -> Vec<ResourceConflict> {
    let workers = workers_table(bundle, dag);
    let capacities: BTreeMap<&str, u32> = bundle.teams.iter().map(|t| (t.name.as_str(), t.capacity)).collect();

    let mut by_team: BTreeMap<&str, Vec<(NaiveDateTime, i64, TaskId)>> = BTreeMap::new();
    for placement in schedule.placements.values() {
        let crew = i64::from(workers.get(&placement.task_id).copied().unwrap_or(1));
        let events = by_team.entry(placement.team.as_str()).or_default();
        events.push((placement.start, crew, placement.task_id));
        events.push((placement.end, -crew, placement.task_id));
    }

    let mut conflicts = Vec::new();
    for (&team, events) in &mut by_team {
        // At a tied instant, apply the end (negative delta) before the start
        // (positive delta): a task ending at T does not conflict with one
        // starting at T, matching the half-open `[start, end)` convention
        // used throughout this crate.
        events.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let capacity = i64::from(capacities.get(team).copied().unwrap_or(0));
        let mut usage = 0i64;
        for &(at, delta, task_id) in events.iter() {
            if delta > 0 {
                usage += delta;
                if usage > capacity {
                    conflicts.push(ResourceConflict { team: team.to_string(), at, usage, capacity, task: task_id });
                }
            } else {
                usage += delta;
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use prodsched_core::{Product, ScheduledTask, Shift, Task, Team, TeamRole};

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn placed(task_id: TaskId, start: NaiveDateTime, end: NaiveDateTime, team: &str, product: &str) -> ScheduledTask {
        ScheduledTask {
            task_id,
            start,
            end,
            team: team.to_string(),
            shift: Shift::Shift1,
            product: Some(product.to_string()),
            slack_hours: 0.0,
        }
    }

    #[test]
    fn makespan_counts_working_days_in_span() {
        let bundle = Bundle {
            products: vec![Product::new("P", dt(2025, 9, 1, 0, 0)).task_range(1, 1)],
            ..Default::default()
        };
        let mut schedule = Schedule::default();
        schedule.placements.insert(1, placed(1, dt(2025, 8, 22, 6, 0), dt(2025, 8, 25, 7, 0), "M1", "P"));
        assert_eq!(makespan(&bundle, &schedule), 2); // Fri 22nd + Mon 25th, weekend excluded
    }

    #[test]
    fn incomplete_schedule_reports_sentinel_makespan() {
        let bundle = Bundle::default();
        let mut schedule = Schedule::default();
        schedule.placements.insert(1, placed(1, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        schedule.unscheduled.push(2);
        assert_eq!(makespan(&bundle, &schedule), INCOMPLETE_MAKESPAN_DAYS);
    }

    #[test]
    fn lateness_is_positive_when_past_delivery() {
        let bundle = Bundle {
            products: vec![Product::new("P", dt(2025, 8, 20, 0, 0)).task_range(1, 1)],
            ..Default::default()
        };
        let mut schedule = Schedule::default();
        schedule.placements.insert(1, placed(1, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        assert_eq!(lateness(&bundle, &schedule, "P"), 2);
    }

    #[test]
    fn lateness_reports_sentinel_for_unscheduled_product() {
        let bundle = Bundle {
            products: vec![Product::new("P", dt(2025, 8, 20, 0, 0)).task_range(1, 1)],
            ..Default::default()
        };
        let schedule = Schedule::default();
        assert_eq!(lateness(&bundle, &schedule, "P"), UNSCHEDULED_LATENESS_DAYS);
    }

    #[test]
    fn utilization_reflects_scheduled_share_of_capacity() {
        let bundle = Bundle {
            tasks: vec![Task::new(1).duration_minutes(60).workers_required(1)],
            teams: vec![Team::new("M1", TeamRole::Mechanic, 2).shift(Shift::Shift1)],
            ..Default::default()
        };
        let mut schedule = Schedule::default();
        schedule.placements.insert(1, placed(1, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        let util = utilization(&schedule, &bundle, "M1").unwrap();
        // 60 scheduled worker-minutes over 1 shift/day * 510 min/shift * 1
        // capacity-2 team * 1 makespan day = 1020 available worker-minutes.
        assert!((util - 60.0 / 1020.0).abs() < 1e-9);
    }

    #[test]
    fn check_resource_conflicts_is_empty_for_a_well_formed_schedule() {
        let bundle = Bundle {
            tasks: vec![
                Task::new(1).duration_minutes(60).workers_required(1),
                Task::new(2).duration_minutes(60).workers_required(1),
            ],
            teams: vec![Team::new("M1", TeamRole::Mechanic, 2).shift(Shift::Shift1)],
            ..Default::default()
        };
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let mut schedule = Schedule::default();
        schedule.placements.insert(1, placed(1, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        schedule.placements.insert(2, placed(2, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        assert!(check_resource_conflicts(&bundle, &dag, &schedule).is_empty());
    }

    #[test]
    fn check_resource_conflicts_flags_overbooked_team() {
        let bundle = Bundle {
            tasks: vec![
                Task::new(1).duration_minutes(60).workers_required(1),
                Task::new(2).duration_minutes(60).workers_required(1),
            ],
            teams: vec![Team::new("M1", TeamRole::Mechanic, 1).shift(Shift::Shift1)],
            ..Default::default()
        };
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let mut schedule = Schedule::default();
        schedule.placements.insert(1, placed(1, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        schedule.placements.insert(2, placed(2, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        let conflicts = check_resource_conflicts(&bundle, &dag, &schedule);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].team, "M1");
    }

    #[test]
    fn bottleneck_teams_flags_near_capacity_teams() {
        let bundle = Bundle {
            tasks: vec![
                Task::new(1).duration_minutes(60).workers_required(2),
                Task::new(2).duration_minutes(60).workers_required(1),
            ],
            teams: vec![
                Team::new("M1", TeamRole::Mechanic, 2).shift(Shift::Shift1),
                Team::new("M2", TeamRole::Mechanic, 10).shift(Shift::Shift1),
            ],
            ..Default::default()
        };
        let dag = crate::dag::build_effective_dag(&bundle).unwrap();
        let mut schedule = Schedule::default();
        schedule.placements.insert(1, placed(1, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M1", "P"));
        schedule.placements.insert(2, placed(2, dt(2025, 8, 22, 6, 0), dt(2025, 8, 22, 7, 0), "M2", "P"));
        let bottlenecks = bottleneck_teams(&bundle, &dag, &schedule);
        assert!(bottlenecks.contains_key("M1"));
        assert!(!bottlenecks.contains_key("M2"));
    }
}
