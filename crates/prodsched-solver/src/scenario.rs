//! Optimization scenarios — §4.8/§4.9.
//!
//! Each scenario mutates team capacities on a scratch `Bundle` for the
//! duration of one or more trial schedules via `CapacityGuard`, which
//! restores the original capacities on drop regardless of how the trial
//! exits (including the `?` early-return on a structural graph error).

use std::collections::BTreeMap;

use prodsched_core::{Bundle, ProductName, RunConfig, Schedule, TeamName, TeamRole};

use crate::dag::{self, EffectiveDag};
use crate::error::{InfeasibleScenario, ScenarioError, ScheduleError};
use crate::metrics;
use crate::scheduler;

/// RAII capacity mutation: snapshots every team's capacity at construction
/// and restores it when dropped, so a trial configuration never leaks past
/// the scope that tried it — including on an early `?` return.
struct CapacityGuard<'a> {
    bundle: &'a mut Bundle,
    original: BTreeMap<TeamName, u32>,
}

impl<'a> CapacityGuard<'a> {
    fn new(bundle: &'a mut Bundle) -> Self {
        let original = bundle.teams.iter().map(|t| (t.name.clone(), t.capacity)).collect();
        Self { bundle, original }
    }

    fn set(&mut self, team: &str, capacity: u32) {
        if let Some(t) = self.bundle.teams.iter_mut().find(|t| t.name == team) {
            t.capacity = capacity;
        }
    }

    fn set_all(&mut self, role: TeamRole, capacity: u32) {
        for t in self.bundle.teams.iter_mut().filter(|t| t.role == role) {
            t.capacity = capacity;
        }
    }

    fn bundle(&self) -> &Bundle {
        self.bundle
    }
}

impl Drop for CapacityGuard<'_> {
    fn drop(&mut self) {
        for t in self.bundle.teams.iter_mut() {
            if let Some(&capacity) = self.original.get(&t.name) {
                t.capacity = capacity;
            }
        }
    }
}

/// Result of a single scenario run: the schedule produced, the capacities
/// that produced it (captured before the guard restores the original
/// values), and the summary metrics computed from it.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub schedule: Schedule,
    pub mechanic_capacities: BTreeMap<TeamName, u32>,
    pub quality_capacities: BTreeMap<TeamName, u32>,
    pub makespan_days: i64,
    pub lateness_days: BTreeMap<ProductName, i64>,
    pub iterations_used: u32,
}

fn lateness_map(bundle: &Bundle, schedule: &Schedule) -> BTreeMap<ProductName, i64> {
    bundle
        .products
        .iter()
        .map(|p| (p.name.clone(), metrics::lateness(bundle, schedule, &p.name)))
        .collect()
}

fn capture_capacities(bundle: &Bundle, role: TeamRole) -> BTreeMap<TeamName, u32> {
    bundle.teams.iter().filter(|t| t.role == role).map(|t| (t.name.clone(), t.capacity)).collect()
}

/// Schedule once under uniform per-role capacities (`None` leaves a role's
/// teams at whatever capacity the bundle already carries).
fn run_uniform(
    bundle: &mut Bundle,
    mechanic: Option<u32>,
    quality: Option<u32>,
    config: &RunConfig,
) -> Result<(Schedule, EffectiveDag, BTreeMap<TeamName, u32>, BTreeMap<TeamName, u32>), ScheduleError> {
    let mut guard = CapacityGuard::new(bundle);
    if let Some(m) = mechanic {
        guard.set_all(TeamRole::Mechanic, m);
    }
    if let Some(q) = quality {
        guard.set_all(TeamRole::Quality, q);
    }
    let dag = dag::build_effective_dag(guard.bundle())?;
    let schedule = scheduler::schedule(guard.bundle(), &dag, config);
    let mech_caps = capture_capacities(guard.bundle(), TeamRole::Mechanic);
    let qual_caps = capture_capacities(guard.bundle(), TeamRole::Quality);
    Ok((schedule, dag, mech_caps, qual_caps))
}

/// Schedule once under a specific per-team capacity assignment (teams
/// absent from either map keep the bundle's current capacity).
fn run_named(
    bundle: &mut Bundle,
    mechanic: &BTreeMap<TeamName, u32>,
    quality: &BTreeMap<TeamName, u32>,
    config: &RunConfig,
) -> Result<(Schedule, EffectiveDag), ScheduleError> {
    let mut guard = CapacityGuard::new(bundle);
    for (team, &capacity) in mechanic {
        guard.set(team, capacity);
    }
    for (team, &capacity) in quality {
        guard.set(team, capacity);
    }
    let dag = dag::build_effective_dag(guard.bundle())?;
    let schedule = scheduler::schedule(guard.bundle(), &dag, config);
    Ok((schedule, dag))
}

/// Scenario 1: baseline or a caller-supplied uniform headcount per role.
/// `None` for either role leaves that role's teams at the bundle's existing
/// capacities, so `scenario1(bundle, None, None, config)` is the baseline run.
pub fn scenario1(
    bundle: &mut Bundle,
    mechanic: Option<u32>,
    quality: Option<u32>,
    config: &RunConfig,
) -> Result<ScenarioRun, ScheduleError> {
    let (schedule, _dag, mech_caps, qual_caps) = run_uniform(bundle, mechanic, quality, config)?;
    let makespan = metrics::makespan(bundle, &schedule);
    let lateness = lateness_map(bundle, &schedule);
    Ok(ScenarioRun {
        schedule,
        mechanic_capacities: mech_caps,
        quality_capacities: qual_caps,
        makespan_days: makespan,
        lateness_days: lateness,
        iterations_used: 1,
    })
}

/// Scenario 2 (§4.8): binary search a uniform mechanic headcount for the
/// shortest makespan, then — holding mechanics fixed — binary search a
/// uniform quality headcount for the same makespan at the smallest quality
/// crew. Ties within each search resolve toward the smaller headcount.
pub fn scenario2_minimize_makespan(bundle: &mut Bundle, config: &RunConfig) -> Result<ScenarioRun, ScheduleError> {
    let mut iterations = 0u32;

    let (mut lo, mut hi) = (config.min_mechanics, config.max_mechanics);
    let mut best_mech = config.max_mechanics;
    let mut best_makespan = i64::MAX;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        iterations += 1;
        let (schedule, _dag, _mc, _qc) = run_uniform(bundle, Some(mid), Some(config.max_quality), config)?;
        if !schedule.is_complete() {
            lo = mid + 1;
            continue;
        }
        let makespan = metrics::makespan(bundle, &schedule);
        if makespan < best_makespan {
            best_makespan = makespan;
            best_mech = mid;
            if mid == config.min_mechanics {
                break;
            }
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
    }

    let (mut lo, mut hi) = (config.min_quality, config.max_quality);
    let mut best_qual = config.max_quality;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        iterations += 1;
        let (schedule, _dag, _mc, _qc) = run_uniform(bundle, Some(best_mech), Some(mid), config)?;
        if !schedule.is_complete() {
            lo = mid + 1;
            continue;
        }
        let makespan = metrics::makespan(bundle, &schedule);
        if makespan <= best_makespan {
            best_makespan = makespan;
            best_qual = mid;
            if mid == config.min_quality {
                break;
            }
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
    }

    let (schedule, _dag, mech_caps, qual_caps) = run_uniform(bundle, Some(best_mech), Some(best_qual), config)?;
    let makespan = metrics::makespan(bundle, &schedule);
    let lateness = lateness_map(bundle, &schedule);
    Ok(ScenarioRun {
        schedule,
        mechanic_capacities: mech_caps,
        quality_capacities: qual_caps,
        makespan_days: makespan,
        lateness_days: lateness,
        iterations_used: iterations,
    })
}

/// Scenario 3 (§4.9): two-phase per-team optimization.
///
/// Phase 1 starts every team at its configured minimum and grows whichever
/// teams are bottlenecked (§4.6's 90%-of-capacity definition) until either a
/// complete, non-improving run streak of 20 iterations is reached or the
/// iteration budget runs out. Phase 2 then greedily shrinks any team whose
/// utilization stays under 70%, one unit at a time, as long as doing so
/// keeps max lateness at or below Phase 1's result and total lateness within
/// 10% of it.
pub fn scenario3_per_team_optimization(bundle: &mut Bundle, config: &RunConfig) -> Result<ScenarioRun, ScenarioError> {
    let mech_names: Vec<TeamName> =
        bundle.teams.iter().filter(|t| t.role == TeamRole::Mechanic).map(|t| t.name.clone()).collect();
    let qual_names: Vec<TeamName> =
        bundle.teams.iter().filter(|t| t.role == TeamRole::Quality).map(|t| t.name.clone()).collect();

    let mut mech_config: BTreeMap<TeamName, u32> =
        mech_names.iter().map(|n| (n.clone(), config.min_mechanics)).collect();
    let mut qual_config: BTreeMap<TeamName, u32> =
        qual_names.iter().map(|n| (n.clone(), config.min_quality)).collect();

    let mut best: Option<(BTreeMap<TeamName, u32>, BTreeMap<TeamName, u32>, i64, i64)> = None;
    let mut iterations = 0u32;
    let mut stagnant = 0u32;
    let mut last_unscheduled = 0usize;

    while iterations < config.max_iterations && stagnant < 20 {
        iterations += 1;
        let (schedule, dag) = run_named(bundle, &mech_config, &qual_config, config)?;

        if !schedule.is_complete() {
            last_unscheduled = schedule.unscheduled.len();
            if !grow_bottlenecks(bundle, &dag, &schedule, &mut mech_config, &mut qual_config, config) {
                break;
            }
            continue;
        }

        let lateness = lateness_map(bundle, &schedule);
        let max_lateness = lateness.values().copied().max().unwrap_or(0);
        let total_lateness: i64 = lateness.values().copied().filter(|&d| d > 0).sum();

        let improved = match &best {
            None => true,
            Some((_, _, best_max, best_total)) => {
                max_lateness < *best_max || (max_lateness == *best_max && total_lateness < *best_total)
            }
        };

        if improved {
            best = Some((mech_config.clone(), qual_config.clone(), max_lateness, total_lateness));
            stagnant = 0;
            if max_lateness <= 0 {
                break;
            }
        } else {
            stagnant += 1;
        }

        if !grow_bottlenecks(bundle, &dag, &schedule, &mut mech_config, &mut qual_config, config) {
            break;
        }
    }

    let Some((mut mech_config, mut qual_config, target_max, target_total)) = best else {
        return Err(ScenarioError::Infeasible(InfeasibleScenario {
            iterations_used: iterations,
            unscheduled_count: last_unscheduled,
        }));
    };

    shrink_underutilized(bundle, &mut mech_config, &mut qual_config, target_max, target_total, config)?;

    let (schedule, _dag) = run_named(bundle, &mech_config, &qual_config, config)?;
    let makespan = metrics::makespan(bundle, &schedule);
    let lateness = lateness_map(bundle, &schedule);
    Ok(ScenarioRun {
        schedule,
        mechanic_capacities: mech_config,
        quality_capacities: qual_config,
        makespan_days: makespan,
        lateness_days: lateness,
        iterations_used: iterations,
    })
}

/// Grow every currently-bottlenecked team by one unit (capped at its
/// configured max); if none are bottlenecked, grow the team with the
/// smallest capacity of whichever role has room left. Returns `false` when
/// every team is already at its max.
fn grow_bottlenecks(
    bundle: &Bundle,
    dag: &EffectiveDag,
    schedule: &Schedule,
    mech_config: &mut BTreeMap<TeamName, u32>,
    qual_config: &mut BTreeMap<TeamName, u32>,
    config: &RunConfig,
) -> bool {
    let bottlenecks = metrics::bottleneck_teams(bundle, dag, schedule);
    let mut grew = false;
    for (team, role) in &bottlenecks {
        let (capacity_map, max) = match role {
            TeamRole::Mechanic => (&mut *mech_config, config.max_mechanics),
            TeamRole::Quality => (&mut *qual_config, config.max_quality),
        };
        if let Some(cap) = capacity_map.get_mut(team) {
            if *cap < max {
                *cap += 1;
                grew = true;
            }
        }
    }
    if grew {
        return true;
    }

    if let Some((team, cap)) = mech_config.iter().min_by_key(|(_, &c)| c).map(|(t, &c)| (t.clone(), c)) {
        if cap < config.max_mechanics {
            *mech_config.get_mut(&team).expect("key from this map") += 1;
            return true;
        }
    }
    if let Some((team, cap)) = qual_config.iter().min_by_key(|(_, &c)| c).map(|(t, &c)| (t.clone(), c)) {
        if cap < config.max_quality {
            *qual_config.get_mut(&team).expect("key from this map") += 1;
            return true;
        }
    }
    false
}

#[allow(clippy::too_many_arguments)]
fn shrink_underutilized(
    bundle: &mut Bundle,
    mech_config: &mut BTreeMap<TeamName, u32>,
    qual_config: &mut BTreeMap<TeamName, u32>,
    target_max_lateness: i64,
    target_total_lateness: i64,
    config: &RunConfig,
) -> Result<(), ScheduleError> {
    let target_total_lateness = (target_total_lateness as f64 * 1.1) as i64;
    let mut improved = true;
    let mut rounds = 0u32;

    while improved && rounds < 50 {
        improved = false;
        rounds += 1;
        let (schedule, _dag) = run_named(bundle, mech_config, qual_config, config)?;

        let mut mech_util: Vec<(TeamName, f64)> = mech_config
            .keys()
            .map(|t| (t.clone(), metrics::utilization(&schedule, bundle, t).unwrap_or(1.0)))
            .collect();
        mech_util.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (team, util) in &mech_util {
            if *util >= 0.7 || mech_config[team] <= config.min_mechanics {
                continue;
            }
            let mut trial = mech_config.clone();
            *trial.get_mut(team).expect("key from this map") -= 1;
            let (trial_schedule, _) = run_named(bundle, &trial, qual_config, config)?;
            if accept_trial(bundle, &trial_schedule, target_max_lateness, target_total_lateness) {
                *mech_config = trial;
                improved = true;
                break;
            }
        }
        if improved {
            continue;
        }

        let mut qual_util: Vec<(TeamName, f64)> = qual_config
            .keys()
            .map(|t| (t.clone(), metrics::utilization(&schedule, bundle, t).unwrap_or(1.0)))
            .collect();
        qual_util.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (team, util) in &qual_util {
            if *util >= 0.7 || qual_config[team] <= config.min_quality {
                continue;
            }
            let mut trial = qual_config.clone();
            *trial.get_mut(team).expect("key from this map") -= 1;
            let (trial_schedule, _) = run_named(bundle, mech_config, &trial, config)?;
            if accept_trial(bundle, &trial_schedule, target_max_lateness, target_total_lateness) {
                *qual_config = trial;
                improved = true;
                break;
            }
        }
    }
    Ok(())
}

fn accept_trial(bundle: &Bundle, schedule: &Schedule, target_max: i64, target_total: i64) -> bool {
    if !schedule.is_complete() {
        return false;
    }
    let lateness = lateness_map(bundle, schedule);
    let max_lateness = lateness.values().copied().max().unwrap_or(0);
    let total_lateness: i64 = lateness.values().copied().filter(|&d| d > 0).sum();
    max_lateness <= target_max && total_lateness <= target_total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use prodsched_core::{Product, Shift, Task, Team};

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn three_independent_tasks() -> Bundle {
        Bundle {
            tasks: vec![
                Task::new(1).duration_minutes(60).workers_required(1).team("M1"),
                Task::new(2).duration_minutes(60).workers_required(1).team("M1"),
                Task::new(3).duration_minutes(60).workers_required(1).team("M1"),
            ],
            teams: vec![Team::new("M1", TeamRole::Mechanic, 1).shift(Shift::Shift1)],
            products: vec![Product::new("P", dt(2025, 9, 1, 0, 0)).task_range(1, 3)],
            ..Default::default()
        }
    }

    fn base_config() -> RunConfig {
        RunConfig {
            start_instant: dt(2025, 8, 22, 6, 0),
            max_mechanics: 5,
            max_quality: 5,
            ..Default::default()
        }
    }

    #[test]
    fn scenario1_baseline_uses_bundles_own_capacities() {
        let mut bundle = three_independent_tasks();
        let run = scenario1(&mut bundle, None, None, &base_config()).unwrap();
        assert_eq!(run.mechanic_capacities["M1"], 1);
        assert_eq!(bundle.teams[0].capacity, 1); // capacity restored after the run
    }

    #[test]
    fn scenario1_custom_headcount_is_applied_then_restored() {
        let mut bundle = three_independent_tasks();
        let run = scenario1(&mut bundle, Some(3), None, &base_config()).unwrap();
        assert_eq!(run.mechanic_capacities["M1"], 3);
        assert!(run.schedule.is_complete());
        assert_eq!(bundle.teams[0].capacity, 1);
    }

    #[test]
    fn scenario2_finds_minimum_headcount_for_shortest_makespan() {
        let mut bundle = three_independent_tasks();
        let run = scenario2_minimize_makespan(&mut bundle, &base_config()).unwrap();
        // 3 independent 1-hour, 1-worker tasks need 3 mechanics to run
        // fully parallel inside one shift; fewer would take an extra shift.
        assert_eq!(run.mechanic_capacities["M1"], 3);
        assert!(run.schedule.is_complete());
    }

    #[test]
    fn scenario3_keeps_capacities_within_configured_bounds() {
        let mut bundle = three_independent_tasks();
        let mut config = base_config();
        config.max_iterations = 50;
        let run = scenario3_per_team_optimization(&mut bundle, &config).unwrap();
        let capacity = run.mechanic_capacities["M1"];
        assert!((config.min_mechanics..=config.max_mechanics).contains(&capacity));
        assert!(run.schedule.is_complete());
    }

    #[test]
    fn capacity_guard_restores_even_on_early_error() {
        let mut bundle = three_independent_tasks();
        bundle.precedence.push(prodsched_core::PrecedenceEdge {
            first: 1,
            second: 1,
            relation: prodsched_core::DependencyRelation::FinishBeforeStart,
        });
        let result = run_uniform(&mut bundle, Some(4), None, &base_config());
        assert!(result.is_err());
        assert_eq!(bundle.teams[0].capacity, 1);
    }
}
