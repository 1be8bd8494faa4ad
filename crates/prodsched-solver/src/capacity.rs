//! Capacity timeline — §4.4.
//!
//! Per-team time-indexed worker usage, answered with an event sweep rather
//! than the reference implementation's minute-by-minute scan: each
//! reservation contributes a `+workers` event at its start and a
//! `-workers` event at its end, and availability is the running sum's
//! maximum over the query window.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use prodsched_core::{Shift, TeamName};

#[derive(Debug, Default, Clone)]
struct TeamTimeline {
    /// instant -> signed worker-count delta.
    events: BTreeMap<NaiveDateTime, i64>,
    /// Total worker-minutes reserved on this team so far, for the
    /// load-balanced quality selector.
    scheduled_worker_minutes: i64,
}

#[derive(Debug, Default, Clone)]
pub struct CapacityTimeline {
    teams: BTreeMap<TeamName, TeamTimeline>,
}

impl CapacityTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peak concurrent worker usage for `team` at any instant in
    /// `[start, end)`, not counting a pending `workers_needed` reservation.
    pub fn peak_usage(&self, team: &str, start: NaiveDateTime, end: NaiveDateTime) -> i64 {
        let Some(timeline) = self.teams.get(team) else {
            return 0;
        };
        let mut running: i64 = timeline.events.range(..=start).map(|(_, d)| d).sum();
        let mut peak = running;
        for (_, delta) in timeline.events.range((
            std::ops::Bound::Excluded(start),
            std::ops::Bound::Excluded(end),
        )) {
            running += delta;
            peak = peak.max(running);
        }
        peak
    }

    /// Can `team` host `workers_needed` additional workers for the entire
    /// `[start, end)` window without exceeding `capacity`?
    pub fn available(&self, team: &str, capacity: u32, start: NaiveDateTime, end: NaiveDateTime, workers_needed: u32) -> bool {
        self.peak_usage(team, start, end) + i64::from(workers_needed) <= i64::from(capacity)
    }

    pub fn reserve(&mut self, team: &str, start: NaiveDateTime, end: NaiveDateTime, workers: u32) {
        let timeline = self.teams.entry(team.to_string()).or_default();
        *timeline.events.entry(start).or_insert(0) += i64::from(workers);
        *timeline.events.entry(end).or_insert(0) -= i64::from(workers);
        let minutes = (end - start).num_minutes();
        timeline.scheduled_worker_minutes += minutes * i64::from(workers);
    }

    pub fn scheduled_worker_minutes(&self, team: &str) -> i64 {
        self.teams.get(team).map_or(0, |t| t.scheduled_worker_minutes)
    }

    /// The smallest event instant strictly after `after` for `team`, if any.
    /// Used by the window search to skip straight to the next point at which
    /// usage could change, rather than stepping minute by minute.
    pub fn next_event_after(&self, team: &str, after: NaiveDateTime) -> Option<NaiveDateTime> {
        self.teams.get(team).and_then(|timeline| {
            timeline
                .events
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .next()
                .map(|(&instant, _)| instant)
        })
    }

    pub fn reset(&mut self) {
        self.teams.clear();
    }
}

/// A candidate quality team eligible to host an inspection in a given shift.
pub struct QualityCandidate<'a> {
    pub name: &'a str,
    pub capacity: u32,
}

/// The load-balanced quality-team selector (§4.4): among teams working the
/// candidate shift with enough capacity, pick the one with the smallest
/// cumulative scheduled worker-minutes; ties broken lexicographically.
pub fn select_quality_team<'a>(
    candidates: &[QualityCandidate<'a>],
    shift: Shift,
    workers_needed: u32,
    works_shift: impl Fn(&str, Shift) -> bool,
    timeline: &CapacityTimeline,
) -> Option<&'a str> {
    let mut eligible: Vec<&QualityCandidate<'a>> = candidates
        .iter()
        .filter(|c| c.capacity >= workers_needed && works_shift(c.name, shift))
        .collect();
    eligible.sort_by(|a, b| a.name.cmp(b.name));

    eligible
        .into_iter()
        .min_by_key(|c| (timeline.scheduled_worker_minutes(c.name), c.name))
        .map(|c| c.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 22)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn empty_timeline_is_always_available() {
        let timeline = CapacityTimeline::new();
        assert!(timeline.available("M1", 2, dt(6, 0), dt(7, 0), 2));
    }

    #[test]
    fn reservation_reduces_remaining_capacity() {
        let mut timeline = CapacityTimeline::new();
        timeline.reserve("M1", dt(6, 0), dt(7, 0), 1);
        assert!(timeline.available("M1", 2, dt(6, 0), dt(7, 0), 1));
        assert!(!timeline.available("M1", 2, dt(6, 0), dt(7, 0), 2));
    }

    #[test]
    fn non_overlapping_reservations_do_not_conflict() {
        let mut timeline = CapacityTimeline::new();
        timeline.reserve("M1", dt(6, 0), dt(7, 0), 2);
        assert!(timeline.available("M1", 2, dt(7, 0), dt(8, 0), 2));
    }

    #[test]
    fn overlapping_reservations_sum_usage() {
        let mut timeline = CapacityTimeline::new();
        timeline.reserve("M1", dt(6, 0), dt(8, 0), 1);
        timeline.reserve("M1", dt(7, 0), dt(9, 0), 1);
        assert!(!timeline.available("M1", 2, dt(7, 0), dt(7, 30), 1));
        assert!(timeline.available("M1", 3, dt(7, 0), dt(7, 30), 1));
    }

    #[test]
    fn reset_clears_all_usage() {
        let mut timeline = CapacityTimeline::new();
        timeline.reserve("M1", dt(6, 0), dt(7, 0), 2);
        timeline.reset();
        assert!(timeline.available("M1", 2, dt(6, 0), dt(7, 0), 2));
    }

    #[test]
    fn next_event_after_finds_the_next_boundary() {
        let mut timeline = CapacityTimeline::new();
        timeline.reserve("M1", dt(6, 0), dt(7, 0), 1);
        timeline.reserve("M1", dt(7, 30), dt(8, 0), 1);
        assert_eq!(timeline.next_event_after("M1", dt(6, 0)), Some(dt(7, 0)));
        assert_eq!(timeline.next_event_after("M1", dt(7, 0)), Some(dt(7, 30)));
        assert_eq!(timeline.next_event_after("M1", dt(8, 0)), None);
        assert_eq!(timeline.next_event_after("M2", dt(6, 0)), None);
    }

    #[test]
    fn quality_selector_prefers_least_loaded_team() {
        let mut timeline = CapacityTimeline::new();
        timeline.reserve("Q1", dt(6, 0), dt(7, 0), 1);
        let candidates = vec![
            QualityCandidate { name: "Q1", capacity: 2 },
            QualityCandidate { name: "Q2", capacity: 2 },
        ];
        let chosen = select_quality_team(&candidates, Shift::Shift1, 1, |_, _| true, &timeline);
        assert_eq!(chosen, Some("Q2"));
    }

    #[test]
    fn quality_selector_breaks_ties_lexicographically() {
        let timeline = CapacityTimeline::new();
        let candidates = vec![
            QualityCandidate { name: "Q2", capacity: 2 },
            QualityCandidate { name: "Q1", capacity: 2 },
        ];
        let chosen = select_quality_team(&candidates, Shift::Shift1, 1, |_, _| true, &timeline);
        assert_eq!(chosen, Some("Q1"));
    }

    #[test]
    fn quality_selector_filters_by_shift_and_capacity() {
        let timeline = CapacityTimeline::new();
        let candidates = vec![QualityCandidate { name: "Q1", capacity: 1 }];
        let chosen = select_quality_team(&candidates, Shift::Shift1, 2, |_, _| true, &timeline);
        assert_eq!(chosen, None);
        let chosen = select_quality_team(&candidates, Shift::Shift1, 1, |_, _| false, &timeline);
        assert_eq!(chosen, None);
    }
}
