//! Pluggable scheduling policies and coverage trackers.
//!
//! Both extension points are injected at run-configuration time; with
//! neither installed the scheduler runs plain depth-first and keeps no
//! coverage accounting.

use crate::arena::NodeId;
use crate::state::{Fingerprint, State};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// One pending frontier entry, as seen by a scheduling policy.
#[derive(Debug, Clone, Copy)]
pub struct FrontierEntry {
    pub node: NodeId,
    pub depth: usize,
    pub fp: Fingerprint,
}

/// Chooses which frontier entry the scheduler expands next.
///
/// `frontier` is never empty; the returned index must be within it
/// (the scheduler clamps out-of-range answers to the top). Returning
/// `frontier.len() - 1` reproduces plain depth-first order.
pub trait SchedulingPolicy: Send {
    fn choose_next(&mut self, frontier: &[FrontierEntry]) -> usize;
}

/// Observes each newly visited state. Accumulates statistics only;
/// a tracker never influences which states are explored.
pub trait CoverageTracker: Send {
    fn observe(&mut self, state: &State);

    /// Human-readable summary, reported at the end of a run.
    fn report(&self) -> String;
}

/// Randomized delaying policy: usually follows depth-first order, but
/// while it has delay budget left it sometimes "delays" the top of the
/// frontier and expands a random older entry instead. Seeded, so two
/// runs with the same seed and budget make identical decisions.
pub struct RandomDelayPolicy {
    rng: StdRng,
    delays_remaining: u64,
}

impl RandomDelayPolicy {
    pub fn new(seed: u64, delay_budget: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            delays_remaining: delay_budget,
        }
    }

    /// Delay budget not yet consumed.
    pub fn delays_remaining(&self) -> u64 {
        self.delays_remaining
    }
}

impl SchedulingPolicy for RandomDelayPolicy {
    fn choose_next(&mut self, frontier: &[FrontierEntry]) -> usize {
        let top = frontier.len() - 1;
        if self.delays_remaining == 0 || frontier.len() < 2 || !self.rng.gen_bool(0.5) {
            return top;
        }
        self.delays_remaining -= 1;
        self.rng.gen_range(0..top)
    }
}

/// Counts visited states and distinct (template, location) pairs.
#[derive(Debug, Default)]
pub struct LocationCoverage {
    states: usize,
    locations: HashSet<(usize, usize)>,
    max_machines: usize,
}

impl LocationCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> usize {
        self.states
    }

    pub fn distinct_locations(&self) -> usize {
        self.locations.len()
    }
}

impl CoverageTracker for LocationCoverage {
    fn observe(&mut self, state: &State) {
        self.states += 1;
        self.max_machines = self.max_machines.max(state.machines().len());
        for m in state.machines() {
            self.locations.insert((m.template, m.pc));
        }
    }

    fn report(&self) -> String {
        format!(
            "{} states, {} distinct control locations, {} machines at peak",
            self.states,
            self.locations.len(),
            self.max_machines
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MachineState;
    use strider_model::Value;

    fn entry(fp: u64, depth: usize) -> FrontierEntry {
        let mut arena = crate::arena::NodeArena::new();
        let node = arena.push(State::new(vec![], vec![], 0), None, None, depth);
        FrontierEntry {
            node,
            depth,
            fp: Fingerprint::from_u64(fp),
        }
    }

    #[test]
    fn test_random_delay_is_deterministic() {
        let frontier: Vec<FrontierEntry> = (0..5).map(|i| entry(i, i as usize)).collect();
        let mut a = RandomDelayPolicy::new(7, 100);
        let mut b = RandomDelayPolicy::new(7, 100);
        for _ in 0..50 {
            assert_eq!(a.choose_next(&frontier), b.choose_next(&frontier));
        }
    }

    #[test]
    fn test_exhausted_budget_is_depth_first() {
        let frontier: Vec<FrontierEntry> = (0..5).map(|i| entry(i, i as usize)).collect();
        let mut policy = RandomDelayPolicy::new(1, 0);
        for _ in 0..10 {
            assert_eq!(policy.choose_next(&frontier), frontier.len() - 1);
        }
    }

    #[test]
    fn test_budget_consumed() {
        let frontier: Vec<FrontierEntry> = (0..8).map(|i| entry(i, i as usize)).collect();
        let mut policy = RandomDelayPolicy::new(3, 4);
        for _ in 0..200 {
            let idx = policy.choose_next(&frontier);
            assert!(idx < frontier.len());
        }
        assert_eq!(policy.delays_remaining(), 0);
    }

    #[test]
    fn test_location_coverage() {
        let mut tracker = LocationCoverage::new();
        let m = |template, pc| MachineState {
            template,
            pc,
            locals: vec![],
        };
        tracker.observe(&State::new(vec![Value::Int(0)], vec![m(0, 0)], 1));
        tracker.observe(&State::new(vec![Value::Int(1)], vec![m(0, 0)], 1));
        tracker.observe(&State::new(vec![Value::Int(1)], vec![m(0, 1)], 1));
        assert_eq!(tracker.states(), 3);
        assert_eq!(tracker.distinct_locations(), 2);
    }
}
