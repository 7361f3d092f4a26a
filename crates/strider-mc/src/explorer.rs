//! Depth-first state-space exploration scheduler.
//!
//! One `run` owns its visited set and node arena, drives the transition
//! generator, consults the property checker on every newly visited
//! state, and hands the winning node to the trace recorder. Scheduling
//! order and coverage accounting are pluggable (see [`crate::policy`]);
//! with no policy installed exploration is plain depth-first and
//! successors are expanded in the generator's emission order.

use crate::arena::{NodeArena, NodeId};
use crate::gen::{self, GenError};
use crate::policy::{CoverageTracker, FrontierEntry, SchedulingPolicy};
use crate::props::{check_assertions, PropertyResult};
use crate::store::VisitedSet;
use crate::trace::{render_state, Trace, TraceStep};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strider_model::Model;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Exploration error. Property violations and deadlocks are outcomes,
/// not errors; this covers genuine engine-level failures.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Gen(#[from] GenError),
}

pub type CheckResult<T> = Result<T, CheckError>;

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundReason {
    /// Explored-state budget reached.
    States,
    /// Wall-clock budget reached.
    Time,
    /// External stop flag raised.
    Cancelled,
}

impl fmt::Display for BoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundReason::States => write!(f, "state limit"),
            BoundReason::Time => write!(f, "time limit"),
            BoundReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal status of one exploration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// A safety assertion failed in a reachable state.
    Violated { assertion: String },
    /// A reachable state has no enabled transitions.
    Deadlocked,
    /// The whole state space was explored without a violation.
    Exhausted,
    /// A resource bound stopped the run; partial result, not a failure.
    Bounded { reason: BoundReason },
}

/// Result of one exploration run.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    /// Counterexample trace; present for Violated and Deadlocked.
    pub trace: Option<Trace>,
    /// States inserted into the visited set, including states whose
    /// expansion was cut short by an assertion evaluation error.
    pub states_explored: usize,
    pub max_depth: usize,
    /// Successor hits on states still on the depth-first path.
    pub back_edges: usize,
    /// Branches pruned because an assertion failed to evaluate.
    pub property_errors: usize,
    /// Coverage tracker summary, if one was installed.
    pub coverage: Option<String>,
}

/// Result of a random-walk simulation.
#[derive(Debug)]
pub enum SimulateOutcome {
    /// Walk completed without violations.
    Ok { steps: usize, trace: Trace },
    /// An assertion failed along the walk.
    Violated { assertion: String, trace: Trace },
    /// The walk reached a state with no enabled transitions.
    Deadlocked { trace: Trace },
}

/// Lock-free progress counters shared between the explorer and a
/// front-end progress display. The explorer writes, the reader polls on
/// its own timer; neither ever blocks the other.
pub struct ProgressCounters {
    pub states: AtomicUsize,
    pub depth: AtomicUsize,
    pub frontier: AtomicUsize,
    /// Entries popped from the frontier, including revisit skips.
    pub checked: AtomicUsize,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            states: AtomicUsize::new(0),
            depth: AtomicUsize::new(0),
            frontier: AtomicUsize::new(0),
            checked: AtomicUsize::new(0),
        }
    }
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for one exploration run.
pub struct CheckConfig {
    /// Maximum number of states to expand (0 = unlimited).
    pub max_states: usize,
    /// Wall-clock budget (None = unlimited). Polled at each pop, so a
    /// deadline takes effect within one state's successor set.
    pub max_time: Option<Duration>,
    /// Whether a transitionless reachable state ends the run as
    /// Deadlocked. When false, such states are silently terminal.
    pub report_deadlock: bool,
    /// Scheduling policy; None = plain depth-first.
    pub policy: Option<Box<dyn SchedulingPolicy>>,
    /// Coverage tracker; None = no coverage accounting.
    pub coverage: Option<Box<dyn CoverageTracker>>,
    /// Shared progress counters for a front-end display.
    pub progress: Option<Arc<ProgressCounters>>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            max_states: 0,
            max_time: None,
            report_deadlock: true,
            policy: None,
            coverage: None,
            progress: None,
        }
    }
}

impl fmt::Debug for CheckConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckConfig")
            .field("max_states", &self.max_states)
            .field("max_time", &self.max_time)
            .field("report_deadlock", &self.report_deadlock)
            .field("policy", &self.policy.as_ref().map(|_| "..."))
            .field("coverage", &self.coverage.as_ref().map(|_| "..."))
            .field("progress", &self.progress.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Explore `model` under `config`. Convenience wrapper over
/// [`Explorer`] for one-shot runs.
pub fn run(model: Model, config: CheckConfig) -> CheckResult<RunReport> {
    Explorer::new(model, config).run()
}

/// The exploration scheduler.
pub struct Explorer {
    model: Model,
    config: CheckConfig,
    visited: VisitedSet,
    arena: NodeArena,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl Explorer {
    pub fn new(model: Model, config: CheckConfig) -> Self {
        Self {
            model,
            config,
            visited: VisitedSet::new(),
            arena: NodeArena::new(),
            stop_flag: None,
        }
    }

    /// Install an external cooperative stop flag; polled at each pop.
    pub fn set_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop_flag = Some(flag);
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Run one exploration to a terminal status.
    pub fn run(&mut self) -> CheckResult<RunReport> {
        // Run-scoped mutable structures: fresh at every run start.
        self.visited = VisitedSet::new();
        self.arena.clear();
        let deadline = self.config.max_time.map(|d| Instant::now() + d);

        info!(
            model = %self.model.name,
            max_states = self.config.max_states,
            "starting exploration"
        );

        let init = gen::initial_state(&self.model);
        let root_fp = init.fingerprint();
        let root = self.arena.push(init, None, None, 0);
        let mut frontier = vec![FrontierEntry {
            node: root,
            depth: 0,
            fp: root_fp,
        }];

        let mut path: Vec<NodeId> = Vec::new();
        let mut max_depth = 0usize;
        let mut back_edges = 0usize;
        let mut property_errors = 0usize;
        let mut bound: Option<BoundReason> = None;
        let mut outcome: Option<(RunStatus, Option<Trace>)> = None;

        while !frontier.is_empty() {
            // Bound checks are polled at every pop: a raised bound or
            // stop flag takes effect within one state's successor set.
            if let Some(flag) = &self.stop_flag {
                if flag.load(Ordering::Relaxed) {
                    info!("stop flag raised");
                    bound = Some(BoundReason::Cancelled);
                    break;
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("reached time limit");
                    bound = Some(BoundReason::Time);
                    break;
                }
            }

            let idx = match self.config.policy.as_mut() {
                Some(policy) => policy.choose_next(&frontier).min(frontier.len() - 1),
                None => frontier.len() - 1,
            };
            let entry = frontier.remove(idx);

            if let Some(p) = &self.config.progress {
                p.checked.fetch_add(1, Ordering::Relaxed);
            }

            // Membership is decided at pop: an already-expanded state is
            // skipped, never re-expanded.
            if let Some(existing) = self.visited.get(&entry.fp) {
                if self.arena.get(existing).state != self.arena.get(entry.node).state {
                    self.visited.note_collision(entry.fp);
                }
                continue;
            }

            // The state bound counts expansions, so only an entry that
            // would actually be expanded can trip it. A frontier holding
            // nothing but duplicates drains to Exhausted instead.
            if self.config.max_states > 0 && self.visited.len() >= self.config.max_states {
                info!(states = self.visited.len(), "reached state limit");
                bound = Some(BoundReason::States);
                break;
            }
            if self.visited.insert(entry.fp, entry.node).is_err() {
                continue;
            }

            trace!(depth = entry.depth, fp = %entry.fp, "expanding state");
            max_depth = max_depth.max(entry.depth);
            update_path(&mut self.arena, &mut path, entry.node);

            let state = self.arena.get(entry.node).state.clone();
            if let Some(coverage) = self.config.coverage.as_mut() {
                coverage.observe(&state);
            }

            match check_assertions(&self.model, &state) {
                PropertyResult::Ok => {}
                PropertyResult::Violated { name, .. } => {
                    info!(assertion = %name, depth = entry.depth, "assertion violated");
                    let trace = Trace::reconstruct(&self.arena, entry.node, &self.model);
                    outcome = Some((RunStatus::Violated { assertion: name }, Some(trace)));
                    break;
                }
                PropertyResult::Error { name, reason, .. } => {
                    warn!(
                        assertion = %name,
                        error = %reason,
                        "assertion failed to evaluate, pruning this branch"
                    );
                    property_errors += 1;
                    continue;
                }
            }

            let successors = gen::successors(&self.model, &state)?;
            if successors.is_empty() {
                if self.config.report_deadlock {
                    debug!(depth = entry.depth, "deadlock: no enabled transitions");
                    let trace = Trace::reconstruct(&self.arena, entry.node, &self.model);
                    outcome = Some((RunStatus::Deadlocked, Some(trace)));
                    break;
                }
                continue;
            }

            // Push in reverse emission order so the default LIFO pop
            // expands successors in the generator's emission order.
            for transition in successors.into_iter().rev() {
                let fp = transition.target.fingerprint();
                if let Some(existing) = self.visited.get(&fp) {
                    if self.arena.get(existing).on_stack {
                        back_edges += 1;
                        trace!(fp = %fp, "back edge to the current path");
                    }
                    continue;
                }
                let child = self.arena.push(
                    transition.target,
                    Some(entry.node),
                    Some(transition.id),
                    entry.depth + 1,
                );
                frontier.push(FrontierEntry {
                    node: child,
                    depth: entry.depth + 1,
                    fp,
                });
            }

            if let Some(p) = &self.config.progress {
                p.states.store(self.visited.len(), Ordering::Relaxed);
                p.depth.store(max_depth, Ordering::Relaxed);
                p.frontier.store(frontier.len(), Ordering::Relaxed);
            }
        }

        let collisions = self.visited.collisions();
        if collisions > 0 {
            error!(
                collisions,
                "fingerprint collisions detected: results may be unsound, re-run to verify"
            );
        }

        let (status, trace) = outcome.unwrap_or_else(|| match bound {
            Some(reason) => (RunStatus::Bounded { reason }, None),
            None => (RunStatus::Exhausted, None),
        });

        info!(
            states = self.visited.len(),
            max_depth,
            status = ?status,
            "exploration finished"
        );

        Ok(RunReport {
            status,
            trace,
            states_explored: self.visited.len(),
            max_depth,
            back_edges,
            property_errors,
            coverage: self.config.coverage.as_ref().map(|c| c.report()),
        })
    }

    /// Seeded random walk: follow one random enabled transition per
    /// step, checking assertions along the way. Reproducible for a
    /// fixed seed because choices are explicit transitions.
    pub fn simulate(&mut self, max_steps: usize, seed: u64) -> CheckResult<SimulateOutcome> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut current = gen::initial_state(&self.model);
        let mut trace = Trace {
            steps: vec![TraceStep {
                label: "init".to_string(),
                summary: render_state(&self.model, &current),
                state: current.clone(),
                step: None,
            }],
        };

        if let Some(assertion) = self.walk_check(&current) {
            return Ok(SimulateOutcome::Violated { assertion, trace });
        }

        for _ in 0..max_steps {
            let successors = gen::successors(&self.model, &current)?;
            if successors.is_empty() {
                return Ok(SimulateOutcome::Deadlocked { trace });
            }
            let pick = rng.gen_range(0..successors.len());
            let transition = successors[pick].clone();

            trace.steps.push(TraceStep {
                label: gen::label(&self.model, &current, transition.id),
                summary: render_state(&self.model, &transition.target),
                state: transition.target.clone(),
                step: Some(transition.id),
            });

            if let Some(assertion) = self.walk_check(&transition.target) {
                return Ok(SimulateOutcome::Violated { assertion, trace });
            }
            current = transition.target;
        }

        Ok(SimulateOutcome::Ok {
            steps: trace.len(),
            trace,
        })
    }

    /// Assertion check for simulation. Evaluation errors are logged and
    /// skipped — a walk has no sibling branches to fall back to.
    fn walk_check(&self, state: &crate::state::State) -> Option<String> {
        match check_assertions(&self.model, state) {
            PropertyResult::Ok => None,
            PropertyResult::Violated { name, .. } => Some(name),
            PropertyResult::Error { name, reason, .. } => {
                warn!(assertion = %name, error = %reason, "assertion failed to evaluate");
                None
            }
        }
    }
}

/// Maintain the on-stack marks so they always describe the current
/// depth-first path. The new node's path shares a prefix with the old
/// one; unmark back to the join point, then mark the new suffix.
fn update_path(arena: &mut NodeArena, path: &mut Vec<NodeId>, node: NodeId) {
    let mut suffix = Vec::new();
    let mut cursor = Some(node);
    let mut join = None;
    while let Some(id) = cursor {
        if arena.get(id).on_stack {
            join = Some(id);
            break;
        }
        suffix.push(id);
        cursor = arena.get(id).parent;
    }

    while let Some(&top) = path.last() {
        if Some(top) == join {
            break;
        }
        arena.get_mut(top).on_stack = false;
        path.pop();
    }

    for id in suffix.into_iter().rev() {
        arena.get_mut(id).on_stack = true;
        path.push(id);
    }
}
