//! Explicit-state exploration engine.
//!
//! Takes a validated [`strider_model::Model`] and systematically
//! explores its reachable states, checking safety assertions and
//! detecting deadlocks. Exploration is depth-first by default, bounded
//! by state count and wall-clock budgets, and produces a replayable
//! counterexample trace on failure.

pub mod arena;
pub mod explorer;
pub mod gen;
pub mod policy;
pub mod props;
pub mod state;
pub mod store;
pub mod trace;

pub use arena::{NodeArena, NodeId, SearchNode};
pub use explorer::{
    run, BoundReason, CheckConfig, CheckError, CheckResult, Explorer, ProgressCounters, RunReport,
    RunStatus, SimulateOutcome,
};
pub use gen::{
    apply, initial_state, label, successors, GenError, Successors, Transition, TransitionId,
};
pub use policy::{
    CoverageTracker, FrontierEntry, LocationCoverage, RandomDelayPolicy, SchedulingPolicy,
};
pub use props::{check_assertions, PropertyResult};
pub use state::{Fingerprint, MachineState, State};
pub use store::VisitedSet;
pub use trace::{render_state, ReplayError, Trace, TraceStep};
