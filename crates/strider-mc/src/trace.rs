//! Counterexample traces: reconstruction, rendering, replay.

use crate::arena::{NodeArena, NodeId};
use crate::gen::{self, GenError, TransitionId};
use crate::state::State;
use std::fmt;
use strider_model::Model;
use thiserror::Error;

/// One entry of a trace: the action label that produced the state and a
/// human-readable summary of the resulting bindings. The first entry is
/// always the initial state with the pseudo-label `init`.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub label: String,
    pub summary: String,
    pub state: State,
    /// Transition id, None for the initial entry.
    pub step: Option<TransitionId>,
}

/// An ordered transition sequence from the initial state to a witness
/// state. Produced at most once per failing run.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub steps: Vec<TraceStep>,
}

/// Trace replay failure.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("trace is empty")]
    Empty,

    #[error("step {step}: initial state does not match the model")]
    InitialMismatch { step: usize },

    #[error("step {step}: recorded transition is not enabled")]
    MissingTransition { step: usize },

    #[error("step {step}: replayed state differs from recorded state")]
    StateMismatch { step: usize },

    #[error(transparent)]
    Gen(#[from] GenError),
}

impl Trace {
    /// Walk the arena's parent chain from `leaf` to the root and build
    /// the forward trace, formatting labels and summaries as we go.
    pub fn reconstruct(arena: &NodeArena, leaf: NodeId, model: &Model) -> Trace {
        let mut chain = Vec::new();
        let mut cursor = Some(leaf);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = arena.get(id).parent;
        }
        chain.reverse();

        let mut steps = Vec::with_capacity(chain.len());
        for (i, &id) in chain.iter().enumerate() {
            let node = arena.get(id);
            let label = match node.step {
                Some(step) => {
                    // Labels are resolved against the parent: the machine
                    // index in a TransitionId refers to the source state.
                    let parent = arena.get(chain[i - 1]);
                    gen::label(model, &parent.state, step)
                }
                None => "init".to_string(),
            };
            steps.push(TraceStep {
                label,
                summary: render_state(model, &node.state),
                state: node.state.clone(),
                step: node.step,
            });
        }
        Trace { steps }
    }

    /// Number of transitions (not entries): a trace that stops at the
    /// initial state has length 0.
    pub fn len(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The witness state the trace leads to.
    pub fn last_state(&self) -> Option<&State> {
        self.steps.last().map(|s| &s.state)
    }

    /// Replay the recorded transition ids from the model's initial
    /// state, checking every intermediate state against the recording.
    /// Success means the trace reproduces the identical witness state.
    pub fn replay(&self, model: &Model) -> Result<(), ReplayError> {
        let first = self.steps.first().ok_or(ReplayError::Empty)?;
        let mut current = gen::initial_state(model);
        if current != first.state {
            return Err(ReplayError::InitialMismatch { step: 0 });
        }
        for (step, entry) in self.steps.iter().enumerate().skip(1) {
            let id = entry.step.ok_or(ReplayError::MissingTransition { step })?;
            let next = gen::apply(model, &current, id)?
                .ok_or(ReplayError::MissingTransition { step })?;
            if next != entry.state {
                return Err(ReplayError::StateMismatch { step });
            }
            current = next;
        }
        Ok(())
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "    {}: {} -> {}", i, step.label, step.summary)?;
        }
        Ok(())
    }
}

/// Render a state with the model's variable and template names:
/// `x=1, q=[2] | producer[0]@1 consumer[1]@0(seen=2)`.
pub fn render_state(model: &Model, state: &State) -> String {
    let mut out = String::new();
    for (i, value) in state.globals().iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let name = model.globals.get(i).map(|g| g.name.as_str()).unwrap_or("?");
        out.push_str(&format!("{}={}", name, value));
    }
    if state.globals().is_empty() {
        out.push_str("(no globals)");
    }
    if !state.machines().is_empty() {
        out.push_str(" |");
        for (i, m) in state.machines().iter().enumerate() {
            let tmpl = &model.templates[m.template];
            out.push_str(&format!(" {}[{}]@{}", tmpl.name, i, m.pc));
            if !m.locals.is_empty() {
                out.push('(');
                for (j, v) in m.locals.iter().enumerate() {
                    if j > 0 {
                        out.push_str(", ");
                    }
                    let name = tmpl.locals.get(j).map(|l| l.name.as_str()).unwrap_or("?");
                    out.push_str(&format!("{}={}", name, v));
                }
                out.push(')');
            }
        }
    }
    out
}
