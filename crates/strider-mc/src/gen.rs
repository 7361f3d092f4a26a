//! Transition generation.
//!
//! Given an immutable [`State`], enumerate every enabled transition:
//! one per (machine, command, choice value, goto branch) combination.
//! Emission order is fixed — machines in state order, commands in
//! declaration order, choice values ascending, goto branches in
//! declaration order — which is what makes unpolicied exploration and
//! trace replay deterministic.

use crate::state::{MachineState, State};
use smallvec::SmallVec;
use std::fmt;
use strider_model::{eval, EvalCtx, EvalError, Expr, MachineFrame, Model, Place, Value};
use thiserror::Error;

/// Identifies one transition out of a state: which machine moved, which
/// command fired, which choice value was taken, which goto branch was
/// followed. Replaying these ids from the initial state reproduces the
/// exact state sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionId {
    pub machine: u32,
    pub command: u32,
    pub choice: Option<i64>,
    pub branch: u32,
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}c{}", self.machine, self.command)?;
        if let Some(c) = self.choice {
            write!(f, "v{}", c)?;
        }
        write!(f, "b{}", self.branch)
    }
}

/// A generated transition: the id plus the successor state. The source
/// state is implicit (the state successors were generated from).
#[derive(Debug, Clone)]
pub struct Transition {
    pub id: TransitionId,
    pub target: State,
}

/// Successor buffer; most states have a handful of transitions.
pub type Successors = SmallVec<[Transition; 8]>;

/// Transition-generation failure. These indicate a bug in the model or
/// the front end that produced it, not a property violation, and they
/// carry the state that exposed the bug. Fatal to the run.
#[derive(Debug, Error)]
pub enum GenError {
    #[error("evaluation failed in machine {machine} command '{command}': {source}")]
    Eval {
        machine: usize,
        command: String,
        #[source]
        source: EvalError,
        state: State,
    },

    #[error("cannot encode successor state: {reason}")]
    Encode { reason: String, state: State },
}

/// Build the initial state from the model's declarations. Infallible on
/// a validated model.
pub fn initial_state(model: &Model) -> State {
    let globals: Vec<Value> = model.globals.iter().map(|g| g.init.clone()).collect();
    let machines: Vec<MachineState> = model
        .instances
        .iter()
        .map(|&template| MachineState {
            template,
            pc: model.templates[template].entry,
            locals: model.templates[template]
                .locals
                .iter()
                .map(|l| l.init.clone())
                .collect(),
        })
        .collect();
    let static_count = machines.len();
    State::new(globals, machines, static_count)
}

/// Enumerate every enabled transition of `state`, in emission order.
///
/// The result is finite and re-derivable: calling again on the same
/// state yields the same transitions in the same order.
pub fn successors(model: &Model, state: &State) -> Result<Successors, GenError> {
    let mut out = Successors::new();
    for (mi, machine) in state.machines().iter().enumerate() {
        let tmpl = &model.templates[machine.template];
        for (ci, cmd) in tmpl.commands.iter().enumerate() {
            if cmd.at != machine.pc {
                continue;
            }

            let guard_ctx = EvalCtx {
                globals: state.globals(),
                frame: Some(MachineFrame {
                    locals: &machine.locals,
                    pc: machine.pc,
                }),
                choice: None,
            };
            if let Some(guard) = &cmd.guard {
                if !eval_bool(guard, &guard_ctx)
                    .map_err(|source| eval_err(mi, cmd, source, state))?
                {
                    continue;
                }
            }

            let choices: Vec<Option<i64>> = match cmd.choose {
                Some(choose) => (choose.lo..=choose.hi).map(Some).collect(),
                None => vec![None],
            };

            for choice in choices {
                let ctx = EvalCtx {
                    choice,
                    ..guard_ctx
                };

                // Simultaneous assignment: evaluate every update against
                // the source state, then apply.
                let mut writes: Vec<(Place, Value)> = Vec::with_capacity(cmd.updates.len());
                for update in &cmd.updates {
                    let value = eval(&update.expr, &ctx)
                        .map_err(|source| eval_err(mi, cmd, source, state))?;
                    writes.push((update.target, value));
                }

                let mut globals = state.globals().to_vec();
                let mut locals = machine.locals.clone();
                for (place, value) in writes {
                    match place {
                        Place::Global(idx) => globals[idx] = value,
                        Place::Local(idx) => locals[idx] = value,
                    }
                }

                let spawned = match cmd.spawn {
                    Some(template) => {
                        let spawn_tmpl = model.templates.get(template).ok_or_else(|| {
                            GenError::Encode {
                                reason: format!("spawn of unknown template {}", template),
                                state: state.clone(),
                            }
                        })?;
                        Some(MachineState {
                            template,
                            pc: spawn_tmpl.entry,
                            locals: spawn_tmpl.locals.iter().map(|l| l.init.clone()).collect(),
                        })
                    }
                    None => None,
                };

                for (bi, &target) in cmd.goto.iter().enumerate() {
                    if target >= tmpl.locations {
                        return Err(GenError::Encode {
                            reason: format!(
                                "goto target {} out of range for template '{}'",
                                target, tmpl.name
                            ),
                            state: state.clone(),
                        });
                    }
                    let mut machines = state.machines().to_vec();
                    machines[mi].pc = target;
                    machines[mi].locals = locals.clone();
                    if let Some(spawned) = &spawned {
                        machines.push(spawned.clone());
                    }
                    out.push(Transition {
                        id: TransitionId {
                            machine: mi as u32,
                            command: ci as u32,
                            choice,
                            branch: bi as u32,
                        },
                        target: State::new(globals.clone(), machines, state.static_count()),
                    });
                }
            }
        }
    }
    Ok(out)
}

/// Re-derive the successor a recorded transition id selects from
/// `state`. Returns None if the id matches no enabled transition.
pub fn apply(model: &Model, state: &State, id: TransitionId) -> Result<Option<State>, GenError> {
    let succs = successors(model, state)?;
    Ok(succs.into_iter().find(|t| t.id == id).map(|t| t.target))
}

/// Human-readable action label for a transition out of `source`.
pub fn label(model: &Model, source: &State, id: TransitionId) -> String {
    let machine = &source.machines()[id.machine as usize];
    let tmpl = &model.templates[machine.template];
    let cmd = &tmpl.commands[id.command as usize];

    let mut out = format!("{}[{}].{}", tmpl.name, id.machine, cmd.label);
    if let Some(choice) = id.choice {
        out.push_str(&format!("({})", choice));
    }
    if cmd.goto.len() > 1 {
        out.push_str(&format!(" ->{}", cmd.goto[id.branch as usize]));
    }
    out
}

fn eval_bool(expr: &Expr, ctx: &EvalCtx<'_>) -> Result<bool, EvalError> {
    let value = eval(expr, ctx)?;
    value.as_bool().ok_or(EvalError::Type {
        expected: "bool",
        found: value.type_name(),
    })
}

fn eval_err(
    machine: usize,
    cmd: &strider_model::Command,
    source: EvalError,
    state: &State,
) -> GenError {
    GenError::Eval {
        machine,
        command: cmd.label.clone(),
        source,
        state: state.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_model::{Assertion, BinOp, Choose, Command, Template, Update, VarDecl};

    fn int_lit(n: i64) -> Expr {
        Expr::Lit(Value::Int(n))
    }

    fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn model_with(
        globals: Vec<VarDecl>,
        templates: Vec<Template>,
        instances: Vec<usize>,
    ) -> Model {
        let model = Model {
            name: "test".to_string(),
            globals,
            templates,
            instances,
            assertions: Vec::<Assertion>::new(),
        };
        model.validate().unwrap();
        model
    }

    fn global(name: &str, init: Value) -> VarDecl {
        VarDecl {
            name: name.to_string(),
            init,
        }
    }

    #[test]
    fn test_emission_order_deterministic() {
        // Two machines, each with one always-enabled self-loop that
        // bumps a global: order must be machine 0 first, then machine 1.
        let tmpl = Template {
            name: "m".to_string(),
            locations: 1,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "bump".to_string(),
                at: 0,
                guard: None,
                choose: None,
                updates: vec![Update {
                    target: Place::Global(0),
                    expr: bin(BinOp::Add, Expr::Global(0), int_lit(1)),
                }],
                goto: vec![0],
                spawn: None,
            }],
        };
        let model = model_with(vec![global("n", Value::Int(0))], vec![tmpl], vec![0, 0]);
        let init = initial_state(&model);

        let a = successors(&model, &init).unwrap();
        let b = successors(&model, &init).unwrap();
        let ids_a: Vec<TransitionId> = a.iter().map(|t| t.id).collect();
        let ids_b: Vec<TransitionId> = b.iter().map(|t| t.id).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].id.machine, 0);
        assert_eq!(a[1].id.machine, 1);
    }

    #[test]
    fn test_choice_enumeration() {
        let tmpl = Template {
            name: "c".to_string(),
            locations: 1,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "pick".to_string(),
                at: 0,
                guard: None,
                choose: Some(Choose { lo: 1, hi: 3 }),
                updates: vec![Update {
                    target: Place::Global(0),
                    expr: Expr::Choice,
                }],
                goto: vec![0],
                spawn: None,
            }],
        };
        let model = model_with(vec![global("x", Value::Int(0))], vec![tmpl], vec![0]);
        let succs = successors(&model, &initial_state(&model)).unwrap();
        assert_eq!(succs.len(), 3);
        let picked: Vec<i64> = succs
            .iter()
            .map(|t| t.target.globals()[0].as_int().unwrap())
            .collect();
        assert_eq!(picked, vec![1, 2, 3]);
        assert_eq!(succs[0].id.choice, Some(1));
    }

    #[test]
    fn test_guard_disables_command() {
        let tmpl = Template {
            name: "g".to_string(),
            locations: 1,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "never".to_string(),
                at: 0,
                guard: Some(Expr::Lit(Value::Bool(false))),
                choose: None,
                updates: vec![],
                goto: vec![0],
                spawn: None,
            }],
        };
        let model = model_with(vec![], vec![tmpl], vec![0]);
        let succs = successors(&model, &initial_state(&model)).unwrap();
        assert!(succs.is_empty());
    }

    #[test]
    fn test_nondet_goto_branches() {
        let tmpl = Template {
            name: "b".to_string(),
            locations: 3,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "fork".to_string(),
                at: 0,
                guard: None,
                choose: None,
                updates: vec![],
                goto: vec![1, 2],
                spawn: None,
            }],
        };
        let model = model_with(vec![], vec![tmpl], vec![0]);
        let succs = successors(&model, &initial_state(&model)).unwrap();
        assert_eq!(succs.len(), 2);
        assert_eq!(succs[0].target.machines()[0].pc, 1);
        assert_eq!(succs[1].target.machines()[0].pc, 2);
    }

    #[test]
    fn test_spawn_appends_machine() {
        let worker = Template {
            name: "worker".to_string(),
            locations: 1,
            entry: 0,
            locals: vec![global("t", Value::Int(0))],
            commands: vec![],
        };
        let boss = Template {
            name: "boss".to_string(),
            locations: 2,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "hire".to_string(),
                at: 0,
                guard: None,
                choose: None,
                updates: vec![],
                goto: vec![1],
                spawn: Some(0),
            }],
        };
        let model = model_with(vec![], vec![worker, boss], vec![1]);
        let succs = successors(&model, &initial_state(&model)).unwrap();
        assert_eq!(succs.len(), 1);
        let target = &succs[0].target;
        assert_eq!(target.machines().len(), 2);
        assert_eq!(target.static_count(), 1);
        // Spawned machine carries the worker template and its local inits.
        let spawned = &target.machines()[1];
        assert_eq!(spawned.template, 0);
        assert_eq!(spawned.locals, vec![Value::Int(0)]);
    }

    #[test]
    fn test_eval_error_carries_state() {
        // Guard divides by zero: a front-end bug, surfaced with state.
        let tmpl = Template {
            name: "bad".to_string(),
            locations: 1,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "boom".to_string(),
                at: 0,
                guard: Some(bin(
                    BinOp::Eq,
                    bin(BinOp::Div, int_lit(1), int_lit(0)),
                    int_lit(1),
                )),
                choose: None,
                updates: vec![],
                goto: vec![0],
                spawn: None,
            }],
        };
        let model = model_with(vec![], vec![tmpl], vec![0]);
        let err = successors(&model, &initial_state(&model)).unwrap_err();
        assert!(matches!(err, GenError::Eval { machine: 0, .. }));
    }

    #[test]
    fn test_apply_matches_successor() {
        let tmpl = Template {
            name: "m".to_string(),
            locations: 2,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "go".to_string(),
                at: 0,
                guard: None,
                choose: None,
                updates: vec![],
                goto: vec![1],
                spawn: None,
            }],
        };
        let model = model_with(vec![], vec![tmpl], vec![0]);
        let init = initial_state(&model);
        let succs = successors(&model, &init).unwrap();
        let replayed = apply(&model, &init, succs[0].id).unwrap().unwrap();
        assert_eq!(replayed, succs[0].target);

        let missing = TransitionId {
            machine: 0,
            command: 7,
            choice: None,
            branch: 0,
        };
        assert!(apply(&model, &init, missing).unwrap().is_none());
    }
}
