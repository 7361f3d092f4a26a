//! Compiled-model representation: the boundary between the external
//! front-end compiler and the exploration engine.
//!
//! A model is a set of global variables, machine templates (guarded
//! commands over control locations), statically declared machine
//! instances, and safety assertions. Models arrive fully compiled; this
//! crate validates structure, never parses surface syntax.

use crate::expr::Expr;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Upper bound on the span of a single enumerated choice. Anything wider
/// is almost certainly a front-end bug and would explode the transition
/// count of one command.
pub const MAX_CHOICE_SPAN: i64 = 4096;

/// Model loading/validation error. All variants are fatal: a model that
/// fails to load is never retried.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed model file (line {line}, column {column}): {message}")]
    Malformed {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("duplicate name '{name}'")]
    DuplicateName { name: String },

    #[error("instance {index} refers to unknown template {template}")]
    UnknownTemplate { index: usize, template: usize },

    #[error("template '{template}': entry location {entry} out of range ({locations} locations)")]
    BadEntry {
        template: String,
        entry: usize,
        locations: usize,
    },

    #[error("template '{template}', command '{command}': {reason}")]
    BadCommand {
        template: String,
        command: String,
        reason: String,
    },

    #[error("assertion '{name}': {reason}")]
    BadAssertion { name: String, reason: String },
}

/// A variable declaration with its initial value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub init: Value,
}

/// Where an update writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Place {
    /// Global variable by index.
    Global(usize),
    /// Machine-local variable by index.
    Local(usize),
}

/// A single assignment within a command. All updates of a command are
/// evaluated against the source state, then applied simultaneously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub target: Place,
    pub expr: Expr,
}

/// An enumerated choice: the command fires once per value in
/// `lo..=hi`, each firing a distinct transition. This is how both
/// nondeterministic data choices and randomized delays are expressed —
/// as explicit, enumerable branches, never hidden randomness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Choose {
    pub lo: i64,
    pub hi: i64,
}

/// A guarded command of a machine template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Action label, used in counterexample traces.
    pub label: String,
    /// Control location at which the command is enabled.
    pub at: usize,
    /// Enabling condition; absent means always enabled at `at`.
    #[serde(default)]
    pub guard: Option<Expr>,
    /// Enumerated choice bound before updates run.
    #[serde(default)]
    pub choose: Option<Choose>,
    /// Simultaneous assignments.
    #[serde(default)]
    pub updates: Vec<Update>,
    /// Successor control locations. More than one entry makes the
    /// command a nondeterministic branch: one transition per target.
    pub goto: Vec<usize>,
    /// Template index of a machine to spawn when the command fires.
    #[serde(default)]
    pub spawn: Option<usize>,
}

/// A machine template: local variables, a number of control locations,
/// and the commands that move between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// Number of control locations; every pc is in `0..locations`.
    pub locations: usize,
    /// Initial control location.
    pub entry: usize,
    #[serde(default)]
    pub locals: Vec<VarDecl>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// A safety assertion over the global bindings, checked in every
/// reachable state. Assertions are evaluated in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub name: String,
    pub pred: Expr,
}

/// A compiled model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub globals: Vec<VarDecl>,
    #[serde(default)]
    pub templates: Vec<Template>,
    /// Template indices of the statically declared machines, in
    /// declaration order.
    #[serde(default)]
    pub instances: Vec<usize>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl Model {
    /// Structural validation. Run once at load; the engine assumes a
    /// validated model and treats any residual inconsistency as a
    /// state-encoding bug.
    pub fn validate(&self) -> Result<(), ModelError> {
        check_unique(self.globals.iter().map(|g| g.name.as_str()))?;
        check_unique(self.templates.iter().map(|t| t.name.as_str()))?;
        check_unique(self.assertions.iter().map(|a| a.name.as_str()))?;

        for (index, &template) in self.instances.iter().enumerate() {
            if template >= self.templates.len() {
                return Err(ModelError::UnknownTemplate { index, template });
            }
        }

        for tmpl in &self.templates {
            check_unique(tmpl.locals.iter().map(|l| l.name.as_str()))?;
            if tmpl.entry >= tmpl.locations {
                return Err(ModelError::BadEntry {
                    template: tmpl.name.clone(),
                    entry: tmpl.entry,
                    locations: tmpl.locations,
                });
            }
            for cmd in &tmpl.commands {
                self.validate_command(tmpl, cmd)?;
            }
        }

        for assertion in &self.assertions {
            self.validate_assertion(assertion)?;
        }

        Ok(())
    }

    fn validate_command(&self, tmpl: &Template, cmd: &Command) -> Result<(), ModelError> {
        let fail = |reason: String| ModelError::BadCommand {
            template: tmpl.name.clone(),
            command: cmd.label.clone(),
            reason,
        };

        if cmd.at >= tmpl.locations {
            return Err(fail(format!("enabled at location {} out of range", cmd.at)));
        }
        if cmd.goto.is_empty() {
            return Err(fail("empty goto list".to_string()));
        }
        for &target in &cmd.goto {
            if target >= tmpl.locations {
                return Err(fail(format!("goto target {} out of range", target)));
            }
        }
        if let Some(spawn) = cmd.spawn {
            if spawn >= self.templates.len() {
                return Err(fail(format!("spawn of unknown template {}", spawn)));
            }
        }
        if let Some(choose) = cmd.choose {
            if choose.lo > choose.hi {
                return Err(fail(format!(
                    "empty choice range {}..={}",
                    choose.lo, choose.hi
                )));
            }
            match choose.hi.checked_sub(choose.lo) {
                Some(span) if span < MAX_CHOICE_SPAN => {}
                _ => {
                    return Err(fail(format!(
                        "choice range {}..={} wider than {}",
                        choose.lo, choose.hi, MAX_CHOICE_SPAN
                    )));
                }
            }
        }

        if let Some(guard) = &cmd.guard {
            if let Some(reason) = self.check_expr(guard, Some(tmpl), false) {
                return Err(fail(format!("guard: {}", reason)));
            }
        }
        for update in &cmd.updates {
            match update.target {
                Place::Global(idx) if idx >= self.globals.len() => {
                    return Err(fail(format!("update target global {} out of range", idx)));
                }
                Place::Local(idx) if idx >= tmpl.locals.len() => {
                    return Err(fail(format!("update target local {} out of range", idx)));
                }
                _ => {}
            }
            if let Some(reason) = self.check_expr(&update.expr, Some(tmpl), cmd.choose.is_some()) {
                return Err(fail(format!("update: {}", reason)));
            }
        }
        Ok(())
    }

    fn validate_assertion(&self, assertion: &Assertion) -> Result<(), ModelError> {
        if let Some(reason) = self.check_expr(&assertion.pred, None, false) {
            return Err(ModelError::BadAssertion {
                name: assertion.name.clone(),
                reason,
            });
        }
        Ok(())
    }

    /// Returns a description of the first scoping problem in `expr`,
    /// or None if the expression is well-scoped for the given context.
    fn check_expr(
        &self,
        expr: &Expr,
        tmpl: Option<&Template>,
        choice_bound: bool,
    ) -> Option<String> {
        let mut problem = None;
        expr.visit(&mut |e| {
            if problem.is_some() {
                return;
            }
            problem = match e {
                Expr::Global(idx) if *idx >= self.globals.len() => {
                    Some(format!("global {} out of range", idx))
                }
                Expr::Local(idx) => match tmpl {
                    None => Some("local reference outside machine context".to_string()),
                    Some(t) if *idx >= t.locals.len() => {
                        Some(format!("local {} out of range", idx))
                    }
                    Some(_) => None,
                },
                Expr::SelfPc if tmpl.is_none() => {
                    Some("self_pc reference outside machine context".to_string())
                }
                Expr::Choice if !choice_bound => {
                    Some("choice reference outside a choosing update".to_string())
                }
                _ => None,
            };
        });
        problem
    }
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ModelError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ModelError::DuplicateName {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_template() -> Template {
        Template {
            name: "m".to_string(),
            locations: 2,
            entry: 0,
            locals: vec![],
            commands: vec![Command {
                label: "step".to_string(),
                at: 0,
                guard: None,
                choose: None,
                updates: vec![],
                goto: vec![1],
                spawn: None,
            }],
        }
    }

    fn minimal_model() -> Model {
        Model {
            name: "test".to_string(),
            globals: vec![VarDecl {
                name: "x".to_string(),
                init: Value::Int(0),
            }],
            templates: vec![minimal_template()],
            instances: vec![0],
            assertions: vec![],
        }
    }

    #[test]
    fn test_valid_model() {
        assert!(minimal_model().validate().is_ok());
    }

    #[test]
    fn test_bad_goto_target() {
        let mut model = minimal_model();
        model.templates[0].commands[0].goto = vec![5];
        assert!(matches!(
            model.validate(),
            Err(ModelError::BadCommand { .. })
        ));
    }

    #[test]
    fn test_empty_goto() {
        let mut model = minimal_model();
        model.templates[0].commands[0].goto = vec![];
        assert!(matches!(
            model.validate(),
            Err(ModelError::BadCommand { .. })
        ));
    }

    #[test]
    fn test_unknown_instance_template() {
        let mut model = minimal_model();
        model.instances.push(3);
        assert!(matches!(
            model.validate(),
            Err(ModelError::UnknownTemplate {
                index: 1,
                template: 3
            })
        ));
    }

    #[test]
    fn test_duplicate_global() {
        let mut model = minimal_model();
        model.globals.push(VarDecl {
            name: "x".to_string(),
            init: Value::Int(1),
        });
        assert!(matches!(
            model.validate(),
            Err(ModelError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_choice_range() {
        let mut model = minimal_model();
        model.templates[0].commands[0].choose = Some(Choose { lo: 5, hi: 4 });
        assert!(matches!(
            model.validate(),
            Err(ModelError::BadCommand { .. })
        ));
        model.templates[0].commands[0].choose = Some(Choose {
            lo: 0,
            hi: MAX_CHOICE_SPAN + 1,
        });
        assert!(matches!(
            model.validate(),
            Err(ModelError::BadCommand { .. })
        ));
    }

    #[test]
    fn test_assertion_rejects_local_scope() {
        let mut model = minimal_model();
        model.assertions.push(Assertion {
            name: "bad".to_string(),
            pred: Expr::Local(0),
        });
        assert!(matches!(
            model.validate(),
            Err(ModelError::BadAssertion { .. })
        ));
    }

    #[test]
    fn test_choice_requires_choose() {
        let mut model = minimal_model();
        model.templates[0].commands[0].updates.push(Update {
            target: Place::Global(0),
            expr: Expr::Choice,
        });
        assert!(matches!(
            model.validate(),
            Err(ModelError::BadCommand { .. })
        ));
        model.templates[0].commands[0].choose = Some(Choose { lo: 0, hi: 1 });
        assert!(model.validate().is_ok());
    }
}
