//! Safety-property checking.

use crate::state::State;
use strider_model::{eval, EvalCtx, EvalError, Model};

/// Outcome of checking every assertion against one state.
///
/// Assertions are evaluated in declaration order and the first failure
/// wins, so the reported witness is stable when several assertions fail
/// in the same state. An evaluation error is not swallowed and not
/// fatal: it is reported as its own variant and halts exploration of
/// the offending branch only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyResult {
    /// Every assertion holds.
    Ok,
    /// An assertion evaluated to false.
    Violated { index: usize, name: String },
    /// An assertion failed to evaluate.
    Error {
        index: usize,
        name: String,
        reason: EvalError,
    },
}

/// Evaluate the model's assertions against `state`, in declaration
/// order. Assertions see only the global bindings.
pub fn check_assertions(model: &Model, state: &State) -> PropertyResult {
    let ctx = EvalCtx::globals_only(state.globals());
    for (index, assertion) in model.assertions.iter().enumerate() {
        match eval(&assertion.pred, &ctx) {
            Ok(value) => match value.as_bool() {
                Some(true) => {}
                Some(false) => {
                    return PropertyResult::Violated {
                        index,
                        name: assertion.name.clone(),
                    }
                }
                None => {
                    return PropertyResult::Error {
                        index,
                        name: assertion.name.clone(),
                        reason: EvalError::Type {
                            expected: "bool",
                            found: value.type_name(),
                        },
                    }
                }
            },
            Err(reason) => {
                return PropertyResult::Error {
                    index,
                    name: assertion.name.clone(),
                    reason,
                }
            }
        }
    }
    PropertyResult::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_model::{Assertion, BinOp, Expr, Value};

    fn model_with_assertions(preds: Vec<(&str, Expr)>) -> Model {
        Model {
            name: "t".to_string(),
            globals: vec![strider_model::VarDecl {
                name: "x".to_string(),
                init: Value::Int(0),
            }],
            templates: vec![],
            instances: vec![],
            assertions: preds
                .into_iter()
                .map(|(name, pred)| Assertion {
                    name: name.to_string(),
                    pred,
                })
                .collect(),
        }
    }

    fn ge_zero() -> Expr {
        Expr::Binary {
            op: BinOp::Ge,
            lhs: Box::new(Expr::Global(0)),
            rhs: Box::new(Expr::Lit(Value::Int(0))),
        }
    }

    #[test]
    fn test_all_ok() {
        let model = model_with_assertions(vec![("nonneg", ge_zero())]);
        let state = State::new(vec![Value::Int(5)], vec![], 0);
        assert_eq!(check_assertions(&model, &state), PropertyResult::Ok);
    }

    #[test]
    fn test_first_failure_wins() {
        // Both assertions fail; declaration order picks the first.
        let model = model_with_assertions(vec![
            ("first", Expr::Lit(Value::Bool(false))),
            ("second", Expr::Lit(Value::Bool(false))),
        ]);
        let state = State::new(vec![Value::Int(0)], vec![], 0);
        assert_eq!(
            check_assertions(&model, &state),
            PropertyResult::Violated {
                index: 0,
                name: "first".to_string()
            }
        );
    }

    #[test]
    fn test_eval_error_reported() {
        let model = model_with_assertions(vec![(
            "head_ok",
            Expr::Head(Box::new(Expr::Seq(vec![]))),
        )]);
        let state = State::new(vec![Value::Int(0)], vec![], 0);
        assert!(matches!(
            check_assertions(&model, &state),
            PropertyResult::Error { index: 0, .. }
        ));
    }

    #[test]
    fn test_non_bool_assertion_is_error() {
        let model = model_with_assertions(vec![("oops", Expr::Lit(Value::Int(3)))]);
        let state = State::new(vec![Value::Int(0)], vec![], 0);
        assert!(matches!(
            check_assertions(&model, &state),
            PropertyResult::Error { .. }
        ));
    }
}
