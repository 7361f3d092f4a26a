//! Side-effect-free expression language and evaluator.
//!
//! Expressions appear in command guards, command updates, and safety
//! assertions. Evaluation is total over the error type: no panics, every
//! failure is an [`EvalError`].

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    // Logical
    And,
    Or,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A compiled expression.
///
/// Variables are referenced by index: `Global` into the model's global
/// declarations, `Local` into the enclosing machine's locals. `SelfPc`
/// reads the enclosing machine's control location. `Choice` reads the
/// enumerated-choice value bound by the enclosing command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Literal value.
    Lit(Value),
    /// Global variable by index.
    Global(usize),
    /// Machine-local variable by index.
    Local(usize),
    /// The enclosing machine's current control location.
    SelfPc,
    /// The enumerated-choice value of the enclosing command.
    Choice,
    /// Binary operation.
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Unary operation.
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Conditional.
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    /// Sequence literal.
    Seq(Vec<Expr>),
    /// Append an element to a sequence.
    Append { seq: Box<Expr>, item: Box<Expr> },
    /// First element of a sequence.
    Head(Box<Expr>),
    /// All but the first element of a sequence.
    Tail(Box<Expr>),
    /// Length of a sequence.
    Len(Box<Expr>),
}

impl Expr {
    /// Visit this expression and every subexpression, outermost first.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expr::Unary { expr, .. } => expr.visit(f),
            Expr::Cond { cond, then, els } => {
                cond.visit(f);
                then.visit(f);
                els.visit(f);
            }
            Expr::Seq(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            Expr::Append { seq, item } => {
                seq.visit(f);
                item.visit(f);
            }
            Expr::Head(e) | Expr::Tail(e) | Expr::Len(e) => e.visit(f),
            Expr::Lit(_) | Expr::Global(_) | Expr::Local(_) | Expr::SelfPc | Expr::Choice => {}
        }
    }
}

/// Expression evaluation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("type error: expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("head/tail of empty sequence")]
    EmptySeq,

    #[error("global index {0} out of range")]
    GlobalIndex(usize),

    #[error("local index {0} out of range")]
    LocalIndex(usize),

    #[error("local variable reference outside machine context")]
    NoMachineContext,

    #[error("choice reference outside a choosing command")]
    NoChoice,
}

/// The enclosing machine, when evaluating inside a command.
#[derive(Debug, Clone, Copy)]
pub struct MachineFrame<'a> {
    pub locals: &'a [Value],
    pub pc: usize,
}

/// Evaluation context: global bindings plus optional machine frame and
/// choice binding. Assertions evaluate with neither frame nor choice.
#[derive(Debug, Clone, Copy)]
pub struct EvalCtx<'a> {
    pub globals: &'a [Value],
    pub frame: Option<MachineFrame<'a>>,
    pub choice: Option<i64>,
}

impl<'a> EvalCtx<'a> {
    /// Context for assertion evaluation: globals only.
    pub fn globals_only(globals: &'a [Value]) -> Self {
        EvalCtx {
            globals,
            frame: None,
            choice: None,
        }
    }
}

fn expect_int(v: Value) -> Result<i64, EvalError> {
    v.as_int().ok_or(EvalError::Type {
        expected: "int",
        found: v.type_name(),
    })
}

fn expect_bool(v: Value) -> Result<bool, EvalError> {
    v.as_bool().ok_or(EvalError::Type {
        expected: "bool",
        found: v.type_name(),
    })
}

fn expect_seq(v: Value) -> Result<Arc<Vec<Value>>, EvalError> {
    match v {
        Value::Seq(items) => Ok(items),
        other => Err(EvalError::Type {
            expected: "seq",
            found: other.type_name(),
        }),
    }
}

/// Evaluate an expression in the given context.
pub fn eval(expr: &Expr, ctx: &EvalCtx<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Global(idx) => ctx
            .globals
            .get(*idx)
            .cloned()
            .ok_or(EvalError::GlobalIndex(*idx)),
        Expr::Local(idx) => {
            let frame = ctx.frame.ok_or(EvalError::NoMachineContext)?;
            frame
                .locals
                .get(*idx)
                .cloned()
                .ok_or(EvalError::LocalIndex(*idx))
        }
        Expr::SelfPc => {
            let frame = ctx.frame.ok_or(EvalError::NoMachineContext)?;
            Ok(Value::Int(frame.pc as i64))
        }
        Expr::Choice => ctx.choice.map(Value::Int).ok_or(EvalError::NoChoice),
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx),
        Expr::Unary { op, expr } => match op {
            UnaryOp::Not => Ok(Value::Bool(!expect_bool(eval(expr, ctx)?)?)),
            UnaryOp::Neg => {
                let n = expect_int(eval(expr, ctx)?)?;
                n.checked_neg().map(Value::Int).ok_or(EvalError::Overflow)
            }
        },
        Expr::Cond { cond, then, els } => {
            if expect_bool(eval(cond, ctx)?)? {
                eval(then, ctx)
            } else {
                eval(els, ctx)
            }
        }
        Expr::Seq(items) => {
            let vals = items
                .iter()
                .map(|e| eval(e, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::seq(vals))
        }
        Expr::Append { seq, item } => {
            let items = expect_seq(eval(seq, ctx)?)?;
            let item = eval(item, ctx)?;
            let mut out = (*items).clone();
            out.push(item);
            Ok(Value::seq(out))
        }
        Expr::Head(e) => {
            let items = expect_seq(eval(e, ctx)?)?;
            items.first().cloned().ok_or(EvalError::EmptySeq)
        }
        Expr::Tail(e) => {
            let items = expect_seq(eval(e, ctx)?)?;
            if items.is_empty() {
                return Err(EvalError::EmptySeq);
            }
            Ok(Value::seq(items[1..].to_vec()))
        }
        Expr::Len(e) => {
            let items = expect_seq(eval(e, ctx)?)?;
            Ok(Value::Int(items.len() as i64))
        }
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &EvalCtx<'_>) -> Result<Value, EvalError> {
    // Logical operators short-circuit; everything else is strict.
    match op {
        BinOp::And => {
            if !expect_bool(eval(lhs, ctx)?)? {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(expect_bool(eval(rhs, ctx)?)?));
        }
        BinOp::Or => {
            if expect_bool(eval(lhs, ctx)?)? {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(expect_bool(eval(rhs, ctx)?)?));
        }
        _ => {}
    }

    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;
    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt => Ok(Value::Bool(expect_int(l)? < expect_int(r)?)),
        BinOp::Le => Ok(Value::Bool(expect_int(l)? <= expect_int(r)?)),
        BinOp::Gt => Ok(Value::Bool(expect_int(l)? > expect_int(r)?)),
        BinOp::Ge => Ok(Value::Bool(expect_int(l)? >= expect_int(r)?)),
        BinOp::Add => int_op(l, r, i64::checked_add),
        BinOp::Sub => int_op(l, r, i64::checked_sub),
        BinOp::Mul => int_op(l, r, i64::checked_mul),
        BinOp::Div => {
            let (a, b) = (expect_int(l)?, expect_int(r)?);
            if b == 0 {
                return Err(EvalError::DivideByZero);
            }
            a.checked_div(b).map(Value::Int).ok_or(EvalError::Overflow)
        }
        BinOp::Mod => {
            let (a, b) = (expect_int(l)?, expect_int(r)?);
            if b == 0 {
                return Err(EvalError::DivideByZero);
            }
            a.checked_rem(b).map(Value::Int).ok_or(EvalError::Overflow)
        }
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn int_op(l: Value, r: Value, f: impl Fn(i64, i64) -> Option<i64>) -> Result<Value, EvalError> {
    let (a, b) = (expect_int(l)?, expect_int(r)?);
    f(a, b).map(Value::Int).ok_or(EvalError::Overflow)
}
