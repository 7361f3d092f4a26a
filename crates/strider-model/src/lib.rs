//! Compiled-model representation for the Strider exploration engine.
//!
//! A model is a finite-state transition system produced by an external
//! front end: global variables, machine templates with guarded commands,
//! and safety assertions. This crate owns the on-disk format, structural
//! validation, and the side-effect-free expression evaluator.

pub mod expr;
pub mod loader;
pub mod model;
pub mod value;

pub use expr::{eval, BinOp, EvalCtx, EvalError, Expr, MachineFrame, UnaryOp};
pub use loader::{load_model, parse_model};
pub use model::{
    Assertion, Choose, Command, Model, ModelError, Place, Template, Update, VarDecl,
    MAX_CHOICE_SPAN,
};
pub use value::Value;
