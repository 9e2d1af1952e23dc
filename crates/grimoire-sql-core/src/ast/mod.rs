//! SQL expression AST.

mod expression;

pub use expression::{BinaryOp, Direction, Expr, UnaryOp};
