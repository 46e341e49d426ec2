//! Query errors.

use super::BinOp;
use thiserror::Error;

/// A query that cannot be compiled or evaluated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// Construct the search index cannot express
    #[error("unsupported query construct: {0}")]
    Unsupported(String),

    /// Arithmetic the index query language has no syntax for
    #[error("operator '{0}' is not allowed in a where clause")]
    DisallowedOperator(BinOp),

    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    InvalidOperands {
        op: String,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("invalid arguments to {function}: {reason}")]
    InvalidArgument { function: String, reason: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{0}'")]
    Overflow(String),
}
