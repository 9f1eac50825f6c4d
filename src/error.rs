//! Error taxonomy for planning and execution.
//!
//! Public entry points return [`anyhow::Result`]. Failures the caller may want
//! to tell apart are raised as a [`QueryError`] inside the `anyhow::Error`, so
//! they can be recovered with `err.downcast_ref::<QueryError>()`.
//!
//! - **Contract** violations mean the graph handed to the planner was malformed
//!   (a bug upstream). They end the current `materialize` call and are never
//!   retried.
//! - **Io** / **Serialization** errors come from saving or loading realized
//!   tables and are surfaced unchanged.
//! - A statically unprovable length or an unknown operator is *not* an error;
//!   see [`crate::planner::Planner::test_equal_length`] and
//!   [`crate::operators::attributes`].

use std::io;
use thiserror::Error;

/// Structured failure raised by the query engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueryError {
    /// A structural or contract violation in the planner-node graph.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A node is missing a parameter its operator requires.
    #[error("{operator} node is missing parameter `{key}`")]
    MissingParameter {
        operator: &'static str,
        key: &'static str,
    },

    /// A parameter is present but holds the wrong kind of value.
    #[error("parameter `{key}` is not a {expected}")]
    ParameterType {
        key: &'static str,
        expected: &'static str,
    },

    /// A caller-defined operator failed.
    #[error("custom operator failed: {0}")]
    Operator(String),

    /// Reading or writing a realized table failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A realized table could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    pub(crate) fn contract(msg: impl Into<String>) -> Self {
        Self::Contract(msg.into())
    }
}

/// Return early with a [`QueryError::Contract`] unless `cond` holds.
macro_rules! ensure_contract {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::QueryError::contract(format!($($arg)+)).into());
        }
    };
}

pub(crate) use ensure_contract;
