//! Operators that cannot stream in lock-step with their inputs.
//!
//! A barrier either needs to see all of its input before it can emit
//! ([`make_reduce`], [`make_custom`]) or reads its inputs at unrelated rates
//! ([`make_append`]). Partial materialization realizes these eagerly.

use super::OperatorType;
use crate::error::ensure_contract;
use crate::inference::infer_num_columns;
use crate::node::{NodeState, PNode, keys};
use crate::table::Table;
use crate::value::Value;
use anyhow::Result;
use std::cmp::Ordering;
use std::sync::Arc;

/// Caller-defined operator over fully realized inputs.
pub type CustomFn = Arc<dyn Fn(Vec<Table>) -> Result<Table> + Send + Sync>;

/// Whole-column aggregation used by [`make_reduce`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Count,
    Min,
    Max,
}

impl Aggregate {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    /// Starting accumulator.
    #[must_use]
    pub const fn init(self) -> Value {
        match self {
            Self::Sum | Self::Min | Self::Max => Value::Undefined,
            Self::Count => Value::Integer(0),
        }
    }

    /// Fold one value into the accumulator. `Undefined` inputs are skipped.
    #[must_use]
    pub fn fold(self, acc: Value, v: &Value) -> Value {
        if v.is_undefined() {
            return acc;
        }
        match self {
            Self::Sum => acc.add(v),
            Self::Count => acc.add(&Value::Integer(1)),
            Self::Min if acc.is_undefined() || v.total_cmp(&acc) == Ordering::Less => v.clone(),
            Self::Max if acc.is_undefined() || v.total_cmp(&acc) == Ordering::Greater => {
                v.clone()
            }
            Self::Min | Self::Max => acc,
        }
    }
}

/// Rows of `top` followed by rows of `bottom`.
///
/// # Errors
///
/// Fails if the column counts differ.
pub fn make_append(top: &PNode, bottom: &PNode) -> Result<PNode> {
    let (a, b) = (infer_num_columns(top)?, infer_num_columns(bottom)?);
    ensure_contract!(a == b, "cannot append {b} columns to {a} columns");
    Ok(NodeState::new(OperatorType::Append)
        .inputs(vec![PNode::clone(top), PNode::clone(bottom)])
        .into_node())
}

/// Aggregate every column of `input` into a single row.
#[must_use]
pub fn make_reduce(input: &PNode, aggregate: Aggregate) -> PNode {
    NodeState::new(OperatorType::Reduce)
        .param(keys::AGGREGATE, aggregate.name())
        .inputs(vec![PNode::clone(input)])
        .into_node()
}

/// A caller-defined operator producing `num_outputs` columns from its realized
/// inputs. The planner assumes nothing about it.
///
/// # Errors
///
/// Fails if `num_outputs` is zero.
pub fn make_custom<F>(name: &str, inputs: Vec<PNode>, num_outputs: usize, f: F) -> Result<PNode>
where
    F: Fn(Vec<Table>) -> Result<Table> + Send + Sync + 'static,
{
    ensure_contract!(num_outputs > 0, "custom operator `{name}` has no outputs");
    let f: CustomFn = Arc::new(f);
    Ok(NodeState::new(OperatorType::Custom)
        .param(keys::NAME, name)
        .param(keys::NUM_OUTPUTS, num_outputs)
        .any_param(keys::FUNCTION, f)
        .inputs(inputs)
        .into_node())
}
