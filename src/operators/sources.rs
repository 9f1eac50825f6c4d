//! Source operators: nodes with no inputs that produce rows directly.

use super::OperatorType;
use crate::error::{QueryError, ensure_contract};
use crate::node::{NodeState, PNode, PlannerNode, keys};
use crate::table::{Column, Table};
use anyhow::Result;

pub(crate) fn sframe_source_state(table: Table, begin: usize, end: usize) -> NodeState {
    NodeState::new(OperatorType::SframeSource)
        .param(keys::BEGIN_INDEX, begin)
        .param(keys::END_INDEX, end)
        .any_param(keys::TABLE, table)
}

/// A source over every row of `table`.
#[must_use]
pub fn make_sframe_source(table: Table) -> PNode {
    let n = table.num_rows();
    sframe_source_state(table, 0, n).into_node()
}

/// A source over rows `[begin, end)` of `table`.
///
/// # Errors
///
/// Fails unless `begin <= end <= table.num_rows()`.
pub fn make_sframe_source_range(table: Table, begin: usize, end: usize) -> Result<PNode> {
    ensure_contract!(
        begin <= end && end <= table.num_rows(),
        "source range [{begin}, {end}) invalid for a table of {} rows",
        table.num_rows()
    );
    ensure_contract!(table.num_columns() > 0, "a table source needs at least one column");
    Ok(sframe_source_state(table, begin, end).into_node())
}

/// A source over every row of one column.
#[must_use]
pub fn make_sarray_source(column: Column) -> PNode {
    let n = column.size();
    NodeState::new(OperatorType::SarraySource)
        .param(keys::BEGIN_INDEX, 0usize)
        .param(keys::END_INDEX, n)
        .any_param(keys::COLUMN, column)
        .into_node()
}

/// A source over rows `[begin, end)` of one column.
///
/// # Errors
///
/// Fails unless `begin <= end <= column.size()`.
pub fn make_sarray_source_range(column: Column, begin: usize, end: usize) -> Result<PNode> {
    ensure_contract!(
        begin <= end && end <= column.size(),
        "source range [{begin}, {end}) invalid for a column of {} rows",
        column.size()
    );
    Ok(NodeState::new(OperatorType::SarraySource)
        .param(keys::BEGIN_INDEX, begin)
        .param(keys::END_INDEX, end)
        .any_param(keys::COLUMN, column)
        .into_node())
}

/// The integers `begin..end` as a single column.
///
/// # Errors
///
/// Fails if `begin > end`.
pub fn make_range(begin: usize, end: usize) -> Result<PNode> {
    ensure_contract!(begin <= end, "range [{begin}, {end}) is reversed");
    Ok(NodeState::new(OperatorType::Range)
        .param(keys::BEGIN_INDEX, begin)
        .param(keys::END_INDEX, end)
        .into_node())
}

/// Row range `[begin, end)` of a source node.
///
/// # Errors
///
/// Fails if `n` is not a source or its range parameters are missing or
/// reversed.
pub fn source_range(n: &PlannerNode) -> Result<(usize, usize)> {
    ensure_contract!(
        super::is_source_node(n),
        "{} node has no row range",
        n.operator_type()
    );
    let begin = n.param_usize(keys::BEGIN_INDEX)?;
    let end = n.param_usize(keys::END_INDEX)?;
    if begin > end {
        return Err(QueryError::contract(format!(
            "{} node has reversed range [{begin}, {end})",
            n.operator_type()
        ))
        .into());
    }
    Ok((begin, end))
}
