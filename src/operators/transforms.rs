//! Linear and sublinear operators: row-streaming, no random access.

use super::OperatorType;
use crate::error::ensure_contract;
use crate::inference::infer_num_columns;
use crate::node::{NodeState, PNode, keys};
use crate::value::Value;
use anyhow::Result;
use std::sync::Arc;

/// Row function producing one value.
pub type TransformFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Row function producing a fixed number of values.
pub type GeneralizedTransformFn = Arc<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>;

/// Select columns of `input` by index. Indices may repeat or reorder.
///
/// # Errors
///
/// Fails on an empty index list or an index past the input's column count.
pub fn make_project(input: &PNode, indices: &[usize]) -> Result<PNode> {
    ensure_contract!(!indices.is_empty(), "projection selects no columns");
    let n = infer_num_columns(input)?;
    if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
        ensure_contract!(false, "projection index {bad} out of range for {n} columns");
    }
    Ok(NodeState::new(OperatorType::Project)
        .param(keys::INDICES, indices)
        .inputs(vec![PNode::clone(input)])
        .into_node())
}

/// Concatenate the columns of equal-length inputs.
///
/// # Errors
///
/// Fails if `inputs` is empty.
pub fn make_union(inputs: Vec<PNode>) -> Result<PNode> {
    ensure_contract!(!inputs.is_empty(), "union of no inputs");
    Ok(NodeState::new(OperatorType::Union).inputs(inputs).into_node())
}

/// Map every row of `input` to one value.
pub fn make_transform<F>(input: &PNode, f: F) -> PNode
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    let f: TransformFn = Arc::new(f);
    NodeState::new(OperatorType::Transform)
        .any_param(keys::FUNCTION, f)
        .inputs(vec![PNode::clone(input)])
        .into_node()
}

/// Map every row of `input` to `num_outputs` values.
///
/// The executor rejects rows for which `f` returns a different count.
///
/// # Errors
///
/// Fails if `num_outputs` is zero.
pub fn make_generalized_transform<F>(input: &PNode, f: F, num_outputs: usize) -> Result<PNode>
where
    F: Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
{
    ensure_contract!(num_outputs > 0, "generalized transform with no outputs");
    let f: GeneralizedTransformFn = Arc::new(f);
    Ok(NodeState::new(OperatorType::GeneralizedTransform)
        .param(keys::NUM_OUTPUTS, num_outputs)
        .any_param(keys::FUNCTION, f)
        .inputs(vec![PNode::clone(input)])
        .into_node())
}

/// Keep the rows of `data` whose corresponding `mask` value is truthy.
///
/// # Errors
///
/// Fails unless `mask` has exactly one column.
pub fn make_logical_filter(data: &PNode, mask: &PNode) -> Result<PNode> {
    let mask_columns = infer_num_columns(mask)?;
    ensure_contract!(
        mask_columns == 1,
        "filter mask must have one column, found {mask_columns}"
    );
    Ok(NodeState::new(OperatorType::LogicalFilter)
        .inputs(vec![PNode::clone(data), PNode::clone(mask)])
        .into_node())
}
