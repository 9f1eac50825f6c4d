//! Row-range restriction of whole graphs.
//!
//! Both functions deep-clone the DAG reachable from a node, rewriting the row
//! range of every source node and copying every other node as is. The memo is
//! keyed by node identity, so a sub-graph reachable along several paths is
//! cloned once and shared by all its consumers in the clone, exactly as in the
//! original. Passing the same memo to several calls on overlapping graphs
//! keeps that sharing across calls.

use crate::error::ensure_contract;
use crate::node::{PNode, PlannerNode, keys};
use crate::node_id::NodeId;
use crate::operators::{is_source_node, source_range};
use anyhow::Result;
use std::collections::HashMap;

/// Identity-keyed map from original node to its clone.
pub type CloneMemo = HashMap<NodeId, PNode>;

/// The `segment_index`-th of `num_segments` contiguous partitions of
/// `[begin, end)`.
///
/// Every segment but the last has `ceil(len / num_segments)` rows; the last
/// absorbs what remains (and trailing segments may be empty). Together the
/// partitions cover `[begin, end)` exactly, in order, without overlap.
///
/// # Panics
///
/// Panics if `num_segments` is zero or `segment_index >= num_segments`.
#[must_use]
pub fn segment_range(
    begin: usize,
    end: usize,
    segment_index: usize,
    num_segments: usize,
) -> (usize, usize) {
    assert!(
        segment_index < num_segments,
        "segment {segment_index} of {num_segments}"
    );
    let len = end.saturating_sub(begin);
    let chunk = len.div_ceil(num_segments);
    let seg_begin = begin + (segment_index * chunk).min(len);
    let seg_end = if segment_index + 1 == num_segments {
        end.max(begin)
    } else {
        begin + ((segment_index + 1) * chunk).min(len)
    };
    (seg_begin, seg_end)
}

fn clone_graph<F>(node: &PNode, memo: &mut CloneMemo, restrict: &F) -> Result<PNode>
where
    F: Fn(usize, usize) -> Result<(usize, usize)>,
{
    if let Some(done) = memo.get(&node.id()) {
        return Ok(PNode::clone(done));
    }
    let mut state = node.state();
    if is_source_node(node) {
        let (begin, end) = source_range(node)?;
        let (new_begin, new_end) = restrict(begin, end)?;
        state
            .operator_parameters
            .insert(keys::BEGIN_INDEX.to_string(), new_begin.into());
        state
            .operator_parameters
            .insert(keys::END_INDEX.to_string(), new_end.into());
    } else {
        let mut inputs = Vec::with_capacity(state.inputs.len());
        for input in &state.inputs {
            inputs.push(clone_graph(input, memo, restrict)?);
        }
        state.inputs = inputs;
        // Column reuse is only valid over full source ranges.
        state.any_operator_parameters.remove(keys::DIRECT_SOURCE_MAPPING);
    }
    let cloned = PlannerNode::new(state);
    memo.insert(node.id(), PNode::clone(&cloned));
    Ok(cloned)
}

/// Clone the graph under `node`, restricting every source to the
/// `segment_index`-th of `num_segments` partitions of its own range.
///
/// # Errors
///
/// Fails if `num_segments` is zero, the index is out of range, or a source
/// has a malformed range.
pub fn make_segmented_graph(
    node: &PNode,
    segment_index: usize,
    num_segments: usize,
    memo: &mut CloneMemo,
) -> Result<PNode> {
    ensure_contract!(
        segment_index < num_segments,
        "segment {segment_index} requested of {num_segments}"
    );
    clone_graph(node, memo, &|begin, end| {
        Ok(segment_range(begin, end, segment_index, num_segments))
    })
}

/// Clone the graph under `node`, restricting every source to the rows
/// `[begin, end)` relative to the start of its own range.
///
/// # Errors
///
/// Fails if `begin > end` or `end` runs past some source's range.
pub fn make_sliced_graph(
    node: &PNode,
    begin: usize,
    end: usize,
    memo: &mut CloneMemo,
) -> Result<PNode> {
    ensure_contract!(begin <= end, "slice [{begin}, {end}) is reversed");
    clone_graph(node, memo, &|src_begin, src_end| {
        ensure_contract!(
            src_begin + end <= src_end,
            "slice [{begin}, {end}) exceeds source range [{src_begin}, {src_end})"
        );
        Ok((src_begin + begin, src_begin + end))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_rows_three_segments() {
        let parts: Vec<_> = (0..3).map(|i| segment_range(0, 7, i, 3)).collect();
        assert_eq!(parts, vec![(0, 3), (3, 6), (6, 7)]);
    }

    #[test]
    fn partitions_cover_without_gaps() {
        for n in 0..40 {
            for k in 1..12 {
                let mut next = 5;
                for i in 0..k {
                    let (b, e) = segment_range(5, 5 + n, i, k);
                    assert_eq!(b, next, "gap before segment {i} of {k} over {n} rows");
                    assert!(b <= e);
                    next = e;
                }
                assert_eq!(next, 5 + n);
            }
        }
    }

    #[test]
    fn more_segments_than_rows() {
        let parts: Vec<_> = (0..4).map(|i| segment_range(0, 2, i, 4)).collect();
        assert_eq!(parts, vec![(0, 1), (1, 2), (2, 2), (2, 2)]);
    }
}
