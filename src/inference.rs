//! Static facts about a lazy graph, computed without executing it.
//!
//! Everything here is memoized on node identity, so shared sub-graphs are
//! visited once even when a DAG would expand to an exponentially large tree.

use crate::error::ensure_contract;
use crate::node::{PNode, keys};
use crate::node_id::NodeId;
use crate::operators::{OperatorType, is_source_node, source_range};
use crate::table::{Column, Table, default_column_name};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};

/// Number of columns `n` produces.
///
/// # Errors
///
/// Fails on a node with missing or malformed parameters.
pub fn infer_num_columns(n: &PNode) -> Result<usize> {
    fn walk(n: &PNode, memo: &mut HashMap<NodeId, usize>) -> Result<usize> {
        if let Some(&c) = memo.get(&n.id()) {
            return Ok(c);
        }
        let c = match n.operator_type() {
            OperatorType::SframeSource => n.require_any::<Table>(keys::TABLE)?.num_columns(),
            OperatorType::SarraySource | OperatorType::Range | OperatorType::Transform => 1,
            OperatorType::Project => n.param_indices(keys::INDICES)?.len(),
            OperatorType::Union => {
                let mut total = 0;
                for input in n.inputs() {
                    total += walk(&input, memo)?;
                }
                total
            }
            OperatorType::GeneralizedTransform | OperatorType::Custom => {
                n.param_usize(keys::NUM_OUTPUTS)?
            }
            OperatorType::LogicalFilter | OperatorType::Append | OperatorType::Reduce => {
                ensure_contract!(n.num_inputs() > 0, "{} node has no inputs", n.operator_type());
                walk(&n.input(0), memo)?
            }
        };
        memo.insert(n.id(), c);
        Ok(c)
    }
    walk(n, &mut HashMap::new())
}

/// Number of rows `n` produces, if it can be known without execution.
///
/// `None` plays the role of the "unknown length" sentinel.
#[must_use]
pub fn infer_length(n: &PNode) -> Option<usize> {
    fn walk(n: &PNode, memo: &mut HashMap<NodeId, Option<usize>>) -> Option<usize> {
        if let Some(&l) = memo.get(&n.id()) {
            return l;
        }
        let l = match n.operator_type() {
            OperatorType::SframeSource | OperatorType::SarraySource | OperatorType::Range => {
                source_range(n).ok().map(|(b, e)| e - b)
            }
            OperatorType::Project
            | OperatorType::Transform
            | OperatorType::GeneralizedTransform => n.inputs().first().and_then(|i| walk(i, memo)),
            OperatorType::Union => n.inputs().iter().find_map(|i| walk(i, memo)),
            OperatorType::LogicalFilter => {
                let inputs = n.inputs();
                let empty = inputs.iter().any(|i| walk(i, memo) == Some(0));
                empty.then_some(0)
            }
            OperatorType::Append => {
                let inputs = n.inputs();
                let mut total = Some(0usize);
                for i in &inputs {
                    total = match (total, walk(i, memo)) {
                        (Some(t), Some(l)) => Some(t + l),
                        _ => None,
                    };
                }
                total
            }
            OperatorType::Reduce => Some(1),
            OperatorType::Custom => None,
        };
        memo.insert(n.id(), l);
        l
    }
    walk(n, &mut HashMap::new())
}

/// Output column names of `n`.
///
/// Sources keep their table's names; freshly computed columns are named
/// `X1..Xn`.
///
/// # Errors
///
/// Fails on a node with missing or malformed parameters.
pub fn infer_column_names(n: &PNode) -> Result<Vec<String>> {
    fn walk(n: &PNode, memo: &mut HashMap<NodeId, Vec<String>>) -> Result<Vec<String>> {
        if let Some(names) = memo.get(&n.id()) {
            return Ok(names.clone());
        }
        let names = match n.operator_type() {
            OperatorType::SframeSource => {
                n.require_any::<Table>(keys::TABLE)?.column_names().to_vec()
            }
            OperatorType::SarraySource
            | OperatorType::Range
            | OperatorType::Transform
            | OperatorType::GeneralizedTransform
            | OperatorType::Custom => (0..infer_num_columns(n)?).map(default_column_name).collect(),
            OperatorType::Project => {
                let inputs = n.inputs();
                ensure_contract!(inputs.len() == 1, "project node needs one input");
                let names = walk(&inputs[0], memo)?;
                let mut out = Vec::new();
                for i in n.param_indices(keys::INDICES)? {
                    ensure_contract!(i < names.len(), "projection index {i} out of range");
                    out.push(names[i].clone());
                }
                out
            }
            OperatorType::Union => {
                let mut names = Vec::new();
                for input in n.inputs() {
                    names.extend(walk(&input, memo)?);
                }
                names
            }
            OperatorType::LogicalFilter | OperatorType::Append | OperatorType::Reduce => {
                ensure_contract!(n.num_inputs() > 0, "{} node has no inputs", n.operator_type());
                walk(&n.input(0), memo)?
            }
        };
        memo.insert(n.id(), names.clone());
        Ok(names)
    }
    walk(n, &mut HashMap::new())
}

/// What a node's row count is tied to, for length proofs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum LengthKey {
    /// Same length as this node.
    Node(NodeId),
    /// Same length as any filter driven by this mask node.
    FilteredBy(NodeId),
}

fn length_keys(n: &PNode, memo: &mut HashMap<NodeId, BTreeSet<LengthKey>>) -> BTreeSet<LengthKey> {
    if let Some(k) = memo.get(&n.id()) {
        return k.clone();
    }
    let mut out = BTreeSet::new();
    out.insert(LengthKey::Node(n.id()));
    match n.operator_type() {
        OperatorType::Project | OperatorType::Transform | OperatorType::GeneralizedTransform => {
            if let Some(i) = n.inputs().first() {
                out.extend(length_keys(i, memo));
            }
        }
        // All union inputs have the union's length.
        OperatorType::Union => {
            for i in n.inputs() {
                out.extend(length_keys(&i, memo));
            }
        }
        OperatorType::LogicalFilter if n.num_inputs() == 2 => {
            out.insert(LengthKey::FilteredBy(n.input(1).id()));
        }
        _ => {}
    }
    memo.insert(n.id(), out.clone());
    out
}

/// Try to prove, without executing anything, that `a` and `b` produce the same
/// number of rows.
///
/// Succeeds if both lengths are statically known and equal, or if both are
/// derived through row-preserving operators from a common length-determining
/// node (the same filter, the same mask, the same barrier).
#[must_use]
pub fn prove_equal_length(a: &PNode, b: &PNode) -> bool {
    if let (Some(la), Some(lb)) = (infer_length(a), infer_length(b)) {
        return la == lb;
    }
    let mut memo = HashMap::new();
    let ka = length_keys(a, &mut memo);
    let kb = length_keys(b, &mut memo);
    !ka.is_disjoint(&kb)
}

/// Size of the graph rooted at `n` when expanded as a tree, saturating at
/// `usize::MAX`.
///
/// Computed in time linear in the number of distinct nodes. Graphs that reuse
/// sub-results heavily grow this number much faster than their node count,
/// which is exactly the growth the lazy-node threshold guards against.
#[must_use]
pub fn infer_num_dependency_nodes(n: &PNode) -> usize {
    fn walk(n: &PNode, memo: &mut HashMap<NodeId, usize>) -> usize {
        if let Some(&c) = memo.get(&n.id()) {
            return c;
        }
        let c = n
            .inputs()
            .iter()
            .fold(1usize, |acc, i| acc.saturating_add(walk(i, memo)));
        memo.insert(n.id(), c);
        c
    }
    walk(n, &mut HashMap::new())
}

/// The realized column behind output column `i` of a full-range source, if any.
pub(crate) fn full_source_column(n: &PNode, i: usize) -> Option<Column> {
    if !is_source_node(n) {
        return None;
    }
    let (begin, end) = source_range(n).ok()?;
    match n.operator_type() {
        OperatorType::SframeSource => {
            let table = n.any_param::<Table>(keys::TABLE)?;
            if begin != 0 || end != table.num_rows() {
                return None;
            }
            table.select_column(i).ok()
        }
        OperatorType::SarraySource => {
            let column = n.any_param::<Column>(keys::COLUMN)?;
            (begin == 0 && end == column.size() && i == 0).then(|| Column::clone(&column))
        }
        _ => None,
    }
}
