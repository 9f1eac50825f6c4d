//! Operator attribute registry.
//!
//! Each [`OperatorType`] maps to a small set of capability flags. The planner's
//! safety reasoning (can this run lazily, can it be split into segments, can it
//! be sliced by source range) is derived from these flags and nothing else.
//!
//! Operators the planner knows nothing about ([`OperatorType::Custom`]) carry
//! no flags at all. That is the most conservative reading: not a source, not
//! linear, inputs not rate-matched, never sliced. An unknown operator can only
//! cause more eager materialization, never a wrong parallel split.

use super::OperatorType;
use crate::node::{PNode, PlannerNode};
use crate::node_id::NodeId;
use std::collections::HashMap;
use std::ops::BitOr;

/// Bitfield of operator capabilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OperatorAttributes(u8);

impl OperatorAttributes {
    pub const NONE: Self = Self(0);
    /// No inputs; produces data directly.
    pub const SOURCE: Self = Self(1);
    /// Row-local: output row `i` depends only on input row `i`.
    pub const LINEAR: Self = Self(1 << 1);
    /// Streaming and row-reducing, e.g. a filter.
    pub const SUBLINEAR: Self = Self(1 << 2);
    /// A source whose row range can be restricted without reading other rows.
    pub const SLICEABLE: Self = Self(1 << 3);
    /// All inputs are advanced together by one row cursor.
    pub const RATE_MATCHED: Self = Self(1 << 4);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Names of the set flags, for plan explanations.
    #[must_use]
    pub fn flag_names(self) -> Vec<&'static str> {
        [
            (Self::SOURCE, "SOURCE"),
            (Self::LINEAR, "LINEAR"),
            (Self::SUBLINEAR, "SUBLINEAR"),
            (Self::SLICEABLE, "SLICEABLE"),
            (Self::RATE_MATCHED, "RATE_MATCHED"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl BitOr for OperatorAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

pub(crate) const fn attributes_of(op: OperatorType) -> OperatorAttributes {
    use OperatorAttributes as A;
    match op {
        OperatorType::SframeSource | OperatorType::SarraySource | OperatorType::Range => {
            A::SOURCE.union(A::SLICEABLE)
        }
        OperatorType::Project
        | OperatorType::Union
        | OperatorType::Transform
        | OperatorType::GeneralizedTransform => A::LINEAR.union(A::RATE_MATCHED),
        OperatorType::LogicalFilter => A::SUBLINEAR.union(A::RATE_MATCHED),
        OperatorType::Reduce => A::RATE_MATCHED,
        OperatorType::Append | OperatorType::Custom => A::NONE,
    }
}

fn flags(n: &PlannerNode) -> OperatorAttributes {
    n.operator_type().attributes()
}

#[must_use]
pub fn is_source_node(n: &PlannerNode) -> bool {
    flags(n).contains(OperatorAttributes::SOURCE)
}

#[must_use]
pub fn is_linear_transform(n: &PlannerNode) -> bool {
    flags(n).contains(OperatorAttributes::LINEAR)
}

#[must_use]
pub fn is_sublinear_transform(n: &PlannerNode) -> bool {
    flags(n).contains(OperatorAttributes::SUBLINEAR)
}

/// True if every input of `n` is iterated in lock-step. Trivially true for
/// nodes with at most one input.
#[must_use]
pub fn consumes_inputs_at_same_rates(n: &PlannerNode) -> bool {
    n.num_inputs() <= 1 || flags(n).contains(OperatorAttributes::RATE_MATCHED)
}

/// True if some node reachable from `n` (inclusive) is sublinear.
#[must_use]
pub fn contains_sublinear(n: &PNode) -> bool {
    fn walk(n: &PNode, memo: &mut HashMap<NodeId, bool>) -> bool {
        if let Some(&r) = memo.get(&n.id()) {
            return r;
        }
        let r = is_sublinear_transform(n) || n.inputs().iter().any(|i| walk(i, memo));
        memo.insert(n.id(), r);
        r
    }
    walk(n, &mut HashMap::new())
}

/// True if the graph rooted at `n` can be cut into independent row-range
/// segments whose outputs, concatenated in order, equal the unsegmented output.
///
/// Requires every reachable source to be sliceable, every other node to be a
/// rate-matched linear or sublinear transform, and no multi-input node to sit
/// above a sublinear node (its inputs' segment boundaries would drift apart).
#[must_use]
pub fn is_parallel_slicable(n: &PNode) -> bool {
    fn walk(n: &PNode, memo: &mut HashMap<NodeId, bool>) -> bool {
        if let Some(&r) = memo.get(&n.id()) {
            return r;
        }
        let f = flags(n);
        let inputs = n.inputs();
        let r = if f.contains(OperatorAttributes::SOURCE) {
            f.contains(OperatorAttributes::SLICEABLE)
        } else if (f.contains(OperatorAttributes::LINEAR)
            || f.contains(OperatorAttributes::SUBLINEAR))
            && consumes_inputs_at_same_rates(n)
            && !inputs.is_empty()
        {
            inputs.iter().all(|i| walk(i, memo))
                && (inputs.len() == 1 || !inputs.iter().any(contains_sublinear))
        } else {
            false
        };
        memo.insert(n.id(), r);
        r
    }
    walk(n, &mut HashMap::new())
}

/// True if the graph rooted at `n` is a simple path: single-input linear
/// transforms all the way down to one sliceable source. Only such a graph can
/// be sliced by restricting its source's row range.
#[must_use]
pub fn is_linear_graph(n: &PNode) -> bool {
    let mut cur = PNode::clone(n);
    loop {
        let f = flags(&cur);
        if f.contains(OperatorAttributes::SOURCE) {
            return f.contains(OperatorAttributes::SLICEABLE);
        }
        if !f.contains(OperatorAttributes::LINEAR) || cur.num_inputs() != 1 {
            return false;
        }
        cur = cur.input(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_operators_get_no_capabilities() {
        assert_eq!(OperatorType::Custom.attributes(), OperatorAttributes::NONE);
        assert!(OperatorType::Custom.attributes().flag_names().is_empty());
    }

    #[test]
    fn sources_are_sliceable() {
        for op in [
            OperatorType::SframeSource,
            OperatorType::SarraySource,
            OperatorType::Range,
        ] {
            let f = op.attributes();
            assert!(f.contains(OperatorAttributes::SOURCE));
            assert!(f.contains(OperatorAttributes::SLICEABLE));
            assert!(!f.contains(OperatorAttributes::LINEAR));
        }
    }

    #[test]
    fn append_is_not_rate_matched() {
        let f = OperatorType::Append.attributes();
        assert!(!f.contains(OperatorAttributes::RATE_MATCHED));
        assert!(OperatorType::Union
            .attributes()
            .contains(OperatorAttributes::RATE_MATCHED | OperatorAttributes::LINEAR));
    }
}
