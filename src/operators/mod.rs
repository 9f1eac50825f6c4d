//! Operator catalog.
//!
//! Every planner node is tagged with an [`OperatorType`]. The tag decides how
//! the executor runs the node and, through [`attributes`], what the planner
//! may assume about it. Nodes are built with the factory functions re-exported
//! here; they validate parameters up front so that execution never has to.

pub mod attributes;
mod barriers;
mod sources;
mod transforms;

pub use attributes::{
    OperatorAttributes, consumes_inputs_at_same_rates, contains_sublinear, is_linear_graph,
    is_linear_transform, is_parallel_slicable, is_source_node, is_sublinear_transform,
};
pub use barriers::{Aggregate, CustomFn, make_append, make_custom, make_reduce};
pub(crate) use sources::sframe_source_state;
pub use sources::{
    make_range, make_sarray_source, make_sarray_source_range, make_sframe_source,
    make_sframe_source_range, source_range,
};
pub use transforms::{
    GeneralizedTransformFn, TransformFn, make_generalized_transform, make_logical_filter,
    make_project, make_transform, make_union,
};

use std::fmt::{Display, Formatter, Result as FormatResult};

/// Which operator a planner node represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperatorType {
    /// Rows `[begin, end)` of a realized table.
    SframeSource,
    /// Rows `[begin, end)` of a single realized column.
    SarraySource,
    /// The integers `begin..end` as one column.
    Range,
    /// Select, reorder or duplicate columns.
    Project,
    /// Column-wise concatenation of equal-length inputs.
    Union,
    /// One output value per row.
    Transform,
    /// A fixed number of output values per row.
    GeneralizedTransform,
    /// Keep data rows whose mask value is truthy.
    LogicalFilter,
    /// Row-wise concatenation.
    Append,
    /// Whole-column aggregation to one row.
    Reduce,
    /// Caller-defined whole-table operator.
    Custom,
}

impl OperatorType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SframeSource => "sframe_source",
            Self::SarraySource => "sarray_source",
            Self::Range => "range",
            Self::Project => "project",
            Self::Union => "union",
            Self::Transform => "transform",
            Self::GeneralizedTransform => "generalized_transform",
            Self::LogicalFilter => "logical_filter",
            Self::Append => "append",
            Self::Reduce => "reduce",
            Self::Custom => "custom",
        }
    }

    /// Capability flags of this operator.
    #[must_use]
    pub const fn attributes(self) -> OperatorAttributes {
        attributes::attributes_of(self)
    }
}

impl Display for OperatorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(self.name())
    }
}
