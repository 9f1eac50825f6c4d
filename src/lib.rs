//! # sframe-query
//!
//! A **lazy query engine** for columnar frames. Operations build a DAG of
//! planner nodes instead of computing anything; `materialize` optimizes the
//! DAG, realizes the parts that cannot stream, and executes the rest in
//! parallel row-range segments whose outputs are concatenated in order.
//!
//! ## Key Features
//!
//! - **Shared lazy DAGs** - any node may feed several consumers and several graphs
//! - **Memoized materialization** - a materialized node becomes a source in place,
//!   so every graph holding it reuses the result
//! - **Rewrite optimizer** - projection merging, projection pushdown through unions,
//!   source merging and reuse of already realized columns
//! - **Partial materialization** - barriers are realized first, streaming chains stay lazy
//! - **Segmented parallel execution** - deterministic output regardless of segment count
//! - **Slicing and length proofs** - row ranges of lazy results, equal-length checks
//!   that execute only when static reasoning is not enough
//!
//! ## Quick Start
//!
//! ```
//! use sframe_query::prelude::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let planner = Planner::with_config(QueryConfig::default())?;
//!
//! let ids = make_range(0, 1000)?;
//! let squares = make_transform(&ids, |row| {
//!     let v = row[0].as_f64().unwrap_or_default();
//!     Value::Float(v * v)
//! });
//! let both = make_union(vec![ids, squares])?;
//!
//! let table = planner.materialize(&both, &MaterializeOptions::default())?;
//! assert_eq!(table.num_rows(), 1000);
//! assert_eq!(table.num_columns(), 2);
//!
//! // The node is now a realized source.
//! assert_eq!(both.operator_type(), OperatorType::SframeSource);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Planner nodes
//!
//! A [`PNode`] is a shared handle to one vertex of the lazy DAG. Nodes are built
//! with the factory functions in [`operators`]; each carries an
//! [`OperatorType`] whose [`OperatorAttributes`] tell the planner what it may
//! assume (source, linear, sublinear, sliceable, rate-matched).
//!
//! ### Context and planner
//!
//! A [`QueryContext`] owns the re-entrant query lock, the worker pool, the
//! lazy-node threshold and the metrics. A [`Planner`] over that context exposes
//! `materialize`, `slice`, `test_equal_length` and friends.
//!
//! ### Segments
//!
//! Graphs that are parallel-sliceable are cloned once per segment with every
//! source restricted to that segment's share of its rows
//! ([`segment::make_segmented_graph`]), executed on the pool, and
//! concatenated in segment order.
//!
//! ## Errors
//!
//! Fallible functions return [`anyhow::Result`]; engine failures carry a
//! [`QueryError`] that can be recovered with `downcast_ref`.
//!
//! ## Logging
//!
//! Planning decisions are reported through [`tracing`]. No subscriber is
//! installed by the library.

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod explain;
pub mod inference;
pub mod metrics;
pub mod node;
pub mod node_id;
pub mod operators;
pub mod optimizer;
pub mod planner;
pub mod segment;
pub mod table;
pub mod testing;
pub mod value;

pub use config::{MaterializeOptions, QueryConfig, WriteCallback};
pub use context::QueryContext;
pub use error::QueryError;
pub use executor::SubplanExecutor;
pub use explain::{ExecutionExplanation, explain};
pub use node::{PNode, PlannerNode};
pub use node_id::NodeId;
pub use operators::{OperatorAttributes, OperatorType};
pub use optimizer::{OptimizationDecision, Optimizer, optimize};
pub use planner::Planner;
pub use table::{Column, ColumnBlock, Table};
pub use value::Value;

/// Everything needed to build and materialize graphs.
pub mod prelude {
    pub use crate::config::{MaterializeOptions, QueryConfig};
    pub use crate::context::QueryContext;
    pub use crate::error::QueryError;
    pub use crate::inference::{infer_column_names, infer_length, infer_num_columns};
    pub use crate::node::PNode;
    pub use crate::operators::{
        Aggregate, OperatorType, is_linear_graph, is_parallel_slicable, make_append,
        make_custom, make_generalized_transform, make_logical_filter, make_project, make_range,
        make_reduce, make_sarray_source, make_sarray_source_range, make_sframe_source,
        make_sframe_source_range, make_transform, make_union,
    };
    pub use crate::planner::Planner;
    pub use crate::table::{Column, Table};
    pub use crate::value::Value;
}
