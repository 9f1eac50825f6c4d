//! Testing utilities for planner graphs.
//!
//! - **Assertions**: compare materialized tables with expected values
//! - **Builders**: assemble tables and sequential data fluently
//! - **Fixtures**: seeded random tables and execution counters
//!
//! # Quick Start
//!
//! ```
//! use sframe_query::testing::*;
//! use sframe_query::operators::{make_sframe_source, make_transform};
//! use sframe_query::config::MaterializeOptions;
//! use sframe_query::value::Value;
//!
//! # fn main() -> anyhow::Result<()> {
//! let planner = TestPlanner::new()?;
//! let table = TableBuilder::new().int_column("x", 0..4).build()?;
//! let doubled = make_transform(&make_sframe_source(table), |row| row[0].add(&row[0]));
//!
//! let out = planner.materialize(&doubled, &MaterializeOptions::default())?;
//! assert_column_values(&out, 0, &[0, 2, 4, 6].map(Value::Integer));
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;

use crate::config::QueryConfig;
use crate::planner::Planner;
use anyhow::Result;

/// A [`Planner`] over a small private context, for tests.
///
/// Blocks are kept short so that multi-block code paths run even on tiny
/// inputs.
#[derive(Clone)]
pub struct TestPlanner {
    planner: Planner,
}

impl TestPlanner {
    /// # Errors
    ///
    /// Fails if the worker pool cannot be started.
    pub fn new() -> Result<Self> {
        Self::with_threads(4)
    }

    /// # Errors
    ///
    /// Fails if the worker pool cannot be started.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let config = QueryConfig::default()
            .with_num_threads(threads)
            .with_block_size(4);
        Ok(Self {
            planner: Planner::with_config(config)?,
        })
    }

    /// Print the explained plan of `node`.
    ///
    /// # Errors
    ///
    /// Fails on a malformed node.
    pub fn debug_print_plan(&self, node: &crate::node::PNode) -> Result<()> {
        let explanation =
            self.planner
                .explain(node, &crate::config::MaterializeOptions::default())?;
        println!("{explanation}");
        Ok(())
    }
}

impl std::ops::Deref for TestPlanner {
    type Target = Planner;

    fn deref(&self) -> &Self::Target {
        &self.planner
    }
}

impl AsRef<Planner> for TestPlanner {
    fn as_ref(&self) -> &Planner {
        &self.planner
    }
}
