//! Execution counters for the query engine.
//!
//! Every [`QueryContext`](crate::context::QueryContext) owns one
//! [`QueryMetrics`]. The planner and executor bump its counters as they work;
//! callers read them back through [`QueryMetrics::snapshot`] and can print or
//! persist the result as JSON.
//!
//! ```
//! use sframe_query::context::QueryContext;
//! use sframe_query::config::QueryConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = QueryContext::new(QueryConfig::default())?;
//! let snapshot = ctx.metrics().snapshot();
//! assert_eq!(snapshot.materialize_calls, 0);
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which materialization shortcut fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastPath {
    /// Whole-table source returned as is.
    TableSource,
    /// Whole-column source returned as is.
    ColumnSource,
    /// Union with directly reusable source columns.
    DirectSourceMapping,
}

/// Thread-safe counters, updated while materializing.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    materialize_calls: AtomicU64,
    optimizer_rewrites: AtomicU64,
    partial_materializations: AtomicU64,
    fast_path_table: AtomicU64,
    fast_path_column: AtomicU64,
    fast_path_direct_mapping: AtomicU64,
    segments_executed: AtomicU64,
    rows_produced: AtomicU64,
    realized_nodes: AtomicU64,
}

/// Point-in-time copy of [`QueryMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub materialize_calls: u64,
    pub optimizer_rewrites: u64,
    pub partial_materializations: u64,
    pub fast_path_table: u64,
    pub fast_path_column: u64,
    pub fast_path_direct_mapping: u64,
    pub segments_executed: u64,
    pub rows_produced: u64,
    pub realized_nodes: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl QueryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_materialize(&self) {
        bump(&self.materialize_calls, 1);
    }

    pub(crate) fn record_rewrites(&self, n: usize) {
        bump(&self.optimizer_rewrites, n as u64);
    }

    pub(crate) fn record_partial_materialization(&self) {
        bump(&self.partial_materializations, 1);
    }

    pub(crate) fn record_fast_path(&self, path: FastPath) {
        let counter = match path {
            FastPath::TableSource => &self.fast_path_table,
            FastPath::ColumnSource => &self.fast_path_column,
            FastPath::DirectSourceMapping => &self.fast_path_direct_mapping,
        };
        bump(counter, 1);
    }

    pub(crate) fn record_segments(&self, n: usize) {
        bump(&self.segments_executed, n as u64);
    }

    pub(crate) fn record_rows(&self, n: usize) {
        bump(&self.rows_produced, n as u64);
    }

    pub(crate) fn record_realization(&self) {
        bump(&self.realized_nodes, 1);
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            materialize_calls: get(&self.materialize_calls),
            optimizer_rewrites: get(&self.optimizer_rewrites),
            partial_materializations: get(&self.partial_materializations),
            fast_path_table: get(&self.fast_path_table),
            fast_path_column: get(&self.fast_path_column),
            fast_path_direct_mapping: get(&self.fast_path_direct_mapping),
            segments_executed: get(&self.segments_executed),
            rows_produced: get(&self.rows_produced),
            realized_nodes: get(&self.realized_nodes),
        }
    }

    /// All counters as a JSON object keyed by counter name.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!(self.snapshot())
    }

    /// Print the counters to stdout, sorted by name.
    pub fn print(&self) {
        println!("\n========== Query Metrics ==========");
        if let Value::Object(map) = self.to_json() {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, value) in entries {
                println!("{name}: {value}");
            }
        }
        println!("===================================\n");
    }

    /// Write the counters as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}
