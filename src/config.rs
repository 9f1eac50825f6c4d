//! Engine-wide tunables and per-call materialization options.

use crate::error::QueryError;
use crate::table::ColumnBlock;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Environment variable for [`QueryConfig::max_lazy_node_size`].
pub const ENV_MAX_LAZY_NODE_SIZE: &str = "SFRAME_MAX_LAZY_NODE_SIZE";
/// Environment variable for [`QueryConfig::num_threads`].
pub const ENV_NUM_THREADS: &str = "SFRAME_QUERY_NUM_THREADS";
/// Environment variable for [`QueryConfig::block_size`].
pub const ENV_BLOCK_SIZE: &str = "SFRAME_QUERY_BLOCK_SIZE";

/// Configuration fixed when a [`QueryContext`](crate::context::QueryContext)
/// is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Dependency-node count at which eager materialization is recommended.
    pub max_lazy_node_size: usize,
    /// Worker threads for segment execution; `None` means one per CPU.
    pub num_threads: Option<usize>,
    /// Rows per block streamed between operators.
    pub block_size: usize,
    /// Upper bound on optimizer passes before the fixed point is declared.
    pub max_optimizer_passes: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_lazy_node_size: 10_000,
            num_threads: None,
            block_size: 1024,
            max_optimizer_passes: 32,
        }
    }
}

fn env_var<T: FromStr>(name: &'static str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => {
            let parsed = raw.trim().parse::<T>().map_err(|_| {
                QueryError::contract(format!("{name}={raw:?} is not a valid value"))
            })?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

impl QueryConfig {
    /// Defaults overridden by `SFRAME_MAX_LAZY_NODE_SIZE`,
    /// `SFRAME_QUERY_NUM_THREADS` and `SFRAME_QUERY_BLOCK_SIZE` when set.
    ///
    /// # Errors
    ///
    /// Fails, naming the variable, if a set variable does not parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_var(ENV_MAX_LAZY_NODE_SIZE)? {
            config.max_lazy_node_size = v;
        }
        if let Some(v) = env_var::<usize>(ENV_NUM_THREADS)? {
            config.num_threads = (v > 0).then_some(v);
        }
        if let Some(v) = env_var::<usize>(ENV_BLOCK_SIZE)? {
            config.block_size = v.max(1);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n.max(1));
        self
    }

    #[must_use]
    pub fn with_block_size(mut self, n: usize) -> Self {
        self.block_size = n.max(1);
        self
    }

    #[must_use]
    pub fn with_max_lazy_node_size(mut self, n: usize) -> Self {
        self.max_lazy_node_size = n;
        self
    }
}

/// Streaming sink for materialized output.
///
/// Called with the segment index and each produced block, in row order within
/// a segment. Returning `true` stops that segment early.
pub type WriteCallback = Arc<dyn Fn(usize, &ColumnBlock) -> bool + Send + Sync>;

/// Options for one `materialize` call.
#[derive(Clone)]
pub struct MaterializeOptions {
    /// Parallel segments; `0` means one per worker thread.
    pub num_segments: usize,
    pub disable_optimization: bool,
    /// Realize barrier sub-graphs before the final pass.
    pub partial_materialize: bool,
    /// Use the conservative recursive strategy instead of the general one.
    pub naive_mode: bool,
    /// Also persist the result here. Rejected together with a write callback.
    pub output_index_file: Option<PathBuf>,
    /// Rename the result; the count must equal the output column count.
    pub output_column_names: Option<Vec<String>>,
    /// Stream output here instead of returning it.
    pub write_callback: Option<WriteCallback>,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            num_segments: 0,
            disable_optimization: false,
            partial_materialize: true,
            naive_mode: false,
            output_index_file: None,
            output_column_names: None,
            write_callback: None,
        }
    }
}

impl Debug for MaterializeOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("MaterializeOptions")
            .field("num_segments", &self.num_segments)
            .field("disable_optimization", &self.disable_optimization)
            .field("partial_materialize", &self.partial_materialize)
            .field("naive_mode", &self.naive_mode)
            .field("output_index_file", &self.output_index_file)
            .field("output_column_names", &self.output_column_names)
            .field("write_callback", &self.write_callback.is_some())
            .finish()
    }
}

impl MaterializeOptions {
    #[must_use]
    pub fn with_num_segments(mut self, n: usize) -> Self {
        self.num_segments = n;
        self
    }

    #[must_use]
    pub fn with_optimization(mut self, enabled: bool) -> Self {
        self.disable_optimization = !enabled;
        self
    }

    #[must_use]
    pub fn with_partial_materialize(mut self, enabled: bool) -> Self {
        self.partial_materialize = enabled;
        self
    }

    #[must_use]
    pub fn with_naive_mode(mut self, enabled: bool) -> Self {
        self.naive_mode = enabled;
        self
    }

    #[must_use]
    pub fn with_output_index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_index_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_output_column_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.output_column_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_write_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &ColumnBlock) -> bool + Send + Sync + 'static,
    {
        self.write_callback = Some(Arc::new(f));
        self
    }

    /// Options for realizing an intermediate sub-graph: same strategy, but no
    /// output file, no renaming and no sink.
    #[must_use]
    pub(crate) fn for_subgraph(&self) -> Self {
        Self {
            output_index_file: None,
            output_column_names: None,
            write_callback: None,
            ..self.clone()
        }
    }
}
