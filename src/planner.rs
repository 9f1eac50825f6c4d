//! Materialization planner.
//!
//! [`Planner`] is the entry point for turning lazy graphs into tables. One
//! `materialize` call:
//!
//! 1. takes the context's re-entrant query lock for its whole duration,
//! 2. resolves `num_segments == 0` to the worker count,
//! 3. optimizes the graph (unless disabled),
//! 4. realizes barrier sub-graphs first (unless partial materialization is
//!    off), either with the general strategy or the naive one,
//! 5. executes the result, short-circuiting realized sources and reusing
//!    directly mapped union columns, otherwise splitting parallel-sliceable
//!    graphs into segments,
//! 6. overwrites the node passed in with a source over its result, so every
//!    graph holding that node sees the realized data from then on.
//!
//! Only step 6 mutates a node, and only the one the caller passed in. Barrier
//! sub-graphs realized in step 4 and the full materialization `slice` may
//! need are executed into fresh source nodes.
//!
//! `slice`, `test_equal_length` and partial materialization run nested
//! materializations while the lock is held; the lock is re-entrant for that.

use crate::config::{MaterializeOptions, QueryConfig};
use crate::context::QueryContext;
use crate::error::{QueryError, ensure_contract};
use crate::executor::{SubplanExecutor, check_sinks, finalize};
use crate::explain::{ExecutionExplanation, explain};
use crate::inference::{
    infer_column_names, infer_length, infer_num_columns, infer_num_dependency_nodes,
    prove_equal_length,
};
use crate::metrics::FastPath;
use crate::node::{PNode, keys};
use crate::node_id::NodeId;
use crate::operators::{
    OperatorType, consumes_inputs_at_same_rates, is_linear_graph, is_linear_transform,
    is_parallel_slicable, is_source_node, is_sublinear_transform, make_project,
    make_sframe_source, source_range,
};
use crate::optimizer::{DirectSourceMapping, Optimizer};
use crate::segment::{CloneMemo, make_segmented_graph, make_sliced_graph};
use crate::table::{Column, Table, default_column_name};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Facade over optimization, partial materialization and execution.
#[derive(Clone)]
pub struct Planner {
    ctx: Arc<QueryContext>,
}

impl Planner {
    #[must_use]
    pub fn new(ctx: Arc<QueryContext>) -> Self {
        Self { ctx }
    }

    /// A planner over a fresh context.
    ///
    /// # Errors
    ///
    /// Fails if the worker pool cannot be started.
    pub fn with_config(config: QueryConfig) -> Result<Self> {
        Ok(Self::new(QueryContext::new(config)?))
    }

    #[must_use]
    pub fn context(&self) -> &Arc<QueryContext> {
        &self.ctx
    }

    fn optimizer(&self) -> Optimizer {
        Optimizer::from_config(self.ctx.config())
    }

    /// Run the optimizer as `materialize` would.
    ///
    /// # Errors
    ///
    /// Fails on a malformed node.
    pub fn optimize(&self, node: &PNode, options: &MaterializeOptions) -> Result<PNode> {
        if options.disable_optimization {
            return Ok(PNode::clone(node));
        }
        let _guard = self.ctx.lock();
        let optimized = self.optimizer().optimize_tracked(node)?;
        self.ctx
            .metrics()
            .record_rewrites(optimized.decisions.len());
        Ok(optimized.node)
    }

    /// Explain the graph `materialize` would execute before partial
    /// materialization, including the optimizer's decisions.
    ///
    /// # Errors
    ///
    /// Fails on a malformed node.
    pub fn explain(&self, node: &PNode, options: &MaterializeOptions) -> Result<ExecutionExplanation> {
        let _guard = self.ctx.lock();
        if options.disable_optimization {
            return explain(node);
        }
        let optimized = self.optimizer().optimize_tracked(node)?;
        let mut explanation = explain(&optimized.node)?;
        explanation.optimizations = optimized.decisions;
        Ok(explanation)
    }

    /// Execute `node` and return its result.
    ///
    /// Unless a write callback is set, `node` itself is then overwritten with
    /// a source over the result (under its own column names, not
    /// `output_column_names`). Sub-graphs realized along the way go into
    /// fresh source nodes; no other node is changed.
    ///
    /// # Errors
    ///
    /// Contract violations in the graph, a wrong output-name count, a write
    /// callback combined with an output index file, failing custom operators
    /// and I/O failures. Nothing is memoized on error.
    pub fn materialize(&self, node: &PNode, options: &MaterializeOptions) -> Result<Table> {
        let _guard = self.ctx.lock();
        check_sinks(options)?;
        let names = infer_column_names(node)?;

        let table = self.compute(node, options)?;

        if options.write_callback.is_none() {
            let mut realized = table.clone();
            realized.rename_all(&names)?;
            node.realize(realized);
            self.ctx.metrics().record_realization();
            trace!(node = node.id().raw(), rows = table.num_rows(), "realized in place");
        }
        Ok(table)
    }

    /// Everything `materialize` does except the in-place overwrite. The
    /// caller holds the query lock.
    fn compute(&self, node: &PNode, options: &MaterializeOptions) -> Result<Table> {
        self.ctx.metrics().record_materialize();

        let mut options = options.clone();
        if options.num_segments == 0 {
            options.num_segments = self.ctx.num_threads();
        }

        let mut working = self.optimize(node, &options)?;
        if options.partial_materialize {
            working = if options.naive_mode {
                self.naive_partial_materialize(&working, &options)?
            } else {
                self.partial_materialize_with(&working, &options, &mut HashMap::new())?
            };
            working = self.optimize(&working, &options)?;
        }

        self.execute_node(&working, &options)
    }

    /// Materialize, then wrap the result in a fresh source node.
    ///
    /// # Errors
    ///
    /// As [`Planner::materialize`].
    pub fn materialize_as_planner_node(
        &self,
        node: &PNode,
        options: &MaterializeOptions,
    ) -> Result<PNode> {
        Ok(make_sframe_source(self.materialize(node, options)?))
    }

    /// True once the graph under `node` has grown past the lazy-node
    /// threshold and should be materialized eagerly.
    #[must_use]
    pub fn online_materialization_recommended(&self, node: &PNode) -> bool {
        infer_num_dependency_nodes(node) >= self.ctx.max_lazy_node_size()
    }

    /// A node producing rows `[begin, end)` of `node`'s result.
    ///
    /// Graphs that are not a simple path down to one source are partially
    /// materialized first, and fully materialized if that is not enough.
    ///
    /// # Errors
    ///
    /// Fails if `begin > end` or `end` exceeds the result length.
    pub fn slice(&self, node: &PNode, begin: usize, end: usize) -> Result<PNode> {
        let _guard = self.ctx.lock();
        ensure_contract!(begin <= end, "slice [{begin}, {end}) is reversed");

        let defaults = MaterializeOptions::default();
        let mut working = PNode::clone(node);
        if !is_linear_graph(&working) {
            working = self.partial_materialize(&working, &defaults)?;
        }
        if !is_linear_graph(&working) {
            debug!(node = node.id().raw(), "slicing needs a full materialization");
            working = make_sframe_source(self.compute(&working, &defaults)?);
        }
        ensure_contract!(
            is_linear_graph(&working),
            "graph could not be linearized for slicing"
        );
        if let Some(len) = infer_length(&working) {
            ensure_contract!(
                end <= len,
                "slice [{begin}, {end}) exceeds a result of {len} rows"
            );
        }
        make_sliced_graph(&working, begin, end, &mut CloneMemo::new())
    }

    /// Whether `a` and `b` produce the same number of rows.
    ///
    /// Static proof is tried first. Only when that fails and a length is
    /// unknown is the unknown side materialized, right side first.
    ///
    /// # Errors
    ///
    /// Errors from materializing either side.
    pub fn test_equal_length(&self, a: &PNode, b: &PNode) -> Result<bool> {
        let _guard = self.ctx.lock();
        if prove_equal_length(a, b) {
            return Ok(true);
        }
        if let (Some(la), Some(lb)) = (infer_length(a), infer_length(b)) {
            return Ok(la == lb);
        }
        let defaults = MaterializeOptions::default();
        if infer_length(b).is_none() {
            debug!(node = b.id().raw(), "materializing right side to compare lengths");
            self.materialize(b, &defaults)?;
            if prove_equal_length(a, b) {
                return Ok(true);
            }
        }
        if infer_length(a).is_none() {
            debug!(node = a.id().raw(), "materializing left side to compare lengths");
            self.materialize(a, &defaults)?;
        }
        match (infer_length(a), infer_length(b)) {
            (Some(la), Some(lb)) => Ok(la == lb),
            _ => Err(QueryError::contract("length unknown after materialization").into()),
        }
    }

    /// Realize every barrier sub-graph of `node`, leaving streaming parts
    /// lazy. Returns the rewritten graph; `node` itself is not changed.
    ///
    /// # Errors
    ///
    /// Errors from materializing a barrier.
    pub fn partial_materialize(&self, node: &PNode, options: &MaterializeOptions) -> Result<PNode> {
        let _guard = self.ctx.lock();
        self.partial_materialize_with(node, options, &mut HashMap::new())
    }

    fn realize_subgraph(&self, node: &PNode, options: &MaterializeOptions) -> Result<PNode> {
        let sub = options.for_subgraph().with_partial_materialize(false);
        let table = self.compute(node, &sub)?;
        self.ctx.metrics().record_partial_materialization();
        Ok(make_sframe_source(table))
    }

    fn partial_materialize_with(
        &self,
        node: &PNode,
        options: &MaterializeOptions,
        memo: &mut HashMap<NodeId, PNode>,
    ) -> Result<PNode> {
        if let Some(done) = memo.get(&node.id()) {
            return Ok(PNode::clone(done));
        }
        let result = if is_source_node(node) {
            PNode::clone(node)
        } else if !consumes_inputs_at_same_rates(node) {
            // Inputs read at independent rates are each realized on their
            // own; the node itself stays lazy over the realized sources.
            let mut inputs = Vec::new();
            for input in node.inputs() {
                inputs.push(if is_source_node(&input) {
                    input
                } else {
                    let lazy = self.partial_materialize_with(&input, options, memo)?;
                    self.realize_subgraph(&lazy, options)?
                });
            }
            node.with_inputs(inputs)
        } else {
            let inputs = node.inputs();
            let mut rewritten = Vec::with_capacity(inputs.len());
            let mut changed = false;
            for input in &inputs {
                let r = self.partial_materialize_with(input, options, memo)?;
                changed |= r.id() != input.id();
                rewritten.push(r);
            }
            let tip = if changed {
                node.with_inputs(rewritten)
            } else {
                PNode::clone(node)
            };
            if is_linear_transform(node) || is_sublinear_transform(node) {
                tip
            } else {
                debug!(
                    node = node.id().raw(),
                    operator = %node.operator_type(),
                    "realizing barrier"
                );
                self.realize_subgraph(&tip, options)?
            }
        };
        memo.insert(node.id(), PNode::clone(&result));
        Ok(result)
    }

    /// Realize every non-source input of `node` recursively, each in naive
    /// mode itself. Slower than the general strategy; used as a reference.
    fn naive_partial_materialize(&self, node: &PNode, options: &MaterializeOptions) -> Result<PNode> {
        if is_source_node(node) {
            return Ok(PNode::clone(node));
        }
        let sub = options.for_subgraph().with_naive_mode(true);
        let inputs = node.inputs();
        let mut realized = Vec::with_capacity(inputs.len());
        let mut changed = false;
        for input in inputs {
            if is_source_node(&input) {
                realized.push(input);
            } else {
                let table = self.compute(&input, &sub)?;
                self.ctx.metrics().record_partial_materialization();
                realized.push(make_sframe_source(table));
                changed = true;
            }
        }
        Ok(if changed {
            node.with_inputs(realized)
        } else {
            PNode::clone(node)
        })
    }

    fn execute_node(&self, node: &PNode, options: &MaterializeOptions) -> Result<Table> {
        if options.write_callback.is_none() {
            if let Some(table) = self.try_fast_path(node, options)? {
                return Ok(table);
            }
        }
        let executor = SubplanExecutor::new(&self.ctx);
        let k = options.num_segments;
        if k > 0 && is_parallel_slicable(node) {
            let segments = (0..k)
                .map(|i| make_segmented_graph(node, i, k, &mut CloneMemo::new()))
                .collect::<Result<Vec<_>>>()?;
            debug!(segments = k, "parallel execution");
            executor.run_concat(&segments, options)
        } else {
            debug!(node = node.id().raw(), "single pass execution");
            executor.run(node, options)
        }
    }

    fn try_fast_path(&self, node: &PNode, options: &MaterializeOptions) -> Result<Option<Table>> {
        let metrics = self.ctx.metrics();
        match node.operator_type() {
            OperatorType::SframeSource => {
                let table = node.require_any::<Table>(keys::TABLE)?;
                let (begin, end) = source_range(node)?;
                if begin != 0 || end != table.num_rows() {
                    return Ok(None);
                }
                metrics.record_fast_path(FastPath::TableSource);
                trace!("whole table source returned directly");
                Ok(Some(finalize(Table::clone(&table), options)?))
            }
            OperatorType::SarraySource => {
                let column = node.require_any::<Column>(keys::COLUMN)?;
                let (begin, end) = source_range(node)?;
                if begin != 0 || end != column.size() {
                    return Ok(None);
                }
                metrics.record_fast_path(FastPath::ColumnSource);
                trace!("whole column source returned directly");
                let table = Table::new(vec![default_column_name(0)], vec![Column::clone(&column)])?;
                Ok(Some(finalize(table, options)?))
            }
            OperatorType::Union => {
                match node.any_param::<DirectSourceMapping>(keys::DIRECT_SOURCE_MAPPING) {
                    Some(mapping) => Ok(Some(self.execute_mapped_union(node, &mapping, options)?)),
                    None => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// Compute only the union columns that are not already realized, then
    /// reassemble the output from both.
    fn execute_mapped_union(
        &self,
        node: &PNode,
        mapping: &DirectSourceMapping,
        options: &MaterializeOptions,
    ) -> Result<Table> {
        self.ctx.metrics().record_fast_path(FastPath::DirectSourceMapping);
        let total = infer_num_columns(node)?;
        let names = infer_column_names(node)?;
        let unmapped: Vec<usize> = (0..total).filter(|i| !mapping.contains_key(i)).collect();
        debug!(
            mapped = mapping.len(),
            computed = unmapped.len(),
            "reusing realized union columns"
        );

        let computed = if unmapped.is_empty() {
            None
        } else {
            let project = make_project(node, &unmapped)?;
            let narrowed = self.optimizer().optimize_tracked(&project)?.node;
            Some(self.execute_node(&narrowed, &options.for_subgraph())?)
        };

        let mut columns = Vec::with_capacity(total);
        let mut next_computed = 0;
        for i in 0..total {
            if let Some(column) = mapping.get(&i) {
                columns.push(Column::clone(column));
            } else if let Some(table) = &computed {
                columns.push(table.select_column(next_computed)?);
                next_computed += 1;
            }
        }
        let table = Table::new(names, columns)?;
        trace!(rows = table.num_rows(), columns = total, "union assembled from realized columns");
        finalize(table, options)
    }
}
