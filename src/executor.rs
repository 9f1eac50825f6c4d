//! Subplan executor.
//!
//! A planner graph is compiled into a tree of pull-based [`BlockSource`]
//! operators and drained block by block. Each segment is compiled and run
//! entirely on one worker thread; [`SubplanExecutor::run_concat`] runs several
//! segments on the context's pool and stitches their outputs together in
//! segment order, whatever order the workers finish in.
//!
//! A node read by more than one consumer is compiled once and shared through
//! a fan-out that buffers blocks until every consumer has seen them, so shared
//! sub-graphs are computed once per segment.

use crate::config::{MaterializeOptions, WriteCallback};
use crate::context::QueryContext;
use crate::error::{QueryError, ensure_contract};
use crate::inference::{infer_column_names, infer_num_columns};
use crate::node::{PNode, keys};
use crate::node_id::NodeId;
use crate::operators::{
    Aggregate, CustomFn, GeneralizedTransformFn, OperatorType, TransformFn, source_range,
};
use crate::table::{Column, ColumnBlock, Table};
use crate::value::Value;
use anyhow::Result;
use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use tracing::{debug, trace};

/// A pull-based operator producing consecutive row blocks.
trait BlockSource {
    /// The next non-empty block, or `None` once exhausted.
    fn next_block(&mut self) -> Result<Option<ColumnBlock>>;
}

type BoxedSource = Box<dyn BlockSource>;

/// Rows `[pos, end)` of already realized columns.
struct ColumnScan {
    columns: Vec<Column>,
    pos: usize,
    end: usize,
    block_size: usize,
}

impl BlockSource for ColumnScan {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        if self.pos >= self.end {
            return Ok(None);
        }
        let stop = (self.pos + self.block_size).min(self.end);
        let block = ColumnBlock::new(
            self.columns
                .iter()
                .map(|c| c.slice(self.pos, stop))
                .collect(),
        );
        self.pos = stop;
        Ok(Some(block))
    }
}

struct RangeScan {
    pos: usize,
    end: usize,
    block_size: usize,
}

impl BlockSource for RangeScan {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        if self.pos >= self.end {
            return Ok(None);
        }
        let stop = (self.pos + self.block_size).min(self.end);
        let values = (self.pos..stop)
            .map(|i| Value::Integer(i64::try_from(i).unwrap_or(i64::MAX)))
            .collect();
        self.pos = stop;
        Ok(Some(ColumnBlock::new(vec![values])))
    }
}

struct ProjectOp {
    input: BoxedSource,
    indices: Vec<usize>,
}

impl BlockSource for ProjectOp {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        let Some(block) = self.input.next_block()? else {
            return Ok(None);
        };
        let mut columns = Vec::with_capacity(self.indices.len());
        for &i in &self.indices {
            ensure_contract!(
                i < block.num_columns(),
                "projection index {i} out of range for {} columns",
                block.num_columns()
            );
            columns.push(block.columns[i].clone());
        }
        Ok(Some(ColumnBlock::new(columns)))
    }
}

/// Reads several inputs with one row cursor, buffering whichever input runs
/// ahead.
struct LockStep {
    inputs: Vec<BoxedSource>,
    buffers: Vec<ColumnBlock>,
    exhausted: Vec<bool>,
}

impl LockStep {
    fn new(inputs: Vec<BoxedSource>) -> Self {
        let n = inputs.len();
        Self {
            inputs,
            buffers: vec![ColumnBlock::default(); n],
            exhausted: vec![false; n],
        }
    }

    /// The next aligned run of rows from every input.
    fn next_aligned(&mut self, what: &str) -> Result<Option<Vec<ColumnBlock>>> {
        for i in 0..self.inputs.len() {
            while self.buffers[i].num_rows() == 0 && !self.exhausted[i] {
                match self.inputs[i].next_block()? {
                    Some(block) => self.buffers[i].extend(block),
                    None => self.exhausted[i] = true,
                }
            }
        }
        let available: Vec<usize> = self.buffers.iter().map(ColumnBlock::num_rows).collect();
        let rows = available.iter().copied().min().unwrap_or(0);
        if rows == 0 {
            ensure_contract!(
                available.iter().all(|&r| r == 0),
                "{what} inputs have different lengths"
            );
            return Ok(None);
        }
        Ok(Some(
            self.buffers.iter_mut().map(|b| b.take_front(rows)).collect(),
        ))
    }
}

struct UnionOp {
    inputs: LockStep,
}

impl BlockSource for UnionOp {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        let Some(parts) = self.inputs.next_aligned("union")? else {
            return Ok(None);
        };
        Ok(Some(ColumnBlock::new(
            parts.into_iter().flat_map(|b| b.columns).collect(),
        )))
    }
}

struct TransformOp {
    input: BoxedSource,
    f: TransformFn,
}

impl BlockSource for TransformOp {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        let Some(block) = self.input.next_block()? else {
            return Ok(None);
        };
        let out = (0..block.num_rows())
            .map(|r| (self.f)(&block.row(r)))
            .collect();
        Ok(Some(ColumnBlock::new(vec![out])))
    }
}

struct GeneralizedTransformOp {
    input: BoxedSource,
    f: GeneralizedTransformFn,
    num_outputs: usize,
}

impl BlockSource for GeneralizedTransformOp {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        let Some(block) = self.input.next_block()? else {
            return Ok(None);
        };
        let mut out = ColumnBlock::with_columns(self.num_outputs);
        for r in 0..block.num_rows() {
            let values = (self.f)(&block.row(r));
            ensure_contract!(
                values.len() == self.num_outputs,
                "generalized transform returned {} values, declared {}",
                values.len(),
                self.num_outputs
            );
            for (column, v) in out.columns.iter_mut().zip(values) {
                column.push(v);
            }
        }
        Ok(Some(out))
    }
}

struct FilterOp {
    inputs: LockStep,
}

impl BlockSource for FilterOp {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        // Keep pulling until some row survives, so empty blocks never escape.
        while let Some(mut parts) = self.inputs.next_aligned("filter")? {
            let mask = parts.pop().unwrap_or_default();
            let data = parts.pop().unwrap_or_default();
            let keep: Vec<bool> = mask
                .columns
                .first()
                .map(|c| c.iter().map(Value::is_truthy).collect())
                .unwrap_or_default();
            if !keep.iter().any(|&k| k) {
                continue;
            }
            let columns = data
                .columns
                .into_iter()
                .map(|c| {
                    c.into_iter()
                        .zip(&keep)
                        .filter_map(|(v, &k)| k.then_some(v))
                        .collect()
                })
                .collect();
            return Ok(Some(ColumnBlock::new(columns)));
        }
        Ok(None)
    }
}

struct AppendOp {
    top: BoxedSource,
    bottom: BoxedSource,
    on_bottom: bool,
}

impl BlockSource for AppendOp {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        if !self.on_bottom {
            if let Some(block) = self.top.next_block()? {
                return Ok(Some(block));
            }
            self.on_bottom = true;
        }
        self.bottom.next_block()
    }
}

struct ReduceOp {
    input: BoxedSource,
    aggregate: Aggregate,
    num_columns: usize,
    done: bool,
}

impl BlockSource for ReduceOp {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut acc = vec![self.aggregate.init(); self.num_columns];
        while let Some(block) = self.input.next_block()? {
            for (a, column) in acc.iter_mut().zip(&block.columns) {
                for v in column {
                    *a = self.aggregate.fold(std::mem::take(a), v);
                }
            }
        }
        Ok(Some(ColumnBlock::new(
            acc.into_iter().map(|v| vec![v]).collect(),
        )))
    }
}

/// Shared state of a node with several consumers.
struct FanOutState {
    source: BoxedSource,
    queues: Vec<VecDeque<ColumnBlock>>,
}

struct FanOutBranch {
    state: Rc<RefCell<FanOutState>>,
    index: usize,
}

impl BlockSource for FanOutBranch {
    fn next_block(&mut self) -> Result<Option<ColumnBlock>> {
        let mut state = self.state.borrow_mut();
        if let Some(block) = state.queues[self.index].pop_front() {
            return Ok(Some(block));
        }
        let Some(block) = state.source.next_block()? else {
            return Ok(None);
        };
        let index = self.index;
        for (i, queue) in state.queues.iter_mut().enumerate() {
            if i != index {
                queue.push_back(block.clone());
            }
        }
        Ok(Some(block))
    }
}

/// Drain a source into columns.
fn drain(source: &mut BoxedSource, num_columns: usize) -> Result<ColumnBlock> {
    let mut out = ColumnBlock::with_columns(num_columns);
    while let Some(block) = source.next_block()? {
        out.extend(block);
    }
    Ok(out)
}

fn count_consumers(root: &PNode) -> HashMap<NodeId, usize> {
    let mut counts = HashMap::new();
    let mut seen = HashSet::new();
    let mut stack = vec![PNode::clone(root)];
    seen.insert(root.id());
    while let Some(n) = stack.pop() {
        for input in n.inputs() {
            *counts.entry(input.id()).or_insert(0) += 1;
            if seen.insert(input.id()) {
                stack.push(input);
            }
        }
    }
    counts
}

/// Turns one planner graph into an operator tree.
struct Compiler {
    consumers: HashMap<NodeId, usize>,
    shared: HashMap<NodeId, (Rc<RefCell<FanOutState>>, usize)>,
    block_size: usize,
}

impl Compiler {
    fn new(root: &PNode, block_size: usize) -> Self {
        Self {
            consumers: count_consumers(root),
            shared: HashMap::new(),
            block_size,
        }
    }

    fn compile(&mut self, n: &PNode) -> Result<BoxedSource> {
        let consumers = self.consumers.get(&n.id()).copied().unwrap_or(0);
        if consumers <= 1 {
            return self.compile_node(n);
        }
        if let Some((state, next)) = self.shared.get_mut(&n.id()) {
            let branch = FanOutBranch {
                state: Rc::clone(state),
                index: *next,
            };
            *next += 1;
            return Ok(Box::new(branch));
        }
        let source = self.compile_node(n)?;
        let state = Rc::new(RefCell::new(FanOutState {
            source,
            queues: vec![VecDeque::new(); consumers],
        }));
        self.shared.insert(n.id(), (Rc::clone(&state), 1));
        Ok(Box::new(FanOutBranch { state, index: 0 }))
    }

    fn compile_inputs(&mut self, n: &PNode) -> Result<Vec<BoxedSource>> {
        n.inputs().iter().map(|i| self.compile(i)).collect()
    }

    fn compile_single(&mut self, n: &PNode) -> Result<BoxedSource> {
        let inputs = n.inputs();
        ensure_contract!(
            inputs.len() == 1,
            "{} node has {} inputs, expected one",
            n.operator_type(),
            inputs.len()
        );
        self.compile(&inputs[0])
    }

    fn compile_node(&mut self, n: &PNode) -> Result<BoxedSource> {
        let block_size = self.block_size;
        Ok(match n.operator_type() {
            OperatorType::SframeSource => {
                let table = n.require_any::<Table>(keys::TABLE)?;
                let (pos, end) = source_range(n)?;
                ensure_contract!(
                    end <= table.num_rows(),
                    "source range ends at {end} past {} rows",
                    table.num_rows()
                );
                Box::new(ColumnScan {
                    columns: table.columns().to_vec(),
                    pos,
                    end,
                    block_size,
                })
            }
            OperatorType::SarraySource => {
                let column = n.require_any::<Column>(keys::COLUMN)?;
                let (pos, end) = source_range(n)?;
                ensure_contract!(
                    end <= column.size(),
                    "source range ends at {end} past {} rows",
                    column.size()
                );
                Box::new(ColumnScan {
                    columns: vec![Column::clone(&column)],
                    pos,
                    end,
                    block_size,
                })
            }
            OperatorType::Range => {
                let (pos, end) = source_range(n)?;
                Box::new(RangeScan {
                    pos,
                    end,
                    block_size,
                })
            }
            OperatorType::Project => Box::new(ProjectOp {
                indices: n.param_indices(keys::INDICES)?,
                input: self.compile_single(n)?,
            }),
            OperatorType::Union => Box::new(UnionOp {
                inputs: LockStep::new(self.compile_inputs(n)?),
            }),
            OperatorType::Transform => Box::new(TransformOp {
                f: (*n.require_any::<TransformFn>(keys::FUNCTION)?).clone(),
                input: self.compile_single(n)?,
            }),
            OperatorType::GeneralizedTransform => Box::new(GeneralizedTransformOp {
                f: (*n.require_any::<GeneralizedTransformFn>(keys::FUNCTION)?).clone(),
                num_outputs: n.param_usize(keys::NUM_OUTPUTS)?,
                input: self.compile_single(n)?,
            }),
            OperatorType::LogicalFilter => {
                ensure_contract!(n.num_inputs() == 2, "filter needs data and mask inputs");
                Box::new(FilterOp {
                    inputs: LockStep::new(self.compile_inputs(n)?),
                })
            }
            OperatorType::Append => {
                let inputs = n.inputs();
                ensure_contract!(inputs.len() == 2, "append needs two inputs");
                Box::new(AppendOp {
                    top: self.compile(&inputs[0])?,
                    bottom: self.compile(&inputs[1])?,
                    on_bottom: false,
                })
            }
            OperatorType::Reduce => {
                let name = n.param(keys::AGGREGATE).unwrap_or_default();
                let aggregate = name
                    .as_str()
                    .and_then(Aggregate::from_name)
                    .ok_or(QueryError::ParameterType {
                        key: keys::AGGREGATE,
                        expected: "aggregate name",
                    })?;
                Box::new(ReduceOp {
                    num_columns: infer_num_columns(n)?,
                    input: self.compile_single(n)?,
                    aggregate,
                    done: false,
                })
            }
            OperatorType::Custom => self.compile_custom(n)?,
        })
    }

    /// Realize every input, call the operator, then stream its result.
    fn compile_custom(&mut self, n: &PNode) -> Result<BoxedSource> {
        let name = n
            .param(keys::NAME)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "custom".to_string());
        let f = n.require_any::<CustomFn>(keys::FUNCTION)?;
        let expected = n.param_usize(keys::NUM_OUTPUTS)?;
        let mut tables = Vec::new();
        for input in n.inputs() {
            let mut source = self.compile(&input)?;
            let block = drain(&mut source, infer_num_columns(&input)?)?;
            tables.push(Table::new(
                infer_column_names(&input)?,
                block.columns.into_iter().map(Column::new).collect(),
            )?);
        }
        let result = f(tables).map_err(|e| QueryError::Operator(format!("{name}: {e:#}")))?;
        ensure_contract!(
            result.num_columns() == expected,
            "{name} produced {} columns, declared {expected}",
            result.num_columns()
        );
        Ok(Box::new(ColumnScan {
            end: result.num_rows(),
            columns: result.columns().to_vec(),
            pos: 0,
            block_size: self.block_size,
        }))
    }
}

/// Compile and drain one segment on the current thread.
fn execute_segment(
    node: &PNode,
    segment: usize,
    block_size: usize,
    callback: Option<&WriteCallback>,
) -> Result<ColumnBlock> {
    let mut source = Compiler::new(node, block_size).compile(node)?;
    let mut out = ColumnBlock::with_columns(infer_num_columns(node)?);
    while let Some(block) = source.next_block()? {
        match callback {
            Some(cb) => {
                if cb(segment, &block) {
                    trace!(segment, "write callback stopped the segment");
                    break;
                }
            }
            None => out.extend(block),
        }
    }
    trace!(segment, rows = out.num_rows(), "segment finished");
    Ok(out)
}

/// A streamed result is never held in memory, so it cannot be saved too.
pub(crate) fn check_sinks(options: &MaterializeOptions) -> Result<()> {
    ensure_contract!(
        options.write_callback.is_none() || options.output_index_file.is_none(),
        "an output index file cannot be written when a write callback consumes the rows"
    );
    Ok(())
}

/// Apply output names and persist, as requested by `options`.
pub(crate) fn finalize(mut table: Table, options: &MaterializeOptions) -> Result<Table> {
    if let Some(names) = &options.output_column_names {
        table.rename_all(names)?;
    }
    if let Some(path) = &options.output_index_file {
        table.save(path)?;
        debug!(path = %path.display(), rows = table.num_rows(), "saved result");
    }
    Ok(table)
}

/// Runs compiled subplans on a context's worker pool.
pub struct SubplanExecutor<'a> {
    ctx: &'a QueryContext,
}

impl<'a> SubplanExecutor<'a> {
    #[must_use]
    pub fn new(ctx: &'a QueryContext) -> Self {
        Self { ctx }
    }

    /// Execute `node` as a single pass.
    ///
    /// With a write callback the output is streamed to it and an empty table
    /// is returned.
    ///
    /// # Errors
    ///
    /// Malformed nodes, failing custom operators, a name count that does not
    /// match the output, a write callback combined with an output index
    /// file, and I/O failures while saving.
    pub fn run(&self, node: &PNode, options: &MaterializeOptions) -> Result<Table> {
        self.run_concat(std::slice::from_ref(node), options)
    }

    /// Execute independent segments in parallel and concatenate their rows in
    /// slice order.
    ///
    /// # Errors
    ///
    /// As [`SubplanExecutor::run`]; the first failing segment, in segment
    /// order, decides the error.
    pub fn run_concat(&self, segments: &[PNode], options: &MaterializeOptions) -> Result<Table> {
        let Some(first) = segments.first() else {
            return Err(QueryError::contract("no segments to execute").into());
        };
        check_sinks(options)?;
        let block_size = self.ctx.config().block_size;
        let callback = options.write_callback.as_ref();
        debug!(segments = segments.len(), "executing");

        let outputs: Vec<Result<ColumnBlock>> = if segments.len() == 1 {
            vec![execute_segment(first, 0, block_size, callback)]
        } else {
            self.ctx.pool().install(|| {
                segments
                    .par_iter()
                    .enumerate()
                    .map(|(i, segment)| execute_segment(segment, i, block_size, callback))
                    .collect()
            })
        };
        self.ctx.metrics().record_segments(segments.len());

        if callback.is_some() {
            for output in outputs {
                output?;
            }
            return Ok(Table::default());
        }

        let mut combined = ColumnBlock::with_columns(infer_num_columns(first)?);
        for output in outputs {
            combined.extend(output?);
        }
        let table = Table::new(
            infer_column_names(first)?,
            combined.columns.into_iter().map(Column::new).collect(),
        )?;
        self.ctx.metrics().record_rows(table.num_rows());
        finalize(table, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::operators::{make_append, make_logical_filter, make_range, make_transform, make_union};

    fn ints(block: &ColumnBlock, c: usize) -> Vec<i64> {
        block.columns[c]
            .iter()
            .filter_map(|v| match v {
                Value::Integer(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn shared_input_is_fanned_out() -> Result<()> {
        let range = make_range(0, 10)?;
        let doubled = make_transform(&range, |row| row[0].add(&row[0]));
        let union = make_union(vec![range, doubled])?;
        let out = execute_segment(&union, 0, 3, None)?;
        assert_eq!(ints(&out, 0), (0..10).collect::<Vec<_>>());
        assert_eq!(ints(&out, 1), (0..10).map(|i| i * 2).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn filter_and_append_stream_in_order() -> Result<()> {
        let data = make_range(0, 8)?;
        let mask = make_transform(&data, |row| {
            Value::Integer(i64::from(row[0].as_usize().is_some_and(|v| v % 2 == 0)))
        });
        let evens = make_logical_filter(&data, &mask)?;
        let all = make_append(&evens, &make_range(100, 102)?)?;
        let out = execute_segment(&all, 0, 3, None)?;
        assert_eq!(ints(&out, 0), vec![0, 2, 4, 6, 100, 101]);
        Ok(())
    }

    #[test]
    fn mismatched_union_is_a_contract_error() -> Result<()> {
        let ctx = QueryContext::new(QueryConfig::default().with_num_threads(1))?;
        let union = make_union(vec![make_range(0, 3)?, make_range(0, 4)?])?;
        let err = SubplanExecutor::new(&ctx)
            .run(&union, &MaterializeOptions::default())
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
        assert!(matches!(
            err.downcast_ref::<QueryError>(),
            Some(QueryError::Contract(_))
        ));
        Ok(())
    }
}
