//! Semantics-preserving graph rewrites.
//!
//! The optimizer walks the DAG bottom-up and applies local rewrites, repeating
//! whole passes until one pass changes nothing (or `max_passes` is hit):
//!
//! 1. **Merge projections**: `Project(Project(x, a), b)` becomes one projection.
//! 2. **Eliminate identity projections** that select every column in order.
//! 3. **Project on source**: a projection of a realized source becomes a
//!    source over the selected columns.
//! 4. **Flatten unions**: nested unions are spliced into their parent, and a
//!    union of one input is that input.
//! 5. **Project through union**: a projection of a union keeps only the union
//!    inputs (and input columns) it selects, so the rest are never executed.
//! 6. **Project through append**: a projection of an append is applied to
//!    both sides instead.
//! 7. **Project through filter**: a projection of a filter narrows the
//!    filtered data to the columns it reads.
//! 8. **Merge source unions**: adjacent realized sources of a union over the
//!    same rows become one table source.
//! 9. **Collapse empty appends** when one side is statically empty.
//! 10. **Direct source mapping**: a union mixing lazy inputs with full-range
//!    realized sources records which output columns already exist, so
//!    materialization can reuse them instead of recomputing.
//!
//! Every rewrite preserves row count, column count, column names and values.
//! Nodes are never mutated; a rewritten node is a fresh node and every
//! untouched sub-graph keeps its original `Arc`, so optimizing an optimized
//! graph returns the very same handle.

use crate::config::{MaterializeOptions, QueryConfig};
use crate::error::ensure_contract;
use crate::inference::{full_source_column, infer_column_names, infer_length, infer_num_columns};
use crate::node::{NodeState, PNode, PlannerNode, keys};
use crate::node_id::NodeId;
use crate::operators::{
    OperatorType, make_append, make_logical_filter, make_project, make_sframe_source_range,
    make_union, source_range,
};
use crate::table::{Column, Table, default_column_name};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Output column index to an already realized column, attached to unions.
pub type DirectSourceMapping = BTreeMap<usize, Column>;

/// One rewrite applied by the optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationDecision {
    /// Two stacked projections became one.
    MergedProjections { node: NodeId },
    /// A projection selecting every column in order was removed.
    EliminatedIdentityProjection { node: NodeId, columns: usize },
    /// A projection of a realized source became a narrower source.
    ProjectedSource {
        node: NodeId,
        source: OperatorType,
        columns: usize,
    },
    /// Nested unions were spliced into one.
    FlattenedUnion {
        node: NodeId,
        inputs_before: usize,
        inputs_after: usize,
    },
    /// A projection over a union dropped the union inputs it never reads.
    ProjectedThroughUnion {
        node: NodeId,
        inputs_before: usize,
        inputs_after: usize,
    },
    /// A projection of an append moved onto both sides.
    ProjectedThroughAppend { node: NodeId },
    /// A projection of a filter narrowed the filtered data.
    ProjectedThroughFilter {
        node: NodeId,
        columns_before: usize,
        columns_after: usize,
    },
    /// Adjacent realized sources of a union became one table source.
    MergedSourceUnion { node: NodeId, sources_merged: usize },
    /// An append with a statically empty side became the other side.
    CollapsedEmptyAppend { node: NodeId },
    /// A union was annotated with its directly reusable source columns.
    AnnotatedDirectSourceMapping {
        node: NodeId,
        mapped_columns: usize,
        total_columns: usize,
    },
}

impl Display for OptimizationDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::MergedProjections { node } => {
                write!(f, "merged stacked projections at node {}", node.raw())
            }
            Self::EliminatedIdentityProjection { node, columns } => write!(
                f,
                "removed identity projection of {columns} columns at node {}",
                node.raw()
            ),
            Self::ProjectedSource {
                node,
                source,
                columns,
            } => write!(
                f,
                "narrowed {source} to {columns} columns at node {}",
                node.raw()
            ),
            Self::FlattenedUnion {
                node,
                inputs_before,
                inputs_after,
            } => write!(
                f,
                "flattened union at node {}: {inputs_before} inputs -> {inputs_after}",
                node.raw()
            ),
            Self::ProjectedThroughUnion {
                node,
                inputs_before,
                inputs_after,
            } => write!(
                f,
                "pushed projection into union at node {}: {inputs_before} inputs -> {inputs_after}",
                node.raw()
            ),
            Self::ProjectedThroughAppend { node } => {
                write!(f, "pushed projection into both sides of append at node {}", node.raw())
            }
            Self::ProjectedThroughFilter {
                node,
                columns_before,
                columns_after,
            } => write!(
                f,
                "filter at node {} reads {columns_after} of {columns_before} data columns",
                node.raw()
            ),
            Self::MergedSourceUnion {
                node,
                sources_merged,
            } => write!(
                f,
                "merged {sources_merged} union sources at node {}",
                node.raw()
            ),
            Self::CollapsedEmptyAppend { node } => {
                write!(f, "dropped empty side of append at node {}", node.raw())
            }
            Self::AnnotatedDirectSourceMapping {
                node,
                mapped_columns,
                total_columns,
            } => write!(
                f,
                "{mapped_columns} of {total_columns} union columns reuse realized sources at node {}",
                node.raw()
            ),
        }
    }
}

/// Result of [`Optimizer::optimize_tracked`].
#[derive(Debug, Clone)]
pub struct OptimizedGraph {
    pub node: PNode,
    /// Every rewrite applied, in order.
    pub decisions: Vec<OptimizationDecision>,
    /// Passes run, including the final pass that found nothing to do.
    pub passes: usize,
}

type Rewrite = Option<(PNode, OptimizationDecision)>;

/// Fixed-point rewrite engine.
#[derive(Clone, Copy, Debug)]
pub struct Optimizer {
    max_passes: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

impl Optimizer {
    #[must_use]
    pub fn new(max_passes: usize) -> Self {
        Self {
            max_passes: max_passes.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(config.max_optimizer_passes)
    }

    /// Optimize `node`, honoring `options.disable_optimization`.
    ///
    /// # Errors
    ///
    /// Fails on a malformed node.
    pub fn optimize(&self, node: &PNode, options: &MaterializeOptions) -> Result<PNode> {
        if options.disable_optimization {
            return Ok(PNode::clone(node));
        }
        Ok(self.optimize_tracked(node)?.node)
    }

    /// Optimize `node` and report every rewrite applied.
    ///
    /// # Errors
    ///
    /// Fails on a malformed node.
    pub fn optimize_tracked(&self, node: &PNode) -> Result<OptimizedGraph> {
        let mut current = PNode::clone(node);
        let mut decisions = Vec::new();
        let mut passes = 0;
        loop {
            passes += 1;
            let mut pass_decisions = Vec::new();
            let next = rewrite_node(&current, &mut HashMap::new(), &mut pass_decisions)?;
            if pass_decisions.is_empty() {
                break;
            }
            decisions.append(&mut pass_decisions);
            current = next;
            if passes >= self.max_passes {
                warn!(
                    passes,
                    "optimizer stopped at pass limit before reaching a fixed point"
                );
                break;
            }
        }
        debug!(rewrites = decisions.len(), passes, "optimization finished");
        Ok(OptimizedGraph {
            node: current,
            decisions,
            passes,
        })
    }
}

/// Optimize with the default pass limit.
///
/// # Errors
///
/// Fails on a malformed node.
pub fn optimize(node: &PNode, options: &MaterializeOptions) -> Result<PNode> {
    Optimizer::default().optimize(node, options)
}

fn rewrite_node(
    n: &PNode,
    memo: &mut HashMap<NodeId, PNode>,
    decisions: &mut Vec<OptimizationDecision>,
) -> Result<PNode> {
    if let Some(done) = memo.get(&n.id()) {
        return Ok(PNode::clone(done));
    }
    let inputs = n.inputs();
    let mut rewritten = Vec::with_capacity(inputs.len());
    let mut changed = false;
    for input in &inputs {
        let r = rewrite_node(input, memo, decisions)?;
        changed |= r.id() != input.id();
        rewritten.push(r);
    }
    let rebuilt = if changed {
        n.with_inputs(rewritten)
    } else {
        PNode::clone(n)
    };
    let out = match apply_rules(&rebuilt)? {
        Some((node, decision)) => {
            debug!(%decision, "rewrite");
            decisions.push(decision);
            node
        }
        None => rebuilt,
    };
    memo.insert(n.id(), PNode::clone(&out));
    Ok(out)
}

fn apply_rules(n: &PNode) -> Result<Rewrite> {
    const RULES: [fn(&PNode) -> Result<Rewrite>; 10] = [
        merge_projections,
        eliminate_identity_projection,
        project_on_source,
        flatten_union,
        project_through_union,
        project_through_append,
        project_through_filter,
        merge_source_union,
        collapse_empty_append,
        annotate_direct_source_mapping,
    ];
    for rule in RULES {
        if let Some(hit) = rule(n)? {
            return Ok(Some(hit));
        }
    }
    Ok(None)
}

fn single_input(n: &PlannerNode) -> Result<PNode> {
    let inputs = n.inputs();
    ensure_contract!(
        inputs.len() == 1,
        "{} node has {} inputs, expected one",
        n.operator_type(),
        inputs.len()
    );
    Ok(PNode::clone(&inputs[0]))
}

fn merge_projections(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Project {
        return Ok(None);
    }
    let inner = single_input(n)?;
    if inner.operator_type() != OperatorType::Project {
        return Ok(None);
    }
    let outer = n.param_indices(keys::INDICES)?;
    let below = inner.param_indices(keys::INDICES)?;
    let mut composed = Vec::with_capacity(outer.len());
    for i in outer {
        ensure_contract!(i < below.len(), "projection index {i} out of range");
        composed.push(below[i]);
    }
    let merged = make_project(&single_input(&inner)?, &composed)?;
    Ok(Some((
        merged,
        OptimizationDecision::MergedProjections { node: n.id() },
    )))
}

fn eliminate_identity_projection(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Project {
        return Ok(None);
    }
    let indices = n.param_indices(keys::INDICES)?;
    if indices.iter().enumerate().any(|(pos, &i)| pos != i) {
        return Ok(None);
    }
    let input = single_input(n)?;
    if infer_num_columns(&input)? != indices.len() {
        return Ok(None);
    }
    Ok(Some((
        input,
        OptimizationDecision::EliminatedIdentityProjection {
            node: n.id(),
            columns: indices.len(),
        },
    )))
}

fn project_on_source(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Project {
        return Ok(None);
    }
    let input = single_input(n)?;
    let indices = n.param_indices(keys::INDICES)?;
    let table = match input.operator_type() {
        OperatorType::SframeSource => input
            .require_any::<Table>(keys::TABLE)?
            .select_columns(&indices)?,
        OperatorType::SarraySource => {
            ensure_contract!(
                indices.iter().all(|&i| i == 0),
                "projection of a single column selects another column"
            );
            let column = input.require_any::<Column>(keys::COLUMN)?;
            Table::new(
                vec![default_column_name(0); indices.len()],
                vec![Column::clone(&column); indices.len()],
            )?
        }
        _ => return Ok(None),
    };
    let (begin, end) = source_range(&input)?;
    let source = make_sframe_source_range(table, begin, end)?;
    Ok(Some((
        source,
        OptimizationDecision::ProjectedSource {
            node: n.id(),
            source: input.operator_type(),
            columns: indices.len(),
        },
    )))
}

fn flatten_union(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Union {
        return Ok(None);
    }
    let inputs = n.inputs();
    if inputs.len() == 1 {
        return Ok(Some((
            PNode::clone(&inputs[0]),
            OptimizationDecision::FlattenedUnion {
                node: n.id(),
                inputs_before: 1,
                inputs_after: 1,
            },
        )));
    }
    if !inputs
        .iter()
        .any(|i| i.operator_type() == OperatorType::Union)
    {
        return Ok(None);
    }
    let mut flat = Vec::with_capacity(inputs.len());
    for input in &inputs {
        if input.operator_type() == OperatorType::Union {
            flat.extend(input.inputs());
        } else {
            flat.push(PNode::clone(input));
        }
    }
    let inputs_after = flat.len();
    Ok(Some((
        make_union(flat)?,
        OptimizationDecision::FlattenedUnion {
            node: n.id(),
            inputs_before: inputs.len(),
            inputs_after,
        },
    )))
}

fn project_through_union(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Project {
        return Ok(None);
    }
    let union = single_input(n)?;
    if union.operator_type() != OperatorType::Union {
        return Ok(None);
    }
    let indices = n.param_indices(keys::INDICES)?;
    let inputs = union.inputs();

    // (input position, column within input) for every union output column.
    let mut owner = Vec::new();
    let mut widths = Vec::with_capacity(inputs.len());
    for (pos, input) in inputs.iter().enumerate() {
        let width = infer_num_columns(input)?;
        owner.extend((0..width).map(|c| (pos, c)));
        widths.push(width);
    }

    // Columns read from each input, ascending.
    let mut used: Vec<Vec<usize>> = vec![Vec::new(); inputs.len()];
    for &i in &indices {
        ensure_contract!(i < owner.len(), "projection index {i} out of range");
        let (pos, c) = owner[i];
        if !used[pos].contains(&c) {
            used[pos].push(c);
        }
    }
    for cols in &mut used {
        cols.sort_unstable();
    }
    let narrows = used
        .iter()
        .zip(&widths)
        .any(|(cols, &w)| cols.len() != w);
    if !narrows {
        return Ok(None);
    }

    let mut kept = Vec::new();
    let mut remap = HashMap::new();
    let mut offset = 0;
    for (pos, input) in inputs.iter().enumerate() {
        let cols = &used[pos];
        if cols.is_empty() {
            continue;
        }
        for (k, &c) in cols.iter().enumerate() {
            remap.insert((pos, c), offset + k);
        }
        offset += cols.len();
        kept.push(if cols.len() == widths[pos] {
            PNode::clone(input)
        } else {
            make_project(input, cols)?
        });
    }
    let inputs_after = kept.len();
    let narrowed = if kept.len() == 1 {
        kept.swap_remove(0)
    } else {
        make_union(kept)?
    };
    let mut outer = Vec::with_capacity(indices.len());
    for &i in &indices {
        outer.push(remap[&owner[i]]);
    }
    Ok(Some((
        make_project(&narrowed, &outer)?,
        OptimizationDecision::ProjectedThroughUnion {
            node: n.id(),
            inputs_before: inputs.len(),
            inputs_after,
        },
    )))
}

fn project_through_append(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Project {
        return Ok(None);
    }
    let append = single_input(n)?;
    if append.operator_type() != OperatorType::Append {
        return Ok(None);
    }
    let sides = append.inputs();
    ensure_contract!(sides.len() == 2, "append node needs two inputs");
    let indices = n.param_indices(keys::INDICES)?;
    let exchanged = make_append(
        &make_project(&sides[0], &indices)?,
        &make_project(&sides[1], &indices)?,
    )?;
    Ok(Some((
        exchanged,
        OptimizationDecision::ProjectedThroughAppend { node: n.id() },
    )))
}

fn project_through_filter(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Project {
        return Ok(None);
    }
    let filter = single_input(n)?;
    if filter.operator_type() != OperatorType::LogicalFilter {
        return Ok(None);
    }
    let inputs = filter.inputs();
    ensure_contract!(inputs.len() == 2, "filter needs data and mask inputs");
    let (data, mask) = (&inputs[0], &inputs[1]);
    let width = infer_num_columns(data)?;
    let indices = n.param_indices(keys::INDICES)?;

    let mut used = indices.clone();
    used.sort_unstable();
    used.dedup();
    if let Some(&last) = used.last() {
        ensure_contract!(last < width, "projection index {last} out of range");
    }
    if used.len() == width {
        return Ok(None);
    }

    let narrowed = make_logical_filter(&make_project(data, &used)?, mask)?;
    let mut outer = Vec::with_capacity(indices.len());
    for i in &indices {
        // `used` is sorted and holds every index.
        outer.push(used.partition_point(|u| u < i));
    }
    Ok(Some((
        make_project(&narrowed, &outer)?,
        OptimizationDecision::ProjectedThroughFilter {
            node: n.id(),
            columns_before: width,
            columns_after: used.len(),
        },
    )))
}

/// Range and underlying row count of a realized source, if `n` is one.
fn realized_extent(n: &PNode) -> Result<Option<(usize, usize, usize)>> {
    let rows = match n.operator_type() {
        OperatorType::SframeSource => n.require_any::<Table>(keys::TABLE)?.num_rows(),
        OperatorType::SarraySource => n.require_any::<Column>(keys::COLUMN)?.size(),
        _ => return Ok(None),
    };
    let (begin, end) = source_range(n)?;
    Ok(Some((begin, end, rows)))
}

fn source_columns(n: &PNode) -> Result<Vec<Column>> {
    Ok(match n.operator_type() {
        OperatorType::SframeSource => n.require_any::<Table>(keys::TABLE)?.columns().to_vec(),
        _ => {
            let column = n.require_any::<Column>(keys::COLUMN)?;
            vec![Column::clone(&column)]
        }
    })
}

fn merge_source_union(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Union {
        return Ok(None);
    }
    let inputs = n.inputs();
    let extents = inputs
        .iter()
        .map(realized_extent)
        .collect::<Result<Vec<_>>>()?;
    let mergeable = extents
        .windows(2)
        .any(|w| matches!((w[0], w[1]), (Some(a), Some(b)) if a == b));
    if !mergeable {
        return Ok(None);
    }

    let mut out: Vec<PNode> = Vec::new();
    let mut merged_total = 0;
    let mut i = 0;
    while i < inputs.len() {
        let Some(extent) = extents[i] else {
            out.push(PNode::clone(&inputs[i]));
            i += 1;
            continue;
        };
        let mut j = i + 1;
        while j < inputs.len() && extents[j] == Some(extent) {
            j += 1;
        }
        if j - i == 1 {
            out.push(PNode::clone(&inputs[i]));
        } else {
            let mut names = Vec::new();
            let mut columns = Vec::new();
            for input in &inputs[i..j] {
                names.extend(infer_column_names(input)?);
                columns.extend(source_columns(input)?);
            }
            let (begin, end, _) = extent;
            out.push(make_sframe_source_range(
                Table::new(names, columns)?,
                begin,
                end,
            )?);
            merged_total += j - i;
        }
        i = j;
    }
    Ok(Some((
        make_union(out)?,
        OptimizationDecision::MergedSourceUnion {
            node: n.id(),
            sources_merged: merged_total,
        },
    )))
}

fn collapse_empty_append(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Append {
        return Ok(None);
    }
    let inputs = n.inputs();
    ensure_contract!(inputs.len() == 2, "append node needs two inputs");
    let (top, bottom) = (&inputs[0], &inputs[1]);
    let keep = if infer_length(bottom) == Some(0) {
        PNode::clone(top)
    } else if infer_length(top) == Some(0)
        && infer_column_names(top)? == infer_column_names(bottom)?
    {
        // The result takes its names from the top side.
        PNode::clone(bottom)
    } else {
        return Ok(None);
    };
    Ok(Some((
        keep,
        OptimizationDecision::CollapsedEmptyAppend { node: n.id() },
    )))
}

fn same_mapping(a: &DirectSourceMapping, b: &DirectSourceMapping) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((ka, ca), (kb, cb))| ka == kb && ca.ptr_eq(cb))
}

fn annotate_direct_source_mapping(n: &PNode) -> Result<Rewrite> {
    if n.operator_type() != OperatorType::Union {
        return Ok(None);
    }
    let inputs = n.inputs();
    let mut mapping = DirectSourceMapping::new();
    let mut lazy_inputs = 0;
    let mut offset = 0;
    for input in &inputs {
        let width = infer_num_columns(input)?;
        let mut mapped = false;
        for c in 0..width {
            if let Some(column) = full_source_column(input, c) {
                mapping.insert(offset + c, column);
                mapped = true;
            }
        }
        if !mapped {
            lazy_inputs += 1;
        }
        offset += width;
    }
    let wanted = (lazy_inputs > 0 && !mapping.is_empty()).then_some(mapping);
    let current = n.any_param::<DirectSourceMapping>(keys::DIRECT_SOURCE_MAPPING);
    let up_to_date = match (&wanted, &current) {
        (Some(w), Some(c)) => same_mapping(w, c),
        (None, None) => true,
        _ => false,
    };
    if up_to_date {
        return Ok(None);
    }

    let mut state: NodeState = n.state();
    let mapped_columns = wanted.as_ref().map_or(0, BTreeMap::len);
    match wanted {
        Some(m) => {
            state
                .any_operator_parameters
                .insert(keys::DIRECT_SOURCE_MAPPING.to_string(), Arc::new(m));
        }
        None => {
            state
                .any_operator_parameters
                .remove(keys::DIRECT_SOURCE_MAPPING);
        }
    }
    Ok(Some((
        PlannerNode::new(state),
        OptimizationDecision::AnnotatedDirectSourceMapping {
            node: n.id(),
            mapped_columns,
            total_columns: offset,
        },
    )))
}
