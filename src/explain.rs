//! Human-readable description of a lazy graph.
//!
//! [`explain`] lists the nodes reachable from a root in execution order
//! (inputs before consumers, shared nodes once) together with what the planner
//! knows about each of them. [`Planner::explain`](crate::planner::Planner::explain)
//! also runs the optimizer first and includes its decisions.

use crate::inference::{infer_length, infer_num_columns, infer_num_dependency_nodes};
use crate::node::PNode;
use crate::node_id::NodeId;
use crate::operators::{
    consumes_inputs_at_same_rates, is_linear_graph, is_linear_transform, is_parallel_slicable,
    is_source_node, is_sublinear_transform, source_range,
};
use crate::optimizer::OptimizationDecision;
use anyhow::Result;
use std::collections::HashSet;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Detailed explanation of a planner graph.
#[derive(Debug, Clone)]
pub struct ExecutionExplanation {
    /// Nodes in execution order.
    pub steps: Vec<ExplainStep>,
    pub cost_estimate: CostEstimate,
    /// Rewrites the optimizer applied, if it ran.
    pub optimizations: Vec<OptimizationDecision>,
    /// The graph can be split into independent row-range segments.
    pub parallel_slicable: bool,
    /// The graph is a simple path down to one source.
    pub linear: bool,
}

/// A single node of the explained graph.
#[derive(Debug, Clone)]
pub struct ExplainStep {
    /// Position in execution order, starting at 1.
    pub step: usize,
    pub node: NodeId,
    pub operator: String,
    /// Attribute flag names, e.g. `LINEAR`.
    pub attributes: Vec<&'static str>,
    pub inputs: Vec<NodeId>,
    /// Statically known row count.
    pub length: Option<usize>,
    pub num_columns: usize,
    /// Realized eagerly during partial materialization.
    pub is_barrier: bool,
    pub description: String,
}

/// Aggregate counts over the explained graph.
#[derive(Debug, Clone)]
pub struct CostEstimate {
    pub total_nodes: usize,
    pub sources: usize,
    pub barriers: usize,
    /// Tree-expanded size, as used by the lazy-node threshold.
    pub dependency_nodes: usize,
    pub output_length: Option<usize>,
}

fn is_barrier(n: &PNode) -> bool {
    !is_source_node(n)
        && (!consumes_inputs_at_same_rates(n)
            || !(is_linear_transform(n) || is_sublinear_transform(n)))
}

fn describe(n: &PNode) -> String {
    if is_source_node(n) {
        return match source_range(n) {
            Ok((begin, end)) => format!("rows [{begin}, {end})"),
            Err(e) => format!("malformed source: {e}"),
        };
    }
    let inputs = n.inputs();
    let ids = inputs
        .iter()
        .map(|i| format!("#{}", i.id().raw()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("reads {ids}")
}

fn post_order(n: &PNode, seen: &mut HashSet<NodeId>, out: &mut Vec<PNode>) {
    if !seen.insert(n.id()) {
        return;
    }
    for input in n.inputs() {
        post_order(&input, seen, out);
    }
    out.push(PNode::clone(n));
}

/// Explain the graph rooted at `node` as it stands.
///
/// # Errors
///
/// Fails on a node with malformed parameters.
pub fn explain(node: &PNode) -> Result<ExecutionExplanation> {
    let mut order = Vec::new();
    post_order(node, &mut HashSet::new(), &mut order);

    let mut steps = Vec::with_capacity(order.len());
    let (mut sources, mut barriers) = (0, 0);
    for (i, n) in order.iter().enumerate() {
        let barrier = is_barrier(n);
        sources += usize::from(is_source_node(n));
        barriers += usize::from(barrier);
        steps.push(ExplainStep {
            step: i + 1,
            node: n.id(),
            operator: n.operator_type().to_string(),
            attributes: n.operator_type().attributes().flag_names(),
            inputs: n.inputs().iter().map(|i| i.id()).collect(),
            length: infer_length(n),
            num_columns: infer_num_columns(n)?,
            is_barrier: barrier,
            description: describe(n),
        });
    }

    Ok(ExecutionExplanation {
        cost_estimate: CostEstimate {
            total_nodes: steps.len(),
            sources,
            barriers,
            dependency_nodes: infer_num_dependency_nodes(node),
            output_length: infer_length(node),
        },
        steps,
        optimizations: Vec::new(),
        parallel_slicable: is_parallel_slicable(node),
        linear: is_linear_graph(node),
    })
}

fn or_unknown(v: Option<usize>) -> String {
    v.map_or_else(|| "unknown".to_string(), |n| n.to_string())
}

impl Display for ExecutionExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(
            f,
            "╔═══════════════════════════════════════════════════════════════╗"
        )?;
        writeln!(
            f,
            "║                  QUERY PLAN EXPLANATION                       ║"
        )?;
        writeln!(
            f,
            "╚═══════════════════════════════════════════════════════════════╝"
        )?;
        writeln!(f)?;

        let cost = &self.cost_estimate;
        writeln!(
            f,
            "┌─ COST ESTIMATES ─────────────────────────────────────────────┐"
        )?;
        writeln!(f, "│ Output Rows:       {:>10}", or_unknown(cost.output_length))?;
        writeln!(f, "│ Nodes:             {:>10}", cost.total_nodes)?;
        writeln!(f, "│ Sources:           {:>10}", cost.sources)?;
        writeln!(f, "│ Barriers:          {:>10}", cost.barriers)?;
        writeln!(f, "│ Dependency Nodes:  {:>10}", cost.dependency_nodes)?;
        writeln!(f, "│ Parallel Slicable: {:>10}", self.parallel_slicable)?;
        writeln!(f, "│ Linear:            {:>10}", self.linear)?;
        writeln!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )?;
        writeln!(f)?;

        writeln!(
            f,
            "┌─ EXECUTION STEPS ────────────────────────────────────────────┐"
        )?;
        for step in &self.steps {
            let marker = if step.is_barrier { " [BARRIER]" } else { "" };
            writeln!(f, "│")?;
            writeln!(
                f,
                "│ Step {}: {} #{}{marker}",
                step.step,
                step.operator,
                step.node.raw()
            )?;
            writeln!(f, "│   {}", step.description)?;
            writeln!(
                f,
                "│   rows: {}, columns: {}, flags: [{}]",
                or_unknown(step.length),
                step.num_columns,
                step.attributes.join(", ")
            )?;
        }
        writeln!(f, "│")?;
        writeln!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )?;

        if !self.optimizations.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "┌─ OPTIMIZATIONS APPLIED ──────────────────────────────────────┐"
            )?;
            for opt in &self.optimizations {
                writeln!(f, "│ • {opt}")?;
            }
            writeln!(
                f,
                "└──────────────────────────────────────────────────────────────┘"
            )?;
        }
        Ok(())
    }
}
