//! Planner nodes: vertices of the lazy operator DAG.
//!
//! A [`PlannerNode`] is shared by `Arc` ([`PNode`]); several parents, and
//! several independent graphs, may hold the same node. The node's contents
//! live behind a lock so that exactly one state transition is possible after
//! construction: [`PlannerNode::realize`], which `materialize` uses to turn
//! the node into a source over its own result. Every holder of the `Arc`
//! observes the realized state from then on, so the work is never repeated.
//!
//! Everything else in the crate treats nodes as immutable: rewrites and
//! graph cloning build new nodes and leave the originals untouched.

use crate::error::QueryError;
use crate::node_id::NodeId;
use crate::operators::{self, OperatorType};
use crate::table::Table;
use crate::value::Value;
use anyhow::Result;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

/// Shared handle to a planner node.
pub type PNode = Arc<PlannerNode>;

/// Typed payload that does not fit a scalar [`Value`].
pub type AnyParam = Arc<dyn Any + Send + Sync>;

/// Well-known parameter keys.
pub mod keys {
    pub const BEGIN_INDEX: &str = "begin_index";
    pub const END_INDEX: &str = "end_index";
    pub const INDICES: &str = "indices";
    pub const NUM_OUTPUTS: &str = "num_outputs";
    pub const AGGREGATE: &str = "aggregate";
    pub const NAME: &str = "name";

    pub const TABLE: &str = "table";
    pub const COLUMN: &str = "column";
    pub const FUNCTION: &str = "function";
    pub const DIRECT_SOURCE_MAPPING: &str = "direct_source_mapping";
}

/// The mutable contents of a planner node.
#[derive(Clone)]
pub struct NodeState {
    pub operator_type: OperatorType,
    /// Small scalar configuration, e.g. the row range of a source.
    pub operator_parameters: BTreeMap<String, Value>,
    /// Typed payloads: realized tables, columns, functions, column mappings.
    pub any_operator_parameters: BTreeMap<String, AnyParam>,
    /// Ordered inputs; position is meaningful (left/right, data/mask, ...).
    pub inputs: Vec<PNode>,
}

impl NodeState {
    #[must_use]
    pub fn new(operator_type: OperatorType) -> Self {
        Self {
            operator_type,
            operator_parameters: BTreeMap::new(),
            any_operator_parameters: BTreeMap::new(),
            inputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.operator_parameters.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn any_param<T: Any + Send + Sync>(mut self, key: &str, value: T) -> Self {
        self.any_operator_parameters
            .insert(key.to_string(), Arc::new(value) as AnyParam);
        self
    }

    #[must_use]
    pub fn inputs(mut self, inputs: Vec<PNode>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Wrap into a fresh node with a new identity.
    #[must_use]
    pub fn into_node(self) -> PNode {
        PlannerNode::new(self)
    }
}

/// One vertex of the lazy operator DAG.
pub struct PlannerNode {
    id: NodeId,
    state: RwLock<NodeState>,
}

impl PlannerNode {
    #[must_use]
    pub fn new(state: NodeState) -> PNode {
        Arc::new(Self {
            id: NodeId::next(),
            state: RwLock::new(state),
        })
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn operator_type(&self) -> OperatorType {
        self.state.read().operator_type
    }

    /// Snapshot of the node's current contents.
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.state.read().clone()
    }

    #[must_use]
    pub fn inputs(&self) -> Vec<PNode> {
        self.state.read().inputs.clone()
    }

    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.state.read().inputs.len()
    }

    /// # Panics
    ///
    /// Panics if the node has no input `i`.
    #[must_use]
    pub fn input(&self, i: usize) -> PNode {
        Arc::clone(&self.state.read().inputs[i])
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<Value> {
        self.state.read().operator_parameters.get(key).cloned()
    }

    /// A required non-negative integer parameter.
    ///
    /// # Errors
    ///
    /// Missing or non-integer parameter.
    pub fn param_usize(&self, key: &'static str) -> Result<usize> {
        let v = self.param(key).ok_or(QueryError::MissingParameter {
            operator: self.operator_type().name(),
            key,
        })?;
        Ok(v.as_usize().ok_or(QueryError::ParameterType {
            key,
            expected: "non-negative integer",
        })?)
    }

    /// A required list-of-indices parameter.
    ///
    /// # Errors
    ///
    /// Missing or malformed parameter.
    pub fn param_indices(&self, key: &'static str) -> Result<Vec<usize>> {
        let v = self.param(key).ok_or(QueryError::MissingParameter {
            operator: self.operator_type().name(),
            key,
        })?;
        Ok(v.as_indices().ok_or(QueryError::ParameterType {
            key,
            expected: "list of indices",
        })?)
    }

    #[must_use]
    pub fn has_any_param(&self, key: &str) -> bool {
        self.state.read().any_operator_parameters.contains_key(key)
    }

    /// A typed payload, if present and of type `T`.
    #[must_use]
    pub fn any_param<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let payload = self.state.read().any_operator_parameters.get(key).cloned()?;
        payload.downcast::<T>().ok()
    }

    /// A required typed payload.
    ///
    /// # Errors
    ///
    /// Missing payload or a payload of another type.
    pub fn require_any<T: Any + Send + Sync>(&self, key: &'static str) -> Result<Arc<T>> {
        if !self.has_any_param(key) {
            return Err(QueryError::MissingParameter {
                operator: self.operator_type().name(),
                key,
            }
            .into());
        }
        Ok(self.any_param::<T>(key).ok_or(QueryError::ParameterType {
            key,
            expected: std::any::type_name::<T>(),
        })?)
    }

    /// A new node with this node's operator and parameters but other inputs.
    #[must_use]
    pub fn with_inputs(&self, inputs: Vec<PNode>) -> PNode {
        let mut state = self.state();
        state.inputs = inputs;
        Self::new(state)
    }

    /// Overwrite this node in place with a source over `table`.
    ///
    /// This is the only mutation a node ever sees. Callers hold the query lock.
    pub(crate) fn realize(&self, table: Table) {
        let n = table.num_rows();
        *self.state.write() = operators::sframe_source_state(table, 0, n);
    }
}

impl Debug for PlannerNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let state = self.state.read();
        f.debug_struct("PlannerNode")
            .field("id", &self.id.raw())
            .field("operator", &state.operator_type)
            .field("parameters", &state.operator_parameters)
            .field(
                "inputs",
                &state.inputs.iter().map(|n| n.id().raw()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
