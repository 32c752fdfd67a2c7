// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure: node arena, connections, variables, and
//! parameter overrides.

use crate::function::Function;
use crate::node::{Node, NodeId, NodeKind};
use crate::port::PortRef;
use crate::value::{Value, ValueKind};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};

/// A variable slot in the graph's store.
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    /// Current value.
    pub value: Value,
    /// Declared kind, used for typed lookups and GLSL declarations.
    pub kind: ValueKind,
}

/// An entry in the parameter override table. Lets an enclosing graph
/// substitute either a literal or a whole function for a node's own
/// stored field at evaluation time.
pub enum ParameterValue {
    /// A literal override.
    Constant {
        /// The override value.
        value: Value,
        /// Its kind.
        kind: ValueKind,
    },
    /// A function evaluated on demand; its result is the override.
    Function(Box<Function>),
}

impl ParameterValue {
    /// A literal override with the value's natural kind.
    pub fn constant(value: Value) -> Self {
        Self::Constant {
            kind: value.kind(),
            value,
        }
    }

    /// The override's kind.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Constant { kind, .. } => *kind,
            Self::Function(f) => f.expected,
        }
    }
}

impl std::fmt::Debug for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant { value, kind } => f
                .debug_struct("Constant")
                .field("value", value)
                .field("kind", kind)
                .finish(),
            Self::Function(_) => f.debug_struct("Function").finish_non_exhaustive(),
        }
    }
}

/// Context a graph hands to an embedded function when evaluating it:
/// the builtin bindings the function cannot reach on its own.
#[derive(Debug, Clone, Default)]
pub struct FunctionEnv {
    /// Output resolution of the enclosing graph.
    pub size: glam::Vec2,
    /// Current sample position; `(0, 0)` outside a per-pixel context.
    pub pos: glam::Vec2,
    /// The enclosing graph's random seed.
    pub seed: f32,
    /// The enclosing graph's constant parameters, surfaced to the
    /// function as `p_`-prefixed variables.
    pub parameters: Vec<(String, Value, ValueKind)>,
    /// Argument bindings for the function's declared `Arg` nodes.
    pub args: Vec<(String, Value)>,
}

/// Error when creating or removing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Node not found.
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Port index out of range.
    #[error("port {port} not found on node {node:?}")]
    PortNotFound {
        /// The node addressed.
        node: NodeId,
        /// The port index addressed.
        port: usize,
    },

    /// The output's kind does not intersect the input's accepted mask.
    #[error("incompatible kinds: {output:?} does not intersect {accepts:?}")]
    Incompatible {
        /// Kind carried by the output.
        output: ValueKind,
        /// Mask accepted by the input.
        accepts: ValueKind,
    },

    /// Self-loops are rejected.
    #[error("self-loop not allowed")]
    SelfLoop,

    /// Disconnect of a pairing that does not exist.
    #[error("ports are not connected")]
    NotConnected,
}

/// An unordered collection of nodes plus their connections, a variable
/// store, a parameter override table, and a random seed. Edits feed a
/// dirty queue the evaluator drains after each discrete change.
#[derive(Debug, Default)]
pub struct Graph {
    /// Unique graph ID.
    pub id: uuid::Uuid,
    /// Graph name.
    pub name: String,
    /// Output resolution, consulted by image nodes and function `size`.
    pub width: u32,
    /// Output resolution, consulted by image nodes and function `size`.
    pub height: u32,
    nodes: IndexMap<NodeId, Node>,
    variables: IndexMap<String, VariableDefinition>,
    parameters: IndexMap<String, ParameterValue>,
    random_seed: f32,
    pending: VecDeque<NodeId>,
}

impl Graph {
    /// Create a new empty graph at the default 256x256 resolution.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            width: 256,
            height: 256,
            ..Self::default()
        }
    }

    /// Set the output resolution.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Add a node and mark it dirty.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        self.pending.push_back(id);
        id
    }

    /// Remove a node, releasing its connections on both sides and any
    /// externally owned resources. A removed `SetVar` takes its variable
    /// with it.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let mut node = self.nodes.swap_remove(&node_id)?;

        for input in &node.inputs {
            if let Some(src) = input.source {
                if let Some(up) = self.nodes.get_mut(&src.node) {
                    if let Some(out) = up.outputs.get_mut(src.port) {
                        out.targets.retain(|t| t.node != node_id);
                    }
                    up.prune_spares();
                }
            }
        }
        for output in &node.outputs {
            for target in &output.targets {
                if let Some(down) = self.nodes.get_mut(&target.node) {
                    if let Some(input) = down.inputs.get_mut(target.port) {
                        input.source = None;
                    }
                    down.prune_spares();
                    self.pending.push_back(target.node);
                }
            }
        }

        if let NodeKind::SetVar(name) = &node.kind {
            let name = name.clone();
            self.remove_var(&name);
        }
        node.kind.release();

        tracing::debug!(node = %node.name, "removed node");
        Some(node)
    }

    /// Get a node by ID.
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID.
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Iterate all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterate all node IDs.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Connect an output to an input.
    ///
    /// Fails when the output's negotiated kind does not intersect the
    /// input's accepted mask. Success replaces any prior connection on the
    /// input, re-runs kind negotiation downstream, and dirties the
    /// downstream node.
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_port: usize,
        to_node: NodeId,
        to_port: usize,
    ) -> Result<(), ConnectError> {
        if from_node == to_node {
            return Err(ConnectError::SelfLoop);
        }
        let source = self
            .nodes
            .get(&from_node)
            .ok_or(ConnectError::NodeNotFound(from_node))?;
        let output = source.output(from_port).ok_or(ConnectError::PortNotFound {
            node: from_node,
            port: from_port,
        })?;
        let out_kind = output.kind;
        let target = self
            .nodes
            .get(&to_node)
            .ok_or(ConnectError::NodeNotFound(to_node))?;
        let input = target.input(to_port).ok_or(ConnectError::PortNotFound {
            node: to_node,
            port: to_port,
        })?;
        if !out_kind.intersects(input.accepts) {
            tracing::debug!(
                from = %source.name,
                to = %target.name,
                "rejected connection: {:?} does not intersect {:?}",
                out_kind,
                input.accepts
            );
            return Err(ConnectError::Incompatible {
                output: out_kind,
                accepts: input.accepts,
            });
        }

        // An input holds exactly one upstream; replace any prior link.
        // The unlink is minimal here: no pruning or clearing on the target
        // side, since the port is refilled immediately.
        if let Some(old) = input.source {
            if let Some(up) = self.nodes.get_mut(&old.node) {
                if let Some(out) = up.outputs.get_mut(old.port) {
                    out.targets.retain(|t| *t != PortRef::new(to_node, to_port));
                }
                up.prune_spares();
            }
        }

        if let Some(target) = self.nodes.get_mut(&to_node) {
            target.inputs[to_port].source = Some(PortRef::new(from_node, from_port));
            target.grow_spares();
        }
        if let Some(source) = self.nodes.get_mut(&from_node) {
            source.outputs[from_port]
                .targets
                .push(PortRef::new(to_node, to_port));
            source.grow_spares();
        }

        self.update_output_kinds(to_node);
        self.pending.push_back(to_node);
        Ok(())
    }

    /// Remove the pairing between an output and an input. The downstream
    /// node's cached outputs are cleared (its value is absent now) and it
    /// is dirtied along with its own consumers.
    pub fn disconnect(
        &mut self,
        from_node: NodeId,
        from_port: usize,
        to_node: NodeId,
        to_port: usize,
    ) -> Result<(), ConnectError> {
        let target = self
            .nodes
            .get(&to_node)
            .ok_or(ConnectError::NodeNotFound(to_node))?;
        let input = target.input(to_port).ok_or(ConnectError::PortNotFound {
            node: to_node,
            port: to_port,
        })?;
        if input.source != Some(PortRef::new(from_node, from_port)) {
            return Err(ConnectError::NotConnected);
        }

        if let Some(source) = self.nodes.get_mut(&from_node) {
            if let Some(out) = source.outputs.get_mut(from_port) {
                out.targets
                    .retain(|t| *t != PortRef::new(to_node, to_port));
            }
            source.prune_spares();
        }

        let mut var_to_clear = None;
        if let Some(target) = self.nodes.get_mut(&to_node) {
            target.inputs[to_port].source = None;
            target.prune_spares();
            for out in &mut target.outputs {
                out.value = None;
            }
            if let NodeKind::SetVar(name) = &target.kind {
                if to_port == 1 {
                    var_to_clear = Some(name.clone());
                }
            }
            let downstream: Vec<NodeId> = target
                .outputs
                .iter()
                .flat_map(|o| o.targets.iter().map(|t| t.node))
                .collect();
            self.pending.push_back(to_node);
            self.pending.extend(downstream);
        }
        if let Some(name) = var_to_clear {
            self.remove_var(&name);
        }
        Ok(())
    }

    /// Cached value on an output port.
    pub fn output_value(&self, port: PortRef) -> Option<Value> {
        self.nodes.get(&port.node)?.output(port.port)?.value
    }

    /// Per-input connected kinds for a node, `None` for unconnected.
    pub fn input_kinds(&self, node_id: NodeId) -> Vec<Option<ValueKind>> {
        let Some(node) = self.nodes.get(&node_id) else {
            return Vec::new();
        };
        node.inputs
            .iter()
            .map(|input| {
                input
                    .source
                    .and_then(|src| Some(self.nodes.get(&src.node)?.output(src.port)?.kind))
            })
            .collect()
    }

    /// Per-input cached upstream values for a node, `None` when
    /// unconnected or not yet produced.
    pub fn input_values(&self, node_id: NodeId) -> Vec<Option<Value>> {
        let Some(node) = self.nodes.get(&node_id) else {
            return Vec::new();
        };
        node.inputs
            .iter()
            .map(|input| input.source.and_then(|src| self.output_value(src)))
            .collect()
    }

    /// Re-run kind negotiation from a node, walking downstream until no
    /// output kind changes. Idempotent. A `SetVar` met here also records
    /// its variable's kind in the store, so readers negotiate correctly
    /// before anything has run.
    pub fn update_output_kinds(&mut self, start: NodeId) {
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let kinds = self.input_kinds(id);
            let var_kind = match self.nodes.get(&id).map(|n| &n.kind) {
                Some(NodeKind::GetVar(name)) => self.variables.get(name).map(|v| v.kind),
                Some(NodeKind::SetVar(name)) => {
                    if let Some(kind) = kinds.get(1).copied().flatten() {
                        let name = name.clone();
                        let value = self
                            .variables
                            .get(&name)
                            .map(|v| v.value)
                            .unwrap_or_else(|| Value::zero(kind));
                        self.variables
                            .insert(name, VariableDefinition { value, kind });
                    }
                    None
                }
                _ => None,
            };
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.refresh_output_kinds(&kinds, var_kind) {
                for out in &node.outputs {
                    queue.extend(out.targets.iter().map(|t| t.node));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Dirty queue
    // ------------------------------------------------------------------

    /// Mark a node for re-evaluation.
    pub fn dirty(&mut self, node_id: NodeId) {
        self.pending.push_back(node_id);
    }

    /// Pop the next node awaiting re-evaluation.
    pub(crate) fn pop_dirty(&mut self) -> Option<NodeId> {
        self.pending.pop_front()
    }

    /// Number of queued re-evaluations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ------------------------------------------------------------------
    // Variable store
    // ------------------------------------------------------------------

    /// Set a variable. Names are unique within one graph; setting again
    /// overwrites.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value, kind: ValueKind) {
        self.variables
            .insert(name.into(), VariableDefinition { value, kind });
    }

    /// Current value of a variable.
    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.variables.get(name).map(|v| v.value)
    }

    /// Declared kind of a variable.
    pub fn var_kind(&self, name: &str) -> Option<ValueKind> {
        self.variables.get(name).map(|v| v.kind)
    }

    /// Whether a variable exists.
    pub fn has_var(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Remove a variable.
    pub fn remove_var(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        self.variables.shift_remove(name);
    }

    /// Names of variables whose kind intersects `mask`, sorted.
    pub fn available_variables(&self, mask: ValueKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .variables
            .iter()
            .filter(|(_, v)| v.kind.intersects(mask))
            .map(|(k, _)| k.clone())
            .collect();
        names.sort();
        names
    }

    /// Iterate the variable store.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &VariableDefinition)> {
        self.variables.iter()
    }

    // ------------------------------------------------------------------
    // Parameter overrides
    // ------------------------------------------------------------------

    fn parameter_key(node_id: NodeId, property: &str) -> String {
        format!("{}.{property}", node_id.0)
    }

    /// Install an override for a node's property.
    pub fn set_parameter_value(&mut self, node_id: NodeId, property: &str, value: ParameterValue) {
        self.parameters
            .insert(Self::parameter_key(node_id, property), value);
    }

    /// Whether an override exists for a node's property.
    pub fn has_parameter_value(&self, node_id: NodeId, property: &str) -> bool {
        self.parameters
            .contains_key(&Self::parameter_key(node_id, property))
    }

    /// Resolve an override. Function-valued overrides are evaluated
    /// against this graph's environment and yield their result.
    pub fn parameter_value(&mut self, node_id: NodeId, property: &str) -> Option<Value> {
        let key = Self::parameter_key(node_id, property);
        if !self.parameters.contains_key(&key) {
            return None;
        }
        let env = self.function_env();
        match self.parameters.get_mut(&key)? {
            ParameterValue::Constant { value, .. } => Some(*value),
            ParameterValue::Function(f) => f.run(&env),
        }
    }

    /// Remove an override.
    pub fn remove_parameter_value(&mut self, node_id: NodeId, property: &str) {
        self.parameters
            .shift_remove(&Self::parameter_key(node_id, property));
    }

    /// Iterate the constant parameter overrides as `(key, value, kind)`.
    pub(crate) fn constant_parameters(&self) -> Vec<(String, Value, ValueKind)> {
        self.parameters
            .iter()
            .filter_map(|(k, p)| match p {
                ParameterValue::Constant { value, kind } => Some((k.clone(), *value, *kind)),
                ParameterValue::Function(_) => None,
            })
            .collect()
    }

    /// The environment this graph supplies to embedded functions.
    pub fn function_env(&self) -> FunctionEnv {
        FunctionEnv {
            size: glam::Vec2::new(self.width as f32, self.height as f32),
            pos: glam::Vec2::ZERO,
            seed: self.random_seed,
            parameters: self.constant_parameters(),
            args: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Random seed
    // ------------------------------------------------------------------

    /// The seed stochastic nodes mix into their hash, making results
    /// reproducible within one graph instance.
    pub fn random_seed(&self) -> f32 {
        self.random_seed
    }

    /// Re-seed the graph and dirty every stochastic node.
    pub fn assign_seed(&mut self, seed: f32) {
        self.random_seed = seed;
        if self.has_var("RandomSeed") {
            self.set_var("RandomSeed", Value::Float(seed), ValueKind::FLOAT);
        }
        let stochastic: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Math(crate::math::MathOp::Random)))
            .map(|(id, _)| *id)
            .collect();
        self.pending.extend(stochastic);
    }
}
