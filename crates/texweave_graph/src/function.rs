// SPDX-License-Identifier: MIT OR Apache-2.0
//! Function graphs: expression subgraphs with a designated output,
//! interpreted on the CPU or emitted as GLSL.

use crate::evaluation::process_node;
use crate::flow;
use crate::graph::{FunctionEnv, Graph};
use crate::node::{Node, NodeId, NodeKind};
use crate::value::{Value, ValueKind};
use glam::Vec2;

/// Error when adding a node to a function graph.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    /// A function holds at most one execute entry.
    #[error("function already has an execute entry")]
    DuplicateExecute,

    /// Image-family nodes do not belong in a function graph.
    #[error("node kind not supported in a function graph: {0}")]
    UnsupportedKind(String),
}

/// A graph restricted to expression and flow nodes, with a designated
/// output node whose value is the function's result. The same subgraph is
/// either interpreted (producing a literal [`Value`]) or emitted as GLSL
/// (producing equivalent source); both paths order nodes identically.
#[derive(Debug)]
pub struct Function {
    /// The underlying node graph.
    pub graph: Graph,
    /// Kinds the output must intersect for the function to be usable.
    pub expected: ValueKind,
    /// The interpreter's last result.
    pub result: Option<Value>,
    output: Option<NodeId>,
    execute: Option<NodeId>,
    args: Vec<NodeId>,
}

impl Function {
    /// Create an empty function with the builtin variables seeded so they
    /// are available for variable reads from the start.
    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = Graph::new(name);
        graph.set_var("PI", Value::Float(std::f32::consts::PI), ValueKind::FLOAT);
        graph.set_var(
            "Rad2Deg",
            Value::Float(180.0 / std::f32::consts::PI),
            ValueKind::FLOAT,
        );
        graph.set_var(
            "Deg2Rad",
            Value::Float(std::f32::consts::PI / 180.0),
            ValueKind::FLOAT,
        );
        graph.set_var("RandomSeed", Value::Float(0.0), ValueKind::FLOAT);
        graph.set_var("pos", Value::Float2(Vec2::ZERO), ValueKind::FLOAT2);
        graph.set_var(
            "size",
            Value::Float2(Vec2::new(256.0, 256.0)),
            ValueKind::FLOAT2,
        );
        Self {
            graph,
            expected: ValueKind::ANY_VALUE,
            result: None,
            output: None,
            execute: None,
            args: Vec::new(),
        }
    }

    /// Add a node, with function-graph bookkeeping: a single execute
    /// entry is enforced, `Arg` nodes register their variable and appear
    /// in the emitted signature, and image-family nodes are rejected.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, FunctionError> {
        match &node.kind {
            NodeKind::Execute => {
                if self.execute.is_some() {
                    return Err(FunctionError::DuplicateExecute);
                }
                let id = self.graph.add_node(node);
                self.execute = Some(id);
                Ok(id)
            }
            NodeKind::Arg { name, kind } => {
                let zero = Value::zero(*kind);
                self.graph.set_var(name.clone(), zero, *kind);
                let id = self.graph.add_node(node);
                self.args.push(id);
                Ok(id)
            }
            NodeKind::Filter(_) | NodeKind::PixelProcessor(_) | NodeKind::Sequence => {
                Err(FunctionError::UnsupportedKind(node.kind.name()))
            }
            _ => Ok(self.graph.add_node(node)),
        }
    }

    /// Remove a node, clearing the execute/output/arg bookkeeping that
    /// referenced it. An `Arg` takes its variable with it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        if self.execute == Some(id) {
            self.execute = None;
        }
        if self.output == Some(id) {
            self.output = None;
        }
        self.args.retain(|a| *a != id);
        if let Some(NodeKind::Arg { name, .. }) = self.graph.node(id).map(|n| &n.kind) {
            let name = name.clone();
            self.graph.remove_var(&name);
        }
        self.graph.remove_node(id)
    }

    /// Designate (or clear) the output node.
    pub fn set_output_node(&mut self, id: Option<NodeId>) {
        self.output = id;
    }

    /// The designated output node.
    pub fn output_node(&self) -> Option<NodeId> {
        self.output
    }

    /// The execute entry, if one exists.
    pub fn execute_node(&self) -> Option<NodeId> {
        self.execute
    }

    /// Declared `Arg` nodes, in insertion order.
    pub fn args(&self) -> &[NodeId] {
        &self.args
    }

    /// The kind of the output node's result slot.
    pub fn output_kind(&self) -> Option<ValueKind> {
        let node = self.graph.node(self.output?)?;
        let slot = node.first_value_output()?;
        Some(node.outputs[slot].kind)
    }

    /// Whether the output's kind intersects the expected mask.
    pub fn has_expected_output(&self) -> bool {
        self.output_kind()
            .is_some_and(|kind| kind.intersects(self.expected))
    }

    /// The order both execution paths visit nodes in: forward from the
    /// execute entry when one exists, then the output node's own upstream
    /// chain for anything the flow walk cannot reach (a pure output fed
    /// only by value edges). Without an entry, depth-first upstream from
    /// the output alone.
    pub fn emission_order(&self) -> Vec<NodeId> {
        let Some(output) = self.output else {
            return Vec::new();
        };
        let mut order = match self.execute {
            Some(entry) => {
                let mut order = flow::execute_order(&self.graph, entry, Some(output));
                order.retain(|id| *id != entry);
                order
            }
            None => Vec::new(),
        };
        let mut seen: std::collections::HashSet<NodeId> = order.iter().copied().collect();
        for id in flow::upstream_order(&self.graph, output) {
            if seen.insert(id) {
                order.push(id);
            }
        }
        order
    }

    /// Rebuild the execute/arg bookkeeping by scanning the graph, for
    /// snapshot restore where nodes land in the graph directly.
    pub(crate) fn restore_bookkeeping(&mut self) {
        self.execute = None;
        self.args.clear();
        let mut arg_vars = Vec::new();
        for node in self.graph.nodes() {
            match &node.kind {
                NodeKind::Execute if self.execute.is_none() => self.execute = Some(node.id),
                NodeKind::Arg { name, kind } => {
                    self.args.push(node.id);
                    arg_vars.push((name.clone(), *kind));
                }
                _ => {}
            }
        }
        for (name, kind) in arg_vars {
            self.graph.set_var(name, Value::zero(kind), kind);
        }
    }

    /// Bind the caller-supplied environment into the variable store:
    /// position, size, seed, `p_`-prefixed parent parameters, and
    /// argument values.
    pub fn bind_env(&mut self, env: &FunctionEnv) {
        self.graph
            .set_var("pos", Value::Float2(env.pos), ValueKind::FLOAT2);
        self.graph
            .set_var("size", Value::Float2(env.size), ValueKind::FLOAT2);
        self.graph
            .set_var("RandomSeed", Value::Float(env.seed), ValueKind::FLOAT);
        self.graph.assign_seed(env.seed);
        for (key, value, kind) in &env.parameters {
            self.graph
                .set_var(parameter_var_name(key), *value, *kind);
        }
        for (name, value) in &env.args {
            let kind = value.kind();
            self.graph.set_var(name.clone(), *value, kind);
        }
    }

    /// Re-run kind negotiation over an ordered node list, producers
    /// first, reaching into loop bodies (the flow walk does not surface
    /// them, but their declarations must be typed too). Both paths call
    /// this so the emitted declarations and the interpreted values agree
    /// on every output kind.
    pub(crate) fn refresh_kinds(&mut self, order: &[NodeId]) {
        let mut all: Vec<NodeId> = order.to_vec();
        let mut i = 0;
        while i < all.len() {
            let id = all[i];
            if matches!(self.graph.node(id).map(|n| &n.kind), Some(NodeKind::ForLoop)) {
                for body in flow::loop_body(&self.graph, id) {
                    if !all.contains(&body) {
                        all.push(body);
                    }
                }
            }
            i += 1;
        }
        for id in all {
            self.graph.update_output_kinds(id);
        }
    }

    /// Interpret the function: bind the environment, visit nodes in
    /// emission order, and capture the output node's value as the result.
    /// `None` while the graph is incomplete.
    pub fn run(&mut self, env: &FunctionEnv) -> Option<Value> {
        self.bind_env(env);
        let order = self.emission_order();
        if order.is_empty() {
            return None;
        }
        self.refresh_kinds(&order);
        for id in &order {
            process_node(&mut self.graph, *id);
        }

        let output = self.graph.node(self.output?)?;
        let slot = output.first_value_output()?;
        self.result = output.outputs[slot].value;
        self.result
    }
}

/// The `p_`-prefixed variable name for a parameter key of the form
/// `{node}.{property}`.
pub(crate) fn parameter_var_name(key: &str) -> String {
    let prop = key.rsplit('.').next().unwrap_or(key);
    format!("p_{}", prop.replace([' ', '-'], ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::MathOp;

    #[test]
    fn test_single_execute_entry() {
        let mut f = Function::new("fn");
        assert!(f.add_node(Node::new(NodeKind::Execute)).is_ok());
        assert!(matches!(
            f.add_node(Node::new(NodeKind::Execute)),
            Err(FunctionError::DuplicateExecute)
        ));
    }

    #[test]
    fn test_arg_registers_variable() {
        let mut f = Function::new("fn");
        let arg = f
            .add_node(Node::new(NodeKind::Arg {
                name: "radius".into(),
                kind: ValueKind::FLOAT,
            }))
            .unwrap();
        assert!(f.graph.has_var("radius"));
        f.remove_node(arg);
        assert!(!f.graph.has_var("radius"));
    }

    #[test]
    fn test_builtin_vars_seeded() {
        let f = Function::new("fn");
        assert!(f.graph.has_var("PI"));
        assert!(f.graph.has_var("pos"));
        assert!(f.graph.has_var("size"));
        assert!(f.graph.has_var("RandomSeed"));
    }

    #[test]
    fn test_run_interprets_chain() {
        let mut f = Function::new("fn");
        let c = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(3.0))))
            .unwrap();
        let neg = f.add_node(Node::new(NodeKind::Math(MathOp::Negate))).unwrap();
        let abs = f.add_node(Node::new(NodeKind::Math(MathOp::Abs))).unwrap();
        f.graph.connect(c, 0, neg, 0).unwrap();
        f.graph.connect(neg, 0, abs, 0).unwrap();
        f.set_output_node(Some(abs));

        let result = f.run(&FunctionEnv::default());
        assert_eq!(result, Some(Value::Float(3.0)));
        assert!(f.has_expected_output());
    }

    #[test]
    fn test_run_incomplete_graph_is_none() {
        let mut f = Function::new("fn");
        let neg = f.add_node(Node::new(NodeKind::Math(MathOp::Negate))).unwrap();
        f.set_output_node(Some(neg));
        assert_eq!(f.run(&FunctionEnv::default()), None);
    }

    #[test]
    fn test_env_binding_visible_to_get_var() {
        let mut f = Function::new("fn");
        let gv = f
            .add_node(Node::new(NodeKind::GetVar("pos".into())))
            .unwrap();
        f.set_output_node(Some(gv));
        let env = FunctionEnv {
            pos: Vec2::new(0.25, 0.75),
            ..FunctionEnv::default()
        };
        assert_eq!(f.run(&env), Some(Value::Float2(Vec2::new(0.25, 0.75))));
    }
}
