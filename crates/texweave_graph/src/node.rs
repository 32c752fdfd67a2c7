// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions: identity, kinds, port sets, and mutable arity.

use crate::image::{FilterNode, PixelProcessorNode};
use crate::math::{Arity, MathOp};
use crate::port::{InputPort, OutputPort};
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a node computes. Construction fixes the initial port set; growable
/// kinds manage a spare trailing port afterwards.
#[derive(Debug)]
pub enum NodeKind {
    /// A literal value; the stored field may be overridden by the parent
    /// graph's parameter table under the `"value"` property.
    Constant(Value),
    /// A pure expression operation.
    Math(MathOp),
    /// Read a graph variable by name.
    GetVar(String),
    /// Write a graph variable by name; sits in the execute flow.
    SetVar(String),
    /// Iterate an execute branch over a numeric range.
    ForLoop,
    /// Function entry point; at most one per function graph.
    Execute,
    /// Declares a function parameter surfaced as a variable and in the
    /// emitted signature.
    Arg {
        /// Parameter name.
        name: String,
        /// Parameter kind.
        kind: ValueKind,
    },
    /// Forward one value to several consumers in a fixed order.
    Sequence,
    /// An image filter delegating to an external processor.
    Filter(FilterNode),
    /// A per-pixel function compiled to a fragment program.
    PixelProcessor(PixelProcessorNode),
}

impl NodeKind {
    /// Default display name.
    pub fn name(&self) -> String {
        match self {
            Self::Constant(v) => match v {
                Value::Bool(_) => "Bool Constant".into(),
                Value::Float(_) => "Float Constant".into(),
                Value::Float2(_) => "Float2 Constant".into(),
                Value::Float3(_) => "Float3 Constant".into(),
                Value::Float4(_) => "Float4 Constant".into(),
                Value::Texture(_) => "Texture Constant".into(),
            },
            Self::Math(op) => op.name().into(),
            Self::GetVar(_) => "Get Var".into(),
            Self::SetVar(_) => "Set Var".into(),
            Self::ForLoop => "For Loop".into(),
            Self::Execute => "Execute".into(),
            Self::Arg { .. } => "Arg".into(),
            Self::Sequence => "Sequence".into(),
            Self::Filter(f) => f.kind.name().into(),
            Self::PixelProcessor(_) => "Pixel Processor".into(),
        }
    }

    fn input_ports(&self) -> Vec<InputPort> {
        match self {
            Self::Constant(_) | Self::GetVar(_) | Self::Execute | Self::Arg { .. } => Vec::new(),
            Self::Math(op) => {
                let count = match op.arity() {
                    Arity::Fixed(n) => n,
                    Arity::Variadic => 2,
                };
                (0..count)
                    .map(|i| InputPort::new(op.input_label(i), op.input_mask(i)))
                    .collect()
            }
            Self::SetVar(_) => vec![
                InputPort::new("Execute", ValueKind::EXECUTE),
                InputPort::new("Value", ValueKind::ANY_VALUE),
            ],
            Self::ForLoop => vec![
                InputPort::new("Execute", ValueKind::EXECUTE),
                InputPort::new("Start", ValueKind::FLOAT),
                InputPort::new("End", ValueKind::FLOAT),
                InputPort::new("Increment By", ValueKind::FLOAT),
            ],
            Self::Sequence => vec![InputPort::new(
                "Any Input",
                ValueKind::ANY_VALUE | ValueKind::ANY_IMAGE,
            )],
            Self::Filter(f) => f.kind.input_ports(),
            Self::PixelProcessor(_) => (0..PixelProcessorNode::MIN_INPUTS)
                .map(|i| InputPort::new(format!("Input {i}"), ValueKind::ANY_IMAGE).optional())
                .collect(),
        }
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        match self {
            Self::Constant(v) => vec![OutputPort::new("Value", v.kind())],
            Self::Math(op) => vec![OutputPort::new("Result", op.output_mask())],
            Self::GetVar(_) => vec![OutputPort::new("Value", ValueKind::ANY_VALUE)],
            Self::SetVar(_) => vec![
                OutputPort::new("Execute", ValueKind::EXECUTE),
                OutputPort::new("Value", ValueKind::ANY_VALUE),
            ],
            Self::ForLoop => vec![
                OutputPort::new("Loop", ValueKind::EXECUTE),
                OutputPort::new("Current", ValueKind::FLOAT),
                OutputPort::new("Done", ValueKind::EXECUTE),
            ],
            Self::Execute => vec![OutputPort::new("Execute", ValueKind::EXECUTE)],
            Self::Arg { .. } => Vec::new(),
            Self::Sequence => (0..Node::SEQUENCE_MIN_OUTPUTS)
                .map(|i| {
                    OutputPort::new(format!("{i}"), ValueKind::ANY_VALUE | ValueKind::ANY_IMAGE)
                })
                .collect(),
            Self::Filter(f) => vec![OutputPort::new("Output", f.kind.output_mask())],
            Self::PixelProcessor(_) => vec![OutputPort::new("Output", ValueKind::COLOR)],
        }
    }

    /// A fresh spare input for growable kinds, or `None` when the kind has
    /// a fixed input set.
    fn spare_input(&self, index: usize) -> Option<InputPort> {
        match self {
            Self::Math(op) if op.arity() == Arity::Variadic => {
                Some(InputPort::new(format!("Input {index}"), op.input_mask(index)))
            }
            Self::PixelProcessor(_) => {
                Some(InputPort::new(format!("Input {index}"), ValueKind::ANY_IMAGE).optional())
            }
            _ => None,
        }
    }

    /// A fresh spare output for growable kinds.
    fn spare_output(&self, index: usize) -> Option<OutputPort> {
        match self {
            Self::Sequence => Some(OutputPort::new(
                format!("{index}"),
                ValueKind::ANY_VALUE | ValueKind::ANY_IMAGE,
            )),
            _ => None,
        }
    }

    /// Minimum input count growable kinds never shrink below.
    fn min_inputs(&self) -> usize {
        match self {
            Self::Math(op) if op.arity() == Arity::Variadic => 2,
            Self::PixelProcessor(_) => PixelProcessorNode::MIN_INPUTS,
            _ => 0,
        }
    }

    /// Minimum output count growable kinds never shrink below.
    fn min_outputs(&self) -> usize {
        match self {
            Self::Sequence => Node::SEQUENCE_MIN_OUTPUTS,
            _ => 0,
        }
    }

    /// Release externally owned resources (processors, kernels, and the
    /// textures they manage). Called when the node leaves its graph.
    pub(crate) fn release(&mut self) {
        match self {
            Self::Filter(f) => f.release(),
            Self::PixelProcessor(p) => p.release(),
            _ => {}
        }
    }
}

/// A node instance: identity, kind, and its port lists.
#[derive(Debug)]
pub struct Node {
    /// Unique instance ID.
    pub id: NodeId,
    /// Display name (customizable).
    pub name: String,
    /// Per-node symbol prefix used by the shader emitter; output `i` of
    /// this node is named `{shader_id}{i}` in generated source.
    pub shader_id: String,
    /// What this node computes.
    pub kind: NodeKind,
    /// Input ports, in connection-index order.
    pub inputs: Vec<InputPort>,
    /// Output ports, in connection-index order.
    pub outputs: Vec<OutputPort>,
}

impl Node {
    pub(crate) const SEQUENCE_MIN_OUTPUTS: usize = 4;

    /// Create a node of the given kind with its default port set.
    pub fn new(kind: NodeKind) -> Self {
        let id = NodeId::new();
        Self {
            name: kind.name(),
            shader_id: shader_id_for(id),
            inputs: kind.input_ports(),
            outputs: kind.output_ports(),
            kind,
            id,
        }
    }

    /// Rename the node.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get an input port by index.
    pub fn input(&self, index: usize) -> Option<&InputPort> {
        self.inputs.get(index)
    }

    /// Get an output port by index.
    pub fn output(&self, index: usize) -> Option<&OutputPort> {
        self.outputs.get(index)
    }

    /// Number of inputs with an upstream connection.
    pub fn connected_inputs(&self) -> usize {
        self.inputs.iter().filter(|i| i.has_input()).count()
    }

    /// Whether any output carries execution flow. Nodes without one are
    /// pure producers and get inlined into loop bodies by the branch walk.
    pub fn has_execute_output(&self) -> bool {
        self.outputs.iter().any(|o| o.kind == ValueKind::EXECUTE)
    }

    /// Index of the first non-execute output: the node's result slot.
    pub fn first_value_output(&self) -> Option<usize> {
        self.outputs.iter().position(|o| o.kind != ValueKind::EXECUTE)
    }

    /// Grow a spare trailing port once every port of a growable side is
    /// occupied. Called after a connection lands on this node.
    pub(crate) fn grow_spares(&mut self) {
        if self.kind.spare_input(0).is_some() && self.inputs.iter().all(InputPort::has_input) {
            let spare = self.kind.spare_input(self.inputs.len());
            if let Some(spare) = spare {
                self.inputs.push(spare);
            }
        }
        if self.kind.spare_output(0).is_some() && self.outputs.iter().all(OutputPort::has_targets) {
            let spare = self.kind.spare_output(self.outputs.len());
            if let Some(spare) = spare {
                self.outputs.push(spare);
            }
        }
    }

    /// Prune trailing spares down to exactly one beyond the occupied
    /// ports, never below the kind's minimum. Called after a disconnect.
    pub(crate) fn prune_spares(&mut self) {
        let min = self.kind.min_inputs();
        if min > 0 {
            while self.inputs.len() > min {
                let len = self.inputs.len();
                if !self.inputs[len - 1].has_input() && !self.inputs[len - 2].has_input() {
                    self.inputs.pop();
                } else {
                    break;
                }
            }
        }
        let min = self.kind.min_outputs();
        if min > 0 {
            while self.outputs.len() > min {
                let len = self.outputs.len();
                if !self.outputs[len - 1].has_targets() && !self.outputs[len - 2].has_targets() {
                    self.outputs.pop();
                } else {
                    break;
                }
            }
        }
    }

    /// Grow spare ports until the recorded counts are reached, for
    /// snapshot restore of growable nodes.
    pub(crate) fn ensure_port_counts(&mut self, input_count: usize, output_count: usize) {
        while self.inputs.len() < input_count {
            match self.kind.spare_input(self.inputs.len()) {
                Some(spare) => self.inputs.push(spare),
                None => break,
            }
        }
        while self.outputs.len() < output_count {
            match self.kind.spare_output(self.outputs.len()) {
                Some(spare) => self.outputs.push(spare),
                None => break,
            }
        }
    }

    /// Re-assign identity, for snapshot restore: connections reference
    /// nodes by recorded id, and the shader symbol prefix follows it.
    pub(crate) fn assign_id(&mut self, id: NodeId) {
        self.id = id;
        self.shader_id = shader_id_for(id);
    }

    /// Re-run the kind's negotiation rule against the connected input
    /// kinds. `var_kind` carries the variable store's kind for `GetVar`
    /// nodes. Returns whether any output kind changed.
    pub(crate) fn refresh_output_kinds(
        &mut self,
        input_kinds: &[Option<ValueKind>],
        var_kind: Option<ValueKind>,
    ) -> bool {
        let mut changed = false;
        let mut set = |outputs: &mut Vec<OutputPort>, index: usize, kind: ValueKind| {
            if let Some(out) = outputs.get_mut(index) {
                if out.kind != kind {
                    out.kind = kind;
                    changed = true;
                }
            }
        };
        match &self.kind {
            NodeKind::Math(op) => {
                if let Some(kind) = op.negotiate(input_kinds) {
                    set(&mut self.outputs, 0, kind);
                }
            }
            NodeKind::SetVar(_) => {
                if let Some(kind) = input_kinds.get(1).copied().flatten() {
                    set(&mut self.outputs, 1, kind);
                }
            }
            NodeKind::GetVar(_) => {
                if let Some(kind) = var_kind {
                    set(&mut self.outputs, 0, kind);
                }
            }
            NodeKind::Sequence => {
                if let Some(kind) = input_kinds.first().copied().flatten() {
                    for i in 0..self.outputs.len() {
                        set(&mut self.outputs, i, kind);
                    }
                }
            }
            NodeKind::Filter(_) => {
                if let Some(kind) = input_kinds.first().copied().flatten() {
                    set(&mut self.outputs, 0, kind);
                }
            }
            _ => {}
        }
        changed
    }
}

fn shader_id_for(id: NodeId) -> String {
    let simple = id.0.simple().to_string();
    format!("S{}", &simple[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_id_shape() {
        let n = Node::new(NodeKind::Math(MathOp::Add));
        assert!(n.shader_id.starts_with('S'));
        assert_eq!(n.shader_id.len(), 9);
    }

    #[test]
    fn test_math_node_ports() {
        let n = Node::new(NodeKind::Math(MathOp::Lerp));
        assert_eq!(n.inputs.len(), 3);
        assert_eq!(n.outputs.len(), 1);
        assert!(!n.has_execute_output());
        assert_eq!(n.first_value_output(), Some(0));
    }

    #[test]
    fn test_for_loop_ports() {
        let n = Node::new(NodeKind::ForLoop);
        assert_eq!(n.inputs.len(), 4);
        assert_eq!(n.outputs.len(), 3);
        assert_eq!(n.outputs[0].kind, ValueKind::EXECUTE);
        assert_eq!(n.first_value_output(), Some(1));
        assert!(n.has_execute_output());
    }

    #[test]
    fn test_constant_has_value_at_index_zero() {
        let n = Node::new(NodeKind::Constant(Value::Float(3.0)));
        assert!(n.inputs.is_empty());
        assert_eq!(n.first_value_output(), Some(0));
        assert_eq!(n.outputs[0].kind, ValueKind::FLOAT);
    }
}
