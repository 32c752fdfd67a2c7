// SPDX-License-Identifier: MIT OR Apache-2.0
//! Input/output ports and the links between them.

use crate::node::NodeId;
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};

/// Address of a port on a node: the owning node plus the port's index
/// within that node's input or output list (which side is implied by use).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Owning node.
    pub node: NodeId,
    /// Index into the node's port list.
    pub port: usize,
}

impl PortRef {
    /// Create a port reference.
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

/// An input socket. Holds at most one upstream connection; its value is
/// always read through that link, never cached locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPort {
    /// Human-readable label.
    pub label: String,
    /// Kinds this input will accept, fixed at construction.
    pub accepts: ValueKind,
    /// Whether processing requires this input to be connected.
    pub required: bool,
    /// The upstream output feeding this input, if any.
    pub source: Option<PortRef>,
}

impl InputPort {
    /// Create an unconnected, required input.
    pub fn new(label: impl Into<String>, accepts: ValueKind) -> Self {
        Self {
            label: label.into(),
            accepts,
            required: true,
            source: None,
        }
    }

    /// Mark this input as not required for processing.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Whether an upstream output is connected. An input without one never
    /// reports data.
    pub fn has_input(&self) -> bool {
        self.source.is_some()
    }
}

/// An output socket. Carries the negotiated kind, the cached value last
/// produced by the owning node, and the fan-out list of connected inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPort {
    /// Human-readable label.
    pub label: String,
    /// Negotiated kind; starts as the constructed mask and narrows as
    /// connections resolve it.
    pub kind: ValueKind,
    /// Last value produced by the owning node, if any.
    pub value: Option<Value>,
    /// Inputs this output feeds.
    pub targets: Vec<PortRef>,
}

impl OutputPort {
    /// Create an output with no fan-out.
    pub fn new(label: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            label: label.into(),
            kind,
            value: None,
            targets: Vec::new(),
        }
    }

    /// Whether anything consumes this output.
    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }
}
