// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snapshot records: the persistence boundary.
//!
//! The engine does not define a file format; it produces and consumes
//! plain key-value records (serde) sufficient to rebuild field state and
//! reconnect ports by node id and port index. External resources
//! (processors, kernels, textures) are not serialized — a
//! [`ResourceProvider`] re-supplies them at restore time. Reconstruction
//! leaves every node on the dirty queue, so the first evaluator drain
//! brings the graph back to a processed state.

use crate::function::Function;
use crate::graph::Graph;
use crate::image::{FilterKind, FilterNode, PixelKernel, PixelProcessorNode, Processor};
use crate::math::MathOp;
use crate::node::{Node, NodeId, NodeKind};
use crate::value::{TextureHandle, Value, ValueKind};
use serde::{Deserialize, Serialize};

/// Supplies the external resources snapshots cannot carry.
pub trait ResourceProvider {
    /// A processor implementing the given filter.
    fn filter_processor(&mut self, kind: &FilterKind) -> Box<dyn Processor>;
    /// A kernel for a pixel-processor node.
    fn pixel_kernel(&mut self) -> Box<dyn PixelKernel>;
    /// An output texture of the given size.
    fn texture(&mut self, width: u32, height: u32) -> TextureHandle;
}

/// One connection, by node id and port index on both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Source node.
    pub from_node: NodeId,
    /// Source output index.
    pub from_port: usize,
    /// Target node.
    pub to_node: NodeId,
    /// Target input index.
    pub to_port: usize,
}

/// A node's kind and field state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KindRecord {
    /// Literal constant.
    Constant(Value),
    /// Expression operation.
    Math(MathOp),
    /// Variable read.
    GetVar(String),
    /// Variable write.
    SetVar(String),
    /// Loop node.
    ForLoop,
    /// Function entry.
    Execute,
    /// Function parameter declaration.
    Arg {
        /// Parameter name.
        name: String,
        /// Parameter kind.
        kind: ValueKind,
    },
    /// Ordered fan-out.
    Sequence,
    /// Image filter with its parameters and output size.
    Filter {
        /// Filter parameters.
        kind: FilterKind,
        /// Output width.
        width: u32,
        /// Output height.
        height: u32,
    },
    /// Per-pixel function node with its embedded function.
    PixelProcessor {
        /// Output width.
        width: u32,
        /// Output height.
        height: u32,
        /// The embedded function graph.
        function: FunctionRecord,
    },
}

/// One node: identity, field state, and port counts (growable nodes may
/// have grown past their construction defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id, referenced by connection records.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Kind and field state.
    pub kind: KindRecord,
    /// Input port count at snapshot time.
    pub input_count: usize,
    /// Output port count at snapshot time.
    pub output_count: usize,
}

/// A whole graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    /// Graph name.
    pub name: String,
    /// Output resolution.
    pub width: u32,
    /// Output resolution.
    pub height: u32,
    /// Random seed.
    pub seed: f32,
    /// Node records.
    pub nodes: Vec<NodeRecord>,
    /// Connection records.
    pub connections: Vec<ConnectionRecord>,
}

/// A function graph plus its designation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// The underlying graph.
    pub graph: GraphRecord,
    /// Designated output node.
    pub output: Option<NodeId>,
    /// Expected output mask.
    pub expected: ValueKind,
}

impl Graph {
    /// Capture this graph as a snapshot record.
    pub fn snapshot(&self) -> GraphRecord {
        let mut nodes = Vec::new();
        let mut connections = Vec::new();
        for node in self.nodes() {
            nodes.push(node_record(node));
            for (from_port, out) in node.outputs.iter().enumerate() {
                for target in &out.targets {
                    connections.push(ConnectionRecord {
                        from_node: node.id,
                        from_port,
                        to_node: target.node,
                        to_port: target.port,
                    });
                }
            }
        }
        GraphRecord {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            seed: self.random_seed(),
            nodes,
            connections,
        }
    }

    /// Rebuild a graph from a record. Connections that no longer
    /// validate are logged and skipped rather than failing the whole
    /// restore.
    pub fn restore(record: GraphRecord, provider: &mut dyn ResourceProvider) -> Self {
        let mut graph = Graph::new(record.name).with_size(record.width, record.height);
        graph.assign_seed(record.seed);
        for rec in record.nodes {
            graph.add_node(restore_node(rec, provider));
        }
        for c in record.connections {
            if let Err(err) = graph.connect(c.from_node, c.from_port, c.to_node, c.to_port) {
                tracing::warn!(%err, "could not restore a node connection");
            }
        }
        graph
    }
}

impl Function {
    /// Capture this function as a snapshot record.
    pub fn snapshot(&self) -> FunctionRecord {
        FunctionRecord {
            graph: self.graph.snapshot(),
            output: self.output_node(),
            expected: self.expected,
        }
    }

    /// Rebuild a function from a record.
    pub fn restore(record: FunctionRecord, provider: &mut dyn ResourceProvider) -> Self {
        let mut function = Function::new(record.graph.name.clone());
        function.graph = Graph::restore(record.graph, provider);
        function.expected = record.expected;
        function.set_output_node(record.output);
        function.restore_bookkeeping();
        function
    }
}

fn node_record(node: &Node) -> NodeRecord {
    let kind = match &node.kind {
        NodeKind::Constant(v) => KindRecord::Constant(*v),
        NodeKind::Math(op) => KindRecord::Math(*op),
        NodeKind::GetVar(name) => KindRecord::GetVar(name.clone()),
        NodeKind::SetVar(name) => KindRecord::SetVar(name.clone()),
        NodeKind::ForLoop => KindRecord::ForLoop,
        NodeKind::Execute => KindRecord::Execute,
        NodeKind::Arg { name, kind } => KindRecord::Arg {
            name: name.clone(),
            kind: *kind,
        },
        NodeKind::Sequence => KindRecord::Sequence,
        NodeKind::Filter(f) => KindRecord::Filter {
            kind: f.kind.clone(),
            width: f.width,
            height: f.height,
        },
        NodeKind::PixelProcessor(p) => KindRecord::PixelProcessor {
            width: p.width,
            height: p.height,
            function: p.function.snapshot(),
        },
    };
    NodeRecord {
        id: node.id,
        name: node.name.clone(),
        kind,
        input_count: node.inputs.len(),
        output_count: node.outputs.len(),
    }
}

fn restore_node(record: NodeRecord, provider: &mut dyn ResourceProvider) -> Node {
    let kind = match record.kind {
        KindRecord::Constant(v) => NodeKind::Constant(v),
        KindRecord::Math(op) => NodeKind::Math(op),
        KindRecord::GetVar(name) => NodeKind::GetVar(name),
        KindRecord::SetVar(name) => NodeKind::SetVar(name),
        KindRecord::ForLoop => NodeKind::ForLoop,
        KindRecord::Execute => NodeKind::Execute,
        KindRecord::Arg { name, kind } => NodeKind::Arg { name, kind },
        KindRecord::Sequence => NodeKind::Sequence,
        KindRecord::Filter {
            kind,
            width,
            height,
        } => {
            let processor = provider.filter_processor(&kind);
            let buffer = provider.texture(width, height);
            NodeKind::Filter(FilterNode::new(kind, width, height, buffer, processor))
        }
        KindRecord::PixelProcessor {
            width,
            height,
            function,
        } => {
            let kernel = provider.pixel_kernel();
            let buffer = provider.texture(width, height);
            let mut pixel = PixelProcessorNode::new(width, height, buffer, kernel);
            pixel.function = Function::restore(function, provider);
            NodeKind::PixelProcessor(pixel)
        }
    };
    let mut node = Node::new(kind).with_name(record.name);
    node.assign_id(record.id);
    node.ensure_port_counts(record.input_count, record.output_count);
    node
}
