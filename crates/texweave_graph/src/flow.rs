// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph traversals shared by the interpreter and the shader emitter.
//!
//! Loop bodies and execute chains are not structural entities; they are
//! discovered by walking the graph. Both execution paths must identify the
//! identical node sets, so the walks live here and nowhere else.

use crate::graph::Graph;
use crate::node::{NodeId, NodeKind};
use crate::value::ValueKind;
use std::collections::{HashSet, VecDeque};

/// Forward walk along Execute edges starting at `start`.
///
/// For every visited node, directly-connected upstream producers that have
/// no Execute output (constants, expression chains, variable reads) are
/// pulled in ahead of the consumer: they have no execution-order
/// dependency of their own but must be visible wherever the consumer runs,
/// including inside a generated loop body. Pure producers are not marked
/// seen, since they may be shared by nodes further up the chain; callers
/// deduplicate on first occurrence.
///
/// A `ForLoop` met during the walk contributes its non-body outputs only;
/// each loop gathers its own body. When an Execute output fans out to
/// several targets, each target branch recurses against the shared `seen`
/// set so sibling branches never duplicate shared prefixes. The walk does
/// not continue past `stop_at`.
pub fn travel_branch(
    graph: &Graph,
    start: NodeId,
    seen: &mut HashSet<NodeId>,
    stop_at: Option<NodeId>,
) -> Vec<NodeId> {
    let mut forward = Vec::new();
    let mut queue = VecDeque::from([start]);

    while let Some(id) = queue.pop_front() {
        if seen.contains(&id) {
            continue;
        }
        seen.insert(id);
        let Some(node) = graph.node(id) else {
            continue;
        };

        for input in &node.inputs {
            if let Some(src) = input.source {
                pull_pure_producers(graph, src.node, &mut forward);
            }
        }

        forward.push(id);

        if stop_at == Some(id) {
            continue;
        }

        for (i, out) in node.outputs.iter().enumerate() {
            if matches!(node.kind, NodeKind::ForLoop) && i == 0 {
                continue;
            }
            if out.kind != ValueKind::EXECUTE {
                continue;
            }
            if out.targets.len() > 1 {
                for target in &out.targets {
                    forward.extend(travel_branch(graph, target.node, seen, stop_at));
                }
            } else if let Some(target) = out.targets.first() {
                queue.push_back(target.node);
            }
        }
    }

    forward
}

fn pull_pure_producers(graph: &Graph, id: NodeId, out: &mut Vec<NodeId>) {
    let Some(node) = graph.node(id) else {
        return;
    };
    // Anything exposing an Execute output belongs to the flow walk, not
    // here; it is the branch boundary.
    if node.has_execute_output() {
        return;
    }
    for input in &node.inputs {
        if let Some(src) = input.source {
            pull_pure_producers(graph, src.node, out);
        }
    }
    out.push(id);
}

/// The set of nodes inside a loop's body, in execution order: every node
/// reachable forward from the loop's body output, plus the pure producers
/// they read. Each node appears once.
pub fn loop_body(graph: &Graph, loop_node: NodeId) -> Vec<NodeId> {
    let Some(node) = graph.node(loop_node) else {
        return Vec::new();
    };
    let Some(body) = node.outputs.first() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut forward = Vec::new();
    for target in &body.targets {
        forward.extend(travel_branch(graph, target.node, &mut seen, None));
    }
    dedup(forward)
}

/// Order nodes for interpretation/emission from an execute entry point,
/// stopping at the designated output node. Each node appears once.
pub fn execute_order(graph: &Graph, entry: NodeId, stop_at: Option<NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    dedup(travel_branch(graph, entry, &mut seen, stop_at))
}

/// Depth-first upstream ordering for graphs with no execute entry: walk
/// each connected input's upstream node recursively from the output,
/// memoizing visits so diamonds appear once, producers ahead of consumers.
pub fn upstream_order(graph: &Graph, output_node: NodeId) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    visit_upstream(graph, output_node, &mut seen, &mut order);
    order
}

fn visit_upstream(
    graph: &Graph,
    id: NodeId,
    seen: &mut HashSet<NodeId>,
    order: &mut Vec<NodeId>,
) {
    if !seen.insert(id) {
        return;
    }
    let Some(node) = graph.node(id) else {
        return;
    };
    for input in &node.inputs {
        if let Some(src) = input.source {
            visit_upstream(graph, src.node, seen, order);
        }
    }
    order.push(id);
}

fn dedup(ids: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
