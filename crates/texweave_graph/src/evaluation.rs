// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change propagation and CPU evaluation.
//!
//! Edits (connections, parameter pokes, value writes) land on the graph's
//! dirty queue. [`Evaluator::drain`] pops node ids and re-processes them:
//! a node reads its required inputs' cached values, computes, stores into
//! its output's cache, and its consumers are queued in turn — propagation
//! order is exactly the notification chain, with no global scheduler
//! pass. Incomplete inputs are a silent no-op, not an error; mid-edit
//! graphs are routinely incomplete. There is no cycle detection here: the
//! graph is kept acyclic by construction at the editing layer.
//!
//! Image-family nodes are expensive (a GPU pass each), so they are routed
//! through the [`Debouncer`] instead of processing synchronously; their
//! recomputes surface in [`Evaluator::poll`] on the graph-owning thread.

use crate::debounce::Debouncer;
use crate::flow;
use crate::graph::Graph;
use crate::math::{Arity, MathOp};
use crate::node::{NodeId, NodeKind};
use crate::value::{TextureHandle, Value};
use std::time::Duration;

/// Drains the dirty queue and owns the debouncer for expensive nodes.
pub struct Evaluator {
    debouncer: Debouncer,
}

impl Evaluator {
    /// Evaluator with the default debounce window.
    pub fn new() -> Self {
        Self::with_window(Debouncer::DEFAULT_WINDOW)
    }

    /// Evaluator with a custom debounce window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(window),
        }
    }

    /// Process queued nodes until the queue is empty. Cheap nodes run
    /// synchronously and queue their consumers; expensive nodes are
    /// rescheduled onto the debouncer instead.
    pub fn drain(&mut self, graph: &mut Graph) {
        while let Some(id) = graph.pop_dirty() {
            self.step(graph, id);
        }
    }

    /// Process debounced recomputes whose quiescence window has elapsed,
    /// then drain whatever they invalidated. Must be called from the
    /// thread that owns the graph (and the GPU context). Returns how many
    /// debounced nodes fired.
    pub fn poll(&mut self, graph: &mut Graph) -> usize {
        let fired = self.debouncer.expired();
        let count = fired.len();
        for id in fired {
            let changed = process_node(graph, id);
            notify(graph, id, &changed);
        }
        self.drain(graph);
        count
    }

    /// Number of debounced recomputes still waiting out their window.
    pub fn pending_debounces(&self) -> usize {
        self.debouncer.pending()
    }

    /// Drain, then block until every pending debounce has fired and been
    /// processed. Convenience for tests and batch (non-interactive) use.
    pub fn settle(&mut self, graph: &mut Graph) {
        self.drain(graph);
        while self.debouncer.pending() > 0 {
            std::thread::sleep(Duration::from_millis(5));
            self.poll(graph);
        }
        self.poll(graph);
    }

    fn step(&mut self, graph: &mut Graph, id: NodeId) {
        let debounced = matches!(
            graph.node(id).map(|n| &n.kind),
            Some(NodeKind::Filter(_) | NodeKind::PixelProcessor(_))
        );
        if debounced {
            self.debouncer.trigger(id);
            return;
        }
        let changed = process_node(graph, id);
        notify(graph, id, &changed);
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(graph: &mut Graph, id: NodeId, changed_outputs: &[usize]) {
    let Some(node) = graph.node(id) else {
        return;
    };
    let downstream: Vec<NodeId> = changed_outputs
        .iter()
        .filter_map(|i| node.output(*i))
        .flat_map(|out| out.targets.iter().map(|t| t.node))
        .collect();
    for target in downstream {
        graph.dirty(target);
    }
}

/// Re-process one node in place: the guard-then-compute step. Returns the
/// indices of outputs whose cached value changed; missing required inputs
/// make this a silent no-op.
pub fn process_node(graph: &mut Graph, id: NodeId) -> Vec<usize> {
    enum Plan {
        Constant(Value),
        Math(MathOp),
        GetVar(String),
        SetVar(String),
        ForLoop,
        Sequence,
        Filter,
        Pixel,
        Inert,
    }
    let plan = match graph.node(id).map(|n| &n.kind) {
        Some(NodeKind::Constant(v)) => Plan::Constant(*v),
        Some(NodeKind::Math(op)) => Plan::Math(*op),
        Some(NodeKind::GetVar(name)) => Plan::GetVar(name.clone()),
        Some(NodeKind::SetVar(name)) => Plan::SetVar(name.clone()),
        Some(NodeKind::ForLoop) => Plan::ForLoop,
        Some(NodeKind::Sequence) => Plan::Sequence,
        Some(NodeKind::Filter(_)) => Plan::Filter,
        Some(NodeKind::PixelProcessor(_)) => Plan::Pixel,
        Some(NodeKind::Execute | NodeKind::Arg { .. }) => Plan::Inert,
        None => return Vec::new(),
    };

    match plan {
        Plan::Constant(stored) => {
            let value = graph.parameter_value(id, "value").unwrap_or(stored);
            store(graph, id, 0, value)
        }
        Plan::Math(op) => {
            let Some(values) = math_values(graph, id, op) else {
                return Vec::new();
            };
            let seed = graph.random_seed();
            let Some(result) = op.apply(&values, seed) else {
                tracing::trace!(node = ?id, "math op not computable for current inputs");
                return Vec::new();
            };
            store(graph, id, 0, result)
        }
        Plan::GetVar(name) => {
            let Some(value) = graph.get_var(&name) else {
                return Vec::new();
            };
            let kind = graph.var_kind(&name);
            if let (Some(kind), Some(node)) = (kind, graph.node_mut(id)) {
                if let Some(out) = node.outputs.get_mut(0) {
                    out.kind = kind;
                }
            }
            store(graph, id, 0, value)
        }
        Plan::SetVar(name) => {
            let Some(value) = graph.input_values(id).get(1).copied().flatten() else {
                return Vec::new();
            };
            let kind = graph
                .input_kinds(id)
                .get(1)
                .copied()
                .flatten()
                .unwrap_or_else(|| value.kind());
            graph.set_var(name, value, kind);
            if let Some(node) = graph.node_mut(id) {
                if let Some(out) = node.outputs.get_mut(1) {
                    out.kind = kind;
                }
            }
            store(graph, id, 1, value)
        }
        Plan::ForLoop => run_loop(graph, id),
        Plan::Sequence => {
            let Some(value) = graph.input_values(id).first().copied().flatten() else {
                return Vec::new();
            };
            let Some(node) = graph.node_mut(id) else {
                return Vec::new();
            };
            let mut changed = Vec::new();
            for (i, out) in node.outputs.iter_mut().enumerate() {
                out.value = Some(value);
                changed.push(i);
            }
            changed
        }
        Plan::Filter => process_filter(graph, id),
        Plan::Pixel => process_pixel(graph, id),
        Plan::Inert => Vec::new(),
    }
}

fn store(graph: &mut Graph, id: NodeId, slot: usize, value: Value) -> Vec<usize> {
    let Some(node) = graph.node_mut(id) else {
        return Vec::new();
    };
    let Some(out) = node.outputs.get_mut(slot) else {
        return Vec::new();
    };
    if out.value == Some(value) {
        return Vec::new();
    }
    out.value = Some(value);
    vec![slot]
}

/// Gather a math node's connected input values, enforcing its arity: all
/// inputs for a fixed op, at least two (and every connected one carrying
/// a value) for a variadic op.
fn math_values(graph: &Graph, id: NodeId, op: MathOp) -> Option<Vec<Value>> {
    let node = graph.node(id)?;
    let values = graph.input_values(id);
    match op.arity() {
        Arity::Fixed(n) => {
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                if !node.input(i)?.has_input() {
                    return None;
                }
                out.push((*values.get(i)?)?);
            }
            Some(out)
        }
        Arity::Variadic => {
            let mut out = Vec::new();
            for (i, input) in node.inputs.iter().enumerate() {
                if input.has_input() {
                    out.push((*values.get(i)?)?);
                }
            }
            if out.len() < 2 {
                None
            } else {
                Some(out)
            }
        }
    }
}

/// Interpret a for-loop: a literal host loop over the start/end/increment
/// range, binding the current index into output 1 each iteration and
/// re-processing the branch-walk body set in order. Ascending when
/// `start <= end`, descending otherwise; both directions exclude `end`.
fn run_loop(graph: &mut Graph, id: NodeId) -> Vec<usize> {
    let values = graph.input_values(id);
    let read = |i: usize| values.get(i).copied().flatten().and_then(|v| v.as_float());
    let (Some(start), Some(end), Some(incr)) = (read(1), read(2), read(3)) else {
        return Vec::new();
    };
    if incr <= 0.0 {
        tracing::warn!(start, end, incr, "for loop increment must be positive; skipping");
        return Vec::new();
    }

    let body = flow::loop_body(graph, id);
    if body.is_empty() {
        return Vec::new();
    }

    let mut bind = |graph: &mut Graph, i: f32| {
        if let Some(node) = graph.node_mut(id) {
            if let Some(out) = node.outputs.get_mut(1) {
                out.value = Some(Value::Float(i));
            }
        }
    };

    if start <= end {
        let mut i = start;
        while i < end {
            bind(graph, i);
            for n in &body {
                process_node(graph, *n);
            }
            i += incr;
        }
    } else {
        let mut i = start;
        while i > end {
            bind(graph, i);
            for n in &body {
                process_node(graph, *n);
            }
            i -= incr;
        }
    }
    Vec::new()
}

fn process_filter(graph: &mut Graph, id: NodeId) -> Vec<usize> {
    // Resolve the parameter override first; it may evaluate a function.
    let property = match graph.node(id).map(|n| &n.kind) {
        Some(NodeKind::Filter(f)) => f.kind.parameter_name(),
        _ => return Vec::new(),
    };
    let override_value = property
        .and_then(|p| graph.parameter_value(id, p))
        .and_then(|v| v.as_float());

    let Some(textures) = gather_textures(graph, id, true) else {
        return Vec::new();
    };

    let Some(node) = graph.node_mut(id) else {
        return Vec::new();
    };
    let NodeKind::Filter(filter) = &mut node.kind else {
        return Vec::new();
    };
    if let Some(v) = override_value {
        filter.kind.apply_override(v);
    }
    let Some(result) = filter.run(&textures) else {
        return Vec::new();
    };
    if let Some(out) = node.outputs.get_mut(0) {
        out.value = Some(Value::Texture(result));
    }
    // The texture mutated in place behind an unchanged handle, so
    // downstream must always be notified.
    vec![0]
}

fn process_pixel(graph: &mut Graph, id: NodeId) -> Vec<usize> {
    let Some(textures) = gather_textures(graph, id, false) else {
        return Vec::new();
    };
    let env = graph.function_env();
    let Some(node) = graph.node_mut(id) else {
        return Vec::new();
    };
    let NodeKind::PixelProcessor(pixel) = &mut node.kind else {
        return Vec::new();
    };
    let Some(result) = pixel.run(&env, &textures) else {
        return Vec::new();
    };
    if let Some(out) = node.outputs.get_mut(0) {
        out.value = Some(Value::Texture(result));
    }
    vec![0]
}

/// Collect a node's input textures. With `compact`, missing optional
/// inputs are skipped; otherwise each missing slot is padded with an
/// invalid handle so positions line up with the kernel's samplers. `None`
/// when a required input is absent.
fn gather_textures(graph: &Graph, id: NodeId, compact: bool) -> Option<Vec<TextureHandle>> {
    let node = graph.node(id)?;
    let values = graph.input_values(id);
    let mut textures = Vec::new();
    for (i, input) in node.inputs.iter().enumerate() {
        match values.get(i).copied().flatten().and_then(|v| v.as_texture()) {
            Some(t) if t.is_valid() => textures.push(t),
            _ if input.required => return None,
            _ if compact => {}
            _ => textures.push(TextureHandle::INVALID),
        }
    }
    Some(textures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ParameterValue;
    use crate::image::{FilterKind, FilterNode, Processor};
    use crate::node::Node;
    use crate::value::ValueKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProcessor {
        runs: Arc<AtomicUsize>,
        completes: Arc<AtomicUsize>,
    }

    impl Processor for CountingProcessor {
        fn process(&mut self, _w: u32, _h: u32, _inputs: &[TextureHandle], _out: TextureHandle) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
        fn complete(&mut self) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&mut self) {}
    }

    fn float_const(v: f32) -> Node {
        Node::new(NodeKind::Constant(Value::Float(v)))
    }

    #[test]
    fn test_propagation_reaches_downstream() {
        let mut g = Graph::new("test");
        let c = g.add_node(float_const(3.0));
        let neg = g.add_node(Node::new(NodeKind::Math(MathOp::Negate)));
        let abs = g.add_node(Node::new(NodeKind::Math(MathOp::Abs)));
        g.connect(c, 0, neg, 0).unwrap();
        g.connect(neg, 0, abs, 0).unwrap();

        let mut ev = Evaluator::new();
        ev.drain(&mut g);

        assert_eq!(g.node(neg).unwrap().outputs[0].value, Some(Value::Float(-3.0)));
        assert_eq!(g.node(abs).unwrap().outputs[0].value, Some(Value::Float(3.0)));
    }

    #[test]
    fn test_edit_repropagates() {
        let mut g = Graph::new("test");
        let c = g.add_node(float_const(3.0));
        let neg = g.add_node(Node::new(NodeKind::Math(MathOp::Negate)));
        g.connect(c, 0, neg, 0).unwrap();

        let mut ev = Evaluator::new();
        ev.drain(&mut g);
        assert_eq!(g.node(neg).unwrap().outputs[0].value, Some(Value::Float(-3.0)));

        if let Some(node) = g.node_mut(c) {
            node.kind = NodeKind::Constant(Value::Float(5.0));
        }
        g.dirty(c);
        ev.drain(&mut g);
        assert_eq!(g.node(neg).unwrap().outputs[0].value, Some(Value::Float(-5.0)));
    }

    #[test]
    fn test_incomplete_input_is_silent_noop() {
        let mut g = Graph::new("test");
        let add = g.add_node(Node::new(NodeKind::Math(MathOp::Add)));
        let c = g.add_node(float_const(1.0));
        g.connect(c, 0, add, 0).unwrap();

        let mut ev = Evaluator::new();
        ev.drain(&mut g);
        assert_eq!(g.node(add).unwrap().outputs[0].value, None);
    }

    #[test]
    fn test_parameter_override_beats_stored_field() {
        let mut g = Graph::new("test");
        let c = g.add_node(float_const(3.0));
        let mut ev = Evaluator::new();
        ev.drain(&mut g);
        assert_eq!(g.node(c).unwrap().outputs[0].value, Some(Value::Float(3.0)));

        g.set_parameter_value(c, "value", ParameterValue::constant(Value::Float(8.0)));
        g.dirty(c);
        ev.drain(&mut g);
        assert_eq!(g.node(c).unwrap().outputs[0].value, Some(Value::Float(8.0)));
    }

    #[test]
    fn test_set_var_then_get_var_roundtrip() {
        let mut g = Graph::new("test");
        let c = g.add_node(float_const(0.5));
        let sv = g.add_node(Node::new(NodeKind::SetVar("threshold".into())));
        let gv = g.add_node(Node::new(NodeKind::GetVar("threshold".into())));
        g.connect(c, 0, sv, 1).unwrap();

        let mut ev = Evaluator::new();
        ev.drain(&mut g);
        assert_eq!(g.get_var("threshold"), Some(Value::Float(0.5)));

        g.dirty(gv);
        ev.drain(&mut g);
        assert_eq!(g.node(gv).unwrap().outputs[0].value, Some(Value::Float(0.5)));
        assert_eq!(g.node(gv).unwrap().outputs[0].kind, ValueKind::FLOAT);
    }

    #[test]
    fn test_sequence_forwards_to_consumers_in_order() {
        let mut g = Graph::new("test");
        let c = g.add_node(float_const(2.0));
        let seq = g.add_node(Node::new(NodeKind::Sequence));
        let first = g.add_node(Node::new(NodeKind::Math(MathOp::Negate)));
        let second = g.add_node(Node::new(NodeKind::Math(MathOp::Negate)));
        g.connect(c, 0, seq, 0).unwrap();
        g.connect(seq, 0, first, 0).unwrap();
        g.connect(seq, 1, second, 0).unwrap();

        let mut ev = Evaluator::new();
        ev.drain(&mut g);
        assert_eq!(
            g.node(first).unwrap().outputs[0].value,
            Some(Value::Float(-2.0))
        );
        assert_eq!(
            g.node(second).unwrap().outputs[0].value,
            Some(Value::Float(-2.0))
        );
    }

    #[test]
    fn test_debounce_coalesces_filter_recomputes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let completes = Arc::new(AtomicUsize::new(0));

        let mut g = Graph::new("test");
        let tex = g.add_node(Node::new(NodeKind::Constant(Value::Texture(
            TextureHandle(7),
        ))));
        let blur = g.add_node(Node::new(NodeKind::Filter(FilterNode::new(
            FilterKind::Blur { intensity: 10.0 },
            256,
            256,
            TextureHandle(8),
            Box::new(CountingProcessor {
                runs: Arc::clone(&runs),
                completes: Arc::clone(&completes),
            }),
        ))));
        g.connect(tex, 0, blur, 0).unwrap();

        let mut ev = Evaluator::with_window(Duration::from_millis(20));
        ev.drain(&mut g);

        // A burst of edits within the window coalesces to one pass.
        for _ in 0..5 {
            g.dirty(blur);
            ev.drain(&mut g);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        ev.settle(&mut g);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert_eq!(
            g.node(blur).unwrap().outputs[0].value,
            Some(Value::Texture(TextureHandle(8)))
        );
    }

    #[test]
    fn test_filter_missing_required_input_skips_processor() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut g = Graph::new("test");
        let blur = g.add_node(Node::new(NodeKind::Filter(FilterNode::new(
            FilterKind::Blur { intensity: 10.0 },
            256,
            256,
            TextureHandle(8),
            Box::new(CountingProcessor {
                runs: Arc::clone(&runs),
                completes: Arc::new(AtomicUsize::new(0)),
            }),
        ))));

        let mut ev = Evaluator::with_window(Duration::from_millis(10));
        g.dirty(blur);
        ev.settle(&mut g);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(g.node(blur).unwrap().outputs[0].value, None);
    }

    #[test]
    fn test_filter_intensity_override() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut g = Graph::new("test");
        let tex = g.add_node(Node::new(NodeKind::Constant(Value::Texture(
            TextureHandle(7),
        ))));
        let blur = g.add_node(Node::new(NodeKind::Filter(FilterNode::new(
            FilterKind::Blur { intensity: 10.0 },
            256,
            256,
            TextureHandle(8),
            Box::new(CountingProcessor {
                runs: Arc::clone(&runs),
                completes: Arc::new(AtomicUsize::new(0)),
            }),
        ))));
        g.connect(tex, 0, blur, 0).unwrap();
        g.set_parameter_value(blur, "intensity", ParameterValue::constant(Value::Float(3.0)));

        let mut ev = Evaluator::with_window(Duration::from_millis(10));
        ev.settle(&mut g);

        match &g.node(blur).unwrap().kind {
            NodeKind::Filter(f) => assert_eq!(f.kind, FilterKind::Blur { intensity: 3.0 }),
            _ => unreachable!(),
        }
    }
}
