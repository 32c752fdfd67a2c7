// SPDX-License-Identifier: MIT OR Apache-2.0
//! GLSL emission: the compiler path.
//!
//! Walks a function graph in the same order the interpreter uses and
//! emits one typed statement per node, naming each result
//! `{shader_id}{output_index}` so downstream statements reference their
//! upstream symbols directly. Emission is all-or-nothing: a node whose
//! required inputs are unconnected aborts the whole pass (`None`), and
//! the consumer keeps its previous valid program. Re-entrant but not
//! incremental; any structural change invalidates the whole body.

use crate::flow;
use crate::function::{parameter_var_name, Function};
use crate::graph::{FunctionEnv, Graph};
use crate::math::{Arity, MathOp};
use crate::node::{Node, NodeId, NodeKind};
use crate::value::{glsl_float, Value, ValueKind};
use std::collections::{HashMap, HashSet};

/// Deduplication state threaded through one emission pass: nodes already
/// emitted, and symbols/variables already declared (a second occurrence
/// assigns instead of redeclaring).
#[derive(Default)]
struct EmitSets {
    emitted: HashSet<NodeId>,
    declared: HashSet<String>,
}

struct EmitCtx<'g> {
    graph: &'g Graph,
    overrides: &'g HashMap<NodeId, Value>,
    seed: f32,
}

impl Function {
    /// Emit the statement body for this function plus the symbol naming
    /// its result. `None` while the graph is not compilable (missing
    /// output or required connections).
    pub fn body_source(&mut self, env: &FunctionEnv) -> Option<(String, String)> {
        self.bind_env(env);
        let order = self.emission_order();
        if order.is_empty() {
            return None;
        }
        self.refresh_kinds(&order);

        // Resolve constant-field overrides up front; emission itself is
        // a pure read of the graph.
        let mut overrides = HashMap::new();
        for id in &order {
            if matches!(self.graph.node(*id).map(|n| &n.kind), Some(NodeKind::Constant(_)))
                && self.graph.has_parameter_value(*id, "value")
            {
                if let Some(v) = self.graph.parameter_value(*id, "value") {
                    overrides.insert(*id, v);
                }
            }
        }

        let result = self.result_symbol()?;
        let ctx = EmitCtx {
            graph: &self.graph,
            overrides: &overrides,
            seed: env.seed,
        };
        let mut sets = EmitSets::default();
        let mut body = String::new();
        body.push_str(&body_prelude(env));
        emit_nodes(&ctx, &order, &mut sets, &mut body)?;
        Some((body, result))
    }

    /// Emit the full fragment program: prelude, uniforms, the `rand`
    /// helper, and `main()` storing the result into `FragColor`. `None`
    /// while not compilable or when the output kind misses the expected
    /// mask.
    pub fn fragment_source(&mut self, env: &FunctionEnv) -> Option<String> {
        let (body, result) = self.body_source(env)?;
        if !self.has_expected_output() {
            tracing::debug!(
                function = %self.graph.name,
                expected = ?self.expected,
                actual = ?self.output_kind(),
                "output kind misses the expected mask"
            );
            return None;
        }
        let mut frag = fragment_prelude(env.seed);
        frag.push_str("void main() {\n");
        frag.push_str(&body);
        frag.push_str(&format!("FragColor = vec4({result});\n}}\n"));
        Some(frag)
    }

    /// Emit this function as a named GLSL function, its parameters drawn
    /// from the declared `Arg` nodes and its return type from the output
    /// kind.
    pub fn function_source(&mut self, env: &FunctionEnv) -> Option<String> {
        let (body, result) = self.body_source(env)?;
        let ret = self.output_kind()?.glsl_type()?;
        let name = self.graph.name.replace(' ', "").replace('-', "_");

        let mut params = Vec::new();
        for id in self.args() {
            let Some(NodeKind::Arg { name, kind }) = self.graph.node(*id).map(|n| &n.kind) else {
                continue;
            };
            params.push(format!("{} {name}", kind.glsl_type()?));
        }

        Some(format!(
            "{ret} {name}({}) {{\n{body}return {result};\n}}\n",
            params.join(",")
        ))
    }

    fn result_symbol(&self) -> Option<String> {
        let node = self.graph.node(self.output_node()?)?;
        let slot = node.first_value_output()?;
        Some(format!("{}{}", node.shader_id, slot))
    }
}

fn fragment_prelude(seed: f32) -> String {
    format!(
        "#version 330 core\n\
         out vec4 FragColor;\n\
         in vec2 UV;\n\
         const float PI = 3.14159265359;\n\
         const float Rad2Deg = (180.0 / PI);\n\
         const float Deg2Rad = (PI / 180.0);\n\
         const float RandomSeed = {};\n\
         uniform sampler2D Input0;\n\
         uniform sampler2D Input1;\n\
         uniform sampler2D Input2;\n\
         uniform sampler2D Input3;\n\
         float rand(vec2 co) {{\n\
         return fract(sin(dot(co, vec2(12.9898,78.233))) * 43758.5453) * 2.0 - 1.0;\n\
         }}\n\n",
        glsl_float(seed)
    )
}

/// The bindings every emitted body starts with: resolution, sample
/// position, and the enclosing graph's constant parameters as
/// `p_`-prefixed locals.
fn body_prelude(env: &FunctionEnv) -> String {
    let mut out = format!(
        "vec2 size = vec2({},{});\nvec2 pos = UV;\n",
        glsl_float(env.size.x),
        glsl_float(env.size.y)
    );
    for (key, value, kind) in &env.parameters {
        let (Some(ty), Some(lit)) = (kind.glsl_type(), value.glsl_literal()) else {
            continue;
        };
        out.push_str(&format!("{ty} {} = {lit};\n", parameter_var_name(key)));
    }
    out
}

fn emit_nodes(
    ctx: &EmitCtx<'_>,
    ids: &[NodeId],
    sets: &mut EmitSets,
    out: &mut String,
) -> Option<()> {
    for id in ids {
        emit_node(ctx, *id, sets, out)?;
    }
    Some(())
}

fn emit_node(ctx: &EmitCtx<'_>, id: NodeId, sets: &mut EmitSets, out: &mut String) -> Option<()> {
    let node = ctx.graph.node(id)?;
    match &node.kind {
        NodeKind::Execute | NodeKind::Arg { .. } => {
            sets.emitted.insert(id);
            Some(())
        }
        // Variable reads and writes re-emit at every visit site; the
        // declared-symbol set demotes later occurrences to assignments.
        NodeKind::GetVar(name) => {
            if name.is_empty() {
                return None;
            }
            let sym = format!("{}0", node.shader_id);
            let ty = node.outputs.first()?.kind.glsl_type()?;
            if sets.declared.insert(sym.clone()) {
                out.push_str(&format!("{ty} {sym} = {name};\n"));
            } else {
                out.push_str(&format!("{sym} = {name};\n"));
            }
            sets.emitted.insert(id);
            Some(())
        }
        NodeKind::SetVar(name) => {
            if name.is_empty() {
                return None;
            }
            let (src, kind) = input_sym(ctx, node, 1)?;
            let ty = kind.glsl_type()?;
            let sym = format!("{}1", node.shader_id);
            if sets.declared.insert(format!("var:{name}")) {
                out.push_str(&format!("{ty} {name} = {src};\n"));
            } else {
                out.push_str(&format!("{name} = {src};\n"));
            }
            if sets.declared.insert(sym.clone()) {
                out.push_str(&format!("{ty} {sym} = {src};\n"));
            } else {
                out.push_str(&format!("{sym} = {src};\n"));
            }
            sets.emitted.insert(id);
            Some(())
        }
        _ if sets.emitted.contains(&id) => Some(()),
        NodeKind::Constant(stored) => {
            let value = ctx.overrides.get(&id).copied().unwrap_or(*stored);
            let ty = node.outputs.first()?.kind.glsl_type()?;
            let lit = value.glsl_literal()?;
            out.push_str(&format!("{ty} {}0 = {lit};\n", node.shader_id));
            sets.emitted.insert(id);
            Some(())
        }
        NodeKind::Math(op) => {
            let stmt = math_statement(ctx, node, *op)?;
            out.push_str(&stmt);
            sets.emitted.insert(id);
            Some(())
        }
        NodeKind::ForLoop => {
            let stmt = loop_statement(ctx, node, sets)?;
            out.push_str(&stmt);
            sets.emitted.insert(id);
            Some(())
        }
        // Image-family nodes have no expression form.
        NodeKind::Sequence | NodeKind::Filter(_) | NodeKind::PixelProcessor(_) => {
            tracing::debug!(node = %node.name, "node kind has no shader form");
            None
        }
    }
}

/// Both direction branches of a loop, with the body emitted once and
/// nested in each. The loop index is this node's own output-1 symbol, so
/// body statements referencing the current index resolve to the `for`
/// variable.
fn loop_statement(ctx: &EmitCtx<'_>, node: &Node, sets: &mut EmitSets) -> Option<String> {
    let (start, _) = input_sym(ctx, node, 1)?;
    let (end, _) = input_sym(ctx, node, 2)?;
    let (incr, _) = input_sym(ctx, node, 3)?;

    let body_ids = flow::loop_body(ctx.graph, node.id);
    if body_ids.is_empty() {
        return None;
    }
    let mut body = String::new();
    emit_nodes(ctx, &body_ids, sets, &mut body)?;
    if body.is_empty() {
        return None;
    }

    let inc = format!("{}1", node.shader_id);
    Some(format!(
        "if ({start} <= {end}) {{\n\
         for (float {inc} = {start}; {inc} < {end}; {inc} += {incr}) {{\n\
         {body}}}\n\
         }}\n\
         else {{\n\
         for (float {inc} = {start}; {inc} > {end}; {inc} -= {incr}) {{\n\
         {body}}}\n\
         }}\n"
    ))
}

fn input_sym(ctx: &EmitCtx<'_>, node: &Node, index: usize) -> Option<(String, ValueKind)> {
    let src = node.input(index)?.source?;
    let up = ctx.graph.node(src.node)?;
    let out = up.output(src.port)?;
    Some((format!("{}{}", up.shader_id, src.port), out.kind))
}

fn math_statement(ctx: &EmitCtx<'_>, node: &Node, op: MathOp) -> Option<String> {
    let sym = format!("{}0", node.shader_id);
    let ty = node.outputs.first()?.kind.glsl_type()?;

    let syms: Vec<(String, ValueKind)> = match op.arity() {
        Arity::Fixed(n) => {
            let mut syms = Vec::with_capacity(n);
            for i in 0..n {
                syms.push(input_sym(ctx, node, i)?);
            }
            syms
        }
        Arity::Variadic => {
            let mut syms = Vec::new();
            for i in 0..node.inputs.len() {
                if node.inputs[i].has_input() {
                    syms.push(input_sym(ctx, node, i)?);
                }
            }
            if syms.len() < 2 {
                return None;
            }
            syms
        }
    };
    let a = |i: usize| syms[i].0.as_str();

    let stmt = match op {
        MathOp::Add => format!("{ty} {sym} = {} + {};\n", a(0), a(1)),
        MathOp::Subtract => format!("{ty} {sym} = {} - {};\n", a(0), a(1)),
        MathOp::Divide => format!("{ty} {sym} = {} / {};\n", a(0), a(1)),
        MathOp::Multiply => {
            let product: Vec<&str> = syms.iter().map(|(s, _)| s.as_str()).collect();
            format!("{ty} {sym} = {};\n", product.join(" * "))
        }
        MathOp::Pow => format!("{ty} {sym} = pow({}, {});\n", a(0), a(1)),
        MathOp::Modulo => format!("{ty} {sym} = mod({}, {});\n", a(0), a(1)),
        MathOp::Max => format!("{ty} {sym} = max({}, {});\n", a(0), a(1)),
        MathOp::Min => {
            let mut acc = syms[0].0.clone();
            for (s, _) in &syms[1..] {
                acc = format!("min({acc}, {s})");
            }
            format!("{ty} {sym} = {acc};\n")
        }
        MathOp::Negate => format!("{ty} {sym} = -1 * {};\n", a(0)),
        MathOp::Abs => format!("{ty} {sym} = abs({});\n", a(0)),
        MathOp::Ceil => format!("{ty} {sym} = ceil({});\n", a(0)),
        MathOp::Floor => format!("{ty} {sym} = floor({});\n", a(0)),
        MathOp::Round => format!("{ty} {sym} = round({});\n", a(0)),
        MathOp::Fract => format!("{ty} {sym} = fract({});\n", a(0)),
        MathOp::Sqrt => format!("{ty} {sym} = sqrt({});\n", a(0)),
        MathOp::Sine => format!("{ty} {sym} = sin({});\n", a(0)),
        MathOp::Cosine => format!("{ty} {sym} = cos({});\n", a(0)),
        MathOp::Clamp => format!("{ty} {sym} = clamp({}, {}, {});\n", a(0), a(1), a(2)),
        MathOp::Lerp => format!("{ty} {sym} = mix({}, {}, {});\n", a(0), a(1), a(2)),
        MathOp::Distance => format!("{ty} {sym} = distance({}, {});\n", a(0), a(1)),
        MathOp::Dot => format!("{ty} {sym} = dot({}, {});\n", a(0), a(1)),
        MathOp::Length => format!("{ty} {sym} = length({});\n", a(0)),
        MathOp::Normalize => format!("{ty} {sym} = normalize({});\n", a(0)),
        MathOp::Random => {
            let seed = glsl_float(ctx.seed);
            if syms[0].1 == ValueKind::FLOAT2 {
                format!("float {sym} = rand({} + {seed});\n", a(0))
            } else {
                format!(
                    "float {sym} = rand(vec2({co}, 1.0 - {co}) + {seed});\n",
                    co = a(0)
                )
            }
        }
        MathOp::MakeFloat2 => format!("vec2 {sym} = vec2({},{});\n", a(0), a(1)),
        MathOp::MakeFloat3 => format!("vec3 {sym} = vec3({},{},{});\n", a(0), a(1), a(2)),
        MathOp::MakeFloat4 => {
            format!("vec4 {sym} = vec4({},{},{},{});\n", a(0), a(1), a(2), a(3))
        }
        MathOp::IfElse => format!(
            "{ty} {sym};\nif ({c} > 0) {{\n{sym} = {i};\n}} else {{\n{sym} = {e};\n}}\n",
            c = a(0),
            i = a(1),
            e = a(2)
        ),
        MathOp::And => {
            let conds: Vec<String> = syms.iter().map(|(s, _)| format!("{s} > 0")).collect();
            format!("float {sym} = ({}) ? 1.0 : 0.0;\n", conds.join(" && "))
        }
        MathOp::Or => {
            let conds: Vec<String> = syms.iter().map(|(s, _)| format!("{s} > 0")).collect();
            format!("float {sym} = ({}) ? 1.0 : 0.0;\n", conds.join(" || "))
        }
        MathOp::Not => format!("float {sym} = ({} > 0) ? 0.0 : 1.0;\n", a(0)),
    };
    Some(stmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;
    use crate::node::{Node, NodeKind};
    use glam::Vec2;

    fn sym(f: &Function, id: NodeId, slot: usize) -> String {
        format!("{}{}", f.graph.node(id).unwrap().shader_id, slot)
    }

    #[test]
    fn test_end_to_end_negate_abs_chain() {
        let mut f = Function::new("fn");
        let c = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(3.0))))
            .unwrap();
        let neg = f.add_node(Node::new(NodeKind::Math(MathOp::Negate))).unwrap();
        let abs = f.add_node(Node::new(NodeKind::Math(MathOp::Abs))).unwrap();
        f.graph.connect(c, 0, neg, 0).unwrap();
        f.graph.connect(neg, 0, abs, 0).unwrap();
        f.set_output_node(Some(abs));

        let env = FunctionEnv::default();
        assert_eq!(f.run(&env), Some(Value::Float(3.0)));

        let (body, result) = f.body_source(&env).unwrap();
        let (sc, sn, sa) = (sym(&f, c, 0), sym(&f, neg, 0), sym(&f, abs, 0));
        assert!(body.contains(&format!("float {sc} = 3.0;\n")));
        assert!(body.contains(&format!("float {sn} = -1 * {sc};\n")));
        assert!(body.contains(&format!("float {sa} = abs({sn});\n")));
        assert_eq!(result, sa);
        // Statement order follows the upstream walk.
        assert!(body.find(&sc).unwrap() < body.find(&sn).unwrap());
    }

    #[test]
    fn test_incomplete_chain_aborts_whole_emission() {
        let mut f = Function::new("fn");
        let neg = f.add_node(Node::new(NodeKind::Math(MathOp::Negate))).unwrap();
        let abs = f.add_node(Node::new(NodeKind::Math(MathOp::Abs))).unwrap();
        f.graph.connect(neg, 0, abs, 0).unwrap();
        f.set_output_node(Some(abs));

        assert_eq!(f.body_source(&FunctionEnv::default()), None);
        assert_eq!(f.fragment_source(&FunctionEnv::default()), None);
    }

    #[test]
    fn test_emitted_kinds_match_negotiation() {
        let mut f = Function::new("fn");
        let v = f
            .add_node(Node::new(NodeKind::Constant(Value::Float2(Vec2::new(
                1.0, 2.0,
            )))))
            .unwrap();
        let s = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(2.0))))
            .unwrap();
        let mul = f
            .add_node(Node::new(NodeKind::Math(MathOp::Multiply)))
            .unwrap();
        f.graph.connect(v, 0, mul, 0).unwrap();
        f.graph.connect(s, 0, mul, 1).unwrap();
        f.set_output_node(Some(mul));

        let (body, _) = f.body_source(&FunctionEnv::default()).unwrap();
        let sm = sym(&f, mul, 0);
        assert!(body.contains(&format!("vec2 {sm} = ")));
        assert_eq!(
            f.graph.node(mul).unwrap().outputs[0].kind,
            ValueKind::FLOAT2
        );
    }

    #[test]
    fn test_diamond_emits_shared_node_once() {
        let mut f = Function::new("fn");
        let c = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(2.0))))
            .unwrap();
        let neg = f.add_node(Node::new(NodeKind::Math(MathOp::Negate))).unwrap();
        let add = f.add_node(Node::new(NodeKind::Math(MathOp::Add))).unwrap();
        f.graph.connect(c, 0, neg, 0).unwrap();
        f.graph.connect(c, 0, add, 0).unwrap();
        f.graph.connect(neg, 0, add, 1).unwrap();
        f.set_output_node(Some(add));

        let (body, _) = f.body_source(&FunctionEnv::default()).unwrap();
        let decl = format!("float {} = 2.0;", sym(&f, c, 0));
        assert_eq!(body.matches(&decl).count(), 1);
    }

    #[test]
    fn test_fragment_prelude_and_fragcolor() {
        let mut f = Function::new("fn");
        let c = f
            .add_node(Node::new(NodeKind::Constant(Value::Float4(glam::Vec4::ONE))))
            .unwrap();
        f.set_output_node(Some(c));

        let frag = f.fragment_source(&FunctionEnv::default()).unwrap();
        assert!(frag.starts_with("#version 330 core\n"));
        assert!(frag.contains("uniform sampler2D Input0;"));
        assert!(frag.contains("uniform sampler2D Input3;"));
        assert!(frag.contains("float rand(vec2 co)"));
        assert!(frag.contains("vec2 pos = UV;"));
        assert!(frag.contains(&format!("FragColor = vec4({}0);", f.graph.node(c).unwrap().shader_id)));
    }

    #[test]
    fn test_expected_output_gates_fragment() {
        let mut f = Function::new("fn");
        f.expected = ValueKind::FLOAT4;
        let c = f
            .add_node(Node::new(NodeKind::Constant(Value::Bool(true))))
            .unwrap();
        f.set_output_node(Some(c));
        // The body emits, but the output kind misses the expected mask.
        assert!(f.body_source(&FunctionEnv::default()).is_some());
        assert_eq!(f.fragment_source(&FunctionEnv::default()), None);
    }

    #[test]
    fn test_named_function_signature_from_args() {
        let mut f = Function::new("Edge Detect");
        f.add_node(Node::new(NodeKind::Arg {
            name: "radius".into(),
            kind: ValueKind::FLOAT,
        }))
        .unwrap();
        let gv = f
            .add_node(Node::new(NodeKind::GetVar("radius".into())))
            .unwrap();
        f.set_output_node(Some(gv));

        let src = f.function_source(&FunctionEnv::default()).unwrap();
        assert!(src.starts_with("float EdgeDetect(float radius) {"));
        assert!(src.contains(&format!("return {}0;\n", f.graph.node(gv).unwrap().shader_id)));
    }

    #[test]
    fn test_loop_emits_both_directions() {
        let mut f = loop_function(0.0, 5.0, 1.0);
        let (body, _) = f.body_source(&FunctionEnv::default()).unwrap();
        assert!(body.contains("<="));
        assert!(body.matches("for (float ").count() == 2);
        assert!(body.contains("+="));
        assert!(body.contains("-="));
    }

    #[test]
    fn test_loop_interpreter_direction_symmetry() {
        // Ascending: 0..5 visits {0,1,2,3,4}, sum = 10.
        let mut f = loop_function(0.0, 5.0, 1.0);
        assert_eq!(f.run(&FunctionEnv::default()), Some(Value::Float(10.0)));

        // Descending: 5..0 visits {5,4,3,2,1}, sum = 15.
        let mut f = loop_function(5.0, 0.0, 1.0);
        assert_eq!(f.run(&FunctionEnv::default()), Some(Value::Float(15.0)));
    }

    #[test]
    fn test_set_var_declares_once_then_assigns() {
        let mut f = loop_function(0.0, 3.0, 1.0);
        let (body, _) = f.body_source(&FunctionEnv::default()).unwrap();
        // The init node declares `acc`; the loop-body writer reuses it.
        assert_eq!(body.matches("float acc = ").count(), 1);
        assert!(body.contains("acc = "));
    }

    #[test]
    fn test_interpreter_emitter_equivalence_scalar_ops() {
        let cases: &[(MathOp, &[f32], f32, &str)] = &[
            (MathOp::Add, &[2.0, 3.0], 5.0, " + "),
            (MathOp::Multiply, &[2.0, 3.0], 6.0, " * "),
            (MathOp::Abs, &[-4.0], 4.0, "abs("),
            (MathOp::Ceil, &[1.25], 2.0, "ceil("),
            (MathOp::Round, &[1.75], 2.0, "round("),
            (MathOp::Sine, &[0.0], 0.0, "sin("),
            (MathOp::Sqrt, &[9.0], 3.0, "sqrt("),
            (MathOp::Lerp, &[0.0, 10.0, 0.25], 2.5, "mix("),
        ];
        for (op, inputs, want, glsl) in cases {
            let mut f = Function::new("fn");
            let node = f.add_node(Node::new(NodeKind::Math(*op))).unwrap();
            for (i, v) in inputs.iter().enumerate() {
                let c = f
                    .add_node(Node::new(NodeKind::Constant(Value::Float(*v))))
                    .unwrap();
                f.graph.connect(c, 0, node, i).unwrap();
            }
            f.set_output_node(Some(node));

            assert_eq!(
                f.run(&FunctionEnv::default()),
                Some(Value::Float(*want)),
                "{op:?}"
            );
            let (body, result) = f.body_source(&FunctionEnv::default()).unwrap();
            assert!(body.contains(glsl), "{op:?}: {body}");
            assert!(body.contains(&format!("float {result} = ")), "{op:?}");
        }
    }

    #[test]
    fn test_interpreter_emitter_equivalence_distance() {
        let mut f = Function::new("fn");
        let a = f
            .add_node(Node::new(NodeKind::Constant(Value::Float2(Vec2::ZERO))))
            .unwrap();
        let b = f
            .add_node(Node::new(NodeKind::Constant(Value::Float2(Vec2::new(
                3.0, 4.0,
            )))))
            .unwrap();
        let d = f
            .add_node(Node::new(NodeKind::Math(MathOp::Distance)))
            .unwrap();
        f.graph.connect(a, 0, d, 0).unwrap();
        f.graph.connect(b, 0, d, 1).unwrap();
        f.set_output_node(Some(d));

        assert_eq!(f.run(&FunctionEnv::default()), Some(Value::Float(5.0)));
        let (body, _) = f.body_source(&FunctionEnv::default()).unwrap();
        assert!(body.contains("distance("));
    }

    #[test]
    fn test_interpreter_emitter_equivalence_if_else() {
        let mut f = Function::new("fn");
        let cond = f
            .add_node(Node::new(NodeKind::Constant(Value::Bool(true))))
            .unwrap();
        let yes = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(1.0))))
            .unwrap();
        let no = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(2.0))))
            .unwrap();
        let sel = f.add_node(Node::new(NodeKind::Math(MathOp::IfElse))).unwrap();
        f.graph.connect(cond, 0, sel, 0).unwrap();
        f.graph.connect(yes, 0, sel, 1).unwrap();
        f.graph.connect(no, 0, sel, 2).unwrap();
        f.set_output_node(Some(sel));

        assert_eq!(f.run(&FunctionEnv::default()), Some(Value::Float(1.0)));
        let (body, result) = f.body_source(&FunctionEnv::default()).unwrap();
        assert!(body.contains(&format!("float {result};")));
        assert!(body.contains("} else {"));
        assert!(body.contains("> 0"));
    }

    /// exec -> SetVar(acc = 0) -> loop { acc = acc + current } with the
    /// final Get Var as the designated output.
    fn loop_function(start: f32, end: f32, incr: f32) -> Function {
        let mut f = Function::new("fn");
        let entry = f.add_node(Node::new(NodeKind::Execute)).unwrap();
        let zero = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(0.0))))
            .unwrap();
        let init = f
            .add_node(Node::new(NodeKind::SetVar("acc".into())))
            .unwrap();
        let lp = f.add_node(Node::new(NodeKind::ForLoop)).unwrap();
        let s = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(start))))
            .unwrap();
        let e = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(end))))
            .unwrap();
        let i = f
            .add_node(Node::new(NodeKind::Constant(Value::Float(incr))))
            .unwrap();
        let read = f
            .add_node(Node::new(NodeKind::GetVar("acc".into())))
            .unwrap();
        let add = f.add_node(Node::new(NodeKind::Math(MathOp::Add))).unwrap();
        let write = f
            .add_node(Node::new(NodeKind::SetVar("acc".into())))
            .unwrap();
        let result = f
            .add_node(Node::new(NodeKind::GetVar("acc".into())))
            .unwrap();

        f.graph.connect(entry, 0, init, 0).unwrap();
        f.graph.connect(zero, 0, init, 1).unwrap();
        f.graph.connect(init, 0, lp, 0).unwrap();
        f.graph.connect(s, 0, lp, 1).unwrap();
        f.graph.connect(e, 0, lp, 2).unwrap();
        f.graph.connect(i, 0, lp, 3).unwrap();
        // Loop body: acc = acc + current.
        f.graph.connect(lp, 0, write, 0).unwrap();
        f.graph.connect(read, 0, add, 0).unwrap();
        f.graph.connect(lp, 1, add, 1).unwrap();
        f.graph.connect(add, 0, write, 1).unwrap();

        f.set_output_node(Some(result));
        f
    }
}
