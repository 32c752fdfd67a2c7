// SPDX-License-Identifier: MIT OR Apache-2.0
//! Expression node operations: arity, type negotiation, and CPU evaluation.
//!
//! Every operation here has a GLSL counterpart in the shader emitter; the
//! two must stay numerically equivalent for the same inputs.

use crate::value::{glsl_fract, rand_hash, Value, ValueKind};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Pure expression operations. These nodes carry no Execute ports; their
/// single value output is index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathOp {
    /// `a + b`.
    Add,
    /// `a - b`.
    Subtract,
    /// Product of all connected inputs (growable).
    Multiply,
    /// `a / b`.
    Divide,
    /// `-x`.
    Negate,
    /// `abs(x)`.
    Abs,
    /// `ceil(x)`.
    Ceil,
    /// `floor(x)`.
    Floor,
    /// `round(x)`.
    Round,
    /// `fract(x)` with GLSL semantics.
    Fract,
    /// `sqrt(x)`.
    Sqrt,
    /// `sin(x)`.
    Sine,
    /// `cos(x)`.
    Cosine,
    /// `pow(a, b)`.
    Pow,
    /// `mod(a, b)` with GLSL semantics.
    Modulo,
    /// Minimum of all connected inputs (growable).
    Min,
    /// `max(a, b)`.
    Max,
    /// `clamp(v, lo, hi)`.
    Clamp,
    /// `mix(a, b, t)`.
    Lerp,
    /// `distance(a, b)`.
    Distance,
    /// `dot(a, b)`.
    Dot,
    /// `length(v)`.
    Length,
    /// `normalize(v)`.
    Normalize,
    /// Seeded hash noise over a coordinate.
    Random,
    /// `vec2(x, y)`.
    MakeFloat2,
    /// `vec3(x, y, z)`.
    MakeFloat3,
    /// `vec4(x, y, z, w)`.
    MakeFloat4,
    /// Select between two values on a boolean.
    IfElse,
    /// Logical and of all connected inputs (growable).
    And,
    /// Logical or of all connected inputs (growable).
    Or,
    /// Logical not.
    Not,
}

/// How many value inputs an operation takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many inputs, all required.
    Fixed(usize),
    /// Two or more inputs; a spare trailing port grows as they fill.
    Variadic,
}

impl MathOp {
    /// Display name, used as the node's default name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::Negate => "Negate",
            Self::Abs => "Absolute",
            Self::Ceil => "Ceil",
            Self::Floor => "Floor",
            Self::Round => "Round",
            Self::Fract => "Fract",
            Self::Sqrt => "Square Root",
            Self::Sine => "Sine",
            Self::Cosine => "Cosine",
            Self::Pow => "Pow",
            Self::Modulo => "Modulo",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Clamp => "Clamp",
            Self::Lerp => "Lerp",
            Self::Distance => "Distance",
            Self::Dot => "Dot",
            Self::Length => "Length",
            Self::Normalize => "Normalize",
            Self::Random => "Random",
            Self::MakeFloat2 => "Make Float2",
            Self::MakeFloat3 => "Make Float3",
            Self::MakeFloat4 => "Make Float4",
            Self::IfElse => "If Else",
            Self::And => "And",
            Self::Or => "Or",
            Self::Not => "Not",
        }
    }

    /// Input arity.
    pub fn arity(self) -> Arity {
        match self {
            Self::Multiply | Self::Min | Self::And | Self::Or => Arity::Variadic,
            Self::Add
            | Self::Subtract
            | Self::Divide
            | Self::Pow
            | Self::Modulo
            | Self::Max
            | Self::Distance
            | Self::Dot
            | Self::MakeFloat2 => Arity::Fixed(2),
            Self::Clamp | Self::Lerp | Self::IfElse | Self::MakeFloat3 => Arity::Fixed(3),
            Self::MakeFloat4 => Arity::Fixed(4),
            _ => Arity::Fixed(1),
        }
    }

    /// Accepted-kind mask for input `index`.
    pub fn input_mask(self, index: usize) -> ValueKind {
        match self {
            Self::And | Self::Or | Self::Not => ValueKind::BOOL,
            Self::IfElse => {
                if index == 0 {
                    ValueKind::BOOL
                } else {
                    ValueKind::ANY_FLOAT
                }
            }
            Self::Lerp => {
                if index == 2 {
                    ValueKind::FLOAT
                } else {
                    ValueKind::ANY_FLOAT
                }
            }
            Self::MakeFloat2 | Self::MakeFloat3 | Self::MakeFloat4 => ValueKind::FLOAT,
            Self::Random => ValueKind::FLOAT | ValueKind::FLOAT2,
            Self::Distance | Self::Dot | Self::Length | Self::Normalize => {
                ValueKind::FLOAT2 | ValueKind::FLOAT3 | ValueKind::FLOAT4
            }
            _ => ValueKind::ANY_FLOAT,
        }
    }

    /// Label for input `index`.
    pub fn input_label(self, index: usize) -> String {
        match self {
            Self::IfElse => ["Comparison", "If", "Else"][index].to_string(),
            Self::Clamp => ["Value", "Min", "Max"][index].to_string(),
            Self::Lerp => ["A", "B", "T"][index].to_string(),
            Self::Distance | Self::Dot | Self::Add | Self::Subtract | Self::Divide | Self::Max => {
                ["A", "B"][index].to_string()
            }
            Self::Pow => ["Base", "Exponent"][index].to_string(),
            Self::MakeFloat2 | Self::MakeFloat3 | Self::MakeFloat4 => {
                ["X", "Y", "Z", "W"][index].to_string()
            }
            Self::Random => "Position".to_string(),
            op if matches!(op.arity(), Arity::Variadic) => format!("Input {index}"),
            op if matches!(op.arity(), Arity::Fixed(1)) => "Value".to_string(),
            _ => format!("Input {index}"),
        }
    }

    /// Initial (widest) output mask, before negotiation narrows it.
    pub fn output_mask(self) -> ValueKind {
        match self {
            Self::And | Self::Or | Self::Not => ValueKind::BOOL,
            Self::Distance | Self::Dot | Self::Length | Self::Random => ValueKind::FLOAT,
            Self::MakeFloat2 => ValueKind::FLOAT2,
            Self::MakeFloat3 => ValueKind::FLOAT3,
            Self::MakeFloat4 => ValueKind::FLOAT4,
            _ => ValueKind::ANY_FLOAT,
        }
    }

    /// Deterministic map from connected input kinds to the output kind.
    /// Idempotent; re-run on every connection or upstream kind change.
    /// `None` means the output keeps its current kind (not enough
    /// connections, or mismatched vector arities).
    pub fn negotiate(self, kinds: &[Option<ValueKind>]) -> Option<ValueKind> {
        let connected: Vec<ValueKind> = kinds.iter().flatten().copied().collect();
        match self {
            Self::And | Self::Or | Self::Not => Some(ValueKind::BOOL),
            Self::Distance | Self::Dot | Self::Length | Self::Random => Some(ValueKind::FLOAT),
            Self::MakeFloat2 => Some(ValueKind::FLOAT2),
            Self::MakeFloat3 => Some(ValueKind::FLOAT3),
            Self::MakeFloat4 => Some(ValueKind::FLOAT4),
            Self::IfElse => match (kinds.get(1).copied().flatten(), kinds.get(2).copied().flatten())
            {
                (Some(a), Some(b)) => combine(a, b),
                _ => None,
            },
            Self::Lerp => match (kinds.first().copied().flatten(), kinds.get(1).copied().flatten())
            {
                (Some(a), Some(b)) => combine(a, b),
                _ => None,
            },
            _ => {
                let mut acc: Option<ValueKind> = None;
                for k in connected {
                    acc = Some(match acc {
                        None => k,
                        Some(prev) => combine(prev, k)?,
                    });
                }
                acc
            }
        }
    }

    /// Evaluate on the CPU. `values` holds the connected inputs' cached
    /// values in port order; the caller has already verified arity and
    /// presence. `seed` is the owning graph's random seed.
    pub fn apply(self, values: &[Value], seed: f32) -> Option<Value> {
        match self {
            Self::Add => fold_zip(values, |a, b| a + b),
            Self::Subtract => fold_zip(values, |a, b| a - b),
            Self::Multiply => fold_zip(values, |a, b| a * b),
            Self::Divide => fold_zip(values, |a, b| a / b),
            Self::Pow => fold_zip(values, f32::powf),
            Self::Modulo => fold_zip(values, glsl_mod),
            Self::Max => fold_zip(values, f32::max),
            Self::Min => fold_zip(values, f32::min),
            Self::Negate => map(values.first()?, |x| -x),
            Self::Abs => map(values.first()?, f32::abs),
            Self::Ceil => map(values.first()?, f32::ceil),
            Self::Floor => map(values.first()?, f32::floor),
            Self::Round => map(values.first()?, f32::round),
            Self::Fract => map(values.first()?, glsl_fract),
            Self::Sqrt => map(values.first()?, f32::sqrt),
            Self::Sine => map(values.first()?, f32::sin),
            Self::Cosine => map(values.first()?, f32::cos),
            Self::Clamp => {
                let v = zip(values.first()?, values.get(1)?, f32::max)?;
                zip(&v, values.get(2)?, f32::min)
            }
            Self::Lerp => {
                let t = values.get(2)?.as_float()?;
                let (a, na) = comps(values.first()?)?;
                let (b, nb) = comps(values.get(1)?)?;
                if na != nb && na != 1 && nb != 1 {
                    return None;
                }
                let n = na.max(nb);
                let mut out = [0.0; 4];
                for i in 0..n {
                    let av = a[if na == 1 { 0 } else { i }];
                    let bv = b[if nb == 1 { 0 } else { i }];
                    out[i] = av + (bv - av) * t;
                }
                Some(from_comps(out, n))
            }
            Self::Distance => {
                let (a, na) = comps(values.first()?)?;
                let (b, nb) = comps(values.get(1)?)?;
                if na != nb {
                    return None;
                }
                let sum: f32 = (0..na).map(|i| (a[i] - b[i]) * (a[i] - b[i])).sum();
                Some(Value::Float(sum.sqrt()))
            }
            Self::Dot => {
                let (a, na) = comps(values.first()?)?;
                let (b, nb) = comps(values.get(1)?)?;
                if na != nb {
                    return None;
                }
                Some(Value::Float((0..na).map(|i| a[i] * b[i]).sum()))
            }
            Self::Length => {
                let (a, n) = comps(values.first()?)?;
                let sum: f32 = (0..n).map(|i| a[i] * a[i]).sum();
                Some(Value::Float(sum.sqrt()))
            }
            Self::Normalize => {
                let (a, n) = comps(values.first()?)?;
                let len: f32 = (0..n).map(|i| a[i] * a[i]).sum::<f32>().sqrt();
                let mut out = [0.0; 4];
                for i in 0..n {
                    out[i] = a[i] / len;
                }
                Some(from_comps(out, n))
            }
            Self::Random => {
                let co = match values.first()? {
                    Value::Float2(v) => *v,
                    v => {
                        let f = v.as_float()?;
                        Vec2::new(f, 1.0 - f)
                    }
                };
                Some(Value::Float(rand_hash(co + Vec2::splat(seed))))
            }
            Self::MakeFloat2 | Self::MakeFloat3 | Self::MakeFloat4 => {
                let n = match self {
                    Self::MakeFloat2 => 2,
                    Self::MakeFloat3 => 3,
                    _ => 4,
                };
                let mut out = [0.0; 4];
                for i in 0..n {
                    out[i] = values.get(i)?.as_float()?;
                }
                Some(from_comps(out, n))
            }
            Self::IfElse => {
                if values.first()?.as_bool()? {
                    Some(*values.get(1)?)
                } else {
                    Some(*values.get(2)?)
                }
            }
            Self::And => {
                let mut acc = true;
                for v in values {
                    acc = acc && v.as_bool()?;
                }
                Some(Value::Bool(acc))
            }
            Self::Or => {
                let mut acc = false;
                for v in values {
                    acc = acc || v.as_bool()?;
                }
                Some(Value::Bool(acc))
            }
            Self::Not => Some(Value::Bool(!values.first()?.as_bool()?)),
        }
    }
}

/// `mod` with GLSL semantics (`x - y * floor(x / y)`); Rust's `%` is a
/// remainder and disagrees for mixed signs.
pub fn glsl_mod(x: f32, y: f32) -> f32 {
    x - y * (x / y).floor()
}

/// Combine two kinds under the broadcast rule: float pairs with anything,
/// equal arities pair with themselves, mismatched arities do not combine.
pub fn combine(a: ValueKind, b: ValueKind) -> Option<ValueKind> {
    if a == b {
        return Some(a);
    }
    if a == ValueKind::FLOAT && b.components().is_some() {
        return Some(b);
    }
    if b == ValueKind::FLOAT && a.components().is_some() {
        return Some(a);
    }
    None
}

fn comps(v: &Value) -> Option<([f32; 4], usize)> {
    match v {
        Value::Float(f) => Some(([*f, 0.0, 0.0, 0.0], 1)),
        Value::Float2(v) => Some(([v.x, v.y, 0.0, 0.0], 2)),
        Value::Float3(v) => Some(([v.x, v.y, v.z, 0.0], 3)),
        Value::Float4(v) => Some(([v.x, v.y, v.z, v.w], 4)),
        _ => None,
    }
}

fn from_comps(c: [f32; 4], n: usize) -> Value {
    match n {
        1 => Value::Float(c[0]),
        2 => Value::Float2(glam::Vec2::new(c[0], c[1])),
        3 => Value::Float3(glam::Vec3::new(c[0], c[1], c[2])),
        _ => Value::Float4(glam::Vec4::new(c[0], c[1], c[2], c[3])),
    }
}

/// Component-wise binary op with scalar broadcast on either side.
fn zip(a: &Value, b: &Value, f: impl Fn(f32, f32) -> f32) -> Option<Value> {
    let (ca, na) = comps(a)?;
    let (cb, nb) = comps(b)?;
    if na != nb && na != 1 && nb != 1 {
        return None;
    }
    let n = na.max(nb);
    let mut out = [0.0; 4];
    for i in 0..n {
        out[i] = f(ca[if na == 1 { 0 } else { i }], cb[if nb == 1 { 0 } else { i }]);
    }
    Some(from_comps(out, n))
}

/// Left fold of [`zip`] over two or more values.
fn fold_zip(values: &[Value], f: impl Fn(f32, f32) -> f32 + Copy) -> Option<Value> {
    if values.len() < 2 {
        return None;
    }
    let mut acc = values[0];
    for v in &values[1..] {
        acc = zip(&acc, v, f)?;
    }
    Some(acc)
}

/// Component-wise unary map.
fn map(v: &Value, f: impl Fn(f32) -> f32) -> Option<Value> {
    let (c, n) = comps(v)?;
    let mut out = [0.0; 4];
    for i in 0..n {
        out[i] = f(c[i]);
    }
    Some(from_comps(out, n))
}
