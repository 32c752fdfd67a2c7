// SPDX-License-Identifier: MIT OR Apache-2.0
//! Value kinds and payloads flowing through ports.

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Bit-flag lattice of the kinds a port can accept or carry.
    ///
    /// A port's accepted mask is fixed at construction; the negotiated kind
    /// is resolved at connection time from the intersection of the two
    /// sides' masks. `COLOR` and `GRAY` are the texture-bearing
    /// specializations of `FLOAT4`/`FLOAT` used by image nodes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ValueKind: u16 {
        /// Boolean flag.
        const BOOL = 1 << 0;
        /// Single float.
        const FLOAT = 1 << 1;
        /// 2-component float vector.
        const FLOAT2 = 1 << 2;
        /// 3-component float vector.
        const FLOAT3 = 1 << 3;
        /// 4-component float vector.
        const FLOAT4 = 1 << 4;
        /// RGBA texture.
        const COLOR = 1 << 5;
        /// Single-channel texture.
        const GRAY = 1 << 6;
        /// Execution flow, carries no data.
        const EXECUTE = 1 << 7;
    }
}

impl ValueKind {
    /// Any scalar or vector float kind.
    pub const ANY_FLOAT: Self = Self::FLOAT
        .union(Self::FLOAT2)
        .union(Self::FLOAT3)
        .union(Self::FLOAT4);

    /// Any texture kind.
    pub const ANY_IMAGE: Self = Self::COLOR.union(Self::GRAY);

    /// Everything a variable slot can hold.
    pub const ANY_VALUE: Self = Self::BOOL.union(Self::ANY_FLOAT);

    /// GLSL declaration prefix for this kind, if it has a single
    /// representable type. Booleans lower to `float` (`> 0` tests), as do
    /// `GRAY` textures sampled to a channel; `COLOR`/`FLOAT4` lower to
    /// `vec4`. `EXECUTE` has no representation.
    pub fn glsl_type(self) -> Option<&'static str> {
        if self == Self::BOOL || self == Self::FLOAT || self == Self::GRAY {
            Some("float")
        } else if self == Self::FLOAT2 {
            Some("vec2")
        } else if self == Self::FLOAT3 {
            Some("vec3")
        } else if self == Self::FLOAT4 || self == Self::COLOR {
            Some("vec4")
        } else {
            None
        }
    }

    /// Number of float components, for the vector kinds.
    pub fn components(self) -> Option<usize> {
        if self == Self::FLOAT {
            Some(1)
        } else if self == Self::FLOAT2 {
            Some(2)
        } else if self == Self::FLOAT3 {
            Some(3)
        } else if self == Self::FLOAT4 {
            Some(4)
        } else {
            None
        }
    }
}

/// Opaque handle to a GPU texture owned outside the engine.
///
/// The engine passes handles through without interpreting their contents;
/// id 0 is reserved for "not a texture".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    /// A handle that refers to nothing.
    pub const INVALID: Self = Self(0);

    /// Whether this handle refers to a live texture object.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// A concrete payload cached on an output port.
///
/// The variants match the [`ValueKind`] lattice one-to-one so the
/// interpreter and emitter dispatch exhaustively. Textures cover both the
/// `COLOR` and `GRAY` kinds; which one applies is the port's negotiated
/// kind, not the payload's concern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Single float.
    Float(f32),
    /// 2-component vector.
    Float2(Vec2),
    /// 3-component vector.
    Float3(Vec3),
    /// 4-component vector.
    Float4(Vec4),
    /// Opaque texture reference.
    Texture(TextureHandle),
}

impl Value {
    /// The natural kind of this payload. Textures report the full image
    /// mask since color/gray is a negotiation concern.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::BOOL,
            Self::Float(_) => ValueKind::FLOAT,
            Self::Float2(_) => ValueKind::FLOAT2,
            Self::Float3(_) => ValueKind::FLOAT3,
            Self::Float4(_) => ValueKind::FLOAT4,
            Self::Texture(_) => ValueKind::ANY_IMAGE,
        }
    }

    /// Scalar view of this value. Booleans coerce to 1/0 and vectors are
    /// not scalars.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean view; floats follow the shader convention of `> 0`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Float(f) => Some(*f > 0.0),
            _ => None,
        }
    }

    /// Texture view.
    pub fn as_texture(&self) -> Option<TextureHandle> {
        match self {
            Self::Texture(t) => Some(*t),
            _ => None,
        }
    }

    /// The zero value of a kind, used to pre-seed variable slots.
    pub fn zero(kind: ValueKind) -> Self {
        if kind == ValueKind::BOOL {
            Self::Bool(false)
        } else if kind == ValueKind::FLOAT2 {
            Self::Float2(Vec2::ZERO)
        } else if kind == ValueKind::FLOAT3 {
            Self::Float3(Vec3::ZERO)
        } else if kind == ValueKind::FLOAT4 {
            Self::Float4(Vec4::ZERO)
        } else {
            Self::Float(0.0)
        }
    }

    /// GLSL literal for this value. Booleans lower to `1.0`/`0.0`;
    /// textures have no literal form.
    pub fn glsl_literal(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(if *b { "1.0".into() } else { "0.0".into() }),
            Self::Float(f) => Some(glsl_float(*f)),
            Self::Float2(v) => Some(format!("vec2({},{})", glsl_float(v.x), glsl_float(v.y))),
            Self::Float3(v) => Some(format!(
                "vec3({},{},{})",
                glsl_float(v.x),
                glsl_float(v.y),
                glsl_float(v.z)
            )),
            Self::Float4(v) => Some(format!(
                "vec4({},{},{},{})",
                glsl_float(v.x),
                glsl_float(v.y),
                glsl_float(v.z),
                glsl_float(v.w)
            )),
            Self::Texture(_) => None,
        }
    }
}

/// Format a float as a GLSL literal, always with a decimal point.
pub fn glsl_float(v: f32) -> String {
    if v == v.trunc() && v.abs() < 1.0e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// `fract` with GLSL semantics (`x - floor(x)`), which differs from
/// [`f32::fract`] for negative inputs.
pub fn glsl_fract(x: f32) -> f32 {
    x - x.floor()
}

/// The hash the generated shaders use for randomness, mirrored on the CPU
/// so both execution paths agree. Matches the emitted
/// `fract(sin(dot(co, vec2(12.9898,78.233))) * 43758.5453) * 2.0 - 1.0`.
pub fn rand_hash(co: Vec2) -> f32 {
    glsl_fract((co.dot(Vec2::new(12.9898, 78.233))).sin() * 43758.5453) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_masks_intersect() {
        assert!(ValueKind::ANY_FLOAT.intersects(ValueKind::FLOAT2));
        assert!(!ValueKind::ANY_FLOAT.intersects(ValueKind::EXECUTE));
        assert!(ValueKind::ANY_IMAGE.contains(ValueKind::GRAY));
    }

    #[test]
    fn test_glsl_types() {
        assert_eq!(ValueKind::FLOAT.glsl_type(), Some("float"));
        assert_eq!(ValueKind::BOOL.glsl_type(), Some("float"));
        assert_eq!(ValueKind::COLOR.glsl_type(), Some("vec4"));
        assert_eq!(ValueKind::EXECUTE.glsl_type(), None);
        assert_eq!(ValueKind::ANY_FLOAT.glsl_type(), None);
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(Value::Bool(true).as_float(), Some(1.0));
        assert_eq!(Value::Float(-2.0).as_bool(), Some(false));
        assert_eq!(Value::Float(0.5).as_bool(), Some(true));
        assert_eq!(Value::Float2(Vec2::ONE).as_float(), None);
    }

    #[test]
    fn test_glsl_literals() {
        assert_eq!(Value::Float(3.0).glsl_literal().as_deref(), Some("3.0"));
        assert_eq!(Value::Float(0.25).glsl_literal().as_deref(), Some("0.25"));
        assert_eq!(
            Value::Float2(Vec2::new(1.0, 0.5)).glsl_literal().as_deref(),
            Some("vec2(1.0,0.5)")
        );
        assert_eq!(Value::Texture(TextureHandle(3)).glsl_literal(), None);
    }

    #[test]
    fn test_glsl_fract_negative() {
        assert_eq!(glsl_fract(-0.25), 0.75);
        assert_eq!(glsl_fract(1.25), 0.25);
    }

    #[test]
    fn test_rand_hash_deterministic() {
        let a = rand_hash(Vec2::new(0.3, 0.7));
        let b = rand_hash(Vec2::new(0.3, 0.7));
        assert_eq!(a, b);
        assert!((-1.0..=1.0).contains(&a));
    }
}
