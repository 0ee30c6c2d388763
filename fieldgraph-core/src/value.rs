//! Concrete value representation for the closed set of semantic types (§3).
//!
//! `Scalar`, `Vec3` and `Mat4` are plain `#[repr(C)]` structs with
//! `core::ops` overloads rather than a general-purpose math-crate
//! dependency; `ResourceId` is an opaque handle newtype over `u32`.

#[cfg(not(feature = "std"))]
use alloc::{format, string::String};
#[cfg(feature = "std")]
use std::string::String;

use core::ops::{Add, Div, Mul, Sub};

/// A single-float value. A "distance" and a "color channel" are each one.
pub type Scalar = f32;

/// A 3-component vector: position, color, or a `Vec3→Vec3` operand.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Self = Self { x: 1.0, y: 1.0, z: 1.0 };

    /// Construct from components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Construct with all components equal to `s` (used to broadcast a
    /// scalar into a `Vec3` slot, e.g. `VectorFromScalar`).
    pub const fn splat(s: f32) -> Self {
        Self { x: s, y: s, z: s }
    }

    /// Build a vector with `value` on `axis` and zero elsewhere. Used by
    /// `FunctionGradient` lowering (§4.4.5) to build the per-axis offset.
    pub fn on_axis(axis: usize, value: f32) -> Self {
        let mut v = Self::ZERO;
        match axis {
            0 => v.x = value,
            1 => v.y = value,
            2 => v.z = value,
            _ => unreachable!("Vec3 has exactly three axes"),
        }
        v
    }

    pub fn dot(self, rhs: Self) -> Scalar {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn length(self) -> Scalar {
        self.dot(self).sqrt()
    }

    /// Component-wise application of a scalar unary function.
    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self::new(f(self.x), f(self.y), f(self.z))
    }

    /// Component-wise application of a scalar binary function.
    pub fn zip_map(self, rhs: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        Self::new(f(self.x, rhs.x), f(self.y, rhs.y), f(self.z, rhs.z))
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl Mul for Vec3 {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a * b)
    }
}

impl Div for Vec3 {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a / b)
    }
}

/// A row-major 4x4 matrix (16 floats). `m[row * 4 + col]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4 {
    pub m: [f32; 16],
}

impl Mat4 {
    pub const IDENTITY: Self = {
        let mut m = [0.0f32; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Self { m }
    };

    pub const fn from_row_major(m: [f32; 16]) -> Self {
        Self { m }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.m[row * 4 + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: f32) {
        self.m[row * 4 + col] = v;
    }

    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        let mut out = self;
        for v in out.m.iter_mut() {
            *v = f(*v);
        }
        out
    }

    pub fn zip_map(self, rhs: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let mut out = self;
        for i in 0..16 {
            out.m[i] = f(self.m[i], rhs.m[i]);
        }
        out
    }

    pub fn transpose(self) -> Self {
        let mut out = self;
        for r in 0..4 {
            for c in 0..4 {
                out.set(r, c, self.get(c, r));
            }
        }
        out
    }

    /// Row-vector multiply: `Mat4 · Vec3` (treating the vector as a point
    /// with an implicit homogeneous `1`), per §4.1 `mat·vec`→Vec3.
    pub fn transform_point(self, v: Vec3) -> Vec3 {
        let x = self.get(0, 0) * v.x + self.get(0, 1) * v.y + self.get(0, 2) * v.z + self.get(0, 3);
        let y = self.get(1, 0) * v.x + self.get(1, 1) * v.y + self.get(1, 2) * v.z + self.get(1, 3);
        let z = self.get(2, 0) * v.x + self.get(2, 1) * v.y + self.get(2, 2) * v.z + self.get(2, 3);
        Vec3::new(x, y, z)
    }

    /// Gauss-Jordan inverse with partial pivoting. Returns `None` for a
    /// singular matrix (the `Inverse` node is then invalid downstream,
    /// consistent with the type-mismatch-style local recovery in §7).
    pub fn inverse(self) -> Option<Self> {
        let mut a = self.m;
        let mut inv = Self::IDENTITY.m;

        for col in 0..4 {
            let mut pivot_row = col;
            let mut pivot_val = a[col * 4 + col].abs();
            for r in (col + 1)..4 {
                let v = a[r * 4 + col].abs();
                if v > pivot_val {
                    pivot_val = v;
                    pivot_row = r;
                }
            }
            if pivot_val < 1e-12 {
                return None;
            }
            if pivot_row != col {
                for c in 0..4 {
                    a.swap(col * 4 + c, pivot_row * 4 + c);
                    inv.swap(col * 4 + c, pivot_row * 4 + c);
                }
            }
            let pivot = a[col * 4 + col];
            for c in 0..4 {
                a[col * 4 + c] /= pivot;
                inv[col * 4 + c] /= pivot;
            }
            for r in 0..4 {
                if r == col {
                    continue;
                }
                let factor = a[r * 4 + col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..4 {
                    a[r * 4 + c] -= factor * a[col * 4 + c];
                    inv[r * 4 + c] -= factor * inv[col * 4 + c];
                }
            }
        }

        Some(Self { m: inv })
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|v| v.is_finite())
    }
}

impl Add for Mat4 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl Sub for Mat4 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl Mul for Mat4 {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a * b)
    }
}

impl Div for Mat4 {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a / b)
    }
}

/// Opaque handle into an external resource table (mesh, image stack, beam
/// lattice, VDB grid). Ids are validated only at the 3MF boundary and by
/// the external GPU runtime; the core never dereferences one.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u32);

impl ResourceId {
    pub const INVALID: Self = Self(u32::MAX);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }
}

/// A typed runtime value: exactly one of the four semantic types.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Vec3(Vec3),
    Mat4(Mat4),
    ResourceId(ResourceId),
}

impl Value {
    /// Default ("zero") value for a given type, used to seed a freshly
    /// created parameter before any literal is assigned.
    pub fn default_for(ty: crate::types::ValueType) -> Self {
        use crate::types::ValueType as T;
        match ty {
            T::Scalar => Value::Scalar(0.0),
            T::Vec3 => Value::Vec3(Vec3::ZERO),
            T::Mat4 => Value::Mat4(Mat4::IDENTITY),
            T::ResourceId => Value::ResourceId(ResourceId::INVALID),
        }
    }

    pub fn value_type(&self) -> crate::types::ValueType {
        use crate::types::ValueType as T;
        match self {
            Value::Scalar(_) => T::Scalar,
            Value::Vec3(_) => T::Vec3,
            Value::Mat4(_) => T::Mat4,
            Value::ResourceId(_) => T::ResourceId,
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Value::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    /// Render as a kernel-language literal, used by the kernel backend
    /// (§4.5.1) when a parameter is unbound and falls back to its literal.
    pub fn to_kernel_literal(&self) -> String {
        match self {
            Value::Scalar(v) => format!("{:.9}", v),
            Value::Vec3(v) => format!("float3({:.9}, {:.9}, {:.9})", v.x, v.y, v.z),
            Value::Mat4(v) => {
                let m = v.m;
                format!(
                    "float4x4({:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9}, {:.9})",
                    m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8], m[9], m[10], m[11], m[12], m[13], m[14], m[15]
                )
            }
            Value::ResourceId(id) => format!("{}", id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_dot_cross_length() {
        let a = Vec3::new(1.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(a.dot(b), 0.0);
        assert_eq!(a.cross(b), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(Vec3::new(3.0, 4.0, 0.0).length(), 5.0);
    }

    #[test]
    fn mat4_identity_roundtrips_point() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(Mat4::IDENTITY.transform_point(p), p);
    }

    #[test]
    fn mat4_inverse_of_identity_is_identity() {
        let inv = Mat4::IDENTITY.inverse().unwrap();
        assert_eq!(inv, Mat4::IDENTITY);
    }

    #[test]
    fn mat4_inverse_of_singular_is_none() {
        let singular = Mat4::from_row_major([0.0; 16]);
        assert!(singular.inverse().is_none());
    }

    #[test]
    fn resource_id_invalid_is_not_valid() {
        assert!(!ResourceId::INVALID.is_valid());
        assert!(ResourceId::new(3).is_valid());
    }
}
