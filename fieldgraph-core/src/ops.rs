//! The polymorphic operator table (§4.1): for each math operator, the set
//! of [`Rule`]s it accepts and its operand count. Both the inference pass
//! (`fieldgraph-compiler`) and the two backends (`fieldgraph-backend`)
//! drive off this single table, per the design note in §9
//! ("Polymorphic arithmetic without inheritance... a pure function and
//! thus trivially testable").

use crate::types::Rule;

/// A math operator, named after its §4.1 semantics and its §4.5.2 opcode
/// family (e.g. `Op::Add` emits `ADD_SCALAR`/`ADD_VECTOR`/`ADD_MATRIX`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // -- elementwise arithmetic: Scalar / Vec3 / Mat4 --
    Add,
    Sub,
    Mul,
    Div,

    // -- elementwise unary math: Scalar / Vec3 / Mat4 --
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Abs,
    Sqrt,
    Exp,
    Log,
    Log2,
    Log10,
    Sign,
    Round,
    Ceil,
    Floor,
    Fract,
    Sinh,
    Cosh,
    Tanh,

    // -- elementwise binary math: Scalar / Vec3 / Mat4 --
    Atan2,
    /// C-style truncated modulo: `x - y * trunc(x / y)`.
    Fmod,
    /// GLSL-style modulo: `x - y * floor(x / y)`.
    Mod,
    Min,
    Max,

    // -- elementwise ternary: Scalar / Vec3 / Mat4 --
    /// `(A < B) ? C : D`, component-wise.
    Select,
    /// `clamp(value, min, max)`.
    Clamp,

    // -- fixed-rule vector/matrix ops --
    /// `Vec3, Vec3 → Scalar`.
    Dot,
    /// `Vec3, Vec3 → Vec3`.
    Cross,
    /// `Vec3 → Scalar`.
    Length,
    /// `Mat4, Vec3 → Vec3`.
    MatrixVectorMul,
    /// `Mat4 → Mat4`.
    Transpose,
    /// `Mat4 → Mat4`, may fail for a singular matrix.
    Inverse,

    // -- compose/decompose --
    /// `Scalar, Scalar, Scalar → Vec3`.
    ComposeVector,
    /// `Vec3 → Scalar, Scalar, Scalar`.
    DecomposeVector,
    /// Sixteen scalars → `Mat4`.
    ComposeMatrix,
    /// Four `Vec3` columns (+ implicit last row) → `Mat4`.
    ComposeMatrixFromColumns,
    /// Four `Vec3` rows (+ implicit last row) → `Mat4`.
    ComposeMatrixFromRows,
    /// `Scalar → Vec3`, broadcasting to all three components.
    VectorFromScalar,

    // -- resource-indexed --
    /// `Vec3, ResourceId, ResourceId → Scalar` (signed mesh SDF).
    SignedDistanceToMesh,
    /// `Vec3, ResourceId, ResourceId → Scalar` (unsigned mesh SDF).
    UnsignedDistanceToMesh,
    /// `Vec3, ResourceId → Vec3` (image-stack sample, RGB).
    ImageSampler,
    /// `Vec3, Vec3, Vec3 → Scalar` (point, box min, box max).
    BoxMinMax,
}

impl Op {
    /// The rules this operator accepts, in selection order (§4.1: the
    /// node's rule is "the one whose argument types match the bound
    /// sources"). Elementwise ops accept all three widths; fixed-shape
    /// ops accept only [`Rule::Fixed`].
    pub const fn accepted_rules(&self) -> &'static [Rule] {
        use Rule::*;
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Sin | Op::Cos | Op::Tan | Op::Asin
            | Op::Acos | Op::Atan | Op::Abs | Op::Sqrt | Op::Exp | Op::Log | Op::Log2
            | Op::Log10 | Op::Sign | Op::Round | Op::Ceil | Op::Floor | Op::Fract | Op::Sinh
            | Op::Cosh | Op::Tanh | Op::Atan2 | Op::Fmod | Op::Mod | Op::Min | Op::Max
            | Op::Select | Op::Clamp => &[Scalar, Vec3, Mat4],

            Op::Dot
            | Op::Cross
            | Op::Length
            | Op::MatrixVectorMul
            | Op::Transpose
            | Op::Inverse
            | Op::ComposeVector
            | Op::DecomposeVector
            | Op::ComposeMatrix
            | Op::ComposeMatrixFromColumns
            | Op::ComposeMatrixFromRows
            | Op::VectorFromScalar
            | Op::SignedDistanceToMesh
            | Op::UnsignedDistanceToMesh
            | Op::ImageSampler
            | Op::BoxMinMax => &[Fixed],
        }
    }

    /// Number of operand parameters the op takes (before rule-dependent
    /// widening; e.g. `Add` always takes 2 parameters regardless of rule).
    pub const fn operand_count(&self) -> usize {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Atan2 | Op::Fmod | Op::Mod | Op::Min
            | Op::Max | Op::Dot | Op::Cross | Op::MatrixVectorMul | Op::ImageSampler => 2,
            Op::Sin | Op::Cos | Op::Tan | Op::Asin | Op::Acos | Op::Atan | Op::Abs | Op::Sqrt
            | Op::Exp | Op::Log | Op::Log2 | Op::Log10 | Op::Sign | Op::Round | Op::Ceil
            | Op::Floor | Op::Fract | Op::Sinh | Op::Cosh | Op::Tanh | Op::Length
            | Op::Transpose | Op::Inverse | Op::DecomposeVector | Op::VectorFromScalar => 1,
            Op::Clamp | Op::ComposeVector | Op::BoxMinMax => 3,
            Op::Select => 4,
            Op::ComposeMatrix => 16,
            Op::ComposeMatrixFromColumns | Op::ComposeMatrixFromRows => 4,
            Op::SignedDistanceToMesh | Op::UnsignedDistanceToMesh => 3,
        }
    }

    /// Whether this op accepts the full `Scalar`/`Vec3`/`Mat4` rule set
    /// (as opposed to a single fixed shape).
    pub const fn is_elementwise(&self) -> bool {
        matches!(self.accepted_rules(), [Rule::Scalar, Rule::Vec3, Rule::Mat4])
    }

    /// Stable identifier fragment used to build opcode/function names
    /// (e.g. `"ADD"`, `"SIGNED_DISTANCE_TO_MESH"`).
    pub const fn name(&self) -> &'static str {
        match self {
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Sin => "SIN",
            Op::Cos => "COS",
            Op::Tan => "TAN",
            Op::Asin => "ASIN",
            Op::Acos => "ACOS",
            Op::Atan => "ATAN",
            Op::Abs => "ABS",
            Op::Sqrt => "SQRT",
            Op::Exp => "EXP",
            Op::Log => "LOG",
            Op::Log2 => "LOG2",
            Op::Log10 => "LOG10",
            Op::Sign => "SIGN",
            Op::Round => "ROUND",
            Op::Ceil => "CEIL",
            Op::Floor => "FLOOR",
            Op::Fract => "FRACT",
            Op::Sinh => "SINH",
            Op::Cosh => "COSH",
            Op::Tanh => "TANH",
            Op::Atan2 => "ATAN2",
            Op::Fmod => "FMOD",
            Op::Mod => "MOD",
            Op::Min => "MIN",
            Op::Max => "MAX",
            Op::Select => "SELECT",
            Op::Clamp => "CLAMP",
            Op::Dot => "DOT",
            Op::Cross => "CROSS",
            Op::Length => "LENGTH",
            Op::MatrixVectorMul => "MATRIX_VECTOR_MUL",
            Op::Transpose => "TRANSPOSE",
            Op::Inverse => "INVERSE",
            Op::ComposeVector => "COMPOSE_VECTOR",
            Op::DecomposeVector => "DECOMPOSE_VECTOR",
            Op::ComposeMatrix => "COMPOSE_MATRIX",
            Op::ComposeMatrixFromColumns => "COMPOSE_MATRIX_FROM_COLUMNS",
            Op::ComposeMatrixFromRows => "COMPOSE_MATRIX_FROM_ROWS",
            Op::VectorFromScalar => "VECTOR_FROM_SCALAR",
            Op::SignedDistanceToMesh => "MESH_SDF",
            Op::UnsignedDistanceToMesh => "UNSIGNED_MESH_SDF",
            Op::ImageSampler => "IMAGE_SAMPLE",
            Op::BoxMinMax => "BOX_MIN_MAX",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rule;

    #[test]
    fn elementwise_ops_accept_three_rules() {
        assert_eq!(Op::Add.accepted_rules(), &[Rule::Scalar, Rule::Vec3, Rule::Mat4]);
        assert!(Op::Add.is_elementwise());
    }

    #[test]
    fn fixed_shape_ops_accept_only_fixed() {
        assert_eq!(Op::Dot.accepted_rules(), &[Rule::Fixed]);
        assert!(!Op::Dot.is_elementwise());
    }

    #[test]
    fn operand_counts_match_spec_arities() {
        assert_eq!(Op::Clamp.operand_count(), 3);
        assert_eq!(Op::Select.operand_count(), 4);
        assert_eq!(Op::Dot.operand_count(), 2);
        assert_eq!(Op::Length.operand_count(), 1);
    }
}
