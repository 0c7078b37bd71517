//! Scalar kinds and lane-typed dtypes for the fusor tensor-expression IR.
//!
//! A [`Dtype`] pairs a [`ScalarKind`] with a SIMD lane count. `lanes == 1` is
//! a scalar; `lanes > 1` is a lane vector. The distinguished [`ScalarKind::Handle`]
//! denotes buffer base pointers and never participates in arithmetic.

use std::fmt;


/// Element kind of an IR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Int32,
    Float32,
    /// Buffer base pointer. Opaque: no arithmetic, no promotion.
    Handle,
}

impl ScalarKind {
    /// Byte size of one lane of this kind.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Int32 | Self::Float32 => 4,
            Self::Handle => size_of::<usize>(),
        }
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int32)
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32)
    }

    pub const fn is_handle(&self) -> bool {
        matches!(self, Self::Handle)
    }

    /// C/CUDA spelling of this scalar kind.
    pub const fn c_style(&self) -> &'static str {
        match self {
            Self::Int32 => "int",
            Self::Float32 => "float",
            Self::Handle => "void*",
        }
    }

    /// Name used by the IR printer for casts, e.g. `int32(x)`.
    pub const fn ir_name(&self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Handle => "handle",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ir_name())
    }
}

/// A scalar kind plus a SIMD lane count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dtype {
    pub kind: ScalarKind,
    pub lanes: u32,
}

impl Dtype {
    pub const INT32: Dtype = Dtype::scalar(ScalarKind::Int32);
    pub const FLOAT32: Dtype = Dtype::scalar(ScalarKind::Float32);
    pub const HANDLE: Dtype = Dtype::scalar(ScalarKind::Handle);

    pub const fn scalar(kind: ScalarKind) -> Self {
        Self { kind, lanes: 1 }
    }

    pub const fn new(kind: ScalarKind, lanes: u32) -> Self {
        assert!(lanes >= 1, "dtype must have at least one lane");
        Self { kind, lanes }
    }

    /// Same scalar kind, different lane count.
    pub const fn with_lanes(&self, lanes: u32) -> Self {
        Self::new(self.kind, lanes)
    }

    /// The single-lane version of this dtype.
    pub const fn scalar_of(&self) -> Self {
        Self::scalar(self.kind)
    }

    pub const fn is_scalar(&self) -> bool {
        self.lanes == 1
    }

    /// Total byte size across all lanes.
    pub const fn bytes(&self) -> usize {
        self.kind.bytes() * self.lanes as usize
    }

    pub const fn is_int(&self) -> bool {
        self.kind.is_int()
    }

    pub const fn is_float(&self) -> bool {
        self.kind.is_float()
    }

    pub const fn is_handle(&self) -> bool {
        self.kind.is_handle()
    }

    /// Common dtype of a binary arithmetic operation, or `None` when the
    /// operands cannot be combined.
    ///
    /// Lane counts must match exactly; `int32` promotes to `float32`;
    /// `Handle` never combines with anything.
    pub fn promote(lhs: Dtype, rhs: Dtype) -> Option<Dtype> {
        if lhs.lanes != rhs.lanes {
            return None;
        }
        use ScalarKind::*;
        let kind = match (lhs.kind, rhs.kind) {
            (Handle, _) | (_, Handle) => return None,
            (Float32, _) | (_, Float32) => Float32,
            (Int32, Int32) => Int32,
        };
        Some(Dtype { kind, lanes: lhs.lanes })
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lanes == 1 { write!(f, "{}", self.kind) } else { write!(f, "{}x{}", self.kind, self.lanes) }
    }
}

impl From<ScalarKind> for Dtype {
    fn from(kind: ScalarKind) -> Self {
        Dtype::scalar(kind)
    }
}
