//! Expression nodes.
//!
//! Expressions are pure, typed and immutable once built. Nodes are `Rc`-shared
//! with a stable per-thread id; identity is by node, never by name. All
//! constructors validate the §type rules and register the node with the
//! innermost [`KernelScope`](crate::KernelScope).

use std::fmt;
use std::rc::Rc;

use fusor_dtype::Dtype;
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::function::Function;
use crate::scope;

pub type Expr = Rc<ExprNode>;

/// Binary operator tag. Arithmetic operators promote; bitwise and shift
/// operators require int32 operands on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Xor,
    Lshift,
    Rshift,
}

impl BinaryOp {
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::And => "&",
            Self::Xor => "^",
            Self::Lshift => "<<",
            Self::Rshift => ">>",
        }
    }

    pub const fn is_bitwise(&self) -> bool {
        matches!(self, Self::And | Self::Xor | Self::Lshift | Self::Rshift)
    }
}

/// Comparison tag for [`ExprKind::CompareSelect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// The closed set of math intrinsics. Fixed arity per op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicOp {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Expm1,
    Fabs,
    Log,
    Log2,
    Log10,
    Log1p,
    Erf,
    Erfc,
    Sqrt,
    Rsqrt,
    Pow,
    Ceil,
    Floor,
    Round,
    Trunc,
    Fmod,
    Remainder,
    Lgamma,
    Frac,
    Rand,
}

impl IntrinsicOp {
    pub const fn arity(&self) -> usize {
        match self {
            Self::Atan2 | Self::Pow | Self::Fmod | Self::Remainder => 2,
            Self::Rand => 0,
            _ => 1,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Atan2 => "atan2",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Exp => "exp",
            Self::Expm1 => "expm1",
            Self::Fabs => "fabs",
            Self::Log => "log",
            Self::Log2 => "log2",
            Self::Log10 => "log10",
            Self::Log1p => "log1p",
            Self::Erf => "erf",
            Self::Erfc => "erfc",
            Self::Sqrt => "sqrt",
            Self::Rsqrt => "rsqrt",
            Self::Pow => "pow",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
            Self::Round => "round",
            Self::Trunc => "trunc",
            Self::Fmod => "fmod",
            Self::Remainder => "remainder",
            Self::Lgamma => "lgamma",
            Self::Frac => "frac",
            Self::Rand => "rand",
        }
    }
}

/// Expression variants. One sum type; dispatch is exhaustive matching.
#[derive(Clone)]
pub enum ExprKind {
    IntImm(i32),
    FloatImm(f32),
    Var { name_hint: String },
    Cast { src: Expr },
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    Min { lhs: Expr, rhs: Expr, propagate_nans: bool },
    Max { lhs: Expr, rhs: Expr, propagate_nans: bool },
    CompareSelect { op: CompareOp, lhs: Expr, rhs: Expr, true_value: Expr, false_value: Expr },
    Let { var: Expr, value: Expr, body: Expr },
    Ramp { base: Expr, stride: Expr, lanes: u32 },
    Broadcast { value: Expr, lanes: u32 },
    IfThenElse { condition: Expr, true_value: Expr, false_value: Expr },
    Load { base: Expr, index: Expr, mask: Expr },
    Intrinsic { op: IntrinsicOp, args: SmallVec<[Expr; 2]> },
    Call { function: Rc<Function>, indices: SmallVec<[Expr; 4]> },
}

pub struct ExprNode {
    id: u64,
    dtype: Dtype,
    kind: ExprKind,
}

impl ExprNode {
    fn new(dtype: Dtype, kind: ExprKind) -> Expr {
        let node = Rc::new(Self { id: scope::next_node_id(), dtype, kind });
        scope::register_expr(&node);
        node
    }

    /// Stable per-thread identity of this node.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    // Leaves.

    pub fn int(value: i32) -> Expr {
        Self::new(Dtype::INT32, ExprKind::IntImm(value))
    }

    pub fn float(value: f32) -> Expr {
        Self::new(Dtype::FLOAT32, ExprKind::FloatImm(value))
    }

    /// A fresh variable. Identity is the node, not the name: two vars with the
    /// same hint are distinct.
    pub fn var(name_hint: impl Into<String>, dtype: Dtype) -> Expr {
        Self::new(dtype, ExprKind::Var { name_hint: name_hint.into() })
    }

    pub fn is_var(&self) -> bool {
        matches!(self.kind, ExprKind::Var { .. })
    }

    /// The name hint when this is a variable.
    pub fn name_hint(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var { name_hint } => Some(name_hint),
            _ => None,
        }
    }

    pub fn as_int_imm(&self) -> Option<i32> {
        match self.kind {
            ExprKind::IntImm(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float_imm(&self) -> Option<f32> {
        match self.kind {
            ExprKind::FloatImm(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, ExprKind::IntImm(_) | ExprKind::FloatImm(_))
    }

    /// True for the trivial all-lanes-on mask: the literal 1 or its broadcast.
    pub fn is_const_one_mask(&self) -> bool {
        match &self.kind {
            ExprKind::IntImm(1) => true,
            ExprKind::Broadcast { value, .. } => matches!(value.kind, ExprKind::IntImm(1)),
            _ => false,
        }
    }

    // Casts and promotion.

    /// Lane-preserving cast. Handle values never cast.
    pub fn cast(dtype: Dtype, src: &Expr) -> Result<Expr> {
        let from = src.dtype();
        ensure!(!from.is_handle() && !dtype.is_handle(), CastHandleSnafu { from, to: dtype });
        ensure!(from.lanes == dtype.lanes, CastLaneMismatchSnafu { from, to: dtype });
        if from == dtype {
            return Ok(src.clone());
        }
        Ok(Self::new(dtype, ExprKind::Cast { src: src.clone() }))
    }

    /// Promote two operands to their common dtype, inserting casts as needed.
    pub(crate) fn promote_and_cast(lhs: &Expr, rhs: &Expr) -> Result<(Expr, Expr, Dtype)> {
        let dtype = Dtype::promote(lhs.dtype(), rhs.dtype())
            .ok_or_else(|| PromotionFailedSnafu { lhs: lhs.dtype(), rhs: rhs.dtype() }.build())?;
        let lhs = Self::cast(dtype, lhs)?;
        let rhs = Self::cast(dtype, rhs)?;
        Ok((lhs, rhs, dtype))
    }

    // Binary operators. One entry point keyed by tag; the named constructors
    // below delegate here, as do the default mutator rebuilds.

    pub fn try_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Expr> {
        if op.is_bitwise() {
            let (l, r) = (lhs.dtype(), rhs.dtype());
            ensure!(l.is_int() && r.is_int() && l.lanes == r.lanes, BitwiseOperandNotIntSnafu { op, lhs: l, rhs: r });
            Ok(Self::new(l, ExprKind::Binary { op, lhs: lhs.clone(), rhs: rhs.clone() }))
        } else {
            let (lhs, rhs, dtype) = Self::promote_and_cast(lhs, rhs)?;
            Ok(Self::new(dtype, ExprKind::Binary { op, lhs, rhs }))
        }
    }

    // Named forms of the nine operators; the method sugar on handles lives in
    // [`ExprOps`].

    // Min/Max carry the NaN propagation flag explicitly; there is no default.

    pub fn try_min(lhs: &Expr, rhs: &Expr, propagate_nans: bool) -> Result<Expr> {
        let (lhs, rhs, dtype) = Self::promote_and_cast(lhs, rhs)?;
        Ok(Self::new(dtype, ExprKind::Min { lhs, rhs, propagate_nans }))
    }

    pub fn try_max(lhs: &Expr, rhs: &Expr, propagate_nans: bool) -> Result<Expr> {
        let (lhs, rhs, dtype) = Self::promote_and_cast(lhs, rhs)?;
        Ok(Self::new(dtype, ExprKind::Max { lhs, rhs, propagate_nans }))
    }

    // Comparison returning 0/1 int32, or the provided branch values.

    pub fn compare_select(op: CompareOp, lhs: &Expr, rhs: &Expr) -> Result<Expr> {
        Self::compare_select_with(op, lhs, rhs, &Self::int(1), &Self::int(0))
    }

    pub fn compare_select_with(
        op: CompareOp,
        lhs: &Expr,
        rhs: &Expr,
        true_value: &Expr,
        false_value: &Expr,
    ) -> Result<Expr> {
        let (lhs, rhs, _) = Self::promote_and_cast(lhs, rhs)?;
        ensure!(
            true_value.dtype() == false_value.dtype(),
            BranchDtypeMismatchSnafu { true_value: true_value.dtype(), false_value: false_value.dtype() }
        );
        let dtype = true_value.dtype();
        let kind = ExprKind::CompareSelect {
            op,
            lhs,
            rhs,
            true_value: true_value.clone(),
            false_value: false_value.clone(),
        };
        Ok(Self::new(dtype, kind))
    }

    // Binding, vectors, selection.

    /// Expression-level binding; the expression's dtype is the body's.
    pub fn let_expr(var: &Expr, value: &Expr, body: &Expr) -> Result<Expr> {
        ensure!(var.is_var(), VariableRequiredSnafu { context: "let binding" });
        ensure!(var.dtype() == value.dtype(), LetDtypeMismatchSnafu { var: var.dtype(), value: value.dtype() });
        Ok(Self::new(body.dtype(), ExprKind::Let { var: var.clone(), value: value.clone(), body: body.clone() }))
    }

    /// `[base, base + stride, …, base + (lanes-1)*stride]`.
    pub fn ramp(base: &Expr, stride: &Expr, lanes: u32) -> Result<Expr> {
        ensure!(lanes >= 1, InvalidLaneCountSnafu { lanes });
        let (b, s) = (base.dtype(), stride.dtype());
        ensure!(b == s && b.is_scalar() && !b.is_handle(), RampOperandMismatchSnafu { base: b, stride: s });
        Ok(Self::new(b.with_lanes(lanes), ExprKind::Ramp { base: base.clone(), stride: stride.clone(), lanes }))
    }

    /// Lift a scalar to all lanes of a vector.
    pub fn broadcast(value: &Expr, lanes: u32) -> Result<Expr> {
        ensure!(lanes >= 1, InvalidLaneCountSnafu { lanes });
        let dtype = value.dtype();
        ensure!(dtype.is_scalar(), BroadcastRequiresScalarSnafu { dtype });
        Ok(Self::new(dtype.with_lanes(lanes), ExprKind::Broadcast { value: value.clone(), lanes }))
    }

    /// Lazy two-way selection. The condition is scalar int32; both branches
    /// share one dtype, which becomes the expression's dtype.
    pub fn if_then_else(condition: &Expr, true_value: &Expr, false_value: &Expr) -> Result<Expr> {
        let c = condition.dtype();
        ensure!(c.is_int() && c.is_scalar(), ConditionNotScalarIntSnafu { dtype: c });
        ensure!(
            true_value.dtype() == false_value.dtype(),
            BranchDtypeMismatchSnafu { true_value: true_value.dtype(), false_value: false_value.dtype() }
        );
        let kind = ExprKind::IfThenElse {
            condition: condition.clone(),
            true_value: true_value.clone(),
            false_value: false_value.clone(),
        };
        Ok(Self::new(true_value.dtype(), kind))
    }

    /// Read `dtype.lanes` elements from `base` at `index`, gated per lane by
    /// `mask`. `base` is a Handle variable; index and mask are int32 with the
    /// same lane count as the loaded dtype.
    pub fn load(dtype: Dtype, base: &Expr, index: &Expr, mask: &Expr) -> Result<Expr> {
        Self::check_access("load", dtype, base, index, mask)?;
        Ok(Self::new(dtype, ExprKind::Load { base: base.clone(), index: index.clone(), mask: mask.clone() }))
    }

    pub(crate) fn check_access(context: &'static str, value: Dtype, base: &Expr, index: &Expr, mask: &Expr) -> Result<()> {
        ensure!(base.is_var(), VariableRequiredSnafu { context });
        ensure!(base.dtype().is_handle(), HandleRequiredSnafu { context, dtype: base.dtype() });
        ensure!(index.dtype().is_int(), IndexNotIntSnafu { context, dtype: index.dtype() });
        ensure!(mask.dtype().is_int(), MaskNotIntSnafu { context, dtype: mask.dtype() });
        ensure!(
            index.dtype().lanes == value.lanes && mask.dtype().lanes == value.lanes,
            AccessLaneMismatchSnafu { context, value, index: index.dtype(), mask: mask.dtype() }
        );
        Ok(())
    }

    // Intrinsics.

    pub fn intrinsic(op: IntrinsicOp, args: &[Expr]) -> Result<Expr> {
        ensure!(args.len() == op.arity(), IntrinsicAritySnafu { op, expected: op.arity(), actual: args.len() });
        let dtype = match args {
            [] => Dtype::FLOAT32,
            [first, rest @ ..] => {
                let dtype = first.dtype();
                ensure!(dtype.is_float(), IntrinsicOperandNotFloatSnafu { op, dtype });
                for arg in rest {
                    ensure!(arg.dtype() == dtype, IntrinsicOperandNotFloatSnafu { op, dtype: arg.dtype() });
                }
                dtype
            }
        };
        Ok(Self::new(dtype, ExprKind::Intrinsic { op, args: args.iter().cloned().collect() }))
    }

    /// A call to a tensor function; identity is the callee, not its name.
    pub fn call(function: &Rc<Function>, indices: &[Expr]) -> Result<Expr> {
        ensure!(
            indices.len() == function.ndim(),
            CallAritySnafu { name: function.name().to_owned(), expected: function.ndim(), actual: indices.len() }
        );
        for index in indices {
            let dtype = index.dtype();
            ensure!(
                dtype.is_int() && dtype.is_scalar(),
                CallIndexNotScalarIntSnafu { name: function.name().to_owned(), dtype }
            );
        }
        let dtype = function.body().dtype();
        Ok(Self::new(dtype, ExprKind::Call { function: function.clone(), indices: indices.iter().cloned().collect() }))
    }
}

macro_rules! binary_ctors {
    ($($method:ident => $op:ident),* $(,)?) => {
        impl ExprNode {
            $(
                pub fn $method(lhs: &Expr, rhs: &Expr) -> Result<Expr> {
                    Self::try_binary(BinaryOp::$op, lhs, rhs)
                }
            )*
        }
    };
}

macro_rules! compare_ctors {
    ($($method:ident => $op:ident),* $(,)?) => {
        impl ExprNode {
            $(
                pub fn $method(lhs: &Expr, rhs: &Expr) -> Result<Expr> {
                    Self::compare_select(CompareOp::$op, lhs, rhs)
                }
            )*
        }
    };
}

binary_ctors! {
    try_add => Add,
    try_sub => Sub,
    try_mul => Mul,
    try_div => Div,
    try_mod => Mod,
    try_and => And,
    try_xor => Xor,
    try_lshift => Lshift,
    try_rshift => Rshift,
}

compare_ctors! {
    cmp_eq => Eq,
    cmp_ne => Ne,
    cmp_lt => Lt,
    cmp_le => Le,
    cmp_gt => Gt,
    cmp_ge => Ge,
}

macro_rules! unary_intrinsics {
    ($($method:ident => $op:ident),* $(,)?) => {
        impl ExprNode {
            $(
                #[doc = concat!("`", stringify!($method), "(x)` over float operands, elementwise on vectors.")]
                pub fn $method(arg: &Expr) -> Result<Expr> {
                    Self::intrinsic(IntrinsicOp::$op, std::slice::from_ref(arg))
                }
            )*
        }
    };
}

macro_rules! binary_intrinsics {
    ($($method:ident => $op:ident),* $(,)?) => {
        impl ExprNode {
            $(
                pub fn $method(lhs: &Expr, rhs: &Expr) -> Result<Expr> {
                    Self::intrinsic(IntrinsicOp::$op, &[lhs.clone(), rhs.clone()])
                }
            )*
        }
    };
}

unary_intrinsics! {
    sin => Sin,
    cos => Cos,
    tan => Tan,
    asin => Asin,
    acos => Acos,
    atan => Atan,
    sinh => Sinh,
    cosh => Cosh,
    tanh => Tanh,
    exp => Exp,
    expm1 => Expm1,
    fabs => Fabs,
    log => Log,
    log2 => Log2,
    log10 => Log10,
    log1p => Log1p,
    erf => Erf,
    erfc => Erfc,
    sqrt => Sqrt,
    rsqrt => Rsqrt,
    ceil => Ceil,
    floor => Floor,
    round => Round,
    trunc => Trunc,
    lgamma => Lgamma,
    frac => Frac,
}

binary_intrinsics! {
    atan2 => Atan2,
    pow => Pow,
    fmod => Fmod,
    remainder => Remainder,
}

impl ExprNode {
    /// The stateful `rand()` intrinsic; never constant-folded.
    pub fn rand(dtype: Dtype) -> Result<Expr> {
        ensure!(dtype.is_float(), IntrinsicOperandNotFloatSnafu { op: IntrinsicOp::Rand, dtype });
        Ok(Self::new(dtype, ExprKind::Intrinsic { op: IntrinsicOp::Rand, args: SmallVec::new() }))
    }
}

/// Fallible operator sugar on expression handles.
///
/// Binary arithmetic promotes to the common dtype; bitwise and shift require
/// int32 on both sides; the comparison methods build a 0/1 `CompareSelect`.
pub trait ExprOps {
    fn try_add(&self, rhs: &Expr) -> Result<Expr>;
    fn try_sub(&self, rhs: &Expr) -> Result<Expr>;
    fn try_mul(&self, rhs: &Expr) -> Result<Expr>;
    fn try_div(&self, rhs: &Expr) -> Result<Expr>;
    fn try_mod(&self, rhs: &Expr) -> Result<Expr>;
    fn try_and(&self, rhs: &Expr) -> Result<Expr>;
    fn try_xor(&self, rhs: &Expr) -> Result<Expr>;
    fn try_lshift(&self, rhs: &Expr) -> Result<Expr>;
    fn try_rshift(&self, rhs: &Expr) -> Result<Expr>;
    fn cmp_eq(&self, rhs: &Expr) -> Result<Expr>;
    fn cmp_ne(&self, rhs: &Expr) -> Result<Expr>;
    fn cmp_lt(&self, rhs: &Expr) -> Result<Expr>;
    fn cmp_le(&self, rhs: &Expr) -> Result<Expr>;
    fn cmp_gt(&self, rhs: &Expr) -> Result<Expr>;
    fn cmp_ge(&self, rhs: &Expr) -> Result<Expr>;
}

macro_rules! binary_sugar {
    ($($method:ident => $op:ident),* $(,)?) => {
        $(
            fn $method(&self, rhs: &Expr) -> Result<Expr> {
                ExprNode::try_binary(BinaryOp::$op, self, rhs)
            }
        )*
    };
}

macro_rules! compare_sugar {
    ($($method:ident => $op:ident),* $(,)?) => {
        $(
            fn $method(&self, rhs: &Expr) -> Result<Expr> {
                ExprNode::compare_select(CompareOp::$op, self, rhs)
            }
        )*
    };
}

impl ExprOps for Expr {
    binary_sugar! {
        try_add => Add,
        try_sub => Sub,
        try_mul => Mul,
        try_div => Div,
        try_mod => Mod,
        try_and => And,
        try_xor => Xor,
        try_lshift => Lshift,
        try_rshift => Rshift,
    }

    compare_sugar! {
        cmp_eq => Eq,
        cmp_ne => Ne,
        cmp_lt => Lt,
        cmp_le => Le,
        cmp_gt => Gt,
        cmp_ge => Ge,
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        crate::printer::IrPrinter::new(&mut out).print_expr(self);
        f.write_str(&out)
    }
}

impl fmt::Debug for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr[{}: {}]", self.dtype, self)
    }
}
