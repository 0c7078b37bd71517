//! Single-pass constant folder.
//!
//! Folds any node all of whose inputs are immediates into a new immediate,
//! with the IR's arithmetic semantics: truncating int32 division, IEEE binary32
//! floats with no fast-math relaxations, explicit NaN propagation on min/max.
//! Sub-expressions with a non-constant leaf are left structurally identical.

use crate::error::Result;
use crate::expr::{BinaryOp, CompareOp, Expr, ExprKind, ExprNode, IntrinsicOp};
use crate::mutate::{IrMutator, mutate_expr_children};
use crate::stmt::Stmt;

#[derive(Debug, Default)]
pub struct ConstantFolder;

impl IrMutator for ConstantFolder {
    fn mutate_expr(&mut self, e: &Expr) -> Result<Expr> {
        let e = mutate_expr_children(self, e)?;
        Ok(fold_node(&e).unwrap_or(e))
    }
}

/// Fold every constant sub-expression of `e`.
pub fn fold(e: &Expr) -> Result<Expr> {
    ConstantFolder.mutate_expr(e)
}

/// Fold every constant sub-expression under a statement.
pub fn fold_stmt(s: &Stmt) -> Result<Stmt> {
    ConstantFolder.mutate_stmt(s)
}

/// One-step fold of a node whose children are already folded. `None` when the
/// node is not a constant computation (or folding it would be unsound, e.g.
/// integer division by zero or an out-of-range shift).
fn fold_node(e: &Expr) -> Option<Expr> {
    match e.kind() {
        ExprKind::Cast { src } => match (src.kind(), e.dtype().kind) {
            (ExprKind::IntImm(v), kind) if kind.is_float() => Some(ExprNode::float(*v as f32)),
            (ExprKind::FloatImm(v), kind) if kind.is_int() => Some(ExprNode::int(*v as i32)),
            _ => None,
        },
        ExprKind::Binary { op, lhs, rhs } => match (lhs.kind(), rhs.kind()) {
            (ExprKind::IntImm(l), ExprKind::IntImm(r)) => fold_int_binary(*op, *l, *r).map(ExprNode::int),
            (ExprKind::FloatImm(l), ExprKind::FloatImm(r)) => fold_float_binary(*op, *l, *r).map(ExprNode::float),
            _ => None,
        },
        ExprKind::Min { lhs, rhs, propagate_nans } => match (lhs.kind(), rhs.kind()) {
            (ExprKind::IntImm(l), ExprKind::IntImm(r)) => Some(ExprNode::int(if l < r { *l } else { *r })),
            (ExprKind::FloatImm(l), ExprKind::FloatImm(r)) => {
                Some(ExprNode::float(fold_float_min_max(*l, *r, *propagate_nans, false)))
            }
            _ => None,
        },
        ExprKind::Max { lhs, rhs, propagate_nans } => match (lhs.kind(), rhs.kind()) {
            (ExprKind::IntImm(l), ExprKind::IntImm(r)) => Some(ExprNode::int(if l > r { *l } else { *r })),
            (ExprKind::FloatImm(l), ExprKind::FloatImm(r)) => {
                Some(ExprNode::float(fold_float_min_max(*l, *r, *propagate_nans, true)))
            }
            _ => None,
        },
        ExprKind::CompareSelect { op, lhs, rhs, true_value, false_value } => {
            if !(true_value.is_immediate() && false_value.is_immediate()) {
                return None;
            }
            let taken = match (lhs.kind(), rhs.kind()) {
                (ExprKind::IntImm(l), ExprKind::IntImm(r)) => compare(*op, l, r),
                (ExprKind::FloatImm(l), ExprKind::FloatImm(r)) => compare(*op, l, r),
                _ => return None,
            };
            Some(if taken { true_value.clone() } else { false_value.clone() })
        }
        ExprKind::IfThenElse { condition, true_value, false_value } => match condition.kind() {
            ExprKind::IntImm(c) => Some(if *c != 0 { true_value.clone() } else { false_value.clone() }),
            _ => None,
        },
        ExprKind::Intrinsic { op, args } => {
            let mut values = [0.0f32; 2];
            for (slot, arg) in values.iter_mut().zip(args) {
                *slot = arg.as_float_imm()?;
            }
            match args.len() {
                1 => fold_unary_intrinsic(*op, values[0]).map(ExprNode::float),
                2 => fold_binary_intrinsic(*op, values[0], values[1]).map(ExprNode::float),
                _ => None,
            }
        }
        _ => None,
    }
}

fn fold_int_binary(op: BinaryOp, l: i32, r: i32) -> Option<i32> {
    Some(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        // Truncating toward zero; a zero divisor is left for the evaluator to report.
        BinaryOp::Div => {
            if r == 0 {
                return None;
            }
            l.wrapping_div(r)
        }
        BinaryOp::Mod => {
            if r == 0 {
                return None;
            }
            l.wrapping_rem(r)
        }
        BinaryOp::And => l & r,
        BinaryOp::Xor => l ^ r,
        // Shift amounts outside 0..32 stay unfolded rather than miscompiled.
        BinaryOp::Lshift => {
            if !(0..32).contains(&r) {
                return None;
            }
            l.wrapping_shl(r as u32)
        }
        BinaryOp::Rshift => {
            if !(0..32).contains(&r) {
                return None;
            }
            l.wrapping_shr(r as u32)
        }
    })
}

fn fold_float_binary(op: BinaryOp, l: f32, r: f32) -> Option<f32> {
    Some(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        BinaryOp::Mod => l % r,
        BinaryOp::And | BinaryOp::Xor | BinaryOp::Lshift | BinaryOp::Rshift => return None,
    })
}

/// `max(a, b)`/`min(a, b)` per the IR contract: without propagation a NaN is
/// "lost" through the comparison; with propagation either NaN wins.
pub fn fold_float_min_max(l: f32, r: f32, propagate_nans: bool, is_max: bool) -> f32 {
    if propagate_nans {
        if l.is_nan() {
            return l;
        }
        if r.is_nan() {
            return r;
        }
    }
    let take_lhs = if is_max { l > r } else { l < r };
    if take_lhs { l } else { r }
}

pub fn compare<T: PartialOrd>(op: CompareOp, l: &T, r: &T) -> bool {
    match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Lt => l < r,
        CompareOp::Le => l <= r,
        CompareOp::Gt => l > r,
        CompareOp::Ge => l >= r,
    }
}

pub fn fold_unary_intrinsic(op: IntrinsicOp, v: f32) -> Option<f32> {
    Some(match op {
        IntrinsicOp::Sin => v.sin(),
        IntrinsicOp::Cos => v.cos(),
        IntrinsicOp::Tan => v.tan(),
        IntrinsicOp::Asin => v.asin(),
        IntrinsicOp::Acos => v.acos(),
        IntrinsicOp::Atan => v.atan(),
        IntrinsicOp::Sinh => v.sinh(),
        IntrinsicOp::Cosh => v.cosh(),
        IntrinsicOp::Tanh => v.tanh(),
        IntrinsicOp::Exp => v.exp(),
        IntrinsicOp::Expm1 => v.exp_m1(),
        IntrinsicOp::Fabs => v.abs(),
        IntrinsicOp::Log => v.ln(),
        IntrinsicOp::Log2 => v.log2(),
        IntrinsicOp::Log10 => v.log10(),
        IntrinsicOp::Log1p => v.ln_1p(),
        IntrinsicOp::Erf => libm::erff(v),
        IntrinsicOp::Erfc => libm::erfcf(v),
        IntrinsicOp::Sqrt => v.sqrt(),
        IntrinsicOp::Rsqrt => 1.0 / v.sqrt(),
        IntrinsicOp::Ceil => v.ceil(),
        IntrinsicOp::Floor => v.floor(),
        IntrinsicOp::Round => v.round(),
        IntrinsicOp::Trunc => v.trunc(),
        IntrinsicOp::Lgamma => libm::lgammaf_r(v).0,
        IntrinsicOp::Frac => v - v.trunc(),
        _ => return None,
    })
}

pub fn fold_binary_intrinsic(op: IntrinsicOp, a: f32, b: f32) -> Option<f32> {
    Some(match op {
        IntrinsicOp::Atan2 => a.atan2(b),
        IntrinsicOp::Pow => a.powf(b),
        IntrinsicOp::Fmod => a % b,
        IntrinsicOp::Remainder => libm::remainderf(a, b),
        _ => return None,
    })
}
