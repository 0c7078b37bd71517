//! Tree-walking reference interpreter.
//!
//! Evaluates a lowered statement directly: a recursive evaluator carrying the
//! current lane-vector [`Value`], a scalar environment keyed by variable
//! identity, and a buffer map from handle variables to raw pointers. This is
//! the semantic baseline the native backends are tested against.

use std::collections::HashMap;

use fusor_dtype::{Dtype, ScalarKind};
use fusor_ir::fold::{compare, fold_binary_intrinsic, fold_float_min_max, fold_unary_intrinsic};
use fusor_ir::{BinaryOp, Expr, ExprKind, Stmt, StmtKind};
use smallvec::{SmallVec, smallvec};
use snafu::ensure;

use crate::error::*;
use crate::types::{BufferArg, CallArg, CodeGen, check_args};

/// A scalar or lane-vector runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(SmallVec<[i32; 8]>),
    Float(SmallVec<[f32; 8]>),
}

impl Value {
    pub fn int(v: i32) -> Self {
        Self::Int(smallvec![v])
    }

    pub fn float(v: f32) -> Self {
        Self::Float(smallvec![v])
    }

    pub fn lanes(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
        }
    }

    /// The single int lane of a scalar value.
    pub fn as_int(&self) -> Result<i32> {
        match self {
            Self::Int(v) if v.len() == 1 => Ok(v[0]),
            _ => InvalidValueKindSnafu { context: "scalar int" }.fail(),
        }
    }

    pub fn as_float(&self) -> Result<f32> {
        match self {
            Self::Float(v) if v.len() == 1 => Ok(v[0]),
            _ => InvalidValueKindSnafu { context: "scalar float" }.fail(),
        }
    }

    pub fn as_int_vec(&self) -> Result<&[i32]> {
        match self {
            Self::Int(v) => Ok(v),
            Self::Float(_) => InvalidValueKindSnafu { context: "int vector" }.fail(),
        }
    }

    pub fn as_float_vec(&self) -> Result<&[f32]> {
        match self {
            Self::Float(v) => Ok(v),
            Self::Int(_) => InvalidValueKindSnafu { context: "float vector" }.fail(),
        }
    }
}

fn var_name(e: &Expr) -> String {
    e.name_hint().unwrap_or("<unnamed>").to_owned()
}

#[derive(Default)]
struct Interp {
    scalars: HashMap<u64, Value>,
    buffers: HashMap<u64, *mut u8>,
    owned: HashMap<u64, Vec<u8>>,
}

impl Interp {
    fn bind_scalar(&mut self, var: &Expr, value: Value) -> Result<()> {
        ensure!(!self.scalars.contains_key(&var.id()), VarAlreadyBoundSnafu { name: var_name(var) });
        self.scalars.insert(var.id(), value);
        Ok(())
    }

    fn buffer_ptr(&self, base: &Expr) -> Result<*mut u8> {
        self.buffers.get(&base.id()).copied().ok_or_else(|| MissingBufferBindingSnafu { name: var_name(base) }.build())
    }

    fn eval(&mut self, e: &Expr) -> Result<Value> {
        match e.kind() {
            ExprKind::IntImm(v) => Ok(Value::int(*v)),
            ExprKind::FloatImm(v) => Ok(Value::float(*v)),
            ExprKind::Var { .. } => {
                self.scalars.get(&e.id()).cloned().ok_or_else(|| UndefinedVarSnafu { name: var_name(e) }.build())
            }
            ExprKind::Cast { src } => {
                let value = self.eval(src)?;
                Ok(match (value, e.dtype().kind) {
                    (Value::Int(v), ScalarKind::Float32) => Value::Float(v.into_iter().map(|x| x as f32).collect()),
                    (Value::Float(v), ScalarKind::Int32) => Value::Int(v.into_iter().map(|x| x as i32).collect()),
                    (value, _) => value,
                })
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary_op(*op, &lhs, &rhs)
            }
            ExprKind::Min { lhs, rhs, propagate_nans } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                min_max_op(&lhs, &rhs, *propagate_nans, false)
            }
            ExprKind::Max { lhs, rhs, propagate_nans } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                min_max_op(&lhs, &rhs, *propagate_nans, true)
            }
            ExprKind::CompareSelect { op, lhs, rhs, true_value, false_value } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                let t = self.eval(true_value)?;
                let f = self.eval(false_value)?;
                compare_select_op(*op, &lhs, &rhs, &t, &f)
            }
            ExprKind::Let { var, value, body } => {
                let value = self.eval(value)?;
                self.bind_scalar(var, value)?;
                let result = self.eval(body);
                self.scalars.remove(&var.id());
                result
            }
            ExprKind::Ramp { base, stride, lanes } => {
                let base = self.eval(base)?;
                let stride = self.eval(stride)?;
                match (base, stride) {
                    (Value::Int(b), Value::Int(s)) => {
                        Ok(Value::Int((0..*lanes as i32).map(|i| b[0].wrapping_add(i.wrapping_mul(s[0]))).collect()))
                    }
                    (Value::Float(b), Value::Float(s)) => {
                        Ok(Value::Float((0..*lanes as i32).map(|i| b[0] + i as f32 * s[0]).collect()))
                    }
                    _ => InvalidValueKindSnafu { context: "ramp" }.fail(),
                }
            }
            ExprKind::Broadcast { value, lanes } => {
                let value = self.eval(value)?;
                Ok(match value {
                    Value::Int(v) => Value::Int(smallvec![v[0]; *lanes as usize]),
                    Value::Float(v) => Value::Float(smallvec![v[0]; *lanes as usize]),
                })
            }
            ExprKind::IfThenElse { condition, true_value, false_value } => {
                // Lazy: only the selected branch is evaluated.
                let condition = self.eval(condition)?.as_int()?;
                if condition != 0 { self.eval(true_value) } else { self.eval(false_value) }
            }
            ExprKind::Load { base, index, mask } => {
                let ptr = self.buffer_ptr(base)?;
                let index = self.eval(index)?;
                let index = index.as_int_vec()?;
                let mask = self.eval(mask)?;
                let mask = mask.as_int_vec()?;
                load_lanes(ptr, e.dtype(), index, mask)
            }
            ExprKind::Intrinsic { op, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let v = self.eval(arg)?;
                    values.push(v);
                }
                intrinsic_op(*op, &values)
            }
            ExprKind::Call { function, .. } => UnloweredCallSnafu { name: function.name().to_owned() }.fail(),
        }
    }

    fn exec(&mut self, s: &Stmt) -> Result<()> {
        match s.kind() {
            StmtKind::LetStmt { var, value, body } => {
                let value = self.eval(value)?;
                self.bind_scalar(var, value)?;
                let result = self.exec(body);
                self.scalars.remove(&var.id());
                result
            }
            StmtKind::Block { stmts } => {
                for stmt in stmts {
                    self.exec(stmt)?;
                }
                Ok(())
            }
            StmtKind::For { var, start, stop, body, .. } => {
                let start = self.eval(start)?.as_int()?;
                let stop = self.eval(stop)?.as_int()?;
                ensure!(!self.scalars.contains_key(&var.id()), VarAlreadyBoundSnafu { name: var_name(var) });
                for i in start..stop {
                    self.scalars.insert(var.id(), Value::int(i));
                    self.exec(body)?;
                }
                self.scalars.remove(&var.id());
                Ok(())
            }
            StmtKind::Store { base, index, value, mask } => {
                let ptr = self.buffer_ptr(base)?;
                let index = self.eval(index)?;
                let index = index.as_int_vec()?.to_vec();
                let mask = self.eval(mask)?;
                let mask = mask.as_int_vec()?.to_vec();
                let value = self.eval(value)?;
                store_lanes(ptr, &index, &mask, &value)
            }
            StmtKind::Allocate { var, dtype, dims } => {
                let mut total = dtype.bytes();
                for dim in dims {
                    let extent = self.eval(dim)?.as_int()?;
                    total *= extent.max(0) as usize;
                }
                ensure!(!self.buffers.contains_key(&var.id()), DoubleAllocateSnafu { name: var_name(var) });
                // The heap allocation is stable; moving the Vec into the map
                // does not move its storage.
                let mut storage = vec![0u8; total.max(1)];
                let ptr = storage.as_mut_ptr();
                self.owned.insert(var.id(), storage);
                self.buffers.insert(var.id(), ptr);
                Ok(())
            }
            StmtKind::Free { var } => {
                ensure!(self.owned.remove(&var.id()).is_some(), FreeUnallocatedSnafu { name: var_name(var) });
                self.buffers.remove(&var.id());
                Ok(())
            }
            StmtKind::Cond { condition, true_stmt, false_stmt } => {
                let taken = self.eval(condition)?.as_int()? != 0;
                let branch = if taken { true_stmt } else { false_stmt };
                match branch {
                    Some(stmt) => self.exec(stmt),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Per-lane binary dispatch on the operand kind. Operands share one dtype
/// after construction-time promotion.
fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => {
            ensure!(l.len() == r.len(), InvalidValueKindSnafu { context: "binary lanes" });
            let mut out = SmallVec::with_capacity(l.len());
            for (l, r) in l.iter().zip(r) {
                out.push(int_binary(op, *l, *r)?);
            }
            Ok(Value::Int(out))
        }
        (Value::Float(l), Value::Float(r)) => {
            ensure!(l.len() == r.len(), InvalidValueKindSnafu { context: "binary lanes" });
            let mut out = SmallVec::with_capacity(l.len());
            for (l, r) in l.iter().zip(r) {
                out.push(float_binary(op, *l, *r)?);
            }
            Ok(Value::Float(out))
        }
        _ => InvalidValueKindSnafu { context: "binary operands" }.fail(),
    }
}

fn int_binary(op: BinaryOp, l: i32, r: i32) -> Result<i32> {
    Ok(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div => {
            ensure!(r != 0, DivisionByZeroSnafu);
            l.wrapping_div(r)
        }
        BinaryOp::Mod => {
            ensure!(r != 0, DivisionByZeroSnafu);
            l.wrapping_rem(r)
        }
        BinaryOp::And => l & r,
        BinaryOp::Xor => l ^ r,
        BinaryOp::Lshift => l.wrapping_shl(r as u32),
        BinaryOp::Rshift => l.wrapping_shr(r as u32),
    })
}

fn float_binary(op: BinaryOp, l: f32, r: f32) -> Result<f32> {
    Ok(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        BinaryOp::Mod => l % r,
        _ => return InvalidValueKindSnafu { context: "bitwise on float" }.fail(),
    })
}

fn min_max_op(lhs: &Value, rhs: &Value, propagate_nans: bool, is_max: bool) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => {
            let out = l
                .iter()
                .zip(r)
                .map(|(l, r)| {
                    let take_lhs = if is_max { l > r } else { l < r };
                    if take_lhs { *l } else { *r }
                })
                .collect();
            Ok(Value::Int(out))
        }
        (Value::Float(l), Value::Float(r)) => {
            let out = l.iter().zip(r).map(|(l, r)| fold_float_min_max(*l, *r, propagate_nans, is_max)).collect();
            Ok(Value::Float(out))
        }
        _ => InvalidValueKindSnafu { context: "min/max operands" }.fail(),
    }
}

fn compare_select_op(op: fusor_ir::CompareOp, lhs: &Value, rhs: &Value, t: &Value, f: &Value) -> Result<Value> {
    let lanes = lhs.lanes().max(t.lanes());

    let take = |i: usize| -> Result<bool> {
        Ok(match (lhs, rhs) {
            (Value::Int(l), Value::Int(r)) => compare(op, &lane(l, i), &lane(r, i)),
            (Value::Float(l), Value::Float(r)) => compare(op, &lane(l, i), &lane(r, i)),
            _ => return InvalidValueKindSnafu { context: "compare operands" }.fail(),
        })
    };

    match (t, f) {
        (Value::Int(tv), Value::Int(fv)) => {
            let mut out = SmallVec::with_capacity(lanes);
            for i in 0..lanes {
                out.push(if take(i)? { lane(tv, i) } else { lane(fv, i) });
            }
            Ok(Value::Int(out))
        }
        (Value::Float(tv), Value::Float(fv)) => {
            let mut out = SmallVec::with_capacity(lanes);
            for i in 0..lanes {
                out.push(if take(i)? { lane(tv, i) } else { lane(fv, i) });
            }
            Ok(Value::Float(out))
        }
        _ => InvalidValueKindSnafu { context: "compare-select branches" }.fail(),
    }
}

/// Scalar values broadcast across lanes.
fn lane<T: Copy>(v: &[T], i: usize) -> T {
    if v.len() == 1 { v[0] } else { v[i] }
}

fn intrinsic_op(op: fusor_ir::IntrinsicOp, values: &[Value]) -> Result<Value> {
    match values {
        [v] => {
            let v = v.as_float_vec()?;
            let mut out = SmallVec::with_capacity(v.len());
            for x in v {
                out.push(fold_unary_intrinsic(op, *x).ok_or_else(|| UnsupportedIntrinsicSnafu { op }.build())?);
            }
            Ok(Value::Float(out))
        }
        [a, b] => {
            let a = a.as_float_vec()?;
            let b = b.as_float_vec()?;
            ensure!(a.len() == b.len(), InvalidValueKindSnafu { context: "intrinsic lanes" });
            let mut out = SmallVec::with_capacity(a.len());
            for (x, y) in a.iter().zip(b) {
                out.push(fold_binary_intrinsic(op, *x, *y).ok_or_else(|| UnsupportedIntrinsicSnafu { op }.build())?);
            }
            Ok(Value::Float(out))
        }
        _ => UnsupportedIntrinsicSnafu { op }.fail(),
    }
}

/// Masked gather: lanes whose mask is zero stay at the type's default.
fn load_lanes(ptr: *mut u8, dtype: Dtype, index: &[i32], mask: &[i32]) -> Result<Value> {
    match dtype.kind {
        ScalarKind::Float32 => {
            let ptr = ptr.cast::<f32>();
            let mut out: SmallVec<[f32; 8]> = smallvec![0.0; index.len()];
            for (i, (idx, m)) in index.iter().zip(mask).enumerate() {
                if *m != 0 {
                    out[i] = unsafe { *ptr.offset(*idx as isize) };
                }
            }
            Ok(Value::Float(out))
        }
        ScalarKind::Int32 => {
            let ptr = ptr.cast::<i32>();
            let mut out: SmallVec<[i32; 8]> = smallvec![0; index.len()];
            for (i, (idx, m)) in index.iter().zip(mask).enumerate() {
                if *m != 0 {
                    out[i] = unsafe { *ptr.offset(*idx as isize) };
                }
            }
            Ok(Value::Int(out))
        }
        ScalarKind::Handle => InvalidValueKindSnafu { context: "load dtype" }.fail(),
    }
}

/// Masked scatter: only mask-enabled lanes write back.
fn store_lanes(ptr: *mut u8, index: &[i32], mask: &[i32], value: &Value) -> Result<()> {
    match value {
        Value::Float(values) => {
            let ptr = ptr.cast::<f32>();
            for ((idx, m), v) in index.iter().zip(mask).zip(values) {
                if *m != 0 {
                    unsafe { *ptr.offset(*idx as isize) = *v };
                }
            }
        }
        Value::Int(values) => {
            let ptr = ptr.cast::<i32>();
            for ((idx, m), v) in index.iter().zip(mask).zip(values) {
                if *m != 0 {
                    unsafe { *ptr.offset(*idx as isize) = *v };
                }
            }
        }
    }
    Ok(())
}

/// The interpreter backend.
pub struct SimpleIrEval {
    stmt: Stmt,
    params: Vec<BufferArg>,
}

impl SimpleIrEval {
    pub fn new(stmt: &Stmt, params: &[BufferArg]) -> Self {
        Self { stmt: stmt.clone(), params: params.to_vec() }
    }
}

impl CodeGen for SimpleIrEval {
    fn stmt(&self) -> &Stmt {
        &self.stmt
    }

    fn params(&self) -> &[BufferArg] {
        &self.params
    }

    fn call(&mut self, args: &[CallArg]) -> Result<()> {
        check_args(&self.params, args)?;
        let mut interp = Interp::default();
        for (param, arg) in self.params.iter().zip(args) {
            match (param.is_var(), arg) {
                (true, CallArg::Int(v)) => {
                    interp.scalars.insert(param.var().id(), Value::int(*v));
                }
                (true, CallArg::Float(v)) => {
                    interp.scalars.insert(param.var().id(), Value::float(*v));
                }
                (false, CallArg::Buffer(ptr)) => {
                    interp.buffers.insert(param.var().id(), *ptr);
                }
                _ => unreachable!("check_args validated the argument kinds"),
            }
        }
        interp.exec(&self.stmt)
    }
}

/// Evaluate a standalone expression with no buffer or scalar bindings.
/// Test harness for folder/printer round trips.
pub fn evaluate_expr(e: &Expr) -> Result<Value> {
    Interp::default().eval(e)
}

/// Evaluate a standalone expression with scalar variable bindings.
pub fn evaluate_expr_with(e: &Expr, bindings: &[(Expr, Value)]) -> Result<Value> {
    let mut interp = Interp::default();
    for (var, value) in bindings {
        interp.bind_scalar(var, value.clone())?;
    }
    interp.eval(e)
}
