//! CUDA C++ source emission.
//!
//! Emits one `extern "C" __global__` kernel for a lowered statement. Loops
//! bound to GPU axes via `LoopOptions` are elided in favour of the matching
//! `blockIdx.*`/`threadIdx.*` expression plus a bounds guard; unbound loops
//! become ordinary `for`s. Emission is deterministic and purely textual —
//! executing the source is the caller's responsibility.

use fusor_dtype::ScalarKind;
use fusor_ir::{Expr, ExprKind, IntrinsicOp, Stmt, StmtKind, UniqueNameManager};
use snafu::ensure;

use crate::error::*;
use crate::types::{BufferArg, CallArg, CodeGen, check_args};

#[derive(Debug)]
pub struct CudaCodeGen {
    stmt: Stmt,
    params: Vec<BufferArg>,
    source: String,
}

impl CudaCodeGen {
    pub fn new(stmt: &Stmt, params: &[BufferArg]) -> Result<Self> {
        let mut emitter = CudaEmitter { out: String::new(), names: UniqueNameManager::new(), indent: 1 };

        let mut header = String::from("extern \"C\" __global__\nvoid f(");
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                header.push_str(", ");
            }
            let name = emitter.names.unique_name(param.var());
            if param.is_var() {
                header.push_str(&format!("{} {name}", param.dtype().kind.c_style()));
            } else {
                header.push_str(&format!("{}* {name}", param.dtype().kind.c_style()));
            }
        }
        header.push_str(") {\n");

        emitter.emit_stmt(stmt)?;

        let mut source = header;
        source.push_str(&emitter.out);
        source.push_str("}\n");
        tracing::debug!(bytes = source.len(), "cuda kernel emitted");
        Ok(Self { stmt: stmt.clone(), params: params.to_vec(), source })
    }

    /// The emitted kernel source.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl CodeGen for CudaCodeGen {
    fn stmt(&self) -> &Stmt {
        &self.stmt
    }

    fn params(&self) -> &[BufferArg] {
        &self.params
    }

    /// Validates the arguments; launching the kernel is out of scope.
    fn call(&mut self, args: &[CallArg]) -> Result<()> {
        check_args(&self.params, args)
    }
}

struct CudaEmitter {
    out: String,
    names: UniqueNameManager,
    indent: usize,
}

impl CudaEmitter {
    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn scalar_only(&self, what: &'static str, e: &Expr) -> Result<()> {
        let lanes = e.dtype().lanes;
        ensure!(lanes == 1, CudaLanesUnsupportedSnafu { what, lanes });
        Ok(())
    }

    fn emit_expr(&mut self, e: &Expr) -> Result<String> {
        Ok(match e.kind() {
            ExprKind::IntImm(v) => v.to_string(),
            ExprKind::FloatImm(v) => cuda_float(*v),
            ExprKind::Var { .. } => self.names.unique_name(e),
            ExprKind::Cast { src } => {
                let src = self.emit_expr(src)?;
                format!("({})({src})", e.dtype().kind.c_style())
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.emit_expr(lhs)?;
                let rhs = self.emit_expr(rhs)?;
                format!("({lhs} {} {rhs})", op.symbol())
            }
            ExprKind::Min { lhs, rhs, propagate_nans } => self.emit_min_max(e, lhs, rhs, *propagate_nans, false)?,
            ExprKind::Max { lhs, rhs, propagate_nans } => self.emit_min_max(e, lhs, rhs, *propagate_nans, true)?,
            ExprKind::CompareSelect { op, lhs, rhs, true_value, false_value } => {
                let lhs = self.emit_expr(lhs)?;
                let rhs = self.emit_expr(rhs)?;
                let t = self.emit_expr(true_value)?;
                let f = self.emit_expr(false_value)?;
                format!("(({lhs} {} {rhs}) ? {t} : {f})", op.symbol())
            }
            ExprKind::Let { var, value, body } => {
                // Statement-expression form; lowered code rarely carries
                // expression lets, but they stay emittable.
                let ty = var.dtype().kind.c_style();
                let name = self.names.unique_name(var);
                let value = self.emit_expr(value)?;
                let body = self.emit_expr(body)?;
                format!("({{ {ty} {name} = {value}; {body}; }})")
            }
            ExprKind::Ramp { .. } | ExprKind::Broadcast { .. } => {
                return CudaLanesUnsupportedSnafu { what: "vector value", lanes: e.dtype().lanes }.fail();
            }
            ExprKind::IfThenElse { condition, true_value, false_value } => {
                let c = self.emit_expr(condition)?;
                let t = self.emit_expr(true_value)?;
                let f = self.emit_expr(false_value)?;
                format!("({c} ? {t} : {f})")
            }
            ExprKind::Load { base, index, mask } => {
                self.scalar_only("load", e)?;
                let base = self.emit_expr(base)?;
                let index = self.emit_expr(index)?;
                if mask.is_const_one_mask() {
                    format!("{base}[{index}]")
                } else {
                    let mask = self.emit_expr(mask)?;
                    let zero = match e.dtype().kind {
                        ScalarKind::Float32 => "0.f",
                        _ => "0",
                    };
                    format!("({mask} ? {base}[{index}] : {zero})")
                }
            }
            ExprKind::Intrinsic { op, args } => self.emit_intrinsic(*op, args)?,
            ExprKind::Call { function, .. } => {
                return UnloweredCallSnafu { name: function.name().to_owned() }.fail();
            }
        })
    }

    fn emit_min_max(&mut self, e: &Expr, lhs: &Expr, rhs: &Expr, propagate_nans: bool, is_max: bool) -> Result<String> {
        self.scalar_only("min/max", e)?;
        let l = self.emit_expr(lhs)?;
        let r = self.emit_expr(rhs)?;
        Ok(if e.dtype().kind.is_float() {
            let f = if is_max { "fmaxf" } else { "fminf" };
            if propagate_nans {
                format!("(isnan({l}) ? {l} : isnan({r}) ? {r} : {f}({l}, {r}))")
            } else {
                // fminf/fmaxf quietly drop a single NaN, matching the
                // non-propagating comparison semantics.
                format!("{f}({l}, {r})")
            }
        } else if is_max {
            format!("max({l}, {r})")
        } else {
            format!("min({l}, {r})")
        })
    }

    fn emit_intrinsic(&mut self, op: IntrinsicOp, args: &[Expr]) -> Result<String> {
        let name = match op {
            IntrinsicOp::Sin => "sinf",
            IntrinsicOp::Cos => "cosf",
            IntrinsicOp::Tan => "tanf",
            IntrinsicOp::Asin => "asinf",
            IntrinsicOp::Acos => "acosf",
            IntrinsicOp::Atan => "atanf",
            IntrinsicOp::Atan2 => "atan2f",
            IntrinsicOp::Sinh => "sinhf",
            IntrinsicOp::Cosh => "coshf",
            IntrinsicOp::Tanh => "tanhf",
            IntrinsicOp::Exp => "expf",
            IntrinsicOp::Expm1 => "expm1f",
            IntrinsicOp::Fabs => "fabsf",
            IntrinsicOp::Log => "logf",
            IntrinsicOp::Log2 => "log2f",
            IntrinsicOp::Log10 => "log10f",
            IntrinsicOp::Log1p => "log1pf",
            IntrinsicOp::Erf => "erff",
            IntrinsicOp::Erfc => "erfcf",
            IntrinsicOp::Sqrt => "sqrtf",
            IntrinsicOp::Rsqrt => "rsqrtf",
            IntrinsicOp::Pow => "powf",
            IntrinsicOp::Ceil => "ceilf",
            IntrinsicOp::Floor => "floorf",
            IntrinsicOp::Round => "roundf",
            IntrinsicOp::Trunc => "truncf",
            IntrinsicOp::Fmod => "fmodf",
            IntrinsicOp::Remainder => "remainderf",
            IntrinsicOp::Lgamma => "lgammaf",
            IntrinsicOp::Frac => {
                let x = self.emit_expr(&args[0])?;
                return Ok(format!("({x} - truncf({x}))"));
            }
            IntrinsicOp::Rand => return UnsupportedIntrinsicSnafu { op }.fail(),
        };
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            rendered.push(self.emit_expr(arg)?);
        }
        Ok(format!("{name}({})", rendered.join(", ")))
    }

    fn emit_stmt(&mut self, s: &Stmt) -> Result<()> {
        match s.kind() {
            StmtKind::LetStmt { var, value, body } => {
                let ty = var.dtype().kind.c_style();
                let name = self.names.unique_name(var);
                let value = self.emit_expr(value)?;
                self.line_start();
                self.out.push_str(&format!("{ty} {name} = {value};\n"));
                self.emit_stmt(body)
            }
            StmtKind::Block { stmts } => {
                for stmt in stmts {
                    self.emit_stmt(stmt)?;
                }
                Ok(())
            }
            StmtKind::For { var, start, stop, body, options } => {
                let name = self.names.unique_name(var);
                if let Some(axis) = options.axis_name() {
                    // The loop collapses onto the grid; keep a guard so any
                    // launch configuration stays in bounds.
                    let stop = self.emit_expr(stop)?;
                    self.line_start();
                    self.out.push_str(&format!("int {name} = {axis};\n"));
                    self.line_start();
                    self.out.push_str(&format!("if ({name} < {stop}) {{\n"));
                    self.indent += 1;
                    self.emit_stmt(body)?;
                    self.indent -= 1;
                    self.line_start();
                    self.out.push_str("}\n");
                } else {
                    let start = self.emit_expr(start)?;
                    let stop = self.emit_expr(stop)?;
                    self.line_start();
                    self.out.push_str(&format!("for (int {name} = {start}; {name} < {stop}; {name}++) {{\n"));
                    self.indent += 1;
                    self.emit_stmt(body)?;
                    self.indent -= 1;
                    self.line_start();
                    self.out.push_str("}\n");
                }
                Ok(())
            }
            StmtKind::Store { base, index, value, mask } => {
                self.scalar_only("store", value)?;
                let base = self.emit_expr(base)?;
                let index = self.emit_expr(index)?;
                let value = self.emit_expr(value)?;
                self.line_start();
                if mask.is_const_one_mask() {
                    self.out.push_str(&format!("{base}[{index}] = {value};\n"));
                } else {
                    let mask = self.emit_expr(mask)?;
                    self.out.push_str(&format!("if ({mask}) {{ {base}[{index}] = {value}; }}\n"));
                }
                Ok(())
            }
            StmtKind::Allocate { var, dtype, dims } => {
                let mut total = 1i64;
                for dim in dims {
                    let extent = dim
                        .as_int_imm()
                        .ok_or_else(|| CudaDynamicAllocationSnafu { name: var_display(var) }.build())?;
                    total *= extent as i64;
                }
                let name = self.names.unique_name(var);
                self.line_start();
                self.out.push_str(&format!("{} {name}[{total}];\n", dtype.kind.c_style()));
                Ok(())
            }
            StmtKind::Free { var } => {
                let name = self.names.unique_name(var);
                self.line_start();
                self.out.push_str(&format!("// free {name}\n"));
                Ok(())
            }
            StmtKind::Cond { condition, true_stmt, false_stmt } => {
                let condition = self.emit_expr(condition)?;
                self.line_start();
                self.out.push_str(&format!("if ({condition}) {{\n"));
                if let Some(t) = true_stmt {
                    self.indent += 1;
                    self.emit_stmt(t)?;
                    self.indent -= 1;
                }
                self.line_start();
                if let Some(f) = false_stmt {
                    self.out.push_str("} else {\n");
                    self.indent += 1;
                    self.emit_stmt(f)?;
                    self.indent -= 1;
                    self.line_start();
                }
                self.out.push_str("}\n");
                Ok(())
            }
        }
    }
}

fn var_display(var: &Expr) -> String {
    var.name_hint().unwrap_or("<unnamed>").to_owned()
}

/// CUDA float literal: `2.f`, `3.5f`, with macro spellings for non-finite
/// values.
fn cuda_float(v: f32) -> String {
    if v.is_nan() {
        return "NAN".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "INFINITY".to_owned() } else { "-INFINITY".to_owned() };
    }
    if v == v.trunc() && v.abs() < 1e16 {
        format!("{}.f", v as i64)
    } else {
        format!("{v}f")
    }
}
