//! Backend-independent parameter and argument marshaling.
//!
//! Every backend consumes a lowered statement plus a parameter list: one
//! [`BufferArg`] per buffer (handle variable + element dtype) or free scalar
//! variable. At call time the caller supplies matching [`CallArg`]s in the
//! same order.

use fusor_dtype::Dtype;
use fusor_ir::{Buffer, Expr, Stmt};
use snafu::ensure;

use crate::error::*;

/// A formal kernel parameter: a buffer base or a scalar variable.
#[derive(Debug, Clone)]
pub struct BufferArg {
    var: Expr,
    dtype: Dtype,
    is_var: bool,
}

impl BufferArg {
    /// A buffer parameter: `var` is the Handle variable loads and stores go
    /// through, `dtype` the element type.
    pub fn buffer(var: &Expr, dtype: Dtype) -> Result<Self> {
        ensure!(var.is_var(), BadParameterSnafu { context: "buffer parameter", expected: "handle" });
        ensure!(var.dtype().is_handle(), BadParameterSnafu { context: "buffer parameter", expected: "handle" });
        Ok(Self { var: var.clone(), dtype, is_var: false })
    }

    /// Shorthand for binding an IR [`Buffer`].
    pub fn from_buffer(buffer: &Buffer) -> Result<Self> {
        Self::buffer(buffer.data(), buffer.dtype())
    }

    /// A free scalar parameter, e.g. a dynamic shape bound.
    pub fn scalar(var: &Expr) -> Result<Self> {
        ensure!(var.is_var(), BadParameterSnafu { context: "scalar parameter", expected: "scalar" });
        let dtype = var.dtype();
        ensure!(dtype.is_scalar() && !dtype.is_handle(), BadParameterSnafu { context: "scalar parameter", expected: "scalar" });
        Ok(Self { var: var.clone(), dtype, is_var: true })
    }

    pub fn var(&self) -> &Expr {
        &self.var
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// True for scalar (by-value) parameters, false for buffers.
    pub fn is_var(&self) -> bool {
        self.is_var
    }

    pub fn name_hint(&self) -> &str {
        self.var.name_hint().unwrap_or("arg")
    }
}

/// A runtime argument for one kernel parameter.
///
/// `Buffer` carries a raw base pointer; the caller keeps the underlying
/// storage alive and correctly sized for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub enum CallArg {
    Int(i32),
    Float(f32),
    Buffer(*mut u8),
}

impl CallArg {
    /// Borrow a slice's storage as a buffer argument.
    pub fn buffer<T>(data: &mut [T]) -> Self {
        Self::Buffer(data.as_mut_ptr().cast())
    }

    pub fn as_buffer(&self) -> Option<*mut u8> {
        match self {
            Self::Buffer(ptr) => Some(*ptr),
            _ => None,
        }
    }
}

impl From<i32> for CallArg {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for CallArg {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

/// A compiled kernel: consumes call arguments, writes through output buffers.
pub trait CodeGen {
    /// The lowered statement this backend was built from.
    fn stmt(&self) -> &Stmt;

    /// Formal parameters, in call-argument order.
    fn params(&self) -> &[BufferArg];

    /// Run the kernel.
    fn call(&mut self, args: &[CallArg]) -> Result<()>;
}

pub(crate) fn check_args(params: &[BufferArg], args: &[CallArg]) -> Result<()> {
    ensure!(params.len() == args.len(), ArgumentCountMismatchSnafu { expected: params.len(), actual: args.len() });
    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        let ok = if param.is_var() {
            match (param.dtype().kind, arg) {
                (fusor_dtype::ScalarKind::Int32, CallArg::Int(_)) => true,
                (fusor_dtype::ScalarKind::Float32, CallArg::Float(_)) => true,
                _ => false,
            }
        } else {
            matches!(arg, CallArg::Buffer(_))
        };
        ensure!(
            ok,
            ArgumentMismatchSnafu {
                index,
                name: param.name_hint().to_owned(),
                expected: if param.is_var() { "scalar" } else { "buffer" },
            }
        );
    }
    Ok(())
}
