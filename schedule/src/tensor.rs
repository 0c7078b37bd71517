//! Declarative tensor builders.
//!
//! [`compute`] is the primary entry point: it allocates one fresh int32
//! iteration variable per dimension, invokes the body closure on them, and
//! wraps the result into a named [`Function`]. The returned [`Tensor`] is the
//! handle the scheduler operates on.

use std::rc::Rc;

use fusor_dtype::Dtype;
use fusor_ir::{Expr, ExprNode, Function};

use crate::error::Result;

/// A dimension extent plus an optional name hint for its iteration variable.
#[derive(Debug, Clone)]
pub struct DimArg {
    dim: Expr,
    name_hint: String,
}

impl DimArg {
    pub fn new(dim: Expr, name_hint: impl Into<String>) -> Self {
        Self { dim, name_hint: name_hint.into() }
    }

    pub fn dim(&self) -> &Expr {
        &self.dim
    }

    pub fn name_hint(&self) -> &str {
        &self.name_hint
    }
}

impl From<Expr> for DimArg {
    fn from(dim: Expr) -> Self {
        Self { dim, name_hint: String::new() }
    }
}

impl From<i32> for DimArg {
    fn from(dim: i32) -> Self {
        Self { dim: ExprNode::int(dim), name_hint: String::new() }
    }
}

impl From<(Expr, &str)> for DimArg {
    fn from((dim, hint): (Expr, &str)) -> Self {
        Self::new(dim, hint)
    }
}

impl From<(i32, &str)> for DimArg {
    fn from((dim, hint): (i32, &str)) -> Self {
        Self::new(ExprNode::int(dim), hint)
    }
}

/// Handle to a registered tensor function.
#[derive(Clone)]
pub struct Tensor {
    function: Rc<Function>,
}

impl Tensor {
    /// Wrap an already-built function. [`compute`] is the usual entry point;
    /// this exists for callers that assemble bodies with their own error
    /// handling around the IR constructors.
    pub fn new(function: Rc<Function>) -> Self {
        Self { function }
    }

    pub fn function(&self) -> &Rc<Function> {
        &self.function
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn ndim(&self) -> usize {
        self.function.ndim()
    }

    pub fn dims(&self) -> &[Expr] {
        self.function.dims()
    }

    /// The iteration variable of one axis.
    pub fn arg(&self, index: usize) -> &Expr {
        self.function.arg(index)
    }

    /// Scalar dtype produced per element.
    pub fn dtype(&self) -> Dtype {
        self.function.dtype()
    }

    /// Reference this tensor's value at the given indices.
    ///
    /// Returns the IR result type so calls compose inside [`compute`] bodies.
    pub fn call(&self, indices: &[Expr]) -> fusor_ir::Result<Expr> {
        ExprNode::call(&self.function, indices)
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor[{}/{}]", self.name(), self.ndim())
    }
}

const DEFAULT_AXIS_HINTS: [&str; 4] = ["i", "j", "k", "l"];

/// Build a tensor: for each index tuple in `0..dims`, the element is the body
/// expression evaluated over the iteration variables.
pub fn compute<F>(name: impl Into<String>, dim_args: impl IntoIterator<Item = DimArg>, body_fn: F) -> Result<Tensor>
where
    F: FnOnce(&[Expr]) -> fusor_ir::Result<Expr>,
{
    let name = name.into();
    let dim_args: Vec<DimArg> = dim_args.into_iter().collect();

    let mut dims = Vec::with_capacity(dim_args.len());
    let mut args = Vec::with_capacity(dim_args.len());
    for (index, dim_arg) in dim_args.iter().enumerate() {
        let hint = if dim_arg.name_hint.is_empty() {
            DEFAULT_AXIS_HINTS.get(index).map_or_else(|| format!("i{index}"), |h| (*h).to_owned())
        } else {
            dim_arg.name_hint.clone()
        };
        dims.push(dim_arg.dim.clone());
        args.push(ExprNode::var(hint, Dtype::INT32));
    }

    let body = body_fn(&args)?;
    tracing::trace!(name = %name, ndim = dims.len(), "compute tensor");
    let function = Function::new(name, dims, args, body)?;
    Ok(Tensor::new(function))
}

/// Convenience for mixed dim-arg lists: `dims![16, (n, "j")]`-style call sites
/// just pass `impl Into<DimArg>` values.
pub fn dim_args<T: Into<DimArg>>(items: impl IntoIterator<Item = T>) -> Vec<DimArg> {
    items.into_iter().map(Into::into).collect()
}
