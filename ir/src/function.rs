//! Tensor functions and buffers.
//!
//! A [`Function`] is a named computation: for each index tuple in `0..dims` it
//! yields `body` evaluated with the iteration args bound to the tuple. A
//! [`Buffer`] is a handle variable plus static shape and row-major strides.

use std::rc::Rc;

use fusor_dtype::Dtype;
use snafu::ensure;

use crate::error::*;
use crate::expr::{Expr, ExprNode, ExprOps};
use crate::scope;

pub struct Function {
    id: u64,
    name: String,
    func_var: Expr,
    dims: Vec<Expr>,
    args: Vec<Expr>,
    body: Expr,
}

impl Function {
    /// Build a function. `args` are the scalar int32 iteration variables the
    /// body is written in terms of; one per dim.
    pub fn new(name: impl Into<String>, dims: Vec<Expr>, args: Vec<Expr>, body: Expr) -> Result<Rc<Self>> {
        let name = name.into();
        ensure!(
            dims.len() == args.len(),
            FunctionDimsArgsMismatchSnafu { name: name.clone(), dims: dims.len(), args: args.len() }
        );
        for arg in &args {
            ensure!(arg.is_var(), VariableRequiredSnafu { context: "function iteration arg" });
            ensure!(arg.dtype() == Dtype::INT32, LoopVarNotScalarIntSnafu { dtype: arg.dtype() });
        }
        for dim in &dims {
            let dtype = dim.dtype();
            ensure!(dtype.is_int() && dtype.is_scalar(), LoopBoundNotScalarIntSnafu { dtype });
        }
        let func_var = ExprNode::var(name.clone(), Dtype::HANDLE);
        let function = Rc::new(Self { id: scope::next_node_id(), name, func_var, dims, args, body });
        scope::register_function(&function);
        Ok(function)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handle variable this function's output is stored through.
    pub fn func_var(&self) -> &Expr {
        &self.func_var
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Expr] {
        &self.dims
    }

    pub fn dim(&self, index: usize) -> &Expr {
        &self.dims[index]
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> &Expr {
        &self.args[index]
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    /// Scalar dtype produced per element.
    pub fn dtype(&self) -> Dtype {
        self.body.dtype()
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function[{}/{}]", self.name, self.ndim())
    }
}

/// A named pointer-to-memory plus static shape and row-major strides.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Expr,
    dtype: Dtype,
    dims: Vec<Expr>,
    strides: Vec<Expr>,
}

impl Buffer {
    pub fn new(name: impl Into<String>, dtype: Dtype, dims: &[Expr]) -> Result<Self> {
        Self::from_var(ExprNode::var(name, Dtype::HANDLE), dtype, dims)
    }

    /// Wrap an existing handle variable, e.g. a function's output var.
    pub fn from_var(data: Expr, dtype: Dtype, dims: &[Expr]) -> Result<Self> {
        ensure!(data.is_var(), VariableRequiredSnafu { context: "buffer base" });
        ensure!(data.dtype().is_handle(), HandleRequiredSnafu { context: "buffer base", dtype: data.dtype() });
        let strides = row_major_strides(dims)?;
        Ok(Self { data, dtype, dims: dims.to_vec(), strides })
    }

    pub fn data(&self) -> &Expr {
        &self.data
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Expr] {
        &self.dims
    }

    pub fn dim(&self, index: usize) -> &Expr {
        &self.dims[index]
    }

    pub fn strides(&self) -> &[Expr] {
        &self.strides
    }

    /// Flatten a multi-dimensional index into `∑ index_i * stride_i`.
    pub fn index(&self, indices: &[Expr]) -> Result<Expr> {
        ensure!(
            indices.len() == self.ndim(),
            BufferRankSnafu { name: self.name().to_owned(), expected: self.ndim(), actual: indices.len() }
        );
        flatten_index(indices, &self.strides)
    }

    /// Load one element at a multi-dimensional index, with the trivial mask.
    pub fn load(&self, indices: &[Expr]) -> Result<Expr> {
        let index = self.index(indices)?;
        ExprNode::load(self.dtype.scalar_of(), &self.data, &index, &ExprNode::int(1))
    }

    /// Load at a precomputed (possibly vector) flat index; the loaded dtype's
    /// lane count follows the index.
    pub fn load_at(&self, index: &Expr, mask: &Expr) -> Result<Expr> {
        let dtype = self.dtype.with_lanes(index.dtype().lanes);
        ExprNode::load(dtype, &self.data, index, mask)
    }

    fn name(&self) -> &str {
        self.data.name_hint().unwrap_or("buffer")
    }
}

/// Row-major strides for a shape: innermost stride 1, each outer stride the
/// product of the dims inside it.
pub fn row_major_strides(dims: &[Expr]) -> Result<Vec<Expr>> {
    let mut strides = vec![ExprNode::int(1); dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1].try_mul(&dims[i + 1])?;
    }
    Ok(strides)
}

/// `∑ indices_i * strides_i`, dropping the unit multiply on the innermost axis.
pub fn flatten_index(indices: &[Expr], strides: &[Expr]) -> Result<Expr> {
    debug_assert_eq!(indices.len(), strides.len());
    let mut total: Option<Expr> = None;
    for (i, index) in indices.iter().enumerate() {
        let term = if i == indices.len() - 1 { index.clone() } else { index.try_mul(&strides[i])? };
        total = Some(match total {
            Some(acc) => acc.try_add(&term)?,
            None => term,
        });
    }
    Ok(total.unwrap_or_else(|| ExprNode::int(0)))
}
