//! Statement nodes.
//!
//! Statements are imperative and may mutate buffers. "Nothing" statements are
//! `Option<Stmt>`: empty blocks collapse to `None` and null sub-statements are
//! dropped at construction.

use std::fmt;
use std::rc::Rc;

use fusor_dtype::Dtype;
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::expr::Expr;
use crate::scope;

pub type Stmt = Rc<StmtNode>;

/// Optional GPU binding of a loop to a block or thread axis (x, y, z, w).
/// A loop binds at most one of the two; re-binding to a different index is
/// rejected, re-binding to the same index is a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LoopOptions {
    gpu_block_index: Option<u8>,
    gpu_thread_index: Option<u8>,
}

const BLOCK_INDEX_NAMES: [&str; 4] = ["blockIdx.x", "blockIdx.y", "blockIdx.z", "blockIdx.w"];
const THREAD_INDEX_NAMES: [&str; 4] = ["threadIdx.x", "threadIdx.y", "threadIdx.z", "threadIdx.w"];

impl LoopOptions {
    pub fn is_default(&self) -> bool {
        self.gpu_block_index.is_none() && self.gpu_thread_index.is_none()
    }

    pub fn gpu_block_index(&self) -> Option<u8> {
        self.gpu_block_index
    }

    pub fn gpu_thread_index(&self) -> Option<u8> {
        self.gpu_thread_index
    }

    pub fn set_gpu_block_index(&mut self, index: u8) -> Result<()> {
        ensure!(index < 4, GpuAxisOutOfRangeSnafu { index });
        ensure!(self.gpu_thread_index.is_none(), GpuBlockThreadConflictSnafu);
        if let Some(existing) = self.gpu_block_index {
            ensure!(existing == index, GpuAxisConflictSnafu { existing, requested: index });
        }
        self.gpu_block_index = Some(index);
        Ok(())
    }

    pub fn set_gpu_thread_index(&mut self, index: u8) -> Result<()> {
        ensure!(index < 4, GpuAxisOutOfRangeSnafu { index });
        ensure!(self.gpu_block_index.is_none(), GpuBlockThreadConflictSnafu);
        if let Some(existing) = self.gpu_thread_index {
            ensure!(existing == index, GpuAxisConflictSnafu { existing, requested: index });
        }
        self.gpu_thread_index = Some(index);
        Ok(())
    }

    /// The CUDA index expression this loop is bound to, if any.
    pub fn axis_name(&self) -> Option<&'static str> {
        if let Some(i) = self.gpu_block_index {
            return Some(BLOCK_INDEX_NAMES[i as usize]);
        }
        self.gpu_thread_index.map(|i| THREAD_INDEX_NAMES[i as usize])
    }
}

#[derive(Clone)]
pub enum StmtKind {
    LetStmt { var: Expr, value: Expr, body: Stmt },
    Block { stmts: SmallVec<[Stmt; 4]> },
    For { var: Expr, start: Expr, stop: Expr, body: Stmt, options: LoopOptions },
    Store { base: Expr, index: Expr, value: Expr, mask: Expr },
    Allocate { var: Expr, dtype: Dtype, dims: SmallVec<[Expr; 4]> },
    Free { var: Expr },
    Cond { condition: Expr, true_stmt: Option<Stmt>, false_stmt: Option<Stmt> },
}

pub struct StmtNode {
    id: u64,
    kind: StmtKind,
}

impl StmtNode {
    fn new(kind: StmtKind) -> Stmt {
        let node = Rc::new(Self { id: scope::next_node_id(), kind });
        scope::register_stmt(&node);
        node
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &StmtKind {
        &self.kind
    }

    /// Statement-level binding over a body statement.
    pub fn let_stmt(var: &Expr, value: &Expr, body: &Stmt) -> Result<Stmt> {
        ensure!(var.is_var(), VariableRequiredSnafu { context: "let statement" });
        ensure!(var.dtype() == value.dtype(), LetDtypeMismatchSnafu { var: var.dtype(), value: value.dtype() });
        Ok(Self::new(StmtKind::LetStmt { var: var.clone(), value: value.clone(), body: body.clone() }))
    }

    /// Sequence of statements. Dropped entries are skipped; an empty sequence
    /// collapses to `None`.
    pub fn block(stmts: impl IntoIterator<Item = Option<Stmt>>) -> Option<Stmt> {
        let stmts: SmallVec<[Stmt; 4]> = stmts.into_iter().flatten().collect();
        if stmts.is_empty() { None } else { Some(Self::new(StmtKind::Block { stmts })) }
    }

    /// Rebuild a block from already-validated statements. Mutator internals
    /// only; the public [`StmtNode::block`] applies the collapse rules.
    pub(crate) fn raw_block(stmts: SmallVec<[Stmt; 4]>) -> Stmt {
        Self::new(StmtKind::Block { stmts })
    }

    /// `for var in [start, stop)`, in increasing index order.
    pub fn for_loop(var: &Expr, start: &Expr, stop: &Expr, body: &Stmt) -> Result<Stmt> {
        Self::for_loop_with_options(var, start, stop, body, LoopOptions::default())
    }

    pub fn for_loop_with_options(
        var: &Expr,
        start: &Expr,
        stop: &Expr,
        body: &Stmt,
        options: LoopOptions,
    ) -> Result<Stmt> {
        ensure!(var.is_var(), VariableRequiredSnafu { context: "for loop" });
        ensure!(var.dtype() == Dtype::INT32, LoopVarNotScalarIntSnafu { dtype: var.dtype() });
        for bound in [start, stop] {
            let dtype = bound.dtype();
            ensure!(dtype.is_int() && dtype.is_scalar(), LoopBoundNotScalarIntSnafu { dtype });
        }
        let kind = StmtKind::For {
            var: var.clone(),
            start: start.clone(),
            stop: stop.clone(),
            body: body.clone(),
            options,
        };
        Ok(Self::new(kind))
    }

    /// Masked store. Same lane and kind rules as `Load`.
    pub fn store(base: &Expr, index: &Expr, value: &Expr, mask: &Expr) -> Result<Stmt> {
        crate::expr::ExprNode::check_access("store", value.dtype(), base, index, mask)?;
        let kind =
            StmtKind::Store { base: base.clone(), index: index.clone(), value: value.clone(), mask: mask.clone() };
        Ok(Self::new(kind))
    }

    /// Store with the trivial all-lanes mask.
    pub fn store_unmasked(base: &Expr, index: &Expr, value: &Expr) -> Result<Stmt> {
        let lanes = value.dtype().lanes;
        let mask = if lanes == 1 {
            crate::expr::ExprNode::int(1)
        } else {
            crate::expr::ExprNode::broadcast(&crate::expr::ExprNode::int(1), lanes)?
        };
        Self::store(base, index, value, &mask)
    }

    /// Reserve a buffer for `var` until a matching `Free`.
    pub fn allocate(var: &Expr, dtype: Dtype, dims: &[Expr]) -> Result<Stmt> {
        ensure!(var.is_var(), VariableRequiredSnafu { context: "allocate" });
        ensure!(var.dtype().is_handle(), HandleRequiredSnafu { context: "allocate", dtype: var.dtype() });
        for dim in dims {
            let dtype = dim.dtype();
            ensure!(dtype.is_int() && dtype.is_scalar(), LoopBoundNotScalarIntSnafu { dtype });
        }
        Ok(Self::new(StmtKind::Allocate { var: var.clone(), dtype, dims: dims.iter().cloned().collect() }))
    }

    pub fn free(var: &Expr) -> Result<Stmt> {
        ensure!(var.is_var(), VariableRequiredSnafu { context: "free" });
        ensure!(var.dtype().is_handle(), HandleRequiredSnafu { context: "free", dtype: var.dtype() });
        Ok(Self::new(StmtKind::Free { var: var.clone() }))
    }

    /// Two-way conditional; either branch may be nothing.
    pub fn cond(condition: &Expr, true_stmt: Option<Stmt>, false_stmt: Option<Stmt>) -> Result<Stmt> {
        let dtype = condition.dtype();
        ensure!(dtype.is_int() && dtype.is_scalar(), ConditionNotScalarIntSnafu { dtype });
        Ok(Self::new(StmtKind::Cond { condition: condition.clone(), true_stmt, false_stmt }))
    }
}

impl fmt::Display for StmtNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        crate::printer::IrPrinter::new(&mut out).print_stmt(self);
        f.write_str(&out)
    }
}

impl fmt::Debug for StmtNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stmt[{}]", self)
    }
}
