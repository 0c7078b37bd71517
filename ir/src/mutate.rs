//! Structural rewriting over IR.
//!
//! The default mutator visits children and reconstructs a node only when a
//! child actually changed; otherwise the original node is returned untouched,
//! so `Rc::ptr_eq` doubles as a cheap fixpoint check. Reconstruction re-runs
//! constructor validation: a mutator that puts a mistyped child into a typed
//! position surfaces the usual malformed-IR error.

use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::*;
use crate::expr::{Expr, ExprKind, ExprNode};
use crate::stmt::{Stmt, StmtKind, StmtNode};

pub trait IrMutator: Sized {
    fn mutate_expr(&mut self, e: &Expr) -> Result<Expr> {
        mutate_expr_children(self, e)
    }

    fn mutate_stmt(&mut self, s: &Stmt) -> Result<Stmt> {
        mutate_stmt_children(self, s)
    }
}

fn all_same(old: &[Expr], new: &[Expr]) -> bool {
    old.iter().zip(new).all(|(a, b)| Rc::ptr_eq(a, b))
}

/// Default expression rewrite: mutate children, rebuild on change.
pub fn mutate_expr_children<M: IrMutator>(m: &mut M, e: &Expr) -> Result<Expr> {
    match e.kind() {
        ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var { .. } => Ok(e.clone()),
        ExprKind::Cast { src } => {
            let new_src = m.mutate_expr(src)?;
            if Rc::ptr_eq(&new_src, src) {
                return Ok(e.clone());
            }
            ExprNode::cast(e.dtype(), &new_src)
        }
        // All nine binary operators rebuild through the one tag-keyed entry point.
        ExprKind::Binary { op, lhs, rhs } => {
            let new_lhs = m.mutate_expr(lhs)?;
            let new_rhs = m.mutate_expr(rhs)?;
            if Rc::ptr_eq(&new_lhs, lhs) && Rc::ptr_eq(&new_rhs, rhs) {
                return Ok(e.clone());
            }
            ExprNode::try_binary(*op, &new_lhs, &new_rhs)
        }
        ExprKind::Min { lhs, rhs, propagate_nans } => {
            let new_lhs = m.mutate_expr(lhs)?;
            let new_rhs = m.mutate_expr(rhs)?;
            if Rc::ptr_eq(&new_lhs, lhs) && Rc::ptr_eq(&new_rhs, rhs) {
                return Ok(e.clone());
            }
            ExprNode::try_min(&new_lhs, &new_rhs, *propagate_nans)
        }
        ExprKind::Max { lhs, rhs, propagate_nans } => {
            let new_lhs = m.mutate_expr(lhs)?;
            let new_rhs = m.mutate_expr(rhs)?;
            if Rc::ptr_eq(&new_lhs, lhs) && Rc::ptr_eq(&new_rhs, rhs) {
                return Ok(e.clone());
            }
            ExprNode::try_max(&new_lhs, &new_rhs, *propagate_nans)
        }
        ExprKind::CompareSelect { op, lhs, rhs, true_value, false_value } => {
            let new_lhs = m.mutate_expr(lhs)?;
            let new_rhs = m.mutate_expr(rhs)?;
            let new_t = m.mutate_expr(true_value)?;
            let new_f = m.mutate_expr(false_value)?;
            if Rc::ptr_eq(&new_lhs, lhs)
                && Rc::ptr_eq(&new_rhs, rhs)
                && Rc::ptr_eq(&new_t, true_value)
                && Rc::ptr_eq(&new_f, false_value)
            {
                return Ok(e.clone());
            }
            ExprNode::compare_select_with(*op, &new_lhs, &new_rhs, &new_t, &new_f)
        }
        ExprKind::Let { var, value, body } => {
            let new_var = m.mutate_expr(var)?;
            let new_value = m.mutate_expr(value)?;
            let new_body = m.mutate_expr(body)?;
            if Rc::ptr_eq(&new_var, var) && Rc::ptr_eq(&new_value, value) && Rc::ptr_eq(&new_body, body) {
                return Ok(e.clone());
            }
            ExprNode::let_expr(&new_var, &new_value, &new_body)
        }
        ExprKind::Ramp { base, stride, lanes } => {
            let new_base = m.mutate_expr(base)?;
            let new_stride = m.mutate_expr(stride)?;
            if Rc::ptr_eq(&new_base, base) && Rc::ptr_eq(&new_stride, stride) {
                return Ok(e.clone());
            }
            ExprNode::ramp(&new_base, &new_stride, *lanes)
        }
        ExprKind::Broadcast { value, lanes } => {
            let new_value = m.mutate_expr(value)?;
            if Rc::ptr_eq(&new_value, value) {
                return Ok(e.clone());
            }
            ExprNode::broadcast(&new_value, *lanes)
        }
        ExprKind::IfThenElse { condition, true_value, false_value } => {
            let new_c = m.mutate_expr(condition)?;
            let new_t = m.mutate_expr(true_value)?;
            let new_f = m.mutate_expr(false_value)?;
            if Rc::ptr_eq(&new_c, condition) && Rc::ptr_eq(&new_t, true_value) && Rc::ptr_eq(&new_f, false_value) {
                return Ok(e.clone());
            }
            ExprNode::if_then_else(&new_c, &new_t, &new_f)
        }
        ExprKind::Load { base, index, mask } => {
            let new_base = m.mutate_expr(base)?;
            let new_index = m.mutate_expr(index)?;
            let new_mask = m.mutate_expr(mask)?;
            if Rc::ptr_eq(&new_base, base) && Rc::ptr_eq(&new_index, index) && Rc::ptr_eq(&new_mask, mask) {
                return Ok(e.clone());
            }
            ExprNode::load(e.dtype(), &new_base, &new_index, &new_mask)
        }
        ExprKind::Intrinsic { op, args } => {
            let new_args: Vec<Expr> = args.iter().map(|a| m.mutate_expr(a)).collect::<Result<_>>()?;
            if all_same(args, &new_args) {
                return Ok(e.clone());
            }
            ExprNode::intrinsic(*op, &new_args)
        }
        ExprKind::Call { function, indices } => {
            let new_indices: Vec<Expr> = indices.iter().map(|i| m.mutate_expr(i)).collect::<Result<_>>()?;
            if all_same(indices, &new_indices) {
                return Ok(e.clone());
            }
            ExprNode::call(function, &new_indices)
        }
    }
}

/// Default statement rewrite: mutate children, rebuild on change.
pub fn mutate_stmt_children<M: IrMutator>(m: &mut M, s: &Stmt) -> Result<Stmt> {
    match s.kind() {
        StmtKind::LetStmt { var, value, body } => {
            let new_var = m.mutate_expr(var)?;
            let new_value = m.mutate_expr(value)?;
            let new_body = m.mutate_stmt(body)?;
            if Rc::ptr_eq(&new_var, var) && Rc::ptr_eq(&new_value, value) && Rc::ptr_eq(&new_body, body) {
                return Ok(s.clone());
            }
            StmtNode::let_stmt(&new_var, &new_value, &new_body)
        }
        StmtKind::Block { stmts } => {
            let new_stmts: SmallVec<[Stmt; 4]> = stmts.iter().map(|st| m.mutate_stmt(st)).collect::<Result<_>>()?;
            if stmts.iter().zip(&new_stmts).all(|(a, b)| Rc::ptr_eq(a, b)) {
                return Ok(s.clone());
            }
            Ok(StmtNode::raw_block(new_stmts))
        }
        StmtKind::For { var, start, stop, body, options } => {
            let new_var = m.mutate_expr(var)?;
            let new_start = m.mutate_expr(start)?;
            let new_stop = m.mutate_expr(stop)?;
            let new_body = m.mutate_stmt(body)?;
            if Rc::ptr_eq(&new_var, var)
                && Rc::ptr_eq(&new_start, start)
                && Rc::ptr_eq(&new_stop, stop)
                && Rc::ptr_eq(&new_body, body)
            {
                return Ok(s.clone());
            }
            StmtNode::for_loop_with_options(&new_var, &new_start, &new_stop, &new_body, *options)
        }
        StmtKind::Store { base, index, value, mask } => {
            let new_base = m.mutate_expr(base)?;
            let new_index = m.mutate_expr(index)?;
            let new_value = m.mutate_expr(value)?;
            let new_mask = m.mutate_expr(mask)?;
            if Rc::ptr_eq(&new_base, base)
                && Rc::ptr_eq(&new_index, index)
                && Rc::ptr_eq(&new_value, value)
                && Rc::ptr_eq(&new_mask, mask)
            {
                return Ok(s.clone());
            }
            StmtNode::store(&new_base, &new_index, &new_value, &new_mask)
        }
        StmtKind::Allocate { var, dtype, dims } => {
            let new_var = m.mutate_expr(var)?;
            let new_dims: Vec<Expr> = dims.iter().map(|d| m.mutate_expr(d)).collect::<Result<_>>()?;
            if Rc::ptr_eq(&new_var, var) && all_same(dims, &new_dims) {
                return Ok(s.clone());
            }
            StmtNode::allocate(&new_var, *dtype, &new_dims)
        }
        StmtKind::Free { var } => {
            let new_var = m.mutate_expr(var)?;
            if Rc::ptr_eq(&new_var, var) {
                return Ok(s.clone());
            }
            StmtNode::free(&new_var)
        }
        StmtKind::Cond { condition, true_stmt, false_stmt } => {
            let new_c = m.mutate_expr(condition)?;
            let new_t = true_stmt.as_ref().map(|t| m.mutate_stmt(t)).transpose()?;
            let new_f = false_stmt.as_ref().map(|f| m.mutate_stmt(f)).transpose()?;
            let same_t = match (true_stmt, &new_t) {
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            let same_f = match (false_stmt, &new_f) {
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if Rc::ptr_eq(&new_c, condition) && same_t && same_f {
                return Ok(s.clone());
            }
            StmtNode::cond(&new_c, new_t, new_f)
        }
    }
}

/// Replaces variables by node identity. The images must have the right dtypes
/// for the positions the variables occupy; reconstruction checks them.
pub struct VarSubstitution {
    map: HashMap<u64, Expr>,
}

impl VarSubstitution {
    pub fn new(mapping: &[(Expr, Expr)]) -> Result<Self> {
        let mut map = HashMap::with_capacity(mapping.len());
        for (var, image) in mapping {
            if !var.is_var() {
                return VariableRequiredSnafu { context: "substitution key" }.fail();
            }
            map.insert(var.id(), image.clone());
        }
        Ok(Self { map })
    }
}

impl IrMutator for VarSubstitution {
    fn mutate_expr(&mut self, e: &Expr) -> Result<Expr> {
        if e.is_var()
            && let Some(image) = self.map.get(&e.id())
        {
            return Ok(image.clone());
        }
        mutate_expr_children(self, e)
    }
}

/// `e[var ↦ image]` for every pair in `mapping`.
pub fn substitute(e: &Expr, mapping: &[(Expr, Expr)]) -> Result<Expr> {
    VarSubstitution::new(mapping)?.mutate_expr(e)
}

/// Statement form of [`substitute`].
pub fn substitute_stmt(s: &Stmt, mapping: &[(Expr, Expr)]) -> Result<Stmt> {
    VarSubstitution::new(mapping)?.mutate_stmt(s)
}
