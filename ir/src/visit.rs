//! Uniform traversal over IR.
//!
//! `visit_* = preorder_* → traverse_* → postorder_*` for both node families.
//! The default `traverse_*` recurses into children; the default hooks do
//! nothing. A visitor that needs full control of child order (the printers)
//! overrides `visit_*` wholesale.

use crate::expr::{Expr, ExprKind};
use crate::stmt::{Stmt, StmtKind};

pub trait IrVisitor: Sized {
    fn visit_expr(&mut self, e: &Expr) {
        self.preorder_expr(e);
        self.traverse_expr(e);
        self.postorder_expr(e);
    }

    fn preorder_expr(&mut self, _e: &Expr) {}

    fn traverse_expr(&mut self, e: &Expr) {
        walk_expr(self, e);
    }

    fn postorder_expr(&mut self, _e: &Expr) {}

    fn visit_stmt(&mut self, s: &Stmt) {
        self.preorder_stmt(s);
        self.traverse_stmt(s);
        self.postorder_stmt(s);
    }

    fn preorder_stmt(&mut self, _s: &Stmt) {}

    fn traverse_stmt(&mut self, s: &Stmt) {
        walk_stmt(self, s);
    }

    fn postorder_stmt(&mut self, _s: &Stmt) {}
}

/// Visit every child expression of `e`, in argument order.
pub fn walk_expr<V: IrVisitor>(v: &mut V, e: &Expr) {
    match e.kind() {
        ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var { .. } => {}
        ExprKind::Cast { src } => v.visit_expr(src),
        ExprKind::Binary { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::Min { lhs, rhs, .. } | ExprKind::Max { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::CompareSelect { lhs, rhs, true_value, false_value, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
            v.visit_expr(true_value);
            v.visit_expr(false_value);
        }
        ExprKind::Let { var, value, body } => {
            v.visit_expr(var);
            v.visit_expr(value);
            v.visit_expr(body);
        }
        ExprKind::Ramp { base, stride, .. } => {
            v.visit_expr(base);
            v.visit_expr(stride);
        }
        ExprKind::Broadcast { value, .. } => v.visit_expr(value),
        ExprKind::IfThenElse { condition, true_value, false_value } => {
            v.visit_expr(condition);
            v.visit_expr(true_value);
            v.visit_expr(false_value);
        }
        ExprKind::Load { base, index, mask } => {
            v.visit_expr(base);
            v.visit_expr(index);
            v.visit_expr(mask);
        }
        ExprKind::Intrinsic { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
        ExprKind::Call { indices, .. } => {
            for index in indices {
                v.visit_expr(index);
            }
        }
    }
}

/// Visit every child of `s`: expressions first, then sub-statements, in
/// lexical order.
pub fn walk_stmt<V: IrVisitor>(v: &mut V, s: &Stmt) {
    match s.kind() {
        StmtKind::LetStmt { var, value, body } => {
            v.visit_expr(var);
            v.visit_expr(value);
            v.visit_stmt(body);
        }
        StmtKind::Block { stmts } => {
            for stmt in stmts {
                v.visit_stmt(stmt);
            }
        }
        StmtKind::For { var, start, stop, body, .. } => {
            v.visit_expr(var);
            v.visit_expr(start);
            v.visit_expr(stop);
            v.visit_stmt(body);
        }
        StmtKind::Store { base, index, value, mask } => {
            v.visit_expr(base);
            v.visit_expr(index);
            v.visit_expr(value);
            v.visit_expr(mask);
        }
        StmtKind::Allocate { var, dims, .. } => {
            v.visit_expr(var);
            for dim in dims {
                v.visit_expr(dim);
            }
        }
        StmtKind::Free { var } => v.visit_expr(var),
        StmtKind::Cond { condition, true_stmt, false_stmt } => {
            v.visit_expr(condition);
            if let Some(t) = true_stmt {
                v.visit_stmt(t);
            }
            if let Some(f) = false_stmt {
                v.visit_stmt(f);
            }
        }
    }
}
