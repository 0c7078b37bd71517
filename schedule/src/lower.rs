//! Lowering scheduled tensors to a loop-nest statement.
//!
//! Each non-inlined tensor becomes a `For`-nest storing its body through the
//! function's handle variable at the flattened index; inlined tensors are
//! substituted into their consumers' bodies first. Non-output nests come
//! first, output nests last, concatenated into one block.

use fusor_ir::{Expr, ExprKind, ExprNode, IrMutator, Stmt, StmtNode, mutate_expr_children, substitute};

use crate::error::*;
use crate::schedule::{OpId, Schedule};

impl Schedule {
    /// Lower every non-inlined tensor into its loop nest.
    pub fn lower(&self) -> Result<Stmt> {
        let mut non_outputs = Vec::new();
        let mut outputs = Vec::new();
        for op in self.ops() {
            let node = self.node(op);
            if node.is_inlined() {
                continue;
            }
            if node.is_output() { outputs.push(op) } else { non_outputs.push(op) }
        }

        let mut stmts = Vec::new();
        for op in non_outputs.into_iter().chain(outputs) {
            stmts.push(Some(self.lower_node(op)?));
        }
        tracing::debug!(nests = stmts.len(), "schedule lowered");
        StmtNode::block(stmts).ok_or_else(|| EmptyScheduleSnafu.build())
    }

    fn lower_node(&self, op: OpId) -> Result<Stmt> {
        let node = self.node(op);
        let body = FunctionInliner { schedule: self }.mutate_expr(node.body())?;

        let mask = match node.predicate() {
            Some(predicate) => predicate.clone(),
            None => ExprNode::int(1),
        };
        let mut stmt = StmtNode::store(node.function.func_var(), node.store_index(), &body, &mask)?;

        for axis in node.axes().iter().rev() {
            stmt = StmtNode::for_loop_with_options(axis.var(), axis.start(), axis.stop(), &stmt, axis.options())?;
        }
        Ok(stmt)
    }
}

/// Replaces calls to inlined tensors by their bodies with the callee's
/// iteration variables substituted by the call indices, recursively.
struct FunctionInliner<'a> {
    schedule: &'a Schedule,
}

impl IrMutator for FunctionInliner<'_> {
    fn mutate_expr(&mut self, e: &Expr) -> fusor_ir::Result<Expr> {
        if let ExprKind::Call { function, indices } = e.kind() {
            let inlined =
                self.schedule.nodes.iter().any(|node| node.function.id() == function.id() && node.is_inlined());
            if inlined {
                let mapping: Vec<_> = function.args().iter().cloned().zip(indices.iter().cloned()).collect();
                let expanded = substitute(function.body(), &mapping)?;
                // The expansion may reference further inlined tensors, and the
                // substituted indices may themselves contain calls.
                return self.mutate_expr(&expanded);
            }
        }
        mutate_expr_children(self, e)
    }
}
