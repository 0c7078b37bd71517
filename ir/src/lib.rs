//! Typed expression/statement IR for dense tensor programs.
//!
//! The crate provides the IR node algebra (pure expressions, imperative
//! statements), scope-bounded node ownership, the visitor and mutator
//! rewriting protocols, a deterministic printer, a constant folder and a
//! structural hasher, plus the declarative [`Function`]/[`Buffer`] layer the
//! scheduler builds on.

pub mod error;
pub mod expr;
pub mod fold;
pub mod function;
pub mod hash;
pub mod mutate;
pub mod printer;
pub mod scope;
pub mod stmt;
pub mod visit;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
pub use expr::{BinaryOp, CompareOp, Expr, ExprKind, ExprNode, ExprOps, IntrinsicOp};
pub use fold::{ConstantFolder, fold, fold_stmt};
pub use function::{Buffer, Function, flatten_index, row_major_strides};
pub use hash::HashProvider;
pub use mutate::{IrMutator, VarSubstitution, mutate_expr_children, mutate_stmt_children, substitute, substitute_stmt};
pub use printer::{IrPrinter, UniqueNameManager};
pub use scope::{KernelArena, KernelScope};
pub use stmt::{LoopOptions, Stmt, StmtKind, StmtNode};
pub use visit::{IrVisitor, walk_expr, walk_stmt};
