//! Deterministic textual form of IR, used by golden tests and diagnostics.
//!
//! Contracts: integer literals print bare (`2`), float literals carry an `f`
//! suffix (`2.f`), binary operators parenthesize explicitly (`(a + b)`),
//! expression lets print as `(let x = v in body)`, casts as `int32(x)`, and
//! loops as `For(i, 0, 16) { … }`.

use std::collections::{HashMap, HashSet};

use crate::expr::{Expr, ExprKind, ExprNode};
use crate::stmt::{StmtKind, StmtNode};
use crate::visit::IrVisitor;

/// Assigns each distinct variable a unique textual name derived from its name
/// hint. The first variable of a hint keeps the bare hint; later ones get
/// `_1`, `_2`, … suffixes. Identity is the variable node, never the hint.
#[derive(Default)]
pub struct UniqueNameManager {
    by_id: HashMap<u64, String>,
    counts: HashMap<String, u32>,
    taken: HashSet<String>,
}

impl UniqueNameManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique_name(&mut self, var: &ExprNode) -> String {
        debug_assert!(var.is_var(), "unique names are only assigned to variables");
        if let Some(name) = self.by_id.get(&var.id()) {
            return name.clone();
        }
        let hint = match var.name_hint() {
            Some(h) if !h.is_empty() => h.to_owned(),
            _ => "v".to_owned(),
        };
        let count = self.counts.entry(hint.clone()).or_insert(0);
        loop {
            // Even a fresh count can collide: ("x", 1) vs a var hinted "x_1".
            let candidate = if *count == 0 { hint.clone() } else { format!("{hint}_{count}") };
            *count += 1;
            if self.taken.insert(candidate.clone()) {
                self.by_id.insert(var.id(), candidate.clone());
                return candidate;
            }
        }
    }
}

pub struct IrPrinter<'a> {
    out: &'a mut String,
    names: UniqueNameManager,
    indent: usize,
}

impl<'a> IrPrinter<'a> {
    pub fn new(out: &'a mut String) -> Self {
        Self { out, names: UniqueNameManager::new(), indent: 0 }
    }

    /// Share a name manager across several prints (codegen headers + body).
    pub fn with_names(out: &'a mut String, names: UniqueNameManager) -> Self {
        Self { out, names, indent: 0 }
    }

    pub fn into_names(self) -> UniqueNameManager {
        self.names
    }

    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    pub fn print_expr(&mut self, e: &ExprNode) {
        match e.kind() {
            ExprKind::IntImm(v) => self.push(&v.to_string()),
            ExprKind::FloatImm(v) => self.push(&float_literal(*v)),
            ExprKind::Var { .. } => {
                let name = self.names.unique_name(e);
                self.push(&name);
            }
            ExprKind::Cast { src } => {
                self.push(&format!("{}(", e.dtype()));
                self.print_expr(src);
                self.push(")");
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.push("(");
                self.print_expr(lhs);
                self.push(&format!(" {} ", op.symbol()));
                self.print_expr(rhs);
                self.push(")");
            }
            ExprKind::Min { lhs, rhs, propagate_nans } => self.print_min_max("Min", lhs, rhs, *propagate_nans),
            ExprKind::Max { lhs, rhs, propagate_nans } => self.print_min_max("Max", lhs, rhs, *propagate_nans),
            ExprKind::CompareSelect { op, lhs, rhs, true_value, false_value } => {
                self.push("(");
                self.print_expr(lhs);
                self.push(op.symbol());
                self.print_expr(rhs);
                self.push(" ? ");
                self.print_expr(true_value);
                self.push(" : ");
                self.print_expr(false_value);
                self.push(")");
            }
            ExprKind::Let { var, value, body } => {
                self.push("(let ");
                self.print_expr(var);
                self.push(" = ");
                self.print_expr(value);
                self.push(" in ");
                self.print_expr(body);
                self.push(")");
            }
            ExprKind::Ramp { base, stride, lanes } => {
                self.push("Ramp(");
                self.print_expr(base);
                self.push(", ");
                self.print_expr(stride);
                self.push(&format!(", {lanes})"));
            }
            ExprKind::Broadcast { value, lanes } => {
                self.push("Broadcast(");
                self.print_expr(value);
                self.push(&format!(", {lanes})"));
            }
            ExprKind::IfThenElse { condition, true_value, false_value } => {
                self.push("IfThenElse(");
                self.print_expr(condition);
                self.push(", ");
                self.print_expr(true_value);
                self.push(", ");
                self.print_expr(false_value);
                self.push(")");
            }
            ExprKind::Load { base, index, mask } => {
                self.print_expr(base);
                self.push("[");
                self.print_expr(index);
                if !mask.is_const_one_mask() {
                    self.push(", ");
                    self.print_expr(mask);
                }
                self.push("]");
            }
            ExprKind::Intrinsic { op, args } => {
                self.push(op.name());
                self.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.print_expr(arg);
                }
                self.push(")");
            }
            ExprKind::Call { function, indices } => {
                self.push(function.name());
                self.push("(");
                for (i, index) in indices.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.print_expr(index);
                }
                self.push(")");
            }
        }
    }

    fn print_min_max(&mut self, name: &str, lhs: &Expr, rhs: &Expr, propagate_nans: bool) {
        self.push(name);
        self.push("(");
        self.print_expr(lhs);
        self.push(", ");
        self.print_expr(rhs);
        self.push(&format!(", {})", propagate_nans as u8));
    }

    pub fn print_stmt(&mut self, s: &StmtNode) {
        match s.kind() {
            StmtKind::LetStmt { var, value, body } => {
                self.push("let ");
                self.print_expr(var);
                self.push(" = ");
                self.print_expr(value);
                self.push(";");
                self.newline();
                self.print_stmt(body);
            }
            StmtKind::Block { stmts } => {
                for (i, stmt) in stmts.iter().enumerate() {
                    if i > 0 {
                        self.newline();
                    }
                    self.print_stmt(stmt);
                }
            }
            StmtKind::For { var, start, stop, body, options } => {
                self.push("For(");
                self.print_expr(var);
                self.push(", ");
                self.print_expr(start);
                self.push(", ");
                self.print_expr(stop);
                self.push(") {");
                if let Some(axis) = options.axis_name() {
                    self.push(&format!(" // {axis}"));
                }
                self.indent += 1;
                self.newline();
                self.print_stmt(body);
                self.indent -= 1;
                self.newline();
                self.push("}");
            }
            StmtKind::Store { base, index, value, mask } => {
                self.print_expr(base);
                self.push("[");
                self.print_expr(index);
                if !mask.is_const_one_mask() {
                    self.push(", ");
                    self.print_expr(mask);
                }
                self.push("] = ");
                self.print_expr(value);
                self.push(";");
            }
            StmtKind::Allocate { var, dtype, dims } => {
                self.push("Allocate(");
                self.print_expr(var);
                self.push(&format!(", {dtype}, {{"));
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.print_expr(dim);
                }
                self.push("});");
            }
            StmtKind::Free { var } => {
                self.push("Free(");
                self.print_expr(var);
                self.push(");");
            }
            StmtKind::Cond { condition, true_stmt, false_stmt } => {
                self.push("if (");
                self.print_expr(condition);
                self.push(") {");
                if let Some(t) = true_stmt {
                    self.indent += 1;
                    self.newline();
                    self.print_stmt(t);
                    self.indent -= 1;
                    self.newline();
                }
                self.push("}");
                if let Some(f) = false_stmt {
                    self.push(" else {");
                    self.indent += 1;
                    self.newline();
                    self.print_stmt(f);
                    self.indent -= 1;
                    self.newline();
                    self.push("}");
                }
            }
        }
    }
}

impl IrVisitor for IrPrinter<'_> {
    fn visit_expr(&mut self, e: &Expr) {
        self.print_expr(e);
    }

    fn visit_stmt(&mut self, s: &crate::stmt::Stmt) {
        self.print_stmt(s);
    }
}

/// `2.f` for integral values, `3.14f` otherwise; non-finite values print with
/// Rust's own spelling plus the suffix.
fn float_literal(v: f32) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e16 {
        format!("{}.f", v as i64)
    } else {
        format!("{v}f")
    }
}
