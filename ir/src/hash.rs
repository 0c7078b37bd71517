//! Structural hashing of IR subtrees.
//!
//! Equal hashes imply (with overwhelming probability) structurally equal
//! trees. Variables hash by node identity, never by name; immediates hash by
//! `(scalar kind, lanes, bit pattern)`, so `2` and `2.f` differ. Results are
//! cached per node id and the cache can be queried with [`HashProvider::cached_expr`].

use std::collections::HashMap;
use std::hash::Hasher;

use fusor_dtype::{Dtype, ScalarKind};
use xxhash_rust::xxh64::Xxh64;

use crate::expr::{Expr, ExprKind};
use crate::stmt::{Stmt, StmtKind};

const SEED: u64 = 0x74657870; // "texp"

#[derive(Default)]
pub struct HashProvider {
    exprs: HashMap<u64, u64>,
    stmts: HashMap<u64, u64>,
}

impl HashProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when this expression's hash is already cached.
    pub fn cached_expr(&self, e: &Expr) -> bool {
        self.exprs.contains_key(&e.id())
    }

    pub fn cached_stmt(&self, s: &Stmt) -> bool {
        self.stmts.contains_key(&s.id())
    }

    pub fn hash_expr(&mut self, e: &Expr) -> u64 {
        if let Some(&h) = self.exprs.get(&e.id()) {
            return h;
        }
        let h = self.compute_expr(e);
        self.exprs.insert(e.id(), h);
        h
    }

    pub fn hash_stmt(&mut self, s: &Stmt) -> u64 {
        if let Some(&h) = self.stmts.get(&s.id()) {
            return h;
        }
        let h = self.compute_stmt(s);
        self.stmts.insert(s.id(), h);
        h
    }

    fn compute_expr(&mut self, e: &Expr) -> u64 {
        let mut h = Xxh64::new(SEED);
        write_dtype(&mut h, e.dtype());
        match e.kind() {
            ExprKind::IntImm(v) => {
                h.write_u8(0);
                h.write_i32(*v);
            }
            ExprKind::FloatImm(v) => {
                h.write_u8(1);
                h.write_u32(v.to_bits());
            }
            ExprKind::Var { .. } => {
                // Identity, not name: same-hint vars hash differently.
                h.write_u8(2);
                h.write_u64(e.id());
            }
            ExprKind::Cast { src } => {
                h.write_u8(3);
                let src = self.hash_expr(src);
                h.write_u64(src);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                h.write_u8(4);
                h.write_u8(*op as u8);
                let (l, r) = (self.hash_expr(lhs), self.hash_expr(rhs));
                h.write_u64(l);
                h.write_u64(r);
            }
            ExprKind::Min { lhs, rhs, propagate_nans } => {
                h.write_u8(5);
                h.write_u8(*propagate_nans as u8);
                let (l, r) = (self.hash_expr(lhs), self.hash_expr(rhs));
                h.write_u64(l);
                h.write_u64(r);
            }
            ExprKind::Max { lhs, rhs, propagate_nans } => {
                h.write_u8(6);
                h.write_u8(*propagate_nans as u8);
                let (l, r) = (self.hash_expr(lhs), self.hash_expr(rhs));
                h.write_u64(l);
                h.write_u64(r);
            }
            ExprKind::CompareSelect { op, lhs, rhs, true_value, false_value } => {
                h.write_u8(7);
                h.write_u8(*op as u8);
                for child in [lhs, rhs, true_value, false_value] {
                    let c = self.hash_expr(child);
                    h.write_u64(c);
                }
            }
            ExprKind::Let { var, value, body } => {
                h.write_u8(8);
                for child in [var, value, body] {
                    let c = self.hash_expr(child);
                    h.write_u64(c);
                }
            }
            ExprKind::Ramp { base, stride, lanes } => {
                h.write_u8(9);
                h.write_u32(*lanes);
                let (b, s) = (self.hash_expr(base), self.hash_expr(stride));
                h.write_u64(b);
                h.write_u64(s);
            }
            ExprKind::Broadcast { value, lanes } => {
                h.write_u8(10);
                h.write_u32(*lanes);
                let v = self.hash_expr(value);
                h.write_u64(v);
            }
            ExprKind::IfThenElse { condition, true_value, false_value } => {
                h.write_u8(11);
                for child in [condition, true_value, false_value] {
                    let c = self.hash_expr(child);
                    h.write_u64(c);
                }
            }
            ExprKind::Load { base, index, mask } => {
                h.write_u8(12);
                for child in [base, index, mask] {
                    let c = self.hash_expr(child);
                    h.write_u64(c);
                }
            }
            ExprKind::Intrinsic { op, args } => {
                h.write_u8(13);
                h.write_u8(*op as u8);
                for arg in args {
                    let a = self.hash_expr(arg);
                    h.write_u64(a);
                }
            }
            ExprKind::Call { function, indices } => {
                h.write_u8(14);
                h.write_u64(function.id());
                for index in indices {
                    let i = self.hash_expr(index);
                    h.write_u64(i);
                }
            }
        }
        h.finish()
    }

    fn compute_stmt(&mut self, s: &Stmt) -> u64 {
        let mut h = Xxh64::new(SEED);
        match s.kind() {
            StmtKind::LetStmt { var, value, body } => {
                h.write_u8(0x80);
                let (v, val) = (self.hash_expr(var), self.hash_expr(value));
                h.write_u64(v);
                h.write_u64(val);
                let b = self.hash_stmt(body);
                h.write_u64(b);
            }
            StmtKind::Block { stmts } => {
                h.write_u8(0x81);
                for stmt in stmts {
                    let c = self.hash_stmt(stmt);
                    h.write_u64(c);
                }
            }
            StmtKind::For { var, start, stop, body, options } => {
                h.write_u8(0x82);
                for child in [var, start, stop] {
                    let c = self.hash_expr(child);
                    h.write_u64(c);
                }
                let b = self.hash_stmt(body);
                h.write_u64(b);
                h.write_u8(options.gpu_block_index().map_or(0xff, |i| i));
                h.write_u8(options.gpu_thread_index().map_or(0xff, |i| i));
            }
            StmtKind::Store { base, index, value, mask } => {
                h.write_u8(0x83);
                for child in [base, index, value, mask] {
                    let c = self.hash_expr(child);
                    h.write_u64(c);
                }
            }
            StmtKind::Allocate { var, dtype, dims } => {
                h.write_u8(0x84);
                write_dtype(&mut h, *dtype);
                let v = self.hash_expr(var);
                h.write_u64(v);
                for dim in dims {
                    let d = self.hash_expr(dim);
                    h.write_u64(d);
                }
            }
            StmtKind::Free { var } => {
                h.write_u8(0x85);
                let v = self.hash_expr(var);
                h.write_u64(v);
            }
            StmtKind::Cond { condition, true_stmt, false_stmt } => {
                h.write_u8(0x86);
                let c = self.hash_expr(condition);
                h.write_u64(c);
                for branch in [true_stmt, false_stmt] {
                    match branch {
                        Some(stmt) => {
                            let b = self.hash_stmt(stmt);
                            h.write_u64(b);
                        }
                        None => h.write_u8(0xff),
                    }
                }
            }
        }
        h.finish()
    }
}

fn write_dtype(h: &mut Xxh64, dtype: Dtype) {
    let kind = match dtype.kind {
        ScalarKind::Int32 => 0u8,
        ScalarKind::Float32 => 1,
        ScalarKind::Handle => 2,
    };
    h.write_u8(kind);
    h.write_u32(dtype.lanes);
}
