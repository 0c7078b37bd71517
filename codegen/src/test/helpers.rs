//! Shared kernel-building helpers for backend tests.

use fusor_dtype::Dtype;
use fusor_ir::{Expr, ExprNode, Stmt, StmtNode};

use crate::interp::Value;

/// `for i in 0..n { c[i] = body(i) }` over a float output buffer `c`.
pub fn scalar_map_kernel(n: i32, body: impl FnOnce(&Expr) -> Expr) -> (Stmt, Expr) {
    let c = ExprNode::var("c", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let value = body(&i);
    let store = StmtNode::store_unmasked(&c, &i, &value).unwrap();
    let loop_ = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(n), &store).unwrap();
    (loop_, c)
}

/// Bit-exact value comparison with NaN payloads collapsed.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => {
            a.len() == b.len()
                && a.iter().zip(b.iter()).all(|(x, y)| (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits())
        }
        _ => false,
    }
}
