use std::rc::Rc;

use fusor_dtype::Dtype;

use crate::{Error, ExprKind, ExprNode, ExprOps, IrMutator, KernelScope, StmtNode, substitute, substitute_stmt};

struct Noop;

impl IrMutator for Noop {}

#[test]
fn default_mutator_preserves_identity() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let e = ExprNode::sin(&x.try_mul(&y).unwrap()).unwrap().try_add(&ExprNode::float(1.0)).unwrap();

    let out = Noop.mutate_expr(&e).unwrap();
    assert!(Rc::ptr_eq(&out, &e));
}

#[test]
fn default_mutator_preserves_statement_identity() {
    let _scope = KernelScope::new();
    let buf = ExprNode::var("b", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let store = StmtNode::store_unmasked(&buf, &i, &i).unwrap();
    let loop_ = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(8), &store).unwrap();

    let out = Noop.mutate_stmt(&loop_).unwrap();
    assert!(Rc::ptr_eq(&out, &loop_));
}

#[test]
fn substitution_replaces_by_identity() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let also_x = ExprNode::var("x", Dtype::FLOAT32);
    let e = x.try_add(&also_x).unwrap();

    let out = substitute(&e, &[(x.clone(), ExprNode::float(3.0))]).unwrap();
    let ExprKind::Binary { lhs, rhs, .. } = out.kind() else { panic!() };
    assert_eq!(lhs.as_float_imm(), Some(3.0));
    // The other "x" is a different variable and stays.
    assert!(Rc::ptr_eq(rhs, &also_x));
}

#[test]
fn substitution_rebuilds_only_on_change() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let e = x.try_mul(&y).unwrap();

    let unrelated = ExprNode::var("z", Dtype::FLOAT32);
    let out = substitute(&e, &[(unrelated, ExprNode::float(1.0))]).unwrap();
    assert!(Rc::ptr_eq(&out, &e));
}

#[test]
fn substitution_descends_into_statements() {
    let _scope = KernelScope::new();
    let buf = ExprNode::var("b", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let j = ExprNode::var("j", Dtype::INT32);
    let store = StmtNode::store_unmasked(&buf, &i, &i).unwrap();

    let out = substitute_stmt(&store, &[(i, j)]).unwrap();
    assert_eq!(out.to_string(), "b[j] = j;");
}

#[test]
fn substitution_keys_must_be_variables() {
    let _scope = KernelScope::new();
    let e = ExprNode::float(1.0);
    let err = substitute(&e, &[(ExprNode::int(1), ExprNode::int(2))]).unwrap_err();
    assert!(matches!(err, Error::VariableRequired { .. }));
}

#[test]
fn mistyped_substitution_image_fails_reconstruction() {
    let _scope = KernelScope::new();
    let base = ExprNode::var("a", Dtype::HANDLE);
    let load = ExprNode::load(Dtype::FLOAT32, &base, &ExprNode::int(0), &ExprNode::int(1)).unwrap();

    // Replacing the buffer base with a plain int is a malformed rewrite.
    let err = substitute(&load, &[(base, ExprNode::int(0))]).unwrap_err();
    assert!(matches!(err, Error::VariableRequired { .. } | Error::HandleRequired { .. }));
}

#[test]
fn wrong_dtype_image_fails_reconstruction() {
    let _scope = KernelScope::new();
    let i = ExprNode::var("i", Dtype::INT32);
    let buf = ExprNode::var("b", Dtype::HANDLE);
    let store = StmtNode::store_unmasked(&buf, &i, &i).unwrap();
    let loop_ = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(4), &store).unwrap();

    // A float image in the loop-variable position violates the loop or store
    // invariants, whichever reconstruction trips first.
    let err = substitute_stmt(&loop_, &[(i, ExprNode::var("f", Dtype::FLOAT32))]).unwrap_err();
    assert!(matches!(err, Error::LoopVarNotScalarInt { .. } | Error::IndexNotInt { .. }));
}
