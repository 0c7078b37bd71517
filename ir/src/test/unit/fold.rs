use fusor_dtype::Dtype;

use crate::{CompareOp, ExprKind, ExprNode, ExprOps, KernelScope, fold};

#[test]
fn fold_simple() {
    let _scope = KernelScope::new();
    let f = ExprNode::try_add(&ExprNode::float(2.0), &ExprNode::float(3.0)).unwrap();
    let folded = fold(&f).unwrap();
    assert_eq!(folded.as_float_imm(), Some(5.0));
}

#[test]
fn fold_two_layer() {
    let _scope = KernelScope::new();
    let a = ExprNode::float(2.0);
    let b = ExprNode::float(3.0);
    let c = ExprNode::float(4.0);
    let d = ExprNode::float(5.0);
    let f = ExprNode::try_sub(&a.try_add(&b).unwrap(), &c.try_add(&d).unwrap()).unwrap();

    // Seed scenario: printer before and after folding.
    assert_eq!(f.to_string(), "((2.f + 3.f) - (4.f + 5.f))");
    let folded = fold(&f).unwrap();
    assert_eq!(folded.as_float_imm(), Some(-4.0));
    assert_eq!(folded.to_string(), "-4.f");
}

#[test]
fn fold_shifts() {
    let _scope = KernelScope::new();
    let a = ExprNode::int(7);
    let b = ExprNode::int(2);
    let c = ExprNode::int(3);
    let f = a.try_lshift(&b).unwrap().try_lshift(&b).unwrap().try_rshift(&c).unwrap();
    assert_eq!(fold(&f).unwrap().as_int_imm(), Some(14));
}

#[test]
fn out_of_range_shifts_stay_unfolded() {
    let _scope = KernelScope::new();
    let f = ExprNode::try_lshift(&ExprNode::int(1), &ExprNode::int(40)).unwrap();
    let folded = fold(&f).unwrap();
    assert!(folded.as_int_imm().is_none());
}

#[test]
fn fold_bitwise() {
    let _scope = KernelScope::new();
    let f = ExprNode::try_and(
        &ExprNode::try_xor(&ExprNode::int(59), &ExprNode::int(22)).unwrap(),
        &ExprNode::int(101),
    )
    .unwrap();
    assert_eq!(fold(&f).unwrap().as_int_imm(), Some((59 ^ 22) & 101));
}

#[test]
fn fold_min_max() {
    let _scope = KernelScope::new();
    let min = ExprNode::try_min(&ExprNode::float(15.0), &ExprNode::float(17.0), true).unwrap();
    let f = ExprNode::try_max(&ExprNode::float(12.0), &min, false).unwrap();
    assert_eq!(f.dtype(), Dtype::FLOAT32);
    assert_eq!(fold(&f).unwrap().as_float_imm(), Some(15.0));
}

#[test]
fn fold_nan_propagation() {
    let _scope = KernelScope::new();
    let nan = ExprNode::float(f32::NAN);
    let one = ExprNode::float(1.0);

    let propagating = ExprNode::try_max(&nan, &one, true).unwrap();
    assert!(fold(&propagating).unwrap().as_float_imm().unwrap().is_nan());

    let lossy = ExprNode::try_max(&nan, &one, false).unwrap();
    assert_eq!(fold(&lossy).unwrap().as_float_imm(), Some(1.0));
}

#[test]
fn fold_intrinsics() {
    let _scope = KernelScope::new();
    let a = ExprNode::float(2.0);
    let b = ExprNode::float(3.0);
    let c = ExprNode::float(4.0);
    let pow = ExprNode::pow(&a, &b).unwrap();
    let sin = ExprNode::sin(&pow).unwrap();
    let fmod = ExprNode::fmod(&c, &sin).unwrap();
    let log = ExprNode::log10(&fmod).unwrap();
    let round = ExprNode::round(&log).unwrap();
    let f = ExprNode::fabs(&round).unwrap();
    assert_eq!(fold(&f).unwrap().as_float_imm(), Some(1.0));
}

#[test]
fn fold_with_var_keeps_structure() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let body = x.try_mul(&ExprNode::try_add(&ExprNode::float(2.0), &ExprNode::float(4.0)).unwrap()).unwrap();

    let folded = fold(&body).unwrap();
    let ExprKind::Binary { lhs, rhs, .. } = folded.kind() else { panic!("expected mul, got {folded}") };
    assert!(std::rc::Rc::ptr_eq(lhs, &x));
    assert_eq!(rhs.as_float_imm(), Some(6.0));
}

#[test]
fn unfoldable_expr_is_left_identical() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let body = ExprNode::try_add(
        &ExprNode::int(3).try_mul(&x).unwrap(),
        &ExprNode::int(5).try_mul(&y).unwrap(),
    )
    .unwrap();

    let folded = fold(&body).unwrap();
    let ExprKind::Binary { lhs, rhs, .. } = folded.kind() else { panic!() };
    // The int constants fold through their promotion casts, nothing else moves.
    let ExprKind::Binary { lhs: l3, .. } = lhs.kind() else { panic!() };
    assert_eq!(l3.as_float_imm(), Some(3.0));
    let ExprKind::Binary { lhs: l5, .. } = rhs.kind() else { panic!() };
    assert_eq!(l5.as_float_imm(), Some(5.0));
}

#[test]
fn fold_is_identity_on_non_constant_trees() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let body = x.try_mul(&y).unwrap();
    let folded = fold(&body).unwrap();
    assert!(std::rc::Rc::ptr_eq(&folded, &body));
}

#[test]
fn fold_cast() {
    let _scope = KernelScope::new();
    let c = ExprNode::cast(Dtype::INT32, &ExprNode::float(3.7)).unwrap();
    assert_eq!(fold(&c).unwrap().as_int_imm(), Some(3));

    let c = ExprNode::cast(Dtype::FLOAT32, &ExprNode::int(-2)).unwrap();
    assert_eq!(fold(&c).unwrap().as_float_imm(), Some(-2.0));
}

#[test]
fn fold_compare_select() {
    let _scope = KernelScope::new();
    let cmp = ExprNode::compare_select_with(
        CompareOp::Lt,
        &ExprNode::int(1),
        &ExprNode::int(2),
        &ExprNode::float(10.0),
        &ExprNode::float(20.0),
    )
    .unwrap();
    assert_eq!(fold(&cmp).unwrap().as_float_imm(), Some(10.0));

    let cmp = ExprNode::cmp_ge(&ExprNode::float(1.0), &ExprNode::float(2.0)).unwrap();
    assert_eq!(fold(&cmp).unwrap().as_int_imm(), Some(0));
}

#[test]
fn fold_if_then_else_on_constant_condition() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let ite = ExprNode::if_then_else(&ExprNode::int(0), &x, &ExprNode::float(7.0)).unwrap();
    assert_eq!(fold(&ite).unwrap().as_float_imm(), Some(7.0));
}

#[test]
fn integer_division_by_zero_is_not_folded() {
    let _scope = KernelScope::new();
    let f = ExprNode::try_div(&ExprNode::int(1), &ExprNode::int(0)).unwrap();
    assert!(fold(&f).unwrap().as_int_imm().is_none());

    // Float division by zero follows IEEE and folds to infinity.
    let f = ExprNode::try_div(&ExprNode::float(1.0), &ExprNode::float(0.0)).unwrap();
    assert_eq!(fold(&f).unwrap().as_float_imm(), Some(f32::INFINITY));
}

#[test]
fn mixed_types_promote_before_folding() {
    let _scope = KernelScope::new();
    let f = ExprNode::try_add(&ExprNode::int(2), &ExprNode::float(0.5)).unwrap();
    assert_eq!(fold(&f).unwrap().as_float_imm(), Some(2.5));
}
