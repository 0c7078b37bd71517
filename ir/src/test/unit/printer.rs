use fusor_dtype::Dtype;

use crate::{CompareOp, ExprNode, ExprOps, KernelScope, LoopOptions, StmtNode};

#[test]
fn basic_int_values() {
    let _scope = KernelScope::new();
    let c = ExprNode::try_add(&ExprNode::int(2), &ExprNode::int(3)).unwrap();
    assert_eq!(c.to_string(), "(2 + 3)");
}

#[test]
fn basic_float_values() {
    let _scope = KernelScope::new();
    let a = ExprNode::float(2.0);
    let b = ExprNode::float(3.0);
    let c = ExprNode::float(4.0);
    let d = ExprNode::float(5.0);
    let f = ExprNode::try_sub(&a.try_add(&b).unwrap(), &c.try_add(&d).unwrap()).unwrap();
    assert_eq!(f.to_string(), "((2.f + 3.f) - (4.f + 5.f))");
}

#[test]
fn float_literals() {
    let _scope = KernelScope::new();
    assert_eq!(ExprNode::float(-4.0).to_string(), "-4.f");
    assert_eq!(ExprNode::float(3.5).to_string(), "3.5f");
    assert_eq!(ExprNode::float(0.0).to_string(), "0.f");
}

#[test]
fn let_bindings() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let body = ExprNode::try_add(
        &ExprNode::float(2.0),
        &x.try_mul(&ExprNode::float(3.0)).unwrap().try_add(&ExprNode::float(4.0)).unwrap(),
    )
    .unwrap();
    let result = ExprNode::let_expr(&x, &ExprNode::float(3.0), &body).unwrap();
    assert_eq!(result.to_string(), "(let x = 3.f in (2.f + ((x * 3.f) + 4.f)))");
}

#[test]
fn nested_lets_with_cast() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::INT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let body = ExprNode::try_add(
        &ExprNode::float(2.0),
        &x.try_mul(&ExprNode::float(3.0)).unwrap().try_add(&ExprNode::float(4.0).try_mul(&y).unwrap()).unwrap(),
    )
    .unwrap();
    let e1 = ExprNode::let_expr(&x, &ExprNode::cast(Dtype::INT32, &ExprNode::float(3.0)).unwrap(), &body).unwrap();
    let e2 = ExprNode::let_expr(&y, &ExprNode::float(6.0), &e1).unwrap();
    assert_eq!(
        e2.to_string(),
        "(let y = 6.f in (let x = int32(3.f) in (2.f + ((float32(x) * 3.f) + (4.f * y)))))"
    );
}

#[test]
fn same_hint_vars_disambiguate() {
    let _scope = KernelScope::new();
    let a = ExprNode::var("x", Dtype::INT32);
    let b = ExprNode::var("x", Dtype::INT32);
    let sum = a.try_add(&b).unwrap();
    assert_eq!(sum.to_string(), "(x + x_1)");
}

#[test]
fn unnamed_vars_get_a_default_prefix() {
    let _scope = KernelScope::new();
    let v = ExprNode::var("", Dtype::INT32);
    assert_eq!(v.to_string(), "v");
}

#[test]
fn compare_select_prints_ternary() {
    let _scope = KernelScope::new();
    let cmp = ExprNode::compare_select(CompareOp::Lt, &ExprNode::int(1), &ExprNode::int(2)).unwrap();
    assert_eq!(cmp.to_string(), "(1<2 ? 1 : 0)");
}

#[test]
fn min_max_show_the_nan_flag() {
    let _scope = KernelScope::new();
    let m = ExprNode::try_max(&ExprNode::float(1.0), &ExprNode::float(2.0), true).unwrap();
    assert_eq!(m.to_string(), "Max(1.f, 2.f, 1)");
    let m = ExprNode::try_min(&ExprNode::float(1.0), &ExprNode::float(2.0), false).unwrap();
    assert_eq!(m.to_string(), "Min(1.f, 2.f, 0)");
}

#[test]
fn intrinsics_print_as_calls() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    assert_eq!(ExprNode::sin(&x).unwrap().to_string(), "sin(x)");
    assert_eq!(ExprNode::pow(&x, &ExprNode::float(2.0)).unwrap().to_string(), "pow(x, 2.f)");
}

#[test]
fn ramps_broadcasts_and_vector_loads() {
    let _scope = KernelScope::new();
    let base = ExprNode::var("a", Dtype::HANDLE);
    let index = ExprNode::ramp(&ExprNode::int(0), &ExprNode::int(1), 8).unwrap();
    assert_eq!(index.to_string(), "Ramp(0, 1, 8)");

    let mask = ExprNode::broadcast(&ExprNode::int(1), 8).unwrap();
    assert_eq!(mask.to_string(), "Broadcast(1, 8)");

    let load = ExprNode::load(Dtype::FLOAT32.with_lanes(8), &base, &index, &mask).unwrap();
    assert_eq!(load.to_string(), "a[Ramp(0, 1, 8)]");

    let partial = ExprNode::broadcast(&ExprNode::int(0), 8).unwrap();
    let masked = ExprNode::load(Dtype::FLOAT32.with_lanes(8), &base, &index, &partial).unwrap();
    assert_eq!(masked.to_string(), "a[Ramp(0, 1, 8), Broadcast(0, 8)]");
}

#[test]
fn for_loops_indent_their_body() {
    let _scope = KernelScope::new();
    let f = ExprNode::var("f", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let store = StmtNode::store_unmasked(&f, &i, &i).unwrap();
    let loop_ = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(16), &store).unwrap();
    assert_eq!(loop_.to_string(), "For(i, 0, 16) {\n  f[i] = i;\n}");
}

#[test]
fn gpu_bound_loops_carry_an_axis_comment() {
    let _scope = KernelScope::new();
    let f = ExprNode::var("f", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let store = StmtNode::store_unmasked(&f, &i, &i).unwrap();
    let mut options = LoopOptions::default();
    options.set_gpu_block_index(0).unwrap();
    let loop_ = StmtNode::for_loop_with_options(&i, &ExprNode::int(0), &ExprNode::int(16), &store, options).unwrap();
    assert_eq!(loop_.to_string(), "For(i, 0, 16) { // blockIdx.x\n  f[i] = i;\n}");
}

#[test]
fn allocate_free_and_cond() {
    let _scope = KernelScope::new();
    let tmp = ExprNode::var("tmp", Dtype::HANDLE);
    let alloc = StmtNode::allocate(&tmp, Dtype::FLOAT32, &[ExprNode::int(4), ExprNode::int(8)]).unwrap();
    assert_eq!(alloc.to_string(), "Allocate(tmp, float32, {4, 8});");
    assert_eq!(StmtNode::free(&tmp).unwrap().to_string(), "Free(tmp);");

    let store = StmtNode::store_unmasked(&tmp, &ExprNode::int(0), &ExprNode::float(1.0)).unwrap();
    let cond = StmtNode::cond(&ExprNode::int(1), Some(store), None).unwrap();
    assert_eq!(cond.to_string(), "if (1) {\n  tmp[0] = 1.f;\n}");
}

#[test]
fn let_stmt_prints_binding_then_body() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::INT32);
    let buf = ExprNode::var("b", Dtype::HANDLE);
    let store = StmtNode::store_unmasked(&buf, &x, &x).unwrap();
    let bound = StmtNode::let_stmt(&x, &ExprNode::int(3), &store).unwrap();
    assert_eq!(bound.to_string(), "let x = 3;\nb[x] = x;");
}
