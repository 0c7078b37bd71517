use fusor_dtype::Dtype;
use fusor_ir::{CompareOp, ExprNode, ExprOps, KernelScope, StmtNode};
use fusor_schedule::{Schedule, compute, dim_args};

use crate::{BufferArg, CallArg, CodeGen, LlvmCodeGen, SimpleIrEval};

#[test]
fn simple_math_kernel() {
    let _scope = KernelScope::new();
    let t = compute("f", dim_args([1024]), |axes| {
        let sq = axes[0].try_mul(&axes[0])?;
        let plus = sq.try_add(&ExprNode::int(1))?;
        ExprNode::cast(Dtype::FLOAT32, &plus)
    })
    .unwrap();
    let schedule = Schedule::new(&[t.clone()]).unwrap();
    let stmt = schedule.lower().unwrap();

    let params = [BufferArg::buffer(t.function().func_var(), Dtype::FLOAT32).unwrap()];
    let mut cg = LlvmCodeGen::new(&stmt, &params).unwrap();

    let mut fv = vec![0.0f32; 1024];
    cg.call(&[CallArg::buffer(&mut fv)]).unwrap();
    for (i, &v) in fv.iter().enumerate() {
        assert_eq!(v, (i * i + 1) as f32, "index {i}");
    }
}

#[test]
fn vector_add_matches_interpreter() {
    // Seed scenario: interpreter and LLVM agree on the 8-lane add kernel.
    let _scope = KernelScope::new();
    let a = ExprNode::var("a", Dtype::HANDLE);
    let b = ExprNode::var("b", Dtype::HANDLE);
    let c = ExprNode::var("c", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);

    let base = i.try_mul(&ExprNode::int(8)).unwrap();
    let index = ExprNode::ramp(&base, &ExprNode::int(1), 8).unwrap();
    let mask = ExprNode::broadcast(&ExprNode::int(1), 8).unwrap();
    let dtype = Dtype::FLOAT32.with_lanes(8);
    let va = ExprNode::load(dtype, &a, &index, &mask).unwrap();
    let vb = ExprNode::load(dtype, &b, &index, &mask).unwrap();
    let sum = va.try_add(&vb).unwrap();
    let store = StmtNode::store(&c, &index, &sum, &mask).unwrap();
    let kernel = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(128), &store).unwrap();

    let params = [
        BufferArg::buffer(&a, Dtype::FLOAT32).unwrap(),
        BufferArg::buffer(&b, Dtype::FLOAT32).unwrap(),
        BufferArg::buffer(&c, Dtype::FLOAT32).unwrap(),
    ];

    let mut av: Vec<f32> = (0..1024).map(|i| (i * i) as f32).collect();
    let mut bv: Vec<f32> = (0..1024).map(|i| (4 * i * i) as f32).collect();

    let mut c_interp = vec![0.0f32; 1024];
    SimpleIrEval::new(&kernel, &params)
        .call(&[CallArg::buffer(&mut av), CallArg::buffer(&mut bv), CallArg::buffer(&mut c_interp)])
        .unwrap();

    let mut c_llvm = vec![0.0f32; 1024];
    LlvmCodeGen::new(&kernel, &params)
        .unwrap()
        .call(&[CallArg::buffer(&mut av), CallArg::buffer(&mut bv), CallArg::buffer(&mut c_llvm)])
        .unwrap();

    assert_eq!(c_interp, c_llvm);
    assert_eq!(c_llvm[3], 5.0 * 9.0);
}

#[test]
fn compare_select_kernel() {
    let _scope = KernelScope::new();
    let a = ExprNode::var("a", Dtype::HANDLE);
    let b = ExprNode::var("b", Dtype::HANDLE);
    let c = ExprNode::var("c", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);

    let one = ExprNode::int(1);
    let la = ExprNode::load(Dtype::FLOAT32, &a, &i, &one).unwrap();
    let lb = ExprNode::load(Dtype::FLOAT32, &b, &i, &one).unwrap();
    let eq = ExprNode::compare_select(CompareOp::Eq, &la, &lb).unwrap();
    let store = StmtNode::store_unmasked(&c, &i, &eq).unwrap();
    let kernel = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(256), &store).unwrap();

    let params = [
        BufferArg::buffer(&a, Dtype::FLOAT32).unwrap(),
        BufferArg::buffer(&b, Dtype::FLOAT32).unwrap(),
        BufferArg::buffer(&c, Dtype::INT32).unwrap(),
    ];
    let mut cg = LlvmCodeGen::new(&kernel, &params).unwrap();

    let mut av = vec![1.0f32; 256];
    let mut bv = vec![1.0f32; 256];
    bv[7] = 2.0;
    let mut cv = vec![-1i32; 256];
    cg.call(&[CallArg::buffer(&mut av), CallArg::buffer(&mut bv), CallArg::buffer(&mut cv)]).unwrap();

    for (i, &v) in cv.iter().enumerate() {
        assert_eq!(v, if i == 7 { 0 } else { 1 }, "index {i}");
    }
}

#[test]
fn min_max_nan_intrinsics() {
    let _scope = KernelScope::new();
    let a = ExprNode::var("a", Dtype::HANDLE);
    let b = ExprNode::var("b", Dtype::HANDLE);
    let c = ExprNode::var("c", Dtype::HANDLE);
    let d = ExprNode::var("d", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);

    let one = ExprNode::int(1);
    let la = ExprNode::load(Dtype::FLOAT32, &a, &i, &one).unwrap();
    let lb = ExprNode::load(Dtype::FLOAT32, &b, &i, &one).unwrap();
    let propagating = ExprNode::try_max(&la, &lb, true).unwrap();
    let lossy = ExprNode::try_max(&la, &lb, false).unwrap();
    let s1 = StmtNode::store_unmasked(&c, &i, &propagating).unwrap();
    let s2 = StmtNode::store_unmasked(&d, &i, &lossy).unwrap();
    let body = StmtNode::block([Some(s1), Some(s2)]).unwrap();
    let kernel = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(32), &body).unwrap();

    let params = [
        BufferArg::buffer(&a, Dtype::FLOAT32).unwrap(),
        BufferArg::buffer(&b, Dtype::FLOAT32).unwrap(),
        BufferArg::buffer(&c, Dtype::FLOAT32).unwrap(),
        BufferArg::buffer(&d, Dtype::FLOAT32).unwrap(),
    ];
    let mut cg = LlvmCodeGen::new(&kernel, &params).unwrap();

    let mut av = vec![f32::NAN; 32];
    let mut bv = vec![1.0f32; 32];
    let mut cv = vec![0.0f32; 32];
    let mut dv = vec![0.0f32; 32];
    cg.call(&[
        CallArg::buffer(&mut av),
        CallArg::buffer(&mut bv),
        CallArg::buffer(&mut cv),
        CallArg::buffer(&mut dv),
    ])
    .unwrap();

    assert!(cv.iter().all(|v| v.is_nan()), "maximum propagates NaN");
    assert!(dv.iter().all(|&v| v == 1.0), "maxnum drops the NaN");
}

#[test]
fn dynamic_bound_scalar_param() {
    let _scope = KernelScope::new();
    let c = ExprNode::var("c", Dtype::HANDLE);
    let n = ExprNode::var("n", Dtype::INT32);
    let i = ExprNode::var("i", Dtype::INT32);
    let value = ExprNode::try_add(&ExprNode::int(1), &ExprNode::int(2)).unwrap();
    let store = StmtNode::store_unmasked(&c, &i, &value).unwrap();
    let kernel = StmtNode::for_loop(&i, &ExprNode::int(0), &n, &store).unwrap();

    let params = [BufferArg::buffer(&c, Dtype::INT32).unwrap(), BufferArg::scalar(&n).unwrap()];
    let mut cg = LlvmCodeGen::new(&kernel, &params).unwrap();

    for n in [1i32, 16, 37] {
        let mut cv = vec![-7i32; 64];
        cg.call(&[CallArg::buffer(&mut cv), CallArg::Int(n)]).unwrap();
        for (idx, &v) in cv.iter().enumerate() {
            assert_eq!(v, if (idx as i32) < n { 3 } else { -7 }, "n={n} index {idx}");
        }
    }
}

#[test]
fn transcendental_calls_resolve() {
    let _scope = KernelScope::new();
    let a = ExprNode::var("a", Dtype::HANDLE);
    let c = ExprNode::var("c", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let load = ExprNode::load(Dtype::FLOAT32, &a, &i, &ExprNode::int(1)).unwrap();
    let value = ExprNode::sqrt(&load).unwrap();
    let store = StmtNode::store_unmasked(&c, &i, &value).unwrap();
    let kernel = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(16), &store).unwrap();

    let params =
        [BufferArg::buffer(&a, Dtype::FLOAT32).unwrap(), BufferArg::buffer(&c, Dtype::FLOAT32).unwrap()];
    let mut cg = LlvmCodeGen::new(&kernel, &params).unwrap();

    let mut av: Vec<f32> = (0..16).map(|v| (v * v) as f32).collect();
    let mut cv = vec![0.0f32; 16];
    cg.call(&[CallArg::buffer(&mut av), CallArg::buffer(&mut cv)]).unwrap();
    for (i, &v) in cv.iter().enumerate() {
        assert_eq!(v, i as f32, "index {i}");
    }
}

#[test]
fn conditional_statement() {
    let _scope = KernelScope::new();
    let c = ExprNode::var("c", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let even = ExprNode::try_mod(&i, &ExprNode::int(2)).unwrap().cmp_eq(&ExprNode::int(0)).unwrap();
    let two_i = ExprNode::int(2).try_mul(&i).unwrap();
    let three_i = ExprNode::int(3).try_mul(&i).unwrap();
    let value = ExprNode::if_then_else(&even, &two_i, &three_i).unwrap();
    let store = StmtNode::store_unmasked(&c, &i, &value).unwrap();
    let kernel = StmtNode::for_loop(&i, &ExprNode::int(0), &ExprNode::int(16), &store).unwrap();

    let params = [BufferArg::buffer(&c, Dtype::INT32).unwrap()];
    let mut cg = LlvmCodeGen::new(&kernel, &params).unwrap();
    let mut cv = vec![0i32; 16];
    cg.call(&[CallArg::buffer(&mut cv)]).unwrap();
    let expected: Vec<i32> = (0..16).map(|i| if i % 2 == 0 { 2 * i } else { 3 * i }).collect();
    assert_eq!(cv, expected);
}
