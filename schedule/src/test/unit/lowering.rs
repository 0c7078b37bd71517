use fusor_ir::{ExprOps, KernelScope};

use crate::{Error, Schedule, compute, dim_args};

#[test]
fn lower_simple_nest() {
    let _scope = KernelScope::new();
    let t = compute("f", dim_args([16]), |axes| axes[0].try_mul(&axes[0])).unwrap();
    let schedule = Schedule::new(&[t]).unwrap();
    let stmt = schedule.lower().unwrap();
    assert_eq!(stmt.to_string(), "For(i, 0, 16) {\n  f[i] = (i * i);\n}");
}

#[test]
fn lower_two_dims_flattens_row_major() {
    let _scope = KernelScope::new();
    let t = compute("f", dim_args([32, 1024]), |axes| axes[0].try_add(&axes[1])).unwrap();
    let schedule = Schedule::new(&[t]).unwrap();
    let stmt = schedule.lower().unwrap();
    assert_eq!(
        stmt.to_string(),
        "For(i, 0, 32) {\n  For(j, 0, 1024) {\n    f[((i * 1024) + j)] = (i + j);\n  }\n}"
    );
}

#[test]
fn lower_emits_producers_before_consumers() {
    let _scope = KernelScope::new();
    let producer = compute("p", dim_args([8]), |axes| axes[0].try_add(&fusor_ir::ExprNode::int(1))).unwrap();
    let consumer = {
        let p = producer.clone();
        compute("c", dim_args([8]), move |axes| {
            let v = p.call(&[axes[0].clone()])?;
            v.try_mul(&fusor_ir::ExprNode::int(2))
        })
        .unwrap()
    };

    let schedule = Schedule::new(&[consumer]).unwrap();
    let text = schedule.lower().unwrap().to_string();

    // Non-inlined producer keeps its own nest, emitted first; the consumer
    // still references it through a call.
    let p_at = text.find("p[i]").expect("producer nest");
    let c_at = text.find("c[i").expect("consumer nest");
    assert!(p_at < c_at, "{text}");
    assert!(text.contains("p(i"), "{text}");
}

#[test]
fn lower_substitutes_inlined_bodies() {
    let _scope = KernelScope::new();
    let producer = compute("p", dim_args([8]), |axes| axes[0].try_add(&fusor_ir::ExprNode::int(1))).unwrap();
    let consumer = {
        let p = producer.clone();
        compute("c", dim_args([8]), move |axes| {
            let v = p.call(&[axes[0].clone()])?;
            v.try_mul(&fusor_ir::ExprNode::int(2))
        })
        .unwrap()
    };

    let mut schedule = Schedule::new(&[consumer]).unwrap();
    let p_op = schedule.op(&producer).unwrap();
    schedule.compute_inline(p_op).unwrap();

    let stmt = schedule.lower().unwrap();
    assert_eq!(stmt.to_string(), "For(i, 0, 8) {\n  c[i] = ((i + 1) * 2);\n}");
}

#[test]
fn inlining_chains_through_intermediates() {
    let _scope = KernelScope::new();
    let a = compute("a", dim_args([4]), |axes| axes[0].try_add(&fusor_ir::ExprNode::int(1))).unwrap();
    let b = {
        let a = a.clone();
        compute("b", dim_args([4]), move |axes| {
            let v = a.call(&[axes[0].clone()])?;
            v.try_mul(&fusor_ir::ExprNode::int(3))
        })
        .unwrap()
    };
    let c = {
        let b = b.clone();
        compute("c", dim_args([4]), move |axes| {
            let v = b.call(&[axes[0].clone()])?;
            v.try_sub(&fusor_ir::ExprNode::int(5))
        })
        .unwrap()
    };

    let mut schedule = Schedule::new(&[c]).unwrap();
    let a_op = schedule.op(&a).unwrap();
    let b_op = schedule.op(&b).unwrap();
    schedule.compute_inline(a_op).unwrap();
    schedule.compute_inline(b_op).unwrap();

    let stmt = schedule.lower().unwrap();
    assert_eq!(stmt.to_string(), "For(i, 0, 4) {\n  c[i] = (((i + 1) * 3) - 5);\n}");
}

#[test]
fn lower_masked_split_predicates_the_store() {
    let _scope = KernelScope::new();
    let t = compute("f", dim_args([10]), |axes| Ok(axes[0].clone())).unwrap();
    let mut schedule = Schedule::new(&[t.clone()]).unwrap();
    let op = schedule.op(&t).unwrap();
    schedule.split_with_mask(op, &t.arg(0).clone(), 4, true).unwrap();

    let text = schedule.lower().unwrap().to_string();
    assert_eq!(
        text,
        "For(i_outer, 0, 3) {\n  For(i_inner, 0, 4) {\n    \
         f[((i_outer * 4) + i_inner), (((i_outer * 4) + i_inner)<10 ? 1 : 0)] = ((i_outer * 4) + i_inner);\n  }\n}"
    );
}

#[test]
fn lower_tail_split_emits_both_nests() {
    let _scope = KernelScope::new();
    let t = compute("f", dim_args([10]), |axes| Ok(axes[0].clone())).unwrap();
    let mut schedule = Schedule::new(&[t.clone()]).unwrap();
    let op = schedule.op(&t).unwrap();
    schedule.split_with_tail(op, &t.arg(0).clone(), 4, true).unwrap();

    let text = schedule.lower().unwrap().to_string();
    assert_eq!(
        text,
        "For(i_outer, 0, 2) {\n  For(i_inner, 0, 4) {\n    \
         f[((i_outer * 4) + i_inner)] = ((i_outer * 4) + i_inner);\n  }\n}\n\
         For(i_tail, 0, 2) {\n  f[(8 + i_tail)] = (8 + i_tail);\n}"
    );
}

#[test]
fn lower_gpu_bindings_land_on_the_loops() {
    let _scope = KernelScope::new();
    let t = compute("f", dim_args([32, 8]), |axes| axes[0].try_add(&axes[1])).unwrap();
    let mut schedule = Schedule::new(&[t.clone()]).unwrap();
    let op = schedule.op(&t).unwrap();
    schedule.gpu_exec_config(op, &[t.arg(0).clone()], &[t.arg(1).clone()]).unwrap();

    let text = schedule.lower().unwrap().to_string();
    assert!(text.contains("For(i, 0, 32) { // blockIdx.x"), "{text}");
    assert!(text.contains("For(j, 0, 8) { // threadIdx.x"), "{text}");
}

#[test]
fn empty_schedule_does_not_lower() {
    let _scope = KernelScope::new();
    let schedule = Schedule::new(&[]).unwrap();
    assert!(matches!(schedule.lower(), Err(Error::EmptySchedule)));
}
