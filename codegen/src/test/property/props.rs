use fusor_dtype::Dtype;
use fusor_ir::{ExprNode, ExprOps, KernelScope, fold, substitute};
use fusor_schedule::{Schedule, compute, dim_args};
use proptest::prelude::*;

use super::generators::arb_total_expr;
use crate::test::helpers::values_equal;
use crate::{BufferArg, CallArg, CodeGen, SimpleIrEval, Value, evaluate_expr, evaluate_expr_with};

proptest! {
    /// Folding preserves interpretation: `interpret(fold(e)) == interpret(e)`.
    #[test]
    fn fold_preserves_interpretation(plan in arb_total_expr(0)) {
        let _scope = KernelScope::new();
        let e = plan.build(&[]);
        let reference = evaluate_expr(&e).unwrap();
        let folded = fold(&e).unwrap();
        let after = evaluate_expr(&folded).unwrap();
        prop_assert!(values_equal(&reference, &after), "{reference:?} != {after:?} for {e}");
    }

    /// Substitution agrees with environment binding:
    /// `interpret(substitute(e, σ)) == interpret(e)` under σ.
    #[test]
    fn substitution_matches_environment(
        plan in arb_total_expr(3),
        images in proptest::array::uniform3(-64i32..64),
    ) {
        let _scope = KernelScope::new();
        let vars: Vec<_> = (0..3).map(|i| ExprNode::var(format!("x{i}"), Dtype::FLOAT32)).collect();
        let e = plan.build(&vars);

        let mapping: Vec<_> =
            vars.iter().cloned().zip(images.iter().map(|v| ExprNode::float(*v as f32 * 0.5))).collect();
        let substituted = substitute(&e, &mapping).unwrap();
        let direct = evaluate_expr(&substituted).unwrap();

        let bindings: Vec<_> =
            vars.iter().cloned().zip(images.iter().map(|v| Value::float(*v as f32 * 0.5))).collect();
        let via_env = evaluate_expr_with(&e, &bindings).unwrap();

        prop_assert!(values_equal(&direct, &via_env), "{direct:?} != {via_env:?} for {e}");
    }

    /// A split never changes the set of stored elements.
    #[test]
    fn splits_preserve_stored_values(
        extent in 1i32..40,
        factor in 1i32..10,
        factor_on_inner in any::<bool>(),
        masked in any::<bool>(),
    ) {
        let _scope = KernelScope::new();

        let body = |axes: &[fusor_ir::Expr]| {
            let sq = axes[0].try_mul(&axes[0])?;
            sq.try_add(&ExprNode::int(3))
        };

        let plain = compute("f", dim_args([extent]), body).unwrap();
        let reference = run_single_output(&Schedule::new(&[plain.clone()]).unwrap(), &plain, extent);

        let split_tensor = compute("g", dim_args([extent]), body).unwrap();
        let mut schedule = Schedule::new(&[split_tensor.clone()]).unwrap();
        let op = schedule.op(&split_tensor).unwrap();
        let axis = split_tensor.arg(0).clone();
        if masked {
            schedule.split_with_mask(op, &axis, factor, factor_on_inner).unwrap();
        } else {
            schedule.split_with_tail(op, &axis, factor, factor_on_inner).unwrap();
        }
        let split_result = run_single_output(&schedule, &split_tensor, extent);

        prop_assert_eq!(reference, split_result);
    }
}

fn run_single_output(schedule: &Schedule, tensor: &fusor_schedule::Tensor, extent: i32) -> Vec<i32> {
    let stmt = schedule.lower().unwrap();
    let params = [BufferArg::buffer(tensor.function().func_var(), Dtype::INT32).unwrap()];
    let mut eval = SimpleIrEval::new(&stmt, &params);
    let mut out = vec![0i32; extent as usize];
    eval.call(&[CallArg::buffer(&mut out)]).unwrap();
    out
}
