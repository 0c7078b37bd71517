use fusor_dtype::Dtype;

use crate::{ExprKind, ExprNode, ExprOps, HashProvider, KernelScope, StmtNode, fold};

#[test]
fn hashes_are_distinct_and_nonzero() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let a = ExprNode::float(2.0);
    let f = ExprNode::try_add(&a, &ExprNode::float(3.0).try_mul(&x).unwrap()).unwrap();

    let mut hasher = HashProvider::new();
    let hash_x = hasher.hash_expr(&x);
    let hash_a = hasher.hash_expr(&a);
    let hash_f = hasher.hash_expr(&f);

    assert_ne!(hash_x, 0);
    assert_ne!(hash_a, 0);
    assert_ne!(hash_f, 0);
    assert_ne!(hash_x, hash_a);
    assert_ne!(hash_x, hash_f);
    assert_ne!(hash_a, hash_f);
}

#[test]
fn structurally_equal_branches_hash_equal() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let f = ExprNode::try_add(&x.try_mul(&y).unwrap(), &x.try_mul(&y).unwrap()).unwrap();

    let ExprKind::Binary { lhs, rhs, .. } = f.kind() else { panic!() };

    let mut hasher = HashProvider::new();
    let hash_f = hasher.hash_expr(&f);
    let hash_l = hasher.hash_expr(lhs);
    let hash_r = hasher.hash_expr(rhs);

    assert_ne!(hash_f, hash_l);
    assert_ne!(hash_f, hash_r);
    assert_eq!(hash_l, hash_r);
}

#[test]
fn separate_but_identical_trees_hash_equal() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let f2 = ExprNode::try_add(&x, &ExprNode::float(2.0).try_div(&y).unwrap()).unwrap();
    let f3 = ExprNode::try_add(&x, &ExprNode::float(2.0).try_div(&y).unwrap()).unwrap();

    let mut hasher = HashProvider::new();
    assert_eq!(hasher.hash_expr(&f2), hasher.hash_expr(&f3));
}

#[test]
fn variables_hash_by_identity_not_name() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let z = ExprNode::var("x", Dtype::FLOAT32);
    let y = ExprNode::var("y", Dtype::FLOAT32);
    let b = ExprNode::float(2.0);

    let f2 = ExprNode::try_add(&x, &b.try_div(&y).unwrap()).unwrap();
    let f4 = ExprNode::try_add(&z, &b.try_div(&y).unwrap()).unwrap();

    let mut hasher = HashProvider::new();
    assert_ne!(hasher.hash_expr(&f2), hasher.hash_expr(&f4));
}

#[test]
fn immediates_hash_by_kind_and_bits() {
    let _scope = KernelScope::new();
    let mut hasher = HashProvider::new();
    let two_i = ExprNode::int(2);
    let two_f = ExprNode::float(2.0);
    assert_ne!(hasher.hash_expr(&two_i), hasher.hash_expr(&two_f));

    let two_i_again = ExprNode::int(2);
    assert_eq!(hasher.hash_expr(&two_i), hasher.hash_expr(&two_i_again));
}

#[test]
fn intrinsics_hash() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let f = ExprNode::sin(&x).unwrap().try_mul(&ExprNode::cos(&x).unwrap()).unwrap();
    let mut hasher = HashProvider::new();
    assert_ne!(hasher.hash_expr(&f), 0);
    assert_ne!(
        hasher.hash_expr(&ExprNode::sin(&x).unwrap()),
        hasher.hash_expr(&ExprNode::cos(&x).unwrap())
    );
}

#[test]
fn cache_is_queryable() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let f = x.try_mul(&x).unwrap();

    let mut hasher = HashProvider::new();
    assert!(!hasher.cached_expr(&f));
    hasher.hash_expr(&f);
    assert!(hasher.cached_expr(&f));
    assert!(hasher.cached_expr(&x));
}

#[test]
fn folding_preserves_subtree_equivalence() {
    let _scope = KernelScope::new();
    let x = ExprNode::var("x", Dtype::FLOAT32);
    let lhs = ExprNode::try_add(&ExprNode::float(2.0), &ExprNode::float(3.0)).unwrap().try_mul(&x).unwrap();
    let rhs = ExprNode::float(5.0).try_mul(&x).unwrap();

    let mut hasher = HashProvider::new();
    let folded = fold(&lhs).unwrap();
    assert_eq!(hasher.hash_expr(&folded), hasher.hash_expr(&rhs));
}

#[test]
fn statements_hash() {
    let _scope = KernelScope::new();
    let buf = ExprNode::var("b", Dtype::HANDLE);
    let i = ExprNode::var("i", Dtype::INT32);
    let s1 = StmtNode::store_unmasked(&buf, &i, &i).unwrap();
    let s2 = StmtNode::store_unmasked(&buf, &i, &i).unwrap();
    let s3 = StmtNode::store_unmasked(&buf, &i, &ExprNode::int(0)).unwrap();

    let mut hasher = HashProvider::new();
    assert_eq!(hasher.hash_stmt(&s1), hasher.hash_stmt(&s2));
    assert_ne!(hasher.hash_stmt(&s1), hasher.hash_stmt(&s3));
}
