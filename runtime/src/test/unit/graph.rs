use fusor_dtype::ScalarKind;
use test_case::test_case;

use crate::{Device, Error, FusedGraph, OpKind, ValueDesc};

#[test_case("aten::add", OpKind::Add)]
#[test_case("aten::lt", OpKind::Lt)]
#[test_case("prim::ConstantChunk", OpKind::Chunk)]
#[test_case("prim::ListConstruct", OpKind::ListConstruct)]
#[test_case("cat", OpKind::Cat)]
#[test_case("lgamma", OpKind::Lgamma)]
fn symbols_parse(symbol: &str, expected: OpKind) {
    assert_eq!(OpKind::parse(symbol), Some(expected));
}

#[test]
fn unknown_symbols_are_rejected() {
    assert_eq!(OpKind::parse("aten::softmax"), None);

    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Float32, &[4], Device::Cpu);
    let err = graph.node("aten::conv2d", &[a]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOp { .. }));
}

#[test]
fn elementwise_output_shape_broadcasts() {
    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Float32, &[4, 8], Device::Cpu);
    let b = graph.tensor_input(ScalarKind::Float32, &[8], Device::Cpu);
    let sum = graph.node("aten::mul", &[a, b]).unwrap();

    let ValueDesc::Tensor { sizes, kind, .. } = graph.value(sum) else { panic!() };
    assert_eq!(sizes, &[4, 8]);
    assert_eq!(*kind, ScalarKind::Float32);
}

#[test]
fn incompatible_shapes_are_rejected() {
    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Float32, &[4], Device::Cpu);
    let b = graph.tensor_input(ScalarKind::Float32, &[5], Device::Cpu);
    let err = graph.node("aten::add", &[a, b]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn comparisons_yield_int32() {
    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Float32, &[4], Device::Cpu);
    let b = graph.tensor_input(ScalarKind::Float32, &[4], Device::Cpu);
    let cmp = graph.node("aten::eq", &[a, b]).unwrap();
    let ValueDesc::Tensor { kind, .. } = graph.value(cmp) else { panic!() };
    assert_eq!(*kind, ScalarKind::Int32);
}

#[test]
fn mixed_int_float_promotes_the_output() {
    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Int32, &[4], Device::Cpu);
    let alpha = graph.constant_float(0.5);
    let out = graph.node("aten::mul", &[a, alpha]).unwrap();
    let ValueDesc::Tensor { kind, .. } = graph.value(out) else { panic!() };
    assert_eq!(*kind, ScalarKind::Float32);
}

#[test]
fn arity_is_checked() {
    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Float32, &[4], Device::Cpu);
    let err = graph.node("aten::add", &[a]).unwrap_err();
    assert!(matches!(err, Error::OpArity { .. }));
}

#[test]
fn cat_sums_the_dim() {
    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Float32, &[4], Device::Cpu);
    let b = graph.tensor_input(ScalarKind::Float32, &[6], Device::Cpu);
    let cat = graph.cat(&[a, b], 0).unwrap();
    assert_eq!(graph.value(cat).sizes(), Some(&[10i64][..]));
}

#[test]
fn chunk_splits_evenly_or_fails() {
    let mut graph = FusedGraph::new();
    let a = graph.tensor_input(ScalarKind::Float32, &[8], Device::Cpu);
    let parts = graph.chunk(a, 0, 2).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(graph.value(parts[0]).sizes(), Some(&[4i64][..]));

    let err = graph.chunk(a, 0, 3).unwrap_err();
    assert!(matches!(err, Error::UnevenChunk { extent: 8, chunks: 3 }));
}

#[test]
fn devices_must_agree() {
    let mut graph = FusedGraph::new();
    graph.tensor_input(ScalarKind::Float32, &[4], Device::Cpu);
    graph.tensor_input(ScalarKind::Float32, &[4], Device::Cuda);
    assert!(matches!(graph.device(), Err(Error::MixedDevices { .. })));
}
