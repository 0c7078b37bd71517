//! The narrow adapter to the external graph fuser.
//!
//! A [`FusedGraph`] carries exactly what the compiler core needs from a fused
//! subgraph: typed values with static shapes and a device, plus op nodes with
//! a kind symbol and ordered inputs. Nothing of the fuser's own
//! representation leaks past this boundary.

use fusor_dtype::ScalarKind;
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;

/// Where a tensor value lives. Decides the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda,
}

/// Handle to one value of the fused subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub(crate) usize);

/// A graph value: a typed tensor with a static shape, or a scalar constant.
#[derive(Debug, Clone)]
pub enum ValueDesc {
    Tensor { kind: ScalarKind, sizes: Vec<i64>, device: Device },
    ConstInt(i32),
    ConstFloat(f32),
}

impl ValueDesc {
    pub fn sizes(&self) -> Option<&[i64]> {
        match self {
            Self::Tensor { sizes, .. } => Some(sizes),
            _ => None,
        }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor { .. })
    }
}

/// The closed set of op kinds the core recognizes. Anything else fails kernel
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    Min,
    Max,
    Clamp,
    Log,
    Log10,
    Log2,
    Exp,
    Expm1,
    Erf,
    Erfc,
    Cos,
    Sin,
    Tan,
    Acos,
    Asin,
    Atan,
    Cosh,
    Sinh,
    Tanh,
    Abs,
    Sqrt,
    Rsqrt,
    Floor,
    Ceil,
    Round,
    Trunc,
    Remainder,
    Frac,
    Lgamma,
    Pow,
    Fmod,
    Cat,
    Chunk,
    ListConstruct,
    Constant,
}

impl OpKind {
    /// Parse a fuser kind symbol, e.g. `aten::add` or `prim::ConstantChunk`.
    pub fn parse(symbol: &str) -> Option<Self> {
        let bare = symbol.rsplit("::").next().unwrap_or(symbol);
        Some(match bare {
            "add" => Self::Add,
            "sub" => Self::Sub,
            "mul" => Self::Mul,
            "div" => Self::Div,
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "ge" => Self::Ge,
            "gt" => Self::Gt,
            "le" => Self::Le,
            "lt" => Self::Lt,
            "min" => Self::Min,
            "max" => Self::Max,
            "clamp" => Self::Clamp,
            "log" => Self::Log,
            "log10" => Self::Log10,
            "log2" => Self::Log2,
            "exp" => Self::Exp,
            "expm1" => Self::Expm1,
            "erf" => Self::Erf,
            "erfc" => Self::Erfc,
            "cos" => Self::Cos,
            "sin" => Self::Sin,
            "tan" => Self::Tan,
            "acos" => Self::Acos,
            "asin" => Self::Asin,
            "atan" => Self::Atan,
            "cosh" => Self::Cosh,
            "sinh" => Self::Sinh,
            "tanh" => Self::Tanh,
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "rsqrt" => Self::Rsqrt,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "trunc" => Self::Trunc,
            "remainder" => Self::Remainder,
            "frac" => Self::Frac,
            "lgamma" => Self::Lgamma,
            "pow" => Self::Pow,
            "fmod" => Self::Fmod,
            "cat" => Self::Cat,
            "chunk" | "ConstantChunk" => Self::Chunk,
            "list_construct" | "ListConstruct" => Self::ListConstruct,
            "constant" | "Constant" => Self::Constant,
            _ => return None,
        })
    }
}

/// One op of the subgraph: kind, ordered inputs, one or more outputs, plus
/// the scalar attributes `cat`/`chunk` carry.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub kind: OpKind,
    pub inputs: SmallVec<[ValueId; 4]>,
    pub outputs: SmallVec<[ValueId; 2]>,
    pub dim: Option<usize>,
    pub chunks: Option<usize>,
}

/// An owned fused subgraph in adapter form.
#[derive(Debug, Default, Clone)]
pub struct FusedGraph {
    values: Vec<ValueDesc>,
    nodes: Vec<GraphNode>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl FusedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, desc: ValueDesc) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(desc);
        id
    }

    /// Declare a graph input tensor.
    pub fn tensor_input(&mut self, kind: ScalarKind, sizes: &[i64], device: Device) -> ValueId {
        let id = self.push_value(ValueDesc::Tensor { kind, sizes: sizes.to_vec(), device });
        self.inputs.push(id);
        id
    }

    /// An embedded scalar constant (`prim::Constant`).
    pub fn constant_int(&mut self, value: i32) -> ValueId {
        self.push_value(ValueDesc::ConstInt(value))
    }

    pub fn constant_float(&mut self, value: f32) -> ValueId {
        self.push_value(ValueDesc::ConstFloat(value))
    }

    /// Append a single-output op node. The output value's shape is the
    /// elementwise broadcast result; comparisons yield int32.
    pub fn node(&mut self, symbol: &str, inputs: &[ValueId]) -> Result<ValueId> {
        let kind = OpKind::parse(symbol).ok_or_else(|| UnsupportedOpSnafu { kind: symbol.to_owned() }.build())?;
        ensure!(
            !matches!(kind, OpKind::Cat | OpKind::Chunk | OpKind::ListConstruct | OpKind::Constant),
            UnsupportedOpSnafu { kind: format!("{symbol} is not an elementwise node; use cat/chunk/constant builders") }
        );

        let (out_kind, sizes, device) = self.elementwise_output(symbol, kind, inputs)?;
        let out = self.push_value(ValueDesc::Tensor { kind: out_kind, sizes, device });
        self.nodes.push(GraphNode {
            kind,
            inputs: SmallVec::from_slice(inputs),
            outputs: SmallVec::from_slice(&[out]),
            dim: None,
            chunks: None,
        });
        Ok(out)
    }

    /// Append a concatenation along `dim` over the listed tensors.
    pub fn cat(&mut self, inputs: &[ValueId], dim: usize) -> Result<ValueId> {
        ensure!(!inputs.is_empty(), OpAritySnafu { kind: "cat".to_owned(), expected: 1usize, actual: 0usize });
        let (kind, mut sizes, device) = self.tensor_desc("cat", inputs[0])?;
        for other in &inputs[1..] {
            let (_, other_sizes, _) = self.tensor_desc("cat", *other)?;
            sizes[dim] += other_sizes[dim];
        }
        let out = self.push_value(ValueDesc::Tensor { kind, sizes, device });
        self.nodes.push(GraphNode {
            kind: OpKind::Cat,
            inputs: SmallVec::from_slice(inputs),
            outputs: SmallVec::from_slice(&[out]),
            dim: Some(dim),
            chunks: None,
        });
        Ok(out)
    }

    /// Append a `ConstantChunk`: split `input` into `chunks` equal parts
    /// along `dim`, one output per part.
    pub fn chunk(&mut self, input: ValueId, dim: usize, chunks: usize) -> Result<Vec<ValueId>> {
        let (kind, mut sizes, device) = self.tensor_desc("chunk", input)?;
        let extent = sizes[dim];
        ensure!(chunks > 0 && extent % chunks as i64 == 0, UnevenChunkSnafu { extent, chunks });
        sizes[dim] = extent / chunks as i64;

        let outputs: Vec<ValueId> = (0..chunks)
            .map(|_| self.push_value(ValueDesc::Tensor { kind, sizes: sizes.clone(), device }))
            .collect();
        self.nodes.push(GraphNode {
            kind: OpKind::Chunk,
            inputs: SmallVec::from_slice(&[input]),
            outputs: SmallVec::from_slice(&outputs),
            dim: Some(dim),
            chunks: Some(chunks),
        });
        Ok(outputs)
    }

    /// Mark a value as a subgraph output.
    pub fn mark_output(&mut self, value: ValueId) {
        self.outputs.push(value);
    }

    pub fn value(&self, id: ValueId) -> &ValueDesc {
        &self.values[id.0]
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// The common device of every tensor value.
    pub fn device(&self) -> Result<Device> {
        let mut device = None;
        for value in &self.values {
            if let ValueDesc::Tensor { device: d, .. } = value {
                match device {
                    None => device = Some(*d),
                    Some(first) if first != *d => return MixedDevicesSnafu { first, second: *d }.fail(),
                    _ => {}
                }
            }
        }
        Ok(device.unwrap_or(Device::Cpu))
    }

    fn tensor_desc(&self, kind: &str, id: ValueId) -> Result<(ScalarKind, Vec<i64>, Device)> {
        match self.value(id) {
            ValueDesc::Tensor { kind, sizes, device } => Ok((*kind, sizes.clone(), *device)),
            _ => TensorRequiredSnafu { kind: kind.to_owned() }.fail(),
        }
    }

    /// Output descriptor of an elementwise op: the (broadcast) shape of its
    /// tensor inputs, float if any input is float, int32 for comparisons.
    fn elementwise_output(&self, symbol: &str, kind: OpKind, inputs: &[ValueId]) -> Result<(ScalarKind, Vec<i64>, Device)> {
        let arity = op_arity(kind);
        ensure!(
            arity.contains(&inputs.len()),
            OpAritySnafu { kind: symbol.to_owned(), expected: arity[0], actual: inputs.len() }
        );

        let mut shape: Option<Vec<i64>> = None;
        let mut device = Device::Cpu;
        let mut any_float = false;
        let mut any_tensor = false;
        for &input in inputs {
            match self.value(input) {
                ValueDesc::Tensor { kind, sizes, device: d } => {
                    any_tensor = true;
                    any_float |= kind.is_float();
                    device = *d;
                    match &shape {
                        None => shape = Some(sizes.clone()),
                        Some(existing) => {
                            let merged = broadcast_shapes(existing, sizes).ok_or_else(|| {
                                ShapeMismatchSnafu {
                                    kind: symbol.to_owned(),
                                    input: sizes.clone(),
                                    output: existing.clone(),
                                }
                                .build()
                            })?;
                            shape = Some(merged);
                        }
                    }
                }
                ValueDesc::ConstFloat(_) => any_float = true,
                ValueDesc::ConstInt(_) => {}
            }
        }
        ensure!(any_tensor, TensorRequiredSnafu { kind: symbol.to_owned() });

        let out_kind = if is_comparison(kind) {
            ScalarKind::Int32
        } else if any_float {
            ScalarKind::Float32
        } else {
            ScalarKind::Int32
        };
        Ok((out_kind, shape.expect("at least one tensor input"), device))
    }
}

fn is_comparison(kind: OpKind) -> bool {
    matches!(kind, OpKind::Eq | OpKind::Ne | OpKind::Ge | OpKind::Gt | OpKind::Le | OpKind::Lt)
}

/// Accepted input counts per op. `add`/`sub` optionally take the alpha
/// scalar; `clamp` takes value, lo, hi.
fn op_arity(kind: OpKind) -> &'static [usize] {
    use OpKind::*;
    match kind {
        Add | Sub => &[2, 3],
        Mul | Div | Eq | Ne | Ge | Gt | Le | Lt | Min | Max | Pow | Fmod | Remainder => &[2],
        Clamp => &[3],
        _ => &[1],
    }
}

/// NumPy-style right-aligned broadcast of two static shapes.
fn broadcast_shapes(a: &[i64], b: &[i64]) -> Option<Vec<i64>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0i64; rank];
    for i in 0..rank {
        let ad = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let bd = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (ad, bd) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}
