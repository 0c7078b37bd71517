//! The kernel façade.
//!
//! Takes a fused subgraph in adapter form, builds one broadcast `compute` per
//! graph input and one tensor per op node, inlines every intermediate,
//! lowers, picks a backend off the device configuration (CUDA emitter on
//! device, LLVM JIT when compiled in, interpreter otherwise) and caches the
//! compiled artifact. A later call under a different device configuration is
//! a [`BackendMismatch`](crate::Error::BackendMismatch).

use std::collections::HashMap;

use fusor_codegen::{BufferArg, CallArg, CodeGen, CudaCodeGen, SimpleIrEval};
use fusor_dtype::{Dtype, ScalarKind};
use fusor_ir::{Buffer, Expr, ExprNode, ExprOps, Function, KernelArena, KernelScope};
use fusor_schedule::{Schedule, Tensor, compute};
use snafu::ensure;

use crate::error::*;
use crate::graph::{Device, FusedGraph, GraphNode, OpKind, ValueDesc, ValueId};
use crate::tunables::tunables;

enum Backend {
    Interp(SimpleIrEval),
    Cuda(CudaCodeGen),
    #[cfg(feature = "llvm")]
    Llvm(fusor_codegen::LlvmCodeGen),
}

impl Backend {
    fn call(&mut self, args: &[CallArg]) -> fusor_codegen::Result<()> {
        match self {
            Self::Interp(cg) => cg.call(args),
            Self::Cuda(cg) => cg.call(args),
            #[cfg(feature = "llvm")]
            Self::Llvm(cg) => cg.call(args),
        }
    }
}

pub struct TensorExprKernel {
    arena: KernelArena,
    device: Device,
    input_args: Vec<BufferArg>,
    output_args: Vec<BufferArg>,
    outputs: Vec<Tensor>,
    schedule: Schedule,
    compiled: Option<Backend>,
}

impl TensorExprKernel {
    /// Compile-time construction: builds and schedules all tensors. Missing
    /// op dispatches, invalid dtypes and rank mismatches fail here, not at
    /// run time.
    pub fn new(graph: &FusedGraph) -> Result<Self> {
        let arena = KernelArena::new();
        let scope = KernelScope::bind(&arena);
        let device = graph.device()?;
        ensure!(!graph.outputs().is_empty(), EmptyGraphSnafu);

        let mut builder = KernelBuilder { graph, tensors: HashMap::new() };

        // One broadcast compute per graph input.
        let mut input_args = Vec::with_capacity(graph.inputs().len());
        for &input in graph.inputs() {
            let ValueDesc::Tensor { kind, sizes, .. } = graph.value(input) else {
                return TensorRequiredSnafu { kind: "graph input".to_owned() }.fail();
            };
            let dtype = Dtype::scalar(*kind);
            let dims: Vec<Expr> = sizes.iter().map(|&s| ExprNode::int(s as i32)).collect();
            let buffer = Buffer::new("input", dtype, &dims)?;
            let sizes = sizes.clone();
            let tensor = compute("input", dims.into_iter().map(Into::into), |axes| {
                let indices: Vec<Expr> = axes
                    .iter()
                    .zip(&sizes)
                    .map(|(axis, &size)| if size == 1 { ExprNode::int(0) } else { axis.clone() })
                    .collect();
                buffer.load(&indices)
            })?;
            input_args.push(BufferArg::from_buffer(&buffer)?);
            builder.tensors.insert(input, tensor);
        }

        // One tensor per op node, dispatched on the kind symbol.
        for node in graph.nodes() {
            builder.build_node(node)?;
        }

        let mut outputs = Vec::with_capacity(graph.outputs().len());
        let mut output_args = Vec::with_capacity(graph.outputs().len());
        for &output in graph.outputs() {
            let tensor = builder.tensors.get(&output).ok_or_else(|| {
                TensorRequiredSnafu { kind: "graph output".to_owned() }.build()
            })?;
            output_args.push(BufferArg::buffer(tensor.function().func_var(), tensor.dtype())?);
            outputs.push(tensor.clone());
        }

        // Intermediates fold into their consumers; outputs keep their nests.
        let mut schedule = Schedule::new(&outputs)?;
        let inline: Vec<_> = schedule.ops().filter(|&op| !schedule.node(op).is_output()).collect();
        for op in inline {
            schedule.compute_inline(op)?;
        }

        drop(scope);
        tracing::debug!(inputs = input_args.len(), outputs = outputs.len(), ?device, "kernel constructed");
        Ok(Self { arena, device, input_args, output_args, outputs, schedule, compiled: None })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// The emitted CUDA source, once compiled for the device path.
    pub fn cuda_source(&self) -> Option<&str> {
        match &self.compiled {
            Some(Backend::Cuda(cg)) => Some(cg.source()),
            _ => None,
        }
    }

    /// Run the kernel. `inputs` and `outputs` follow the graph's declaration
    /// order; the runtime allocates output buffers at the compile-time sizes.
    pub fn run(&mut self, device: Device, inputs: &[CallArg], outputs: &[CallArg]) -> Result<()> {
        ensure!(device == self.device, BackendMismatchSnafu { cached: self.device, requested: device });
        if self.compiled.is_none() {
            self.compile(device)?;
        }

        let mut args = Vec::with_capacity(inputs.len() + outputs.len());
        args.extend_from_slice(inputs);
        args.extend_from_slice(outputs);
        self.compiled.as_mut().expect("compiled above").call(&args)?;
        Ok(())
    }

    fn compile(&mut self, device: Device) -> Result<()> {
        let scope = KernelScope::bind(&self.arena);

        if device == Device::Cuda {
            // Bind the outermost pointwise axes to the grid.
            let configured = tunables().cuda_pointwise_loop_levels;
            let levels = if configured > 0 { configured as usize } else { 2 };
            for tensor in &self.outputs {
                let op = self.schedule.op(tensor)?;
                let axes: Vec<Expr> =
                    self.schedule.node(op).axes().iter().map(|axis| axis.var().clone()).collect();
                let block: Vec<Expr> = axes.first().cloned().into_iter().collect();
                let thread: Vec<Expr> = if levels >= 2 { axes.get(1).cloned().into_iter().collect() } else { Vec::new() };
                self.schedule.gpu_exec_config(op, &block, &thread)?;
            }
        }

        let stmt = self.schedule.lower()?;
        let mut params = self.input_args.clone();
        params.extend(self.output_args.iter().cloned());

        let backend = match device {
            Device::Cuda => Backend::Cuda(CudaCodeGen::new(&stmt, &params)?),
            #[cfg(feature = "llvm")]
            Device::Cpu => Backend::Llvm(fusor_codegen::LlvmCodeGen::new(&stmt, &params)?),
            #[cfg(not(feature = "llvm"))]
            Device::Cpu => Backend::Interp(SimpleIrEval::new(&stmt, &params)),
        };

        drop(scope);
        tracing::debug!(?device, "kernel compiled");
        self.compiled = Some(backend);
        Ok(())
    }
}

struct KernelBuilder<'g> {
    graph: &'g FusedGraph,
    tensors: HashMap<ValueId, Tensor>,
}

impl KernelBuilder<'_> {
    fn build_node(&mut self, node: &GraphNode) -> Result<()> {
        match node.kind {
            // Structure-only kinds are folded by the graph builder.
            OpKind::ListConstruct | OpKind::Constant => Ok(()),
            OpKind::Chunk => self.build_chunk(node),
            OpKind::Cat => self.build_cat(node),
            _ => self.build_elementwise(node),
        }
    }

    fn out_desc(&self, node: &GraphNode, index: usize) -> Result<(ScalarKind, Vec<i64>)> {
        match self.graph.value(node.outputs[index]) {
            ValueDesc::Tensor { kind, sizes, .. } => Ok((*kind, sizes.clone())),
            _ => TensorRequiredSnafu { kind: op_name(node.kind).to_owned() }.fail(),
        }
    }

    /// Fresh iteration vars + int dims for an output shape.
    fn axes_for(sizes: &[i64]) -> (Vec<Expr>, Vec<Expr>) {
        const HINTS: [&str; 4] = ["i", "j", "k", "l"];
        let axes = (0..sizes.len())
            .map(|i| {
                let hint = HINTS.get(i).map_or_else(|| format!("i{i}"), |h| (*h).to_owned());
                ExprNode::var(hint, Dtype::INT32)
            })
            .collect();
        let dims = sizes.iter().map(|&s| ExprNode::int(s as i32)).collect();
        (axes, dims)
    }

    fn finish_tensor(&mut self, node: &GraphNode, output: usize, axes: Vec<Expr>, dims: Vec<Expr>, body: Expr) -> Result<()> {
        let (out_kind, _) = self.out_desc(node, output)?;
        let body = demote(body, out_kind)?;
        let function = Function::new(op_name(node.kind), dims, axes, body)?;
        self.tensors.insert(node.outputs[output], Tensor::new(function));
        Ok(())
    }

    /// Reference a graph value inside a body: a broadcast call for tensors,
    /// an immediate for embedded constants.
    fn tensor_or_constant(&self, id: ValueId, axes: &[Expr]) -> Result<Expr> {
        match self.graph.value(id) {
            ValueDesc::ConstInt(v) => Ok(ExprNode::int(*v)),
            ValueDesc::ConstFloat(v) => Ok(ExprNode::float(*v)),
            ValueDesc::Tensor { sizes, .. } => {
                let tensor = self
                    .tensors
                    .get(&id)
                    .ok_or_else(|| TensorRequiredSnafu { kind: "value used before defined".to_owned() }.build())?;
                // Right-aligned broadcast: size-1 axes pin to zero.
                let offset = axes.len() - sizes.len();
                let indices: Vec<Expr> = sizes
                    .iter()
                    .enumerate()
                    .map(|(k, &size)| if size == 1 { ExprNode::int(0) } else { axes[offset + k].clone() })
                    .collect();
                Ok(tensor.call(&indices)?)
            }
        }
    }

    fn build_elementwise(&mut self, node: &GraphNode) -> Result<()> {
        let (_, sizes) = self.out_desc(node, 0)?;
        let (axes, dims) = Self::axes_for(&sizes);

        let mut inputs = Vec::with_capacity(node.inputs.len());
        for &input in &node.inputs {
            inputs.push(self.tensor_or_constant(input, &axes)?);
        }
        promote_inputs(&mut inputs)?;

        let body = apply_op(node.kind, &inputs)?;
        self.finish_tensor(node, 0, axes, dims, body)
    }

    /// `ConstantChunk`: output j reads the input at an offset of j steps
    /// along the chunk dim.
    fn build_chunk(&mut self, node: &GraphNode) -> Result<()> {
        let dim = node.dim.ok_or_else(|| ConstantRequiredSnafu { kind: "chunk".to_owned(), what: "dim" }.build())?;
        for output in 0..node.outputs.len() {
            let (_, sizes) = self.out_desc(node, output)?;
            let (axes, dims) = Self::axes_for(&sizes);
            let step = sizes[dim] as i32;

            let mut indices = axes.clone();
            indices[dim] = indices[dim].try_add(&ExprNode::int(output as i32 * step))?;
            let tensor = self
                .tensors
                .get(&node.inputs[0])
                .ok_or_else(|| TensorRequiredSnafu { kind: "chunk".to_owned() }.build())?;
            let body = tensor.call(&indices)?;
            self.finish_tensor(node, output, axes, dims, body)?;
        }
        Ok(())
    }

    /// `cat`: a nested index-range selection over the inputs along the cat
    /// dim.
    fn build_cat(&mut self, node: &GraphNode) -> Result<()> {
        let dim = node.dim.ok_or_else(|| ConstantRequiredSnafu { kind: "cat".to_owned(), what: "dim" }.build())?;
        let (_, sizes) = self.out_desc(node, 0)?;
        let (axes, dims) = Self::axes_for(&sizes);

        let body = self.cat_select(node, dim, &axes, 0, 0)?;
        self.finish_tensor(node, 0, axes, dims, body)
    }

    fn cat_select(&self, node: &GraphNode, dim: usize, axes: &[Expr], input: usize, offset: i64) -> Result<Expr> {
        let id = node.inputs[input];
        let ValueDesc::Tensor { sizes, .. } = self.graph.value(id) else {
            return TensorRequiredSnafu { kind: "cat".to_owned() }.fail();
        };
        let extent = sizes[dim];

        let mut indices = axes.to_vec();
        indices[dim] = indices[dim].try_sub(&ExprNode::int(offset as i32))?;
        let tensor = self
            .tensors
            .get(&id)
            .ok_or_else(|| TensorRequiredSnafu { kind: "cat".to_owned() }.build())?;
        let here = tensor.call(&indices)?;

        if input + 1 == node.inputs.len() {
            return Ok(here);
        }
        let in_range = axes[dim].cmp_lt(&ExprNode::int((offset + extent) as i32))?;
        let rest = self.cat_select(node, dim, axes, input + 1, offset + extent)?;
        Ok(ExprNode::if_then_else(&in_range, &here, &rest)?)
    }
}

/// Mixed-type inputs promote to float before arithmetic.
fn promote_inputs(inputs: &mut [Expr]) -> Result<()> {
    if inputs.iter().any(|e| e.dtype().is_float()) {
        for input in inputs.iter_mut() {
            if input.dtype().is_int() {
                *input = ExprNode::cast(Dtype::FLOAT32, input)?;
            }
        }
    }
    Ok(())
}

/// Demote back to the output's declared scalar kind.
fn demote(e: Expr, out_kind: ScalarKind) -> Result<Expr> {
    if e.dtype().kind == out_kind {
        return Ok(e);
    }
    Ok(ExprNode::cast(Dtype::scalar(out_kind), &e)?)
}

fn apply_op(kind: OpKind, inputs: &[Expr]) -> Result<Expr> {
    use fusor_ir::CompareOp;

    let with_alpha = |combine: fn(&Expr, &Expr) -> fusor_ir::Result<Expr>| -> Result<Expr> {
        let rhs = match inputs.get(2) {
            Some(alpha) => inputs[1].try_mul(alpha)?,
            None => inputs[1].clone(),
        };
        Ok(combine(&inputs[0], &rhs)?)
    };

    Ok(match kind {
        OpKind::Add => with_alpha(|l, r| l.try_add(r))?,
        OpKind::Sub => with_alpha(|l, r| l.try_sub(r))?,
        OpKind::Mul => inputs[0].try_mul(&inputs[1])?,
        OpKind::Div => inputs[0].try_div(&inputs[1])?,
        OpKind::Eq => ExprNode::compare_select(CompareOp::Eq, &inputs[0], &inputs[1])?,
        OpKind::Ne => ExprNode::compare_select(CompareOp::Ne, &inputs[0], &inputs[1])?,
        OpKind::Ge => ExprNode::compare_select(CompareOp::Ge, &inputs[0], &inputs[1])?,
        OpKind::Gt => ExprNode::compare_select(CompareOp::Gt, &inputs[0], &inputs[1])?,
        OpKind::Le => ExprNode::compare_select(CompareOp::Le, &inputs[0], &inputs[1])?,
        OpKind::Lt => ExprNode::compare_select(CompareOp::Lt, &inputs[0], &inputs[1])?,
        OpKind::Min => ExprNode::try_min(&inputs[0], &inputs[1], false)?,
        OpKind::Max => ExprNode::try_max(&inputs[0], &inputs[1], false)?,
        OpKind::Clamp => {
            let capped = ExprNode::try_min(&inputs[0], &inputs[2], false)?;
            ExprNode::try_max(&capped, &inputs[1], false)?
        }
        OpKind::Log => ExprNode::log(&inputs[0])?,
        OpKind::Log10 => ExprNode::log10(&inputs[0])?,
        OpKind::Log2 => ExprNode::log2(&inputs[0])?,
        OpKind::Exp => ExprNode::exp(&inputs[0])?,
        OpKind::Expm1 => ExprNode::expm1(&inputs[0])?,
        OpKind::Erf => ExprNode::erf(&inputs[0])?,
        OpKind::Erfc => ExprNode::erfc(&inputs[0])?,
        OpKind::Cos => ExprNode::cos(&inputs[0])?,
        OpKind::Sin => ExprNode::sin(&inputs[0])?,
        OpKind::Tan => ExprNode::tan(&inputs[0])?,
        OpKind::Acos => ExprNode::acos(&inputs[0])?,
        OpKind::Asin => ExprNode::asin(&inputs[0])?,
        OpKind::Atan => ExprNode::atan(&inputs[0])?,
        OpKind::Cosh => ExprNode::cosh(&inputs[0])?,
        OpKind::Sinh => ExprNode::sinh(&inputs[0])?,
        OpKind::Tanh => ExprNode::tanh(&inputs[0])?,
        OpKind::Abs => ExprNode::fabs(&inputs[0])?,
        OpKind::Sqrt => ExprNode::sqrt(&inputs[0])?,
        OpKind::Rsqrt => ExprNode::rsqrt(&inputs[0])?,
        OpKind::Floor => ExprNode::floor(&inputs[0])?,
        OpKind::Ceil => ExprNode::ceil(&inputs[0])?,
        OpKind::Round => ExprNode::round(&inputs[0])?,
        OpKind::Trunc => ExprNode::trunc(&inputs[0])?,
        OpKind::Remainder => ExprNode::remainder(&inputs[0], &inputs[1])?,
        OpKind::Frac => ExprNode::frac(&inputs[0])?,
        OpKind::Lgamma => ExprNode::lgamma(&inputs[0])?,
        OpKind::Pow => ExprNode::pow(&inputs[0], &inputs[1])?,
        OpKind::Fmod => ExprNode::fmod(&inputs[0], &inputs[1])?,
        OpKind::Cat | OpKind::Chunk | OpKind::ListConstruct | OpKind::Constant => {
            return UnsupportedOpSnafu { kind: format!("{kind:?} is not elementwise") }.fail();
        }
    })
}

fn op_name(kind: OpKind) -> &'static str {
    use OpKind::*;
    match kind {
        Add => "aten_add",
        Sub => "aten_sub",
        Mul => "aten_mul",
        Div => "aten_div",
        Eq => "aten_eq",
        Ne => "aten_ne",
        Ge => "aten_ge",
        Gt => "aten_gt",
        Le => "aten_le",
        Lt => "aten_lt",
        Min => "aten_min",
        Max => "aten_max",
        Clamp => "aten_clamp",
        Log => "aten_log",
        Log10 => "aten_log10",
        Log2 => "aten_log2",
        Exp => "aten_exp",
        Expm1 => "aten_expm1",
        Erf => "aten_erf",
        Erfc => "aten_erfc",
        Cos => "aten_cos",
        Sin => "aten_sin",
        Tan => "aten_tan",
        Acos => "aten_acos",
        Asin => "aten_asin",
        Atan => "aten_atan",
        Cosh => "aten_cosh",
        Sinh => "aten_sinh",
        Tanh => "aten_tanh",
        Abs => "aten_abs",
        Sqrt => "aten_sqrt",
        Rsqrt => "aten_rsqrt",
        Floor => "aten_floor",
        Ceil => "aten_ceil",
        Round => "aten_round",
        Trunc => "aten_trunc",
        Remainder => "aten_remainder",
        Frac => "aten_frac",
        Lgamma => "aten_lgamma",
        Pow => "aten_pow",
        Fmod => "aten_fmod",
        Cat => "aten_cat",
        Chunk => "prim_constantchunk",
        ListConstruct => "prim_listconstruct",
        Constant => "prim_constant",
    }
}
