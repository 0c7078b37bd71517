//! LLVM JIT backend.
//!
//! Emits an `i32 kernel(i8** args)` function where `args[i]` is the i-th
//! buffer base pointer (scalars are passed by pointer), JIT-compiles it and
//! captures the entry address. Vector lanes map to LLVM vector types; masked
//! accesses branch per lane; min/max pick the `minnum`/`maxnum` or
//! `minimum`/`maximum` intrinsic family off the NaN-propagation flag.

use std::collections::HashMap;
use std::mem::ManuallyDrop;

use fusor_dtype::{Dtype, ScalarKind};
use fusor_ir::{BinaryOp, CompareOp, Expr, ExprKind, IntrinsicOp, Stmt, StmtKind};
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate, OptimizationLevel};
use snafu::ensure;

use crate::error::*;
use crate::types::{BufferArg, CallArg, CodeGen, check_args};

/// JIT-compiled kernel.
///
/// The context is heap-allocated for a stable address; module and engine
/// borrow it with an erased lifetime and are dropped first.
pub struct LlvmCodeGen {
    #[allow(dead_code)]
    context: Box<Context>,
    module: ManuallyDrop<Module<'static>>,
    engine: ManuallyDrop<ExecutionEngine<'static>>,
    stmt: Stmt,
    params: Vec<BufferArg>,
    fn_ptr: *const u8,
}

const ENTRY_POINT: &str = "kernel";

impl LlvmCodeGen {
    pub fn new(stmt: &Stmt, params: &[BufferArg]) -> Result<Self> {
        let context = Box::new(Context::create());
        // SAFETY: the context is boxed (stable address) and outlives module
        // and engine; Drop releases them first.
        let ctx: &'static Context = unsafe { &*(context.as_ref() as *const Context) };

        let module = ctx.create_module("fusor");
        let builder = ctx.create_builder();
        Emitter::new(ctx, &module, &builder, params)?.emit(stmt)?;

        module.verify().map_err(|e| JitCompilationSnafu { reason: e.to_string() }.build())?;
        tracing::debug!(ir = %module.print_to_string().to_string(), "llvm module emitted");

        let engine = module
            .create_jit_execution_engine(OptimizationLevel::Default)
            .map_err(|e| JitCompilationSnafu { reason: e.to_string() }.build())?;
        let fn_ptr = engine
            .get_function_address(ENTRY_POINT)
            .map_err(|e| JitCompilationSnafu { reason: e.to_string() }.build())? as *const u8;

        Ok(Self {
            context,
            module: ManuallyDrop::new(module),
            engine: ManuallyDrop::new(engine),
            stmt: stmt.clone(),
            params: params.to_vec(),
            fn_ptr,
        })
    }
}

impl Drop for LlvmCodeGen {
    fn drop(&mut self) {
        // Engine, then module, then the boxed context.
        unsafe {
            ManuallyDrop::drop(&mut self.engine);
            ManuallyDrop::drop(&mut self.module);
        }
    }
}

impl CodeGen for LlvmCodeGen {
    fn stmt(&self) -> &Stmt {
        &self.stmt
    }

    fn params(&self) -> &[BufferArg] {
        &self.params
    }

    fn call(&mut self, args: &[CallArg]) -> Result<()> {
        check_args(&self.params, args)?;

        // Scalars live in fixed slots so their addresses stay valid across the
        // call; buffers pass straight through.
        let mut scalar_slots = vec![0i64; args.len()];
        for (slot, arg) in scalar_slots.iter_mut().zip(args) {
            match arg {
                CallArg::Int(v) => *slot = *v as i64,
                CallArg::Float(v) => *slot = v.to_bits() as i64,
                CallArg::Buffer(_) => {}
            }
        }
        let raw: Vec<*mut u8> = args
            .iter()
            .zip(scalar_slots.iter_mut())
            .map(|(arg, slot)| match arg {
                CallArg::Buffer(ptr) => *ptr,
                CallArg::Int(_) | CallArg::Float(_) => (slot as *mut i64).cast(),
            })
            .collect();

        type KernelFn = unsafe extern "C" fn(*const *mut u8) -> i32;
        let status = unsafe {
            let f: KernelFn = std::mem::transmute(self.fn_ptr);
            f(raw.as_ptr())
        };
        ensure!(status == 0, JitCompilationSnafu { reason: format!("kernel returned {status}") });
        Ok(())
    }
}

fn llvm_err(e: impl std::fmt::Display) -> Error {
    LlvmSnafu { reason: e.to_string() }.build()
}

struct Emitter<'a, 'ctx> {
    ctx: &'ctx Context,
    module: &'a Module<'ctx>,
    builder: &'a Builder<'ctx>,
    function: FunctionValue<'ctx>,
    scalars: HashMap<u64, BasicValueEnum<'ctx>>,
    buffers: HashMap<u64, PointerValue<'ctx>>,
}

impl<'a, 'ctx> Emitter<'a, 'ctx> {
    fn new(
        ctx: &'ctx Context,
        module: &'a Module<'ctx>,
        builder: &'a Builder<'ctx>,
        params: &[BufferArg],
    ) -> Result<Self> {
        let ptr_ty = ctx.ptr_type(AddressSpace::default());
        let fn_ty = ctx.i32_type().fn_type(&[ptr_ty.into()], false);
        let function = module.add_function(ENTRY_POINT, fn_ty, None);
        let entry = ctx.append_basic_block(function, "entry");
        builder.position_at_end(entry);

        let mut emitter = Self { ctx, module, builder, function, scalars: HashMap::new(), buffers: HashMap::new() };

        let args_ptr = function.get_first_param().expect("kernel takes the args array").into_pointer_value();
        for (i, param) in params.iter().enumerate() {
            let name = param.name_hint();
            let slot = unsafe {
                builder
                    .build_gep(ptr_ty, args_ptr, &[ctx.i64_type().const_int(i as u64, false)], &format!("{name}_slot"))
                    .map_err(llvm_err)?
            };
            let raw = builder.build_load(ptr_ty, slot, name).map_err(llvm_err)?.into_pointer_value();
            if param.is_var() {
                let scalar_ty = emitter.basic_type(param.dtype());
                let value = builder.build_load(scalar_ty, raw, name).map_err(llvm_err)?;
                emitter.scalars.insert(param.var().id(), value);
            } else {
                emitter.buffers.insert(param.var().id(), raw);
            }
        }
        Ok(emitter)
    }

    fn emit(mut self, stmt: &Stmt) -> Result<()> {
        self.emit_stmt(stmt)?;
        self.builder.build_return(Some(&self.ctx.i32_type().const_zero())).map_err(llvm_err)?;
        Ok(())
    }

    fn basic_type(&self, dtype: Dtype) -> BasicTypeEnum<'ctx> {
        let scalar: BasicTypeEnum = match dtype.kind {
            ScalarKind::Int32 => self.ctx.i32_type().into(),
            ScalarKind::Float32 => self.ctx.f32_type().into(),
            ScalarKind::Handle => self.ctx.ptr_type(AddressSpace::default()).into(),
        };
        if dtype.lanes == 1 { scalar } else { vector_of(scalar, dtype.lanes) }
    }

    fn buffer_ptr(&self, base: &Expr) -> Result<PointerValue<'ctx>> {
        self.buffers
            .get(&base.id())
            .copied()
            .ok_or_else(|| MissingBufferBindingSnafu { name: base.name_hint().unwrap_or("<unnamed>").to_owned() }.build())
    }

    fn emit_expr(&mut self, e: &Expr) -> Result<BasicValueEnum<'ctx>> {
        match e.kind() {
            ExprKind::IntImm(v) => Ok(self.ctx.i32_type().const_int(*v as i64 as u64, true).into()),
            ExprKind::FloatImm(v) => Ok(self.ctx.f32_type().const_float(*v as f64).into()),
            ExprKind::Var { .. } => self
                .scalars
                .get(&e.id())
                .copied()
                .ok_or_else(|| UndefinedVarSnafu { name: e.name_hint().unwrap_or("<unnamed>").to_owned() }.build()),
            ExprKind::Cast { src } => {
                let value = self.emit_expr(src)?;
                self.emit_cast(value, src.dtype(), e.dtype())
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.emit_expr(lhs)?;
                let r = self.emit_expr(rhs)?;
                self.emit_binary(*op, e.dtype(), l, r)
            }
            ExprKind::Min { lhs, rhs, propagate_nans } => {
                let l = self.emit_expr(lhs)?;
                let r = self.emit_expr(rhs)?;
                self.emit_min_max(e.dtype(), l, r, *propagate_nans, false)
            }
            ExprKind::Max { lhs, rhs, propagate_nans } => {
                let l = self.emit_expr(lhs)?;
                let r = self.emit_expr(rhs)?;
                self.emit_min_max(e.dtype(), l, r, *propagate_nans, true)
            }
            ExprKind::CompareSelect { op, lhs, rhs, true_value, false_value } => {
                let cmp = {
                    let l = self.emit_expr(lhs)?;
                    let r = self.emit_expr(rhs)?;
                    self.emit_compare(*op, lhs.dtype(), l, r)?
                };
                let t = self.emit_expr(true_value)?;
                let f = self.emit_expr(false_value)?;
                self.build_select_any(cmp, t, f, "cmpsel")
            }
            ExprKind::Let { var, value, body } => {
                let value = self.emit_expr(value)?;
                self.scalars.insert(var.id(), value);
                let result = self.emit_expr(body);
                self.scalars.remove(&var.id());
                result
            }
            ExprKind::Ramp { base, stride, lanes } => {
                let is_float = e.dtype().kind.is_float();
                let base = self.emit_expr(base)?;
                let stride = self.emit_expr(stride)?;
                let elem_ty = self.basic_type(e.dtype().scalar_of());
                let vec_ty = vector_of(elem_ty, *lanes);
                let mut acc: BasicValueEnum = vec_ty.const_zero().into();
                for i in 0..*lanes {
                    let lane_index = self.ctx.i32_type().const_int(i as u64, false);
                    let value: BasicValueEnum = if is_float {
                        let step = self.ctx.f32_type().const_float(i as f64);
                        let scaled =
                            self.builder.build_float_mul(step, stride.into_float_value(), "ramp_step").map_err(llvm_err)?;
                        self.builder.build_float_add(base.into_float_value(), scaled, "ramp_v").map_err(llvm_err)?.into()
                    } else {
                        let step = self.ctx.i32_type().const_int(i as u64, false);
                        let scaled =
                            self.builder.build_int_mul(step, stride.into_int_value(), "ramp_step").map_err(llvm_err)?;
                        self.builder.build_int_add(base.into_int_value(), scaled, "ramp_v").map_err(llvm_err)?.into()
                    };
                    acc = self
                        .builder
                        .build_insert_element(acc.into_vector_value(), value, lane_index, "ramp")
                        .map_err(llvm_err)?
                        .into();
                }
                Ok(acc)
            }
            ExprKind::Broadcast { value, lanes } => {
                let value = self.emit_expr(value)?;
                let elem_ty = self.basic_type(e.dtype().scalar_of());
                let vec_ty = vector_of(elem_ty, *lanes);
                let mut acc: BasicValueEnum = vec_ty.const_zero().into();
                for i in 0..*lanes {
                    acc = self
                        .builder
                        .build_insert_element(
                            acc.into_vector_value(),
                            value,
                            self.ctx.i32_type().const_int(i as u64, false),
                            "splat",
                        )
                        .map_err(llvm_err)?
                        .into();
                }
                Ok(acc)
            }
            ExprKind::IfThenElse { condition, true_value, false_value } => {
                // Branching keeps the unevaluated arm lazy, matching the
                // interpreter.
                let cond = self.emit_expr(condition)?.into_int_value();
                let flag = self
                    .builder
                    .build_int_compare(IntPredicate::NE, cond, self.ctx.i32_type().const_zero(), "ite_cond")
                    .map_err(llvm_err)?;
                let then_bb = self.ctx.append_basic_block(self.function, "ite_then");
                let else_bb = self.ctx.append_basic_block(self.function, "ite_else");
                let merge_bb = self.ctx.append_basic_block(self.function, "ite_merge");
                self.builder.build_conditional_branch(flag, then_bb, else_bb).map_err(llvm_err)?;

                self.builder.position_at_end(then_bb);
                let t = self.emit_expr(true_value)?;
                let then_end = self.current_block();
                self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;

                self.builder.position_at_end(else_bb);
                let f = self.emit_expr(false_value)?;
                let else_end = self.current_block();
                self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;

                self.builder.position_at_end(merge_bb);
                let phi = self.builder.build_phi(self.basic_type(e.dtype()), "ite").map_err(llvm_err)?;
                phi.add_incoming(&[(&t, then_end), (&f, else_end)]);
                Ok(phi.as_basic_value())
            }
            ExprKind::Load { base, index, mask } => {
                let ptr = self.buffer_ptr(base)?;
                let index = self.emit_expr(index)?;
                let masked = !mask.is_const_one_mask();
                let mask = if masked { Some(self.emit_expr(mask)?) } else { None };
                self.emit_load(ptr, e.dtype(), index, mask)
            }
            ExprKind::Intrinsic { op, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.emit_expr(arg)?);
                }
                self.emit_intrinsic(*op, e.dtype(), &values)
            }
            ExprKind::Call { function, .. } => UnloweredCallSnafu { name: function.name().to_owned() }.fail(),
        }
    }

    fn current_block(&self) -> BasicBlock<'ctx> {
        self.builder.get_insert_block().expect("builder is positioned")
    }

    fn emit_cast(&mut self, value: BasicValueEnum<'ctx>, from: Dtype, to: Dtype) -> Result<BasicValueEnum<'ctx>> {
        match (from.kind, to.kind) {
            (ScalarKind::Int32, ScalarKind::Float32) => {
                let target = self.basic_type(to);
                if to.lanes == 1 {
                    self.builder
                        .build_signed_int_to_float(value.into_int_value(), target.into_float_type(), "sitofp")
                        .map(Into::into)
                        .map_err(llvm_err)
                } else {
                    self.builder
                        .build_signed_int_to_float(value.into_vector_value(), target.into_vector_type(), "sitofp")
                        .map(Into::into)
                        .map_err(llvm_err)
                }
            }
            (ScalarKind::Float32, ScalarKind::Int32) => {
                let target = self.basic_type(to);
                if to.lanes == 1 {
                    self.builder
                        .build_float_to_signed_int(value.into_float_value(), target.into_int_type(), "fptosi")
                        .map(Into::into)
                        .map_err(llvm_err)
                } else {
                    self.builder
                        .build_float_to_signed_int(value.into_vector_value(), target.into_vector_type(), "fptosi")
                        .map(Into::into)
                        .map_err(llvm_err)
                }
            }
            _ => Ok(value),
        }
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        dtype: Dtype,
        l: BasicValueEnum<'ctx>,
        r: BasicValueEnum<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>> {
        let vector = dtype.lanes > 1;
        if dtype.kind.is_float() {
            macro_rules! fop {
                ($method:ident) => {
                    if vector {
                        self.builder
                            .$method(l.into_vector_value(), r.into_vector_value(), "fbin")
                            .map(Into::into)
                            .map_err(llvm_err)
                    } else {
                        self.builder
                            .$method(l.into_float_value(), r.into_float_value(), "fbin")
                            .map(Into::into)
                            .map_err(llvm_err)
                    }
                };
            }
            match op {
                BinaryOp::Add => fop!(build_float_add),
                BinaryOp::Sub => fop!(build_float_sub),
                BinaryOp::Mul => fop!(build_float_mul),
                BinaryOp::Div => fop!(build_float_div),
                BinaryOp::Mod => fop!(build_float_rem),
                _ => InvalidValueKindSnafu { context: "bitwise on float" }.fail(),
            }
        } else {
            macro_rules! iop {
                ($method:ident) => {
                    if vector {
                        self.builder
                            .$method(l.into_vector_value(), r.into_vector_value(), "ibin")
                            .map(Into::into)
                            .map_err(llvm_err)
                    } else {
                        self.builder
                            .$method(l.into_int_value(), r.into_int_value(), "ibin")
                            .map(Into::into)
                            .map_err(llvm_err)
                    }
                };
            }
            match op {
                BinaryOp::Add => iop!(build_int_add),
                BinaryOp::Sub => iop!(build_int_sub),
                BinaryOp::Mul => iop!(build_int_mul),
                BinaryOp::Div => iop!(build_int_signed_div),
                BinaryOp::Mod => iop!(build_int_signed_rem),
                BinaryOp::And => iop!(build_and),
                BinaryOp::Xor => iop!(build_xor),
                BinaryOp::Lshift => iop!(build_left_shift),
                BinaryOp::Rshift => {
                    if vector {
                        self.builder
                            .build_right_shift(l.into_vector_value(), r.into_vector_value(), true, "ibin")
                            .map(Into::into)
                            .map_err(llvm_err)
                    } else {
                        self.builder
                            .build_right_shift(l.into_int_value(), r.into_int_value(), true, "ibin")
                            .map(Into::into)
                            .map_err(llvm_err)
                    }
                }
            }
        }
    }

    fn emit_min_max(
        &mut self,
        dtype: Dtype,
        l: BasicValueEnum<'ctx>,
        r: BasicValueEnum<'ctx>,
        propagate_nans: bool,
        is_max: bool,
    ) -> Result<BasicValueEnum<'ctx>> {
        if dtype.kind.is_float() {
            // "num" intrinsics drop a single NaN; "minimum"/"maximum"
            // propagate any NaN.
            let name = match (is_max, propagate_nans) {
                (true, false) => "llvm.maxnum",
                (false, false) => "llvm.minnum",
                (true, true) => "llvm.maximum",
                (false, true) => "llvm.minimum",
            };
            self.call_llvm_intrinsic(name, &[l, r], self.basic_type(dtype))
        } else {
            let pred = if is_max { IntPredicate::SGT } else { IntPredicate::SLT };
            let cmp: BasicValueEnum = if dtype.lanes > 1 {
                self.builder
                    .build_int_compare(pred, l.into_vector_value(), r.into_vector_value(), "mm_cmp")
                    .map_err(llvm_err)?
                    .into()
            } else {
                self.builder
                    .build_int_compare(pred, l.into_int_value(), r.into_int_value(), "mm_cmp")
                    .map_err(llvm_err)?
                    .into()
            };
            self.build_select_any(cmp, l, r, "mm")
        }
    }

    fn build_select_any(
        &mut self,
        cmp: BasicValueEnum<'ctx>,
        t: BasicValueEnum<'ctx>,
        f: BasicValueEnum<'ctx>,
        name: &str,
    ) -> Result<BasicValueEnum<'ctx>> {
        if cmp.is_vector_value() {
            self.builder.build_select(cmp.into_vector_value(), t, f, name).map_err(llvm_err)
        } else {
            self.builder.build_select(cmp.into_int_value(), t, f, name).map_err(llvm_err)
        }
    }

    /// `i1` for scalar operands, `<n x i1>` for vector operands.
    fn emit_compare(
        &mut self,
        op: CompareOp,
        operand_dtype: Dtype,
        l: BasicValueEnum<'ctx>,
        r: BasicValueEnum<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>> {
        let vector = operand_dtype.lanes > 1;
        if operand_dtype.kind.is_float() {
            let pred = match op {
                CompareOp::Eq => FloatPredicate::OEQ,
                CompareOp::Ne => FloatPredicate::UNE,
                CompareOp::Lt => FloatPredicate::OLT,
                CompareOp::Le => FloatPredicate::OLE,
                CompareOp::Gt => FloatPredicate::OGT,
                CompareOp::Ge => FloatPredicate::OGE,
            };
            if vector {
                self.builder
                    .build_float_compare(pred, l.into_vector_value(), r.into_vector_value(), "fcmp")
                    .map(Into::into)
                    .map_err(llvm_err)
            } else {
                self.builder
                    .build_float_compare(pred, l.into_float_value(), r.into_float_value(), "fcmp")
                    .map(Into::into)
                    .map_err(llvm_err)
            }
        } else {
            let pred = match op {
                CompareOp::Eq => IntPredicate::EQ,
                CompareOp::Ne => IntPredicate::NE,
                CompareOp::Lt => IntPredicate::SLT,
                CompareOp::Le => IntPredicate::SLE,
                CompareOp::Gt => IntPredicate::SGT,
                CompareOp::Ge => IntPredicate::SGE,
            };
            if vector {
                self.builder
                    .build_int_compare(pred, l.into_vector_value(), r.into_vector_value(), "icmp")
                    .map(Into::into)
                    .map_err(llvm_err)
            } else {
                self.builder
                    .build_int_compare(pred, l.into_int_value(), r.into_int_value(), "icmp")
                    .map(Into::into)
                    .map_err(llvm_err)
            }
        }
    }

    fn call_llvm_intrinsic(
        &mut self,
        name: &str,
        args: &[BasicValueEnum<'ctx>],
        ty: BasicTypeEnum<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>> {
        use inkwell::intrinsics::Intrinsic;
        let intrinsic =
            Intrinsic::find(name).ok_or_else(|| LlvmSnafu { reason: format!("intrinsic {name} not found") }.build())?;
        let declaration = intrinsic
            .get_declaration(self.module, &[ty])
            .ok_or_else(|| LlvmSnafu { reason: format!("no declaration for {name}") }.build())?;
        let call = self
            .builder
            .build_call(declaration, &args.iter().map(|v| (*v).into()).collect::<Vec<_>>(), name)
            .map_err(llvm_err)?;
        call.try_as_basic_value()
            .left()
            .ok_or_else(|| LlvmSnafu { reason: format!("{name} returned no value") }.build())
    }

    /// Transcendentals go through libm symbols resolved by the JIT; vectors
    /// are scalarized lane by lane. `rsqrt` and `frac` have no libm symbol
    /// and are composed from `sqrtf`/`truncf`.
    fn emit_intrinsic(
        &mut self,
        op: IntrinsicOp,
        dtype: Dtype,
        args: &[BasicValueEnum<'ctx>],
    ) -> Result<BasicValueEnum<'ctx>> {
        if dtype.lanes == 1 {
            return self.scalar_intrinsic(op, args);
        }

        let vec_ty = vector_of(self.basic_type(dtype.scalar_of()), dtype.lanes);
        let mut acc: BasicValueEnum = vec_ty.const_zero().into();
        for i in 0..dtype.lanes {
            let lane_index = self.ctx.i32_type().const_int(i as u64, false);
            let mut lane_args = Vec::with_capacity(args.len());
            for arg in args {
                let lane = self
                    .builder
                    .build_extract_element(arg.into_vector_value(), lane_index, "lane")
                    .map_err(llvm_err)?;
                lane_args.push(lane);
            }
            let value = self.scalar_intrinsic(op, &lane_args)?;
            acc = self
                .builder
                .build_insert_element(acc.into_vector_value(), value, lane_index, "lane_out")
                .map_err(llvm_err)?
                .into();
        }
        Ok(acc)
    }

    fn scalar_intrinsic(&mut self, op: IntrinsicOp, args: &[BasicValueEnum<'ctx>]) -> Result<BasicValueEnum<'ctx>> {
        match op {
            IntrinsicOp::Rsqrt => {
                let sqrt = self.call_libm("sqrtf", args)?;
                let one = self.ctx.f32_type().const_float(1.0);
                self.builder.build_float_div(one, sqrt.into_float_value(), "rsqrt").map(Into::into).map_err(llvm_err)
            }
            IntrinsicOp::Frac => {
                let trunc = self.call_libm("truncf", args)?;
                self.builder
                    .build_float_sub(args[0].into_float_value(), trunc.into_float_value(), "frac")
                    .map(Into::into)
                    .map_err(llvm_err)
            }
            _ => {
                let symbol = libm_symbol(op).ok_or_else(|| UnsupportedIntrinsicSnafu { op }.build())?;
                self.call_libm(symbol, args)
            }
        }
    }

    fn call_libm(&mut self, symbol: &str, args: &[BasicValueEnum<'ctx>]) -> Result<BasicValueEnum<'ctx>> {
        let f32_ty = self.ctx.f32_type();
        let declaration = match self.module.get_function(symbol) {
            Some(f) => f,
            None => {
                let arg_types: Vec<BasicMetadataTypeEnum> = vec![f32_ty.into(); args.len()];
                let fn_ty = f32_ty.fn_type(&arg_types, false);
                self.module.add_function(symbol, fn_ty, None)
            }
        };
        let call = self
            .builder
            .build_call(declaration, &args.iter().map(|v| (*v).into()).collect::<Vec<_>>(), symbol)
            .map_err(llvm_err)?;
        call.try_as_basic_value()
            .left()
            .ok_or_else(|| LlvmSnafu { reason: format!("{symbol} returned no value") }.build())
    }

    fn emit_load(
        &mut self,
        base: PointerValue<'ctx>,
        dtype: Dtype,
        index: BasicValueEnum<'ctx>,
        mask: Option<BasicValueEnum<'ctx>>,
    ) -> Result<BasicValueEnum<'ctx>> {
        let elem_ty = self.basic_type(dtype.scalar_of());
        if dtype.lanes == 1 {
            return match mask {
                None => self.load_scalar(base, elem_ty, index.into_int_value()),
                Some(mask) => self.masked_scalar_load(base, elem_ty, index.into_int_value(), mask.into_int_value()),
            };
        }

        let vec_ty = vector_of(elem_ty, dtype.lanes);
        let mut acc: BasicValueEnum = vec_ty.const_zero().into();
        for i in 0..dtype.lanes {
            let lane_index = self.ctx.i32_type().const_int(i as u64, false);
            let idx = self
                .builder
                .build_extract_element(index.into_vector_value(), lane_index, "idx_lane")
                .map_err(llvm_err)?
                .into_int_value();
            let value = match &mask {
                None => self.load_scalar(base, elem_ty, idx)?,
                Some(mask) => {
                    let m = self
                        .builder
                        .build_extract_element(mask.into_vector_value(), lane_index, "mask_lane")
                        .map_err(llvm_err)?
                        .into_int_value();
                    self.masked_scalar_load(base, elem_ty, idx, m)?
                }
            };
            acc = self
                .builder
                .build_insert_element(acc.into_vector_value(), value, lane_index, "load_lane")
                .map_err(llvm_err)?
                .into();
        }
        Ok(acc)
    }

    fn load_scalar(
        &mut self,
        base: PointerValue<'ctx>,
        elem_ty: BasicTypeEnum<'ctx>,
        index: IntValue<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>> {
        let ptr = unsafe { self.builder.build_gep(elem_ty, base, &[index], "elem").map_err(llvm_err)? };
        self.builder.build_load(elem_ty, ptr, "load").map_err(llvm_err)
    }

    /// Per-lane predication: branch around the access so masked-off lanes
    /// never touch memory; they produce the zero default.
    fn masked_scalar_load(
        &mut self,
        base: PointerValue<'ctx>,
        elem_ty: BasicTypeEnum<'ctx>,
        index: IntValue<'ctx>,
        mask: IntValue<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>> {
        let flag = self
            .builder
            .build_int_compare(IntPredicate::NE, mask, self.ctx.i32_type().const_zero(), "mask_on")
            .map_err(llvm_err)?;
        let load_bb = self.ctx.append_basic_block(self.function, "mload");
        let merge_bb = self.ctx.append_basic_block(self.function, "mload_merge");
        let pred_bb = self.current_block();
        self.builder.build_conditional_branch(flag, load_bb, merge_bb).map_err(llvm_err)?;

        self.builder.position_at_end(load_bb);
        let loaded = self.load_scalar(base, elem_ty, index)?;
        let load_end = self.current_block();
        self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;

        self.builder.position_at_end(merge_bb);
        let phi = self.builder.build_phi(elem_ty, "mload_v").map_err(llvm_err)?;
        let zero = elem_ty.const_zero();
        phi.add_incoming(&[(&loaded, load_end), (&zero, pred_bb)]);
        Ok(phi.as_basic_value())
    }

    fn emit_store(
        &mut self,
        base: PointerValue<'ctx>,
        dtype: Dtype,
        index: BasicValueEnum<'ctx>,
        value: BasicValueEnum<'ctx>,
        mask: Option<BasicValueEnum<'ctx>>,
    ) -> Result<()> {
        let elem_ty = self.basic_type(dtype.scalar_of());
        if dtype.lanes == 1 {
            return match mask {
                None => self.store_scalar(base, elem_ty, index.into_int_value(), value),
                Some(mask) => {
                    self.masked_scalar_store(base, elem_ty, index.into_int_value(), value, mask.into_int_value())
                }
            };
        }

        for i in 0..dtype.lanes {
            let lane_index = self.ctx.i32_type().const_int(i as u64, false);
            let idx = self
                .builder
                .build_extract_element(index.into_vector_value(), lane_index, "sidx")
                .map_err(llvm_err)?
                .into_int_value();
            let lane_value =
                self.builder.build_extract_element(value.into_vector_value(), lane_index, "sval").map_err(llvm_err)?;
            match &mask {
                None => self.store_scalar(base, elem_ty, idx, lane_value)?,
                Some(mask) => {
                    let m = self
                        .builder
                        .build_extract_element(mask.into_vector_value(), lane_index, "smask")
                        .map_err(llvm_err)?
                        .into_int_value();
                    self.masked_scalar_store(base, elem_ty, idx, lane_value, m)?;
                }
            }
        }
        Ok(())
    }

    fn store_scalar(
        &mut self,
        base: PointerValue<'ctx>,
        elem_ty: BasicTypeEnum<'ctx>,
        index: IntValue<'ctx>,
        value: BasicValueEnum<'ctx>,
    ) -> Result<()> {
        let ptr = unsafe { self.builder.build_gep(elem_ty, base, &[index], "selem").map_err(llvm_err)? };
        self.builder.build_store(ptr, value).map_err(llvm_err)?;
        Ok(())
    }

    fn masked_scalar_store(
        &mut self,
        base: PointerValue<'ctx>,
        elem_ty: BasicTypeEnum<'ctx>,
        index: IntValue<'ctx>,
        value: BasicValueEnum<'ctx>,
        mask: IntValue<'ctx>,
    ) -> Result<()> {
        let flag = self
            .builder
            .build_int_compare(IntPredicate::NE, mask, self.ctx.i32_type().const_zero(), "smask_on")
            .map_err(llvm_err)?;
        let store_bb = self.ctx.append_basic_block(self.function, "mstore");
        let merge_bb = self.ctx.append_basic_block(self.function, "mstore_merge");
        self.builder.build_conditional_branch(flag, store_bb, merge_bb).map_err(llvm_err)?;

        self.builder.position_at_end(store_bb);
        self.store_scalar(base, elem_ty, index, value)?;
        self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;

        self.builder.position_at_end(merge_bb);
        Ok(())
    }

    fn emit_stmt(&mut self, s: &Stmt) -> Result<()> {
        match s.kind() {
            StmtKind::LetStmt { var, value, body } => {
                let value = self.emit_expr(value)?;
                self.scalars.insert(var.id(), value);
                let result = self.emit_stmt(body);
                self.scalars.remove(&var.id());
                result
            }
            StmtKind::Block { stmts } => {
                for stmt in stmts {
                    self.emit_stmt(stmt)?;
                }
                Ok(())
            }
            StmtKind::For { var, start, stop, body, .. } => {
                let start = self.emit_expr(start)?.into_int_value();
                let stop = self.emit_expr(stop)?.into_int_value();

                let preheader = self.current_block();
                let header = self.ctx.append_basic_block(self.function, "loop_header");
                let body_bb = self.ctx.append_basic_block(self.function, "loop_body");
                let exit = self.ctx.append_basic_block(self.function, "loop_exit");
                self.builder.build_unconditional_branch(header).map_err(llvm_err)?;

                self.builder.position_at_end(header);
                let phi = self.builder.build_phi(self.ctx.i32_type(), "i").map_err(llvm_err)?;
                phi.add_incoming(&[(&start, preheader)]);
                let counter = phi.as_basic_value().into_int_value();
                let cond =
                    self.builder.build_int_compare(IntPredicate::SLT, counter, stop, "loop_cond").map_err(llvm_err)?;
                self.builder.build_conditional_branch(cond, body_bb, exit).map_err(llvm_err)?;

                self.builder.position_at_end(body_bb);
                self.scalars.insert(var.id(), counter.into());
                self.emit_stmt(body)?;
                self.scalars.remove(&var.id());
                let next = self
                    .builder
                    .build_int_add(counter, self.ctx.i32_type().const_int(1, false), "i_next")
                    .map_err(llvm_err)?;
                let latch = self.current_block();
                phi.add_incoming(&[(&next, latch)]);
                self.builder.build_unconditional_branch(header).map_err(llvm_err)?;

                self.builder.position_at_end(exit);
                Ok(())
            }
            StmtKind::Store { base, index, value, mask } => {
                let ptr = self.buffer_ptr(base)?;
                let index = self.emit_expr(index)?;
                let dtype = value.dtype();
                let value = self.emit_expr(value)?;
                let mask = if mask.is_const_one_mask() { None } else { Some(self.emit_expr(mask)?) };
                self.emit_store(ptr, dtype, index, value, mask)
            }
            StmtKind::Allocate { var, dtype, dims } => {
                let elem_ty = self.basic_type(dtype.scalar_of());
                let mut count = self.ctx.i32_type().const_int(dtype.lanes as u64, false);
                for dim in dims {
                    let extent = self.emit_expr(dim)?.into_int_value();
                    count = self.builder.build_int_mul(count, extent, "alloc_n").map_err(llvm_err)?;
                }
                let ptr = self
                    .builder
                    .build_array_alloca(elem_ty, count, var.name_hint().unwrap_or("tmp"))
                    .map_err(llvm_err)?;
                self.buffers.insert(var.id(), ptr);
                Ok(())
            }
            StmtKind::Free { var } => {
                // Allocas are frame-owned; freeing just ends the binding.
                self.buffers.remove(&var.id());
                Ok(())
            }
            StmtKind::Cond { condition, true_stmt, false_stmt } => {
                let cond = self.emit_expr(condition)?.into_int_value();
                let flag = self
                    .builder
                    .build_int_compare(IntPredicate::NE, cond, self.ctx.i32_type().const_zero(), "cond")
                    .map_err(llvm_err)?;
                let then_bb = self.ctx.append_basic_block(self.function, "then");
                let else_bb = self.ctx.append_basic_block(self.function, "else");
                let merge_bb = self.ctx.append_basic_block(self.function, "merge");
                self.builder.build_conditional_branch(flag, then_bb, else_bb).map_err(llvm_err)?;

                self.builder.position_at_end(then_bb);
                if let Some(t) = true_stmt {
                    self.emit_stmt(t)?;
                }
                self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;

                self.builder.position_at_end(else_bb);
                if let Some(f) = false_stmt {
                    self.emit_stmt(f)?;
                }
                self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;

                self.builder.position_at_end(merge_bb);
                Ok(())
            }
        }
    }
}

fn vector_of(scalar: BasicTypeEnum<'_>, lanes: u32) -> BasicTypeEnum<'_> {
    match scalar {
        BasicTypeEnum::IntType(t) => t.vec_type(lanes).into(),
        BasicTypeEnum::FloatType(t) => t.vec_type(lanes).into(),
        other => other,
    }
}

fn libm_symbol(op: IntrinsicOp) -> Option<&'static str> {
    Some(match op {
        IntrinsicOp::Sin => "sinf",
        IntrinsicOp::Cos => "cosf",
        IntrinsicOp::Tan => "tanf",
        IntrinsicOp::Asin => "asinf",
        IntrinsicOp::Acos => "acosf",
        IntrinsicOp::Atan => "atanf",
        IntrinsicOp::Atan2 => "atan2f",
        IntrinsicOp::Sinh => "sinhf",
        IntrinsicOp::Cosh => "coshf",
        IntrinsicOp::Tanh => "tanhf",
        IntrinsicOp::Exp => "expf",
        IntrinsicOp::Expm1 => "expm1f",
        IntrinsicOp::Fabs => "fabsf",
        IntrinsicOp::Log => "logf",
        IntrinsicOp::Log2 => "log2f",
        IntrinsicOp::Log10 => "log10f",
        IntrinsicOp::Log1p => "log1pf",
        IntrinsicOp::Erf => "erff",
        IntrinsicOp::Erfc => "erfcf",
        IntrinsicOp::Sqrt => "sqrtf",
        IntrinsicOp::Pow => "powf",
        IntrinsicOp::Ceil => "ceilf",
        IntrinsicOp::Floor => "floorf",
        IntrinsicOp::Round => "roundf",
        IntrinsicOp::Trunc => "truncf",
        IntrinsicOp::Fmod => "fmodf",
        IntrinsicOp::Remainder => "remainderf",
        IntrinsicOp::Lgamma => "lgammaf",
        IntrinsicOp::Rsqrt | IntrinsicOp::Frac | IntrinsicOp::Rand => return None,
    })
}
