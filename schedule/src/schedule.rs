//! The schedule graph.
//!
//! A [`Schedule`] owns one [`TensorExprNode`] per tensor reachable from its
//! outputs. Each node tracks the tensor's current loop nest, its body and
//! flattened store index (both rewritten by splits), an optional store
//! predicate, and GPU binding metadata. Transformations rewrite nodes in
//! place; their only externally visible effect is the statement produced by
//! [`Schedule::lower`](crate::lower).

use std::collections::HashMap;
use std::rc::Rc;

use fusor_ir::{Expr, ExprKind, ExprNode, ExprOps, Function, IrVisitor, LoopOptions, flatten_index, row_major_strides, substitute, walk_expr};
use snafu::ensure;

use crate::error::*;
use crate::tensor::Tensor;

/// Stable handle to one operation in a schedule. Returned for tails so the
/// caller can keep transforming them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub(crate) usize);

/// One loop axis of an operation's current nest, outermost first.
#[derive(Debug, Clone)]
pub struct LoopAxis {
    pub(crate) var: Expr,
    pub(crate) start: Expr,
    pub(crate) stop: Expr,
    pub(crate) options: LoopOptions,
}

impl LoopAxis {
    fn over(var: Expr, stop: Expr) -> Self {
        Self { var, start: ExprNode::int(0), stop, options: LoopOptions::default() }
    }

    pub fn var(&self) -> &Expr {
        &self.var
    }

    pub fn start(&self) -> &Expr {
        &self.start
    }

    pub fn stop(&self) -> &Expr {
        &self.stop
    }

    pub fn options(&self) -> LoopOptions {
        self.options
    }
}

pub struct TensorExprNode {
    pub(crate) function: Rc<Function>,
    pub(crate) name: String,
    pub(crate) axes: Vec<LoopAxis>,
    pub(crate) body: Expr,
    pub(crate) store_index: Expr,
    pub(crate) predicate: Option<Expr>,
    pub(crate) inlined: bool,
    pub(crate) is_output: bool,
}

impl TensorExprNode {
    fn for_function(function: Rc<Function>, is_output: bool) -> Result<Self> {
        let strides = row_major_strides(function.dims())?;
        let store_index = flatten_index(function.args(), &strides)?;
        let axes = function
            .args()
            .iter()
            .zip(function.dims())
            .map(|(arg, dim)| LoopAxis::over(arg.clone(), dim.clone()))
            .collect();
        let name = function.name().to_owned();
        let body = function.body().clone();
        Ok(Self { function, name, axes, body, store_index, predicate: None, inlined: false, is_output })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn axes(&self) -> &[LoopAxis] {
        &self.axes
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub fn store_index(&self) -> &Expr {
        &self.store_index
    }

    pub fn predicate(&self) -> Option<&Expr> {
        self.predicate.as_ref()
    }

    pub fn is_inlined(&self) -> bool {
        self.inlined
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    fn axis_position(&self, var: &Expr) -> Result<usize> {
        self.axes
            .iter()
            .position(|axis| axis.var.id() == var.id())
            .ok_or_else(|| {
                let name = var.name_hint().unwrap_or("<unnamed>").to_owned();
                AxisNotFoundSnafu { op: self.name.clone(), name }.build()
            })
    }

    fn constant_extent(&self, position: usize) -> Result<i32> {
        let axis = &self.axes[position];
        axis.stop.as_int_imm().ok_or_else(|| {
            let name = axis.var.name_hint().unwrap_or("<unnamed>").to_owned();
            NonConstantExtentSnafu { op: self.name.clone(), name }.build()
        })
    }

    /// Substitute one axis variable through body, store index and predicate.
    fn rewrite_axis_var(&mut self, var: &Expr, image: &Expr) -> Result<()> {
        let mapping = [(var.clone(), image.clone())];
        self.body = substitute(&self.body, &mapping)?;
        self.store_index = substitute(&self.store_index, &mapping)?;
        if let Some(predicate) = &self.predicate {
            self.predicate = Some(substitute(predicate, &mapping)?);
        }
        Ok(())
    }
}

/// Result of [`Schedule::split_with_tail`]. `tail_var`/`tail_op` are absent
/// when the factor divides the extent evenly.
#[derive(Debug)]
pub struct SplitWithTail {
    pub outer: Expr,
    pub inner: Expr,
    pub tail_var: Option<Expr>,
    pub tail_op: Option<OpId>,
}

/// Result of [`Schedule::split_with_mask`].
#[derive(Debug)]
pub struct SplitWithMask {
    pub outer: Expr,
    pub inner: Expr,
}

pub struct Schedule {
    pub(crate) nodes: Vec<TensorExprNode>,
    pub(crate) order: Vec<OpId>,
    by_function: HashMap<u64, OpId>,
}

impl Schedule {
    /// Build a schedule over the given output tensors and every tensor they
    /// reference through calls, dependencies first.
    pub fn new(outputs: &[Tensor]) -> Result<Self> {
        let mut schedule = Self { nodes: Vec::new(), order: Vec::new(), by_function: HashMap::new() };
        for output in outputs {
            schedule.register(output.function(), true)?;
        }
        tracing::debug!(tensors = schedule.nodes.len(), outputs = outputs.len(), "schedule constructed");
        Ok(schedule)
    }

    fn register(&mut self, function: &Rc<Function>, is_output: bool) -> Result<OpId> {
        if let Some(&id) = self.by_function.get(&function.id()) {
            if is_output {
                self.nodes[id.0].is_output = true;
            }
            return Ok(id);
        }
        // Dependencies first, so lowering can emit producers before consumers.
        for callee in called_functions(function.body()) {
            self.register(&callee, false)?;
        }
        let id = OpId(self.nodes.len());
        self.nodes.push(TensorExprNode::for_function(function.clone(), is_output)?);
        self.order.push(id);
        self.by_function.insert(function.id(), id);
        Ok(id)
    }

    /// The schedule node backing a tensor.
    pub fn op(&self, tensor: &Tensor) -> Result<OpId> {
        self.by_function
            .get(&tensor.function().id())
            .copied()
            .ok_or_else(|| UnknownTensorSnafu { name: tensor.name().to_owned() }.build())
    }

    pub fn node(&self, op: OpId) -> &TensorExprNode {
        &self.nodes[op.0]
    }

    pub fn ops(&self) -> impl Iterator<Item = OpId> + '_ {
        self.order.iter().copied()
    }

    fn check_transformable(&self, op: OpId) -> Result<()> {
        let node = &self.nodes[op.0];
        ensure!(!node.inlined, InlinedTensorSnafu { name: node.name.clone() });
        Ok(())
    }

    /// Split axis `var` into an outer loop of extent `⌊N/factor⌋` and an inner
    /// loop of extent `factor`; remaining `N mod factor` iterations go to a
    /// separately returned tail operation.
    pub fn split_with_tail(
        &mut self,
        op: OpId,
        var: &Expr,
        factor: i32,
        factor_on_inner: bool,
    ) -> Result<SplitWithTail> {
        self.check_transformable(op)?;
        ensure!(factor >= 1, BadFactorSnafu { factor });
        let position = self.nodes[op.0].axis_position(var)?;
        let extent = self.nodes[op.0].constant_extent(position)?;
        let size_outer = extent / factor;
        let tail_size = extent % factor;
        let hint = var.name_hint().unwrap_or("v").to_owned();

        // The tail starts from the node state before the main substitution.
        let tail = if tail_size > 0 {
            let tail_var = ExprNode::var(format!("{hint}_tail"), fusor_dtype::Dtype::INT32);
            let tail_base = ExprNode::int(size_outer * factor);
            let combined = tail_base.try_add(&tail_var)?;

            let node = &self.nodes[op.0];
            let mut tail_node = TensorExprNode {
                function: node.function.clone(),
                name: format!("{}_tail", node.name),
                axes: node.axes.clone(),
                body: node.body.clone(),
                store_index: node.store_index.clone(),
                predicate: node.predicate.clone(),
                inlined: false,
                is_output: node.is_output,
            };
            tail_node.axes[position] = LoopAxis::over(tail_var.clone(), ExprNode::int(tail_size));
            tail_node.rewrite_axis_var(var, &combined)?;
            Some((tail_var, tail_node))
        } else {
            None
        };

        let outer = ExprNode::var(format!("{hint}_outer"), fusor_dtype::Dtype::INT32);
        let inner = ExprNode::var(format!("{hint}_inner"), fusor_dtype::Dtype::INT32);
        let combined = if factor_on_inner {
            outer.try_mul(&ExprNode::int(factor))?.try_add(&inner)?
        } else {
            inner.try_mul(&ExprNode::int(size_outer))?.try_add(&outer)?
        };

        let node = &mut self.nodes[op.0];
        node.axes.splice(
            position..=position,
            [LoopAxis::over(outer.clone(), ExprNode::int(size_outer)), LoopAxis::over(inner.clone(), ExprNode::int(factor))],
        );
        node.rewrite_axis_var(var, &combined)?;

        let (tail_var, tail_op) = match tail {
            Some((tail_var, tail_node)) => {
                let id = OpId(self.nodes.len());
                self.nodes.push(tail_node);
                let position_in_order = self.order.iter().position(|&o| o == op).unwrap_or(self.order.len() - 1);
                self.order.insert(position_in_order + 1, id);
                (Some(tail_var), Some(id))
            }
            None => (None, None),
        };

        tracing::debug!(op = %self.nodes[op.0].name, factor, tail = tail_op.is_some(), "split with tail");
        Ok(SplitWithTail { outer, inner, tail_var, tail_op })
    }

    /// Split axis `var` by `factor` without a tail: the outer extent rounds up
    /// and out-of-range iterations are masked out of the store.
    pub fn split_with_mask(
        &mut self,
        op: OpId,
        var: &Expr,
        factor: i32,
        factor_on_inner: bool,
    ) -> Result<SplitWithMask> {
        self.check_transformable(op)?;
        ensure!(factor >= 1, BadFactorSnafu { factor });
        let position = self.nodes[op.0].axis_position(var)?;
        let extent = self.nodes[op.0].constant_extent(position)?;
        let size_outer = (extent + factor - 1) / factor;
        let hint = var.name_hint().unwrap_or("v").to_owned();

        let outer = ExprNode::var(format!("{hint}_outer"), fusor_dtype::Dtype::INT32);
        let inner = ExprNode::var(format!("{hint}_inner"), fusor_dtype::Dtype::INT32);
        let combined = if factor_on_inner {
            outer.try_mul(&ExprNode::int(factor))?.try_add(&inner)?
        } else {
            inner.try_mul(&ExprNode::int(size_outer))?.try_add(&outer)?
        };

        let node = &mut self.nodes[op.0];
        node.axes.splice(
            position..=position,
            [LoopAxis::over(outer.clone(), ExprNode::int(size_outer)), LoopAxis::over(inner.clone(), ExprNode::int(factor))],
        );
        node.rewrite_axis_var(var, &combined)?;

        // Guard only when the split is uneven; an even split covers exactly.
        if extent % factor != 0 {
            let guard = combined.cmp_lt(&ExprNode::int(extent))?;
            node.predicate = Some(match node.predicate.take() {
                Some(existing) => existing.try_and(&guard)?,
                None => guard,
            });
        }

        tracing::debug!(op = %self.nodes[op.0].name, factor, "split with mask");
        Ok(SplitWithMask { outer, inner })
    }

    /// Mark a tensor as computed inline: its body is substituted into consumer
    /// call sites at lowering time and no standalone loop nest is emitted.
    pub fn compute_inline(&mut self, op: OpId) -> Result<()> {
        let node = &mut self.nodes[op.0];
        ensure!(!node.is_output, InlineOutputSnafu { name: node.name.clone() });
        node.inlined = true;
        Ok(())
    }

    /// Bind loop axes to CUDA block/thread indices. List position is the axis
    /// index; one axis index per kernel, and a loop binds at most one of the
    /// two families.
    pub fn gpu_exec_config(&mut self, op: OpId, block_vars: &[Expr], thread_vars: &[Expr]) -> Result<()> {
        self.check_transformable(op)?;
        for (index, var) in block_vars.iter().enumerate() {
            self.bind_axis(op, var, index as u8, true)?;
        }
        for (index, var) in thread_vars.iter().enumerate() {
            self.bind_axis(op, var, index as u8, false)?;
        }
        Ok(())
    }

    fn bind_axis(&mut self, op: OpId, var: &Expr, index: u8, block: bool) -> Result<()> {
        let position = self.nodes[op.0].axis_position(var)?;
        let name = self.nodes[op.0].name.clone();
        // One axis index per realized kernel: a different loop of this op must
        // not carry the same binding already.
        for (i, axis) in self.nodes[op.0].axes.iter().enumerate() {
            if i == position {
                continue;
            }
            let bound = if block { axis.options.gpu_block_index() } else { axis.options.gpu_thread_index() };
            ensure!(bound != Some(index), GpuAxisIndexReusedSnafu { op: name.clone(), index });
        }
        let axis = &mut self.nodes[op.0].axes[position];
        if block {
            axis.options.set_gpu_block_index(index)?;
        } else {
            axis.options.set_gpu_thread_index(index)?;
        }
        Ok(())
    }
}

/// Every distinct function referenced by `Call` nodes under `e`.
fn called_functions(e: &Expr) -> Vec<Rc<Function>> {
    struct Collect {
        seen: Vec<Rc<Function>>,
    }

    impl IrVisitor for Collect {
        fn visit_expr(&mut self, e: &Expr) {
            if let ExprKind::Call { function, .. } = e.kind()
                && !self.seen.iter().any(|f| f.id() == function.id())
            {
                self.seen.push(function.clone());
            }
            walk_expr(self, e);
        }
    }

    let mut collect = Collect { seen: Vec::new() };
    collect.visit_expr(e);
    collect.seen
}
