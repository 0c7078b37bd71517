use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Malformed IR encountered while generating code.
    #[snafu(context(false), display("{source}"))]
    Ir { source: fusor_ir::Error },

    /// A codegen parameter must be a handle variable (buffer) or scalar variable.
    #[snafu(display("{context} requires a {expected} variable"))]
    BadParameter { context: &'static str, expected: &'static str },

    /// Number of call arguments must match the parameter list.
    #[snafu(display("expected {expected} call arguments, got {actual}"))]
    ArgumentCountMismatch { expected: usize, actual: usize },

    /// Call argument kind does not match the declared parameter.
    #[snafu(display("argument {index} does not match parameter {name}: expected {expected}"))]
    ArgumentMismatch { index: usize, name: String, expected: &'static str },

    /// A load/store met a buffer that was never bound or allocated.
    #[snafu(display("missing buffer binding for {name}"))]
    MissingBufferBinding { name: String },

    /// Allocate over a live buffer.
    #[snafu(display("buffer {name} is already allocated"))]
    DoubleAllocate { name: String },

    /// Free of a never-allocated buffer.
    #[snafu(display("buffer {name} is not currently allocated"))]
    FreeUnallocated { name: String },

    /// Loop and let variables shadow nothing: re-binding a live variable is an
    /// evaluation error.
    #[snafu(display("variable {name} is already bound in the enclosing context"))]
    VarAlreadyBound { name: String },

    /// An expression referenced a variable with no binding.
    #[snafu(display("variable {name} is not bound"))]
    UndefinedVar { name: String },

    /// Integer division or remainder by zero.
    #[snafu(display("integer division by zero"))]
    DivisionByZero,

    /// The intrinsic has no executable semantics in this backend.
    #[snafu(display("intrinsic {op:?} is not supported by this backend"))]
    UnsupportedIntrinsic { op: fusor_ir::IntrinsicOp },

    /// A value had the wrong scalar kind for the operation.
    #[snafu(display("invalid value kind in {context}"))]
    InvalidValueKind { context: &'static str },

    /// Tensor calls must be inlined or lowered before code generation.
    #[snafu(display("call to {name} reached codegen; lower the schedule first"))]
    UnloweredCall { name: String },

    /// The CUDA emitter is scalar; vector lanes never reach it.
    #[snafu(display("{what} with {lanes} lanes is not supported by the CUDA emitter"))]
    CudaLanesUnsupported { what: &'static str, lanes: u32 },

    /// CUDA local allocations need a statically known size.
    #[snafu(display("allocation of {name} needs a constant size for CUDA emission"))]
    CudaDynamicAllocation { name: String },

    /// LLVM JIT compilation failure.
    #[cfg(feature = "llvm")]
    #[snafu(display("jit compilation failed: {reason}"))]
    JitCompilation { reason: String },

    /// LLVM API failure while emitting.
    #[cfg(feature = "llvm")]
    #[snafu(display("llvm error: {reason}"))]
    Llvm { reason: String },
}
