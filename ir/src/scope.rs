//! Scoped ownership of IR nodes.
//!
//! Every node built by the constructors in this crate is registered with the
//! innermost live [`KernelScope`] on the current thread. Dropping an anonymous
//! scope releases all nodes registered while it was innermost in one step; a
//! scope bound to a caller-owned [`KernelArena`] hands the nodes to that arena
//! instead, so a compiled kernel can keep its IR alive across calls and
//! re-enter the scope later.
//!
//! Handles that escape their defining scope are kept alive by `Rc` (safe
//! Rust), but the contract is that they must not be used after their arena
//! dies.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::expr::Expr;
use crate::function::Function;
use crate::stmt::Stmt;

#[derive(Default)]
struct ScopeFrame {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    functions: Vec<Rc<Function>>,
}

impl ScopeFrame {
    fn len(&self) -> usize {
        self.exprs.len() + self.stmts.len() + self.functions.len()
    }
}

// Thread-local scope stack and id counter.
//
// Cell/RefCell keep the arena single-threaded by construction; two compiles on
// different threads use independent stacks and cannot share IR.
thread_local! {
    static SCOPES: RefCell<Vec<Rc<RefCell<ScopeFrame>>>> = RefCell::new(Vec::new());
    static NODE_ID: Cell<u64> = const { Cell::new(0) };
}

/// Monotonic per-thread node id. Never reused, so id-keyed maps are safe
/// across rewrites.
pub(crate) fn next_node_id() -> u64 {
    NODE_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    })
}

fn with_innermost<R>(f: impl FnOnce(&mut ScopeFrame) -> R) -> R {
    SCOPES.with(|scopes| {
        let scopes = scopes.borrow();
        let frame = scopes.last().expect("IR node constructed outside of a KernelScope");
        let mut frame = frame.borrow_mut();
        f(&mut frame)
    })
}

pub(crate) fn register_expr(e: &Expr) {
    with_innermost(|frame| frame.exprs.push(e.clone()));
}

pub(crate) fn register_stmt(s: &Stmt) {
    with_innermost(|frame| frame.stmts.push(s.clone()));
}

pub(crate) fn register_function(f: &Rc<Function>) {
    with_innermost(|frame| frame.functions.push(f.clone()));
}

/// A caller-owned region of IR nodes.
///
/// Bind it with [`KernelScope::bind`] to collect every node built while the
/// scope is innermost; the nodes live until the arena is dropped. One compile
/// artifact typically owns one arena and re-binds it for each pipeline step.
#[derive(Default)]
pub struct KernelArena {
    frame: Rc<RefCell<ScopeFrame>>,
    // !Send + !Sync: the scope stack is thread-local.
    _not_send: PhantomData<*const ()>,
}

impl KernelArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes owned by this arena.
    pub fn node_count(&self) -> usize {
        self.frame.borrow().len()
    }
}

/// RAII guard for one arena scope.
///
/// ```
/// use fusor_ir::KernelScope;
///
/// let scope = KernelScope::new();
/// // ... build IR ...
/// drop(scope); // releases every node built above
/// ```
#[derive(Debug)]
pub struct KernelScope {
    depth: usize,
    // !Send + !Sync: the scope stack is thread-local.
    _not_send: PhantomData<*const ()>,
}

impl KernelScope {
    /// Enter a scope over a fresh anonymous arena; leaving the scope drops
    /// every node built inside it.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::push(Rc::new(RefCell::new(ScopeFrame::default())))
    }

    /// Enter a scope that registers nodes into `arena`; the nodes survive the
    /// scope and die with the arena.
    pub fn bind(arena: &KernelArena) -> Self {
        Self::push(arena.frame.clone())
    }

    fn push(frame: Rc<RefCell<ScopeFrame>>) -> Self {
        let depth = SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            scopes.push(frame);
            scopes.len()
        });
        tracing::trace!(depth, "entered kernel scope");
        Self { depth, _not_send: PhantomData }
    }

    /// True when any scope is live on this thread.
    pub fn is_active() -> bool {
        SCOPES.with(|scopes| !scopes.borrow().is_empty())
    }

    /// Number of nodes owned by the innermost scope. Zero when none is live.
    pub fn live_node_count() -> usize {
        SCOPES.with(|scopes| scopes.borrow().last().map(|f| f.borrow().len()).unwrap_or(0))
    }
}

impl Drop for KernelScope {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            assert_eq!(scopes.len(), self.depth, "kernel scopes must be dropped innermost-first");
            let frame = scopes.pop().expect("scope stack underflow");
            tracing::trace!(depth = self.depth, nodes = frame.borrow().len(), "left kernel scope");
        });
    }
}
