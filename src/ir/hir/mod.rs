//! Structured input IR.
//!
//! One [`HirModule`] holds the function bodies to lower, already
//! binding-resolved by the front end: every variable reference carries a
//! [`BindingId`] into the owning function's binding table. The lowerer never
//! consults names again except for slot naming and scope-field naming.

pub mod text;

use crate::ir::{BindingId, CallableKind};
use crate::span::Span;

/// A module: an ordered list of function bodies.
#[derive(Debug, Clone, Default)]
pub struct HirModule {
    pub functions: Vec<HirFunction>,
}

/// One function body plus the facts lowering needs about it.
#[derive(Debug, Clone)]
pub struct HirFunction {
    pub name: String,
    pub kind: CallableKind,
    pub is_async: bool,
    pub is_generator: bool,
    /// Parameter bindings, in declaration order.
    pub params: Vec<BindingId>,
    /// Binding table; index = `BindingId.0`. Parameters first.
    pub bindings: Vec<BindingInfo>,
    /// Name of the coroutine state-scope object, when the surrounding
    /// pipeline allocated one. Async rejection and pending-field routing
    /// require it; without one those throw routes degrade to a native throw.
    pub state_scope: Option<String>,
    pub body: Vec<HirStmt>,
}

impl HirFunction {
    pub fn binding_name(&self, id: BindingId) -> &str {
        &self.bindings[id.0 as usize].name
    }

    pub fn binding_repr(&self, id: BindingId) -> BindingRepr {
        self.bindings[id.0 as usize].repr
    }

    /// Resolve a lexical name to a binding in this function's flat scope.
    pub fn lookup(&self, name: &str) -> Option<BindingId> {
        self.bindings
            .iter()
            .position(|b| b.name == name)
            .map(|i| BindingId(i as u32))
    }
}

/// One entry of a function's binding table.
#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub name: String,
    /// Representation proven stable by upstream flow inference; reads of the
    /// binding may stay unboxed in that representation.
    pub repr: BindingRepr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRepr {
    /// No stable representation; reads produce a generic reference.
    Dynamic,
    /// Proven to always hold a number.
    Number,
    /// Proven to always hold a boolean.
    Boolean,
}

// ─── Statements ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum HirStmt {
    /// Source-position marker; lowers to a sequence-point instruction so the
    /// backend can map bytecode offsets back to source. No semantic effect.
    SequencePoint(Span),
    VarDecl {
        binding: BindingId,
        init: Option<HirExpr>,
    },
    /// Expression evaluated for side effects; result discarded.
    Expr(HirExpr),
    Return(Option<HirExpr>),
    If {
        test: HirExpr,
        consequent: Vec<HirStmt>,
        alternate: Option<Vec<HirStmt>>,
    },
    While {
        test: HirExpr,
        body: Vec<HirStmt>,
    },
    DoWhile {
        body: Vec<HirStmt>,
        test: HirExpr,
    },
    For {
        init: Option<Box<HirStmt>>,
        test: Option<HirExpr>,
        update: Option<HirExpr>,
        body: Vec<HirStmt>,
    },
    Block(Vec<HirStmt>),
    Labeled {
        name: String,
        body: Box<HirStmt>,
    },
    Break {
        label: Option<String>,
    },
    Continue {
        label: Option<String>,
    },
    Throw(HirExpr),
    Try {
        try_block: Vec<HirStmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<HirStmt>>,
    },
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    /// `catch (e)` binds the exception; a bare `catch` does not.
    pub binding: Option<BindingId>,
    pub body: Vec<HirStmt>,
}

// ─── Expressions ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum HirExpr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Var(BindingId),
    Assign {
        target: BindingId,
        value: Box<HirExpr>,
    },
    Binary {
        op: BinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    Unary {
        op: UnOp,
        operand: Box<HirExpr>,
    },
    Call {
        callee: Box<HirExpr>,
        args: Vec<HirExpr>,
    },
    /// `f?.(args)` — evaluates to undefined without calling when the callee
    /// is null or undefined.
    OptionalCall {
        callee: Box<HirExpr>,
        args: Vec<HirExpr>,
    },
    Await(Box<HirExpr>),
    Yield {
        /// `yield` with no argument yields undefined.
        argument: Option<Box<HirExpr>>,
        /// `yield*` delegates to another generator.
        delegate: bool,
    },
    /// Dynamic `import(specifier)`.
    Import(Box<HirExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    EqStrict,
    NeStrict,
}

impl BinOp {
    pub fn from_symbol(sym: &str) -> Option<BinOp> {
        Some(match sym {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Rem,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "===" => BinOp::EqStrict,
            "!==" => BinOp::NeStrict,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Logical not: truthiness test + invert.
    Not,
    /// Numeric negation.
    Neg,
}

impl UnOp {
    pub fn from_symbol(sym: &str) -> Option<UnOp> {
        Some(match sym {
            "!" => UnOp::Not,
            "neg" => UnOp::Neg,
            _ => return None,
        })
    }
}
