//! Intermediate representations of the lowering tier.
//!
//! `hir` is the structured input: statements and expressions mirroring
//! source syntax, with resolved bindings. `lir` is the flat output: a linear
//! instruction sequence over labels, branches, temporaries, and persistent
//! slots, directly emittable as bytecode. `lower` converts one to the other,
//! one independent session per function body.

pub mod hir;
pub mod lir;
pub mod lower;

use std::fmt;

// ─── Identifiers ──────────────────────────────────────────────────

/// A transient value, produced by exactly one instruction before first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempId(pub u32);

/// A position in the instruction stream. Forward references are legal; the
/// backend resolves labels to offsets when it finalizes the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelId(pub u32);

/// A durable storage location that survives suspension and resumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

/// A resolved variable binding, issued by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingId(pub u32);

/// A resume-state identifier for suspend-point dispatch.
/// State 0 is initial entry and is never allocated to a suspend point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub u32);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Value storage ────────────────────────────────────────────────

/// How a temporary's value is physically represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Not yet defined. Reading a temporary in this state is a bug in the
    /// lowerer, not an input error.
    Unknown,
    /// A heap reference.
    Reference,
    /// A raw machine value (number or boolean) living in a register/stack.
    Unboxed,
    /// A machine value boxed into a heap cell so it can cross a suspend
    /// boundary or feed a dynamically-typed operation.
    Boxed,
}

/// The semantic type carried alongside the storage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsType {
    /// The fully dynamic type; anything a reference can point at.
    Any,
    Number,
    Boolean,
    String,
    Null,
    /// A caught exception object.
    Error,
}

/// Storage descriptor for one temporary: kind + semantic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueStorage {
    pub kind: StorageKind,
    pub ty: JsType,
}

impl ValueStorage {
    pub const UNKNOWN: ValueStorage = ValueStorage {
        kind: StorageKind::Unknown,
        ty: JsType::Any,
    };

    pub fn reference(ty: JsType) -> Self {
        Self {
            kind: StorageKind::Reference,
            ty,
        }
    }

    pub fn unboxed(ty: JsType) -> Self {
        Self {
            kind: StorageKind::Unboxed,
            ty,
        }
    }

    pub fn boxed(ty: JsType) -> Self {
        Self {
            kind: StorageKind::Boxed,
            ty,
        }
    }

    /// The default dynamic representation: a reference of unknown shape.
    pub fn object() -> Self {
        Self::reference(JsType::Any)
    }

    pub fn is_defined(&self) -> bool {
        self.kind != StorageKind::Unknown
    }

    /// True for a raw machine boolean, the only representation branch
    /// instructions consume without a truthiness coercion.
    pub fn is_native_bool(&self) -> bool {
        self.kind == StorageKind::Unboxed && self.ty == JsType::Boolean
    }
}

impl fmt::Display for ValueStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            StorageKind::Unknown => "unknown",
            StorageKind::Reference => "ref",
            StorageKind::Unboxed => "unboxed",
            StorageKind::Boxed => "boxed",
        };
        let ty = match self.ty {
            JsType::Any => "any",
            JsType::Number => "number",
            JsType::Boolean => "boolean",
            JsType::String => "string",
            JsType::Null => "null",
            JsType::Error => "error",
        };
        write!(f, "{}:{}", kind, ty)
    }
}

// ─── Callables ────────────────────────────────────────────────────

/// The kind of callable a function body belongs to. Keys the metrics table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    /// Top-level module/script body.
    Script,
    Function,
    Arrow,
    Method,
}

impl CallableKind {
    pub fn label(&self) -> &'static str {
        match self {
            CallableKind::Script => "script",
            CallableKind::Function => "function",
            CallableKind::Arrow => "arrow",
            CallableKind::Method => "method",
        }
    }
}
