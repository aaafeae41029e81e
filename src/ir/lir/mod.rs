//! Flat output IR.
//!
//! A [`MethodBody`] is one lowered function: a linear instruction sequence
//! over integer labels, temporaries, and persistent slots, plus the tables
//! the bytecode emitter needs to finalize it (temp storage descriptors,
//! slot table, suspension metadata, exception regions, return epilogue).
//! Instructions are immutable once appended; labels are forward-referencing
//! and resolved to offsets downstream.

use std::fmt;

use crate::ir::{CallableKind, LabelId, SlotId, StateId, TempId, ValueStorage};
use crate::span::Span;

// ─── Instructions ─────────────────────────────────────────────────

/// Comparison selector for the compare instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn mnemonic(&self) -> &'static str {
        match self {
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
        }
    }
}

/// Reject route carried by an await instruction: where resumption delivers
/// a failed awaited operation when an async catch handler is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectRoute {
    /// Resume state of the enclosing catch handler.
    pub state: StateId,
    /// Scope field that receives the exception value before resumption.
    pub pending_field: String,
}

/// A single LIR instruction.
#[derive(Debug, Clone)]
pub enum LirInst {
    // ── Constants ──
    ConstNumber { value: f64, dest: TempId },
    ConstString { value: String, dest: TempId },
    ConstBoolean { value: bool, dest: TempId },
    ConstNull { dest: TempId },
    ConstUndefined { dest: TempId },

    // ── Moves and coercions ──
    CopyTemp { src: TempId, dest: TempId },
    /// Box an unboxed value into a heap cell.
    ConvertToObject { src: TempId, dest: TempId },
    ConvertToNumber { src: TempId, dest: TempId },
    ConvertToBoolean { src: TempId, dest: TempId },
    /// Truthiness test producing a native boolean.
    IsTruthy { src: TempId, dest: TempId },

    // ── Arithmetic and logic ──
    AddNumber { left: TempId, right: TempId, dest: TempId },
    SubNumber { left: TempId, right: TempId, dest: TempId },
    MulNumber { left: TempId, right: TempId, dest: TempId },
    DivNumber { left: TempId, right: TempId, dest: TempId },
    RemNumber { left: TempId, right: TempId, dest: TempId },
    NegNumber { src: TempId, dest: TempId },
    ConcatStrings { left: TempId, right: TempId, dest: TempId },
    /// Dynamically-typed `+` on boxed operands; result is boxed.
    AddDynamic { left: TempId, right: TempId, dest: TempId },
    CompareNumber { op: CmpOp, left: TempId, right: TempId, dest: TempId },
    CompareBoolean { op: CmpOp, left: TempId, right: TempId, dest: TempId },
    CompareDynamic { op: CmpOp, left: TempId, right: TempId, dest: TempId },
    LogicalNot { src: TempId, dest: TempId },
    IsUndefined { src: TempId, dest: TempId },
    IsNull { src: TempId, dest: TempId },

    // ── Control flow ──
    Label(LabelId),
    Branch(LabelId),
    BranchIfTrue { cond: TempId, target: LabelId },
    BranchIfFalse { cond: TempId, target: LabelId },
    /// Structured exit: runs every finally region between here and the
    /// target, unlike a plain branch.
    Leave(LabelId),
    /// Closes a finally handler region.
    EndFinally,
    Return { value: TempId },
    Throw { value: TempId },

    // ── Parameters and scope fields ──
    LoadParameter { index: u32, dest: TempId },
    StoreParameter { index: u32, value: TempId },
    LoadScopeField { scope: String, field: String, dest: TempId },
    StoreScopeField { scope: String, field: String, value: TempId },

    // ── Calls ──
    Call { callee: TempId, args: Vec<TempId>, dest: TempId },
    CallMethod { receiver: TempId, method: String, args: Vec<TempId>, dest: TempId },
    /// Dynamic `import(specifier)`; `module_id` identifies the importing
    /// module for the loader.
    CallImport { specifier: TempId, module_id: TempId, dest: TempId },

    // ── Iteration (yield* delegation) ──
    /// Obtain a generator/iterator object from an arbitrary iterable.
    GetIterator { src: TempId, dest: TempId },
    GetProperty { object: TempId, key: TempId, dest: TempId },

    // ── Exceptions ──
    /// At catch entry: capture the in-flight exception object.
    StoreException { dest: TempId },
    /// Extract the thrown JS value from a host exception wrapper.
    UnwrapException { src: TempId, dest: TempId },
    /// Reject the async function's result directly with a value.
    AsyncReject { value: TempId },

    // ── Suspension ──
    Await {
        value: TempId,
        await_id: u32,
        state: StateId,
        resume: LabelId,
        dest: TempId,
        reject: Option<RejectRoute>,
    },
    Yield {
        value: TempId,
        state: StateId,
        resume: LabelId,
        dest: TempId,
        /// When false, resume-delivered throw/return completions are not
        /// handled at the yield site; explicit routing code follows instead.
        handles_throw_return: bool,
    },
    /// Generator entry dispatch: jump to the arm matching the stored resume
    /// state, falling through to `fallthrough` for initial entry (state 0).
    GeneratorStateSwitch {
        arms: Vec<(StateId, LabelId)>,
        fallthrough: LabelId,
    },

    // ── Source mapping ──
    SequencePoint { span: Span },
}

impl fmt::Display for LirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LirInst::*;
        match self {
            ConstNumber { value, dest } => write!(f, "{} = const.number {}", dest, value),
            ConstString { value, dest } => write!(f, "{} = const.string {:?}", dest, value),
            ConstBoolean { value, dest } => write!(f, "{} = const.boolean {}", dest, value),
            ConstNull { dest } => write!(f, "{} = const.null", dest),
            ConstUndefined { dest } => write!(f, "{} = const.undefined", dest),

            CopyTemp { src, dest } => write!(f, "{} = copy {}", dest, src),
            ConvertToObject { src, dest } => write!(f, "{} = to_object {}", dest, src),
            ConvertToNumber { src, dest } => write!(f, "{} = to_number {}", dest, src),
            ConvertToBoolean { src, dest } => write!(f, "{} = to_boolean {}", dest, src),
            IsTruthy { src, dest } => write!(f, "{} = is_truthy {}", dest, src),

            AddNumber { left, right, dest } => write!(f, "{} = add.number {}, {}", dest, left, right),
            SubNumber { left, right, dest } => write!(f, "{} = sub.number {}, {}", dest, left, right),
            MulNumber { left, right, dest } => write!(f, "{} = mul.number {}, {}", dest, left, right),
            DivNumber { left, right, dest } => write!(f, "{} = div.number {}, {}", dest, left, right),
            RemNumber { left, right, dest } => write!(f, "{} = rem.number {}, {}", dest, left, right),
            NegNumber { src, dest } => write!(f, "{} = neg.number {}", dest, src),
            ConcatStrings { left, right, dest } => write!(f, "{} = concat {}, {}", dest, left, right),
            AddDynamic { left, right, dest } => write!(f, "{} = add.dynamic {}, {}", dest, left, right),
            CompareNumber { op, left, right, dest } => {
                write!(f, "{} = cmp.{}.number {}, {}", dest, op.mnemonic(), left, right)
            }
            CompareBoolean { op, left, right, dest } => {
                write!(f, "{} = cmp.{}.boolean {}, {}", dest, op.mnemonic(), left, right)
            }
            CompareDynamic { op, left, right, dest } => {
                write!(f, "{} = cmp.{}.dynamic {}, {}", dest, op.mnemonic(), left, right)
            }
            LogicalNot { src, dest } => write!(f, "{} = not {}", dest, src),
            IsUndefined { src, dest } => write!(f, "{} = is_undefined {}", dest, src),
            IsNull { src, dest } => write!(f, "{} = is_null {}", dest, src),

            Label(l) => write!(f, "{}:", l),
            Branch(l) => write!(f, "branch {}", l),
            BranchIfTrue { cond, target } => write!(f, "branch.true {} -> {}", cond, target),
            BranchIfFalse { cond, target } => write!(f, "branch.false {} -> {}", cond, target),
            Leave(l) => write!(f, "leave {}", l),
            EndFinally => write!(f, "end.finally"),
            Return { value } => write!(f, "return {}", value),
            Throw { value } => write!(f, "throw {}", value),

            LoadParameter { index, dest } => write!(f, "{} = param {}", dest, index),
            StoreParameter { index, value } => write!(f, "param.store {}, {}", index, value),
            LoadScopeField { scope, field, dest } => {
                write!(f, "{} = scope.load {}.{}", dest, scope, field)
            }
            StoreScopeField { scope, field, value } => {
                write!(f, "scope.store {}.{}, {}", scope, field, value)
            }

            Call { callee, args, dest } => {
                write!(f, "{} = call {}(", dest, callee)?;
                write_temp_list(f, args)?;
                write!(f, ")")
            }
            CallMethod { receiver, method, args, dest } => {
                write!(f, "{} = call.method {}.{}(", dest, receiver, method)?;
                write_temp_list(f, args)?;
                write!(f, ")")
            }
            CallImport { specifier, module_id, dest } => {
                write!(f, "{} = import {}, module {}", dest, specifier, module_id)
            }

            GetIterator { src, dest } => write!(f, "{} = get_iterator {}", dest, src),
            GetProperty { object, key, dest } => write!(f, "{} = get_prop {}[{}]", dest, object, key),

            StoreException { dest } => write!(f, "{} = catch.exception", dest),
            UnwrapException { src, dest } => write!(f, "{} = unwrap.exception {}", dest, src),
            AsyncReject { value } => write!(f, "async.reject {}", value),

            Await { value, await_id, state, resume, dest, reject } => {
                write!(
                    f,
                    "{} = await {}, id {}, state {}, resume {}",
                    dest, value, await_id, state, resume
                )?;
                if let Some(route) = reject {
                    write!(f, ", reject state {} via {}", route.state, route.pending_field)?;
                }
                Ok(())
            }
            Yield { value, state, resume, dest, handles_throw_return } => {
                write!(f, "{} = yield {}, state {}, resume {}", dest, value, state, resume)?;
                if !handles_throw_return {
                    write!(f, ", routed")?;
                }
                Ok(())
            }
            GeneratorStateSwitch { arms, fallthrough } => {
                write!(f, "switch.state [")?;
                for (i, (state, label)) in arms.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", state, label)?;
                }
                write!(f, "] else {}", fallthrough)
            }

            SequencePoint { span } => write!(f, "seq.point {}..{}", span.start, span.end),
        }
    }
}

fn write_temp_list(f: &mut fmt::Formatter<'_>, temps: &[TempId]) -> fmt::Result {
    for (i, t) in temps.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", t)?;
    }
    Ok(())
}

// ─── Suspension metadata ──────────────────────────────────────────

/// One await suspend point.
#[derive(Debug, Clone)]
pub struct AwaitPoint {
    pub await_id: u32,
    pub state: StateId,
    pub resume: LabelId,
    pub result: TempId,
}

/// One yield suspend point.
#[derive(Debug, Clone)]
pub struct YieldPoint {
    pub state: StateId,
    pub resume: LabelId,
    pub result: TempId,
}

/// Async-half suspension metadata. Resume-state ids live in their own
/// namespace starting at 1; state 0 is initial entry.
#[derive(Debug, Clone)]
pub struct AsyncInfo {
    /// Whether the pre-pass found any await in the body. Decides throw
    /// routing before the first await instruction is reached.
    pub has_awaits: bool,
    pub await_points: Vec<AwaitPoint>,
    /// Resume-state id -> label, in allocation order.
    pub resume_labels: Vec<(StateId, LabelId)>,
    next_await_id: u32,
    next_state: u32,
}

impl AsyncInfo {
    pub fn new(has_awaits: bool) -> Self {
        Self {
            has_awaits,
            await_points: Vec::new(),
            resume_labels: Vec::new(),
            next_await_id: 0,
            next_state: 1,
        }
    }

    pub fn allocate_await_id(&mut self) -> u32 {
        let id = self.next_await_id;
        self.next_await_id += 1;
        id
    }

    pub fn allocate_state(&mut self) -> StateId {
        let id = StateId(self.next_state);
        self.next_state += 1;
        id
    }

    pub fn register_resume_label(&mut self, state: StateId, label: LabelId) {
        self.resume_labels.push((state, label));
    }

    pub fn resume_label(&self, state: StateId) -> Option<LabelId> {
        self.resume_labels
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, l)| *l)
    }
}

/// Generator-half suspension metadata. A separate resume-state namespace
/// from [`AsyncInfo`], also starting at 1; a combined async generator needs
/// a later stage to merge the two before building entry dispatch.
#[derive(Debug, Clone)]
pub struct GeneratorInfo {
    pub yield_points: Vec<YieldPoint>,
    /// Resume-state id -> label, in allocation order.
    pub resume_labels: Vec<(StateId, LabelId)>,
    next_state: u32,
}

impl GeneratorInfo {
    pub fn new() -> Self {
        Self {
            yield_points: Vec::new(),
            resume_labels: Vec::new(),
            next_state: 1,
        }
    }

    pub fn allocate_state(&mut self) -> StateId {
        let id = StateId(self.next_state);
        self.next_state += 1;
        id
    }

    pub fn register_resume_label(&mut self, state: StateId, label: LabelId) {
        self.resume_labels.push((state, label));
    }

    pub fn resume_label(&self, state: StateId) -> Option<LabelId> {
        self.resume_labels
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, l)| *l)
    }
}

impl Default for GeneratorInfo {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Exception regions ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Catch,
    Finally,
}

/// A protected region record for the backend's exception table.
#[derive(Debug, Clone)]
pub struct ExceptionRegion {
    pub kind: RegionKind,
    pub protected_start: LabelId,
    pub protected_end: LabelId,
    pub handler_start: LabelId,
    pub handler_end: LabelId,
}

// ─── Return epilogue ──────────────────────────────────────────────

/// Shared return-epilogue record. The lowerer allocates the label at the
/// first protected try and the slot at the first routed return; the backend
/// emits the actual reload-and-return block when `needs_block` is set.
#[derive(Debug, Clone)]
pub struct ReturnEpilogue {
    pub label: LabelId,
    pub slot: Option<SlotId>,
    pub needs_block: bool,
}

// ─── Slots ────────────────────────────────────────────────────────

/// One entry of the persistent slot table.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub name: String,
    pub storage: ValueStorage,
}

// ─── Method body ──────────────────────────────────────────────────

/// One lowered function body: the sole interface handed to the bytecode
/// emitter. Every label resolves against `instructions`; every temporary
/// indexes `temps`/`temp_slots`; every slot indexes `slots`.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub name: String,
    pub kind: CallableKind,
    pub is_async: bool,
    pub is_generator: bool,
    /// Coroutine state-scope object name, when the pipeline allocated one.
    pub state_scope: Option<String>,
    pub instructions: Vec<LirInst>,
    /// Storage descriptor per temporary; index = `TempId.0`.
    pub temps: Vec<ValueStorage>,
    /// Pinned slot per temporary; index = `TempId.0`.
    pub temp_slots: Vec<Option<SlotId>>,
    /// Slot table; index = `SlotId.0`.
    pub slots: Vec<SlotInfo>,
    pub async_info: Option<AsyncInfo>,
    pub generator_info: Option<GeneratorInfo>,
    pub exception_regions: Vec<ExceptionRegion>,
    pub return_epilogue: Option<ReturnEpilogue>,
    /// Number of labels allocated; the backend sizes its offset table by it.
    pub label_count: u32,
}

impl MethodBody {
    /// Render the instruction listing, one instruction per line, labels
    /// outdented. The integration tests and the CLI both read this form.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for inst in &self.instructions {
            match inst {
                LirInst::Label(_) => {
                    out.push_str(&format!("{}\n", inst));
                }
                _ => {
                    out.push_str(&format!("  {}\n", inst));
                }
            }
        }
        out
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {} ({})", self.name, self.kind.label())?;
        if self.is_async {
            write!(f, " async")?;
        }
        if self.is_generator {
            write!(f, " generator")?;
        }
        writeln!(f)?;
        write!(f, "{}", self.listing())
    }
}
