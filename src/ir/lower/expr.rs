//! Expression lowering: literals, variable access, assignment, operators,
//! calls, and dynamic import.
//!
//! Instruction selection is storage-directed. Operands carry a
//! [`ValueStorage`] descriptor; each operator picks its native form when the
//! storages allow it and falls back to a dynamic (boxed) form otherwise.
//! A small flow-sensitive refinement pass remembers, per binding, the last
//! temporary proven to hold the binding's value as an unboxed number so hot
//! numeric code does not re-coerce on every read.

use crate::ir::hir::{BinOp, BindingRepr, UnOp};
use crate::ir::lir::{CmpOp, LirInst};
use crate::ir::{BindingId, JsType, SlotId, StorageKind, TempId, ValueStorage};

use super::{HirExpr, Lowered, Lowerer};

impl Lowerer<'_> {
    pub(super) fn lower_expr(&mut self, expr: &HirExpr) -> Lowered<TempId> {
        match expr {
            HirExpr::Number(value) => Ok(self.const_number(*value)),
            HirExpr::Str(value) => Ok(self.const_string(value)),
            HirExpr::Bool(value) => Ok(self.const_boolean(*value)),
            HirExpr::Null => Ok(self.const_null()),
            HirExpr::Undefined => Ok(self.const_undefined()),
            HirExpr::Var(binding) => self.lower_variable(*binding),
            HirExpr::Assign { target, value } => self.lower_assign(*target, value),
            HirExpr::Binary { op, left, right } => self.lower_binary(*op, left, right),
            HirExpr::Unary { op, operand } => self.lower_unary(*op, operand),
            HirExpr::Call { callee, args } => match self.lower_call(callee, args) {
                Ok(result) => Ok(result),
                Err(failed) => {
                    self.note_failure_if_unset("HIR->LIR: failed lowering call expression");
                    Err(failed)
                }
            },
            HirExpr::OptionalCall { callee, args } => self.lower_optional_call(callee, args),
            HirExpr::Await(operand) => self.lower_await(operand),
            HirExpr::Yield { argument, delegate } => {
                self.lower_yield(argument.as_deref(), *delegate)
            }
            HirExpr::Import(specifier) => self.lower_import(specifier),
        }
    }

    /// Lower an expression in statement position, dropping its value.
    pub(super) fn lower_expr_discard(&mut self, expr: &HirExpr) -> Lowered<()> {
        self.lower_expr(expr)?;
        Ok(())
    }

    fn const_null(&mut self) -> TempId {
        let dest = self.create_temp();
        self.emit(LirInst::ConstNull { dest });
        // Literal null is an unboxed sentinel; it must never force an
        // object-typed binding's slot into an unboxed representation, which
        // is why slot storage derives from the binding, not the value.
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Null));
        dest
    }

    // ─── Variable access ──────────────────────────────────────────

    fn lower_variable(&mut self, binding: BindingId) -> Lowered<TempId> {
        match self.read_binding(binding) {
            Some(temp) => Ok(temp),
            None => {
                let name = self.func.binding_name(binding).to_string();
                self.fail_if_unset(format!("HIR->LIR: no storage for variable '{}'", name))
            }
        }
    }

    /// Binding read without the failure channel, for callers with their own
    /// fallback.
    fn read_binding(&mut self, binding: BindingId) -> Option<TempId> {
        if let Some(&refined) = self.numeric_refinements.get(&binding) {
            return Some(refined);
        }

        // Parameter reads reload the argument slot every time; a reassigned
        // parameter is stored back through it, so reads stay current across
        // loop back-edges.
        if let Some(&index) = self.param_index.get(&binding) {
            let dest = self.create_temp();
            self.emit(LirInst::LoadParameter { index, dest });
            self.define_temp_storage(dest, ValueStorage::object());
            if self.numeric_refinements_enabled() {
                self.temp_binding_origin.insert(dest, binding);
            }
            return Some(dest);
        }

        // Local reads are value lookups, no load instruction: the last
        // stored temporary is pinned to the binding's slot, so the backend
        // resolves it there.
        if let Some(&temp) = self.variable_map.get(&binding) {
            if self.numeric_refinements_enabled() {
                self.temp_binding_origin.insert(temp, binding);
            }
            return Some(temp);
        }

        None
    }

    fn lower_assign(&mut self, target: BindingId, value: &HirExpr) -> Lowered<TempId> {
        let value_temp = self.lower_expr(value)?;
        self.store_to_binding(target, value_temp)
    }

    /// Store a value into a binding and return the temporary the binding now
    /// reads as.
    pub(super) fn store_to_binding(
        &mut self,
        binding: BindingId,
        value: TempId,
    ) -> Lowered<TempId> {
        if let Some(&index) = self.param_index.get(&binding) {
            let boxed = self.ensure_object(value);
            self.emit(LirInst::StoreParameter { index, value: boxed });
            self.invalidate_numeric_refinement(binding, value);
            return Ok(boxed);
        }

        // Slot storage derives from the binding's declared representation,
        // never from the RHS temp storage.
        let slot_value = match self.func.binding_repr(binding) {
            BindingRepr::Number => self.ensure_number(value),
            BindingRepr::Boolean => self.ensure_boolean(value),
            BindingRepr::Dynamic => self.ensure_object(value),
        };
        let slot = self.get_or_create_binding_slot(binding);
        let slot_value = self.coerce_to_slot_storage(slot, slot_value);

        // Locals are not SSA across back-edges: every assignment must
        // materialize a store into the slot. If the source temp already maps
        // to the destination slot a single copy could be elided, so copy
        // through an unpinned intermediate first.
        let storage = self.temp_storage(slot_value);
        let source_copy = self.create_temp();
        self.emit(LirInst::CopyTemp { src: slot_value, dest: source_copy });
        self.define_temp_storage(source_copy, storage);

        let store_temp = self.create_temp();
        self.emit(LirInst::CopyTemp { src: source_copy, dest: store_temp });
        self.define_temp_storage(store_temp, storage);
        let store_temp = self.ensure_temp_mapped_to_slot(store_temp, slot);

        self.variable_map.insert(binding, store_temp);
        self.invalidate_numeric_refinement(binding, store_temp);
        Ok(store_temp)
    }

    // ─── Storage coercions ────────────────────────────────────────

    /// Coerce to a boxed/reference representation fit for dynamic
    /// consumption. Pass-through when the value is already heap-shaped.
    pub(super) fn ensure_object(&mut self, temp: TempId) -> TempId {
        let storage = self.temp_storage(temp);
        if matches!(storage.kind, StorageKind::Boxed | StorageKind::Reference) {
            return temp;
        }
        let dest = self.create_temp();
        self.emit(LirInst::ConvertToObject { src: temp, dest });
        self.define_temp_storage(
            dest,
            ValueStorage { kind: StorageKind::Boxed, ty: storage.ty },
        );
        dest
    }

    /// Coerce to an unboxed number. Pass-through for native numbers; a
    /// successful dynamic coercion of a variable-originated temp refines the
    /// binding so later reads skip the coercion.
    pub(super) fn ensure_number(&mut self, temp: TempId) -> TempId {
        let storage = self.temp_storage(temp);
        if storage.kind == StorageKind::Unboxed && storage.ty == JsType::Number {
            self.temp_binding_origin.remove(&temp);
            return temp;
        }

        let src = self.ensure_object(temp);
        let dest = self.create_temp();
        self.emit(LirInst::ConvertToNumber { src, dest });
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Number));

        if let Some(binding) = self.temp_binding_origin.remove(&temp) {
            if self.numeric_refinements_enabled() {
                self.numeric_refinements.insert(binding, dest);
            }
        }
        dest
    }

    /// Coerce to an unboxed boolean. Pass-through for native booleans.
    pub(super) fn ensure_boolean(&mut self, temp: TempId) -> TempId {
        let storage = self.temp_storage(temp);
        if storage.is_native_bool() {
            return temp;
        }
        let src = self.ensure_object(temp);
        let dest = self.create_temp();
        self.emit(LirInst::ConvertToBoolean { src, dest });
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Boolean));
        dest
    }

    fn coerce_to_slot_storage(&mut self, slot: SlotId, value: TempId) -> TempId {
        let slot_storage = self.body.slots[slot.0 as usize].storage;
        if slot_storage.kind == StorageKind::Unboxed && slot_storage.ty == JsType::Number {
            return self.ensure_number(value);
        }
        if slot_storage.is_native_bool() {
            return self.ensure_boolean(value);
        }
        if matches!(slot_storage.kind, StorageKind::Reference | StorageKind::Boxed) {
            return self.ensure_object(value);
        }
        value
    }

    // ─── Numeric refinements ──────────────────────────────────────

    /// Refinements assume no value changes without a visible store in this
    /// body. A suspend point breaks that: unpinned temporaries do not
    /// survive resumption, so resumable bodies track nothing.
    fn numeric_refinements_enabled(&self) -> bool {
        self.body.async_info.is_none() && self.body.generator_info.is_none()
    }

    /// Drop or carry the refinement for a binding after a store. When the
    /// newly assigned value is itself an unboxed number (e.g. after
    /// `x = Number(x)`) the refinement moves forward to it instead of dying.
    fn invalidate_numeric_refinement(&mut self, binding: BindingId, new_value: TempId) {
        self.temp_binding_origin.retain(|_, b| *b != binding);
        if !self.numeric_refinements_enabled() {
            self.numeric_refinements.remove(&binding);
            return;
        }
        let storage = self.temp_storage(new_value);
        if storage.kind == StorageKind::Unboxed && storage.ty == JsType::Number {
            self.numeric_refinements.insert(binding, new_value);
        } else {
            self.numeric_refinements.remove(&binding);
        }
    }

    pub(super) fn clear_numeric_refinements(&mut self) {
        self.numeric_refinements.clear();
        self.temp_binding_origin.clear();
    }

    // ─── Operators ────────────────────────────────────────────────

    fn lower_binary(&mut self, op: BinOp, left: &HirExpr, right: &HirExpr) -> Lowered<TempId> {
        let left_temp = self.lower_expr(left)?;
        let right_temp = self.lower_expr(right)?;
        let ls = self.temp_storage(left_temp);
        let rs = self.temp_storage(right_temp);

        match op {
            BinOp::Add => {
                // Number + Number follows ToNumber semantics; emit the
                // native add only when both operands are already unboxed.
                if ls.ty == JsType::Number && rs.ty == JsType::Number {
                    let l = self.pass_or_ensure_number(left_temp, ls);
                    let r = self.pass_or_ensure_number(right_temp, rs);
                    let dest = self.create_temp();
                    self.emit(LirInst::AddNumber { left: l, right: r, dest });
                    self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Number));
                    return Ok(dest);
                }

                if ls.ty == JsType::String && rs.ty == JsType::String {
                    let dest = self.create_temp();
                    self.emit(LirInst::ConcatStrings {
                        left: left_temp,
                        right: right_temp,
                        dest,
                    });
                    self.define_temp_storage(dest, ValueStorage::reference(JsType::String));
                    return Ok(dest);
                }

                // Unknown operand types: box both and add dynamically.
                let l = self.ensure_object(left_temp);
                let r = self.ensure_object(right_temp);
                let dest = self.create_temp();
                self.emit(LirInst::AddDynamic { left: l, right: r, dest });
                self.define_temp_storage(dest, ValueStorage::boxed(JsType::Any));
                Ok(dest)
            }

            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let l = self.pass_or_ensure_number(left_temp, ls);
                let r = self.pass_or_ensure_number(right_temp, rs);
                let dest = self.create_temp();
                self.emit(match op {
                    BinOp::Sub => LirInst::SubNumber { left: l, right: r, dest },
                    BinOp::Mul => LirInst::MulNumber { left: l, right: r, dest },
                    BinOp::Div => LirInst::DivNumber { left: l, right: r, dest },
                    _ => LirInst::RemNumber { left: l, right: r, dest },
                });
                self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Number));
                Ok(dest)
            }

            BinOp::Lt => self.lower_numeric_comparison(CmpOp::Lt, left_temp, right_temp),
            BinOp::Le => self.lower_numeric_comparison(CmpOp::Le, left_temp, right_temp),
            BinOp::Gt => self.lower_numeric_comparison(CmpOp::Gt, left_temp, right_temp),
            BinOp::Ge => self.lower_numeric_comparison(CmpOp::Ge, left_temp, right_temp),
            BinOp::EqStrict => self.lower_equality(CmpOp::Eq, left_temp, right_temp),
            BinOp::NeStrict => self.lower_equality(CmpOp::Ne, left_temp, right_temp),
        }
    }

    fn pass_or_ensure_number(&mut self, temp: TempId, storage: ValueStorage) -> TempId {
        if storage.kind == StorageKind::Unboxed && storage.ty == JsType::Number {
            temp
        } else {
            self.ensure_number(temp)
        }
    }

    fn lower_numeric_comparison(
        &mut self,
        op: CmpOp,
        left: TempId,
        right: TempId,
    ) -> Lowered<TempId> {
        let (l, r) = if self.temp_storage(left).ty == JsType::Number
            && self.temp_storage(right).ty == JsType::Number
        {
            (left, right)
        } else {
            (self.ensure_number(left), self.ensure_number(right))
        };
        let dest = self.create_temp();
        self.emit(LirInst::CompareNumber { op, left: l, right: r, dest });
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Boolean));
        Ok(dest)
    }

    /// Strict equality: native compare when both operands share a primitive
    /// type, dynamic compare on boxed operands otherwise.
    fn lower_equality(&mut self, op: CmpOp, left: TempId, right: TempId) -> Lowered<TempId> {
        let ls = self.temp_storage(left);
        let rs = self.temp_storage(right);
        let dest = self.create_temp();

        if ls.ty == JsType::Number && rs.ty == JsType::Number {
            self.emit(LirInst::CompareNumber { op, left, right, dest });
        } else if ls.ty == JsType::Boolean && rs.ty == JsType::Boolean {
            self.emit(LirInst::CompareBoolean { op, left, right, dest });
        } else {
            let l = self.ensure_object(left);
            let r = self.ensure_object(right);
            self.emit(LirInst::CompareDynamic { op, left: l, right: r, dest });
        }
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Boolean));
        Ok(dest)
    }

    fn lower_unary(&mut self, op: UnOp, operand: &HirExpr) -> Lowered<TempId> {
        let operand_temp = self.lower_expr(operand)?;
        match op {
            // Truthiness-coerce and invert in one instruction; the backend
            // picks the overload matching the operand's storage.
            UnOp::Not => {
                let dest = self.create_temp();
                self.emit(LirInst::LogicalNot { src: operand_temp, dest });
                self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Boolean));
                Ok(dest)
            }
            UnOp::Neg => {
                if self.temp_storage(operand_temp).ty != JsType::Number {
                    return self
                        .fail_if_unset("HIR->LIR: negation of a non-numeric operand");
                }
                let dest = self.create_temp();
                self.emit(LirInst::NegNumber { src: operand_temp, dest });
                self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Number));
                Ok(dest)
            }
        }
    }

    // ─── Calls ────────────────────────────────────────────────────

    fn lower_call(&mut self, callee: &HirExpr, args: &[HirExpr]) -> Lowered<TempId> {
        let callee_temp = self.lower_expr(callee)?;
        let callee_boxed = self.ensure_object(callee_temp);

        let mut arg_temps = Vec::with_capacity(args.len());
        for arg in args {
            let arg_temp = self.lower_expr(arg)?;
            arg_temps.push(self.ensure_object(arg_temp));
        }

        let dest = self.create_temp();
        self.emit(LirInst::Call { callee: callee_boxed, args: arg_temps, dest });
        self.define_temp_storage(dest, ValueStorage::object());
        Ok(dest)
    }

    /// `callee?.(args)`: evaluate the callee once, short-circuit to
    /// `undefined` when it is nullish. The result temp is written on both
    /// paths and defined once at the join.
    fn lower_optional_call(&mut self, callee: &HirExpr, args: &[HirExpr]) -> Lowered<TempId> {
        let result = self.create_temp();

        let callee_temp = self.lower_expr(callee)?;
        let callee_boxed = self.ensure_object(callee_temp);

        let nullish_label = self.create_label();
        let end_label = self.create_label();

        let undef_check = self.create_temp();
        self.emit(LirInst::IsUndefined { src: callee_boxed, dest: undef_check });
        self.define_temp_storage(undef_check, ValueStorage::unboxed(JsType::Boolean));
        self.emit(LirInst::BranchIfTrue { cond: undef_check, target: nullish_label });

        let null_check = self.create_temp();
        self.emit(LirInst::IsNull { src: callee_boxed, dest: null_check });
        self.define_temp_storage(null_check, ValueStorage::unboxed(JsType::Boolean));
        self.emit(LirInst::BranchIfTrue { cond: null_check, target: nullish_label });

        let mut arg_temps = Vec::with_capacity(args.len());
        for arg in args {
            let arg_temp = self.lower_expr(arg)?;
            arg_temps.push(self.ensure_object(arg_temp));
        }
        self.emit(LirInst::Call { callee: callee_boxed, args: arg_temps, dest: result });
        self.emit(LirInst::Branch(end_label));

        self.emit(LirInst::Label(nullish_label));
        self.emit(LirInst::ConstUndefined { dest: result });

        self.emit(LirInst::Label(end_label));
        self.define_temp_storage(result, ValueStorage::object());
        Ok(result)
    }

    /// `import(specifier)`: the loader also needs the importing module's
    /// identity for relative resolution; it comes from the reserved
    /// `__filename` binding, falling back to an empty string when that
    /// binding is absent or fails to read.
    fn lower_import(&mut self, specifier: &HirExpr) -> Lowered<TempId> {
        let specifier_temp = self.lower_expr(specifier)?;

        let module_id = match self.func.lookup("__filename") {
            Some(binding) => match self.read_binding(binding) {
                Some(temp) => temp,
                None => self.const_string(""),
            },
            None => self.const_string(""),
        };

        let dest = self.create_temp();
        self.emit(LirInst::CallImport { specifier: specifier_temp, module_id, dest });
        self.define_temp_storage(dest, ValueStorage::object());
        Ok(dest)
    }
}
