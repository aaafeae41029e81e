//! Temporary, label, and slot allocation for one lowering session.
//!
//! Ids are strictly increasing and never reused within a session. The one
//! subtle invariant lives in [`Lowerer::ensure_temp_mapped_to_slot`]: a
//! temporary's slot mapping is monotonic, because instructions already
//! appended reference the temporary under its current mapping. Remapping is
//! satisfied by a fresh copy-initialized temporary instead.

use crate::ir::lir::{LirInst, SlotInfo};
use crate::ir::{BindingId, JsType, LabelId, SlotId, StorageKind, TempId, ValueStorage};

use super::Lowerer;

impl Lowerer<'_> {
    pub(super) fn emit(&mut self, inst: LirInst) {
        self.body.instructions.push(inst);
    }

    pub(super) fn create_label(&mut self) -> LabelId {
        let label = LabelId(self.body.label_count);
        self.body.label_count += 1;
        label
    }

    /// Allocate a temporary with undefined storage. Storage must be defined
    /// exactly once, before any instruction reads the temporary.
    pub(super) fn create_temp(&mut self) -> TempId {
        let temp = TempId(self.body.temps.len() as u32);
        self.body.temps.push(ValueStorage::UNKNOWN);
        self.body.temp_slots.push(None);
        temp
    }

    pub(super) fn define_temp_storage(&mut self, temp: TempId, storage: ValueStorage) {
        match self.body.temps.get_mut(temp.0 as usize) {
            Some(entry) => {
                debug_assert!(
                    entry.kind == StorageKind::Unknown,
                    "storage for {} defined twice",
                    temp
                );
                *entry = storage;
            }
            None => {
                debug_assert!(false, "temp id {} out of range", temp);
            }
        }
    }

    pub(super) fn temp_storage(&self, temp: TempId) -> ValueStorage {
        match self.body.temps.get(temp.0 as usize) {
            Some(storage) => {
                debug_assert!(storage.is_defined(), "reading undefined storage of {}", temp);
                *storage
            }
            None => {
                debug_assert!(false, "temp id {} out of range", temp);
                ValueStorage::UNKNOWN
            }
        }
    }

    pub(super) fn temp_slot(&self, temp: TempId) -> Option<SlotId> {
        match self.body.temp_slots.get(temp.0 as usize) {
            Some(slot) => *slot,
            None => {
                debug_assert!(false, "temp id {} out of range", temp);
                None
            }
        }
    }

    /// Raw pin of a fresh temporary to a slot. Callers that may hold an
    /// already-pinned temporary go through [`Self::ensure_temp_mapped_to_slot`].
    pub(super) fn set_temp_slot(&mut self, temp: TempId, slot: SlotId) {
        match self.body.temp_slots.get_mut(temp.0 as usize) {
            Some(entry) => {
                debug_assert!(
                    entry.is_none() || *entry == Some(slot),
                    "repinning {} to a different slot",
                    temp
                );
                *entry = Some(slot);
            }
            None => {
                debug_assert!(false, "temp id {} out of range", temp);
            }
        }
    }

    /// Pin `temp` to `slot`, preserving any existing pin: if the temporary
    /// is already mapped to a different slot, a fresh temporary is created,
    /// copy-initialized from it, and pinned instead. Returns the temporary
    /// that ends up mapped to `slot`.
    pub(super) fn ensure_temp_mapped_to_slot(&mut self, temp: TempId, slot: SlotId) -> TempId {
        match self.temp_slot(temp) {
            None => {
                self.set_temp_slot(temp, slot);
                temp
            }
            Some(current) if current == slot => temp,
            Some(_) => {
                let storage = self.temp_storage(temp);
                let copy = self.create_temp();
                self.emit(LirInst::CopyTemp { src: temp, dest: copy });
                self.define_temp_storage(copy, storage);
                self.set_temp_slot(copy, slot);
                copy
            }
        }
    }

    /// Lookup-or-create the durable slot for a binding; idempotent per
    /// binding. Slot storage follows the binding's proven representation.
    pub(super) fn get_or_create_binding_slot(&mut self, binding: BindingId) -> SlotId {
        if let Some(slot) = self.binding_slots.get(&binding) {
            return *slot;
        }
        let info = &self.func.bindings[binding.0 as usize];
        let storage = super::binding_slot_storage(info.repr);
        let slot = SlotId(self.body.slots.len() as u32);
        self.body.slots.push(SlotInfo {
            name: info.name.clone(),
            storage,
        });
        self.binding_slots.insert(binding, slot);
        slot
    }

    /// Create a compiler-introduced slot; one per request, never shared.
    pub(super) fn create_anonymous_slot(&mut self, name: &str, storage: ValueStorage) -> SlotId {
        let slot = SlotId(self.body.slots.len() as u32);
        self.body.slots.push(SlotInfo {
            name: name.to_string(),
            storage,
        });
        slot
    }

    // ── Constant emitters ──

    pub(super) fn const_number(&mut self, value: f64) -> TempId {
        let dest = self.create_temp();
        self.emit(LirInst::ConstNumber { value, dest });
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Number));
        dest
    }

    pub(super) fn const_string(&mut self, value: &str) -> TempId {
        let dest = self.create_temp();
        self.emit(LirInst::ConstString {
            value: value.to_string(),
            dest,
        });
        self.define_temp_storage(dest, ValueStorage::reference(JsType::String));
        dest
    }

    pub(super) fn const_boolean(&mut self, value: bool) -> TempId {
        let dest = self.create_temp();
        self.emit(LirInst::ConstBoolean { value, dest });
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Boolean));
        dest
    }

    /// Null constant in the generic reference representation, used by the
    /// pending-field plumbing. The `null` literal lowers elsewhere with its
    /// own unboxed-null storage.
    pub(super) fn const_null_object(&mut self) -> TempId {
        let dest = self.create_temp();
        self.emit(LirInst::ConstNull { dest });
        self.define_temp_storage(dest, ValueStorage::object());
        dest
    }

    pub(super) fn const_undefined(&mut self) -> TempId {
        let dest = self.create_temp();
        self.emit(LirInst::ConstUndefined { dest });
        self.define_temp_storage(dest, ValueStorage::object());
        dest
    }
}
