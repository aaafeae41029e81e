//! Return lowering and the shared return epilogue.
//!
//! A function with protected regions gets one epilogue label for all of its
//! returns. A `return` under a protected region stores its value into the
//! reserved `$return` slot and leaves to that label; the leave runs every
//! enclosing finally before control reaches the epilogue, and the backend
//! emits the reload-and-return block there. Returns under suspension-aware
//! handler regions route through pending fields instead, so the finally
//! body can run on a later resumption before the return takes effect.

use crate::ir::lir::LirInst;
use crate::ir::{TempId, ValueStorage};

use super::{Failed, HirExpr, Lowered, Lowerer};

impl Lowerer<'_> {
    pub(super) fn lower_return(&mut self, value: Option<&HirExpr>) -> Lowered<()> {
        let value = match value {
            Some(expr) => self.lower_expr(expr)?,
            None => self.const_undefined(),
        };
        let value = self.ensure_object(value);

        // A return inside an async finally region defers through pending
        // fields; the finally body must complete (possibly across further
        // suspensions) before the return resolves the promise.
        let has_awaits = self
            .body
            .async_info
            .as_ref()
            .map_or(false, |info| info.has_awaits);
        if has_awaits {
            if let (Some(ctx), Some(scope)) = (
                self.async_finally.last().cloned(),
                self.func.state_scope.clone(),
            ) {
                self.store_scope_field(&scope, ctx.pending_return_field, value);
                let true_t = self.const_boolean(true);
                self.store_scope_field(&scope, ctx.has_pending_return_field, true_t);
                // A routed return overrides any pending exception.
                let false_t = self.const_boolean(false);
                self.store_scope_field(&scope, ctx.has_pending_exception_field, false_t);
                let null_t = self.const_null_object();
                self.store_scope_field(&scope, ctx.pending_exception_field, null_t);
                let target = if ctx.in_finally {
                    ctx.finally_exit
                } else {
                    ctx.finally_entry
                };
                self.emit(LirInst::Branch(target));
                return Ok(());
            }
        }

        // Same deferral for a return under a routed generator try/finally;
        // the catch never sees returns, so the target is always the finally.
        if self.body.generator_info.is_some() {
            if let (Some(ctx), Some(scope)) = (
                self.generator_finally.last().cloned(),
                self.func.state_scope.clone(),
            ) {
                self.store_scope_field(&scope, ctx.pending_return_field, value);
                let true_t = self.const_boolean(true);
                self.store_scope_field(&scope, ctx.has_pending_return_field, true_t);
                let false_t = self.const_boolean(false);
                self.store_scope_field(&scope, ctx.has_pending_exception_field, false_t);
                let null_t = self.const_null_object();
                self.store_scope_field(&scope, ctx.pending_exception_field, null_t);
                let target = if ctx.in_finally {
                    ctx.finally_exit
                } else {
                    ctx.finally_entry
                };
                self.emit(LirInst::Branch(target));
                return Ok(());
            }
        }

        if !self.protected_depth.is_empty() && self.body.return_epilogue.is_some() {
            return self.emit_return_via_epilogue(value);
        }

        self.emit(LirInst::Return { value });
        Ok(())
    }

    /// Lazily reserve the `$return` slot, with an undefined-initialized
    /// temporary pinned to it so the epilogue block has a value to reload
    /// even when a finally diverts control before any store.
    fn ensure_return_epilogue_storage(&mut self) {
        let missing = match &self.body.return_epilogue {
            Some(epilogue) => epilogue.slot.is_none(),
            None => false,
        };
        if !missing {
            return;
        }

        let slot = self.create_anonymous_slot("$return", ValueStorage::object());
        let load_temp = self.const_undefined();
        self.set_temp_slot(load_temp, slot);

        if let Some(epilogue) = self.body.return_epilogue.as_mut() {
            epilogue.slot = Some(slot);
        }
    }

    fn emit_return_via_epilogue(&mut self, value: TempId) -> Lowered<()> {
        let label = match &self.body.return_epilogue {
            Some(epilogue) => epilogue.label,
            None => return Err(Failed),
        };

        self.ensure_return_epilogue_storage();
        let slot = match self.body.return_epilogue.as_ref().and_then(|e| e.slot) {
            Some(slot) => slot,
            None => return Err(Failed),
        };

        let store_temp = self.create_temp();
        self.emit(LirInst::CopyTemp {
            src: value,
            dest: store_temp,
        });
        self.define_temp_storage(store_temp, ValueStorage::object());
        self.set_temp_slot(store_temp, slot);

        self.emit(LirInst::Leave(label));
        if let Some(epilogue) = self.body.return_epilogue.as_mut() {
            epilogue.needs_block = true;
        }
        Ok(())
    }
}
