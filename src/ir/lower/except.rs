//! Throw lowering and the handler-context stacks.
//!
//! Native exception propagation cannot be relied upon once a function may
//! suspend: by the time a resumed callback runs, the call frames that
//! established catch regions are gone. Throws inside suspension-aware
//! handler regions therefore route through scope fields and explicit
//! branches instead of unwinding. The context stacks here record, per
//! active handler region, where that routing must deliver.

use crate::ir::lir::LirInst;
use crate::ir::{LabelId, StateId};

use super::{HirExpr, Lowered, Lowerer};

/// Active async catch handler: awaits inside the region carry its resume
/// state as their reject route, and throws store-and-branch to it.
#[derive(Debug, Clone)]
pub(super) struct AsyncCatchContext {
    pub state: StateId,
    pub label: LabelId,
    pub pending_field: &'static str,
}

/// Active async finally region. Pending-completion fields let the finally
/// body run before a deferred throw or return resumes.
#[derive(Debug, Clone)]
pub(super) struct AsyncFinallyContext {
    pub finally_entry: LabelId,
    pub finally_exit: LabelId,
    pub pending_exception_field: &'static str,
    pub has_pending_exception_field: &'static str,
    pub pending_return_field: &'static str,
    pub has_pending_return_field: &'static str,
    pub in_finally: bool,
}

/// Active generator try region with a finally. Structurally like the async
/// pair but single-context: generators do not reject an outer promise, so
/// its only job is making the finally run once per logical exit.
#[derive(Debug, Clone)]
pub(super) struct GeneratorTryFinallyContext {
    pub pending_exception_field: &'static str,
    pub has_pending_exception_field: &'static str,
    pub pending_return_field: &'static str,
    pub has_pending_return_field: &'static str,
    pub finally_entry: LabelId,
    pub finally_exit: LabelId,
    pub catch_entry: Option<LabelId>,
    pub in_catch: bool,
    pub in_finally: bool,
}

impl GeneratorTryFinallyContext {
    /// Where a routed exception enters this region: the catch clause when
    /// one exists and lowering is in neither handler body, else the finally.
    pub fn exception_target(&self) -> LabelId {
        if let Some(catch_entry) = self.catch_entry {
            if !self.in_catch && !self.in_finally {
                return catch_entry;
            }
        }
        if self.in_finally {
            self.finally_exit
        } else {
            self.finally_entry
        }
    }
}

// Scope field names shared by the suspension-aware handler paths.
pub(super) const PENDING_EXCEPTION_FIELD: &str = "_pendingException";
pub(super) const HAS_PENDING_EXCEPTION_FIELD: &str = "_hasPendingException";
pub(super) const PENDING_RETURN_FIELD: &str = "_pendingReturnValue";
pub(super) const HAS_PENDING_RETURN_FIELD: &str = "_hasPendingReturn";

impl Lowerer<'_> {
    /// Lower `throw <expr>`. Exactly one of four routes is chosen:
    ///
    /// 1. direct async rejection — async, an await already exists, no catch
    ///    context active, valid state scope;
    /// 2. handler-field store + branch — an async catch context is active;
    /// 3. generator finally routing — generator with an active try/finally
    ///    context;
    /// 4. native throw — no suspension has intervened, unwinding is safe.
    pub(super) fn lower_throw(&mut self, expr: &HirExpr) -> Lowered<()> {
        let value = self.lower_expr(expr)?;
        let value = self.ensure_object(value);

        let has_awaits = self
            .body
            .async_info
            .as_ref()
            .map(|info| info.has_awaits)
            .unwrap_or(false);
        let scope = self.func.state_scope.clone();

        if self.body.async_info.is_some()
            && has_awaits
            && self.async_catch.is_empty()
            && scope.is_some()
        {
            self.emit(LirInst::AsyncReject { value });
            return Ok(());
        }

        if let (Some(ctx), Some(scope)) = (self.async_catch.last().cloned(), scope.as_ref()) {
            self.emit(LirInst::StoreScopeField {
                scope: scope.clone(),
                field: ctx.pending_field.to_string(),
                value,
            });
            self.emit(LirInst::Branch(ctx.label));
            return Ok(());
        }

        if let (true, Some(scope)) = (self.body.generator_info.is_some(), scope) {
            if let Some(ctx) = self.generator_finally.last().cloned() {
                self.store_scope_field(&scope, ctx.pending_exception_field, value);
                let true_t = self.const_boolean(true);
                self.store_scope_field(&scope, ctx.has_pending_exception_field, true_t);
                // An exception overrides a deferred return.
                let false_t = self.const_boolean(false);
                self.store_scope_field(&scope, ctx.has_pending_return_field, false_t);
                self.emit(LirInst::Branch(ctx.exception_target()));
                return Ok(());
            }
        }

        self.emit(LirInst::Throw { value });
        Ok(())
    }

    pub(super) fn store_scope_field(&mut self, scope: &str, field: &str, value: crate::ir::TempId) {
        self.emit(LirInst::StoreScopeField {
            scope: scope.to_string(),
            field: field.to_string(),
            value,
        });
    }

    pub(super) fn load_scope_field(
        &mut self,
        scope: &str,
        field: &str,
        storage: crate::ir::ValueStorage,
    ) -> crate::ir::TempId {
        let dest = self.create_temp();
        self.emit(LirInst::LoadScopeField {
            scope: scope.to_string(),
            field: field.to_string(),
            dest,
        });
        self.define_temp_storage(dest, storage);
        dest
    }
}
