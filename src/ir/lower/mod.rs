//! HIR to LIR lowering.
//!
//! One [`Lowerer`] session per function. Statements lower in source order
//! into a flat [`MethodBody`]: control flow becomes labels and branches,
//! suspension points become numbered resume states, and exception handling
//! becomes either native protected regions or, where a suspension sits
//! inside the protected code, label routing over the function's state
//! scope.
//!
//! Lowering is all-or-nothing per function. The first unsupported shape
//! abandons the session with a recorded reason; sibling functions are
//! unaffected.

use std::collections::HashMap;

use crate::ir::hir::{BindingRepr, CatchClause, HirExpr, HirFunction, HirStmt};
use crate::ir::lir::{
    AsyncInfo, ExceptionRegion, GeneratorInfo, LirInst, MethodBody, RegionKind, ReturnEpilogue,
};
use crate::ir::{BindingId, JsType, SlotId, TempId, ValueStorage};
use crate::metrics::LoweringMetrics;

mod alloc;
mod control;
mod epilogue;
mod except;
mod expr;
mod suspend;

#[cfg(test)]
mod tests;

use self::control::ControlFlowContext;
use self::except::{
    AsyncCatchContext, AsyncFinallyContext, GeneratorTryFinallyContext,
    HAS_PENDING_EXCEPTION_FIELD, HAS_PENDING_RETURN_FIELD, PENDING_EXCEPTION_FIELD,
    PENDING_RETURN_FIELD,
};
use self::suspend::{count_await_exprs, count_yield_exprs};

// ─── Session result ───────────────────────────────────────────────

/// Marker for an abandoned session. The reason does not travel in the
/// error value; it sits in the session's failure slot, first writer wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failed;

/// Result alias used throughout the lowering: `Err(Failed)` unwinds the
/// session back to [`lower_function`].
pub type Lowered<T> = Result<T, Failed>;

/// Durable-slot storage for a binding representation. `Dynamic` bindings
/// live boxed; proven number and boolean bindings keep their unboxed
/// shape across the slot.
fn binding_slot_storage(repr: BindingRepr) -> ValueStorage {
    match repr {
        BindingRepr::Dynamic => ValueStorage::object(),
        BindingRepr::Number => ValueStorage::unboxed(JsType::Number),
        BindingRepr::Boolean => ValueStorage::unboxed(JsType::Boolean),
    }
}

// ─── Entry point ──────────────────────────────────────────────────

/// Lower one function body to LIR.
///
/// On success the returned [`MethodBody`] is complete: instructions,
/// temp and slot tables, suspension metadata, and exception regions. On
/// failure the recorded reason comes back and the partial body is
/// dropped.
pub fn lower_function(
    func: &HirFunction,
    metrics: &LoweringMetrics,
) -> Result<MethodBody, String> {
    let mut session = Lowerer::new(func, metrics);
    let outcome = session.lower_statements(&func.body);
    metrics.record_attempt(func.kind, outcome.is_ok());
    match outcome {
        Ok(()) => {
            session.splice_generator_entry_dispatch();
            Ok(session.body)
        }
        Err(Failed) => Err(session
            .failure
            .take()
            .unwrap_or_else(|| String::from("HIR->LIR: lowering failed"))),
    }
}

// ─── Lowerer ──────────────────────────────────────────────────────

/// One function's lowering session; all per-function state lives here.
pub struct Lowerer<'a> {
    func: &'a HirFunction,
    metrics: &'a LoweringMetrics,
    body: MethodBody,

    /// Durable slot per binding, allocated on first store.
    binding_slots: HashMap<BindingId, SlotId>,
    /// Pinned temp currently holding each binding's boxed value.
    variable_map: HashMap<BindingId, TempId>,
    /// Bindings whose current value is proven to sit in an unboxed
    /// number temp; reads skip the dynamic coercion while an entry lives.
    numeric_refinements: HashMap<BindingId, TempId>,
    /// Which binding a reusable temp was read from, for refinement
    /// bookkeeping on stores.
    temp_binding_origin: HashMap<TempId, BindingId>,

    /// Break/continue targets, innermost last.
    control_flow: Vec<ControlFlowContext>,
    /// `control_flow.len()` snapshot at entry to each enclosing native
    /// protected region; jumps that resolve below the top snapshot leave.
    protected_depth: Vec<usize>,
    /// Async catch handlers in scope, innermost last.
    async_catch: Vec<AsyncCatchContext>,
    /// Async finally regions in scope, innermost last.
    async_finally: Vec<AsyncFinallyContext>,
    /// Generator finally regions in scope, innermost last.
    generator_finally: Vec<GeneratorTryFinallyContext>,

    /// Parameter position per parameter binding.
    param_index: HashMap<BindingId, u32>,
    /// First failure reason recorded this session.
    failure: Option<String>,
}

impl<'a> Lowerer<'a> {
    fn new(func: &'a HirFunction, metrics: &'a LoweringMetrics) -> Self {
        let has_awaits = count_await_exprs(&func.body) > 0;
        let body = MethodBody {
            name: func.name.clone(),
            kind: func.kind,
            is_async: func.is_async,
            is_generator: func.is_generator,
            state_scope: func.state_scope.clone(),
            instructions: Vec::new(),
            temps: Vec::new(),
            temp_slots: Vec::new(),
            slots: Vec::new(),
            async_info: func.is_async.then(|| AsyncInfo::new(has_awaits)),
            generator_info: func.is_generator.then(GeneratorInfo::new),
            exception_regions: Vec::new(),
            return_epilogue: None,
            label_count: 0,
        };
        let param_index = func
            .params
            .iter()
            .enumerate()
            .map(|(index, binding)| (*binding, index as u32))
            .collect();
        Lowerer {
            func,
            metrics,
            body,
            binding_slots: HashMap::new(),
            variable_map: HashMap::new(),
            numeric_refinements: HashMap::new(),
            temp_binding_origin: HashMap::new(),
            control_flow: Vec::new(),
            protected_depth: Vec::new(),
            async_catch: Vec::new(),
            async_finally: Vec::new(),
            generator_finally: Vec::new(),
            param_index,
            failure: None,
        }
    }

    /// Plain generators re-enter through a state switch at the top of the
    /// body: one arm per registered resume label, fresh entry falls
    /// through. Async generators skip this; their driver owns resumption.
    fn splice_generator_entry_dispatch(&mut self) {
        if self.func.is_async {
            return;
        }
        let arms = match &self.body.generator_info {
            Some(info) if !info.resume_labels.is_empty() => info.resume_labels.clone(),
            _ => return,
        };
        let start = self.create_label();
        self.body.instructions.insert(
            0,
            LirInst::GeneratorStateSwitch {
                arms,
                fallthrough: start,
            },
        );
        self.body.instructions.insert(1, LirInst::Label(start));
    }

    // ─── Failure channel ──────────────────────────────────────────

    /// Abandon the session with `reason`, replacing any earlier reason.
    pub(super) fn fail<T>(&mut self, reason: impl Into<String>) -> Lowered<T> {
        let reason = reason.into();
        self.metrics.record_failure(&reason);
        self.failure = Some(reason);
        Err(Failed)
    }

    /// Abandon the session, keeping the first recorded reason when one
    /// exists. Inner sites record the precise reason; outer wrappers add
    /// a statement-level one only when nothing beat them to it.
    pub(super) fn fail_if_unset<T>(&mut self, reason: impl Into<String>) -> Lowered<T> {
        self.note_failure_if_unset(reason);
        Err(Failed)
    }

    /// Record a reason without producing the error value, for callers
    /// already holding a `Failed` from below.
    pub(super) fn note_failure_if_unset(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.metrics.record_failure_if_unset(&reason);
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    // ─── Statement dispatch ───────────────────────────────────────

    pub(super) fn lower_statements(&mut self, stmts: &[HirStmt]) -> Lowered<()> {
        for stmt in stmts {
            self.lower_statement(stmt)?;
        }
        Ok(())
    }

    pub(super) fn lower_statement(&mut self, stmt: &HirStmt) -> Lowered<()> {
        match stmt {
            HirStmt::SequencePoint(span) => {
                self.emit(LirInst::SequencePoint { span: *span });
                Ok(())
            }
            HirStmt::VarDecl { binding, init } => self.lower_var_decl(*binding, init.as_ref()),
            HirStmt::Expr(expr) => match self.lower_expr_discard(expr) {
                Ok(()) => Ok(()),
                Err(failed) => {
                    self.note_failure_if_unset("HIR->LIR: failed lowering expression statement");
                    Err(failed)
                }
            },
            HirStmt::Return(value) => self.lower_return(value.as_ref()),
            HirStmt::If {
                test,
                consequent,
                alternate,
            } => self.lower_if(test, consequent, alternate.as_deref()),
            HirStmt::While { test, body } => self.lower_while(test, body, None),
            HirStmt::DoWhile { body, test } => self.lower_do_while(body, test, None),
            HirStmt::For {
                init,
                test,
                update,
                body,
            } => self.lower_for(init.as_deref(), test.as_ref(), update.as_ref(), body, None),
            HirStmt::Block(stmts) => self.lower_statements(stmts),
            HirStmt::Labeled { name, body } => self.lower_labeled(name, body),
            HirStmt::Break { label } => self.lower_break(label.as_deref()),
            HirStmt::Continue { label } => self.lower_continue(label.as_deref()),
            HirStmt::Throw(expr) => self.lower_throw(expr),
            HirStmt::Try {
                try_block,
                catch,
                finally,
            } => self.lower_try(try_block, catch.as_ref(), finally.as_deref()),
        }
    }

    fn lower_var_decl(&mut self, binding: BindingId, init: Option<&HirExpr>) -> Lowered<()> {
        let value = match init {
            Some(expr) => match self.lower_expr(expr) {
                Ok(value) => value,
                Err(failed) => {
                    let reason = format!(
                        "HIR->LIR: failed lowering variable initializer expression for '{}'",
                        self.func.binding_name(binding)
                    );
                    self.note_failure_if_unset(reason);
                    return Err(failed);
                }
            },
            // `var x;` declares with undefined.
            None => self.const_undefined(),
        };
        self.store_to_binding(binding, value)?;
        Ok(())
    }

    // ─── Try statements ───────────────────────────────────────────

    /// Route a `try` to one of its lowerings. Awaits suspend the state
    /// machine mid-region, so native exception regions cannot protect
    /// them; those shapes rewrite into label routing over the state
    /// scope. Yields do the same to plain generators.
    fn lower_try(
        &mut self,
        try_block: &[HirStmt],
        catch: Option<&CatchClause>,
        finally: Option<&[HirStmt]>,
    ) -> Lowered<()> {
        let has_catch = catch.is_some();
        let has_finally = finally.is_some();

        let await_count = count_await_exprs(try_block)
            + catch.map_or(0, |clause| count_await_exprs(&clause.body))
            + finally.map_or(0, count_await_exprs);

        let is_async = self.body.async_info.is_some();

        if is_async && has_finally && await_count > 0 {
            let finally_block = match finally {
                Some(block) => block,
                None => return Err(Failed), // has_finally
            };
            return self.lower_async_try_finally(try_block, catch, finally_block);
        }
        if is_async && has_catch && !has_finally && await_count > 0 {
            let clause = match catch {
                Some(clause) => clause,
                None => return Err(Failed), // has_catch
            };
            return self.lower_async_try_catch(try_block, clause);
        }

        if !is_async && self.body.generator_info.is_some() && has_finally {
            let yield_count = count_yield_exprs(try_block)
                + catch.map_or(0, |clause| count_yield_exprs(&clause.body))
                + finally.map_or(0, count_yield_exprs);
            if yield_count > 0 {
                let finally_block = match finally {
                    Some(block) => block,
                    None => return Err(Failed), // has_finally
                };
                return self.lower_generator_try_finally(try_block, catch, finally_block);
            }
        }

        if !has_catch && !has_finally {
            return self.lower_statements(try_block);
        }

        self.lower_sync_try(try_block, catch, finally)
    }

    /// `try` without suspensions inside: native protected regions.
    fn lower_sync_try(
        &mut self,
        try_block: &[HirStmt],
        catch: Option<&CatchClause>,
        finally: Option<&[HirStmt]>,
    ) -> Lowered<()> {
        // Break/continue that resolve past this depth must leave the
        // region rather than branch.
        self.protected_depth.push(self.control_flow.len());

        // Returns inside any protected region leave to a shared epilogue.
        if self.body.return_epilogue.is_none() {
            let label = self.create_label();
            self.body.return_epilogue = Some(ReturnEpilogue {
                label,
                slot: None,
                needs_block: false,
            });
        }

        let result = self.lower_sync_try_inner(try_block, catch, finally);
        self.protected_depth.pop();
        result
    }

    fn lower_sync_try_inner(
        &mut self,
        try_block: &[HirStmt],
        catch: Option<&CatchClause>,
        finally: Option<&[HirStmt]>,
    ) -> Lowered<()> {
        let outer_try_start = self.create_label();
        let outer_try_end = self.create_label();
        let end_label = self.create_label();

        // With a catch the catch region nests inside the finally region;
        // without one the two share bounds.
        let (inner_try_start, inner_try_end, catch_bounds) = if catch.is_some() {
            let inner_start = self.create_label();
            let inner_end = self.create_label();
            let catch_start = self.create_label();
            let catch_end = self.create_label();
            (inner_start, inner_end, Some((catch_start, catch_end)))
        } else {
            (outer_try_start, outer_try_end, None)
        };
        let finally_bounds = finally.map(|_| (self.create_label(), self.create_label()));

        self.emit(LirInst::Label(outer_try_start));
        if catch.is_some() {
            self.emit(LirInst::Label(inner_try_start));
        }

        self.lower_statements(try_block)?;
        self.emit(LirInst::Leave(end_label));

        if let Some(clause) = catch {
            let (catch_start, catch_end) = match catch_bounds {
                Some(bounds) => bounds,
                None => return Err(Failed), // created above
            };
            self.emit(LirInst::Label(inner_try_end));
            self.emit(LirInst::Label(catch_start));

            // The handler enters with the raised exception live.
            let ex = self.create_temp();
            self.emit(LirInst::StoreException { dest: ex });
            self.define_temp_storage(ex, ValueStorage::reference(JsType::Error));
            let ex_slot =
                self.create_anonymous_slot("$catch_ex", ValueStorage::reference(JsType::Error));
            self.set_temp_slot(ex, ex_slot);

            if let Some(binding) = clause.binding {
                let value = self.create_temp();
                self.emit(LirInst::UnwrapException {
                    src: ex,
                    dest: value,
                });
                self.define_temp_storage(value, ValueStorage::object());
                let value_slot =
                    self.create_anonymous_slot("$catch_value", ValueStorage::object());
                self.set_temp_slot(value, value_slot);
                self.store_to_binding(binding, value)?;
            }

            self.lower_statements(&clause.body)?;
            self.emit(LirInst::Leave(end_label));
            self.emit(LirInst::Label(catch_end));
        }

        self.emit(LirInst::Label(outer_try_end));

        if let Some(finally_block) = finally {
            let (finally_start, finally_end) = match finally_bounds {
                Some(bounds) => bounds,
                None => return Err(Failed), // created above
            };
            self.emit(LirInst::Label(finally_start));
            self.lower_statements(finally_block)?;
            self.emit(LirInst::EndFinally);
            self.emit(LirInst::Label(finally_end));
        }

        self.emit(LirInst::Label(end_label));

        if let Some((catch_start, catch_end)) = catch_bounds {
            self.body.exception_regions.push(ExceptionRegion {
                kind: RegionKind::Catch,
                protected_start: inner_try_start,
                protected_end: inner_try_end,
                handler_start: catch_start,
                handler_end: catch_end,
            });
        }
        if let Some((finally_start, finally_end)) = finally_bounds {
            self.body.exception_regions.push(ExceptionRegion {
                kind: RegionKind::Finally,
                protected_start: outer_try_start,
                protected_end: outer_try_end,
                handler_start: finally_start,
                handler_end: finally_end,
            });
        }
        Ok(())
    }

    /// Async `try`/`catch` whose protected region awaits. The catch
    /// becomes a resume state: rejected awaits and routed throws store
    /// the exception into the state scope and arrive at its label.
    fn lower_async_try_catch(
        &mut self,
        try_block: &[HirStmt],
        catch: &CatchClause,
    ) -> Lowered<()> {
        if self.body.async_info.is_none() {
            return Err(Failed);
        }
        let scope = match self.func.state_scope.clone() {
            Some(scope) => scope,
            None => return Err(Failed),
        };

        let catch_state = match self.body.async_info.as_mut() {
            Some(info) => info.allocate_state(),
            None => return Err(Failed), // guarded at entry
        };
        let catch_label = self.create_label();
        if let Some(info) = self.body.async_info.as_mut() {
            info.register_resume_label(catch_state, catch_label);
        }

        let end_label = self.create_label();

        // Clear the pending slot before entering the region.
        let clear = self.const_null_object();
        self.store_scope_field(&scope, PENDING_EXCEPTION_FIELD, clear);

        self.async_catch.push(AsyncCatchContext {
            state: catch_state,
            label: catch_label,
            pending_field: PENDING_EXCEPTION_FIELD,
        });
        let body_result = self.lower_statements(try_block);
        self.async_catch.pop();
        body_result?;

        self.emit(LirInst::Branch(end_label));

        // Catch entry, shared by rejected awaits and routed throws.
        self.emit(LirInst::Label(catch_label));
        let pending =
            self.load_scope_field(&scope, PENDING_EXCEPTION_FIELD, ValueStorage::object());
        let clear_after = self.const_null_object();
        self.store_scope_field(&scope, PENDING_EXCEPTION_FIELD, clear_after);

        if let Some(binding) = catch.binding {
            self.store_to_binding(binding, pending)?;
        }
        self.lower_statements(&catch.body)?;

        self.emit(LirInst::Branch(end_label));
        self.emit(LirInst::Label(end_label));
        Ok(())
    }

    /// Async `try` with a `finally` whose region awaits. Both handlers
    /// become labels; throws and returns park their completion in the
    /// state scope's pending fields, run the finally, and a dispatch
    /// after it re-raises, re-routes outward, returns, or falls through.
    fn lower_async_try_finally(
        &mut self,
        try_block: &[HirStmt],
        catch: Option<&CatchClause>,
        finally: &[HirStmt],
    ) -> Lowered<()> {
        if self.body.async_info.is_none() {
            return Err(Failed);
        }
        let scope = match self.func.state_scope.clone() {
            Some(scope) => scope,
            None => return Err(Failed),
        };

        let after_try = self.create_label();
        let finally_entry = self.create_label();
        let finally_exit = self.create_label();

        // Exception routing targets double as await-rejection resume
        // states.
        let exception_to_finally_state = match self.body.async_info.as_mut() {
            Some(info) => info.allocate_state(),
            None => return Err(Failed), // guarded at entry
        };
        let exception_to_finally = self.create_label();
        if let Some(info) = self.body.async_info.as_mut() {
            info.register_resume_label(exception_to_finally_state, exception_to_finally);
        }

        let exception_in_finally_state = match self.body.async_info.as_mut() {
            Some(info) => info.allocate_state(),
            None => return Err(Failed), // guarded at entry
        };
        let exception_in_finally = self.create_label();
        if let Some(info) = self.body.async_info.as_mut() {
            info.register_resume_label(exception_in_finally_state, exception_in_finally);
        }

        let catch_resume = if catch.is_some() {
            let state = match self.body.async_info.as_mut() {
                Some(info) => info.allocate_state(),
                None => return Err(Failed), // guarded at entry
            };
            let label = self.create_label();
            if let Some(info) = self.body.async_info.as_mut() {
                info.register_resume_label(state, label);
            }
            Some((state, label))
        } else {
            None
        };

        // Reset the pending-completion channel on entry.
        let null_t = self.const_null_object();
        self.store_scope_field(&scope, PENDING_EXCEPTION_FIELD, null_t);
        self.store_scope_field(&scope, PENDING_RETURN_FIELD, null_t);
        let false_t = self.const_boolean(false);
        self.store_scope_field(&scope, HAS_PENDING_EXCEPTION_FIELD, false_t);
        self.store_scope_field(&scope, HAS_PENDING_RETURN_FIELD, false_t);

        let finally_ctx = AsyncFinallyContext {
            finally_entry,
            finally_exit,
            pending_exception_field: PENDING_EXCEPTION_FIELD,
            has_pending_exception_field: HAS_PENDING_EXCEPTION_FIELD,
            pending_return_field: PENDING_RETURN_FIELD,
            has_pending_return_field: HAS_PENDING_RETURN_FIELD,
            in_finally: false,
        };

        // Try block: exceptions route to the catch when present, else
        // straight into the finally.
        let (entry_state, entry_label) =
            catch_resume.unwrap_or((exception_to_finally_state, exception_to_finally));
        self.async_finally.push(finally_ctx.clone());
        self.async_catch.push(AsyncCatchContext {
            state: entry_state,
            label: entry_label,
            pending_field: PENDING_EXCEPTION_FIELD,
        });
        let body_result = self.lower_statements(try_block);
        self.async_catch.pop();
        self.async_finally.pop();
        body_result?;

        // Normal completion flows into the finally.
        self.emit(LirInst::Branch(finally_entry));

        if let Some(clause) = catch {
            let catch_label = match catch_resume {
                Some((_, label)) => label,
                None => return Err(Failed), // allocated above
            };
            self.emit(LirInst::Label(catch_label));

            // Mark arrival, then take and clear the pending exception;
            // the catch consumes the completion.
            let true_t = self.const_boolean(true);
            self.store_scope_field(&scope, HAS_PENDING_EXCEPTION_FIELD, true_t);
            let pending =
                self.load_scope_field(&scope, PENDING_EXCEPTION_FIELD, ValueStorage::object());
            let null_after = self.const_null_object();
            self.store_scope_field(&scope, PENDING_EXCEPTION_FIELD, null_after);
            let false_after = self.const_boolean(false);
            self.store_scope_field(&scope, HAS_PENDING_EXCEPTION_FIELD, false_after);

            if let Some(binding) = clause.binding {
                self.store_to_binding(binding, pending)?;
            }

            // Exceptions inside the catch body go to the finally.
            self.async_finally.push(finally_ctx.clone());
            self.async_catch.push(AsyncCatchContext {
                state: exception_to_finally_state,
                label: exception_to_finally,
                pending_field: PENDING_EXCEPTION_FIELD,
            });
            let catch_result = self.lower_statements(&clause.body);
            self.async_catch.pop();
            self.async_finally.pop();
            catch_result?;

            self.emit(LirInst::Branch(finally_entry));
        }

        // Routed exceptions enter the finally with the exception flag
        // set and any pending return cancelled.
        self.emit(LirInst::Label(exception_to_finally));
        let true_t = self.const_boolean(true);
        self.store_scope_field(&scope, HAS_PENDING_EXCEPTION_FIELD, true_t);
        let false_t = self.const_boolean(false);
        self.store_scope_field(&scope, HAS_PENDING_RETURN_FIELD, false_t);
        self.emit(LirInst::Branch(finally_entry));

        self.emit(LirInst::Label(finally_entry));
        self.async_finally.push(AsyncFinallyContext {
            in_finally: true,
            ..finally_ctx.clone()
        });
        self.async_catch.push(AsyncCatchContext {
            state: exception_in_finally_state,
            label: exception_in_finally,
            pending_field: PENDING_EXCEPTION_FIELD,
        });
        let finally_result = self.lower_statements(finally);
        self.async_catch.pop();
        self.async_finally.pop();
        finally_result?;
        self.emit(LirInst::Branch(finally_exit));

        // An exception inside the finally overrides the prior completion.
        self.emit(LirInst::Label(exception_in_finally));
        let true_t = self.const_boolean(true);
        self.store_scope_field(&scope, HAS_PENDING_EXCEPTION_FIELD, true_t);
        let false_t = self.const_boolean(false);
        self.store_scope_field(&scope, HAS_PENDING_RETURN_FIELD, false_t);
        self.emit(LirInst::Branch(finally_exit));

        // Post-finally dispatch on the parked completion.
        self.emit(LirInst::Label(finally_exit));
        let check_return = self.create_label();

        let has_ex = self.load_scope_field(
            &scope,
            HAS_PENDING_EXCEPTION_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        let has_ex_slot =
            self.create_anonymous_slot("$finally_hasEx", ValueStorage::unboxed(JsType::Boolean));
        self.set_temp_slot(has_ex, has_ex_slot);
        self.emit(LirInst::BranchIfFalse {
            cond: has_ex,
            target: check_return,
        });

        let ex = self.load_scope_field(&scope, PENDING_EXCEPTION_FIELD, ValueStorage::object());
        match self.async_catch.last().cloned() {
            Some(outer) => {
                self.store_scope_field(&scope, outer.pending_field, ex);
                self.emit(LirInst::Branch(outer.label));
            }
            None => self.emit(LirInst::AsyncReject { value: ex }),
        }

        self.emit(LirInst::Label(check_return));
        let has_ret = self.load_scope_field(
            &scope,
            HAS_PENDING_RETURN_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        let has_ret_slot =
            self.create_anonymous_slot("$finally_hasReturn", ValueStorage::unboxed(JsType::Boolean));
        self.set_temp_slot(has_ret, has_ret_slot);
        self.emit(LirInst::BranchIfFalse {
            cond: has_ret,
            target: after_try,
        });

        let ret = self.load_scope_field(&scope, PENDING_RETURN_FIELD, ValueStorage::object());
        self.emit(LirInst::Return { value: ret });

        self.emit(LirInst::Label(after_try));
        Ok(())
    }

    /// `try` with a `finally` in a plain generator whose region yields.
    /// Yields suspend through `next()`, so native regions cannot span
    /// them. Same pending-completion channel as the async shape, without
    /// the promise machinery: the post-finally dispatch re-routes a
    /// parked exception to the next-outer region or throws natively
    /// (the caller frame is live at `next()` time), and performs a
    /// parked return.
    fn lower_generator_try_finally(
        &mut self,
        try_block: &[HirStmt],
        catch: Option<&CatchClause>,
        finally: &[HirStmt],
    ) -> Lowered<()> {
        if self.body.generator_info.is_none() {
            return Err(Failed);
        }
        let scope = match self.func.state_scope.clone() {
            Some(scope) => scope,
            None => return Err(Failed),
        };

        let after_try = self.create_label();
        let finally_entry = self.create_label();
        let finally_exit = self.create_label();
        let catch_entry = catch.map(|_| self.create_label());

        // Reset the pending-completion channel on entry.
        let null_t = self.const_null_object();
        self.store_scope_field(&scope, PENDING_EXCEPTION_FIELD, null_t);
        self.store_scope_field(&scope, PENDING_RETURN_FIELD, null_t);
        let false_t = self.const_boolean(false);
        self.store_scope_field(&scope, HAS_PENDING_EXCEPTION_FIELD, false_t);
        self.store_scope_field(&scope, HAS_PENDING_RETURN_FIELD, false_t);

        let region_ctx = GeneratorTryFinallyContext {
            pending_exception_field: PENDING_EXCEPTION_FIELD,
            has_pending_exception_field: HAS_PENDING_EXCEPTION_FIELD,
            pending_return_field: PENDING_RETURN_FIELD,
            has_pending_return_field: HAS_PENDING_RETURN_FIELD,
            finally_entry,
            finally_exit,
            catch_entry,
            in_catch: false,
            in_finally: false,
        };

        self.generator_finally.push(region_ctx.clone());
        let body_result = self.lower_statements(try_block);
        self.generator_finally.pop();
        body_result?;
        self.emit(LirInst::Branch(finally_entry));

        if let Some(clause) = catch {
            let entry = match catch_entry {
                Some(entry) => entry,
                None => return Err(Failed), // created above
            };
            self.emit(LirInst::Label(entry));

            // Take and clear the pending exception; every arrival here
            // comes from a routed throw that set the flags.
            let pending =
                self.load_scope_field(&scope, PENDING_EXCEPTION_FIELD, ValueStorage::object());
            let null_after = self.const_null_object();
            self.store_scope_field(&scope, PENDING_EXCEPTION_FIELD, null_after);
            let false_after = self.const_boolean(false);
            self.store_scope_field(&scope, HAS_PENDING_EXCEPTION_FIELD, false_after);

            if let Some(binding) = clause.binding {
                self.store_to_binding(binding, pending)?;
            }

            // Throws inside the catch body skip the catch and go to the
            // finally.
            self.generator_finally.push(GeneratorTryFinallyContext {
                in_catch: true,
                ..region_ctx.clone()
            });
            let catch_result = self.lower_statements(&clause.body);
            self.generator_finally.pop();
            catch_result?;
            self.emit(LirInst::Branch(finally_entry));
        }

        self.emit(LirInst::Label(finally_entry));
        self.generator_finally.push(GeneratorTryFinallyContext {
            in_finally: true,
            ..region_ctx.clone()
        });
        let finally_result = self.lower_statements(finally);
        self.generator_finally.pop();
        finally_result?;
        self.emit(LirInst::Branch(finally_exit));

        // Post-finally dispatch on the parked completion.
        self.emit(LirInst::Label(finally_exit));
        let check_return = self.create_label();

        let has_ex = self.load_scope_field(
            &scope,
            HAS_PENDING_EXCEPTION_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        let has_ex_slot =
            self.create_anonymous_slot("$finally_hasEx", ValueStorage::unboxed(JsType::Boolean));
        self.set_temp_slot(has_ex, has_ex_slot);
        self.emit(LirInst::BranchIfFalse {
            cond: has_ex,
            target: check_return,
        });

        let ex = self.load_scope_field(&scope, PENDING_EXCEPTION_FIELD, ValueStorage::object());
        match self.generator_finally.last().cloned() {
            Some(outer) => {
                // The flags already describe an exception completion;
                // only the value needs to land in the outer field.
                self.store_scope_field(&scope, outer.pending_exception_field, ex);
                self.emit(LirInst::Branch(outer.exception_target()));
            }
            None => self.emit(LirInst::Throw { value: ex }),
        }

        self.emit(LirInst::Label(check_return));
        let has_ret = self.load_scope_field(
            &scope,
            HAS_PENDING_RETURN_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        let has_ret_slot =
            self.create_anonymous_slot("$finally_hasReturn", ValueStorage::unboxed(JsType::Boolean));
        self.set_temp_slot(has_ret, has_ret_slot);
        self.emit(LirInst::BranchIfFalse {
            cond: has_ret,
            target: after_try,
        });

        let ret = self.load_scope_field(&scope, PENDING_RETURN_FIELD, ValueStorage::object());
        self.emit(LirInst::Return { value: ret });

        self.emit(LirInst::Label(after_try));
        Ok(())
    }
}
