//! Await and yield lowering, plus the suspend-point pre-pass.
//!
//! Every suspend point allocates a resume-state id and a resume label; the
//! resume point is the instruction following the suspend instruction, and
//! the label registry ties state ids to those points for entry dispatch.
//! Resume-state ids start at 1; state 0 is initial entry and is never given
//! to a suspend point.

use crate::ir::lir::{AwaitPoint, LirInst, RejectRoute, YieldPoint};
use crate::ir::{JsType, TempId, ValueStorage};

use super::{Failed, HirExpr, HirStmt, Lowered, Lowerer};

// Scope fields the resume machinery writes before re-entering the body.
const HAS_RETURN_FIELD: &str = "_hasReturn";
const RETURN_VALUE_FIELD: &str = "_returnValue";
const HAS_RESUME_EXCEPTION_FIELD: &str = "_hasResumeException";
const RESUME_EXCEPTION_FIELD: &str = "_resumeException";
const RESUME_VALUE_FIELD: &str = "_resumeValue";

// Scope fields recording an active `yield*` delegation.
const YIELD_STAR_MODE_FIELD: &str = "_yieldStarMode";
const YIELD_STAR_TARGET_FIELD: &str = "_yieldStarTarget";

impl Lowerer<'_> {
    // ─── Await ────────────────────────────────────────────────────

    pub(super) fn lower_await(&mut self, operand: &HirExpr) -> Lowered<TempId> {
        // Checked before the operand so a misplaced await contributes no
        // instructions to the stream.
        if self.body.async_info.is_none() {
            return self.fail("HIR->LIR: await expression found outside async function context");
        }

        let operand = self.lower_expr(operand)?;
        let value = self.ensure_object(operand);

        // Allocation order matters for nested awaits: the operand's awaits
        // already claimed their ids above.
        let (await_id, state) = match self.body.async_info.as_mut() {
            Some(info) => (info.allocate_await_id(), info.allocate_state()),
            None => return Err(Failed), // guarded at entry
        };
        let resume = self.create_label();

        let dest = self.create_temp();
        self.define_temp_storage(dest, ValueStorage::object());

        if let Some(info) = self.body.async_info.as_mut() {
            info.await_points.push(AwaitPoint {
                await_id,
                state,
                resume,
                result: dest,
            });
            info.register_resume_label(state, resume);
        }

        // Inside an async catch region the runtime must not reject the outer
        // promise on a faulted awaitable; it delivers the fault to the catch
        // state through the pending field instead.
        let reject = self.async_catch.last().map(|ctx| RejectRoute {
            state: ctx.state,
            pending_field: ctx.pending_field.to_string(),
        });

        self.emit(LirInst::Await {
            value,
            await_id,
            state,
            resume,
            dest,
            reject,
        });
        Ok(dest)
    }

    // ─── Yield ────────────────────────────────────────────────────

    pub(super) fn lower_yield(
        &mut self,
        argument: Option<&HirExpr>,
        delegate: bool,
    ) -> Lowered<TempId> {
        if self.body.generator_info.is_none() {
            return self.fail("HIR->LIR: yield expression found outside generator function context");
        }

        if delegate {
            return self.lower_yield_star(argument);
        }

        let value = match argument {
            Some(arg) => self.lower_expr(arg)?,
            None => self.const_undefined(),
        };
        let value = self.ensure_object(value);

        let state = match self.body.generator_info.as_mut() {
            Some(info) => info.allocate_state(),
            None => return Err(Failed), // guarded at entry
        };
        let resume = self.create_label();

        let dest = self.create_temp();
        self.define_temp_storage(dest, ValueStorage::object());

        if let Some(info) = self.body.generator_info.as_mut() {
            info.yield_points.push(YieldPoint {
                state,
                resume,
                result: dest,
            });
            info.register_resume_label(state, resume);
        }

        // Inside a routed try/finally the yield site must not consume a
        // `return`/`throw` delivered at resumption itself; explicit checks
        // after the yield route them through the finally's pending fields.
        let routed = self.func.state_scope.is_some() && !self.generator_finally.is_empty();

        self.emit(LirInst::Yield {
            value,
            state,
            resume,
            dest,
            handles_throw_return: !routed,
        });

        if routed {
            self.emit_resume_delivery_routing();
        }
        Ok(dest)
    }

    /// Post-yield checks for yields under a routed try/finally: a `return`
    /// delivered at resumption moves into the pending-return fields, a
    /// `throw` into the pending-exception fields, and both branch into the
    /// finally so it runs before the completion takes effect.
    fn emit_resume_delivery_routing(&mut self) {
        let (ctx, scope) = match (
            self.generator_finally.last().cloned(),
            self.func.state_scope.clone(),
        ) {
            (Some(ctx), Some(scope)) => (ctx, scope),
            _ => return,
        };
        let target = if ctx.in_finally {
            ctx.finally_exit
        } else {
            ctx.finally_entry
        };

        let true_t = self.const_boolean(true);
        let false_t = self.const_boolean(false);
        let null_t = self.const_null_object();

        let has_return = self.load_scope_field(
            &scope,
            HAS_RETURN_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        let no_return = self.create_label();
        self.emit(LirInst::BranchIfFalse {
            cond: has_return,
            target: no_return,
        });

        let return_value = self.load_scope_field(&scope, RETURN_VALUE_FIELD, ValueStorage::object());
        self.store_scope_field(&scope, ctx.pending_return_field, return_value);
        self.store_scope_field(&scope, ctx.has_pending_return_field, true_t);
        self.store_scope_field(&scope, ctx.has_pending_exception_field, false_t);
        self.store_scope_field(&scope, HAS_RETURN_FIELD, false_t);
        self.store_scope_field(&scope, ctx.pending_exception_field, null_t);
        self.emit(LirInst::Branch(target));

        self.emit(LirInst::Label(no_return));

        let has_throw = self.load_scope_field(
            &scope,
            HAS_RESUME_EXCEPTION_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        let no_throw = self.create_label();
        self.emit(LirInst::BranchIfFalse {
            cond: has_throw,
            target: no_throw,
        });

        let exception = self.load_scope_field(&scope, RESUME_EXCEPTION_FIELD, ValueStorage::object());
        self.store_scope_field(&scope, ctx.pending_exception_field, exception);
        self.store_scope_field(&scope, ctx.pending_return_field, null_t);
        self.store_scope_field(&scope, ctx.has_pending_exception_field, true_t);
        self.store_scope_field(&scope, ctx.has_pending_return_field, false_t);
        self.store_scope_field(&scope, HAS_RESUME_EXCEPTION_FIELD, false_t);
        self.emit(LirInst::Branch(target));

        self.emit(LirInst::Label(no_throw));
    }

    // ─── Yield delegation ─────────────────────────────────────────

    /// Lower `yield*`. The delegate becomes an iterator held in scope
    /// fields so the delegation survives suspension; each loop turn forwards
    /// whatever verb resumed us (next/throw/return) to the delegate, then
    /// either re-yields its value or completes with its final value. A
    /// delegate finished by `return` completes the outer generator
    /// immediately.
    fn lower_yield_star(&mut self, argument: Option<&HirExpr>) -> Lowered<TempId> {
        let scope = match self.func.state_scope.clone() {
            Some(scope) => scope,
            // Delegation state has nowhere to live without a state scope.
            None => return Err(Failed),
        };

        let delegate = match argument {
            Some(arg) => self.lower_expr(arg)?,
            None => self.const_undefined(),
        };
        let delegate = self.ensure_object(delegate);

        // Final completion value of the whole `yield*` expression.
        let result = self.create_temp();
        self.define_temp_storage(result, ValueStorage::object());

        let iter = self.create_temp();
        self.emit(LirInst::GetIterator {
            src: delegate,
            dest: iter,
        });
        self.define_temp_storage(iter, ValueStorage::object());

        let mode_on = self.const_number(1.0);
        self.store_scope_field(&scope, YIELD_STAR_MODE_FIELD, mode_on);
        self.store_scope_field(&scope, YIELD_STAR_TARGET_FIELD, iter);

        // Whether the current delegated step was triggered by
        // generator.return(...); pinned so it survives the yield inside the
        // loop.
        let was_return = self.create_temp();
        self.define_temp_storage(was_return, ValueStorage::unboxed(JsType::Boolean));
        let was_return_slot = self.create_anonymous_slot(
            "$yieldStar_wasReturn",
            ValueStorage::unboxed(JsType::Boolean),
        );
        self.set_temp_slot(was_return, was_return_slot);

        let false_t = self.const_boolean(false);
        self.emit(LirInst::CopyTemp {
            src: false_t,
            dest: was_return,
        });

        let loop_start = self.create_label();
        let call_next = self.create_label();
        let call_throw = self.create_label();
        let call_return = self.create_label();
        let after_call = self.create_label();
        let done_label = self.create_label();
        let return_complete = self.create_label();
        let normal_complete = self.create_label();

        // One resume point serves every turn of the delegation loop.
        let state = match self.body.generator_info.as_mut() {
            Some(info) => info.allocate_state(),
            None => return Err(Failed), // guarded by lower_yield
        };
        let resume = self.create_label();
        let yield_result = self.create_temp();
        self.define_temp_storage(yield_result, ValueStorage::object());
        if let Some(info) = self.body.generator_info.as_mut() {
            info.yield_points.push(YieldPoint {
                state,
                resume,
                result: yield_result,
            });
            info.register_resume_label(state, resume);
        }

        self.emit(LirInst::Label(loop_start));

        // Reload the target each turn; the local would be gone after a
        // suspension.
        let iter_obj = self.load_scope_field(&scope, YIELD_STAR_TARGET_FIELD, ValueStorage::object());

        let has_return = self.load_scope_field(
            &scope,
            HAS_RETURN_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        self.emit(LirInst::BranchIfTrue {
            cond: has_return,
            target: call_return,
        });
        let has_throw = self.load_scope_field(
            &scope,
            HAS_RESUME_EXCEPTION_FIELD,
            ValueStorage::unboxed(JsType::Boolean),
        );
        self.emit(LirInst::BranchIfTrue {
            cond: has_throw,
            target: call_throw,
        });
        self.emit(LirInst::Branch(call_next));

        // Shared destination of the three forwarding calls.
        let step_result = self.create_temp();
        self.define_temp_storage(step_result, ValueStorage::object());

        self.emit(LirInst::Label(call_return));
        {
            let true_t = self.const_boolean(true);
            self.emit(LirInst::CopyTemp {
                src: true_t,
                dest: was_return,
            });
            let return_arg = self.load_scope_field(&scope, RETURN_VALUE_FIELD, ValueStorage::object());
            // Consume the outer flag before forwarding.
            self.store_scope_field(&scope, HAS_RETURN_FIELD, false_t);
            self.emit(LirInst::CallMethod {
                receiver: iter_obj,
                method: "return".to_string(),
                args: vec![return_arg],
                dest: step_result,
            });
            self.emit(LirInst::Branch(after_call));
        }

        self.emit(LirInst::Label(call_throw));
        {
            self.emit(LirInst::CopyTemp {
                src: false_t,
                dest: was_return,
            });
            let throw_arg =
                self.load_scope_field(&scope, RESUME_EXCEPTION_FIELD, ValueStorage::object());
            self.store_scope_field(&scope, HAS_RESUME_EXCEPTION_FIELD, false_t);
            self.emit(LirInst::CallMethod {
                receiver: iter_obj,
                method: "throw".to_string(),
                args: vec![throw_arg],
                dest: step_result,
            });
            self.emit(LirInst::Branch(after_call));
        }

        self.emit(LirInst::Label(call_next));
        {
            self.emit(LirInst::CopyTemp {
                src: false_t,
                dest: was_return,
            });
            let next_arg = self.load_scope_field(&scope, RESUME_VALUE_FIELD, ValueStorage::object());
            self.emit(LirInst::CallMethod {
                receiver: iter_obj,
                method: "next".to_string(),
                args: vec![next_arg],
                dest: step_result,
            });
            self.emit(LirInst::Branch(after_call));
        }

        self.emit(LirInst::Label(after_call));

        let done_key = self.const_string("done");
        let value_key = self.const_string("value");

        let done_obj = self.create_temp();
        self.emit(LirInst::GetProperty {
            object: step_result,
            key: done_key,
            dest: done_obj,
        });
        self.define_temp_storage(done_obj, ValueStorage::object());

        let done_bool = self.create_temp();
        self.emit(LirInst::ConvertToBoolean {
            src: done_obj,
            dest: done_bool,
        });
        self.define_temp_storage(done_bool, ValueStorage::unboxed(JsType::Boolean));
        self.emit(LirInst::BranchIfTrue {
            cond: done_bool,
            target: done_label,
        });

        let yielded = self.create_temp();
        self.emit(LirInst::GetProperty {
            object: step_result,
            key: value_key,
            dest: yielded,
        });
        self.define_temp_storage(yielded, ValueStorage::object());

        // Resume-delivered throw/return is forwarded by the loop head, not
        // consumed at the yield site.
        self.emit(LirInst::Yield {
            value: yielded,
            state,
            resume,
            dest: yield_result,
            handles_throw_return: false,
        });
        self.emit(LirInst::Branch(loop_start));

        self.emit(LirInst::Label(done_label));

        let final_value = self.create_temp();
        self.emit(LirInst::GetProperty {
            object: step_result,
            key: value_key,
            dest: final_value,
        });
        self.define_temp_storage(final_value, ValueStorage::object());

        let mode_off = self.const_number(0.0);
        self.store_scope_field(&scope, YIELD_STAR_MODE_FIELD, mode_off);
        let null_t = self.const_null_object();
        self.store_scope_field(&scope, YIELD_STAR_TARGET_FIELD, null_t);

        self.emit(LirInst::BranchIfTrue {
            cond: was_return,
            target: return_complete,
        });
        self.emit(LirInst::Branch(normal_complete));

        self.emit(LirInst::Label(return_complete));
        self.emit(LirInst::Return { value: final_value });

        self.emit(LirInst::Label(normal_complete));
        self.emit(LirInst::CopyTemp {
            src: final_value,
            dest: result,
        });

        Ok(result)
    }
}

// ─── Suspend-point pre-pass ───────────────────────────────────────

/// Count awaits anywhere under `stmts`, handler bodies included.
pub(super) fn count_await_exprs(stmts: &[HirStmt]) -> usize {
    count_exprs(stmts, &|e| matches!(e, HirExpr::Await(_)))
}

/// Count yields anywhere under `stmts`, handler bodies included.
pub(super) fn count_yield_exprs(stmts: &[HirStmt]) -> usize {
    count_exprs(stmts, &|e| matches!(e, HirExpr::Yield { .. }))
}

fn count_exprs(stmts: &[HirStmt], pred: &dyn Fn(&HirExpr) -> bool) -> usize {
    stmts.iter().map(|s| count_in_stmt(s, pred)).sum()
}

fn count_in_stmt(stmt: &HirStmt, pred: &dyn Fn(&HirExpr) -> bool) -> usize {
    match stmt {
        HirStmt::SequencePoint(_) => 0,
        HirStmt::VarDecl { init, .. } => init.as_ref().map_or(0, |e| count_in_expr(e, pred)),
        HirStmt::Expr(expr) => count_in_expr(expr, pred),
        HirStmt::Return(value) => value.as_ref().map_or(0, |e| count_in_expr(e, pred)),
        HirStmt::If {
            test,
            consequent,
            alternate,
        } => {
            count_in_expr(test, pred)
                + count_exprs(consequent, pred)
                + alternate.as_deref().map_or(0, |s| count_exprs(s, pred))
        }
        HirStmt::While { test, body } => count_in_expr(test, pred) + count_exprs(body, pred),
        HirStmt::DoWhile { body, test } => count_exprs(body, pred) + count_in_expr(test, pred),
        HirStmt::For {
            init,
            test,
            update,
            body,
        } => {
            init.as_deref().map_or(0, |s| count_in_stmt(s, pred))
                + test.as_ref().map_or(0, |e| count_in_expr(e, pred))
                + update.as_ref().map_or(0, |e| count_in_expr(e, pred))
                + count_exprs(body, pred)
        }
        HirStmt::Block(body) => count_exprs(body, pred),
        HirStmt::Labeled { body, .. } => count_in_stmt(body, pred),
        HirStmt::Break { .. } | HirStmt::Continue { .. } => 0,
        HirStmt::Throw(expr) => count_in_expr(expr, pred),
        HirStmt::Try {
            try_block,
            catch,
            finally,
        } => {
            count_exprs(try_block, pred)
                + catch.as_ref().map_or(0, |c| count_exprs(&c.body, pred))
                + finally.as_deref().map_or(0, |s| count_exprs(s, pred))
        }
    }
}

fn count_in_expr(expr: &HirExpr, pred: &dyn Fn(&HirExpr) -> bool) -> usize {
    let here = pred(expr) as usize;
    here + match expr {
        HirExpr::Number(_)
        | HirExpr::Str(_)
        | HirExpr::Bool(_)
        | HirExpr::Null
        | HirExpr::Undefined
        | HirExpr::Var(_) => 0,
        HirExpr::Assign { value, .. } => count_in_expr(value, pred),
        HirExpr::Binary { left, right, .. } => {
            count_in_expr(left, pred) + count_in_expr(right, pred)
        }
        HirExpr::Unary { operand, .. } => count_in_expr(operand, pred),
        HirExpr::Call { callee, args } | HirExpr::OptionalCall { callee, args } => {
            count_in_expr(callee, pred)
                + args.iter().map(|a| count_in_expr(a, pred)).sum::<usize>()
        }
        HirExpr::Await(operand) => count_in_expr(operand, pred),
        HirExpr::Yield { argument, .. } => {
            argument.as_deref().map_or(0, |a| count_in_expr(a, pred))
        }
        HirExpr::Import(specifier) => count_in_expr(specifier, pred),
    }
}
