//! Structured control flow: loops, branches, labeled statements, and
//! break/continue target resolution.
//!
//! Every loop label starts a fresh analysis scope: control can arrive from
//! multiple predecessors, so numeric refinements recorded on the fall-in
//! path are cleared at each label.

use crate::ir::lir::LirInst;
use crate::ir::{JsType, LabelId, StorageKind, TempId, ValueStorage};

use super::{HirExpr, HirStmt, Lowered, Lowerer};

/// One entry of the break/continue target stack.
#[derive(Debug, Clone)]
pub(super) struct ControlFlowContext {
    pub break_label: LabelId,
    /// Absent for labeled non-loop statements, which accept `break` only.
    pub continue_label: Option<LabelId>,
    pub name: Option<String>,
}

impl Lowerer<'_> {
    /// Insert a truthiness coercion iff the value is not already a native
    /// boolean the branch instructions can consume: boxed values, generic
    /// references, and unboxed numbers are coerced; everything else passes
    /// through unchanged.
    pub(super) fn coerce_to_branch_condition(&mut self, temp: TempId) -> TempId {
        let storage = self.temp_storage(temp);
        let needs_truthy_check = storage.kind == StorageKind::Boxed
            || (storage.kind == StorageKind::Reference && storage.ty == JsType::Any)
            || (storage.kind == StorageKind::Unboxed && storage.ty == JsType::Number);
        if !needs_truthy_check {
            return temp;
        }
        let dest = self.create_temp();
        self.emit(LirInst::IsTruthy { src: temp, dest });
        self.define_temp_storage(dest, ValueStorage::unboxed(JsType::Boolean));
        dest
    }

    pub(super) fn lower_while(
        &mut self,
        test: &HirExpr,
        body: &[HirStmt],
        label: Option<&str>,
    ) -> Lowered<()> {
        let loop_start = self.create_label();
        let loop_end = self.create_label();

        self.emit(LirInst::Label(loop_start));
        self.clear_numeric_refinements();

        let test_temp = self.lower_expr(test)?;
        let cond = self.coerce_to_branch_condition(test_temp);
        self.emit(LirInst::BranchIfFalse { cond, target: loop_end });

        self.control_flow.push(ControlFlowContext {
            break_label: loop_end,
            continue_label: Some(loop_start),
            name: label.map(str::to_string),
        });
        let result = self.lower_statements(body);
        self.control_flow.pop();
        result?;

        self.emit(LirInst::Branch(loop_start));
        self.emit(LirInst::Label(loop_end));
        self.clear_numeric_refinements();
        Ok(())
    }

    /// The body runs before the first test; `continue` targets the test
    /// label after the body, never the body start.
    pub(super) fn lower_do_while(
        &mut self,
        body: &[HirStmt],
        test: &HirExpr,
        label: Option<&str>,
    ) -> Lowered<()> {
        let loop_start = self.create_label();
        let loop_test = self.create_label();
        let loop_end = self.create_label();

        self.emit(LirInst::Label(loop_start));
        self.clear_numeric_refinements();

        self.control_flow.push(ControlFlowContext {
            break_label: loop_end,
            continue_label: Some(loop_test),
            name: label.map(str::to_string),
        });
        let result = self.lower_statements(body);
        self.control_flow.pop();
        result?;

        self.emit(LirInst::Label(loop_test));
        self.clear_numeric_refinements();

        let test_temp = self.lower_expr(test)?;
        let cond = self.coerce_to_branch_condition(test_temp);
        self.emit(LirInst::BranchIfTrue { cond, target: loop_start });

        self.emit(LirInst::Label(loop_end));
        self.clear_numeric_refinements();
        Ok(())
    }

    pub(super) fn lower_for(
        &mut self,
        init: Option<&HirStmt>,
        test: Option<&HirExpr>,
        update: Option<&HirExpr>,
        body: &[HirStmt],
        label: Option<&str>,
    ) -> Lowered<()> {
        if let Some(init) = init {
            self.lower_statement(init)?;
        }

        let loop_start = self.create_label();
        let update_label = self.create_label();
        let loop_end = self.create_label();

        self.emit(LirInst::Label(loop_start));
        self.clear_numeric_refinements();

        if let Some(test) = test {
            let test_temp = self.lower_expr(test)?;
            let cond = self.coerce_to_branch_condition(test_temp);
            self.emit(LirInst::BranchIfFalse { cond, target: loop_end });
        }

        self.control_flow.push(ControlFlowContext {
            break_label: loop_end,
            continue_label: Some(update_label),
            name: label.map(str::to_string),
        });
        let result = self.lower_statements(body);
        self.control_flow.pop();
        result?;

        self.emit(LirInst::Label(update_label));
        self.clear_numeric_refinements();
        if let Some(update) = update {
            self.lower_expr_discard(update)?;
        }
        self.emit(LirInst::Branch(loop_start));

        self.emit(LirInst::Label(loop_end));
        self.clear_numeric_refinements();
        Ok(())
    }

    pub(super) fn lower_if(
        &mut self,
        test: &HirExpr,
        consequent: &[HirStmt],
        alternate: Option<&[HirStmt]>,
    ) -> Lowered<()> {
        let test_temp = self.lower_expr(test)?;
        let cond = self.coerce_to_branch_condition(test_temp);

        let else_label = self.create_label();
        self.emit(LirInst::BranchIfFalse { cond, target: else_label });
        self.clear_numeric_refinements();

        self.lower_statements(consequent)?;

        match alternate {
            Some(alternate) => {
                let end_label = self.create_label();
                self.emit(LirInst::Branch(end_label));
                self.emit(LirInst::Label(else_label));
                self.clear_numeric_refinements();
                self.lower_statements(alternate)?;
                self.emit(LirInst::Label(end_label));
                self.clear_numeric_refinements();
            }
            None => {
                self.emit(LirInst::Label(else_label));
                self.clear_numeric_refinements();
            }
        }
        Ok(())
    }

    /// A label on a loop names the loop's own context; a label on any other
    /// statement gets a break-only context and an end label after the body.
    pub(super) fn lower_labeled(&mut self, name: &str, body: &HirStmt) -> Lowered<()> {
        match body {
            HirStmt::While { test, body } => self.lower_while(test, body, Some(name)),
            HirStmt::DoWhile { body, test } => self.lower_do_while(body, test, Some(name)),
            HirStmt::For { init, test, update, body } => self.lower_for(
                init.as_deref(),
                test.as_ref(),
                update.as_ref(),
                body,
                Some(name),
            ),
            _ => {
                let end_label = self.create_label();
                self.control_flow.push(ControlFlowContext {
                    break_label: end_label,
                    continue_label: None,
                    name: Some(name.to_string()),
                });
                let result = self.lower_statement(body);
                self.control_flow.pop();
                result?;
                self.emit(LirInst::Label(end_label));
                Ok(())
            }
        }
    }

    /// Walk the context stack innermost-first. Unlabeled `break` matches the
    /// first entry; unlabeled `continue` the first entry with a continue
    /// target; labeled jumps match by name, and a labeled `continue` whose
    /// match has no continue target fails without falling through to an
    /// outer context of the same name.
    fn resolve_control_flow_target(
        &self,
        label: Option<&str>,
        is_continue: bool,
    ) -> Option<(usize, LabelId)> {
        let total = self.control_flow.len();
        for (i, ctx) in self.control_flow.iter().rev().enumerate() {
            let matched = match label {
                Some(name) => ctx.name.as_deref() == Some(name),
                None => !is_continue || ctx.continue_label.is_some(),
            };
            if !matched {
                continue;
            }
            let absolute = total - 1 - i;
            return if is_continue {
                ctx.continue_label.map(|target| (absolute, target))
            } else {
                Some((absolute, ctx.break_label))
            };
        }
        None
    }

    pub(super) fn lower_break(&mut self, label: Option<&str>) -> Lowered<()> {
        match self.resolve_control_flow_target(label, false) {
            Some((absolute, target)) => {
                self.emit_loop_exit(absolute, target);
                Ok(())
            }
            None => self.fail("HIR->LIR: break statement has no matching enclosing target"),
        }
    }

    pub(super) fn lower_continue(&mut self, label: Option<&str>) -> Lowered<()> {
        match self.resolve_control_flow_target(label, true) {
            Some((absolute, target)) => {
                self.emit_loop_exit(absolute, target);
                Ok(())
            }
            None => self.fail("HIR->LIR: continue statement has no matching enclosing target"),
        }
    }

    /// The jump is a structured leave iff it exits at least one protected
    /// region: the matched context was pushed before the innermost try.
    fn emit_loop_exit(&mut self, matched_absolute: usize, target: LabelId) {
        let leaves_protected_region = match self.protected_depth.last() {
            Some(depth) => matched_absolute < *depth,
            None => false,
        };
        if leaves_protected_region {
            self.emit(LirInst::Leave(target));
        } else {
            self.emit(LirInst::Branch(target));
        }
    }
}
