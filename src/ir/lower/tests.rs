use super::*;

use crate::ir::hir::{BinOp, BindingInfo, UnOp};
use crate::ir::lir::{CmpOp, RegionKind};
use crate::ir::{CallableKind, LabelId, StorageKind};
use crate::span::Span;

// ─── Builders ─────────────────────────────────────────────────────

fn binding(name: &str, repr: BindingRepr) -> BindingInfo {
    BindingInfo {
        name: name.to_string(),
        repr,
    }
}

fn function(bindings: Vec<BindingInfo>, body: Vec<HirStmt>) -> HirFunction {
    HirFunction {
        name: "f".to_string(),
        kind: CallableKind::Function,
        is_async: false,
        is_generator: false,
        params: Vec::new(),
        bindings,
        state_scope: None,
        body,
    }
}

fn async_function(bindings: Vec<BindingInfo>, body: Vec<HirStmt>) -> HirFunction {
    HirFunction {
        is_async: true,
        state_scope: Some("$state_f".to_string()),
        ..function(bindings, body)
    }
}

fn generator_function(bindings: Vec<BindingInfo>, body: Vec<HirStmt>) -> HirFunction {
    HirFunction {
        is_generator: true,
        state_scope: Some("$state_f".to_string()),
        ..function(bindings, body)
    }
}

fn lower_ok(func: &HirFunction) -> MethodBody {
    let metrics = LoweringMetrics::new();
    match lower_function(func, &metrics) {
        Ok(body) => body,
        Err(reason) => panic!("lowering failed: {reason}"),
    }
}

fn lower_err(func: &HirFunction) -> String {
    let metrics = LoweringMetrics::new();
    match lower_function(func, &metrics) {
        Ok(_) => panic!("expected lowering to fail"),
        Err(reason) => reason,
    }
}

fn count<F: Fn(&LirInst) -> bool>(body: &MethodBody, pred: F) -> usize {
    body.instructions.iter().filter(|inst| pred(inst)).count()
}

fn label_ids(body: &MethodBody) -> Vec<LabelId> {
    body.instructions
        .iter()
        .filter_map(|inst| match inst {
            LirInst::Label(label) => Some(*label),
            _ => None,
        })
        .collect()
}

fn branch_targets(body: &MethodBody) -> Vec<LabelId> {
    body.instructions
        .iter()
        .filter_map(|inst| match inst {
            LirInst::Branch(target) => Some(*target),
            _ => None,
        })
        .collect()
}

fn num(value: f64) -> HirExpr {
    HirExpr::Number(value)
}

fn string(value: &str) -> HirExpr {
    HirExpr::Str(value.to_string())
}

fn read(binding: u32) -> HirExpr {
    HirExpr::Var(BindingId(binding))
}

fn assign(target: u32, value: HirExpr) -> HirExpr {
    HirExpr::Assign {
        target: BindingId(target),
        value: Box::new(value),
    }
}

fn binary(op: BinOp, left: HirExpr, right: HirExpr) -> HirExpr {
    HirExpr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn add(left: HirExpr, right: HirExpr) -> HirExpr {
    binary(BinOp::Add, left, right)
}

fn var_decl(binding: u32, init: HirExpr) -> HirStmt {
    HirStmt::VarDecl {
        binding: BindingId(binding),
        init: Some(init),
    }
}

fn expr_stmt(expr: HirExpr) -> HirStmt {
    HirStmt::Expr(expr)
}

fn await_expr(operand: HirExpr) -> HirExpr {
    HirExpr::Await(Box::new(operand))
}

fn yield_expr(argument: HirExpr) -> HirExpr {
    HirExpr::Yield {
        argument: Some(Box::new(argument)),
        delegate: false,
    }
}

fn call(callee: HirExpr, args: Vec<HirExpr>) -> HirExpr {
    HirExpr::Call {
        callee: Box::new(callee),
        args,
    }
}

fn optional_call(callee: HirExpr, args: Vec<HirExpr>) -> HirExpr {
    HirExpr::OptionalCall {
        callee: Box::new(callee),
        args,
    }
}

fn import(specifier: &str) -> HirExpr {
    HirExpr::Import(Box::new(string(specifier)))
}

fn empty_catch() -> CatchClause {
    CatchClause {
        binding: None,
        body: Vec::new(),
    }
}

// ─── Stores and representations ───────────────────────────────────

#[test]
fn test_dynamic_store_boxes_and_pins() {
    let func = function(
        vec![binding("x", BindingRepr::Dynamic)],
        vec![var_decl(0, num(1.0))],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToObject { .. })), 1);

    // The store copies through an unpinned intermediate; only the final
    // copy is pinned to the binding's slot.
    let copies: Vec<TempId> = body
        .instructions
        .iter()
        .filter_map(|inst| match inst {
            LirInst::CopyTemp { dest, .. } => Some(*dest),
            _ => None,
        })
        .collect();
    assert_eq!(copies.len(), 2);
    assert!(body.temp_slots[copies[0].0 as usize].is_none());
    assert!(body.temp_slots[copies[1].0 as usize].is_some());

    assert_eq!(body.slots.len(), 1);
    assert_eq!(body.slots[0].name, "x");
    assert_eq!(body.slots[0].storage.kind, StorageKind::Reference);
    assert_eq!(body.slots[0].storage.ty, JsType::Any);
}

#[test]
fn test_number_repr_store_stays_unboxed() {
    let func = function(
        vec![binding("n", BindingRepr::Number)],
        vec![var_decl(0, num(1.0))],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToObject { .. })), 0);
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToNumber { .. })), 0);
    assert_eq!(body.slots[0].storage.kind, StorageKind::Unboxed);
    assert_eq!(body.slots[0].storage.ty, JsType::Number);
}

#[test]
fn test_null_literal_boxes_to_reference_slot() {
    let func = function(
        vec![binding("x", BindingRepr::Dynamic)],
        vec![var_decl(0, HirExpr::Null)],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::ConstNull { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToObject { .. })), 1);
    assert_eq!(body.slots[0].storage.kind, StorageKind::Reference);
    assert_eq!(body.slots[0].storage.ty, JsType::Any);
}

#[test]
fn test_param_assignment_stores_parameter() {
    let mut func = function(
        vec![binding("p", BindingRepr::Dynamic)],
        vec![expr_stmt(assign(0, num(1.0)))],
    );
    func.params = vec![BindingId(0)];
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::StoreParameter { .. })), 1);
    // Parameters live in the argument slot, never in a local slot.
    assert!(body.slots.is_empty());
    assert_eq!(count(&body, |i| matches!(i, LirInst::CopyTemp { .. })), 0);
}

#[test]
fn test_param_read_reloads_each_time() {
    let mut func = function(
        vec![binding("p", BindingRepr::Dynamic)],
        vec![expr_stmt(read(0)), expr_stmt(read(0))],
    );
    func.params = vec![BindingId(0)];
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::LoadParameter { .. })), 2);
}

#[test]
fn test_missing_storage_read_fails() {
    let func = function(
        vec![binding("x", BindingRepr::Dynamic)],
        vec![expr_stmt(read(0))],
    );
    assert_eq!(lower_err(&func), "HIR->LIR: no storage for variable 'x'");
}

// ─── Numeric refinements ──────────────────────────────────────────

#[test]
fn test_numeric_refinement_skips_repeat_coercion() {
    let func = function(
        vec![
            binding("x", BindingRepr::Dynamic),
            binding("y", BindingRepr::Dynamic),
            binding("z", BindingRepr::Dynamic),
        ],
        vec![
            var_decl(0, num(1.0)),
            var_decl(1, add(read(0), num(2.0))),
            var_decl(2, add(read(0), num(3.0))),
        ],
    );
    let body = lower_ok(&func);

    // The first read of x coerces; the second reuses the refined temp.
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToNumber { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::AddNumber { .. })), 2);
}

#[test]
fn test_store_drops_stale_refinement() {
    let func = function(
        vec![
            binding("x", BindingRepr::Dynamic),
            binding("y", BindingRepr::Dynamic),
            binding("z", BindingRepr::Dynamic),
        ],
        vec![
            var_decl(0, num(1.0)),
            var_decl(1, add(read(0), num(2.0))),
            expr_stmt(assign(0, string("s"))),
            var_decl(2, add(read(0), num(3.0))),
        ],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToNumber { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::AddNumber { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::AddDynamic { .. })), 1);
}

#[test]
fn test_suspendable_bodies_skip_refinements() {
    let func = async_function(
        vec![
            binding("x", BindingRepr::Dynamic),
            binding("y", BindingRepr::Dynamic),
            binding("z", BindingRepr::Dynamic),
        ],
        vec![
            var_decl(0, num(1.0)),
            var_decl(1, add(read(0), num(2.0))),
            var_decl(2, add(read(0), num(3.0))),
        ],
    );
    let body = lower_ok(&func);

    // No refinement tracking in a resumable body: both reads re-coerce.
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToNumber { .. })), 2);
}

// ─── Operators ────────────────────────────────────────────────────

#[test]
fn test_string_concat_stays_raw() {
    let func = function(vec![], vec![expr_stmt(add(string("a"), string("b")))]);
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::ConcatStrings { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToObject { .. })), 0);
}

#[test]
fn test_mixed_add_goes_dynamic() {
    let func = function(vec![], vec![expr_stmt(add(num(1.0), string("b")))]);
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::AddDynamic { .. })), 1);
    // Only the number operand needs boxing; the string is already a
    // reference.
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToObject { .. })), 1);
}

#[test]
fn test_numeric_compare_stays_native() {
    let func = function(
        vec![],
        vec![expr_stmt(binary(BinOp::Lt, num(1.0), num(2.0)))],
    );
    let body = lower_ok(&func);

    assert_eq!(
        count(&body, |i| matches!(
            i,
            LirInst::CompareNumber { op: CmpOp::Lt, .. }
        )),
        1
    );
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToNumber { .. })), 0);
}

#[test]
fn test_strict_equality_on_mixed_types_goes_dynamic() {
    let func = function(
        vec![],
        vec![expr_stmt(binary(BinOp::EqStrict, num(1.0), string("x")))],
    );
    let body = lower_ok(&func);

    assert_eq!(
        count(&body, |i| matches!(
            i,
            LirInst::CompareDynamic { op: CmpOp::Eq, .. }
        )),
        1
    );
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToObject { .. })), 1);
}

#[test]
fn test_negate_non_number_fails() {
    let func = function(
        vec![],
        vec![expr_stmt(HirExpr::Unary {
            op: UnOp::Neg,
            operand: Box::new(string("s")),
        })],
    );
    let reason = lower_err(&func);
    assert!(reason.contains("negation of a non-numeric operand"), "{reason}");
}

// ─── Loops and branches ───────────────────────────────────────────

#[test]
fn test_dynamic_loop_condition_gets_truthy_check() {
    let func = function(
        vec![binding("x", BindingRepr::Dynamic)],
        vec![
            var_decl(0, num(1.0)),
            HirStmt::While {
                test: read(0),
                body: vec![],
            },
        ],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::IsTruthy { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::BranchIfFalse { .. })), 1);
}

#[test]
fn test_native_bool_condition_skips_truthy_check() {
    let func = function(
        vec![],
        vec![HirStmt::While {
            test: HirExpr::Bool(true),
            body: vec![],
        }],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::IsTruthy { .. })), 0);
    assert_eq!(count(&body, |i| matches!(i, LirInst::ConvertToBoolean { .. })), 0);
}

#[test]
fn test_do_while_body_precedes_test() {
    let func = function(
        vec![binding("x", BindingRepr::Dynamic)],
        vec![HirStmt::DoWhile {
            body: vec![var_decl(0, num(1.0))],
            test: HirExpr::Bool(false),
        }],
    );
    let body = lower_ok(&func);

    let body_pos = body
        .instructions
        .iter()
        .position(|i| matches!(i, LirInst::ConstNumber { .. }))
        .unwrap();
    let test_pos = body
        .instructions
        .iter()
        .position(|i| matches!(i, LirInst::ConstBoolean { .. }))
        .unwrap();
    assert!(body_pos < test_pos);

    // The back edge targets the body start.
    let labels = label_ids(&body);
    let back_edge = body
        .instructions
        .iter()
        .find_map(|i| match i {
            LirInst::BranchIfTrue { target, .. } => Some(*target),
            _ => None,
        })
        .unwrap();
    assert_eq!(back_edge, labels[0]);
}

#[test]
fn test_do_while_continue_targets_test_label() {
    let func = function(
        vec![],
        vec![HirStmt::DoWhile {
            body: vec![HirStmt::Continue { label: None }],
            test: HirExpr::Bool(false),
        }],
    );
    let body = lower_ok(&func);

    let labels = label_ids(&body);
    let branches = branch_targets(&body);
    // The continue jumps to the test label, not back to the body start.
    assert_eq!(branches, vec![labels[1]]);
    assert_ne!(labels[0], labels[1]);
}

#[test]
fn test_for_continue_targets_update() {
    let func = function(
        vec![binding("i", BindingRepr::Dynamic)],
        vec![
            var_decl(0, num(0.0)),
            HirStmt::For {
                init: None,
                test: None,
                update: Some(assign(0, add(read(0), num(1.0)))),
                body: vec![HirStmt::Continue { label: None }],
            },
        ],
    );
    let body = lower_ok(&func);

    let labels = label_ids(&body);
    let branches = branch_targets(&body);
    // continue -> update label, loop back edge -> loop start.
    assert_eq!(branches, vec![labels[1], labels[0]]);
}

#[test]
fn test_unlabeled_continue_targets_innermost_loop() {
    let func = function(
        vec![],
        vec![HirStmt::While {
            test: HirExpr::Bool(true),
            body: vec![HirStmt::While {
                test: HirExpr::Bool(true),
                body: vec![HirStmt::Continue { label: None }],
            }],
        }],
    );
    let body = lower_ok(&func);

    let labels = label_ids(&body);
    let branches = branch_targets(&body);
    // Inner loop start is the second label emitted.
    assert_eq!(branches[0], labels[1]);
}

#[test]
fn test_labeled_continue_targets_outer_loop() {
    let func = function(
        vec![],
        vec![HirStmt::Labeled {
            name: "outer".to_string(),
            body: Box::new(HirStmt::While {
                test: HirExpr::Bool(true),
                body: vec![HirStmt::While {
                    test: HirExpr::Bool(true),
                    body: vec![HirStmt::Continue {
                        label: Some("outer".to_string()),
                    }],
                }],
            }),
        }],
    );
    let body = lower_ok(&func);

    let labels = label_ids(&body);
    let branches = branch_targets(&body);
    assert_eq!(branches[0], labels[0]);
}

#[test]
fn test_labeled_break_exits_labeled_block() {
    let func = function(
        vec![],
        vec![HirStmt::Labeled {
            name: "a".to_string(),
            body: Box::new(HirStmt::Block(vec![HirStmt::Break {
                label: Some("a".to_string()),
            }])),
        }],
    );
    let body = lower_ok(&func);

    let labels = label_ids(&body);
    let branches = branch_targets(&body);
    assert_eq!(branches, vec![labels[0]]);
}

#[test]
fn test_labeled_continue_on_non_loop_fails() {
    let func = function(
        vec![],
        vec![HirStmt::Labeled {
            name: "a".to_string(),
            body: Box::new(HirStmt::Block(vec![HirStmt::Continue {
                label: Some("a".to_string()),
            }])),
        }],
    );
    let reason = lower_err(&func);
    assert_eq!(
        reason,
        "HIR->LIR: continue statement has no matching enclosing target"
    );
}

#[test]
fn test_break_without_target_fails() {
    let func = function(vec![], vec![HirStmt::Break { label: None }]);
    let reason = lower_err(&func);
    assert_eq!(
        reason,
        "HIR->LIR: break statement has no matching enclosing target"
    );
}

#[test]
fn test_break_out_of_protected_region_leaves() {
    let func = function(
        vec![],
        vec![HirStmt::While {
            test: HirExpr::Bool(true),
            body: vec![HirStmt::Try {
                try_block: vec![HirStmt::Break { label: None }],
                catch: None,
                finally: Some(vec![]),
            }],
        }],
    );
    let body = lower_ok(&func);

    let loop_end = body
        .instructions
        .iter()
        .find_map(|i| match i {
            LirInst::BranchIfFalse { target, .. } => Some(*target),
            _ => None,
        })
        .unwrap();
    // The break leaves the finally region instead of branching.
    assert!(body
        .instructions
        .iter()
        .any(|i| matches!(i, LirInst::Leave(t) if *t == loop_end)));
    assert!(!branch_targets(&body).contains(&loop_end));
}

// ─── Native try regions ───────────────────────────────────────────

#[test]
fn test_sync_try_catch_builds_catch_region() {
    let func = function(
        vec![binding("e", BindingRepr::Dynamic)],
        vec![HirStmt::Try {
            try_block: vec![HirStmt::Throw(string("x"))],
            catch: Some(CatchClause {
                binding: Some(BindingId(0)),
                body: vec![],
            }),
            finally: None,
        }],
    );
    let body = lower_ok(&func);

    assert_eq!(body.exception_regions.len(), 1);
    assert_eq!(body.exception_regions[0].kind, RegionKind::Catch);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::StoreException { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::UnwrapException { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Leave(_))), 2);

    let slot_names: Vec<&str> = body.slots.iter().map(|s| s.name.as_str()).collect();
    assert!(slot_names.contains(&"$catch_ex"));
    assert!(slot_names.contains(&"$catch_value"));
    assert!(slot_names.contains(&"e"));
}

#[test]
fn test_sync_try_finally_builds_finally_region() {
    let func = function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![],
            catch: None,
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    assert_eq!(body.exception_regions.len(), 1);
    assert_eq!(body.exception_regions[0].kind, RegionKind::Finally);
    assert_eq!(count(&body, |i| matches!(i, LirInst::EndFinally)), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Leave(_))), 1);
}

#[test]
fn test_try_catch_finally_nests_catch_inside_finally() {
    let func = function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![],
            catch: Some(empty_catch()),
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    assert_eq!(body.exception_regions.len(), 2);
    let catch_region = &body.exception_regions[0];
    let finally_region = &body.exception_regions[1];
    assert_eq!(catch_region.kind, RegionKind::Catch);
    assert_eq!(finally_region.kind, RegionKind::Finally);
    // The finally's protected region opens first and wraps the catch's.
    let labels = label_ids(&body);
    assert_eq!(finally_region.protected_start, labels[0]);
    assert_ne!(catch_region.protected_start, finally_region.protected_start);
    // Catch without a binding skips the unwrap.
    assert_eq!(count(&body, |i| matches!(i, LirInst::UnwrapException { .. })), 0);
    assert_eq!(count(&body, |i| matches!(i, LirInst::StoreException { .. })), 1);
}

#[test]
fn test_bare_try_block_lowers_inline() {
    let func = function(
        vec![binding("x", BindingRepr::Dynamic)],
        vec![HirStmt::Try {
            try_block: vec![var_decl(0, num(1.0))],
            catch: None,
            finally: None,
        }],
    );
    let body = lower_ok(&func);

    assert!(body.exception_regions.is_empty());
    assert_eq!(count(&body, |i| matches!(i, LirInst::Leave(_))), 0);
    assert!(body.return_epilogue.is_none());
}

// ─── Return epilogue ──────────────────────────────────────────────

#[test]
fn test_plain_return_emits_return() {
    let func = function(vec![], vec![HirStmt::Return(Some(num(1.0)))]);
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::Return { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Leave(_))), 0);
    assert!(body.return_epilogue.is_none());
}

#[test]
fn test_return_in_protected_region_routes_via_epilogue() {
    let func = function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![HirStmt::Return(Some(num(1.0)))],
            catch: None,
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    let epilogue = body.return_epilogue.as_ref().unwrap();
    assert!(epilogue.needs_block);
    assert!(epilogue.slot.is_some());
    assert_eq!(count(&body, |i| matches!(i, LirInst::Return { .. })), 0);
    assert!(body
        .instructions
        .iter()
        .any(|i| matches!(i, LirInst::Leave(t) if *t == epilogue.label)));

    let slot_names: Vec<&str> = body.slots.iter().map(|s| s.name.as_str()).collect();
    assert!(slot_names.contains(&"$return"));
}

#[test]
fn test_second_protected_return_reuses_epilogue() {
    let try_with_return = |value: f64| HirStmt::Try {
        try_block: vec![HirStmt::Return(Some(num(value)))],
        catch: None,
        finally: Some(vec![]),
    };
    let func = function(vec![], vec![try_with_return(1.0), try_with_return(2.0)]);
    let body = lower_ok(&func);

    let epilogue = body.return_epilogue.as_ref().unwrap();
    let epilogue_leaves = count(&body, |i| matches!(i, LirInst::Leave(t) if *t == epilogue.label));
    assert_eq!(epilogue_leaves, 2);

    let return_slots = body.slots.iter().filter(|s| s.name == "$return").count();
    assert_eq!(return_slots, 1);
}

// ─── Await ────────────────────────────────────────────────────────

#[test]
fn test_await_outside_async_fails() {
    let func = function(vec![], vec![expr_stmt(await_expr(num(1.0)))]);
    let reason = lower_err(&func);
    assert_eq!(
        reason,
        "HIR->LIR: await expression found outside async function context"
    );
}

#[test]
fn test_nested_awaits_number_inner_first() {
    let func = async_function(
        vec![],
        vec![expr_stmt(await_expr(await_expr(num(1.0))))],
    );
    let body = lower_ok(&func);

    let info = body.async_info.as_ref().unwrap();
    assert!(info.has_awaits);
    assert_eq!(info.await_points.len(), 2);

    let ids: Vec<u32> = body
        .instructions
        .iter()
        .filter_map(|i| match i {
            LirInst::Await { await_id, .. } => Some(*await_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![0, 1]);

    // Every state registers a resume label, all distinct, and none of
    // them is a label instruction: resumption re-enters after the await.
    assert_eq!(info.resume_labels.len(), 2);
    let (first_state, _) = info.resume_labels[0];
    let (second_state, _) = info.resume_labels[1];
    assert_ne!(first_state, second_state);
    for (_, resume) in &info.resume_labels {
        assert!(!body
            .instructions
            .iter()
            .any(|i| matches!(i, LirInst::Label(l) if l == resume)));
    }
}

#[test]
fn test_await_reject_route_only_inside_catch() {
    let func = async_function(
        vec![],
        vec![
            expr_stmt(await_expr(num(1.0))),
            HirStmt::Try {
                try_block: vec![expr_stmt(await_expr(num(2.0)))],
                catch: Some(empty_catch()),
                finally: None,
            },
        ],
    );
    let body = lower_ok(&func);

    let rejects: Vec<bool> = body
        .instructions
        .iter()
        .filter_map(|i| match i {
            LirInst::Await { reject, .. } => Some(reject.is_some()),
            _ => None,
        })
        .collect();
    assert_eq!(rejects, vec![false, true]);

    let routed = body
        .instructions
        .iter()
        .find_map(|i| match i {
            LirInst::Await {
                reject: Some(route), ..
            } => Some(route.pending_field.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(routed, "_pendingException");
}

// ─── Throw routing ────────────────────────────────────────────────

#[test]
fn test_plain_throw_is_native() {
    let func = function(vec![], vec![HirStmt::Throw(string("boom"))]);
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::AsyncReject { .. })), 0);
}

#[test]
fn test_async_throw_without_catch_rejects() {
    let func = async_function(
        vec![],
        vec![expr_stmt(await_expr(num(1.0))), HirStmt::Throw(string("boom"))],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::AsyncReject { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 0);
}

#[test]
fn test_async_throw_without_state_scope_stays_native() {
    let mut func = async_function(
        vec![],
        vec![expr_stmt(await_expr(num(1.0))), HirStmt::Throw(string("boom"))],
    );
    func.state_scope = None;
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::AsyncReject { .. })), 0);
}

#[test]
fn test_async_throw_inside_catch_region_routes_to_handler() {
    let func = async_function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![
                expr_stmt(await_expr(num(1.0))),
                HirStmt::Throw(string("x")),
            ],
            catch: Some(empty_catch()),
            finally: None,
        }],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::AsyncReject { .. })), 0);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 0);

    // Pre-clear, the routed store, and the handler's take-and-clear.
    let pending_stores = count(&body, |i| {
        matches!(i, LirInst::StoreScopeField { field, .. } if field == "_pendingException")
    });
    assert_eq!(pending_stores, 3);

    let info = body.async_info.as_ref().unwrap();
    let (_, catch_label) = info.resume_labels[0];
    assert!(branch_targets(&body).contains(&catch_label));
    assert!(label_ids(&body).contains(&catch_label));
}

// ─── Async try/finally ────────────────────────────────────────────

#[test]
fn test_async_try_finally_shape() {
    let func = async_function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![expr_stmt(await_expr(num(1.0)))],
            catch: None,
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    // Two routing states plus the await.
    let info = body.async_info.as_ref().unwrap();
    assert_eq!(info.resume_labels.len(), 3);

    // No native region machinery on this path.
    assert!(body.exception_regions.is_empty());
    assert_eq!(count(&body, |i| matches!(i, LirInst::EndFinally)), 0);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Leave(_))), 0);

    // Exit dispatch: unhandled exception rejects, parked return returns.
    assert_eq!(count(&body, |i| matches!(i, LirInst::AsyncReject { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Return { .. })), 1);

    let slot_names: Vec<&str> = body.slots.iter().map(|s| s.name.as_str()).collect();
    assert!(slot_names.contains(&"$finally_hasEx"));
    assert!(slot_names.contains(&"$finally_hasReturn"));
}

#[test]
fn test_async_try_catch_finally_adds_catch_state() {
    let func = async_function(
        vec![binding("e", BindingRepr::Dynamic)],
        vec![HirStmt::Try {
            try_block: vec![expr_stmt(await_expr(num(1.0)))],
            catch: Some(CatchClause {
                binding: Some(BindingId(0)),
                body: vec![],
            }),
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    let info = body.async_info.as_ref().unwrap();
    // exception-to-finally, exception-in-finally, catch, await.
    assert_eq!(info.resume_labels.len(), 4);

    // The catch handler is a real block on this path.
    let (_, catch_label) = info.resume_labels[2];
    assert!(label_ids(&body).contains(&catch_label));
}

#[test]
fn test_async_return_inside_finally_region_parks_completion() {
    let func = async_function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![
                expr_stmt(await_expr(num(1.0))),
                HirStmt::Return(Some(num(2.0))),
            ],
            catch: None,
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    // Only the exit dispatch returns; the statement itself parks.
    assert_eq!(count(&body, |i| matches!(i, LirInst::Return { .. })), 1);
    let return_stores = count(&body, |i| {
        matches!(i, LirInst::StoreScopeField { field, .. } if field == "_pendingReturnValue")
    });
    assert_eq!(return_stores, 2);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Leave(_))), 0);
}

// ─── Generators ───────────────────────────────────────────────────

#[test]
fn test_yield_outside_generator_fails() {
    let func = function(vec![], vec![expr_stmt(yield_expr(num(1.0)))]);
    let reason = lower_err(&func);
    assert_eq!(
        reason,
        "HIR->LIR: yield expression found outside generator function context"
    );
}

#[test]
fn test_generator_entry_dispatch_spliced() {
    let func = generator_function(vec![], vec![expr_stmt(yield_expr(num(1.0)))]);
    let body = lower_ok(&func);

    let info = body.generator_info.as_ref().unwrap();
    assert_eq!(info.resume_labels.len(), 1);

    match (&body.instructions[0], &body.instructions[1]) {
        (
            LirInst::GeneratorStateSwitch { arms, fallthrough },
            LirInst::Label(entry),
        ) => {
            assert_eq!(arms.len(), 1);
            assert_eq!(arms[0], info.resume_labels[0]);
            assert_eq!(fallthrough, entry);
        }
        other => panic!("unexpected entry shape: {other:?}"),
    }
}

#[test]
fn test_generator_without_yields_skips_dispatch() {
    let func = generator_function(vec![], vec![HirStmt::Return(Some(num(1.0)))]);
    let body = lower_ok(&func);

    assert!(!matches!(
        body.instructions.first(),
        Some(LirInst::GeneratorStateSwitch { .. })
    ));
}

#[test]
fn test_async_generator_keeps_plain_entry() {
    let mut func = generator_function(vec![], vec![expr_stmt(yield_expr(num(1.0)))]);
    func.is_async = true;
    let body = lower_ok(&func);

    let info = body.generator_info.as_ref().unwrap();
    assert_eq!(info.resume_labels.len(), 1);
    assert!(!matches!(
        body.instructions.first(),
        Some(LirInst::GeneratorStateSwitch { .. })
    ));
}

#[test]
fn test_plain_yield_owns_throw_and_return() {
    let func = generator_function(vec![], vec![expr_stmt(yield_expr(num(1.0)))]);
    let body = lower_ok(&func);

    let handles: Vec<bool> = body
        .instructions
        .iter()
        .filter_map(|i| match i {
            LirInst::Yield {
                handles_throw_return,
                ..
            } => Some(*handles_throw_return),
            _ => None,
        })
        .collect();
    assert_eq!(handles, vec![true]);
    assert_eq!(
        count(&body, |i| {
            matches!(i, LirInst::LoadScopeField { field, .. } if field == "_hasReturn")
        }),
        0
    );
}

#[test]
fn test_yield_inside_finally_region_delivers_completions() {
    let func = generator_function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![expr_stmt(yield_expr(num(1.0)))],
            catch: None,
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    let handles: Vec<bool> = body
        .instructions
        .iter()
        .filter_map(|i| match i {
            LirInst::Yield {
                handles_throw_return,
                ..
            } => Some(*handles_throw_return),
            _ => None,
        })
        .collect();
    assert_eq!(handles, vec![false]);

    // The post-yield routing consults the injected completion fields.
    assert!(count(&body, |i| {
        matches!(i, LirInst::LoadScopeField { field, .. } if field == "_hasReturn")
    }) >= 1);
    assert!(count(&body, |i| {
        matches!(i, LirInst::LoadScopeField { field, .. } if field == "_hasResumeException")
    }) >= 1);
}

#[test]
fn test_generator_return_through_finally_parks() {
    let func = generator_function(
        vec![],
        vec![HirStmt::Try {
            try_block: vec![
                expr_stmt(yield_expr(num(1.0))),
                HirStmt::Return(Some(num(2.0))),
            ],
            catch: None,
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::Return { .. })), 1);
    // Entry reset, the two post-yield delivery arms, and the parked return.
    let return_stores = count(&body, |i| {
        matches!(i, LirInst::StoreScopeField { field, .. } if field == "_pendingReturnValue")
    });
    assert_eq!(return_stores, 4);
    // Unhandled pending exceptions surface natively: the caller frame is
    // live during next().
    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 1);
}

#[test]
fn test_generator_throw_routes_through_catch_then_finally() {
    let func = generator_function(
        vec![binding("e", BindingRepr::Dynamic)],
        vec![HirStmt::Try {
            try_block: vec![
                expr_stmt(yield_expr(num(1.0))),
                HirStmt::Throw(string("x")),
            ],
            catch: Some(CatchClause {
                binding: Some(BindingId(0)),
                body: vec![],
            }),
            finally: Some(vec![]),
        }],
    );
    let body = lower_ok(&func);

    // Reset, the two post-yield delivery arms, the routed throw, and the
    // catch's take-and-clear.
    let pending_stores = count(&body, |i| {
        matches!(i, LirInst::StoreScopeField { field, .. } if field == "_pendingException")
    });
    assert_eq!(pending_stores, 5);
    let flag_stores = count(&body, |i| {
        matches!(i, LirInst::StoreScopeField { field, .. } if field == "_hasPendingException")
    });
    assert_eq!(flag_stores, 5);

    // The only native throw is the exit dispatch re-raise.
    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 1);
    assert!(body.exception_regions.is_empty());
}

#[test]
fn test_generator_try_without_yields_uses_native_regions() {
    let func = generator_function(
        vec![],
        vec![
            expr_stmt(yield_expr(num(1.0))),
            HirStmt::Try {
                try_block: vec![HirStmt::Throw(string("x"))],
                catch: Some(empty_catch()),
                finally: None,
            },
        ],
    );
    let body = lower_ok(&func);

    assert_eq!(body.exception_regions.len(), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Throw { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::StoreException { .. })), 1);
    // The entry dispatch still covers the yield before the try.
    assert!(matches!(
        body.instructions.first(),
        Some(LirInst::GeneratorStateSwitch { .. })
    ));
}

#[test]
fn test_yield_star_drives_iterator_protocol() {
    let func = generator_function(
        vec![],
        vec![expr_stmt(HirExpr::Yield {
            argument: Some(Box::new(string("it"))),
            delegate: true,
        })],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::GetIterator { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::Yield { .. })), 1);

    let mut methods: Vec<String> = body
        .instructions
        .iter()
        .filter_map(|i| match i {
            LirInst::CallMethod { method, .. } => Some(method.clone()),
            _ => None,
        })
        .collect();
    methods.sort();
    assert_eq!(methods, vec!["next", "return", "throw"]);

    // One resume state for the single yield site in the loop.
    let info = body.generator_info.as_ref().unwrap();
    assert_eq!(info.resume_labels.len(), 1);

    // The loop yields raw step values and finishes with a return arm.
    assert_eq!(count(&body, |i| matches!(i, LirInst::Return { .. })), 1);
}

// ─── Calls and imports ────────────────────────────────────────────

#[test]
fn test_call_boxes_unboxed_arguments() {
    let func = function(
        vec![
            binding("f", BindingRepr::Dynamic),
            binding("n", BindingRepr::Number),
        ],
        vec![
            var_decl(0, HirExpr::Undefined),
            var_decl(1, num(2.0)),
            expr_stmt(call(read(0), vec![read(1), string("s")])),
        ],
    );
    let body = lower_ok(&func);

    let (callee, args) = body
        .instructions
        .iter()
        .find_map(|inst| match inst {
            LirInst::Call { callee, args, .. } => Some((*callee, args.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(args.len(), 2);
    // The unboxed number boxes for the dynamic call; the string is
    // already a reference and passes through.
    assert_eq!(body.temps[args[0].0 as usize].kind, StorageKind::Boxed);
    assert_eq!(body.temps[args[1].0 as usize].kind, StorageKind::Reference);
    assert_eq!(body.temps[callee.0 as usize].kind, StorageKind::Reference);
}

#[test]
fn test_optional_call_joins_result_on_both_paths() {
    let func = function(
        vec![binding("f", BindingRepr::Dynamic)],
        vec![
            var_decl(0, HirExpr::Undefined),
            expr_stmt(optional_call(read(0), vec![])),
        ],
    );
    let body = lower_ok(&func);

    assert_eq!(count(&body, |i| matches!(i, LirInst::IsUndefined { .. })), 1);
    assert_eq!(count(&body, |i| matches!(i, LirInst::IsNull { .. })), 1);

    // Both nullish checks branch to the same arm.
    let targets: Vec<LabelId> = body
        .instructions
        .iter()
        .filter_map(|inst| match inst {
            LirInst::BranchIfTrue { target, .. } => Some(*target),
            _ => None,
        })
        .collect();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0], targets[1]);

    // The nullish arm writes undefined into the call's result temp, so
    // the join reads one temporary regardless of path.
    let call_dest = body
        .instructions
        .iter()
        .find_map(|inst| match inst {
            LirInst::Call { dest, .. } => Some(*dest),
            _ => None,
        })
        .unwrap();
    let undef_writes: Vec<TempId> = body
        .instructions
        .iter()
        .filter_map(|inst| match inst {
            LirInst::ConstUndefined { dest } => Some(*dest),
            _ => None,
        })
        .collect();
    assert!(undef_writes.contains(&call_dest));
}

#[test]
fn test_import_without_filename_uses_empty_module_id() {
    let func = function(vec![], vec![expr_stmt(import("./dep"))]);
    let body = lower_ok(&func);

    let module_id = body
        .instructions
        .iter()
        .find_map(|inst| match inst {
            LirInst::CallImport { module_id, .. } => Some(*module_id),
            _ => None,
        })
        .unwrap();
    let empty = body
        .instructions
        .iter()
        .find_map(|inst| match inst {
            LirInst::ConstString { value, dest } if value.is_empty() => Some(*dest),
            _ => None,
        })
        .unwrap();
    assert_eq!(module_id, empty);
}

#[test]
fn test_import_reads_stored_filename_binding() {
    let func = function(
        vec![binding("__filename", BindingRepr::Dynamic)],
        vec![
            var_decl(0, string("entry.js")),
            expr_stmt(import("./dep")),
        ],
    );
    let body = lower_ok(&func);

    let module_id = body
        .instructions
        .iter()
        .find_map(|inst| match inst {
            LirInst::CallImport { module_id, .. } => Some(*module_id),
            _ => None,
        })
        .unwrap();
    // The stored binding's pinned temp, not the empty-string fallback.
    assert!(body.temp_slots[module_id.0 as usize].is_some());
    let has_empty = body.instructions.iter().any(
        |inst| matches!(inst, LirInst::ConstString { value, .. } if value.is_empty()),
    );
    assert!(!has_empty);
}

#[test]
fn test_import_unreadable_filename_falls_back_clean() {
    // `__filename` is bound but nothing stored to it yet; the import
    // falls back without touching the failure channel.
    let metrics = LoweringMetrics::new();
    let func = function(
        vec![binding("__filename", BindingRepr::Dynamic)],
        vec![expr_stmt(import("./dep"))],
    );
    assert!(lower_function(&func, &metrics).is_ok());
    assert!(metrics.last_failure().is_none());
}

// ─── Session bookkeeping ──────────────────────────────────────────

#[test]
fn test_sequence_points_pass_through() {
    let span = Span::new(0, 3, 9);
    let func = function(
        vec![],
        vec![HirStmt::SequencePoint(span), HirStmt::Return(None)],
    );
    let body = lower_ok(&func);

    let spans: Vec<Span> = body
        .instructions
        .iter()
        .filter_map(|i| match i {
            LirInst::SequencePoint { span } => Some(*span),
            _ => None,
        })
        .collect();
    assert_eq!(spans, vec![span]);
}

#[test]
fn test_metrics_capture_failure_reason() {
    let metrics = LoweringMetrics::new();
    let func = function(
        vec![binding("x", BindingRepr::Dynamic)],
        vec![expr_stmt(read(0))],
    );
    assert!(lower_function(&func, &metrics).is_err());
    assert_eq!(
        metrics.last_failure().as_deref(),
        Some("HIR->LIR: no storage for variable 'x'")
    );
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_attempts(), 1);
    assert_eq!(snapshot.total_successes(), 0);
}

#[test]
fn test_variable_initializer_failure_names_binding() {
    let func = function(
        vec![
            binding("x", BindingRepr::Dynamic),
            binding("y", BindingRepr::Dynamic),
        ],
        // y's initializer reads x before anything stored to it.
        vec![var_decl(1, read(0))],
    );
    let reason = lower_err(&func);
    // The inner read records first; the initializer wrapper defers to it.
    assert_eq!(reason, "HIR->LIR: no storage for variable 'x'");
}

#[test]
fn test_repin_produces_copy_and_keeps_original_slot() {
    let func = function(vec![], vec![]);
    let metrics = LoweringMetrics::new();
    let mut session = Lowerer::new(&func, &metrics);

    let first = session.create_anonymous_slot("$a", ValueStorage::object());
    let second = session.create_anonymous_slot("$b", ValueStorage::object());
    let temp = session.const_undefined();

    // First pin sticks; pinning to the same slot again is a no-op.
    assert_eq!(session.ensure_temp_mapped_to_slot(temp, first), temp);
    assert_eq!(session.ensure_temp_mapped_to_slot(temp, first), temp);

    // A different slot yields a copy-initialized fresh temp; the original
    // keeps its mapping.
    let copy = session.ensure_temp_mapped_to_slot(temp, second);
    assert_ne!(copy, temp);
    assert_eq!(session.temp_slot(temp), Some(first));
    assert_eq!(session.temp_slot(copy), Some(second));

    let copied_from = session.body.instructions.iter().any(
        |inst| matches!(inst, LirInst::CopyTemp { src, dest } if *src == temp && *dest == copy),
    );
    assert!(copied_from);
}

#[test]
fn test_label_count_covers_all_labels() {
    let func = function(
        vec![],
        vec![HirStmt::While {
            test: HirExpr::Bool(true),
            body: vec![HirStmt::If {
                test: HirExpr::Bool(false),
                consequent: vec![HirStmt::Break { label: None }],
                alternate: None,
            }],
        }],
    );
    let body = lower_ok(&func);

    let max_label = body
        .instructions
        .iter()
        .filter_map(|i| match i {
            LirInst::Label(l) => Some(l.0),
            _ => None,
        })
        .max()
        .unwrap();
    assert!(body.label_count > max_label);
}
