use super::*;

#[test]
fn test_lower_source_reports_instruction_counts() {
    let source = r#"
(module
  (fn main ()
    (var x (+ 1 2))
    (return x))
  (fn helper (a:number)
    (return (* a 2))))
"#;
    let metrics = LoweringMetrics::new();
    let lowered = lower_source(source, "main.hir", &metrics).unwrap();
    assert_eq!(lowered.functions.len(), 2);
    assert_eq!(lowered.failed(), 0);

    let report = lowered.report();
    assert_eq!(report.failed, 0);
    for f in &report.functions {
        assert!(f.instructions.is_some());
        assert!(f.failure.is_none());
    }
}

#[test]
fn test_outcomes_keep_source_order() {
    let source = r#"
(module
  (fn alpha () (return))
  (fn beta () (return))
  (fn gamma () (return)))
"#;
    let metrics = LoweringMetrics::new();
    let lowered = lower_source_silent(source, &metrics).unwrap();
    let names: Vec<&str> = lowered.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}

#[test]
fn test_failed_function_does_not_poison_siblings() {
    let source = r#"
(module
  (fn good () (return 1))
  (fn bad () (expr (await 1))))
"#;
    let metrics = LoweringMetrics::new();
    let lowered = lower_source_silent(source, &metrics).unwrap();
    assert_eq!(lowered.failed(), 1);
    assert!(lowered.functions[0].outcome.is_ok());

    let failures: Vec<(&str, &str)> = lowered.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "bad");
    assert!(failures[0].1.contains("await expression found outside"));
}

#[test]
fn test_reader_errors_come_back_as_diagnostics() {
    let metrics = LoweringMetrics::new();
    let result = lower_source_silent("(module (fn broken (", &metrics);
    let errors = result.err().unwrap();
    assert!(!errors.is_empty());
}

#[test]
fn test_listing_renders_bodies_and_failures() {
    let source = r#"
(module
  (fn calc () (return (+ 1 2)))
  (fn bad () (expr (yield 1))))
"#;
    let metrics = LoweringMetrics::new();
    let lowered = lower_source_silent(source, &metrics).unwrap();
    let listing = lowered.listing();
    assert!(listing.contains("fn calc (function)"));
    assert!(listing.contains("return"));
    assert!(listing.contains("fn bad (function): HIR->LIR:"));
}

#[test]
fn test_report_serializes_to_json() {
    let source = r#"
(module
  (fn m () method (return)))
"#;
    let metrics = LoweringMetrics::new();
    let lowered = lower_source_silent(source, &metrics).unwrap();
    let value = serde_json::to_value(lowered.report()).unwrap();
    assert_eq!(value["failed"], 0);
    assert_eq!(value["functions"][0]["name"], "m");
    assert_eq!(value["functions"][0]["kind"], "method");
    assert!(value["functions"][0]["instructions"].is_number());
    assert!(value["functions"][0]["failure"].is_null());
}

#[test]
fn test_metrics_accumulate_across_module() {
    let source = r#"
(module
  (fn one () (return))
  (fn two () (return))
  (fn three () (expr (await 1))))
"#;
    let metrics = LoweringMetrics::new();
    let _ = lower_source_silent(source, &metrics).unwrap();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_attempts(), 3);
    assert_eq!(snapshot.total_successes(), 2);
    assert!(snapshot.last_failure.is_some());
}
