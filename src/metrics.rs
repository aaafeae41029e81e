//! Lowering pipeline metrics.
//!
//! One [`LoweringMetrics`] per pipeline run, shared by reference across
//! worker threads. Counters split by callable kind; the first failure
//! reason of the run is kept verbatim for the summary line.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::ir::CallableKind;

const KIND_ORDER: [CallableKind; 4] = [
    CallableKind::Script,
    CallableKind::Function,
    CallableKind::Arrow,
    CallableKind::Method,
];

fn kind_index(kind: CallableKind) -> usize {
    match kind {
        CallableKind::Script => 0,
        CallableKind::Function => 1,
        CallableKind::Arrow => 2,
        CallableKind::Method => 3,
    }
}

#[derive(Debug, Default)]
pub struct LoweringMetrics {
    state: Mutex<MetricsState>,
}

#[derive(Debug, Default)]
struct MetricsState {
    counters: [KindCounter; 4],
    last_failure: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct KindCounter {
    attempts: u64,
    successes: u64,
}

impl LoweringMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished session for `kind`.
    pub fn record_attempt(&self, kind: CallableKind, ok: bool) {
        let mut state = self.state.lock().unwrap();
        let counter = &mut state.counters[kind_index(kind)];
        counter.attempts += 1;
        if ok {
            counter.successes += 1;
        }
    }

    /// Record `reason`, replacing whatever was there.
    pub fn record_failure(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.last_failure = Some(reason.to_string());
    }

    /// Record `reason` only when no reason is recorded yet. The first
    /// failure of a session usually names the root cause; later ones
    /// describe the unwind.
    pub fn record_failure_if_unset(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        if state.last_failure.is_none() {
            state.last_failure = Some(reason.to_string());
        }
    }

    pub fn last_failure(&self) -> Option<String> {
        self.state.lock().unwrap().last_failure.clone()
    }

    /// Copy out the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        let kinds = KIND_ORDER
            .iter()
            .map(|&kind| {
                let counter = state.counters[kind_index(kind)];
                KindSnapshot {
                    kind: kind.label().to_string(),
                    attempts: counter.attempts,
                    successes: counter.successes,
                }
            })
            .collect();
        MetricsSnapshot {
            kinds,
            last_failure: state.last_failure.clone(),
        }
    }
}

/// Counter state at one point in time, serializable for `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub kinds: Vec<KindSnapshot>,
    pub last_failure: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindSnapshot {
    pub kind: String,
    pub attempts: u64,
    pub successes: u64,
}

impl MetricsSnapshot {
    pub fn total_attempts(&self) -> u64 {
        self.kinds.iter().map(|k| k.attempts).sum()
    }

    pub fn total_successes(&self) -> u64 {
        self.kinds.iter().map(|k| k.successes).sum()
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10} {:>9} {:>9}", "kind", "attempts", "lowered")?;
        for k in &self.kinds {
            if k.attempts == 0 {
                continue;
            }
            writeln!(f, "{:<10} {:>9} {:>9}", k.kind, k.attempts, k.successes)?;
        }
        write!(
            f,
            "{:<10} {:>9} {:>9}",
            "total",
            self.total_attempts(),
            self.total_successes()
        )?;
        if let Some(reason) = &self.last_failure {
            write!(f, "\nlast failure: {}", reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_split_by_kind() {
        let metrics = LoweringMetrics::new();
        metrics.record_attempt(CallableKind::Function, true);
        metrics.record_attempt(CallableKind::Function, false);
        metrics.record_attempt(CallableKind::Arrow, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_attempts(), 3);
        assert_eq!(snapshot.total_successes(), 2);
        let func = snapshot
            .kinds
            .iter()
            .find(|k| k.kind == CallableKind::Function.label())
            .unwrap();
        assert_eq!(func.attempts, 2);
        assert_eq!(func.successes, 1);
    }

    #[test]
    fn test_first_failure_reason_wins() {
        let metrics = LoweringMetrics::new();
        metrics.record_failure_if_unset("root cause");
        metrics.record_failure_if_unset("unwind detail");
        assert_eq!(metrics.last_failure().as_deref(), Some("root cause"));

        metrics.record_failure("explicit overwrite");
        assert_eq!(
            metrics.last_failure().as_deref(),
            Some("explicit overwrite")
        );
    }

    #[test]
    fn test_display_skips_idle_kinds() {
        let metrics = LoweringMetrics::new();
        metrics.record_attempt(CallableKind::Script, true);
        let rendered = metrics.snapshot().to_string();
        assert!(rendered.contains("script"));
        assert!(!rendered.contains("arrow"));
    }
}
