//! Module-level lowering pipeline.
//!
//! Functions lower in parallel, one session each, but their outcomes keep
//! the module's source order so listings and reports stay stable across
//! runs.

use rayon::prelude::*;
use serde::Serialize;

use crate::ir::hir::HirModule;
use crate::ir::lir::MethodBody;
use crate::ir::lower::lower_function;
use crate::ir::CallableKind;
use crate::metrics::LoweringMetrics;

/// One function's outcome: the lowered body, or the first failure reason
/// the session recorded.
pub struct LoweredFunction {
    pub name: String,
    pub kind: CallableKind,
    pub outcome: Result<MethodBody, String>,
}

/// Per-function outcomes for one module, in source order.
pub struct LoweredModule {
    pub functions: Vec<LoweredFunction>,
}

impl LoweredModule {
    /// Lower every function in the module, one parallel session each.
    ///
    /// A failed function never poisons its siblings; its reason lands in
    /// the outcome (and in the metrics failure slot).
    pub fn lower(module: &HirModule, metrics: &LoweringMetrics) -> Self {
        let functions = module
            .functions
            .par_iter()
            .map(|func| LoweredFunction {
                name: func.name.clone(),
                kind: func.kind,
                outcome: lower_function(func, metrics),
            })
            .collect();
        LoweredModule { functions }
    }

    /// Number of functions that failed to lower.
    pub fn failed(&self) -> usize {
        self.functions
            .iter()
            .filter(|f| f.outcome.is_err())
            .count()
    }

    /// Iterate `(name, reason)` over the failed functions, in source order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.functions.iter().filter_map(|f| match &f.outcome {
            Ok(_) => None,
            Err(reason) => Some((f.name.as_str(), reason.as_str())),
        })
    }

    /// Serializable summary: per function, an instruction count or a
    /// failure reason.
    pub fn report(&self) -> ModuleReport {
        let functions = self
            .functions
            .iter()
            .map(|f| match &f.outcome {
                Ok(body) => FunctionReport {
                    name: f.name.clone(),
                    kind: f.kind.label().to_string(),
                    instructions: Some(body.instructions.len()),
                    failure: None,
                },
                Err(reason) => FunctionReport {
                    name: f.name.clone(),
                    kind: f.kind.label().to_string(),
                    instructions: None,
                    failure: Some(reason.clone()),
                },
            })
            .collect();
        ModuleReport {
            functions,
            failed: self.failed(),
        }
    }

    /// Human-readable listing of every function, lowered bodies rendered
    /// in full and failures shown with their reason.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (i, f) in self.functions.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match &f.outcome {
                Ok(body) => out.push_str(&format!("{}", body)),
                Err(reason) => {
                    out.push_str(&format!("fn {} ({}): {}\n", f.name, f.kind.label(), reason));
                }
            }
        }
        out
    }
}

/// Serializable module summary for `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub functions: Vec<FunctionReport>,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionReport {
    pub name: String,
    pub kind: String,
    pub instructions: Option<usize>,
    pub failure: Option<String>,
}
