pub(crate) use crate::diagnostic::{render_diagnostics, Diagnostic};
pub(crate) use crate::ir::hir::{text, HirModule};
pub(crate) use crate::metrics::LoweringMetrics;

#[cfg(test)]
mod tests;

/// Lower every function in a module, one parallel session each.
///
/// Always returns a [`LoweredModule`]; per-function failures sit in the
/// outcomes rather than aborting the module.
pub fn lower_module(module: &HirModule, metrics: &LoweringMetrics) -> LoweredModule {
    LoweredModule::lower(module, metrics)
}

/// Parse a textual HIR module and lower every function in it.
///
/// Reader diagnostics render against the source text and come back as
/// the error. Lowering failures do not error here; they land in the
/// returned module's outcomes.
pub fn lower_source(
    source: &str,
    filename: &str,
    metrics: &LoweringMetrics,
) -> Result<LoweredModule, Vec<Diagnostic>> {
    match text::parse_module(source, 0) {
        Ok(module) => Ok(lower_module(&module, metrics)),
        Err(errors) => {
            render_diagnostics(&errors, filename, source);
            Err(errors)
        }
    }
}

/// Like [`lower_source`], but reader diagnostics come back unrendered.
pub fn lower_source_silent(
    source: &str,
    metrics: &LoweringMetrics,
) -> Result<LoweredModule, Vec<Diagnostic>> {
    let module = text::parse_module(source, 0)?;
    Ok(lower_module(&module, metrics))
}

pub(crate) mod pipeline;
pub use pipeline::{FunctionReport, LoweredFunction, LoweredModule, ModuleReport};
