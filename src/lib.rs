pub mod api;
pub mod diagnostic;
pub mod ir;
pub mod metrics;
pub mod span;

// Re-export public API — preserves `osprey::lower_source()` etc.
pub use api::*;
