// Compiled tier
// Method-at-a-time compilation of hot methods into pre-decoded instruction tables

pub mod compiler;
pub mod context;

pub use compiler::CompiledMethod;
pub use context::{JitContext, JitStats};
