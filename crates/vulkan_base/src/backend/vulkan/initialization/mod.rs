// Vulkan initialization components

pub mod context;
pub mod debug;
pub mod window;

pub use context::*;
pub use debug::{DiagnosticMessage, DiagnosticSeverity, DiagnosticSink, LogSink};
pub use window::*;
