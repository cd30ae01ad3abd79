//! The script sandbox and the host functions scripts can call.
pub mod bindings;
mod engine;
mod registry;

pub use bindings::Eth;
pub use engine::ScriptEngine;
pub use registry::CallbackRegistry;
