mod bridge;
mod diagnostics;
mod dispatch;

pub use bridge::{LifecycleState, ScriptBridge};
pub use diagnostics::{Diagnostic, DispatchStats, StatsSnapshot};
pub use dispatch::{Dispatcher, ScriptHost};
