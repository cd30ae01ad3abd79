use std::sync::atomic::{AtomicU64, Ordering};

/// Something the dispatch loop handled without a callback, or failed to
/// deliver. Published on the bridge's diagnostics channel; nothing in here
/// ever reaches the caller as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The state object could not be turned into a script value
    ConversionFailed { key: String, error: String },
    /// A callback returned an error
    CallbackFailed { key: String, error: String },
    /// A native function called from a callback panicked
    CallbackPanicked { key: String },
    /// Storage writes are reported but not dispatched to scripts yet
    StorageEvent {
        state_address: String,
        key: String,
        value: String,
    },
    /// Block events are consumed but not dispatched to scripts yet
    BlockIgnored { number: u64 },
    /// A payload arrived on a queue that has no route for it
    UnroutedResource { topic: String },
}

/// Counters kept by the dispatch loop
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub blocks: AtomicU64,
    pub object_events: AtomicU64,
    pub callbacks_invoked: AtomicU64,
    pub callback_failures: AtomicU64,
    pub storage_events: AtomicU64,
}

impl DispatchStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks: self.blocks.load(Ordering::SeqCst),
            object_events: self.object_events.load(Ordering::SeqCst),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::SeqCst),
            callback_failures: self.callback_failures.load(Ordering::SeqCst),
            storage_events: self.storage_events.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`DispatchStats`].
///
/// `callbacks_invoked` counts every attempt, successful or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub blocks: u64,
    pub object_events: u64,
    pub callbacks_invoked: u64,
    pub callback_failures: u64,
    pub storage_events: u64,
}
