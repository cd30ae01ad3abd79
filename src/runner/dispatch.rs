//! The dispatch loop: the only place events, callbacks and the sandbox meet.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use rhai::{Dynamic, FnPtr};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::diagnostics::{Diagnostic, DispatchStats};
use crate::error::ScriptError;
use crate::events::{
    Reaction, Resource, StateObjectEvent, StateObjectSnapshot, StorageState, Topic,
};
use crate::scripting::{CallbackRegistry, ScriptEngine};

/// What the dispatcher needs from a sandbox.
pub trait ScriptHost {
    type Callback: Clone;
    type Value;

    fn convert(&mut self, snapshot: &StateObjectSnapshot) -> Result<Self::Value, ScriptError>;

    fn invoke(&mut self, callback: &Self::Callback, argument: Self::Value) -> Result<(), ScriptError>;
}

impl ScriptHost for ScriptEngine {
    type Callback = FnPtr;
    type Value = Dynamic;

    fn convert(&mut self, snapshot: &StateObjectSnapshot) -> Result<Dynamic, ScriptError> {
        self.to_sandbox_value(snapshot)
    }

    fn invoke(&mut self, callback: &FnPtr, argument: Dynamic) -> Result<(), ScriptError> {
        self.call(callback, (argument,)).map(|_| ())
    }
}

/// Requests marshaled onto the dispatch thread from other threads.
pub(crate) enum Command {
    Evaluate {
        source: String,
        responder: oneshot::Sender<Result<serde_json::Value, ScriptError>>,
    },
    Bind {
        name: String,
        value: serde_json::Value,
        responder: oneshot::Sender<Result<(), ScriptError>>,
    },
}

/// Receiving ends owned by the loop. Dropping them is what closes the queues.
pub(crate) struct Queues {
    pub shutdown: oneshot::Receiver<()>,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub blocks: mpsc::Receiver<Reaction>,
    pub objects: mpsc::Receiver<Reaction>,
}

/// Routes payloads to registered callbacks.
pub struct Dispatcher<H: ScriptHost> {
    host: H,
    registry: Rc<RefCell<CallbackRegistry<H::Callback>>>,
    diagnostics: broadcast::Sender<Diagnostic>,
    stats: Arc<DispatchStats>,
}

impl<H: ScriptHost> Dispatcher<H> {
    pub fn new(
        host: H,
        registry: Rc<RefCell<CallbackRegistry<H::Callback>>>,
        diagnostics: broadcast::Sender<Diagnostic>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            host,
            registry,
            diagnostics,
            stats,
        }
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Block events have no callback path; they are consumed so the queue
    /// keeps its capacity.
    pub fn handle_block(&mut self, reaction: Reaction) {
        match reaction.resource {
            Resource::Block(block) => {
                DispatchStats::bump(&self.stats.blocks);
                trace!(target: "dispatch", "Block #{} received", block.number);
                self.report(Diagnostic::BlockIgnored {
                    number: block.number,
                });
            }
            Resource::StateObject(_) | Resource::Storage(_) => self.unrouted(&reaction.topic),
        }
    }

    pub fn handle_object(&mut self, reaction: Reaction) {
        match reaction.resource {
            Resource::StateObject(event) => {
                DispatchStats::bump(&self.stats.object_events);
                self.dispatch_state_object(&event);
            }
            Resource::Storage(storage) => {
                DispatchStats::bump(&self.stats.storage_events);
                self.report_storage(&storage);
            }
            Resource::Block(_) => self.unrouted(&reaction.topic),
        }
    }

    /// Call every callback registered for the event's address, in
    /// registration order. The list is copied first: callbacks registered
    /// while this event is being dispatched start with the next event.
    fn dispatch_state_object(&mut self, event: &StateObjectEvent) {
        let key = event.address.to_hex();
        let callbacks = self.registry.borrow().lookup(&key).to_vec();

        if callbacks.is_empty() {
            trace!(target: "dispatch", "No callbacks for {}", key);
            return;
        }

        debug!(target: "dispatch", "Dispatching {} to {} callback(s)", key, callbacks.len());

        for callback in &callbacks {
            let value = match self.host.convert(&event.snapshot) {
                Ok(value) => value,
                Err(e) => {
                    warn!(target: "dispatch", "Could not convert state object {}: {}", key, e);
                    DispatchStats::bump(&self.stats.callback_failures);
                    self.report(Diagnostic::ConversionFailed {
                        key: key.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            DispatchStats::bump(&self.stats.callbacks_invoked);

            let host = &mut self.host;
            match panic::catch_unwind(AssertUnwindSafe(|| host.invoke(callback, value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(target: "dispatch", "Callback for {} failed: {}", key, e);
                    DispatchStats::bump(&self.stats.callback_failures);
                    self.report(Diagnostic::CallbackFailed {
                        key: key.clone(),
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    error!(target: "dispatch", "Callback for {} panicked", key);
                    DispatchStats::bump(&self.stats.callback_failures);
                    self.report(Diagnostic::CallbackPanicked { key: key.clone() });
                }
            }
        }
    }

    fn report_storage(&self, storage: &StorageState) {
        let state_address = storage.state_address.to_hex();
        let key = format!("0x{}", hex::encode(&storage.key));
        let value = format!("0x{}", hex::encode(&storage.value));

        info!(target: "dispatch", "Storage {} [{}] = {}", state_address, key, value);
        self.report(Diagnostic::StorageEvent {
            state_address,
            key,
            value,
        });
    }

    fn unrouted(&self, topic: &Topic) {
        trace!(target: "dispatch", "Ignoring unrouted payload on {}", topic);
        self.report(Diagnostic::UnroutedResource {
            topic: topic.to_string(),
        });
    }

    fn report(&self, diagnostic: Diagnostic) {
        // No subscribers is fine
        let _ = self.diagnostics.send(diagnostic);
    }
}

impl Dispatcher<ScriptEngine> {
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Evaluate { source, responder } => {
                let result = self
                    .host
                    .evaluate(&source)
                    .map(ScriptEngine::to_host_value);

                if let Err(e) = &result {
                    debug!(target: "dispatch", "Evaluation failed: {}", e);
                }
                let _ = responder.send(result);
            }
            Command::Bind {
                name,
                value,
                responder,
            } => {
                let result = self
                    .host
                    .to_sandbox_value(&value)
                    .and_then(|value| self.host.bind(&name, value));
                let _ = responder.send(result);
            }
        }
    }
}

/// Run until the shutdown signal fires or its sender is dropped.
///
/// Shutdown is checked first on every iteration, so nothing already queued
/// is dispatched once it has been requested.
pub(crate) async fn run(mut dispatcher: Dispatcher<ScriptEngine>, mut queues: Queues) {
    info!(target: "dispatch", "Dispatch loop started");

    loop {
        tokio::select! {
            biased;

            _ = &mut queues.shutdown => {
                debug!(target: "dispatch", "Shutdown signal received");
                break;
            }
            Some(command) = queues.commands.recv() => dispatcher.handle_command(command),
            Some(reaction) = queues.blocks.recv() => dispatcher.handle_block(reaction),
            Some(reaction) = queues.objects.recv() => dispatcher.handle_object(reaction),
            else => break,
        }
    }

    let registry = dispatcher.registry.borrow();
    info!(
        target: "dispatch",
        "Dispatch loop stopped with {} callback(s) under {} key(s)",
        registry.callback_count(),
        registry.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Address, Block};
    use crate::runner::StatsSnapshot;

    /// Records calls as (callback id, nonce) pairs.
    #[derive(Default)]
    struct FakeHost {
        calls: Vec<(u32, u64)>,
        fail_conversion: bool,
        failing: Vec<u32>,
        panicking: Vec<u32>,
    }

    impl ScriptHost for FakeHost {
        type Callback = u32;
        type Value = u64;

        fn convert(&mut self, snapshot: &StateObjectSnapshot) -> Result<u64, ScriptError> {
            if self.fail_conversion {
                return Err(ScriptError::Conversion("unsupported".to_string()));
            }
            Ok(snapshot.nonce)
        }

        fn invoke(&mut self, callback: &u32, argument: u64) -> Result<(), ScriptError> {
            if self.panicking.contains(callback) {
                panic!("native function blew up");
            }
            self.calls.push((*callback, argument));
            if self.failing.contains(callback) {
                return Err(ScriptError::Runtime("boom".to_string()));
            }
            Ok(())
        }
    }

    struct Harness {
        dispatcher: Dispatcher<FakeHost>,
        registry: Rc<RefCell<CallbackRegistry<u32>>>,
        diagnostics: broadcast::Receiver<Diagnostic>,
        stats: Arc<DispatchStats>,
    }

    fn harness(host: FakeHost) -> Harness {
        let registry = Rc::new(RefCell::new(CallbackRegistry::new()));
        let (diagnostics_tx, diagnostics) = broadcast::channel(16);
        let stats = Arc::new(DispatchStats::default());
        let dispatcher = Dispatcher::new(host, registry.clone(), diagnostics_tx, stats.clone());

        Harness {
            dispatcher,
            registry,
            diagnostics,
            stats,
        }
    }

    fn state_object(address: &[u8], nonce: u64) -> Reaction {
        let address = Address::new(address.to_vec());
        let snapshot = StateObjectSnapshot {
            address: address.clone(),
            balance: "0".to_string(),
            nonce,
            root: vec![],
            code_hash: vec![],
            is_contract: false,
        };
        Reaction {
            topic: Topic::object(&address),
            resource: Resource::StateObject(StateObjectEvent::new(snapshot)),
        }
    }

    fn storage(address: &[u8]) -> Reaction {
        let state_address = Address::new(address.to_vec());
        Reaction {
            topic: Topic::object(&state_address),
            resource: Resource::Storage(StorageState {
                state_address,
                key: vec![0x01],
                value: vec![0x02],
            }),
        }
    }

    fn block(number: u64) -> Reaction {
        Reaction {
            topic: Topic::new_block(),
            resource: Resource::Block(Block {
                number,
                hash: vec![],
                parent_hash: vec![],
                coinbase: Address::default(),
                timestamp: 0,
            }),
        }
    }

    #[test]
    fn callbacks_fire_once_per_event_in_registration_order() {
        let mut h = harness(FakeHost::default());
        h.registry.borrow_mut().register("0xabcd", 1);
        h.registry.borrow_mut().register("0xabcd", 2);
        h.registry.borrow_mut().register("0xabcd", 1);

        h.dispatcher.handle_object(state_object(&[0xab, 0xcd], 5));
        h.dispatcher.handle_object(state_object(&[0xab, 0xcd], 6));

        assert_eq!(
            h.dispatcher.host_mut().calls,
            vec![(1, 5), (2, 5), (1, 5), (1, 6), (2, 6), (1, 6)]
        );
        assert_eq!(h.stats.snapshot().callbacks_invoked, 6);
        assert_eq!(h.stats.snapshot().object_events, 2);
    }

    #[test]
    fn odd_length_keys_match_events_decoded_from_them() {
        let mut h = harness(FakeHost::default());
        h.registry.borrow_mut().register("0xabc", 1);

        let mut reaction = state_object(&[0x0a, 0xbc], 4);
        if let Resource::StateObject(event) = &mut reaction.resource {
            event.address = Address::from_hex("0xabc").unwrap();
        }
        h.dispatcher.handle_object(reaction);

        assert_eq!(h.dispatcher.host_mut().calls, vec![(1, 4)]);
    }

    #[test]
    fn other_addresses_do_not_dispatch() {
        let mut h = harness(FakeHost::default());
        h.registry.borrow_mut().register("0xabcd", 1);

        h.dispatcher.handle_object(state_object(&[0xab, 0xce], 5));

        assert!(h.dispatcher.host_mut().calls.is_empty());
    }

    #[test]
    fn storage_events_never_reach_callbacks() {
        let mut h = harness(FakeHost::default());
        h.registry.borrow_mut().register("0xabcd", 1);

        h.dispatcher.handle_object(storage(&[0xab, 0xcd]));

        assert!(h.dispatcher.host_mut().calls.is_empty());
        assert_eq!(h.stats.snapshot().storage_events, 1);
        assert_eq!(
            h.diagnostics.try_recv().unwrap(),
            Diagnostic::StorageEvent {
                state_address: "0xabcd".to_string(),
                key: "0x01".to_string(),
                value: "0x02".to_string(),
            }
        );
    }

    #[test]
    fn failing_callback_does_not_stop_the_rest() {
        let mut h = harness(FakeHost {
            failing: vec![1],
            ..FakeHost::default()
        });
        h.registry.borrow_mut().register("0xabcd", 1);
        h.registry.borrow_mut().register("0xabcd", 2);

        h.dispatcher.handle_object(state_object(&[0xab, 0xcd], 9));

        assert_eq!(h.dispatcher.host_mut().calls, vec![(1, 9), (2, 9)]);
        assert_eq!(h.stats.snapshot().callback_failures, 1);
        assert!(matches!(
            h.diagnostics.try_recv().unwrap(),
            Diagnostic::CallbackFailed { key, .. } if key == "0xabcd"
        ));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let mut h = harness(FakeHost {
            panicking: vec![1],
            ..FakeHost::default()
        });
        h.registry.borrow_mut().register("0xabcd", 1);
        h.registry.borrow_mut().register("0xabcd", 2);

        h.dispatcher.handle_object(state_object(&[0xab, 0xcd], 3));

        assert_eq!(h.dispatcher.host_mut().calls, vec![(2, 3)]);
        assert_eq!(
            h.diagnostics.try_recv().unwrap(),
            Diagnostic::CallbackPanicked {
                key: "0xabcd".to_string()
            }
        );
    }

    #[test]
    fn conversion_failure_skips_the_call() {
        let mut h = harness(FakeHost {
            fail_conversion: true,
            ..FakeHost::default()
        });
        h.registry.borrow_mut().register("0xabcd", 1);

        h.dispatcher.handle_object(state_object(&[0xab, 0xcd], 1));
        h.dispatcher.handle_object(state_object(&[0xab, 0xcd], 2));

        assert!(h.dispatcher.host_mut().calls.is_empty());
        assert_eq!(h.stats.snapshot().callbacks_invoked, 0);
        assert_eq!(h.stats.snapshot().callback_failures, 2);
        assert!(matches!(
            h.diagnostics.try_recv().unwrap(),
            Diagnostic::ConversionFailed { .. }
        ));
    }

    #[test]
    fn blocks_are_consumed_without_dispatch() {
        let mut h = harness(FakeHost::default());
        h.registry.borrow_mut().register("newBlock", 1);

        h.dispatcher.handle_block(block(12));

        assert!(h.dispatcher.host_mut().calls.is_empty());
        assert_eq!(h.stats.snapshot().blocks, 1);
        assert_eq!(
            h.diagnostics.try_recv().unwrap(),
            Diagnostic::BlockIgnored { number: 12 }
        );
    }

    #[test]
    fn misrouted_payloads_are_ignored() {
        let mut h = harness(FakeHost::default());
        h.registry.borrow_mut().register("0xabcd", 1);

        h.dispatcher.handle_object(block(1));
        h.dispatcher.handle_block(state_object(&[0xab, 0xcd], 1));

        assert!(h.dispatcher.host_mut().calls.is_empty());
        assert_eq!(h.stats.snapshot(), StatsSnapshot::default());
        assert!(matches!(
            h.diagnostics.try_recv().unwrap(),
            Diagnostic::UnroutedResource { .. }
        ));
    }
}
