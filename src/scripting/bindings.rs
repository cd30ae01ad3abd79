//! The `eth` object scripts talk to.
//!
//! ```text
//! eth.watch("0x1f2a...", |account| print(account.balance));
//! eth.addPeer("10.0.0.7:30303");
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use rhai::{Dynamic, FnPtr};
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use super::engine::ScriptEngine;
use super::registry::CallbackRegistry;
use crate::error::ScriptError;
use crate::events::{Address, Reaction, Topic};
use crate::network::PeerConnector;
use crate::reactor::EventSource;

/// Global name the bindings are installed under.
pub const GLOBAL_NAME: &str = "eth";

/// Host-side state behind the script-visible `eth` value.
///
/// Cloning shares the state; scripts only ever see one instance.
#[derive(Clone)]
pub struct Eth {
    registry: Rc<RefCell<CallbackRegistry<FnPtr>>>,
    subscribed: Rc<RefCell<HashSet<Topic>>>,
    source: Arc<dyn EventSource>,
    object_queue: Sender<Reaction>,
    connector: Arc<dyn PeerConnector>,
}

impl Eth {
    pub fn new(
        registry: Rc<RefCell<CallbackRegistry<FnPtr>>>,
        source: Arc<dyn EventSource>,
        object_queue: Sender<Reaction>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            registry,
            subscribed: Rc::new(RefCell::new(HashSet::new())),
            source,
            object_queue,
            connector,
        }
    }

    /// `eth.watch(address, callback)`
    ///
    /// The callback is stored under the address exactly as written. The
    /// object topic is derived from the decoded address bytes and subscribed
    /// once per bridge, so differently spelled addresses for the same account
    /// do not duplicate deliveries.
    pub fn watch(&mut self, address: Dynamic, callback: Dynamic) {
        let address = match address.into_string() {
            Ok(address) => address,
            Err(type_name) => {
                warn!(target: "bindings", "watch: expected an address string, got {}", type_name);
                return;
            }
        };

        let callback = match callback.try_cast::<FnPtr>() {
            Some(callback) => callback,
            None => {
                warn!(target: "bindings", "watch({}): callback is not a function", address);
                return;
            }
        };

        let raw = Address::from_hex(&address).unwrap_or_else(|e| {
            warn!(target: "bindings", "watch({}): not a hex address ({}), subscribing to the empty address", address, e);
            Address::default()
        });

        self.registry.borrow_mut().register(address.as_str(), callback);

        let topic = Topic::object(&raw);
        if self.subscribed.borrow_mut().insert(topic.clone()) {
            debug!(target: "bindings", "Subscribing object queue to {}", topic);
            self.source.subscribe(topic, self.object_queue.clone());
        }
    }

    /// `eth.addPeer(host)`: `false` when `host` is not a non-empty string.
    pub fn add_peer(&mut self, host: Dynamic) -> bool {
        match host.into_string() {
            Ok(host) if !host.is_empty() => {
                debug!(target: "bindings", "Connecting to peer {}", host);
                self.connector.connect_to_peer(&host);
                true
            }
            Ok(_) => {
                warn!(target: "bindings", "addPeer: empty host");
                false
            }
            Err(type_name) => {
                warn!(target: "bindings", "addPeer: expected a host string, got {}", type_name);
                false
            }
        }
    }
}

/// Register the `Eth` type and bind it as the `eth` global.
pub fn install(engine: &mut ScriptEngine, eth: Eth) -> Result<(), ScriptError> {
    engine
        .engine_mut()
        .register_type_with_name::<Eth>("Eth")
        .register_fn("watch", Eth::watch)
        .register_fn("addPeer", Eth::add_peer);

    engine.bind(GLOBAL_NAME, Dynamic::from(eth))
}
