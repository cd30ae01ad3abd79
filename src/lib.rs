//! Script event bridge.
//!
//! Scripts running in a sandboxed [`rhai`] engine register callbacks against
//! account addresses with `eth.watch(address, callback)`. A host-side
//! [`EventSource`] publishes block, state object and storage events, and the
//! [`ScriptBridge`] routes each state object event to the callbacks
//! registered for its address on a single dedicated dispatch thread.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod network;
pub mod reactor;
pub mod runner;
pub mod scripting;

pub use config::EthscriptConfig;
pub use error::{BridgeError, ScriptError};
pub use events::{Address, Block, Reaction, Resource, StateObjectEvent, StateObjectSnapshot, StorageState, Topic};
pub use network::{PeerConnector, TcpPeerConnector};
pub use reactor::{EventSource, Reactor};
pub use runner::{Diagnostic, LifecycleState, ScriptBridge, StatsSnapshot};
