use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};

use super::diagnostics::{Diagnostic, DispatchStats, StatsSnapshot};
use super::dispatch::{self, Command, Dispatcher, Queues};
use crate::config::EthscriptConfig;
use crate::error::{BridgeError, ScriptError};
use crate::events::{Reaction, Topic};
use crate::network::PeerConnector;
use crate::reactor::EventSource;
use crate::scripting::{bindings, CallbackRegistry, Eth, ScriptEngine};

/// Whether the dispatch thread is still accepting work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Stopped,
}

/// Handle to a script sandbox running on its own dispatch thread.
///
/// Every interaction with the sandbox (evaluation, bindings, callbacks fired
/// by host events) is serialized onto that thread. The handle itself is
/// `Send` and can be moved between threads freely.
pub struct ScriptBridge {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    diagnostics: broadcast::Sender<Diagnostic>,
    stats: Arc<DispatchStats>,
}

impl ScriptBridge {
    /// Spawn the dispatch thread, install the `eth` bindings, run the
    /// configured prelude and subscribe to new blocks.
    ///
    /// Returns once the sandbox is ready, or with the error that kept it from
    /// becoming ready.
    pub fn start(
        source: Arc<dyn EventSource>,
        connector: Arc<dyn PeerConnector>,
        config: &EthscriptConfig,
    ) -> Result<Self, BridgeError> {
        let config = config.clone().normalized();
        let prelude = load_prelude(&config)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (diagnostics, _) = broadcast::channel(config.bridge.diagnostics_capacity);
        let stats = Arc::new(DispatchStats::default());
        let (init_tx, init_rx) = std_mpsc::channel::<Result<(), BridgeError>>();

        let thread_diagnostics = diagnostics.clone();
        let thread_stats = stats.clone();

        let thread = thread::Builder::new()
            .name(config.bridge.thread_name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = init_tx.send(Err(BridgeError::Init(format!(
                            "failed to build dispatch runtime: {e}"
                        ))));
                        return;
                    }
                };

                let setup = Setup {
                    source,
                    connector,
                    config,
                    prelude,
                    diagnostics: thread_diagnostics,
                    stats: thread_stats,
                };

                let (dispatcher, blocks, objects) = match setup.build() {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                let queues = Queues {
                    shutdown: shutdown_rx,
                    commands: commands_rx,
                    blocks,
                    objects,
                };

                let _ = init_tx.send(Ok(()));
                runtime.block_on(dispatch::run(dispatcher, queues));
            })
            .map_err(BridgeError::Spawn)?;

        let ready = init_rx
            .recv()
            .unwrap_or_else(|_| Err(BridgeError::Init("dispatch thread exited".to_string())));

        if let Err(e) = ready {
            error!(target: "bridge", "Script bridge failed to start: {}", e);
            let _ = thread.join();
            return Err(e);
        }

        info!(target: "bridge", "Script bridge running");

        Ok(Self {
            commands: commands_tx,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            diagnostics,
            stats,
        })
    }

    /// Stop the dispatch thread and wait for it to exit.
    ///
    /// Blocks the calling thread until the in-flight event or command (if
    /// any) finishes. Anything still queued is discarded. Errors with
    /// [`BridgeError::Stopped`] when called a second time.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        let shutdown = self.shutdown.take().ok_or(BridgeError::Stopped)?;

        debug!(target: "bridge", "Stopping script bridge");
        let _ = shutdown.send(());

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(target: "bridge", "Dispatch thread panicked");
                return Err(BridgeError::Disconnected);
            }
        }

        info!(target: "bridge", "Script bridge stopped");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        if self.shutdown.is_some() {
            LifecycleState::Running
        } else {
            LifecycleState::Stopped
        }
    }

    /// Evaluate `source` in the sandbox's global scope and return its value.
    pub async fn evaluate(&self, source: impl Into<String>) -> Result<serde_json::Value, BridgeError> {
        let response = self.submit_evaluate(source.into())?;
        Ok(response.await.map_err(|_| BridgeError::Disconnected)??)
    }

    /// Like [`evaluate`](Self::evaluate), for callers outside an async
    /// context. Panics if called from within a tokio runtime.
    pub fn evaluate_blocking(&self, source: impl Into<String>) -> Result<serde_json::Value, BridgeError> {
        let response = self.submit_evaluate(source.into())?;
        Ok(response.blocking_recv().map_err(|_| BridgeError::Disconnected)??)
    }

    /// Bind `value` to the global `name` inside the sandbox.
    pub async fn bind<T: Serialize>(&self, name: impl Into<String>, value: &T) -> Result<(), BridgeError> {
        let response = self.submit_bind(name.into(), serde_json::to_value(value)?)?;
        Ok(response.await.map_err(|_| BridgeError::Disconnected)??)
    }

    pub fn bind_blocking<T: Serialize>(&self, name: impl Into<String>, value: &T) -> Result<(), BridgeError> {
        let response = self.submit_bind(name.into(), serde_json::to_value(value)?)?;
        Ok(response.blocking_recv().map_err(|_| BridgeError::Disconnected)??)
    }

    /// Subscribe to events the dispatch loop handled without a callback.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn submit_evaluate(
        &self,
        source: String,
    ) -> Result<oneshot::Receiver<Result<serde_json::Value, ScriptError>>, BridgeError> {
        let (responder, response) = oneshot::channel();
        self.submit(Command::Evaluate { source, responder })?;
        Ok(response)
    }

    fn submit_bind(
        &self,
        name: String,
        value: serde_json::Value,
    ) -> Result<oneshot::Receiver<Result<(), ScriptError>>, BridgeError> {
        let (responder, response) = oneshot::channel();
        self.submit(Command::Bind {
            name,
            value,
            responder,
        })?;
        Ok(response)
    }

    fn submit(&self, command: Command) -> Result<(), BridgeError> {
        if self.state() == LifecycleState::Stopped {
            return Err(BridgeError::Stopped);
        }
        self.commands
            .send(command)
            .map_err(|_| BridgeError::Disconnected)
    }
}

impl Drop for ScriptBridge {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Running {
            let _ = self.stop();
        }
    }
}

/// Everything the dispatch thread needs to build its half of the bridge.
struct Setup {
    source: Arc<dyn EventSource>,
    connector: Arc<dyn PeerConnector>,
    config: EthscriptConfig,
    prelude: Vec<(String, String)>,
    diagnostics: broadcast::Sender<Diagnostic>,
    stats: Arc<DispatchStats>,
}

type Built = (
    Dispatcher<ScriptEngine>,
    mpsc::Receiver<Reaction>,
    mpsc::Receiver<Reaction>,
);

impl Setup {
    fn build(self) -> Result<Built, BridgeError> {
        let (block_tx, block_rx) = mpsc::channel(self.config.bridge.block_queue_capacity);
        let (object_tx, object_rx) = mpsc::channel(self.config.bridge.object_queue_capacity);

        let mut engine = ScriptEngine::new(&self.config.engine);
        let registry = Rc::new(RefCell::new(CallbackRegistry::new()));

        let eth = Eth::new(
            registry.clone(),
            self.source.clone(),
            object_tx,
            self.connector,
        );
        bindings::install(&mut engine, eth)?;

        for (name, source) in &self.prelude {
            debug!(target: "bridge", "Running prelude {}", name);
            engine
                .evaluate(source)
                .map_err(|e| BridgeError::Init(format!("prelude {name}: {e}")))?;
        }

        self.source.subscribe(Topic::new_block(), block_tx);

        let dispatcher = Dispatcher::new(engine, registry, self.diagnostics, self.stats);
        Ok((dispatcher, block_rx, object_rx))
    }
}

/// Read prelude scripts up front so a missing file fails `start` before a
/// thread is spawned.
fn load_prelude(config: &EthscriptConfig) -> Result<Vec<(String, String)>, BridgeError> {
    config
        .bridge
        .prelude
        .iter()
        .map(|path| {
            let name = path.display().to_string();
            fs::read_to_string(path)
                .map(|source| (name.clone(), source))
                .map_err(|e| BridgeError::Init(format!("failed to read prelude {name}: {e}")))
        })
        .collect()
}
