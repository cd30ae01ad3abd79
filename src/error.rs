use thiserror::Error;

/// Errors produced by the script sandbox.
///
/// rhai errors are rendered to strings here so the error can travel back to
/// the thread that submitted the work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("compile error: {0}")]
    Compile(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("value conversion failed: {0}")]
    Conversion(String),
    #[error("cannot rebind constant `{0}`")]
    ConstantBinding(String),
}

/// Errors returned by [`crate::ScriptBridge`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("bridge initialization failed: {0}")]
    Init(String),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("failed to serialize host value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("bridge has been stopped")]
    Stopped,
    #[error("dispatch thread is gone")]
    Disconnected,
}
