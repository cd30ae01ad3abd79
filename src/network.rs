use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// The host's peer-to-peer layer, as far as scripts can reach it.
pub trait PeerConnector: Send + Sync {
    /// Start connecting to `host`. Failures surface asynchronously, if at all.
    fn connect_to_peer(&self, host: &str);
}

impl<F> PeerConnector for F
where
    F: Fn(&str) + Send + Sync,
{
    fn connect_to_peer(&self, host: &str) {
        self(host)
    }
}

/// Opens a TCP connection to the peer on a tokio runtime and logs the outcome.
#[derive(Debug, Clone)]
pub struct TcpPeerConnector {
    runtime: Handle,
}

impl TcpPeerConnector {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Use the runtime of the calling task.
    ///
    /// Panics outside of a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl PeerConnector for TcpPeerConnector {
    fn connect_to_peer(&self, host: &str) {
        let host = host.to_string();
        self.runtime.spawn(async move {
            match TcpStream::connect(&host).await {
                Ok(stream) => {
                    info!(target: "network", "Connected to peer {} ({:?})", host, stream.peer_addr().ok());
                }
                Err(e) => {
                    warn!(target: "network", "Failed to connect to peer {}: {}", host, e);
                }
            }
        });
    }
}
