use async_trait::async_trait;
use thiserror::Error;

/// Error reported by the host-process collaborator.
#[derive(Debug, Clone, Error)]
#[error("server error: {0}")]
pub struct ServerError(pub String);

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Boundary to the host game server process.
///
/// The engine never talks to a concrete server implementation; the embedding
/// layer provides this handle. `stop` must only return once the process has
/// actually stopped, because extraction begins the moment it does.
#[async_trait]
pub trait ServerHandle: Send + Sync {
    /// Stop the server, blocking until it is down.
    async fn stop(&self) -> Result<(), ServerError>;

    /// Start the server.
    async fn start(&self) -> Result<(), ServerError>;

    async fn is_running(&self) -> bool;

    /// Show a status line to every connected user.
    fn broadcast(&self, message: &str);

    /// Show a message to users of the running server (e.g. after a failed
    /// update while the server stayed up).
    fn say(&self, message: &str);
}
