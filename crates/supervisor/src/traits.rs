//! Transport seam between the supervisor and skill processes.

use std::time::Duration;

use {async_trait::async_trait, serde_json::Value};

use crate::{
    error::Result,
    types::{InitializeResult, JsonRpcResponse},
};

/// A live connection to one skill process.
///
/// `StdioTransport` implements this over the child's stdin/stdout. The
/// supervisor drives the whole lifecycle through this trait so a future
/// socket transport slots in without touching the supervision loop.
#[async_trait]
pub trait SkillTransport: Send + Sync {
    /// Send a request and wait for the matching response.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Run the initialize handshake. A skill is not serving until this
    /// returns.
    async fn handshake(&self, timeout: Duration) -> Result<InitializeResult>;

    /// Wait for the process to exit, returning its exit code when known.
    async fn wait_exit(&self) -> Option<i32>;

    /// Whether the process is still running.
    async fn is_alive(&self) -> bool;

    /// Cooperative shutdown: close stdin, give the process `grace` to exit,
    /// then kill it.
    async fn shutdown(&self, grace: Duration);

    /// OS process id, when the process has one.
    fn pid(&self) -> Option<u32>;
}
