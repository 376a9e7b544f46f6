//! Stdio transport: spawn a skill process and speak JSON-RPC over its
//! stdin/stdout, one message per line.

use std::{
    collections::HashMap,
    path::Path,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::{Mutex, oneshot},
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Context, Error, Result},
    traits::SkillTransport,
    types::{
        ClientInfo, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
        JsonRpcResponse, PROTOCOL_VERSION,
    },
};

/// Stdio-based transport for one skill process.
pub struct StdioTransport {
    name: String,
    child: Mutex<Child>,
    /// Taken on shutdown; dropping it closes the pipe and signals EOF.
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>,
    next_id: AtomicU64,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pid: Option<u32>,
}

impl StdioTransport {
    /// Spawn the skill process in its directory and start the reader loop.
    pub async fn spawn(
        name: &str,
        program: &str,
        args: &[String],
        skill_dir: &Path,
    ) -> Result<Arc<Self>> {
        info!(skill = %name, program = %program, args = ?args, "spawning skill process");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(skill_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn skill '{name}': {program}"))?;

        let stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let transport = Arc::new(Self {
            name: name.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(1),
            reader_handle: Mutex::new(None),
            pid,
        });

        // Surface the skill's stderr in our log stream.
        if let Some(stderr) = stderr {
            let skill = name.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                warn!(skill = %skill, stderr = %trimmed, "skill stderr");
                            }
                        },
                    }
                }
            });
        }

        let pending_clone = Arc::clone(&pending);
        let skill = name.to_string();
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(skill = %skill, "skill stdout closed");
                        break;
                    },
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!(skill = %skill, raw = %trimmed, "skill -> supervisor");

                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(resp) => {
                                let key = resp.id.to_string();
                                let mut map = pending_clone.lock().await;
                                if let Some(tx) = map.remove(&key) {
                                    let _ = tx.send(resp);
                                } else {
                                    warn!(skill = %skill, id = %key, "response for unknown request id");
                                }
                            },
                            Err(e) => {
                                debug!(skill = %skill, error = %e, "skill sent non-response line");
                            },
                        }
                    },
                    Err(e) => {
                        warn!(skill = %skill, error = %e, "error reading skill stdout");
                        break;
                    },
                }
            }
        });

        *transport.reader_handle.lock().await = Some(handle);
        Ok(transport)
    }

    async fn write_line(&self, mut payload: String) -> Result<()> {
        payload.push('\n');
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| Error::message(format!("skill '{}' stdin already closed", self.name)))?;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SkillTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let id_key = req.id.to_string();

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id_key.clone(), tx);
        }

        debug!(skill = %self.name, method = %method, id = %id, "supervisor -> skill");
        if let Err(e) = self.write_line(serde_json::to_string(&req)?).await {
            self.pending.lock().await.remove(&id_key);
            return Err(e);
        }

        let resp = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(Error::message(format!(
                    "skill '{}' closed while waiting for '{method}' response",
                    self.name
                )));
            },
            Err(_) => {
                self.pending.lock().await.remove(&id_key);
                return Err(Error::message(format!(
                    "skill '{}' request '{method}' timed out after {timeout:?}",
                    self.name
                )));
            },
        };

        if let Some(err) = &resp.error {
            return Err(Error::Protocol {
                name: self.name.clone(),
                code: err.code,
                message: err.message.clone(),
            });
        }
        Ok(resp)
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        };
        trace!(skill = %self.name, method = %method, "supervisor -> skill (notification)");
        self.write_line(serde_json::to_string(&notif)?).await
    }

    async fn handshake(&self, timeout: Duration) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "skskills".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .request("initialize", Some(serde_json::to_value(&params)?), timeout)
            .await?;
        let result = resp.result.ok_or_else(|| {
            Error::message(format!("skill '{}' initialize returned no result", self.name))
        })?;
        let result: InitializeResult = serde_json::from_value(result)?;

        self.notify("notifications/initialized", None).await?;
        info!(skill = %self.name, server = %result.server_info.name, "handshake complete");
        Ok(result)
    }

    async fn wait_exit(&self) -> Option<i32> {
        let mut child = self.child.lock().await;
        match child.wait().await {
            Ok(status) => status.code(),
            Err(_) => None,
        }
    }

    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn shutdown(&self, grace: Duration) {
        // Closing stdin is the cooperative stop signal.
        drop(self.stdin.lock().await.take());

        {
            let mut child = self.child.lock().await;
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(skill = %self.name, ?status, "skill exited cooperatively");
                },
                Ok(Err(e)) => {
                    warn!(skill = %self.name, error = %e, "error waiting for skill exit");
                    let _ = child.kill().await;
                },
                Err(_) => {
                    warn!(skill = %self.name, "skill ignored shutdown, killing");
                    let _ = child.kill().await;
                },
            }
        }

        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const FAKE_SERVER: &str = concat!(
        "read line; ",
        r#"printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26","capabilities":{},"serverInfo":{"name":"fake"}}}'; "#,
        "cat >/dev/null"
    );

    async fn spawn_script(script: &str) -> Arc<StdioTransport> {
        let tmp = std::env::temp_dir();
        StdioTransport::spawn("test", "sh", &["-c".into(), script.into()], &tmp)
            .await
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let transport = spawn_script("cat >/dev/null").await;
        assert!(transport.is_alive().await);
        assert!(transport.pid().is_some());

        // Stdin EOF is enough for cat, no kill needed.
        transport.shutdown(Duration::from_secs(2)).await;
        assert!(!transport.is_alive().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_against_fake_server() {
        let transport = spawn_script(FAKE_SERVER).await;
        let result = transport.handshake(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.server_info.name, "fake");
        transport.shutdown(Duration::from_secs(2)).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_exit_reports_code() {
        let transport = spawn_script("exit 3").await;
        assert_eq!(transport.wait_exit().await, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_times_out_on_silent_server() {
        let transport = spawn_script("cat >/dev/null").await;
        let err = transport
            .request("initialize", None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        transport.shutdown(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_program() {
        let tmp = std::env::temp_dir();
        let result = StdioTransport::spawn("test", "nonexistent_program_xyz_42", &[], &tmp).await;
        assert!(result.is_err());
    }
}
