//! Child-process stdio transport.
//!
//! Spawns the configured server command and exchanges newline-delimited
//! JSON-RPC messages over its stdin/stdout. Stderr is forwarded to the log,
//! one record per line. If the child exits while the session is running, the
//! reader waits one second and respawns it under the original command, args,
//! and environment; in-flight requests are failed rather than replayed.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tandem_types::{Error, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::pending::{IdAllocator, PendingTable};
use crate::route_message;

/// Delay before respawning an exited child.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// How long `close` waits for the child to exit before killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct StdioTransport {
    ids: IdAllocator,
    pending: Arc<PendingTable>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Arc<Mutex<Option<Child>>>,
    running: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn the server process and start the reader and stderr tasks.
    /// Unsolicited messages (notifications, server-initiated requests) are
    /// forwarded on `incoming`.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout_ms: u64,
        incoming: mpsc::Sender<Message>,
    ) -> Result<Self, Error> {
        let (child, child_stdin, stdout, stderr) = spawn_child(command, args, env)?;

        let pending = Arc::new(PendingTable::new());
        let stdin = Arc::new(Mutex::new(Some(child_stdin)));
        let child = Arc::new(Mutex::new(Some(child)));
        let running = Arc::new(AtomicBool::new(true));

        spawn_stderr_logger(command.to_string(), stderr);

        let reader = tokio::spawn(reader_loop(
            command.to_string(),
            args.to_vec(),
            env.clone(),
            stdout,
            Arc::clone(&pending),
            incoming,
            Arc::clone(&stdin),
            Arc::clone(&child),
            Arc::clone(&running),
        ));

        Ok(Self {
            ids: IdAllocator::new(),
            pending,
            stdin,
            child,
            running,
            reader,
            timeout_ms,
        })
    }

    /// Send a request and wait for its response, bounded by the configured
    /// request timeout.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Message, Error> {
        let id = self.ids.allocate();
        let key = id.to_string();
        let envelope = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&envelope)?;

        let rx = self.pending.register(&key).await;
        if let Err(e) = self.write_line(&line).await {
            self.pending.remove(&key).await;
            return Err(e);
        }

        self.pending.wait(&key, rx, self.timeout_ms).await
    }

    /// Send a notification; returns once the bytes are written.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        let envelope = JsonRpcNotification::new(method, params);
        self.write_line(&serde_json::to_string(&envelope)?).await
    }

    /// Answer a server-initiated request. Never touches the pending table.
    pub async fn respond(&self, response: JsonRpcResponse) -> Result<(), Error> {
        self.write_line(&serde_json::to_string(&response)?).await
    }

    pub fn is_alive(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.reader.is_finished()
    }

    /// Stdio carries no version header; nothing to do.
    pub fn set_protocol_version(&self, _version: &str) {}

    /// Stop the reader, close stdin (EOF), and wait for the child to exit,
    /// killing it after a grace period.
    pub async fn close(&self) -> Result<(), Error> {
        self.running.store(false, Ordering::Release);
        self.pending.fail_all().await;
        *self.stdin.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, child.wait())
                .await
                .is_err()
            {
                let _ = child.kill().await;
            }
        }

        self.reader.abort();
        Ok(())
    }

    async fn write_line(&self, line: &str) -> Result<(), Error> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::transport("child stdin is closed"))?;

        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write.await.map_err(|e| {
            // The reader notices the dead child and restarts it; this call
            // just reports the failed write.
            Error::transport(format!("write to child stdin failed: {e}"))
        })
    }
}

fn spawn_child(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<(Child, ChildStdin, ChildStdout, ChildStderr), Error> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| Error::Spawn {
        command: command.to_string(),
        source,
    })?;

    let stdin = child.stdin.take().expect("stdin was piped");
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    Ok((child, stdin, stdout, stderr))
}

fn spawn_stderr_logger(command: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                tracing::info!(target: "tandem::server_stderr", server = %command, "{line}");
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop(
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    first_stdout: ChildStdout,
    pending: Arc<PendingTable>,
    incoming: mpsc::Sender<Message>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Arc<Mutex<Option<Child>>>,
    running: Arc<AtomicBool>,
) {
    let mut stdout = Some(first_stdout);

    loop {
        if let Some(out) = stdout.take() {
            let mut lines = BufReader::new(out).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match Message::from_str(&line) {
                    Ok(message) => route_message(&pending, &incoming, message).await,
                    Err(e) => tracing::warn!("dropping unparseable stdout line: {e}"),
                }
            }
        }

        if !running.load(Ordering::Acquire) {
            break;
        }

        // Child exited or its pipe closed while the session is still live.
        pending.fail_all().await;
        tracing::warn!(server = %command, "server process exited; restarting");
        tokio::time::sleep(RESTART_DELAY).await;
        if !running.load(Ordering::Acquire) {
            break;
        }

        match spawn_child(&command, &args, &env) {
            Ok((new_child, new_stdin, new_stdout, new_stderr)) => {
                *stdin.lock().await = Some(new_stdin);
                *child.lock().await = Some(new_child);
                spawn_stderr_logger(command.clone(), new_stderr);
                stdout = Some(new_stdout);
            }
            Err(e) => {
                tracing::error!(server = %command, "restart failed: {e}");
            }
        }
    }
}
