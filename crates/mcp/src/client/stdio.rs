//! Framed stdio transport: one backend subprocess, `Content-Length` framed JSON over its pipes.

use std::process::Stdio;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use super::envelope::{self, JsonMap};
use super::transport::{Exchange, OutboundCall};
use crate::context::CallContext;
use crate::errors::McpError;
use crate::protocol::DEFAULT_BACKEND_BINARY;

const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
const CLOSE_GRACE: Duration = Duration::from_secs(2);
const STATUS_OK: u16 = 200;
const STATUS_ACCEPTED: u16 = 202;

struct StdioProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Option<BufReader<ChildStdout>>,
}

impl StdioProcess {
    async fn discard(mut self) {
        if let Err(error) = self.child.kill().await {
            debug!(error = %error, "failed to kill stdio backend");
        }
    }
}

/// Owns at most one backend subprocess. The slot mutex serializes whole request/response cycles.
pub(crate) struct StdioTransport {
    command_line: String,
    process: Mutex<Option<StdioProcess>>,
}

impl StdioTransport {
    pub fn new(command_line: &str) -> Self {
        Self {
            command_line: command_line.trim().to_string(),
            process: Mutex::new(None),
        }
    }

    pub async fn ensure_started(&self) -> Result<(), McpError> {
        let mut slot = self.process.lock().await;
        if slot.is_none() {
            *slot = Some(self.spawn()?);
        }
        Ok(())
    }

    pub async fn call(&self, ctx: &CallContext, call: OutboundCall<'_>) -> Result<Exchange, McpError> {
        let mut slot = ctx.run(self.process.lock()).await?;
        let mut process = match slot.take() {
            Some(process) => process,
            None => self.spawn()?,
        };

        let written = match ctx.run(write_frame(&mut process.stdin, &call.payload)).await {
            Ok(result) => result,
            Err(reason) => Err(reason.into()),
        };
        if let Err(error) = written {
            process.discard().await;
            return Err(error);
        }

        let Some(id) = call.id else {
            *slot = Some(process);
            return Ok(Exchange {
                body: JsonMap::new(),
                status: STATUS_ACCEPTED,
                headers: HeaderMap::new(),
            });
        };

        let Some(mut stdout) = process.stdout.take() else {
            process.discard().await;
            return Err(McpError::transport("stdio reader unavailable"));
        };
        let mut reader = tokio::spawn(async move {
            let result = read_response(&mut stdout, id).await;
            (stdout, result)
        });

        let body = tokio::select! {
            biased;
            reason = ctx.done() => {
                let _ = process.child.start_kill();
                reader.abort();
                let _ = reader.await;
                process.discard().await;
                debug!(method = call.method, "stdio call cancelled; backend process discarded");
                return Err(reason.into());
            }
            joined = &mut reader => {
                let (stdout, result) = match joined {
                    Ok(output) => output,
                    Err(join_error) => {
                        process.discard().await;
                        return Err(McpError::transport(format!("stdio reader task failed: {join_error}")));
                    }
                };
                process.stdout = Some(stdout);
                *slot = Some(process);
                result?
            }
        };

        if let Some(error) = envelope::rpc_error(&body) {
            return Err(error.into());
        }
        Ok(Exchange {
            body,
            status: STATUS_OK,
            headers: HeaderMap::new(),
        })
    }

    /// Close stdin and wait briefly for the backend to exit, killing it if it lingers.
    pub async fn close(&self) -> Result<(), McpError> {
        let Some(process) = self.process.lock().await.take() else {
            return Ok(());
        };
        let StdioProcess { mut child, stdin, .. } = process;
        drop(stdin);
        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(McpError::transport(format!("stdio backend exited with {status}")))
                }
            }
            Err(_) => {
                child.kill().await?;
                Ok(())
            }
        }
    }

    fn spawn(&self) -> Result<StdioProcess, McpError> {
        let parts = split_command_line(&self.command_line);
        let Some((program, args)) = parts.split_first() else {
            return Err(McpError::transport("stdio transport requires a command"));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| McpError::Spawn {
            command: program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::transport("stdio backend stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::transport("stdio backend stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(program.clone(), stderr);
        }
        debug!(program = %program, pid = ?child.id(), "spawned stdio backend");

        Ok(StdioProcess {
            child,
            stdin,
            stdout: Some(BufReader::new(stdout)),
        })
    }
}

/// Whitespace-split command line; empty selects the default backend binary.
pub(crate) fn split_command_line(command_line: &str) -> Vec<String> {
    let parts: Vec<String> = command_line.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        vec![DEFAULT_BACKEND_BINARY.to_string()]
    } else {
        parts
    }
}

/// Forward backend stderr lines to the log.
fn spawn_stderr_logger(program: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "beacon::server", program = %program, "{line}");
        }
    });
}

async fn read_response<R>(reader: &mut R, id: u64) -> Result<JsonMap, McpError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let frame = read_frame(reader).await?;
        if frame.is_empty() {
            return Err(McpError::transport("empty stdio response"));
        }
        let Value::Object(body) = serde_json::from_slice::<Value>(&frame)? else {
            return Err(McpError::invalid_response("stdio response is not a JSON object"));
        };
        if envelope::matches_id(&body, id) {
            return Ok(body);
        }
        debug!(expected = id, received = ?body.get("id"), "skipping unrelated stdio message");
    }
}

pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), McpError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, McpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(McpError::framing("stream closed while reading headers"));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        let Some((name, value)) = trimmed.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length")
            && let Ok(length) = value.trim().parse::<usize>()
        {
            content_length = Some(length);
        }
    }

    let length = content_length.ok_or_else(|| McpError::framing("missing Content-Length header"))?;
    if length > MAX_FRAME_BYTES {
        return Err(McpError::framing(format!("frame of {length} bytes exceeds limit")));
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
