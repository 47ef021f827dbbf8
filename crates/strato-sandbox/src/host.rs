//! SandboxHost — parent-side management of isolated worker child processes.
//!
//! Spawns `strato-worker` as a child process with a clean environment,
//! communicates over length-delimited JSON IPC (stdin/stdout), and routes
//! upstream requests through the parent's [`ApiDispatcher`] — the credential
//! never enters the child process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::process::Command;

use crate::error::SandboxError;
use crate::ipc::{read_message, write_message, ChildMessage, ParentMessage, WorkerConfig};
use strato_client::ApiDispatcher;

/// Manages spawning and communicating with sandbox worker child processes.
pub struct SandboxHost;

impl SandboxHost {
    /// Execute code in an isolated child process.
    ///
    /// 1. Spawns `strato-worker` with a clean environment
    /// 2. Sends the code and config via IPC
    /// 3. Routes upstream requests through the parent's dispatcher
    /// 4. Returns the execution result (or kills the child on timeout)
    ///
    /// The child is torn down unconditionally after one call — workers are
    /// never reused across executions.
    pub async fn execute_in_child(
        code: &str,
        config: &crate::SandboxConfig,
        dispatcher: Arc<dyn ApiDispatcher>,
        account_id: Option<&str>,
    ) -> Result<serde_json::Value, SandboxError> {
        let worker_bin = find_worker_binary()?;
        let worker_config = WorkerConfig::from(config);
        let timeout = config.timeout;

        // Spawn the worker with a clean environment
        let mut child = Command::new(&worker_bin)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(if std::env::var("STRATO_DEBUG").is_ok() {
                std::process::Stdio::inherit()
            } else {
                std::process::Stdio::null()
            })
            .env_clear()
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SandboxError::Execution(anyhow::anyhow!(
                    "failed to spawn worker at {}: {}",
                    worker_bin.display(),
                    e
                ))
            })?;

        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Execution(anyhow::anyhow!("no stdin on child")))?;
        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Execution(anyhow::anyhow!("no stdout on child")))?;
        let mut child_stdout = BufReader::new(child_stdout);

        // Send the Execute message
        let execute_msg = ParentMessage::Execute {
            code: code.to_string(),
            account_id: account_id.map(|s| s.to_string()),
            config: worker_config,
        };
        write_message(&mut child_stdin, &execute_msg)
            .await
            .map_err(|e| {
                SandboxError::Execution(anyhow::anyhow!("failed to send Execute: {}", e))
            })?;

        // IPC event loop with overall timeout
        let result = tokio::time::timeout(
            // Give the child a bit more time than its internal timeout,
            // so the child can report its own timeout error cleanly.
            timeout + Duration::from_secs(2),
            ipc_event_loop(&mut child_stdin, &mut child_stdout, dispatcher),
        )
        .await;

        match result {
            Ok(inner) => inner,
            Err(_elapsed) => {
                // Timeout — kill the child process
                let _ = child.kill().await;
                Err(SandboxError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Run the IPC event loop: read messages from the child, dispatch upstream
/// requests, return the final result.
async fn ipc_event_loop(
    child_stdin: &mut tokio::process::ChildStdin,
    child_stdout: &mut BufReader<tokio::process::ChildStdout>,
    dispatcher: Arc<dyn ApiDispatcher>,
) -> Result<serde_json::Value, SandboxError> {
    loop {
        let msg: Option<ChildMessage> = read_message(child_stdout)
            .await
            .map_err(|e| SandboxError::Execution(anyhow::anyhow!("IPC read error: {}", e)))?;

        match msg {
            Some(ChildMessage::ExecutionComplete { result }) => {
                return match result {
                    Ok(value) => Ok(value),
                    Err(err) => Err(SandboxError::JsError {
                        message: err,
                        stack: None,
                    }),
                };
            }
            Some(ChildMessage::UpstreamRequest {
                request_id,
                request,
            }) => {
                // Dispatch the request through the parent's dispatcher
                let request_result = dispatcher.request(request).await;

                let response = ParentMessage::RequestResult {
                    request_id,
                    result: request_result.map_err(|e| e.to_string()),
                };

                write_message(child_stdin, &response).await.map_err(|e| {
                    SandboxError::Execution(anyhow::anyhow!("failed to send request result: {}", e))
                })?;
            }
            Some(ChildMessage::Log { message }) => {
                tracing::info!(target: "strato::sandbox::worker", "{}", message);
            }
            None => {
                // Child closed stdout without sending ExecutionComplete
                return Err(SandboxError::Execution(anyhow::anyhow!(
                    "worker exited without sending result"
                )));
            }
        }
    }
}

/// Find the `strato-worker` binary.
///
/// Search order:
/// 1. `STRATO_WORKER_BIN` environment variable (must be absolute path)
/// 2. Same directory as the current executable
///
/// On Unix, rejects world-writable binaries (mode & 0o002 != 0).
fn find_worker_binary() -> Result<PathBuf, SandboxError> {
    // 1. Explicit env var — must be an absolute path
    if let Ok(path) = std::env::var("STRATO_WORKER_BIN") {
        let p = PathBuf::from(&path);
        if !p.is_absolute() {
            return Err(SandboxError::Execution(anyhow::anyhow!(
                "STRATO_WORKER_BIN must be an absolute path, got: {}",
                path
            )));
        }
        if p.exists() {
            validate_binary_permissions(&p)?;
            return Ok(p);
        }
    }

    // 2. Same directory as current executable (or parent, for test binaries in deps/)
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let worker = dir.join("strato-worker");
            if worker.exists() {
                validate_binary_permissions(&worker)?;
                return Ok(worker);
            }
            // Test binaries are in target/debug/deps/ but the worker is in target/debug/
            if let Some(parent) = dir.parent() {
                let worker = parent.join("strato-worker");
                if worker.exists() {
                    validate_binary_permissions(&worker)?;
                    return Ok(worker);
                }
            }
        }
    }

    Err(SandboxError::Execution(anyhow::anyhow!(
        "strato-worker binary not found. Set STRATO_WORKER_BIN or install alongside strato"
    )))
}

/// Validate binary file permissions (Unix only).
///
/// Rejects world-writable binaries to prevent substitution attacks.
fn validate_binary_permissions(_path: &std::path::Path) -> Result<(), SandboxError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(_path).map_err(|e| {
            SandboxError::Execution(anyhow::anyhow!(
                "cannot read metadata for {}: {}",
                _path.display(),
                e
            ))
        })?;
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            return Err(SandboxError::Execution(anyhow::anyhow!(
                "insecure permissions on worker binary {}: mode {:o} is world-writable",
                _path.display(),
                mode,
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn find_worker_binary_rejects_relative_env_var() {
        std::env::set_var("STRATO_WORKER_BIN", "./relative/path");
        let result = find_worker_binary();
        std::env::remove_var("STRATO_WORKER_BIN");
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("absolute"),
            "expected 'absolute' in error: {err}"
        );
    }

    #[test]
    #[serial]
    fn find_worker_binary_without_env_var_does_not_panic() {
        std::env::remove_var("STRATO_WORKER_BIN");
        // May or may not find the binary depending on the build layout;
        // the call itself must be well-behaved either way.
        let _ = find_worker_binary();
    }
}
