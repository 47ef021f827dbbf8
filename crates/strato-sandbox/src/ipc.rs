//! IPC protocol for parent ↔ worker communication.
//!
//! Uses length-delimited JSON messages: 4-byte big-endian length prefix +
//! JSON payload. All messages are typed via [`ParentMessage`] and
//! [`ChildMessage`] enums. The worker never holds the credential — upstream
//! requests are proxied back to the parent, which owns the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use strato_client::ApiRequest;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Messages sent from the parent process to the worker child.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ParentMessage {
    /// Initial message: execute this code in the sandbox.
    Execute {
        /// The JavaScript async arrow function to execute.
        code: String,
        /// Resolved account id exposed to the code as `ACCOUNT_ID`.
        #[serde(default)]
        account_id: Option<String>,
        /// Worker configuration.
        config: WorkerConfig,
    },
    /// Response to an upstream request from the child.
    RequestResult {
        /// Matches the request_id from ChildMessage::UpstreamRequest.
        request_id: u64,
        /// The normalized envelope, or an error message.
        result: Result<Value, String>,
    },
}

/// Messages sent from the worker child to the parent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChildMessage {
    /// Ask the parent to dispatch an upstream API request.
    UpstreamRequest {
        /// Unique ID for correlating request ↔ response.
        request_id: u64,
        /// The request as submitted by sandbox code.
        request: ApiRequest,
    },
    /// The execution has finished.
    ExecutionComplete {
        /// The result value, or an error message.
        result: Result<Value, String>,
    },
    /// A log message from the worker.
    Log {
        /// The log message text.
        message: String,
    },
}

/// Configuration passed to the worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum execution time.
    pub timeout_ms: u64,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum upstream requests per execution.
    pub max_requests: usize,
    /// Maximum size of a serialized request per call.
    pub max_request_size: usize,
    /// Maximum size of the JSON result in bytes.
    pub max_output_size: usize,
    /// Maximum size of agent-generated code in bytes.
    pub max_code_size: usize,
    /// Maximum IPC message size in bytes.
    #[serde(default = "default_max_ipc_message_size")]
    pub max_ipc_message_size: usize,
}

fn default_max_ipc_message_size() -> usize {
    DEFAULT_MAX_IPC_MESSAGE_SIZE
}

impl From<&crate::SandboxConfig> for WorkerConfig {
    fn from(config: &crate::SandboxConfig) -> Self {
        Self {
            timeout_ms: config.timeout.as_millis() as u64,
            max_heap_size: config.max_heap_size,
            max_requests: config.max_requests,
            max_request_size: config.max_request_size,
            max_output_size: config.max_output_size,
            max_code_size: config.max_code_size,
            max_ipc_message_size: config.max_ipc_message_size,
        }
    }
}

impl WorkerConfig {
    /// Convert back to a SandboxConfig for use in the worker.
    pub fn to_sandbox_config(&self) -> crate::SandboxConfig {
        crate::SandboxConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_code_size: self.max_code_size,
            max_output_size: self.max_output_size,
            max_heap_size: self.max_heap_size,
            max_concurrent: 1, // worker handles one execution
            max_requests: self.max_requests,
            max_request_size: self.max_request_size,
            execution_mode: crate::executor::ExecutionMode::InProcess,
            max_ipc_message_size: self.max_ipc_message_size,
        }
    }
}

/// Default maximum IPC message size: 64 MB.
pub const DEFAULT_MAX_IPC_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Write a length-delimited JSON message to an async writer.
///
/// Format: 4-byte big-endian length prefix followed by the JSON payload bytes.
pub async fn write_message<T: Serialize, W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &T,
) -> Result<(), std::io::Error> {
    let payload = serde_json::to_vec(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "IPC payload too large: {} bytes (max {} bytes)",
                payload.len(),
                u32::MAX
            ),
        )
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-delimited JSON message from an async reader.
///
/// Returns `None` if the reader has reached EOF (clean shutdown).
/// Uses [`DEFAULT_MAX_IPC_MESSAGE_SIZE`] as the size limit.
pub async fn read_message<T: for<'de> Deserialize<'de>, R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<T>, std::io::Error> {
    read_message_with_limit(reader, DEFAULT_MAX_IPC_MESSAGE_SIZE).await
}

/// Read a length-delimited JSON message with a configurable size limit.
///
/// Returns `None` if the reader has reached EOF (clean shutdown).
pub async fn read_message_with_limit<T: for<'de> Deserialize<'de>, R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<T>, std::io::Error> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    // Reject messages exceeding the configured limit
    if len > max_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("IPC message too large: {} bytes (limit: {} bytes)", len, max_size),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let msg: T = serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            timeout_ms: 5000,
            max_heap_size: 64 * 1024 * 1024,
            max_requests: 50,
            max_request_size: 1024 * 1024,
            max_output_size: 8 * 1024 * 1024,
            max_code_size: 64 * 1024,
            max_ipc_message_size: DEFAULT_MAX_IPC_MESSAGE_SIZE,
        }
    }

    #[tokio::test]
    async fn roundtrip_parent_execute_message() {
        let msg = ParentMessage::Execute {
            code: "async () => { return 42; }".into(),
            account_id: Some("acc-1".into()),
            config: worker_config(),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: ParentMessage = read_message(&mut cursor).await.unwrap().unwrap();
        match decoded {
            ParentMessage::Execute {
                code,
                account_id,
                config,
            } => {
                assert_eq!(code, "async () => { return 42; }");
                assert_eq!(account_id.as_deref(), Some("acc-1"));
                assert_eq!(config.timeout_ms, 5000);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn roundtrip_child_upstream_request() {
        let msg = ChildMessage::UpstreamRequest {
            request_id: 7,
            request: ApiRequest {
                method: "GET".into(),
                path: "/zones".into(),
                query: None,
                body: None,
                content_type: None,
                raw_body: None,
            },
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: ChildMessage = read_message(&mut cursor).await.unwrap().unwrap();
        match decoded {
            ChildMessage::UpstreamRequest {
                request_id,
                request,
            } => {
                assert_eq!(request_id, 7);
                assert_eq!(request.path, "/zones");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_returns_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let decoded: Option<ChildMessage> = read_message(&mut cursor).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        // Claim a 100 MB payload without sending it
        let mut buf = Vec::new();
        buf.extend_from_slice(&(100u32 * 1024 * 1024).to_be_bytes());
        let mut cursor = Cursor::new(buf);

        let err = read_message_with_limit::<ChildMessage, _>(&mut cursor, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn worker_config_converts_back_with_single_concurrency() {
        let config = worker_config().to_sandbox_config();
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(config.execution_mode, crate::executor::ExecutionMode::InProcess);
    }
}
