#![warn(missing_docs)]

//! # strato-sandbox
//!
//! V8 sandbox for the Strato Code Mode gateway.
//!
//! Executes agent-generated JavaScript in a deno_core isolate with no
//! filesystem, network, or environment access. The only bridge to the host
//! is the `request()` shim, which dispatches to a Rust-side
//! [`ApiDispatcher`](strato_client::ApiDispatcher) restricted to the one
//! allow-listed upstream API host. The `search` variant has no network
//! bridge at all — it embeds a static spec document as `globalThis.spec`.
//!
//! ## Security model
//!
//! - **V8 isolate**: same process-level isolation as browser tabs
//! - **No ambient capabilities**: no fs, net, env, or child_process access
//! - **Fresh runtime per call**: a uniquely-identified isolate per
//!   execution, never pooled or reused — no state leakage between calls
//! - **Opaque credentials**: the access token lives in the dispatcher's
//!   closure on the Rust side; sandbox code never sees it
//! - **Pre-execution validation**: banned patterns caught before reaching V8
//! - **Timeout + heap enforcement**: CPU watchdog and near-heap-limit
//!   callbacks terminate runaway code
//! - **Error containment**: user throws become `{result, err, stack}`
//!   records at the boundary, re-raised as plain errors — never a native
//!   exception across the isolation boundary
//! - **Redaction + truncation**: errors are scrubbed of secrets and results
//!   capped to a token budget before anything reaches the agent

pub mod audit;
pub mod error;
pub mod executor;
pub mod host;
pub mod ipc;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod ops;
pub mod redact;
pub mod truncate;
pub mod validator;

pub use error::SandboxError;
pub use executor::{ExecutionMode, SandboxConfig, SandboxExecutor};
