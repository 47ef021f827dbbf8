//! deno_core op definitions for the Strato sandbox.
//!
//! The `#[op2]` macro generates additional public items (v8 function
//! pointers, metadata structs) that cannot carry doc comments. We suppress
//! `missing_docs` at the module level — all actual functions and types are
//! documented below.
#![allow(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use deno_core::op2;
use deno_core::OpState;
use deno_error::JsErrorBox;

use strato_client::{ApiDispatcher, ApiRequest};

/// Rate limiting state for upstream requests within a single execution.
pub struct RequestLimits {
    /// Maximum number of upstream requests allowed.
    pub max_requests: usize,
    /// Maximum size of a serialized request per call.
    pub max_request_size: usize,
    /// Number of requests made so far.
    pub requests_made: usize,
}

/// Wrapper for execution results stored in OpState.
pub struct ExecutionResult(pub String);

/// Log a message from sandbox code.
#[op2(fast)]
pub fn op_strato_log(#[string] msg: &str) {
    tracing::info!(target: "strato::sandbox::js", "{}", msg);
}

/// Store the execution result in OpState.
#[op2(fast)]
pub fn op_strato_set_result(state: &mut OpState, #[string] json: &str) {
    state.put(ExecutionResult(json.to_string()));
}

/// Perform an upstream API request via the ApiDispatcher.
///
/// The dispatcher holds the credential and the egress policy in its closure;
/// neither is reachable from sandbox code. Enforces per-execution request
/// counting and request size limits via [`RequestLimits`] stored in OpState.
#[op2(async)]
#[string]
pub async fn op_strato_request(
    op_state: Rc<RefCell<OpState>>,
    #[string] request_json: String,
) -> Result<String, JsErrorBox> {
    // Check and increment request limits
    {
        let mut st = op_state.borrow_mut();
        let limits = st.borrow_mut::<RequestLimits>();
        if limits.requests_made >= limits.max_requests {
            return Err(JsErrorBox::generic(format!(
                "request limit exceeded (max {} requests per execution)",
                limits.max_requests
            )));
        }
        if request_json.len() > limits.max_request_size {
            return Err(JsErrorBox::generic(format!(
                "request too large ({} bytes, max {} bytes)",
                request_json.len(),
                limits.max_request_size
            )));
        }
        limits.requests_made += 1;
    }

    let request: ApiRequest = serde_json::from_str(&request_json)
        .map_err(|e| JsErrorBox::generic(format!("invalid request options: {e}")))?;

    tracing::debug!(
        method = %request.method,
        path = %request.path,
        "sandbox request dispatched"
    );

    let dispatcher = {
        let st = op_state.borrow();
        st.borrow::<Arc<dyn ApiDispatcher>>().clone()
    };

    let method = request.method.clone();
    let path = request.path.clone();

    let envelope = dispatcher.request(request).await.map_err(|e| {
        JsErrorBox::generic(crate::redact::redact_request_error(
            &method,
            &path,
            &e.to_string(),
        ))
    })?;

    serde_json::to_string(&envelope)
        .map_err(|e| JsErrorBox::generic(format!("result serialization failed: {e}")))
}

deno_core::extension!(
    strato_ext,
    ops = [op_strato_log, op_strato_set_result, op_strato_request],
);
