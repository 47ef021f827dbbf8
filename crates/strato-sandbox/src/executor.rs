//! Sandbox executor — creates fresh V8 isolates and runs agent-generated code.
//!
//! Each execution gets a brand new, uniquely-identified runtime; isolates are
//! never pooled or reused across calls, trading startup cost for a hard
//! guarantee of no state leakage between agent-submitted executions.
//!
//! V8 isolates are `!Send`, so all JsRuntime operations run on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::audit::{
    AuditEntryBuilder, AuditLogger, AuditOperation, AuditingDispatcher, NoopAuditLogger,
    RequestAudit,
};
use crate::error::SandboxError;
use crate::ops::{strato_ext, ExecutionResult, RequestLimits};
use crate::validator::validate_code;
use strato_client::ApiDispatcher;

/// How the sandbox executes code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run V8 in-process on a dedicated thread (default, suitable for tests).
    #[default]
    InProcess,
    /// Spawn an isolated child process per execution (production security mode).
    ChildProcess,
}

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum execution time before the sandbox is terminated.
    pub timeout: Duration,
    /// Maximum size of agent-generated code in bytes.
    pub max_code_size: usize,
    /// Hard cap on the JSON result in bytes (backstop behind truncation).
    pub max_output_size: usize,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum concurrent sandbox executions.
    pub max_concurrent: usize,
    /// Maximum upstream API requests per execution.
    pub max_requests: usize,
    /// Maximum size of a serialized request per call.
    pub max_request_size: usize,
    /// Execution mode: in-process or child-process isolation.
    pub execution_mode: ExecutionMode,
    /// Maximum IPC message size in bytes (child-process mode).
    pub max_ipc_message_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_code_size: 64 * 1024,        // 64 KB
            max_output_size: 8 * 1024 * 1024, // 8 MB
            max_heap_size: 64 * 1024 * 1024, // 64 MB
            max_concurrent: 8,
            max_requests: 50,
            max_request_size: 1024 * 1024, // 1 MB
            execution_mode: ExecutionMode::default(),
            max_ipc_message_size: crate::ipc::DEFAULT_MAX_IPC_MESSAGE_SIZE,
        }
    }
}

/// The sandbox executor. Creates fresh V8 isolates for each execution.
///
/// This is `Send + Sync` safe — all V8 operations are dispatched to a
/// dedicated thread internally. A concurrency semaphore limits the number
/// of simultaneous V8 isolates.
pub struct SandboxExecutor {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
    audit_logger: Arc<dyn AuditLogger>,
}

impl SandboxExecutor {
    /// Create a new sandbox executor with the given configuration.
    pub fn new(config: SandboxConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            semaphore,
            audit_logger: Arc::new(NoopAuditLogger),
        }
    }

    /// Create a new sandbox executor with an audit logger.
    pub fn with_audit_logger(config: SandboxConfig, logger: Arc<dyn AuditLogger>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            semaphore,
            audit_logger: logger,
        }
    }

    /// Execute a `search()` call — runs code against the API spec snapshot.
    ///
    /// The spec document is injected as `globalThis.spec`; the isolate has
    /// no network capability of any kind. Search always runs in-process
    /// (read-only, no credential exposure risk).
    pub async fn execute_search(&self, code: &str, spec: &Value) -> Result<Value, SandboxError> {
        let execution_id = new_execution_id();
        tracing::info!(
            execution_id = %execution_id,
            code_len = code.len(),
            "execute_search: starting"
        );

        let audit_builder =
            AuditEntryBuilder::new(&execution_id, code, AuditOperation::Search);

        validate_code(code, Some(self.config.max_code_size))?;

        let _permit = self.semaphore.clone().try_acquire_owned().map_err(|_| {
            SandboxError::ConcurrencyLimit {
                max: self.config.max_concurrent,
            }
        })?;

        let code = code.to_string();
        let spec = spec.clone();
        let config = self.config.clone();

        // V8 isolates are !Send — run everything on a dedicated thread
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send(Err(SandboxError::Execution(e.into()))).is_err() {
                        tracing::warn!("sandbox result receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(run_search(&config, &code, &spec));
            if tx.send(result).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        let result = rx
            .await
            .map_err(|_| SandboxError::Execution(anyhow::anyhow!("sandbox thread panicked")))?;

        let entry = audit_builder.finish(&result);
        self.audit_logger.log(&entry).await;

        match &result {
            Ok(_) => tracing::info!(execution_id = %execution_id, "execute_search: complete"),
            Err(e) => tracing::warn!(execution_id = %execution_id, error = %e, "execute_search: failed"),
        }

        result
    }

    /// Execute an `execute()` call — runs code against the live API.
    ///
    /// Upstream calls go through the injected `request()` shim, which
    /// dispatches to the Rust-side [`ApiDispatcher`] via `op_strato_request`.
    /// The dispatcher captures the access token and egress policy at
    /// construction; neither is visible to the submitted code.
    ///
    /// In `ChildProcess` mode, spawns an isolated worker process. In
    /// `InProcess` mode (default), runs V8 on a dedicated thread in the
    /// current process.
    pub async fn execute_code(
        &self,
        code: &str,
        dispatcher: Arc<dyn ApiDispatcher>,
        account_id: Option<&str>,
    ) -> Result<Value, SandboxError> {
        let execution_id = new_execution_id();
        tracing::info!(
            execution_id = %execution_id,
            code_len = code.len(),
            mode = ?self.config.execution_mode,
            "execute_code: starting"
        );

        let mut audit_builder =
            AuditEntryBuilder::new(&execution_id, code, AuditOperation::Execute);

        validate_code(code, Some(self.config.max_code_size))?;

        let _permit = self.semaphore.clone().try_acquire_owned().map_err(|_| {
            SandboxError::ConcurrencyLimit {
                max: self.config.max_concurrent,
            }
        })?;

        // Wrap dispatcher with audit tracking
        let (audit_tx, mut audit_rx) = tokio::sync::mpsc::unbounded_channel::<RequestAudit>();
        let auditing_dispatcher: Arc<dyn ApiDispatcher> =
            Arc::new(AuditingDispatcher::new(dispatcher, audit_tx));

        let result = match self.config.execution_mode {
            ExecutionMode::ChildProcess => {
                crate::host::SandboxHost::execute_in_child(
                    code,
                    &self.config,
                    auditing_dispatcher,
                    account_id,
                )
                .await
            }
            ExecutionMode::InProcess => {
                self.execute_code_in_process(code, auditing_dispatcher, account_id)
                    .await
            }
        };

        // Collect request audits
        while let Ok(request_audit) = audit_rx.try_recv() {
            audit_builder.record_request(request_audit);
        }

        let entry = audit_builder.finish(&result);
        self.audit_logger.log(&entry).await;

        match &result {
            Ok(_) => tracing::info!(execution_id = %execution_id, "execute_code: complete"),
            Err(e) => tracing::warn!(execution_id = %execution_id, error = %e, "execute_code: failed"),
        }

        result
    }

    /// In-process execution: spawn a dedicated thread with its own V8 isolate.
    async fn execute_code_in_process(
        &self,
        code: &str,
        dispatcher: Arc<dyn ApiDispatcher>,
        account_id: Option<&str>,
    ) -> Result<Value, SandboxError> {
        let code = code.to_string();
        let config = self.config.clone();
        let account_id = account_id.map(|s| s.to_string());

        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send(Err(SandboxError::Execution(e.into()))).is_err() {
                        tracing::warn!("sandbox result receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(run_execute(
                &config,
                &code,
                dispatcher,
                account_id.as_deref(),
            ));
            if tx.send(result).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        rx.await
            .map_err(|_| SandboxError::Execution(anyhow::anyhow!("sandbox thread panicked")))?
    }
}

/// Mint a unique id for one disposable execution unit.
fn new_execution_id() -> String {
    format!("exec-{}", uuid::Uuid::new_v4())
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// Whether the heap limit has been triggered. Uses AtomicBool so the
    /// callback can use a shared `&` reference instead of `&mut`,
    /// eliminating aliasing concerns.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to `heap_state` (Box<HeapLimitState>) allocated in
    // run_user_code. The Box outlives this callback because: (1) the watchdog
    // thread is joined before heap_state is dropped, and (2) V8 only invokes
    // this callback while the isolate's event loop is running, which completes
    // before the join. We use a shared `&` reference (not `&mut`) because
    // `triggered` is AtomicBool, so no aliasing concerns even if V8 were to
    // call this callback re-entrantly.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    // Grant 1MB grace so the termination exception can propagate
    current_heap_limit + 1024 * 1024
}

/// Run a search operation on the current thread (must be called from a
/// dedicated thread, not the main tokio runtime).
///
/// Public for reuse in the worker binary.
pub async fn run_search(
    config: &SandboxConfig,
    code: &str,
    spec: &Value,
) -> Result<Value, SandboxError> {
    let mut runtime = create_runtime(None, config.max_heap_size, None)?;

    // Inject the spec document as a global
    let spec_json = serde_json::to_string(spec)?;
    let bootstrap = format!("globalThis.spec = {};", spec_json);
    runtime
        .execute_script("[strato:spec]", bootstrap)
        .map_err(|e| SandboxError::JsError {
            message: e.to_string(),
            stack: None,
        })?;

    // Bootstrap: capture ops in closures, expose console + result plumbing,
    // delete Deno, and remove dangerous code generation primitives. No
    // request() — search has zero network capability.
    runtime
        .execute_script("[strato:bootstrap]", bootstrap_script(false))
        .map_err(|e| SandboxError::JsError {
            message: e.to_string(),
            stack: None,
        })?;

    run_user_code(&mut runtime, code, config).await
}

/// Run an execute operation on the current thread.
///
/// Public for reuse in the worker binary.
pub async fn run_execute(
    config: &SandboxConfig,
    code: &str,
    dispatcher: Arc<dyn ApiDispatcher>,
    account_id: Option<&str>,
) -> Result<Value, SandboxError> {
    let limits = RequestLimits {
        max_requests: config.max_requests,
        max_request_size: config.max_request_size,
        requests_made: 0,
    };
    let mut runtime = create_runtime(Some(dispatcher), config.max_heap_size, Some(limits))?;

    // The resolved account id is a plain constant for path building; the
    // token itself stays on the Rust side.
    if let Some(account_id) = account_id {
        let inject = format!(
            "globalThis.ACCOUNT_ID = {};",
            serde_json::to_string(account_id)?
        );
        runtime
            .execute_script("[strato:account]", inject)
            .map_err(|e| SandboxError::JsError {
                message: e.to_string(),
                stack: None,
            })?;
    }

    runtime
        .execute_script("[strato:bootstrap]", bootstrap_script(true))
        .map_err(|e| SandboxError::JsError {
            message: e.to_string(),
            stack: None,
        })?;

    run_user_code(&mut runtime, code, config).await
}

/// Build the bootstrap JavaScript.
///
/// `with_request` controls whether the `request()` capability is wired in —
/// true for execute, false for search.
fn bootstrap_script(with_request: bool) -> String {
    let mut parts = Vec::new();

    parts.push(
        r#"((ops) => {
                    const setResult = (json) => ops.op_strato_set_result(json);
                    const log = (msg) => ops.op_strato_log(String(msg));

                    Object.defineProperty(globalThis, "__setResult", {
                        value: setResult, writable: false, configurable: false
                    });

                    globalThis.console = Object.freeze({
                        log: (...args) => log(args.map(String).join(" ")),
                        warn: (...args) => log(args.map(String).join(" ")),
                        error: (...args) => log(args.map(String).join(" ")),
                    });"#
            .to_string(),
    );

    if with_request {
        parts.push(
            r#"
                    const requestOp = ops.op_strato_request;
                    const request = async (options) => {
                        const resultJson = await requestOp(JSON.stringify(options || {}));
                        return JSON.parse(resultJson);
                    };
                    Object.defineProperty(globalThis, "request", {
                        value: Object.freeze(request), writable: false, configurable: false
                    });"#
                .to_string(),
        );
    }

    // Security: remove dangerous globals and code generation primitives.
    // Even with the validator banning eval( and Function(, an attacker could
    // reach Function via console.log.constructor or similar prototype chain
    // access.
    parts.push(
        r#"
                    delete globalThis.Deno;
                    delete globalThis.eval;
                    const AsyncFunction = (async function(){}).constructor;
                    const GeneratorFunction = (function*(){}).constructor;
                    Object.defineProperty(Function.prototype, 'constructor', {
                        value: undefined, configurable: false, writable: false
                    });
                    Object.defineProperty(AsyncFunction.prototype, 'constructor', {
                        value: undefined, configurable: false, writable: false
                    });
                    Object.defineProperty(GeneratorFunction.prototype, 'constructor', {
                        value: undefined, configurable: false, writable: false
                    });
                })(Deno.core.ops);"#
            .to_string(),
    );

    parts.join("\n")
}

/// Create a fresh JsRuntime with the strato extension loaded and V8 heap
/// limits set.
pub(crate) fn create_runtime(
    dispatcher: Option<Arc<dyn ApiDispatcher>>,
    max_heap_size: usize,
    request_limits: Option<RequestLimits>,
) -> Result<JsRuntime, SandboxError> {
    let create_params = v8::CreateParams::default().heap_limits(0, max_heap_size);

    let runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![strato_ext::init()],
        create_params: Some(create_params),
        ..Default::default()
    });

    if let Some(d) = dispatcher {
        runtime.op_state().borrow_mut().put(d);
    }
    if let Some(limits) = request_limits {
        runtime.op_state().borrow_mut().put(limits);
    }

    Ok(runtime)
}

/// Wrap the user's async arrow function, execute it, and extract the result.
///
/// Any throw from the submitted code is caught at this boundary and recorded
/// as a `{result, err, stack}` envelope, then re-raised here as a plain
/// [`SandboxError::JsError`] — a native exception never crosses the
/// isolation boundary.
///
/// Sets up a CPU watchdog thread and near-heap-limit callback before running
/// user code. The watchdog terminates V8 execution if the timeout elapses
/// (handles CPU-bound infinite loops). The heap callback terminates
/// execution if V8 approaches the heap limit (prevents OOM abort).
async fn run_user_code(
    runtime: &mut JsRuntime,
    code: &str,
    config: &SandboxConfig,
) -> Result<Value, SandboxError> {
    // --- Set up heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    // --- Set up CPU watchdog ---
    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let timeout = config.timeout;
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();

    let watchdog = std::thread::spawn(move || {
        if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_handle.terminate_execution();
        }
    });

    // --- Execute user code ---
    let wrapped = format!(
        r#"
        (async () => {{
            try {{
                const __userFn = {code};
                const __value = await __userFn();
                __setResult(JSON.stringify({{
                    result: __value === undefined ? null : __value
                }}));
            }} catch (e) {{
                __setResult(JSON.stringify({{
                    result: null,
                    err: (e && e.message) ? e.message : String(e),
                    stack: (e && e.stack) ? String(e.stack) : null
                }}));
            }}
        }})();
        "#
    );

    let exec_error = match runtime.execute_script("[strato:execute]", wrapped) {
        Ok(_) => {
            // Drive the event loop to resolve async operations
            match tokio::time::timeout(
                config.timeout,
                runtime.run_event_loop(PollEventLoopOptions::default()),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("async timeout".to_string()),
            }
        }
        Err(e) => Some(e.to_string()),
    };

    // --- Cleanup: cancel watchdog and wait for it to exit ---
    // This ensures the watchdog thread is done before we drop the runtime,
    // preventing use-after-free on the IsolateHandle.
    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    // --- Check error causes in priority order ---
    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(SandboxError::HeapLimitExceeded);
    }

    if timed_out.load(Ordering::SeqCst) {
        return Err(SandboxError::Timeout {
            timeout_ms: config.timeout.as_millis() as u64,
        });
    }

    if let Some(err_msg) = exec_error {
        return Err(SandboxError::JsError {
            message: err_msg,
            stack: None,
        });
    }

    // --- Extract result from OpState ---
    let result_str = {
        let state = runtime.op_state();
        let state = state.borrow();
        state
            .try_borrow::<ExecutionResult>()
            .map(|r| r.0.clone())
            .ok_or_else(|| SandboxError::JsError {
                message: "no result returned from sandbox execution".into(),
                stack: None,
            })?
    };

    if result_str.len() > config.max_output_size {
        return Err(SandboxError::OutputTooLarge {
            max: config.max_output_size,
        });
    }

    let envelope: Value = serde_json::from_str(&result_str)?;

    if let Some(err) = envelope.get("err").and_then(Value::as_str) {
        return Err(SandboxError::JsError {
            message: err.to_string(),
            stack: envelope
                .get("stack")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        });
    }

    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strato_client::ApiRequest;
    use strato_error::UpstreamError;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::default())
    }

    /// Test dispatcher that echoes back the method/path/query.
    struct EchoDispatcher;

    #[async_trait::async_trait]
    impl ApiDispatcher for EchoDispatcher {
        async fn request(&self, req: ApiRequest) -> Result<Value, UpstreamError> {
            Ok(serde_json::json!({
                "success": true,
                "status": 200,
                "result": {
                    "method": req.method,
                    "path": req.path,
                    "query": req.query,
                },
                "errors": [],
                "messages": [],
            }))
        }
    }

    /// Dispatcher that always fails with a configurable error.
    struct FailingDispatcher {
        message: String,
    }

    #[async_trait::async_trait]
    impl ApiDispatcher for FailingDispatcher {
        async fn request(&self, _req: ApiRequest) -> Result<Value, UpstreamError> {
            Err(UpstreamError::Api {
                message: self.message.clone(),
            })
        }
    }

    #[tokio::test]
    async fn search_queries_the_spec_document() {
        let exec = executor();
        let spec = serde_json::json!({
            "paths": {
                "/zones": { "get": { "x-product": "zones" } },
                "/accounts/{account_id}/workers/scripts": { "get": { "x-product": "workers" } },
            }
        });

        let code = r#"async () => {
            return Object.entries(spec.paths)
                .filter(([p, item]) => item.get["x-product"] === "workers")
                .map(([p]) => p);
        }"#;

        let result = exec.execute_search(code, &spec).await.unwrap();
        let paths = result.as_array().unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0], "/accounts/{account_id}/workers/scripts");
    }

    #[tokio::test]
    async fn search_has_no_request_capability() {
        let exec = executor();
        let spec = serde_json::json!({});

        let code = r#"async () => { return typeof globalThis.request; }"#;

        let result = exec.execute_search(code, &spec).await.unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn no_network_access_outside_request() {
        let exec = executor();
        let spec = serde_json::json!({});

        let code = r#"async () => {
            try {
                await fetch("https://example.com");
                return "ESCAPED";
            } catch(e) {
                return "CONTAINED";
            }
        }"#;

        let result = exec.execute_search(code, &spec).await.unwrap();
        assert_eq!(result, "CONTAINED");
    }

    #[tokio::test]
    async fn js_errors_are_captured_with_stack() {
        let exec = executor();
        let spec = serde_json::json!({});

        let code = r#"async () => {
            throw new Error("intentional test error");
        }"#;

        let err = exec.execute_search(code, &spec).await.unwrap_err();
        match err {
            SandboxError::JsError { message, stack } => {
                assert!(message.contains("intentional test error"));
                assert!(stack.is_some(), "thrown Error should carry a stack");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undefined_result_becomes_null() {
        let exec = executor();
        let code = r#"async () => {}"#;
        let result = exec
            .execute_search(code, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn cpu_bound_infinite_loop_is_terminated() {
        let exec = SandboxExecutor::new(SandboxConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        });
        let spec = serde_json::json!({});

        let code = r#"async () => {
            while(true) {}
        }"#;

        let start = std::time::Instant::now();
        let err = exec.execute_search(code, &spec).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(
            matches!(err, SandboxError::Timeout { .. }),
            "expected timeout, got: {err:?}"
        );
        assert!(
            elapsed < Duration::from_secs(5),
            "should complete reasonably fast, took: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn heap_limit_prevents_oom() {
        let exec = SandboxExecutor::new(SandboxConfig {
            max_heap_size: 10 * 1024 * 1024,  // 10 MB
            timeout: Duration::from_secs(30), // Long timeout so heap fills first
            ..Default::default()
        });
        let spec = serde_json::json!({});

        let code = r#"async () => {
            const arr = [];
            while(true) {
                arr.push(new Array(100000).fill("x"));
            }
        }"#;

        let err = exec.execute_search(code, &spec).await.unwrap_err();
        assert!(
            matches!(
                err,
                SandboxError::HeapLimitExceeded | SandboxError::JsError { .. }
            ),
            "expected heap limit or JS error, got: {err:?}"
        );
    }

    #[tokio::test]
    async fn concurrency_limit_enforced() {
        // Use max_concurrent=0 so no executions are allowed (deterministic)
        let exec = SandboxExecutor::new(SandboxConfig {
            max_concurrent: 0,
            ..Default::default()
        });

        let code = r#"async () => { return 1; }"#;
        let err = exec
            .execute_search(code, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(
            matches!(err, SandboxError::ConcurrencyLimit { max: 0 }),
            "expected concurrency limit, got: {err:?}"
        );
    }

    #[tokio::test]
    async fn deno_global_is_not_accessible() {
        let exec = executor();
        let spec = serde_json::json!({});

        let code = r#"async () => {
            const props = Object.getOwnPropertyNames(globalThis);
            return !props.includes("Deno");
        }"#;

        let result = exec.execute_search(code, &spec).await.unwrap();
        assert_eq!(result, true);
    }

    #[tokio::test]
    async fn eval_is_not_accessible() {
        let exec = executor();
        let code = r#"async () => { return typeof globalThis.eval; }"#;
        let result = exec
            .execute_search(code, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn function_constructor_is_blocked() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        // Try to access Function via prototype chain — should get undefined
        let code = r#"async () => {
            const ctor = console.log.constructor;
            return String(ctor);
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn request_shim_reaches_the_dispatcher() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => {
            const zones = await request({
                method: "GET",
                path: "/zones",
                query: { page: 2, name: null }
            });
            return zones.result;
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        assert_eq!(result["method"], "GET");
        assert_eq!(result["path"], "/zones");
        assert_eq!(result["query"]["page"], 2);
    }

    #[tokio::test]
    async fn request_object_is_frozen() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => {
            return Object.isFrozen(request);
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        assert_eq!(result, true);
    }

    #[tokio::test]
    async fn multiple_requests_in_single_execution() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => {
            const r1 = await request({ method: "GET", path: "/zones" });
            const r2 = await request({ method: "GET", path: "/accounts" });
            return [r1.result.path, r2.result.path];
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        let arr = result.as_array().unwrap();
        assert_eq!(arr[0], "/zones");
        assert_eq!(arr[1], "/accounts");
    }

    #[tokio::test]
    async fn request_rate_limit_enforced() {
        let exec = SandboxExecutor::new(SandboxConfig {
            max_requests: 2,
            ..Default::default()
        });
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => {
            await request({ method: "GET", path: "/a" });
            await request({ method: "GET", path: "/b" });
            try {
                await request({ method: "GET", path: "/c" });
                return "should not reach here";
            } catch(e) {
                return e.message;
            }
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        assert!(
            result.as_str().unwrap().contains("request limit exceeded"),
            "expected request limit message, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn request_size_limit_enforced() {
        let exec = SandboxExecutor::new(SandboxConfig {
            max_request_size: 100,
            ..Default::default()
        });
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => {
            try {
                await request({ method: "POST", path: "/zones", body: { data: "x".repeat(200) } });
                return "should not reach here";
            } catch(e) {
                return e.message;
            }
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        assert!(
            result.as_str().unwrap().contains("too large"),
            "expected request too large message, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn dispatcher_errors_are_redacted() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(FailingDispatcher {
            message: "connection refused: http://internal.corp:9876/secret".into(),
        });

        let code = r#"async () => {
            try {
                await request({ method: "GET", path: "/zones" });
                return "should not reach here";
            } catch(e) {
                return e.message;
            }
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        let msg = result.as_str().unwrap();
        assert!(
            !msg.contains("internal.corp"),
            "should not leak internal URL: {msg}"
        );
        assert!(msg.contains("GET /zones"), "should keep the request: {msg}");
    }

    #[tokio::test]
    async fn account_id_constant_is_injected() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => {
            return await request({ method: "GET", path: `/accounts/${ACCOUNT_ID}/workers` });
        }"#;

        let result = exec
            .execute_code(code, dispatcher, Some("acc-42"))
            .await
            .unwrap();
        assert_eq!(result["result"]["path"], "/accounts/acc-42/workers");
    }

    #[tokio::test]
    async fn account_id_is_absent_without_resolution() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => { return typeof globalThis.ACCOUNT_ID; }"#;
        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn console_log_works() {
        let exec = executor();
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(EchoDispatcher);

        let code = r#"async () => {
            console.log("test message from sandbox");
            return "ok";
        }"#;

        let result = exec.execute_code(code, dispatcher, None).await.unwrap();
        assert_eq!(result, "ok");
    }
}
