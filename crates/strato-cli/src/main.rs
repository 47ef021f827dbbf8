#![warn(missing_docs)]

//! Strato Code Mode gateway
//!
//! One huge cloud API, two tools, one sandbox.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use strato_apispec::{flatten_spec, BlobStore, DirBlobStore, LiveSpec, PRODUCTS_BLOB, SPEC_BLOB};
use strato_auth::{AuthDispatcher, AuthorizationHelper, InMemoryGrantStore, MemoryStateStore};
use strato_client::EgressPolicy;
use strato_config::GatewayConfig;
use strato_sandbox::audit::TracingAuditLogger;
use strato_sandbox::{ExecutionMode, SandboxConfig, SandboxExecutor};
use strato_server::routes::{gateway_router, AppState};
use strato_server::GatewayServer;

/// Build SandboxConfig from config overrides.
fn build_sandbox_config(overrides: &strato_config::SandboxOverrides) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    if let Some(timeout) = overrides.timeout_secs {
        config.timeout = std::time::Duration::from_secs(timeout);
    }
    if let Some(heap) = overrides.max_heap_mb {
        config.max_heap_size = heap * 1024 * 1024;
    }
    if let Some(concurrent) = overrides.max_concurrent {
        config.max_concurrent = concurrent;
    }
    if let Some(requests) = overrides.max_requests {
        config.max_requests = requests;
    }
    if let Some(ref mode) = overrides.execution_mode {
        config.execution_mode = match mode.as_str() {
            "child_process" => ExecutionMode::ChildProcess,
            _ => ExecutionMode::InProcess,
        };
    }
    if let Some(size) = overrides.max_ipc_message_size_mb {
        config.max_ipc_message_size = size * 1024 * 1024;
    }
    config
}

/// Locate the config file.
///
/// Search order:
/// 1. `STRATO_CONFIG` environment variable
/// 2. `./strato.toml` in the current directory
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("STRATO_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("strato.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

fn load_config() -> Result<GatewayConfig> {
    let path = find_config_file()
        .context("no config file found: set STRATO_CONFIG or create ./strato.toml")?;
    tracing::info!(path = %path.display(), "loading config");
    GatewayConfig::from_file_with_env(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// The spec population job: flatten a raw upstream spec document and write
/// the `spec.json` / `products.json` blobs the search sandbox depends on.
fn populate(config: &GatewayConfig, raw_path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(raw_path)
        .with_context(|| format!("failed to read raw spec from {raw_path}"))?;
    let raw: serde_json::Value =
        serde_json::from_str(&raw).context("raw spec is not valid JSON")?;

    let (flattened, products) = flatten_spec(&raw);
    let path_count = flattened
        .get("paths")
        .and_then(|p| p.as_object())
        .map(|p| p.len())
        .unwrap_or(0);

    let store = DirBlobStore::new(&config.store.blob_dir);
    store.put(SPEC_BLOB, &flattened)?;
    store.put(PRODUCTS_BLOB, &serde_json::json!(products))?;

    tracing::info!(
        paths = path_count,
        products = products.len(),
        dir = %config.store.blob_dir.display(),
        "spec blobs written"
    );
    Ok(())
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let store = DirBlobStore::new(&config.store.blob_dir);
    // Missing spec.json is fatal here, with the store's operator-facing
    // message naming the population job. No lazy fetch, no self-heal.
    let spec = LiveSpec::from_store(&store)?;

    let sandbox_config = build_sandbox_config(&config.sandbox);
    let executor = Arc::new(SandboxExecutor::with_audit_logger(
        sandbox_config,
        Arc::new(TracingAuditLogger),
    ));

    let egress = EgressPolicy::new(&config.upstream_api_host(), &config.egress.allowed_hosts);
    let helper: Arc<dyn AuthorizationHelper> = Arc::new(InMemoryGrantStore::new());

    let state = AppState {
        auth: Arc::new(AuthDispatcher::new(
            config.upstream.clone(),
            egress.clone(),
            helper.clone(),
        )),
        config: Arc::new(config.clone()),
        helper,
        state_store: Arc::new(MemoryStateStore::new()),
        egress: egress.clone(),
    };

    let server = GatewayServer::new(
        executor,
        spec.clone(),
        config.upstream.clone(),
        egress,
    );

    let ct = CancellationToken::new();
    let router = gateway_router(state, server, ct.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "strato gateway listening");

    let shutdown_ct = ct.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            shutdown_ct.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("strato {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;

    match args.get(1).map(String::as_str) {
        Some("populate") => {
            let raw_path = args
                .get(2)
                .context("usage: strato populate <raw-spec.json>")?;
            populate(&config, raw_path)
        }
        Some("serve") | None => serve(config).await,
        Some(other) => {
            anyhow::bail!("unknown command '{other}' (expected: serve, populate)");
        }
    }
}
