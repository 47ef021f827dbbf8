#![warn(missing_docs)]

//! # strato-server
//!
//! MCP server and HTTP surface for the Strato Code Mode gateway.
//!
//! Exposes exactly two tools to agents:
//! - `search` — query the flattened API spec snapshot in a network-less sandbox
//! - `execute` — run code against the live upstream API through `request()`
//!
//! This collapses thousands of upstream endpoints into a fixed ~1,000 token
//! tool footprint. The HTTP layer adds the OAuth consent flow around it:
//! `/authorize`, `/oauth/callback`, and the delegated `/token` + `/register`
//! endpoints.

pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars::JsonSchema;
use rmcp::service::RequestContext;
use rmcp::{tool, tool_handler, tool_router, RoleServer, ServerHandler};
use serde::Deserialize;

use strato_apispec::LiveSpec;
use strato_auth::AuthProps;
use strato_client::{ApiDispatcher, EgressPolicy, TimeoutDispatcher, UpstreamApiClient};
use strato_config::UpstreamConfig;
use strato_sandbox::truncate::truncate_value;
use strato_sandbox::{SandboxError, SandboxExecutor};

/// Per-request timeout for upstream calls made from sandbox code.
const UPSTREAM_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// The Strato MCP server handler.
///
/// Implements `ServerHandler` from rmcp to serve the `search` and `execute`
/// Code Mode tools over streamable HTTP. The per-request credential bundle
/// is resolved by the HTTP auth middleware and travels in the request
/// extensions; for stdio/test use a fixed bundle can be attached instead.
#[derive(Clone)]
pub struct GatewayServer {
    executor: Arc<SandboxExecutor>,
    spec: LiveSpec,
    upstream: UpstreamConfig,
    egress: EgressPolicy,
    fixed_auth: Option<AuthProps>,
    tool_router: ToolRouter<Self>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(
        executor: Arc<SandboxExecutor>,
        spec: LiveSpec,
        upstream: UpstreamConfig,
        egress: EgressPolicy,
    ) -> Self {
        Self {
            executor,
            spec,
            upstream,
            egress,
            fixed_auth: None,
            tool_router: Self::tool_router(),
        }
    }

    /// Attach a fixed credential bundle (stdio transport and tests).
    pub fn with_fixed_auth(mut self, auth: AuthProps) -> Self {
        self.fixed_auth = Some(auth);
        self
    }

    /// Resolve the credential bundle for this tool call.
    ///
    /// The auth middleware stores [`AuthProps`] in the HTTP request
    /// extensions; rmcp forwards the request parts through the tool-call
    /// context.
    fn resolve_auth(&self, ctx: &RequestContext<RoleServer>) -> Result<AuthProps, String> {
        if let Some(props) = ctx
            .extensions
            .get::<http::request::Parts>()
            .and_then(|parts| parts.extensions.get::<AuthProps>())
        {
            return Ok(props.clone());
        }
        self.fixed_auth
            .clone()
            .ok_or_else(|| "no credentials resolved for this session".to_string())
    }

    /// Render a sandbox failure for the tool-call path.
    ///
    /// This audience is the integrating developer: JavaScript errors keep
    /// their message and stack. Everything else goes through redaction.
    fn render_error(error: SandboxError) -> String {
        match error {
            SandboxError::JsError {
                message,
                stack: Some(stack),
            } => format!("javascript error: {message}\n{stack}"),
            other => strato_sandbox::redact::redact_error_message(&other.to_string()),
        }
    }
}

/// Input for the `search` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchInput {
    /// JavaScript async arrow function to query the API spec snapshot.
    /// The spec is available as `globalThis.spec`; iterate `spec.paths`
    /// (an Object keyed by path) and filter on methods, descriptions, or
    /// the `x-product` tag. No network access of any kind.
    pub code: String,
}

/// Input for the `execute` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteInput {
    /// JavaScript async arrow function to run against the live API via
    /// `await request({method, path, query?, body?, contentType?, rawBody?})`.
    /// Runs in a sandboxed V8 isolate — no filesystem, module, or direct
    /// network access.
    pub code: String,
    /// Target account id. Optional when the credential can reach exactly
    /// one account.
    #[serde(default)]
    pub account_id: Option<String>,
}

#[tool_router(router = tool_router)]
impl GatewayServer {
    /// Search the API spec snapshot to discover endpoints.
    #[tool(
        name = "search",
        description = "Search the upstream API specification to discover endpoints. The flattened spec is available as `globalThis.spec` — `spec.paths` is an Object keyed by path; each path item has HTTP methods with descriptions, parameters, and an `x-product` tag. Write a JavaScript async arrow function to query it.\n\nExample: `async () => Object.entries(spec.paths).filter(([p, item]) => item[\"x-product\"] === \"workers\").map(([p]) => p)`"
    )]
    pub async fn search(
        &self,
        Parameters(input): Parameters<SearchInput>,
    ) -> Result<String, String> {
        tracing::info!(code_len = input.code.len(), "search: starting");

        let spec = self.spec.current();
        match self.executor.execute_search(&input.code, &spec).await {
            Ok(result) => {
                let rendered = truncate_value(&result);
                tracing::info!(result_len = rendered.len(), "search: complete");
                Ok(rendered)
            }
            Err(e) => {
                tracing::warn!(error = %e, "search: failed");
                Err(Self::render_error(e))
            }
        }
    }

    /// Execute code against the live upstream API in a sandboxed V8 isolate.
    #[tool(
        name = "execute",
        description = "Execute JavaScript against the live upstream API. Use `await request({method, path, query?, body?, contentType?, rawBody?})` — the path is relative to the API base, the resolved account id is available as `ACCOUNT_ID`, and responses come back as one `{success, status, result, errors, messages}` envelope for both REST and GraphQL endpoints. Chain multiple requests in a single call.\n\nIMPORTANT: code runs in a sandboxed V8 isolate with no filesystem, module, or direct network access; only the configured API host is reachable, and credentials are never visible to your code.\n\nExample: `async () => { const r = await request({ method: \"GET\", path: `/accounts/${ACCOUNT_ID}/workers/scripts` }); return r.result; }`"
    )]
    pub async fn execute(
        &self,
        Parameters(input): Parameters<ExecuteInput>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        tracing::info!(code_len = input.code.len(), "execute: starting");

        let auth = self.resolve_auth(&ctx)?;
        let account_id = auth
            .resolve_account(input.account_id.as_deref())
            .map_err(|e| e.to_string())?;

        // The credential is captured in the dispatcher's closure here; the
        // sandbox only ever sees the request() shim.
        let client = UpstreamApiClient::new(
            &self.upstream.api_base_url,
            &self.upstream.graphql_path,
            auth.credential(),
            self.egress.clone(),
        )
        .map_err(|e| e.to_string())?;
        let dispatcher: Arc<dyn ApiDispatcher> = Arc::new(TimeoutDispatcher::new(
            Arc::new(client),
            UPSTREAM_CALL_TIMEOUT,
        ));

        match self
            .executor
            .execute_code(&input.code, dispatcher, Some(&account_id))
            .await
        {
            Ok(result) => {
                let rendered = truncate_value(&result);
                tracing::info!(result_len = rendered.len(), "execute: complete");
                Ok(rendered)
            }
            Err(e) => {
                tracing::warn!(error = %e, "execute: failed");
                Err(Self::render_error(e))
            }
        }
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        let spec = self.spec.current();
        let path_count = spec
            .get("paths")
            .and_then(|p| p.as_object())
            .map(|p| p.len())
            .unwrap_or(0);

        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(format!(
                "Strato Code Mode gateway ({path_count} API paths indexed). \
                 Use search() to discover endpoints, then execute() to call them.\n\
                 \n\
                 Both tools take a `code` parameter containing a JavaScript async arrow function.\n\
                 \n\
                 search(): query `globalThis.spec` in-memory — `spec.paths` is an Object keyed by \
                 path; check each item's methods, parameters, and `x-product` tag. No network.\n\
                 \n\
                 execute(): call `await request({{method, path, query?, body?, contentType?, \
                 rawBody?}})`. The resolved account id is available as `ACCOUNT_ID`. Responses are \
                 one `{{success, status, result, errors, messages}}` envelope for REST and GraphQL \
                 alike; partial GraphQL data is preserved alongside its errors.\n\
                 \n\
                 Sandboxed environment — no filesystem, modules, or direct network \
                 (import/require/eval are blocked); only the configured API host is reachable, \
                 and results over the token budget are truncated with a marker."
            )),
            server_info: Implementation {
                name: "strato".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                description: None,
                icons: None,
                website_url: None,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strato_client::{Account, User};

    fn test_server() -> GatewayServer {
        let spec = LiveSpec::new(json!({
            "paths": {
                "/zones": { "get": {}, "x-product": "zones" },
            }
        }));
        GatewayServer::new(
            Arc::new(SandboxExecutor::new(Default::default())),
            spec,
            UpstreamConfig {
                api_base_url: "https://api.cloud.example/client/v4".into(),
                graphql_path: "/client/v4/graphql".into(),
                oauth_authorize_url: "https://dash.cloud.example/oauth2/auth".into(),
                oauth_token_url: "https://dash.cloud.example/oauth2/token".into(),
                oauth_client_id: "gw".into(),
                oauth_client_secret: String::new(),
                oauth_redirect_uri: "https://gw.example/oauth/callback".into(),
            },
            EgressPolicy::new("api.cloud.example", &[]),
        )
        .with_fixed_auth(AuthProps::UserToken {
            access_token: "tok".into(),
            user: User {
                id: "u1".into(),
                email: "dev@example.com".into(),
            },
            accounts: vec![Account {
                id: "acc-1".into(),
                name: "Primary".into(),
            }],
            refresh_token: None,
        })
    }

    #[test]
    fn get_info_names_both_tools() {
        let server = test_server();
        let info = server.get_info();
        assert_eq!(info.server_info.name, "strato");
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("search()"));
        assert!(instructions.contains("execute()"));
        assert!(instructions.contains("1 API paths indexed"));
        assert!(instructions.contains("ACCOUNT_ID"));
    }

    #[test]
    fn js_errors_render_with_stack_others_redacted() {
        let rendered = GatewayServer::render_error(SandboxError::JsError {
            message: "boom".into(),
            stack: Some("Error: boom\n    at <anonymous>:2:11".into()),
        });
        assert!(rendered.contains("boom"));
        assert!(rendered.contains("at <anonymous>"));

        let rendered = GatewayServer::render_error(SandboxError::Execution(anyhow::anyhow!(
            "connect failed: https://internal.corp/secret"
        )));
        assert!(!rendered.contains("internal.corp"));
    }

    #[tokio::test]
    async fn search_tool_runs_against_live_spec() {
        let server = test_server();
        let result = server
            .search(Parameters(SearchInput {
                code: "async () => Object.keys(spec.paths)".into(),
            }))
            .await
            .unwrap();
        assert!(result.contains("/zones"));
    }
}
