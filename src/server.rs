//! HTTP and MCP server for the intelligence tools.
//!
//! Every tool in the [`ToolRegistry`] is reachable two ways: as a plain JSON
//! endpoint (`POST /tools/{name}`) and through the MCP Streamable HTTP
//! endpoint mounted at `/mcp`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (returns version and corpus size) |
//! | `*`    | `/mcp` | MCP JSON-RPC over Streamable HTTP |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `tool_error` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{session::local::LocalSessionManager, StreamableHttpService};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::ExpansionCache;
use crate::config::Config;
use crate::mcp::McpBridge;
use crate::retrieval::{CorpusRetriever, Retriever};
use crate::tools::{validate_params, ToolContext, ToolInfo, ToolRegistry};
use crate::validation::create_validator;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    documents: usize,
}

/// Starts the server over the JSON corpus named in `[corpus]`.
///
/// This is the entry point used by `ctxi serve mcp`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let retriever = CorpusRetriever::load(&config.corpus)?;
    let documents = retriever.len();
    run_server_with_retriever(config, Arc::new(retriever), documents).await
}

/// Starts the server over any [`Retriever`].
///
/// `documents` is reported by `/health`; pass `0` when unknown.
pub async fn run_server_with_retriever(
    config: &Config,
    retriever: Arc<dyn Retriever>,
    documents: usize,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, documents, "intelligence server listening");

    let app = router(config, retriever, documents)?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the application router without binding a socket.
pub fn router(config: &Config, retriever: Arc<dyn Retriever>, documents: usize) -> anyhow::Result<Router> {
    let config = Arc::new(config.clone());
    let validator = create_validator(&config.llm)?;

    let tools = Arc::new(ToolRegistry::with_builtins());
    for t in tools.tools() {
        tracing::debug!(tool = t.name(), "registered tool");
    }

    let ctx = ToolContext::new(config, retriever)
        .with_cache(Arc::new(ExpansionCache::default()))
        .with_validator(validator);

    let bridge = McpBridge::new(tools.clone(), ctx.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let state = AppState { tools, ctx, documents };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .with_state(state)
        .nest_service("/mcp", mcp_service)
        .layer(cors))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Map a tool failure onto the error contract by its message.
///
/// Tools signal caller mistakes through wording (`must not be empty`,
/// `invalid`, `unknown`) rather than a dedicated error type.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{}: {}", tool_name, err);
    let raw = err.to_string();

    if raw.contains("not found") {
        not_found(msg)
    } else if raw.contains("must not be empty")
        || raw.contains("must not be negative")
        || raw.contains("invalid")
        || raw.contains("unknown")
    {
        bad_request(msg)
    } else if raw.contains("timed out") {
        app_error(StatusCode::REQUEST_TIMEOUT, "timeout", msg)
    } else {
        tracing::warn!(tool = tool_name, error = %raw, "tool failed");
        app_error(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        documents: state.documents,
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.tools().iter().map(|t| ToolInfo::of(t.as_ref())).collect(),
    })
}

// ============ POST /tools/{name} ============

/// Look up, validate, and execute one tool.
///
/// Returns `404` for an unknown tool, `400` for parameter errors, and the
/// classified status for execution failures.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let validated = validate_params(&tool.parameters_schema(), &params).map_err(|e| bad_request(e.to_string()))?;

    tracing::info!(tool = %name, "tool call");
    let result = tool
        .execute(validated, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
