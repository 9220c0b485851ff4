//! HTTP front end
//!
//! Every request not claimed by an introspection endpoint goes to
//! [`dispatch_handler`], which routes it against the published table and runs
//! the script on a blocking task.
//!
//! ## Endpoints (admin only)
//!
//! - `GET  /_wtf/health` - liveness probe
//! - `GET  /_wtf/routes` - published routes and rejected files
//! - `POST /_wtf/reload` - rebuild the route table

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, FromRequest, Multipart, Request, State};
use axum::http::header::{ALLOW, CONTENT_TYPE, HOST, LOCATION};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info, warn};

use super::shutdown::shutdown_signal;
use crate::db::{CancelFlag, CancelOnDrop};
use crate::engine::Engine;
use crate::error::{ContextError, Result, WtfError};
use crate::request::IncomingRequest;
use crate::routing::{RouteEntry, RouteMatch};

const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

// ── Shared state ────────────────────────────────────────────────────────

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub admin_enabled: bool,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, admin_enabled: bool) -> Self {
        Self {
            engine,
            admin_enabled,
        }
    }
}

// ── Response types ──────────────────────────────────────────────────────

/// Body of `GET /_wtf/routes`
#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    pub routes: Vec<RouteEntry>,
    pub rejected: Vec<String>,
}

/// Body of `POST /_wtf/reload`
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub routes: usize,
}

// ── Router creation ─────────────────────────────────────────────────────

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let mut app: Router<AppState> = Router::new();
    if state.admin_enabled {
        app = app
            .route("/_wtf/health", get(health_handler))
            .route("/_wtf/routes", get(routes_handler))
            .route("/_wtf/reload", post(reload_handler));
    }
    app.fallback(dispatch_handler).with_state(state)
}

/// Bind `addr` and serve until Ctrl-C or SIGTERM
pub async fn start_http_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            WtfError::server(
                "bind",
                format!(
                    "port {} is already in use. Fix: pass --port {} or stop the existing process",
                    addr.port(),
                    addr.port().saturating_add(1)
                ),
            )
        } else {
            WtfError::server("bind", format!("{}: {}", addr, e))
        }
    })?;
    info!(addr = %addr, "Listening for HTTP requests");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| WtfError::server("serve", e.to_string()))?;

    Ok(())
}

// ── Dispatch ────────────────────────────────────────────────────────────

/// Route and execute a script request
async fn dispatch_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let (route, params) = match state.engine.lookup(&parts.method, parts.uri.path()) {
        RouteMatch::Found { route, params } => (route, params),
        RouteMatch::Redirect(location) => return redirect(location, parts.uri.query()),
        RouteMatch::MethodNotAllowed(allowed) => return method_not_allowed(&allowed),
        RouteMatch::NotFound => return plain(StatusCode::NOT_FOUND, "404 page not found"),
    };

    let limit = state.engine.config().max_body_bytes;
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, limit, "Rejecting request body");
            return plain(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    let mut incoming = incoming_request(&parts, bytes).path_params(params);
    if incoming.is_multipart() {
        match multipart_fields(&incoming).await {
            Ok(fields) => incoming.multipart_fields = fields,
            Err(e) => return e.into_response(),
        }
    }

    let cancel = CancelFlag::new();
    let guard = CancelOnDrop::new(cancel.clone());
    let engine = Arc::clone(&state.engine);
    let outcome =
        tokio::task::spawn_blocking(move || engine.execute(&route, &incoming, &cancel)).await;
    guard.disarm();

    match outcome {
        Ok(Ok(plan)) => plan.into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!(error = %e, "Request worker failed");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// Transport-independent copy of the request
pub fn incoming_request(parts: &Parts, body: Bytes) -> IncomingRequest {
    let uri = match parts.uri.query() {
        Some(query) => format!("{}?{}", parts.uri.path(), query),
        None => parts.uri.path().to_string(),
    };
    let mut request = IncomingRequest::new(parts.method.clone(), &uri).body(body);
    request.protocol = format!("{:?}", parts.version);

    for (name, value) in &parts.headers {
        request = request.header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    if !parts.headers.contains_key(HOST) {
        if let Some(authority) = parts.uri.authority() {
            request = request.header(HOST.as_str(), authority.as_str());
        }
    }
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        request = request.remote_addr(addr.to_string());
    }
    request
}

/// Text fields of a multipart body; file parts are skipped
async fn multipart_fields(request: &IncomingRequest) -> Result<Vec<(String, String)>> {
    let malformed =
        |e: axum::extract::multipart::MultipartError| ContextError::malformed_body(e.body_text());

    let content_type = request.content_type().unwrap_or_default();
    let rebuilt = axum::http::Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(request.body.clone()))
        .map_err(|e| WtfError::server("multipart", e.to_string()))?;
    let mut multipart = Multipart::from_request(rebuilt, &())
        .await
        .map_err(|e| ContextError::malformed_body(e.body_text()))?;

    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field.text().await.map_err(malformed)?;
        fields.push((name, value));
    }
    Ok(fields)
}

fn plain(status: StatusCode, message: &str) -> Response {
    (
        status,
        [(CONTENT_TYPE, PLAIN_TEXT)],
        format!("{}\n", message),
    )
        .into_response()
}

fn redirect(location: String, query: Option<&str>) -> Response {
    let target = match query {
        Some(query) => format!("{}?{}", location, query),
        None => location,
    };
    match HeaderValue::from_str(&target) {
        Ok(value) => {
            let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(_) => plain(StatusCode::NOT_FOUND, "404 page not found"),
    }
}

fn method_not_allowed(allowed: &[&str]) -> Response {
    let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}

// ── Introspection handlers ──────────────────────────────────────────────

/// `GET /_wtf/health`
async fn health_handler() -> &'static str {
    "ok"
}

/// `GET /_wtf/routes`
async fn routes_handler(State(state): State<AppState>) -> Json<RoutesResponse> {
    let table = state.engine.routes();
    Json(RoutesResponse {
        routes: table.entries(),
        rejected: table.rejected().iter().map(ToString::to_string).collect(),
    })
}

/// `POST /_wtf/reload`
async fn reload_handler(State(state): State<AppState>) -> std::result::Result<Json<ReloadResponse>, WtfError> {
    let engine = Arc::clone(&state.engine);
    let routes = tokio::task::spawn_blocking(move || engine.rebuild_routes())
        .await
        .map_err(|e| WtfError::server("reload", e.to_string()))??;
    Ok(Json(ReloadResponse { routes }))
}

// ── Error type ──────────────────────────────────────────────────────────

impl IntoResponse for WtfError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }
        plain(status, &self.to_string())
    }
}
