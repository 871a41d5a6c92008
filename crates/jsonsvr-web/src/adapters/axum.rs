use crate::dispatcher::{CONTENT_TYPE_HTML, dispatch_rules};
use crate::routing::{RouteSlot, ServiceRoutes};
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_TYPE, HeaderName, LOCATION};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::future::BoxFuture;
use jsonsvr_core::{
    Context, Interpreter, RequestContext, ResponseContext, RouteTable, ServiceError, SharedData,
    display_value, shared_data,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

/// Largest request body buffered for a service call.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Loads a fresh route table for `/_reload` and file watching.
pub type ServiceReloader =
    Arc<dyn Fn() -> BoxFuture<'static, Result<RouteTable, ServiceError>> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct AxumServiceAdapter {
    interpreter: Arc<Interpreter>,
    routes: RouteSlot,
    data: SharedData,
    access_log: bool,
    shutdown: Arc<Notify>,
    reloader: Option<ServiceReloader>,
    index_page: Option<Arc<String>>,
}

impl AxumServiceAdapter {
    pub fn new(interpreter: Arc<Interpreter>, table: RouteTable) -> Self {
        Self {
            interpreter,
            routes: RouteSlot::new(ServiceRoutes::compile(table)),
            data: shared_data(),
            access_log: false,
            shutdown: Arc::new(Notify::new()),
            reloader: None,
            index_page: None,
        }
    }

    pub fn with_data(mut self, data: SharedData) -> Self {
        self.data = data;
        self
    }

    pub fn with_access_log(mut self, enabled: bool) -> Self {
        self.access_log = enabled;
        self
    }

    /// Page served for `GET /` when the service defines no `/` route.
    pub fn with_index_page(mut self, html: Option<String>) -> Self {
        self.index_page = html.map(Arc::new);
        self
    }

    pub fn with_reloader<F>(mut self, reloader: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<RouteTable, ServiceError>> + Send + Sync + 'static,
    {
        self.reloader = Some(Arc::new(reloader));
        self
    }

    pub fn routes(&self) -> &RouteSlot {
        &self.routes
    }

    pub fn data(&self) -> &SharedData {
        &self.data
    }

    /// Notified once `/_stop` is requested.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub fn router(self) -> Router {
        let access_log = self.access_log;
        let router = Router::new().fallback(handle_service).with_state(self);
        if access_log {
            router.layer(middleware::from_fn(log_access))
        } else {
            router
        }
    }

    /// Swap in a freshly loaded route table. The active table is kept when
    /// loading fails.
    pub async fn reload(&self) -> Result<usize, String> {
        let Some(reloader) = &self.reloader else {
            return Err("reloading is not configured".to_string());
        };
        let table = reloader().await.map_err(|e| e.to_string())?;
        let count = table.len();
        self.routes.replace(ServiceRoutes::compile(table));
        info!(routes = count, "service definition reloaded");
        Ok(count)
    }

    pub async fn handle(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
        ip: String,
    ) -> Response {
        let routes = self.routes.current();
        let path = uri.path();

        let Some(found) = routes.find(method.as_str(), path) else {
            return self.handle_unrouted(method, path, &routes).await;
        };
        debug!(method = %method, path, route = %found.route.path, "route matched");

        let request = RequestContext {
            method: method.as_str().to_ascii_uppercase(),
            url: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| path.to_string()),
            path: path.to_string(),
            ip,
            params: found.params,
            query: parse_query(uri.query()),
            headers: headers_to_map(headers),
            body: parse_body(headers, body),
        };
        let ctx = Context::new(self.data.clone(), request);
        let response = dispatch_rules(&self.interpreter, &found.route.rules, &ctx).await;
        Self::service_response_to_axum(&response)
    }

    async fn handle_unrouted(&self, method: &Method, path: &str, routes: &ServiceRoutes) -> Response {
        let readable = *method == Method::GET || *method == Method::HEAD;
        match path {
            "/_stop" if readable => {
                info!("stop requested");
                self.shutdown.notify_one();
                Json(json!({ "success": true, "time": chrono::Utc::now().to_rfc3339() }))
                    .into_response()
            }
            "/_reload" if readable => match self.reload().await {
                Ok(_) => Json(json!({ "success": true })).into_response(),
                Err(message) => {
                    error!(error = %message, "reload failed");
                    Json(json!({ "success": false, "message": message })).into_response()
                }
            },
            "/" if readable && !routes.table().has_path("/") => match &self.index_page {
                Some(html) => {
                    let mut response = html.as_str().to_string().into_response();
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_HTML));
                    response
                }
                None => not_found(),
            },
            _ => {
                debug!(method = %method, path, "no route");
                not_found()
            }
        }
    }

    pub fn service_response_to_axum(response: &ResponseContext) -> Response {
        let status =
            StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut out = if let Some(to) = response.redirect.as_deref() {
            let mut out = Response::new(Body::empty());
            *out.status_mut() = if status.is_redirection() {
                status
            } else {
                StatusCode::FOUND
            };
            match HeaderValue::from_str(to) {
                Ok(location) => {
                    out.headers_mut().insert(LOCATION, location);
                }
                Err(_) => warn!(location = to, "redirect target is not a valid header value"),
            }
            out
        } else {
            let mut out = match &response.body {
                Value::Null => status.canonical_reason().unwrap_or_default().into_response(),
                Value::String(s) => s.clone().into_response(),
                other => Json(other.clone()).into_response(),
            };
            *out.status_mut() = status;
            out
        };

        apply_response_headers(&mut out, &response.headers);
        out
    }
}

async fn handle_service(State(adapter): State<AxumServiceAdapter>, request: Request) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };
    adapter
        .handle(&parts.method, &parts.uri, &parts.headers, &body, ip)
        .await
}

async fn log_access(request: Request, next: Next) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };
    info!(
        target: "access",
        method = %parts.method,
        uri = %parts.uri,
        client = %ip,
        headers = ?parts.headers,
        body = %String::from_utf8_lossy(&body),
        "request"
    );

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (parts, body) = response.into_parts();
    let body: Bytes = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            error!(target: "access", error = %e, "failed to buffer response body");
            Bytes::new()
        }
    };
    info!(
        target: "access",
        status = parts.status.as_u16(),
        headers = ?parts.headers,
        body = %String::from_utf8_lossy(&body),
        "response"
    );
    Response::from_parts(parts, Body::from(body))
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.insert(name.as_str().to_string(), v.to_string());
        }
    }
    out
}

fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let Some(query) = raw else {
        return HashMap::new();
    };
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// JSON and form bodies are decoded; anything else is exposed as text.
fn parse_body(headers: &HeaderMap, body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.contains("json") {
        match serde_json::from_slice(body) {
            Ok(value) => return value,
            Err(e) => warn!(error = %e, "request body is not valid JSON; exposed as text"),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let fields = form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Value::Object(fields);
    }
    Value::String(String::from_utf8_lossy(body).into_owned())
}

fn apply_response_headers(response: &mut Response, headers: &Map<String, Value>) {
    for (name, value) in headers {
        let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
            warn!(header = %name, "invalid response header name skipped");
            continue;
        };
        let values: Vec<String> = match value {
            Value::Array(items) => items.iter().map(display_value).collect(),
            other => vec![display_value(other)],
        };
        response.headers_mut().remove(&header_name);
        for value in values {
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                response
                    .headers_mut()
                    .append(header_name.clone(), header_value);
            }
        }
    }
}
