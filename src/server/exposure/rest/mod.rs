//! REST API exposure
//!
//! Maps HTTP onto [`ServiceRequest`]s and [`ServiceResponse`]s back onto
//! HTTP. Every request gets its own [`Service`]; the shared state is the
//! [`ServerHost`] and the [`AuthProvider`] that turns headers into an
//! [`AuthContext`].
//!
//! Routes:
//! - `GET /health`, `GET /healthz`
//! - `GET /{version}`: the service document
//! - `POST /{version}/$batch`: JSON batch, executed as one changeset
//! - `GET|POST|PUT|PATCH|DELETE /{version}/{*path}`

use super::super::host::ServerHost;
use crate::core::auth::{AuthContext, AuthProvider};
use crate::core::error::{RequestError, StaError};
use crate::core::version::Version;
use crate::service::{RequestType, Service, ServiceRequest, ServiceResponse};
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

const BATCH_SEGMENT: &str = "$batch";

#[derive(Clone)]
struct RestState {
    host: Arc<ServerHost>,
    auth: Arc<dyn AuthProvider>,
}

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router from a host
    pub fn build_router(host: Arc<ServerHost>, auth: Arc<dyn AuthProvider>) -> Router {
        let cors = host.settings.cors_enabled;
        let state = RestState { host, auth };
        let mut router = Router::new()
            .route("/{version}", get(service_document))
            .route("/{version}/{*path}", any(handle))
            .with_state(state)
            .merge(Self::health_routes());

        if cors {
            router = router.layer(CorsLayer::permissive());
        }

        router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "sta-rs"
        }))
    }
}

impl IntoResponse for ServiceResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let plain = self
            .header("Content-Type")
            .is_some_and(|c| c.starts_with("text/plain"));
        let mut response = match self.body {
            Some(Value::String(text)) if plain => Response::new(Body::from(text)),
            Some(body) => Json(body).into_response(),
            None => Response::new(Body::empty()),
        };
        *response.status_mut() = status;
        for (name, value) in &self.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) else {
                tracing::warn!(header = %name, "dropping unrepresentable response header");
                continue;
            };
            response.headers_mut().insert(name, value);
        }
        response
    }
}

fn parse_version(version: &str) -> Result<Version, ServiceResponse> {
    version.parse().map_err(|e: String| {
        tracing::debug!(error = %e, "unknown version segment");
        ServiceResponse::not_found(Version::default())
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn request_type(method: &Method, headers: &HeaderMap) -> Option<RequestType> {
    Some(match *method {
        Method::GET => RequestType::Read,
        Method::POST => RequestType::Create,
        Method::PUT => RequestType::UpdateAll,
        Method::PATCH => {
            let is_patch = header_str(headers, header::CONTENT_TYPE)
                .is_some_and(|c| c.starts_with(JSON_PATCH_CONTENT_TYPE));
            if is_patch {
                RequestType::UpdateChangeset
            } else {
                RequestType::UpdateChanges
            }
        }
        Method::DELETE => RequestType::Delete,
        _ => return None,
    })
}

async fn service_document(
    State(state): State<RestState>,
    Path(version): Path<String>,
    headers: HeaderMap,
) -> ServiceResponse {
    let version = match parse_version(&version) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let auth = match state.auth.extract_context(&headers).await {
        Ok(auth) => auth,
        Err(e) => return ServiceResponse::from_error(&e),
    };
    let request = ServiceRequest::new(RequestType::GetCapabilities, version, "").with_auth(auth);
    Service::new(state.host).execute(request).await
}

async fn handle(
    State(state): State<RestState>,
    Path((version, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: String,
) -> ServiceResponse {
    let version = match parse_version(&version) {
        Ok(version) => version,
        Err(response) => return response,
    };
    let auth = match state.auth.extract_context(&headers).await {
        Ok(auth) => auth,
        Err(e) => return ServiceResponse::from_error(&e),
    };

    if path == BATCH_SEGMENT {
        if method != Method::POST {
            let err = RequestError::not_allowed("$batch only accepts POST");
            return ServiceResponse::from_error(&err.into());
        }
        return batch(state.host, version, auth, &body).await;
    }

    let Some(request_type) = request_type(&method, &headers) else {
        let message = format!("{method} is not supported");
        return ServiceResponse::error(405, "METHOD_NOT_ALLOWED", message);
    };
    // the captured `path` is already decoded; the engine wants URL text
    let raw_path = uri
        .path()
        .trim_start_matches('/')
        .split_once('/')
        .map_or("", |(_, rest)| rest);
    let mut request = ServiceRequest::new(request_type, version, format!("/{raw_path}"))
        .with_query(query.unwrap_or_default())
        .with_auth(auth);
    if !body.is_empty() {
        request = request.with_content(body);
    }
    if let Some(prefer) = header_str(&headers, HeaderName::from_static("prefer")) {
        request = request.with_prefer(prefer);
    }
    Service::new(state.host).execute(request).await
}

/// One request of a JSON batch
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub id: Option<String>,
    pub method: String,
    /// Path relative to the version root, optionally with a query
    pub url: String,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    pub body: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    requests: Vec<BatchRequest>,
}

/// One response of a JSON batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: u16,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub headers: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl BatchRequest {
    fn into_service_request(
        self,
        version: Version,
        auth: &AuthContext,
    ) -> Result<ServiceRequest, StaError> {
        let method: Method = self
            .method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| RequestError::body(format!("unknown method '{}'", self.method)))?;
        let content_type = self.headers.get("Content-Type").and_then(Value::as_str);
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type.and_then(|c| HeaderValue::from_str(c).ok()) {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        let request_type = request_type(&method, &headers)
            .ok_or_else(|| RequestError::body(format!("{method} is not allowed in a batch")))?;

        let url = self.url.trim_start_matches('/');
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let mut request = ServiceRequest::new(request_type, version, format!("/{path}"))
            .with_query(query)
            .with_auth(auth.clone());
        if let Some(body) = self.body {
            request = request.with_content(body.to_string());
        }
        if let Some(prefer) = self.headers.get("Prefer").and_then(Value::as_str) {
            request = request.with_prefer(prefer);
        }
        Ok(request)
    }
}

async fn batch(
    host: Arc<ServerHost>,
    version: Version,
    auth: AuthContext,
    body: &str,
) -> ServiceResponse {
    let parsed: BatchBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => return ServiceResponse::from_error(&e.into()),
    };
    let mut ids = Vec::with_capacity(parsed.requests.len());
    let mut requests = Vec::with_capacity(parsed.requests.len());
    for request in parsed.requests {
        ids.push(request.id.clone());
        match request.into_service_request(version, &auth) {
            Ok(request) => requests.push(request),
            Err(e) => return ServiceResponse::from_error(&e),
        }
    }

    let mut service = Service::new(host);
    let responses = match service.execute_changeset(requests).await {
        Ok(responses) => responses,
        Err(e) => return ServiceResponse::from_error(&e),
    };
    let responses: Vec<BatchResponse> = ids
        .into_iter()
        .zip(responses)
        .map(|(id, response)| BatchResponse {
            id,
            status: response.code,
            headers: response
                .headers
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
            body: response.body,
        })
        .collect();
    let body = match serde_json::to_value(BatchResponses { responses }) {
        Ok(body) => body,
        Err(e) => return ServiceResponse::from_error(&e.into()),
    };
    ServiceResponse::new(200)
        .with_header("Content-Type", "application/json")
        .with_body(body)
}

#[derive(Debug, Serialize)]
struct BatchResponses {
    responses: Vec<BatchResponse>,
}
