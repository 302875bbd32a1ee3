use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use setup_common::{ChangeDomainRequest, ChangeStaticIpsRequest};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::domain::{DomainChangeOutcome, DomainMigration};
use crate::error::SetupError;
use crate::health::HealthState;
use crate::secret::Secret;
use crate::static_ips::StaticIpMigration;

/// Cookie set by the login flow of the setup UI
pub const ACCESS_TOKEN_COOKIE: &str = "k8s-access-token-cookie";

/// Router state shared by all handlers
#[derive(Clone)]
pub struct ApiState {
    pub domain: Arc<DomainMigration>,
    pub static_ips: Arc<StaticIpMigration>,
    pub health: Arc<HealthState>,
}

/// Caller's bearer token, forwarded to the cluster API
#[derive(Debug, Clone)]
pub struct BearerToken(pub Secret<String>);

/// Token from the access token cookie, else from `Authorization: Bearer`
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|t| !t.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

/// Rejects requests without a token before any handler runs
async fn auth_middleware(mut request: Request, next: Next) -> Response {
    match extract_token(request.headers()) {
        Some(token) => {
            request
                .extensions_mut()
                .insert(BearerToken(Secret::new(token)));
            next.run(request).await
        }
        None => {
            warn!(path = %request.uri().path(), "Missing access token");
            error_response(&SetupError::Unauthorized)
        }
    }
}

/// Status code of the error with its message as the body
fn error_response(err: &SetupError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

#[instrument(skip_all)]
async fn handle_change_domain(
    State(state): State<ApiState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    body: Bytes,
) -> Response {
    let request: ChangeDomainRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse input for changeDomain");
            return StatusCode::UNPROCESSABLE_ENTITY.into_response();
        }
    };

    match state.domain.change_domain(token.expose_secret(), &request).await {
        Ok(DomainChangeOutcome::Unchanged) => StatusCode::OK.into_response(),
        Ok(DomainChangeOutcome::Migrated {
            routes_rehosted,
            routes_failed,
        }) => Json(serde_json::json!({
            "routesRehosted": routes_rehosted,
            "routesFailed": routes_failed,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[instrument(skip_all)]
async fn handle_change_static_ips(
    State(state): State<ApiState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    body: Bytes,
) -> Response {
    let request: ChangeStaticIpsRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse input for changeStaticIps");
            return StatusCode::UNPROCESSABLE_ENTITY.into_response();
        }
    };

    match state
        .static_ips
        .change_static_ips(token.expose_secret(), &request.hosts)
        .await
    {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "setup-node",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn handle_liveness(State(state): State<ApiState>) -> StatusCode {
    if state.health.is_live().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn handle_readiness(State(state): State<ApiState>) -> StatusCode {
    if state.health.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    match origin.parse::<HeaderValue>() {
        Ok(origin) => Some(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true),
        ),
        Err(e) => {
            warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
            None
        }
    }
}

/// Routes of the setup backend
pub fn create_router(state: ApiState, cors_origin: Option<&str>) -> Router {
    let protected = Router::new()
        .route("/changeDomain", post(handle_change_domain))
        .route("/changeStaticIps", post(handle_change_static_ips))
        .route_layer(middleware::from_fn(auth_middleware));

    let router = Router::new()
        .route("/ping", get(handle_ping))
        .route("/livenessProbe", get(handle_liveness))
        .route("/readinessProbe", get(handle_readiness))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    match cors_origin.and_then(cors_layer) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Serve the API until `shutdown` fires
pub async fn start_api_server(config: &ServerConfig, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let app = create_router(state, config.cors_origin.as_deref());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!(addr = %config.listen_addr, "Setup API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Setup API server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_cookie_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; k8s-access-token-cookie=sha256~cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sha256~header"));
        assert_eq!(extract_token(&headers).as_deref(), Some("sha256~cookie"));
    }

    #[test]
    fn test_token_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sha256~header"));
        assert_eq!(extract_token(&headers).as_deref(), Some("sha256~header"));
    }

    #[test]
    fn test_empty_cookie_falls_back_to_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("k8s-access-token-cookie="));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sha256~header"));
        assert_eq!(extract_token(&headers).as_deref(), Some("sha256~header"));
    }

    #[test]
    fn test_missing_or_empty_token() {
        assert_eq!(extract_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        headers.insert(COOKIE, HeaderValue::from_static("k8s-access-token-cookie="));
        assert_eq!(extract_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&SetupError::InvalidInput("bad".into()));
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = error_response(&SetupError::PatchFailed {
            resource: "Ingress cluster resource".into(),
            status: 409,
            message: "conflict".into(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
