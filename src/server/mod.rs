//! HTTP server
//!
//! Thin axum front for the search engine: one authenticated-by-proxy lookup
//! route, an unauthenticated load-status route, and a liveness probe. The
//! transport owns client-disconnect detection: each lookup runs in its own
//! task behind a cancellation token whose drop guard fires if the
//! connection handler is dropped before a response is written.

pub mod api_types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    extract::{Query, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::SearchError;
use crate::search::{SearchRequest, SearchService};

pub use api_types::*;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    pub start_time: SystemTime,
}

/// nginx convention for "client closed request"; the client never reads it.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Bind and run the HTTP server until a shutdown signal arrives.
pub async fn create_server(config: ServerConfig, search: Arc<SearchService>) -> anyhow::Result<()> {
    let state = AppState {
        search,
        start_time: SystemTime::now(),
    };
    let app = create_app(state, config.enable_cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    info!("starting lease lookup server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Build the router with all routes and middleware.
pub fn create_app(state: AppState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/app/lease-lookup", get(lookup_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// GET /app/lease-lookup?query=…
///
/// The lookup itself runs in a spawned task: if the client disconnects,
/// axum drops this handler future, the drop guard signals the token, and
/// the in-flight search unwinds as cancelled instead of running to waste.
async fn lookup_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LookupParams>,
) -> Response {
    let identity = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();
    let request = SearchRequest::new(params.query.unwrap_or_default(), identity);

    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let search = Arc::clone(&state.search);
    let task = tokio::spawn(async move { search.lookup(request, token).await });

    let result = match task.await {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "lookup task aborted");
            Err(SearchError::Unavailable)
        }
    };
    // Response is being produced; a disconnect from here on is harmless.
    drop(guard.disarm());

    let mut response = match result {
        Ok(outcome) => {
            let mut response = Json(outcome.results).into_response();
            insert_header(
                &mut response,
                "x-search-latency-ms",
                outcome.latency.as_millis().to_string(),
            );
            response
        }
        Err(err) => search_error_response(err),
    };

    let status = state.search.load_status();
    insert_header(&mut response, "x-search-overloaded", status.overloaded.to_string());
    insert_header(&mut response, "x-search-active", status.active_count.to_string());
    insert_header(
        &mut response,
        "x-search-available-slots",
        status.available_slots.to_string(),
    );
    insert_header(
        &mut response,
        "x-search-p95-latency-ms",
        status.p95_latency_ms.to_string(),
    );
    response
}

/// GET /status: unauthenticated load snapshot for external monitoring.
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        load: state.search.load_status(),
        search_types: state.search.strategy_counts(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /health: liveness probe.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_seconds: state
            .start_time
            .elapsed()
            .map(|d| d.as_secs())
            .unwrap_or(0),
    })
}

/// Map the search taxonomy onto HTTP statuses and a stable error body.
fn search_error_response(err: SearchError) -> Response {
    let status = match &err {
        SearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SearchError::QuotaExceeded => StatusCode::FORBIDDEN,
        SearchError::RateLimited { .. } | SearchError::CapacityExceeded => {
            StatusCode::TOO_MANY_REQUESTS
        }
        SearchError::Timeout => StatusCode::REQUEST_TIMEOUT,
        SearchError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        SearchError::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
            .unwrap_or(StatusCode::REQUEST_TIMEOUT),
    };

    let retry_after_seconds = match &err {
        SearchError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
        _ => None,
    };

    let body = ErrorBody {
        error: err.code().to_string(),
        message: err.guidance().to_string(),
        retry_after_seconds,
        timestamp: chrono::Utc::now().to_rfc3339(),
        trace_id: Uuid::new_v4().to_string(),
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_after_seconds {
        insert_header(&mut response, "retry-after", secs.to_string());
    }
    response
}

fn insert_header(response: &mut Response, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        let cases = [
            (SearchError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (SearchError::QuotaExceeded, StatusCode::FORBIDDEN),
            (
                SearchError::RateLimited { retry_after: Duration::from_secs(30) },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (SearchError::CapacityExceeded, StatusCode::TOO_MANY_REQUESTS),
            (SearchError::Timeout, StatusCode::REQUEST_TIMEOUT),
            (SearchError::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            assert_eq!(search_error_response(err).status(), expected);
        }
    }

    #[test]
    fn cancelled_maps_to_client_closed_request() {
        let response = search_error_response(SearchError::Cancelled);
        assert_eq!(response.status().as_u16(), CLIENT_CLOSED_REQUEST);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let response = search_error_response(SearchError::RateLimited {
            retry_after: Duration::from_secs(42),
        });
        assert_eq!(
            response.headers().get("retry-after").and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }
}
