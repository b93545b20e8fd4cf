//! JSON-over-HTTP surface: `/bookings`, `/resources` and their event streams.

mod bookings;
mod error;
mod resources;

pub use bookings::{BookingList, BookingView, Pagination};
pub use error::ApiError;
pub use resources::{AvailabilityView, FreeSpan};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, MatchedPath, Request, State};
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, warn};

use crate::auth::Authenticator;
use crate::engine::Engine;
use crate::observability::{
    AUTH_FAILURES_TOTAL, REQUEST_DURATION_SECONDS, REQUESTS_IN_FLIGHT, REQUESTS_REJECTED_TOTAL,
    REQUESTS_TOTAL,
};
use crate::policy::Actor;
use crate::service::BookingService;

#[derive(Clone)]
pub struct AppState {
    pub service: BookingService<Engine>,
    pub auth: Arc<Authenticator>,
    /// Bounds requests served at once; excess requests get 503.
    pub limiter: Arc<Semaphore>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, auth: Authenticator, max_in_flight: usize) -> Self {
        Self {
            service: BookingService::new(engine),
            auth: Arc::new(auth),
            limiter: Arc::new(Semaphore::new(max_in_flight)),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.auth.authenticate(&parts.headers).map_err(|e| {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            debug!(uri = %parts.uri, "authentication failed: {e}");
            ApiError::from(e)
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bookings", get(bookings::list).post(bookings::create))
        .route(
            "/bookings/:id",
            get(bookings::get)
                .put(bookings::update)
                .delete(bookings::delete),
        )
        .route("/resources", get(resources::list).post(resources::create))
        .route(
            "/resources/:id",
            get(resources::get)
                .put(resources::update)
                .delete(resources::delete),
        )
        .route("/resources/:id/availability", get(resources::availability))
        .route("/resources/:id/events", get(resources::events))
        .route_layer(middleware::from_fn_with_state(state.clone(), track))
        .route("/healthz", get(healthz))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Concurrency limit plus RED metrics, labelled by the matched route.
async fn track(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let method = req.method().to_string();

    let Ok(_permit) = state.limiter.clone().try_acquire_owned() else {
        warn!(%route, "request limit reached, rejecting");
        metrics::counter!(REQUESTS_REJECTED_TOTAL).increment(1);
        return ApiError::Overloaded.into_response();
    };

    let start = Instant::now();
    metrics::gauge!(REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(req).await;
    metrics::gauge!(REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16().to_string();
    metrics::counter!(REQUESTS_TOTAL, "route" => route.clone(), "method" => method.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route, "method" => method)
        .record(start.elapsed().as_secs_f64());
    response
}
