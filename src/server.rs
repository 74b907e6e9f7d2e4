use std::{convert::Infallible, path::PathBuf};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{controller::ScanController, error::StartError, sink::BroadcastSink};

/// Port specification used when a start request does not name one.
pub const DEFAULT_PORTS: &str = "1-1000";

#[derive(Clone)]
pub struct AppState {
    pub controller: ScanController,
    pub events: BroadcastSink,
}

#[derive(Debug, Deserialize)]
pub struct StartScanRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub ports: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TierRequest {
    pub pro: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the HTTP API; `static_dir`, when given, is served for every non-API path.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/stop", post(post_stop))
        .route("/tier", post(post_tier))
        .route("/events", get(get_events))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    let app = Router::new().nest("/api", api);
    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true)),
        None => app,
    };
    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn serve(bind: &str, state: AppState, static_dir: Option<PathBuf>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving API");
    axum::serve(listener, router(state, static_dir)).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.status()))
}

async fn post_scan(
    State(app): State<AppState>,
    Json(req): Json<StartScanRequest>,
) -> impl IntoResponse {
    let ports = req.ports.as_deref().unwrap_or(DEFAULT_PORTS);
    match app.controller.start(&req.target, ports) {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({ "id": id }))).into_response(),
        Err(e) => {
            let code = match e {
                StartError::AlreadyRunning => StatusCode::CONFLICT,
                StartError::EmptyTarget | StartError::EmptyPorts => StatusCode::BAD_REQUEST,
            };
            (code, Json(ErrorBody { error: e.to_string() })).into_response()
        }
    }
}

async fn post_stop(State(app): State<AppState>) -> impl IntoResponse {
    let stopping = app.controller.stop();
    (StatusCode::ACCEPTED, Json(json!({ "stopping": stopping })))
}

async fn post_tier(State(app): State<AppState>, Json(req): Json<TierRequest>) -> impl IntoResponse {
    app.controller.set_tier(req.pro);
    (StatusCode::OK, Json(json!({ "tier": app.controller.tier() })))
}

async fn get_events(
    State(app): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = app.events.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    let event = Event::default()
                        .event(ev.name())
                        .data(ev.payload().to_string());
                    return Some((Ok::<_, Infallible>(event), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, oldest events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
