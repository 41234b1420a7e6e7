use crate::broadcast::{Broadcaster, Subscription};
use crate::metrics::Metrics;
use crate::sinks::history::{MemoryStore, CURRENT_KEY, HISTORY_KEY};
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub store: MemoryStore,
    pub broadcaster: Arc<Broadcaster>,
    pub subscriber_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    store: MemoryStore,
    broadcaster: Arc<Broadcaster>,
    subscriber_timeout: Duration,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/current", get(current_handler))
        .route("/api/history", get(history_handler))
        .route("/ws", get(ws_handler))
        .with_state(HttpAppState {
            metrics,
            store,
            broadcaster,
            subscriber_timeout,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

fn json_response(body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

async fn current_handler(State(state): State<HttpAppState>) -> Response {
    match state.store.get(CURRENT_KEY) {
        Some(record) => json_response(record),
        None => (StatusCode::NOT_FOUND, "no data collected yet").into_response(),
    }
}

/// Stored records are already JSON objects, so the array is assembled as text.
async fn history_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state.store.range(HISTORY_KEY, limit);
    json_response(format!("[{}]", records.join(",")))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HttpAppState>) -> Response {
    ws.on_upgrade(move |socket| stream_records(socket, state))
}

async fn stream_records(socket: WebSocket, state: HttpAppState) {
    let Subscription { id, mut rx } = state.broadcaster.subscribe();
    state.metrics.set_subscribers(state.broadcaster.len());
    info!(subscriber = id, "subscriber connected");

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(text) = outgoing else { break };
                let send = sender.send(Message::Text(text.to_string()));
                match tokio::time::timeout(state.subscriber_timeout, send).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(subscriber = id, error = %err, "subscriber send failed");
                        break;
                    }
                    Err(_elapsed) => {
                        warn!(subscriber = id, timeout = ?state.subscriber_timeout, "subscriber send timed out, disconnecting");
                        break;
                    }
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.broadcaster.unsubscribe(id);
    state.metrics.set_subscribers(state.broadcaster.len());
    info!(subscriber = id, "subscriber disconnected");
}
