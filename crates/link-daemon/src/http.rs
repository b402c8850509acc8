use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use link_proto::protocol::OutboundMessage;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info};

use crate::core::{LinkEvent, LinkStatus, SendOutcome};

const HTTP_SOURCE: &str = "http";

#[derive(Clone)]
struct HttpState {
    status: watch::Receiver<LinkStatus>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
}

#[derive(Deserialize)]
struct SendRequest {
    url: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Serialize)]
struct SendResponse {
    sent: bool,
    outcome: SendOutcome,
}

pub fn router(
    status: watch::Receiver<LinkStatus>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/send", post(send_url))
        .with_state(HttpState { status, event_tx })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    status: watch::Receiver<LinkStatus>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(status, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_status(State(state): State<HttpState>) -> Json<LinkStatus> {
    Json(state.status.borrow().clone())
}

async fn send_url(
    State(state): State<HttpState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, StatusCode> {
    if req.url.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    info!("HTTP API: send {}", req.url);

    let source = req.source.unwrap_or_else(|| HTTP_SOURCE.to_string());
    let (reply, outcome) = oneshot::channel();
    let evt = LinkEvent::Outbound {
        message: OutboundMessage::send_to_parachord(req.url, source),
        reply: Some(reply),
    };
    if state.event_tx.send(evt).is_err() {
        error!("Failed to hand message to link core");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let outcome = outcome.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(SendResponse {
        sent: outcome == SendOutcome::Sent,
        outcome,
    }))
}
