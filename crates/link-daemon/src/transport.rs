//! Transport: the single socket to the desktop app.
//!
//! ```text
//! Transport::connect ─► spawn dial ─► TransportOpened{conn_id, link}
//!                                 └─► TransportFailed{conn_id, error}
//! Transport::opened  ─► spawn inbound pump ─► Inbound{conn_id, text} ...
//!                                          └─► TransportClosed{conn_id}
//! ```
//!
//! Every dial bumps `conn_id`.  The core passes the id of each completion back
//! in, and events from a superseded connection are discarded here.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::core::LinkEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("desktop unreachable: {0}")]
    Unreachable(String),
    #[error("dial timed out after {0:?}")]
    Timeout(Duration),
    #[error("link closed")]
    Closed,
}

/// An established link as a pair of text channels.  Dropping `outbound`
/// closes the connection; `inbound` ends when the peer goes away.
#[derive(Debug)]
pub struct WireLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self) -> Result<WireLink, TransportError>;
}

/// Dials the desktop app's WebSocket endpoint.
pub struct WsDialer {
    url: String,
}

impl WsDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self) -> Result<WireLink, TransportError> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!("ws writer: {}", e);
                    return;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("ws reader: dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("ws reader: close {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("ws reader: {}", e);
                        break;
                    }
                };
                if in_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok(WireLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

pub struct Transport {
    dialer: Arc<dyn Dialer>,
    connect_timeout: Duration,
    state: ConnectionState,
    conn_id: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    pump: Option<AbortHandle>,
}

impl Transport {
    pub fn new(dialer: Arc<dyn Dialer>, connect_timeout: Duration) -> Self {
        Self {
            dialer,
            connect_timeout,
            state: ConnectionState::Disconnected,
            conn_id: 0,
            outbound: None,
            pump: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Start a dial unless one is open or in flight.  Returns true if a dial
    /// was started.  A dial that outlives `connect_timeout` reports failure.
    pub fn connect(&mut self, tx: &mpsc::UnboundedSender<LinkEvent>) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.conn_id += 1;
        self.state = ConnectionState::Connecting;

        let conn_id = self.conn_id;
        let dialer = Arc::clone(&self.dialer);
        let limit = self.connect_timeout;
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, dialer.dial()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(limit)),
            };
            let evt = match result {
                Ok(link) => LinkEvent::TransportOpened { conn_id, link },
                Err(e) => LinkEvent::TransportFailed {
                    conn_id,
                    error: e.to_string(),
                },
            };
            let _ = tx.send(evt);
        });
        true
    }

    /// Accept a completed dial.  Returns false (and drops the link) when the
    /// dial was superseded.
    pub fn opened(
        &mut self,
        conn_id: u64,
        link: WireLink,
        tx: &mpsc::UnboundedSender<LinkEvent>,
    ) -> bool {
        if conn_id != self.conn_id || self.state != ConnectionState::Connecting {
            debug!("transport: discarding stale link #{}", conn_id);
            return false;
        }
        let WireLink {
            outbound,
            mut inbound,
        } = link;

        let tx = tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(text) = inbound.recv().await {
                if tx.send(LinkEvent::Inbound { conn_id, text }).is_err() {
                    return;
                }
            }
            let _ = tx.send(LinkEvent::TransportClosed { conn_id });
        });

        self.outbound = Some(outbound);
        self.pump = Some(pump.abort_handle());
        self.state = ConnectionState::Open;
        info!("transport: link #{} open", conn_id);
        true
    }

    /// A dial failed.  Returns true if it was the live attempt.
    pub fn failed(&mut self, conn_id: u64) -> bool {
        if conn_id != self.conn_id || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        true
    }

    /// The peer closed the live link.  Returns true if it was the live link.
    pub fn closed(&mut self, conn_id: u64) -> bool {
        if conn_id != self.conn_id || self.state != ConnectionState::Open {
            return false;
        }
        self.teardown();
        true
    }

    pub fn is_current(&self, conn_id: u64) -> bool {
        conn_id == self.conn_id && self.state == ConnectionState::Open
    }

    /// Drop the live link (or abandon a dial) from our side.
    pub fn force_close(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.conn_id += 1;
        self.teardown();
    }

    fn teardown(&mut self) {
        self.outbound = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Write one frame to the open link.
    pub fn transmit(&self, text: String) -> Result<(), TransportError> {
        match &self.outbound {
            Some(outbound) if self.state == ConnectionState::Open => {
                outbound.send(text).map_err(|_| TransportError::Closed)
            }
            _ => Err(TransportError::Closed),
        }
    }
}
