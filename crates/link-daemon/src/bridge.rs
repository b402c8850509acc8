//! Browser bridge: the daemon's view of the browser runtime.
//!
//! ```text
//! shim ──ShimFrame──► handle_shim ──► LinkEvent ──► LinkCore
//!   ▲                      │
//!   └────DaemonFrame───────┘ ◄── BridgeHost::call / fire / respond
//! ```
//!
//! The browser-side shim connects over TCP and speaks length-prefixed JSON.
//! Only one shim is attached at a time; a new connection replaces the old
//! one.  Host calls that expect an answer carry an id and wait on a pending
//! map, resolved by the shim's `hostReply` frames.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use link_proto::bridge::{DaemonFrame, HostCall, ShimFrame, MAX_FRAME_LEN};
use link_proto::protocol::{LocalReply, TabId, TabInfo};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use crate::core::LinkEvent;
use crate::host::{BrowserHost, HostError};

/// How long a host call waits for the shim's reply.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

type Pending = HashMap<u64, oneshot::Sender<Result<Value, HostError>>>;

struct Shared {
    /// Writer of the attached shim, tagged with its session number.
    writer: Mutex<Option<(u64, mpsc::UnboundedSender<DaemonFrame>)>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    next_session: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// `BrowserHost` backed by whichever shim is currently attached.
#[derive(Clone)]
pub struct BridgeHost {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl Default for BridgeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeHost {
    pub fn new() -> Self {
        Self::with_timeout(CALL_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                next_session: AtomicU64::new(0),
            }),
            timeout,
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.shared.writer).is_some()
    }

    /// Make a new shim the target of all host traffic.  Calls still waiting
    /// on the previous shim fail.
    fn attach(&self) -> (u64, mpsc::UnboundedReceiver<DaemonFrame>) {
        let session = self.shared.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = lock(&self.shared.writer).replace((session, tx));
        if previous.is_some() {
            self.fail_pending(HostError::ChannelClosed);
        }
        (session, rx)
    }

    fn detach(&self, session: u64) {
        let mut writer = lock(&self.shared.writer);
        if matches!(writer.as_ref(), Some((current, _)) if *current == session) {
            *writer = None;
            drop(writer);
            self.fail_pending(HostError::Unavailable);
        }
    }

    fn fail_pending(&self, error: HostError) {
        let drained: Vec<_> = lock(&self.shared.pending).drain().collect();
        for (_, reply) in drained {
            let _ = reply.send(Err(error.clone()));
        }
    }

    fn push(&self, frame: DaemonFrame) -> Result<(), HostError> {
        match lock(&self.shared.writer).as_ref() {
            Some((_, tx)) => tx.send(frame).map_err(|_| HostError::ChannelClosed),
            None => Err(HostError::Unavailable),
        }
    }

    /// Host call without a reply.
    fn fire(&self, call: HostCall) {
        if let Err(e) = self.push(DaemonFrame::HostCall { id: None, call }) {
            debug!("bridge: dropped host call: {}", e);
        }
    }

    /// Host call that waits for the shim's `hostReply`.
    async fn call(&self, call: HostCall) -> Result<Value, HostError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);

        if let Err(e) = self.push(DaemonFrame::HostCall { id: Some(id), call }) {
            lock(&self.shared.pending).remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::ChannelClosed),
            Err(_) => {
                lock(&self.shared.pending).remove(&id);
                Err(HostError::Timeout)
            }
        }
    }

    fn resolve(&self, id: u64, ok: Option<Value>, error: Option<String>) {
        let Some(reply) = lock(&self.shared.pending).remove(&id) else {
            debug!("bridge: reply for unknown call {}", id);
            return;
        };
        let result = match error {
            Some(message) => Err(HostError::Rejected(message)),
            None => Ok(ok.unwrap_or(Value::Null)),
        };
        let _ = reply.send(result);
    }

    /// Answer a shim request, if that shim is still the attached one.
    fn respond(&self, session: u64, id: u64, body: Value) {
        let writer = lock(&self.shared.writer);
        match writer.as_ref() {
            Some((current, tx)) if *current == session => {
                let _ = tx.send(DaemonFrame::Response { id, body });
            }
            _ => debug!("bridge: shim {} gone, dropping response {}", session, id),
        }
    }
}

fn parse_tab(value: Value) -> Result<TabInfo, HostError> {
    serde_json::from_value(value).map_err(|e| HostError::Rejected(format!("bad tab: {}", e)))
}

#[async_trait]
impl BrowserHost for BridgeHost {
    fn set_badge_text(&self, text: &str) {
        self.fire(HostCall::SetBadgeText {
            text: text.to_string(),
        });
    }

    fn set_badge_color(&self, color: &str) {
        self.fire(HostCall::SetBadgeColor {
            color: color.to_string(),
        });
    }

    async fn close_tab(&self, tab_id: TabId) -> Result<(), HostError> {
        self.call(HostCall::CloseTab { tab_id }).await.map(|_| ())
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, HostError> {
        parse_tab(self.call(HostCall::GetTab { tab_id }).await?)
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        match self.call(HostCall::QueryActiveTab).await? {
            Value::Null => Ok(None),
            value => parse_tab(value).map(Some),
        }
    }

    async fn send_to_tab(&self, tab_id: TabId, message: Value) -> Result<Value, HostError> {
        self.call(HostCall::SendToTab { tab_id, message }).await
    }

    async fn inject_code(&self, tab_id: TabId, code: Value) -> Result<(), HostError> {
        self.call(HostCall::InjectCode { tab_id, code }).await.map(|_| ())
    }
}

pub fn start_server(
    bind_address: String,
    port: u16,
    host: BridgeHost,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind bridge socket {}: {}", addr, e);
                return;
            }
        };
        info!("Bridge listening at {}", addr);
        serve(listener, host, event_tx).await;
    })
}

/// Accept shims forever on an already bound listener.
pub async fn serve(listener: TcpListener, host: BridgeHost, event_tx: mpsc::UnboundedSender<LinkEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let (session, rx) = host.attach();
                info!("Browser shim {} connected from {}", session, peer);
                let host = host.clone();
                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    handle_shim(stream, session, rx, host.clone(), event_tx).await;
                    host.detach(session);
                    info!("Browser shim {} disconnected", session);
                });
            }
            Err(e) => {
                error!("Failed to accept bridge connection: {}", e);
            }
        }
    }
}

async fn handle_shim(
    stream: TcpStream,
    session: u64,
    mut outgoing: mpsc::UnboundedReceiver<DaemonFrame>,
    host: BridgeHost,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec();
    let mut framed = Framed::new(stream, codec);

    loop {
        tokio::select! {
            incoming = framed.next() => match incoming {
                Some(Ok(bytes)) => match serde_json::from_slice::<ShimFrame>(&bytes) {
                    Ok(frame) => {
                        if !handle_frame(frame, session, &host, &event_tx) {
                            return;
                        }
                    }
                    Err(e) => warn!("bridge: shim {} sent bad frame: {}", session, e),
                },
                Some(Err(e)) => {
                    warn!("bridge: shim {} read error: {}", session, e);
                    return;
                }
                None => return,
            },
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    let bytes = match serde_json::to_vec(&frame) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("bridge: cannot encode frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = framed.send(Bytes::from(bytes)).await {
                        warn!("bridge: shim {} write error: {}", session, e);
                        return;
                    }
                }
                // replaced by a newer shim
                None => return,
            },
        }
    }
}

/// Turn one shim frame into core input.  False once the core is gone.
fn handle_frame(
    frame: ShimFrame,
    session: u64,
    host: &BridgeHost,
    event_tx: &mpsc::UnboundedSender<LinkEvent>,
) -> bool {
    let evt = match frame {
        ShimFrame::HostReply { id, ok, error } => {
            host.resolve(id, ok, error);
            return true;
        }
        ShimFrame::Request {
            id,
            sender_tab,
            body,
        } => {
            let (reply, answer) = oneshot::channel::<LocalReply>();
            let host = host.clone();
            tokio::spawn(async move {
                let body = match answer.await {
                    Ok(reply) => serde_json::to_value(reply).unwrap_or(Value::Null),
                    Err(_) => json!({"error": "link daemon is shutting down"}),
                };
                host.respond(session, id, body);
            });
            LinkEvent::LocalRequest {
                sender_tab,
                body,
                reply,
            }
        }
        ShimFrame::TabRemoved { tab_id } => LinkEvent::TabRemoved(tab_id),
        ShimFrame::TabActivated { tab_id } => LinkEvent::TabActivated(tab_id),
        ShimFrame::TabUpdated {
            tab_id,
            url,
            active,
        } => LinkEvent::TabUpdated {
            tab_id,
            url,
            active,
        },
        ShimFrame::WindowFocusChanged { window_id } => LinkEvent::WindowFocusChanged(window_id),
        ShimFrame::BeforeNavigate {
            tab_id,
            frame_id,
            url,
        } => LinkEvent::BeforeNavigate {
            tab_id,
            frame_id,
            url,
        },
        ShimFrame::StorageChanged { changes } => LinkEvent::StorageChanged(changes),
    };
    event_tx.send(evt).is_ok()
}
