//! In-memory doubles for the desktop link and the browser host.

use async_trait::async_trait;
use link_proto::protocol::{TabId, TabInfo};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::host::{BrowserHost, HostError};
use crate::transport::{Dialer, TransportError, WireLink};

/// Desktop side of a link handed out by `ChannelDialer`.
#[derive(Debug)]
pub struct DesktopPeer {
    /// Frames the core transmitted.
    pub received: mpsc::UnboundedReceiver<String>,
    /// Frames to deliver to the core.  Drop to close the link.
    pub push: mpsc::UnboundedSender<String>,
}

impl DesktopPeer {
    /// Everything transmitted so far, parsed.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = self.received.try_recv() {
            out.push(serde_json::from_str(&text).unwrap_or(Value::String(text)));
        }
        out
    }
}

/// Dialer whose every successful dial yields a fresh `DesktopPeer`.
pub struct ChannelDialer {
    peers: mpsc::UnboundedSender<DesktopPeer>,
    refusing: AtomicBool,
    stalling: AtomicBool,
    attempts: AtomicUsize,
}

impl ChannelDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DesktopPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            peers,
            refusing: AtomicBool::new(false),
            stalling: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (dialer, rx)
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Dials never complete, like a desktop that accepts TCP and then hangs.
    pub fn set_stalling(&self, stalling: bool) {
        self.stalling.store(stalling, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for ChannelDialer {
    async fn dial(&self) -> Result<WireLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("connection refused".into()));
        }
        if self.stalling.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.peers.send(DesktopPeer {
            received: out_rx,
            push: in_tx,
        });
        Ok(WireLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[derive(Debug, Default)]
pub struct HostRecord {
    pub badge_texts: Vec<String>,
    pub badge_colors: Vec<String>,
    pub closed: Vec<TabId>,
    pub sent: Vec<(TabId, Value)>,
    pub injected: Vec<(TabId, Value)>,
    pub tabs: HashMap<TabId, TabInfo>,
    pub active: Option<TabId>,
    pub fail_close: bool,
    pub content_reply: Option<Value>,
}

/// Browser host that records every call and answers from a tab table.
#[derive(Debug, Default)]
pub struct RecordingHost {
    record: Mutex<HostRecord>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut HostRecord) -> R) -> R {
        let mut guard = self.record.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn add_tab(&self, id: i64, url: &str) {
        self.with(|r| {
            r.tabs.insert(
                TabId(id),
                TabInfo {
                    id: TabId(id),
                    url: Some(url.to_string()),
                    active: false,
                },
            );
        });
    }

    pub fn set_active(&self, id: Option<i64>) {
        self.with(|r| r.active = id.map(TabId));
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.with(|r| r.fail_close = fail);
    }

    pub fn badge_texts(&self) -> Vec<String> {
        self.with(|r| r.badge_texts.clone())
    }

    pub fn badge_colors(&self) -> Vec<String> {
        self.with(|r| r.badge_colors.clone())
    }

    pub fn last_badge(&self) -> (Option<String>, Option<String>) {
        self.with(|r| (r.badge_texts.last().cloned(), r.badge_colors.last().cloned()))
    }

    pub fn closed(&self) -> Vec<TabId> {
        self.with(|r| r.closed.clone())
    }

    pub fn sent(&self) -> Vec<(TabId, Value)> {
        self.with(|r| r.sent.clone())
    }

    pub fn injected(&self) -> Vec<(TabId, Value)> {
        self.with(|r| r.injected.clone())
    }
}

#[async_trait]
impl BrowserHost for RecordingHost {
    fn set_badge_text(&self, text: &str) {
        self.with(|r| r.badge_texts.push(text.to_string()));
    }

    fn set_badge_color(&self, color: &str) {
        self.with(|r| r.badge_colors.push(color.to_string()));
    }

    async fn close_tab(&self, tab_id: TabId) -> Result<(), HostError> {
        self.with(|r| {
            r.closed.push(tab_id);
            if r.fail_close {
                return Err(HostError::Rejected(format!("No tab with id: {}", tab_id)));
            }
            r.tabs.remove(&tab_id);
            Ok(())
        })
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, HostError> {
        self.with(|r| {
            r.tabs
                .get(&tab_id)
                .cloned()
                .ok_or_else(|| HostError::Rejected(format!("No tab with id: {}", tab_id)))
        })
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        self.with(|r| Ok(r.active.and_then(|id| r.tabs.get(&id).cloned())))
    }

    async fn send_to_tab(&self, tab_id: TabId, message: Value) -> Result<Value, HostError> {
        self.with(|r| {
            if !r.tabs.contains_key(&tab_id) {
                return Err(HostError::Rejected("Receiving end does not exist".into()));
            }
            r.sent.push((tab_id, message));
            Ok(r.content_reply.clone().unwrap_or_else(|| json!({"ok": true})))
        })
    }

    async fn inject_code(&self, tab_id: TabId, code: Value) -> Result<(), HostError> {
        self.with(|r| {
            r.injected.push((tab_id, code));
            Ok(())
        })
    }
}
