/// LinkCore: single-owner event loop for the desktop link.
///
/// Everything that can change link state arrives as a `LinkEvent`: bridge
/// notifications from the browser, collaborator requests, socket lifecycle
/// and inbound frames, timer fires, and completions of host calls.  Each
/// event is handled to completion by `handle_event`, which never awaits.  Work
/// that has to wait (dialing, tab queries, closes) is spawned and reports
/// back with another event.
///
/// LinkCore exclusively owns the transport, the pending queue, the tab
/// tracker and the badge.  Readers outside the loop get a `LinkStatus`
/// snapshot through a `watch` channel.
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use link_proto::bridge::WINDOW_ID_NONE;
use link_proto::config::Config;
use link_proto::protocol::{
    EventKind, LocalReply, LocalRequest, OutboundMessage, TabId, TabInfo,
};
use link_proto::settings::{InterceptSettings, SettingsStore};
use link_proto::sites::{classify_site, is_supported_page};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::badge::{BadgeIndicator, BadgeState};
use crate::host::{BrowserHost, HostError};
use crate::intercept::{self, INTERCEPT_SOURCE};
use crate::keepalive::{AlarmStore, KeepAliveProbe};
use crate::queue::MessageQueue;
use crate::reconnect::ReconnectScheduler;
use crate::router::{route, Route};
use crate::tabs::{RemovalOutcome, TabTracker};
use crate::transport::{ConnectionState, Dialer, Transport, WireLink};

// ── LinkEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the LinkCore loop.
#[derive(Debug)]
pub enum LinkEvent {
    /// A message for the desktop app from inside the daemon (HTTP API).
    Outbound {
        message: OutboundMessage,
        reply: Option<oneshot::Sender<SendOutcome>>,
    },
    /// A collaborator request from the local bus.
    LocalRequest {
        sender_tab: Option<TabId>,
        body: Value,
        reply: oneshot::Sender<LocalReply>,
    },
    TabRemoved(TabId),
    TabActivated(TabId),
    TabUpdated {
        tab_id: TabId,
        url: Option<String>,
        active: bool,
    },
    WindowFocusChanged(i64),
    BeforeNavigate {
        tab_id: TabId,
        frame_id: i64,
        url: String,
    },
    StorageChanged(Map<String, Value>),

    TransportOpened {
        conn_id: u64,
        link: WireLink,
    },
    TransportFailed {
        conn_id: u64,
        error: String,
    },
    TransportClosed {
        conn_id: u64,
    },
    Inbound {
        conn_id: u64,
        text: String,
    },

    ReconnectDue {
        generation: u64,
    },
    KeepAliveDue {
        generation: u64,
    },
    PulseTick {
        generation: u64,
    },
    SuppressionExpired {
        tab_id: TabId,
        token: u64,
    },

    TabCloseFinished {
        tab_id: TabId,
        token: u64,
        result: Result<(), HostError>,
    },
    HeartbeatTabResolved {
        tab_id: TabId,
        result: Result<TabInfo, HostError>,
    },
    /// Answer to a focused-page lookup; only the latest `seq` counts.
    PageResolved {
        seq: u64,
        result: Result<Option<TabInfo>, HostError>,
    },
    /// Shutdown requested.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendOutcome {
    Sent,
    Queued,
    /// Could not be encoded; nothing was sent or kept.
    Dropped,
}

/// Snapshot published after every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub connected: bool,
    pub state: ConnectionState,
    pub pending: usize,
    pub active_tab: Option<TabId>,
    pub badge: BadgeState,
    pub page_supported: bool,
}

const DEFAULT_SCRAPE_SOURCE: &str = "scrape";
const DEFAULT_FRIEND_SOURCE: &str = "popup";

// ── LinkCore ──────────────────────────────────────────────────────────────────

pub struct LinkCore {
    transport: Transport,
    queue: MessageQueue,
    reconnect: ReconnectScheduler,
    keepalive: KeepAliveProbe,
    tabs: TabTracker,
    badge: BadgeIndicator,
    badge_state: BadgeState,
    /// Whether the focused page is in the supported-site catalog.
    page_supported: bool,
    /// Bumped per focused-page lookup so late answers are dropped.
    page_seq: u64,
    settings: InterceptSettings,
    settings_store: SettingsStore,
    host: Arc<dyn BrowserHost>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    status_tx: watch::Sender<LinkStatus>,
}

impl LinkCore {
    pub fn new(
        config: &Config,
        dialer: Arc<dyn Dialer>,
        host: Arc<dyn BrowserHost>,
        event_tx: mpsc::UnboundedSender<LinkEvent>,
        settings_store: SettingsStore,
    ) -> Self {
        let settings = settings_store.load();
        let keepalive = KeepAliveProbe::resume(
            config.keepalive.period(),
            AlarmStore::new(config.keepalive.alarm_file.clone()),
            Utc::now(),
        );
        let transport = Transport::new(dialer, config.desktop.connect_timeout());
        let (status_tx, _) = watch::channel(LinkStatus {
            connected: false,
            state: transport.state(),
            pending: 0,
            active_tab: None,
            badge: BadgeState::derive(transport.state(), false),
            page_supported: false,
        });

        Self {
            transport,
            queue: MessageQueue::new(config.desktop.max_pending),
            reconnect: ReconnectScheduler::new(config.desktop.reconnect_delay()),
            keepalive,
            tabs: TabTracker::new(config.tabs.close_grace()),
            badge: BadgeIndicator::new(config.badge.pulse_interval()),
            badge_state: BadgeState::Error,
            page_supported: false,
            page_seq: 0,
            settings,
            settings_store,
            host,
            event_tx,
            status_tx,
        }
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    pub fn settings(&self) -> InterceptSettings {
        self.settings
    }

    /// Dial, arm the keep-alive alarm, draw the initial badge.
    pub fn start(&mut self) {
        info!(
            "LinkCore: starting (spotify intercept {}, apple music intercept {})",
            self.settings.spotify_intercept_enabled, self.settings.apple_music_intercept_enabled
        );
        self.keepalive.start(Utc::now(), &self.event_tx);
        self.connect();
        self.render_badge();
        self.refresh_page();
        self.publish();
    }

    /// Run the event loop until `Shutdown`.
    pub async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<LinkEvent>) -> anyhow::Result<()> {
        info!("LinkCore: starting event loop");
        self.start();

        loop {
            // never closes on its own: the core holds a sender
            let Some(evt) = event_rx.recv().await else {
                break;
            };
            if !self.handle_event(evt) {
                info!("LinkCore: shutdown requested");
                break;
            }
        }

        self.transport.force_close();
        self.keepalive.flush().await;
        Ok(())
    }

    /// Apply one event.  Returns false when the loop should stop.
    pub fn handle_event(&mut self, evt: LinkEvent) -> bool {
        match evt {
            LinkEvent::Shutdown => return false,

            LinkEvent::Outbound { message, reply } => {
                let outcome = self.send(message);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            LinkEvent::LocalRequest {
                sender_tab,
                body,
                reply,
            } => self.handle_local(sender_tab, body, reply),

            LinkEvent::TabRemoved(tab_id) => match self.tabs.on_removed(tab_id) {
                RemovalOutcome::Suppressed => {
                    debug!("LinkCore: tab {} closed by us, not reporting", tab_id);
                }
                RemovalOutcome::ActiveClosed(tab_id) => {
                    info!("LinkCore: playback tab {} closed by user", tab_id);
                    self.send(OutboundMessage::tab_closed(tab_id));
                }
                RemovalOutcome::Ignored => {}
            },
            LinkEvent::TabActivated(tab_id) => self.refresh_page_for(tab_id),
            LinkEvent::TabUpdated {
                tab_id,
                url: Some(url),
                active: true,
            } => {
                debug!("LinkCore: active tab {} navigated", tab_id);
                self.page_seq += 1;
                self.set_page_supported(is_supported_page(&url));
            }
            LinkEvent::TabUpdated { .. } => {}
            LinkEvent::WindowFocusChanged(window_id) => {
                if window_id != WINDOW_ID_NONE {
                    self.refresh_page();
                }
            }
            LinkEvent::BeforeNavigate {
                tab_id,
                frame_id,
                url,
            } => self.intercept_navigation(tab_id, frame_id, url),
            LinkEvent::StorageChanged(changes) => self.apply_storage_changes(&changes),

            LinkEvent::TransportOpened { conn_id, link } => {
                if self.transport.opened(conn_id, link, &self.event_tx) {
                    info!("LinkCore: connected to desktop app");
                    self.reconnect.cancel();
                    self.flush_pending();
                    if self.transport.is_open() {
                        self.render_badge();
                        self.refresh_page();
                    }
                }
            }
            LinkEvent::TransportFailed { conn_id, error } => {
                if self.transport.failed(conn_id) {
                    warn!("LinkCore: desktop app unreachable: {}", error);
                    self.link_down();
                }
            }
            LinkEvent::TransportClosed { conn_id } => {
                if self.transport.closed(conn_id) {
                    info!("LinkCore: desktop link closed");
                    self.link_down();
                }
            }
            LinkEvent::Inbound { conn_id, text } => {
                if self.transport.is_current(conn_id) {
                    debug!("LinkCore: desktop → {}", text);
                    let route = route(&text, self.tabs.active());
                    self.dispatch(route);
                }
            }

            LinkEvent::ReconnectDue { generation } => {
                if self.reconnect.fired(generation) {
                    info!("LinkCore: reconnecting");
                    self.connect();
                }
            }
            LinkEvent::KeepAliveDue { generation } => {
                if self.keepalive.fired(generation, Utc::now(), &self.event_tx) {
                    self.keep_alive();
                }
            }
            LinkEvent::PulseTick { generation } => {
                self.badge.on_pulse_tick(generation, self.host.as_ref());
            }
            LinkEvent::SuppressionExpired { tab_id, token } => {
                self.tabs.expire(tab_id, token);
            }

            LinkEvent::TabCloseFinished {
                tab_id,
                token,
                result,
            } => match result {
                Ok(()) => self.tabs.close_succeeded(tab_id, token, &self.event_tx),
                Err(e) => {
                    warn!("LinkCore: closing tab {} failed: {}", tab_id, e);
                    self.tabs.close_failed(tab_id, token);
                }
            },
            LinkEvent::HeartbeatTabResolved { tab_id, result } => {
                self.heartbeat(tab_id, result);
            }
            LinkEvent::PageResolved { seq, result } => {
                if seq == self.page_seq {
                    let supported = match result {
                        Ok(tab) => tab
                            .and_then(|t| t.url)
                            .map(|url| is_supported_page(&url))
                            .unwrap_or(false),
                        Err(e) => {
                            debug!("LinkCore: focused tab lookup failed: {}", e);
                            false
                        }
                    };
                    self.set_page_supported(supported);
                }
            }
        }
        self.publish();
        true
    }

    /// Send now if open, otherwise queue and make sure a dial is in flight.
    fn send(&mut self, message: OutboundMessage) -> SendOutcome {
        if self.transport.is_open() {
            let text = match message.to_wire() {
                Ok(text) => text,
                Err(e) => {
                    warn!("LinkCore: cannot encode {}: {}", message.label(), e);
                    return SendOutcome::Dropped;
                }
            };
            match self.transport.transmit(text) {
                Ok(()) => {
                    debug!("LinkCore: sent {}", message.label());
                    return SendOutcome::Sent;
                }
                Err(e) => {
                    warn!("LinkCore: send of {} failed: {}", message.label(), e);
                    self.queue.requeue_front(vec![message]);
                    self.transport.force_close();
                    self.link_down();
                    return SendOutcome::Queued;
                }
            }
        }

        let label = message.label();
        if let Some(dropped) = self.queue.enqueue(message) {
            warn!("LinkCore: pending queue full, dropped {}", dropped.label());
        }
        debug!("LinkCore: queued {} ({} pending)", label, self.queue.len());
        self.connect();
        SendOutcome::Queued
    }

    fn connect(&mut self) {
        if self.transport.connect(&self.event_tx) {
            debug!("LinkCore: dialing desktop app");
        }
    }

    /// Deliver everything queued while the link was down, oldest first.
    fn flush_pending(&mut self) {
        let pending = self.queue.flush();
        if pending.is_empty() {
            return;
        }
        info!("LinkCore: flushing {} queued message(s)", pending.len());

        let mut pending: VecDeque<OutboundMessage> = pending.into();
        while let Some(message) = pending.pop_front() {
            let text = match message.to_wire() {
                Ok(text) => text,
                Err(e) => {
                    warn!("LinkCore: cannot encode {}: {}", message.label(), e);
                    continue;
                }
            };
            if let Err(e) = self.transport.transmit(text) {
                warn!("LinkCore: link lost during flush: {}", e);
                pending.push_front(message);
                self.queue.requeue_front(pending.into());
                self.transport.force_close();
                self.link_down();
                return;
            }
        }
    }

    fn link_down(&mut self) {
        self.render_badge();
        if self.reconnect.arm(&self.event_tx) {
            debug!("LinkCore: reconnect armed");
        }
    }

    fn keep_alive(&mut self) {
        if !self.transport.is_open() {
            debug!("LinkCore: keepalive found link down");
            self.connect();
            return;
        }
        self.send(OutboundMessage::Ping);

        if let Some(tab_id) = self.tabs.active() {
            let host = Arc::clone(&self.host);
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                let result = host.get_tab(tab_id).await;
                let _ = tx.send(LinkEvent::HeartbeatTabResolved { tab_id, result });
            });
        }
    }

    fn heartbeat(&mut self, tab_id: TabId, result: Result<TabInfo, HostError>) {
        match result {
            Ok(tab) => {
                if !self.transport.is_open() || self.tabs.active() != Some(tab_id) {
                    return;
                }
                let Some(url) = tab.url else {
                    debug!("LinkCore: tab {} has no url yet, skipping heartbeat", tab_id);
                    return;
                };
                let site = classify_site(&url);
                self.send(OutboundMessage::heartbeat(tab_id, site.as_str(), &url));
            }
            Err(e) => {
                if self.tabs.clear_active_if(tab_id) {
                    info!("LinkCore: playback tab {} is gone ({}), clearing", tab_id, e);
                }
            }
        }
    }

    // ── desktop → browser ────────────────────────────────────────────────────

    fn dispatch(&mut self, route: Route) {
        match route {
            Route::CloseTab(tab_id) => {
                info!("LinkCore: desktop asked to close tab {}", tab_id);
                self.programmatic_close(tab_id);
            }
            Route::ForwardToTab(tab_id, message) => {
                let host = Arc::clone(&self.host);
                tokio::spawn(async move {
                    if let Err(e) = host.send_to_tab(tab_id, message).await {
                        debug!("LinkCore: command to tab {} not delivered: {}", tab_id, e);
                    }
                });
            }
            Route::Inject(tab_id, code) => {
                let host = Arc::clone(&self.host);
                tokio::spawn(async move {
                    if let Err(e) = host.inject_code(tab_id, code).await {
                        warn!("LinkCore: injection into tab {} failed: {}", tab_id, e);
                    }
                });
            }
            Route::Ignore => {}
        }
    }

    /// Close a tab without it being reported as a user close.
    fn programmatic_close(&mut self, tab_id: TabId) {
        let token = self.tabs.begin_close(tab_id);
        let host = Arc::clone(&self.host);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = host.close_tab(tab_id).await;
            let _ = tx.send(LinkEvent::TabCloseFinished {
                tab_id,
                token,
                result,
            });
        });
    }

    // ── browser → desktop ────────────────────────────────────────────────────

    fn handle_local(
        &mut self,
        sender_tab: Option<TabId>,
        body: Value,
        reply: oneshot::Sender<LocalReply>,
    ) {
        let request: LocalRequest = match serde_json::from_value(body) {
            Ok(request) => request,
            Err(e) => {
                warn!("LinkCore: bad local request: {}", e);
                let _ = reply.send(LocalReply::Error {
                    error: format!("invalid request: {}", e),
                });
                return;
            }
        };

        let answer = match request {
            LocalRequest::Event {
                event,
                mut tab_id,
                fields,
            } => {
                if let Some(sender) = sender_tab {
                    match event {
                        EventKind::Connected => {
                            self.tabs.set_active(sender);
                            tab_id = Some(sender);
                        }
                        EventKind::Ended | EventKind::TabClosed => tab_id = Some(sender),
                        _ => {}
                    }
                }
                self.send(OutboundMessage::Event {
                    event,
                    tab_id,
                    fields,
                });
                LocalReply::received()
            }
            LocalRequest::GetStatus => LocalReply::Status {
                connected: self.transport.is_open(),
            },
            LocalRequest::SendToParachord {
                url,
                source,
                fields,
            } => {
                let outcome = self.send(OutboundMessage::SendToParachord {
                    url,
                    source,
                    fields,
                });
                LocalReply::forwarded(outcome == SendOutcome::Sent)
            }
            LocalRequest::SendScrapedPlaylist { playlist, source } => {
                let outcome = self.send(OutboundMessage::ScrapedPlaylist {
                    playlist,
                    source: source.unwrap_or_else(|| DEFAULT_SCRAPE_SOURCE.into()),
                });
                LocalReply::forwarded(outcome == SendOutcome::Sent)
            }
            LocalRequest::SendScrapedAlbum { album, source } => {
                let outcome = self.send(OutboundMessage::ScrapedAlbum {
                    album,
                    source: source.unwrap_or_else(|| DEFAULT_SCRAPE_SOURCE.into()),
                });
                LocalReply::forwarded(outcome == SendOutcome::Sent)
            }
            LocalRequest::AddFriend {
                url,
                service,
                source,
            } => {
                let outcome = self.send(OutboundMessage::AddFriend {
                    url,
                    service,
                    source: source.unwrap_or_else(|| DEFAULT_FRIEND_SOURCE.into()),
                });
                LocalReply::forwarded(outcome == SendOutcome::Sent)
            }
            LocalRequest::ScrapePlaylist => {
                self.relay_scrape(reply);
                return;
            }
            LocalRequest::CloseTab { tab_id } => {
                if let Some(tab_id) = tab_id {
                    let host = Arc::clone(&self.host);
                    tokio::spawn(async move {
                        if let Err(e) = host.close_tab(tab_id).await {
                            debug!("LinkCore: close of tab {} failed: {}", tab_id, e);
                        }
                    });
                }
                LocalReply::received()
            }
            LocalRequest::Unknown => LocalReply::received(),
        };
        let _ = reply.send(answer);
    }

    /// Ask the content script in the focused tab to scrape, and pass its
    /// answer back to the requester.
    fn relay_scrape(&self, reply: oneshot::Sender<LocalReply>) {
        let host = Arc::clone(&self.host);
        tokio::spawn(async move {
            let answer = match host.active_tab().await {
                Ok(Some(tab)) => match host.send_to_tab(tab.id, json!({"type": "scrapePlaylist"})).await {
                    Ok(value) => LocalReply::Relayed(value),
                    Err(e) => LocalReply::Error {
                        error: e.to_string(),
                    },
                },
                Ok(None) => LocalReply::Error {
                    error: "No active tab".into(),
                },
                Err(e) => LocalReply::Error {
                    error: e.to_string(),
                },
            };
            let _ = reply.send(answer);
        });
    }

    fn intercept_navigation(&mut self, tab_id: TabId, frame_id: i64, url: String) {
        let Some(service) = intercept::check(&self.settings, frame_id, &url) else {
            return;
        };
        info!("LinkCore: intercepted {:?} link in tab {}: {}", service, tab_id, url);
        self.send(OutboundMessage::send_to_parachord(url, INTERCEPT_SOURCE));
        self.programmatic_close(tab_id);
    }

    fn apply_storage_changes(&mut self, changes: &Map<String, Value>) {
        if !self.settings.apply_changes(changes) {
            return;
        }
        info!(
            "LinkCore: intercept settings now spotify={} apple_music={}",
            self.settings.spotify_intercept_enabled, self.settings.apple_music_intercept_enabled
        );
        let store = self.settings_store.clone();
        let settings = self.settings;
        tokio::spawn(async move {
            if let Err(e) = store.save(settings).await {
                warn!("LinkCore: failed to save settings to {:?}: {}", store.path(), e);
            }
        });
    }

    // ── badge ────────────────────────────────────────────────────────────────

    fn render_badge(&mut self) {
        let state = self.badge.render(
            self.transport.state(),
            self.page_supported,
            self.host.as_ref(),
            &self.event_tx,
        );
        if state != self.badge_state {
            debug!("LinkCore: badge {:?} → {:?}", self.badge_state, state);
            self.badge_state = state;
        }
    }

    fn set_page_supported(&mut self, supported: bool) {
        self.page_supported = supported;
        self.render_badge();
    }

    /// Look up the focused tab and re-derive page relevance.
    fn refresh_page(&mut self) {
        self.page_seq += 1;
        let seq = self.page_seq;
        let host = Arc::clone(&self.host);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = host.active_tab().await;
            let _ = tx.send(LinkEvent::PageResolved { seq, result });
        });
    }

    fn refresh_page_for(&mut self, tab_id: TabId) {
        self.page_seq += 1;
        let seq = self.page_seq;
        let host = Arc::clone(&self.host);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = host.get_tab(tab_id).await.map(Some);
            let _ = tx.send(LinkEvent::PageResolved { seq, result });
        });
    }

    fn publish(&self) {
        let snapshot = LinkStatus {
            connected: self.transport.is_open(),
            state: self.transport.state(),
            pending: self.queue.len(),
            active_tab: self.tabs.active(),
            badge: self.badge_state,
            page_supported: self.page_supported,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
