use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use link_daemon::bridge::{self, BridgeHost};
use link_daemon::core::LinkCore;
use link_daemon::testing::{ChannelDialer, DesktopPeer};
use link_proto::bridge::{DaemonFrame, HostCall, ShimFrame};
use link_proto::config::Config;
use link_proto::protocol::TabId;
use link_proto::settings::SettingsStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

const WAIT: Duration = Duration::from_secs(5);

/// Stand-in for the browser-side shim.
struct Shim {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    /// Answer for `getTab`/`queryActiveTab`.
    tabs: Vec<(i64, String)>,
}

impl Shim {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
            tabs: Vec::new(),
        }
    }

    async fn send(&mut self, frame: ShimFrame) {
        let bytes = serde_json::to_vec(&frame).unwrap();
        self.framed.send(Bytes::from(bytes)).await.unwrap();
    }

    async fn next(&mut self) -> DaemonFrame {
        let bytes = tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("frame in time")
            .expect("bridge open")
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Read frames, answering host calls as a browser would, until `want`
    /// matches one.
    async fn until(&mut self, want: impl Fn(&DaemonFrame) -> bool) -> DaemonFrame {
        loop {
            let frame = self.next().await;
            if want(&frame) {
                return frame;
            }
            if let DaemonFrame::HostCall { id: Some(id), call } = frame {
                let (ok, error) = self.answer(&call);
                self.send(ShimFrame::HostReply { id, ok, error }).await;
            }
        }
    }

    fn answer(&self, call: &HostCall) -> (Option<Value>, Option<String>) {
        let tab = |id: i64| {
            self.tabs
                .iter()
                .find(|(t, _)| *t == id)
                .map(|(t, url)| json!({"id": t, "url": url, "active": true}))
        };
        match call {
            HostCall::QueryActiveTab => {
                let active = self.tabs.first().and_then(|(t, _)| tab(*t));
                (Some(active.unwrap_or(Value::Null)), None)
            }
            HostCall::GetTab { tab_id } => match tab(tab_id.0) {
                Some(info) => (Some(info), None),
                None => (None, Some(format!("No tab with id: {}", tab_id))),
            },
            _ => (Some(Value::Null), None),
        }
    }
}

struct Rig {
    shim: Shim,
    peer: DesktopPeer,
    _dir: tempfile::TempDir,
}

async fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.keepalive.alarm_file = dir.path().join("keepalive.json");
    config.daemon.settings_file = dir.path().join("settings.json");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let host = BridgeHost::new();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(bridge::serve(listener, host.clone(), tx.clone()));

    let shim = Shim::connect(addr).await;
    for _ in 0..100 {
        if host.is_attached() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(host.is_attached());

    let (dialer, mut peers) = ChannelDialer::new();
    let core = LinkCore::new(
        &config,
        dialer,
        Arc::new(host),
        tx,
        SettingsStore::new(config.daemon.settings_file.clone()),
    );
    tokio::spawn(core.run(rx));
    let peer = tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("dialed")
        .unwrap();

    Rig {
        shim,
        peer,
        _dir: dir,
    }
}

async fn desktop_next(peer: &mut DesktopPeer) -> Value {
    let text = tokio::time::timeout(WAIT, peer.received.recv())
        .await
        .expect("desktop frame in time")
        .unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_badge_shows_error_before_link_opens() {
    let mut rig = rig().await;
    let frame = rig
        .shim
        .until(|f| matches!(f, DaemonFrame::HostCall { call: HostCall::SetBadgeText { .. }, .. }))
        .await;
    assert_eq!(
        frame,
        DaemonFrame::HostCall {
            id: None,
            call: HostCall::SetBadgeText { text: "!".into() },
        }
    );
}

#[tokio::test]
async fn test_local_request_round_trip() {
    let mut rig = rig().await;
    rig.shim
        .send(ShimFrame::Request {
            id: 41,
            sender_tab: Some(TabId(6)),
            body: json!({"type": "event", "event": "connected"}),
        })
        .await;
    let reply = rig
        .shim
        .until(|f| matches!(f, DaemonFrame::Response { id: 41, .. }))
        .await;
    assert_eq!(
        reply,
        DaemonFrame::Response {
            id: 41,
            body: json!({"received": true}),
        }
    );
    assert_eq!(
        desktop_next(&mut rig.peer).await,
        json!({"type": "event", "event": "connected", "tabId": 6})
    );

    rig.shim
        .send(ShimFrame::Request {
            id: 42,
            sender_tab: None,
            body: json!({"type": "getStatus"}),
        })
        .await;
    let reply = rig
        .shim
        .until(|f| matches!(f, DaemonFrame::Response { id: 42, .. }))
        .await;
    assert_eq!(
        reply,
        DaemonFrame::Response {
            id: 42,
            body: json!({"connected": true}),
        }
    );
}

#[tokio::test]
async fn test_desktop_close_not_reported_but_user_close_is() {
    let mut rig = rig().await;
    rig.shim.tabs = vec![(5, "https://www.youtube.com/watch?v=a".into())];

    // tab 5 is the playback tab
    rig.shim
        .send(ShimFrame::Request {
            id: 1,
            sender_tab: Some(TabId(5)),
            body: json!({"type": "event", "event": "connected"}),
        })
        .await;
    rig.shim
        .until(|f| matches!(f, DaemonFrame::Response { id: 1, .. }))
        .await;
    assert_eq!(desktop_next(&mut rig.peer).await["event"], "connected");

    // desktop skips the track: we close tab 5 ourselves
    rig.peer
        .push
        .send(json!({"type": "command", "action": "closeTab", "tabId": 5}).to_string())
        .unwrap();
    let close = rig
        .shim
        .until(|f| matches!(f, DaemonFrame::HostCall { call: HostCall::CloseTab { .. }, .. }))
        .await;
    let DaemonFrame::HostCall { id: Some(id), call } = close else {
        panic!("close without id");
    };
    assert_eq!(call, HostCall::CloseTab { tab_id: TabId(5) });
    rig.shim.send(ShimFrame::TabRemoved { tab_id: TabId(5) }).await;
    rig.shim
        .send(ShimFrame::HostReply {
            id,
            ok: Some(Value::Null),
            error: None,
        })
        .await;

    // a new playback tab, closed by the user
    rig.shim
        .send(ShimFrame::Request {
            id: 2,
            sender_tab: Some(TabId(8)),
            body: json!({"type": "event", "event": "connected"}),
        })
        .await;
    rig.shim
        .until(|f| matches!(f, DaemonFrame::Response { id: 2, .. }))
        .await;
    rig.shim.send(ShimFrame::TabRemoved { tab_id: TabId(8) }).await;

    assert_eq!(
        desktop_next(&mut rig.peer).await,
        json!({"type": "event", "event": "connected", "tabId": 8})
    );
    assert_eq!(
        desktop_next(&mut rig.peer).await,
        json!({"type": "event", "event": "tabClosed", "tabId": 8})
    );
}
