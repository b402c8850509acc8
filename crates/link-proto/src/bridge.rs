//! Frames exchanged with the browser-side shim over the bridge socket.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON, the default layout of tokio-util's `LengthDelimitedCodec`.  The
//! shim reports host notifications and collaborator requests; the daemon
//! answers requests and issues host calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::TabId;

/// Upper bound for a single bridge frame.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// `windowId` the host uses when focus left all browser windows.
pub const WINDOW_ID_NONE: i64 = -1;

/// Shim → daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ShimFrame {
    /// A collaborator message on the local bus, answered with `Response`.
    Request {
        id: u64,
        #[serde(default)]
        sender_tab: Option<TabId>,
        body: Value,
    },
    TabRemoved {
        tab_id: TabId,
    },
    TabActivated {
        tab_id: TabId,
    },
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        active: bool,
    },
    WindowFocusChanged {
        window_id: i64,
    },
    BeforeNavigate {
        tab_id: TabId,
        frame_id: i64,
        url: String,
    },
    StorageChanged {
        changes: Map<String, Value>,
    },
    /// Completion of a `HostCall` that carried an id.
    HostReply {
        id: u64,
        #[serde(default)]
        ok: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Daemon → shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DaemonFrame {
    Response {
        id: u64,
        body: Value,
    },
    HostCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        call: HostCall,
    },
}

/// Operations the daemon asks the browser to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostCall {
    SetBadgeText { text: String },
    SetBadgeColor { color: String },
    CloseTab { tab_id: TabId },
    GetTab { tab_id: TabId },
    QueryActiveTab,
    SendToTab { tab_id: TabId, message: Value },
    InjectCode { tab_id: TabId, code: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shim_frame_field_names() {
        let frame: ShimFrame = serde_json::from_value(json!({
            "frame": "beforeNavigate",
            "tabId": 12,
            "frameId": 0,
            "url": "https://open.spotify.com/album/1"
        }))
        .unwrap();
        assert_eq!(
            frame,
            ShimFrame::BeforeNavigate {
                tab_id: TabId(12),
                frame_id: 0,
                url: "https://open.spotify.com/album/1".into(),
            }
        );
    }

    #[test]
    fn test_host_call_shape() {
        let frame = DaemonFrame::HostCall {
            id: Some(3),
            call: HostCall::SendToTab {
                tab_id: TabId(5),
                message: json!({"type": "command", "action": "play"}),
            },
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "frame": "hostCall",
                "id": 3,
                "call": {
                    "call": "sendToTab",
                    "tabId": 5,
                    "message": {"type": "command", "action": "play"}
                }
            })
        );
    }
}
