use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Desktop command action that asks us to close one of our playback tabs.
pub const ACTION_CLOSE_TAB: &str = "closeTab";

/// Browser tab identifier as handed out by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sub-tag of an `event` message.  Unknown names from content scripts are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Connected,
    Playing,
    Paused,
    Ended,
    TabClosed,
    Heartbeat,
    InterceptorActive,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Playing => "playing",
            EventKind::Paused => "paused",
            EventKind::Ended => "ended",
            EventKind::TabClosed => "tabClosed",
            EventKind::Heartbeat => "heartbeat",
            EventKind::InterceptorActive => "interceptorActive",
            EventKind::Other(name) => name,
        }
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "connected" => EventKind::Connected,
            "playing" => EventKind::Playing,
            "paused" => EventKind::Paused,
            "ended" => EventKind::Ended,
            "tabClosed" => EventKind::TabClosed,
            "heartbeat" => EventKind::Heartbeat,
            "interceptorActive" => EventKind::InterceptorActive,
            _ => EventKind::Other(name),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Messages sent from the extension to the desktop app.  Collaborator payload
/// fields we do not interpret ride along in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    Event {
        event: EventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    Command {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    SendToParachord {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    ScrapedPlaylist {
        #[serde(default, skip_serializing_if = "Value::is_null")]
        playlist: Value,
        source: String,
    },
    ScrapedAlbum {
        #[serde(default, skip_serializing_if = "Value::is_null")]
        album: Value,
        source: String,
    },
    AddFriend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
        source: String,
    },
    Ping,
}

impl OutboundMessage {
    pub fn event(event: EventKind, tab_id: Option<TabId>) -> Self {
        OutboundMessage::Event {
            event,
            tab_id,
            fields: Map::new(),
        }
    }

    pub fn tab_closed(tab_id: TabId) -> Self {
        Self::event(EventKind::TabClosed, Some(tab_id))
    }

    pub fn heartbeat(tab_id: TabId, site: &str, url: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("site".into(), Value::String(site.to_string()));
        fields.insert("url".into(), Value::String(url.to_string()));
        OutboundMessage::Event {
            event: EventKind::Heartbeat,
            tab_id: Some(tab_id),
            fields,
        }
    }

    pub fn send_to_parachord(url: impl Into<String>, source: impl Into<String>) -> Self {
        OutboundMessage::SendToParachord {
            url: Some(url.into()),
            source: Some(source.into()),
            fields: Map::new(),
        }
    }

    /// Short label for log lines, e.g. `event:playing` or `scrapedAlbum`.
    pub fn label(&self) -> String {
        match self {
            OutboundMessage::Event { event, .. } => format!("event:{}", event.as_str()),
            OutboundMessage::Command { .. } => "command".into(),
            OutboundMessage::SendToParachord { .. } => "sendToParachord".into(),
            OutboundMessage::ScrapedPlaylist { .. } => "scrapedPlaylist".into(),
            OutboundMessage::ScrapedAlbum { .. } => "scrapedAlbum".into(),
            OutboundMessage::AddFriend { .. } => "addFriend".into(),
            OutboundMessage::Ping => "ping".into(),
        }
    }

    /// Compact JSON for one socket frame.  serde_json never emits raw
    /// newlines in compact mode.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the desktop app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    Command {
        action: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    InjectCode {
        #[serde(default)]
        code: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a json object")]
    NotAnObject,
}

impl InboundMessage {
    /// Parse one socket frame.  The raw object is returned alongside so that
    /// forwarded commands reach the content script verbatim.
    pub fn parse(text: &str) -> Result<(Self, Value), ProtoError> {
        let raw: Value = serde_json::from_str(text)?;
        if !raw.is_object() {
            return Err(ProtoError::NotAnObject);
        }
        let msg = serde_json::from_value(raw.clone())?;
        Ok((msg, raw))
    }
}

/// Requests from collaborators (content scripts, popup) on the local bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LocalRequest {
    Event {
        event: EventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    GetStatus,
    SendToParachord {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    SendScrapedPlaylist {
        #[serde(default)]
        playlist: Value,
        #[serde(default)]
        source: Option<String>,
    },
    SendScrapedAlbum {
        #[serde(default)]
        album: Value,
        #[serde(default)]
        source: Option<String>,
    },
    AddFriend {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        service: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
    ScrapePlaylist,
    CloseTab {
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    #[serde(other)]
    Unknown,
}

/// Replies on the local bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalReply {
    Status {
        connected: bool,
    },
    Ack {
        received: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent: Option<bool>,
    },
    Error {
        error: String,
    },
    Relayed(Value),
}

impl LocalReply {
    pub fn received() -> Self {
        LocalReply::Ack {
            received: true,
            sent: None,
        }
    }

    pub fn forwarded(sent: bool) -> Self {
        LocalReply::Ack {
            received: true,
            sent: Some(sent),
        }
    }
}

/// What the host tells us about a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let msg = OutboundMessage::event(EventKind::Playing, Some(TabId(3)));
        let wire: Value = serde_json::from_str(&msg.to_wire().unwrap()).unwrap();
        assert_eq!(wire, json!({"type": "event", "event": "playing", "tabId": 3}));
    }

    #[test]
    fn test_heartbeat_carries_site_and_url() {
        let msg = OutboundMessage::heartbeat(TabId(9), "youtube", "https://www.youtube.com/watch?v=x");
        let wire: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "event");
        assert_eq!(wire["event"], "heartbeat");
        assert_eq!(wire["site"], "youtube");
        assert_eq!(wire["tabId"], 9);
        assert_eq!(wire["url"], "https://www.youtube.com/watch?v=x");
    }

    #[test]
    fn test_ping_and_wire_has_no_newlines() {
        assert_eq!(OutboundMessage::Ping.to_wire().unwrap(), r#"{"type":"ping"}"#);
        let msg = OutboundMessage::ScrapedPlaylist {
            playlist: json!({"name": "a\nb", "tracks": [1, 2]}),
            source: "scrape".into(),
        };
        assert!(!msg.to_wire().unwrap().contains('\n'));
    }

    #[test]
    fn test_unknown_event_name_survives() {
        let raw = json!({"type": "event", "event": "buffering", "position": 12});
        let msg: OutboundMessage = serde_json::from_value(raw.clone()).unwrap();
        match &msg {
            OutboundMessage::Event { event, fields, .. } => {
                assert_eq!(*event, EventKind::Other("buffering".into()));
                assert_eq!(fields["position"], 12);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn test_inbound_close_tab_command() {
        let (msg, raw) =
            InboundMessage::parse(r#"{"type":"command","action":"closeTab","tabId":7}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Command {
                action: ACTION_CLOSE_TAB.into(),
                tab_id: Some(TabId(7)),
            }
        );
        assert_eq!(raw["tabId"], 7);
    }

    #[test]
    fn test_inbound_unknown_type_is_not_an_error() {
        let (msg, _) = InboundMessage::parse(r#"{"type":"volume","level":3}"#).unwrap();
        assert_eq!(msg, InboundMessage::Unknown);
    }

    #[test]
    fn test_inbound_malformed() {
        assert!(InboundMessage::parse("not json").is_err());
        assert!(matches!(
            InboundMessage::parse("[1,2]"),
            Err(ProtoError::NotAnObject)
        ));
        assert!(InboundMessage::parse(r#"{"action":"play"}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":"command"}"#).is_err());
    }

    #[test]
    fn test_local_request_variants() {
        let req: LocalRequest = serde_json::from_value(json!({"type": "getStatus"})).unwrap();
        assert_eq!(req, LocalRequest::GetStatus);

        let req: LocalRequest = serde_json::from_value(json!({
            "type": "sendToParachord",
            "url": "https://open.spotify.com/track/1",
            "source": "popup",
            "title": "x"
        }))
        .unwrap();
        match req {
            LocalRequest::SendToParachord { url, source, fields } => {
                assert_eq!(url.as_deref(), Some("https://open.spotify.com/track/1"));
                assert_eq!(source.as_deref(), Some("popup"));
                assert_eq!(fields["title"], "x");
            }
            other => panic!("unexpected {:?}", other),
        }

        let req: LocalRequest = serde_json::from_value(json!({"type": "mystery"})).unwrap();
        assert_eq!(req, LocalRequest::Unknown);
    }

    #[test]
    fn test_local_reply_shapes() {
        assert_eq!(
            serde_json::to_value(LocalReply::Status { connected: false }).unwrap(),
            json!({"connected": false})
        );
        assert_eq!(
            serde_json::to_value(LocalReply::received()).unwrap(),
            json!({"received": true})
        );
        assert_eq!(
            serde_json::to_value(LocalReply::forwarded(false)).unwrap(),
            json!({"received": true, "sent": false})
        );
    }
}
