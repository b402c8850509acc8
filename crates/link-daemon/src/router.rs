use link_proto::protocol::{InboundMessage, TabId, ACTION_CLOSE_TAB};
use serde_json::Value;
use tracing::{debug, warn};

/// What to do with one frame from the desktop app.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Programmatic close of a tab we opened.
    CloseTab(TabId),
    /// Hand the raw command to the content script in the playback tab.
    ForwardToTab(TabId, Value),
    /// Run code in the playback tab.
    Inject(TabId, Value),
    Ignore,
}

pub fn route(text: &str, active: Option<TabId>) -> Route {
    let (msg, raw) = match InboundMessage::parse(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("router: dropping malformed desktop message: {}", e);
            return Route::Ignore;
        }
    };

    match msg {
        InboundMessage::Command {
            action,
            tab_id: Some(tab_id),
        } if action == ACTION_CLOSE_TAB => Route::CloseTab(tab_id),
        // any other command, including a closeTab with no target
        InboundMessage::Command { action, .. } => match active {
            Some(tab) => Route::ForwardToTab(tab, raw),
            None => {
                debug!("router: no playback tab for command {}", action);
                Route::Ignore
            }
        },
        InboundMessage::InjectCode { code: Some(code) } if !code.is_null() => match active {
            Some(tab) => Route::Inject(tab, code),
            None => {
                debug!("router: no playback tab for injectCode");
                Route::Ignore
            }
        },
        InboundMessage::InjectCode { .. } => {
            debug!("router: injectCode without code");
            Route::Ignore
        }
        InboundMessage::Unknown => {
            let kind = raw.get("type").cloned().unwrap_or_default();
            debug!("router: ignoring message {}", kind);
            Route::Ignore
        }
    }
}
