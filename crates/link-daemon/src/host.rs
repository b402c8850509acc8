use async_trait::async_trait;
use link_proto::protocol::{TabId, TabInfo};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("browser host not attached")]
    Unavailable,
    #[error("browser host did not answer in time")]
    Timeout,
    #[error("browser host rejected call: {0}")]
    Rejected(String),
    #[error("browser host channel closed")]
    ChannelClosed,
}

/// The browser runtime as seen from the core: badge rendering, tab queries
/// and commands, messaging into content scripts, and code injection.
///
/// Badge setters are fire-and-forget.  Everything else completes later, and
/// the core only ever awaits these from spawned tasks.
#[async_trait]
pub trait BrowserHost: Send + Sync + 'static {
    fn set_badge_text(&self, text: &str);
    fn set_badge_color(&self, color: &str);

    async fn close_tab(&self, tab_id: TabId) -> Result<(), HostError>;
    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, HostError>;
    /// Active tab of the focused window, if any.
    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError>;
    async fn send_to_tab(&self, tab_id: TabId, message: Value) -> Result<Value, HostError>;
    async fn inject_code(&self, tab_id: TabId, code: Value) -> Result<(), HostError>;
}
