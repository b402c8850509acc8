//! Active playback tab and suppression of our own tab closes.
//!
//! Closing a tab ourselves must not be reported to the desktop as the user
//! closing it.  Each programmatic close marks its tab id before the close is
//! issued.  The marker outlives the close by a short grace window so the
//! host's removal notification still finds it, then expires on a timer.  A
//! failed close drops the marker at once.
//!
//! Markers are keyed by tab id, so overlapping closes of different tabs do
//! not interfere.  Each marker remembers the token of the close that armed it;
//! completions carrying an older token (a close that was re-issued meanwhile)
//! are ignored.

use link_proto::protocol::TabId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::LinkEvent;
use crate::timer::TimerSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// We closed it; say nothing.
    Suppressed,
    /// The user closed the playback tab.
    ActiveClosed(TabId),
    /// Some other tab.
    Ignored,
}

#[derive(Debug, Default)]
struct Marker {
    token: u64,
    /// Unarmed until the close completes.
    expiry: TimerSlot,
}

#[derive(Debug)]
pub struct TabTracker {
    active: Option<TabId>,
    suppressed: HashMap<TabId, Marker>,
    grace: Duration,
    next_token: u64,
}

impl TabTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            active: None,
            suppressed: HashMap::new(),
            grace,
            next_token: 0,
        }
    }

    pub fn active(&self) -> Option<TabId> {
        self.active
    }

    pub fn set_active(&mut self, tab_id: TabId) {
        if self.active != Some(tab_id) {
            debug!("tabs: active tab {:?} → {}", self.active, tab_id);
        }
        self.active = Some(tab_id);
    }

    /// Clear the active record if it still points at `tab_id`.
    pub fn clear_active_if(&mut self, tab_id: TabId) -> bool {
        if self.active == Some(tab_id) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn is_suppressed(&self, tab_id: TabId) -> bool {
        self.suppressed.contains_key(&tab_id)
    }

    pub fn suppressed_count(&self) -> usize {
        self.suppressed.len()
    }

    /// Mark `tab_id` before closing it.  Re-marking an already suppressed tab
    /// replaces the marker and cancels its pending expiry.
    pub fn begin_close(&mut self, tab_id: TabId) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        // the old marker's timer is dropped (and aborted) with it
        self.suppressed.insert(
            tab_id,
            Marker {
                token,
                expiry: TimerSlot::default(),
            },
        );
        token
    }

    /// The close went through: let the marker live for the grace window.
    pub fn close_succeeded(
        &mut self,
        tab_id: TabId,
        token: u64,
        tx: &mpsc::UnboundedSender<LinkEvent>,
    ) {
        let grace = self.grace;
        if let Some(marker) = self.suppressed.get_mut(&tab_id) {
            if marker.token == token {
                marker.expiry.arm_once(grace, tx.clone(), |_| {
                    LinkEvent::SuppressionExpired { tab_id, token }
                });
            }
        }
    }

    /// The close was rejected; nothing will be removed, drop the marker.
    pub fn close_failed(&mut self, tab_id: TabId, token: u64) {
        if self.suppressed.get(&tab_id).map(|m| m.token) == Some(token) {
            self.suppressed.remove(&tab_id);
        }
    }

    /// Grace window elapsed.
    pub fn expire(&mut self, tab_id: TabId, token: u64) -> bool {
        if self.suppressed.get(&tab_id).map(|m| m.token) == Some(token) {
            self.suppressed.remove(&tab_id);
            debug!("tabs: suppression for {} expired", tab_id);
            true
        } else {
            false
        }
    }

    /// The host reports `tab_id` gone.
    pub fn on_removed(&mut self, tab_id: TabId) -> RemovalOutcome {
        if self.suppressed.remove(&tab_id).is_some() {
            return RemovalOutcome::Suppressed;
        }
        if self.clear_active_if(tab_id) {
            RemovalOutcome::ActiveClosed(tab_id)
        } else {
            RemovalOutcome::Ignored
        }
    }
}
