use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::LinkEvent;
use crate::timer::TimerSlot;

/// Arms a single delayed reconnection attempt after a disconnect.  The delay
/// is fixed: the desktop app is always on loopback, so a short constant
/// interval gets us back quickly after it restarts.
#[derive(Debug)]
pub struct ReconnectScheduler {
    delay: Duration,
    slot: TimerSlot,
}

impl ReconnectScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: TimerSlot::default(),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.is_armed()
    }

    /// Arm the timer.  Already armed: no-op, the earlier deadline stands.
    pub fn arm(&mut self, tx: &mpsc::UnboundedSender<LinkEvent>) -> bool {
        if self.slot.is_armed() {
            return false;
        }
        self.slot
            .arm_once(self.delay, tx.clone(), |generation| LinkEvent::ReconnectDue { generation });
        true
    }

    pub fn cancel(&mut self) {
        if self.slot.is_armed() {
            self.slot.cancel();
        }
    }

    /// True if this fire is live and a connect attempt should follow.
    pub fn fired(&mut self, generation: u64) -> bool {
        self.slot.fired(generation)
    }
}
