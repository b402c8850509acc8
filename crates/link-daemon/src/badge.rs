//! Toolbar badge: connection status and page relevance.
//!
//! `BadgeState` is derived on demand from the connection state and whether the
//! focused page is one we support; it is never stored on its own.  The only
//! stored piece is the pulse animation (timer + frame index).

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::LinkEvent;
use crate::host::BrowserHost;
use crate::timer::TimerSlot;
use crate::transport::ConnectionState;

pub const ERROR_TEXT: &str = "!";
pub const ERROR_COLOR: &str = "#ef4444";
/// Non-empty so the badge shows as a dot while pulsing.
pub const PULSE_TEXT: &str = " ";
pub const PULSE_COLORS: [&str; 4] = ["#4ade80", "#22c55e", "#15803d", "#22c55e"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeState {
    Error,
    Cleared,
    Pulsing,
}

impl BadgeState {
    pub fn derive(conn: ConnectionState, relevant: bool) -> Self {
        match (conn, relevant) {
            (ConnectionState::Open, true) => BadgeState::Pulsing,
            (ConnectionState::Open, false) => BadgeState::Cleared,
            // still dialing counts as not connected
            _ => BadgeState::Error,
        }
    }
}

#[derive(Debug)]
pub struct BadgeIndicator {
    interval: Duration,
    pulse: TimerSlot,
    frame: usize,
}

impl BadgeIndicator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pulse: TimerSlot::default(),
            frame: 0,
        }
    }

    pub fn is_pulsing(&self) -> bool {
        self.pulse.is_armed()
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Re-evaluate and draw.  Returns the derived state.
    pub fn render(
        &mut self,
        conn: ConnectionState,
        relevant: bool,
        host: &dyn BrowserHost,
        tx: &mpsc::UnboundedSender<LinkEvent>,
    ) -> BadgeState {
        let state = BadgeState::derive(conn, relevant);
        match state {
            BadgeState::Error => {
                self.stop();
                host.set_badge_text(ERROR_TEXT);
                host.set_badge_color(ERROR_COLOR);
            }
            BadgeState::Cleared => {
                self.stop();
                host.set_badge_text("");
            }
            BadgeState::Pulsing => {
                if !self.pulse.is_armed() {
                    self.frame = 0;
                    host.set_badge_text(PULSE_TEXT);
                    host.set_badge_color(PULSE_COLORS[0]);
                    self.pulse.arm_repeating(self.interval, tx.clone(), |generation| {
                        LinkEvent::PulseTick { generation }
                    });
                }
            }
        }
        state
    }

    /// Advance one animation frame.  Stale ticks from a stopped pulse are
    /// ignored.
    pub fn on_pulse_tick(&mut self, generation: u64, host: &dyn BrowserHost) {
        if !self.pulse.is_current(generation) {
            return;
        }
        self.frame = (self.frame + 1) % PULSE_COLORS.len();
        host.set_badge_color(PULSE_COLORS[self.frame]);
    }

    fn stop(&mut self) {
        if self.pulse.is_armed() {
            self.pulse.cancel();
        }
        self.frame = 0;
    }
}
