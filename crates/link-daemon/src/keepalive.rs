//! Keep-alive probe on a persisted schedule.
//!
//! The schedule lives in a small JSON file so that a restarted daemon picks
//! up where the previous one left off: an overdue alarm fires right away,
//! otherwise the probe sleeps out the remainder.  The in-memory timer is just
//! the current arming of that schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::LinkEvent;
use crate::timer::TimerSlot;

pub const KEEP_ALIVE_ALARM: &str = "parachord-keepalive";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAlarm {
    pub name: String,
    pub period_secs: u64,
    pub next_due: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlarmStore {
    path: PathBuf,
}

impl AlarmStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<PersistedAlarm> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(alarm) => Some(alarm),
            Err(e) => {
                warn!("keepalive: ignoring corrupt alarm file {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub async fn save(&self, alarm: &PersistedAlarm) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(alarm)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

fn after(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(period.as_millis() as i64)
}

#[derive(Debug)]
pub struct KeepAliveProbe {
    period: Duration,
    store: AlarmStore,
    alarm: PersistedAlarm,
    slot: TimerSlot,
    /// Last spawned write.  Each write waits for the previous one.
    saving: Option<JoinHandle<()>>,
}

impl KeepAliveProbe {
    /// Load the stored schedule, or start a fresh one due a period from now
    /// when it is missing, corrupt, or for a different period.  A stored due
    /// time more than one period ahead is pulled in to one period from now.
    pub fn resume(period: Duration, store: AlarmStore, now: DateTime<Utc>) -> Self {
        let mut alarm = match store.load() {
            Some(alarm) if alarm.name == KEEP_ALIVE_ALARM && alarm.period_secs == period.as_secs() => {
                debug!("keepalive: resuming schedule, next due {}", alarm.next_due);
                alarm
            }
            _ => PersistedAlarm {
                name: KEEP_ALIVE_ALARM.to_string(),
                period_secs: period.as_secs(),
                next_due: after(now, period),
            },
        };
        let latest = after(now, period);
        if alarm.next_due > latest {
            warn!(
                "keepalive: stored due time {} is beyond one period, rescheduling to {}",
                alarm.next_due, latest
            );
            alarm.next_due = latest;
        }
        Self {
            period,
            store,
            alarm,
            slot: TimerSlot::default(),
            saving: None,
        }
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.alarm.next_due
    }

    /// Arm for the stored due time and write the schedule back.
    pub fn start(&mut self, now: DateTime<Utc>, tx: &mpsc::UnboundedSender<LinkEvent>) {
        let delay = (self.alarm.next_due - now).to_std().unwrap_or(Duration::ZERO);
        info!("keepalive: every {:?}, first in {:?}", self.period, delay);
        self.slot
            .arm_once(delay, tx.clone(), |generation| LinkEvent::KeepAliveDue { generation });
        self.persist();
    }

    /// Consume a fire and schedule the next one.  False for stale fires.
    pub fn fired(
        &mut self,
        generation: u64,
        now: DateTime<Utc>,
        tx: &mpsc::UnboundedSender<LinkEvent>,
    ) -> bool {
        if !self.slot.fired(generation) {
            return false;
        }
        self.alarm.next_due = after(now, self.period);
        self.slot
            .arm_once(self.period, tx.clone(), |generation| LinkEvent::KeepAliveDue { generation });
        self.persist();
        true
    }

    fn persist(&mut self) {
        let store = self.store.clone();
        let alarm = self.alarm.clone();
        let previous = self.saving.take();
        self.saving = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = store.save(&alarm).await {
                warn!("keepalive: failed to persist alarm to {:?}: {}", store.path(), e);
            }
        }));
    }

    /// Wait for outstanding writes of the schedule.
    pub async fn flush(&mut self) {
        if let Some(saving) = self.saving.take() {
            let _ = saving.await;
        }
    }
}
