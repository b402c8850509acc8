//! Scheduled tasks with cancellation handles.
//!
//! A timer is a spawned tokio task that posts an event back into the owner's
//! channel when it fires.  `TimerSlot` holds at most one live task and stamps
//! each arming with a generation number: a fire event whose generation is not
//! current (because the slot was cancelled or re-armed after the event was
//! already queued) is stale and must be ignored by the receiver.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Handle to a spawned timer task.  Dropping it cancels the timer.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    /// Post `event` once after `delay`.
    pub fn once<E: Send + 'static>(delay: Duration, tx: mpsc::UnboundedSender<E>, event: E) -> Self {
        let deadline = Instant::now() + delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(event);
        });
        Self {
            handle: task.abort_handle(),
        }
    }

    /// Post `make()` every `period`, first fire one period from now.
    pub fn repeating<E, F>(period: Duration, tx: mpsc::UnboundedSender<E>, make: F) -> Self
    where
        E: Send + 'static,
        F: Fn() -> E + Send + 'static,
    {
        let start = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if tx.send(make()).is_err() {
                    break;
                }
            }
        });
        Self {
            handle: task.abort_handle(),
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// At most one outstanding timer, plus the generation of the latest arming.
#[derive(Debug, Default)]
pub struct TimerSlot {
    task: Option<ScheduledTask>,
    generation: u64,
}

impl TimerSlot {
    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// True when `generation` belongs to the live timer.
    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && self.generation == generation
    }

    /// Replace whatever is armed with a one-shot timer.  `make` receives the
    /// new generation so the event can carry it.
    pub fn arm_once<E, F>(&mut self, delay: Duration, tx: mpsc::UnboundedSender<E>, make: F) -> u64
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E,
    {
        self.generation += 1;
        let generation = self.generation;
        self.task = Some(ScheduledTask::once(delay, tx, make(generation)));
        generation
    }

    /// Replace whatever is armed with a repeating timer.
    pub fn arm_repeating<E, F>(&mut self, period: Duration, tx: mpsc::UnboundedSender<E>, make: F) -> u64
    where
        E: Send + 'static,
        F: Fn(u64) -> E + Send + 'static,
    {
        self.generation += 1;
        let generation = self.generation;
        self.task = Some(ScheduledTask::repeating(period, tx, move || make(generation)));
        generation
    }

    /// Drop the live timer (if any) and invalidate events already in flight.
    pub fn cancel(&mut self) {
        self.task = None;
        self.generation += 1;
    }

    /// Consume a one-shot fire.  Returns false for stale events.
    pub fn fired(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.task = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut mpsc::UnboundedReceiver<u64>) -> Vec<u64> {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::default();
        let generation = slot.arm_once(Duration::from_millis(100), tx, |g| g);

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(drain(&mut rx).await.is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(drain(&mut rx).await, vec![generation]);
        assert!(slot.fired(generation));
        assert!(!slot.is_armed());
        assert!(!slot.fired(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_timer_and_stales_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::default();
        let generation = slot.arm_once(Duration::from_millis(50), tx, |g| g);
        slot.cancel();

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(drain(&mut rx).await.is_empty());
        assert!(!slot.fired(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::default();
        let first = slot.arm_once(Duration::from_millis(50), tx.clone(), |g| g);
        let second = slot.arm_once(Duration::from_millis(80), tx, |g| g);
        assert_ne!(first, second);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(drain(&mut rx).await, vec![second]);
        assert!(!slot.is_current(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_ticks_each_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::default();
        let generation = slot.arm_repeating(Duration::from_millis(400), tx, |g| g);

        assert!(drain(&mut rx).await.is_empty());
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(400)).await;
            assert_eq!(drain(&mut rx).await, vec![generation]);
        }
        assert!(slot.is_current(generation));

        slot.cancel();
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(drain(&mut rx).await.is_empty());
    }
}
