//! Cancellable scheduled callbacks (spec §5): every timer a state schedules
//! is represented by a handle stored on that state; `cancel` is idempotent
//! and MUST be called from the state's leave hook.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::Event;

/// A cancellable timer. Dropping or cancelling an unfired handle aborts the
/// underlying task before it can post its event, which is how cooperative
/// cancellation (§5 "state leave hooks cancel deterministically") is
/// implemented on top of tokio.
#[derive(Debug)]
pub struct TimerHandle {
    join: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Schedules `event` to be posted to `events_tx` after `delay`.
    pub fn schedule(delay: Duration, event: Event, events_tx: UnboundedSender<Event>) -> Self {
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(event);
        });
        TimerHandle { join: Some(join) }
    }

    /// Cancels the timer. Safe to call more than once; only the first call
    /// has an effect.
    pub fn cancel(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::TimerTag;

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut handle = TimerHandle::schedule(
            Duration::from_millis(50),
            Event::TimerFired { tag: TimerTag::LedTestReturn, token: 0 },
            tx,
        );
        handle.cancel();
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not post its event");
    }

    #[tokio::test]
    async fn uncancelled_timer_fires() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = TimerHandle::schedule(
            Duration::from_millis(10),
            Event::TimerFired { tag: TimerTag::LedTestReturn, token: 7 },
            tx,
        );
        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.unwrap();
        assert!(matches!(fired, Some(Event::TimerFired { tag: TimerTag::LedTestReturn, token: 7 })));
    }
}
