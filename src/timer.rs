//! Repeating refresh timer that drives reconciliation while downloads are active

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// At most one interval task exists per timer; starting again replaces it.
pub struct RefreshTimer {
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            handle: None,
        }
    }

    /// Start ticking. `on_tick` returns `false` once nobody is listening,
    /// which ends the task. Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, mut on_tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();
        let period = self.period.max(Duration::from_millis(1));
        tracing::debug!("Starting refresh timer every {:?}", period);
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        }));
    }

    /// Cancel the interval. Safe to call when already stopped.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("Stopping refresh timer");
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnMut() -> bool + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_fixed_cadence() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut timer = RefreshTimer::new(Duration::from_millis(1000));
        timer.start(counting(&ticks));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_never_duplicates_intervals() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut timer = RefreshTimer::new(Duration::from_millis(1000));
        timer.start(counting(&ticks));
        timer.start(counting(&ticks));
        timer.start(counting(&ticks));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_halts_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut timer = RefreshTimer::new(Duration::from_millis(500));
        timer.stop();
        timer.start(counting(&ticks));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        timer.stop();
        timer.stop();
        assert!(!timer.is_running());

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn task_ends_when_listener_goes_away() {
        let mut timer = RefreshTimer::new(Duration::from_millis(100));
        timer.start(|| false);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!timer.is_running());
    }
}
