use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

/// Fixed-interval ticker used by the scheduler and the threshold watcher.
pub(crate) struct Timer {
    interval: Interval,
    last_tick: Instant,
    interval_dur: Duration,
}

impl Timer {
    pub async fn new(interval_dur: Duration) -> Self {
        let mut interval = interval(interval_dur);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // NOTE: First tick completes instantly
        let last_tick = interval.tick().await;
        Self {
            interval,
            last_tick,
            interval_dur,
        }
    }

    /// Wait for the next tick, returning the time since the previous one.
    pub async fn tick(&mut self) -> Duration {
        let next = self.interval.tick().await;
        let elapsed = next - self.last_tick;
        self.last_tick = next;
        elapsed
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.interval_dur))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_fixed_interval() {
        let mut timer = Timer::new(Duration::from_secs(1)).await;
        assert_eq!(timer.to_string(), "1s");

        for _ in 0..3 {
            assert_eq!(timer.tick().await, Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_ticks_report_the_gap() {
        let mut timer = Timer::new(Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        // The missed tick fires at once; the schedule then restarts from now.
        assert_eq!(timer.tick().await, Duration::from_secs(1));
        assert_eq!(timer.tick().await, Duration::from_millis(2_500));
        assert_eq!(timer.tick().await, Duration::from_secs(1));
    }
}
