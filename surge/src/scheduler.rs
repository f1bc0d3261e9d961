//! Turns the staged load profile into a running population of virtual users.
use crate::executor::{VirtualUser, VuContext, VuHandle};
use crate::http::HttpClient;
use crate::timer::Timer;
use std::time::Duration;
use surge_core::{AbortReason, Stage};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::Instant;

#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// Piecewise-linear concurrency profile. Stage `i` ramps from the previous stage's target (0 for
/// the first) to its own target over its duration; a zero-length stage jumps.
#[derive(Debug, Clone, PartialEq)]
pub struct StageProfile {
    stages: Vec<Stage>,
    total: Duration,
}

impl StageProfile {
    pub fn new(stages: Vec<Stage>) -> Self {
        let total = stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration));
        Self { stages, total }
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Index of the stage running at `elapsed`, `None` once the profile is over.
    pub fn stage_index(&self, elapsed: Duration) -> Option<usize> {
        let mut end = Duration::ZERO;
        self.stages.iter().position(|stage| {
            end += stage.duration;
            elapsed < end
        })
    }

    /// Fractional number of users the profile asks for at `elapsed`.
    pub fn desired_level(&self, elapsed: Duration) -> f64 {
        let mut from = 0.;
        let mut start = Duration::ZERO;

        for stage in &self.stages {
            let end = start.saturating_add(stage.duration);
            if elapsed < end {
                let progress = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                return from + (stage.target as f64 - from) * progress;
            }
            from = stage.target as f64;
            start = end;
        }

        from
    }

    /// Desired concurrency, rounded to the nearest whole user.
    pub fn desired_concurrency(&self, elapsed: Duration) -> usize {
        self.desired_level(elapsed).round() as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SchedulerOutcome {
    pub max_vus: usize,
    pub iterations: u64,
    /// Users which ignored retirement past the graceful stop period.
    pub forced_stops: usize,
}

pub(crate) struct Scheduler<C> {
    profile: StageProfile,
    ctx: VuContext<C>,
    tick: Duration,
    graceful_stop: Duration,
    active: Vec<VuHandle>,
    draining: Vec<VuHandle>,
    next_id: u64,
    outcome: SchedulerOutcome,
}

impl<C: HttpClient> Scheduler<C> {
    pub fn new(
        profile: StageProfile,
        ctx: VuContext<C>,
        tick: Duration,
        graceful_stop: Duration,
    ) -> Self {
        Self {
            profile,
            ctx,
            tick,
            graceful_stop,
            active: vec![],
            draining: vec![],
            next_id: 1,
            outcome: SchedulerOutcome::default(),
        }
    }

    /// Drive the profile to completion or until a stop reason is published on `stop`.
    #[instrument(name = "scheduler", skip_all)]
    pub async fn run(mut self, mut stop: watch::Receiver<Option<AbortReason>>) -> SchedulerOutcome {
        let start = Instant::now();
        let mut timer = Timer::new(self.tick).await;
        let mut stage = None;
        info!(
            "Running {} stages over {} (tick {timer})",
            self.profile.stages().len(),
            humantime::format_duration(self.profile.total_duration())
        );

        loop {
            if let Some(reason) = stop.borrow().as_ref() {
                info!("Stopping load profile: {reason}");
                break;
            }

            let elapsed = start.elapsed();
            let current = self.profile.stage_index(elapsed);
            if current != stage {
                match current {
                    Some(i) => info!(
                        "Stage {} of {}: ramping to {} users",
                        i + 1,
                        self.profile.stages().len(),
                        self.profile.stages()[i].target
                    ),
                    None => {
                        info!("Load profile complete");
                        break;
                    }
                }
                stage = current;
            }

            self.set_concurrency(self.profile.desired_concurrency(elapsed));
            self.reap().await;

            tokio::select! {
                since_last = timer.tick() => {
                    if since_last > self.tick {
                        trace!("Scheduler tick late by {:?}", since_last - self.tick);
                    }
                }
                res = stop.changed() => {
                    if res.is_err() {
                        warn!("Stop channel closed; finishing run");
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Grow by spawning new users or shrink by retiring the most recently started ones.
    fn set_concurrency(&mut self, desired: usize) {
        let current = self.active.len();
        if current == desired {
            return;
        }

        if current > desired {
            debug!("Retiring {} users", current - desired);
            for handle in self.active.drain(desired..).rev() {
                handle.retire();
                self.draining.push(handle);
            }
        } else {
            debug!("Spawning {} users", desired - current);
            while self.active.len() < desired {
                let id = self.next_id;
                self.next_id += 1;
                self.active.push(VirtualUser::spawn(id, self.ctx.clone()));
            }
        }

        self.outcome.max_vus = self.outcome.max_vus.max(self.active.len());

        #[cfg(feature = "metrics")]
        metrics::gauge!("surge_vus").set(self.active.len() as f64);
    }

    /// Collect users which have exited, whether retired or crashed.
    async fn reap(&mut self) {
        let (finished, draining): (Vec<_>, Vec<_>) =
            self.draining.drain(..).partition(|h| h.task.is_finished());
        self.draining = draining;

        let (crashed, active): (Vec<_>, Vec<_>) =
            self.active.drain(..).partition(|h| h.task.is_finished());
        self.active = active;

        for handle in finished.into_iter().chain(crashed) {
            let id = handle.id;
            let res = handle.task.await;
            self.join(id, res);
        }
    }

    fn join(&mut self, id: u64, res: Result<u64, JoinError>) {
        match res {
            Ok(iterations) => self.outcome.iterations += iterations,
            Err(err) if err.is_cancelled() => debug!("Virtual user {id} was cancelled"),
            Err(err) => warn!("Virtual user {id} crashed: {err}"),
        }
    }

    async fn shutdown(mut self) -> SchedulerOutcome {
        self.set_concurrency(0);
        let deadline = Instant::now().checked_add(self.graceful_stop);
        debug!(
            "Waiting up to {} for {} users to finish",
            humantime::format_duration(self.graceful_stop),
            self.draining.len()
        );

        for handle in std::mem::take(&mut self.draining) {
            let id = handle.id;
            let abort = handle.task.abort_handle();
            let res = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, handle.task).await,
                None => Ok(handle.task.await),
            };
            match res {
                Ok(res) => self.join(id, res),
                Err(_) => {
                    warn!("Virtual user {id} did not stop within the graceful stop period; aborting");
                    abort.abort();
                    self.outcome.forced_stops += 1;
                }
            }
        }

        info!(
            "All users stopped: {} iterations, peak of {} users",
            self.outcome.iterations, self.outcome.max_vus
        );
        self.outcome
    }
}
