//! Periodic background tasks
//!
//! A [`PeriodicJob`] knows how to run a single tick and report what
//! happened. [`PeriodicTask`] drives a job either one step at a time or on
//! a timer until a shutdown signal arrives. Ticks of one task never overlap:
//! the next tick is only awaited once the previous one returned.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// A unit of background work run on a fixed period
#[async_trait]
pub trait PeriodicJob: Send + 'static {
    /// What a tick reports back
    type Outcome: Debug + Send;

    fn name(&self) -> &'static str;

    async fn run_tick(&mut self) -> Self::Outcome;
}

pub struct PeriodicTask<J> {
    job: J,
    period: Duration,
}

impl<J: PeriodicJob> PeriodicTask<J> {
    pub fn new(job: J, period: Duration) -> Self {
        Self { job, period }
    }

    /// Runs exactly one tick now.
    pub async fn step(&mut self) -> J::Outcome {
        self.job.run_tick().await
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs the job every period, first tick one period from now, until
    /// `shutdown` fires or its sender is dropped. A tick in progress is
    /// allowed to finish. The handle yields the job back.
    pub fn spawn(mut self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<J> {
        tokio::spawn(async move {
            let name = self.job.name();
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(task = name, period_secs = self.period.as_secs(), "Periodic task started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(task = name, "Periodic task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let outcome = self.job.run_tick().await;
                        debug!(task = name, outcome = ?outcome, "Tick finished");
                    }
                }
            }

            self.job
        })
    }
}
