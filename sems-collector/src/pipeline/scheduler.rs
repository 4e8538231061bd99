use std::time::{Duration, Instant};

use sems_model::domain::Session;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{CycleOutcome, Pipeline, PointSink, TelemetrySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Drives one [`Pipeline`] cycle per tick until cancelled.
pub struct Scheduler<S, K> {
    pipeline: Pipeline<S, K>,
    period: Duration,
    state: LoopState,
    last_timestamp: Option<OffsetDateTime>,
}

impl<S, K> Scheduler<S, K>
where
    S: TelemetrySource,
    K: PointSink,
{
    pub fn new(pipeline: Pipeline<S, K>, period: Duration) -> Self {
        Self {
            pipeline,
            period,
            state: LoopState::Idle,
            last_timestamp: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn pipeline(&self) -> &Pipeline<S, K> {
        &self.pipeline
    }

    /// Run a single cycle and record its outcome.
    pub async fn tick(&mut self, session: &mut Option<Session>) -> CycleOutcome {
        self.state = LoopState::Running;
        let started = Instant::now();

        let outcome = self.pipeline.run_cycle(session).await;

        metrics::histogram!("sems_cycle_duration_seconds").record(started.elapsed().as_secs_f64());
        self.record(&outcome);
        self.state = LoopState::Idle;
        outcome
    }

    /// Tick every `period` until `shutdown` fires. The first cycle runs immediately.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let plant_id = self.pipeline.source.plant_id().to_string();
        tracing::info!(plant_id, period_secs = self.period.as_secs(), "scheduler started");

        let mut session: Option<Session> = None;
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&mut session).await;
                }
            }
        }

        tracing::info!(plant_id, "scheduler stopped");
    }

    /// Remember `timestamp` as the latest written one. Returns the previous
    /// timestamp when `timestamp` is older; the point is still written.
    fn observe_timestamp(&mut self, timestamp: OffsetDateTime) -> Option<OffsetDateTime> {
        let previous = self.last_timestamp.replace(timestamp)?;
        (timestamp < previous).then_some(previous)
    }

    fn record(&mut self, outcome: &CycleOutcome) {
        let regressed_from = match outcome {
            CycleOutcome::Written { timestamp, .. } => self.observe_timestamp(*timestamp),
            CycleOutcome::Failed(_) => None,
        };
        let plant_id = self.pipeline.source.plant_id();
        match outcome {
            CycleOutcome::Written { timestamp, fields } => {
                metrics::counter!("sems_cycles_total", "outcome" => "written").increment(1);

                if let Some(previous) = regressed_from {
                    metrics::counter!("sems_timestamp_regressions_total").increment(1);
                    tracing::warn!(plant_id, %timestamp, %previous, "plant timestamp went backwards");
                }

                tracing::info!(plant_id, %timestamp, fields, "cycle written");
            }
            CycleOutcome::Failed(e) => {
                let stage = e.stage();
                metrics::counter!("sems_cycles_total", "outcome" => "failed").increment(1);
                metrics::counter!("sems_cycle_failures_total", "stage" => stage.as_str()).increment(1);
                tracing::error!(plant_id, %stage, error = %e, "cycle failed");
            }
        }
    }
}
