//! Worker pool autoscaler
//!
//! [`Autoscaler`] is the pure control law: it folds telemetry samples into
//! consecutive-sample counters and decides when to move the worker count by
//! one step. [`AutoscalerController`] samples the fleet on an interval and
//! applies the decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};
use crate::queue::{FleetSnapshot, JobQueue, WorkerFleet};

#[derive(Debug, Clone, Serialize)]
pub struct AutoscalerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Queue depth above which a sample counts as high
    pub scale_up_threshold: usize,
    /// Queue depth below which a sample counts as low
    pub scale_down_threshold: usize,
    pub scale_step: usize,
    /// Consecutive high or low samples needed before acting
    pub consecutive_samples: u32,
    pub sample_interval: Duration,
    pub cooldown: Duration,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 8,
            scale_up_threshold: 10,
            scale_down_threshold: 2,
            scale_step: 1,
            consecutive_samples: 3,
            sample_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(60),
        }
    }
}

impl AutoscalerConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(FleetError::InvalidConfig(msg.to_string()));
        if self.min_workers == 0 {
            return invalid("min_workers must be at least 1");
        }
        if self.min_workers > self.max_workers {
            return invalid("min_workers exceeds max_workers");
        }
        if self.scale_step == 0 {
            return invalid("scale_step must be at least 1");
        }
        if self.scale_down_threshold > self.scale_up_threshold {
            return invalid("scale_down_threshold exceeds scale_up_threshold");
        }
        if self.consecutive_samples == 0 {
            return invalid("consecutive_samples must be at least 1");
        }
        Ok(())
    }

    pub fn contains(&self, workers: usize) -> bool {
        (self.min_workers..=self.max_workers).contains(&workers)
    }
}

/// One telemetry reading. Sequence numbers make sampling idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySample {
    pub sequence: u64,
    pub queue_depth: usize,
    pub active_jobs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScaleDecision {
    Hold,
    /// Sample already seen
    Ignored,
    ScaleUp { from: usize, to: usize },
    ScaleDown { from: usize, to: usize },
    /// The fleet rejected the resize; the worker count is unchanged
    ScaleFailed { from: usize, to: usize },
}

impl ScaleDecision {
    pub fn target(&self) -> Option<usize> {
        match self {
            ScaleDecision::ScaleUp { to, .. } | ScaleDecision::ScaleDown { to, .. } => Some(*to),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoscalerState {
    pub current_worker_count: usize,
    #[serde(with = "time::serde::timestamp::option")]
    pub last_scale_at: Option<OffsetDateTime>,
    pub consecutive_high: u32,
    pub consecutive_low: u32,
    pub last_sequence: Option<u64>,
    pub last_decision: ScaleDecision,
    #[serde(skip)]
    last_scale_instant: Option<Instant>,
}

pub struct Autoscaler {
    config: AutoscalerConfig,
    state: AutoscalerState,
}

impl Autoscaler {
    /// Start at `initial_workers`, clamped into the configured bounds.
    pub fn new(config: AutoscalerConfig, initial_workers: usize) -> Result<Self> {
        config.validate()?;
        let current = initial_workers.clamp(config.min_workers, config.max_workers);
        Ok(Self {
            config,
            state: AutoscalerState {
                current_worker_count: current,
                last_scale_at: None,
                consecutive_high: 0,
                consecutive_low: 0,
                last_sequence: None,
                last_decision: ScaleDecision::Hold,
                last_scale_instant: None,
            },
        })
    }

    pub fn config(&self) -> &AutoscalerConfig {
        &self.config
    }

    pub fn state(&self) -> &AutoscalerState {
        &self.state
    }

    pub fn observe(&mut self, sample: &TelemetrySample, now: Instant) -> ScaleDecision {
        if self.state.last_sequence.is_some_and(|last| sample.sequence <= last) {
            return ScaleDecision::Ignored;
        }
        self.state.last_sequence = Some(sample.sequence);

        if sample.queue_depth > self.config.scale_up_threshold {
            self.state.consecutive_high = self.state.consecutive_high.saturating_add(1);
            self.state.consecutive_low = 0;
        } else if sample.queue_depth < self.config.scale_down_threshold {
            self.state.consecutive_low = self.state.consecutive_low.saturating_add(1);
            self.state.consecutive_high = 0;
        } else {
            self.state.consecutive_high = 0;
            self.state.consecutive_low = 0;
        }

        let decision = self.decide(now);
        if let Some(to) = decision.target() {
            self.record_scale(to, now);
            self.state.consecutive_high = 0;
            self.state.consecutive_low = 0;
        }
        self.state.last_decision = decision;
        decision
    }

    fn decide(&self, now: Instant) -> ScaleDecision {
        let cooling = self
            .state
            .last_scale_instant
            .is_some_and(|at| now.duration_since(at) < self.config.cooldown);
        if cooling {
            return ScaleDecision::Hold;
        }

        let current = self.state.current_worker_count;
        let needed = self.config.consecutive_samples;
        if self.state.consecutive_high >= needed && current < self.config.max_workers {
            let to = (current + self.config.scale_step).min(self.config.max_workers);
            return ScaleDecision::ScaleUp { from: current, to };
        }
        if self.state.consecutive_low >= needed && current > self.config.min_workers {
            let to = current
                .saturating_sub(self.config.scale_step)
                .max(self.config.min_workers);
            return ScaleDecision::ScaleDown { from: current, to };
        }
        ScaleDecision::Hold
    }

    /// Operator override. Rejected, with no state change, outside the bounds.
    pub fn manual_scale(&mut self, target: usize, now: Instant) -> bool {
        if !self.config.contains(target) {
            return false;
        }
        self.record_scale(target, now);
        true
    }

    /// Undo a scale the fleet could not apply. Only the worker count and
    /// scale timestamps are restored; the sample counters stay reset.
    pub fn revert_scale(&mut self, before: &AutoscalerState) {
        self.state.current_worker_count = before.current_worker_count;
        self.state.last_scale_at = before.last_scale_at;
        self.state.last_scale_instant = before.last_scale_instant;
    }

    fn record_scale(&mut self, to: usize, now: Instant) {
        self.state.current_worker_count = to;
        self.state.last_scale_at = Some(OffsetDateTime::now_utc());
        self.state.last_scale_instant = Some(now);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub queue_depth: usize,
    pub active_jobs: usize,
    pub live_workers: usize,
    pub failed_workers: usize,
}

impl From<&FleetSnapshot> for FleetStatus {
    fn from(snapshot: &FleetSnapshot) -> Self {
        Self {
            queue_depth: snapshot.queue_depth,
            active_jobs: snapshot.active_jobs,
            live_workers: snapshot.worker_count,
            failed_workers: snapshot.failed_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoscalerMetrics {
    pub config: AutoscalerConfig,
    pub state: AutoscalerState,
    pub status: FleetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartReport {
    pub success: bool,
    pub restarted: usize,
}

/// Periodic sampler that owns the worker count.
pub struct AutoscalerController {
    autoscaler: Mutex<Autoscaler>,
    fleet: Arc<dyn WorkerFleet>,
    queue: Arc<dyn JobQueue>,
    sequence: AtomicU64,
}

impl AutoscalerController {
    pub fn new(config: AutoscalerConfig, fleet: Arc<dyn WorkerFleet>, queue: Arc<dyn JobQueue>) -> Result<Self> {
        let autoscaler = Autoscaler::new(config, fleet.worker_count())?;
        let initial = autoscaler.state().current_worker_count;
        if initial != fleet.worker_count() {
            fleet.scale_to(initial)?;
        }
        Ok(Self {
            autoscaler: Mutex::new(autoscaler),
            fleet,
            queue,
            sequence: AtomicU64::new(0),
        })
    }

    fn autoscaler(&self) -> std::sync::MutexGuard<'_, Autoscaler> {
        self.autoscaler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take one sample and apply the resulting decision.
    pub fn tick(&self) -> ScaleDecision {
        let snapshot = self.fleet.inspect();
        let sample = TelemetrySample {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            queue_depth: self.queue.depth(),
            active_jobs: snapshot.active_jobs,
        };
        self.apply_sample(&sample)
    }

    /// Fold an externally taken sample. A repeated sequence number is a no-op.
    /// The recorded worker count only moves once the fleet accepts the
    /// resize; a rejected resize comes back as `ScaleFailed`.
    pub fn apply_sample(&self, sample: &TelemetrySample) -> ScaleDecision {
        let mut autoscaler = self.autoscaler();
        let before = autoscaler.state().clone();
        let decision = autoscaler.observe(sample, Instant::now());
        let Some(to) = decision.target() else {
            debug!(?decision, queue_depth = sample.queue_depth, "autoscaler sample");
            return decision;
        };

        match self.fleet.scale_to(to) {
            Ok(_) => {
                info!(?decision, queue_depth = sample.queue_depth, "autoscaler resized pool");
                decision
            }
            Err(e) => {
                warn!(error = %e, target = to, "autoscaler failed to resize pool");
                autoscaler.revert_scale(&before);
                let failed = ScaleDecision::ScaleFailed {
                    from: before.current_worker_count,
                    to,
                };
                autoscaler.state.last_decision = failed;
                failed
            }
        }
    }

    /// Validated operator scale request.
    pub fn request_manual_scale(&self, target: usize) -> bool {
        let mut autoscaler = self.autoscaler();
        let before = autoscaler.state().clone();
        let previous = before.current_worker_count;
        if !autoscaler.manual_scale(target, Instant::now()) {
            let config = autoscaler.config();
            warn!(target, min = config.min_workers, max = config.max_workers, "manual scale rejected");
            return false;
        }
        if let Err(e) = self.fleet.scale_to(target) {
            warn!(error = %e, target, "manual scale failed");
            autoscaler.revert_scale(&before);
            return false;
        }
        info!(from = previous, to = target, "manual scale applied");
        true
    }

    pub fn restart_failed_workers(&self) -> RestartReport {
        let restarted = self.fleet.restart_failed();
        let expected = self.autoscaler().state().current_worker_count;
        let live = self.fleet.worker_count();
        let success = live >= expected;
        if restarted > 0 || !success {
            info!(restarted, live, expected, success, "restarted failed workers");
        }
        RestartReport { success, restarted }
    }

    pub fn metrics(&self) -> AutoscalerMetrics {
        let snapshot = self.fleet.inspect();
        let autoscaler = self.autoscaler();
        AutoscalerMetrics {
            config: autoscaler.config().clone(),
            state: autoscaler.state().clone(),
            status: FleetStatus::from(&snapshot),
        }
    }

    /// Run the sampling loop until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.autoscaler().config().sample_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                self.restart_failed_workers();
                self.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AutoscalerConfig {
        AutoscalerConfig {
            min_workers: 2,
            max_workers: 6,
            scale_up_threshold: 10,
            scale_down_threshold: 2,
            scale_step: 1,
            consecutive_samples: 3,
            cooldown: Duration::ZERO,
            ..Default::default()
        }
    }

    fn sample(sequence: u64, queue_depth: usize) -> TelemetrySample {
        TelemetrySample {
            sequence,
            queue_depth,
            active_jobs: 0,
        }
    }

    #[test]
    fn test_steps_down_once_per_window_until_min() {
        let mut scaler = Autoscaler::new(config(), 5).unwrap();
        let now = Instant::now();
        let mut counts = Vec::new();
        for seq in 1..=15 {
            scaler.observe(&sample(seq, 0), now);
            counts.push(scaler.state().current_worker_count);
        }
        assert_eq!(counts, vec![5, 5, 4, 4, 4, 3, 3, 3, 2, 2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_scale_up_bounded_by_max() {
        let mut scaler = Autoscaler::new(config(), 5).unwrap();
        let now = Instant::now();
        for seq in 1..=9 {
            scaler.observe(&sample(seq, 50), now);
        }
        assert_eq!(scaler.state().current_worker_count, 6);
    }

    #[test]
    fn test_duplicate_sample_is_ignored() {
        let mut scaler = Autoscaler::new(config(), 4).unwrap();
        let now = Instant::now();
        assert_eq!(scaler.observe(&sample(1, 0), now), ScaleDecision::Hold);
        assert_eq!(scaler.observe(&sample(1, 0), now), ScaleDecision::Ignored);
        assert_eq!(scaler.state().consecutive_low, 1);
    }

    #[test]
    fn test_middle_band_resets_counters() {
        let mut scaler = Autoscaler::new(config(), 4).unwrap();
        let now = Instant::now();
        scaler.observe(&sample(1, 0), now);
        scaler.observe(&sample(2, 0), now);
        scaler.observe(&sample(3, 5), now);
        scaler.observe(&sample(4, 0), now);
        assert_eq!(scaler.state().current_worker_count, 4);
    }

    #[test]
    fn test_cooldown_holds() {
        let mut scaler = Autoscaler::new(
            AutoscalerConfig {
                cooldown: Duration::from_secs(600),
                consecutive_samples: 1,
                ..config()
            },
            4,
        )
        .unwrap();
        let now = Instant::now();
        assert_eq!(scaler.observe(&sample(1, 0), now), ScaleDecision::ScaleDown { from: 4, to: 3 });
        assert_eq!(scaler.observe(&sample(2, 0), now), ScaleDecision::Hold);
        let later = now + Duration::from_secs(601);
        assert_eq!(scaler.observe(&sample(3, 0), later), ScaleDecision::ScaleDown { from: 3, to: 2 });
    }

    #[test]
    fn test_manual_scale_bounds() {
        let mut scaler = Autoscaler::new(config(), 4).unwrap();
        let now = Instant::now();
        assert!(!scaler.manual_scale(1, now));
        assert_eq!(scaler.state().current_worker_count, 4);
        assert!(scaler.state().last_scale_at.is_none());
        assert!(!scaler.manual_scale(7, now));
        assert!(scaler.manual_scale(6, now));
        assert_eq!(scaler.state().current_worker_count, 6);
    }

    #[test]
    fn test_revert_scale_restores_count_and_timestamps() {
        let mut scaler = Autoscaler::new(AutoscalerConfig { consecutive_samples: 1, ..config() }, 4).unwrap();
        let before = scaler.state().clone();
        let decision = scaler.observe(&sample(1, 0), Instant::now());
        assert_eq!(decision, ScaleDecision::ScaleDown { from: 4, to: 3 });

        scaler.revert_scale(&before);
        assert_eq!(scaler.state().current_worker_count, 4);
        assert!(scaler.state().last_scale_at.is_none());
        assert_eq!(scaler.state().last_sequence, Some(1));
    }

    #[test]
    fn test_invalid_config() {
        let bad = AutoscalerConfig {
            min_workers: 5,
            max_workers: 2,
            ..Default::default()
        };
        assert!(Autoscaler::new(bad, 3).is_err());
    }
}
