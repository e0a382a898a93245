//! Periodic health probing
//!
//! Each worker is probed by its own task so a slow account never delays the
//! others. Probe failures only move the worker's health state; they are never
//! returned to callers.

use std::sync::Arc;
use std::time::Duration;
use tgstore_core::PoolConfig;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pool::WorkerPool;
use crate::worker::{HealthState, Worker};

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
}

impl From<&PoolConfig> for ProbeSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            interval: config.health_probe_interval,
            timeout: config.health_probe_timeout,
            failure_threshold: config.health_failure_threshold.max(1),
        }
    }
}

pub struct HealthProber {
    pool: Arc<WorkerPool>,
    settings: ProbeSettings,
}

/// Running probe tasks
pub struct ProberHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ProberHandle {
    /// Stop every probe task and wait for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("Health prober stopped");
    }
}

impl HealthProber {
    pub fn new(pool: Arc<WorkerPool>, settings: ProbeSettings) -> Self {
        Self { pool, settings }
    }

    /// Probe one worker once and record the outcome.
    pub async fn probe(&self, worker: &Worker) -> HealthState {
        probe_worker(worker, &self.settings).await
    }

    /// Probe every worker concurrently, once.
    pub async fn probe_all(&self) {
        let probes = self
            .pool
            .all()
            .iter()
            .map(|worker| probe_worker(worker, &self.settings));
        futures::future::join_all(probes).await;

        tracing::info!(
            healthy = self.pool.healthy().len(),
            total = self.pool.len(),
            "Initial health probe complete"
        );
    }

    /// Spawn one probe loop per worker; the first tick fires immediately.
    pub fn start(&self) -> ProberHandle {
        let token = CancellationToken::new();
        let tasks = self
            .pool
            .all()
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                let settings = self.settings.clone();
                let token = token.clone();
                tokio::spawn(async move { probe_loop(worker, settings, token).await })
            })
            .collect();

        tracing::info!(
            workers = self.pool.len(),
            interval_secs = self.settings.interval.as_secs(),
            timeout_secs = self.settings.timeout.as_secs(),
            failure_threshold = self.settings.failure_threshold,
            "Health prober started"
        );

        ProberHandle { token, tasks }
    }
}

async fn probe_loop(worker: Arc<Worker>, settings: ProbeSettings, token: CancellationToken) {
    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = probe_worker(&worker, &settings) => {}
                }
            }
        }
    }

    tracing::debug!(worker = %worker.name(), "Probe loop exited");
}

async fn probe_worker(worker: &Worker, settings: &ProbeSettings) -> HealthState {
    let outcome = match timeout(settings.timeout, worker.client().get_me()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "Probe timed out after {}s",
            settings.timeout.as_secs_f32()
        )),
    };

    match outcome {
        Ok(()) => {
            let (previous, current) = worker.record_probe_success();
            if previous != HealthState::Healthy {
                tracing::info!(
                    worker = %worker.name(),
                    previous = ?previous,
                    "Worker is healthy"
                );
            }
            current
        }
        Err(error) => {
            let (previous, current) =
                worker.record_probe_failure(error.clone(), settings.failure_threshold);
            let failures = worker.health().consecutive_failures;
            if current == HealthState::Unhealthy && previous != HealthState::Unhealthy {
                tracing::warn!(
                    worker = %worker.name(),
                    consecutive_failures = failures,
                    error = %error,
                    "Worker marked unhealthy"
                );
            } else {
                tracing::debug!(
                    worker = %worker.name(),
                    consecutive_failures = failures,
                    state = ?current,
                    error = %error,
                    "Health probe failed"
                );
            }
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, ProbeBehavior};
    use std::sync::atomic::Ordering;

    fn settings(threshold: u32) -> ProbeSettings {
        ProbeSettings {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(50),
            failure_threshold: threshold,
        }
    }

    fn pool_with(fakes: &[Arc<FakePlatform>]) -> Arc<WorkerPool> {
        let workers = fakes
            .iter()
            .enumerate()
            .map(|(i, fake)| Worker::new(format!("bot-{}", i + 1), fake.clone(), 2))
            .collect();
        Arc::new(WorkerPool::new(workers).unwrap())
    }

    #[tokio::test]
    async fn test_probe_debounces_failures() {
        let fake = Arc::new(FakePlatform::default());
        let pool = pool_with(&[fake.clone()]);
        let prober = HealthProber::new(pool.clone(), settings(3));
        let worker = pool.all()[0].clone();

        assert_eq!(prober.probe(&worker).await, HealthState::Healthy);

        fake.set_probe(ProbeBehavior::Unauthorized);
        assert_eq!(prober.probe(&worker).await, HealthState::Healthy);
        assert_eq!(prober.probe(&worker).await, HealthState::Healthy);
        assert_eq!(prober.probe(&worker).await, HealthState::Unhealthy);

        fake.set_probe(ProbeBehavior::Reachable);
        assert_eq!(prober.probe(&worker).await, HealthState::Healthy);
        assert_eq!(worker.health().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let fake = Arc::new(FakePlatform::default());
        fake.set_probe(ProbeBehavior::Hang);
        let pool = pool_with(&[fake.clone()]);
        let prober = HealthProber::new(pool.clone(), settings(1));

        let state = prober.probe(&pool.all()[0]).await;
        assert_eq!(state, HealthState::Unhealthy);
        let health = pool.all()[0].health();
        assert!(health.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_probe_all_marks_each_worker() {
        let up = Arc::new(FakePlatform::default());
        let down = Arc::new(FakePlatform::default());
        down.set_probe(ProbeBehavior::Unauthorized);
        let pool = pool_with(&[up, down]);

        HealthProber::new(pool.clone(), settings(1)).probe_all().await;

        assert_eq!(pool.all()[0].state(), HealthState::Healthy);
        assert_eq!(pool.all()[1].state(), HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_slow_worker_does_not_delay_others() {
        let slow = Arc::new(FakePlatform::default());
        slow.set_probe(ProbeBehavior::Hang);
        let fast = Arc::new(FakePlatform::default());
        let pool = pool_with(&[slow, fast.clone()]);

        let mut slow_settings = settings(3);
        slow_settings.timeout = Duration::from_secs(5);
        let handle = HealthProber::new(pool.clone(), slow_settings).start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fast.counters.get_me.load(Ordering::SeqCst) >= 3);
        assert_eq!(pool.all()[1].state(), HealthState::Healthy);
        assert_eq!(pool.all()[0].state(), HealthState::Unknown);

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("prober shutdown hung");
    }

    #[tokio::test]
    async fn test_shutdown_stops_probing() {
        let fake = Arc::new(FakePlatform::default());
        let pool = pool_with(&[fake.clone()]);
        let handle = HealthProber::new(pool, settings(3)).start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
        let after_shutdown = fake.counters.get_me.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fake.counters.get_me.load(Ordering::SeqCst), after_shutdown);
    }
}
