//! Worker selection with per-worker admission control
//!
//! A strategy only orders the candidates. The selector then reserves a slot
//! on the first candidate that still has budget, so the strategy never has to
//! reason about concurrency.

use rand::seq::SliceRandom;
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tgstore_core::SelectionStrategyKind;

use crate::error::{StorageError, StorageResult};
use crate::pool::WorkerPool;
use crate::worker::Worker;

pub trait SelectionStrategy: Send + Sync + Debug {
    /// Sort `candidates` by preference, most preferred first.
    fn rank(&self, candidates: &mut [Arc<Worker>]);

    fn name(&self) -> &'static str;
}

/// Least recently handed out first; never-used workers in configuration order.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl SelectionStrategy for RoundRobin {
    fn rank(&self, candidates: &mut [Arc<Worker>]) {
        candidates.sort_by_cached_key(|w| w.last_selected());
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Fewest outstanding requests first, then least recently used.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn rank(&self, candidates: &mut [Arc<Worker>]) {
        candidates.sort_by_cached_key(|w| (w.in_flight(), w.last_selected()));
    }

    fn name(&self) -> &'static str {
        "least_loaded"
    }
}

#[derive(Debug, Default)]
pub struct RandomPick;

impl SelectionStrategy for RandomPick {
    fn rank(&self, candidates: &mut [Arc<Worker>]) {
        candidates.shuffle(&mut rand::rng());
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

pub fn strategy_for(kind: SelectionStrategyKind) -> Box<dyn SelectionStrategy> {
    match kind {
        SelectionStrategyKind::RoundRobin => Box::new(RoundRobin),
        SelectionStrategyKind::LeastLoaded => Box::new(LeastLoaded),
        SelectionStrategyKind::Random => Box::new(RandomPick),
    }
}

/// Reservation of one slot of a worker's budget, released on drop.
#[derive(Debug)]
pub struct WorkerLease {
    worker: Arc<Worker>,
}

impl WorkerLease {
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }
}

impl Deref for WorkerLease {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.worker.release();
    }
}

#[derive(Debug)]
pub struct BackendSelector {
    pool: Arc<WorkerPool>,
    strategy: Box<dyn SelectionStrategy>,
    clock: AtomicU64,
}

impl BackendSelector {
    pub fn new(pool: Arc<WorkerPool>, strategy: Box<dyn SelectionStrategy>) -> Self {
        Self {
            pool,
            strategy,
            clock: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Lease a healthy worker with spare budget. Never blocks.
    pub fn select(&self) -> StorageResult<WorkerLease> {
        self.select_where(|_| true)
    }

    /// Like `select`, but never hands out the worker named `excluded`.
    pub fn select_excluding(&self, excluded: &str) -> StorageResult<WorkerLease> {
        self.select_where(|worker| worker.name() != excluded)
    }

    fn select_where(&self, allow: impl Fn(&Worker) -> bool) -> StorageResult<WorkerLease> {
        let mut candidates: Vec<Arc<Worker>> = self
            .pool
            .healthy()
            .into_iter()
            .filter(|w| allow(w) && w.in_flight() < w.budget())
            .collect();
        self.strategy.rank(&mut candidates);

        for worker in candidates {
            if worker.try_acquire() {
                let stamp = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
                worker.mark_selected(stamp);
                tracing::trace!(
                    worker = %worker.name(),
                    in_flight = worker.in_flight(),
                    strategy = self.strategy.name(),
                    "Worker leased"
                );
                return Ok(WorkerLease { worker });
            }
        }

        tracing::warn!(
            total = self.pool.len(),
            healthy = self.pool.healthy().len(),
            "No healthy worker with spare budget"
        );
        Err(StorageError::NoHealthyBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn healthy_pool(names: &[&str], budget: usize) -> Arc<WorkerPool> {
        let workers = names
            .iter()
            .map(|name| {
                let worker = Worker::new(*name, Arc::new(FakePlatform::default()), budget);
                worker.record_probe_success();
                worker
            })
            .collect();
        Arc::new(WorkerPool::new(workers).unwrap())
    }

    #[test]
    fn test_round_robin_cycles_in_configuration_order() {
        let selector = BackendSelector::new(healthy_pool(&["a", "b", "c"], 1), Box::new(RoundRobin));
        let picked: Vec<String> = (0..6)
            .map(|_| selector.select().unwrap().name().to_string())
            .collect();
        assert_eq!(picked, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_skips_workers_at_budget() {
        let selector = BackendSelector::new(healthy_pool(&["a", "b"], 1), Box::new(RoundRobin));
        let first = selector.select().unwrap();
        let second = selector.select().unwrap();
        assert_ne!(first.name(), second.name());
        assert!(matches!(
            selector.select(),
            Err(StorageError::NoHealthyBackend)
        ));

        drop(first);
        let third = selector.select().unwrap();
        assert_eq!(third.in_flight(), 1);
    }

    #[test]
    fn test_unhealthy_workers_are_never_selected() {
        let pool = healthy_pool(&["a", "b"], 4);
        pool.get("a").unwrap().record_probe_failure("down".into(), 1);
        let selector = BackendSelector::new(pool.clone(), Box::new(RoundRobin));
        for _ in 0..4 {
            assert_eq!(selector.select().unwrap().name(), "b");
        }

        pool.get("b").unwrap().record_probe_failure("down".into(), 1);
        assert!(matches!(
            selector.select(),
            Err(StorageError::NoHealthyBackend)
        ));
    }

    #[test]
    fn test_unknown_workers_are_not_selectable() {
        let workers = vec![Worker::new("fresh", Arc::new(FakePlatform::default()), 2)];
        let selector = BackendSelector::new(
            Arc::new(WorkerPool::new(workers).unwrap()),
            Box::new(RoundRobin),
        );
        assert!(matches!(
            selector.select(),
            Err(StorageError::NoHealthyBackend)
        ));
    }

    #[test]
    fn test_select_excluding() {
        let selector = BackendSelector::new(healthy_pool(&["a", "b"], 2), Box::new(RoundRobin));
        for _ in 0..3 {
            assert_eq!(selector.select_excluding("a").unwrap().name(), "b");
        }

        let single = BackendSelector::new(healthy_pool(&["only"], 2), Box::new(RoundRobin));
        assert!(single.select_excluding("only").is_err());
    }

    #[test]
    fn test_least_loaded_prefers_idle_worker() {
        let selector = BackendSelector::new(healthy_pool(&["a", "b"], 4), Box::new(LeastLoaded));
        let _held_a = selector.select().unwrap();
        let _held_b = selector.select().unwrap();
        let _held_a2 = selector.select().unwrap();
        // a: 2, b: 1
        assert_eq!(selector.select().unwrap().name(), "b");
    }

    #[test]
    fn test_random_pick_only_returns_healthy() {
        let pool = healthy_pool(&["a", "b", "c"], 4);
        pool.get("c").unwrap().record_probe_failure("down".into(), 1);
        let selector = BackendSelector::new(pool, strategy_for(SelectionStrategyKind::Random));
        for _ in 0..20 {
            assert_ne!(selector.select().unwrap().name(), "c");
        }
    }

    #[test]
    fn test_ranking_large_pool_under_concurrent_selection() {
        let names: Vec<String> = (0..48).map(|i| format!("bot-{}", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let pool = healthy_pool(&names, 2);

        for strategy in [
            SelectionStrategyKind::RoundRobin,
            SelectionStrategyKind::LeastLoaded,
        ] {
            let selector = BackendSelector::new(pool.clone(), strategy_for(strategy));
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        for _ in 0..500 {
                            let _lease = selector.select();
                        }
                    });
                }
            });
            for worker in pool.all() {
                assert_eq!(worker.in_flight(), 0);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_selection_never_exceeds_budget() {
        let budget = 3;
        let selector = Arc::new(BackendSelector::new(
            healthy_pool(&["a", "b", "c"], budget),
            Box::new(RoundRobin),
        ));
        let peaks: Arc<HashMap<String, AtomicUsize>> = Arc::new(
            ["a", "b", "c"]
                .iter()
                .map(|n| (n.to_string(), AtomicUsize::new(0)))
                .collect(),
        );
        let rejected = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let selector = selector.clone();
                let peaks = peaks.clone();
                let rejected = rejected.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        match selector.select() {
                            Ok(lease) => {
                                let now = lease.in_flight();
                                peaks[lease.name()].fetch_max(now, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(1)).await;
                            }
                            Err(StorageError::NoHealthyBackend) => {
                                rejected.fetch_add(1, Ordering::SeqCst);
                                tokio::task::yield_now().await;
                            }
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        for (name, peak) in peaks.iter() {
            let peak = peak.load(Ordering::SeqCst);
            assert!(peak <= budget, "{} reached {} > {}", name, peak, budget);
        }
        assert!(rejected.load(Ordering::SeqCst) > 0);
        for worker in selector.pool().all() {
            assert_eq!(worker.in_flight(), 0);
        }
    }
}
