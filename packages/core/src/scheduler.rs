//! Rotation scheduler.
//!
//! Owns every timer in the process: one recurring rotation timer per
//! scheduled test and at most one in-flight poll timer per variant,
//! each a lightweight tokio task. There is no global tick; every test
//! keeps its own cadence, and a slow platform call for one test never
//! delays another test's timer.
//!
//! Mutual exclusion: every rotation for a test (scheduled or manual)
//! runs under that test's async lock, so exactly one rotate is in
//! flight per test at a time. Cancellation only aborts timer loops;
//! an in-flight rotation holds the lock and completes.
//!
//! A periodic sweep removes timers whose test is terminal or gone from
//! storage, covering external status changes that bypassed
//! [`Scheduler::cancel_test`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::metrics::AppMetrics;
use crate::repository::TestRepository;
use crate::rotation::executor::{RotationExecutor, RotationOutcome};
use crate::rotation::poller::{next_poll_delay, AnalyticsPoller, PollCadence, PollOutcome};

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct PollTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    repo: Arc<TestRepository>,
    executor: Arc<RotationExecutor>,
    poller: Arc<AnalyticsPoller>,
    metrics: Arc<AppMetrics>,
    cadence: PollCadence,
    rotation_timers: Mutex<HashMap<i64, JoinHandle<()>>>,
    poll_timers: Mutex<HashMap<i64, PollTimer>>,
    test_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    poll_generation: AtomicU64,
}

impl Scheduler {
    pub fn new(
        repo: Arc<TestRepository>,
        executor: Arc<RotationExecutor>,
        poller: Arc<AnalyticsPoller>,
        cadence: PollCadence,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                repo,
                executor,
                poller,
                metrics,
                cadence,
                rotation_timers: Mutex::new(HashMap::new()),
                poll_timers: Mutex::new(HashMap::new()),
                test_locks: Mutex::new(HashMap::new()),
                poll_generation: AtomicU64::new(0),
            }),
        }
    }

    /// (Re)establish the recurring rotation timer for a test, replacing
    /// any existing timer for the same id. A non-positive interval is a
    /// misconfiguration: logged, and the test is simply not scheduled.
    pub fn schedule_test(&self, test_id: i64, interval_minutes: i64) {
        if interval_minutes <= 0 {
            tracing::warn!(
                "Refusing to schedule test {} with interval {} minutes",
                test_id,
                interval_minutes
            );
            return;
        }

        let interval = Duration::from_secs(interval_minutes as u64 * 60);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                // Each tick runs in its own task so aborting the timer
                // loop never kills a rotation mid-flight.
                let tick = inner.clone();
                tokio::spawn(async move {
                    SchedulerInner::run_rotation(&tick, test_id).await;
                });
            }
        });

        let mut timers = self
            .inner
            .rotation_timers
            .lock()
            .expect("rotation timer lock poisoned");
        if let Some(old) = timers.insert(test_id, handle) {
            old.abort();
        }
        self.inner.metrics.rotation_timers.set(timers.len() as f64);
        tracing::info!(
            "Scheduled test {} every {} minutes",
            test_id,
            interval_minutes
        );
    }

    /// Stop and remove all timers for a test. No-op when none exist.
    /// In-flight operations complete; they just re-arm nothing.
    pub async fn cancel_test(&self, test_id: i64) {
        self.inner.cancel_test_timers(test_id).await;
    }

    /// Disarm only the rotation timer (used on pause; poll timers stay
    /// on their idle burn until the test leaves `paused`).
    pub fn cancel_rotation(&self, test_id: i64) {
        self.inner.cancel_rotation_timer(test_id);
    }

    /// Run one rotation now, out of band. Fire-and-forget: the next
    /// scheduled tick is not disturbed, and the outcome is observable
    /// through the test/rotation-log state afterwards.
    pub fn trigger_manual_rotation(&self, test_id: i64) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            SchedulerInner::run_rotation(&inner, test_id).await;
        });
    }

    /// Arm (or replace) the one-shot poll timer for a variant. The
    /// timer re-arms itself through [`next_poll_delay`] until that
    /// function returns `None`.
    pub fn schedule_poll(&self, variant_id: i64, delay: Duration) {
        SchedulerInner::schedule_poll(&self.inner, variant_id, delay);
    }

    /// Re-arm timers for everything marked active in storage. Called at
    /// startup so a process restart does not strand running campaigns.
    pub async fn resume_active_tests(&self) -> Result<(), sqlx::Error> {
        let tests = self.inner.repo.active_tests().await?;
        for test in &tests {
            self.schedule_test(test.id, test.rotation_interval_minutes);
        }

        let variants = self.inner.repo.active_variants().await?;
        for variant in &variants {
            SchedulerInner::schedule_poll(&self.inner, variant.id, self.inner.cadence.active);
        }

        tracing::info!(
            "Resumed {} active tests and {} poll timers from storage",
            tests.len(),
            variants.len()
        );
        Ok(())
    }

    /// Drop timers whose test is terminal or missing in storage.
    pub async fn run_sweep(&self) {
        let inner = &self.inner;

        let test_ids: Vec<i64> = {
            let timers = inner
                .rotation_timers
                .lock()
                .expect("rotation timer lock poisoned");
            timers.keys().copied().collect()
        };
        for test_id in test_ids {
            let keep = match inner.repo.fetch_test(test_id).await {
                Ok(Some(test)) => !test.status.is_terminal(),
                Ok(None) => false,
                // Storage hiccup: leave the timer, the next sweep retries.
                Err(err) => {
                    tracing::warn!("Sweep could not load test {}: {}", test_id, err);
                    true
                }
            };
            if !keep {
                inner.cancel_rotation_timer(test_id);
                tracing::info!("Sweep removed stale rotation timer for test {}", test_id);
            }
        }

        let variant_ids: Vec<i64> = {
            let timers = inner.poll_timers.lock().expect("poll timer lock poisoned");
            timers.keys().copied().collect()
        };
        for variant_id in variant_ids {
            let keep = match inner.poll_target_alive(variant_id).await {
                Ok(alive) => alive,
                Err(err) => {
                    tracing::warn!("Sweep could not load variant {}: {}", variant_id, err);
                    true
                }
            };
            if !keep {
                inner.remove_poll_timer_unconditionally(variant_id);
                tracing::info!("Sweep removed stale poll timer for variant {}", variant_id);
            }
        }
    }

    /// Spawn the recurring sweep task.
    pub fn spawn_sweep(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                self.run_sweep().await;
            }
        })
    }

    /// Abort every timer. Used on shutdown.
    pub fn shutdown(&self) {
        let mut rotation = self
            .inner
            .rotation_timers
            .lock()
            .expect("rotation timer lock poisoned");
        for (_, handle) in rotation.drain() {
            handle.abort();
        }
        self.inner.metrics.rotation_timers.set(0.0);

        let mut polls = self
            .inner
            .poll_timers
            .lock()
            .expect("poll timer lock poisoned");
        for (_, timer) in polls.drain() {
            timer.handle.abort();
        }
        self.inner.metrics.poll_timers.set(0.0);

        tracing::info!("Scheduler shut down; all timers disarmed");
    }

    /// (rotation, poll) timer counts, for sweeps tests and diagnostics.
    pub fn timer_counts(&self) -> (usize, usize) {
        let rotation = self
            .inner
            .rotation_timers
            .lock()
            .expect("rotation timer lock poisoned")
            .len();
        let polls = self
            .inner
            .poll_timers
            .lock()
            .expect("poll timer lock poisoned")
            .len();
        (rotation, polls)
    }
}

impl SchedulerInner {
    /// One serialized rotation for `test_id`, reacting to the outcome.
    async fn run_rotation(inner: &Arc<Self>, test_id: i64) {
        let lock = inner.test_lock(test_id);
        let _guard = lock.lock().await;

        match inner.executor.rotate(test_id).await {
            Ok(RotationOutcome::Advanced { variant_id }) => {
                SchedulerInner::schedule_poll(inner, variant_id, inner.cadence.active);
            }
            Ok(RotationOutcome::Completed) => {
                inner.cancel_test_timers(test_id).await;
            }
            Ok(RotationOutcome::AuthPaused) => {
                inner.cancel_rotation_timer(test_id);
            }
            // Transient trouble or a no-op tick: the recurring timer
            // stays armed and the next tick retries naturally.
            Ok(RotationOutcome::RetryLater) | Ok(RotationOutcome::Skipped) => {}
            Err(err) => {
                // One test's failure never reaches another test's timers.
                tracing::error!("Rotation for test {} failed: {}", test_id, err);
            }
        }
    }

    fn schedule_poll(this: &Arc<Self>, variant_id: i64, initial_delay: Duration) {
        let generation = this.poll_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = this.clone();
        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                time::sleep(delay).await;
                let outcome = match inner.poller.poll(variant_id).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::error!("Poll for variant {} failed: {}", variant_id, err);
                        PollOutcome::Failed
                    }
                };
                match next_poll_delay(outcome, inner.cadence) {
                    Some(next) => delay = next,
                    None => break,
                }
            }
            inner.remove_poll_timer(variant_id, generation);
        });

        let mut timers = this.poll_timers.lock().expect("poll timer lock poisoned");
        if let Some(old) = timers.insert(variant_id, PollTimer { generation, handle }) {
            old.handle.abort();
        }
        this.metrics.poll_timers.set(timers.len() as f64);
    }

    fn cancel_rotation_timer(&self, test_id: i64) {
        let mut timers = self
            .rotation_timers
            .lock()
            .expect("rotation timer lock poisoned");
        if let Some(handle) = timers.remove(&test_id) {
            handle.abort();
        }
        self.metrics.rotation_timers.set(timers.len() as f64);
    }

    async fn cancel_test_timers(&self, test_id: i64) {
        self.cancel_rotation_timer(test_id);

        match self.repo.fetch_variants(test_id).await {
            Ok(variants) => {
                for variant in variants {
                    self.remove_poll_timer_unconditionally(variant.id);
                }
            }
            Err(err) => {
                // The sweep catches whatever this leaves behind.
                tracing::warn!(
                    "Could not enumerate variants of test {} for timer cleanup: {}",
                    test_id,
                    err
                );
            }
        }
    }

    /// Remove a poll timer entry, but only if it still belongs to the
    /// task that finished: a newer timer for the same variant must not
    /// be evicted by its predecessor's cleanup.
    fn remove_poll_timer(&self, variant_id: i64, generation: u64) {
        let mut timers = self.poll_timers.lock().expect("poll timer lock poisoned");
        if timers
            .get(&variant_id)
            .map(|t| t.generation == generation)
            .unwrap_or(false)
        {
            timers.remove(&variant_id);
        }
        self.metrics.poll_timers.set(timers.len() as f64);
    }

    fn remove_poll_timer_unconditionally(&self, variant_id: i64) {
        let mut timers = self.poll_timers.lock().expect("poll timer lock poisoned");
        if let Some(timer) = timers.remove(&variant_id) {
            timer.handle.abort();
        }
        self.metrics.poll_timers.set(timers.len() as f64);
    }

    /// `true` while the variant and its test still warrant a poll timer.
    async fn poll_target_alive(&self, variant_id: i64) -> Result<bool, sqlx::Error> {
        let Some(variant) = self.repo.fetch_variant(variant_id).await? else {
            return Ok(false);
        };
        let Some(test) = self.repo.fetch_test(variant.test_id).await? else {
            return Ok(false);
        };
        Ok(!test.status.is_terminal())
    }

    fn test_lock(&self, test_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.test_locks.lock().expect("test lock map poisoned");
        locks
            .entry(test_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
