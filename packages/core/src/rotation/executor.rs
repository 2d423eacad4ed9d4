//! Rotation executor.
//!
//! [`RotationExecutor::rotate`] advances one test by exactly one step:
//! push the next variant's title to the platform, then apply the
//! activation/deactivation/log writes as one transaction. Running out of
//! variants (or passing the end date) is the normal termination path and
//! builds the variant summaries the winner selector reads.
//!
//! Callers are responsible for serialization: the scheduler holds a
//! per-test lock around every invocation, so at most one rotate per test
//! is ever in flight.

use std::sync::Arc;

use chrono::Utc;

use crate::gateway::PlatformGateway;
use crate::metrics::AppMetrics;
use crate::repository::{RotationWrite, TestRepository};
use crate::rotation::error::RotationError;
use crate::rotation::types::{PauseReason, TestStatus, TitleTest, TitleVariant};

/// What a single rotate attempt did; the scheduler reacts to this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The next variant is live; arm its analytics poll.
    Advanced { variant_id: i64 },
    /// No variants remain (or the end date passed); timers must stop.
    Completed,
    /// The test is not in a rotatable state; nothing happened.
    Skipped,
    /// Transient failure; the existing recurring timer retries naturally.
    RetryLater,
    /// Re-authorization required; the test was auto-paused.
    AuthPaused,
}

pub struct RotationExecutor {
    repo: Arc<TestRepository>,
    gateway: Arc<dyn PlatformGateway>,
    metrics: Arc<AppMetrics>,
}

impl RotationExecutor {
    pub fn new(
        repo: Arc<TestRepository>,
        gateway: Arc<dyn PlatformGateway>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            repo,
            gateway,
            metrics,
        }
    }

    /// Advance `test_id` by one variant.
    ///
    /// Only `Persistence` failures surface as `Err`; platform failures
    /// are folded into the outcome so the scheduler can keep one test's
    /// trouble away from every other test's timers.
    pub async fn rotate(&self, test_id: i64) -> Result<RotationOutcome, RotationError> {
        self.metrics.rotations_total.inc();

        let Some(test) = self.repo.fetch_test(test_id).await? else {
            tracing::warn!("Rotation fired for unknown test {}", test_id);
            return Ok(RotationOutcome::Skipped);
        };

        // A stray timer firing against a paused/terminal test is a no-op.
        if test.status != TestStatus::Active {
            tracing::debug!(
                "Skipping rotation for test {} in state {}",
                test_id,
                test.status.as_str()
            );
            return Ok(RotationOutcome::Skipped);
        }

        let now = Utc::now();
        if let Some(end_date) = test.end_date {
            if now >= end_date {
                tracing::info!("Test {} reached its end date; completing", test_id);
                return self.complete(&test).await;
            }
        }

        let variants = self.repo.fetch_variants(test_id).await?;
        let next_order = test.current_variant_index.map(|i| i + 1).unwrap_or(0);

        let Some(next) = variants.iter().find(|v| v.order == next_order) else {
            tracing::info!(
                "Test {} exhausted all {} variants; completing",
                test_id,
                variants.len()
            );
            return self.complete(&test).await;
        };

        match self
            .gateway
            .push_title(&test.account_id, &test.item_id, &next.text)
            .await
        {
            Ok(()) => {}
            Err(RotationError::ReauthorizationRequired { .. }) => {
                tracing::error!(
                    "Platform rejected credentials for test {}; pausing until re-authorized",
                    test_id
                );
                self.repo
                    .transition_status(test_id, TestStatus::Paused, Some(PauseReason::ReauthRequired))
                    .await?;
                self.metrics.auth_pauses_total.inc();
                return Ok(RotationOutcome::AuthPaused);
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    "Transient platform failure rotating test {}; retrying next tick: {}",
                    test_id,
                    err
                );
                self.metrics.rotation_errors_total.inc();
                return Ok(RotationOutcome::RetryLater);
            }
            Err(err) => {
                self.metrics.rotation_errors_total.inc();
                return Err(err);
            }
        }

        // Title is live on the platform; record the swap atomically.
        let previous = variants.iter().find(|v| v.is_active);
        let (duration_minutes, views_at_rotation, ctr_at_rotation) =
            self.previous_variant_figures(previous, now).await?;

        self.repo
            .apply_rotation(&RotationWrite {
                test_id,
                next_variant_id: next.id,
                next_order,
                rotated_at: now,
                duration_minutes,
                views_at_rotation,
                ctr_at_rotation,
            })
            .await?;

        tracing::info!(
            "Test {} rotated to variant {} (order {})",
            test_id,
            next.id,
            next_order
        );

        Ok(RotationOutcome::Advanced { variant_id: next.id })
    }

    /// Duration and latest known figures for the variant being retired.
    /// All zeroes on the very first activation.
    async fn previous_variant_figures(
        &self,
        previous: Option<&TitleVariant>,
        now: chrono::DateTime<Utc>,
    ) -> Result<(i64, i64, f64), RotationError> {
        let Some(previous) = previous else {
            return Ok((0, 0, 0.0));
        };

        let duration_minutes = previous
            .activated_at
            .map(|t| (now - t).num_minutes().max(0))
            .unwrap_or(0);

        let (views, ctr) = match self.repo.latest_poll(previous.id).await? {
            Some(poll) => (poll.views, poll.ctr),
            None => (0, 0.0),
        };

        Ok((duration_minutes, views, ctr))
    }

    /// Normal termination: mark completed and freeze per-variant
    /// summaries from the poll history. The guarded transition makes
    /// this idempotent; a duplicate completion attempt writes nothing.
    async fn complete(&self, test: &TitleTest) -> Result<RotationOutcome, RotationError> {
        let transitioned = self
            .repo
            .transition_status(test.id, TestStatus::Completed, None)
            .await?;
        if !transitioned {
            return Ok(RotationOutcome::Skipped);
        }

        let variants = self.repo.fetch_variants(test.id).await?;
        for variant in variants.iter().filter(|v| v.activated_at.is_some()) {
            let (views, impressions, ctr, avg_duration) =
                match self.repo.latest_poll(variant.id).await? {
                    Some(poll) => (
                        poll.views,
                        poll.impressions,
                        poll.ctr,
                        poll.average_view_duration,
                    ),
                    None => (0, 0, 0.0, 0.0),
                };
            self.repo
                .insert_summary(variant.id, views, impressions, ctr, avg_duration)
                .await?;
        }

        self.metrics.tests_completed_total.inc();
        tracing::info!("Test {} completed", test.id);
        Ok(RotationOutcome::Completed)
    }
}
