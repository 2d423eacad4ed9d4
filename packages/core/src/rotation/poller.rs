//! Analytics poller.
//!
//! [`AnalyticsPoller::poll`] fetches current metrics for a variant's
//! item (scoped to the window since activation) and appends one
//! [`AnalyticsPoll`] row. A failed platform call records nothing, so poll
//! rows reflect only real observations.
//!
//! Re-arming is modelled as an explicit transition function,
//! [`next_poll_delay`], instead of callbacks rescheduling themselves:
//! the scheduler feeds each outcome through it and either sleeps for the
//! returned delay or lets the timer die on a terminal state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::gateway::PlatformGateway;
use crate::metrics::AppMetrics;
use crate::repository::TestRepository;
use crate::rotation::error::RotationError;
use crate::rotation::types::TestStatus;

/// Outcome of one poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// One observation appended.
    Recorded,
    /// Variant superseded or test paused; keep the timer on a slow burn.
    Idle,
    /// Test is completed/cancelled; the timer must not re-arm.
    TestTerminal,
    /// Variant (or its test) vanished from storage; stop polling it.
    MissingVariant,
    /// Platform call failed; no row written, try again next cycle.
    Failed,
}

/// Poll intervals for the two live states.
#[derive(Debug, Clone, Copy)]
pub struct PollCadence {
    /// Delay between observations of an active variant.
    pub active: Duration,
    /// Slow-burn delay while the variant or test idles, so paused tests
    /// do not burn quota.
    pub idle: Duration,
}

/// `(outcome) -> next delay`. `None` means the poll timer terminates.
pub fn next_poll_delay(outcome: PollOutcome, cadence: PollCadence) -> Option<Duration> {
    match outcome {
        PollOutcome::Recorded | PollOutcome::Failed => Some(cadence.active),
        PollOutcome::Idle => Some(cadence.idle),
        PollOutcome::TestTerminal | PollOutcome::MissingVariant => None,
    }
}

pub struct AnalyticsPoller {
    repo: Arc<TestRepository>,
    gateway: Arc<dyn PlatformGateway>,
    metrics: Arc<AppMetrics>,
}

impl AnalyticsPoller {
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

    /// Observe `variant_id` once. Persistence failures surface as `Err`;
    /// platform failures degrade to [`PollOutcome::Failed`].
    pub async fn poll(&self, variant_id: i64) -> Result<PollOutcome, RotationError> {
        self.metrics.polls_total.inc();

        let Some(variant) = self.repo.fetch_variant(variant_id).await? else {
            tracing::warn!("Poll fired for unknown variant {}", variant_id);
            return Ok(PollOutcome::MissingVariant);
        };

        let Some(test) = self.repo.fetch_test(variant.test_id).await? else {
            tracing::warn!(
                "Poll fired for variant {} of unknown test {}",
                variant_id,
                variant.test_id
            );
            return Ok(PollOutcome::MissingVariant);
        };

        if test.status.is_terminal() {
            return Ok(PollOutcome::TestTerminal);
        }

        // Superseded variant or paused test: don't spend quota, idle.
        if !variant.is_active || test.status != TestStatus::Active {
            return Ok(PollOutcome::Idle);
        }

        let since = variant.activated_at.unwrap_or_else(Utc::now);
        let metrics = match self
            .gateway
            .fetch_metrics(&test.account_id, &test.item_id, since)
            .await
        {
            Ok(metrics) => metrics,
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    "Skipping poll for variant {} after platform failure: {}",
                    variant_id,
                    err
                );
                self.metrics.poll_errors_total.inc();
                return Ok(PollOutcome::Failed);
            }
            Err(RotationError::ReauthorizationRequired { .. }) => {
                // Pausing on auth failure is the executor's call; a poll
                // just skips its observation.
                tracing::warn!(
                    "Credentials unusable while polling variant {}; skipping observation",
                    variant_id
                );
                self.metrics.poll_errors_total.inc();
                return Ok(PollOutcome::Failed);
            }
            Err(err) => {
                self.metrics.poll_errors_total.inc();
                return Err(err);
            }
        };

        self.repo.insert_poll(variant_id, Utc::now(), &metrics).await?;

        tracing::debug!(
            "Recorded poll for variant {}: {} views, ctr {:.4}",
            variant_id,
            metrics.views,
            metrics.ctr
        );
        Ok(PollOutcome::Recorded)
    }
}
