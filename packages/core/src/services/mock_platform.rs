//! Scripted in-memory platform gateway.
//!
//! Test double for [`PlatformGateway`] used by the scheduler unit tests
//! and the API integration tests; no live platform or wiremock server
//! needed. Push results are consumed from a queue (defaulting to
//! success); every pushed title and metrics call is recorded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::gateway::PlatformGateway;
use crate::rotation::error::RotationError;
use crate::rotation::types::ItemMetrics;

pub struct MockPlatformGateway {
    push_results: Mutex<VecDeque<Result<(), RotationError>>>,
    metrics_value: Mutex<ItemMetrics>,
    pushed_titles: Mutex<Vec<String>>,
    metrics_calls: AtomicUsize,
}

impl MockPlatformGateway {
    pub fn new() -> Self {
        Self {
            push_results: Mutex::new(VecDeque::new()),
            metrics_value: Mutex::new(ItemMetrics {
                views: 100,
                impressions: 2000,
                ctr: 0.05,
                average_view_duration: 60.0,
            }),
            pushed_titles: Mutex::new(Vec::new()),
            metrics_calls: AtomicUsize::new(0),
        }
    }

    /// Queue an error for the next title push; later pushes succeed.
    pub async fn queue_push_error(&self, err: RotationError) {
        self.push_results.lock().await.push_back(Err(err));
    }

    pub async fn set_metrics(&self, metrics: ItemMetrics) {
        *self.metrics_value.lock().await = metrics;
    }

    pub async fn pushed_titles(&self) -> Vec<String> {
        self.pushed_titles.lock().await.clone()
    }

    pub fn metrics_call_count(&self) -> usize {
        self.metrics_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockPlatformGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformGateway for MockPlatformGateway {
    async fn push_title(
        &self,
        _account_id: &str,
        _item_id: &str,
        title: &str,
    ) -> Result<(), RotationError> {
        let result = self.push_results.lock().await.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.pushed_titles.lock().await.push(title.to_string());
        }
        result
    }

    async fn fetch_metrics(
        &self,
        _account_id: &str,
        _item_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<ItemMetrics, RotationError> {
        self.metrics_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.metrics_value.lock().await.clone())
    }
}
