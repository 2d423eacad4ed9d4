//! Rate-limited gateway to the content platform.
//!
//! Every outbound platform call in the process goes through
//! [`RateLimitedGateway`]: it charges the daily quota before dialing,
//! obtains credentials from the [`CredentialBroker`], refreshes once and
//! retries once on a 401-class response, and retries transient failures
//! (429/5xx/network) with capped exponential backoff and jitter.
//!
//! Callers receive the [`RotationError`] taxonomy directly: a
//! `QuotaExceeded` or `TransientPlatform` result means "try again next
//! tick", `ReauthorizationRequired` means a human has to act.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;

use crate::credentials::CredentialBroker;
use crate::rotation::error::{PlatformApiError, RotationError};
use crate::rotation::types::ItemMetrics;
use crate::services::platform::PlatformClient;

/// Quota units charged for a title write.
pub const TITLE_UPDATE_COST: u64 = 50;
/// Quota units charged for a metrics read.
pub const METRICS_FETCH_COST: u64 = 1;

/// Process-wide daily quota accounting.
///
/// The counter is shared by every test's rotation and poll tasks, so it
/// sits behind a mutex. The window rolls at a fixed UTC hour.
pub struct QuotaTracker {
    budget: u64,
    reset_hour_utc: u32,
    window: Mutex<QuotaWindow>,
}

struct QuotaWindow {
    day: NaiveDate,
    used: u64,
}

impl QuotaTracker {
    pub fn new(budget: u64, reset_hour_utc: u32) -> Self {
        let day = Self::window_day(reset_hour_utc, Utc::now());
        Self {
            budget,
            reset_hour_utc,
            window: Mutex::new(QuotaWindow { day, used: 0 }),
        }
    }

    fn window_day(reset_hour_utc: u32, now: DateTime<Utc>) -> NaiveDate {
        (now - Duration::hours(reset_hour_utc as i64)).date_naive()
    }

    /// Reserve `cost` units, failing fast with `QuotaExceeded` when the
    /// daily budget cannot cover them.
    pub fn try_charge(&self, cost: u64) -> Result<(), RotationError> {
        self.try_charge_at(cost, Utc::now())
    }

    /// Clock-injected variant of [`QuotaTracker::try_charge`].
    pub fn try_charge_at(&self, cost: u64, now: DateTime<Utc>) -> Result<(), RotationError> {
        let mut window = self.window.lock().expect("quota window lock poisoned");

        let day = Self::window_day(self.reset_hour_utc, now);
        if day != window.day {
            window.day = day;
            window.used = 0;
        }

        if window.used + cost > self.budget {
            return Err(RotationError::QuotaExceeded {
                used: window.used,
                budget: self.budget,
            });
        }

        window.used += cost;
        Ok(())
    }

    /// Units spent in the current window (for metrics / display).
    pub fn used(&self) -> u64 {
        let mut window = self.window.lock().expect("quota window lock poisoned");
        let day = Self::window_day(self.reset_hour_utc, Utc::now());
        if day != window.day {
            window.day = day;
            window.used = 0;
        }
        window.used
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }
}

/// Exponential backoff parameters for transient platform failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: StdDuration,
    pub multiplier: f64,
    pub max_delay: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: StdDuration::from_millis(500),
            multiplier: 2.0,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay for the given 0-based retry, before jitter.
    pub fn raw_delay(&self, retry: u32) -> StdDuration {
        let scaled = self.base_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        StdDuration::from_millis(capped as u64)
    }

    /// Delay with up to 25% additive jitter, so many tests backing off
    /// at once do not re-dial in lockstep.
    pub fn delay_for(&self, retry: u32) -> StdDuration {
        let raw = self.raw_delay(retry);
        let jitter_cap = (raw.as_millis() / 4) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        raw + StdDuration::from_millis(jitter)
    }
}

/// The only doorway to the outside world. Executors and pollers depend
/// on this trait so tests can substitute a scripted fake.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    async fn push_title(
        &self,
        account_id: &str,
        item_id: &str,
        title: &str,
    ) -> Result<(), RotationError>;

    async fn fetch_metrics(
        &self,
        account_id: &str,
        item_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ItemMetrics, RotationError>;
}

/// Production gateway: quota + credentials + backoff around
/// [`PlatformClient`].
pub struct RateLimitedGateway {
    client: PlatformClient,
    broker: Arc<CredentialBroker>,
    quota: Arc<QuotaTracker>,
    retry: RetryPolicy,
}

impl RateLimitedGateway {
    pub fn new(
        client: PlatformClient,
        broker: Arc<CredentialBroker>,
        quota: Arc<QuotaTracker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            broker,
            quota,
            retry,
        }
    }

    async fn run_call<T, F, Fut>(
        &self,
        account_id: &str,
        cost: u64,
        op: F,
    ) -> Result<T, RotationError>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, PlatformApiError>> + Send,
        T: Send,
    {
        self.quota.try_charge(cost)?;

        let mut token = self.broker.access_token(account_id).await?;
        let mut refreshed = false;
        let mut failures: u32 = 0;

        loop {
            match op(token.clone()).await {
                Ok(value) => return Ok(value),
                Err(PlatformApiError::Unauthorized) => {
                    // Refresh once and retry the same call exactly once.
                    if refreshed {
                        return Err(RotationError::reauthorization_required(account_id));
                    }
                    refreshed = true;
                    token = self.broker.force_refresh(account_id).await?;
                }
                Err(err) => {
                    failures += 1;
                    if failures >= self.retry.max_attempts {
                        return Err(RotationError::transient(err.to_string()));
                    }
                    let delay = self.retry.delay_for(failures - 1);
                    tracing::warn!(
                        "Platform call for account {} failed (attempt {}/{}), backing off {:?}: {}",
                        account_id,
                        failures,
                        self.retry.max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl PlatformGateway for RateLimitedGateway {
    async fn push_title(
        &self,
        account_id: &str,
        item_id: &str,
        title: &str,
    ) -> Result<(), RotationError> {
        self.run_call(account_id, TITLE_UPDATE_COST, |token| async move {
            self.client.update_item_title(&token, item_id, title).await
        })
        .await
    }

    async fn fetch_metrics(
        &self,
        account_id: &str,
        item_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ItemMetrics, RotationError> {
        self.run_call(account_id, METRICS_FETCH_COST, |token| async move {
            self.client.fetch_item_metrics(&token, item_id, since).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ---- QuotaTracker ----

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn charges_accumulate_within_budget() {
        let quota = QuotaTracker::new(100, 0);
        let now = at(2026, 3, 1, 12);

        quota.try_charge_at(50, now).unwrap();
        quota.try_charge_at(50, now).unwrap();
        let err = quota.try_charge_at(1, now).unwrap_err();
        assert!(matches!(
            err,
            RotationError::QuotaExceeded { used: 100, budget: 100 }
        ));
    }

    #[test]
    fn window_resets_on_next_day() {
        let quota = QuotaTracker::new(10, 0);
        quota.try_charge_at(10, at(2026, 3, 1, 23)).unwrap();
        assert!(quota.try_charge_at(1, at(2026, 3, 1, 23)).is_err());

        // Past midnight the counter starts over.
        quota.try_charge_at(10, at(2026, 3, 2, 0)).unwrap();
    }

    #[test]
    fn reset_hour_shifts_the_window_boundary() {
        let quota = QuotaTracker::new(10, 7);
        quota.try_charge_at(10, at(2026, 3, 1, 6)).unwrap();
        // 06:59 and 07:01 on the same calendar day are different windows.
        assert!(quota.try_charge_at(1, at(2026, 3, 1, 6)).is_err());
        quota.try_charge_at(10, at(2026, 3, 1, 8)).unwrap();
    }

    #[test]
    fn zero_budget_fails_every_charge() {
        let quota = QuotaTracker::new(0, 0);
        assert!(quota.try_charge(1).is_err());
    }

    // ---- RetryPolicy ----

    #[test]
    fn raw_delay_grows_geometrically_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: StdDuration::from_millis(100),
            multiplier: 2.0,
            max_delay: StdDuration::from_millis(1000),
        };

        assert_eq!(policy.raw_delay(0), StdDuration::from_millis(100));
        assert_eq!(policy.raw_delay(1), StdDuration::from_millis(200));
        assert_eq!(policy.raw_delay(2), StdDuration::from_millis(400));
        // 100 * 2^4 = 1600 -> capped
        assert_eq!(policy.raw_delay(4), StdDuration::from_millis(1000));
        assert_eq!(policy.raw_delay(9), StdDuration::from_millis(1000));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for retry in 0..5 {
            let raw = policy.raw_delay(retry);
            let jittered = policy.delay_for(retry);
            assert!(jittered >= raw);
            assert!(jittered <= raw + raw / 4 + StdDuration::from_millis(1));
        }
    }

    // ---- RateLimitedGateway ----

    mod gateway {
        use super::*;
        use crate::credentials::{
            AccessCredential, CredentialBroker, CredentialError, CredentialStore,
        };
        use std::sync::atomic::{AtomicUsize, Ordering};
        use wiremock::matchers::{bearer_token, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        struct ScriptedStore {
            refresh_calls: AtomicUsize,
            refresh_fails: bool,
        }

        #[async_trait]
        impl CredentialStore for ScriptedStore {
            async fn get_credential(
                &self,
                _account_id: &str,
            ) -> Result<Option<AccessCredential>, CredentialError> {
                Ok(Some(AccessCredential {
                    access_token: "token-0".to_string(),
                    refresh_token: "refresh".to_string(),
                    expires_at: Utc::now() + Duration::hours(1),
                }))
            }

            async fn refresh_credential(
                &self,
                account_id: &str,
            ) -> Result<AccessCredential, CredentialError> {
                let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.refresh_fails {
                    return Err(CredentialError::RefreshRejected {
                        message: "invalid_grant".to_string(),
                    });
                }
                let _ = account_id;
                Ok(AccessCredential {
                    access_token: format!("token-{}", n),
                    refresh_token: "refresh".to_string(),
                    expires_at: Utc::now() + Duration::hours(1),
                })
            }

            async fn save_credential(
                &self,
                _account_id: &str,
                _credential: &AccessCredential,
            ) -> Result<(), CredentialError> {
                Ok(())
            }
        }

        fn fast_retry(max_attempts: u32) -> RetryPolicy {
            RetryPolicy {
                max_attempts,
                base_delay: StdDuration::from_millis(1),
                multiplier: 2.0,
                max_delay: StdDuration::from_millis(4),
            }
        }

        fn make_gateway(
            server: &MockServer,
            budget: u64,
            refresh_fails: bool,
            retry: RetryPolicy,
        ) -> (RateLimitedGateway, Arc<QuotaTracker>) {
            let store = Arc::new(ScriptedStore {
                refresh_calls: AtomicUsize::new(0),
                refresh_fails,
            });
            let broker = Arc::new(CredentialBroker::new(store));
            let quota = Arc::new(QuotaTracker::new(budget, 0));
            let gateway = RateLimitedGateway::new(
                PlatformClient::new(server.uri()),
                broker,
                quota.clone(),
                retry,
            );
            (gateway, quota)
        }

        #[tokio::test]
        async fn successful_push_charges_quota() {
            let server = MockServer::start().await;
            Mock::given(method("PUT"))
                .and(path("/items/item-1/title"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;

            let (gateway, quota) = make_gateway(&server, 1000, false, fast_retry(3));
            gateway.push_title("acct", "item-1", "New").await.unwrap();
            assert_eq!(quota.used(), TITLE_UPDATE_COST);
        }

        #[tokio::test]
        async fn exhausted_quota_fails_fast_without_dialing() {
            let server = MockServer::start().await;
            Mock::given(method("PUT"))
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(&server)
                .await;

            let (gateway, _) = make_gateway(&server, 10, false, fast_retry(3));
            let err = gateway.push_title("acct", "item-1", "New").await.unwrap_err();
            assert!(matches!(err, RotationError::QuotaExceeded { .. }));
        }

        #[tokio::test]
        async fn unauthorized_refreshes_once_and_retries() {
            let server = MockServer::start().await;
            // First token is rejected, refreshed token succeeds.
            Mock::given(method("PUT"))
                .and(bearer_token("token-0"))
                .respond_with(ResponseTemplate::new(401))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("PUT"))
                .and(bearer_token("token-1"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;

            let (gateway, _) = make_gateway(&server, 1000, false, fast_retry(3));
            gateway.push_title("acct", "item-1", "New").await.unwrap();
        }

        #[tokio::test]
        async fn second_unauthorized_after_refresh_requires_reauth() {
            let server = MockServer::start().await;
            Mock::given(method("PUT"))
                .respond_with(ResponseTemplate::new(401))
                .expect(2)
                .mount(&server)
                .await;

            let (gateway, _) = make_gateway(&server, 1000, false, fast_retry(3));
            let err = gateway.push_title("acct", "item-1", "New").await.unwrap_err();
            assert!(matches!(err, RotationError::ReauthorizationRequired { .. }));
        }

        #[tokio::test]
        async fn failed_refresh_surfaces_reauthorization_required() {
            let server = MockServer::start().await;
            Mock::given(method("PUT"))
                .respond_with(ResponseTemplate::new(401))
                .expect(1)
                .mount(&server)
                .await;

            let (gateway, _) = make_gateway(&server, 1000, true, fast_retry(3));
            let err = gateway.push_title("acct", "item-1", "New").await.unwrap_err();
            assert!(matches!(err, RotationError::ReauthorizationRequired { .. }));
        }

        #[tokio::test]
        async fn rate_limits_retry_until_success() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(429))
                .up_to_n_times(2)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "views": 10,
                    "impressions": 100,
                    "ctr": 0.1,
                    "average_view_duration": 30.0
                })))
                .mount(&server)
                .await;

            let (gateway, _) = make_gateway(&server, 1000, false, fast_retry(4));
            let metrics = gateway
                .fetch_metrics("acct", "item-1", Utc::now())
                .await
                .unwrap();
            assert_eq!(metrics.views, 10);
        }

        #[tokio::test]
        async fn persistent_server_errors_exhaust_into_transient() {
            let server = MockServer::start().await;
            Mock::given(method("PUT"))
                .respond_with(ResponseTemplate::new(500))
                .expect(2)
                .mount(&server)
                .await;

            let (gateway, _) = make_gateway(&server, 1000, false, fast_retry(2));
            let err = gateway.push_title("acct", "item-1", "New").await.unwrap_err();
            assert!(matches!(err, RotationError::TransientPlatform { .. }));
        }
    }
}
