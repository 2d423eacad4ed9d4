//! Prometheus metrics registry for the title rotation engine.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the scheduler, executor, poller and HTTP layer.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Total rotation attempts (every outcome).
    pub rotations_total: Counter,
    /// Rotation attempts that failed on a transient or persistence error.
    pub rotation_errors_total: Counter,
    /// Tests that reached the `completed` state.
    pub tests_completed_total: Counter,
    /// Tests auto-paused because re-authorization is required.
    pub auth_pauses_total: Counter,
    /// Total analytics poll attempts.
    pub polls_total: Counter,
    /// Poll attempts that recorded no observation.
    pub poll_errors_total: Counter,
    /// Quota units spent in the current daily window.
    pub quota_used: Gauge,
    /// Rotation timers currently armed.
    pub rotation_timers: Gauge,
    /// Poll timers currently armed.
    pub poll_timers: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated (should not happen in practice).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let rotations_total = Counter::with_opts(Opts::new(
            "title_rotator_rotations_total",
            "Total rotation attempts",
        ))?;

        let rotation_errors_total = Counter::with_opts(Opts::new(
            "title_rotator_rotation_errors_total",
            "Rotation attempts that failed",
        ))?;

        let tests_completed_total = Counter::with_opts(Opts::new(
            "title_rotator_tests_completed_total",
            "Tests that reached the completed state",
        ))?;

        let auth_pauses_total = Counter::with_opts(Opts::new(
            "title_rotator_auth_pauses_total",
            "Tests auto-paused pending re-authorization",
        ))?;

        let polls_total = Counter::with_opts(Opts::new(
            "title_rotator_polls_total",
            "Total analytics poll attempts",
        ))?;

        let poll_errors_total = Counter::with_opts(Opts::new(
            "title_rotator_poll_errors_total",
            "Poll attempts that recorded no observation",
        ))?;

        let quota_used = Gauge::with_opts(Opts::new(
            "title_rotator_quota_used",
            "Quota units spent in the current daily window",
        ))?;

        let rotation_timers = Gauge::with_opts(Opts::new(
            "title_rotator_rotation_timers",
            "Rotation timers currently armed",
        ))?;

        let poll_timers = Gauge::with_opts(Opts::new(
            "title_rotator_poll_timers",
            "Poll timers currently armed",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "title_rotator_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "title_rotator_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(rotations_total.clone()))?;
        registry.register(Box::new(rotation_errors_total.clone()))?;
        registry.register(Box::new(tests_completed_total.clone()))?;
        registry.register(Box::new(auth_pauses_total.clone()))?;
        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(poll_errors_total.clone()))?;
        registry.register(Box::new(quota_used.clone()))?;
        registry.register(Box::new(rotation_timers.clone()))?;
        registry.register(Box::new(poll_timers.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            rotations_total,
            rotation_errors_total,
            tests_completed_total,
            auth_pauses_total,
            polls_total,
            poll_errors_total,
            quota_used,
            rotation_timers,
            poll_timers,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
