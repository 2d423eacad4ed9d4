//! Core data types for title rotation campaigns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a rotation campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Active => "active",
            TestStatus::Paused => "paused",
            TestStatus::Completed => "completed",
            TestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TestStatus::Pending),
            "active" => Some(TestStatus::Active),
            "paused" => Some(TestStatus::Paused),
            "completed" => Some(TestStatus::Completed),
            "cancelled" => Some(TestStatus::Cancelled),
            _ => None,
        }
    }

    /// `true` once no further rotations or timers may run for the test.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Completed | TestStatus::Cancelled)
    }

    /// Shared state-machine guard. Both the scheduler path and the API
    /// path must consult this before writing a new status, so a stray
    /// timer and a user click can never race into an invalid transition.
    pub fn can_transition(&self, next: TestStatus) -> bool {
        use TestStatus::*;
        match (self, next) {
            (Pending, Active) => true,
            (Active, Paused) => true,
            (Active, Completed) => true,
            (Paused, Active) => true,
            (Pending, Cancelled) | (Active, Cancelled) | (Paused, Cancelled) => true,
            _ => false,
        }
    }
}

/// Why a test sits in `paused`. An automatic auth-pause must be
/// distinguishable from a user-initiated pause so the dashboard can
/// prompt re-authentication specifically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PauseReason {
    User,
    ReauthRequired,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::User => "user",
            PauseReason::ReauthRequired => "reauth-required",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(PauseReason::User),
            "reauth-required" => Some(PauseReason::ReauthRequired),
            _ => None,
        }
    }
}

/// Scoring rule applied when a completed test picks its winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinnerMetric {
    Ctr,
    Views,
    Combined,
}

impl WinnerMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            WinnerMetric::Ctr => "ctr",
            WinnerMetric::Views => "views",
            WinnerMetric::Combined => "combined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ctr" => Some(WinnerMetric::Ctr),
            "views" => Some(WinnerMetric::Views),
            "combined" => Some(WinnerMetric::Combined),
            _ => None,
        }
    }
}

/// One rotation campaign over a set of title variants for one tracked
/// item. The test stores only the order of the last-activated variant
/// (`current_variant_index`), never a direct reference to a variant,
/// so the object graph stays acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleTest {
    pub id: i64,
    pub account_id: String,
    pub item_id: String,
    pub status: TestStatus,
    pub paused_reason: Option<PauseReason>,
    pub rotation_interval_minutes: i64,
    pub winner_metric: WinnerMetric,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub current_variant_index: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One candidate title within a test. Text is immutable once created;
/// only `activated_at` / `is_active` change, and only the rotation
/// transaction changes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleVariant {
    pub id: i64,
    pub test_id: i64,
    pub text: String,
    pub order: i64,
    pub activated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// One observation of performance metrics for an active variant.
/// Append-only: rows are never updated after insertion, and a failed
/// platform call writes no row at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsPoll {
    pub id: i64,
    pub variant_id: i64,
    pub polled_at: DateTime<Utc>,
    pub views: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub average_view_duration: f64,
}

/// Append-only audit row written once per variant activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationLog {
    pub id: i64,
    pub test_id: i64,
    pub variant_id: i64,
    pub rotated_at: DateTime<Utc>,
    pub rotation_order: i64,
    pub duration_minutes: i64,
    pub views_at_rotation: i64,
    pub ctr_at_rotation: f64,
}

/// Aggregated per-variant figures, written once when the test
/// completes and read only by the winner selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSummary {
    pub id: i64,
    pub variant_id: i64,
    pub total_views: i64,
    pub total_impressions: i64,
    pub final_ctr: f64,
    pub final_average_view_duration: f64,
}

/// Metrics snapshot returned by the content platform for one item,
/// scoped to the window since the active variant's activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetrics {
    pub views: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub average_view_duration: f64,
}
