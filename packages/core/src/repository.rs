//! Database repository for rotation campaign persistence.
//!
//! All SQLite read/write logic lives here. The scheduler and executor
//! consume it as a narrow set of CRUD/aggregate operations plus one
//! atomic rotate transaction ([`TestRepository::apply_rotation`]).
//!
//! Status writes go through [`TestRepository::transition_status`], which
//! enforces the lifecycle state machine in SQL so the scheduler path and
//! the API path cannot race each other into an invalid state.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::rotation::types::{
    AnalyticsPoll, ItemMetrics, PauseReason, RotationLog, TestStatus, TitleTest, TitleVariant,
    VariantSummary, WinnerMetric,
};

/// Fields required to create a campaign. Variant rows are created in the
/// same transaction, ordered as given.
#[derive(Debug, Clone)]
pub struct NewTest {
    pub account_id: String,
    pub item_id: String,
    pub rotation_interval_minutes: i64,
    pub winner_metric: WinnerMetric,
    pub end_date: Option<DateTime<Utc>>,
    pub titles: Vec<String>,
}

/// Everything the rotate transaction writes in one unit.
#[derive(Debug, Clone)]
pub struct RotationWrite {
    pub test_id: i64,
    pub next_variant_id: i64,
    pub next_order: i64,
    pub rotated_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub views_at_rotation: i64,
    pub ctr_at_rotation: f64,
}

/// Repository for reading and writing campaign data to SQLite.
pub struct TestRepository {
    pool: SqlitePool,
}

impl TestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a test and its variants in a single transaction.
    pub async fn create_test(&self, new: &NewTest) -> Result<TitleTest, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let end_date = new.end_date.map(|d| d.to_rfc3339());

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO tests
             (account_id, item_id, status, rotation_interval_minutes, winner_metric,
              start_date, end_date, created_at)
             VALUES (?, ?, 'pending', ?, ?, ?, ?, ?)",
        )
        .bind(&new.account_id)
        .bind(&new.item_id)
        .bind(new.rotation_interval_minutes)
        .bind(new.winner_metric.as_str())
        .bind(&now)
        .bind(&end_date)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let test_id = result.last_insert_rowid();

        for (order, text) in new.titles.iter().enumerate() {
            sqlx::query("INSERT INTO variants (test_id, text, ord) VALUES (?, ?, ?)")
                .bind(test_id)
                .bind(text)
                .bind(order as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.fetch_test(test_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn fetch_test(&self, test_id: i64) -> Result<Option<TitleTest>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM tests WHERE id = ?")
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().and_then(test_from_row))
    }

    pub async fn list_tests(&self) -> Result<Vec<TitleTest>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM tests ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(test_from_row).collect())
    }

    /// Tests the scheduler must keep rotation timers armed for.
    pub async fn active_tests(&self) -> Result<Vec<TitleTest>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM tests WHERE status = 'active' ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(test_from_row).collect())
    }

    /// Guarded status write. Returns `false` when the stored status does
    /// not permit the transition (the row is left untouched).
    ///
    /// The guard runs inside the UPDATE's WHERE clause, so two callers
    /// racing on the same test resolve on the database row, not on a
    /// stale in-process snapshot.
    pub async fn transition_status(
        &self,
        test_id: i64,
        next: TestStatus,
        reason: Option<PauseReason>,
    ) -> Result<bool, sqlx::Error> {
        let allowed: Vec<&str> = [
            TestStatus::Pending,
            TestStatus::Active,
            TestStatus::Paused,
            TestStatus::Completed,
            TestStatus::Cancelled,
        ]
        .iter()
        .filter(|from| from.can_transition(next))
        .map(|from| from.as_str())
        .collect();

        if allowed.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; allowed.len()].join(", ");
        let sql = format!(
            "UPDATE tests SET status = ?, paused_reason = ? WHERE id = ? AND status IN ({})",
            placeholders
        );

        let reason_str = reason.map(|r| r.as_str());
        let mut query = sqlx::query(&sql)
            .bind(next.as_str())
            .bind(reason_str)
            .bind(test_id);
        for from in &allowed {
            query = query.bind(*from);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch_variants(&self, test_id: i64) -> Result<Vec<TitleVariant>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM variants WHERE test_id = ? ORDER BY ord ASC")
            .bind(test_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(variant_from_row).collect())
    }

    pub async fn fetch_variant(&self, variant_id: i64) -> Result<Option<TitleVariant>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM variants WHERE id = ?")
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().and_then(variant_from_row))
    }

    /// Variants that are currently active on tests in `active` status.
    /// Used on startup to re-arm poll timers after a restart.
    pub async fn active_variants(&self) -> Result<Vec<TitleVariant>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT v.* FROM variants v
             JOIN tests t ON t.id = v.test_id
             WHERE v.is_active = 1 AND t.status = 'active'
             ORDER BY v.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(variant_from_row).collect())
    }

    /// The atomic rotate transaction: deactivate the previous variant,
    /// activate the next, advance the test's index, and append the
    /// rotation log row. Either all four writes land or none do.
    pub async fn apply_rotation(&self, write: &RotationWrite) -> Result<(), sqlx::Error> {
        let rotated_at = write.rotated_at.to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE variants SET is_active = 0 WHERE test_id = ? AND is_active = 1")
            .bind(write.test_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE variants SET is_active = 1, activated_at = ? WHERE id = ?")
            .bind(&rotated_at)
            .bind(write.next_variant_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE tests SET current_variant_index = ? WHERE id = ?")
            .bind(write.next_order)
            .bind(write.test_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO rotation_logs
             (test_id, variant_id, rotated_at, rotation_order, duration_minutes,
              views_at_rotation, ctr_at_rotation)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(write.test_id)
        .bind(write.next_variant_id)
        .bind(&rotated_at)
        .bind(write.next_order)
        .bind(write.duration_minutes)
        .bind(write.views_at_rotation)
        .bind(write.ctr_at_rotation)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ---- Analytics polls ----

    pub async fn insert_poll(
        &self,
        variant_id: i64,
        polled_at: DateTime<Utc>,
        metrics: &ItemMetrics,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO analytics_polls
             (variant_id, polled_at, views, impressions, ctr, average_view_duration)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(variant_id)
        .bind(polled_at.to_rfc3339())
        .bind(metrics.views)
        .bind(metrics.impressions)
        .bind(metrics.ctr)
        .bind(metrics.average_view_duration)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent poll row for a variant, if any was ever recorded.
    pub async fn latest_poll(&self, variant_id: i64) -> Result<Option<AnalyticsPoll>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM analytics_polls WHERE variant_id = ?
             ORDER BY polled_at DESC, id DESC LIMIT 1",
        )
        .bind(variant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(poll_from_row))
    }

    pub async fn fetch_polls(&self, variant_id: i64) -> Result<Vec<AnalyticsPoll>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM analytics_polls WHERE variant_id = ? ORDER BY polled_at ASC, id ASC",
        )
        .bind(variant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(poll_from_row).collect())
    }

    // ---- Rotation logs ----

    pub async fn fetch_rotation_logs(&self, test_id: i64) -> Result<Vec<RotationLog>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM rotation_logs WHERE test_id = ? ORDER BY rotation_order ASC",
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(log_from_row).collect())
    }

    // ---- Variant summaries ----

    pub async fn insert_summary(
        &self,
        variant_id: i64,
        total_views: i64,
        total_impressions: i64,
        final_ctr: f64,
        final_average_view_duration: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO variant_summaries
             (variant_id, total_views, total_impressions, final_ctr, final_average_view_duration)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(variant_id)
        .bind(total_views)
        .bind(total_impressions)
        .bind(final_ctr)
        .bind(final_average_view_duration)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Summaries for a test joined with their variants, ordered by
    /// rotation order. Only variants that received a summary appear.
    pub async fn fetch_summaries(
        &self,
        test_id: i64,
    ) -> Result<Vec<(TitleVariant, VariantSummary)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT v.id as v_id, v.test_id, v.text, v.ord, v.activated_at, v.is_active,
                    s.id as s_id, s.variant_id, s.total_views, s.total_impressions,
                    s.final_ctr, s.final_average_view_duration
             FROM variant_summaries s
             JOIN variants v ON v.id = s.variant_id
             WHERE v.test_id = ?
             ORDER BY v.ord ASC",
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        let pairs = rows
            .iter()
            .filter_map(|row| {
                let variant = TitleVariant {
                    id: row.try_get("v_id").ok()?,
                    test_id: row.try_get("test_id").ok()?,
                    text: row.try_get("text").ok()?,
                    order: row.try_get("ord").ok()?,
                    activated_at: parse_optional_timestamp(row, "activated_at"),
                    is_active: row.try_get::<i64, _>("is_active").ok()? != 0,
                };
                let summary = VariantSummary {
                    id: row.try_get("s_id").ok()?,
                    variant_id: row.try_get("variant_id").ok()?,
                    total_views: row.try_get("total_views").ok()?,
                    total_impressions: row.try_get("total_impressions").ok()?,
                    final_ctr: row.try_get("final_ctr").ok()?,
                    final_average_view_duration: row
                        .try_get("final_average_view_duration")
                        .ok()?,
                };
                Some((variant, summary))
            })
            .collect();

        Ok(pairs)
    }
}

// ---- Row decoding -----------------------------------------------------------

fn parse_timestamp(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    let raw: String = row.try_get(column).ok()?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_optional_timestamp(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    let raw: Option<String> = row.try_get(column).ok()?;
    let raw = raw?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn test_from_row(row: &SqliteRow) -> Option<TitleTest> {
    let status_raw: String = row.try_get("status").ok()?;
    let metric_raw: String = row.try_get("winner_metric").ok()?;
    let reason_raw: Option<String> = row.try_get("paused_reason").ok()?;

    Some(TitleTest {
        id: row.try_get("id").ok()?,
        account_id: row.try_get("account_id").ok()?,
        item_id: row.try_get("item_id").ok()?,
        status: TestStatus::parse(&status_raw)?,
        paused_reason: reason_raw.as_deref().and_then(PauseReason::parse),
        rotation_interval_minutes: row.try_get("rotation_interval_minutes").ok()?,
        winner_metric: WinnerMetric::parse(&metric_raw)?,
        start_date: parse_timestamp(row, "start_date")?,
        end_date: parse_optional_timestamp(row, "end_date"),
        current_variant_index: row.try_get("current_variant_index").ok()?,
        created_at: parse_timestamp(row, "created_at")?,
    })
}

fn variant_from_row(row: &SqliteRow) -> Option<TitleVariant> {
    Some(TitleVariant {
        id: row.try_get("id").ok()?,
        test_id: row.try_get("test_id").ok()?,
        text: row.try_get("text").ok()?,
        order: row.try_get("ord").ok()?,
        activated_at: parse_optional_timestamp(row, "activated_at"),
        is_active: row.try_get::<i64, _>("is_active").ok()? != 0,
    })
}

fn poll_from_row(row: &SqliteRow) -> Option<AnalyticsPoll> {
    Some(AnalyticsPoll {
        id: row.try_get("id").ok()?,
        variant_id: row.try_get("variant_id").ok()?,
        polled_at: parse_timestamp(row, "polled_at")?,
        views: row.try_get("views").ok()?,
        impressions: row.try_get("impressions").ok()?,
        ctr: row.try_get("ctr").ok()?,
        average_view_duration: row.try_get("average_view_duration").ok()?,
    })
}

fn log_from_row(row: &SqliteRow) -> Option<RotationLog> {
    Some(RotationLog {
        id: row.try_get("id").ok()?,
        test_id: row.try_get("test_id").ok()?,
        variant_id: row.try_get("variant_id").ok()?,
        rotated_at: parse_timestamp(row, "rotated_at")?,
        rotation_order: row.try_get("rotation_order").ok()?,
        duration_minutes: row.try_get("duration_minutes").ok()?,
        views_at_rotation: row.try_get("views_at_rotation").ok()?,
        ctr_at_rotation: row.try_get("ctr_at_rotation").ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    async fn make_repo() -> TestRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        TestRepository::new(pool)
    }

    fn make_new_test(titles: &[&str]) -> NewTest {
        NewTest {
            account_id: "acct-1".to_string(),
            item_id: "item-9".to_string(),
            rotation_interval_minutes: 60,
            winner_metric: WinnerMetric::Ctr,
            end_date: None,
            titles: titles.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn metrics(views: i64, ctr: f64) -> ItemMetrics {
        ItemMetrics {
            views,
            impressions: views * 10,
            ctr,
            average_view_duration: 90.0,
        }
    }

    #[tokio::test]
    async fn create_test_inserts_test_and_ordered_variants() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B", "C"])).await.unwrap();

        assert_eq!(test.status, TestStatus::Pending);
        assert_eq!(test.current_variant_index, None);

        let variants = repo.fetch_variants(test.id).await.unwrap();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].text, "A");
        assert_eq!(variants[0].order, 0);
        assert_eq!(variants[2].order, 2);
        assert!(variants.iter().all(|v| !v.is_active));
    }

    #[tokio::test]
    async fn active_tests_returns_only_active_rows() {
        let repo = make_repo().await;
        let a = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();
        let _b = repo.create_test(&make_new_test(&["C", "D"])).await.unwrap();

        repo.transition_status(a.id, TestStatus::Active, None).await.unwrap();

        let active = repo.active_tests().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[tokio::test]
    async fn transition_status_applies_allowed_transition() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();

        let ok = repo.transition_status(test.id, TestStatus::Active, None).await.unwrap();
        assert!(ok);

        let reloaded = repo.fetch_test(test.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TestStatus::Active);
    }

    #[tokio::test]
    async fn transition_status_refuses_invalid_transition() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();

        // pending -> completed is not a legal edge
        let ok = repo
            .transition_status(test.id, TestStatus::Completed, None)
            .await
            .unwrap();
        assert!(!ok);

        let reloaded = repo.fetch_test(test.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TestStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_states_reject_all_further_transitions() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();

        repo.transition_status(test.id, TestStatus::Cancelled, None).await.unwrap();

        let resumed = repo.transition_status(test.id, TestStatus::Active, None).await.unwrap();
        assert!(!resumed);
        let paused = repo
            .transition_status(test.id, TestStatus::Paused, Some(PauseReason::User))
            .await
            .unwrap();
        assert!(!paused);
    }

    #[tokio::test]
    async fn pause_records_reason_and_resume_clears_it() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();
        repo.transition_status(test.id, TestStatus::Active, None).await.unwrap();

        repo.transition_status(test.id, TestStatus::Paused, Some(PauseReason::ReauthRequired))
            .await
            .unwrap();
        let paused = repo.fetch_test(test.id).await.unwrap().unwrap();
        assert_eq!(paused.paused_reason, Some(PauseReason::ReauthRequired));

        repo.transition_status(test.id, TestStatus::Active, None).await.unwrap();
        let resumed = repo.fetch_test(test.id).await.unwrap().unwrap();
        assert_eq!(resumed.paused_reason, None);
    }

    #[tokio::test]
    async fn apply_rotation_activates_variant_and_appends_log() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();
        repo.transition_status(test.id, TestStatus::Active, None).await.unwrap();
        let variants = repo.fetch_variants(test.id).await.unwrap();

        repo.apply_rotation(&RotationWrite {
            test_id: test.id,
            next_variant_id: variants[0].id,
            next_order: 0,
            rotated_at: Utc::now(),
            duration_minutes: 0,
            views_at_rotation: 0,
            ctr_at_rotation: 0.0,
        })
        .await
        .unwrap();

        let variants = repo.fetch_variants(test.id).await.unwrap();
        assert!(variants[0].is_active);
        assert!(variants[0].activated_at.is_some());
        assert!(!variants[1].is_active);

        let reloaded = repo.fetch_test(test.id).await.unwrap().unwrap();
        assert_eq!(reloaded.current_variant_index, Some(0));

        let logs = repo.fetch_rotation_logs(test.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].rotation_order, 0);
        assert_eq!(logs[0].variant_id, variants[0].id);
    }

    #[tokio::test]
    async fn apply_rotation_keeps_at_most_one_variant_active() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B", "C"])).await.unwrap();
        repo.transition_status(test.id, TestStatus::Active, None).await.unwrap();
        let variants = repo.fetch_variants(test.id).await.unwrap();

        for (order, variant) in variants.iter().enumerate() {
            repo.apply_rotation(&RotationWrite {
                test_id: test.id,
                next_variant_id: variant.id,
                next_order: order as i64,
                rotated_at: Utc::now(),
                duration_minutes: 0,
                views_at_rotation: 0,
                ctr_at_rotation: 0.0,
            })
            .await
            .unwrap();

            let active_count = repo
                .fetch_variants(test.id)
                .await
                .unwrap()
                .iter()
                .filter(|v| v.is_active)
                .count();
            assert_eq!(active_count, 1);
        }

        let logs = repo.fetch_rotation_logs(test.id).await.unwrap();
        assert_eq!(logs.len(), 3);
    }

    #[tokio::test]
    async fn latest_poll_returns_most_recent_row() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();
        let variants = repo.fetch_variants(test.id).await.unwrap();
        let vid = variants[0].id;

        let earlier = Utc::now() - chrono::Duration::minutes(30);
        repo.insert_poll(vid, earlier, &metrics(100, 0.04)).await.unwrap();
        repo.insert_poll(vid, Utc::now(), &metrics(250, 0.05)).await.unwrap();

        let latest = repo.latest_poll(vid).await.unwrap().unwrap();
        assert_eq!(latest.views, 250);

        let all = repo.fetch_polls(vid).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].views, 100);
    }

    #[tokio::test]
    async fn latest_poll_is_none_without_observations() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();
        let variants = repo.fetch_variants(test.id).await.unwrap();

        assert!(repo.latest_poll(variants[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summaries_join_variants_in_rotation_order() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();
        let variants = repo.fetch_variants(test.id).await.unwrap();

        // Insert in reverse order; fetch must come back ordered by ord.
        repo.insert_summary(variants[1].id, 2000, 50_000, 0.04, 80.0).await.unwrap();
        repo.insert_summary(variants[0].id, 1000, 12_500, 0.08, 95.0).await.unwrap();

        let summaries = repo.fetch_summaries(test.id).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].0.order, 0);
        assert_eq!(summaries[0].1.total_views, 1000);
        assert_eq!(summaries[1].0.order, 1);
        assert_eq!(summaries[1].1.total_views, 2000);
    }

    #[tokio::test]
    async fn active_variants_requires_active_test() {
        let repo = make_repo().await;
        let test = repo.create_test(&make_new_test(&["A", "B"])).await.unwrap();
        repo.transition_status(test.id, TestStatus::Active, None).await.unwrap();
        let variants = repo.fetch_variants(test.id).await.unwrap();

        repo.apply_rotation(&RotationWrite {
            test_id: test.id,
            next_variant_id: variants[0].id,
            next_order: 0,
            rotated_at: Utc::now(),
            duration_minutes: 0,
            views_at_rotation: 0,
            ctr_at_rotation: 0.0,
        })
        .await
        .unwrap();

        assert_eq!(repo.active_variants().await.unwrap().len(), 1);

        repo.transition_status(test.id, TestStatus::Paused, Some(PauseReason::User))
            .await
            .unwrap();
        assert!(repo.active_variants().await.unwrap().is_empty());
    }
}
