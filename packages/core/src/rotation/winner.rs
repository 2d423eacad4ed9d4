//! Winner selection over frozen variant summaries.
//!
//! Scoring is a pure function so it can be tested exhaustively; the
//! async wrapper only loads the summaries and the test's configured
//! metric. With no summaries (test cancelled before any activation)
//! there is no winner.

use crate::repository::TestRepository;
use crate::rotation::error::RotationError;
use crate::rotation::types::{TitleVariant, VariantSummary, WinnerMetric};

/// Pick the winning variant from `entries` under `metric`.
///
/// `combined` normalises each metric against the maximum observed in
/// the set and weighs them 0.5/0.5. All ties, under any metric, break
/// to the lowest rotation order, so the result is deterministic and
/// independent of input ordering.
pub fn pick_winner<'a>(
    metric: WinnerMetric,
    entries: &'a [(TitleVariant, VariantSummary)],
) -> Option<&'a TitleVariant> {
    if entries.is_empty() {
        return None;
    }

    let max_ctr = entries
        .iter()
        .map(|(_, s)| s.final_ctr)
        .fold(0.0_f64, f64::max);
    let max_views = entries
        .iter()
        .map(|(_, s)| s.total_views)
        .max()
        .unwrap_or(0);

    let score = |summary: &VariantSummary| -> f64 {
        match metric {
            WinnerMetric::Ctr => summary.final_ctr,
            WinnerMetric::Views => summary.total_views as f64,
            WinnerMetric::Combined => {
                let ctr_norm = if max_ctr > 0.0 {
                    summary.final_ctr / max_ctr
                } else {
                    0.0
                };
                let views_norm = if max_views > 0 {
                    summary.total_views as f64 / max_views as f64
                } else {
                    0.0
                };
                0.5 * ctr_norm + 0.5 * views_norm
            }
        }
    };

    let mut sorted: Vec<&(TitleVariant, VariantSummary)> = entries.iter().collect();
    sorted.sort_by_key(|(variant, _)| variant.order);

    let mut best: Option<(&TitleVariant, f64)> = None;
    for (variant, summary) in sorted {
        let value = score(summary);
        match best {
            // Strictly-greater keeps the lowest order on exact ties.
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((variant, value)),
        }
    }

    best.map(|(variant, _)| variant)
}

/// Winning title text for a test, or `None` when the test does not
/// exist or never produced a summary.
pub async fn select_winner(
    repo: &TestRepository,
    test_id: i64,
) -> Result<Option<String>, RotationError> {
    let Some(test) = repo.fetch_test(test_id).await? else {
        return Ok(None);
    };

    let entries = repo.fetch_summaries(test_id).await?;
    Ok(pick_winner(test.winner_metric, &entries).map(|v| v.text.clone()))
}
