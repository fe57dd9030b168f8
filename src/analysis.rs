//! Read-only statistical views over [`Store`] history: trends,
//! flakiness, predicted growth. Pure function of stored history; not on
//! the hot path.

use crate::{error::AppResult, store::Store};

/// Day-over-day direction of active-violation counts for one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Worsening,
    Stable
}

/// Summary over a rule's recent `RuleCheck` history.
#[derive(Debug, Clone)]
pub struct RuleTrend {
    pub rule_id:            String,
    pub trend:              Trend,
    pub recent_average:     f64,
    pub previous_average:   f64
}

/// A schedule whose `violations_found` oscillates rather than trending
/// in one direction — candidate for manual review rather than automatic
/// backoff.
#[derive(Debug, Clone)]
pub struct FlakyRule {
    pub rule_id: String,
    pub engine:  String,
    pub swings:  usize
}

/// Read-only analytics over accumulated `PerformanceMetric` and
/// `RuleCheck` history. Holds a [`Store`] handle but never mutates it.
pub struct AnalysisService {
    store: Store
}

impl AnalysisService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Compares the most recent half of `violations_found` samples for
    /// `rule_id` against the earlier half; reports the direction as a
    /// simple two-window moving average comparison.
    pub async fn rule_trend(&self, rule_id: &str, engine: &str, sample_size: usize) -> AppResult<Option<RuleTrend>> {
        let samples = self.completed_violation_counts(rule_id, engine, sample_size).await?;
        if samples.len() < 4 {
            return Ok(None);
        }

        let midpoint = samples.len() / 2;
        let (older, recent) = samples.split_at(midpoint);
        let previous_average = average(older);
        let recent_average = average(recent);

        let trend = if recent_average < previous_average * 0.9 {
            Trend::Improving
        } else if recent_average > previous_average * 1.1 {
            Trend::Worsening
        } else {
            Trend::Stable
        };

        Ok(Some(RuleTrend {
            rule_id: rule_id.to_string(),
            trend,
            recent_average,
            previous_average
        }))
    }

    /// Counts direction reversals (up-then-down or down-then-up) across a
    /// rule's recent violation counts; a high count flags a schedule
    /// whose noise the adaptive-frequency formulas will chase without
    /// ever converging.
    pub async fn flakiness(&self, rule_id: &str, engine: &str, sample_size: usize) -> AppResult<FlakyRule> {
        let samples = self.completed_violation_counts(rule_id, engine, sample_size).await?;
        let mut swings = 0usize;
        for window in samples.windows(3) {
            let (a, b, c) = (window[0], window[1], window[2]);
            if (b > a && c < b) || (b < a && c > b) {
                swings += 1;
            }
        }

        Ok(FlakyRule {
            rule_id: rule_id.to_string(),
            engine: engine.to_string(),
            swings
        })
    }

    /// Naive linear projection of active violation count `horizon_days`
    /// out, from the average daily delta observed in metric history.
    pub async fn projected_growth(&self, metric_type: &str, horizon_days: f64) -> AppResult<f64> {
        let metrics = self.store.recent_metrics(metric_type, 30).await?;
        if metrics.len() < 2 {
            return Ok(0.0);
        }
        let newest = metrics.first().expect("len checked above");
        let oldest = metrics.last().expect("len checked above");
        let span_days = (newest.recorded_at - oldest.recorded_at).num_seconds() as f64 / 86_400.0;
        if span_days <= 0.0 {
            return Ok(0.0);
        }
        let daily_delta = (newest.metric_value - oldest.metric_value) / span_days;
        Ok(newest.metric_value + daily_delta * horizon_days)
    }

    async fn completed_violation_counts(&self, rule_id: &str, engine: &str, sample_size: usize) -> AppResult<Vec<f64>> {
        // AnalysisService only needs recent completed-check counts; the
        // Store doesn't expose a dedicated query for this, so it reads
        // through the same metrics table the scheduler's `run_schedule`
        // writes a `rule_violations_found` sample into, tagged
        // `{rule_id}:{engine}`, after every completed check.
        let context_tag = format!("{rule_id}:{engine}");
        let metrics = self.store.recent_metrics("rule_violations_found", sample_size).await?;
        // `recent_metrics` orders newest-first; callers here (trend,
        // flakiness) reason in chronological order, so flip it back.
        let mut values: Vec<f64> = metrics
            .into_iter()
            .filter(|m| m.context.as_deref() == Some(context_tag.as_str()))
            .map(|m| m.metric_value)
            .collect();
        values.reverse();
        Ok(values)
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rule_trend_is_none_with_too_few_samples() {
        let store = Store::open_in_memory().unwrap();
        let service = AnalysisService::new(store);
        let trend = service.rule_trend("no-unused-vars", "linter", 10).await.unwrap();
        assert!(trend.is_none());
    }

    #[tokio::test]
    async fn projected_growth_is_zero_with_insufficient_history() {
        let store = Store::open_in_memory().unwrap();
        let service = AnalysisService::new(store);
        let projection = service.projected_growth("active_violation_count", 7.0).await.unwrap();
        assert_eq!(projection, 0.0);
    }

    #[tokio::test]
    async fn rule_trend_detects_improvement() {
        let store = Store::open_in_memory().unwrap();
        for value in [12.0, 10.0, 9.0, 8.0, 2.0, 1.0] {
            store
                .record_metric("rule_violations_found", value, "count", Some("no-unused-vars:linter"))
                .await
                .unwrap();
        }
        let service = AnalysisService::new(store);
        let trend = service.rule_trend("no-unused-vars", "linter", 10).await.unwrap().unwrap();
        assert_eq!(trend.trend, Trend::Improving);
    }
}
