pub mod tables;

use crate::domain::recommendation::StockRecommendation;
use crate::domain::stock::StockRecord;
use chrono::{DateTime, Utc};
pub use tables::{ScoringTables, ScoringWeights, DEFAULT_MIN_RATING};

/// Pure scoring over stock records. Identical inputs and clock readings give
/// identical results.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    tables: ScoringTables,
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(tables: ScoringTables, weights: ScoringWeights) -> Self {
        Self { tables, weights }
    }

    pub fn tables(&self) -> &ScoringTables {
        &self.tables
    }

    pub fn score(&self, record: &StockRecord, now: DateTime<Utc>) -> StockRecommendation {
        let change_percent = record.change_percent();

        let mut score = change_percent * self.weights.change_percent;
        score += self.tables.rating_value(&record.rating_to).unwrap_or(0.0);
        score += self.tables.action_value(&record.action).unwrap_or(0.0);
        if record.target_to > 0.0 {
            score += record.target_to.ln() * self.weights.price_log;
        }
        score += recency_bonus(record.updated_at, now);

        StockRecommendation {
            ticker: record.ticker.clone(),
            company: record.company.clone(),
            score,
            rating: record.rating_to.clone(),
            target_price: record.target_to,
            action: record.action.clone(),
            change_percent,
        }
    }

    /// Highest scores first, at most `top_n` entries. Equal scores keep input order.
    pub fn recommend(
        &self,
        records: &[StockRecord],
        top_n: usize,
        now: DateTime<Utc>,
    ) -> Vec<StockRecommendation> {
        self.rank(records.iter(), top_n, now)
    }

    pub fn recommend_filtered(
        &self,
        records: &[StockRecord],
        filter: &StockFilter,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> Vec<StockRecommendation> {
        self.rank(
            records.iter().filter(|r| filter.matches(r, &self.tables)),
            top_n,
            now,
        )
    }

    fn rank<'a, I>(&self, records: I, top_n: usize, now: DateTime<Utc>) -> Vec<StockRecommendation>
    where
        I: Iterator<Item = &'a StockRecord>,
    {
        let mut scored: Vec<StockRecommendation> = records.map(|r| self.score(r, now)).collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_n);
        scored
    }
}

fn recency_bonus(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours = (now - updated_at).num_seconds() as f64 / 3600.0;
    let days = (hours / 24.0).floor();
    if days <= 7.0 {
        2.0
    } else if days <= 30.0 {
        1.0
    } else {
        0.0
    }
}

/// Record predicate applied before ranking.
#[derive(Debug, Clone, PartialEq)]
pub enum StockFilter {
    Action(String),
    Brokerage(String),
    MinRating(f64),
}

impl StockFilter {
    pub fn by_action(action: impl Into<String>) -> Self {
        Self::Action(action.into())
    }

    pub fn by_brokerage(brokerage: impl Into<String>) -> Self {
        Self::Brokerage(brokerage.into())
    }

    /// Threshold is the table value of `label`, or [`DEFAULT_MIN_RATING`] if unknown.
    pub fn by_min_rating(tables: &ScoringTables, label: &str) -> Self {
        Self::MinRating(tables.rating_value(label).unwrap_or(DEFAULT_MIN_RATING))
    }

    pub fn matches(&self, record: &StockRecord, tables: &ScoringTables) -> bool {
        match self {
            Self::Action(action) => record.action == *action,
            Self::Brokerage(brokerage) => record.brokerage == *brokerage,
            Self::MinRating(min) => tables.rating_value(&record.rating_to).unwrap_or(0.0) >= *min,
        }
    }
}
