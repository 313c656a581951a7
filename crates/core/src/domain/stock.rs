use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted analyst rating for one (ticker, brokerage) pair.
///
/// `id` is assigned at fetch time and replaced by the stored row's id when the
/// pair already exists, so it stays stable across syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockRecord {
    pub id: Uuid,
    pub ticker: String,
    pub company: String,
    pub brokerage: String,
    pub action: String,
    pub rating_from: String,
    pub rating_to: String,
    pub target_from: f64,
    pub target_to: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StockRecord {
    pub fn identity(&self) -> (&str, &str) {
        (&self.ticker, &self.brokerage)
    }

    /// Percent move from `target_from` to `target_to`; zero when there is no
    /// positive starting target.
    pub fn change_percent(&self) -> f64 {
        if self.target_from > 0.0 {
            (self.target_to - self.target_from) / self.target_from * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn record(ticker: &str, brokerage: &str) -> StockRecord {
        let at = DateTime::parse_from_rfc3339("2026-10-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        StockRecord {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            company: format!("{ticker} Inc."),
            brokerage: brokerage.to_string(),
            action: "reiterated by".to_string(),
            rating_from: "Hold".to_string(),
            rating_to: "Hold".to_string(),
            target_from: 100.0,
            target_to: 100.0,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }
}
