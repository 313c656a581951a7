use crate::domain::stock::StockRecord;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingsPage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub items: Vec<RatingEvent>,
    #[serde(default)]
    pub next_page: Option<String>,
}

impl RatingsPage {
    /// Cursor for the following page; `None` once upstream stops handing one out.
    pub fn cursor(&self) -> Option<&str> {
        self.next_page.as_deref().filter(|c| !c.is_empty())
    }
}

/// One analyst rating change as upstream reports it. Target prices are raw
/// strings such as `"$1,234.50"`. Missing or `null` fields decode as empty so
/// a malformed item fails conversion on its own instead of the whole page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingEvent {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ticker: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub company: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub brokerage: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub action: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rating_from: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rating_to: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub target_from: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub target_to: String,
    #[serde(default)]
    pub time: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl RatingEvent {
    pub fn into_record(self, fetched_at: DateTime<Utc>) -> anyhow::Result<StockRecord> {
        anyhow::ensure!(!self.ticker.trim().is_empty(), "missing ticker");
        anyhow::ensure!(!self.brokerage.trim().is_empty(), "missing brokerage");
        let target_from = parse_target_price(&self.target_from)
            .with_context(|| format!("invalid target_from {:?}", self.target_from))?;
        let target_to = parse_target_price(&self.target_to)
            .with_context(|| format!("invalid target_to {:?}", self.target_to))?;

        Ok(StockRecord {
            id: Uuid::new_v4(),
            ticker: self.ticker,
            company: self.company,
            brokerage: self.brokerage,
            action: self.action,
            rating_from: self.rating_from,
            rating_to: self.rating_to,
            target_from,
            target_to,
            created_at: fetched_at,
            updated_at: fetched_at,
            deleted_at: None,
        })
    }
}

/// Strips one leading `$` and any thousands separators, then parses as a decimal.
pub fn parse_target_price(raw: &str) -> anyhow::Result<f64> {
    let s = raw.trim();
    let s = s.strip_prefix('$').unwrap_or(s).replace(',', "");
    let value = s
        .parse::<f64>()
        .with_context(|| format!("not a decimal number: {raw:?}"))?;
    anyhow::ensure!(value.is_finite(), "not a finite number: {raw:?}");
    Ok(value)
}
