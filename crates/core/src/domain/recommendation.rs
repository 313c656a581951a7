use serde::{Deserialize, Serialize};

/// A scored view of a [`StockRecord`](crate::domain::stock::StockRecord). Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecommendation {
    pub ticker: String,
    pub company: String,
    pub score: f64,
    pub rating: String,
    pub target_price: f64,
    pub action: String,
    pub change_percent: f64,
}
