use crate::domain::recommendation::StockRecommendation;
use crate::domain::stock::StockRecord;
use crate::scoring::{ScoringEngine, StockFilter};
use crate::storage::stocks::StockReader;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct StockPage {
    pub items: Vec<StockRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
}

impl StockPage {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_items.div_ceil(u64::from(self.page_size))
    }
}

/// Read-only view over the store. Holds no per-request state, so one instance
/// is shared across all handlers.
#[derive(Clone)]
pub struct StockQueryService {
    reader: Arc<dyn StockReader>,
    engine: Arc<ScoringEngine>,
}

impl StockQueryService {
    pub fn new(reader: Arc<dyn StockReader>, engine: ScoringEngine) -> Self {
        Self {
            reader,
            engine: Arc::new(engine),
        }
    }

    pub async fn list_stocks(&self, page: u32, page_size: u32) -> anyhow::Result<StockPage> {
        let page = page.max(1);
        let page_size = if (1..=MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };

        let (items, total_items) = self.reader.list_page(page, page_size).await?;
        Ok(StockPage {
            items,
            page,
            page_size,
            total_items,
        })
    }

    pub async fn recommendations(
        &self,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StockRecommendation>> {
        let records = self.reader.list_all().await?;
        Ok(self.engine.recommend(&records, top_n, now))
    }

    pub async fn top_by_action(
        &self,
        action: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StockRecommendation>> {
        self.filtered(StockFilter::by_action(action), limit, now).await
    }

    pub async fn top_by_brokerage(
        &self,
        brokerage: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StockRecommendation>> {
        self.filtered(StockFilter::by_brokerage(brokerage), limit, now)
            .await
    }

    pub async fn top_by_rating(
        &self,
        min_rating: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StockRecommendation>> {
        let filter = StockFilter::by_min_rating(self.engine.tables(), min_rating);
        self.filtered(filter, limit, now).await
    }

    async fn filtered(
        &self,
        filter: StockFilter,
        limit: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StockRecommendation>> {
        let records = self.reader.list_all().await?;
        Ok(self.engine.recommend_filtered(&records, &filter, limit, now))
    }
}
