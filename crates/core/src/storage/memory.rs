use crate::domain::stock::StockRecord;
use crate::storage::stocks::{ChunkWriter, StockReader};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

type Key = (String, String);

/// In-memory store with the same lookup-then-write semantics as the Postgres
/// store. Scripted failures abort a chunk halfway through and discard it.
#[derive(Debug, Default)]
pub struct MemoryStockStore {
    rows: Mutex<BTreeMap<Key, StockRecord>>,
    script: Mutex<VecDeque<Option<&'static str>>>,
    committed: Mutex<Vec<usize>>,
    calls: Mutex<usize>,
}

impl MemoryStockStore {
    pub fn with_rows(rows: Vec<StockRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = store.rows.lock().unwrap();
            for r in rows {
                map.insert(key_of(&r), r);
            }
        }
        store
    }

    /// One entry per upcoming `apply_chunk` call; `Some(msg)` fails that call.
    pub fn script_failures(&self, script: &[Option<&'static str>]) {
        self.script.lock().unwrap().extend(script.iter().copied());
    }

    pub fn committed_chunk_sizes(&self) -> Vec<usize> {
        self.committed.lock().unwrap().clone()
    }

    pub fn apply_calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, ticker: &str, brokerage: &str) -> Option<StockRecord> {
        self.rows
            .lock()
            .unwrap()
            .get(&(ticker.to_string(), brokerage.to_string()))
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<StockRecord> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    fn ordered(&self) -> Vec<StockRecord> {
        let mut rows: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.deleted_at.is_none())
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        rows
    }
}

fn key_of(record: &StockRecord) -> Key {
    let (ticker, brokerage) = record.identity();
    (ticker.to_string(), brokerage.to_string())
}

fn upsert(rows: &mut BTreeMap<Key, StockRecord>, record: &StockRecord) {
    let key = key_of(record);
    match rows.get_mut(&key) {
        Some(existing) => {
            existing.company = record.company.clone();
            existing.action = record.action.clone();
            existing.rating_from = record.rating_from.clone();
            existing.rating_to = record.rating_to.clone();
            existing.target_from = record.target_from;
            existing.target_to = record.target_to;
            existing.updated_at = record.updated_at;
        }
        None => {
            rows.insert(key, record.clone());
        }
    }
}

#[async_trait::async_trait]
impl ChunkWriter for MemoryStockStore {
    async fn apply_chunk(&self, chunk: &[StockRecord]) -> anyhow::Result<()> {
        *self.calls.lock().unwrap() += 1;
        let failure = self.script.lock().unwrap().pop_front().flatten();

        let mut working = self.rows.lock().unwrap().clone();
        for (i, record) in chunk.iter().enumerate() {
            if let Some(msg) = failure {
                if i == chunk.len() / 2 {
                    anyhow::bail!("{msg}");
                }
            }
            upsert(&mut working, record);
        }
        if let Some(msg) = failure {
            anyhow::bail!("{msg}");
        }

        *self.rows.lock().unwrap() = working;
        self.committed.lock().unwrap().push(chunk.len());
        Ok(())
    }
}

#[async_trait::async_trait]
impl StockReader for MemoryStockStore {
    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<StockRecord>, u64)> {
        let rows = self.ordered();
        let total = rows.len() as u64;
        let start = (page.max(1) as usize - 1) * page_size as usize;
        let out = rows.into_iter().skip(start).take(page_size as usize).collect();
        Ok((out, total))
    }

    async fn list_all(&self) -> anyhow::Result<Vec<StockRecord>> {
        Ok(self.ordered())
    }
}
