use std::sync::Arc;

use tracing::{info, warn};

use crate::sources::NewsSource;
use crate::store::Store;
use crate::types::Result;

/// Polls every registered source and upserts its articles. A failing
/// source is logged and skipped so the rest still run.
pub struct Ingestor {
    store: Arc<Store>,
    sources: Vec<Arc<dyn NewsSource>>,
    fetch_limit: usize,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, fetch_limit: usize) -> Self {
        Self {
            store,
            sources: Vec::new(),
            fetch_limit,
        }
    }

    pub fn register(&mut self, source: Arc<dyn NewsSource>) {
        self.sources.push(source);
    }

    pub async fn run(&self) -> Result<usize> {
        let mut total = 0;
        for source in &self.sources {
            match self.ingest_source(source.as_ref()).await {
                Ok(count) => {
                    info!("Ingested {} new articles from {}", count, source.source_name());
                    total += count;
                }
                Err(e) => warn!("Ingest failed for {}: {}", source.source_name(), e),
            }
        }
        Ok(total)
    }

    async fn ingest_source(&self, source: &dyn NewsSource) -> Result<usize> {
        let source_row = self
            .store
            .ensure_source(
                source.source_key(),
                source.source_url(),
                source.default_language(),
            )
            .await?;
        let fetched = source.fetch_latest(source_row.id, self.fetch_limit).await?;
        let mut created = 0;
        for article in fetched {
            let (_, is_new) = self.store.ingest_article(&article).await?;
            if is_new {
                created += 1;
            }
        }
        Ok(created)
    }
}
