use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::ingest::Ingestor;
use crate::store::Store;
use crate::summarize::SummarizeStage;
use crate::translate::TranslationCache;
use crate::types::Result;

const RUN_LEASE_NAME: &str = "pipeline_run";

/// One end-to-end pass: ingest, summarize, warm translations, dispatch.
/// Guarded by a database lease so overlapping schedulers cannot double-send.
pub struct Pipeline {
    store: Arc<Store>,
    ingestor: Ingestor,
    summarizer: SummarizeStage,
    translations: Arc<TranslationCache>,
    dispatcher: Dispatcher,
    config: PipelineConfig,
    holder: String,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        ingestor: Ingestor,
        summarizer: SummarizeStage,
        translations: Arc<TranslationCache>,
        dispatcher: Dispatcher,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            ingestor,
            summarizer,
            translations,
            dispatcher,
            config,
            holder: Uuid::new_v4().to_string(),
        }
    }

    pub async fn run_once(&self) -> Result<Option<DispatchReport>> {
        if !self
            .store
            .acquire_run_lease(RUN_LEASE_NAME, &self.holder, self.config.lease_ttl)
            .await?
        {
            info!("Another pipeline run holds the lease, skipping this pass");
            return Ok(None);
        }

        let result = self.run_stages().await;

        if let Err(e) = self.store.release_run_lease(RUN_LEASE_NAME, &self.holder).await {
            warn!("Failed to release run lease: {}", e);
        }
        result.map(Some)
    }

    async fn run_stages(&self) -> Result<DispatchReport> {
        let ingested = self.ingestor.run().await?;
        let summarized = self
            .summarizer
            .summarize_pending(self.config.summarize_limit)
            .await?;
        let translated = self
            .translations
            .translate_needed(self.config.translate_limit)
            .await?;
        let report = self.dispatcher.run().await?;
        info!(
            "Pipeline pass complete: {} ingested, {} summarized, {} translated, {} sent, {} failed",
            ingested, summarized, translated, report.messages_sent, report.messages_failed
        );
        Ok(report)
    }

    /// Run on a fixed interval until the process is stopped. A failed
    /// pass is logged and the next tick still fires.
    pub async fn run_forever(&self) {
        let mut ticker = tokio::time::interval(self.config.run_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!("Pipeline pass failed: {}", e);
            }
        }
    }
}
