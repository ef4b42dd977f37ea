use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tracing::{error, info};

use pingbrief::{
    Dispatcher, HackerNewsSource, Ingestor, LibreTranslator, OpenAiSummarizer, Pipeline,
    PipelineConfig, PremiumAccessPolicy, RssSource, Store, SummarizeStage, TelegramTransport,
    TranslationCache,
};

#[derive(Parser, Debug)]
#[command(name = "pingbrief", about = "News digest pipeline for chat delivery")]
struct Args {
    /// Run a single pipeline pass and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between scheduled passes.
    #[arg(long)]
    interval: Option<u64>,

    /// Extra RSS feed to ingest, as KEY=URL. Repeatable.
    #[arg(long = "feed", value_name = "KEY=URL")]
    feeds: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    if let Some(secs) = args.interval {
        config.run_interval = Duration::from_secs(secs);
    }

    info!("Connecting to {}", config.database_url);
    let store = Arc::new(Store::connect(&config.database_url).await?);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let mut ingestor = Ingestor::new(store.clone(), config.ingest_limit);
    ingestor.register(Arc::new(HackerNewsSource::new(client.clone())));
    for entry in &args.feeds {
        let Some((key, url)) = entry.split_once('=') else {
            bail!("invalid --feed value '{}', expected KEY=URL", entry);
        };
        ingestor.register(Arc::new(RssSource::new(client.clone(), key, key, url)?));
        info!("Registered RSS source {} -> {}", key, url);
    }

    let summarizer = SummarizeStage::new(
        store.clone(),
        Arc::new(OpenAiSummarizer::new(config.summarizer.clone())?),
    );
    let translator = LibreTranslator::new(config.translator.clone())?;
    let provider = translator.provider_name().to_string();
    let translations = Arc::new(TranslationCache::new(
        store.clone(),
        Arc::new(translator),
        provider,
        config.dispatch.base_language.clone(),
    ));
    let dispatcher = Dispatcher::new(
        store.clone(),
        translations.clone(),
        Arc::new(PremiumAccessPolicy::new(store.clone())),
        Arc::new(TelegramTransport::new(config.telegram_bot_token.clone())?),
        config.dispatch.clone(),
    );

    let pipeline = Pipeline::new(
        store,
        ingestor,
        summarizer,
        translations,
        dispatcher,
        config,
    );

    if args.once {
        match pipeline.run_once().await? {
            Some(report) => info!(
                "Single pass done: {} sent, {} failed",
                report.messages_sent, report.messages_failed
            ),
            None => info!("Single pass skipped, lease held elsewhere"),
        }
    } else {
        pipeline.run_forever().await;
    }
    Ok(())
}
