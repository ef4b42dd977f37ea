pub mod access;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod pipeline;
pub mod schema;
pub mod sources;
pub mod store;
pub mod summarize;
pub mod translate;
pub mod transport;
pub mod types;

pub use access::{AccessPolicy, PremiumAccessPolicy};
pub use config::{DispatchConfig, PipelineConfig, SummarizerConfig, TranslatorConfig};
pub use dispatch::{DispatchReport, Dispatcher};
pub use ingest::Ingestor;
pub use pipeline::Pipeline;
pub use sources::{HackerNewsSource, NewsSource, RssSource};
pub use store::Store;
pub use summarize::{OpenAiSummarizer, SummarizeStage, Summarizer};
pub use translate::{LibreTranslator, TranslationCache, Translator};
pub use transport::{MessageTransport, OutboundMessage, TelegramTransport};
pub use types::*;
