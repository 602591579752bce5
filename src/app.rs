//! Service wiring shared by the CLI and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use crate::chat::ChatService;
use crate::completion::{CompletionClient, CompletionTransport, OpenAiTransport};
use crate::config::Config;
use crate::conversation::ConversationOrchestrator;
use crate::db;
use crate::embedding::{create_embedder, EmbeddingClient};
use crate::functions::{FunctionCatalog, FunctionContext, FunctionExecutor};
use crate::ingest::IngestionPipeline;
use crate::migrate::migrate_pool;
use crate::retrieval::{create_retrieval, RetrievalService};
use crate::store::{SqliteVectorStore, VectorStore};

/// Every long-lived component, built once per process.
pub struct Services {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub pipeline: Arc<IngestionPipeline>,
    pub retrieval: Arc<dyn RetrievalService>,
    pub executor: Arc<FunctionExecutor>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub chat: Arc<ChatService>,
}

impl Services {
    /// Connect, migrate, and build providers from `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate_pool(&pool).await?;

        let embedder = create_embedder(&config.embedding)?;
        let transport: Option<Arc<dyn CompletionTransport>> = if config.completion.enabled {
            let transport =
                OpenAiTransport::new(&config.completion).context("Failed to build completion client")?;
            Some(Arc::new(transport))
        } else {
            None
        };

        Self::build(config, pool, embedder, transport, FunctionContext::new)
    }

    /// Assemble services from already-built parts. `function_context`
    /// receives the pool and returns the context functions execute in.
    pub fn build(
        config: Config,
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingClient>,
        transport: Option<Arc<dyn CompletionTransport>>,
        function_context: impl FnOnce(SqlitePool) -> FunctionContext,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));

        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            embedder.clone(),
            config.chunking.clone(),
        ));
        let retrieval = create_retrieval(&config.retrieval, store.clone(), embedder.clone())?;

        let executor = Arc::new(FunctionExecutor::new(
            Arc::new(FunctionCatalog::with_builtins()),
            function_context(pool.clone()),
            Duration::from_secs(config.completion.function_timeout_secs),
        ));

        let completion = transport.map(|t| {
            Arc::new(CompletionClient::new(t, executor.clone(), &config.completion))
        });
        info!(
            embeddings = embedder.is_enabled(),
            completion = completion.is_some(),
            retrieval = %config.retrieval.mode,
            "services ready"
        );

        let orchestrator = Arc::new(ConversationOrchestrator::new(
            completion,
            config.chat.fallback_message.clone(),
        ));
        let chat = Arc::new(ChatService::new(
            pool.clone(),
            retrieval.clone(),
            orchestrator.clone(),
            config.chat.history_limit,
        ));

        Ok(Self {
            config,
            pool,
            store,
            embedder,
            pipeline,
            retrieval,
            executor,
            orchestrator,
            chat,
        })
    }
}
