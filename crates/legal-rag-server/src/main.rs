use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

mod auth;
mod config;
mod database;
mod document;
mod handlers;
mod models;
mod rag;
mod review;
mod services;
mod state;
mod utils;

use auth::JwtManager;
use config::Settings;
use database::{DbPool, Repository};
use document::{DocumentParser, TextChunker};
use rag::{
    AdvancedRagService, ContentAggregator, ContentRetriever, UnifiedChatService, VectorRetriever,
};
use review::{ContractReviewEngine, ReviewEventBus, ReviewQueue};
use services::llm::{DeepSeekBackend, LangChainBackend, OllamaBackend};
use services::{
    ChatBackend, ChatMemoryStore, EmbeddingService, KnowledgeService, ModelDispatcher, VectorStore,
};
use state::AppState;
use utils::limiters::Limiters;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,legal_rag_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting legal RAG server...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    sqlx::migrate!("./migrations").run(db_pool.get_pool()).await?;
    info!("Database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));
    let limiters = Arc::new(Limiters::new(&settings.limits));
    let jwt = Arc::new(JwtManager::new(&settings.auth.jwt_secret));

    // Document processing
    let chunker = Arc::new(TextChunker::new(
        settings.rag.chunk_size,
        settings.rag.chunk_overlap,
        settings.embedding.max_tokens,
    )?);
    let parser = Arc::new(DocumentParser::new(settings.review.max_file_mb));

    // Embedding + vector store
    let embedding = Arc::new(EmbeddingService::new(
        settings.embedding.clone(),
        chunker.clone(),
        limiters.clone(),
        settings.timeouts.embed_seconds,
    ));
    let vector_store = Arc::new(VectorStore::new(
        repository.clone(),
        settings.embedding.dimension,
        limiters.clone(),
        settings.timeouts.search_seconds,
    ));

    let knowledge = Arc::new(KnowledgeService::new(
        repository.clone(),
        parser.clone(),
        chunker.clone(),
        embedding.clone(),
    ));

    // Model backends
    let backends: Vec<Arc<dyn ChatBackend>> = vec![
        Arc::new(OllamaBackend::new(settings.models.ollama.clone())),
        Arc::new(DeepSeekBackend::new(settings.models.deepseek.clone())),
        Arc::new(LangChainBackend::new(settings.models.langchain.clone())),
    ];
    let dispatcher = Arc::new(ModelDispatcher::new(
        backends,
        limiters.clone(),
        settings.timeouts.chat_seconds,
        settings.timeouts.stream_seconds,
    ));

    let memory = Arc::new(ChatMemoryStore::new(
        repository.clone(),
        settings.memory.window_size,
        settings.timeouts.persist_seconds,
    ));

    // Retrieval pipeline
    let legal_retriever: Arc<dyn ContentRetriever> = Arc::new(VectorRetriever::legal_corpus(
        embedding.clone(),
        vector_store.clone(),
    ));
    let template_retriever: Arc<dyn ContentRetriever> = Arc::new(
        VectorRetriever::contract_templates(embedding.clone(), vector_store.clone()),
    );

    let rag_service = Arc::new(AdvancedRagService::new(
        vec![legal_retriever.clone(), template_retriever],
        ContentAggregator::new(settings.aggregator.clone()),
        dispatcher.clone(),
        settings.rag.retrieval_top_k,
    ));

    let chat_service = Arc::new(UnifiedChatService::new(
        rag_service.clone(),
        dispatcher.clone(),
        memory.clone(),
        repository.clone(),
        legal_retriever,
        settings.stream.queue_capacity,
        settings.rag.retrieval_top_k,
    ));

    // Contract review pipeline
    let review_events = Arc::new(ReviewEventBus::new());
    let review_queue = ReviewQueue::new();
    let review_engine = Arc::new(ContractReviewEngine::new(
        repository.clone(),
        parser.clone(),
        chunker.clone(),
        embedding.clone(),
        vector_store.clone(),
        rag_service.clone(),
        dispatcher.clone(),
        review_events.clone(),
        review_queue.sender(),
        settings.review.clone(),
    ));
    review_queue.spawn_workers(review_engine.clone(), settings.review.workers);
    info!("Started {} review workers", settings.review.workers);

    let state = Arc::new(AppState {
        settings: settings.clone(),
        db_pool,
        repository,
        jwt,
        embedding,
        vector_store,
        knowledge,
        memory,
        dispatcher,
        rag: rag_service,
        chat: chat_service,
        review_engine,
        review_events,
        limiters,
    });

    let app = build_router(state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        // Chat
        .route("/chat", post(handlers::chat::chat_handler))
        .route("/chat/stream", post(handlers::chat::chat_stream_handler))
        .route("/chat/sessions", get(handlers::chat::list_sessions_handler))
        .route(
            "/chat/sessions/{id}",
            get(handlers::chat::get_session_handler).delete(handlers::chat::delete_session_handler),
        )
        .route(
            "/chat/session/{conversation_id}",
            delete(handlers::chat::clear_memory_handler),
        )
        // Contract review
        .route("/contracts/upload", post(handlers::contracts::upload_handler))
        .route(
            "/contracts/my-reviews",
            get(handlers::contracts::my_reviews_handler),
        )
        .route(
            "/contracts/{id}/analyze-async",
            get(handlers::contracts::analyze_async_handler),
        )
        .route("/contracts/{id}", get(handlers::contracts::get_review_handler))
        .route(
            "/contracts/{id}/summary",
            get(handlers::contracts::review_summary_handler),
        )
        .route(
            "/contracts/{id}/report",
            get(handlers::contracts::review_report_handler),
        )
        .route(
            "/contracts/{id}/reprocess",
            post(handlers::contracts::reprocess_handler),
        )
        // Knowledge registry (admin)
        .route("/knowledge/upload", post(handlers::knowledge::upload_handler))
        .route(
            "/knowledge/documents",
            get(handlers::knowledge::list_handler),
        )
        .route(
            "/knowledge/documents/{id}",
            delete(handlers::knowledge::delete_handler),
        )
        .route(
            "/knowledge/documents/{id}/reprocess",
            post(handlers::knowledge::reprocess_handler),
        );

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        // Uploads up to the configured contract cap plus headroom
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
}
