use std::sync::Arc;

use crate::auth::JwtManager;
use crate::config::Settings;
use crate::database::{DbPool, Repository};
use crate::rag::{AdvancedRagService, UnifiedChatService};
use crate::review::{ContractReviewEngine, ReviewEventBus};
use crate::services::{
    ChatMemoryStore, EmbeddingService, KnowledgeService, ModelDispatcher, VectorStore,
};
use crate::utils::limiters::Limiters;

/// Application state shared across handlers. Components receive their
/// collaborators by construction; nothing here is a singleton.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub db_pool: DbPool,
    pub repository: Arc<Repository>,
    pub jwt: Arc<JwtManager>,
    pub embedding: Arc<EmbeddingService>,
    pub vector_store: Arc<VectorStore>,
    pub knowledge: Arc<KnowledgeService>,
    pub memory: Arc<ChatMemoryStore>,
    pub dispatcher: Arc<ModelDispatcher>,
    pub rag: Arc<AdvancedRagService>,
    pub chat: Arc<UnifiedChatService>,
    pub review_engine: Arc<ContractReviewEngine>,
    pub review_events: Arc<ReviewEventBus>,
    pub limiters: Arc<Limiters>,
}
