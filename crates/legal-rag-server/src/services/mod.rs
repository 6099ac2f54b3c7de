pub mod embedding;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod vector_store;

pub use embedding::EmbeddingService;
pub use knowledge::KnowledgeService;
pub use llm::{BackendKind, ChatBackend, ChatMessage, ChatOptions, ModelDispatcher};
pub use memory::ChatMemoryStore;
pub use vector_store::VectorStore;
