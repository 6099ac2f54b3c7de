use super::injector::ContentInjector;
use super::retriever::ContentRetriever;
use super::service::{to_source_details, AdvancedRagService, StreamOutcome};
use crate::database::Repository;
use crate::models::chat::{ChatMode, ChatRequest, ChatResponse, ChatStreamEvent, RagStatus};
use crate::services::llm::{BackendKind, ChatMessage, ChatOptions, ModelDispatcher};
use crate::services::memory::ChatMemoryStore;
use crate::utils::error::ApiError;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SESSION_TITLE_CHARS: usize = 50;
const MAX_CONVERSATION_ID_CHARS: usize = 64;

const AGENT_SYSTEM_PROMPT: &str = "你是一名资深法律顾问，擅长案件分析、合同审查和法律文书起草。\
请结合用户的问题给出有条理、可执行的专业意见，并在必要时提示法律风险。";

// ===== UNIFIED routing classifier =====

const SIMPLE_QUERY_TOKENS: &[&str] = &[
    "什么是", "如何定义", "解释一下", "含义", "是什么意思",
    "包括哪些", "有哪些", "查询", "查找", "第几条", "哪一条",
];

const QUESTION_PARTICLES: &[&str] = &["吗", "呢", "么", "?", "？"];

const CASE_TOKENS: &[&str] = &["案例", "案情", "核心法律问题", "如何认定", "是否构成", "案件", "纠纷"];
const REASONING_TOKENS: &[&str] = &["分析", "判断", "评估", "应当如何", "如何处理", "怎么办", "建议", "对策"];
const GENERATION_TOKENS: &[&str] = &["起草", "撰写", "生成", "制作", "拟定"];
const REVIEW_TOKENS: &[&str] = &["审查", "审核", "检查", "风险", "隐患", "问题"];
const LIABILITY_TOKENS: &[&str] = &["责任", "赔偿", "承担", "后果", "处罚"];
const LEGAL_DOMAIN_TOKENS: &[&str] = &["合同", "违约", "侵权", "赔偿", "诉讼", "仲裁", "协议"];

pub fn is_simple_query(message: &str) -> bool {
    let len = message.chars().count();

    if len < 80 && SIMPLE_QUERY_TOKENS.iter().any(|t| message.contains(t)) {
        return true;
    }

    len < 20 && QUESTION_PARTICLES.iter().any(|t| message.contains(t))
}

pub fn is_complex_analysis(message: &str) -> bool {
    let len = message.chars().count();

    if len > 70 {
        return true;
    }

    for tokens in [
        CASE_TOKENS,
        REASONING_TOKENS,
        GENERATION_TOKENS,
        REVIEW_TOKENS,
        LIABILITY_TOKENS,
    ] {
        if tokens.iter().any(|t| message.contains(t)) {
            return true;
        }
    }

    LEGAL_DOMAIN_TOKENS
        .iter()
        .filter(|t| message.contains(*t))
        .count()
        >= 2
}

/// UNIFIED mode routing: simple lookups go to the retrieval pipeline,
/// everything that needs reasoning goes to the agent.
pub fn route_unified(message: &str) -> ChatMode {
    if is_simple_query(message) {
        ChatMode::AdvancedRag
    } else if is_complex_analysis(message) {
        ChatMode::Advanced
    } else {
        ChatMode::Advanced
    }
}

/// Routes chat requests across the four modes, owns session/message
/// persistence and SSE delivery.
pub struct UnifiedChatService {
    rag: Arc<AdvancedRagService>,
    dispatcher: Arc<ModelDispatcher>,
    memory: Arc<ChatMemoryStore>,
    repository: Arc<Repository>,
    basic_retriever: Arc<dyn ContentRetriever>,
    queue_capacity: usize,
    top_k: usize,
}

impl UnifiedChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rag: Arc<AdvancedRagService>,
        dispatcher: Arc<ModelDispatcher>,
        memory: Arc<ChatMemoryStore>,
        repository: Arc<Repository>,
        basic_retriever: Arc<dyn ContentRetriever>,
        queue_capacity: usize,
        top_k: usize,
    ) -> Self {
        Self {
            rag,
            dispatcher,
            memory,
            repository,
            basic_retriever,
            queue_capacity,
            top_k,
        }
    }

    fn validate(request: &ChatRequest) -> Result<(), ApiError> {
        if request.message.trim().is_empty() {
            return Err(ApiError::EmptyInput("message is empty".to_string()));
        }

        if let Some(id) = &request.conversation_id {
            if id.trim().is_empty() || id.chars().count() > MAX_CONVERSATION_ID_CHARS {
                return Err(ApiError::InvalidConversationId(id.clone()));
            }
        }

        Ok(())
    }

    fn effective_mode(request: &ChatRequest) -> ChatMode {
        match request.model_type {
            ChatMode::Unified => route_unified(&request.message),
            other => other,
        }
    }

    fn session_title(message: &str) -> String {
        message.chars().take(SESSION_TITLE_CHARS).collect()
    }

    /// Session upsert + user turn, one transaction, before any model work.
    async fn persist_user_turn(
        &self,
        request: &ChatRequest,
        user_id: i64,
    ) -> Result<(), ApiError> {
        let Some(conversation_id) = &request.conversation_id else {
            return Ok(());
        };

        self.repository
            .persist_user_turn(
                conversation_id,
                user_id,
                &Self::session_title(&request.message),
                request.model_type.as_str(),
                &request.message,
                &serde_json::json!({}),
            )
            .await?;

        Ok(())
    }

    async fn persist_assistant_turn(
        &self,
        conversation_id: &str,
        answer: &str,
        request: &ChatRequest,
        actual_model_used: &str,
        streaming: bool,
        source_count: usize,
    ) {
        let metadata = serde_json::json!({
            "modelType": request.model_type.as_str(),
            "requestedModel": request.model_name,
            "actualModelUsed": actual_model_used,
            "streaming": streaming,
            "sourceCount": source_count,
        });

        if let Err(e) = self
            .repository
            .insert_message(conversation_id, "assistant", answer, &metadata)
            .await
        {
            warn!(%conversation_id, error = %e, "failed to persist assistant turn");
        }
    }

    /// Blocking chat entry.
    pub async fn chat(&self, request: ChatRequest, user_id: i64) -> Result<ChatResponse, ApiError> {
        Self::validate(&request)?;

        let start = Instant::now();
        let mode = Self::effective_mode(&request);
        debug!(requested = request.model_type.as_str(), effective = mode.as_str(), "chat dispatch");

        self.persist_user_turn(&request, user_id).await?;

        let response = match mode {
            ChatMode::Basic => self.chat_basic(&request).await?,
            ChatMode::Advanced => self.chat_advanced(&request).await?,
            ChatMode::AdvancedRag | ChatMode::Unified => {
                let answer = self
                    .rag
                    .chat(
                        &request.message,
                        request.conversation_id.clone(),
                        request.model_name.as_deref(),
                    )
                    .await;

                ChatResponse {
                    answer: answer.answer,
                    has_knowledge_match: answer.has_knowledge_match,
                    source_count: answer.source_count,
                    sources: answer.sources,
                    session_id: Some(answer.session_id),
                    status: answer.status,
                    duration_ms: answer.duration_ms,
                    model_used: answer.model_label,
                }
            }
        };

        if let Some(conversation_id) = &request.conversation_id {
            self.persist_assistant_turn(
                conversation_id,
                &response.answer,
                &request,
                &response.model_used,
                false,
                response.source_count,
            )
            .await;
        }

        info!(
            mode = mode.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "chat complete"
        );

        Ok(response)
    }

    /// Streaming chat entry: spawns the generation task and returns the
    /// event receiver for SSE delivery. The task persists the assistant
    /// turn after `done`; a disconnect before `done` persists nothing.
    pub async fn stream(
        self: Arc<Self>,
        request: ChatRequest,
        user_id: i64,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>, ApiError> {
        Self::validate(&request)?;

        let mode = Self::effective_mode(&request);
        self.persist_user_turn(&request, user_id).await?;

        let (tx, rx) = mpsc::channel::<ChatStreamEvent>(self.queue_capacity);
        let session_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tokio::spawn(async move {
            let service = self;

            let outcome = match mode {
                ChatMode::AdvancedRag | ChatMode::Unified => {
                    service
                        .rag
                        .stream_chat(
                            &request.message,
                            &session_id,
                            request.model_name.as_deref(),
                            tx,
                        )
                        .await
                }
                ChatMode::Basic => service.stream_basic(&request, &session_id, tx).await,
                ChatMode::Advanced => service.stream_advanced(&request, &session_id, tx).await,
            };

            // Persist only a completed answer; a disconnect before `done`
            // leaves the user turn dangling by design.
            if outcome.completed && !outcome.answer.is_empty() {
                if let Some(conversation_id) = &request.conversation_id {
                    service
                        .persist_assistant_turn(
                            conversation_id,
                            &outcome.answer,
                            &request,
                            &outcome.model_label,
                            true,
                            outcome.source_count,
                        )
                        .await;
                }
            }
        });

        Ok(rx)
    }

    // ===== BASIC: local retrieval over Ollama =====

    async fn chat_basic(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let start = Instant::now();

        let (messages, contents, options) = self.prepare_basic(request).await?;
        let backend = self
            .dispatcher
            .select_available(self.dispatcher.resolve(request.model_name.as_deref(), BackendKind::Ollama))
            .await?;
        let model_used = self.dispatcher.model_label(backend, &options);

        let answer = self.dispatcher.chat(backend, messages, &options).await?;

        self.remember_turn(request, BackendKind::Ollama, &answer).await;

        Ok(ChatResponse {
            answer,
            has_knowledge_match: !contents.is_empty(),
            source_count: contents.len(),
            sources: to_source_details(&contents),
            session_id: request.conversation_id.clone(),
            status: RagStatus::Success,
            duration_ms: start.elapsed().as_millis() as u64,
            model_used,
        })
    }

    async fn stream_basic(
        &self,
        request: &ChatRequest,
        session_id: &str,
        sink: mpsc::Sender<ChatStreamEvent>,
    ) -> StreamOutcome {
        let prepared = self.prepare_basic(request).await;

        match prepared {
            Ok((messages, contents, options)) => {
                let outcome = self
                    .stream_backend(
                        BackendKind::Ollama,
                        request.model_name.as_deref(),
                        messages,
                        options,
                        contents.len(),
                        session_id,
                        sink,
                    )
                    .await;

                if outcome.completed {
                    self.remember_turn(request, BackendKind::Ollama, &outcome.answer)
                        .await;
                }

                outcome
            }
            Err(e) => {
                let _ = sink
                    .send(ChatStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                StreamOutcome {
                    answer: String::new(),
                    source_count: 0,
                    completed: false,
                    model_label: String::new(),
                }
            }
        }
    }

    async fn prepare_basic(
        &self,
        request: &ChatRequest,
    ) -> Result<
        (
            Vec<ChatMessage>,
            Vec<super::aggregator::RankedContent>,
            ChatOptions,
        ),
        ApiError,
    > {
        let contents = if request.use_knowledge_base {
            match self
                .basic_retriever
                .retrieve(&request.message, self.top_k)
                .await
            {
                Ok(raw) => raw
                    .into_iter()
                    .map(|content| super::aggregator::RankedContent {
                        kind: super::aggregator::infer_kind(&content),
                        score: content.score.clamp(0.0, 1.0) as f64,
                        content,
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "basic retrieval failed, answering without knowledge");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let prompt = ContentInjector::build_prompt(&request.message, &contents);

        let mut messages = Vec::new();
        if let Some(conversation_id) = &request.conversation_id {
            for m in self
                .memory
                .history(conversation_id, BackendKind::Ollama)
                .await?
            {
                messages.push(ChatMessage {
                    role: m.role,
                    content: m.content,
                });
            }
        }
        messages.push(ChatMessage::user(prompt));

        let options = ChatOptions {
            model: request.model_name.clone(),
            ..ChatOptions::default()
        };

        Ok((messages, contents, options))
    }

    // ===== ADVANCED: agent over DeepSeek =====

    async fn chat_advanced(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let start = Instant::now();

        let (messages, options) = self.prepare_advanced(request).await?;
        let backend = self
            .dispatcher
            .select_available(self.dispatcher.resolve(request.model_name.as_deref(), BackendKind::DeepSeek))
            .await?;
        let model_used = self.dispatcher.model_label(backend, &options);

        let answer = self.dispatcher.chat(backend, messages, &options).await?;

        self.remember_turn(request, BackendKind::DeepSeek, &answer).await;

        Ok(ChatResponse {
            answer,
            has_knowledge_match: false,
            source_count: 0,
            sources: Vec::new(),
            session_id: request.conversation_id.clone(),
            status: RagStatus::Success,
            duration_ms: start.elapsed().as_millis() as u64,
            model_used,
        })
    }

    async fn stream_advanced(
        &self,
        request: &ChatRequest,
        session_id: &str,
        sink: mpsc::Sender<ChatStreamEvent>,
    ) -> StreamOutcome {
        match self.prepare_advanced(request).await {
            Ok((messages, options)) => {
                let outcome = self
                    .stream_backend(
                        BackendKind::DeepSeek,
                        request.model_name.as_deref(),
                        messages,
                        options,
                        0,
                        session_id,
                        sink,
                    )
                    .await;

                if outcome.completed {
                    self.remember_turn(request, BackendKind::DeepSeek, &outcome.answer)
                        .await;
                }

                outcome
            }
            Err(e) => {
                let _ = sink
                    .send(ChatStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                StreamOutcome {
                    answer: String::new(),
                    source_count: 0,
                    completed: false,
                    model_label: String::new(),
                }
            }
        }
    }

    async fn prepare_advanced(
        &self,
        request: &ChatRequest,
    ) -> Result<(Vec<ChatMessage>, ChatOptions), ApiError> {
        let mut messages = vec![ChatMessage::system(AGENT_SYSTEM_PROMPT)];

        if let Some(conversation_id) = &request.conversation_id {
            for m in self
                .memory
                .history(conversation_id, BackendKind::DeepSeek)
                .await?
            {
                messages.push(ChatMessage {
                    role: m.role,
                    content: m.content,
                });
            }
        }

        messages.push(ChatMessage::user(request.message.clone()));

        let options = ChatOptions {
            model: request.model_name.clone(),
            ..ChatOptions::default()
        };

        Ok((messages, options))
    }

    // ===== shared plumbing =====

    /// Stream one backend call into the sink with the unified event
    /// contract; mirrors the RAG streaming loop for the non-RAG modes.
    #[allow(clippy::too_many_arguments)]
    async fn stream_backend(
        &self,
        default_backend: BackendKind,
        model_name: Option<&str>,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
        source_count: usize,
        session_id: &str,
        sink: mpsc::Sender<ChatStreamEvent>,
    ) -> StreamOutcome {
        let mut outcome = StreamOutcome {
            answer: String::new(),
            source_count,
            completed: false,
            model_label: String::new(),
        };

        if sink
            .send(ChatStreamEvent::Start { source_count })
            .await
            .is_err()
        {
            return outcome;
        }

        let backend = match self
            .dispatcher
            .select_available(self.dispatcher.resolve(model_name, default_backend))
            .await
        {
            Ok(b) => b,
            Err(e) => {
                let _ = sink
                    .send(ChatStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return outcome;
            }
        };

        outcome.model_label = self.dispatcher.model_label(backend, &options);

        let mut stream = match self.dispatcher.chat_stream(backend, messages, &options).await {
            Ok(s) => s,
            Err(e) => {
                let _ = sink
                    .send(ChatStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return outcome;
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => {
                    outcome.answer.push_str(&delta);
                    if sink.send(ChatStreamEvent::Content { delta }).await.is_err() {
                        debug!(session_id, "client disconnected mid-stream");
                        return outcome;
                    }
                }
                Err(e) => {
                    let _ = sink
                        .send(ChatStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return outcome;
                }
            }
        }

        if sink
            .send(ChatStreamEvent::Done {
                source_count,
                session_id: session_id.to_string(),
            })
            .await
            .is_ok()
        {
            outcome.completed = true;
        }

        outcome
    }

    async fn remember_turn(&self, request: &ChatRequest, backend: BackendKind, answer: &str) {
        let Some(conversation_id) = &request.conversation_id else {
            return;
        };

        if let Err(e) = self
            .memory
            .append(conversation_id, backend, "user", &request.message)
            .await
        {
            warn!(%conversation_id, error = %e, "memory append failed");
            return;
        }

        if let Err(e) = self
            .memory
            .append(conversation_id, backend, "assistant", answer)
            .await
        {
            warn!(%conversation_id, error = %e, "memory append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_query_by_token() {
        assert!(is_simple_query("什么是合同违约？"));
        assert!(is_simple_query("民法典第几条规定了诉讼时效"));
        assert!(is_simple_query("违约金的含义"));
    }

    #[test]
    fn test_simple_query_short_question() {
        assert!(is_simple_query("这样可以吗"));
        assert!(is_simple_query("能退定金么？"));
    }

    #[test]
    fn test_simple_query_rejects_long_text() {
        let long = format!("什么是{}", "合同条款细则".repeat(15));
        assert!(!is_simple_query(&long));
    }

    #[test]
    fn test_complex_by_case_tokens() {
        assert!(is_complex_analysis("这个案件中被告是否构成违约"));
        assert!(is_complex_analysis("请分析一下这起纠纷"));
    }

    #[test]
    fn test_complex_by_generation_tokens() {
        assert!(is_complex_analysis("帮我起草一份租赁协议"));
        assert!(is_complex_analysis("审查这份文件的风险"));
    }

    #[test]
    fn test_complex_by_length() {
        let long = "这".repeat(71);
        assert!(is_complex_analysis(&long));
    }

    #[test]
    fn test_complex_by_domain_token_count() {
        assert!(is_complex_analysis("合同里的违约条款"));
        assert!(!is_complex_analysis("今天天气怎样啊现在"));
    }

    #[test]
    fn test_unified_routing() {
        assert_eq!(route_unified("什么是合同违约？"), ChatMode::AdvancedRag);
        assert_eq!(
            route_unified("请分析这个案件中甲方应承担的违约责任"),
            ChatMode::Advanced
        );
        // Neither simple nor complex still goes to the agent
        assert_eq!(route_unified("今天天气怎样啊现在"), ChatMode::Advanced);
    }

    #[test]
    fn test_session_title_truncated() {
        let message = "这".repeat(80);
        assert_eq!(
            UnifiedChatService::session_title(&message).chars().count(),
            50
        );
    }
}
