use super::aggregator::{ContentAggregator, RankedContent};
use super::injector::ContentInjector;
use super::query_analyzer::{QueryAnalyzer, QueryType};
use super::retriever::{Content, ContentRetriever, RetrieverKind};
use super::transformer::QueryTransformer;
use crate::models::chat::{ChatStreamEvent, RagStatus, SourceDetail};
use crate::services::llm::{BackendKind, ChatMessage, ChatOptions, ModelDispatcher};
use crate::utils::error::ApiError;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-session window inside this service, independent of the persistent
/// chat-memory store.
const SESSION_WINDOW: usize = 10;

const SOURCE_PREVIEW_CHARS: usize = 200;

/// Small-talk and capability questions that skip knowledge retrieval.
const NO_RETRIEVAL_PATTERNS: &[&str] = &[
    "你好", "您好", "hi", "hello", "嗨", "在吗",
    "早上好", "下午好", "晚上好", "谢谢", "再见",
    "你是谁", "你能做什么", "你会什么", "介绍一下你自己",
];

#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub has_knowledge_match: bool,
    pub source_count: usize,
    pub sources: Vec<SourceDetail>,
    pub session_id: String,
    pub status: RagStatus,
    pub duration_ms: u64,
    pub model_label: String,
}

/// What a streaming call produced; the dispatcher persists `answer` only
/// when `completed` (the done event was delivered).
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub answer: String,
    pub source_count: usize,
    pub completed: bool,
    pub model_label: String,
}

/// Retrieval-augmented chat over the legal corpus: query analysis,
/// transformation and routing, multi-source retrieval, aggregation,
/// prompt injection, and model dispatch.
pub struct AdvancedRagService {
    retrievers: Vec<Arc<dyn ContentRetriever>>,
    aggregator: ContentAggregator,
    dispatcher: Arc<ModelDispatcher>,
    sessions: DashMap<String, VecDeque<ChatMessage>>,
    top_k: usize,
}

impl AdvancedRagService {
    pub fn new(
        retrievers: Vec<Arc<dyn ContentRetriever>>,
        aggregator: ContentAggregator,
        dispatcher: Arc<ModelDispatcher>,
        top_k: usize,
    ) -> Self {
        Self {
            retrievers,
            aggregator,
            dispatcher,
            sessions: DashMap::new(),
            top_k,
        }
    }

    /// Retrieval without generation: analyze, transform, route, retrieve
    /// from every routed source, aggregate. Also used by the contract
    /// review pipeline to gather law context.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RankedContent>, ApiError> {
        if self.retrievers.is_empty() {
            return Err(ApiError::InternalError("no retrievers registered".to_string()));
        }

        let intent = QueryAnalyzer::analyze(question);
        let queries = QueryTransformer::transform(&intent);
        let plans = QueryTransformer::route(&intent, queries);

        // Precise article lookups additionally filter on the normalized
        // article tag carried in segment metadata.
        let article_filter = match intent.query_type {
            QueryType::PreciseArticle => intent
                .article_number
                .as_ref()
                .map(|a| serde_json::json!({ "article_number": a })),
            _ => None,
        };

        let mut lists: Vec<Vec<Content>> = Vec::new();

        for plan in &plans {
            for kind in &plan.retrievers {
                let Some(retriever) = self.retriever_for(*kind) else {
                    continue;
                };

                if let Some(filter) = &article_filter {
                    match retriever
                        .retrieve_with_filter(&plan.query, self.top_k, Some(filter.clone()))
                        .await
                    {
                        Ok(list) if !list.is_empty() => {
                            lists.push(list);
                            continue;
                        }
                        Ok(_) => {} // fall through to unfiltered search
                        Err(e) => {
                            warn!(retriever = kind.as_str(), error = %e, "filtered retrieval failed");
                        }
                    }
                }

                match retriever.retrieve(&plan.query, self.top_k).await {
                    Ok(list) => lists.push(list),
                    Err(e) => {
                        // A degraded source reduces recall, it does not fail
                        // the whole request.
                        warn!(retriever = kind.as_str(), error = %e, "retrieval failed");
                    }
                }
            }
        }

        if lists.iter().all(|l| l.is_empty()) {
            return Ok(Vec::new());
        }

        Ok(self.aggregator.aggregate(question, lists))
    }

    /// Synchronous chat: full pipeline, blocking generation.
    pub async fn chat(
        &self,
        question: &str,
        session_id: Option<String>,
        model_name: Option<&str>,
    ) -> RagAnswer {
        let start = Instant::now();
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if question.trim().is_empty() {
            return RagAnswer {
                answer: "问题不能为空，请输入您想咨询的法律问题。".to_string(),
                has_knowledge_match: false,
                source_count: 0,
                sources: Vec::new(),
                session_id,
                status: RagStatus::EmptyQuestion,
                duration_ms: start.elapsed().as_millis() as u64,
                model_label: String::new(),
            };
        }

        let contents = match self.retrieve(question).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "retrieval pipeline failed");
                return RagAnswer {
                    answer: "抱歉，知识检索服务暂时不可用，请稍后重试。".to_string(),
                    has_knowledge_match: false,
                    source_count: 0,
                    sources: Vec::new(),
                    session_id,
                    status: RagStatus::ProcessingError,
                    duration_ms: start.elapsed().as_millis() as u64,
                    model_label: String::new(),
                };
            }
        };

        let prompt = ContentInjector::build_prompt(question, &contents);
        let messages = self.messages_with_history(&session_id, &prompt);

        let options = ChatOptions {
            model: model_name.map(str::to_string),
            ..ChatOptions::default()
        };

        let backend = match self.select_backend(model_name).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "no backend available");
                return RagAnswer {
                    answer: "抱歉，模型服务暂时不可用，请稍后重试。".to_string(),
                    has_knowledge_match: !contents.is_empty(),
                    source_count: contents.len(),
                    sources: to_source_details(&contents),
                    session_id,
                    status: RagStatus::Uninitialized,
                    duration_ms: start.elapsed().as_millis() as u64,
                    model_label: String::new(),
                };
            }
        };

        let model_label = self.dispatcher.model_label(backend, &options);

        match self.dispatcher.chat(backend, messages, &options).await {
            Ok(answer) => {
                self.remember(&session_id, question, &answer);
                info!(
                    %session_id,
                    sources = contents.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "rag chat complete"
                );

                RagAnswer {
                    answer,
                    has_knowledge_match: !contents.is_empty(),
                    source_count: contents.len(),
                    sources: to_source_details(&contents),
                    session_id,
                    status: RagStatus::Success,
                    duration_ms: start.elapsed().as_millis() as u64,
                    model_label,
                }
            }
            Err(e) => {
                warn!(error = %e, "generation failed");
                RagAnswer {
                    answer: "抱歉，回答生成失败，请稍后重试。".to_string(),
                    has_knowledge_match: !contents.is_empty(),
                    source_count: contents.len(),
                    sources: to_source_details(&contents),
                    session_id,
                    status: RagStatus::ProcessingError,
                    duration_ms: start.elapsed().as_millis() as u64,
                    model_label,
                }
            }
        }
    }

    /// Streaming chat. Events are pushed through the bounded `sink`:
    /// one `start`, raw `content` deltas, then exactly one terminal
    /// `done` or `error`. A dropped receiver (client disconnect) stops
    /// forwarding; the outcome then reports `completed = false`.
    pub async fn stream_chat(
        &self,
        question: &str,
        session_id: &str,
        model_name: Option<&str>,
        sink: mpsc::Sender<ChatStreamEvent>,
    ) -> StreamOutcome {
        let mut outcome = StreamOutcome {
            answer: String::new(),
            source_count: 0,
            completed: false,
            model_label: String::new(),
        };

        if question.trim().is_empty() {
            let _ = sink
                .send(ChatStreamEvent::Error {
                    message: "问题不能为空".to_string(),
                })
                .await;
            return outcome;
        }

        let contents = if Self::needs_retrieval(question) {
            match self.retrieve(question).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "retrieval failed, continuing without knowledge");
                    Vec::new()
                }
            }
        } else {
            debug!(question, "retrieval skipped for small talk");
            Vec::new()
        };

        outcome.source_count = contents.len();

        if sink
            .send(ChatStreamEvent::Start {
                source_count: contents.len(),
            })
            .await
            .is_err()
        {
            return outcome;
        }

        let prompt = ContentInjector::build_prompt(question, &contents);
        let messages = self.messages_with_history(session_id, &prompt);

        let options = ChatOptions {
            model: model_name.map(str::to_string),
            ..ChatOptions::default()
        };

        let backend = match self.select_backend(model_name).await {
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
                    // Blocking send: a slow client backpressures the
                    // stream instead of dropping tokens. A closed channel
                    // means the client went away.
                    if sink.send(ChatStreamEvent::Content { delta }).await.is_err() {
                        debug!(session_id, "client disconnected mid-stream");
                        return outcome;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "upstream stream error");
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
                source_count: outcome.source_count,
                session_id: session_id.to_string(),
            })
            .await
            .is_ok()
        {
            outcome.completed = true;
            self.remember(session_id, question, &outcome.answer);
        }

        outcome
    }

    /// Drop the in-service window for a session.
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    fn retriever_for(&self, kind: RetrieverKind) -> Option<&Arc<dyn ContentRetriever>> {
        self.retrievers.iter().find(|r| r.kind() == kind)
    }

    async fn select_backend(&self, model_name: Option<&str>) -> Result<BackendKind, ApiError> {
        let preferred = self
            .dispatcher
            .resolve(model_name, BackendKind::LangChain4j);
        self.dispatcher.select_available(preferred).await
    }

    fn messages_with_history(&self, session_id: &str, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        if let Some(history) = self.sessions.get(session_id) {
            messages.extend(history.iter().cloned());
        }

        messages.push(ChatMessage::user(prompt));
        messages
    }

    fn remember(&self, session_id: &str, question: &str, answer: &str) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(SESSION_WINDOW));

        entry.push_back(ChatMessage::user(question));
        entry.push_back(ChatMessage::assistant(answer));

        while entry.len() > SESSION_WINDOW {
            entry.pop_front();
        }
    }

    /// Small-talk and capability questions skip retrieval entirely.
    fn needs_retrieval(question: &str) -> bool {
        let trimmed = question.trim().to_lowercase();

        if trimmed.chars().count() <= 16 {
            for pattern in NO_RETRIEVAL_PATTERNS {
                if trimmed.contains(pattern) {
                    return false;
                }
            }
        }

        true
    }
}

pub fn to_source_details(contents: &[RankedContent]) -> Vec<SourceDetail> {
    contents
        .iter()
        .map(|ranked| {
            let preview: String = ranked
                .content
                .text
                .chars()
                .take(SOURCE_PREVIEW_CHARS)
                .collect();

            SourceDetail {
                content_preview: preview,
                source_name: ranked.content.source.clone(),
                relevance: ranked.score.clamp(0.0, 1.0) as f32,
                content_type: ranked.kind.as_str().to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregatorConfig, LimitsConfig};
    use crate::rag::retriever::MockContentRetriever;
    use crate::services::llm::MockChatBackend;
    use crate::utils::limiters::Limiters;

    fn test_limiters() -> Arc<Limiters> {
        Arc::new(Limiters::new(&LimitsConfig {
            embedding_concurrency: 2,
            search_concurrency: 2,
            llm_generate_concurrency: 2,
            llm_stream_concurrency: 2,
            acquire_timeout_ms: 1000,
        }))
    }

    fn mock_backend() -> MockChatBackend {
        let mut backend = MockChatBackend::new();
        backend
            .expect_kind()
            .return_const(BackendKind::LangChain4j);
        backend
            .expect_default_model()
            .return_const("test-model".to_string());
        backend.expect_is_available().returning(|| true);
        backend
    }

    fn mock_retriever(contents: Vec<Content>) -> MockContentRetriever {
        let mut retriever = MockContentRetriever::new();
        retriever
            .expect_kind()
            .return_const(RetrieverKind::LegalCorpus);
        retriever
            .expect_retrieve()
            .returning(move |_, _| Ok(contents.clone()));
        retriever
    }

    fn law_content() -> Content {
        Content {
            text: "第五百七十七条 当事人一方不履行合同义务的，应当承担违约责任。出自民法典。"
                .to_string(),
            source: "民法典".to_string(),
            metadata: serde_json::json!({}),
            score: 0.9,
        }
    }

    fn service_with(
        retrievers: Vec<Arc<dyn ContentRetriever>>,
        backend: MockChatBackend,
    ) -> AdvancedRagService {
        let dispatcher = Arc::new(ModelDispatcher::new(
            vec![Arc::new(backend)],
            test_limiters(),
            5,
            5,
        ));

        AdvancedRagService::new(
            retrievers,
            crate::rag::ContentAggregator::new(AggregatorConfig::default()),
            dispatcher,
            10,
        )
    }

    #[tokio::test]
    async fn test_chat_empty_question() {
        let service = service_with(vec![], mock_backend());

        let answer = service.chat("   ", Some("s1".into()), None).await;

        assert_eq!(answer.status, RagStatus::EmptyQuestion);
        assert_eq!(answer.session_id, "s1");
        assert_eq!(answer.source_count, 0);
    }

    #[tokio::test]
    async fn test_chat_with_knowledge_match() {
        let mut backend = mock_backend();
        backend
            .expect_chat()
            .returning(|_, _| Ok("根据民法典第五百七十七条……".to_string()));

        let retriever: Arc<dyn ContentRetriever> = Arc::new(mock_retriever(vec![law_content()]));
        let service = service_with(vec![retriever], backend);

        let answer = service
            .chat("什么是合同违约？", Some("s1".into()), None)
            .await;

        assert_eq!(answer.status, RagStatus::Success);
        assert!(answer.has_knowledge_match);
        assert_eq!(answer.source_count, 1);
        assert_eq!(answer.sources[0].source_name, "民法典");
        assert_eq!(answer.model_label, "test-model (langchain4j)");
    }

    #[tokio::test]
    async fn test_stream_chat_event_sequence() {
        let mut backend = mock_backend();
        backend.expect_chat_stream().returning(|_, _| {
            let stream: crate::services::llm::TokenStream =
                Box::pin(futures::stream::iter(vec![
                    Ok("根据".to_string()),
                    Ok("民法典".to_string()),
                ]));
            Ok(stream)
        });

        let retriever: Arc<dyn ContentRetriever> = Arc::new(mock_retriever(vec![law_content()]));
        let service = service_with(vec![retriever], backend);

        let (tx, mut rx) = mpsc::channel(16);
        let outcome = service.stream_chat("什么是合同违约？", "s1", None, tx).await;

        assert!(outcome.completed);
        assert_eq!(outcome.answer, "根据民法典");
        assert_eq!(outcome.source_count, 1);

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["start", "content", "content", "done"]);
    }

    #[tokio::test]
    async fn test_stream_upstream_error_is_terminal() {
        let mut backend = mock_backend();
        backend.expect_chat_stream().returning(|_, _| {
            let stream: crate::services::llm::TokenStream =
                Box::pin(futures::stream::iter(vec![
                    Ok("部分".to_string()),
                    Err(crate::utils::error::ApiError::ModelUnavailable("down".into())),
                ]));
            Ok(stream)
        });

        let retriever: Arc<dyn ContentRetriever> = Arc::new(mock_retriever(vec![law_content()]));
        let service = service_with(vec![retriever], backend);

        let (tx, mut rx) = mpsc::channel(16);
        let outcome = service.stream_chat("什么是合同违约？", "s1", None, tx).await;

        assert!(!outcome.completed);

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["start", "content", "error"]);
    }

    #[tokio::test]
    async fn test_stream_client_disconnect_not_completed() {
        let backend = mock_backend();
        let retriever: Arc<dyn ContentRetriever> = Arc::new(mock_retriever(vec![law_content()]));
        let service = service_with(vec![retriever], backend);

        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let outcome = service.stream_chat("什么是合同违约？", "s1", None, tx).await;

        assert!(!outcome.completed);
        assert!(outcome.answer.is_empty());
    }

    #[test]
    fn test_needs_retrieval_allows_legal_questions() {
        assert!(AdvancedRagService::needs_retrieval("什么是合同违约？"));
        assert!(AdvancedRagService::needs_retrieval(
            "环境保护法第三十条规定了什么？"
        ));
    }

    #[test]
    fn test_greetings_skip_retrieval() {
        assert!(!AdvancedRagService::needs_retrieval("你好"));
        assert!(!AdvancedRagService::needs_retrieval("hello"));
        assert!(!AdvancedRagService::needs_retrieval("你是谁？"));
        assert!(!AdvancedRagService::needs_retrieval("谢谢你"));
    }

    #[test]
    fn test_long_message_with_greeting_still_retrieves() {
        assert!(AdvancedRagService::needs_retrieval(
            "你好，我想咨询一下劳动合同解除时的经济补偿问题应该怎么处理"
        ));
    }

    #[test]
    fn test_source_preview_truncated() {
        use crate::rag::aggregator::ContentKind;
        use crate::rag::retriever::Content;

        let ranked = RankedContent {
            content: Content {
                text: "条".repeat(400),
                source: "民法典".to_string(),
                metadata: serde_json::json!({}),
                score: 0.8,
            },
            kind: ContentKind::LawProvision,
            score: 0.8,
        };

        let details = to_source_details(&[ranked]);
        assert_eq!(details[0].content_preview.chars().count(), 200);
        assert_eq!(details[0].content_type, "LAW_PROVISION");
    }
}
