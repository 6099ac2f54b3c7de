use serde::{Deserialize, Serialize};

// ===== REQUEST MODELS =====

/// Chat dispatch mode. BASIC runs local retrieval over Ollama, ADVANCED is
/// the DeepSeek agent, ADVANCED_RAG is the full retrieval pipeline, and
/// UNIFIED routes by message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatMode {
    Basic,
    Advanced,
    AdvancedRag,
    Unified,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
            Self::Advanced => "ADVANCED",
            Self::AdvancedRag => "ADVANCED_RAG",
            Self::Unified => "UNIFIED",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub model_type: ChatMode,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "default_use_kb")]
    pub use_knowledge_base: bool,
}

fn default_use_kb() -> bool {
    true
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RagStatus {
    Success,
    EmptyQuestion,
    ProcessingError,
    Uninitialized,
}

/// Source attribution returned alongside an answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDetail {
    /// First 200 chars of the matched passage.
    pub content_preview: String,
    pub source_name: String,
    /// Relevance in [0, 1].
    pub relevance: f32,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub answer: String,
    pub has_knowledge_match: bool,
    pub source_count: usize,
    pub sources: Vec<SourceDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: RagStatus,
    pub duration_ms: u64,
    pub model_used: String,
}

// ===== STREAM EVENTS =====

/// Events pushed through the bounded stream queue from the generation task
/// to the SSE response. Exactly one terminal event (Done or Error) per
/// stream.
#[derive(Debug, Clone)]
pub enum ChatStreamEvent {
    Start { source_count: usize },
    Content { delta: String },
    Done { source_count: usize, session_id: String },
    Error { message: String },
}

impl ChatStreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Content { .. } => "content",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Wire payload. Content deltas carry raw text, never nested JSON.
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Start { source_count } => serde_json::json!({
                "sourceCount": source_count,
            }),
            Self::Content { delta } => serde_json::json!({
                "type": "content",
                "content": delta,
            }),
            Self::Done {
                source_count,
                session_id,
            } => serde_json::json!({
                "type": "done",
                "sourceCount": source_count,
                "sessionId": session_id,
            }),
            Self::Error { message } => serde_json::json!({
                "type": "error",
                "error": message,
            }),
        };

        value.to_string()
    }
}

// ===== SESSION LISTINGS =====

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub title: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_model_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session_id: String,
    pub title: String,
    pub messages: Vec<MessageInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_wire_names() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"message":"什么是合同违约？","modelType":"ADVANCED_RAG"}"#,
        )
        .unwrap();
        assert_eq!(req.model_type, ChatMode::AdvancedRag);
        assert!(req.use_knowledge_base);
        assert!(req.conversation_id.is_none());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result: Result<ChatRequest, _> =
            serde_json::from_str(r#"{"message":"hi","modelType":"TURBO"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_content_event_is_raw_text() {
        let event = ChatStreamEvent::Content {
            delta: "根据《民法典》".into(),
        };
        let parsed: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["type"], "content");
        assert_eq!(parsed["content"], "根据《民法典》");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(ChatStreamEvent::Done {
            source_count: 2,
            session_id: "s1".into()
        }
        .is_terminal());
        assert!(!ChatStreamEvent::Start { source_count: 2 }.is_terminal());
    }
}
