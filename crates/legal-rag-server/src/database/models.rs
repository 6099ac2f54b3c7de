use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Indexed legal or reference document.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KnowledgeDocument {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub source_file: Option<String>,
    pub file_hash: String,
    pub document_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Law,
    Regulation,
    Case,
    ContractTemplate,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Law => "LAW",
            Self::Regulation => "REGULATION",
            Self::Case => "CASE",
            Self::ContractTemplate => "CONTRACT_TEMPLATE",
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LAW" => Ok(Self::Law),
            "REGULATION" => Ok(Self::Regulation),
            "CASE" => Ok(Self::Case),
            "CONTRACT_TEMPLATE" => Ok(Self::ContractTemplate),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

/// One chunk ready for insertion. Knowledge-document segments carry their
/// owning doc id; contract-review segments carry none and are tracked via
/// metadata instead.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub doc_id: Option<i64>,
    pub ord: i32,
    pub content: String,
    pub embedding: Vector,
    pub metadata: serde_json::Value,
}

/// Search hit returned by vector search. Score is cosine similarity
/// (1 - distance), descending.
#[derive(Debug, Clone, FromRow)]
pub struct SegmentMatch {
    pub id: i64,
    pub doc_id: Option<i64>,
    pub ord: i32,
    pub content: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

/// Knowledge document row with aggregated segment count for listings.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KnowledgeDocumentSummary {
    pub id: i64,
    pub title: String,
    pub document_type: String,
    pub segment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatSessionRow {
    pub id: String,
    pub user_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_model_type: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatMessageRow {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One turn inside a per-(conversation, model) memory window.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown review status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContractReview {
    pub id: i64,
    pub user_id: i64,
    pub original_filename: String,
    pub stored_path: String,
    pub file_size: i64,
    pub file_hash: String,
    pub review_status: String,
    pub risk_level: Option<String>,
    pub total_risks: Option<i32>,
    pub review_result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ContractReview {
    pub fn status(&self) -> ReviewStatus {
        self.review_status.parse().unwrap_or(ReviewStatus::Failed)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RiskClause {
    pub id: i64,
    pub review_id: i64,
    pub level: String,
    pub clause_type: String,
    pub clause_text: String,
    pub description: String,
    pub suggestion: String,
    pub legal_basis: String,
    pub position_start: i32,
    pub position_end: i32,
}

/// Risk clause fields before persistence (no id yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRiskClause {
    pub level: RiskLevel,
    pub clause_type: String,
    pub clause_text: String,
    pub description: String,
    pub suggestion: String,
    pub legal_basis: String,
    pub position_start: i32,
    pub position_end: i32,
}
