use crate::database::{ContractReview, RiskClause};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub review_id: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub review_id: i64,
    pub original_filename: String,
    pub status: String,
    pub risk_level: Option<String>,
    pub total_risks: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&ContractReview> for ReviewSummary {
    fn from(r: &ContractReview) -> Self {
        Self {
            review_id: r.id,
            original_filename: r.original_filename.clone(),
            status: r.review_status.clone(),
            risk_level: r.risk_level.clone(),
            total_risks: r.total_risks,
            created_at: r.created_at,
            completed_at: r.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDetail {
    #[serde(flatten)]
    pub summary: ReviewSummary,
    pub review_result: Option<serde_json::Value>,
    pub risk_clauses: Vec<RiskClauseInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskClauseInfo {
    pub level: String,
    #[serde(rename = "type")]
    pub clause_type: String,
    pub clause_text: String,
    pub description: String,
    pub suggestion: String,
    pub legal_basis: String,
    pub position_start: i32,
    pub position_end: i32,
}

impl From<&RiskClause> for RiskClauseInfo {
    fn from(c: &RiskClause) -> Self {
        Self {
            level: c.level.clone(),
            clause_type: c.clause_type.clone(),
            clause_text: c.clause_text.clone(),
            description: c.description.clone(),
            suggestion: c.suggestion.clone(),
            legal_basis: c.legal_basis.clone(),
            position_start: c.position_start,
            position_end: c.position_end,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedReviews {
    pub items: Vec<ReviewSummary>,
    pub page: i64,
    pub size: i64,
    pub total: i64,
}
