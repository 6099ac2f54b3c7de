//! LLM contract analysis: prompt construction, tolerant response parsing
//! with a single schema-reminder retry, and score computation.

use crate::database::{NewRiskClause, RiskLevel};
use serde::Deserialize;

/// Contract text sent to the model is capped to keep prompts bounded.
const MAX_CONTRACT_PROMPT_CHARS: usize = 6000;

const ANALYSIS_SCHEMA: &str = r#"{
  "summary": "合同整体评价（字符串，必填）",
  "detailedAnalysis": "详细分析（字符串）",
  "keyClauses": ["关键条款摘要"],
  "riskClauses": [
    {
      "level": "HIGH | MEDIUM | LOW",
      "type": "风险类型，如 违约责任、付款条件",
      "clauseText": "原文片段",
      "description": "风险说明",
      "suggestion": "修改建议",
      "legalBasis": "法律依据，如《民法典》第五百条"
    }
  ]
}"#;

/// Structured object expected from the model. Unknown fields are ignored;
/// most fields default so partially-filled answers still parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub detailed_analysis: String,
    #[serde(default)]
    pub key_clauses: Vec<String>,
    #[serde(default)]
    pub risk_clauses: Vec<LlmRiskClause>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmRiskClause {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default, alias = "type")]
    pub clause_type: String,
    #[serde(default)]
    pub clause_text: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub legal_basis: String,
}

fn default_level() -> String {
    "MEDIUM".to_string()
}

pub fn build_analysis_prompt(contract_text: &str, law_context: &str) -> String {
    let excerpt: String = contract_text.chars().take(MAX_CONTRACT_PROMPT_CHARS).collect();

    format!(
        "你是一名专业的合同审查律师。请审查下面的合同文本，找出其中的法律风险。\n\n\
         【合同文本】\n{excerpt}\n\n\
         【相关法律条文】\n{law_context}\n\n\
         请严格按照以下 JSON 结构输出审查结果，不要输出 JSON 以外的任何内容：\n{ANALYSIS_SCHEMA}"
    )
}

/// Retry prompt: restates the schema and names the parse failure.
pub fn build_retry_prompt(contract_text: &str, law_context: &str, parse_error: &str) -> String {
    format!(
        "{}\n\n注意：你上一次的输出无法解析（{}）。\
         请只输出一个合法的 JSON 对象，字段名与上述结构完全一致，不要包含 markdown 代码块标记。",
        build_analysis_prompt(contract_text, law_context),
        parse_error
    )
}

/// Tolerant parse of the model output: markdown fences are stripped, the
/// outermost JSON object is extracted, unknown fields are ignored.
/// A missing summary or missing riskClauses array is a parse failure
/// (which triggers the retry prompt upstream).
pub fn parse_analysis(raw: &str) -> Result<LlmAnalysis, String> {
    let start = raw.find('{').ok_or("no JSON object in response")?;
    let end = raw.rfind('}').ok_or("unterminated JSON object")?;
    if end < start {
        return Err("unterminated JSON object".to_string());
    }

    let json_str = &raw[start..=end];

    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| format!("invalid JSON: {e}"))?;

    if value.get("riskClauses").and_then(|v| v.as_array()).is_none() {
        return Err("missing riskClauses array".to_string());
    }

    let analysis: LlmAnalysis =
        serde_json::from_value(value).map_err(|e| format!("schema mismatch: {e}"))?;

    if analysis.summary.trim().is_empty() {
        return Err("missing summary".to_string());
    }

    Ok(analysis)
}

/// Map parsed clauses to persistable rows, locating each clause's char
/// offsets in the source text (0,0 when the snippet is not found
/// verbatim).
pub fn locate_clauses(source_text: &str, clauses: &[LlmRiskClause]) -> Vec<NewRiskClause> {
    let source_chars: Vec<char> = source_text.chars().collect();

    clauses
        .iter()
        .map(|clause| {
            let level: RiskLevel = clause.level.parse().unwrap_or(RiskLevel::Medium);

            let (start, end) = find_char_range(&source_chars, &clause.clause_text);

            NewRiskClause {
                level,
                clause_type: clause.clause_type.clone(),
                clause_text: clause.clause_text.clone(),
                description: clause.description.clone(),
                suggestion: clause.suggestion.clone(),
                legal_basis: clause.legal_basis.clone(),
                position_start: start,
                position_end: end,
            }
        })
        .collect()
}

fn find_char_range(source_chars: &[char], snippet: &str) -> (i32, i32) {
    let snippet_chars: Vec<char> = snippet.chars().collect();

    if snippet_chars.is_empty() || snippet_chars.len() > source_chars.len() {
        return (0, 0);
    }

    let found = source_chars
        .windows(snippet_chars.len())
        .position(|w| w == snippet_chars.as_slice());

    match found {
        Some(start) => (start as i32, (start + snippet_chars.len()) as i32),
        None => (0, 0),
    }
}

/// Overall risk level: the highest level among identified clauses; a
/// clean contract is LOW.
pub fn overall_risk_level(clauses: &[NewRiskClause]) -> RiskLevel {
    clauses
        .iter()
        .map(|c| c.level)
        .max()
        .unwrap_or(RiskLevel::Low)
}

/// completeness = max(20, 100 - min(totalRisks*5, 50) - levelPenalty)
/// with levelPenalty 20 for HIGH, 10 for MEDIUM, 0 for LOW.
pub fn completeness_score(total_risks: usize, level: RiskLevel) -> i32 {
    let risk_penalty = std::cmp::min(total_risks as i32 * 5, 50);
    let level_penalty = match level {
        RiskLevel::High => 20,
        RiskLevel::Medium => 10,
        RiskLevel::Low => 0,
    };

    std::cmp::max(20, 100 - risk_penalty - level_penalty)
}

/// Compliance weighs clause severity individually.
pub fn compliance_score(clauses: &[NewRiskClause]) -> i32 {
    let penalty: i32 = clauses
        .iter()
        .map(|c| match c.level {
            RiskLevel::High => 15,
            RiskLevel::Medium => 8,
            RiskLevel::Low => 3,
        })
        .sum();

    std::cmp::max(0, 100 - penalty)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "summary": "合同整体风险中等",
        "detailedAnalysis": "付款条款约定模糊",
        "keyClauses": ["第三条 付款方式"],
        "riskClauses": [
            {"level": "HIGH", "type": "违约责任", "clauseText": "甲方不承担任何责任",
             "description": "责任免除过宽", "suggestion": "限定免责范围",
             "legalBasis": "《民法典》第五百零六条"}
        ]
    }"#;

    #[test]
    fn test_parse_clean_json() {
        let analysis = parse_analysis(VALID).unwrap();
        assert_eq!(analysis.summary, "合同整体风险中等");
        assert_eq!(analysis.risk_clauses.len(), 1);
        assert_eq!(analysis.risk_clauses[0].level, "HIGH");
    }

    #[test]
    fn test_parse_strips_markdown_fences() {
        let fenced = format!("```json\n{VALID}\n```");
        assert!(parse_analysis(&fenced).is_ok());
    }

    #[test]
    fn test_parse_tolerates_prose_around_json() {
        let chatty = format!("好的，以下是审查结果：\n{VALID}\n希望对您有帮助！");
        assert!(parse_analysis(&chatty).is_ok());
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let extra = r#"{
            "summary": "ok", "riskClauses": [], "confidence": 0.97, "note": "extra"
        }"#;
        let analysis = parse_analysis(extra).unwrap();
        assert!(analysis.risk_clauses.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_summary() {
        let err = parse_analysis(r#"{"riskClauses": []}"#).unwrap_err();
        assert!(err.contains("summary"));
    }

    #[test]
    fn test_parse_rejects_missing_risk_clauses() {
        let err = parse_analysis(r#"{"summary": "ok"}"#).unwrap_err();
        assert!(err.contains("riskClauses"));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_analysis("很抱歉，我无法审查这份合同。").is_err());
    }

    #[test]
    fn test_clause_positions_located() {
        let source = "第一条 合同目的。第二条 甲方不承担任何责任。第三条 其他。";
        let clauses = vec![LlmRiskClause {
            level: "HIGH".into(),
            clause_type: "违约责任".into(),
            clause_text: "甲方不承担任何责任".into(),
            description: String::new(),
            suggestion: String::new(),
            legal_basis: String::new(),
        }];

        let located = locate_clauses(source, &clauses);
        assert_eq!(located[0].position_start, 13);
        assert_eq!(located[0].position_end, 22);
    }

    #[test]
    fn test_unlocatable_clause_gets_zero_range() {
        let located = locate_clauses(
            "合同正文",
            &[LlmRiskClause {
                level: "LOW".into(),
                clause_type: String::new(),
                clause_text: "不存在的片段".into(),
                description: String::new(),
                suggestion: String::new(),
                legal_basis: String::new(),
            }],
        );
        assert_eq!(located[0].position_start, 0);
        assert_eq!(located[0].position_end, 0);
    }

    #[test]
    fn test_unknown_level_defaults_to_medium() {
        let located = locate_clauses(
            "text",
            &[LlmRiskClause {
                level: "CRITICAL".into(),
                clause_type: String::new(),
                clause_text: String::new(),
                description: String::new(),
                suggestion: String::new(),
                legal_basis: String::new(),
            }],
        );
        assert_eq!(located[0].level, RiskLevel::Medium);
    }

    #[test]
    fn test_overall_risk_level() {
        fn clause(level: RiskLevel) -> NewRiskClause {
            NewRiskClause {
                level,
                clause_type: String::new(),
                clause_text: String::new(),
                description: String::new(),
                suggestion: String::new(),
                legal_basis: String::new(),
                position_start: 0,
                position_end: 0,
            }
        }

        assert_eq!(overall_risk_level(&[]), RiskLevel::Low);
        assert_eq!(
            overall_risk_level(&[clause(RiskLevel::Low), clause(RiskLevel::Medium)]),
            RiskLevel::Medium
        );
        assert_eq!(
            overall_risk_level(&[clause(RiskLevel::Medium), clause(RiskLevel::High)]),
            RiskLevel::High
        );
    }

    #[test]
    fn test_completeness_formula() {
        assert_eq!(completeness_score(0, RiskLevel::Low), 100);
        assert_eq!(completeness_score(2, RiskLevel::Medium), 80);
        assert_eq!(completeness_score(3, RiskLevel::High), 65);
        // Risk penalty is capped at 50, so the floor works out to 30
        assert_eq!(completeness_score(30, RiskLevel::High), 30);
        assert_eq!(completeness_score(100, RiskLevel::High), 30);
    }

    #[test]
    fn test_compliance_floors_at_zero() {
        let clauses: Vec<NewRiskClause> = (0..10)
            .map(|_| NewRiskClause {
                level: RiskLevel::High,
                clause_type: String::new(),
                clause_text: String::new(),
                description: String::new(),
                suggestion: String::new(),
                legal_basis: String::new(),
                position_start: 0,
                position_end: 0,
            })
            .collect();

        assert_eq!(compliance_score(&clauses), 0);
    }
}
