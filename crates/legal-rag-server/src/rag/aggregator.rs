use super::retriever::Content;
use crate::config::AggregatorConfig;
use crate::utils::similarity::{jaccard_similarity, normalize_for_dedup, tokenize};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// Content categories with their trust weights. Statute text outranks
/// contract clauses, which outrank secondary material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    LawProvision,
    ContractClause,
    Regulation,
    CaseReference,
    General,
    WebContent,
}

impl ContentKind {
    pub fn weight(&self) -> f64 {
        match self {
            Self::LawProvision => 1.0,
            Self::ContractClause => 0.9,
            Self::Regulation => 0.85,
            Self::CaseReference => 0.8,
            Self::General => 0.7,
            Self::WebContent => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LawProvision => "LAW_PROVISION",
            Self::ContractClause => "CONTRACT_CLAUSE",
            Self::Regulation => "REGULATION",
            Self::CaseReference => "CASE_REFERENCE",
            Self::General => "GENERAL",
            Self::WebContent => "WEB_CONTENT",
        }
    }
}

static ARTICLE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"第[0-9零一二三四五六七八九十百千]{1,12}条").expect("valid regex"));

/// Infer the content category from its text (metadata category wins for
/// web material).
pub fn infer_kind(content: &Content) -> ContentKind {
    if content
        .metadata
        .get("category")
        .and_then(|v| v.as_str())
        .is_some_and(|c| c == "web_content")
    {
        return ContentKind::WebContent;
    }

    let text = &content.text;

    if ARTICLE_REF.is_match(text) && (text.contains('法') || text.contains('典')) {
        ContentKind::LawProvision
    } else if ["案例", "判决", "法院"].iter().any(|t| text.contains(t)) {
        ContentKind::CaseReference
    } else if text.contains("合同") && text.contains("条款") {
        ContentKind::ContractClause
    } else if ["规定", "办法", "条例"].iter().any(|t| text.contains(t)) {
        ContentKind::Regulation
    } else {
        ContentKind::General
    }
}

const LEGAL_ENTITIES: &[&str] = &[
    "当事人", "甲方", "乙方", "买方", "卖方", "出租人", "承租人",
    "发包人", "承包人", "债权人", "债务人",
];

const LEGAL_RELATIONS: &[&str] = &[
    "合同关系", "债权债务", "违约责任", "侵权责任", "劳动关系",
    "担保关系", "代理关系",
];

const LEGAL_TERMS: &[(&str, f64)] = &[
    ("民法典", 1.0),
    ("合同法", 0.9),
    ("违约责任", 0.8),
    ("损害赔偿", 0.7),
    ("诉讼时效", 0.6),
    ("合同解除", 0.6),
    ("违约金", 0.5),
    ("不可抗力", 0.5),
    ("担保", 0.4),
    ("定金", 0.4),
];

/// Per-content legal relevance in [0, 1]: entity vocabulary shared by
/// query and content, relation vocabulary in either, and weighted
/// legal-term density.
fn legal_relevance(text: &str, query: &str) -> f64 {
    let mut score = 0.0;

    for entity in LEGAL_ENTITIES {
        if text.contains(entity) && query.contains(entity) {
            score += 0.1;
        }
    }

    for relation in LEGAL_RELATIONS {
        if text.contains(relation) || query.contains(relation) {
            score += 0.05;
        }
    }

    let token_count = tokenize(text).len().max(1);
    let weighted_hits: f64 = LEGAL_TERMS
        .iter()
        .map(|(term, weight)| weight * text.matches(term).count() as f64)
        .sum();
    score += (weighted_hits / token_count as f64).min(0.5);

    score.min(1.0)
}

/// Ranked aggregator output.
#[derive(Debug, Clone)]
pub struct RankedContent {
    pub content: Content,
    pub kind: ContentKind,
    pub score: f64,
}

struct Candidate {
    content: Content,
    kind: ContentKind,
    normalized: String,
    score: f64,
    rrf_terms: Vec<f64>,
}

/// Merges ranked lists from every (query, retriever) pair into one list:
/// base scoring, near-duplicate merging, Reciprocal Rank Fusion, then a
/// legal-relevance re-rank. Deterministic for a given input; ties keep
/// arrival order.
pub struct ContentAggregator {
    config: AggregatorConfig,
}

impl ContentAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn aggregate(&self, query: &str, lists: Vec<Vec<Content>>) -> Vec<RankedContent> {
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        let mut candidates: Vec<Candidate> = Vec::new();

        // 1 + 2: score each occurrence, merging near-duplicates as they
        // arrive so RRF terms accumulate on the surviving instance.
        for list in &lists {
            for (rank, content) in list.iter().enumerate() {
                let kind = infer_kind(content);
                let score = Self::base_score(content, kind, rank, &query_tokens);
                let rrf_term = 1.0 / (self.config.rrf_k + rank as f64 + 1.0);
                let normalized = normalize_for_dedup(&content.text);

                let duplicate_of = candidates.iter_mut().find(|c| {
                    c.normalized == normalized
                        || jaccard_similarity(&c.content.text, &content.text)
                            > self.config.similarity_threshold
                });

                match duplicate_of {
                    Some(existing) => {
                        existing.rrf_terms.push(rrf_term);
                        if score > existing.score {
                            existing.content = content.clone();
                            existing.kind = kind;
                            existing.normalized = normalized;
                            existing.score = score;
                        }
                    }
                    None => candidates.push(Candidate {
                        content: content.clone(),
                        kind,
                        normalized,
                        score,
                        rrf_terms: vec![rrf_term],
                    }),
                }
            }
        }

        // 3: Reciprocal Rank Fusion across all source lists.
        for candidate in &mut candidates {
            let rrf: f64 = candidate.rrf_terms.iter().sum();
            candidate.score = 0.5 * candidate.score + 0.5 * rrf;
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        // 4: legal-relevance re-rank and truncation.
        for candidate in &mut candidates {
            let legal = legal_relevance(&candidate.content.text, query);
            candidate.score = 0.6 * candidate.score + 0.4 * legal;
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.config.max_results);

        debug!(
            results = candidates.len(),
            lists = lists.len(),
            "aggregation complete"
        );

        candidates
            .into_iter()
            .map(|c| RankedContent {
                content: c.content,
                kind: c.kind,
                score: c.score.min(1.0),
            })
            .collect()
    }

    /// Base score: keyword overlap with the query, rank prior, content
    /// type weight, and a length adjustment. Capped at 1.
    fn base_score(
        content: &Content,
        kind: ContentKind,
        rank: usize,
        query_tokens: &HashSet<String>,
    ) -> f64 {
        let text_lower = content.text.to_lowercase();

        let keyword_fraction = if query_tokens.is_empty() {
            0.0
        } else {
            let hits = query_tokens
                .iter()
                .filter(|t| text_lower.contains(t.as_str()))
                .count();
            hits as f64 / query_tokens.len() as f64
        };

        let base = 0.7 * keyword_fraction + 0.3 * (1.0 / (rank as f64 + 1.0));

        let char_count = content.text.chars().count();
        let length_adjustment = if char_count < 50 {
            0.7
        } else if char_count > 2000 {
            0.8
        } else {
            1.0
        };

        (base * kind.weight() * length_adjustment).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str, score: f32) -> Content {
        Content {
            text: text.to_string(),
            source: "测试来源".to_string(),
            metadata: serde_json::json!({}),
            score,
        }
    }

    fn aggregator() -> ContentAggregator {
        ContentAggregator::new(AggregatorConfig::default())
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregator().aggregate("问题", vec![]).is_empty());
        assert!(aggregator().aggregate("问题", vec![vec![]]).is_empty());
    }

    #[test]
    fn test_output_capped_at_max_results() {
        let list: Vec<Content> = (0..30)
            .map(|i| content(&format!("民法典第{}条规定了完全不同的内容编号{}", i + 1, i), 0.5))
            .collect();

        let out = aggregator().aggregate("民法典", vec![list]);
        assert!(out.len() <= 10);
    }

    #[test]
    fn test_sorted_non_increasing() {
        let lists = vec![
            vec![
                content("合同法第三十条规定当事人应当遵循诚实信用原则履行义务", 0.9),
                content("一般性说明文字，与法律问题关联不大，仅供参考使用说明", 0.2),
            ],
            vec![content("判决案例：法院认定被告承担违约责任并赔偿损失", 0.7)],
        ];

        let out = aggregator().aggregate("合同违约责任", lists);
        for pair in out.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_near_duplicates_merged() {
        let a = "当事人应当按照约定全面履行自己的义务，不得擅自变更或者解除合同";
        let b = "当事人应当按照约定全面履行自己的义务，不得擅自变更或者解除合同。";

        let out = aggregator().aggregate(
            "履行义务",
            vec![vec![content(a, 0.9)], vec![content(b, 0.8)]],
        );

        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_dedup_property_no_similar_pair_survives() {
        let lists = vec![vec![
            content("出卖人应当按照约定的质量要求交付标的物给买受人验收", 0.9),
            content("出卖人应当按照约定的质量要求交付标的物给买受人验收。", 0.8),
            content("承租人应当按照约定的方法使用租赁物并妥善保管维护设备", 0.7),
        ]];

        let out = aggregator().aggregate("交付标的物", lists);

        for i in 0..out.len() {
            for j in (i + 1)..out.len() {
                let sim = jaccard_similarity(&out[i].content.text, &out[j].content.text);
                assert!(sim <= 0.85, "similar pair survived dedup: {sim}");
            }
        }
    }

    #[test]
    fn test_deterministic_for_fixed_input() {
        let make_lists = || {
            vec![
                vec![
                    content("民法典第五百七十七条规定违约责任的承担方式包括继续履行", 0.9),
                    content("合同条款约定甲方应当向乙方支付违约金并赔偿相应损失", 0.8),
                    content("法院判决案例显示违约方承担继续履行和赔偿损失的责任", 0.7),
                ],
                vec![
                    content("合同条款约定甲方应当向乙方支付违约金并赔偿相应损失", 0.85),
                    content("管理办法规定相关主体应当依法履行合同义务并承担责任", 0.6),
                    content("民法典第五百七十七条规定违约责任的承担方式包括继续履行", 0.5),
                ],
            ]
        };

        let first = aggregator().aggregate("违约责任", make_lists());
        let second = aggregator().aggregate("违约责任", make_lists());

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.content.text, b.content.text);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn test_law_provision_outranks_general_at_same_signal() {
        let lists = vec![vec![
            content("依据民法典第五百条当事人应当承担缔约过失违约责任的规定", 0.8),
            content("这是一段普通描述内容不含任何有关特定主题词的参考信息资料", 0.8),
        ]];

        let out = aggregator().aggregate("违约责任", lists);
        assert_eq!(out[0].kind, ContentKind::LawProvision);
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(
            infer_kind(&content("民法典第五百条规定内容", 0.5)),
            ContentKind::LawProvision
        );
        assert_eq!(
            infer_kind(&content("法院判决书摘录案例内容", 0.5)),
            ContentKind::CaseReference
        );
        assert_eq!(
            infer_kind(&content("本合同第三项条款约定内容", 0.5)),
            ContentKind::ContractClause
        );
        assert_eq!(
            infer_kind(&content("本办法所称网络经营者是指", 0.5)),
            ContentKind::Regulation
        );
        assert_eq!(
            infer_kind(&content("普通文本内容", 0.5)),
            ContentKind::General
        );
    }

    #[test]
    fn test_scores_bounded() {
        let lists = vec![vec![content(
            "民法典第五百七十七条违约责任损害赔偿诉讼时效合同解除",
            1.0,
        )]];

        let out = aggregator().aggregate("民法典违约责任损害赔偿", lists);
        assert!(out[0].score <= 1.0);
        assert!(out[0].score >= 0.0);
    }
}
