use super::query_analyzer::{QueryIntent, QueryType};
use super::retriever::RetrieverKind;

/// Maximum transformed queries produced per intent.
const MAX_QUERIES: usize = 3;

const CONTRACT_HINTS: &[&str] = &["合同", "协议", "条款", "违约"];

/// One transformed query together with the retrievers it is routed to.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub query: String,
    pub retrievers: Vec<RetrieverKind>,
}

/// Expands a query intent into 1..=MAX_QUERIES retrieval queries and
/// routes each deterministically. The original query is always preserved
/// so precise article lookups stay literal.
pub struct QueryTransformer;

impl QueryTransformer {
    pub fn transform(intent: &QueryIntent) -> Vec<String> {
        let mut queries = vec![intent.original_query.clone()];

        match intent.query_type {
            QueryType::PreciseArticle => {
                // Literal "law + article" rewrite matches the indexed
                // segment headers directly.
                if let (Some(law), Some(article)) = (&intent.law_name, &intent.article_number) {
                    queries.push(format!("{law}{article}"));
                } else if let Some(article) = &intent.article_number {
                    queries.push(article.clone());
                }
            }
            QueryType::ChapterLevel => {
                let structure = intent
                    .chapter
                    .clone()
                    .or_else(|| intent.section.clone());
                if let (Some(law), Some(structure)) = (&intent.law_name, structure) {
                    queries.push(format!("{law}{structure}"));
                }
            }
            QueryType::Complex => {
                // Split on enumeration conjunctions so each structural
                // reference is retrieved on its own.
                for part in intent
                    .original_query
                    .split(['、', '和'])
                    .map(str::trim)
                    .filter(|p| p.contains('第') && !p.is_empty())
                {
                    queries.push(match &intent.law_name {
                        Some(law) if !part.contains(law.as_str()) => format!("{law}{part}"),
                        _ => part.to_string(),
                    });
                }
            }
            QueryType::Semantic => {}
        }

        queries.dedup();
        queries.truncate(MAX_QUERIES);
        queries
    }

    /// Deterministic routing: every query hits the legal corpus; queries
    /// with contract vocabulary additionally hit the template corpus.
    pub fn route(intent: &QueryIntent, queries: Vec<String>) -> Vec<RoutePlan> {
        queries
            .into_iter()
            .map(|query| {
                let mut retrievers = vec![RetrieverKind::LegalCorpus];

                if intent.query_type == QueryType::Semantic
                    && CONTRACT_HINTS.iter().any(|h| query.contains(h))
                {
                    retrievers.push(RetrieverKind::ContractTemplates);
                }

                RoutePlan { query, retrievers }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::query_analyzer::QueryAnalyzer;

    #[test]
    fn test_original_query_always_first() {
        let intent = QueryAnalyzer::analyze("环境保护法第三十条规定了什么？");
        let queries = QueryTransformer::transform(&intent);
        assert_eq!(queries[0], "环境保护法第三十条规定了什么？");
    }

    #[test]
    fn test_precise_article_adds_literal_rewrite() {
        let intent = QueryAnalyzer::analyze("环境保护法第三十条规定了什么？");
        let queries = QueryTransformer::transform(&intent);
        assert!(queries.contains(&"环境保护法第三十条".to_string()));
    }

    #[test]
    fn test_semantic_is_identity() {
        let intent = QueryAnalyzer::analyze("什么是不可抗力？");
        let queries = QueryTransformer::transform(&intent);
        assert_eq!(queries, vec!["什么是不可抗力？".to_string()]);
    }

    #[test]
    fn test_query_cap() {
        let intent = QueryAnalyzer::analyze("劳动法第十条、第十一条和第十二条的区别");
        let queries = QueryTransformer::transform(&intent);
        assert!(queries.len() <= 3);
        assert_eq!(queries[0], intent.original_query);
    }

    #[test]
    fn test_routing_deterministic() {
        let intent = QueryAnalyzer::analyze("合同违约条款怎么写");
        let queries = QueryTransformer::transform(&intent);
        let a = QueryTransformer::route(&intent, queries.clone());
        let b = QueryTransformer::route(&intent, queries);
        assert_eq!(a, b);
    }

    #[test]
    fn test_contract_query_routes_to_templates() {
        let intent = QueryAnalyzer::analyze("合同违约条款怎么写");
        let plans = QueryTransformer::route(&intent, QueryTransformer::transform(&intent));
        assert!(plans[0].retrievers.contains(&RetrieverKind::ContractTemplates));
        assert!(plans[0].retrievers.contains(&RetrieverKind::LegalCorpus));
    }

    #[test]
    fn test_precise_lookup_stays_on_legal_corpus() {
        let intent = QueryAnalyzer::analyze("合同法第三十条");
        let plans = QueryTransformer::route(&intent, QueryTransformer::transform(&intent));
        for plan in &plans {
            assert_eq!(plan.retrievers, vec![RetrieverKind::LegalCorpus]);
        }
    }
}
