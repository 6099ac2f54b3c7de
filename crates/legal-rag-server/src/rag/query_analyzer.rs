use crate::utils::chinese_num;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Structured intent extracted from a user query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryIntent {
    pub original_query: String,
    pub law_name: Option<String>,
    /// Normalized 第N条 form with N as a Chinese numeral.
    pub article_number: Option<String>,
    pub chapter: Option<String>,
    pub section: Option<String>,
    pub query_type: QueryType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// A specific article is named: literal lookup.
    PreciseArticle,
    /// A chapter or section is named.
    ChapterLevel,
    /// Multiple structural references joined by a conjunction.
    Complex,
    /// Everything else: dense-vector search.
    Semantic,
}

static LAW_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"《?([^《》]+?(法|条例|规定|办法|准则|细则))》?").expect("valid law name regex")
});

static ARTICLE_CHINESE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"第([零一二三四五六七八九十百千]{1,12})条").expect("valid article regex")
});

static ARTICLE_ARABIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"第([0-9]{1,4})条").expect("valid article regex"));

/// Bare `30条` without 第, common in terse queries.
static ARTICLE_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{1,4})条").expect("valid article regex"));

static CHAPTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"第([0-9]{1,3}|[零一二三四五六七八九十百]{1,8})章").expect("valid chapter regex")
});

static SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"第([0-9]{1,3}|[零一二三四五六七八九十百]{1,8})节").expect("valid section regex")
});

const CONJUNCTIONS: &[&str] = &["和", "及", "以及", "或者", "还有", "、"];

pub struct QueryAnalyzer;

impl QueryAnalyzer {
    /// Parse a user query into a structured intent.
    pub fn analyze(query: &str) -> QueryIntent {
        let law_name = Self::extract_law_name(query);
        let article_number = Self::extract_article(query);
        let chapter = CHAPTER.find(query).map(|m| m.as_str().to_string());
        let section = SECTION.find(query).map(|m| m.as_str().to_string());

        let query_type = if article_number.is_some() {
            QueryType::PreciseArticle
        } else if chapter.is_some() || section.is_some() {
            QueryType::ChapterLevel
        } else if Self::is_complex(query) {
            QueryType::Complex
        } else {
            QueryType::Semantic
        };

        debug!(
            query,
            ?query_type,
            law = law_name.as_deref().unwrap_or(""),
            article = article_number.as_deref().unwrap_or(""),
            "query analyzed"
        );

        QueryIntent {
            original_query: query.to_string(),
            law_name,
            article_number,
            chapter,
            section,
            query_type,
        }
    }

    fn extract_law_name(query: &str) -> Option<String> {
        let caps = LAW_NAME.captures(query)?;
        let raw = caps.get(1)?.as_str();

        let name = raw
            .trim_matches(|c| c == '《' || c == '》')
            .trim_start_matches("中华人民共和国")
            .trim();

        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    /// Article extraction, normalized to 第<Chinese numeral>条. Matches
    /// 第三十条, 第30条 and bare 30条 (plus 款 sub-clause suffixes, which
    /// are ignored for lookup purposes).
    fn extract_article(query: &str) -> Option<String> {
        if let Some(caps) = ARTICLE_CHINESE.captures(query) {
            return Some(format!("第{}条", &caps[1]));
        }

        if let Some(caps) = ARTICLE_ARABIC.captures(query) {
            return Self::normalize_arabic(&caps[1]);
        }

        if let Some(caps) = ARTICLE_BARE.captures(query) {
            return Self::normalize_arabic(&caps[1]);
        }

        None
    }

    fn normalize_arabic(digits: &str) -> Option<String> {
        let n: u32 = digits.parse().ok()?;
        if (1..=9999).contains(&n) {
            Some(chinese_num::normalize_article(n))
        } else {
            None
        }
    }

    /// Complex iff a conjunction appears together with a 第… structural
    /// token (e.g. "合同法第十条和第十二条").
    fn is_complex(query: &str) -> bool {
        query.contains('第') && CONJUNCTIONS.iter().any(|c| query.contains(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precise_article_chinese_numeral() {
        let intent = QueryAnalyzer::analyze("环境保护法第三十条规定了什么？");
        assert_eq!(intent.law_name.as_deref(), Some("环境保护法"));
        assert_eq!(intent.article_number.as_deref(), Some("第三十条"));
        assert_eq!(intent.query_type, QueryType::PreciseArticle);
    }

    #[test]
    fn test_precise_article_arabic_normalized() {
        let intent = QueryAnalyzer::analyze("劳动法第30条的内容");
        assert_eq!(intent.article_number.as_deref(), Some("第三十条"));
        assert_eq!(intent.query_type, QueryType::PreciseArticle);
    }

    #[test]
    fn test_bare_article_number() {
        let intent = QueryAnalyzer::analyze("民法典1024条");
        assert_eq!(intent.article_number.as_deref(), Some("第一千零二十四条"));
        assert_eq!(intent.query_type, QueryType::PreciseArticle);
    }

    #[test]
    fn test_law_name_strips_brackets_and_prefix() {
        let intent = QueryAnalyzer::analyze("《中华人民共和国劳动合同法》第十条");
        assert_eq!(intent.law_name.as_deref(), Some("劳动合同法"));
    }

    #[test]
    fn test_law_name_suffix_variants() {
        assert_eq!(
            QueryAnalyzer::analyze("食品安全条例适用范围").law_name.as_deref(),
            Some("食品安全条例")
        );
        assert_eq!(
            QueryAnalyzer::analyze("互联网信息管理办法说了什么").law_name.as_deref(),
            Some("互联网信息管理办法")
        );
    }

    #[test]
    fn test_chapter_level() {
        let intent = QueryAnalyzer::analyze("环境保护法第四章讲了什么");
        assert_eq!(intent.chapter.as_deref(), Some("第四章"));
        assert_eq!(intent.query_type, QueryType::ChapterLevel);
    }

    #[test]
    fn test_article_takes_precedence_over_chapter() {
        let intent = QueryAnalyzer::analyze("第四章第三十五条");
        assert_eq!(intent.query_type, QueryType::PreciseArticle);
    }

    #[test]
    fn test_complex_conjunction_with_structural_token() {
        let intent = QueryAnalyzer::analyze("合同编和侵权责任编中第一编的内容");
        assert_eq!(intent.query_type, QueryType::Complex);
    }

    #[test]
    fn test_conjunction_without_structural_token_is_semantic() {
        let intent = QueryAnalyzer::analyze("违约和侵权有什么区别");
        assert_eq!(intent.query_type, QueryType::Semantic);
    }

    #[test]
    fn test_plain_semantic_query() {
        let intent = QueryAnalyzer::analyze("什么是合同违约？");
        assert_eq!(intent.query_type, QueryType::Semantic);
        assert!(intent.article_number.is_none());
        assert!(intent.law_name.is_none());
    }

    #[test]
    fn test_article_range_bounds() {
        // 第10000条 exceeds the supported range and must not misparse
        let intent = QueryAnalyzer::analyze("第10000条");
        assert_ne!(intent.article_number.as_deref(), Some("第一万条"));
    }

    #[test]
    fn test_sub_clause_variant() {
        let intent = QueryAnalyzer::analyze("劳动合同法第三十八条第一款");
        assert_eq!(intent.article_number.as_deref(), Some("第三十八条"));
    }
}
