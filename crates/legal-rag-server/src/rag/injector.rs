use super::aggregator::RankedContent;
use std::fmt::Write;

/// Reference passages injected into a prompt, at most this many.
const MAX_REFERENCES: usize = 5;
/// Each injected passage is truncated to this many chars.
const MAX_REFERENCE_CHARS: usize = 500;

const ROLE_PREFACE: &str = "你是一名专业的法律助手，名叫法律小助手。你熟悉中国法律法规，擅长用通俗易懂的语言解答法律问题。";

/// Renders the final prompt: role preface, enumerated reference block with
/// source attributions, answering rules, then the user question.
pub struct ContentInjector;

impl ContentInjector {
    pub fn build_prompt(question: &str, contents: &[RankedContent]) -> String {
        if contents.is_empty() {
            return Self::build_no_knowledge_prompt(question);
        }

        let mut prompt = String::new();
        prompt.push_str(ROLE_PREFACE);
        prompt.push_str("\n\n【参考资料】\n");

        for (i, ranked) in contents.iter().take(MAX_REFERENCES).enumerate() {
            let text = truncate_chars(&ranked.content.text, MAX_REFERENCE_CHARS);
            let _ = writeln!(
                prompt,
                "{}. （来源：{}）{}",
                i + 1,
                ranked.content.source,
                text
            );
        }

        prompt.push_str(
            "\n【回答要求】\n\
             1. 优先结合参考资料回答，资料与问题无关时可以忽略；\n\
             2. 不要逐字照抄资料原文，用自己的话组织答案；\n\
             3. 用通俗易懂的语言回答，并在引用法条时注明出处。\n",
        );

        prompt.push_str("\n【用户问题】\n");
        prompt.push_str(question);

        prompt
    }

    /// Distinct prompt for the no-match case: explains capabilities but
    /// carries no reference block.
    pub fn build_no_knowledge_prompt(question: &str) -> String {
        format!(
            "{ROLE_PREFACE}\n\n\
             知识库中没有找到与这个问题直接相关的资料。请基于你的法律常识谨慎回答，\n\
             说明这是一般性解释而非针对具体法条的引用，必要时建议用户咨询专业律师。\n\n\
             【用户问题】\n{question}"
        )
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::aggregator::ContentKind;
    use crate::rag::retriever::Content;

    fn ranked(text: &str, source: &str) -> RankedContent {
        RankedContent {
            content: Content {
                text: text.to_string(),
                source: source.to_string(),
                metadata: serde_json::json!({}),
                score: 0.9,
            },
            kind: ContentKind::LawProvision,
            score: 0.9,
        }
    }

    #[test]
    fn test_prompt_contains_sources_and_question() {
        let contents = vec![ranked("第三十条 企业事业单位排放污染物……", "环境保护法")];
        let prompt = ContentInjector::build_prompt("环境保护法第三十条规定了什么？", &contents);

        assert!(prompt.contains("法律小助手"));
        assert!(prompt.contains("来源：环境保护法"));
        assert!(prompt.contains("【参考资料】"));
        assert!(prompt.ends_with("环境保护法第三十条规定了什么？"));
    }

    #[test]
    fn test_reference_cap() {
        let contents: Vec<_> = (0..8)
            .map(|i| ranked(&format!("参考内容{i}"), "民法典"))
            .collect();
        let prompt = ContentInjector::build_prompt("问题", &contents);

        assert!(prompt.contains("5. "));
        assert!(!prompt.contains("6. "));
    }

    #[test]
    fn test_reference_truncated_to_limit() {
        let long = "条".repeat(800);
        let prompt = ContentInjector::build_prompt("问题", &[ranked(&long, "民法典")]);

        let line = prompt.lines().find(|l| l.starts_with("1. ")).unwrap();
        assert!(line.chars().count() < 600);
        assert!(line.ends_with('…'));
    }

    #[test]
    fn test_no_knowledge_prompt_is_distinct() {
        let prompt = ContentInjector::build_prompt("冷门问题", &[]);

        assert!(prompt.contains("没有找到"));
        assert!(!prompt.contains("【参考资料】"));
        assert!(prompt.contains("冷门问题"));
    }
}
