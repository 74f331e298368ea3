use std::sync::OnceLock;

use clap::ValueEnum;
use regex::{Captures, Regex};

/// prompt 模板类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PromptTemplate {
    #[default]
    #[value(name = "simple")]
    Simple,
    #[value(name = "general")]
    General,
    #[value(name = "extract_url")]
    ExtractUrl,
    #[value(name = "accurate_content")]
    AccurateContent,
}

impl PromptTemplate {
    /// 模板原文，包含 `{context}` 与 `{question}` 占位符
    pub fn text(&self) -> &'static str {
        match self {
            PromptTemplate::Simple => {
                "基于以下已知信息，简洁和专业的来回答用户的问题。如果无法从中得到答案，请说 \"根据已知信息无法回答该问题\" 或 \"没有提供足够的相关信息\"，不允许在答案中添加编造成分，答案请使用中文。\n已知信息:{context}\n用户问题:{question}"
            }
            PromptTemplate::General => {
                "基于以下已知信息，请简洁并专业地回答用户的问题。\n=====\n已知信息:\n{context}\n=====\n用户问题:\n{question}"
            }
            PromptTemplate::ExtractUrl => {
                "你是一位智能小助手，请根据下面我所提供的相关知识，对我提出的问题进行回答。回答的内容必须包括其定义、特征、应用领域以及相关网页链接等等内容，同时务必满足下方所提的要求！\n=====\n知识库相关知识如下:\n{context}\n=====\n请根据上方所提供的知识库内容与要求，回答以下问题:\n{question}"
            }
            PromptTemplate::AccurateContent => {
                "你是一位知识小助手，请根据下面我提供的知识库中相关知识，对我提出的若干问题进行回答，同时回答的内容需满足我所提的要求!\n=====\n知识库相关知识如下:\n{context}\n=====\n请根据上方所提供的知识库内容与要求，回答以下问题:\n{question}"
            }
        }
    }
}

/// 替换模板中的 `{context}` 与 `{question}` (单趟替换，被填入的文本不会再被展开)
pub fn render(template: &str, context: &str, question: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| Regex::new(r"\{(context|question)\}").unwrap());

    placeholder
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "context" => context.to_string(),
            _ => question.to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_have_placeholders() {
        for t in PromptTemplate::value_variants() {
            assert!(t.text().contains("{context}"), "{:?}", t);
            assert!(t.text().contains("{question}"), "{:?}", t);
        }
    }

    #[test]
    fn test_render() {
        let prompt = render("已知信息:{context}\n用户问题:{question}", "PAI 是平台", "什么是PAI");
        assert_eq!(prompt, "已知信息:PAI 是平台\n用户问题:什么是PAI");
    }

    #[test]
    fn test_render_is_single_pass() {
        // 知识片段中出现的占位符文本保持原样
        let prompt = render("{context}|{question}", "see {question}", "q");
        assert_eq!(prompt, "see {question}|q");
    }
}
