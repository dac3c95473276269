use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*#-]\s*").expect("valid regex"));
static NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid regex"));
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(\w+)?\n([\s\S]*?)```").expect("valid regex"));

/// Strip markdown noise (bullets, heading markers, extra whitespace) from
/// raw LLM output before it is persisted or spoken aloud.
pub fn clean_llm_output(llm_output: &str) -> String {
    let cleaned = BULLET_RE.replace_all(llm_output, "");
    let cleaned = NEWLINE_RE.replace_all(&cleaned, " ");
    let cleaned = SPACE_RE.replace_all(&cleaned, " ");
    cleaned.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

/// Extract fenced code blocks with their optional language tag.
pub fn extract_code_blocks(llm_output: &str) -> Vec<CodeBlock> {
    CODE_BLOCK_RE
        .captures_iter(llm_output)
        .map(|caps| CodeBlock {
            language: caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            code: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
        .collect()
}
