//! 模型输出的 JSON 清理与提取
//!
//! 纯函数模块，零依赖于 LLMManager 结构体

use log::debug;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static RE_CODE_FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*```[\w-]*\s*$").expect("static regex"));
static RE_TILDE_FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*~~~[\w-]*\s*$").expect("static regex"));

// 清理JSON响应内容
pub(crate) fn clean_json_response(content: &str) -> String {
    let mut cleaned = content.trim().to_string();

    // 移除markdown代码块及常见围栏
    cleaned = RE_CODE_FENCE_LINE.replace_all(&cleaned, "").to_string();
    cleaned = RE_TILDE_FENCE_LINE.replace_all(&cleaned, "").to_string();

    let mut view = cleaned.trim();
    if let Some(rest) = view.strip_prefix("```json") {
        view = rest.trim();
    }
    if let Some(rest) = view.strip_prefix("```") {
        view = rest.trim();
    }
    if let Some(rest) = view.strip_suffix("```") {
        view = rest.trim();
    }

    let prefixes_to_remove = ["Here is the JSON:", "JSON:", "Result:", "Output:"];
    for prefix in &prefixes_to_remove {
        if let Some(rest) = view.strip_prefix(prefix) {
            view = rest.trim();
            break;
        }
    }

    view.to_string()
}

// 从文本中提取JSON对象片段
pub(crate) fn extract_json_from_text(text: &str) -> Option<String> {
    // 方法1：查找第一个{到最后一个}
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            let candidate = &text[start..=end];
            if serde_json::from_str::<Value>(candidate).is_ok() {
                return Some(candidate.to_string());
            }
        }
    }

    // 方法2：花括号计数，取第一个完整的顶层对象（跳过字符串字面量内的花括号）
    let mut depth = 0i32;
    let mut start_pos = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start_pos = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = start_pos {
                        let candidate = &text[start..=i];
                        if serde_json::from_str::<Value>(candidate).is_ok() {
                            return Some(candidate.to_string());
                        }
                    }
                    start_pos = None;
                }
            }
            _ => {}
        }
    }

    None
}

// 修复常见的JSON错误（尾随逗号）
pub(crate) fn fix_common_json_errors(json_str: &str) -> String {
    static RE_TRAILING_COMMA: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("static regex"));
    RE_TRAILING_COMMA.replace_all(json_str, "$1").to_string()
}

/// 将模型输出解析为 JSON 对象
///
/// 依次尝试：直接解析 → 去除代码围栏后解析 → 从正文中截取对象 → 修复尾随逗号
pub fn parse_json_object(content: &str) -> Option<Value> {
    let as_object = |v: Value| if v.is_object() { Some(v) } else { None };

    if let Ok(v) = serde_json::from_str::<Value>(content.trim()) {
        if let Some(obj) = as_object(v) {
            return Some(obj);
        }
    }

    let cleaned = clean_json_response(content);
    if let Ok(v) = serde_json::from_str::<Value>(&cleaned) {
        if let Some(obj) = as_object(v) {
            return Some(obj);
        }
    }

    if let Some(fragment) = extract_json_from_text(&cleaned) {
        if let Ok(v) = serde_json::from_str::<Value>(&fragment) {
            return as_object(v);
        }
    }

    let fixed = fix_common_json_errors(&cleaned);
    if let Some(fragment) = extract_json_from_text(&fixed) {
        debug!("[LLMManager] JSON parsed after fixing trailing commas");
        if let Ok(v) = serde_json::from_str::<Value>(&fragment) {
            return as_object(v);
        }
    }

    debug!(
        "[LLMManager] No JSON object found in model output ({} chars)",
        content.chars().count()
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_object() {
        let v = parse_json_object(r#"{"score": 8, "feedback": "ok"}"#).unwrap();
        assert_eq!(v["score"], 8);
    }

    #[test]
    fn strips_code_fences() {
        let v = parse_json_object("```json\n{\"score\": \"7.5\"}\n```").unwrap();
        assert_eq!(v["score"], "7.5");
    }

    #[test]
    fn extracts_object_from_prose() {
        let text = "Sure! Here is my evaluation:\n{\"score\": 6, \"feedback\": \"use {braces} carefully\"}\nLet me know.";
        let v = parse_json_object(text).unwrap();
        assert_eq!(v["score"], 6);
        assert_eq!(v["feedback"], "use {braces} carefully");
    }

    #[test]
    fn repairs_trailing_commas() {
        let v = parse_json_object("{\"score\": 5, \"feedback\": \"x\",}").unwrap();
        assert_eq!(v["score"], 5);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(parse_json_object("[1, 2, 3]").is_none());
        assert!(parse_json_object("no json here").is_none());
        assert!(parse_json_object("").is_none());
    }
}
