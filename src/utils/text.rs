//! 文本相关的安全工具函数
//!
//! 提供 UTF-8 安全的截断与密钥掩码，避免字节级切片导致 panic

/// 按字符安全截断字符串，若超过则追加省略号
///
/// - `input`: 待处理文本
/// - `max_chars`: 最大字符数
/// - 返回处理后的新字符串
pub fn safe_truncate(input: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let mut result = String::with_capacity(max_chars.min(input.len()) + 3);
    let mut iter = input.chars();

    for _ in 0..max_chars {
        match iter.next() {
            Some(ch) => result.push(ch),
            None => return result,
        }
    }

    if iter.next().is_some() {
        result.push_str("...");
    }

    result
}

/// API key 掩码（仅显示前 4 字符 + ****，避免日志泄露密钥）
pub fn mask_api_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        "EMPTY".to_string()
    } else if trimmed.chars().count() <= 4 {
        format!("**** (len={})", trimmed.len())
    } else {
        format!(
            "{}**** (len={})",
            trimmed.chars().take(4).collect::<String>(),
            trimmed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_appends_ellipsis_only_when_cut() {
        assert_eq!(safe_truncate("short", 100), "short");
        assert_eq!(safe_truncate("abcdef", 3), "abc...");
        assert_eq!(safe_truncate("评分标准说明", 2), "评分...");
        assert_eq!(safe_truncate("abc", 0), "");
    }

    #[test]
    fn mask_never_reveals_short_keys() {
        assert_eq!(mask_api_key(""), "EMPTY");
        assert_eq!(mask_api_key("abc"), "**** (len=3)");
        assert_eq!(mask_api_key(" AIzaSyXYZ "), "AIza**** (len=9)");
    }
}
