//! 公共工具模块

use axum::http::{HeaderMap, header};

/// 响应是否为 SSE 流
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// 截断标记，说明被移除的字符数
pub fn truncation_marker(removed_chars: usize) -> String {
    format!("... [{} more characters]", removed_chars)
}

/// 按字符数截断文本，并在末尾追加截断标记
///
/// - `max_chars` 为 0 表示不限制
/// - 以 Unicode 字符计数，不会在多字节字符中间截断
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }

    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let removed = text[cut..].chars().count();
            format!("{}{}", &text[..cut], truncation_marker(removed))
        }
    }
}
