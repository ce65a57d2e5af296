//! 审计日志数据模型
//!
//! 每个请求对应一条 [`LogRecord`]，序列化为一行 JSON 追加到审计日志。
//! 消费方需要容忍新增的可选字段。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 会话 ID 缺失时使用的占位值
pub const UNKNOWN_SESSION: &str = "unknown";

/// 审计日志记录（每个请求一条）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// 捕获时间（RFC3339）
    pub timestamp: String,
    /// 记录 ID（UUID v4）
    pub request_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub request: SanitizedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSummary>,
    /// 从捕获到完成的耗时（毫秒）
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// 脱敏后的请求投影
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SanitizedRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub messages: Vec<SanitizedMessage>,
    /// 字符串形式会被截断，结构化 system 原样记录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
}

/// 脱敏后的消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SanitizedMessage {
    pub role: String,
    /// 字符串或内容块数组
    pub content: Value,
}

/// 工具描述（不含 input_schema）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 响应摘要
///
/// 流式响应逐事件累积，非流式响应直接从响应体填充。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// text / tool_use 条目，其它块类型原样保留
    #[serde(default)]
    pub content: Vec<Value>,
    /// 按到达顺序拼接的全部文本
    #[serde(rename = "fullText", default)]
    pub full_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token 用量
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_as_zero")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

/// `null` 计数按 0 处理
fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

/// 错误投影
///
/// 领域错误填充 `type`/`message`，传输错误填充 `message`/`code`/`trace`。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorInfo {
    /// 领域错误（响应体中的 `error` 字段）
    pub fn domain(error_type: Option<String>, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            ..Default::default()
        }
    }

    /// 传输/处理错误
    pub fn failure(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            code,
            ..Default::default()
        }
    }

    pub fn with_trace(mut self, trace: Option<String>) -> Self {
        self.trace = trace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试记录序列化使用约定的字段名并省略空字段
    #[test]
    fn test_log_record_serialization() {
        let record = LogRecord {
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            request_id: "r1".to_string(),
            session_id: UNKNOWN_SESSION.to_string(),
            preset: None,
            request: SanitizedRequest::default(),
            response: Some(ResponseSummary {
                full_text: "Hi".to_string(),
                stop_reason: Some("end_turn".to_string()),
                ..Default::default()
            }),
            duration_ms: 12,
            error: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sessionId"], "unknown");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["response"]["fullText"], "Hi");
        assert_eq!(json["response"]["stop_reason"], "end_turn");
        assert!(json.get("preset").is_none());
        assert!(json.get("error").is_none());
    }

    /// 测试反序列化时容忍未知字段
    #[test]
    fn test_log_record_tolerates_new_fields() {
        let line = r#"{
            "timestamp": "t",
            "requestId": "r",
            "sessionId": "s",
            "request": {"messages": []},
            "durationMs": 1,
            "error": {"message": "boom", "code": "connect"},
            "someFutureField": 42
        }"#;
        let record: LogRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.error.unwrap().code.as_deref(), Some("connect"));
        assert!(record.response.is_none());
    }

    /// 测试 cache 相关用量字段可选
    #[test]
    fn test_usage_optional_cache_counters() {
        let usage: Usage =
            serde_json::from_str(r#"{"input_tokens":5,"cache_read_input_tokens":3}"#).unwrap();
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 0);
        assert_eq!(usage.cache_read_input_tokens, Some(3));
        assert_eq!(usage.cache_creation_input_tokens, None);

        let json = serde_json::to_string(&usage).unwrap();
        assert!(!json.contains("cache_creation_input_tokens"));
    }

    /// 测试 null 计数按 0 处理
    #[test]
    fn test_usage_null_counters() {
        let usage: Usage =
            serde_json::from_str(r#"{"input_tokens":null,"output_tokens":2,"cache_read_input_tokens":null}"#)
                .unwrap();
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(usage.cache_read_input_tokens, None);
    }
}
