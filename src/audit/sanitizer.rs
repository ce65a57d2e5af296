//! 请求脱敏
//!
//! 将原始请求体投影为可记录的、大小受限的结构：
//! - 图片数据替换为固定占位符
//! - 文本按 `max_message_length` 截断
//! - 工具只保留 name / description

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::common::truncate_with_marker;

use super::types::{SanitizedMessage, SanitizedRequest, ToolDescriptor};

/// 图片块占位符
pub const IMAGE_PLACEHOLDER: &str = "[image data omitted]";

/// 脱敏选项
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizeOptions {
    #[serde(default = "default_true")]
    pub include_system_prompt: bool,
    #[serde(default = "default_true")]
    pub include_messages: bool,
    #[serde(default)]
    pub include_tools: bool,
    /// 0 表示不限制
    #[serde(default)]
    pub max_message_length: usize,
}

fn default_true() -> bool {
    true
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            include_system_prompt: true,
            include_messages: true,
            include_tools: false,
            max_message_length: 0,
        }
    }
}

/// 脱敏请求体
///
/// 缺失或类型不符的字段对应为空，不产生错误。
pub fn sanitize(request: &Value, options: &SanitizeOptions) -> SanitizedRequest {
    let messages = if options.include_messages {
        request
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| sanitize_message(m, options.max_message_length))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let system = if options.include_system_prompt {
        request
            .get("system")
            .map(|s| sanitize_system(s, options.max_message_length))
    } else {
        None
    };

    let tools = if options.include_tools {
        request
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| tools.iter().filter_map(tool_descriptor).collect())
    } else {
        None
    };

    SanitizedRequest {
        model: request.get("model").and_then(Value::as_str).map(String::from),
        max_tokens: request.get("max_tokens").and_then(Value::as_u64),
        temperature: request.get("temperature").and_then(Value::as_f64),
        stream: request
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        messages,
        system,
        tools,
    }
}

fn sanitize_message(message: &Value, max_len: usize) -> SanitizedMessage {
    let role = message
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let content = match message.get("content") {
        Some(Value::String(text)) => Value::String(truncate_with_marker(text, max_len)),
        Some(Value::Array(blocks)) => Value::Array(
            blocks
                .iter()
                .map(|block| sanitize_block(block, max_len))
                .collect(),
        ),
        Some(other) => other.clone(),
        None => Value::Null,
    };

    SanitizedMessage { role, content }
}

/// 按块类型脱敏，未知类型原样保留
fn sanitize_block(block: &Value, max_len: usize) -> Value {
    let block_type = block.get("type").and_then(Value::as_str);
    match block_type {
        Some("text") => {
            let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
            json!({"type": "text", "text": truncate_with_marker(text, max_len)})
        }
        Some("image") => json!({"type": "image", "source": IMAGE_PLACEHOLDER}),
        Some("tool_use") => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("tool_use"));
            copy_field(block, &mut out, "name");
            copy_field(block, &mut out, "id");
            Value::Object(out)
        }
        Some("tool_result") => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("tool_result"));
            copy_field(block, &mut out, "tool_use_id");
            Value::Object(out)
        }
        _ => block.clone(),
    }
}

fn copy_field(from: &Value, to: &mut Map<String, Value>, key: &str) {
    if let Some(value) = from.get(key) {
        to.insert(key.to_string(), value.clone());
    }
}

/// system prompt 允许两倍长度
fn sanitize_system(system: &Value, max_len: usize) -> Value {
    match system {
        Value::String(text) => Value::String(truncate_with_marker(text, max_len.saturating_mul(2))),
        other => other.clone(),
    }
}

fn tool_descriptor(tool: &Value) -> Option<ToolDescriptor> {
    let name = tool.get("name").and_then(Value::as_str)?;
    Some(ToolDescriptor {
        name: name.to_string(),
        description: tool
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
    })
}
