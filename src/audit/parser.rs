//! SSE 事件解析
//!
//! 将上游字节流按行切分，识别 `data: ` 前缀的数据帧并解码为 [`StreamEvent`]。
//! 跨 chunk 的行（包括被拆开的多字节字符）会被缓冲直到换行到达。
//! 无效 JSON 帧解码为 [`StreamEvent::Other`]，永不返回错误。

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::types::Usage;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// 流式事件（按 `type` 字段区分）
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: MessageStart,
    },
    ContentBlockStart {
        #[serde(default)]
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        #[serde(default)]
        delta: ContentBlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDelta,
        #[serde(default, deserialize_with = "lenient_usage")]
        usage: Option<Usage>,
    },
    MessageStop,
    Error {
        #[serde(default)]
        error: StreamError,
    },
    /// 未识别的类型或无法解码的帧
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageStart {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_usage")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentBlockStart {
    #[serde(rename = "type", default)]
    pub block_type: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// 只关心文本增量；`input_json_delta` 等其它增量没有 `text`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentBlockDelta {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamError {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// 无法识别的 usage 对象只丢弃用量，不影响所在帧的其它字段
fn lenient_usage<'de, D>(deserializer: D) -> Result<Option<Usage>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// 解码单行
///
/// 非数据行返回 `None`；数据行总是得到一个事件，解码失败时为 `Other`。
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload.trim() == DONE_SENTINEL {
        return None;
    }

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::trace!(error = %e, "跳过无法解析的 SSE 数据帧");
            Some(StreamEvent::Other)
        }
    }
}

/// 增量 SSE 解析器（每个流一个实例）
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一个 chunk，返回其中完整行解码出的事件
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        decode_lines(&complete)
    }

    /// 流结束时处理缓冲区中剩余的最后一行
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let remaining = std::mem::take(&mut self.pending);
        decode_lines(&remaining)
    }
}

fn decode_lines(bytes: &[u8]) -> Vec<StreamEvent> {
    bytes
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_line(&String::from_utf8_lossy(line)))
        .collect()
}

/// 判断值是否为 `tool_use` 类型的内容块
pub(crate) fn is_tool_use(block: &Value) -> bool {
    block.get("type").and_then(Value::as_str) == Some("tool_use")
}
