//! 流式响应累积
//!
//! 按到达顺序把 [`StreamEvent`] 折叠成一个 [`ResponseSummary`]。

use serde_json::json;

use super::parser::StreamEvent;
use super::types::{ErrorInfo, ResponseSummary};

/// 单个流的累积器
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    summary: ResponseSummary,
    stopped: bool,
    error: Option<ErrorInfo>,
    events: usize,
}

/// 累积结果
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulated {
    pub summary: ResponseSummary,
    /// 是否观察到 `message_stop`
    pub complete: bool,
    /// 流内 `error` 事件
    pub error: Option<ErrorInfo>,
    /// 匹配到的事件数（不含 Other）
    pub events: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用一个事件
    pub fn apply(&mut self, event: StreamEvent) {
        let summary = &mut self.summary;
        match event {
            StreamEvent::MessageStart { message } => {
                if summary.id.is_none() {
                    summary.id = message.id;
                }
                if summary.model.is_none() {
                    summary.model = message.model;
                }
                if summary.role.is_none() {
                    summary.role = message.role;
                }
                // message_start 只携带初始 input_tokens，之后由 message_delta 覆盖
                if summary.usage.is_none() {
                    summary.usage = message.usage;
                }
            }
            StreamEvent::ContentBlockStart { content_block } => {
                if content_block.block_type.as_deref() != Some("tool_use") {
                    return;
                }
                summary.content.push(json!({
                    "type": "tool_use",
                    "name": content_block.name,
                    "id": content_block.id,
                }));
            }
            StreamEvent::ContentBlockDelta { delta } => {
                if let Some(text) = delta.text {
                    summary.full_text.push_str(&text);
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    summary.usage = Some(usage);
                }
                if let Some(stop_reason) = delta.stop_reason {
                    summary.stop_reason = Some(stop_reason);
                }
                if let Some(stop_sequence) = delta.stop_sequence {
                    summary.stop_sequence = Some(stop_sequence);
                }
            }
            StreamEvent::MessageStop => self.stopped = true,
            StreamEvent::Error { error } => {
                self.error = Some(ErrorInfo::domain(
                    error.error_type,
                    error.message.unwrap_or_else(|| "stream error".to_string()),
                ));
            }
            StreamEvent::Other => return,
        }
        self.events += 1;
    }

    /// 冻结当前状态
    pub fn finish(self) -> Accumulated {
        Accumulated {
            summary: self.summary,
            complete: self.stopped,
            error: self.error,
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::parser::{SseParser, parse_line};
    use crate::audit::types::Usage;

    fn accumulate(lines: &[&str]) -> Accumulated {
        let mut acc = StreamAccumulator::new();
        for line in lines {
            if let Some(event) = parse_line(line) {
                acc.apply(event);
            }
        }
        acc.finish()
    }

    /// 测试典型文本流
    #[test]
    fn test_text_stream() {
        let result = accumulate(&[
            r#"data: {"type":"message_start","message":{"id":"x1","model":"m1"}}"#,
            r#"data: {"type":"content_block_delta","delta":{"text":"Hi"}}"#,
            r#"data: {"type":"content_block_delta","delta":{"text":" there"}}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":5,"output_tokens":2}}"#,
        ]);

        let summary = result.summary;
        assert_eq!(summary.id.as_deref(), Some("x1"));
        assert_eq!(summary.model.as_deref(), Some("m1"));
        assert_eq!(summary.full_text, "Hi there");
        assert_eq!(summary.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(
            summary.usage,
            Some(Usage {
                input_tokens: 5,
                output_tokens: 2,
                ..Default::default()
            })
        );
        assert!(!result.complete);
        assert_eq!(result.events, 4);
    }

    /// 测试无效帧不影响后续帧
    #[test]
    fn test_malformed_frames_skipped() {
        let result = accumulate(&[
            r#"data: {"type":"content_block_delta","delta":{"text":"A"}}"#,
            r#"data: {"type":"content_block_delta","delta":{"te"#,
            "data: garbage",
            r#"data: {"type":"content_block_delta","delta":{"text":"B"}}"#,
        ]);
        assert_eq!(result.summary.full_text, "AB");
        assert_eq!(result.events, 2);
    }

    /// 测试 message_start 只在未设置时生效
    #[test]
    fn test_message_start_first_wins() {
        let result = accumulate(&[
            r#"data: {"type":"message_start","message":{"id":"first","model":"m1","role":"assistant"}}"#,
            r#"data: {"type":"message_start","message":{"id":"second","model":"m2"}}"#,
        ]);
        assert_eq!(result.summary.id.as_deref(), Some("first"));
        assert_eq!(result.summary.model.as_deref(), Some("m1"));
        assert_eq!(result.summary.role.as_deref(), Some("assistant"));
    }

    /// 测试 tool_use 块按到达顺序记录，非 tool_use 块忽略
    #[test]
    fn test_tool_use_blocks() {
        let result = accumulate(&[
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"search","input":{}}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#,
            r#"data: {"type":"content_block_start","index":2,"content_block":{"type":"tool_use","id":"tu_2","name":"fetch","input":{}}}"#,
        ]);

        assert_eq!(
            result.summary.content,
            vec![
                json!({"type": "tool_use", "name": "search", "id": "tu_1"}),
                json!({"type": "tool_use", "name": "fetch", "id": "tu_2"}),
            ]
        );
        assert_eq!(result.summary.full_text, "");
    }

    /// 测试 usage 与 stop_reason 后到覆盖
    #[test]
    fn test_message_delta_last_wins() {
        let result = accumulate(&[
            r#"data: {"type":"message_start","message":{"id":"x","usage":{"input_tokens":9,"output_tokens":1}}}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":3}}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":9,"output_tokens":7,"cache_read_input_tokens":4}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]);

        assert_eq!(result.summary.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(
            result.summary.usage,
            Some(Usage {
                input_tokens: 9,
                output_tokens: 7,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: Some(4),
            })
        );
        assert!(result.complete);
    }

    /// 测试没有任何有效事件时保持初始状态
    #[test]
    fn test_no_valid_events() {
        let result = accumulate(&["data: {", "data: }", "event: ping"]);
        assert_eq!(result.summary, ResponseSummary::default());
        assert_eq!(result.events, 0);
        assert!(result.error.is_none());
    }

    /// 测试流内 error 事件
    #[test]
    fn test_stream_error_event() {
        let result = accumulate(&[
            r#"data: {"type":"content_block_delta","delta":{"text":"partial"}}"#,
            r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ]);
        let error = result.error.unwrap();
        assert_eq!(error.error_type.as_deref(), Some("overloaded_error"));
        assert_eq!(error.message, "Overloaded");
        assert_eq!(result.summary.full_text, "partial");
    }

    /// 测试任意切分方式下文本按顺序完整拼接
    #[test]
    fn test_full_text_independent_of_chunking() {
        let mut stream = String::new();
        let mut expected = String::new();
        for i in 0..20 {
            let piece = format!("p{}-", i);
            expected.push_str(&piece);
            stream.push_str(&format!(
                "event: content_block_delta\ndata: {{\"type\":\"content_block_delta\",\"delta\":{{\"text\":\"{}\"}}}}\n\n",
                piece
            ));
            if i % 3 == 0 {
                stream.push_str("data: {\"type\":\"content_block_delta\",\"delta\n\n");
            }
        }

        for chunk_size in [1, 7, 64, 4096] {
            let mut parser = SseParser::new();
            let mut acc = StreamAccumulator::new();
            for chunk in stream.as_bytes().chunks(chunk_size) {
                for event in parser.feed(chunk) {
                    acc.apply(event);
                }
            }
            for event in parser.finish() {
                acc.apply(event);
            }
            assert_eq!(acc.finish().summary.full_text, expected, "chunk size {}", chunk_size);
        }
    }
}
