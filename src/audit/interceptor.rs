//! 审计拦截器
//!
//! 请求生命周期：`Captured → (Streaming | Direct | Failed) → Logged`。
//!
//! [`AuditInterceptor::capture`] 在请求到达时生成 [`PendingRecord`]，
//! 之后恰好调用一次 `complete_direct` / `fail` / `tap_stream` 之一（均消耗 self），
//! 保证每个请求只写入一条记录。
//!
//! 流式响应被分叉为两份：一份原样返回调用方，另一份经 unbounded channel
//! 交给后台任务解析累积，日志侧永远不会对调用方施加背压。

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Result;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::model::config::AuditConfig;

use super::accumulator::StreamAccumulator;
use super::parser::{SseParser, is_tool_use};
use super::sanitizer::{SanitizeOptions, sanitize};
use super::types::{ErrorInfo, LogRecord, ResponseSummary, SanitizedRequest, UNKNOWN_SESSION, Usage};
use super::writer::LogWriter;

/// 默认审计的生成端点
pub const DEFAULT_ENDPOINT_PATH: &str = "/v1/messages";

/// 默认请求体上限（32 MiB），与转发处理器的请求体限制一致
pub const DEFAULT_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// 请求关联元数据
///
/// 由外层认证/会话中间件放入请求扩展，缺失时从请求头读取。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    pub session_id: Option<String>,
    pub preset: Option<String>,
}

/// 审计拦截器
pub struct AuditInterceptor {
    endpoint_path: String,
    options: SanitizeOptions,
    /// None 表示禁用
    writer: Option<LogWriter>,
    body_limit: usize,
}

impl AuditInterceptor {
    pub fn new(endpoint_path: impl Into<String>, options: SanitizeOptions, writer: LogWriter) -> Self {
        Self {
            endpoint_path: endpoint_path.into(),
            options,
            writer: Some(writer),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// 禁用状态：不匹配任何请求
    pub fn disabled() -> Self {
        Self {
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            options: SanitizeOptions::default(),
            writer: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// 设置中间件缓冲请求体的上限
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    /// 根据配置创建（启用时打开日志文件）
    pub async fn from_config(config: &AuditConfig) -> Result<Self> {
        if !config.enabled {
            tracing::info!("审计日志已禁用");
            return Ok(Self::disabled());
        }

        let writer = LogWriter::open(config.log_file_path(), config.channel_capacity).await?;
        Ok(Self::new(
            config.endpoint_path.clone(),
            config.sanitize.clone(),
            writer,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn writer(&self) -> Option<&LogWriter> {
        self.writer.as_ref()
    }

    /// 请求路径是否为需要审计的生成端点
    pub fn matches(&self, path: &str) -> bool {
        self.is_enabled()
            && path.trim_end_matches('/') == self.endpoint_path.trim_end_matches('/')
    }

    /// 捕获请求，生成待完成的记录
    ///
    /// 请求体无法解析为 JSON 时仍会生成记录（脱敏结果为空）。
    pub fn capture(&self, body: &[u8], context: AuditContext) -> Option<PendingRecord> {
        let writer = self.writer.clone()?;

        let payload = serde_json::from_slice::<Value>(body).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "请求体不是有效 JSON，按空请求记录");
            Value::Null
        });

        let draft = RecordDraft {
            started: Instant::now(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: context
                .session_id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_SESSION.to_string()),
            preset: context.preset,
            request: sanitize(&payload, &self.options),
        };

        tracing::debug!(
            request_id = %draft.request_id,
            session_id = %draft.session_id,
            model = ?draft.request.model,
            stream = draft.request.stream,
            "已捕获请求"
        );

        Some(PendingRecord {
            draft: Some(draft),
            writer,
        })
    }

    /// 等待已提交的记录写入
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            if let Err(e) = writer.flush().await {
                tracing::warn!(error = %e, "刷新审计日志失败");
            }
        }
    }
}

/// 记录草稿（捕获时确定的字段）
#[derive(Debug, Clone)]
struct RecordDraft {
    started: Instant,
    timestamp: String,
    request_id: String,
    session_id: String,
    preset: Option<String>,
    request: SanitizedRequest,
}

impl RecordDraft {
    fn finalize(self, response: Option<ResponseSummary>, error: Option<ErrorInfo>) -> LogRecord {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        // 成功与错误互斥
        let response = if error.is_some() { None } else { response };

        tracing::debug!(
            request_id = %self.request_id,
            session_id = %self.session_id,
            duration_ms,
            failed = error.is_some(),
            "审计记录已完成"
        );

        LogRecord {
            timestamp: self.timestamp,
            request_id: self.request_id,
            session_id: self.session_id,
            preset: self.preset,
            request: self.request,
            response,
            duration_ms,
            error,
        }
    }
}

/// 单个请求的待完成记录
///
/// 未经 `complete_direct` / `fail` / `tap_stream` 就被丢弃（调用方断开导致
/// 中间件 future 被取消等）时，在 drop 中写入一条 `cancelled` 错误记录。
pub struct PendingRecord {
    /// 写入后置为 None
    draft: Option<RecordDraft>,
    writer: LogWriter,
}

impl PendingRecord {
    pub fn request_id(&self) -> &str {
        self.draft.as_ref().map_or("", |d| d.request_id.as_str())
    }

    pub fn request(&self) -> Option<&SanitizedRequest> {
        self.draft.as_ref().map(|d| &d.request)
    }

    /// 非流式响应
    ///
    /// 响应体含 `error` 字段时记录为领域错误，否则直接从响应体填充摘要。
    pub fn complete_direct(mut self, status: u16, body: &[u8]) {
        let (response, error) = direct_outcome(status, body);
        self.settle(response, error);
    }

    /// 请求失败（网络错误、上游故障等）
    pub fn fail(mut self, error: ErrorInfo) {
        tracing::debug!(request_id = %self.request_id(), message = %error.message, "请求失败");
        self.settle(None, Some(error));
    }

    /// 分叉流式响应
    ///
    /// 返回的流与上游逐项相同；副本交给后台任务累积，流结束（包括调用方中断）后写入记录。
    pub fn tap_stream<S, E>(self, upstream: S) -> impl Stream<Item = Result<Bytes, E>> + Send + 'static
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.tap_stream_with(upstream, accumulate_stream)
    }

    fn tap_stream_with<S, E, F, Fut>(
        mut self,
        upstream: S,
        accumulate: F,
    ) -> impl Stream<Item = Result<Bytes, E>> + Send + 'static
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce(RecordDraft, TapReceiver) -> Fut + 'static,
        Fut: Future<Output = LogRecord> + Send + 'static,
    {
        let (mut tx, rx) = tap_channel(self.request_id().to_string());
        if let Some(draft) = self.draft.take() {
            let fallback = draft.clone();
            spawn_supervised(fallback, self.writer.clone(), accumulate(draft, rx));
        }

        upstream.map(move |item| {
            let tap = match &item {
                Ok(chunk) => TapEvent::Chunk(chunk.clone()),
                Err(e) => TapEvent::Failed(e.to_string()),
            };
            tx.send(tap);
            item
        })
    }

    fn settle(&mut self, response: Option<ResponseSummary>, error: Option<ErrorInfo>) {
        if let Some(draft) = self.draft.take() {
            self.writer.append(draft.finalize(response, error));
        }
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        if self.draft.is_none() {
            return;
        }
        tracing::warn!(request_id = %self.request_id(), "请求在完成前被取消");
        self.settle(
            None,
            Some(ErrorInfo::failure(
                "request cancelled",
                Some("cancelled".to_string()),
            )),
        );
    }
}

/// 累积任务积压超过该数量的 chunk 时告警（每个流一次）
const TAP_BACKLOG_WARN: usize = 1024;

enum TapEvent {
    Chunk(Bytes),
    Failed(String),
}

/// 分叉发送端：不施加背压，只统计积压
struct TapSender {
    tx: mpsc::UnboundedSender<TapEvent>,
    backlog: Arc<AtomicUsize>,
    request_id: String,
    warned: bool,
}

impl TapSender {
    fn send(&mut self, event: TapEvent) {
        // 累积任务已退出时忽略
        if self.tx.send(event).is_err() {
            return;
        }
        let queued = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        if queued >= TAP_BACKLOG_WARN && !self.warned {
            self.warned = true;
            tracing::warn!(request_id = %self.request_id, queued, "流式累积任务积压");
        }
    }
}

struct TapReceiver {
    rx: mpsc::UnboundedReceiver<TapEvent>,
    backlog: Arc<AtomicUsize>,
}

impl TapReceiver {
    async fn recv(&mut self) -> Option<TapEvent> {
        let event = self.rx.recv().await?;
        self.backlog.fetch_sub(1, Ordering::Relaxed);
        Some(event)
    }
}

fn tap_channel(request_id: String) -> (TapSender, TapReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    (
        TapSender {
            tx,
            backlog: backlog.clone(),
            request_id,
            warned: false,
        },
        TapReceiver { rx, backlog },
    )
}

/// 在受监管的后台任务中运行累积
///
/// 累积任务 panic 时由外层任务兜底，仍然写入一条错误记录。
fn spawn_supervised<F>(fallback: RecordDraft, writer: LogWriter, accumulation: F)
where
    F: Future<Output = LogRecord> + Send + 'static,
{
    tokio::spawn(async move {
        let record = match tokio::spawn(accumulation).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    request_id = %fallback.request_id,
                    error = %e,
                    "流式响应累积任务异常"
                );
                fallback.finalize(
                    None,
                    Some(ErrorInfo::failure(
                        format!("stream accumulation failed: {}", e),
                        Some("accumulation_failed".to_string()),
                    )),
                )
            }
        };
        writer.append(record);
    });
}

async fn accumulate_stream(draft: RecordDraft, mut rx: TapReceiver) -> LogRecord {
    let mut parser = SseParser::new();
    let mut accumulator = StreamAccumulator::new();
    let mut transport_error = None;

    while let Some(event) = rx.recv().await {
        match event {
            TapEvent::Chunk(chunk) => {
                for event in parser.feed(&chunk) {
                    accumulator.apply(event);
                }
            }
            TapEvent::Failed(message) => {
                transport_error = Some(message);
                break;
            }
        }
    }
    for event in parser.finish() {
        accumulator.apply(event);
    }

    let result = accumulator.finish();
    if !result.complete && transport_error.is_none() {
        tracing::warn!(
            request_id = %draft.request_id,
            events = result.events,
            "流在 message_stop 之前结束，记录部分结果"
        );
    }

    let error = transport_error
        .map(|message| ErrorInfo::failure(message, Some("stream_error".to_string())))
        .or(result.error);

    match error {
        Some(error) => draft.finalize(None, Some(error)),
        None => draft.finalize(Some(result.summary), None),
    }
}

/// 非流式响应的结果
fn direct_outcome(status: u16, body: &[u8]) -> (Option<ResponseSummary>, Option<ErrorInfo>) {
    match serde_json::from_slice::<Value>(body) {
        Ok(payload) => match domain_error(&payload) {
            Some(error) => (None, Some(error)),
            None if status >= 400 => (
                None,
                Some(ErrorInfo::failure(
                    format!("upstream returned HTTP {}", status),
                    Some(format!("http_{}", status)),
                )),
            ),
            None => (Some(summary_from_payload(&payload)), None),
        },
        Err(e) => (
            None,
            Some(ErrorInfo::failure(
                format!("invalid response body (HTTP {}): {}", status, e),
                Some("invalid_response".to_string()),
            )),
        ),
    }
}

/// 提取响应体中的 `error` 字段
fn domain_error(payload: &Value) -> Option<ErrorInfo> {
    let error = payload.get("error").filter(|e| !e.is_null())?;
    let info = match error {
        Value::String(message) => ErrorInfo::domain(None, message.clone()),
        other => ErrorInfo::domain(
            other.get("type").and_then(Value::as_str).map(String::from),
            other
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error"),
        ),
    };
    Some(info)
}

/// 非流式响应直接构造摘要（不经过事件解析）
fn summary_from_payload(payload: &Value) -> ResponseSummary {
    let blocks = payload
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let full_text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    let content = blocks
        .iter()
        .map(|block| {
            if is_tool_use(block) {
                json!({
                    "type": "tool_use",
                    "id": block.get("id"),
                    "name": block.get("name"),
                    "input": block.get("input"),
                })
            } else {
                block.clone()
            }
        })
        .collect();

    let string_field = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);

    ResponseSummary {
        id: string_field("id"),
        model: string_field("model"),
        role: string_field("role"),
        content,
        full_text,
        stop_reason: string_field("stop_reason"),
        stop_sequence: string_field("stop_sequence"),
        usage: payload
            .get("usage")
            .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok()),
    }
}
