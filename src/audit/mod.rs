//! 请求审计模块
//!
//! 在客户端与上游生成 API 之间记录每个请求及其响应（流式或非流式），
//! 不改变客户端收到的任何内容：
//! - `sanitizer`: 请求脱敏
//! - `parser`: SSE 帧解析
//! - `accumulator`: 流式响应累积
//! - `interceptor`: 捕获 / 分叉 / 完成
//! - `writer`: 追加写入 JSONL 日志
//! - `middleware`: axum 中间件接入

pub mod accumulator;
pub mod interceptor;
pub mod middleware;
pub mod parser;
pub mod sanitizer;
pub mod types;
pub mod writer;

pub use interceptor::{AuditContext, AuditInterceptor, PendingRecord};
pub use middleware::audit_middleware;
pub use types::{ErrorInfo, LogRecord, ResponseSummary, SanitizedRequest, Usage};
pub use writer::LogWriter;
