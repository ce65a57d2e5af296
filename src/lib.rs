//! kiro-audit: 生成 API 审计代理
//!
//! 位于客户端与上游 chat-completion API 之间，把每个请求与响应（流式或非流式）
//! 追加到 JSONL 审计日志，客户端收到的内容保持不变。

pub mod anthropic;
pub mod audit;
pub mod common;
pub mod http_client;
pub mod model;
