//! Anthropic API 兼容的转发服务

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod types;

pub use router::create_router;
