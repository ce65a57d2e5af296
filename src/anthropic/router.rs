//! 路由装配

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, middleware, routing::post};

use crate::audit::{AuditInterceptor, audit_middleware};

use super::handlers::{count_tokens, post_messages};
use super::middleware::{AppState, cors_layer};

/// 创建应用路由
///
/// 审计关闭时不安装审计中间件。转发处理器与审计中间件共用 `audit.body_limit()`。
pub fn create_router(state: AppState, audit: Arc<AuditInterceptor>) -> Router {
    let router = Router::new()
        .route("/v1/messages", post(post_messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .layer(DefaultBodyLimit::max(audit.body_limit()))
        .with_state(state);

    let router = if audit.is_enabled() {
        router.layer(middleware::from_fn_with_state(audit, audit_middleware))
    } else {
        router
    };

    router.layer(cors_layer())
}
