//! 审计中间件
//!
//! 三个钩子：
//! - 入站：读取请求体并捕获（仅生成端点）
//! - 出站：非流式响应缓冲后原样返回，SSE 响应分叉
//! - 错误：响应扩展中带有 [`UpstreamFailure`] 时记录为失败

use std::sync::Arc;

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::State,
    http::{Request, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::anthropic::types::{ErrorResponse, UpstreamFailure};
use crate::common::is_event_stream;

use super::interceptor::{AuditContext, AuditInterceptor, PendingRecord};
use super::types::ErrorInfo;

/// 会话 ID 请求头
pub const SESSION_ID_HEADER: &str = "x-session-id";
/// 预设标签请求头
pub const PRESET_HEADER: &str = "x-preset";

impl AuditContext {
    /// 优先使用请求扩展，其次使用请求头
    pub fn from_parts(parts: &Parts) -> Self {
        if let Some(context) = parts.extensions.get::<AuditContext>() {
            return context.clone();
        }

        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            session_id: header(SESSION_ID_HEADER),
            preset: header(PRESET_HEADER),
        }
    }
}

/// 审计中间件
pub async fn audit_middleware(
    State(audit): State<Arc<AuditInterceptor>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !audit.matches(request.uri().path()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    // 与转发处理器的 DefaultBodyLimit 相同的上限
    let body = match to_bytes(body, audit.body_limit()).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, limit = audit.body_limit(), "读取请求体失败");
            let error = ErrorResponse::invalid_request("Request body too large or unreadable");
            return (StatusCode::PAYLOAD_TOO_LARGE, Json(error)).into_response();
        }
    };

    #[cfg(feature = "sensitive-logs")]
    tracing::debug!(body = %String::from_utf8_lossy(&body), "收到生成请求");

    let pending = audit.capture(&body, AuditContext::from_parts(&parts));
    let request = Request::from_parts(parts, Body::from(body));
    let response = next.run(request).await;

    match pending {
        Some(pending) => observe_response(pending, response).await,
        None => response,
    }
}

async fn observe_response(pending: PendingRecord, response: Response) -> Response {
    if let Some(failure) = response.extensions().get::<UpstreamFailure>() {
        pending.fail(ErrorInfo::from(failure));
        return response;
    }

    let (parts, body) = response.into_parts();

    if is_event_stream(&parts.headers) {
        tracing::debug!(request_id = %pending.request_id(), "分叉 SSE 响应");
        let stream = pending.tap_stream(body.into_data_stream());
        return Response::from_parts(parts, Body::from_stream(stream));
    }

    // 非流式响应已由转发处理器完整读入内存，这里不再设上限
    match to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            pending.complete_direct(parts.status.as_u16(), &bytes);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::warn!(error = %e, "读取上游响应体失败");
            pending.fail(ErrorInfo::failure(
                format!("failed to read response body: {}", e),
                Some("body".to_string()),
            ));
            // 状态码与响应头不变，同一个错误继续交给调用方
            let body = Body::from_stream(futures::stream::once(async move { Err::<Bytes, _>(e) }));
            Response::from_parts(parts, body)
        }
    }
}
