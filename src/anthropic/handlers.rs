//! 上游转发处理器
//!
//! 原样转发请求体与认证相关请求头，SSE 响应以流的形式返回。

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode},
    response::Response,
};

use crate::common::is_event_stream;

use super::middleware::AppState;
use super::types::UpstreamFailure;

/// 转发给上游的请求头
const FORWARDED_HEADERS: &[&str] = &[
    "x-api-key",
    "authorization",
    "anthropic-version",
    "anthropic-beta",
    "content-type",
];

/// 不回传给客户端的逐跳响应头
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

/// POST /v1/messages
pub async fn post_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, UpstreamFailure> {
    forward(&state, "/v1/messages", &headers, body).await
}

/// POST /v1/messages/count_tokens
pub async fn count_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, UpstreamFailure> {
    forward(&state, "/v1/messages/count_tokens", &headers, body).await
}

async fn forward(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, UpstreamFailure> {
    let url = state.upstream_url(path);
    let mut request = state.client.post(&url).body(body);
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(*name) {
            request = request.header(*name, value.clone());
        }
    }

    let upstream = request.send().await.map_err(UpstreamFailure::from_reqwest)?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }

    let body = if is_event_stream(upstream.headers()) {
        tracing::debug!(url = %url, "SSE 流式响应");
        Body::from_stream(upstream.bytes_stream())
    } else {
        let bytes = upstream.bytes().await.map_err(UpstreamFailure::from_reqwest)?;
        Body::from(bytes)
    };

    builder
        .body(body)
        .map_err(|e| UpstreamFailure::new(format!("构建响应失败: {}", e), "response"))
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.as_str().eq_ignore_ascii_case(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试逐跳响应头识别
    #[test]
    fn test_is_hop_by_hop() {
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(is_hop_by_hop(&HeaderName::from_static("content-length")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("request-id")));
    }

    /// 测试上游不可达时返回分类后的失败
    #[tokio::test]
    async fn test_forward_connect_failure() {
        let client = crate::http_client::build_client(None, 5).unwrap();
        // 端口 9 (discard) 通常未监听
        let state = AppState::new(client, "http://127.0.0.1:9");
        let result = forward(&state, "/v1/messages", &HeaderMap::new(), Bytes::from_static(b"{}")).await;

        let failure = result.unwrap_err();
        assert!(failure.trace.is_some());
        assert!(!failure.message.is_empty());
    }
}
