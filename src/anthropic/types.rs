//! Anthropic API 传输层类型

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::audit::ErrorInfo;

// === 错误响应 ===

/// API 错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub error: ErrorDetail,
}

/// 错误详情
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl ErrorResponse {
    /// 创建新的错误响应
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_type: "error",
            error: ErrorDetail {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }

    /// 上游不可用
    pub fn api_error(message: impl Into<String>) -> Self {
        Self::new("api_error", message)
    }

    /// 请求体无法读取
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request_error", message)
    }
}

// === 上游失败 ===

/// 上游请求失败
///
/// 转换为 502/504 响应时会把自身放入响应扩展，供审计中间件的错误钩子读取。
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamFailure {
    pub message: String,
    pub code: String,
    /// 诊断信息（错误的 Debug 输出）
    pub trace: Option<String>,
}

impl UpstreamFailure {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            trace: None,
        }
    }

    /// 按 reqwest 错误类型分类
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            "timeout"
        } else if error.is_connect() {
            "connect"
        } else if error.is_body() {
            "body"
        } else if error.is_decode() {
            "decode"
        } else {
            "request"
        };

        Self {
            message: format!("上游请求失败: {}", error),
            code: code.to_string(),
            trace: Some(format!("{:?}", error)),
        }
    }

    fn status(&self) -> StatusCode {
        if self.code == "timeout" {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl From<&UpstreamFailure> for ErrorInfo {
    fn from(failure: &UpstreamFailure) -> Self {
        ErrorInfo::failure(failure.message.clone(), Some(failure.code.clone()))
            .with_trace(failure.trace.clone())
    }
}

impl IntoResponse for UpstreamFailure {
    fn into_response(self) -> Response {
        tracing::warn!(code = %self.code, "{}", self.message);
        let body = ErrorResponse::api_error(self.message.clone());
        let mut response = (self.status(), Json(body)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试错误响应格式
    #[test]
    fn test_error_response_format() {
        let json = serde_json::to_value(ErrorResponse::api_error("down")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["type"], "api_error");
        assert_eq!(json["error"]["message"], "down");
    }

    /// 测试失败响应携带扩展
    #[test]
    fn test_upstream_failure_into_response() {
        let failure = UpstreamFailure::new("connection refused", "connect");
        let response = failure.clone().into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.extensions().get::<UpstreamFailure>(), Some(&failure));

        let timeout = UpstreamFailure::new("slow", "timeout").into_response();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    /// 测试转换为审计错误投影
    #[test]
    fn test_error_info_conversion() {
        let mut failure = UpstreamFailure::new("boom", "body");
        failure.trace = Some("trace".to_string());
        let info = ErrorInfo::from(&failure);
        assert_eq!(info.message, "boom");
        assert_eq!(info.code.as_deref(), Some("body"));
        assert_eq!(info.trace.as_deref(), Some("trace"));
        assert!(info.error_type.is_none());
    }
}
