//! Anthropic API 中间件

/// 应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 上游 HTTP 客户端
    pub client: reqwest::Client,
    /// 上游 API 地址
    pub upstream_base_url: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(client: reqwest::Client, upstream_base_url: impl Into<String>) -> Self {
        Self {
            client,
            upstream_base_url: upstream_base_url.into(),
        }
    }

    /// 拼接上游 URL
    pub fn upstream_url(&self, path: &str) -> String {
        format!("{}{}", self.upstream_base_url.trim_end_matches('/'), path)
    }
}

/// CORS 中间件层
///
/// **安全说明**：当前配置允许所有来源（Any），与直接访问上游 API 的行为一致。
pub fn cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::{Any, CorsLayer};

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
