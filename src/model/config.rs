use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audit::interceptor::{DEFAULT_BODY_LIMIT, DEFAULT_ENDPOINT_PATH};
use crate::audit::sanitizer::SanitizeOptions;
use crate::audit::writer::DEFAULT_CHANNEL_CAPACITY;

/// 审计日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// 总开关，关闭后不安装审计中间件
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,

    /// 日志文件路径（未配置时使用用户目录下的默认位置）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<PathBuf>,

    /// 需要审计的生成端点
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,

    /// 写入队列容量，队列满时丢弃记录
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// includeSystemPrompt / includeMessages / includeTools / maxMessageLength
    #[serde(flatten)]
    pub sanitize: SanitizeOptions,
}

fn default_audit_enabled() -> bool {
    true
}

fn default_endpoint_path() -> String {
    DEFAULT_ENDPOINT_PATH.to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            log_file_path: None,
            endpoint_path: default_endpoint_path(),
            channel_capacity: default_channel_capacity(),
            sanitize: SanitizeOptions::default(),
        }
    }
}

impl AuditConfig {
    /// 默认日志路径：`~/.kiro-audit/logs/requests.jsonl`
    pub fn default_log_file_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".kiro-audit"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("logs")
            .join("requests.jsonl")
    }

    /// 实际使用的日志路径
    pub fn log_file_path(&self) -> PathBuf {
        self.log_file_path
            .clone()
            .unwrap_or_else(Self::default_log_file_path)
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// 上游 API 地址
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// 上游请求超时（秒），需覆盖完整的流式响应
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// 请求体上限（字节），超出时返回 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_upstream_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_max_body_bytes() -> usize {
    DEFAULT_BODY_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream_base_url: default_upstream_base_url(),
            proxy_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            audit: AuditConfig::default(),
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置，文件不存在时返回默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "配置文件不存在，使用默认配置");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
