use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiro_audit::anthropic::{create_router, middleware::AppState};
use kiro_audit::audit::AuditInterceptor;
use kiro_audit::http_client::build_client;
use kiro_audit::model::config::Config;

/// 生成 API 审计代理
#[derive(Parser, Debug)]
#[command(name = "kiro-audit", version, about)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = Config::default_config_path())]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config))?;

    let client = build_client(config.proxy_url.as_deref(), config.request_timeout_secs)
        .context("构建 HTTP 客户端失败")?;
    let state = AppState::new(client, config.upstream_base_url.clone());

    let audit = Arc::new(
        AuditInterceptor::from_config(&config.audit)
            .await
            .context("初始化审计日志失败")?
            .with_body_limit(config.max_body_bytes),
    );
    if let Some(writer) = audit.writer() {
        tracing::info!(
            path = %writer.path().display(),
            endpoint = %config.audit.endpoint_path,
            "审计已启用"
        );
    }

    let app = create_router(state, audit.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听地址失败: {}", addr))?;
    tracing::info!(
        addr = %addr,
        upstream = %config.upstream_base_url,
        "服务已启动"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    audit.flush().await;
    if let Some(writer) = audit.writer() {
        let dropped = writer.dropped();
        if dropped > 0 {
            tracing::warn!(dropped, "部分审计记录未能写入");
        }
    }
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
    }
    tracing::info!("收到退出信号，正在关闭");
}
