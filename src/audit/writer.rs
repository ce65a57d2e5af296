//! 审计日志写入
//!
//! 所有记录经 channel 交给唯一的后台写入任务，每条记录作为一整行写入，
//! 并发请求之间不会出现交错的半行。写入失败只计数并输出诊断日志。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use super::types::LogRecord;

/// 默认队列容量
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

enum WriterCommand {
    Append(LogRecord),
    Flush(oneshot::Sender<()>),
}

/// 审计日志写入器（可廉价克隆）
#[derive(Clone)]
pub struct LogWriter {
    sender: mpsc::Sender<WriterCommand>,
    dropped: Arc<AtomicU64>,
    path: Arc<PathBuf>,
}

impl LogWriter {
    /// 打开（必要时创建）日志文件并启动后台写入任务
    pub async fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建审计日志目录失败: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("打开审计日志文件失败: {}", path.display()))?;

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        tokio::spawn(write_loop(file, receiver, dropped.clone()));

        tracing::info!(path = %path.display(), "审计日志已打开");

        Ok(Self {
            sender,
            dropped,
            path: Arc::new(path),
        })
    }

    /// 追加一条记录（非阻塞）
    ///
    /// 队列已满或写入任务已退出时丢弃记录。
    pub fn append(&self, record: LogRecord) {
        if let Err(e) = self.sender.try_send(WriterCommand::Append(record)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "队列已满",
                mpsc::error::TrySendError::Closed(_) => "写入任务已退出",
            };
            tracing::warn!(reason, "审计记录被丢弃");
        }
    }

    /// 等待此前入队的记录全部写入并刷盘
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriterCommand::Flush(tx))
            .await
            .map_err(|_| anyhow::anyhow!("审计日志写入任务已退出"))?;
        rx.await.context("审计日志写入任务已退出")
    }

    /// 未能持久化的记录数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn write_loop(
    mut file: File,
    mut receiver: mpsc::Receiver<WriterCommand>,
    dropped: Arc<AtomicU64>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            WriterCommand::Append(record) => {
                let mut line = match serde_json::to_vec(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(error = %e, "序列化审计记录失败");
                        continue;
                    }
                };
                line.push(b'\n');

                if let Err(e) = file.write_all(&line).await {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        error = %e,
                        request_id = %record.request_id,
                        "写入审计日志失败"
                    );
                }
            }
            WriterCommand::Flush(done) => {
                if let Err(e) = file.flush().await {
                    tracing::error!(error = %e, "刷新审计日志失败");
                }
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("审计日志写入循环已退出");
}
