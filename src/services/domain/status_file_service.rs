/// 状态文件服务
///
/// 周期性把桥接器状态写成JSON文件，供托盘指示器进程读取。
/// 写入优先使用临时文件加原子改名；改名失败（平台文件锁）时
/// 退回为直接覆盖写入。读取方把超过5秒未更新的文档视为未运行

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handshake_service::{ConnectionStatus, HandshakeStateMachine};
use crate::services::infrastructure::persistence::LocalCacheService;
use crate::utils::config::StatusConfig;
use crate::utils::error::{AppError, AppResult};

/// 写入状态文件的JSON文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub status: String,
    pub plc_connected: bool,
    pub sql_connected: bool,
    pub pending_count: u64,
    pub last_update: Option<String>,
    pub error: Option<String>,
}

impl Default for StatusDocument {
    fn default() -> Self {
        Self {
            status: "starting".to_string(),
            plc_connected: false,
            sql_connected: false,
            pending_count: 0,
            last_update: None,
            error: None,
        }
    }
}

/// 状态文件写入服务
pub struct StatusFileService {
    file_path: PathBuf,
    update_interval: Duration,
    status: Mutex<StatusDocument>,
}

impl StatusFileService {
    pub fn new(config: &StatusConfig) -> Self {
        Self {
            file_path: PathBuf::from(&config.path),
            update_interval: Duration::from_secs(config.update_interval_s),
            status: Mutex::new(StatusDocument::default()),
        }
    }

    /// 按连接状态摘要更新文档字段
    pub fn set_status(&self, status: ConnectionStatus) {
        let mut doc = self.status.lock().unwrap();
        doc.status = status.as_str().to_string();
        doc.plc_connected = matches!(
            status,
            ConnectionStatus::Connected | ConnectionStatus::SqlOffline
        );
        doc.sql_connected = status == ConnectionStatus::Connected;
        if status != ConnectionStatus::Fault {
            doc.error = None;
        }
    }

    pub fn set_pending_count(&self, count: u64) {
        self.status.lock().unwrap().pending_count = count;
    }

    pub fn set_error(&self, error: Option<String>) {
        self.status.lock().unwrap().error = error;
    }

    fn mark_stopped(&self) {
        self.status.lock().unwrap().status = "stopped".to_string();
    }

    /// 把当前状态写入文件
    ///
    /// 先写临时文件再原子改名；改名失败时退回直接覆盖
    pub async fn write_status(&self) -> AppResult<()> {
        let json = {
            let mut doc = self.status.lock().unwrap();
            doc.last_update = Some(Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string());
            serde_json::to_string_pretty(&*doc)?
        };

        if let Some(parent_dir) = self.file_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                tokio::fs::create_dir_all(parent_dir).await.map_err(|e| {
                    AppError::io_error(
                        format!("创建状态目录失败: {:?}", parent_dir),
                        e.kind().to_string(),
                    )
                })?;
            }
        }

        let tmp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await.map_err(|e| {
            AppError::io_error(
                format!("写入临时状态文件失败: {:?}", tmp_path),
                e.kind().to_string(),
            )
        })?;

        if tokio::fs::rename(&tmp_path, &self.file_path).await.is_err() {
            // 改名被占用（另一进程正打开读取），直接覆盖写入
            tokio::fs::write(&self.file_path, &json).await.map_err(|e| {
                AppError::io_error(
                    format!("写入状态文件失败: {:?}", self.file_path),
                    e.kind().to_string(),
                )
            })?;
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }

        Ok(())
    }

    /// 当前文档快照（测试与诊断用）
    pub fn snapshot(&self) -> StatusDocument {
        self.status.lock().unwrap().clone()
    }

    /// 启动状态发布任务
    ///
    /// 周期性地汇总握手状态与缓存积压数并写入文件；
    /// 收到关闭信号后写出最终的 stopped 文档
    pub fn spawn_publisher(
        self: Arc<Self>,
        handshake: Arc<HandshakeStateMachine>,
        cache: Arc<LocalCacheService>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let update_interval = self.update_interval;
        tokio::spawn(async move {
            log::debug!("状态发布任务已启动, 写入 {:?}", self.file_path);
            loop {
                self.set_status(handshake.get_status());
                match cache.pending_count().await {
                    Ok(count) => self.set_pending_count(count),
                    Err(e) => log::warn!("读取缓存积压数失败: {}", e),
                }
                if let Err(e) = self.write_status().await {
                    log::error!("写状态文件失败: {}", e);
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(update_interval) => {}
                }
            }

            self.mark_stopped();
            if let Err(e) = self.write_status().await {
                log::error!("写最终状态文件失败: {}", e);
            }
            log::info!("状态发布任务已停止");
        })
    }
}
