/// batchlog 主入口
///
/// 初始化各组件后启动四个后台任务（握手轮询、心跳、缓存同步、状态发布），
/// 阻塞等待停止信号，随后取消所有任务并限时等待其退出。
/// 退出码：0 正常关闭，非0 初始化失败

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use batchlog_lib::services::domain::{HandshakeStateMachine, HeartbeatService, StatusFileService};
use batchlog_lib::services::infrastructure::database::{DatabaseSqlWriter, SqlWriterService};
use batchlog_lib::services::infrastructure::persistence::LocalCacheService;
use batchlog_lib::services::infrastructure::plc::{ModbusPlcService, PlcTagService};
use batchlog_lib::utils::config::load_config;

/// 任务退出的等待期限
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("致命错误: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    log::info!("batchlog 启动中...");
    let config = load_config(&config_path).context("加载配置失败")?;
    let mappings = config
        .composed_mappings()
        .context("合并映射表失败")?;

    // 组件初始化：A PLC网关、B SQL写入、C 本地缓存
    let plc: Arc<dyn PlcTagService> = Arc::new(ModbusPlcService::new(config.plc.clone()));
    let sql: Arc<dyn SqlWriterService> = Arc::new(DatabaseSqlWriter::new(config.sql.clone()));
    let cache = Arc::new(
        LocalCacheService::new(&config.local_cache)
            .await
            .context("初始化本地缓存失败")?,
    );

    let handshake = Arc::new(HandshakeStateMachine::new(
        plc.clone(),
        sql.clone(),
        cache.clone(),
        mappings,
        config.validation.clone(),
    ));
    let heartbeat = Arc::new(HeartbeatService::new(
        plc.clone(),
        Duration::from_secs(config.heartbeat.interval_s),
    ));
    let status_file = Arc::new(StatusFileService::new(&config.status));

    // 进程级关闭信号与强制同步信号
    let shutdown = CancellationToken::new();
    let force_sync = Arc::new(Notify::new());

    let mut handles = Vec::new();
    handles.push(handshake.clone().spawn_poll_task(
        Duration::from_millis(config.plc.poll_interval_ms),
        shutdown.clone(),
    ));
    handles.push(heartbeat.spawn(shutdown.clone()));
    handles.push(
        cache
            .clone()
            .start_sync_task(sql.clone(), force_sync.clone(), shutdown.clone()),
    );
    handles.push(status_file.clone().spawn_publisher(
        handshake.clone(),
        cache.clone(),
        shutdown.clone(),
    ));

    log::info!("batchlog 已启动，等待PLC触发");

    // 阻塞等待停止信号
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("收到停止信号，开始关闭"),
        Err(e) => log::error!("监听停止信号失败: {}，开始关闭", e),
    }

    shutdown.cancel();
    for handle in handles {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
            log::warn!("任务未在期限内退出");
        }
    }

    log::info!("batchlog 已停止");
    Ok(())
}
