/// 心跳服务
///
/// 周期性递增PLC上的看门狗计数器（32768回绕），
/// 先读后写以便PLC复位计数器时不产生永久偏差。
/// 心跳失败只记录日志，从不触发握手故障——
/// 心跳丢失由PLC自身的看门狗定时器报警

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::infrastructure::plc::PlcTagService;

pub struct HeartbeatService {
    plc: Arc<dyn PlcTagService>,
    interval: Duration,
    current_value: AtomicU16,
}

impl HeartbeatService {
    pub fn new(plc: Arc<dyn PlcTagService>, interval: Duration) -> Self {
        Self {
            plc,
            interval,
            current_value: AtomicU16::new(0),
        }
    }

    /// 执行一次心跳：读当前值（PLC可能已复位），递增后写回
    pub async fn step(&self) {
        match self.plc.read_heartbeat().await {
            Ok(current) => {
                self.current_value.store(current, Ordering::SeqCst);
            }
            Err(e) => {
                log::warn!("读取心跳失败: {}", e);
            }
        }

        let current = self.current_value.load(Ordering::SeqCst);
        match self.plc.increment_heartbeat(current).await {
            Ok(next) => {
                self.current_value.store(next, Ordering::SeqCst);
                log::debug!("心跳: {}", next);
            }
            Err(e) => {
                log::warn!("更新心跳失败: {}", e);
            }
        }
    }

    pub fn current_value(&self) -> u16 {
        self.current_value.load(Ordering::SeqCst)
    }

    /// 启动心跳任务，独立于握手轮询
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = self.interval;
        tokio::spawn(async move {
            log::info!("心跳服务已启动 (间隔: {}s)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                self.step().await;
            }
            log::info!("心跳服务已停止");
        })
    }
}
