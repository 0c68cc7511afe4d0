/// 握手状态机
///
/// 与PLC触发标签之间的四状态握手协议：
///
/// 状态 0 (Idle): 等待 Recipe_Trigger == 1
/// 状态 1 (Triggered): PLC请求记录
/// 状态 2 (Acknowledge): 桥接器读取配方后向PLC写入2
/// 状态 0 (Complete): 持久化成功，复位为0
/// 状态 99 (Fault): 发生错误，错误码已写入PLC
///
/// 故障恢复：处于Fault状态时监视PLC将触发标签复位为0，
/// PLC确认故障后清除错误码并回到Idle

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::ColumnMappings;
use crate::services::infrastructure::database::{InsertError, SqlWriterService};
use crate::services::infrastructure::persistence::LocalCacheService;
use crate::services::infrastructure::plc::PlcTagService;
use crate::utils::config::ValidationConfig;
use crate::utils::validators::validate_recipe_data;

/// 触发标签的线上值约定：PLC只写 {0, 1}，桥接器只写 {0, 2, 99}
pub const TRIGGER_IDLE: u16 = 0;
pub const TRIGGER_LOGGING_REQUESTED: u16 = 1;
pub const TRIGGER_ACKNOWLEDGE: u16 = 2;
pub const TRIGGER_FAULT: u16 = 99;

/// 握手状态（镜像而不等同于PLC触发标签的值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    Idle,
    /// 瞬态，只存在于单个轮询周期内
    Acknowledge,
    Fault,
}

/// 故障时写入PLC的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    None = 0,
    PlcReadFailed = 1,
    ValidationFailed = 2,
    SqlAndCacheFailed = 3,
    PlcWriteFailed = 4,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// 故障描述：错误码与进入故障的时刻，仅在Fault状态存在
#[derive(Debug, Clone)]
pub struct FaultDescriptor {
    pub code: ErrorCode,
    pub entered_at: DateTime<Local>,
}

/// 对外公布的连接状态摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// PLC与SQL均正常
    Connected,
    /// PLC正常，SQL不可用（正在缓存）
    SqlOffline,
    /// PLC不可达
    PlcOffline,
    /// 处于故障状态
    Fault,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::SqlOffline => "sql_offline",
            ConnectionStatus::PlcOffline => "plc_offline",
            ConnectionStatus::Fault => "fault",
        }
    }
}

/// 状态变化回调：一个窄函数值，而不是对象引用
pub type StatusCallback = Box<dyn Fn(ConnectionStatus) + Send + Sync>;

/// 握手状态机实现
///
/// 引用A、B、C三个组件，但它们都不反向引用状态机；
/// 状态经内部互斥锁保护，poll只由单一轮询任务调用，轮询全序
pub struct HandshakeStateMachine {
    plc: Arc<dyn PlcTagService>,
    sql: Arc<dyn SqlWriterService>,
    cache: Arc<LocalCacheService>,
    /// 主映射与辅助映射合并后的完整映射表
    mappings: ColumnMappings,
    validation: ValidationConfig,
    state: Mutex<HandshakeState>,
    fault: Mutex<Option<FaultDescriptor>>,
    sql_was_down: AtomicBool,
    status_callback: Option<StatusCallback>,
}

impl HandshakeStateMachine {
    pub fn new(
        plc: Arc<dyn PlcTagService>,
        sql: Arc<dyn SqlWriterService>,
        cache: Arc<LocalCacheService>,
        mappings: ColumnMappings,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            plc,
            sql,
            cache,
            mappings,
            validation,
            state: Mutex::new(HandshakeState::Idle),
            fault: Mutex::new(None),
            sql_was_down: AtomicBool::new(false),
            status_callback: None,
        }
    }

    /// 设置状态变化回调（状态文件/托盘侧使用）
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.status_callback = Some(callback);
        self
    }

    pub fn current_state(&self) -> HandshakeState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: HandshakeState) {
        *self.state.lock().unwrap() = state;
    }

    /// 最近一次故障的错误码，无故障时为None码
    pub fn last_error(&self) -> ErrorCode {
        self.fault
            .lock()
            .unwrap()
            .as_ref()
            .map(|f| f.code)
            .unwrap_or(ErrorCode::None)
    }

    /// 当前故障描述
    pub fn fault_descriptor(&self) -> Option<FaultDescriptor> {
        self.fault.lock().unwrap().clone()
    }

    /// 当前连接状态摘要
    pub fn get_status(&self) -> ConnectionStatus {
        if self.current_state() == HandshakeState::Fault {
            return ConnectionStatus::Fault;
        }
        if !self.plc.is_connected() {
            return ConnectionStatus::PlcOffline;
        }
        if self.sql_was_down.load(Ordering::SeqCst) {
            return ConnectionStatus::SqlOffline;
        }
        ConnectionStatus::Connected
    }

    fn update_status(&self) {
        if let Some(callback) = &self.status_callback {
            callback(self.get_status());
        }
    }

    /// 轮询PLC并推进状态机，每个轮询周期调用一次
    pub async fn poll(&self) {
        let trigger = match self.plc.read_trigger().await {
            Ok(value) => value,
            Err(e) => {
                // PLC通信错误，本周期跳过
                log::debug!("读取触发标签失败: {}", e);
                self.update_status();
                return;
            }
        };

        match self.current_state() {
            HandshakeState::Idle => {
                if trigger == TRIGGER_LOGGING_REQUESTED {
                    self.handle_trigger().await;
                }
            }
            HandshakeState::Fault => {
                self.handle_fault_recovery(trigger).await;
            }
            HandshakeState::Acknowledge => {
                // 瞬态，不应跨周期存在
            }
        }

        self.update_status();
    }

    /// 处理一次新的触发：读取、应答、校验、持久化、完成
    async fn handle_trigger(&self) {
        log::info!("检测到触发信号，读取配方数据");
        self.sql_was_down.store(false, Ordering::SeqCst);

        // 第1步：读取配方数据（含辅助标签）
        let record = match self.plc.read_recipe_and_extras().await {
            Ok(record) => record,
            Err(e) => {
                log::error!("读取配方数据失败: {}", e);
                self.set_fault(ErrorCode::PlcReadFailed).await;
                return;
            }
        };

        // 第2步：写入2作为应答
        if let Err(e) = self.plc.write_trigger(TRIGGER_ACKNOWLEDGE).await {
            log::error!("写入应答失败: {}", e);
            self.set_fault(ErrorCode::PlcWriteFailed).await;
            return;
        }

        self.set_state(HandshakeState::Acknowledge);
        log::info!("已应答触发，开始校验数据");

        // 第3步：按配置的上下限校验
        let errors = validate_recipe_data(&record, &self.validation);
        if !errors.is_empty() {
            log::error!("数据校验失败: {:?}", errors);
            self.set_fault(ErrorCode::ValidationFailed).await;
            return;
        }

        // 第4步：尝试写入SQL，瞬时失败时退回本地缓存
        match self.sql.insert_record(&record, &self.mappings).await {
            Ok(()) => {
                log::info!("记录已写入SQL数据库");
            }
            Err(InsertError::Integrity(e)) => {
                // 记录永远无法入库，不能无声吞掉
                log::error!("SQL完整性错误: {}", e);
                self.set_fault(ErrorCode::SqlAndCacheFailed).await;
                return;
            }
            Err(InsertError::Transient(e)) => {
                log::warn!("SQL写入失败，转入本地缓存: {}", e);
                self.sql_was_down.store(true, Ordering::SeqCst);
                if let Err(cache_err) = self.cache.enqueue(&record, &self.mappings).await {
                    log::error!("本地缓存写入也失败: {}", cache_err);
                    self.set_fault(ErrorCode::SqlAndCacheFailed).await;
                    return;
                }
            }
        }

        // 第5步：完成握手，复位触发标签
        if let Err(e) = self.plc.write_trigger(TRIGGER_IDLE).await {
            // 数据已持久化，此处故障会造成重复上报，只记录日志
            log::error!("复位触发标签失败: {}", e);
        }

        self.set_state(HandshakeState::Idle);
        log::info!("握手完成");
    }

    /// 故障恢复：等待PLC把触发标签复位为0
    ///
    /// 保证PLC侧操作员确认过故障之后才继续
    async fn handle_fault_recovery(&self, trigger: u16) {
        if trigger == TRIGGER_IDLE {
            let last = self.last_error();
            log::info!("PLC已确认故障，从 {:?} 恢复", last);

            // 尽力清除PLC上的错误码
            if let Err(e) = self.plc.write_error_code(ErrorCode::None.as_u16()).await {
                log::warn!("清除PLC错误码失败: {}", e);
            }

            self.set_state(HandshakeState::Idle);
            *self.fault.lock().unwrap() = None;

            log::info!("故障恢复完成，回到Idle");
        }
    }

    /// 进入故障状态并把错误码写到PLC
    ///
    /// 即使PLC侧写入失败，内存中的故障也必须保留
    async fn set_fault(&self, error_code: ErrorCode) {
        log::error!("故障: {:?} ({})", error_code, error_code.as_u16());

        *self.fault.lock().unwrap() = Some(FaultDescriptor {
            code: error_code,
            entered_at: Local::now(),
        });

        if let Err(e) = self.plc.write_error_code(error_code.as_u16()).await {
            log::warn!("写入PLC错误码失败: {}", e);
        }
        if let Err(e) = self.plc.write_trigger(TRIGGER_FAULT).await {
            log::warn!("写入PLC故障信号失败: {}", e);
        }

        self.set_state(HandshakeState::Fault);
        self.update_status();
    }

    /// 手动强制清除故障（人工介入用）
    ///
    /// 绕过PLC的故障确认握手，谨慎使用
    pub async fn force_clear_fault(&self) {
        if self.current_state() == HandshakeState::Fault {
            log::warn!("强制清除故障状态");
            if let Err(e) = self.plc.write_error_code(ErrorCode::None.as_u16()).await {
                log::warn!("清除PLC错误码失败: {}", e);
            }
            if let Err(e) = self.plc.write_trigger(TRIGGER_IDLE).await {
                log::warn!("复位触发标签失败: {}", e);
            }
            self.set_state(HandshakeState::Idle);
            *self.fault.lock().unwrap() = None;
            self.update_status();
        }
    }

    /// 启动轮询任务
    ///
    /// 轮询相对自身单线程：上一周期返回之前下一周期不会开始
    pub fn spawn_poll_task(
        self: Arc<Self>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!("握手轮询任务已启动 (间隔: {}ms)", poll_interval.as_millis());
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                self.poll().await;
            }
            log::info!("握手轮询任务已停止");
        })
    }
}
