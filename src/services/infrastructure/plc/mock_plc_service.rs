/// Mock PLC标签服务实现
/// 用于开发和测试阶段，模拟真实的PLC标签读写行为

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::plc_tag_service::PlcTagService;
use crate::models::RecipeRecord;
use crate::utils::error::{AppError, AppResult};

/// 写入操作记录
/// 用于测试验证写入操作是否按预期执行
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation {
    /// 写入的标签（trigger / heartbeat / error_code）
    pub tag: &'static str,
    /// 写入的值
    pub value: u16,
}

/// Mock PLC标签服务
///
/// 内部保存各标签的当前值与预设的配方记录，
/// 支持按标签注入故障以模拟断线与写失败
pub struct MockPlcService {
    trigger: Mutex<u16>,
    heartbeat: Mutex<u16>,
    error_code: Mutex<u16>,
    recipe: Mutex<Option<RecipeRecord>>,
    write_log: Mutex<Vec<WriteOperation>>,
    connected: AtomicBool,
    fail_trigger_read: AtomicBool,
    fail_trigger_write: AtomicBool,
    /// 只让写入特定值的触发写失败（模拟复位阶段断线）
    fail_trigger_write_value: Mutex<Option<u16>>,
    fail_recipe_read: AtomicBool,
    fail_heartbeat: AtomicBool,
}

impl MockPlcService {
    pub fn new() -> Self {
        Self {
            trigger: Mutex::new(0),
            heartbeat: Mutex::new(0),
            error_code: Mutex::new(0),
            recipe: Mutex::new(None),
            write_log: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            fail_trigger_read: AtomicBool::new(false),
            fail_trigger_write: AtomicBool::new(false),
            fail_trigger_write_value: Mutex::new(None),
            fail_recipe_read: AtomicBool::new(false),
            fail_heartbeat: AtomicBool::new(false),
        }
    }

    /// 预设PLC侧的触发标签值
    pub fn set_trigger(&self, value: u16) {
        *self.trigger.lock().unwrap() = value;
    }

    pub fn trigger_value(&self) -> u16 {
        *self.trigger.lock().unwrap()
    }

    pub fn error_code_value(&self) -> u16 {
        *self.error_code.lock().unwrap()
    }

    pub fn heartbeat_value(&self) -> u16 {
        *self.heartbeat.lock().unwrap()
    }

    pub fn set_heartbeat(&self, value: u16) {
        *self.heartbeat.lock().unwrap() = value;
    }

    /// 预设下一次配方读取返回的记录
    pub fn preset_recipe(&self, record: RecipeRecord) {
        *self.recipe.lock().unwrap() = Some(record);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_trigger_read(&self, fail: bool) {
        self.fail_trigger_read.store(fail, Ordering::SeqCst);
    }

    pub fn fail_trigger_write(&self, fail: bool) {
        self.fail_trigger_write.store(fail, Ordering::SeqCst);
    }

    /// 仅写入指定值时失败，其余写入正常
    pub fn fail_trigger_write_value(&self, value: Option<u16>) {
        *self.fail_trigger_write_value.lock().unwrap() = value;
    }

    pub fn fail_recipe_read(&self, fail: bool) {
        self.fail_recipe_read.store(fail, Ordering::SeqCst);
    }

    pub fn fail_heartbeat(&self, fail: bool) {
        self.fail_heartbeat.store(fail, Ordering::SeqCst);
    }

    /// 全部写入操作记录
    pub fn writes(&self) -> Vec<WriteOperation> {
        self.write_log.lock().unwrap().clone()
    }

    /// 针对触发标签的写入序列
    pub fn trigger_writes(&self) -> Vec<u16> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.tag == "trigger")
            .map(|op| op.value)
            .collect()
    }

    fn record_write(&self, tag: &'static str, value: u16) {
        self.write_log
            .lock()
            .unwrap()
            .push(WriteOperation { tag, value });
    }
}

impl Default for MockPlcService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlcTagService for MockPlcService {
    async fn read_trigger(&self) -> AppResult<u16> {
        if self.fail_trigger_read.load(Ordering::SeqCst) {
            return Err(AppError::plc_communication_error("模拟触发标签读取失败"));
        }
        Ok(*self.trigger.lock().unwrap())
    }

    async fn write_trigger(&self, value: u16) -> AppResult<()> {
        if self.fail_trigger_write.load(Ordering::SeqCst) {
            return Err(AppError::plc_communication_error("模拟触发标签写入失败"));
        }
        if *self.fail_trigger_write_value.lock().unwrap() == Some(value) {
            return Err(AppError::plc_communication_error("模拟触发标签写入失败"));
        }
        self.record_write("trigger", value);
        *self.trigger.lock().unwrap() = value;
        Ok(())
    }

    async fn read_recipe_and_extras(&self) -> AppResult<RecipeRecord> {
        if self.fail_recipe_read.load(Ordering::SeqCst) {
            return Err(AppError::plc_communication_error("模拟配方读取失败"));
        }
        self.recipe
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AppError::plc_communication_error("未预设配方数据"))
    }

    async fn read_heartbeat(&self) -> AppResult<u16> {
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(AppError::plc_communication_error("模拟心跳读取失败"));
        }
        Ok(*self.heartbeat.lock().unwrap())
    }

    async fn write_heartbeat(&self, value: u16) -> AppResult<()> {
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(AppError::plc_communication_error("模拟心跳写入失败"));
        }
        self.record_write("heartbeat", value);
        *self.heartbeat.lock().unwrap() = value;
        Ok(())
    }

    async fn write_error_code(&self, code: u16) -> AppResult<()> {
        self.record_write("error_code", code);
        *self.error_code.lock().unwrap() = code;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
