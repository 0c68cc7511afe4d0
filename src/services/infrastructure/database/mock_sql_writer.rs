/// Mock SQL写入服务
/// 用于单元测试中按脚本控制插入结果（成功/完整性错误/瞬时错误）

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::sql_writer_service::{InsertError, SqlWriterService};
use crate::models::{ColumnMappings, RecipeRecord};

pub struct MockSqlWriter {
    /// 预先编排的逐次插入结果，耗尽后使用默认结果
    scripted: Mutex<VecDeque<Result<(), InsertError>>>,
    default_outcome: Mutex<Result<(), InsertError>>,
    inserted: Mutex<Vec<(RecipeRecord, ColumnMappings)>>,
    healthy: AtomicBool,
}

impl MockSqlWriter {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(Ok(())),
            inserted: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
        }
    }

    /// 追加一次预定的插入结果
    pub fn push_outcome(&self, outcome: Result<(), InsertError>) {
        self.scripted.lock().unwrap().push_back(outcome);
    }

    /// 设置脚本耗尽后的默认插入结果
    pub fn set_default_outcome(&self, outcome: Result<(), InsertError>) {
        *self.default_outcome.lock().unwrap() = outcome;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// 实际尝试插入的记录（含失败的尝试）
    pub fn attempted(&self) -> Vec<(RecipeRecord, ColumnMappings)> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.inserted.lock().unwrap().len()
    }
}

impl Default for MockSqlWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlWriterService for MockSqlWriter {
    async fn insert_record(
        &self,
        record: &RecipeRecord,
        mappings: &ColumnMappings,
    ) -> Result<(), InsertError> {
        self.inserted
            .lock()
            .unwrap()
            .push((record.clone(), mappings.clone()));
        match self.scripted.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => self.default_outcome.lock().unwrap().clone(),
        }
    }

    async fn healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
