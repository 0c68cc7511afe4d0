/// SQL数据库写入服务
///
/// 持有唯一的远程数据库连接，带重试与指数退避的参数化INSERT。
/// 完整性错误（重复键/约束冲突）不重试，直接上报调用方

use async_trait::async_trait;
use chrono::Local;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, SqlErr,
    Statement,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::models::{ColumnMappings, RecipeRecord};
use crate::utils::config::SqlConfig;
use crate::utils::error::{AppError, AppResult};

/// 数据库连接超时（秒）
const CONNECT_TIMEOUT_S: u64 = 10;

/// 插入失败的分类
#[derive(Debug, Clone, PartialEq)]
pub enum InsertError {
    /// 完整性错误（重复键、约束冲突），该记录永远不会成功，不重试
    Integrity(String),
    /// 瞬时错误（网络、超时、死锁），重试用尽后上报
    Transient(String),
}

impl std::fmt::Display for InsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsertError::Integrity(m) => write!(f, "完整性错误: {}", m),
            InsertError::Transient(m) => write!(f, "瞬时错误: {}", m),
        }
    }
}

/// SQL写入服务接口
#[async_trait]
pub trait SqlWriterService: Send + Sync {
    /// 按映射表投影记录并插入目标表
    async fn insert_record(
        &self,
        record: &RecipeRecord,
        mappings: &ColumnMappings,
    ) -> Result<(), InsertError>;

    /// 快速存活检查，必须产生一次真实往返（SELECT 1）
    async fn healthy(&self) -> bool;

    fn is_connected(&self) -> bool;
}

/// 计算指数退避延迟：min(base * 2^attempt, max)，attempt从0开始
pub fn calculate_backoff(attempt: u32, base_delay_s: u64, max_delay_s: u64) -> Duration {
    let delay = base_delay_s.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_secs(delay.min(max_delay_s))
}

/// 构造参数化INSERT语句
///
/// 按映射顺序投影记录中存在的字段，列名文本替换、值一律参数绑定；
/// 时间戳列名非空时附加时间戳值；无可插入列时返回None
pub fn build_insert(
    table: &str,
    timestamp_column: &str,
    timestamp_value: &str,
    backend: DbBackend,
    record: &RecipeRecord,
    mappings: &ColumnMappings,
) -> Option<(String, Vec<sea_orm::Value>)> {
    let mut columns: Vec<String> = Vec::new();
    let mut values: Vec<sea_orm::Value> = Vec::new();

    for entry in mappings.iter() {
        if let Some(value) = record.get(&entry.tag) {
            columns.push(entry.column.clone());
            values.push(value.into());
        }
    }

    if !timestamp_column.is_empty() {
        columns.push(timestamp_column.to_string());
        values.push(sea_orm::Value::String(Some(Box::new(
            timestamp_value.to_string(),
        ))));
    }

    if columns.is_empty() {
        return None;
    }

    let placeholders: Vec<String> = (1..=values.len())
        .map(|i| match backend {
            DbBackend::Postgres => format!("${}", i),
            _ => "?".to_string(),
        })
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    Some((sql, values))
}

/// 记录经映射投影后是否没有任何可插入列
fn projection_is_empty(record: &RecipeRecord, mappings: &ColumnMappings, timestamp_column: &str) -> bool {
    timestamp_column.is_empty() && !mappings.iter().any(|entry| record.contains(&entry.tag))
}

/// 数据库错误分类：唯一约束/外键冲突为完整性错误，其余为瞬时错误
fn classify_db_error(err: DbErr) -> InsertError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(m)) => InsertError::Integrity(m),
        Some(SqlErr::ForeignKeyConstraintViolation(m)) => InsertError::Integrity(m),
        _ => InsertError::Transient(err.to_string()),
    }
}

/// 基于SeaORM的SQL写入服务实现
pub struct DatabaseSqlWriter {
    config: SqlConfig,
    connection: Mutex<Option<DatabaseConnection>>,
    connected: AtomicBool,
}

impl DatabaseSqlWriter {
    pub fn new(config: SqlConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// 显式建立连接（连接检查工具用），正常路径下连接按需惰性建立
    pub async fn connect(&self) -> AppResult<()> {
        self.ensure_connected().await
    }

    async fn check_alive(conn: &DatabaseConnection) -> bool {
        let stmt = Statement::from_string(conn.get_database_backend(), "SELECT 1");
        conn.query_one(stmt).await.is_ok()
    }

    /// 确保连接可用，必要时重连（每次插入尝试至多重连一次）
    async fn ensure_connected(&self) -> AppResult<()> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            if Self::check_alive(conn).await {
                return Ok(());
            }
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }

        let mut options = ConnectOptions::new(self.config.url.clone());
        options
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_S))
            .max_connections(1);

        match Database::connect(options).await {
            Ok(conn) => {
                *guard = Some(conn);
                self.connected.store(true, Ordering::SeqCst);
                log::info!("已连接到SQL数据库");
                Ok(())
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(AppError::sql_error(format!("连接SQL数据库失败: {}", e)))
            }
        }
    }

    /// 单次插入尝试
    async fn try_insert(
        &self,
        record: &RecipeRecord,
        mappings: &ColumnMappings,
    ) -> Result<(), InsertError> {
        let guard = self.connection.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| InsertError::Transient("未连接到SQL数据库".to_string()))?;
        let backend = conn.get_database_backend();

        let timestamp_value = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let Some((sql, values)) = build_insert(
            &self.config.table,
            &self.config.timestamp_column,
            &timestamp_value,
            backend,
            record,
            mappings,
        ) else {
            return Ok(());
        };
        let column_count = values.len();

        match conn
            .execute(Statement::from_sql_and_values(backend, sql, values))
            .await
        {
            Ok(_) => {
                log::info!(
                    "记录已插入 {} ({} 列)",
                    self.config.table,
                    column_count
                );
                Ok(())
            }
            Err(err) => Err(classify_db_error(err)),
        }
    }
}

#[async_trait]
impl SqlWriterService for DatabaseSqlWriter {
    async fn insert_record(
        &self,
        record: &RecipeRecord,
        mappings: &ColumnMappings,
    ) -> Result<(), InsertError> {
        // 空投影为平凡成功，无需建立连接
        if projection_is_empty(record, mappings, &self.config.timestamp_column) {
            log::warn!("无数据可插入 - 所有字段均未映射");
            return Ok(());
        }

        for attempt in 0..self.config.max_retries {
            let attempt_result = match self.ensure_connected().await {
                Ok(()) => self.try_insert(record, mappings).await,
                Err(e) => Err(InsertError::Transient(e.to_string())),
            };

            match attempt_result {
                Ok(()) => return Ok(()),
                Err(InsertError::Integrity(m)) => {
                    log::error!("SQL完整性错误 (不重试): {}", m);
                    return Err(InsertError::Integrity(m));
                }
                Err(InsertError::Transient(m)) => {
                    log::warn!("SQL插入第 {} 次尝试失败: {}", attempt + 1, m);
                    let mut guard = self.connection.lock().await;
                    *guard = None;
                    self.connected.store(false, Ordering::SeqCst);
                    drop(guard);

                    if attempt + 1 < self.config.max_retries {
                        let delay = calculate_backoff(
                            attempt,
                            self.config.retry_base_delay_s,
                            self.config.retry_max_delay_s,
                        );
                        log::info!("{} 秒后重试...", delay.as_secs());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        log::error!("所有SQL插入尝试均失败");
        Err(InsertError::Transient("重试次数已用尽".to_string()))
    }

    async fn healthy(&self) -> bool {
        let mut guard = self.connection.lock().await;
        match guard.as_ref() {
            Some(conn) => {
                let alive = Self::check_alive(conn).await;
                if !alive {
                    *guard = None;
                    self.connected.store(false, Ordering::SeqCst);
                }
                alive
            }
            None => false,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MappingEntry, TagValue};

    fn sample_mappings() -> ColumnMappings {
        ColumnMappings::new(vec![
            MappingEntry {
                tag: "RECIPE_NUMBER".to_string(),
                column: "Recipe_Number".to_string(),
            },
            MappingEntry {
                tag: "TOTAL_WT".to_string(),
                column: "Total_Weight".to_string(),
            },
        ])
    }

    /// 首次重试延迟等于基准值
    #[test]
    fn test_backoff_first_attempt_is_base() {
        assert_eq!(calculate_backoff(0, 1, 60), Duration::from_secs(1));
    }

    /// 延迟按2的幂增长
    #[test]
    fn test_backoff_grows_exponentially() {
        assert_eq!(calculate_backoff(1, 1, 60), Duration::from_secs(2));
        assert_eq!(calculate_backoff(2, 1, 60), Duration::from_secs(4));
        assert_eq!(calculate_backoff(5, 1, 60), Duration::from_secs(32));
    }

    /// 足够大的尝试序号延迟恰好等于上限
    #[test]
    fn test_backoff_caps_at_max() {
        assert_eq!(calculate_backoff(6, 1, 60), Duration::from_secs(60));
        assert_eq!(calculate_backoff(63, 1, 60), Duration::from_secs(60));
    }

    /// INSERT语句按映射顺序投影，未映射字段跳过
    #[test]
    fn test_build_insert_projects_in_mapping_order() {
        let mut record = RecipeRecord::new();
        record.insert("TOTAL_WT", TagValue::Float(1000.0));
        record.insert("RECIPE_NUMBER", TagValue::Int(7));
        record.insert("UNMAPPED", TagValue::Int(1));

        let (sql, values) = build_insert(
            "X_RecipeLog",
            "Manufacture_Date",
            "2026-08-01 12:00:00",
            DbBackend::MySql,
            &record,
            &sample_mappings(),
        )
        .unwrap();

        assert_eq!(
            sql,
            "INSERT INTO X_RecipeLog (Recipe_Number, Total_Weight, Manufacture_Date) VALUES (?, ?, ?)"
        );
        assert_eq!(values.len(), 3);
    }

    /// Postgres后端使用$n占位符
    #[test]
    fn test_build_insert_postgres_placeholders() {
        let mut record = RecipeRecord::new();
        record.insert("RECIPE_NUMBER", TagValue::Int(7));

        let (sql, _) = build_insert(
            "X_RecipeLog",
            "",
            "",
            DbBackend::Postgres,
            &record,
            &sample_mappings(),
        )
        .unwrap();

        assert_eq!(sql, "INSERT INTO X_RecipeLog (Recipe_Number) VALUES ($1)");
    }

    /// 无映射字段且未配置时间戳列时无语句可构造
    #[test]
    fn test_build_insert_empty_projection() {
        let record = RecipeRecord::new();
        assert!(build_insert(
            "X_RecipeLog",
            "",
            "",
            DbBackend::MySql,
            &record,
            &sample_mappings(),
        )
        .is_none());
    }

    /// 仅配置时间戳列时仍会产生一列插入
    #[test]
    fn test_build_insert_timestamp_only() {
        let record = RecipeRecord::new();
        let (sql, values) = build_insert(
            "X_RecipeLog",
            "Manufacture_Date",
            "2026-08-01 12:00:00",
            DbBackend::MySql,
            &record,
            &sample_mappings(),
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO X_RecipeLog (Manufacture_Date) VALUES (?)"
        );
        assert_eq!(values.len(), 1);
    }

    /// 空投影的插入是平凡成功，不触碰数据库连接
    #[tokio::test]
    async fn test_vacuous_insert_returns_ok() {
        let config = SqlConfig {
            url: "mysql://invalid-host/none".to_string(),
            table: "X_RecipeLog".to_string(),
            timestamp_column: String::new(),
            max_retries: 3,
            retry_base_delay_s: 1,
            retry_max_delay_s: 60,
        };
        let writer = DatabaseSqlWriter::new(config);

        let record = RecipeRecord::new();
        let result = writer.insert_record(&record, &sample_mappings()).await;
        assert_eq!(result, Ok(()));
        assert!(!writer.is_connected());
    }
}
