/// 本地缓存服务
///
/// 基于SeaORM和SQLite的存储转发缓冲区：SQL数据库不可达时记录在此排队，
/// 后台同步任务按FIFO顺序补传。跨重启保持FIFO顺序（id最小者先出队）

use chrono::Local;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryOrder, Schema, Set, TransactionTrait,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::entities::{cache_config, pending_record};
use crate::models::{ColumnMappings, RecipeRecord};
use crate::services::infrastructure::database::{InsertError, SqlWriterService};
use crate::utils::config::LocalCacheConfig;
use crate::utils::error::{AppError, AppResult};

// 数据库URL前缀
const SQLITE_URL_PREFIX: &str = "sqlite://";
/// 映射快照在config表中的键
const MAPPINGS_KEY: &str = "mappings";

/// 本地缓存服务实现
///
/// 所有操作经单一互斥锁串行化；锁只在单个操作期间持有，
/// 从不跨越到SQL数据库的网络往返
pub struct LocalCacheService {
    db_conn: Mutex<DatabaseConnection>,
    sync_interval: Duration,
}

impl LocalCacheService {
    /// 打开（或创建）本地缓存数据库并初始化表结构
    pub async fn new(config: &LocalCacheConfig) -> AppResult<Self> {
        let db_url = if config.database == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            // 确保数据库文件的父目录存在
            let db_path = Path::new(&config.database);
            if let Some(parent_dir) = db_path.parent() {
                if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                    tokio::fs::create_dir_all(parent_dir).await.map_err(|e| {
                        AppError::io_error(
                            format!("创建缓存目录失败: {:?}", parent_dir),
                            e.kind().to_string(),
                        )
                    })?;
                }
            }
            format!("{}{}?mode=rwc", SQLITE_URL_PREFIX, config.database)
        };

        let conn = Database::connect(&db_url)
            .await
            .map_err(|db_err| AppError::persistence_error(db_err.to_string()))?;

        Self::setup_schema(&conn).await?;
        log::debug!("本地缓存数据库已初始化: {}", config.database);

        Ok(Self {
            db_conn: Mutex::new(conn),
            sync_interval: Duration::from_secs(config.sync_interval_s),
        })
    }

    /// 初始化数据库表结构（如果不存在）
    async fn setup_schema(db: &DatabaseConnection) -> AppResult<()> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        let stmt_pending = schema
            .create_table_from_entity(pending_record::Entity)
            .if_not_exists()
            .to_owned();
        db.execute(backend.build(&stmt_pending))
            .await
            .map_err(|e| AppError::persistence_error(format!("创建 pending_records 表失败: {}", e)))?;

        let stmt_config = schema
            .create_table_from_entity(cache_config::Entity)
            .if_not_exists()
            .to_owned();
        db.execute(backend.build(&stmt_config))
            .await
            .map_err(|e| AppError::persistence_error(format!("创建 config 表失败: {}", e)))?;

        Ok(())
    }

    /// 入队一条记录并更新映射快照
    ///
    /// 两个变更在同一事务中提交：要么都生效要么都不生效，
    /// 保证 pending 非空时映射快照一定存在
    pub async fn enqueue(
        &self,
        record: &RecipeRecord,
        mappings: &ColumnMappings,
    ) -> AppResult<()> {
        let body = record.to_canonical_json()?;
        let mappings_json = mappings.to_json()?;
        let created_at = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();

        let conn = self.db_conn.lock().await;
        let txn = conn
            .begin()
            .await
            .map_err(|e| AppError::persistence_error(format!("开启缓存事务失败: {}", e)))?;

        pending_record::ActiveModel {
            data: Set(body),
            created_at: Set(created_at),
            attempts: Set(0),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::persistence_error(format!("缓存记录插入失败: {}", e)))?;

        // 映射进程生命周期内不变，对所有记录只保存一份快照
        cache_config::Entity::insert(cache_config::ActiveModel {
            key: Set(MAPPINGS_KEY.to_string()),
            value: Set(mappings_json),
        })
        .on_conflict(
            OnConflict::column(cache_config::Column::Key)
                .update_column(cache_config::Column::Value)
                .to_owned(),
        )
        .exec(&txn)
        .await
        .map_err(|e| AppError::persistence_error(format!("映射快照保存失败: {}", e)))?;

        txn.commit()
            .await
            .map_err(|e| AppError::persistence_error(format!("提交缓存事务失败: {}", e)))?;

        log::info!("记录已加入本地缓存");
        Ok(())
    }

    /// 待同步记录数
    pub async fn pending_count(&self) -> AppResult<u64> {
        let conn = self.db_conn.lock().await;
        pending_record::Entity::find()
            .count(&*conn)
            .await
            .map_err(|e| AppError::persistence_error(format!("查询待同步记录数失败: {}", e)))
    }

    /// 取最旧的待同步记录（id最小，FIFO）
    pub async fn peek_oldest(&self) -> AppResult<Option<(i64, RecipeRecord)>> {
        let conn = self.db_conn.lock().await;
        let model = pending_record::Entity::find()
            .order_by_asc(pending_record::Column::Id)
            .one(&*conn)
            .await
            .map_err(|e| AppError::persistence_error(format!("读取最旧缓存记录失败: {}", e)))?;

        match model {
            Some(m) => {
                let record = RecipeRecord::from_canonical_json(&m.data)?;
                Ok(Some((m.id, record)))
            }
            None => Ok(None),
        }
    }

    /// 同步成功后删除记录
    pub async fn remove(&self, entry_id: i64) -> AppResult<()> {
        let conn = self.db_conn.lock().await;
        pending_record::Entity::delete_by_id(entry_id)
            .exec(&*conn)
            .await
            .map_err(|e| {
                AppError::persistence_error(format!("删除缓存记录 {} 失败: {}", entry_id, e))
            })?;
        Ok(())
    }

    /// 同步失败后递增尝试计数
    pub async fn increment_attempts(&self, entry_id: i64) -> AppResult<()> {
        let conn = self.db_conn.lock().await;
        let model = pending_record::Entity::find_by_id(entry_id)
            .one(&*conn)
            .await
            .map_err(|e| {
                AppError::persistence_error(format!("读取缓存记录 {} 失败: {}", entry_id, e))
            })?;

        if let Some(model) = model {
            let attempts = model.attempts + 1;
            let mut active: pending_record::ActiveModel = model.into();
            active.attempts = Set(attempts);
            active.update(&*conn).await.map_err(|e| {
                AppError::persistence_error(format!("更新缓存记录 {} 尝试次数失败: {}", entry_id, e))
            })?;
        }
        Ok(())
    }

    /// 读取指定记录的尝试计数
    pub async fn entry_attempts(&self, entry_id: i64) -> AppResult<Option<i32>> {
        let conn = self.db_conn.lock().await;
        let model = pending_record::Entity::find_by_id(entry_id)
            .one(&*conn)
            .await
            .map_err(|e| {
                AppError::persistence_error(format!("读取缓存记录 {} 失败: {}", entry_id, e))
            })?;
        Ok(model.map(|m| m.attempts))
    }

    /// 读取映射快照
    pub async fn snapshot_mappings(&self) -> AppResult<Option<ColumnMappings>> {
        let conn = self.db_conn.lock().await;
        let model = cache_config::Entity::find_by_id(MAPPINGS_KEY.to_string())
            .one(&*conn)
            .await
            .map_err(|e| AppError::persistence_error(format!("读取映射快照失败: {}", e)))?;

        match model {
            Some(m) => Ok(Some(ColumnMappings::from_json(&m.value)?)),
            None => Ok(None),
        }
    }

    /// 执行一轮同步：按FIFO顺序尽量补传，瞬时错误时停止本轮
    ///
    /// 完整性错误意味着该记录永远不会成功，丢弃并继续；
    /// 返回本轮成功补传的记录数
    pub async fn drain_once(
        &self,
        sql: &dyn SqlWriterService,
        shutdown: &CancellationToken,
    ) -> AppResult<usize> {
        let pending = self.pending_count().await?;
        if pending == 0 {
            return Ok(0);
        }

        let Some(mappings) = self.snapshot_mappings().await? else {
            // 队列成了孤儿：磁盘损坏或外部截断，需要人工介入
            log::warn!("缓存中没有映射快照，无法同步");
            return Ok(0);
        };

        log::info!("尝试同步 {} 条缓存记录", pending);

        let mut synced = 0usize;
        while !shutdown.is_cancelled() {
            let Some((entry_id, record)) = self.peek_oldest().await? else {
                break;
            };

            match sql.insert_record(&record, &mappings).await {
                Ok(()) => {
                    self.remove(entry_id).await?;
                    synced += 1;
                    log::info!("缓存记录 {} 已补传", entry_id);
                }
                Err(InsertError::Integrity(e)) => {
                    // 该记录永远无法入库，丢弃以免阻塞队列
                    log::error!("缓存记录 {} 完整性错误，丢弃: {}", entry_id, e);
                    self.remove(entry_id).await?;
                }
                Err(InsertError::Transient(e)) => {
                    log::warn!("SQL仍不可用，停止本轮同步: {}", e);
                    self.increment_attempts(entry_id).await?;
                    break;
                }
            }
        }

        if synced > 0 {
            log::info!("同步完成: 补传 {} 条记录", synced);
        }
        Ok(synced)
    }

    /// 启动后台同步任务
    ///
    /// 在同步间隔到期或收到强制同步信号时唤醒，关闭信号可即时取消等待
    pub fn start_sync_task(
        self: Arc<Self>,
        sql: Arc<dyn SqlWriterService>,
        force_sync: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let sync_interval = self.sync_interval;
        tokio::spawn(async move {
            log::info!("缓存同步任务已启动 (间隔: {}s)", sync_interval.as_secs());
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(sync_interval) => {},
                    _ = force_sync.notified() => {
                        log::info!("强制同步被触发");
                    }
                }
                if let Err(e) = self.drain_once(sql.as_ref(), &shutdown).await {
                    log::error!("同步循环错误: {}", e);
                }
            }
            log::info!("缓存同步任务已停止");
        })
    }
}
