// 本地缓存服务的单元测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    use crate::models::{ColumnMappings, MappingEntry, RecipeRecord, TagValue};
    use crate::services::infrastructure::database::{InsertError, MockSqlWriter, SqlWriterService};
    use crate::services::infrastructure::persistence::local_cache_service::LocalCacheService;
    use crate::utils::config::LocalCacheConfig;

    fn memory_config() -> LocalCacheConfig {
        LocalCacheConfig {
            database: ":memory:".to_string(),
            sync_interval_s: 30,
        }
    }

    fn sample_mappings() -> ColumnMappings {
        ColumnMappings::new(vec![MappingEntry {
            tag: "RECIPE_NUMBER".to_string(),
            column: "Recipe_Number".to_string(),
        }])
    }

    fn sample_record(number: i64) -> RecipeRecord {
        let mut record = RecipeRecord::new();
        record.insert("RECIPE_NUMBER", TagValue::Int(number));
        record
    }

    /// 初始化应在磁盘上创建数据库文件
    #[tokio::test]
    async fn test_init_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_cache.db");
        let config = LocalCacheConfig {
            database: db_path.to_string_lossy().to_string(),
            sync_interval_s: 30,
        };
        let _cache = LocalCacheService::new(&config).await.unwrap();
        assert!(db_path.exists());
    }

    /// 入队后应能取回同一条记录
    #[tokio::test]
    async fn test_enqueue_and_peek() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        let record = sample_record(42);

        cache.enqueue(&record, &sample_mappings()).await.unwrap();

        let (entry_id, read) = cache.peek_oldest().await.unwrap().unwrap();
        assert_eq!(entry_id, 1);
        assert_eq!(read, record);
    }

    /// 待同步计数随入队递增
    #[tokio::test]
    async fn test_pending_count() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        assert_eq!(cache.pending_count().await.unwrap(), 0);

        cache
            .enqueue(&sample_record(1), &sample_mappings())
            .await
            .unwrap();
        assert_eq!(cache.pending_count().await.unwrap(), 1);

        cache
            .enqueue(&sample_record(2), &sample_mappings())
            .await
            .unwrap();
        assert_eq!(cache.pending_count().await.unwrap(), 2);
    }

    /// 删除后计数归零
    #[tokio::test]
    async fn test_remove() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        cache
            .enqueue(&sample_record(1), &sample_mappings())
            .await
            .unwrap();

        let (entry_id, _) = cache.peek_oldest().await.unwrap().unwrap();
        cache.remove(entry_id).await.unwrap();
        assert_eq!(cache.pending_count().await.unwrap(), 0);
    }

    /// 记录按FIFO顺序出队
    #[tokio::test]
    async fn test_fifo_order() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        for i in 1..=3 {
            cache
                .enqueue(&sample_record(i), &sample_mappings())
                .await
                .unwrap();
        }

        for expected in 1..=3 {
            let (entry_id, record) = cache.peek_oldest().await.unwrap().unwrap();
            assert_eq!(record.get("RECIPE_NUMBER"), Some(&TagValue::Int(expected)));
            cache.remove(entry_id).await.unwrap();
        }
        assert!(cache.peek_oldest().await.unwrap().is_none());
    }

    /// 映射快照随入队保存并可取回
    #[tokio::test]
    async fn test_mappings_snapshot() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        assert!(cache.snapshot_mappings().await.unwrap().is_none());

        let mappings = sample_mappings();
        cache.enqueue(&sample_record(1), &mappings).await.unwrap();

        let snapshot = cache.snapshot_mappings().await.unwrap().unwrap();
        assert_eq!(snapshot, mappings);
    }

    /// 空缓存取最旧记录返回None
    #[tokio::test]
    async fn test_empty_cache_returns_none() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        assert!(cache.peek_oldest().await.unwrap().is_none());
    }

    /// 尝试计数按次递增
    #[tokio::test]
    async fn test_increment_attempts() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        cache
            .enqueue(&sample_record(1), &sample_mappings())
            .await
            .unwrap();
        let (entry_id, _) = cache.peek_oldest().await.unwrap().unwrap();

        cache.increment_attempts(entry_id).await.unwrap();
        cache.increment_attempts(entry_id).await.unwrap();

        assert_eq!(cache.entry_attempts(entry_id).await.unwrap(), Some(2));
        assert_eq!(cache.pending_count().await.unwrap(), 1);
    }

    /// SQL恢复后一轮同步应清空队列（入队-补传往返）
    #[tokio::test]
    async fn test_drain_restores_pending_count() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        let before = cache.pending_count().await.unwrap();

        cache
            .enqueue(&sample_record(1), &sample_mappings())
            .await
            .unwrap();
        cache
            .enqueue(&sample_record(2), &sample_mappings())
            .await
            .unwrap();

        let sql = MockSqlWriter::new();
        let shutdown = CancellationToken::new();
        let synced = cache.drain_once(&sql, &shutdown).await.unwrap();

        assert_eq!(synced, 2);
        assert_eq!(cache.pending_count().await.unwrap(), before);
        assert_eq!(sql.attempt_count(), 2);
    }

    /// 混合结果的一轮同步：成功删除、完整性错误丢弃、瞬时错误停止
    #[tokio::test]
    async fn test_drain_mixed_outcomes() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        for i in 1..=3 {
            cache
                .enqueue(&sample_record(i), &sample_mappings())
                .await
                .unwrap();
        }

        let sql = MockSqlWriter::new();
        sql.push_outcome(Ok(()));
        sql.push_outcome(Err(InsertError::Integrity("duplicate key".to_string())));
        sql.push_outcome(Err(InsertError::Transient("connection lost".to_string())));

        let shutdown = CancellationToken::new();
        let synced = cache.drain_once(&sql, &shutdown).await.unwrap();

        // E1补传成功，E2被丢弃，E3留队且尝试计数为1
        assert_eq!(synced, 1);
        assert_eq!(cache.pending_count().await.unwrap(), 1);
        let (entry_id, record) = cache.peek_oldest().await.unwrap().unwrap();
        assert_eq!(record.get("RECIPE_NUMBER"), Some(&TagValue::Int(3)));
        assert_eq!(cache.entry_attempts(entry_id).await.unwrap(), Some(1));

        // 下一轮从E3重试
        sql.push_outcome(Ok(()));
        let synced = cache.drain_once(&sql, &shutdown).await.unwrap();
        assert_eq!(synced, 1);
        assert_eq!(cache.pending_count().await.unwrap(), 0);
    }

    /// 空队列的一轮同步不触碰SQL服务
    #[tokio::test]
    async fn test_drain_empty_queue_skips_sql() {
        let cache = LocalCacheService::new(&memory_config()).await.unwrap();
        let sql = MockSqlWriter::new();
        let shutdown = CancellationToken::new();

        let synced = cache.drain_once(&sql, &shutdown).await.unwrap();
        assert_eq!(synced, 0);
        assert_eq!(sql.attempt_count(), 0);
    }

    /// 映射快照缺失（孤儿队列）时跳过同步，等待人工介入
    #[tokio::test]
    async fn test_drain_without_snapshot_skips() {
        use sea_orm::EntityTrait;

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("orphan_cache.db");
        let config = LocalCacheConfig {
            database: db_path.to_string_lossy().to_string(),
            sync_interval_s: 30,
        };
        let cache = LocalCacheService::new(&config).await.unwrap();
        cache
            .enqueue(&sample_record(1), &sample_mappings())
            .await
            .unwrap();

        // 外部破坏：直接删除映射快照
        let url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        let conn = sea_orm::Database::connect(&url).await.unwrap();
        crate::models::entities::cache_config::Entity::delete_by_id("mappings".to_string())
            .exec(&conn)
            .await
            .unwrap();

        let sql = MockSqlWriter::new();
        let shutdown = CancellationToken::new();
        let synced = cache.drain_once(&sql, &shutdown).await.unwrap();

        assert_eq!(synced, 0);
        assert_eq!(sql.attempt_count(), 0);
        assert_eq!(cache.pending_count().await.unwrap(), 1);
    }

    /// 后台同步任务可被强制同步信号唤醒，并在关闭信号后退出
    #[tokio::test]
    async fn test_sync_task_poke_and_shutdown() {
        let cache = Arc::new(LocalCacheService::new(&memory_config()).await.unwrap());
        cache
            .enqueue(&sample_record(1), &sample_mappings())
            .await
            .unwrap();

        let sql: Arc<dyn SqlWriterService> = Arc::new(MockSqlWriter::new());
        let force_sync = Arc::new(tokio::sync::Notify::new());
        let shutdown = CancellationToken::new();

        let handle = cache
            .clone()
            .start_sync_task(sql, force_sync.clone(), shutdown.clone());

        // 同步间隔为30秒，靠强制同步信号立即唤醒
        force_sync.notify_one();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if cache.pending_count().await.unwrap() == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("强制同步未在期限内清空队列");

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("同步任务未在期限内退出")
            .unwrap();
    }
}
