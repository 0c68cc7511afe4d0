/// 远程SQL数据库写入相关模块

/// SQL写入服务接口与实现
pub mod sql_writer_service;

/// Mock SQL写入服务（用于测试）
pub mod mock_sql_writer;

// 重新导出主要接口和类型
pub use mock_sql_writer::MockSqlWriter;
pub use sql_writer_service::{
    build_insert, calculate_backoff, DatabaseSqlWriter, InsertError, SqlWriterService,
};
