/// 数据持久化相关模块（本地存储转发缓冲区）

/// 本地缓存服务实现
pub mod local_cache_service;

/// 单元测试模块
#[cfg(test)]
mod tests;

// 重新导出主要接口
pub use local_cache_service::LocalCacheService;
