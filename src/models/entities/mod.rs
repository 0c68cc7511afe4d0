/// 本地缓存数据库的SeaORM实体定义

pub mod cache_config;
pub mod pending_record;
