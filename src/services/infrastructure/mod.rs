/// 基础设施层服务模块
/// 负责与外部系统的交互：PLC通信、远程SQL写入、本地缓存持久化

/// PLC通信相关模块
pub mod plc;

/// 远程SQL数据库写入模块
pub mod database;

/// 数据持久化相关模块
pub mod persistence;

// 重新导出常用接口和实现
pub use database::*;
pub use persistence::*;
pub use plc::*;
