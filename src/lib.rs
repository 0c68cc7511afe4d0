/// batchlog - PLC配方数据到SQL数据库的桥接服务
///
/// 批次完成时PLC通过触发标签发布配方记录，
/// 本服务经四状态握手读取、校验并写入远程SQL表；
/// 数据库不可达时记录进入本地SQLite缓冲区，连通后按FIFO补传

pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{AppError, AppResult};
