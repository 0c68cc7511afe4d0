/// 服务层模块

/// 基础设施层服务
pub mod infrastructure;

/// 领域层服务
pub mod domain;
