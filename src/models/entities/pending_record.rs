/// 待同步记录实体的SeaORM定义
/// 对应本地缓存数据库中的 pending_records 表

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 待同步记录实体
///
/// 记录体为规范化JSON文本，id单调递增且不复用，FIFO顺序即id顺序
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 配方记录的规范化JSON文本
    pub data: String,

    /// 入队时间（本地时间 ISO-8601）
    pub created_at: String,

    /// 失败的同步尝试次数
    pub attempts: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
