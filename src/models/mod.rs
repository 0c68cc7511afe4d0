/// 数据模型模块
///
/// 共享的值类型（标签值、配方记录、列映射）以及本地缓存的数据库实体

pub mod entities;
pub mod tag_value;

pub use tag_value::{ColumnMappings, MappingEntry, RecipeRecord, TagValue};
