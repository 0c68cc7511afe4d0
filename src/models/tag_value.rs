/// 配方数据值类型
///
/// PLC读取到的配方记录是异构的（整数、浮点、布尔、字符串），
/// 用带标签的枚举统一承载，并提供本地缓存所需的规范化序列化形式

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::error::{AppError, AppResult};

/// PLC标签值，覆盖支持的四种标量类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// 布尔量
    Bool(bool),
    /// 64位有符号整数
    Int(i64),
    /// 64位浮点数
    Float(f64),
    /// UTF-8字符串
    Text(String),
}

impl TagValue {
    /// 数值型标签转为f64用于上下限校验，非数值返回None
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Int(v) => Some(*v as f64),
            TagValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// TagValue 到 SeaORM 参数值的转换，用于参数化INSERT绑定
impl From<&TagValue> for sea_orm::Value {
    fn from(value: &TagValue) -> Self {
        match value {
            TagValue::Bool(v) => sea_orm::Value::Bool(Some(*v)),
            TagValue::Int(v) => sea_orm::Value::BigInt(Some(*v)),
            TagValue::Float(v) => sea_orm::Value::Double(Some(*v)),
            TagValue::Text(v) => sea_orm::Value::String(Some(Box::new(v.clone()))),
        }
    }
}

/// 一条完成批次的配方记录：标签名到标量值的映射
///
/// 内部使用BTreeMap，序列化输出天然按键排序，
/// 保证本地缓存中的记录体是规范化（键有序）的文本形式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipeRecord {
    values: BTreeMap<String, TagValue>,
}

impl RecipeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, value: TagValue) {
        self.values.insert(tag.into(), value);
    }

    pub fn get(&self, tag: &str) -> Option<&TagValue> {
        self.values.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValue)> {
        self.values.iter()
    }

    /// 叠加另一组值，同名键以overlay为准（辅助标签覆盖配方体）
    pub fn merge(&mut self, overlay: RecipeRecord) {
        for (tag, value) in overlay.values {
            self.values.insert(tag, value);
        }
    }

    /// 序列化为规范化JSON文本（键有序），作为缓存记录体
    pub fn to_canonical_json(&self) -> AppResult<String> {
        serde_json::to_string(self).map_err(AppError::from)
    }

    /// 从缓存记录体反序列化
    pub fn from_canonical_json(body: &str) -> AppResult<Self> {
        serde_json::from_str(body).map_err(AppError::from)
    }
}

/// 映射表中的一项：PLC标签名到SQL列名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub tag: String,
    pub column: String,
}

/// 有序的标签名到列名映射表
///
/// 顺序即INSERT语句的列顺序，进程生命周期内不可变
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMappings {
    entries: Vec<MappingEntry>,
}

impl ColumnMappings {
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        Self { entries }
    }

    /// 主映射与辅助映射合并为一张表，重复标签名在配置加载阶段即拒绝
    pub fn compose(primary: &ColumnMappings, extras: &ColumnMappings) -> AppResult<ColumnMappings> {
        let mut seen = std::collections::HashSet::new();
        let mut entries = Vec::with_capacity(primary.entries.len() + extras.entries.len());
        for entry in primary.entries.iter().chain(extras.entries.iter()) {
            if !seen.insert(entry.tag.clone()) {
                return Err(AppError::configuration_error(format!(
                    "映射表中存在重复的标签名: {}",
                    entry.tag
                )));
            }
            entries.push(entry.clone());
        }
        Ok(ColumnMappings { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 序列化为JSON保存到缓存的映射快照
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string(self).map_err(AppError::from)
    }

    pub fn from_json(value: &str) -> AppResult<Self> {
        serde_json::from_str(value).map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 规范化序列化往返应保持四种标量类型不变
    #[test]
    fn test_canonical_round_trip_preserves_values() {
        let mut record = RecipeRecord::new();
        record.insert("RECIPE_NUMBER", TagValue::Int(7));
        record.insert("TOTAL_WT", TagValue::Float(1000.5));
        record.insert("APPROVED", TagValue::Bool(true));
        record.insert("slot_1", TagValue::Text("FLOUR".to_string()));

        let body = record.to_canonical_json().unwrap();
        let back = RecipeRecord::from_canonical_json(&body).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.get("RECIPE_NUMBER"), Some(&TagValue::Int(7)));
        assert_eq!(back.get("TOTAL_WT"), Some(&TagValue::Float(1000.5)));
    }

    /// 整数与浮点在往返中不得互相退化
    #[test]
    fn test_round_trip_keeps_int_float_distinct() {
        let mut record = RecipeRecord::new();
        record.insert("A", TagValue::Int(1000));
        record.insert("B", TagValue::Float(1000.0));

        let body = record.to_canonical_json().unwrap();
        let back = RecipeRecord::from_canonical_json(&body).unwrap();
        assert_eq!(back.get("A"), Some(&TagValue::Int(1000)));
        assert_eq!(back.get("B"), Some(&TagValue::Float(1000.0)));
    }

    /// 规范化形式按键排序，与插入顺序无关
    #[test]
    fn test_canonical_form_is_key_sorted() {
        let mut a = RecipeRecord::new();
        a.insert("Z", TagValue::Int(1));
        a.insert("A", TagValue::Int(2));

        let mut b = RecipeRecord::new();
        b.insert("A", TagValue::Int(2));
        b.insert("Z", TagValue::Int(1));

        assert_eq!(
            a.to_canonical_json().unwrap(),
            b.to_canonical_json().unwrap()
        );
    }

    /// 同名键合并时以叠加值为准
    #[test]
    fn test_merge_overlays_same_keys() {
        let mut record = RecipeRecord::new();
        record.insert("SEQ", TagValue::Int(1));
        let mut extra = RecipeRecord::new();
        extra.insert("SEQ", TagValue::Int(2));
        record.merge(extra);
        assert_eq!(record.get("SEQ"), Some(&TagValue::Int(2)));
    }

    /// 键集不相交的映射可以合并，顺序保持主表在前
    #[test]
    fn test_compose_disjoint_mappings() {
        let primary = ColumnMappings::new(vec![
            MappingEntry {
                tag: "RECIPE_NUMBER".to_string(),
                column: "Recipe_Number".to_string(),
            },
            MappingEntry {
                tag: "TOTAL_WT".to_string(),
                column: "Total_Weight".to_string(),
            },
        ]);
        let extras = ColumnMappings::new(vec![MappingEntry {
            tag: "sequence_number".to_string(),
            column: "SEQ_Number".to_string(),
        }]);

        let composed = ColumnMappings::compose(&primary, &extras).unwrap();
        let tags: Vec<&str> = composed.iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["RECIPE_NUMBER", "TOTAL_WT", "sequence_number"]);
    }

    /// 键集相交的映射合并必须被拒绝
    #[test]
    fn test_compose_rejects_duplicate_tags() {
        let primary = ColumnMappings::new(vec![MappingEntry {
            tag: "TOTAL_WT".to_string(),
            column: "Total_Weight".to_string(),
        }]);
        let extras = ColumnMappings::new(vec![MappingEntry {
            tag: "TOTAL_WT".to_string(),
            column: "TW2".to_string(),
        }]);
        assert!(ColumnMappings::compose(&primary, &extras).is_err());
    }

    /// 映射快照JSON往返保持顺序
    #[test]
    fn test_mappings_json_round_trip() {
        let mappings = ColumnMappings::new(vec![
            MappingEntry {
                tag: "B".to_string(),
                column: "Col_B".to_string(),
            },
            MappingEntry {
                tag: "A".to_string(),
                column: "Col_A".to_string(),
            },
        ]);
        let json = mappings.to_json().unwrap();
        let back = ColumnMappings::from_json(&json).unwrap();
        assert_eq!(back, mappings);
    }
}
