/// 配方数据校验
///
/// 按配置的字段上下限（闭区间）检查配方记录，
/// 记录中不存在的字段与非数值字段跳过

use std::collections::HashMap;

use crate::models::RecipeRecord;
use crate::utils::config::{FieldLimits, ValidationConfig};
use crate::utils::error::{AppError, AppResult};

/// 校验配方记录，返回全部越限错误描述，空列表表示通过
pub fn validate_recipe_data(record: &RecipeRecord, validation: &ValidationConfig) -> Vec<String> {
    let mut errors = Vec::new();

    for (field, limits) in &validation.limits {
        let Some(value) = record.get(field) else {
            continue;
        };
        // 非数值字段不参与上下限校验
        let Some(value) = value.as_f64() else {
            continue;
        };

        if let Some(min) = limits.min {
            if value < min {
                errors.push(format!("{} 的值 {} 低于下限 {}", field, value, min));
            }
        }
        if let Some(max) = limits.max {
            if value > max {
                errors.push(format!("{} 的值 {} 高于上限 {}", field, value, max));
            }
        }
    }

    for error in &errors {
        log::warn!("数据校验: {}", error);
    }

    errors
}

/// 校验上下限配置本身的合法性（min <= max）
pub fn validate_config_limits(limits: &HashMap<String, FieldLimits>) -> AppResult<()> {
    for (field, field_limits) in limits {
        if let (Some(min), Some(max)) = (field_limits.min, field_limits.max) {
            if min > max {
                return Err(AppError::configuration_error(format!(
                    "字段 {} 的上下限配置非法: min({}) > max({})",
                    field, min, max
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagValue;

    fn validation_with_limit(field: &str, min: Option<f64>, max: Option<f64>) -> ValidationConfig {
        let mut limits = HashMap::new();
        limits.insert(field.to_string(), FieldLimits { min, max });
        ValidationConfig { limits }
    }

    /// 区间内的值应通过校验
    #[test]
    fn test_value_within_limits_passes() {
        let mut record = RecipeRecord::new();
        record.insert("TOTAL_WT", TagValue::Float(1000.0));
        let validation = validation_with_limit("TOTAL_WT", Some(0.0), Some(50000.0));
        assert!(validate_recipe_data(&record, &validation).is_empty());
    }

    /// 低于下限的值应报错
    #[test]
    fn test_value_below_min_fails() {
        let mut record = RecipeRecord::new();
        record.insert("TOTAL_WT", TagValue::Float(-100.0));
        let validation = validation_with_limit("TOTAL_WT", Some(0.0), Some(50000.0));
        let errors = validate_recipe_data(&record, &validation);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("低于下限"));
    }

    /// 高于上限的值应报错
    #[test]
    fn test_value_above_max_fails() {
        let mut record = RecipeRecord::new();
        record.insert("TOTAL_WT", TagValue::Int(60000));
        let validation = validation_with_limit("TOTAL_WT", Some(0.0), Some(50000.0));
        let errors = validate_recipe_data(&record, &validation);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("高于上限"));
    }

    /// 边界值落在闭区间内应通过
    #[test]
    fn test_boundary_values_inclusive() {
        let mut record = RecipeRecord::new();
        record.insert("TOTAL_WT", TagValue::Float(0.0));
        let validation = validation_with_limit("TOTAL_WT", Some(0.0), Some(50000.0));
        assert!(validate_recipe_data(&record, &validation).is_empty());

        let mut record = RecipeRecord::new();
        record.insert("TOTAL_WT", TagValue::Float(50000.0));
        assert!(validate_recipe_data(&record, &validation).is_empty());
    }

    /// 记录中不存在的受限字段跳过
    #[test]
    fn test_missing_field_skipped() {
        let record = RecipeRecord::new();
        let validation = validation_with_limit("TOTAL_WT", Some(0.0), Some(50000.0));
        assert!(validate_recipe_data(&record, &validation).is_empty());
    }

    /// 非数值字段不参与上下限校验
    #[test]
    fn test_non_numeric_field_skipped() {
        let mut record = RecipeRecord::new();
        record.insert("slot_1", TagValue::Text("FLOUR".to_string()));
        let validation = validation_with_limit("slot_1", Some(0.0), Some(1.0));
        assert!(validate_recipe_data(&record, &validation).is_empty());
    }

    /// 多个字段越限时应返回全部错误
    #[test]
    fn test_multiple_errors_collected() {
        let mut record = RecipeRecord::new();
        record.insert("A", TagValue::Int(-1));
        record.insert("B", TagValue::Int(100));
        let mut limits = HashMap::new();
        limits.insert(
            "A".to_string(),
            FieldLimits {
                min: Some(0.0),
                max: None,
            },
        );
        limits.insert(
            "B".to_string(),
            FieldLimits {
                min: None,
                max: Some(50.0),
            },
        );
        let validation = ValidationConfig { limits };
        assert_eq!(validate_recipe_data(&record, &validation).len(), 2);
    }

    /// min <= max 的配置合法
    #[test]
    fn test_config_limits_valid() {
        let mut limits = HashMap::new();
        limits.insert(
            "A".to_string(),
            FieldLimits {
                min: Some(0.0),
                max: Some(1.0),
            },
        );
        assert!(validate_config_limits(&limits).is_ok());
    }

    /// min > max 的配置必须被拒绝
    #[test]
    fn test_config_limits_min_above_max_rejected() {
        let mut limits = HashMap::new();
        limits.insert(
            "A".to_string(),
            FieldLimits {
                min: Some(2.0),
                max: Some(1.0),
            },
        );
        assert!(validate_config_limits(&limits).is_err());
    }
}
