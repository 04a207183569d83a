// ==========================================
// 受益人登记系统 - 字段校验器注册表
// ==========================================
// 职责: Schema 中 validationCalculation.name → 校验实现
// 红线: 校验器为纯函数，不访问数据库
// 说明: 未注册的标识返回失败结果（不 panic，不静默通过）
// ==========================================

use crate::domain::validation::FieldOutcome;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

// ==========================================
// FieldValidator Trait
// ==========================================
pub trait FieldValidator: Send + Sync {
    fn validate(&self, field_name: &str, value: &Value) -> FieldOutcome;
}

/// 取单元格的文本形式（null → 空串）
fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

// ===== 内置校验器 =====

/// 非空
pub struct NotEmptyValidator;

impl FieldValidator for NotEmptyValidator {
    fn validate(&self, field_name: &str, value: &Value) -> FieldOutcome {
        if as_text(value).is_empty() {
            FieldOutcome::failed(field_name, format!("字段 {} 不能为空", field_name))
        } else {
            FieldOutcome::ok(field_name)
        }
    }
}

/// 数值
pub struct NumericValidator;

impl FieldValidator for NumericValidator {
    fn validate(&self, field_name: &str, value: &Value) -> FieldOutcome {
        let ok = match value {
            Value::Number(_) => true,
            Value::String(s) => s.trim().parse::<f64>().map(|f| f.is_finite()).unwrap_or(false),
            _ => false,
        };
        if ok {
            FieldOutcome::ok(field_name)
        } else {
            FieldOutcome::failed(
                field_name,
                format!("字段 {} 必须为数值，实际 {}", field_name, as_text(value)),
            )
        }
    }
}

/// ISO 日期（YYYY-MM-DD）
pub struct IsoDateValidator;

impl FieldValidator for IsoDateValidator {
    fn validate(&self, field_name: &str, value: &Value) -> FieldOutcome {
        let text = as_text(value);
        match NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
            Ok(_) => FieldOutcome::ok(field_name),
            Err(_) => FieldOutcome::failed(
                field_name,
                format!("字段 {} 日期格式错误: 期望 YYYY-MM-DD，实际 {}", field_name, text),
            ),
        }
    }
}

/// 正整数
pub struct PositiveIntegerValidator;

impl FieldValidator for PositiveIntegerValidator {
    fn validate(&self, field_name: &str, value: &Value) -> FieldOutcome {
        let parsed = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match parsed {
            Some(n) if n > 0 => FieldOutcome::ok(field_name),
            _ => FieldOutcome::failed(
                field_name,
                format!("字段 {} 必须为正整数，实际 {}", field_name, as_text(value)),
            ),
        }
    }
}

// ==========================================
// ValidatorRegistry - 校验器注册表
// ==========================================
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn FieldValidator>>,
}

impl ValidatorRegistry {
    pub const NOT_EMPTY: &'static str = "not_empty";
    pub const NUMERIC: &'static str = "numeric";
    pub const ISO_DATE: &'static str = "iso_date";
    pub const POSITIVE_INTEGER: &'static str = "positive_integer";

    /// 空注册表
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// 带内置校验器的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Self::NOT_EMPTY, Arc::new(NotEmptyValidator));
        registry.register(Self::NUMERIC, Arc::new(NumericValidator));
        registry.register(Self::ISO_DATE, Arc::new(IsoDateValidator));
        registry.register(Self::POSITIVE_INTEGER, Arc::new(PositiveIntegerValidator));
        registry
    }

    /// 注册（同名覆盖）
    pub fn register(&mut self, key: &str, validator: Arc<dyn FieldValidator>) {
        self.validators.insert(key.to_string(), validator);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn FieldValidator>> {
        self.validators.get(key).cloned()
    }

    /// 按标识执行校验
    pub fn run(&self, key: &str, field_name: &str, value: &Value) -> FieldOutcome {
        match self.validators.get(key) {
            Some(validator) => validator.validate(field_name, value),
            None => FieldOutcome::failed(
                field_name,
                format!("未注册的校验规则: {}", key),
            ),
        }
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_validators() {
        let registry = ValidatorRegistry::with_builtins();

        assert!(registry.run("not_empty", "name", &json!("Ana")).success);
        assert!(!registry.run("not_empty", "name", &json!("  ")).success);
        assert!(!registry.run("not_empty", "name", &Value::Null).success);

        assert!(registry.run("numeric", "score", &json!(3.5)).success);
        assert!(registry.run("numeric", "score", &json!("12")).success);
        assert!(!registry.run("numeric", "score", &json!("abc")).success);

        assert!(registry.run("iso_date", "dob", &json!("1990-02-28")).success);
        assert!(!registry.run("iso_date", "dob", &json!("28/02/1990")).success);

        assert!(registry.run("positive_integer", "age", &json!(5)).success);
        assert!(!registry.run("positive_integer", "age", &json!(0)).success);
        assert!(!registry.run("positive_integer", "age", &json!(2.5)).success);
    }

    #[test]
    fn test_unknown_key_fails_with_note() {
        let registry = ValidatorRegistry::with_builtins();
        let outcome = registry.run("does_not_exist", "age", &json!(5));

        assert!(!outcome.success);
        assert_eq!(outcome.field_name, "age");
        assert!(outcome.note.unwrap().contains("does_not_exist"));
    }

    #[test]
    fn test_register_custom_validator() {
        struct AlwaysFails;
        impl FieldValidator for AlwaysFails {
            fn validate(&self, field_name: &str, _value: &Value) -> FieldOutcome {
                FieldOutcome::failed(field_name, "nope")
            }
        }

        let mut registry = ValidatorRegistry::empty();
        registry.register("custom", Arc::new(AlwaysFails));
        assert!(registry.get("custom").is_some());
        assert_eq!(registry.run("custom", "x", &json!(1)).note.as_deref(), Some("nope"));
    }
}
