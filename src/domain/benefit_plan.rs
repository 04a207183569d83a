// ==========================================
// 受益人登记系统 - 受益方案与字段 Schema
// ==========================================
// 职责: 受益方案实体 + 受益人数据 Schema 解析
// Schema 格式: {"properties": {"<field>": {"validationCalculation": {"name": ".."}, "uniqueness": ..}}}
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ==========================================
// BenefitPlan - 受益方案
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenefitPlan {
    pub id: String,
    pub code: String,
    pub name: String,
    pub max_beneficiaries: Option<i64>, // ACTIVE 受益人上限（None 表示不限）
    pub beneficiary_data_schema: Value,
    pub is_deleted: bool,
}

impl BenefitPlan {
    /// 解析受益人数据 Schema
    pub fn data_schema(&self) -> BeneficiaryDataSchema {
        BeneficiaryDataSchema::from_value(&self.beneficiary_data_schema)
    }
}

// ==========================================
// FieldSchema - 单字段规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldSchema {
    pub validation_name: Option<String>, // 校验规则标识
    pub unique: bool,                    // 批内唯一（仅看是否出现该键）
}

// ==========================================
// BeneficiaryDataSchema - 字段 Schema 集合
// ==========================================
// 字段按名称排序，保证多次校验结果顺序一致
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeneficiaryDataSchema {
    pub fields: BTreeMap<String, FieldSchema>,
}

impl BeneficiaryDataSchema {
    pub const VALIDATION_KEY: &'static str = "validationCalculation";
    pub const UNIQUENESS_KEY: &'static str = "uniqueness";

    /// 从 JSON 文档解析
    ///
    /// 兼容两种存储形态：JSON 对象与 JSON 字符串
    pub fn from_value(value: &Value) -> Self {
        let parsed;
        let doc = match value {
            Value::String(raw) => {
                parsed = serde_json::from_str::<Value>(raw).unwrap_or(Value::Null);
                &parsed
            }
            other => other,
        };

        let mut fields = BTreeMap::new();
        if let Some(properties) = doc.get("properties").and_then(|p| p.as_object()) {
            for (field, props) in properties {
                let validation_name = props
                    .get(Self::VALIDATION_KEY)
                    .and_then(|v| v.get("name"))
                    .and_then(|n| n.as_str())
                    .map(|n| n.to_string());
                let unique = props
                    .as_object()
                    .map(|o| o.contains_key(Self::UNIQUENESS_KEY))
                    .unwrap_or(false);
                fields.insert(
                    field.clone(),
                    FieldSchema {
                        validation_name,
                        unique,
                    },
                );
            }
        }

        Self { fields }
    }

    /// 标记为唯一的字段
    pub fn unique_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.unique)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_schema_properties() {
        let doc = json!({
            "properties": {
                "email": { "type": "string", "uniqueness": true },
                "age": { "type": "integer", "validationCalculation": { "name": "positive_integer" } },
                "note": { "type": "string" }
            }
        });

        let schema = BeneficiaryDataSchema::from_value(&doc);
        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.unique_fields(), vec!["email"]);
        assert_eq!(
            schema.fields["age"].validation_name.as_deref(),
            Some("positive_integer")
        );
        assert!(!schema.fields["note"].unique);
    }

    #[test]
    fn test_uniqueness_is_presence_only() {
        // 值为 false 也视为唯一标记
        let doc = json!({ "properties": { "cni": { "uniqueness": false } } });
        let schema = BeneficiaryDataSchema::from_value(&doc);
        assert!(schema.fields["cni"].unique);
    }

    #[test]
    fn test_parse_schema_from_string() {
        let doc = Value::String(r#"{"properties": {"x": {"uniqueness": 1}}}"#.to_string());
        let schema = BeneficiaryDataSchema::from_value(&doc);
        assert!(schema.contains("x"));

        let broken = Value::String("not json".to_string());
        assert!(BeneficiaryDataSchema::from_value(&broken).fields.is_empty());
    }
}
