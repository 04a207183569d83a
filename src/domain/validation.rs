// ==========================================
// 受益人登记系统 - 校验结果模型
// ==========================================
// 职责: 单字段校验结果、单行校验结果（瞬态，不直接落库）
// 落库: 经 ErrorAnnotator 归约为 {"validation_errors": [...]}
// ==========================================

use crate::domain::upload::RowPayload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// FieldOutcome - 单字段校验结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOutcome {
    pub success: bool,
    pub field_name: String,
    pub note: Option<String>,
}

impl FieldOutcome {
    pub fn ok(field_name: &str) -> Self {
        Self {
            success: true,
            field_name: field_name.to_string(),
            note: None,
        }
    }

    pub fn failed(field_name: &str, note: impl Into<String>) -> Self {
        Self {
            success: false,
            field_name: field_name.to_string(),
            note: Some(note.into()),
        }
    }
}

// ==========================================
// ValidationOutcome - 单行校验结果
// ==========================================
// validations 键: 字段名（规则校验）或 "<字段>_uniqueness"（唯一性）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub row_id: String,
    pub row: RowPayload,
    pub validations: BTreeMap<String, FieldOutcome>,
}

impl ValidationOutcome {
    /// 归约为错误列表（按键顺序）
    pub fn errors(&self) -> Vec<ValidationErrorEntry> {
        self.validations
            .values()
            .filter(|o| !o.success)
            .map(|o| ValidationErrorEntry {
                field_name: o.field_name.clone(),
                note: o.note.clone(),
            })
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.validations.values().all(|o| o.success)
    }
}

/// 落库的单条错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorEntry {
    pub field_name: String,
    pub note: Option<String>,
}
