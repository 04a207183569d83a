// ==========================================
// 受益人登记系统 - 上传批次领域模型
// ==========================================
// 职责: 上传批次、原始行、批次-方案关联记录
// 红线: 原始行 payload 创建后不可变，仅 validations 可写
// ==========================================

use crate::domain::types::UploadStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 行数据 payload（列名 → 值）
pub type RowPayload = Map<String, Value>;

// ==========================================
// Upload - 上传批次
// ==========================================
// 状态转换仅由导入编排器与工作流回调驱动
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub source_name: String,  // 源文件名
    pub source_type: String,  // 固定为 "beneficiary import"
    pub status: UploadStatus,
    pub error: Value,         // 错误信息（JSON 对象）
    pub workflow: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub const SOURCE_TYPE: &'static str = "beneficiary import";

    pub fn new(source_name: &str, workflow: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_name: source_name.to_string(),
            source_type: Self::SOURCE_TYPE.to_string(),
            status: UploadStatus::Created,
            error: Value::Object(Map::new()),
            workflow: workflow.map(|w| w.to_string()),
            created_at: now,
            updated_at: now,
        }
    }
}

// ==========================================
// SourceRow - 原始导入行
// ==========================================
// 归属: 由所属 Upload 独占（级联删除）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRow {
    pub id: String,
    pub upload_id: String,
    pub payload: RowPayload,         // 原始 key→value（不可变）
    pub validations: Value,          // {"validation_errors": [...]}
    pub individual_id: Option<String>, // 入库后关联的个人
}

impl SourceRow {
    pub fn new(upload_id: &str, payload: RowPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            upload_id: upload_id.to_string(),
            payload,
            validations: Value::Object(Map::new()),
            individual_id: None,
        }
    }

    /// 已写入的校验错误列表（未校验返回 None）
    pub fn validation_errors(&self) -> Option<&Vec<Value>> {
        self.validations
            .get("validation_errors")
            .and_then(|v| v.as_array())
    }

    /// 是否为有效行（已校验且无错误）
    pub fn is_valid(&self) -> bool {
        self.validation_errors().map(|e| e.is_empty()).unwrap_or(false)
    }
}

// ==========================================
// UploadRecord - 上传批次与受益方案的关联
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: String,
    pub data_upload_id: String,
    pub benefit_plan_id: String,
    pub workflow: String,
    pub json_ext: Value,     // {"group_aggregation_column": ...}
    pub is_deleted: bool,
}

impl UploadRecord {
    pub fn new(
        data_upload_id: &str,
        benefit_plan_id: &str,
        workflow: &str,
        group_aggregation_column: Option<&str>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data_upload_id: data_upload_id.to_string(),
            benefit_plan_id: benefit_plan_id.to_string(),
            workflow: workflow.to_string(),
            json_ext: serde_json::json!({ "group_aggregation_column": group_aggregation_column }),
            is_deleted: false,
        }
    }
}
