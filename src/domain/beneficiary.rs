// ==========================================
// 受益人登记系统 - 受益人领域模型
// ==========================================
// 职责: 个人、群组、受益人/群组受益人实体
// 约束: 同一方案下 ACTIVE 数量不超过方案上限
// ==========================================

use crate::domain::types::{BeneficiaryStatus, EnrollmentKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==========================================
// Individual - 个人
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub dob: Option<NaiveDate>,
    pub json_ext: Value,
    pub version: i64,
    pub is_deleted: bool,
}

// ==========================================
// Group - 群组（家庭）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub code: String,
    pub json_ext: Value,
    pub is_deleted: bool,
}

// ==========================================
// Beneficiary - 受益人（个人或群组）
// ==========================================
// member_id 指向 individual 或 group，由 kind 决定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: String,
    pub kind: EnrollmentKind,
    pub member_id: String,
    pub benefit_plan_id: String,
    pub status: BeneficiaryStatus,
    pub json_ext: Value,
    pub version: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建受益人请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBeneficiary {
    pub member_id: String,
    pub benefit_plan_id: String,
    pub status: BeneficiaryStatus,
    pub json_ext: Value,
}

/// 受益人更新请求（None 字段保持不变）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeneficiaryUpdate {
    pub id: String,
    pub status: Option<BeneficiaryStatus>,
    pub json_ext: Option<Value>,
}

// ==========================================
// UserContext - 操作人上下文
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub username: String,
}

impl UserContext {
    pub fn new(user_id: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
        }
    }
}
