// ==========================================
// 受益人登记系统 - 审批任务模型
// ==========================================
// 说明: 任务由 TaskGate / 受益人服务生成，生命周期归外部审批引擎
// ==========================================

use crate::domain::types::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 默认执行事件
pub const DEFAULT_EXECUTOR_EVENT: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub source: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: TaskStatus,
    pub executor_action_event: String,
    pub business_event: String,
    pub json_ext: Value,
    pub data: Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// 新建任务请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub source: String,
    pub entity_type: String,
    pub entity_id: String,
    pub business_event: String,
    pub json_ext: Value,
    pub data: Value,
}

impl NewTask {
    pub fn into_task(self, created_by: &str) -> Task {
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            source: self.source,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            status: TaskStatus::Received,
            executor_action_event: DEFAULT_EXECUTOR_EVENT.to_string(),
            business_event: self.business_event,
            json_ext: self.json_ext,
            data: self.data,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        }
    }
}
