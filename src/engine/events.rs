// ==========================================
// 受益人登记系统 - 引擎层事件总线
// ==========================================
// 职责: 定义登记事件与监听 trait，提交后同步派发
// 顺序: 按注册顺序依次调用，监听者失败只记录日志，不回滚已提交的变更
// ==========================================

use crate::domain::types::EnrollmentKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::sync::{Arc, RwLock};

// ==========================================
// 登记事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentEventType {
    /// 导入已触发工作流
    ImportTriggered,
    /// 上传批次状态变更
    UploadStatusChanged,
    BeneficiaryCreated,
    BeneficiaryUpdated,
    BeneficiaryDeleted,
    GroupBeneficiaryCreated,
    GroupBeneficiaryUpdated,
    GroupBeneficiaryDeleted,
    /// 审批任务已投递
    TaskCreated,
}

impl EnrollmentEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            EnrollmentEventType::ImportTriggered => "ImportTriggered",
            EnrollmentEventType::UploadStatusChanged => "UploadStatusChanged",
            EnrollmentEventType::BeneficiaryCreated => "BeneficiaryCreated",
            EnrollmentEventType::BeneficiaryUpdated => "BeneficiaryUpdated",
            EnrollmentEventType::BeneficiaryDeleted => "BeneficiaryDeleted",
            EnrollmentEventType::GroupBeneficiaryCreated => "GroupBeneficiaryCreated",
            EnrollmentEventType::GroupBeneficiaryUpdated => "GroupBeneficiaryUpdated",
            EnrollmentEventType::GroupBeneficiaryDeleted => "GroupBeneficiaryDeleted",
            EnrollmentEventType::TaskCreated => "TaskCreated",
        }
    }

    pub fn created(kind: EnrollmentKind) -> Self {
        match kind {
            EnrollmentKind::Individual => EnrollmentEventType::BeneficiaryCreated,
            EnrollmentKind::Group => EnrollmentEventType::GroupBeneficiaryCreated,
        }
    }

    pub fn updated(kind: EnrollmentKind) -> Self {
        match kind {
            EnrollmentKind::Individual => EnrollmentEventType::BeneficiaryUpdated,
            EnrollmentKind::Group => EnrollmentEventType::GroupBeneficiaryUpdated,
        }
    }

    pub fn deleted(kind: EnrollmentKind) -> Self {
        match kind {
            EnrollmentKind::Individual => EnrollmentEventType::BeneficiaryDeleted,
            EnrollmentKind::Group => EnrollmentEventType::GroupBeneficiaryDeleted,
        }
    }
}

/// 登记事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentEvent {
    pub event_type: EnrollmentEventType,
    /// 受影响实体 ID（上传批次 / 受益人 / 任务）
    pub entity_id: String,
    /// 事件来源描述
    pub source: Option<String>,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl EnrollmentEvent {
    pub fn new(event_type: EnrollmentEventType, entity_id: &str, payload: Value) -> Self {
        Self {
            event_type,
            entity_id: entity_id.to_string(),
            source: None,
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

// ==========================================
// 事件监听 Trait
// ==========================================

/// 登记事件监听者
///
/// 在写操作提交之后被同步调用
pub trait EnrollmentEventListener: Send + Sync {
    fn on_event(&self, event: &EnrollmentEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

// ==========================================
// EventBus - 事件总线
// ==========================================
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EnrollmentEventListener>>>,
}

impl EventBus {
    /// 创建空总线（不派发任何事件）
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加监听者
    pub fn register(&self, listener: Arc<dyn EnrollmentEventListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(e) => tracing::error!("EventBus: 监听者注册失败 - {}", e),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// 派发事件
    ///
    /// # 返回
    /// - 成功处理该事件的监听者数量
    pub fn publish(&self, event: EnrollmentEvent) -> usize {
        let listeners: Vec<Arc<dyn EnrollmentEventListener>> = match self.listeners.read() {
            Ok(l) => l.clone(),
            Err(e) => {
                tracing::error!("EventBus: 读取监听者失败 - {}", e);
                return 0;
            }
        };

        if listeners.is_empty() {
            tracing::debug!(
                "EventBus: 未注册监听者，跳过事件 - entity_id={}, event_type={}",
                event.entity_id,
                event.event_type.as_str()
            );
            return 0;
        }

        let mut delivered = 0;
        for (idx, listener) in listeners.iter().enumerate() {
            match listener.on_event(&event) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    listener_index = idx,
                    event_type = event.event_type.as_str(),
                    entity_id = %event.entity_id,
                    error = %e,
                    "事件监听者处理失败"
                ),
            }
        }
        delivered
    }
}
