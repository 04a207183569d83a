// ==========================================
// 受益人登记系统 - 批量状态更新
// ==========================================
// 职责: 一组受益人（或群组受益人）统一改为目标状态
// 红线: 全有或全无；任一条失败则整体回滚，报告逐条失败原因
// 红线: 空 ID 列表直接拒绝，不开启事务
// 路径: 开启审批（check_*_crud）时逐条投递变更任务，否则直接更新
// ==========================================

use crate::db::SharedConnection;
use crate::domain::beneficiary::{Beneficiary, BeneficiaryUpdate, UserContext};
use crate::domain::types::{BeneficiaryStatus, EnrollmentKind};
use crate::config::enrollment_config_trait::EnrollmentConfigReader;
use crate::engine::beneficiary_service::{publish_change, BeneficiaryService};
use crate::engine::error::{lock_error, EngineError, EngineResult};
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, EventBus};
use crate::repository::beneficiary_repo::BeneficiaryRepository;
use crate::repository::task_repo::TaskCreator;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 批量更新原因写入的扩展字段
pub const BULK_REASON_KEY: &str = "bulk_status_update_reason";

/// 合并“原因”到扩展数据
///
/// 规则: 可解析为 JSON 对象时逐键合并；其余一律按原文写入 key
pub fn merge_reason(target: &mut Map<String, Value>, key: &str, reason: Option<&str>) {
    let raw = match reason.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return,
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => {
            for (k, v) in obj {
                target.insert(k, v);
            }
        }
        _ => {
            target.insert(key.to_string(), Value::String(raw.to_string()));
        }
    }
}

/// 取可写的扩展数据对象（非对象时重置为空对象）
pub(crate) fn ext_object(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// 批量更新结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkStatusReport {
    pub updated_count: usize,
    pub failed_count: usize,
    /// 走审批路径时投递的任务
    pub task_ids: Vec<String>,
    /// 逐条失败原因
    pub errors: Vec<String>,
}

impl BulkStatusReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// 失败详情（"; " 连接）
    pub fn details(&self) -> String {
        self.errors.join("; ")
    }
}

pub struct BulkStatusTransactor {
    conn: SharedConnection,
    config: Arc<dyn EnrollmentConfigReader>,
    task_creator: Arc<dyn TaskCreator>,
    events: Arc<EventBus>,
}

impl BulkStatusTransactor {
    pub fn new(
        conn: SharedConnection,
        config: Arc<dyn EnrollmentConfigReader>,
        task_creator: Arc<dyn TaskCreator>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            conn,
            config,
            task_creator,
            events,
        }
    }

    /// 批量更新状态
    ///
    /// # 返回
    /// - Err(InvalidInput): ids 为空（未开启事务）
    /// - Ok(report): report.is_success() 为 false 时事务已整体回滚，updated_count = 0
    #[instrument(skip(self, ids, reason, user), fields(count = ids.len()))]
    pub fn apply(
        &self,
        kind: EnrollmentKind,
        ids: &[String],
        status: BeneficiaryStatus,
        reason: Option<&str>,
        user: &UserContext,
    ) -> EngineResult<BulkStatusReport> {
        if ids.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "未提供需要更新的 {} ID",
                kind.label()
            )));
        }

        // 配置读取在持有连接锁之前完成
        let via_task = match kind {
            EnrollmentKind::Individual => self.config.is_beneficiary_crud_checked()?,
            EnrollmentKind::Group => self.config.is_group_beneficiary_crud_checked()?,
        };

        let mut updated: Vec<Beneficiary> = Vec::new();
        let mut task_ids: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        {
            let conn = self.conn.lock().map_err(lock_error)?;
            let tx = conn.unchecked_transaction()?;

            for id in ids {
                let result = if via_task {
                    self.queue_one(&tx, kind, id, status, reason, user)
                        .map(|task_id| task_ids.push(task_id))
                } else {
                    Self::update_one(&tx, kind, id, status, reason).map(|b| updated.push(b))
                };
                if let Err(e) = result {
                    errors.push(format!("更新 {} {} 失败: {}", kind.label(), id, e));
                }
            }

            if !errors.is_empty() {
                // tx 未提交，随作用域丢弃即整体回滚
                warn!(
                    failed = errors.len(),
                    total = ids.len(),
                    "批量状态更新失败，已整体回滚"
                );
                return Ok(BulkStatusReport {
                    updated_count: 0,
                    failed_count: errors.len(),
                    task_ids: Vec::new(),
                    errors,
                });
            }

            tx.commit()?;
        }

        for beneficiary in &updated {
            publish_change(&self.events, EnrollmentEventType::updated(kind), beneficiary);
        }
        for task_id in &task_ids {
            self.events.publish(
                EnrollmentEvent::new(
                    EnrollmentEventType::TaskCreated,
                    task_id,
                    json!({ "business_event": BeneficiaryService::update_business_event(kind) }),
                )
                .with_source("BulkStatusTransactor"),
            );
        }

        let updated_count = ids.len();
        info!(
            updated = updated_count,
            via_task,
            status = %status,
            user = %user.username,
            "批量状态更新完成"
        );
        Ok(BulkStatusReport {
            updated_count,
            failed_count: 0,
            task_ids,
            errors: Vec::new(),
        })
    }

    fn build_update(
        conn: &Connection,
        kind: EnrollmentKind,
        id: &str,
        status: BeneficiaryStatus,
        reason: Option<&str>,
    ) -> EngineResult<BeneficiaryUpdate> {
        let existing = BeneficiaryRepository::find_by_id_tx(conn, kind, id)?
            .ok_or_else(|| EngineError::NotFound(format!("{}(id={})", kind.label(), id)))?;

        let mut ext = ext_object(&existing.json_ext);
        merge_reason(&mut ext, BULK_REASON_KEY, reason);

        Ok(BeneficiaryUpdate {
            id: id.to_string(),
            status: Some(status),
            json_ext: Some(Value::Object(ext)),
        })
    }

    fn update_one(
        conn: &Connection,
        kind: EnrollmentKind,
        id: &str,
        status: BeneficiaryStatus,
        reason: Option<&str>,
    ) -> EngineResult<Beneficiary> {
        let update = Self::build_update(conn, kind, id, status, reason)?;
        BeneficiaryService::update_tx(conn, kind, &update)
    }

    fn queue_one(
        &self,
        conn: &Connection,
        kind: EnrollmentKind,
        id: &str,
        status: BeneficiaryStatus,
        reason: Option<&str>,
        user: &UserContext,
    ) -> EngineResult<String> {
        let update = Self::build_update(conn, kind, id, status, reason)?;
        let task = BeneficiaryService::create_update_task_tx(
            conn,
            kind,
            self.task_creator.as_ref(),
            &update,
            user,
        )?;
        Ok(task.id)
    }
}
