// ==========================================
// 受益人登记系统 - 上传审批闸门
// ==========================================
// 职责: 为含无效行的上传批次投递审批任务，并推进到 WAITING_FOR_VERIFICATION
// 红线: 任务投递与状态写入同一事务；投递失败时状态不得推进
// 指标: percentage_of_invalid_items = invalid / (valid + invalid) * 100，保留两位小数
// ==========================================

use crate::db::SharedConnection;
use crate::domain::beneficiary::UserContext;
use crate::domain::task::{NewTask, Task};
use crate::domain::types::UploadStatus;
use crate::engine::error::{lock_error, EngineError, EngineResult};
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, EventBus};
use crate::repository::benefit_plan_repo::BenefitPlanRepository;
use crate::repository::task_repo::TaskCreator;
use crate::repository::upload_repo::UploadRepository;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

/// 任务来源标识
pub const TASK_SOURCE: &str = "import_valid_items";

/// 无效行占比（两位小数；无数据时为 0）
pub fn percentage_of_invalid_items(valid: usize, invalid: usize) -> f64 {
    let total = valid + invalid;
    if total == 0 {
        return 0.0;
    }
    let pct = invalid as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

pub struct TaskGate {
    conn: SharedConnection,
    task_creator: Arc<dyn TaskCreator>,
    events: Arc<EventBus>,
}

impl TaskGate {
    pub fn new(
        conn: SharedConnection,
        task_creator: Arc<dyn TaskCreator>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            conn,
            task_creator,
            events,
        }
    }

    #[instrument(skip(self, user))]
    pub fn create_task(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        business_event: &str,
        user: &UserContext,
    ) -> EngineResult<Task> {
        let (task, percent) = {
            let conn = self.conn.lock().map_err(lock_error)?;
            let tx = conn.unchecked_transaction()?;

            let upload = UploadRepository::find_by_id_tx(&tx, upload_id)?
                .ok_or_else(|| EngineError::NotFound(format!("Upload(id={})", upload_id)))?;
            let plan = BenefitPlanRepository::get_tx(&tx, benefit_plan_id)?;
            let record = UploadRepository::find_record_tx(&tx, upload_id, benefit_plan_id)?
                .ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "UploadRecord(upload={}, plan={})",
                        upload_id, benefit_plan_id
                    ))
                })?;

            let (valid, invalid) = UploadRepository::count_valid_invalid_tx(&tx, upload_id)?;
            let percent = percentage_of_invalid_items(valid, invalid);

            let new_task = NewTask {
                source: TASK_SOURCE.to_string(),
                entity_type: "upload_record".to_string(),
                entity_id: record.id.clone(),
                business_event: business_event.to_string(),
                json_ext: json!({
                    "benefit_plan_code": plan.code,
                    "source_name": upload.source_name,
                    "workflow": record.workflow,
                    "percentage_of_invalid_items": percent,
                    "data_upload_id": upload.id,
                    "business_event": business_event,
                }),
                data: json!({
                    "upload_id": upload.id,
                    "benefit_plan_id": plan.id,
                    "business_event": business_event,
                }),
            };

            // 任务先落库；失败则 tx 随作用域回滚，状态保持不变
            let task = self.task_creator.create_task_tx(&tx, new_task, &user.user_id)?;
            UploadRepository::update_status_tx(
                &tx,
                upload_id,
                UploadStatus::WaitingForVerification,
                None,
            )?;
            tx.commit()?;
            (task, percent)
        };

        info!(
            task_id = %task.id,
            upload_id = %upload_id,
            percentage_of_invalid_items = percent,
            "审批任务已投递，上传批次等待审核"
        );

        self.events.publish(
            EnrollmentEvent::new(
                EnrollmentEventType::TaskCreated,
                &task.id,
                json!({ "upload_id": upload_id, "business_event": business_event }),
            )
            .with_source("TaskGate"),
        );
        self.events.publish(
            EnrollmentEvent::new(
                EnrollmentEventType::UploadStatusChanged,
                upload_id,
                json!({ "status": UploadStatus::WaitingForVerification.as_str() }),
            )
            .with_source("TaskGate"),
        );
        Ok(task)
    }
}
