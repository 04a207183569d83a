// ==========================================
// 受益人登记系统 - 导入编排器
// ==========================================
// 职责: 解析 → 落库（Upload + SourceRow + UploadRecord，单事务）
//       → 状态置 TRIGGERED → 调用外部工作流 → 失败时补写 FAIL
// 红线: 工作流调用不在导入事务内；工作流失败不回滚已提交的导入
// 红线: 不持有连接锁跨越 .await
// ==========================================

use crate::db::SharedConnection;
use crate::domain::benefit_plan::BenefitPlan;
use crate::domain::beneficiary::UserContext;
use crate::domain::types::UploadStatus;
use crate::domain::upload::{SourceRow, Upload, UploadRecord};
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, EventBus};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{FileLoader, ImportFile};
use crate::repository::error::RepositoryError;
use crate::repository::upload_repo::UploadRepository;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// ==========================================
// WorkflowHandler Trait - 外部工作流
// ==========================================

/// 工作流调用上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub user_id: String,
    pub benefit_plan_id: String,
    pub upload_id: String,
    pub group_aggregation_column: Option<String>,
}

/// 工作流执行结果（success=false 视同失败）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl WorkflowOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: WorkflowContext) -> anyhow::Result<WorkflowOutcome>;
}

/// 导入结果摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub upload_id: String,
    pub row_count: usize,
    pub workflow_succeeded: bool,
}

// ==========================================
// ImportOrchestrator - 导入编排器
// ==========================================
pub struct ImportOrchestrator {
    conn: SharedConnection,
    upload_repo: UploadRepository,
    loader: FileLoader,
    events: Arc<EventBus>,
}

impl ImportOrchestrator {
    pub fn new(conn: SharedConnection, events: Arc<EventBus>) -> Self {
        Self {
            upload_repo: UploadRepository::new(conn.clone()),
            conn,
            loader: FileLoader,
            events,
        }
    }

    /// 导入受益人文件
    ///
    /// # 返回
    /// - Ok(ImportSummary): 导入已提交（工作流失败也返回 Ok，失败写入 Upload.error）
    /// - Err: 格式/空文件错误（未落库）或导入事务失败
    #[instrument(skip(self, file, workflow, user), fields(filename = %file.filename, benefit_plan_id = %plan.id))]
    pub async fn import(
        &self,
        file: ImportFile,
        plan: &BenefitPlan,
        workflow: &dyn WorkflowHandler,
        group_aggregation_column: Option<&str>,
        user: &UserContext,
    ) -> ImportResult<ImportSummary> {
        // ===== 阶段 1: 解析（落库前完成全部格式校验）=====
        let table = self.loader.load(&file)?;

        // ===== 阶段 2: 落库（单事务）=====
        let upload = Upload::new(&file.filename, Some(workflow.name()));
        let rows: Vec<SourceRow> = table
            .rows
            .into_iter()
            .map(|payload| SourceRow::new(&upload.id, payload))
            .collect();
        let record = UploadRecord::new(&upload.id, &plan.id, workflow.name(), group_aggregation_column);
        let row_count = self.persist(&upload, &rows, &record)?;

        info!(upload_id = %upload.id, rows = row_count, "导入数据已提交");

        // ===== 阶段 3: 先置 TRIGGERED，再调用工作流 =====
        self.upload_repo
            .update_status(&upload.id, UploadStatus::Triggered, None)?;
        self.events.publish(
            EnrollmentEvent::new(
                EnrollmentEventType::ImportTriggered,
                &upload.id,
                json!({ "workflow": workflow.name(), "benefit_plan_id": plan.id, "rows": row_count }),
            )
            .with_source("ImportOrchestrator"),
        );

        let ctx = WorkflowContext {
            user_id: user.user_id.clone(),
            benefit_plan_id: plan.id.clone(),
            upload_id: upload.id.clone(),
            group_aggregation_column: group_aggregation_column.map(|c| c.to_string()),
        };

        // ===== 阶段 4: 工作流失败 → 补写 FAIL（不回滚、不上抛）=====
        let failure = match workflow.run(ctx).await {
            Ok(outcome) if outcome.success => None,
            Ok(outcome) => Some(
                outcome
                    .message
                    .unwrap_or_else(|| "工作流执行失败".to_string()),
            ),
            Err(e) => Some(e.to_string()),
        };

        if let Some(message) = &failure {
            warn!(upload_id = %upload.id, error = %message, "工作流执行失败，上传批次置为 FAIL");
            self.mark_failed(&upload.id, message);
        }

        Ok(ImportSummary {
            upload_id: upload.id,
            row_count,
            workflow_succeeded: failure.is_none(),
        })
    }

    fn persist(
        &self,
        upload: &Upload,
        rows: &[SourceRow],
        record: &UploadRecord,
    ) -> ImportResult<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn.unchecked_transaction()?;

        UploadRepository::insert_upload_tx(&tx, upload)?;
        let inserted = UploadRepository::insert_rows_tx(&tx, rows)?;
        UploadRepository::insert_record_tx(&tx, record)?;

        if inserted != rows.len() {
            return Err(ImportError::InternalError(format!(
                "行数不一致: 期望 {}，实际 {}",
                rows.len(),
                inserted
            )));
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// 置 FAIL，工作流失败原因合并到 error.workflow（保留工作流已写入的错误块）
    fn mark_failed(&self, upload_id: &str, message: &str) {
        let result = self.upload_repo.find_by_id(upload_id).and_then(|upload| {
            let mut error = upload
                .and_then(|u| u.error.as_object().cloned())
                .unwrap_or_default();
            error.insert("workflow".to_string(), json!(message));
            self.upload_repo
                .update_status(upload_id, UploadStatus::Fail, Some(Value::Object(error)))
        });
        match result {
            Ok(()) => {
                self.events.publish(
                    EnrollmentEvent::new(
                        EnrollmentEventType::UploadStatusChanged,
                        upload_id,
                        json!({ "status": UploadStatus::Fail.as_str() }),
                    )
                    .with_source("ImportOrchestrator"),
                );
            }
            // 工作流已将批次推进到终态时无法再写 FAIL，仅记录
            Err(e) => error!(upload_id = %upload_id, error = %e, "写入 FAIL 状态失败"),
        }
    }
}
