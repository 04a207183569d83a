// ==========================================
// 受益人登记 API
// ==========================================
// 职责: 导入、批量状态更新、CSV 对账、受益人增改删的对外入口
// 红线: 所有方法返回统一写入结果，内部错误不向外抛出
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::response::WriteResult;
use crate::config::{ConfigManager, EnrollmentConfigReader};
use crate::db::SharedConnection;
use crate::domain::benefit_plan::BenefitPlan;
use crate::domain::beneficiary::{BeneficiaryUpdate, NewBeneficiary, UserContext};
use crate::domain::types::{BeneficiaryStatus, EnrollmentKind};
use crate::engine::beneficiary_service::BeneficiaryService;
use crate::engine::bulk_status::BulkStatusTransactor;
use crate::engine::csv_reconciler::CsvReconciler;
use crate::engine::enrollment::GroupEnrollmentHook;
use crate::engine::events::EventBus;
use crate::engine::ingestion::{BeneficiaryUploadWorkflow, ValidItemsIngestor};
use crate::engine::task_gate::TaskGate;
use crate::importer::beneficiary_importer::{ImportOrchestrator, WorkflowHandler};
use crate::importer::field_validator::ValidatorRegistry;
use crate::importer::file_parser::ImportFile;
use crate::importer::schema_validator::SchemaValidator;
use crate::repository::benefit_plan_repo::BenefitPlanRepository;
use crate::repository::task_repo::{TaskCreator, TaskRepository};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// 受益人登记 API
pub struct BeneficiaryApi {
    config: Arc<dyn EnrollmentConfigReader>,
    events: Arc<EventBus>,
    plan_repo: BenefitPlanRepository,
    orchestrator: ImportOrchestrator,
    workflow: Arc<BeneficiaryUploadWorkflow>,
    update_workflow: Arc<BeneficiaryUploadWorkflow>,
    ingestor: Arc<ValidItemsIngestor>,
    individual_service: Arc<BeneficiaryService>,
    group_service: Arc<BeneficiaryService>,
    bulk: BulkStatusTransactor,
    reconciler: CsvReconciler,
}

impl BeneficiaryApi {
    /// 使用默认任务仓储创建 API
    pub fn new(conn: SharedConnection) -> ApiResult<Self> {
        let task_creator: Arc<dyn TaskCreator> = Arc::new(TaskRepository::new(conn.clone()));
        Self::with_task_creator(conn, task_creator)
    }

    /// 指定审批任务投递方创建 API
    pub fn with_task_creator(
        conn: SharedConnection,
        task_creator: Arc<dyn TaskCreator>,
    ) -> ApiResult<Self> {
        let config: Arc<dyn EnrollmentConfigReader> =
            Arc::new(ConfigManager::from_connection(conn.clone())?);
        let events = Arc::new(EventBus::new());

        let individual_service = Arc::new(BeneficiaryService::new(
            EnrollmentKind::Individual,
            conn.clone(),
            events.clone(),
            task_creator.clone(),
        ));
        let group_service = Arc::new(BeneficiaryService::new(
            EnrollmentKind::Group,
            conn.clone(),
            events.clone(),
            task_creator.clone(),
        ));

        let task_gate = Arc::new(TaskGate::new(conn.clone(), task_creator.clone(), events.clone()));
        let ingestor = Arc::new(ValidItemsIngestor::new(conn.clone(), events.clone()));
        let registry = Arc::new(ValidatorRegistry::with_builtins());
        let workflow = Arc::new(BeneficiaryUploadWorkflow::new(
            conn.clone(),
            config.clone(),
            SchemaValidator::new(registry.clone()),
            task_gate.clone(),
            ingestor.clone(),
        ));
        let update_workflow = Arc::new(BeneficiaryUploadWorkflow::for_updates(
            conn.clone(),
            config.clone(),
            SchemaValidator::new(registry),
            task_gate,
            ingestor.clone(),
        ));

        let hook = Arc::new(GroupEnrollmentHook::new(group_service.clone())?);
        let reconciler = CsvReconciler::new(conn.clone(), config.clone(), hook, events.clone());
        let bulk = BulkStatusTransactor::new(conn.clone(), config.clone(), task_creator, events.clone());

        Ok(Self {
            config,
            plan_repo: BenefitPlanRepository::new(conn.clone()),
            orchestrator: ImportOrchestrator::new(conn, events.clone()),
            events,
            workflow,
            update_workflow,
            ingestor,
            individual_service,
            group_service,
            bulk,
            reconciler,
        })
    }

    /// 事件总线（注册监听器用）
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    // ==========================================
    // 导入
    // ==========================================

    /// 导入受益人文件（内置上传工作流）
    pub async fn import_beneficiaries(
        &self,
        file: ImportFile,
        benefit_plan_id: &str,
        group_aggregation_column: Option<&str>,
        user: &UserContext,
    ) -> WriteResult {
        let workflow = self.workflow.clone();
        self.import_with_workflow(file, benefit_plan_id, workflow.as_ref(), group_aggregation_column, user)
            .await
    }

    /// 按文件更新已有个人（行内 id 指向个人；内置更新工作流）
    pub async fn update_beneficiaries_from_upload(
        &self,
        file: ImportFile,
        benefit_plan_id: &str,
        user: &UserContext,
    ) -> WriteResult {
        let workflow = self.update_workflow.clone();
        self.import_with_workflow(file, benefit_plan_id, workflow.as_ref(), None, user)
            .await
    }

    /// 导入受益人文件（指定工作流）
    ///
    /// # 返回
    /// - success=true: 导入已提交；工作流失败时 data.workflow_succeeded=false，失败原因写入 Upload.error
    /// - success=false: 格式/空文件/方案不存在等，未落库
    pub async fn import_with_workflow(
        &self,
        file: ImportFile,
        benefit_plan_id: &str,
        workflow: &dyn WorkflowHandler,
        group_aggregation_column: Option<&str>,
        user: &UserContext,
    ) -> WriteResult {
        let result = self
            .try_import(file, benefit_plan_id, workflow, group_aggregation_column, user)
            .await;
        into_envelope("import_beneficiaries", result)
    }

    async fn try_import(
        &self,
        file: ImportFile,
        benefit_plan_id: &str,
        workflow: &dyn WorkflowHandler,
        group_aggregation_column: Option<&str>,
        user: &UserContext,
    ) -> ApiResult<WriteResult> {
        let plan = self.load_plan(benefit_plan_id)?;
        let summary = self
            .orchestrator
            .import(file, &plan, workflow, group_aggregation_column, user)
            .await?;
        let message = if summary.workflow_succeeded {
            "导入成功"
        } else {
            "导入已保存，工作流执行失败"
        };
        Ok(WriteResult::success(message, Some(json!(summary))))
    }

    /// 审核回调（通过 → 入库有效行；驳回 → FAIL）
    pub fn complete_upload_verification(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        approved: bool,
        user: &UserContext,
    ) -> WriteResult {
        let result = self
            .ingestor
            .complete_verification(upload_id, benefit_plan_id, approved, user)
            .map_err(ApiError::from)
            .map(|report| match report {
                Some(report) => WriteResult::success("审核通过，有效行已入库", Some(json!(report))),
                None => WriteResult::success("审核驳回", None),
            });
        into_envelope("complete_upload_verification", result)
    }

    /// 更新类上传的审核回调（通过 → 按文件更新有效行；驳回 → FAIL）
    pub fn complete_upload_update_verification(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        approved: bool,
        user: &UserContext,
    ) -> WriteResult {
        let result = self
            .ingestor
            .complete_update_verification(upload_id, benefit_plan_id, approved, user)
            .map_err(ApiError::from)
            .map(|report| match report {
                Some(report) => WriteResult::success("审核通过，有效行已更新", Some(json!(report))),
                None => WriteResult::success("审核驳回", None),
            });
        into_envelope("complete_upload_update_verification", result)
    }

    /// 报表同步
    pub fn synchronize_upload_for_reporting(&self, upload_id: &str, benefit_plan_id: &str) -> WriteResult {
        let result = self
            .ingestor
            .synchronize_for_reporting(upload_id, benefit_plan_id)
            .map_err(ApiError::from)
            .map(|synced| WriteResult::success("报表同步完成", Some(json!({ "synced": synced }))));
        into_envelope("synchronize_upload_for_reporting", result)
    }

    // ==========================================
    // 批量状态更新
    // ==========================================

    pub fn bulk_update_beneficiary_status(
        &self,
        ids: &[String],
        status: BeneficiaryStatus,
        reason: Option<&str>,
        user: &UserContext,
    ) -> WriteResult {
        self.bulk_update(EnrollmentKind::Individual, ids, status, reason, user)
    }

    pub fn bulk_update_group_beneficiary_status(
        &self,
        ids: &[String],
        status: BeneficiaryStatus,
        reason: Option<&str>,
        user: &UserContext,
    ) -> WriteResult {
        self.bulk_update(EnrollmentKind::Group, ids, status, reason, user)
    }

    fn bulk_update(
        &self,
        kind: EnrollmentKind,
        ids: &[String],
        status: BeneficiaryStatus,
        reason: Option<&str>,
        user: &UserContext,
    ) -> WriteResult {
        let result = self
            .bulk
            .apply(kind, ids, status, reason, user)
            .map_err(ApiError::from)
            .map(|report| {
                if report.is_success() {
                    WriteResult::success(
                        "批量更新成功",
                        Some(json!({
                            "updated_count": report.updated_count,
                            "task_ids": report.task_ids,
                        })),
                    )
                } else {
                    WriteResult::failure("批量更新失败")
                        .with_data(json!({
                            "updated_count": 0,
                            "failed_count": report.failed_count,
                        }))
                        .with_details(report.details())
                }
            });
        into_envelope("bulk_update_status", result)
    }

    // ==========================================
    // CSV 对账
    // ==========================================

    /// 按 CSV 更新群组受益人状态（未登记的群组走登记确认）
    pub fn csv_update_group_beneficiary_status(
        &self,
        csv_base64: &str,
        status: BeneficiaryStatus,
        benefit_plan_id: &str,
        reason: Option<&str>,
        user: &UserContext,
    ) -> WriteResult {
        let result = self
            .reconciler
            .reconcile(csv_base64, status, benefit_plan_id, reason, user)
            .map_err(ApiError::from)
            .and_then(|report| {
                let data = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
                Ok(WriteResult::success(report.summary_message(), Some(data)))
            });
        into_envelope("csv_update_group_beneficiary_status", result)
    }

    // ==========================================
    // 单条增改删
    // ==========================================

    pub fn create_beneficiary(&self, new: NewBeneficiary, user: &UserContext) -> WriteResult {
        self.create(&self.individual_service, new, user)
    }

    pub fn update_beneficiary(&self, update: BeneficiaryUpdate, user: &UserContext) -> WriteResult {
        self.update(&self.individual_service, update, user)
    }

    pub fn delete_beneficiary(&self, id: &str, user: &UserContext) -> WriteResult {
        self.delete(&self.individual_service, id, user)
    }

    pub fn create_group_beneficiary(&self, new: NewBeneficiary, user: &UserContext) -> WriteResult {
        self.create(&self.group_service, new, user)
    }

    pub fn update_group_beneficiary(&self, update: BeneficiaryUpdate, user: &UserContext) -> WriteResult {
        self.update(&self.group_service, update, user)
    }

    pub fn delete_group_beneficiary(&self, id: &str, user: &UserContext) -> WriteResult {
        self.delete(&self.group_service, id, user)
    }

    /// 单条增改删是否走审批（check_beneficiary_crud / check_group_beneficiary_crud）
    fn crud_checked(&self, kind: EnrollmentKind) -> ApiResult<bool> {
        let checked = match kind {
            EnrollmentKind::Individual => self.config.is_beneficiary_crud_checked()?,
            EnrollmentKind::Group => self.config.is_group_beneficiary_crud_checked()?,
        };
        Ok(checked)
    }

    /// 新建受益人
    ///
    /// # 规则
    /// - 增改删审批开启: 投递审批任务，data = {task_id}
    /// - 否则: 直接创建（受方案上限约束）
    fn create(&self, service: &BeneficiaryService, new: NewBeneficiary, user: &UserContext) -> WriteResult {
        let result = self.try_create(service, new, user);
        into_envelope("create_beneficiary", result)
    }

    fn try_create(
        &self,
        service: &BeneficiaryService,
        new: NewBeneficiary,
        user: &UserContext,
    ) -> ApiResult<WriteResult> {
        if self.crud_checked(service.kind())? {
            let task = service.create_create_task(new, user)?;
            return Ok(task_submitted(&task.id));
        }
        let created = service.create(new, user)?;
        Ok(WriteResult::success(
            format!("{} 已创建", service.kind().label()),
            Some(json!(created)),
        ))
    }

    fn update(
        &self,
        service: &BeneficiaryService,
        update: BeneficiaryUpdate,
        user: &UserContext,
    ) -> WriteResult {
        let result = self.try_update(service, update, user);
        into_envelope("update_beneficiary", result)
    }

    fn try_update(
        &self,
        service: &BeneficiaryService,
        update: BeneficiaryUpdate,
        user: &UserContext,
    ) -> ApiResult<WriteResult> {
        if self.crud_checked(service.kind())? {
            let task = service.create_update_task(update, user)?;
            return Ok(task_submitted(&task.id));
        }
        let saved = service.update(update, user)?;
        Ok(WriteResult::success(
            format!("{} 已更新", service.kind().label()),
            Some(json!(saved)),
        ))
    }

    fn delete(&self, service: &BeneficiaryService, id: &str, user: &UserContext) -> WriteResult {
        let result = self.try_delete(service, id, user);
        into_envelope("delete_beneficiary", result)
    }

    fn try_delete(&self, service: &BeneficiaryService, id: &str, user: &UserContext) -> ApiResult<WriteResult> {
        if self.crud_checked(service.kind())? {
            let task = service.create_delete_task(id, user)?;
            return Ok(task_submitted(&task.id));
        }
        service.delete(id, user)?;
        Ok(WriteResult::success(format!("{} 已删除", service.kind().label()), None))
    }

    fn load_plan(&self, benefit_plan_id: &str) -> ApiResult<BenefitPlan> {
        self.plan_repo
            .find_by_id(benefit_plan_id)?
            .ok_or_else(|| ApiError::NotFound(format!("BenefitPlan(id={})不存在", benefit_plan_id)))
    }
}

fn task_submitted(task_id: &str) -> WriteResult {
    WriteResult::success("变更已提交审批", Some(json!({ "task_id": task_id })))
}

/// 内部错误 → 统一写入结果
fn into_envelope(operation: &str, result: ApiResult<WriteResult>) -> WriteResult {
    result.unwrap_or_else(|e| {
        warn!(operation, error = %e, "操作失败");
        e.into()
    })
}
