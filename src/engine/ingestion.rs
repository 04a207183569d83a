// ==========================================
// 受益人登记系统 - 上传工作流与入库
// ==========================================
// 职责: BeneficiaryUploadWorkflow（表头检查 → 校验 → 审批闸门或直接入库/更新）
//       ValidItemsIngestor（行 → 个人 + POTENTIAL 受益人，按文件更新个人，审核回调，报表同步）
// 红线: 入库单事务；失败时上传批次置 FAIL 并写入错误块
// ==========================================

use crate::config::enrollment_config_trait::EnrollmentConfigReader;
use crate::db::SharedConnection;
use crate::domain::beneficiary::{Beneficiary, Individual, NewBeneficiary, UserContext};
use crate::domain::task::Task;
use crate::domain::types::{BeneficiaryStatus, EnrollmentKind, UploadStatus};
use crate::domain::upload::SourceRow;
use crate::engine::beneficiary_service::{publish_change, BeneficiaryService};
use crate::engine::bulk_status::ext_object;
use crate::engine::error::{lock_error, EngineError, EngineResult};
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, EventBus};
use crate::engine::task_gate::TaskGate;
use crate::importer::beneficiary_importer::{WorkflowContext, WorkflowHandler, WorkflowOutcome};
use crate::importer::error_annotator::ErrorAnnotator;
use crate::importer::schema_validator::SchemaValidator;
use crate::repository::benefit_plan_repo::BenefitPlanRepository;
use crate::repository::beneficiary_repo::BeneficiaryRepository;
use crate::repository::individual_repo::IndividualRepository;
use crate::repository::upload_repo::UploadRepository;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, MutexGuard};
use tracing::{info, instrument, warn};

/// 个人必需字段
pub const REQUIRED_FIELDS: [&str; 3] = ["first_name", "last_name", "dob"];

/// 更新类上传的必需列（指向已有个人）
pub const UPDATE_REQUIRED_FIELDS: [&str; 1] = ["id"];

/// 表头中允许出现、但不要求在 Schema 中声明的列
const PASSTHROUGH_COLUMNS: [&str; 4] = ["first_name", "last_name", "dob", "id"];

/// 入库结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub individuals_created: usize,
    pub beneficiaries_created: usize,
}

/// 按文件更新结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReport {
    pub individuals_updated: usize,
    pub beneficiaries_updated: usize,
}

// ==========================================
// ValidItemsIngestor - 直接入库 / 按文件更新
// ==========================================
pub struct ValidItemsIngestor {
    conn: SharedConnection,
    events: Arc<EventBus>,
}

impl ValidItemsIngestor {
    pub fn new(conn: SharedConnection, events: Arc<EventBus>) -> Self {
        Self { conn, events }
    }

    /// 将上传批次中尚未入库的行写入个人与受益人
    ///
    /// # 参数
    /// - valid_only: 仅处理校验无错误的行
    ///
    /// # 返回
    /// - Ok(report): 已提交，上传批次置 SUCCESS
    /// - Err: 上传批次已置 FAIL（错误块写入 Upload.error.errors）
    #[instrument(skip(self, user))]
    pub fn ingest(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        valid_only: bool,
        user: &UserContext,
    ) -> EngineResult<IngestReport> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let rows = pending_rows_tx(&conn, upload_id, valid_only)?;

        // ===== 必需字段检查（不满足则整批不入库）=====
        if let Some(block) = missing_required_block(&rows, upload_id) {
            return self.fail_batch(
                conn,
                upload_id,
                block,
                format!("上传批次 {} 存在缺少必需字段的行", upload_id),
            );
        }

        let result = Self::commit_batch(&conn, upload_id, |tx| {
            Self::ingest_rows_tx(tx, &rows, upload_id, benefit_plan_id)
        });
        drop(conn);
        let created = match result {
            Ok(created) => created,
            Err(e) => {
                self.publish_status(upload_id, UploadStatus::Fail);
                return Err(e);
            }
        };

        for beneficiary in &created {
            publish_change(
                &self.events,
                EnrollmentEventType::created(EnrollmentKind::Individual),
                beneficiary,
            );
        }
        self.publish_status(upload_id, UploadStatus::Success);

        info!(
            upload_id = %upload_id,
            created = created.len(),
            user = %user.username,
            "有效行已入库"
        );
        Ok(IngestReport {
            individuals_created: created.len(),
            beneficiaries_created: created.len(),
        })
    }

    /// 按上传文件更新已有个人（行内 id 指向个人）
    ///
    /// # 规则
    /// - 仅处理校验无错误且尚未关联的行
    /// - 空单元格保持原值；id 缺失或无法匹配时整批不更新
    /// - 该个人在方案下已有受益人时，同步合并受益人扩展数据
    #[instrument(skip(self, user))]
    pub fn apply_updates(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        user: &UserContext,
    ) -> EngineResult<UpdateReport> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let rows = pending_rows_tx(&conn, upload_id, true)?;

        if let Some(block) = unmatched_individual_block(&conn, &rows, upload_id)? {
            return self.fail_batch(
                conn,
                upload_id,
                block,
                format!("上传批次 {} 存在无法匹配个人的行", upload_id),
            );
        }

        let result = Self::commit_batch(&conn, upload_id, |tx| {
            Self::update_rows_tx(tx, &rows, upload_id, benefit_plan_id)
        });
        drop(conn);
        let (individuals_updated, updated) = match result {
            Ok(done) => done,
            Err(e) => {
                self.publish_status(upload_id, UploadStatus::Fail);
                return Err(e);
            }
        };

        for beneficiary in &updated {
            publish_change(
                &self.events,
                EnrollmentEventType::updated(EnrollmentKind::Individual),
                beneficiary,
            );
        }
        self.publish_status(upload_id, UploadStatus::Success);

        info!(
            upload_id = %upload_id,
            individuals_updated,
            beneficiaries_updated = updated.len(),
            user = %user.username,
            "有效行已更新"
        );
        Ok(UpdateReport {
            individuals_updated,
            beneficiaries_updated: updated.len(),
        })
    }

    /// 单事务执行批次；开启/提交失败同样置 FAIL 并写入错误块
    fn commit_batch<T, F>(conn: &Connection, upload_id: &str, op: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T>,
    {
        let result = conn
            .unchecked_transaction()
            .map_err(EngineError::from)
            .and_then(|tx| {
                let value = op(&tx)?;
                tx.commit()?;
                Ok(value)
            });

        if let Err(e) = &result {
            warn!(upload_id = %upload_id, error = %e, "批次写入失败，上传批次置为 FAIL");
            let block = json!({
                "error": e.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
                "upload_id": upload_id,
            });
            Self::write_failure_tx(conn, upload_id, block)?;
        }
        result
    }

    /// 写入错误块后释放连接并派发 FAIL
    fn fail_batch<T>(
        &self,
        conn: MutexGuard<'_, Connection>,
        upload_id: &str,
        block: Value,
        message: String,
    ) -> EngineResult<T> {
        Self::write_failure_tx(&conn, upload_id, block)?;
        drop(conn);
        self.publish_status(upload_id, UploadStatus::Fail);
        Err(EngineError::InvalidInput(message))
    }

    fn ingest_rows_tx(
        conn: &Connection,
        rows: &[SourceRow],
        upload_id: &str,
        benefit_plan_id: &str,
    ) -> EngineResult<Vec<Beneficiary>> {
        let mut created = Vec::with_capacity(rows.len());

        for row in rows {
            let individual = Individual {
                id: uuid::Uuid::new_v4().to_string(),
                first_name: text_field(&row.payload, "first_name"),
                last_name: text_field(&row.payload, "last_name"),
                dob: parse_dob(row.payload.get("dob")),
                json_ext: Value::Object(row.payload.clone()),
                version: 1,
                is_deleted: false,
            };
            IndividualRepository::insert_tx(conn, &individual)?;
            UploadRepository::link_individual_tx(conn, &row.id, &individual.id)?;

            let mut ext = row.payload.clone();
            for field in REQUIRED_FIELDS {
                ext.remove(field);
            }
            let beneficiary = BeneficiaryService::create_tx(
                conn,
                EnrollmentKind::Individual,
                &NewBeneficiary {
                    member_id: individual.id.clone(),
                    benefit_plan_id: benefit_plan_id.to_string(),
                    status: BeneficiaryStatus::Potential,
                    json_ext: Value::Object(ext),
                },
            )?;
            created.push(beneficiary);
        }

        UploadRepository::update_status_tx(conn, upload_id, UploadStatus::Success, Some(json!({})))?;
        Ok(created)
    }

    fn update_rows_tx(
        conn: &Connection,
        rows: &[SourceRow],
        upload_id: &str,
        benefit_plan_id: &str,
    ) -> EngineResult<(usize, Vec<Beneficiary>)> {
        let mut individuals_updated = 0;
        let mut beneficiaries = Vec::new();

        for row in rows {
            let individual_id = text_field(&row.payload, "id");
            let mut individual = IndividualRepository::find_by_id_tx(conn, &individual_id)?
                .filter(|i| !i.is_deleted)
                .ok_or_else(|| EngineError::NotFound(format!("Individual(id={})", individual_id)))?;

            let mut fields = row.payload.clone();
            fields.remove("id");
            merge_individual(&mut individual, &fields);
            IndividualRepository::update_tx(conn, &individual)?;
            UploadRepository::link_individual_tx(conn, &row.id, &individual.id)?;
            individuals_updated += 1;

            if let Some(mut beneficiary) = BeneficiaryRepository::find_by_member_and_plan_tx(
                conn,
                EnrollmentKind::Individual,
                &individual.id,
                benefit_plan_id,
            )? {
                let mut ext = ext_object(&beneficiary.json_ext);
                for (key, value) in &fields {
                    if !is_blank(value) && !REQUIRED_FIELDS.contains(&key.as_str()) {
                        ext.insert(key.clone(), value.clone());
                    }
                }
                beneficiary.json_ext = Value::Object(ext);
                beneficiaries.push(BeneficiaryRepository::update_tx(conn, &beneficiary)?);
            }
        }

        UploadRepository::update_status_tx(conn, upload_id, UploadStatus::Success, Some(json!({})))?;
        Ok((individuals_updated, beneficiaries))
    }

    /// 置 FAIL，并把错误块合并到 error.errors
    fn write_failure_tx(conn: &Connection, upload_id: &str, block: Value) -> EngineResult<()> {
        let upload = UploadRepository::find_by_id_tx(conn, upload_id)?
            .ok_or_else(|| EngineError::NotFound(format!("Upload(id={})", upload_id)))?;
        let mut error = ext_object(&upload.error);
        error.insert("errors".to_string(), block);
        UploadRepository::update_status_tx(conn, upload_id, UploadStatus::Fail, Some(Value::Object(error)))?;
        Ok(())
    }

    /// 审核回调
    ///
    /// # 规则
    /// - approved: 入库有效行
    /// - 否则: 置 FAIL，error = {"verification": "rejected"}
    pub fn complete_verification(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        approved: bool,
        user: &UserContext,
    ) -> EngineResult<Option<IngestReport>> {
        self.ensure_waiting(upload_id)?;
        if approved {
            return self.ingest(upload_id, benefit_plan_id, true, user).map(Some);
        }
        self.reject(upload_id, user)?;
        Ok(None)
    }

    /// 更新类上传的审核回调（通过 → 按文件更新有效行）
    pub fn complete_update_verification(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        approved: bool,
        user: &UserContext,
    ) -> EngineResult<Option<UpdateReport>> {
        self.ensure_waiting(upload_id)?;
        if approved {
            return self.apply_updates(upload_id, benefit_plan_id, user).map(Some);
        }
        self.reject(upload_id, user)?;
        Ok(None)
    }

    fn ensure_waiting(&self, upload_id: &str) -> EngineResult<()> {
        let upload = UploadRepository::new(self.conn.clone())
            .find_by_id(upload_id)?
            .ok_or_else(|| EngineError::NotFound(format!("Upload(id={})", upload_id)))?;
        if upload.status != UploadStatus::WaitingForVerification {
            return Err(EngineError::InvalidInput(format!(
                "上传批次 {} 当前状态 {} 不在等待审核",
                upload_id, upload.status
            )));
        }
        Ok(())
    }

    fn reject(&self, upload_id: &str, user: &UserContext) -> EngineResult<()> {
        UploadRepository::new(self.conn.clone()).update_status(
            upload_id,
            UploadStatus::Fail,
            Some(json!({ "verification": "rejected" })),
        )?;
        self.publish_status(upload_id, UploadStatus::Fail);
        info!(upload_id = %upload_id, user = %user.username, "审核驳回，上传批次置为 FAIL");
        Ok(())
    }

    /// 报表同步：标记 report_synch 并递增版本
    ///
    /// # 返回
    /// - 同步的记录数（个人 + 受益人）
    pub fn synchronize_for_reporting(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
    ) -> EngineResult<usize> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.unchecked_transaction()?;
        let mut synced = 0;

        for individual in IndividualRepository::list_by_upload_tx(&tx, upload_id)? {
            let mut ext = ext_object(&individual.json_ext);
            ext.insert("report_synch".to_string(), json!("true"));
            ext.insert("version".to_string(), json!(individual.version + 1));
            IndividualRepository::update_json_ext_tx(&tx, &individual.id, &Value::Object(ext))?;
            synced += 1;

            if let Some(mut beneficiary) = BeneficiaryRepository::find_by_member_and_plan_tx(
                &tx,
                EnrollmentKind::Individual,
                &individual.id,
                benefit_plan_id,
            )? {
                let mut ext = ext_object(&beneficiary.json_ext);
                ext.insert("report_synch".to_string(), json!("true"));
                ext.insert("version".to_string(), json!(beneficiary.version + 1));
                beneficiary.json_ext = Value::Object(ext);
                BeneficiaryRepository::update_tx(&tx, &beneficiary)?;
                synced += 1;
            }
        }

        tx.commit()?;
        info!(upload_id = %upload_id, synced, "报表同步完成");
        Ok(synced)
    }

    fn publish_status(&self, upload_id: &str, status: UploadStatus) {
        self.events.publish(
            EnrollmentEvent::new(
                EnrollmentEventType::UploadStatusChanged,
                upload_id,
                json!({ "status": status.as_str() }),
            )
            .with_source("ValidItemsIngestor"),
        );
    }
}

/// 尚未关联个人的行
fn pending_rows_tx(conn: &Connection, upload_id: &str, valid_only: bool) -> EngineResult<Vec<SourceRow>> {
    Ok(UploadRepository::list_rows_tx(conn, upload_id)?
        .into_iter()
        .filter(|r| r.individual_id.is_none())
        .filter(|r| !valid_only || r.is_valid())
        .collect())
}

fn text_field(payload: &Map<String, Value>, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_dob(value: Option<&Value>) -> Option<NaiveDate> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

/// 缺少必需字段的行 → 错误块（全部满足时返回 None）
fn missing_required_block(rows: &[SourceRow], upload_id: &str) -> Option<Value> {
    let mut missing_first = Vec::new();
    let mut missing_last = Vec::new();
    let mut missing_dob = Vec::new();

    for row in rows {
        if text_field(&row.payload, "first_name").is_empty() {
            missing_first.push(row.id.clone());
        }
        if text_field(&row.payload, "last_name").is_empty() {
            missing_last.push(row.id.clone());
        }
        if parse_dob(row.payload.get("dob")).is_none() {
            missing_dob.push(row.id.clone());
        }
    }

    if missing_first.is_empty() && missing_last.is_empty() && missing_dob.is_empty() {
        return None;
    }
    Some(json!({
        "error": "Invalid entries",
        "timestamp": Utc::now().to_rfc3339(),
        "upload_id": upload_id,
        "failing_entries_first_name": missing_first,
        "failing_entries_last_name": missing_last,
        "failing_entries_dob": missing_dob,
    }))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// 非空单元格覆盖个人字段，其余保持原值
fn merge_individual(individual: &mut Individual, fields: &Map<String, Value>) {
    let first_name = text_field(fields, "first_name");
    if !first_name.is_empty() {
        individual.first_name = first_name;
    }
    let last_name = text_field(fields, "last_name");
    if !last_name.is_empty() {
        individual.last_name = last_name;
    }
    if let Some(dob) = parse_dob(fields.get("dob")) {
        individual.dob = Some(dob);
    }

    let mut ext = ext_object(&individual.json_ext);
    for (key, value) in fields {
        if !is_blank(value) {
            ext.insert(key.clone(), value.clone());
        }
    }
    individual.json_ext = Value::Object(ext);
}

/// id 缺失或无法匹配未删除个人的行 → 错误块（全部可匹配时返回 None）
fn unmatched_individual_block(
    conn: &Connection,
    rows: &[SourceRow],
    upload_id: &str,
) -> EngineResult<Option<Value>> {
    let mut failing = Vec::new();
    for row in rows {
        let individual_id = text_field(&row.payload, "id");
        let known = !individual_id.is_empty()
            && IndividualRepository::find_by_id_tx(conn, &individual_id)?
                .map(|i| !i.is_deleted)
                .unwrap_or(false);
        if !known {
            failing.push(row.id.clone());
        }
    }

    if failing.is_empty() {
        return Ok(None);
    }
    Ok(Some(json!({
        "error": "Invalid entries",
        "timestamp": Utc::now().to_rfc3339(),
        "upload_id": upload_id,
        "failing_entries_id": failing,
    })))
}

/// 表头检查：列须在 Schema 中声明（或为透传列），且必需列齐全
pub fn validate_headers(
    columns: &BTreeSet<String>,
    schema_fields: &BTreeSet<String>,
    required: &[&str],
) -> Vec<String> {
    let mut errors = Vec::new();

    let invalid: Vec<&str> = columns
        .iter()
        .filter(|c| !schema_fields.contains(*c) && !PASSTHROUGH_COLUMNS.contains(&c.as_str()))
        .map(|c| c.as_str())
        .collect();
    if !invalid.is_empty() {
        errors.push(format!("上传数据包含未声明的列: {}", invalid.join(", ")));
    }

    for field in required {
        if !columns.contains(*field) {
            errors.push(format!("上传数据缺少必需列: {}", field));
        }
    }
    errors
}

// ==========================================
// BeneficiaryUploadWorkflow - 受益人上传工作流
// ==========================================

/// 上传用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// 新建个人与 POTENTIAL 受益人
    Import,
    /// 按行内 id 更新已有个人
    Update,
}

impl UploadMode {
    /// 表头必需列
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            UploadMode::Import => &REQUIRED_FIELDS,
            UploadMode::Update => &UPDATE_REQUIRED_FIELDS,
        }
    }
}

pub struct BeneficiaryUploadWorkflow {
    conn: SharedConnection,
    config: Arc<dyn EnrollmentConfigReader>,
    validator: SchemaValidator,
    annotator: ErrorAnnotator,
    task_gate: Arc<TaskGate>,
    ingestor: Arc<ValidItemsIngestor>,
    mode: UploadMode,
}

impl BeneficiaryUploadWorkflow {
    pub const NAME: &'static str = "beneficiary_upload";
    pub const NAME_UPDATE: &'static str = "beneficiary_update";

    /// 导入工作流
    pub fn new(
        conn: SharedConnection,
        config: Arc<dyn EnrollmentConfigReader>,
        validator: SchemaValidator,
        task_gate: Arc<TaskGate>,
        ingestor: Arc<ValidItemsIngestor>,
    ) -> Self {
        Self::with_mode(conn, config, validator, task_gate, ingestor, UploadMode::Import)
    }

    /// 更新工作流
    pub fn for_updates(
        conn: SharedConnection,
        config: Arc<dyn EnrollmentConfigReader>,
        validator: SchemaValidator,
        task_gate: Arc<TaskGate>,
        ingestor: Arc<ValidItemsIngestor>,
    ) -> Self {
        Self::with_mode(conn, config, validator, task_gate, ingestor, UploadMode::Update)
    }

    fn with_mode(
        conn: SharedConnection,
        config: Arc<dyn EnrollmentConfigReader>,
        validator: SchemaValidator,
        task_gate: Arc<TaskGate>,
        ingestor: Arc<ValidItemsIngestor>,
        mode: UploadMode,
    ) -> Self {
        Self {
            annotator: ErrorAnnotator::new(conn.clone()),
            conn,
            config,
            validator,
            task_gate,
            ingestor,
            mode,
        }
    }

    pub fn mode(&self) -> UploadMode {
        self.mode
    }

    /// 含无效行的导入批次
    ///
    /// # 返回
    /// - Some(task): 上传审批开启，批次进入 WAITING_FOR_VERIFICATION
    /// - None: 审批关闭，有效行已直接入库
    pub fn create_task_with_importing_valid_items(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        user: &UserContext,
    ) -> EngineResult<Option<Task>> {
        if self.config.is_upload_maker_checker_enabled()? {
            let business_event = self.config.get_import_valid_items_event()?;
            return self
                .task_gate
                .create_task(upload_id, benefit_plan_id, &business_event, user)
                .map(Some);
        }
        self.ingestor.ingest(upload_id, benefit_plan_id, true, user)?;
        Ok(None)
    }

    /// 更新批次
    ///
    /// # 返回
    /// - Some(task): 变更审批开启，批次进入 WAITING_FOR_VERIFICATION
    /// - None: 审批关闭，有效行已直接更新
    pub fn create_task_with_update_valid_items(
        &self,
        upload_id: &str,
        benefit_plan_id: &str,
        user: &UserContext,
    ) -> EngineResult<Option<Task>> {
        if self.config.is_update_maker_checker_enabled()? {
            let business_event = self.config.get_upload_valid_items_event()?;
            return self
                .task_gate
                .create_task(upload_id, benefit_plan_id, &business_event, user)
                .map(Some);
        }
        self.ingestor.apply_updates(upload_id, benefit_plan_id, user)?;
        Ok(None)
    }

    fn execute(&self, ctx: &WorkflowContext) -> EngineResult<WorkflowOutcome> {
        let user = UserContext::new(&ctx.user_id, &ctx.user_id);

        let (plan, rows) = {
            let conn = self.conn.lock().map_err(lock_error)?;
            let plan = BenefitPlanRepository::get_tx(&conn, &ctx.benefit_plan_id)?;
            let rows = UploadRepository::list_rows_tx(&conn, &ctx.upload_id)?;
            (plan, rows)
        };
        let schema = plan.data_schema();

        // ===== 表头检查：不通过则整批中止 =====
        let columns: BTreeSet<String> = rows
            .iter()
            .flat_map(|r| r.payload.keys().cloned())
            .collect();
        let schema_fields: BTreeSet<String> = schema.fields.keys().cloned().collect();
        let header_errors = validate_headers(&columns, &schema_fields, self.mode.required_columns());
        if !header_errors.is_empty() {
            return Ok(WorkflowOutcome::failed(header_errors.join("\n")));
        }

        // ===== 校验 + 错误落库 =====
        let outcomes = self.validator.validate(&rows, &schema);
        self.annotator.save_errors(&outcomes)?;
        let invalid = outcomes.iter().filter(|o| !o.is_valid()).count();

        info!(
            upload_id = %ctx.upload_id,
            mode = ?self.mode,
            rows = rows.len(),
            invalid,
            "上传批次校验完成"
        );

        match self.mode {
            UploadMode::Import if invalid > 0 => {
                self.create_task_with_importing_valid_items(&ctx.upload_id, &plan.id, &user)?;
            }
            UploadMode::Import => {
                self.ingestor.ingest(&ctx.upload_id, &plan.id, false, &user)?;
            }
            UploadMode::Update => {
                self.create_task_with_update_valid_items(&ctx.upload_id, &plan.id, &user)?;
            }
        }
        Ok(WorkflowOutcome::ok())
    }
}

#[async_trait]
impl WorkflowHandler for BeneficiaryUploadWorkflow {
    fn name(&self) -> &str {
        match self.mode {
            UploadMode::Import => Self::NAME,
            UploadMode::Update => Self::NAME_UPDATE,
        }
    }

    async fn run(&self, ctx: WorkflowContext) -> anyhow::Result<WorkflowOutcome> {
        Ok(self.execute(&ctx)?)
    }
}
