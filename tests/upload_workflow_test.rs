// ==========================================
// 受益人上传工作流集成测试
// ==========================================
// 测试目标: 表头检查、校验落库、审批闸门、直接入库、按文件更新、审核回调、报表同步
// ==========================================


use beneficiary_enrollment::config::{config_keys, ConfigManager, EnrollmentConfigReader};
use beneficiary_enrollment::db::SharedConnection;
use beneficiary_enrollment::domain::benefit_plan::BenefitPlan;
use beneficiary_enrollment::domain::beneficiary::Individual;
use beneficiary_enrollment::domain::types::{BeneficiaryStatus, EnrollmentKind, UploadStatus};
use beneficiary_enrollment::engine::events::{EnrollmentEventType, EventBus};
use beneficiary_enrollment::engine::ingestion::{BeneficiaryUploadWorkflow, ValidItemsIngestor};
use beneficiary_enrollment::engine::task_gate::TaskGate;
use beneficiary_enrollment::importer::beneficiary_importer::{ImportOrchestrator, ImportSummary};
use beneficiary_enrollment::importer::error_annotator::ErrorAnnotator;
use beneficiary_enrollment::importer::field_validator::ValidatorRegistry;
use beneficiary_enrollment::importer::schema_validator::SchemaValidator;
use beneficiary_enrollment::logging;
use beneficiary_enrollment::repository::beneficiary_repo::BeneficiaryRepository;
use beneficiary_enrollment::repository::individual_repo::IndividualRepository;
use beneficiary_enrollment::repository::task_repo::{TaskCreator, TaskRepository};
use beneficiary_enrollment::repository::upload_repo::UploadRepository;
use serde_json::json;
use std::sync::Arc;
use test_helpers::{
    create_test_db, csv_file, seed_plan, set_config, test_user, upload_status, FailingTaskCreator,
    RecordingListener, StaticWorkflow,
};

const ALL_VALID: &str = "first_name,last_name,dob,email,age\n\
Ann,Lee,1990-01-01,ann@example.org,30\n\
Bob,Kim,1985-05-12,bob@example.org,41\n\
Cid,Ro,2001-11-30,cid@example.org,22\n";

// 第四行 age 非法
const ONE_INVALID: &str = "first_name,last_name,dob,email,age\n\
Ann,Lee,1990-01-01,ann@example.org,30\n\
Bob,Kim,1985-05-12,bob@example.org,41\n\
Cid,Ro,2001-11-30,cid@example.org,22\n\
Dee,Wu,1999-02-02,dee@example.org,abc\n";

struct Harness {
    conn: SharedConnection,
    orchestrator: ImportOrchestrator,
    workflow: BeneficiaryUploadWorkflow,
    update_workflow: BeneficiaryUploadWorkflow,
    ingestor: Arc<ValidItemsIngestor>,
    listener: Arc<RecordingListener>,
}

fn harness(conn: &SharedConnection, task_creator: Arc<dyn TaskCreator>) -> Harness {
    let events = Arc::new(EventBus::new());
    let listener = Arc::new(RecordingListener::default());
    events.register(listener.clone());

    let config: Arc<dyn EnrollmentConfigReader> =
        Arc::new(ConfigManager::from_connection(conn.clone()).expect("创建 ConfigManager 失败"));
    let ingestor = Arc::new(ValidItemsIngestor::new(conn.clone(), events.clone()));
    let task_gate = Arc::new(TaskGate::new(conn.clone(), task_creator, events.clone()));
    let registry = Arc::new(ValidatorRegistry::with_builtins());
    let workflow = BeneficiaryUploadWorkflow::new(
        conn.clone(),
        config.clone(),
        SchemaValidator::new(registry.clone()),
        task_gate.clone(),
        ingestor.clone(),
    );
    let update_workflow = BeneficiaryUploadWorkflow::for_updates(
        conn.clone(),
        config,
        SchemaValidator::new(registry),
        task_gate,
        ingestor.clone(),
    );

    Harness {
        conn: conn.clone(),
        orchestrator: ImportOrchestrator::new(conn.clone(), events),
        workflow,
        update_workflow,
        ingestor,
        listener,
    }
}

async fn run_import(h: &Harness, plan: &BenefitPlan, content: &str) -> ImportSummary {
    h.orchestrator
        .import(csv_file("people.csv", content), plan, &h.workflow, None, &test_user())
        .await
        .expect("导入失败")
}

async fn run_update(h: &Harness, plan: &BenefitPlan, content: &str) -> ImportSummary {
    h.orchestrator
        .import(csv_file("updates.csv", content), plan, &h.update_workflow, None, &test_user())
        .await
        .expect("导入失败")
}

fn individual(conn: &SharedConnection, id: &str) -> Individual {
    IndividualRepository::new(conn.clone())
        .find_by_id(id)
        .expect("查询个人失败")
        .expect("个人不存在")
}

fn beneficiaries(conn: &SharedConnection, plan: &BenefitPlan) -> Vec<beneficiary_enrollment::Beneficiary> {
    BeneficiaryRepository::new(conn.clone())
        .list_by_plan(EnrollmentKind::Individual, &plan.id)
        .expect("查询受益人失败")
}

#[tokio::test]
async fn test_all_valid_rows_are_ingested_directly() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-VALID", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));

    let summary = run_import(&h, &plan, ALL_VALID).await;
    assert!(summary.workflow_succeeded);

    let upload = UploadRepository::new(conn.clone())
        .find_by_id(&summary.upload_id)
        .expect("查询上传批次失败")
        .expect("上传批次不存在");
    assert_eq!(upload.status, UploadStatus::Success);
    assert_eq!(upload.error, json!({}));

    // 每行都写入了 validations（无错误也写空列表）
    let rows = UploadRepository::new(conn.clone())
        .list_rows(&summary.upload_id)
        .expect("查询原始行失败");
    assert!(rows.iter().all(|r| r.validations == json!({ "validation_errors": [] })));
    assert!(rows.iter().all(|r| r.individual_id.is_some()));

    let created = beneficiaries(&conn, &plan);
    assert_eq!(created.len(), 3);
    for b in &created {
        assert_eq!(b.status, BeneficiaryStatus::Potential);
        assert!(b.json_ext.get("email").is_some());
        assert!(b.json_ext.get("first_name").is_none());
        assert!(b.json_ext.get("dob").is_none());
    }

    let individual = IndividualRepository::new(conn.clone())
        .find_by_id(&created[0].member_id)
        .expect("查询个人失败")
        .expect("个人不存在");
    assert!(individual.json_ext.get("first_name").is_some());
    assert!(individual.dob.is_some());

    assert_eq!(h.listener.count(EnrollmentEventType::BeneficiaryCreated), 3);
}

#[tokio::test]
async fn test_invalid_rows_go_through_task_gate_then_verification() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-GATE", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));

    let summary = run_import(&h, &plan, ONE_INVALID).await;
    assert!(summary.workflow_succeeded);
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::WaitingForVerification);
    assert!(beneficiaries(&conn, &plan).is_empty());

    let record = {
        let guard = conn.lock().expect("获取连接锁失败");
        UploadRepository::find_record_tx(&guard, &summary.upload_id, &plan.id).expect("查询关联记录失败")
    }
    .expect("关联记录不存在");
    let tasks = TaskRepository::new(conn.clone())
        .list_by_entity("upload_record", &record.id)
        .expect("查询任务失败");
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.business_event, "import_valid_items");
    assert_eq!(task.json_ext["percentage_of_invalid_items"], json!(25.0));
    assert_eq!(task.json_ext["benefit_plan_code"], "P-GATE");
    assert_eq!(task.json_ext["source_name"], "people.csv");
    assert_eq!(task.json_ext["data_upload_id"], json!(summary.upload_id));

    // 审核通过 → 仅入库有效行
    let report = h
        .ingestor
        .complete_verification(&summary.upload_id, &plan.id, true, &test_user())
        .expect("审核回调失败")
        .expect("审核通过应返回入库结果");
    assert_eq!(report.beneficiaries_created, 3);
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Success);
    assert_eq!(beneficiaries(&conn, &plan).len(), 3);

    // 报表同步: 3 个个人 + 3 个受益人
    let synced = h
        .ingestor
        .synchronize_for_reporting(&summary.upload_id, &plan.id)
        .expect("报表同步失败");
    assert_eq!(synced, 6);
    for b in beneficiaries(&conn, &plan) {
        assert_eq!(b.json_ext["report_synch"], "true");
        assert_eq!(b.version, 2);
    }
}

#[tokio::test]
async fn test_rejected_verification_marks_fail() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-REJECT", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));

    let summary = run_import(&h, &plan, ONE_INVALID).await;
    let outcome = h
        .ingestor
        .complete_verification(&summary.upload_id, &plan.id, false, &test_user())
        .expect("审核回调失败");
    assert!(outcome.is_none());

    let upload = UploadRepository::new(conn.clone())
        .find_by_id(&summary.upload_id)
        .expect("查询上传批次失败")
        .expect("上传批次不存在");
    assert_eq!(upload.status, UploadStatus::Fail);
    assert_eq!(upload.error["verification"], "rejected");
    assert!(beneficiaries(&conn, &plan).is_empty());

    // 终态后不可再次审核
    assert!(h
        .ingestor
        .complete_verification(&summary.upload_id, &plan.id, true, &test_user())
        .is_err());
}

#[tokio::test]
async fn test_invalid_rows_without_maker_checker_ingest_valid_only() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    set_config(&conn, config_keys::MAKER_CHECKER_UPLOAD, "false");
    let plan = seed_plan(&conn, "P-DIRECT", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));

    let summary = run_import(&h, &plan, ONE_INVALID).await;
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Success);
    assert_eq!(beneficiaries(&conn, &plan).len(), 3);
    assert_eq!(TaskRepository::new(conn.clone()).count_all().expect("统计任务失败"), 0);

    let rows = UploadRepository::new(conn.clone())
        .list_rows(&summary.upload_id)
        .expect("查询原始行失败");
    let unlinked: Vec<_> = rows.iter().filter(|r| r.individual_id.is_none()).collect();
    assert_eq!(unlinked.len(), 1);
    assert!(!unlinked[0].is_valid());
}

#[tokio::test]
async fn test_header_violation_fails_workflow() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-HEADER", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));

    let summary = run_import(&h, &plan, "first_name,dob,shoe_size\nAnn,1990-01-01,42\n").await;
    assert!(!summary.workflow_succeeded);

    let upload = UploadRepository::new(conn.clone())
        .find_by_id(&summary.upload_id)
        .expect("查询上传批次失败")
        .expect("上传批次不存在");
    assert_eq!(upload.status, UploadStatus::Fail);
    let message = upload.error["workflow"].as_str().unwrap_or_default().to_string();
    assert!(message.contains("shoe_size"));
    assert!(message.contains("last_name"));
    assert_eq!(message.lines().count(), 2);
}

#[tokio::test]
async fn test_missing_required_value_blocks_ingestion() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-REQUIRED", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));

    let content = "first_name,last_name,dob,email,age\n\
Ann,Lee,1990-01-01,ann@example.org,30\n\
Bob,,1985-05-12,bob@example.org,41\n";
    let summary = run_import(&h, &plan, content).await;
    assert!(!summary.workflow_succeeded);

    let upload = UploadRepository::new(conn.clone())
        .find_by_id(&summary.upload_id)
        .expect("查询上传批次失败")
        .expect("上传批次不存在");
    assert_eq!(upload.status, UploadStatus::Fail);
    assert_eq!(upload.error["errors"]["error"], "Invalid entries");
    assert_eq!(
        upload.error["errors"]["failing_entries_last_name"]
            .as_array()
            .map(|a| a.len()),
        Some(1)
    );
    // 工作流失败原因合并写入，不覆盖错误块
    assert!(upload.error["workflow"].is_string());
    assert!(beneficiaries(&conn, &plan).is_empty());
}

#[tokio::test]
async fn test_task_gate_failure_leaves_status_unchanged() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-TASK-FAIL", None);
    let events = Arc::new(EventBus::new());
    let orchestrator = ImportOrchestrator::new(conn.clone(), events.clone());
    let workflow = StaticWorkflow::succeeding(&conn);

    let summary = orchestrator
        .import(csv_file("people.csv", ALL_VALID), &plan, &workflow, None, &test_user())
        .await
        .expect("导入失败");
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Triggered);

    let failing = TaskGate::new(conn.clone(), Arc::new(FailingTaskCreator), events.clone());
    assert!(failing
        .create_task(&summary.upload_id, &plan.id, "import_valid_items", &test_user())
        .is_err());
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Triggered);
    assert_eq!(TaskRepository::new(conn.clone()).count_all().expect("统计任务失败"), 0);

    // 未校验的批次: 无效占比为 0
    let gate = TaskGate::new(conn.clone(), Arc::new(TaskRepository::new(conn.clone())), events);
    let task = gate
        .create_task(&summary.upload_id, &plan.id, "import_valid_items", &test_user())
        .expect("投递任务失败");
    assert_eq!(task.json_ext["percentage_of_invalid_items"], json!(0.0));
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::WaitingForVerification);
}

#[tokio::test]
async fn test_revalidation_is_idempotent_and_flags_duplicates() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-UNIQUE", None);
    let orchestrator = ImportOrchestrator::new(conn.clone(), Arc::new(EventBus::new()));
    let workflow = StaticWorkflow::succeeding(&conn);

    let content = "first_name,last_name,dob,email,age\n\
Ann,Lee,1990-01-01,same@example.org,30\n\
Bob,Kim,1985-05-12,same@example.org,41\n\
Cid,Ro,2001-11-30,cid@example.org,22\n";
    let summary = orchestrator
        .import(csv_file("people.csv", content), &plan, &workflow, None, &test_user())
        .await
        .expect("导入失败");

    let validator = SchemaValidator::new(Arc::new(ValidatorRegistry::with_builtins()));
    let annotator = ErrorAnnotator::new(conn.clone());
    let repo = UploadRepository::new(conn.clone());

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let rows = repo.list_rows(&summary.upload_id).expect("查询原始行失败");
        let outcomes = validator.validate(&rows, &plan.data_schema());
        assert_eq!(annotator.save_errors(&outcomes).expect("写入校验结果失败"), 3);
        let saved: Vec<_> = repo
            .list_rows(&summary.upload_id)
            .expect("查询原始行失败")
            .into_iter()
            .map(|r| r.validations)
            .collect();
        snapshots.push(saved);
    }
    assert_eq!(snapshots[0], snapshots[1]);

    let flags: Vec<usize> = snapshots[0]
        .iter()
        .map(|v| v["validation_errors"].as_array().map(|a| a.len()).unwrap_or(0))
        .collect();
    assert_eq!(flags, vec![1, 1, 0]);
}

#[tokio::test]
async fn test_update_upload_waits_for_verification_then_applies() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-UPDATE-GATE", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));
    run_import(&h, &plan, ALL_VALID).await;
    let existing = beneficiaries(&conn, &plan);
    let target = &existing[0];
    let before = individual(&conn, &target.member_id);

    // 空单元格（first_name）保持原值
    let content = format!("id,first_name,last_name,email,age\n{},,Park,park@example.org,31\n", target.member_id);
    let summary = run_update(&h, &plan, &content).await;
    assert!(summary.workflow_succeeded);
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::WaitingForVerification);
    assert_eq!(individual(&conn, &target.member_id).last_name, before.last_name);

    let record = {
        let guard = conn.lock().expect("获取连接锁失败");
        UploadRepository::find_record_tx(&guard, &summary.upload_id, &plan.id).expect("查询关联记录失败")
    }
    .expect("关联记录不存在");
    assert_eq!(record.workflow, BeneficiaryUploadWorkflow::NAME_UPDATE);
    let tasks = TaskRepository::new(conn.clone())
        .list_by_entity("upload_record", &record.id)
        .expect("查询任务失败");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].business_event, "update_valid_items");

    let report = h
        .ingestor
        .complete_update_verification(&summary.upload_id, &plan.id, true, &test_user())
        .expect("审核回调失败")
        .expect("审核通过应返回更新结果");
    assert_eq!(report.individuals_updated, 1);
    assert_eq!(report.beneficiaries_updated, 1);
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Success);

    let after = individual(&conn, &target.member_id);
    assert_eq!(after.first_name, before.first_name);
    assert_eq!(after.last_name, "Park");
    assert_eq!(after.dob, before.dob);
    assert_eq!(after.json_ext["email"], "park@example.org");
    assert_eq!(after.version, before.version + 1);

    let updated = beneficiaries(&conn, &plan)
        .into_iter()
        .find(|b| b.id == target.id)
        .expect("受益人不存在");
    assert_eq!(updated.json_ext["email"], "park@example.org");
    assert!(updated.json_ext.get("id").is_none());
    assert!(updated.json_ext.get("last_name").is_none());
    assert_eq!(beneficiaries(&conn, &plan).len(), 3);
    assert_eq!(h.listener.count(EnrollmentEventType::BeneficiaryUpdated), 1);
}

#[tokio::test]
async fn test_update_upload_without_maker_checker_applies_directly() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    set_config(&conn, config_keys::MAKER_CHECKER_UPDATE, "false");
    let plan = seed_plan(&conn, "P-UPDATE-DIRECT", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));
    run_import(&h, &plan, ALL_VALID).await;
    let existing = beneficiaries(&conn, &plan);

    let content = format!(
        "id,last_name,email,age\n{},Park,park@example.org,31\n{},Moon,moon@example.org,-4\n",
        existing[0].member_id, existing[1].member_id
    );
    let summary = run_update(&h, &plan, &content).await;
    assert!(summary.workflow_succeeded);
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Success);
    assert_eq!(TaskRepository::new(conn.clone()).count_all().expect("统计任务失败"), 0);

    // 仅有效行被更新
    assert_eq!(individual(&conn, &existing[0].member_id).last_name, "Park");
    assert_ne!(individual(&conn, &existing[1].member_id).last_name, "Moon");

    let rows = UploadRepository::new(conn.clone())
        .list_rows(&summary.upload_id)
        .expect("查询原始行失败");
    assert_eq!(rows.iter().filter(|r| r.individual_id.is_some()).count(), 1);
}

#[tokio::test]
async fn test_update_upload_with_unknown_id_fails_whole_batch() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    set_config(&conn, config_keys::MAKER_CHECKER_UPDATE, "false");
    let plan = seed_plan(&conn, "P-UPDATE-UNKNOWN", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));
    run_import(&h, &plan, ALL_VALID).await;
    let existing = beneficiaries(&conn, &plan);

    let content = format!(
        "id,last_name,email,age\n{},Park,park@example.org,31\nno-such-person,Moon,moon@example.org,20\n",
        existing[0].member_id
    );
    let summary = run_update(&h, &plan, &content).await;
    assert!(!summary.workflow_succeeded);

    let upload = UploadRepository::new(conn.clone())
        .find_by_id(&summary.upload_id)
        .expect("查询上传批次失败")
        .expect("上传批次不存在");
    assert_eq!(upload.status, UploadStatus::Fail);
    assert_eq!(
        upload.error["errors"]["failing_entries_id"]
            .as_array()
            .map(|a| a.len()),
        Some(1)
    );
    assert_ne!(individual(&conn, &existing[0].member_id).last_name, "Park");
}

#[tokio::test]
async fn test_update_upload_requires_id_column() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-UPDATE-HEADER", None);
    let h = harness(&conn, Arc::new(TaskRepository::new(conn.clone())));

    let summary = run_update(&h, &plan, "last_name,email\nPark,park@example.org\n").await;
    assert!(!summary.workflow_succeeded);
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Fail);
}

#[tokio::test]
async fn test_commit_failure_marks_upload_fail() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-COMMIT-FAIL", None);
    let events = Arc::new(EventBus::new());
    let orchestrator = ImportOrchestrator::new(conn.clone(), events.clone());
    let workflow = StaticWorkflow::succeeding(&conn);

    let summary = orchestrator
        .import(csv_file("people.csv", ALL_VALID), &plan, &workflow, None, &test_user())
        .await
        .expect("导入失败");
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Triggered);

    // 延迟外键: 语句执行成功，COMMIT 时才报错
    {
        let guard = conn.lock().expect("获取连接锁失败");
        guard
            .execute_batch(
                r#"
                CREATE TABLE ingest_audit (
                    individual_id TEXT REFERENCES individual(id) DEFERRABLE INITIALLY DEFERRED
                );
                CREATE TRIGGER beneficiary_audit AFTER INSERT ON beneficiary
                BEGIN
                    INSERT INTO ingest_audit (individual_id) VALUES ('missing');
                END;
                "#,
            )
            .expect("创建触发器失败");
    }

    let ingestor = ValidItemsIngestor::new(conn.clone(), events);
    assert!(ingestor
        .ingest(&summary.upload_id, &plan.id, false, &test_user())
        .is_err());

    let upload = UploadRepository::new(conn.clone())
        .find_by_id(&summary.upload_id)
        .expect("查询上传批次失败")
        .expect("上传批次不存在");
    assert_eq!(upload.status, UploadStatus::Fail);
    assert!(upload.error["errors"]["error"].is_string());
    assert_eq!(upload.error["errors"]["upload_id"], json!(summary.upload_id));
    assert!(beneficiaries(&conn, &plan).is_empty());

    let rows = UploadRepository::new(conn.clone())
        .list_rows(&summary.upload_id)
        .expect("查询原始行失败");
    assert!(rows.iter().all(|r| r.individual_id.is_none()));
}
