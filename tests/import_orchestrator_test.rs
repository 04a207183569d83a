// ==========================================
// ImportOrchestrator 集成测试
// ==========================================
// 测试目标: 落库完整性、TRIGGERED 先于工作流、工作流失败补写 FAIL
// ==========================================


use beneficiary_enrollment::domain::types::UploadStatus;
use beneficiary_enrollment::engine::events::{EnrollmentEventType, EventBus};
use beneficiary_enrollment::importer::beneficiary_importer::ImportOrchestrator;
use beneficiary_enrollment::importer::error::ImportError;
use beneficiary_enrollment::importer::file_parser::ImportFile;
use beneficiary_enrollment::logging;
use beneficiary_enrollment::repository::upload_repo::UploadRepository;
use std::sync::Arc;
use test_helpers::{
    create_test_db, csv_file, seed_plan, test_user, upload_status, RecordingListener,
    StaticWorkflow,
};

const THREE_ROWS: &str = "first_name,last_name,dob,email,age\n\
Ann,Lee,1990-01-01,ann@example.org,30\n\
Bob,Kim,1985-05-12,bob@example.org,41\n\
Cid,Ro,2001-11-30,cid@example.org,22\n";

fn count_uploads(conn: &beneficiary_enrollment::db::SharedConnection) -> i64 {
    let guard = conn.lock().expect("获取连接锁失败");
    guard
        .query_row("SELECT COUNT(*) FROM data_source_upload", [], |row| row.get(0))
        .expect("统计上传批次失败")
}

#[tokio::test]
async fn test_import_persists_every_row_and_triggers_before_workflow() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-IMPORT", None);

    let events = Arc::new(EventBus::new());
    let listener = Arc::new(RecordingListener::default());
    events.register(listener.clone());

    let orchestrator = ImportOrchestrator::new(conn.clone(), events);
    let workflow = StaticWorkflow::succeeding(&conn);

    let summary = orchestrator
        .import(csv_file("people.csv", THREE_ROWS), &plan, &workflow, Some("household"), &test_user())
        .await
        .expect("导入失败");

    assert_eq!(summary.row_count, 3);
    assert!(summary.workflow_succeeded);

    let repo = UploadRepository::new(conn.clone());
    assert_eq!(repo.count_rows(&summary.upload_id).expect("统计行数失败"), 3);

    // 工作流被调用时状态已是 TRIGGERED
    assert_eq!(workflow.observed_status(), Some(UploadStatus::Triggered));
    assert_eq!(upload_status(&conn, &summary.upload_id), UploadStatus::Triggered);

    // 关联记录与批次同一事务写入
    let record = {
        let guard = conn.lock().expect("获取连接锁失败");
        UploadRepository::find_record_tx(&guard, &summary.upload_id, &plan.id).expect("查询关联记录失败")
    }
    .expect("关联记录不存在");
    assert_eq!(record.workflow, "static_test_workflow");
    assert_eq!(record.json_ext["group_aggregation_column"], "household");

    assert_eq!(listener.types(), vec![EnrollmentEventType::ImportTriggered]);
}

#[tokio::test]
async fn test_unsupported_format_rejected_without_persistence() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-FORMAT", None);
    let orchestrator = ImportOrchestrator::new(conn.clone(), Arc::new(EventBus::new()));
    let workflow = StaticWorkflow::succeeding(&conn);

    let file = ImportFile::new("people.txt", "text/plain", THREE_ROWS.as_bytes().to_vec());
    let result = orchestrator.import(file, &plan, &workflow, None, &test_user()).await;

    assert!(matches!(result, Err(ImportError::UnsupportedFormat(_))));
    assert_eq!(count_uploads(&conn), 0);
    assert_eq!(workflow.observed_status(), None);
}

#[tokio::test]
async fn test_empty_file_rejected_without_persistence() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-EMPTY", None);
    let orchestrator = ImportOrchestrator::new(conn.clone(), Arc::new(EventBus::new()));
    let workflow = StaticWorkflow::succeeding(&conn);

    let result = orchestrator
        .import(csv_file("empty.csv", "first_name,last_name,dob\n"), &plan, &workflow, None, &test_user())
        .await;

    assert!(matches!(result, Err(ImportError::EmptyInput(_))));
    assert_eq!(count_uploads(&conn), 0);
}

#[tokio::test]
async fn test_workflow_failure_marks_fail_and_keeps_rows() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-WF-FAIL", None);

    let events = Arc::new(EventBus::new());
    let listener = Arc::new(RecordingListener::default());
    events.register(listener.clone());
    let orchestrator = ImportOrchestrator::new(conn.clone(), events);

    for workflow in [
        StaticWorkflow::reporting_failure(&conn),
        StaticWorkflow::erroring(&conn, "工作流服务超时"),
    ] {
        let summary = orchestrator
            .import(csv_file("people.csv", THREE_ROWS), &plan, &workflow, None, &test_user())
            .await
            .expect("导入本身不应失败");

        assert!(!summary.workflow_succeeded);

        let upload = UploadRepository::new(conn.clone())
            .find_by_id(&summary.upload_id)
            .expect("查询上传批次失败")
            .expect("上传批次不存在");
        assert_eq!(upload.status, UploadStatus::Fail);
        assert!(upload.error["workflow"].is_string());
        assert_eq!(
            UploadRepository::new(conn.clone()).count_rows(&summary.upload_id).expect("统计行数失败"),
            3
        );
    }

    assert_eq!(listener.count(EnrollmentEventType::UploadStatusChanged), 2);
}
