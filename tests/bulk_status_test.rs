// ==========================================
// 批量状态更新与方案上限集成测试
// ==========================================
// 测试目标: 全有或全无、逐条失败原因、ACTIVE 上限、审批任务路径
// ==========================================


use beneficiary_enrollment::config::{config_keys, ConfigManager, EnrollmentConfigReader};
use beneficiary_enrollment::db::SharedConnection;
use beneficiary_enrollment::domain::beneficiary::{BeneficiaryUpdate, NewBeneficiary};
use beneficiary_enrollment::domain::types::{BeneficiaryStatus, EnrollmentKind};
use beneficiary_enrollment::engine::beneficiary_service::{would_exceed_max_active_tx, BeneficiaryService};
use beneficiary_enrollment::engine::bulk_status::{BulkStatusTransactor, BULK_REASON_KEY};
use beneficiary_enrollment::engine::error::EngineError;
use beneficiary_enrollment::engine::events::{EnrollmentEventType, EventBus};
use beneficiary_enrollment::logging;
use beneficiary_enrollment::repository::task_repo::{TaskCreator, TaskRepository};
use serde_json::json;
use std::sync::Arc;
use test_helpers::{
    create_test_db, find_beneficiary, seed_beneficiary, seed_group, seed_individual, seed_plan,
    set_config, test_user, RecordingListener,
};

fn transactor(conn: &SharedConnection, events: Arc<EventBus>) -> BulkStatusTransactor {
    let config: Arc<dyn EnrollmentConfigReader> =
        Arc::new(ConfigManager::from_connection(conn.clone()).expect("创建 ConfigManager 失败"));
    let task_creator: Arc<dyn TaskCreator> = Arc::new(TaskRepository::new(conn.clone()));
    BulkStatusTransactor::new(conn.clone(), config, task_creator, events)
}

fn seed_individuals(conn: &SharedConnection, plan_id: &str, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let person = seed_individual(conn, &format!("P{}", i));
            seed_beneficiary(conn, EnrollmentKind::Individual, &person.id, plan_id, BeneficiaryStatus::Potential).id
        })
        .collect()
}

#[test]
fn test_bulk_update_commits_every_item() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-BULK", None);
    let ids = seed_individuals(&conn, &plan.id, 3);

    let events = Arc::new(EventBus::new());
    let listener = Arc::new(RecordingListener::default());
    events.register(listener.clone());

    let report = transactor(&conn, events)
        .apply(EnrollmentKind::Individual, &ids, BeneficiaryStatus::Active, Some("moved to phase 2"), &test_user())
        .expect("批量更新失败");

    assert!(report.is_success());
    assert_eq!(report.updated_count, 3);
    assert!(report.task_ids.is_empty());
    for id in &ids {
        let b = find_beneficiary(&conn, EnrollmentKind::Individual, id);
        assert_eq!(b.status, BeneficiaryStatus::Active);
        assert_eq!(b.json_ext[BULK_REASON_KEY], "moved to phase 2");
    }
    assert_eq!(listener.count(EnrollmentEventType::BeneficiaryUpdated), 3);
}

#[test]
fn test_single_failure_rolls_back_whole_batch() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-ATOMIC", None);
    let mut ids = seed_individuals(&conn, &plan.id, 2);
    ids.insert(1, "missing-id".to_string());

    let events = Arc::new(EventBus::new());
    let listener = Arc::new(RecordingListener::default());
    events.register(listener.clone());

    let report = transactor(&conn, events)
        .apply(EnrollmentKind::Individual, &ids, BeneficiaryStatus::Validated, Some(r#"{"ticket": "T-1"}"#), &test_user())
        .expect("批量更新不应返回 Err");

    assert!(!report.is_success());
    assert_eq!(report.updated_count, 0);
    assert_eq!(report.failed_count, 1);
    assert!(report.details().contains("missing-id"));

    // 先于失败项处理的记录也未被写入
    for id in [&ids[0], &ids[2]] {
        let b = find_beneficiary(&conn, EnrollmentKind::Individual, id);
        assert_eq!(b.status, BeneficiaryStatus::Potential);
        assert!(b.json_ext.get("ticket").is_none());
        assert_eq!(b.version, 1);
    }
    assert!(listener.types().is_empty());
}

#[test]
fn test_empty_ids_rejected() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let result = transactor(&conn, Arc::new(EventBus::new())).apply(
        EnrollmentKind::Group,
        &[],
        BeneficiaryStatus::Active,
        None,
        &test_user(),
    );
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));
}

#[test]
fn test_max_active_ceiling() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    let plan = seed_plan(&conn, "P-CEILING", Some(1));
    let a = seed_individual(&conn, "A");
    let b = seed_individual(&conn, "B");
    let a_id = seed_beneficiary(&conn, EnrollmentKind::Individual, &a.id, &plan.id, BeneficiaryStatus::Active).id;
    let b_id = seed_beneficiary(&conn, EnrollmentKind::Individual, &b.id, &plan.id, BeneficiaryStatus::Potential).id;

    let service = BeneficiaryService::new(
        EnrollmentKind::Individual,
        conn.clone(),
        Arc::new(EventBus::new()),
        Arc::new(TaskRepository::new(conn.clone())),
    );

    // B → ACTIVE 超过上限
    let result = service.update(
        BeneficiaryUpdate {
            id: b_id.clone(),
            status: Some(BeneficiaryStatus::Active),
            json_ext: None,
        },
        &test_user(),
    );
    assert!(matches!(result, Err(EngineError::CapacityExceeded { max: 1, .. })));

    // A 重新保存为 ACTIVE 不计自身
    let saved = service
        .update(
            BeneficiaryUpdate {
                id: a_id.clone(),
                status: Some(BeneficiaryStatus::Active),
                json_ext: Some(json!({ "note": "re-saved" })),
            },
            &test_user(),
        )
        .expect("重新保存 A 失败");
    assert_eq!(saved.version, 2);

    // 新建 ACTIVE 同样受限，新建 POTENTIAL 不受限
    let c = seed_individual(&conn, "C");
    let new_active = NewBeneficiary {
        member_id: c.id.clone(),
        benefit_plan_id: plan.id.clone(),
        status: BeneficiaryStatus::Active,
        json_ext: json!({}),
    };
    assert!(matches!(
        service.create(new_active.clone(), &test_user()),
        Err(EngineError::CapacityExceeded { .. })
    ));
    assert!(service
        .create(NewBeneficiary { status: BeneficiaryStatus::Potential, ..new_active }, &test_user())
        .is_ok());

    {
        let guard = conn.lock().expect("获取连接锁失败");
        let existing = find_beneficiary_tx(&guard, &a_id);
        assert!(!would_exceed_max_active_tx(
            &guard,
            EnrollmentKind::Individual,
            &plan,
            BeneficiaryStatus::Active,
            Some(&existing)
        )
        .expect("上限检查失败"));
        assert!(would_exceed_max_active_tx(&guard, EnrollmentKind::Individual, &plan, BeneficiaryStatus::Active, None)
            .expect("上限检查失败"));
    }

    // 批量 [A, B] → ACTIVE: B 失败，整体回滚
    let report = transactor(&conn, Arc::new(EventBus::new()))
        .apply(
            EnrollmentKind::Individual,
            &[a_id.clone(), b_id.clone()],
            BeneficiaryStatus::Active,
            None,
            &test_user(),
        )
        .expect("批量更新不应返回 Err");
    assert!(!report.is_success());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains(&b_id));
    assert_eq!(find_beneficiary(&conn, EnrollmentKind::Individual, &a_id).version, 2);
    assert_eq!(
        find_beneficiary(&conn, EnrollmentKind::Individual, &b_id).status,
        BeneficiaryStatus::Potential
    );
}

fn find_beneficiary_tx(conn: &rusqlite::Connection, id: &str) -> beneficiary_enrollment::Beneficiary {
    beneficiary_enrollment::repository::beneficiary_repo::BeneficiaryRepository::find_by_id_tx(
        conn,
        EnrollmentKind::Individual,
        id,
    )
    .expect("查询受益人失败")
    .expect("受益人不存在")
}

#[test]
fn test_group_bulk_update_via_task_pathway() {
    logging::init_test();
    let (_tmp, conn) = create_test_db().expect("创建测试数据库失败");
    set_config(&conn, config_keys::CHECK_GROUP_BENEFICIARY_CRUD, "true");
    let plan = seed_plan(&conn, "P-TASKS", None);
    let ids: Vec<String> = ["G1", "G2"]
        .iter()
        .map(|code| {
            let group = seed_group(&conn, code);
            seed_beneficiary(&conn, EnrollmentKind::Group, &group.id, &plan.id, BeneficiaryStatus::Potential).id
        })
        .collect();

    let report = transactor(&conn, Arc::new(EventBus::new()))
        .apply(EnrollmentKind::Group, &ids, BeneficiaryStatus::Suspended, Some("audit"), &test_user())
        .expect("批量更新失败");

    assert!(report.is_success());
    assert_eq!(report.task_ids.len(), 2);

    let tasks = TaskRepository::new(conn.clone());
    for id in &ids {
        // 记录本身保持不变
        let b = find_beneficiary(&conn, EnrollmentKind::Group, id);
        assert_eq!(b.status, BeneficiaryStatus::Potential);

        let queued = tasks.list_by_entity("group_beneficiary", id).expect("查询任务失败");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].business_event, "group_beneficiary_service.update");
        assert_eq!(queued[0].data["status"], "SUSPENDED");
        assert_eq!(queued[0].data["json_ext"][BULK_REASON_KEY], "audit");
    }
}
