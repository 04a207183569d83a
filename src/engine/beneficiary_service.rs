// ==========================================
// 受益人登记系统 - 受益人服务
// ==========================================
// 职责: 受益人/群组受益人的新建、更新、软删除、变更审批任务
// 红线: ACTIVE 数量不超过方案上限（按记录自身所属方案计数，更新时不计自身）
// 事件: 仅在事务提交后派发
// 说明: *_tx 关联函数不派发事件，供批量事务组合使用
// ==========================================

use crate::db::SharedConnection;
use crate::domain::benefit_plan::BenefitPlan;
use crate::domain::beneficiary::{Beneficiary, BeneficiaryUpdate, NewBeneficiary, UserContext};
use crate::domain::task::{NewTask, Task};
use crate::domain::types::{BeneficiaryStatus, EnrollmentKind};
use crate::engine::error::{lock_error, EngineError, EngineResult};
use crate::engine::events::{EnrollmentEvent, EnrollmentEventType, EventBus};
use crate::repository::benefit_plan_repo::BenefitPlanRepository;
use crate::repository::beneficiary_repo::BeneficiaryRepository;
use crate::repository::task_repo::TaskCreator;
use rusqlite::Connection;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

// ==========================================
// 容量上限检查
// ==========================================

/// 写入后是否会超过方案上限
///
/// # 规则
/// - 仅目标状态为 ACTIVE 且方案设置了上限时检查
/// - existing 为被更新的记录；若其本身已是 ACTIVE，不计入已有数量
pub fn would_exceed_max_active_tx(
    conn: &Connection,
    kind: EnrollmentKind,
    plan: &BenefitPlan,
    target_status: BeneficiaryStatus,
    existing: Option<&Beneficiary>,
) -> EngineResult<bool> {
    if !target_status.counts_against_ceiling() {
        return Ok(false);
    }
    let max = match plan.max_beneficiaries {
        Some(max) => max,
        None => return Ok(false),
    };

    let mut active = BeneficiaryRepository::count_active_tx(conn, kind, &plan.id)?;
    if existing
        .map(|b| !b.is_deleted && b.status.counts_against_ceiling())
        .unwrap_or(false)
    {
        active -= 1;
    }

    debug!(
        benefit_plan_id = %plan.id,
        active,
        max,
        "容量上限检查"
    );
    Ok(active >= max)
}

fn ensure_capacity_tx(
    conn: &Connection,
    kind: EnrollmentKind,
    plan: &BenefitPlan,
    target_status: BeneficiaryStatus,
    existing: Option<&Beneficiary>,
) -> EngineResult<()> {
    if would_exceed_max_active_tx(conn, kind, plan, target_status, existing)? {
        return Err(EngineError::CapacityExceeded {
            plan_code: plan.code.clone(),
            max: plan.max_beneficiaries.unwrap_or_default(),
        });
    }
    Ok(())
}

// ==========================================
// BeneficiaryService
// ==========================================
pub struct BeneficiaryService {
    kind: EnrollmentKind,
    conn: SharedConnection,
    events: Arc<EventBus>,
    task_creator: Arc<dyn TaskCreator>,
}

impl BeneficiaryService {
    pub fn new(
        kind: EnrollmentKind,
        conn: SharedConnection,
        events: Arc<EventBus>,
        task_creator: Arc<dyn TaskCreator>,
    ) -> Self {
        Self {
            kind,
            conn,
            events,
            task_creator,
        }
    }

    pub fn kind(&self) -> EnrollmentKind {
        self.kind
    }

    pub fn task_creator(&self) -> Arc<dyn TaskCreator> {
        self.task_creator.clone()
    }

    /// 审批任务的业务事件名（"<服务>.<动作>"）
    pub fn business_event(kind: EnrollmentKind, action: &str) -> String {
        format!("{}.{}", kind.service_name(), action)
    }

    pub fn update_business_event(kind: EnrollmentKind) -> String {
        Self::business_event(kind, "update")
    }

    // ===== 单独调用（自带事务 + 事件派发）=====

    pub fn create(&self, new: NewBeneficiary, user: &UserContext) -> EngineResult<Beneficiary> {
        let created = {
            let conn = self.conn.lock().map_err(lock_error)?;
            let tx = conn.unchecked_transaction()?;
            let created = Self::create_tx(&tx, self.kind, &new)?;
            tx.commit()?;
            created
        };

        info!(
            beneficiary_id = %created.id,
            benefit_plan_id = %created.benefit_plan_id,
            status = %created.status,
            user = %user.username,
            "{} 已创建",
            self.kind.label()
        );
        self.publish(EnrollmentEventType::created(self.kind), &created);
        Ok(created)
    }

    pub fn update(&self, update: BeneficiaryUpdate, user: &UserContext) -> EngineResult<Beneficiary> {
        let saved = {
            let conn = self.conn.lock().map_err(lock_error)?;
            let tx = conn.unchecked_transaction()?;
            let saved = Self::update_tx(&tx, self.kind, &update)?;
            tx.commit()?;
            saved
        };

        info!(
            beneficiary_id = %saved.id,
            status = %saved.status,
            user = %user.username,
            "{} 已更新",
            self.kind.label()
        );
        self.publish(EnrollmentEventType::updated(self.kind), &saved);
        Ok(saved)
    }

    pub fn delete(&self, id: &str, user: &UserContext) -> EngineResult<()> {
        let existing = {
            let conn = self.conn.lock().map_err(lock_error)?;
            let tx = conn.unchecked_transaction()?;
            let existing = BeneficiaryRepository::find_by_id_tx(&tx, self.kind, id)?
                .ok_or_else(|| EngineError::NotFound(format!("{}(id={})", self.kind.label(), id)))?;
            BeneficiaryRepository::soft_delete_tx(&tx, self.kind, id)?;
            tx.commit()?;
            existing
        };

        info!(beneficiary_id = %id, user = %user.username, "{} 已删除", self.kind.label());
        self.publish(EnrollmentEventType::deleted(self.kind), &existing);
        Ok(())
    }

    // ===== 审批任务（投递任务，不修改记录）=====

    pub fn create_create_task(&self, new: NewBeneficiary, user: &UserContext) -> EngineResult<Task> {
        let kind = self.kind;
        self.queue_task(user, |conn| {
            // 方案须存在；上限在审批执行时再检查
            BenefitPlanRepository::get_tx(conn, &new.benefit_plan_id)?;
            Ok(NewTask {
                source: kind.service_name().to_string(),
                entity_type: kind.table().to_string(),
                entity_id: new.member_id.clone(),
                business_event: Self::business_event(kind, "create"),
                json_ext: json!({}),
                data: serde_json::to_value(&new)?,
            })
        })
    }

    pub fn create_update_task(
        &self,
        update: BeneficiaryUpdate,
        user: &UserContext,
    ) -> EngineResult<Task> {
        let kind = self.kind;
        let task_creator = self.task_creator.clone();
        self.queue_task_with(|conn| {
            Self::create_update_task_tx(conn, kind, task_creator.as_ref(), &update, user)
        })
    }

    pub fn create_delete_task(&self, id: &str, user: &UserContext) -> EngineResult<Task> {
        let kind = self.kind;
        self.queue_task(user, |conn| {
            if BeneficiaryRepository::find_by_id_tx(conn, kind, id)?.is_none() {
                return Err(EngineError::NotFound(format!("{}(id={})", kind.label(), id)));
            }
            Ok(NewTask {
                source: kind.service_name().to_string(),
                entity_type: kind.table().to_string(),
                entity_id: id.to_string(),
                business_event: Self::business_event(kind, "delete"),
                json_ext: json!({}),
                data: json!({ "id": id }),
            })
        })
    }

    fn queue_task<F>(&self, user: &UserContext, build: F) -> EngineResult<Task>
    where
        F: FnOnce(&Connection) -> EngineResult<NewTask>,
    {
        let task_creator = self.task_creator.clone();
        self.queue_task_with(|conn| {
            let new_task = build(conn)?;
            Ok(task_creator.create_task_tx(conn, new_task, &user.user_id)?)
        })
    }

    /// 单事务投递，提交后派发 TaskCreated
    fn queue_task_with<F>(&self, create: F) -> EngineResult<Task>
    where
        F: FnOnce(&Connection) -> EngineResult<Task>,
    {
        let task = {
            let conn = self.conn.lock().map_err(lock_error)?;
            let tx = conn.unchecked_transaction()?;
            let task = create(&tx)?;
            tx.commit()?;
            task
        };

        info!(
            task_id = %task.id,
            business_event = %task.business_event,
            "{} 审批任务已投递",
            self.kind.label()
        );
        self.events.publish(
            EnrollmentEvent::new(
                EnrollmentEventType::TaskCreated,
                &task.id,
                json!({ "entity_id": task.entity_id, "business_event": task.business_event }),
            )
            .with_source(self.kind.service_name()),
        );
        Ok(task)
    }

    // ===== 事务内调用 =====

    pub fn create_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        new: &NewBeneficiary,
    ) -> EngineResult<Beneficiary> {
        let plan = BenefitPlanRepository::get_tx(conn, &new.benefit_plan_id)?;
        ensure_capacity_tx(conn, kind, &plan, new.status, None)?;
        Ok(BeneficiaryRepository::insert_tx(conn, kind, new)?)
    }

    pub fn update_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        update: &BeneficiaryUpdate,
    ) -> EngineResult<Beneficiary> {
        let existing = BeneficiaryRepository::find_by_id_tx(conn, kind, &update.id)?
            .ok_or_else(|| EngineError::NotFound(format!("{}(id={})", kind.label(), update.id)))?;

        let mut next = existing.clone();
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(json_ext) = &update.json_ext {
            next.json_ext = json_ext.clone();
        }

        // 方案取自记录本身
        let plan = BenefitPlanRepository::get_tx(conn, &existing.benefit_plan_id)?;
        ensure_capacity_tx(conn, kind, &plan, next.status, Some(&existing))?;

        Ok(BeneficiaryRepository::update_tx(conn, &next)?)
    }

    pub fn create_update_task_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        task_creator: &dyn TaskCreator,
        update: &BeneficiaryUpdate,
        user: &UserContext,
    ) -> EngineResult<Task> {
        if BeneficiaryRepository::find_by_id_tx(conn, kind, &update.id)?.is_none() {
            return Err(EngineError::NotFound(format!("{}(id={})", kind.label(), update.id)));
        }

        let task = NewTask {
            source: kind.service_name().to_string(),
            entity_type: kind.table().to_string(),
            entity_id: update.id.clone(),
            business_event: Self::update_business_event(kind),
            json_ext: json!({}),
            data: serde_json::to_value(update)?,
        };
        Ok(task_creator.create_task_tx(conn, task, &user.user_id)?)
    }

    /// 提交后派发变更事件
    pub fn publish(&self, event_type: EnrollmentEventType, beneficiary: &Beneficiary) {
        publish_change(&self.events, event_type, beneficiary);
    }
}

pub(crate) fn publish_change(
    events: &EventBus,
    event_type: EnrollmentEventType,
    beneficiary: &Beneficiary,
) {
    events.publish(
        EnrollmentEvent::new(
            event_type,
            &beneficiary.id,
            json!({
                "benefit_plan_id": beneficiary.benefit_plan_id,
                "member_id": beneficiary.member_id,
                "status": beneficiary.status.as_str(),
            }),
        )
        .with_source(beneficiary.kind.service_name()),
    );
}
