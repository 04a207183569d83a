// ==========================================
// 受益人登记系统 - 受益方案仓储
// ==========================================
// 职责: benefit_plan 表读写
// ==========================================

use crate::db::SharedConnection;
use crate::domain::benefit_plan::BenefitPlan;
use crate::repository::error::{parse_json_column, RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub struct BenefitPlanRepository {
    conn: SharedConnection,
}

impl BenefitPlanRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, plan: &BenefitPlan) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, plan)
    }

    pub fn find_by_id(&self, plan_id: &str) -> RepositoryResult<Option<BenefitPlan>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, plan_id)
    }

    pub fn find_by_code(&self, code: &str) -> RepositoryResult<Option<BenefitPlan>> {
        let conn = self.get_conn()?;
        let plan = conn
            .query_row(
                r#"
                SELECT id, code, name, max_beneficiaries, beneficiary_data_schema, is_deleted
                FROM benefit_plan WHERE code = ?1 AND is_deleted = 0
                "#,
                params![code],
                map_plan_row,
            )
            .optional()?;
        Ok(plan)
    }

    pub fn insert_tx(conn: &Connection, plan: &BenefitPlan) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO benefit_plan (id, code, name, max_beneficiaries, beneficiary_data_schema, is_deleted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                plan.id,
                plan.code,
                plan.name,
                plan.max_beneficiaries,
                serde_json::to_string(&plan.beneficiary_data_schema)?,
                plan.is_deleted as i32,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id_tx(conn: &Connection, plan_id: &str) -> RepositoryResult<Option<BenefitPlan>> {
        let plan = conn
            .query_row(
                r#"
                SELECT id, code, name, max_beneficiaries, beneficiary_data_schema, is_deleted
                FROM benefit_plan WHERE id = ?1
                "#,
                params![plan_id],
                map_plan_row,
            )
            .optional()?;
        Ok(plan)
    }

    /// 查询方案，不存在时返回 NotFound
    pub fn get_tx(conn: &Connection, plan_id: &str) -> RepositoryResult<BenefitPlan> {
        Self::find_by_id_tx(conn, plan_id)?
            .ok_or_else(|| RepositoryError::not_found("BenefitPlan", plan_id))
    }
}

fn map_plan_row(row: &Row) -> rusqlite::Result<BenefitPlan> {
    let schema: String = row.get(4)?;
    Ok(BenefitPlan {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        max_beneficiaries: row.get(3)?,
        beneficiary_data_schema: parse_json_column(&schema),
        is_deleted: row.get::<_, i32>(5)? != 0,
    })
}
