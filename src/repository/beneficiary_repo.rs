// ==========================================
// 受益人登记系统 - 受益人仓储
// ==========================================
// 职责: beneficiary / group_beneficiary 两张表的读写
// 说明: 两张表结构一致，仅成员外键列不同，通过 EnrollmentKind 选择
// ==========================================

use crate::db::SharedConnection;
use crate::domain::beneficiary::{Beneficiary, NewBeneficiary};
use crate::domain::types::{BeneficiaryStatus, EnrollmentKind};
use crate::repository::error::{parse_json_column, parse_timestamp, RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub struct BeneficiaryRepository {
    conn: SharedConnection,
}

impl BeneficiaryRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 单独调用 =====

    pub fn find_by_id(
        &self,
        kind: EnrollmentKind,
        id: &str,
    ) -> RepositoryResult<Option<Beneficiary>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, kind, id)
    }

    pub fn list_by_plan(
        &self,
        kind: EnrollmentKind,
        benefit_plan_id: &str,
    ) -> RepositoryResult<Vec<Beneficiary>> {
        let conn = self.get_conn()?;
        Self::list_by_plan_tx(&conn, kind, benefit_plan_id)
    }

    pub fn count_active(&self, kind: EnrollmentKind, benefit_plan_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::count_active_tx(&conn, kind, benefit_plan_id)
    }

    // ===== 事务内调用 =====

    pub fn insert_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        new: &NewBeneficiary,
    ) -> RepositoryResult<Beneficiary> {
        let now = Utc::now();
        let beneficiary = Beneficiary {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            member_id: new.member_id.clone(),
            benefit_plan_id: new.benefit_plan_id.clone(),
            status: new.status,
            json_ext: new.json_ext.clone(),
            version: 1,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let sql = format!(
            r#"
            INSERT INTO {} (id, {}, benefit_plan_id, status, json_ext, version, is_deleted, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, ?7)
            "#,
            kind.table(),
            kind.member_column()
        );
        conn.execute(
            &sql,
            params![
                beneficiary.id,
                beneficiary.member_id,
                beneficiary.benefit_plan_id,
                beneficiary.status.as_str(),
                serde_json::to_string(&beneficiary.json_ext)?,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(beneficiary)
    }

    /// 查询未删除的受益人
    pub fn find_by_id_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        id: &str,
    ) -> RepositoryResult<Option<Beneficiary>> {
        let sql = format!(
            "{} WHERE id = ?1 AND is_deleted = 0",
            select_clause(kind)
        );
        let found = conn
            .query_row(&sql, params![id], |row| map_beneficiary_row(row, kind))
            .optional()?;
        Ok(found)
    }

    /// 查询成员在方案下的未删除登记
    pub fn find_by_member_and_plan_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        member_id: &str,
        benefit_plan_id: &str,
    ) -> RepositoryResult<Option<Beneficiary>> {
        let sql = format!(
            "{} WHERE {} = ?1 AND benefit_plan_id = ?2 AND is_deleted = 0 LIMIT 1",
            select_clause(kind),
            kind.member_column()
        );
        let found = conn
            .query_row(&sql, params![member_id, benefit_plan_id], |row| {
                map_beneficiary_row(row, kind)
            })
            .optional()?;
        Ok(found)
    }

    pub fn list_by_plan_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        benefit_plan_id: &str,
    ) -> RepositoryResult<Vec<Beneficiary>> {
        let sql = format!(
            "{} WHERE benefit_plan_id = ?1 AND is_deleted = 0 ORDER BY created_at, rowid",
            select_clause(kind)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![benefit_plan_id], |row| map_beneficiary_row(row, kind))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// 方案下未删除的 ACTIVE 数量
    pub fn count_active_tx(
        conn: &Connection,
        kind: EnrollmentKind,
        benefit_plan_id: &str,
    ) -> RepositoryResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE benefit_plan_id = ?1 AND status = ?2 AND is_deleted = 0",
            kind.table()
        );
        let n: i64 = conn.query_row(
            &sql,
            params![benefit_plan_id, BeneficiaryStatus::Active.as_str()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// 保存状态与扩展数据（version + 1）
    pub fn update_tx(conn: &Connection, beneficiary: &Beneficiary) -> RepositoryResult<Beneficiary> {
        let now = Utc::now();
        let sql = format!(
            r#"
            UPDATE {} SET status = ?1, json_ext = ?2, version = version + 1, updated_at = ?3
            WHERE id = ?4 AND is_deleted = 0
            "#,
            beneficiary.kind.table()
        );
        let affected = conn.execute(
            &sql,
            params![
                beneficiary.status.as_str(),
                serde_json::to_string(&beneficiary.json_ext)?,
                now.to_rfc3339(),
                beneficiary.id,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found(beneficiary.kind.label(), &beneficiary.id));
        }

        let mut saved = beneficiary.clone();
        saved.version += 1;
        saved.updated_at = now;
        Ok(saved)
    }

    pub fn soft_delete_tx(conn: &Connection, kind: EnrollmentKind, id: &str) -> RepositoryResult<()> {
        let sql = format!(
            "UPDATE {} SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
            kind.table()
        );
        let affected = conn.execute(&sql, params![Utc::now().to_rfc3339(), id])?;
        if affected == 0 {
            return Err(RepositoryError::not_found(kind.label(), id));
        }
        Ok(())
    }
}

fn select_clause(kind: EnrollmentKind) -> String {
    format!(
        "SELECT id, {}, benefit_plan_id, status, json_ext, version, is_deleted, created_at, updated_at FROM {}",
        kind.member_column(),
        kind.table()
    )
}

fn map_beneficiary_row(row: &Row, kind: EnrollmentKind) -> rusqlite::Result<Beneficiary> {
    let status_raw: String = row.get(3)?;
    let json_ext: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let status = BeneficiaryStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("未知受益人状态: {}", status_raw).into(),
        )
    })?;
    Ok(Beneficiary {
        id: row.get(0)?,
        kind,
        member_id: row.get(1)?,
        benefit_plan_id: row.get(2)?,
        status,
        json_ext: parse_json_column(&json_ext),
        version: row.get(5)?,
        is_deleted: row.get::<_, i32>(6)? != 0,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}
