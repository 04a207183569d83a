// ==========================================
// 受益人登记系统 - 个人仓储
// ==========================================
// 职责: individual 表读写
// ==========================================

use crate::db::SharedConnection;
use crate::domain::beneficiary::Individual;
use crate::repository::error::{parse_json_column, RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

pub struct IndividualRepository {
    conn: SharedConnection,
}

impl IndividualRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, individual_id: &str) -> RepositoryResult<Option<Individual>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, individual_id)
    }

    pub fn insert(&self, individual: &Individual) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, individual)
    }

    pub fn insert_tx(conn: &Connection, individual: &Individual) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO individual (id, first_name, last_name, dob, json_ext, version, is_deleted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                individual.id,
                individual.first_name,
                individual.last_name,
                individual.dob.map(|d| d.format("%Y-%m-%d").to_string()),
                serde_json::to_string(&individual.json_ext)?,
                individual.version,
                individual.is_deleted as i32,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id_tx(
        conn: &Connection,
        individual_id: &str,
    ) -> RepositoryResult<Option<Individual>> {
        let found = conn
            .query_row(
                r#"
                SELECT id, first_name, last_name, dob, json_ext, version, is_deleted
                FROM individual WHERE id = ?1
                "#,
                params![individual_id],
                map_individual_row,
            )
            .optional()?;
        Ok(found)
    }

    /// 由某次上传创建的个人（经 data_source.individual_id 关联）
    pub fn list_by_upload_tx(conn: &Connection, upload_id: &str) -> RepositoryResult<Vec<Individual>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT i.id, i.first_name, i.last_name, i.dob, i.json_ext, i.version, i.is_deleted
            FROM individual i
            JOIN data_source ds ON ds.individual_id = i.id
            WHERE ds.upload_id = ?1 AND i.is_deleted = 0
            ORDER BY ds.rowid
            "#,
        )?;
        let rows = stmt.query_map(params![upload_id], map_individual_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// 覆盖姓名/出生日期/扩展数据并递增版本
    pub fn update_tx(conn: &Connection, individual: &Individual) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE individual
            SET first_name = ?1, last_name = ?2, dob = ?3, json_ext = ?4, version = version + 1
            WHERE id = ?5 AND is_deleted = 0
            "#,
            params![
                individual.first_name,
                individual.last_name,
                individual.dob.map(|d| d.format("%Y-%m-%d").to_string()),
                serde_json::to_string(&individual.json_ext)?,
                individual.id,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Individual", &individual.id));
        }
        Ok(())
    }

    /// 写入扩展数据并递增版本
    pub fn update_json_ext_tx(
        conn: &Connection,
        individual_id: &str,
        json_ext: &Value,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE individual SET json_ext = ?1, version = version + 1 WHERE id = ?2",
            params![serde_json::to_string(json_ext)?, individual_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Individual", individual_id));
        }
        Ok(())
    }
}

fn map_individual_row(row: &Row) -> rusqlite::Result<Individual> {
    let dob: Option<String> = row.get(3)?;
    let json_ext: String = row.get(4)?;
    Ok(Individual {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        dob: dob.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        json_ext: parse_json_column(&json_ext),
        version: row.get(5)?,
        is_deleted: row.get::<_, i32>(6)? != 0,
    })
}
