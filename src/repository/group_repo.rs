// ==========================================
// 受益人登记系统 - 群组仓储
// ==========================================
// 职责: individual_group 表读写（按业务编码查找）
// ==========================================

use crate::db::SharedConnection;
use crate::domain::beneficiary::Group;
use crate::repository::error::{parse_json_column, RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

pub struct GroupRepository {
    conn: SharedConnection,
}

impl GroupRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, group: &Group) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, group)
    }

    pub fn find_by_id(&self, group_id: &str) -> RepositoryResult<Option<Group>> {
        let conn = self.get_conn()?;
        let group = conn
            .query_row(
                "SELECT id, code, json_ext, is_deleted FROM individual_group WHERE id = ?1",
                params![group_id],
                map_group_row,
            )
            .optional()?;
        Ok(group)
    }

    pub fn insert_tx(conn: &Connection, group: &Group) -> RepositoryResult<()> {
        conn.execute(
            "INSERT INTO individual_group (id, code, json_ext, is_deleted) VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id,
                group.code,
                serde_json::to_string(&group.json_ext)?,
                group.is_deleted as i32,
            ],
        )?;
        Ok(())
    }

    /// 按编码查找未删除群组
    pub fn find_by_code_tx(conn: &Connection, code: &str) -> RepositoryResult<Option<Group>> {
        let group = conn
            .query_row(
                r#"
                SELECT id, code, json_ext, is_deleted FROM individual_group
                WHERE code = ?1 AND is_deleted = 0
                ORDER BY rowid LIMIT 1
                "#,
                params![code],
                map_group_row,
            )
            .optional()?;
        Ok(group)
    }

    pub fn update_json_ext_tx(
        conn: &Connection,
        group_id: &str,
        json_ext: &Value,
    ) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE individual_group SET json_ext = ?1 WHERE id = ?2",
            params![serde_json::to_string(json_ext)?, group_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Group", group_id));
        }
        Ok(())
    }
}

fn map_group_row(row: &Row) -> rusqlite::Result<Group> {
    let json_ext: String = row.get(2)?;
    Ok(Group {
        id: row.get(0)?,
        code: row.get(1)?,
        json_ext: parse_json_column(&json_ext),
        is_deleted: row.get::<_, i32>(3)? != 0,
    })
}
