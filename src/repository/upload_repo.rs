// ==========================================
// 受益人登记系统 - 上传批次仓储
// ==========================================
// 职责: data_source_upload / data_source / upload_record 表的 CRUD
// 红线: Repository 不含业务规则；状态转换合法性由 UploadStatus 判定
// 说明: *_tx 函数接收 &Connection，可在上层事务内组合使用
// ==========================================

use crate::db::SharedConnection;
use crate::domain::types::UploadStatus;
use crate::domain::upload::{RowPayload, SourceRow, Upload, UploadRecord};
use crate::repository::error::{parse_json_column, parse_timestamp, RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

pub struct UploadRepository {
    conn: SharedConnection,
}

impl UploadRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 单独调用（自带连接锁）=====

    pub fn find_by_id(&self, upload_id: &str) -> RepositoryResult<Option<Upload>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, upload_id)
    }

    pub fn list_rows(&self, upload_id: &str) -> RepositoryResult<Vec<SourceRow>> {
        let conn = self.get_conn()?;
        Self::list_rows_tx(&conn, upload_id)
    }

    pub fn update_status(
        &self,
        upload_id: &str,
        status: UploadStatus,
        error: Option<Value>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::update_status_tx(&conn, upload_id, status, error)
    }

    pub fn count_rows(&self, upload_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM data_source WHERE upload_id = ?1 AND is_deleted = 0",
            params![upload_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    // ===== 事务内调用 =====

    pub fn insert_upload_tx(conn: &Connection, upload: &Upload) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO data_source_upload (
                id, source_name, source_type, status, error, workflow, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                upload.id,
                upload.source_name,
                upload.source_type,
                upload.status.as_str(),
                serde_json::to_string(&upload.error)?,
                upload.workflow,
                upload.created_at.to_rfc3339(),
                upload.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// 批量插入原始行
    pub fn insert_rows_tx(conn: &Connection, rows: &[SourceRow]) -> RepositoryResult<usize> {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO data_source (id, upload_id, json_ext, validations, individual_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;

        let mut count = 0;
        for row in rows {
            stmt.execute(params![
                row.id,
                row.upload_id,
                serde_json::to_string(&row.payload)?,
                serde_json::to_string(&row.validations)?,
                row.individual_id,
            ])?;
            count += 1;
        }
        Ok(count)
    }

    pub fn insert_record_tx(conn: &Connection, record: &UploadRecord) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO upload_record (id, data_upload_id, benefit_plan_id, workflow, json_ext, is_deleted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                record.data_upload_id,
                record.benefit_plan_id,
                record.workflow,
                serde_json::to_string(&record.json_ext)?,
                record.is_deleted as i32,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id_tx(conn: &Connection, upload_id: &str) -> RepositoryResult<Option<Upload>> {
        let upload = conn
            .query_row(
                r#"
                SELECT id, source_name, source_type, status, error, workflow, created_at, updated_at
                FROM data_source_upload WHERE id = ?1
                "#,
                params![upload_id],
                map_upload_row,
            )
            .optional()?;
        Ok(upload)
    }

    /// 查询 (upload, plan) 对应的未删除关联记录
    pub fn find_record_tx(
        conn: &Connection,
        upload_id: &str,
        benefit_plan_id: &str,
    ) -> RepositoryResult<Option<UploadRecord>> {
        let record = conn
            .query_row(
                r#"
                SELECT id, data_upload_id, benefit_plan_id, workflow, json_ext, is_deleted
                FROM upload_record
                WHERE data_upload_id = ?1 AND benefit_plan_id = ?2 AND is_deleted = 0
                "#,
                params![upload_id, benefit_plan_id],
                |row| {
                    let json_ext: String = row.get(4)?;
                    Ok(UploadRecord {
                        id: row.get(0)?,
                        data_upload_id: row.get(1)?,
                        benefit_plan_id: row.get(2)?,
                        workflow: row.get(3)?,
                        json_ext: parse_json_column(&json_ext),
                        is_deleted: row.get::<_, i32>(5)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// 写入状态（校验转换合法性）
    ///
    /// error 为 Some 时整体替换错误信息
    pub fn update_status_tx(
        conn: &Connection,
        upload_id: &str,
        status: UploadStatus,
        error: Option<Value>,
    ) -> RepositoryResult<()> {
        let current = Self::find_by_id_tx(conn, upload_id)?
            .ok_or_else(|| RepositoryError::not_found("Upload", upload_id))?;

        if !current.status.can_transition_to(status) {
            return Err(RepositoryError::InvalidStateTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        let now = Utc::now().to_rfc3339();
        match error {
            Some(err) => conn.execute(
                "UPDATE data_source_upload SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), serde_json::to_string(&err)?, now, upload_id],
            )?,
            None => conn.execute(
                "UPDATE data_source_upload SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, upload_id],
            )?,
        };
        Ok(())
    }

    pub fn list_rows_tx(conn: &Connection, upload_id: &str) -> RepositoryResult<Vec<SourceRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, upload_id, json_ext, validations, individual_id
            FROM data_source
            WHERE upload_id = ?1 AND is_deleted = 0
            ORDER BY rowid
            "#,
        )?;

        let rows = stmt.query_map(params![upload_id], |row| {
            let payload: String = row.get(2)?;
            let validations: String = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                payload,
                validations,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, upload_id, payload, validations, individual_id) = row?;
            let payload: RowPayload = match parse_json_column(&payload) {
                Value::Object(map) => map,
                _ => {
                    return Err(RepositoryError::FieldValueError {
                        field: "json_ext".to_string(),
                        message: format!("行 {} 的 payload 不是 JSON 对象", id),
                    })
                }
            };
            result.push(SourceRow {
                id,
                upload_id,
                payload,
                validations: parse_json_column(&validations),
                individual_id,
            });
        }
        Ok(result)
    }

    /// 批量写入 validations（一条语句循环执行，随上层事务一起提交）
    pub fn update_validations_tx(
        conn: &Connection,
        updates: &[(String, Value)],
    ) -> RepositoryResult<usize> {
        let mut stmt = conn.prepare("UPDATE data_source SET validations = ?1 WHERE id = ?2")?;
        let mut count = 0;
        for (row_id, validations) in updates {
            count += stmt.execute(params![serde_json::to_string(validations)?, row_id])?;
        }
        Ok(count)
    }

    pub fn link_individual_tx(
        conn: &Connection,
        row_id: &str,
        individual_id: &str,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE data_source SET individual_id = ?1 WHERE id = ?2",
            params![individual_id, row_id],
        )?;
        Ok(())
    }

    /// 统计有效/无效行数
    ///
    /// # 返回
    /// - (valid, invalid): 已校验且错误列表为空 / 错误列表非空
    pub fn count_valid_invalid_tx(
        conn: &Connection,
        upload_id: &str,
    ) -> RepositoryResult<(usize, usize)> {
        let rows = Self::list_rows_tx(conn, upload_id)?;
        let mut valid = 0;
        let mut invalid = 0;
        for row in &rows {
            match row.validation_errors() {
                Some(errors) if errors.is_empty() => valid += 1,
                Some(_) => invalid += 1,
                None => {}
            }
        }
        Ok((valid, invalid))
    }
}

fn map_upload_row(row: &Row) -> rusqlite::Result<Upload> {
    let status_raw: String = row.get(3)?;
    let error: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let status = UploadStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("未知上传状态: {}", status_raw).into(),
        )
    })?;
    Ok(Upload {
        id: row.get(0)?,
        source_name: row.get(1)?,
        source_type: row.get(2)?,
        status,
        error: parse_json_column(&error),
        workflow: row.get(5)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}
