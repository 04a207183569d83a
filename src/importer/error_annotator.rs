// ==========================================
// 受益人登记系统 - 校验错误落库
// ==========================================
// 职责: ValidationOutcome → data_source.validations
// 格式: {"validation_errors": [{"field_name": .., "note": ..}]}
// 约束: 每一行都写入（无错误的行写入空列表），单事务批量写入
// ==========================================

use crate::db::SharedConnection;
use crate::domain::validation::ValidationOutcome;
use crate::importer::error::ImportResult;
use crate::repository::error::RepositoryError;
use crate::repository::upload_repo::UploadRepository;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

pub struct ErrorAnnotator {
    conn: SharedConnection,
}

impl ErrorAnnotator {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 归约为 validations 文档
    pub fn to_validations(outcome: &ValidationOutcome) -> ImportResult<Value> {
        let errors = serde_json::to_value(outcome.errors()).map_err(RepositoryError::from)?;
        Ok(json!({ "validation_errors": errors }))
    }

    /// 保存全部行的校验错误（单事务）
    ///
    /// # 返回
    /// - 写入的行数
    pub fn save_errors(&self, outcomes: &[ValidationOutcome]) -> ImportResult<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn.unchecked_transaction()?;
        let written = Self::save_errors_tx(&tx, outcomes)?;
        tx.commit()?;

        info!(rows = written, "校验结果已写入");
        Ok(written)
    }

    pub fn save_errors_tx(conn: &Connection, outcomes: &[ValidationOutcome]) -> ImportResult<usize> {
        let mut updates = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            updates.push((outcome.row_id.clone(), Self::to_validations(outcome)?));
        }
        Ok(UploadRepository::update_validations_tx(conn, &updates)?)
    }
}
