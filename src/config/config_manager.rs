// ==========================================
// 受益人登记系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::enrollment_config_trait::EnrollmentConfigReader;
use crate::db::{open_sqlite_connection, SharedConnection};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: SharedConnection,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: SharedConnection) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    fn get_bool(&self, key: &str, default: bool) -> RepositoryResult<bool> {
        let value = self.get_config_or_default(key, if default { "true" } else { "false" })?;
        match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %value,
                    "布尔配置格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }
}

// ==========================================
// EnrollmentConfigReader Trait 实现
// ==========================================
impl EnrollmentConfigReader for ConfigManager {
    // ===== 审批开关 =====

    fn is_upload_maker_checker_enabled(&self) -> RepositoryResult<bool> {
        self.get_bool(config_keys::MAKER_CHECKER_UPLOAD, true)
    }

    fn is_update_maker_checker_enabled(&self) -> RepositoryResult<bool> {
        self.get_bool(config_keys::MAKER_CHECKER_UPDATE, true)
    }

    fn is_beneficiary_crud_checked(&self) -> RepositoryResult<bool> {
        self.get_bool(config_keys::CHECK_BENEFICIARY_CRUD, false)
    }

    fn is_group_beneficiary_crud_checked(&self) -> RepositoryResult<bool> {
        self.get_bool(config_keys::CHECK_GROUP_BENEFICIARY_CRUD, false)
    }

    // ===== 业务事件 =====

    fn get_import_valid_items_event(&self) -> RepositoryResult<String> {
        self.get_config_or_default(config_keys::VALIDATION_IMPORT_VALID_ITEMS, "import_valid_items")
    }

    fn get_upload_valid_items_event(&self) -> RepositoryResult<String> {
        self.get_config_or_default(config_keys::VALIDATION_UPLOAD_VALID_ITEMS, "update_valid_items")
    }

    // ===== 报告 =====

    fn get_unmatched_code_report_limit(&self) -> RepositoryResult<usize> {
        let value = self.get_config_or_default(config_keys::UNMATCHED_CODE_REPORT_LIMIT, "10")?;
        Ok(value.trim().parse::<usize>().unwrap_or(10))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 审批（maker-checker）
    pub const MAKER_CHECKER_UPLOAD: &str = "enable_maker_checker_for_beneficiary_upload";
    pub const MAKER_CHECKER_UPDATE: &str = "enable_maker_checker_for_beneficiary_update";
    pub const CHECK_BENEFICIARY_CRUD: &str = "check_beneficiary_crud";
    pub const CHECK_GROUP_BENEFICIARY_CRUD: &str = "check_group_beneficiary_crud";

    // 审批任务业务事件
    pub const VALIDATION_IMPORT_VALID_ITEMS: &str = "validation_import_valid_items";
    pub const VALIDATION_UPLOAD_VALID_ITEMS: &str = "validation_upload_valid_items";

    // CSV 对账未匹配编码的报告上限
    pub const UNMATCHED_CODE_REPORT_LIMIT: &str = "unmatched_code_report_limit";
}
