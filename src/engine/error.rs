// ==========================================
// 受益人登记系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 职责: 业务规则错误（容量上限等）+ 下层错误透传
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 业务规则错误 =====
    #[error("受益方案 {plan_code} 的 ACTIVE 受益人已达上限 {max}")]
    CapacityExceeded { plan_code: String, max: i64 },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("工作流失败: {0}")]
    Workflow(String),

    // ===== 下层错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Import(#[from] ImportError),

    // ===== 通用错误 =====
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Repository(RepositoryError::from(err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Repository(RepositoryError::from(err))
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;

/// 获取连接锁失败 → 仓储层 LockError
pub(crate) fn lock_error<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Repository(RepositoryError::LockError(e.to_string()))
}
