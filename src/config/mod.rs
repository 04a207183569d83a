// ==========================================
// 受益人登记系统 - 配置层
// ==========================================
// 职责: 系统配置管理（审批开关、业务事件、报告上限）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod enrollment_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use enrollment_config_trait::EnrollmentConfigReader;
