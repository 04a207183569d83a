// ==========================================
// 受益人登记系统 - 登记配置读取 Trait
// ==========================================
// 职责: 定义导入/审批/对账所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::repository::error::RepositoryResult;

// ==========================================
// EnrollmentConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
// 注意: 实现方可能与仓储共享连接，调用时不得持有连接锁
pub trait EnrollmentConfigReader: Send + Sync {
    // ===== 审批开关 =====

    /// 上传结果含无效行时是否走审批
    ///
    /// # 默认值
    /// - true
    fn is_upload_maker_checker_enabled(&self) -> RepositoryResult<bool>;

    /// 受益人变更是否走审批
    ///
    /// # 默认值
    /// - true
    fn is_update_maker_checker_enabled(&self) -> RepositoryResult<bool>;

    /// 个人受益人批量状态更新是否走审批任务
    ///
    /// # 默认值
    /// - false
    fn is_beneficiary_crud_checked(&self) -> RepositoryResult<bool>;

    /// 群组受益人批量状态更新是否走审批任务
    ///
    /// # 默认值
    /// - false
    fn is_group_beneficiary_crud_checked(&self) -> RepositoryResult<bool>;

    // ===== 业务事件 =====

    /// 导入有效行的审批业务事件
    ///
    /// # 默认值
    /// - "import_valid_items"
    fn get_import_valid_items_event(&self) -> RepositoryResult<String>;

    /// 更新有效行的审批业务事件
    ///
    /// # 默认值
    /// - "update_valid_items"
    fn get_upload_valid_items_event(&self) -> RepositoryResult<String>;

    // ===== 报告 =====

    /// CSV 对账报告中列出的未匹配编码数量
    ///
    /// # 默认值
    /// - 10
    fn get_unmatched_code_report_limit(&self) -> RepositoryResult<usize>;
}
