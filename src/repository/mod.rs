// ==========================================
// 受益人登记系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 事务: *_tx 关联函数接收 &Connection，由上层开启/提交事务
// ==========================================

pub mod benefit_plan_repo;
pub mod beneficiary_repo;
pub mod error;
pub mod group_repo;
pub mod individual_repo;
pub mod task_repo;
pub mod upload_repo;

// 重导出核心仓储
pub use benefit_plan_repo::BenefitPlanRepository;
pub use beneficiary_repo::BeneficiaryRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use group_repo::GroupRepository;
pub use individual_repo::IndividualRepository;
pub use task_repo::{TaskCreator, TaskRepository};
pub use upload_repo::UploadRepository;
