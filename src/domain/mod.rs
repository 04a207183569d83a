// ==========================================
// 受益人登记系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod benefit_plan;
pub mod beneficiary;
pub mod task;
pub mod types;
pub mod upload;
pub mod validation;

// 重导出核心类型
pub use benefit_plan::{BeneficiaryDataSchema, BenefitPlan, FieldSchema};
pub use beneficiary::{
    Beneficiary, BeneficiaryUpdate, Group, Individual, NewBeneficiary, UserContext,
};
pub use task::{NewTask, Task};
pub use types::{BeneficiaryStatus, EnrollmentKind, TaskStatus, UploadStatus};
pub use upload::{RowPayload, SourceRow, Upload, UploadRecord};
pub use validation::{FieldOutcome, ValidationErrorEntry, ValidationOutcome};
