// ==========================================
// 受益人登记系统 - API 层
// ==========================================
// 职责: 对外业务接口，返回统一写入结果
// ==========================================

pub mod beneficiary_api;
pub mod error;
pub mod response;

// 重导出核心类型
pub use beneficiary_api::BeneficiaryApi;
pub use error::{ApiError, ApiResult};
pub use response::WriteResult;
