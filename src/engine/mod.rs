// ==========================================
// 受益人登记系统 - 引擎层
// ==========================================
// 职责: 登记业务规则（容量上限、批量状态、审批闸门、入库、CSV 对账）
// 红线: 引擎不拼 SQL，数据访问一律经仓储层 *_tx 函数
// ==========================================

pub mod beneficiary_service;
pub mod bulk_status;
pub mod csv_reconciler;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod task_gate;

// 重导出核心引擎
pub use beneficiary_service::{would_exceed_max_active_tx, BeneficiaryService};
pub use bulk_status::{merge_reason, BulkStatusReport, BulkStatusTransactor, BULK_REASON_KEY};
pub use csv_reconciler::{CsvReconcileReport, CsvReconciler, GROUP_CODE_COLUMN};
pub use enrollment::{EnrollmentConfirmationHook, EnrollmentHookReport, GroupEnrollmentHook};
pub use error::{EngineError, EngineResult};
pub use events::{EnrollmentEvent, EnrollmentEventListener, EnrollmentEventType, EventBus};
pub use ingestion::{
    validate_headers, BeneficiaryUploadWorkflow, IngestReport, UpdateReport, UploadMode, ValidItemsIngestor,
};
pub use task_gate::{percentage_of_invalid_items, TaskGate, TASK_SOURCE};
