// ==========================================
// 受益人登记系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 受益方案的受益人导入、校验、审批与状态管理
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 外部数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{BeneficiaryStatus, EnrollmentKind, TaskStatus, UploadStatus};

// 领域实体
pub use domain::{
    Beneficiary, BeneficiaryDataSchema, BenefitPlan, Group, Individual, SourceRow, Task, Upload,
    UploadRecord, UserContext,
};

// 引擎
pub use engine::{
    BeneficiaryService, BeneficiaryUploadWorkflow, BulkStatusTransactor, CsvReconciler, EventBus,
    TaskGate, ValidItemsIngestor,
};

// 导入
pub use importer::{ImportFile, ImportOrchestrator, SchemaValidator};

// API
pub use api::{BeneficiaryApi, WriteResult};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "受益人登记系统";
