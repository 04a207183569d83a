// ==========================================
// 受益人登记系统 - 导入层
// ==========================================
// 职责: 上传文件解析、Schema 校验、错误落库、导入编排
// 支持: CSV / XLSX / XLS / ODS
// ==========================================

// 模块声明
pub mod beneficiary_importer;
pub mod error;
pub mod error_annotator;
pub mod field_validator;
pub mod file_parser;
pub mod schema_validator;
pub mod uniqueness;

// 重导出核心类型
pub use beneficiary_importer::{
    ImportOrchestrator, ImportSummary, WorkflowContext, WorkflowHandler, WorkflowOutcome,
};
pub use error::{ImportError, ImportResult};
pub use error_annotator::ErrorAnnotator;
pub use field_validator::{FieldValidator, ValidatorRegistry};
pub use file_parser::{CsvParser, FileLoader, FileParser, ImportFile, ParsedTable, SpreadsheetParser};
pub use schema_validator::SchemaValidator;
pub use uniqueness::{UniquenessChecker, UniquenessReport};
