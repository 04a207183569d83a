// ==========================================
// 受益人登记系统 - Schema 校验器
// ==========================================
// 职责: 行 × Schema 字段 → ValidationOutcome
// 红线: 纯计算，不落库（落库由 ErrorAnnotator 负责）
// 唯一性: 每批每字段预计算一次（UniquenessChecker），逐行查表
// ==========================================

use crate::domain::benefit_plan::BeneficiaryDataSchema;
use crate::domain::upload::{RowPayload, SourceRow};
use crate::domain::validation::{FieldOutcome, ValidationOutcome};
use crate::importer::field_validator::ValidatorRegistry;
use crate::importer::uniqueness::UniquenessChecker;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// 唯一性结果的键后缀
pub const UNIQUENESS_SUFFIX: &str = "_uniqueness";

pub struct SchemaValidator {
    registry: Arc<ValidatorRegistry>,
}

impl SchemaValidator {
    pub fn new(registry: Arc<ValidatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn validate(
        &self,
        rows: &[SourceRow],
        schema: &BeneficiaryDataSchema,
    ) -> Vec<ValidationOutcome> {
        let payloads: Vec<&RowPayload> = rows.iter().map(|r| &r.payload).collect();
        let uniqueness = UniquenessChecker::compute(&payloads, schema.unique_fields());

        let outcomes: Vec<ValidationOutcome> = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let mut validations = BTreeMap::new();

                for (field, field_schema) in &schema.fields {
                    // 行内缺少该列时不产生任何结果（规则与唯一性均跳过）
                    let Some(value) = row.payload.get(field) else {
                        continue;
                    };

                    if let Some(rule) = &field_schema.validation_name {
                        validations.insert(field.clone(), self.registry.run(rule, field, value));
                    }

                    if field_schema.unique {
                        let outcome = if uniqueness.is_duplicate(field, idx) {
                            FieldOutcome::failed(field, format!("字段 {} 的值在本批次内重复", field))
                        } else {
                            FieldOutcome::ok(field)
                        };
                        validations.insert(format!("{}{}", field, UNIQUENESS_SUFFIX), outcome);
                    }
                }

                ValidationOutcome {
                    row_id: row.id.clone(),
                    row: row.payload.clone(),
                    validations,
                }
            })
            .collect();

        debug!(
            rows = rows.len(),
            fields = schema.fields.len(),
            invalid = outcomes.iter().filter(|o| !o.is_valid()).count(),
            "Schema 校验完成"
        );
        outcomes
    }
}
