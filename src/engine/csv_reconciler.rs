// ==========================================
// 受益人登记系统 - CSV 群组状态对账
// ==========================================
// 职责: base64 CSV（必需 group_code 列）→ 按编码匹配群组
//       未登记群组 → 写入 csv_enrollment_* 扩展数据后统一交给登记确认钩子
//       已登记群组 → 更新状态并写入 csv_status_update_* 扩展数据
// 策略: 逐行独立提交（best-effort），失败逐条报告；未匹配编码汇总报告
// 重复编码: 同一编码以最后一行为准，每个群组每次调用最多处理一次
// ==========================================

use crate::config::enrollment_config_trait::EnrollmentConfigReader;
use crate::db::SharedConnection;
use crate::domain::beneficiary::{Beneficiary, BeneficiaryUpdate, Group, UserContext};
use crate::domain::types::{BeneficiaryStatus, EnrollmentKind};
use crate::engine::beneficiary_service::{publish_change, BeneficiaryService};
use crate::engine::bulk_status::{ext_object, merge_reason};
use crate::engine::enrollment::EnrollmentConfirmationHook;
use crate::engine::error::{lock_error, EngineError, EngineResult};
use crate::engine::events::{EnrollmentEventType, EventBus};
use crate::importer::error::ImportError;
use crate::repository::benefit_plan_repo::BenefitPlanRepository;
use crate::repository::beneficiary_repo::BeneficiaryRepository;
use crate::repository::group_repo::GroupRepository;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const GROUP_CODE_COLUMN: &str = "group_code";

/// 对账结果摘要
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsvReconcileReport {
    pub enrolled_count: usize,
    pub updated_count: usize,
    /// 未匹配编码（最多 limit 个）
    pub not_found_codes: Vec<String>,
    pub not_found_total: usize,
    pub truncated: bool,
    /// 逐条失败原因（"<编码>: <原因>"）
    pub failures: Vec<String>,
}

impl CsvReconcileReport {
    /// 汇总信息（"; " 连接，无变更时给出提示）
    pub fn summary_message(&self) -> String {
        let mut parts = Vec::new();
        if self.enrolled_count > 0 {
            parts.push(format!("新登记 {} 个群组受益人", self.enrolled_count));
        }
        if self.updated_count > 0 {
            parts.push(format!("更新 {} 个已有群组受益人", self.updated_count));
        }
        if !self.not_found_codes.is_empty() {
            parts.push(format!(
                "未找到群组编码: {}{}",
                self.not_found_codes.join(", "),
                if self.truncated { "..." } else { "" }
            ));
        }
        if !self.failures.is_empty() {
            parts.push(format!("处理失败: {}", self.failures.join("; ")));
        }
        if parts.is_empty() {
            "无变更".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// 解析后的对账行
#[derive(Debug, Clone)]
struct CsvRow {
    code: String,
    fields: Map<String, Value>,
}

pub struct CsvReconciler {
    conn: SharedConnection,
    config: Arc<dyn EnrollmentConfigReader>,
    hook: Arc<dyn EnrollmentConfirmationHook>,
    events: Arc<EventBus>,
}

impl CsvReconciler {
    pub fn new(
        conn: SharedConnection,
        config: Arc<dyn EnrollmentConfigReader>,
        hook: Arc<dyn EnrollmentConfirmationHook>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            conn,
            config,
            hook,
            events,
        }
    }

    #[instrument(skip(self, csv_base64, reason, user))]
    pub fn reconcile(
        &self,
        csv_base64: &str,
        status: BeneficiaryStatus,
        benefit_plan_id: &str,
        reason: Option<&str>,
        user: &UserContext,
    ) -> EngineResult<CsvReconcileReport> {
        let rows = parse_reconcile_csv(csv_base64)?;
        let limit = self.config.get_unmatched_code_report_limit()?;

        // ===== 阶段 1: 匹配群组，划分新登记 / 更新 =====
        let mut to_enroll: Vec<(Group, Map<String, Value>)> = Vec::new();
        let mut to_update: Vec<(String, Beneficiary, Map<String, Value>)> = Vec::new();
        let mut not_found: Vec<String> = Vec::new();
        {
            let conn = self.conn.lock().map_err(lock_error)?;
            if BenefitPlanRepository::find_by_id_tx(&conn, benefit_plan_id)?.is_none() {
                return Err(EngineError::NotFound(format!("BenefitPlan(id={})", benefit_plan_id)));
            }

            for row in rows {
                match GroupRepository::find_by_code_tx(&conn, &row.code)? {
                    None => not_found.push(row.code),
                    Some(group) => {
                        match BeneficiaryRepository::find_by_member_and_plan_tx(
                            &conn,
                            EnrollmentKind::Group,
                            &group.id,
                            benefit_plan_id,
                        )? {
                            Some(existing) => to_update.push((row.code, existing, row.fields)),
                            None => to_enroll.push((group, row.fields)),
                        }
                    }
                }
            }
        }

        let mut report = CsvReconcileReport {
            not_found_total: not_found.len(),
            truncated: not_found.len() > limit,
            not_found_codes: not_found.into_iter().take(limit).collect(),
            ..Default::default()
        };

        // ===== 阶段 2: 新登记（先写群组扩展数据，再一次性调用钩子）=====
        if !to_enroll.is_empty() {
            let mut prepared = Vec::with_capacity(to_enroll.len());
            for (group, fields) in to_enroll {
                match self.stamp_group(&group, fields, reason) {
                    Ok(stamped) => prepared.push(stamped),
                    Err(e) => report.failures.push(format!("{}: {}", group.code, e)),
                }
            }

            if !prepared.is_empty() {
                let hook_report =
                    self.hook
                        .confirm_enrollment(benefit_plan_id, status, user, &prepared)?;
                report.enrolled_count = hook_report.enrolled_codes.len();
                report.failures.extend(hook_report.failures);
            }
        }

        // ===== 阶段 3: 已登记群组逐行更新 =====
        for (code, existing, fields) in to_update {
            match self.update_one(&existing, status, fields, reason) {
                Ok(saved) => {
                    report.updated_count += 1;
                    publish_change(
                        &self.events,
                        EnrollmentEventType::updated(EnrollmentKind::Group),
                        &saved,
                    );
                }
                Err(e) => {
                    warn!(group_code = %code, error = %e, "群组受益人状态更新失败");
                    report.failures.push(format!("{}: {}", code, e));
                }
            }
        }

        info!(
            enrolled = report.enrolled_count,
            updated = report.updated_count,
            not_found = report.not_found_total,
            failed = report.failures.len(),
            user = %user.username,
            "CSV 对账完成"
        );
        Ok(report)
    }

    /// 写入 csv_enrollment_* 扩展数据（单群组单事务）
    fn stamp_group(
        &self,
        group: &Group,
        fields: Map<String, Value>,
        reason: Option<&str>,
    ) -> EngineResult<Group> {
        let mut ext = ext_object(&group.json_ext);
        ext.insert("csv_enrollment_data".to_string(), Value::Object(fields));
        ext.insert(
            "csv_enrollment_date".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        merge_reason(&mut ext, "csv_enrollment_reason", reason);

        let json_ext = Value::Object(ext);
        let conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.unchecked_transaction()?;
        GroupRepository::update_json_ext_tx(&tx, &group.id, &json_ext)?;
        tx.commit()?;

        let mut stamped = group.clone();
        stamped.json_ext = json_ext;
        Ok(stamped)
    }

    /// 更新状态并写入 csv_status_update_* 扩展数据（单行单事务）
    fn update_one(
        &self,
        existing: &Beneficiary,
        status: BeneficiaryStatus,
        fields: Map<String, Value>,
        reason: Option<&str>,
    ) -> EngineResult<Beneficiary> {
        let mut ext = ext_object(&existing.json_ext);
        ext.insert(
            "csv_status_update_date".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        ext.insert("csv_fields".to_string(), Value::Object(fields));
        merge_reason(&mut ext, "csv_status_update_reason", reason);

        let update = BeneficiaryUpdate {
            id: existing.id.clone(),
            status: Some(status),
            json_ext: Some(Value::Object(ext)),
        };

        let conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.unchecked_transaction()?;
        let saved = BeneficiaryService::update_tx(&tx, EnrollmentKind::Group, &update)?;
        tx.commit()?;
        Ok(saved)
    }
}

/// 解码并解析对账 CSV
///
/// # 规则
/// - base64 → UTF-8，去掉 BOM；表头去 BOM 与首尾空白
/// - 缺少 group_code 列直接报错
/// - 空编码行跳过；其余非空列原样作为扩展字段
fn parse_reconcile_csv(csv_base64: &str) -> EngineResult<Vec<CsvRow>> {
    let encoded = csv_base64.trim();
    if encoded.is_empty() {
        return Err(EngineError::InvalidInput("未提供 CSV 文件".to_string()));
    }

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ImportError::EncodingError(format!("base64 解码失败: {}", e)))?;
    let text =
        String::from_utf8(bytes).map_err(|e| ImportError::EncodingError(e.to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(ImportError::from)?
        .iter()
        .map(|h| h.replace('\u{feff}', "").trim().to_string())
        .collect();

    let code_idx = headers
        .iter()
        .position(|h| h == GROUP_CODE_COLUMN)
        .ok_or_else(|| ImportError::MissingColumn(GROUP_CODE_COLUMN.to_string()))?;

    let mut order: Vec<String> = Vec::new();
    let mut by_code: HashMap<String, Map<String, Value>> = HashMap::new();

    for record in reader.records() {
        let record = record.map_err(ImportError::from)?;
        let code = record.get(code_idx).unwrap_or("").trim().to_string();
        if code.is_empty() {
            continue;
        }

        let mut fields = Map::new();
        for (idx, value) in record.iter().enumerate() {
            if idx == code_idx || value.is_empty() {
                continue;
            }
            if let Some(header) = headers.get(idx) {
                fields.insert(header.clone(), Value::String(value.to_string()));
            }
        }

        if by_code.insert(code.clone(), fields).is_none() {
            order.push(code);
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|code| by_code.remove(&code).map(|fields| CsvRow { code, fields }))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        STANDARD.encode(text.as_bytes())
    }

    #[test]
    fn test_parse_strips_bom_and_skips_blank_codes() {
        let rows = parse_reconcile_csv(&encode("\u{feff}group_code , note\nG1,hello\n  ,x\nG2,\n")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code, "G1");
        assert_eq!(rows[0].fields["note"], "hello");
        // 空值列不进入扩展字段
        assert!(rows[1].fields.is_empty());
    }

    #[test]
    fn test_parse_duplicate_code_last_row_wins() {
        let rows = parse_reconcile_csv(&encode("group_code,note\nG1,first\nG2,x\nG1,second\n")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code, "G1");
        assert_eq!(rows[0].fields["note"], "second");
    }

    #[test]
    fn test_parse_requires_group_code_column() {
        let err = parse_reconcile_csv(&encode("code,note\nG1,x\n")).unwrap_err();
        assert!(matches!(err, EngineError::Import(ImportError::MissingColumn(_))));
    }

    #[test]
    fn test_parse_rejects_bad_base64_and_empty_input() {
        assert!(matches!(
            parse_reconcile_csv("***"),
            Err(EngineError::Import(ImportError::EncodingError(_)))
        ));
        assert!(matches!(parse_reconcile_csv("  "), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_summary_message_truncation_marker() {
        let report = CsvReconcileReport {
            enrolled_count: 1,
            updated_count: 0,
            not_found_codes: vec!["X1".into(), "X2".into()],
            not_found_total: 5,
            truncated: true,
            failures: Vec::new(),
        };
        assert_eq!(report.summary_message(), "新登记 1 个群组受益人; 未找到群组编码: X1, X2...");
        assert_eq!(CsvReconcileReport::default().summary_message(), "无变更");
    }
}
