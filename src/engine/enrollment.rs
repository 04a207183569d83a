// ==========================================
// 受益人登记系统 - 群组登记确认
// ==========================================
// 职责: 接收一批待登记群组，为每个群组创建群组受益人
// 策略: 逐个群组独立提交；单个失败记录在报告中，不影响其他群组
// 注意: 调用方不得持有连接锁（内部经 BeneficiaryService 自行加锁）
// ==========================================

use crate::domain::beneficiary::{Group, NewBeneficiary, UserContext};
use crate::domain::types::{BeneficiaryStatus, EnrollmentKind};
use crate::engine::beneficiary_service::BeneficiaryService;
use crate::engine::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 登记确认结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentHookReport {
    /// 成功登记的群组编码
    pub enrolled_codes: Vec<String>,
    /// 失败原因（"<编码>: <原因>"）
    pub failures: Vec<String>,
}

// ==========================================
// EnrollmentConfirmationHook Trait
// ==========================================
// 实现者: GroupEnrollmentHook（默认）；外部审批流程可替换
pub trait EnrollmentConfirmationHook: Send + Sync {
    fn confirm_enrollment(
        &self,
        benefit_plan_id: &str,
        status: BeneficiaryStatus,
        user: &UserContext,
        groups: &[Group],
    ) -> EngineResult<EnrollmentHookReport>;
}

pub struct GroupEnrollmentHook {
    service: Arc<BeneficiaryService>,
}

impl GroupEnrollmentHook {
    pub fn new(service: Arc<BeneficiaryService>) -> EngineResult<Self> {
        if service.kind() != EnrollmentKind::Group {
            return Err(EngineError::InvalidInput(
                "GroupEnrollmentHook 需要群组受益人服务".to_string(),
            ));
        }
        Ok(Self { service })
    }
}

impl EnrollmentConfirmationHook for GroupEnrollmentHook {
    fn confirm_enrollment(
        &self,
        benefit_plan_id: &str,
        status: BeneficiaryStatus,
        user: &UserContext,
        groups: &[Group],
    ) -> EngineResult<EnrollmentHookReport> {
        let mut report = EnrollmentHookReport::default();

        for group in groups {
            let new = NewBeneficiary {
                member_id: group.id.clone(),
                benefit_plan_id: benefit_plan_id.to_string(),
                status,
                json_ext: group.json_ext.clone(),
            };
            match self.service.create(new, user) {
                Ok(_) => report.enrolled_codes.push(group.code.clone()),
                Err(e) => {
                    warn!(group_code = %group.code, error = %e, "群组登记失败");
                    report.failures.push(format!("{}: {}", group.code, e));
                }
            }
        }

        info!(
            benefit_plan_id = %benefit_plan_id,
            enrolled = report.enrolled_codes.len(),
            failed = report.failures.len(),
            "群组登记确认完成"
        );
        Ok(report)
    }
}
