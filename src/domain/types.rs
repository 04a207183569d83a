// ==========================================
// 受益人登记系统 - 领域类型定义
// ==========================================
// 职责: 上传状态、受益人状态、登记类型等封闭枚举
// 红线: 状态一律走枚举，不做自由字符串比较
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 上传批次状态 (Upload Status)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Created,                // 已保存，未触发工作流
    Triggered,              // 工作流已触发
    WaitingForVerification, // 等待审批
    Success,                // 导入成功
    Fail,                   // 导入失败
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Created => "CREATED",
            UploadStatus::Triggered => "TRIGGERED",
            UploadStatus::WaitingForVerification => "WAITING_FOR_VERIFICATION",
            UploadStatus::Success => "SUCCESS",
            UploadStatus::Fail => "FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<UploadStatus> {
        match s.trim().to_uppercase().as_str() {
            "CREATED" => Some(UploadStatus::Created),
            "TRIGGERED" => Some(UploadStatus::Triggered),
            "WAITING_FOR_VERIFICATION" => Some(UploadStatus::WaitingForVerification),
            "SUCCESS" => Some(UploadStatus::Success),
            "FAIL" => Some(UploadStatus::Fail),
            _ => None,
        }
    }

    /// 判断状态转换是否合法
    ///
    /// # 规则
    /// - CREATED → TRIGGERED
    /// - TRIGGERED → WAITING_FOR_VERIFICATION / SUCCESS / FAIL
    /// - WAITING_FOR_VERIFICATION → SUCCESS / FAIL
    /// - 同状态写入视为合法（幂等）
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Created, Triggered)
                | (Triggered, WaitingForVerification)
                | (Triggered, Success)
                | (Triggered, Fail)
                | (WaitingForVerification, Success)
                | (WaitingForVerification, Fail)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 受益人状态 (Beneficiary Status)
// ==========================================
// SUSPENDED 与生命周期状态正交，可由任意状态进入/退出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeneficiaryStatus {
    Potential,
    Validated,
    Active,
    Graduated,
    Suspended,
}

impl BeneficiaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeneficiaryStatus::Potential => "POTENTIAL",
            BeneficiaryStatus::Validated => "VALIDATED",
            BeneficiaryStatus::Active => "ACTIVE",
            BeneficiaryStatus::Graduated => "GRADUATED",
            BeneficiaryStatus::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(s: &str) -> Option<BeneficiaryStatus> {
        match s.trim().to_uppercase().as_str() {
            "POTENTIAL" => Some(BeneficiaryStatus::Potential),
            "VALIDATED" => Some(BeneficiaryStatus::Validated),
            "ACTIVE" => Some(BeneficiaryStatus::Active),
            "GRADUATED" => Some(BeneficiaryStatus::Graduated),
            "SUSPENDED" => Some(BeneficiaryStatus::Suspended),
            _ => None,
        }
    }

    /// 是否计入容量上限
    pub fn counts_against_ceiling(&self) -> bool {
        matches!(self, BeneficiaryStatus::Active)
    }
}

impl fmt::Display for BeneficiaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 登记类型 (Enrollment Kind)
// ==========================================
// 个人受益人与群组受益人共享同一套规则，仅落库表不同
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrollmentKind {
    Individual,
    Group,
}

impl EnrollmentKind {
    /// 受益人表名
    pub fn table(&self) -> &'static str {
        match self {
            EnrollmentKind::Individual => "beneficiary",
            EnrollmentKind::Group => "group_beneficiary",
        }
    }

    /// 成员外键列名
    pub fn member_column(&self) -> &'static str {
        match self {
            EnrollmentKind::Individual => "individual_id",
            EnrollmentKind::Group => "group_id",
        }
    }

    /// 服务名（事件与审批任务使用）
    pub fn service_name(&self) -> &'static str {
        match self {
            EnrollmentKind::Individual => "beneficiary_service",
            EnrollmentKind::Group => "group_beneficiary_service",
        }
    }

    /// 用户可读名称
    pub fn label(&self) -> &'static str {
        match self {
            EnrollmentKind::Individual => "beneficiary",
            EnrollmentKind::Group => "group beneficiary",
        }
    }
}

// ==========================================
// 审批任务状态 (Task Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Received,
    Accepted,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Received => "RECEIVED",
            TaskStatus::Accepted => "ACCEPTED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> TaskStatus {
        match s.trim().to_uppercase().as_str() {
            "ACCEPTED" => TaskStatus::Accepted,
            "COMPLETED" => TaskStatus::Completed,
            "FAILED" => TaskStatus::Failed,
            _ => TaskStatus::Received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_status_transitions() {
        assert!(UploadStatus::Created.can_transition_to(UploadStatus::Triggered));
        assert!(UploadStatus::Triggered.can_transition_to(UploadStatus::WaitingForVerification));
        assert!(UploadStatus::WaitingForVerification.can_transition_to(UploadStatus::Success));
        assert!(UploadStatus::Fail.can_transition_to(UploadStatus::Fail));

        assert!(!UploadStatus::Created.can_transition_to(UploadStatus::Success));
        assert!(!UploadStatus::Success.can_transition_to(UploadStatus::Triggered));
        assert!(!UploadStatus::Fail.can_transition_to(UploadStatus::WaitingForVerification));
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            BeneficiaryStatus::Potential,
            BeneficiaryStatus::Validated,
            BeneficiaryStatus::Active,
            BeneficiaryStatus::Graduated,
            BeneficiaryStatus::Suspended,
        ] {
            assert_eq!(BeneficiaryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BeneficiaryStatus::parse(" active "), Some(BeneficiaryStatus::Active));
        assert_eq!(BeneficiaryStatus::parse("ENROLLED"), None);
    }

    #[test]
    fn test_status_serde_format() {
        let json = serde_json::to_string(&UploadStatus::WaitingForVerification).unwrap();
        assert_eq!(json, "\"WAITING_FOR_VERIFICATION\"");
    }
}
