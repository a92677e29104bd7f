// ==========================================
// 机加工车间排产系统 - 领域类型定义
// ==========================================
// 职责: 工单/工序/时段的状态机与冲突分类
// 红线: 状态迁移必须走 can_transition_to, 禁止散落的布尔标志
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工单状态 (Job Status)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,   // 待排产
    Scheduled, // 已排产
    Completed, // 已完工
    OnHold,    // 挂起
}

impl JobStatus {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::OnHold => "ON_HOLD",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "SCHEDULED" => Some(JobStatus::Scheduled),
            "COMPLETED" => Some(JobStatus::Completed),
            "ON_HOLD" => Some(JobStatus::OnHold),
            _ => None,
        }
    }

    /// 状态迁移合法性
    ///
    /// 允许的迁移:
    /// - PENDING -> SCHEDULED / ON_HOLD
    /// - SCHEDULED -> PENDING (被抢占退回) / COMPLETED / ON_HOLD
    /// - ON_HOLD -> PENDING
    /// - COMPLETED 为终态
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        matches!(
            (self, target),
            (JobStatus::Pending, JobStatus::Scheduled)
                | (JobStatus::Pending, JobStatus::OnHold)
                | (JobStatus::Scheduled, JobStatus::Pending)
                | (JobStatus::Scheduled, JobStatus::Completed)
                | (JobStatus::Scheduled, JobStatus::OnHold)
                | (JobStatus::OnHold, JobStatus::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 时段状态 (Slot Status)
// ==========================================
// 红线: IN_PROGRESS / COMPLETED 一经进入即视为锁定, 不可被抢占
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Scheduled,           // 已预约
    InProgress,          // 加工中
    Completed,           // 已完工
    Cancelled,           // 已取消
    OperatorUnavailable, // 操作工不可用
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Scheduled => "SCHEDULED",
            SlotStatus::InProgress => "IN_PROGRESS",
            SlotStatus::Completed => "COMPLETED",
            SlotStatus::Cancelled => "CANCELLED",
            SlotStatus::OperatorUnavailable => "OPERATOR_UNAVAILABLE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(SlotStatus::Scheduled),
            "IN_PROGRESS" => Some(SlotStatus::InProgress),
            "COMPLETED" => Some(SlotStatus::Completed),
            "CANCELLED" => Some(SlotStatus::Cancelled),
            "OPERATOR_UNAVAILABLE" => Some(SlotStatus::OperatorUnavailable),
            _ => None,
        }
    }

    /// 进入该状态后时段是否锁定（不可抢占/删除）
    pub fn implies_locked(&self) -> bool {
        matches!(self, SlotStatus::InProgress | SlotStatus::Completed)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工序类型 (Operation Kind)
// ==========================================
// 零工时工序不占用时间轴, 排产时直接跳过
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Normal,     // 常规机加工
    Inspection, // 检验
    Outsourced, // 外协
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Normal => "NORMAL",
            OperationKind::Inspection => "INSPECTION",
            OperationKind::Outsourced => "OUTSOURCED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NORMAL" => Some(OperationKind::Normal),
            "INSPECTION" => Some(OperationKind::Inspection),
            "OUTSOURCED" => Some(OperationKind::Outsourced),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 冲突类型 (Conflict Type)
// ==========================================
// 冲突校验器输出的分类, 每类冲突必须携带 reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    SequenceViolation,      // 工序顺序冲突
    LagTimeViolation,       // 切割/水刀滞留时间不足
    MachineConflict,        // 机台时间重叠
    OperatorConflict,       // 操作工时间重叠
    ShiftHoursViolation,    // 班次时间外
    CompatibilityViolation, // 机台/工序类型不匹配
    CapacityWarning,        // 操作工当日负荷超限 (仅提示)
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::SequenceViolation => "SEQUENCE_VIOLATION",
            ConflictType::LagTimeViolation => "LAG_TIME_VIOLATION",
            ConflictType::MachineConflict => "MACHINE_CONFLICT",
            ConflictType::OperatorConflict => "OPERATOR_CONFLICT",
            ConflictType::ShiftHoursViolation => "SHIFT_HOURS_VIOLATION",
            ConflictType::CompatibilityViolation => "COMPATIBILITY_VIOLATION",
            ConflictType::CapacityWarning => "CAPACITY_WARNING",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 冲突严重度 (Conflict Severity)
// ==========================================
// CRITICAL 阻断提交; HIGH/MEDIUM 仅提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Medium => "MEDIUM",
            ConflictSeverity::High => "HIGH",
            ConflictSeverity::Critical => "CRITICAL",
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, ConflictSeverity::Critical)
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 被抢占工单重排结果 (Reschedule Outcome)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RescheduleOutcome {
    Rescheduled, // 重排成功
    Failed,      // 无可用产能
    Error,       // 重排过程出错
}

impl RescheduleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RescheduleOutcome::Rescheduled => "RESCHEDULED",
            RescheduleOutcome::Failed => "FAILED",
            RescheduleOutcome::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RESCHEDULED" => Some(RescheduleOutcome::Rescheduled),
            "FAILED" => Some(RescheduleOutcome::Failed),
            "ERROR" => Some(RescheduleOutcome::Error),
            _ => None,
        }
    }
}

// ==========================================
// 撤销操作类型 (Undo Action Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UndoActionType {
    Displacement, // 抢占排产
    Reschedule,   // 强制重排
    ManualAdjust, // 人工调整
}

impl UndoActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndoActionType::Displacement => "DISPLACEMENT",
            UndoActionType::Reschedule => "RESCHEDULE",
            UndoActionType::ManualAdjust => "MANUAL_ADJUST",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DISPLACEMENT" => Some(UndoActionType::Displacement),
            "RESCHEDULE" => Some(UndoActionType::Reschedule),
            "MANUAL_ADJUST" => Some(UndoActionType::ManualAdjust),
            _ => None,
        }
    }
}

impl fmt::Display for UndoActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
