// ==========================================
// 机加工车间排产系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑, 不含引擎逻辑
// ==========================================

pub mod displacement;
pub mod job;
pub mod machine;
pub mod operator;
pub mod slot;
pub mod types;
pub mod undo;

// 重导出核心类型
pub use displacement::{DisplacementDetail, DisplacementImpact, DisplacementLog};
pub use job::{Job, JobOperation};
pub use machine::{Machine, MachineGroup};
pub use operator::{Operator, OperatorSkill, WorkingHours};
pub use slot::ScheduleSlot;
pub use types::{
    ConflictSeverity, ConflictType, JobStatus, OperationKind, RescheduleOutcome, SlotStatus,
    UndoActionType,
};
pub use undo::{ScheduleSnapshot, UndoOperation};
