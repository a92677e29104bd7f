// ==========================================
// 机加工车间排产系统 - 引擎层
// ==========================================
// 职责: 排产/抢占/校验/撤销的业务规则
// 分工: scheduler 找时间窗, displacement 腾时间窗,
//       conflict_validator 把闸门, undo_service 兜底恢复
// ==========================================

pub mod calendar;
pub mod conflict_validator;
pub mod dependency;
pub mod displacement;
pub mod error;
pub mod events;
pub mod priority;
pub mod scheduler;
pub mod undo_service;

pub use calendar::{CalendarProvider, DbCalendarProvider, FixedWeekCalendarProvider};
pub use conflict_validator::{Conflict, ConflictValidator, ProposedSlot, ValidationReport};
pub use dependency::{DbDependencyChecker, DependencyCheck, DependencyChecker};
pub use displacement::{
    DisplacedJobOutcome, DisplacementCandidate, DisplacementEngine, DisplacementOpportunities,
    DisplacementOptions, DisplacementResult, ScheduleWithDisplacementResult,
};
pub use error::{EngineResult, ScheduleError};
pub use events::{
    AffectedJob, AvailabilityChangeHandler, NoopEventPublisher, ScheduleEvent,
    ScheduleEventPublisher,
};
pub use priority::PriorityEngine;
pub use scheduler::{ScheduleOutcome, ScheduleRequest, ScheduledOperation, SlotScheduler};
pub use undo_service::{UndoOutcome, UndoService};
