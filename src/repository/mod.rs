// ==========================================
// 机加工车间排产系统 - 数据仓储层
// ==========================================
// 职责: 数据访问, SQL 只出现在本层
// 红线: 引擎层不拼 SQL; 跨仓储事务由引擎持锁 + *_in 关联函数完成
// ==========================================

pub mod conflict_log_repo;
pub mod displacement_repo;
pub mod error;
pub mod job_repo;
pub mod machine_repo;
pub mod operator_repo;
pub mod slot_repo;
pub mod undo_repo;

// 重导出
pub use conflict_log_repo::{ConflictLogRecord, ConflictLogRepository};
pub use displacement_repo::DisplacementLogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use job_repo::JobRepository;
pub use machine_repo::MachineRepository;
pub use operator_repo::{OperatorRepository, QualifiedOperatorRow};
pub use slot_repo::{CandidateSlotRow, SlotRepository};
pub use undo_repo::UndoRepository;
