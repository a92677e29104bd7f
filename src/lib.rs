// ==========================================
// 机加工车间排产系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 车间作业排产核心 (插单抢占 + 快照撤销)
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

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ConflictSeverity, ConflictType, JobStatus, OperationKind, RescheduleOutcome, SlotStatus,
    UndoActionType,
};

// 领域实体
pub use domain::{
    DisplacementDetail, DisplacementImpact, DisplacementLog, Job, JobOperation, Machine,
    MachineGroup, Operator, OperatorSkill, ScheduleSlot, ScheduleSnapshot, UndoOperation,
    WorkingHours,
};

// 引擎
pub use engine::{
    AvailabilityChangeHandler, ConflictValidator, DisplacementEngine, NoopEventPublisher,
    PriorityEngine, ScheduleEvent, ScheduleEventPublisher, SlotScheduler, UndoService,
};

// 引擎契约结果
pub use engine::{
    DisplacementOpportunities, ScheduleOutcome, ScheduleRequest, ScheduleWithDisplacementResult,
    UndoOutcome, ValidationReport,
};

// 错误类型
pub use engine::error::{EngineResult, ScheduleError};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "机加工车间排产系统";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";

// ==========================================
// 预编译检查
// ==========================================
