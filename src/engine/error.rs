// ==========================================
// 机加工车间排产系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: DependencyBlocked 是刻意的不可排产状态, 不是缺陷
// ==========================================

use crate::domain::types::ConflictSeverity;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型 (排产失败的完整分类)
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("前置工单未完工, 暂不可排产: {blocking:?}")]
    DependencyBlocked { blocking: Vec<String> },

    #[error("无可用产能: job={job_id}, {detail}")]
    NoCapacity { job_id: String, detail: String },

    #[error("排产校验冲突 ({severity}): {message}")]
    ValidationConflict {
        severity: ConflictSeverity,
        message: String,
    },

    #[error("可释放产能不足: 需要{required_hours:.1}小时, 可释放{available_hours:.1}小时")]
    InsufficientDisplacement {
        required_hours: f64,
        available_hours: f64,
    },

    #[error("撤销不可用: {reason}")]
    UndoUnavailable { reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScheduleError {
    /// 是否为"搜索穷尽"类失败 (可尝试抢占)
    pub fn is_no_capacity(&self) -> bool {
        matches!(self, ScheduleError::NoCapacity { .. })
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, ScheduleError>;
