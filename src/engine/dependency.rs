// ==========================================
// 机加工车间排产系统 - 工单依赖协作方
// ==========================================
// 职责: 判定工单的前置依赖是否满足
// 说明: 未满足依赖是刻意的不可排产状态, 不是缺陷
// ==========================================

use crate::engine::error::EngineResult;
use crate::repository::JobRepository;
use rusqlite::Connection;

/// 依赖检查结果
#[derive(Debug, Clone)]
pub struct DependencyCheck {
    pub can_schedule: bool,
    /// 阻塞的前置工单号
    pub blocking_job_nos: Vec<String>,
}

/// 工单依赖协作方
pub trait DependencyChecker: Send + Sync {
    fn can_job_be_scheduled(&self, conn: &Connection, job_id: &str) -> EngineResult<DependencyCheck>;
}

// ==========================================
// DbDependencyChecker - 基于 job_dependency 表
// ==========================================
// 阻塞判定: 前置工单未完工
#[derive(Debug, Default)]
pub struct DbDependencyChecker;

impl DependencyChecker for DbDependencyChecker {
    fn can_job_be_scheduled(&self, conn: &Connection, job_id: &str) -> EngineResult<DependencyCheck> {
        let blocking = JobRepository::find_blocking_prerequisites_in(conn, job_id)?;
        Ok(DependencyCheck {
            can_schedule: blocking.is_empty(),
            blocking_job_nos: blocking,
        })
    }
}
