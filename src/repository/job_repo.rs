// ==========================================
// 机加工车间排产系统 - 工单仓储
// ==========================================
// 职责: job / job_operation / job_dependency 数据访问
// 红线: 状态写入必须经过 JobStatus::can_transition_to
// ==========================================

use crate::domain::job::{Job, JobOperation};
use crate::domain::types::{JobStatus, OperationKind};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// JobRepository - 工单仓储
// ==========================================
pub struct JobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl JobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn map_job(row: &Row) -> rusqlite::Result<Job> {
        let status_raw: String = row.get("status")?;
        let status = JobStatus::from_str(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown job status: {}", status_raw).into(),
            )
        })?;
        Ok(Job {
            job_id: row.get("job_id")?,
            job_no: row.get("job_no")?,
            customer_code: row.get("customer_code")?,
            customer_weight: row.get("customer_weight")?,
            order_date: row.get("order_date")?,
            due_date: row.get("due_date")?,
            promised_date: row.get("promised_date")?,
            explicit_priority: row.get("explicit_priority")?,
            priority_score: row.get("priority_score")?,
            status,
            locked: row.get::<_, i64>("locked")? != 0,
            lock_reason: row.get("lock_reason")?,
            auto_scheduled: row.get::<_, i64>("auto_scheduled")? != 0,
            planned_start_date: row.get("planned_start_date")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn map_operation(row: &Row) -> rusqlite::Result<JobOperation> {
        let kind_raw: String = row.get("op_kind")?;
        let op_kind = OperationKind::from_str(&kind_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown op kind: {}", kind_raw).into(),
            )
        })?;
        Ok(JobOperation {
            operation_id: row.get("operation_id")?,
            job_id: row.get("job_id")?,
            seq_no: row.get("seq_no")?,
            op_name: row.get("op_name")?,
            op_kind,
            machine_id: row.get("machine_id")?,
            machine_group_id: row.get("machine_group_id")?,
            est_duration_min: row.get("est_duration_min")?,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 插入工单
    pub fn insert(&self, job: &Job) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, job)
    }

    pub fn insert_in(conn: &Connection, job: &Job) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO job (
                    job_id, job_no, customer_code, customer_weight,
                    order_date, due_date, promised_date,
                    explicit_priority, priority_score, status,
                    locked, lock_reason, auto_scheduled, planned_start_date,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                job.job_id,
                job.job_no,
                job.customer_code,
                job.customer_weight,
                job.order_date,
                job.due_date,
                job.promised_date,
                job.explicit_priority,
                job.priority_score,
                job.status.as_str(),
                job.locked as i64,
                job.lock_reason,
                job.auto_scheduled as i64,
                job.planned_start_date,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    }

    /// 插入工序
    pub fn insert_operation(&self, op: &JobOperation) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_operation_in(&conn, op)
    }

    pub fn insert_operation_in(conn: &Connection, op: &JobOperation) -> RepositoryResult<()> {
        // machine_id 与 machine_group_id 至多其一, 都不指定则排产时全机台兜底
        if op.machine_id.is_some() && op.machine_group_id.is_some() {
            return Err(RepositoryError::FieldValueError {
                field: "machine_id/machine_group_id".to_string(),
                message: format!(
                    "operation {} cannot pin both a machine and a machine group",
                    op.operation_id
                ),
            });
        }
        conn.execute(
            r#"INSERT INTO job_operation (
                    operation_id, job_id, seq_no, op_name, op_kind,
                    machine_id, machine_group_id, est_duration_min
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                op.operation_id,
                op.job_id,
                op.seq_no,
                op.op_name,
                op.op_kind.as_str(),
                op.machine_id,
                op.machine_group_id,
                op.est_duration_min,
            ],
        )?;
        Ok(())
    }

    /// 添加工单前置依赖
    pub fn add_dependency(&self, job_id: &str, depends_on_job_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO job_dependency (job_id, depends_on_job_id) VALUES (?, ?)",
            params![job_id, depends_on_job_id],
        )?;
        Ok(())
    }

    /// 状态迁移 (带合法性校验)
    pub fn transition_status_in(
        conn: &Connection,
        job_id: &str,
        target: JobStatus,
    ) -> RepositoryResult<()> {
        let current_raw: String = conn
            .query_row("SELECT status FROM job WHERE job_id = ?", [job_id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Job".to_string(),
                id: job_id.to_string(),
            })?;
        let current = JobStatus::from_str(&current_raw).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("unknown job status: {}", current_raw),
            }
        })?;
        if current == target {
            return Ok(());
        }
        if !current.can_transition_to(target) {
            return Err(RepositoryError::InvalidStateTransition {
                from: current.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        conn.execute(
            "UPDATE job SET status = ?, updated_at = datetime('now') WHERE job_id = ?",
            params![target.as_str(), job_id],
        )?;
        Ok(())
    }

    /// 排产成功后的工单回写 (分数/状态/开工日期/自动排产标志)
    pub fn record_schedule_success_in(
        conn: &Connection,
        job_id: &str,
        priority_score: f64,
        planned_start_date: NaiveDate,
    ) -> RepositoryResult<()> {
        Self::transition_status_in(conn, job_id, JobStatus::Scheduled)?;
        conn.execute(
            r#"UPDATE job
               SET priority_score = ?, planned_start_date = ?, auto_scheduled = 1,
                   updated_at = datetime('now')
               WHERE job_id = ?"#,
            params![priority_score, planned_start_date, job_id],
        )?;
        Ok(())
    }

    /// 被抢占后退回待排产
    pub fn reset_to_pending_in(conn: &Connection, job_id: &str) -> RepositoryResult<()> {
        Self::transition_status_in(conn, job_id, JobStatus::Pending)?;
        conn.execute(
            r#"UPDATE job
               SET auto_scheduled = 0, planned_start_date = NULL,
                   updated_at = datetime('now')
               WHERE job_id = ?"#,
            [job_id],
        )?;
        Ok(())
    }

    /// 撤销恢复专用: 直接回写快照中的状态 (整体状态替换, 不走迁移校验)
    pub fn restore_state_in(
        conn: &Connection,
        job_id: &str,
        status: JobStatus,
        auto_scheduled: bool,
    ) -> RepositoryResult<()> {
        let updated = conn.execute(
            r#"UPDATE job
               SET status = ?, auto_scheduled = ?, updated_at = datetime('now')
               WHERE job_id = ?"#,
            params![status.as_str(), auto_scheduled as i64, job_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Job".to_string(),
                id: job_id.to_string(),
            });
        }
        Ok(())
    }

    /// 撤销恢复专用: 回写计划开工日期 (快照无排产时段时清空)
    pub fn update_planned_start_in(
        conn: &Connection,
        job_id: &str,
        planned_start: Option<NaiveDate>,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"UPDATE job
               SET planned_start_date = ?, updated_at = datetime('now')
               WHERE job_id = ?"#,
            params![planned_start, job_id],
        )?;
        Ok(())
    }

    /// 锁定/解锁工单
    pub fn set_locked(&self, job_id: &str, locked: bool, reason: Option<&str>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE job SET locked = ?, lock_reason = ?, updated_at = datetime('now') WHERE job_id = ?",
            params![locked as i64, reason, job_id],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按ID查询工单
    pub fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<Job>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, job_id)
    }

    pub fn find_by_id_in(conn: &Connection, job_id: &str) -> RepositoryResult<Option<Job>> {
        let job = conn
            .query_row("SELECT * FROM job WHERE job_id = ?", [job_id], Self::map_job)
            .optional()?;
        Ok(job)
    }

    /// 查询工单的全部工序 (按 seq_no 升序)
    pub fn find_operations_in(conn: &Connection, job_id: &str) -> RepositoryResult<Vec<JobOperation>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM job_operation WHERE job_id = ? ORDER BY seq_no ASC",
        )?;
        let ops = stmt
            .query_map([job_id], Self::map_operation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ops)
    }

    /// 按ID查询工序
    pub fn find_operation_by_id_in(
        conn: &Connection,
        operation_id: &str,
    ) -> RepositoryResult<Option<JobOperation>> {
        let op = conn
            .query_row(
                "SELECT * FROM job_operation WHERE operation_id = ?",
                [operation_id],
                Self::map_operation,
            )
            .optional()?;
        Ok(op)
    }

    /// 未完工的前置工单号 (依赖检查)
    pub fn find_blocking_prerequisites_in(
        conn: &Connection,
        job_id: &str,
    ) -> RepositoryResult<Vec<String>> {
        let mut stmt = conn.prepare(
            r#"SELECT j.job_no FROM job_dependency d
               JOIN job j ON j.job_id = d.depends_on_job_id
               WHERE d.job_id = ? AND j.status != 'COMPLETED'
               ORDER BY j.job_no"#,
        )?;
        let nos = stmt
            .query_map([job_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nos)
    }

    /// 客户近期工单数 (优先级频次加分输入)
    pub fn count_recent_jobs_for_customer_in(
        conn: &Connection,
        customer_code: &str,
        since: NaiveDate,
    ) -> RepositoryResult<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job WHERE customer_code = ? AND order_date >= ?",
            params![customer_code, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
