// ==========================================
// 机加工车间排产系统 - 抢占审计仓储
// ==========================================
// 职责: displacement_log / displacement_detail 数据访问
// 红线: 只追加; 明细的重排结果回填不修改已记录的原时段信息
// ==========================================

use crate::domain::displacement::{DisplacementDetail, DisplacementLog};
use crate::domain::types::RescheduleOutcome;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// DisplacementLogRepository - 抢占审计仓储
// ==========================================
pub struct DisplacementLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DisplacementLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_log(row: &Row) -> rusqlite::Result<DisplacementLog> {
        let impact_raw: Option<String> = row.get("impact_json")?;
        Ok(DisplacementLog {
            log_id: row.get("log_id")?,
            trigger_job_id: row.get("trigger_job_id")?,
            executed_at: row.get("executed_at")?,
            dry_run: row.get::<_, i64>("dry_run")? != 0,
            success: row.get::<_, i64>("success")? != 0,
            displaced_count: row.get("displaced_count")?,
            total_hours_freed: row.get("total_hours_freed")?,
            threshold_used: row.get("threshold_used")?,
            execution_ms: row.get("execution_ms")?,
            impact_json: impact_raw.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }

    fn map_detail(row: &Row) -> rusqlite::Result<DisplacementDetail> {
        let outcome_raw: Option<String> = row.get("reschedule_outcome")?;
        Ok(DisplacementDetail {
            detail_id: row.get("detail_id")?,
            log_id: row.get("log_id")?,
            displaced_job_id: row.get("displaced_job_id")?,
            machine_id: row.get("machine_id")?,
            original_start: row.get("original_start")?,
            original_end: row.get("original_end")?,
            hours_freed: row.get("hours_freed")?,
            reason: row.get("reason")?,
            reschedule_outcome: outcome_raw.and_then(|s| RescheduleOutcome::from_str(&s)),
            new_start: row.get("new_start")?,
            delay_hours: row.get("delay_hours")?,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    pub fn insert_log_in(conn: &Connection, log: &DisplacementLog) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO displacement_log (
                    log_id, trigger_job_id, executed_at, dry_run, success,
                    displaced_count, total_hours_freed, threshold_used,
                    execution_ms, impact_json
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                log.log_id,
                log.trigger_job_id,
                log.executed_at,
                log.dry_run as i64,
                log.success as i64,
                log.displaced_count,
                log.total_hours_freed,
                log.threshold_used,
                log.execution_ms,
                log.impact_json.as_ref().map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn insert_detail_in(conn: &Connection, detail: &DisplacementDetail) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO displacement_detail (
                    detail_id, log_id, displaced_job_id, machine_id,
                    original_start, original_end, hours_freed, reason,
                    reschedule_outcome, new_start, delay_hours
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                detail.detail_id,
                detail.log_id,
                detail.displaced_job_id,
                detail.machine_id,
                detail.original_start,
                detail.original_end,
                detail.hours_freed,
                detail.reason,
                detail.reschedule_outcome.map(|o| o.as_str()),
                detail.new_start,
                detail.delay_hours,
            ],
        )?;
        Ok(())
    }

    /// 回填单个被抢占工单的重排结果
    pub fn update_detail_outcome_in(
        conn: &Connection,
        detail_id: &str,
        outcome: RescheduleOutcome,
        new_start: Option<NaiveDateTime>,
        delay_hours: Option<f64>,
    ) -> RepositoryResult<()> {
        let updated = conn.execute(
            r#"UPDATE displacement_detail
               SET reschedule_outcome = ?, new_start = ?, delay_hours = ?
               WHERE detail_id = ?"#,
            params![outcome.as_str(), new_start, delay_hours, detail_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "DisplacementDetail".to_string(),
                id: detail_id.to_string(),
            });
        }
        Ok(())
    }

    /// 事务收尾: 回写成功标志/计数/耗时/影响摘要
    pub fn finalize_log_in(conn: &Connection, log: &DisplacementLog) -> RepositoryResult<()> {
        conn.execute(
            r#"UPDATE displacement_log
               SET success = ?, displaced_count = ?, total_hours_freed = ?,
                   execution_ms = ?, impact_json = ?
               WHERE log_id = ?"#,
            params![
                log.success as i64,
                log.displaced_count,
                log.total_hours_freed,
                log.execution_ms,
                log.impact_json.as_ref().map(|v| v.to_string()),
                log.log_id,
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_log(&self, log_id: &str) -> RepositoryResult<Option<DisplacementLog>> {
        let conn = self.get_conn()?;
        let log = conn
            .query_row(
                "SELECT * FROM displacement_log WHERE log_id = ?",
                [log_id],
                Self::map_log,
            )
            .optional()?;
        Ok(log)
    }

    pub fn find_logs_for_job(&self, trigger_job_id: &str) -> RepositoryResult<Vec<DisplacementLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM displacement_log WHERE trigger_job_id = ? ORDER BY executed_at DESC",
        )?;
        let logs = stmt
            .query_map([trigger_job_id], Self::map_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    pub fn find_details(&self, log_id: &str) -> RepositoryResult<Vec<DisplacementDetail>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM displacement_detail WHERE log_id = ? ORDER BY original_start ASC",
        )?;
        let details = stmt
            .query_map([log_id], Self::map_detail)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(details)
    }
}
