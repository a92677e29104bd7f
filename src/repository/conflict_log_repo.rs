// ==========================================
// 机加工车间排产系统 - 冲突日志仓储
// ==========================================
// 职责: 排产失败原因落库, 供外部看板/告警消费
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ==========================================
// ConflictLogRecord - 冲突日志行
// ==========================================
#[derive(Debug, Clone)]
pub struct ConflictLogRecord {
    pub conflict_id: String,
    pub job_id: String,
    pub operation_id: Option<String>,
    pub reason: String,
    pub detail: Option<String>,
    pub logged_at: NaiveDateTime,
}

// ==========================================
// ConflictLogRepository - 冲突日志仓储
// ==========================================
pub struct ConflictLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConflictLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_record(row: &Row) -> rusqlite::Result<ConflictLogRecord> {
        Ok(ConflictLogRecord {
            conflict_id: row.get("conflict_id")?,
            job_id: row.get("job_id")?,
            operation_id: row.get("operation_id")?,
            reason: row.get("reason")?,
            detail: row.get("detail")?,
            logged_at: row.get("logged_at")?,
        })
    }

    /// 记录一次排产失败原因
    pub fn insert_in(
        conn: &Connection,
        job_id: &str,
        operation_id: Option<&str>,
        reason: &str,
        detail: Option<&str>,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO conflict_log (conflict_id, job_id, operation_id, reason, detail, logged_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                Uuid::new_v4().to_string(),
                job_id,
                operation_id,
                reason,
                detail,
                chrono::Utc::now().naive_utc(),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_job(&self, job_id: &str) -> RepositoryResult<Vec<ConflictLogRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM conflict_log WHERE job_id = ? ORDER BY logged_at DESC",
        )?;
        let records = stmt
            .query_map([job_id], Self::map_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
