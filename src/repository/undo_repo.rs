// ==========================================
// 机加工车间排产系统 - 撤销/快照仓储
// ==========================================
// 职责: undo_operation / undo_snapshot 数据访问
// 红线: 消费标记必须与恢复动作同事务
// ==========================================

use crate::domain::types::{JobStatus, UndoActionType};
use crate::domain::undo::{ScheduleSnapshot, UndoOperation};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// UndoRepository - 撤销仓储
// ==========================================
pub struct UndoRepository {
    conn: Arc<Mutex<Connection>>,
}

impl UndoRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_operation(row: &Row) -> rusqlite::Result<UndoOperation> {
        let type_raw: String = row.get("action_type")?;
        let action_type = UndoActionType::from_str(&type_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown undo action type: {}", type_raw).into(),
            )
        })?;
        Ok(UndoOperation {
            undo_id: row.get("undo_id")?,
            action_type,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
            expires_at: row.get("expires_at")?,
            consumed: row.get::<_, i64>("consumed")? != 0,
            consumed_at: row.get("consumed_at")?,
        })
    }

    fn map_snapshot(row: &Row) -> rusqlite::Result<ScheduleSnapshot> {
        let status_raw: String = row.get("job_status")?;
        let job_status = JobStatus::from_str(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown job status: {}", status_raw).into(),
            )
        })?;
        Ok(ScheduleSnapshot {
            snapshot_id: row.get("snapshot_id")?,
            undo_id: row.get("undo_id")?,
            job_id: row.get("job_id")?,
            operation_id: row.get("operation_id")?,
            chunk_no: row.get("chunk_no")?,
            was_scheduled: row.get::<_, i64>("was_scheduled")? != 0,
            machine_id: row.get("machine_id")?,
            operator_id: row.get("operator_id")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            duration_min: row.get("duration_min")?,
            job_status,
            auto_scheduled: row.get::<_, i64>("auto_scheduled")? != 0,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    pub fn insert_operation_in(conn: &Connection, op: &UndoOperation) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO undo_operation (
                    undo_id, action_type, description, created_at, expires_at,
                    consumed, consumed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                op.undo_id,
                op.action_type.as_str(),
                op.description,
                op.created_at,
                op.expires_at,
                op.consumed as i64,
                op.consumed_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_snapshot_in(conn: &Connection, snap: &ScheduleSnapshot) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO undo_snapshot (
                    snapshot_id, undo_id, job_id, operation_id, chunk_no,
                    was_scheduled, machine_id, operator_id, start_at, end_at,
                    duration_min, job_status, auto_scheduled
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                snap.snapshot_id,
                snap.undo_id,
                snap.job_id,
                snap.operation_id,
                snap.chunk_no,
                snap.was_scheduled as i64,
                snap.machine_id,
                snap.operator_id,
                snap.start_at,
                snap.end_at,
                snap.duration_min,
                snap.job_status.as_str(),
                snap.auto_scheduled as i64,
            ],
        )?;
        Ok(())
    }

    /// 标记撤销操作已消费 (与恢复动作同事务调用)
    pub fn mark_consumed_in(
        conn: &Connection,
        undo_id: &str,
        consumed_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let updated = conn.execute(
            "UPDATE undo_operation SET consumed = 1, consumed_at = ? WHERE undo_id = ? AND consumed = 0",
            params![consumed_at, undo_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::BusinessRuleViolation(format!(
                "undo operation {} already consumed or missing",
                undo_id
            )));
        }
        Ok(())
    }

    /// 清理过期撤销操作 (快照随外键级联删除)
    pub fn delete_expired(&self, now: NaiveDateTime) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n = conn.execute(
            "DELETE FROM undo_operation WHERE expires_at <= ?",
            params![now],
        )?;
        Ok(n)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_id(&self, undo_id: &str) -> RepositoryResult<Option<UndoOperation>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, undo_id)
    }

    pub fn find_by_id_in(conn: &Connection, undo_id: &str) -> RepositoryResult<Option<UndoOperation>> {
        let op = conn
            .query_row(
                "SELECT * FROM undo_operation WHERE undo_id = ?",
                [undo_id],
                Self::map_operation,
            )
            .optional()?;
        Ok(op)
    }

    /// 仍可撤销的操作 (未消费且未过期), 可按类型过滤
    pub fn find_available(
        &self,
        now: NaiveDateTime,
        action_type: Option<UndoActionType>,
    ) -> RepositoryResult<Vec<UndoOperation>> {
        let conn = self.get_conn()?;
        let mut ops = Vec::new();
        match action_type {
            Some(t) => {
                let mut stmt = conn.prepare(
                    r#"SELECT * FROM undo_operation
                       WHERE consumed = 0 AND expires_at > ? AND action_type = ?
                       ORDER BY created_at DESC"#,
                )?;
                let rows = stmt
                    .query_map(params![now, t.as_str()], Self::map_operation)?
                    .collect::<Result<Vec<_>, _>>()?;
                ops.extend(rows);
            }
            None => {
                let mut stmt = conn.prepare(
                    r#"SELECT * FROM undo_operation
                       WHERE consumed = 0 AND expires_at > ?
                       ORDER BY created_at DESC"#,
                )?;
                let rows = stmt
                    .query_map(params![now], Self::map_operation)?
                    .collect::<Result<Vec<_>, _>>()?;
                ops.extend(rows);
            }
        }
        Ok(ops)
    }

    /// 撤销操作的全部快照行
    pub fn find_snapshots_in(
        conn: &Connection,
        undo_id: &str,
    ) -> RepositoryResult<Vec<ScheduleSnapshot>> {
        let mut stmt = conn.prepare(
            r#"SELECT * FROM undo_snapshot
               WHERE undo_id = ?
               ORDER BY job_id, operation_id, chunk_no"#,
        )?;
        let snaps = stmt
            .query_map([undo_id], Self::map_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snaps)
    }
}
