// ==========================================
// 机加工车间排产系统 - 排产时段仓储
// ==========================================
// 职责: schedule_slot 数据访问
// 红线: 同机台/同操作工的时段重叠必须能被查询到,
//       占用判定只统计 SCHEDULED / IN_PROGRESS / COMPLETED
// ==========================================

use crate::domain::slot::ScheduleSlot;
use crate::domain::types::SlotStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

/// 占用时间轴的时段状态 (CANCELLED / OPERATOR_UNAVAILABLE 不占用)
const OCCUPYING_STATUSES: &str = "('SCHEDULED', 'IN_PROGRESS', 'COMPLETED')";

// ==========================================
// CandidateSlotRow - 抢占候选行 (时段 + 工单摘要)
// ==========================================
#[derive(Debug, Clone)]
pub struct CandidateSlotRow {
    pub slot: ScheduleSlot,
    pub job_no: String,
    pub customer_code: String,
    pub priority_score: f64,
    pub promised_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub job_locked: bool,
}

// ==========================================
// SlotRepository - 排产时段仓储
// ==========================================
pub struct SlotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SlotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_slot(row: &Row) -> rusqlite::Result<ScheduleSlot> {
        let status_raw: String = row.get("status")?;
        let status = SlotStatus::from_str(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown slot status: {}", status_raw).into(),
            )
        })?;
        Ok(ScheduleSlot {
            slot_id: row.get("slot_id")?,
            job_id: row.get("job_id")?,
            operation_id: row.get("operation_id")?,
            machine_id: row.get("machine_id")?,
            operator_id: row.get("operator_id")?,
            chunk_no: row.get("chunk_no")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            status,
            locked: row.get::<_, i64>("locked")? != 0,
            created_at: row.get("created_at")?,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    pub fn insert(&self, slot: &ScheduleSlot) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, slot)
    }

    pub fn insert_in(conn: &Connection, slot: &ScheduleSlot) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO schedule_slot (
                    slot_id, job_id, operation_id, machine_id, operator_id,
                    chunk_no, start_at, end_at, status, locked, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                slot.slot_id,
                slot.job_id,
                slot.operation_id,
                slot.machine_id,
                slot.operator_id,
                slot.chunk_no,
                slot.start_at,
                slot.end_at,
                slot.status.as_str(),
                slot.locked as i64,
                slot.created_at,
            ],
        )?;
        Ok(())
    }

    /// 删除工单的全部时段
    pub fn delete_by_job_in(conn: &Connection, job_id: &str) -> RepositoryResult<usize> {
        let n = conn.execute("DELETE FROM schedule_slot WHERE job_id = ?", [job_id])?;
        Ok(n)
    }

    /// 删除工单指定顺序号起的时段 (部分重排, 前段保留)
    pub fn delete_from_seq_in(
        conn: &Connection,
        job_id: &str,
        from_seq: i32,
    ) -> RepositoryResult<usize> {
        let n = conn.execute(
            r#"DELETE FROM schedule_slot
                WHERE job_id = ?1
                  AND operation_id IN (
                      SELECT operation_id FROM job_operation
                       WHERE job_id = ?1 AND seq_no >= ?2
                  )"#,
            rusqlite::params![job_id, from_seq],
        )?;
        Ok(n)
    }

    /// 更新时段状态; 进入开工/完工态时同步置位锁定标志
    pub fn update_status_in(
        conn: &Connection,
        slot_id: &str,
        status: SlotStatus,
    ) -> RepositoryResult<()> {
        let updated = conn.execute(
            "UPDATE schedule_slot SET status = ?, locked = locked OR ? WHERE slot_id = ?",
            params![status.as_str(), status.implies_locked() as i64, slot_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ScheduleSlot".to_string(),
                id: slot_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_id(&self, slot_id: &str) -> RepositoryResult<Option<ScheduleSlot>> {
        let conn = self.get_conn()?;
        let slot = conn
            .query_row(
                "SELECT * FROM schedule_slot WHERE slot_id = ?",
                [slot_id],
                Self::map_slot,
            )
            .optional()?;
        Ok(slot)
    }

    /// 工单全部时段 (按开始时刻升序)
    pub fn find_by_job(&self, job_id: &str) -> RepositoryResult<Vec<ScheduleSlot>> {
        let conn = self.get_conn()?;
        Self::find_by_job_in(&conn, job_id)
    }

    pub fn find_by_job_in(conn: &Connection, job_id: &str) -> RepositoryResult<Vec<ScheduleSlot>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM schedule_slot WHERE job_id = ? ORDER BY start_at ASC, chunk_no ASC",
        )?;
        let slots = stmt
            .query_map([job_id], Self::map_slot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    /// 工序全部时段 (按分块序号升序)
    pub fn find_by_operation_in(
        conn: &Connection,
        operation_id: &str,
    ) -> RepositoryResult<Vec<ScheduleSlot>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM schedule_slot WHERE operation_id = ? ORDER BY chunk_no ASC",
        )?;
        let slots = stmt
            .query_map([operation_id], Self::map_slot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    /// 机台在 [start, end) 内的占用时段
    pub fn find_machine_overlaps_in(
        conn: &Connection,
        machine_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<ScheduleSlot>> {
        let mut stmt = conn.prepare(&format!(
            r#"SELECT * FROM schedule_slot
               WHERE machine_id = ? AND status IN {OCCUPYING_STATUSES}
                 AND start_at < ? AND end_at > ?
               ORDER BY start_at ASC"#
        ))?;
        let slots = stmt
            .query_map(params![machine_id, end, start], Self::map_slot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    /// 操作工在 [start, end) 内的占用时段
    pub fn find_operator_overlaps_in(
        conn: &Connection,
        operator_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<ScheduleSlot>> {
        let mut stmt = conn.prepare(&format!(
            r#"SELECT * FROM schedule_slot
               WHERE operator_id = ? AND status IN {OCCUPYING_STATUSES}
                 AND start_at < ? AND end_at > ?
               ORDER BY start_at ASC"#
        ))?;
        let slots = stmt
            .query_map(params![operator_id, end, start], Self::map_slot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    /// 操作工自某时刻起一年内的已承诺总分钟数 (候选排序负荷口径)
    pub fn operator_load_minutes_in(
        conn: &Connection,
        operator_id: &str,
        from: NaiveDateTime,
    ) -> RepositoryResult<i64> {
        let horizon = from + chrono::Duration::days(365);
        let slots = Self::find_operator_overlaps_in(conn, operator_id, from, horizon)?;
        Ok(slots.iter().map(|s| s.duration_min()).sum())
    }

    /// 抢占候选池: 锚点之后开工、未锁定、优先级分数严格低于阈值的时段
    ///
    /// 排序: 分数升序 (最低优先级先被抢占), 再按开始时刻升序
    pub fn find_displacement_candidates_in(
        conn: &Connection,
        anchor: NaiveDateTime,
        score_below: f64,
    ) -> RepositoryResult<Vec<CandidateSlotRow>> {
        let mut stmt = conn.prepare(
            r#"SELECT s.*, j.job_no, j.customer_code, j.priority_score,
                      j.promised_date, j.due_date, j.locked AS job_locked
               FROM schedule_slot s
               JOIN job j ON j.job_id = s.job_id
               WHERE s.status = 'SCHEDULED' AND s.locked = 0
                 AND s.start_at >= ?
                 AND j.priority_score < ?
               ORDER BY j.priority_score ASC, s.start_at ASC"#,
        )?;
        let rows = stmt
            .query_map(params![anchor, score_below], |row| {
                let slot = Self::map_slot(row)?;
                Ok(CandidateSlotRow {
                    slot,
                    job_no: row.get("job_no")?,
                    customer_code: row.get("customer_code")?,
                    priority_score: row.get("priority_score")?,
                    promised_date: row.get("promised_date")?,
                    due_date: row.get("due_date")?,
                    job_locked: row.get::<_, i64>("job_locked")? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 操作工在某日的全部占用时段 (可用性变更处理 / 负荷告警用)
    pub fn find_operator_slots_on_date_in(
        conn: &Connection,
        operator_id: &str,
        day_start: NaiveDateTime,
        day_end: NaiveDateTime,
    ) -> RepositoryResult<Vec<ScheduleSlot>> {
        Self::find_operator_overlaps_in(conn, operator_id, day_start, day_end)
    }
}
