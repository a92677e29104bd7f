// ==========================================
// 机加工车间排产系统 - 操作工仓储
// ==========================================
// 职责: operator / operator_skill / operator_calendar 数据访问
// 红线: 无日历行 = 非工作日
// ==========================================

use crate::domain::operator::{Operator, OperatorSkill, WorkingHours};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// QualifiedOperatorRow - 机台资质行 (操作工 + 技能)
// ==========================================
#[derive(Debug, Clone)]
pub struct QualifiedOperatorRow {
    pub operator: Operator,
    pub skill: OperatorSkill,
}

// ==========================================
// OperatorRepository - 操作工仓储
// ==========================================
pub struct OperatorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OperatorRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_operator(row: &Row) -> rusqlite::Result<Operator> {
        Ok(Operator {
            operator_id: row.get("operator_id")?,
            name: row.get("name")?,
            active: row.get::<_, i64>("active")? != 0,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    pub fn insert(&self, operator: &Operator) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO operator (operator_id, name, active) VALUES (?, ?, ?)",
            params![operator.operator_id, operator.name, operator.active as i64],
        )?;
        Ok(())
    }

    pub fn insert_skill(&self, skill: &OperatorSkill) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO operator_skill (operator_id, machine_id, proficiency, preference_rank)
               VALUES (?, ?, ?, ?)"#,
            params![
                skill.operator_id,
                skill.machine_id,
                skill.proficiency,
                skill.preference_rank,
            ],
        )?;
        Ok(())
    }

    /// 写入/覆盖单日班次
    pub fn upsert_calendar(
        &self,
        operator_id: &str,
        date: NaiveDate,
        hours: &WorkingHours,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_calendar_in(&conn, operator_id, date, hours)
    }

    pub fn upsert_calendar_in(
        conn: &Connection,
        operator_id: &str,
        date: NaiveDate,
        hours: &WorkingHours,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT OR REPLACE INTO operator_calendar (
                    operator_id, work_date, start_minute, end_minute, is_overnight, is_working
                ) VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                operator_id,
                date,
                hours.start_minute,
                hours.end_minute,
                hours.is_overnight as i64,
                hours.is_working as i64,
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_id(&self, operator_id: &str) -> RepositoryResult<Option<Operator>> {
        let conn = self.get_conn()?;
        let op = conn
            .query_row(
                "SELECT * FROM operator WHERE operator_id = ?",
                [operator_id],
                Self::map_operator,
            )
            .optional()?;
        Ok(op)
    }

    /// 机台的资质操作工 (偏好序升序, 熟练度降序)
    pub fn find_qualified_for_machine_in(
        conn: &Connection,
        machine_id: &str,
    ) -> RepositoryResult<Vec<QualifiedOperatorRow>> {
        let mut stmt = conn.prepare(
            r#"SELECT o.operator_id, o.name, o.active,
                      s.machine_id, s.proficiency, s.preference_rank
               FROM operator_skill s
               JOIN operator o ON o.operator_id = s.operator_id
               WHERE s.machine_id = ? AND o.active = 1
               ORDER BY s.preference_rank ASC, s.proficiency DESC, o.operator_id ASC"#,
        )?;
        let rows = stmt
            .query_map([machine_id], |row| {
                Ok(QualifiedOperatorRow {
                    operator: Operator {
                        operator_id: row.get("operator_id")?,
                        name: row.get("name")?,
                        active: row.get::<_, i64>("active")? != 0,
                    },
                    skill: OperatorSkill {
                        operator_id: row.get("operator_id")?,
                        machine_id: row.get("machine_id")?,
                        proficiency: row.get("proficiency")?,
                        preference_rank: row.get("preference_rank")?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 操作工单日班次窗口; 无日历行视为非工作日
    pub fn working_hours_in(
        conn: &Connection,
        operator_id: &str,
        date: NaiveDate,
    ) -> RepositoryResult<WorkingHours> {
        let hours = conn
            .query_row(
                r#"SELECT start_minute, end_minute, is_overnight, is_working
                   FROM operator_calendar
                   WHERE operator_id = ? AND work_date = ?"#,
                params![operator_id, date],
                |row| {
                    Ok(WorkingHours {
                        start_minute: row.get(0)?,
                        end_minute: row.get(1)?,
                        is_overnight: row.get::<_, i64>(2)? != 0,
                        is_working: row.get::<_, i64>(3)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(hours.unwrap_or_else(WorkingHours::non_working))
    }

}
