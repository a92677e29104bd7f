// ==========================================
// 机加工车间排产系统 - 机台仓储
// ==========================================
// 职责: machine / machine_group 数据访问
// 说明: 组层级展开采用有界迭代, 不用递归查询
// ==========================================

use crate::domain::machine::{Machine, MachineGroup};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// 组层级展开的最大迭代层数 (防御环状父子关系)
const MAX_GROUP_DEPTH: usize = 32;

// ==========================================
// MachineRepository - 机台仓储
// ==========================================
pub struct MachineRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MachineRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_machine(row: &Row) -> rusqlite::Result<Machine> {
        Ok(Machine {
            machine_id: row.get("machine_id")?,
            machine_group_id: row.get("machine_group_id")?,
            name: row.get("name")?,
            efficiency: row.get("efficiency")?,
            is_inspection: row.get::<_, i64>("is_inspection")? != 0,
            active: row.get::<_, i64>("active")? != 0,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    pub fn insert(&self, machine: &Machine) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO machine (
                    machine_id, machine_group_id, name, efficiency, is_inspection, active
                ) VALUES (?, ?, ?, ?, ?, ?)"#,
            rusqlite::params![
                machine.machine_id,
                machine.machine_group_id,
                machine.name,
                machine.efficiency,
                machine.is_inspection as i64,
                machine.active as i64,
            ],
        )?;
        Ok(())
    }

    pub fn insert_group(&self, group: &MachineGroup) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO machine_group (group_id, parent_group_id, name) VALUES (?, ?, ?)",
            rusqlite::params![group.group_id, group.parent_group_id, group.name],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_id(&self, machine_id: &str) -> RepositoryResult<Option<Machine>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, machine_id)
    }

    pub fn find_by_id_in(conn: &Connection, machine_id: &str) -> RepositoryResult<Option<Machine>> {
        let machine = conn
            .query_row(
                "SELECT * FROM machine WHERE machine_id = ?",
                [machine_id],
                Self::map_machine,
            )
            .optional()?;
        Ok(machine)
    }

    /// 全部启用机台 (工序未指定机台与机台组时的兜底候选)
    pub fn find_active_in(conn: &Connection) -> RepositoryResult<Vec<Machine>> {
        let mut stmt = conn.prepare("SELECT * FROM machine WHERE active = 1 ORDER BY machine_id")?;
        let machines = stmt
            .query_map([], Self::map_machine)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(machines)
    }

    /// 展开机台组 (含子组) 的全部组ID
    ///
    /// 有界迭代遍历 parent_group_id 邻接, 最多 MAX_GROUP_DEPTH 层
    pub fn expand_group_ids_in(
        conn: &Connection,
        group_id: &str,
    ) -> RepositoryResult<Vec<String>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut frontier = vec![group_id.to_string()];
        seen.insert(group_id.to_string());

        let mut stmt =
            conn.prepare("SELECT group_id FROM machine_group WHERE parent_group_id = ?")?;

        for _depth in 0..MAX_GROUP_DEPTH {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for gid in &frontier {
                let children = stmt
                    .query_map([gid], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                for child in children {
                    if seen.insert(child.clone()) {
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }

        let mut ids: Vec<String> = seen.into_iter().collect();
        ids.sort();
        Ok(ids)
    }

    /// 机台组 (含子组) 内的启用机台
    pub fn find_group_members_in(
        conn: &Connection,
        group_id: &str,
    ) -> RepositoryResult<Vec<Machine>> {
        let group_ids = Self::expand_group_ids_in(conn, group_id)?;
        let mut members = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT * FROM machine WHERE machine_group_id = ? AND active = 1 ORDER BY machine_id",
        )?;
        for gid in &group_ids {
            let machines = stmt
                .query_map([gid], Self::map_machine)?
                .collect::<Result<Vec<_>, _>>()?;
            members.extend(machines);
        }
        Ok(members)
    }
}
