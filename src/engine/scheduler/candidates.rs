// ==========================================
// 机加工车间排产系统 - 资源候选收集与排序
// ==========================================
// 职责: 为单个工序生成 (机台, 操作工) 候选对
// 层级: 指定机台 → 所属/指定机台组 → 任意启用机台兜底;
//       层内按 指派偏好序 → 熟练度 → 未来负荷 → 效率 排序,
//       末位按 ID 保证确定性
// ==========================================

use crate::domain::job::JobOperation;
use crate::domain::machine::Machine;
use crate::engine::error::EngineResult;
use crate::repository::{MachineRepository, OperatorRepository, SlotRepository};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::collections::HashSet;

// ==========================================
// ResourceCandidate - 资源候选对
// ==========================================
#[derive(Debug, Clone)]
pub(crate) struct ResourceCandidate {
    pub machine_id: String,
    pub operator_id: String,
    pub efficiency: f64,
    pub preference_rank: i32,
    pub proficiency: i32,
    pub load_min: i64,
}

impl ResourceCandidate {
    /// 工序在本机台上的实际工时 (按效率折算, 分钟)
    pub fn effective_duration_min(&self, est_duration_min: i64) -> i64 {
        let efficiency = if self.efficiency > 0.0 { self.efficiency } else { 1.0 };
        ((est_duration_min as f64) / efficiency).ceil() as i64
    }
}

/// 收集工序的全部可行 (机台, 操作工) 候选对
///
/// 三级候选串联: 指定机台的合格操作工在最前; 指定机台无人可用时
/// 由其所在机台组 (或工序直接指定的机台组) 顶替; 仍无可用者
/// 退到任意启用机台。排产引擎按序逐对试排, 首个落位者胜出,
/// 指定机台有窗可用时后两级自然不会被触达
pub(crate) fn collect_for_operation(
    conn: &Connection,
    op: &JobOperation,
    load_from: NaiveDateTime,
) -> EngineResult<Vec<ResourceCandidate>> {
    let pinned = match &op.machine_id {
        Some(machine_id) => {
            MachineRepository::find_by_id_in(conn, machine_id)?.filter(|m| m.active)
        }
        None => None,
    };

    let mut tiers: Vec<Vec<Machine>> = Vec::new();
    if let Some(machine) = &pinned {
        tiers.push(vec![machine.clone()]);
    }
    let group_id = op
        .machine_group_id
        .clone()
        .or_else(|| pinned.as_ref().and_then(|m| m.machine_group_id.clone()));
    if let Some(group_id) = &group_id {
        tiers.push(MachineRepository::find_group_members_in(conn, group_id)?);
    }
    tiers.push(MachineRepository::find_active_in(conn)?);

    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();
    for machines in &tiers {
        let mut tier = Vec::new();
        for machine in machines.iter().filter(|m| m.compatible_with(op.op_kind)) {
            if !seen.insert(machine.machine_id.clone()) {
                continue;
            }
            for row in OperatorRepository::find_qualified_for_machine_in(conn, &machine.machine_id)? {
                let load_min = SlotRepository::operator_load_minutes_in(
                    conn,
                    &row.operator.operator_id,
                    load_from,
                )?;
                tier.push(ResourceCandidate {
                    machine_id: machine.machine_id.clone(),
                    operator_id: row.operator.operator_id.clone(),
                    efficiency: machine.efficiency,
                    preference_rank: row.skill.preference_rank,
                    proficiency: row.skill.proficiency,
                    load_min,
                });
            }
        }
        rank(&mut tier);
        candidates.extend(tier);
    }
    Ok(candidates)
}

/// 层内综合排序: 偏好序小者、熟练度高者、负荷轻者、效率高者在前
fn rank(candidates: &mut [ResourceCandidate]) {
    candidates.sort_by(|a, b| {
        a.preference_rank
            .cmp(&b.preference_rank)
            .then(b.proficiency.cmp(&a.proficiency))
            .then(a.load_min.cmp(&b.load_min))
            .then(b.efficiency.total_cmp(&a.efficiency))
            .then(a.machine_id.cmp(&b.machine_id))
            .then(a.operator_id.cmp(&b.operator_id))
    });
}
