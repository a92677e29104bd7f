// ==========================================
// 机加工车间排产系统 - 冲突校验引擎
// ==========================================
// 职责: 对拟提交的预约做全量约束检查
// 红线: 纯读不写; 所有检查独立执行, 不短路;
//       仅 CRITICAL 冲突阻断提交, 负荷告警永不阻断
// ==========================================

use crate::config::SchedulerConfig;
use crate::domain::job::JobOperation;
use crate::domain::types::{ConflictSeverity, ConflictType};
use crate::engine::calendar::CalendarProvider;
use crate::engine::error::{EngineResult, ScheduleError};
use crate::repository::{JobRepository, MachineRepository, SlotRepository};
use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// ==========================================
// ProposedSlot - 拟提交预约
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedSlot {
    pub job_id: String,
    pub operation_id: String,
    pub machine_id: String,
    pub operator_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
}

// ==========================================
// Conflict - 单条冲突
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub message: String,
    pub suggestion: String,
}

// ==========================================
// ValidationReport - 校验报告
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,            // 无任何冲突 (不含告警)
    pub conflicts: Vec<Conflict>,  // CRITICAL / HIGH
    pub warnings: Vec<Conflict>,   // MEDIUM (仅提示)
    pub can_proceed: bool,         // 无 CRITICAL 冲突
    pub suggestions: Vec<String>,  // 去重后的处置建议
}

impl ValidationReport {
    pub fn has_critical(&self) -> bool {
        !self.can_proceed
    }
}

/// 冲突类型 → 处置建议
fn suggestion_for(conflict_type: ConflictType) -> &'static str {
    match conflict_type {
        ConflictType::SequenceViolation => "先重排前置工序或调整本工序开工时间",
        ConflictType::LagTimeViolation => "将开工时间推迟到切割完成滞留期之后",
        ConflictType::MachineConflict => "尝试其他时间窗或同组替代机台",
        ConflictType::OperatorConflict => "尝试其他资质操作工或其他时间窗",
        ConflictType::ShiftHoursViolation => "将时间窗调整到操作工班次内",
        ConflictType::CompatibilityViolation => "改派与工序类型匹配的机台",
        ConflictType::CapacityWarning => "关注操作工当日负荷, 必要时分流",
    }
}

// ==========================================
// ConflictValidator - 冲突校验引擎
// ==========================================
pub struct ConflictValidator {
    conn: Arc<Mutex<Connection>>,
    config: SchedulerConfig,
    calendar: Arc<dyn CalendarProvider>,
}

impl ConflictValidator {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: SchedulerConfig,
        calendar: Arc<dyn CalendarProvider>,
    ) -> Self {
        Self {
            conn,
            config,
            calendar,
        }
    }

    /// 校验拟提交预约 (独立调用入口)
    pub fn validate(&self, proposed: &ProposedSlot) -> EngineResult<ValidationReport> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| crate::repository::RepositoryError::LockError(e.to_string()))?;
        self.validate_in(&conn, proposed)
    }

    /// 校验拟提交预约 (事务内入口)
    ///
    /// 所有检查独立执行, 汇总后统一输出
    pub fn validate_in(&self, conn: &Connection, proposed: &ProposedSlot) -> EngineResult<ValidationReport> {
        if proposed.end_at <= proposed.start_at {
            return Err(ScheduleError::ValidationConflict {
                severity: ConflictSeverity::Critical,
                message: "时间窗结束必须晚于开始".to_string(),
            });
        }

        let operation = JobRepository::find_operation_by_id_in(conn, &proposed.operation_id)?
            .ok_or_else(|| ScheduleError::NotFound {
                entity: "JobOperation".to_string(),
                id: proposed.operation_id.clone(),
            })?;

        let mut conflicts: Vec<Conflict> = Vec::new();
        let mut warnings: Vec<Conflict> = Vec::new();

        self.check_sequence_and_lag(conn, proposed, &operation, &mut conflicts)?;
        self.check_machine_overlap(conn, proposed, &mut conflicts)?;
        self.check_operator_overlap(conn, proposed, &mut conflicts)?;
        self.check_shift_hours(conn, proposed, &mut conflicts)?;
        self.check_compatibility(conn, proposed, &operation, &mut conflicts)?;
        self.check_capacity(conn, proposed, &mut warnings)?;

        let can_proceed = !conflicts.iter().any(|c| c.severity.is_blocking());
        let mut suggestions: Vec<String> = conflicts
            .iter()
            .chain(warnings.iter())
            .map(|c| c.suggestion.clone())
            .collect();
        suggestions.dedup();

        Ok(ValidationReport {
            is_valid: conflicts.is_empty(),
            can_proceed,
            conflicts,
            warnings,
            suggestions,
        })
    }

    // ----- 工序顺序 + 切割滞留 -----
    fn check_sequence_and_lag(
        &self,
        conn: &Connection,
        proposed: &ProposedSlot,
        operation: &JobOperation,
        conflicts: &mut Vec<Conflict>,
    ) -> EngineResult<()> {
        let siblings = JobRepository::find_operations_in(conn, &proposed.job_id)?;
        let lag = Duration::minutes(self.config.cutting_lag_min());

        for sibling in siblings
            .iter()
            .filter(|s| s.operation_id != operation.operation_id)
        {
            let slots = SlotRepository::find_by_operation_in(conn, &sibling.operation_id)?;
            if slots.is_empty() {
                continue;
            }

            if sibling.seq_no > operation.seq_no {
                // 后续工序已排在本工序开始之前
                if slots.iter().any(|s| s.start_at < proposed.start_at) {
                    conflicts.push(Conflict {
                        conflict_type: ConflictType::SequenceViolation,
                        severity: ConflictSeverity::Critical,
                        message: format!(
                            "后续工序 {} (seq={}) 已排在拟提交时段之前",
                            sibling.op_name, sibling.seq_no
                        ),
                        suggestion: suggestion_for(ConflictType::SequenceViolation).to_string(),
                    });
                }
            } else {
                let Some(last_end) = slots.iter().map(|s| s.end_at).max() else {
                    continue;
                };
                // 前置工序结束晚于本工序开始
                if last_end > proposed.start_at {
                    conflicts.push(Conflict {
                        conflict_type: ConflictType::SequenceViolation,
                        severity: ConflictSeverity::Critical,
                        message: format!(
                            "前置工序 {} (seq={}) 结束于 {} 晚于拟提交开工时间",
                            sibling.op_name, sibling.seq_no, last_end
                        ),
                        suggestion: suggestion_for(ConflictType::SequenceViolation).to_string(),
                    });
                }
                // 切割/水刀滞留期不足
                if sibling.is_cutting_class() && last_end + lag > proposed.start_at {
                    conflicts.push(Conflict {
                        conflict_type: ConflictType::LagTimeViolation,
                        severity: ConflictSeverity::Critical,
                        message: format!(
                            "切割工序 {} 结束于 {}, 距拟提交开工不足{}小时滞留期",
                            sibling.op_name, last_end, self.config.cutting_lag_hours
                        ),
                        suggestion: suggestion_for(ConflictType::LagTimeViolation).to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    // ----- 机台占用 -----
    fn check_machine_overlap(
        &self,
        conn: &Connection,
        proposed: &ProposedSlot,
        conflicts: &mut Vec<Conflict>,
    ) -> EngineResult<()> {
        let overlaps = SlotRepository::find_machine_overlaps_in(
            conn,
            &proposed.machine_id,
            proposed.start_at,
            proposed.end_at,
        )?;
        for slot in overlaps
            .iter()
            .filter(|s| s.operation_id != proposed.operation_id)
        {
            conflicts.push(Conflict {
                conflict_type: ConflictType::MachineConflict,
                severity: ConflictSeverity::Critical,
                message: format!(
                    "机台 {} 在 {} ~ {} 已被工单 {} 占用",
                    proposed.machine_id, slot.start_at, slot.end_at, slot.job_id
                ),
                suggestion: suggestion_for(ConflictType::MachineConflict).to_string(),
            });
        }
        Ok(())
    }

    // ----- 操作工占用 -----
    fn check_operator_overlap(
        &self,
        conn: &Connection,
        proposed: &ProposedSlot,
        conflicts: &mut Vec<Conflict>,
    ) -> EngineResult<()> {
        let overlaps = SlotRepository::find_operator_overlaps_in(
            conn,
            &proposed.operator_id,
            proposed.start_at,
            proposed.end_at,
        )?;
        for slot in overlaps
            .iter()
            .filter(|s| s.operation_id != proposed.operation_id)
        {
            conflicts.push(Conflict {
                conflict_type: ConflictType::OperatorConflict,
                severity: ConflictSeverity::Critical,
                message: format!(
                    "操作工 {} 在 {} ~ {} 已有预约 (工单 {})",
                    proposed.operator_id, slot.start_at, slot.end_at, slot.job_id
                ),
                suggestion: suggestion_for(ConflictType::OperatorConflict).to_string(),
            });
        }
        Ok(())
    }

    // ----- 班次时间 (含跨夜) -----
    fn check_shift_hours(
        &self,
        conn: &Connection,
        proposed: &ProposedSlot,
        conflicts: &mut Vec<Conflict>,
    ) -> EngineResult<()> {
        let date = proposed.start_at.date();
        let hours = self
            .calendar
            .working_hours(conn, &proposed.operator_id, date)?;

        let mut covered = hours.covers(date, proposed.start_at, proposed.end_at);
        if !covered {
            // 开工时刻可能落在前一日跨夜班次里
            let prev = date - Duration::days(1);
            let prev_hours = self.calendar.working_hours(conn, &proposed.operator_id, prev)?;
            if prev_hours.is_overnight {
                covered = prev_hours.covers(prev, proposed.start_at, proposed.end_at);
            }
        }

        if !covered {
            let message = if !hours.is_working {
                format!("操作工 {} 在 {} 为非工作日", proposed.operator_id, date)
            } else {
                format!(
                    "时间窗 {} ~ {} 超出操作工 {} 的班次范围",
                    proposed.start_at, proposed.end_at, proposed.operator_id
                )
            };
            conflicts.push(Conflict {
                conflict_type: ConflictType::ShiftHoursViolation,
                severity: ConflictSeverity::High,
                message,
                suggestion: suggestion_for(ConflictType::ShiftHoursViolation).to_string(),
            });
        }
        Ok(())
    }

    // ----- 机台/工序类型匹配 -----
    fn check_compatibility(
        &self,
        conn: &Connection,
        proposed: &ProposedSlot,
        operation: &JobOperation,
        conflicts: &mut Vec<Conflict>,
    ) -> EngineResult<()> {
        let machine = MachineRepository::find_by_id_in(conn, &proposed.machine_id)?.ok_or_else(
            || ScheduleError::NotFound {
                entity: "Machine".to_string(),
                id: proposed.machine_id.clone(),
            },
        )?;
        if !machine.compatible_with(operation.op_kind) {
            conflicts.push(Conflict {
                conflict_type: ConflictType::CompatibilityViolation,
                severity: ConflictSeverity::Critical,
                message: format!(
                    "工序类型 {} 与机台 {} (检验台={}) 不匹配",
                    operation.op_kind, machine.machine_id, machine.is_inspection
                ),
                suggestion: suggestion_for(ConflictType::CompatibilityViolation).to_string(),
            });
        }
        Ok(())
    }

    // ----- 操作工当日负荷 (仅提示, 永不阻断) -----
    fn check_capacity(
        &self,
        conn: &Connection,
        proposed: &ProposedSlot,
        warnings: &mut Vec<Conflict>,
    ) -> EngineResult<()> {
        let date = proposed.start_at.date();
        let hours = self
            .calendar
            .working_hours(conn, &proposed.operator_id, date)?;
        let shift_len = hours.duration_min();
        if shift_len <= 0 {
            return Ok(());
        }

        let day_start = date.and_time(chrono::NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);
        let existing = SlotRepository::find_operator_overlaps_in(
            conn,
            &proposed.operator_id,
            day_start,
            day_end,
        )?;
        let committed: i64 = existing
            .iter()
            .filter(|s| s.operation_id != proposed.operation_id)
            .map(|s| {
                let s0 = s.start_at.max(day_start);
                let s1 = s.end_at.min(day_end);
                (s1 - s0).num_minutes().max(0)
            })
            .sum();
        let proposed_min = (proposed.end_at.min(day_end) - proposed.start_at.max(day_start))
            .num_minutes()
            .max(0);
        let total = committed + proposed_min;

        if total > shift_len {
            let utilization = (total as f64) / (shift_len as f64) * 100.0;
            warnings.push(Conflict {
                conflict_type: ConflictType::CapacityWarning,
                severity: ConflictSeverity::Medium,
                message: format!(
                    "操作工 {} 当日承诺 {} 分钟, 超过班次 {} 分钟 (利用率 {:.0}%)",
                    proposed.operator_id, total, shift_len, utilization
                ),
                suggestion: suggestion_for(ConflictType::CapacityWarning).to_string(),
            });
        }
        Ok(())
    }
}
