// ==========================================
// 机加工车间排产系统 - 撤销/快照服务
// ==========================================
// 职责: 变更前捕获排产快照, 撤销时整体状态替换恢复
// 红线: 恢复 = 先删当前全部时段再按快照重建, 不做增量合并;
//       消费标记与恢复动作同一事务, 同一快照只能撤销一次
// ==========================================

use crate::config::SchedulerConfig;
use crate::domain::slot::ScheduleSlot;
use crate::domain::types::UndoActionType;
use crate::domain::undo::{ScheduleSnapshot, UndoOperation};
use crate::engine::error::{EngineResult, ScheduleError};
use crate::repository::{JobRepository, RepositoryError, SlotRepository, UndoRepository};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

// ==========================================
// UndoOutcome - 撤销执行结果
// ==========================================
#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub undo_id: String,
    pub jobs_restored: Vec<String>,
    pub slots_removed: usize,
    pub slots_recreated: usize,
}

// ==========================================
// UndoService - 撤销/快照服务
// ==========================================
pub struct UndoService {
    conn: Arc<Mutex<Connection>>,
    config: SchedulerConfig,
    repo: UndoRepository,
}

impl UndoService {
    pub fn new(conn: Arc<Mutex<Connection>>, config: SchedulerConfig) -> Self {
        let repo = UndoRepository::new(conn.clone());
        Self { conn, config, repo }
    }

    /// 创建撤销操作并捕获受影响工单的变更前快照 (独立事务)
    ///
    /// 外部调用方在自行变更排程前留存恢复点的入口;
    /// 引擎内部 (抢占) 走事务内的 `create_operation_in`/`capture_job_in`
    pub fn create_undo_operation(
        &self,
        action_type: UndoActionType,
        description: &str,
        affected_job_ids: &[String],
    ) -> EngineResult<UndoOperation> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let op = self.create_operation_in(&tx, action_type, description.to_string())?;
        let mut captured = 0;
        for job_id in affected_job_ids {
            captured += Self::capture_job_in(&tx, &op.undo_id, job_id)?;
        }
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        info!(
            undo_id = %op.undo_id,
            jobs = affected_job_ids.len(),
            snapshots = captured,
            "撤销恢复点已创建"
        );
        Ok(op)
    }

    /// 创建撤销操作头 (事务内, 变更前调用)
    pub(crate) fn create_operation_in(
        &self,
        conn: &Connection,
        action_type: UndoActionType,
        description: String,
    ) -> EngineResult<UndoOperation> {
        let op = UndoOperation::new(action_type, description, self.config.undo_retention_hours);
        UndoRepository::insert_operation_in(conn, &op)?;
        Ok(op)
    }

    /// 捕获单个工单的当前排产状态 (事务内, 变更前调用)
    ///
    /// 逐 (工序, 分块) 记一行; 从未排产的工序记 was_scheduled=false
    /// 的占位行, 保证恢复目标精确
    pub(crate) fn capture_job_in(
        conn: &Connection,
        undo_id: &str,
        job_id: &str,
    ) -> EngineResult<usize> {
        let job = JobRepository::find_by_id_in(conn, job_id)?.ok_or_else(|| {
            ScheduleError::NotFound {
                entity: "Job".to_string(),
                id: job_id.to_string(),
            }
        })?;

        let mut captured = 0;
        for op in JobRepository::find_operations_in(conn, job_id)? {
            let slots = SlotRepository::find_by_operation_in(conn, &op.operation_id)?;
            if slots.is_empty() {
                let snap = ScheduleSnapshot::unscheduled(
                    undo_id.to_string(),
                    job_id.to_string(),
                    op.operation_id.clone(),
                    job.status,
                    job.auto_scheduled,
                );
                UndoRepository::insert_snapshot_in(conn, &snap)?;
                captured += 1;
                continue;
            }
            for slot in &slots {
                let snap = ScheduleSnapshot {
                    snapshot_id: Uuid::new_v4().to_string(),
                    undo_id: undo_id.to_string(),
                    job_id: job_id.to_string(),
                    operation_id: op.operation_id.clone(),
                    chunk_no: slot.chunk_no,
                    was_scheduled: true,
                    machine_id: Some(slot.machine_id.clone()),
                    operator_id: Some(slot.operator_id.clone()),
                    start_at: Some(slot.start_at),
                    end_at: Some(slot.end_at),
                    duration_min: Some(slot.duration_min()),
                    job_status: job.status,
                    auto_scheduled: job.auto_scheduled,
                };
                UndoRepository::insert_snapshot_in(conn, &snap)?;
                captured += 1;
            }
        }
        Ok(captured)
    }

    /// 执行撤销: 按快照整体恢复排产状态
    pub fn execute_undo(&self, undo_id: &str) -> EngineResult<UndoOutcome> {
        let now = chrono::Utc::now().naive_utc();
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let outcome = self.execute_undo_in(&tx, undo_id, now)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        info!(
            undo_id,
            jobs = outcome.jobs_restored.len(),
            removed = outcome.slots_removed,
            recreated = outcome.slots_recreated,
            "撤销恢复完成"
        );
        Ok(outcome)
    }

    fn execute_undo_in(
        &self,
        conn: &Connection,
        undo_id: &str,
        now: NaiveDateTime,
    ) -> EngineResult<UndoOutcome> {
        let op = UndoRepository::find_by_id_in(conn, undo_id)?.ok_or_else(|| {
            ScheduleError::UndoUnavailable {
                reason: format!("撤销操作 {} 不存在", undo_id),
            }
        })?;
        if op.consumed {
            return Err(ScheduleError::UndoUnavailable {
                reason: format!("撤销操作 {} 已被消费", undo_id),
            });
        }
        if op.is_expired(now) {
            return Err(ScheduleError::UndoUnavailable {
                reason: format!("撤销操作 {} 已超出保留窗口", undo_id),
            });
        }

        let snapshots = UndoRepository::find_snapshots_in(conn, undo_id)?;
        if snapshots.is_empty() {
            return Err(ScheduleError::UndoUnavailable {
                reason: format!("撤销操作 {} 无快照数据", undo_id),
            });
        }

        let mut by_job: BTreeMap<String, Vec<&ScheduleSnapshot>> = BTreeMap::new();
        for snap in &snapshots {
            by_job.entry(snap.job_id.clone()).or_default().push(snap);
        }

        let mut slots_removed = 0;
        let mut slots_recreated = 0;
        let mut jobs_restored = Vec::with_capacity(by_job.len());
        for (job_id, snaps) in &by_job {
            // 整体替换: 先清空当前时段, 再按快照重建
            slots_removed += SlotRepository::delete_by_job_in(conn, job_id)?;
            for snap in snaps.iter().filter(|s| s.was_scheduled) {
                let (Some(machine_id), Some(operator_id), Some(start_at), Some(end_at)) = (
                    snap.machine_id.clone(),
                    snap.operator_id.clone(),
                    snap.start_at,
                    snap.end_at,
                ) else {
                    warn!(snapshot_id = %snap.snapshot_id, "快照字段不完整, 跳过重建");
                    continue;
                };
                let slot = ScheduleSlot::new(
                    job_id.clone(),
                    snap.operation_id.clone(),
                    machine_id,
                    operator_id,
                    snap.chunk_no,
                    start_at,
                    end_at,
                );
                SlotRepository::insert_in(conn, &slot)?;
                slots_recreated += 1;
            }

            // 工单状态按捕获时刻回写 (不走迁移校验)
            if let Some(first) = snaps.first() {
                JobRepository::restore_state_in(conn, job_id, first.job_status, first.auto_scheduled)?;
            }
            let planned_start = snaps
                .iter()
                .filter(|s| s.was_scheduled)
                .filter_map(|s| s.start_at)
                .min()
                .map(|s| s.date());
            JobRepository::update_planned_start_in(conn, job_id, planned_start)?;
            jobs_restored.push(job_id.clone());
        }

        UndoRepository::mark_consumed_in(conn, undo_id, now)?;

        Ok(UndoOutcome {
            undo_id: undo_id.to_string(),
            jobs_restored,
            slots_removed,
            slots_recreated,
        })
    }

    /// 当前仍可撤销的操作列表
    pub fn available_operations(
        &self,
        action_type: Option<UndoActionType>,
    ) -> EngineResult<Vec<UndoOperation>> {
        let now = chrono::Utc::now().naive_utc();
        Ok(self.repo.find_available(now, action_type)?)
    }

    /// 清理超出保留窗口的撤销操作 (快照级联删除)
    pub fn cleanup_expired(&self) -> EngineResult<usize> {
        let now = chrono::Utc::now().naive_utc();
        let n = self.repo.delete_expired(now)?;
        if n > 0 {
            info!(count = n, "清理过期撤销操作");
        }
        Ok(n)
    }
}
