// ==========================================
// 机加工车间排产系统 - 撤销/快照领域模型
// ==========================================
// 职责: 变更前状态捕获与精确恢复的载体
// 红线: 快照一经消费不可再次撤销; 过期快照不可恢复
// ==========================================

use crate::domain::types::{JobStatus, UndoActionType};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// UndoOperation - 撤销操作
// ==========================================
// 对齐: undo_operation 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoOperation {
    pub undo_id: String,
    pub action_type: UndoActionType, // 关联的变更类型
    pub description: String,         // 人读描述
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,   // 保留窗口截止
    pub consumed: bool,              // 是否已被撤销消费
    pub consumed_at: Option<NaiveDateTime>,
}

impl UndoOperation {
    pub fn new(action_type: UndoActionType, description: String, retention_hours: i64) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            undo_id: Uuid::new_v4().to_string(),
            action_type,
            description,
            created_at: now,
            expires_at: now + Duration::hours(retention_hours),
            consumed: false,
            consumed_at: None,
        }
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        now >= self.expires_at
    }

}

// ==========================================
// ScheduleSnapshot - 单工序块快照
// ==========================================
// 变更前逐 (工单, 工序, 分块) 捕获; 从未排产的工序也记一行
// (was_scheduled=false), 保证恢复目标精确
// 对齐: undo_snapshot 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub snapshot_id: String,
    pub undo_id: String,
    pub job_id: String,
    pub operation_id: String,
    pub chunk_no: i32,
    pub was_scheduled: bool,            // 捕获时该块是否有预约
    pub machine_id: Option<String>,
    pub operator_id: Option<String>,
    pub start_at: Option<NaiveDateTime>,
    pub end_at: Option<NaiveDateTime>,
    pub duration_min: Option<i64>,
    pub job_status: JobStatus,          // 捕获时工单状态
    pub auto_scheduled: bool,           // 捕获时自动排产标志
}

impl ScheduleSnapshot {
    /// 未排产工序的占位快照
    pub fn unscheduled(
        undo_id: String,
        job_id: String,
        operation_id: String,
        job_status: JobStatus,
        auto_scheduled: bool,
    ) -> Self {
        Self {
            snapshot_id: Uuid::new_v4().to_string(),
            undo_id,
            job_id,
            operation_id,
            chunk_no: 1,
            was_scheduled: false,
            machine_id: None,
            operator_id: None,
            start_at: None,
            end_at: None,
            duration_min: None,
            job_status,
            auto_scheduled,
        }
    }
}
