// ==========================================
// 机加工车间排产系统 - 排产时段领域模型
// ==========================================
// 职责: 一次 (机台, 操作工, 时间窗) 具体预约
// 红线: 同机台时段不重叠; 同操作工时段不重叠
// ==========================================

use crate::domain::types::SlotStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// ScheduleSlot - 排产时段
// ==========================================
// 对齐: schedule_slot 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub slot_id: String,        // 时段ID
    pub job_id: String,         // 所属工单
    pub operation_id: String,   // 所属工序
    pub machine_id: String,     // 机台
    pub operator_id: String,    // 操作工
    pub chunk_no: i32,          // 分块序号 (跨日拆分时 >1)
    pub start_at: NaiveDateTime, // 开始时刻 (含)
    pub end_at: NaiveDateTime,  // 结束时刻 (不含)
    pub status: SlotStatus,     // 时段状态
    pub locked: bool,           // 锁定标志 (开工后置位)
    pub created_at: NaiveDateTime,
}

impl ScheduleSlot {
    /// 创建新的已预约时段
    pub fn new(
        job_id: String,
        operation_id: String,
        machine_id: String,
        operator_id: String,
        chunk_no: i32,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
    ) -> Self {
        Self {
            slot_id: Uuid::new_v4().to_string(),
            job_id,
            operation_id,
            machine_id,
            operator_id,
            chunk_no,
            start_at,
            end_at,
            status: SlotStatus::Scheduled,
            locked: false,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// 与给定时间段是否重叠 (半开区间口径)
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start_at < end && start < self.end_at
    }

    /// 时段时长 (分钟)
    pub fn duration_min(&self) -> i64 {
        (self.end_at - self.start_at).num_minutes()
    }

    /// 是否处于锁定态 (显式锁定或状态隐含锁定)
    pub fn is_locked(&self) -> bool {
        self.locked || self.status.implies_locked()
    }
}
