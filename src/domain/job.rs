// ==========================================
// 机加工车间排产系统 - 工单领域模型
// ==========================================
// 职责: 工单主数据与工艺路线 (工序) 定义
// 红线: locked=true 的工单不可被抢占引擎删除或改期
// ==========================================

use crate::domain::types::{JobStatus, OperationKind};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// Job - 工单
// ==========================================
// 对齐: job 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,                       // 工单ID
    pub job_no: String,                       // 工单号 (业务唯一)
    pub customer_code: String,                // 客户代码
    pub customer_weight: f64,                 // 客户权重 (优先级加分)
    pub order_date: Option<NaiveDate>,        // 下单日期
    pub due_date: Option<NaiveDate>,          // 交期
    pub promised_date: Option<NaiveDate>,     // 承诺交付日期
    pub explicit_priority: i32,               // 显式优先级 1-10 (1 最高)
    pub priority_score: f64,                  // 计算优先级分数
    pub status: JobStatus,                    // 工单状态
    pub locked: bool,                         // 锁定标志
    pub lock_reason: Option<String>,          // 锁定原因
    pub auto_scheduled: bool,                 // 是否由引擎自动排产
    pub planned_start_date: Option<NaiveDate>, // 计划开工日期
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Job {
    /// 有效交付期限: 承诺日期优先, 否则取交期
    pub fn effective_deadline(&self) -> Option<NaiveDate> {
        self.promised_date.or(self.due_date)
    }

    /// 是否处于保护期 (承诺日期距今不足 firm_zone_days 天)
    ///
    /// 无承诺/交期的工单不受保护期约束
    pub fn in_firm_zone(&self, today: NaiveDate, firm_zone_days: i64) -> bool {
        match self.effective_deadline() {
            Some(deadline) => (deadline - today).num_days() <= firm_zone_days,
            None => false,
        }
    }
}

// ==========================================
// JobOperation - 工序 (工艺路线行)
// ==========================================
// 约束: machine_id 与 machine_group_id 二选一
// 对齐: job_operation 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOperation {
    pub operation_id: String,             // 工序ID
    pub job_id: String,                   // 所属工单
    pub seq_no: i32,                      // 工序顺序号
    pub op_name: String,                  // 工序名称 (如 SAW / HMC / 检验)
    pub op_kind: OperationKind,           // 工序类型
    pub machine_id: Option<String>,       // 指定机台
    pub machine_group_id: Option<String>, // 指定机台组 (可替代机台)
    pub est_duration_min: i64,            // 预估工时 (分钟)
}

/// 切割类工序名称特征 (切割/水刀完工后需要滞留期)
const CUTTING_NAME_PATTERNS: &[&str] = &["SAW", "CUT", "WATERJET", "切割", "水刀", "锯"];

impl JobOperation {
    /// 零工时工序 (跳过排产, 不占用时间轴)
    pub fn is_zero_duration(&self) -> bool {
        self.est_duration_min <= 0
    }

    /// 是否为切割/水刀类工序
    ///
    /// 按工序名称匹配, 大小写不敏感
    pub fn is_cutting_class(&self) -> bool {
        let upper = self.op_name.to_uppercase();
        CUTTING_NAME_PATTERNS.iter().any(|p| upper.contains(p))
    }

    /// 本工序结束后, 下一工序开工前的最小间隔 (分钟)
    pub fn buffer_after_min(&self, default_buffer_min: i64, cutting_lag_min: i64) -> i64 {
        if self.is_cutting_class() {
            cutting_lag_min
        } else {
            default_buffer_min
        }
    }
}
