// ==========================================
// 机加工车间排产系统 - 抢占审计领域模型
// ==========================================
// 职责: 一次抢占事务的审计记录 (只追加, 不修改)
// 红线: 仅抢占引擎写入
// ==========================================

use crate::domain::types::RescheduleOutcome;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ==========================================
// DisplacementLog - 抢占事务头
// ==========================================
// 对齐: displacement_log 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacementLog {
    pub log_id: String,            // 事务ID
    pub trigger_job_id: String,    // 触发工单
    pub executed_at: NaiveDateTime, // 执行时刻
    pub dry_run: bool,             // 试算模式
    pub success: bool,             // 整体是否成功
    pub displaced_count: i32,      // 被抢占工单数
    pub total_hours_freed: f64,    // 释放产能 (小时)
    pub threshold_used: f64,       // 使用的优先级差阈值
    pub execution_ms: i64,         // 执行耗时 (毫秒)
    pub impact_json: Option<JsonValue>, // 影响摘要 (JSON)
}

impl DisplacementLog {
    /// 创建新的抢占事务头 (尚未执行完成)
    pub fn new(trigger_job_id: String, threshold_used: f64, dry_run: bool) -> Self {
        Self {
            log_id: Uuid::new_v4().to_string(),
            trigger_job_id,
            executed_at: chrono::Utc::now().naive_utc(),
            dry_run,
            success: false,
            displaced_count: 0,
            total_hours_freed: 0.0,
            threshold_used,
            execution_ms: 0,
            impact_json: None,
        }
    }

    /// 设置影响摘要 (转换为JSON)
    pub fn with_impact(mut self, impact: &DisplacementImpact) -> Self {
        self.impact_json = serde_json::to_value(impact).ok();
        self
    }
}

// ==========================================
// DisplacementDetail - 单个被抢占工单明细
// ==========================================
// 对齐: displacement_detail 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacementDetail {
    pub detail_id: String,
    pub log_id: String,
    pub displaced_job_id: String,       // 被抢占工单
    pub machine_id: String,             // 原机台
    pub original_start: NaiveDateTime,  // 原开始时刻
    pub original_end: NaiveDateTime,    // 原结束时刻
    pub hours_freed: f64,               // 释放小时数
    pub reason: String,                 // 抢占理由
    pub reschedule_outcome: Option<RescheduleOutcome>, // 重排结果
    pub new_start: Option<NaiveDateTime>, // 重排后的新开始时刻
    pub delay_hours: Option<f64>,       // 相对原计划的延迟 (小时)
}

impl DisplacementDetail {
    pub fn new(
        log_id: String,
        displaced_job_id: String,
        machine_id: String,
        original_start: NaiveDateTime,
        original_end: NaiveDateTime,
        hours_freed: f64,
        reason: String,
    ) -> Self {
        Self {
            detail_id: Uuid::new_v4().to_string(),
            log_id,
            displaced_job_id,
            machine_id,
            original_start,
            original_end,
            hours_freed,
            reason,
            reschedule_outcome: None,
            new_start: None,
            delay_hours: None,
        }
    }
}

// ==========================================
// DisplacementImpact - 影响摘要结构
// ==========================================
// 存入 displacement_log.impact_json, 供外部看板消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacementImpact {
    pub customers_affected: Vec<String>, // 受影响客户
    pub machines_affected: Vec<String>,  // 受影响机台
    pub total_hours_freed: f64,          // 释放产能合计 (小时)
    pub average_delay_hours: f64,        // 被抢占工单平均延迟估计 (小时)
    pub threshold_used: f64,             // 使用的阈值
}

impl DisplacementImpact {
    /// 生成简短摘要文本
    pub fn summary_text(&self) -> String {
        format!(
            "释放{:.1}小时, 影响{}个客户/{}台机台, 平均延迟{:.1}小时",
            self.total_hours_freed,
            self.customers_affected.len(),
            self.machines_affected.len(),
            self.average_delay_hours
        )
    }
}
