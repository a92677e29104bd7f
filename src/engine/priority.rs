// ==========================================
// 机加工车间排产系统 - 优先级引擎
// ==========================================
// 职责: 工单紧急度评分
// 红线: 纯函数 - 相同输入必须得到相同分数 (幂等)
// ==========================================
// 评分公式:
//   score = (10 - explicit_priority) * 100
//         + due_date_factor + customer_weight + frequency_bonus
// ==========================================

use crate::domain::job::Job;
use chrono::NaiveDate;

/// 逾期加分基数
const OVERDUE_BASE: f64 = 200.0;
/// 逾期每日递增
const OVERDUE_PER_DAY: f64 = 10.0;
/// 逾期加分上限
const OVERDUE_CAP: f64 = 500.0;
/// 7 日内交付加分
const DUE_WITHIN_7D: f64 = 150.0;
/// 14 日内交付加分
const DUE_WITHIN_14D: f64 = 100.0;
/// 远期衰减起点
const DECAY_BASE: f64 = 50.0;
/// 远期每日衰减
const DECAY_PER_DAY: f64 = 2.0;
/// 频次加分: 每单加分
const FREQUENCY_PER_JOB: f64 = 2.0;
/// 频次加分上限
const FREQUENCY_CAP: f64 = 20.0;

// ==========================================
// PriorityEngine - 优先级引擎
// ==========================================
pub struct PriorityEngine;

impl PriorityEngine {
    /// 计算工单优先级分数
    ///
    /// # 参数
    /// - `job`: 工单 (显式优先级/交付日期/客户权重)
    /// - `customer_recent_jobs`: 该客户近期工单数 (频次加分输入)
    /// - `today`: 评分基准日
    ///
    /// # 红线
    /// 纯函数, 不读库不写库
    pub fn compute_score(job: &Job, customer_recent_jobs: i64, today: NaiveDate) -> f64 {
        let explicit = job.explicit_priority.clamp(1, 10);
        let base = ((10 - explicit) as f64) * 100.0;
        let due = Self::due_date_factor(job.effective_deadline(), today);
        let frequency = ((customer_recent_jobs as f64) * FREQUENCY_PER_JOB).min(FREQUENCY_CAP);
        base + due + job.customer_weight + frequency
    }

    /// 交期临近度因子
    ///
    /// - 逾期: 加分最大, 随逾期天数递增 (封顶)
    /// - 7/14 日内: 阶梯加分
    /// - 远期: 随交期后延向 0 衰减
    pub fn due_date_factor(deadline: Option<NaiveDate>, today: NaiveDate) -> f64 {
        let Some(deadline) = deadline else {
            return 0.0;
        };
        let days = (deadline - today).num_days();
        if days < 0 {
            (OVERDUE_BASE + (-days as f64) * OVERDUE_PER_DAY).min(OVERDUE_CAP)
        } else if days <= 7 {
            DUE_WITHIN_7D
        } else if days <= 14 {
            DUE_WITHIN_14D
        } else {
            (DECAY_BASE - ((days - 14) as f64) * DECAY_PER_DAY).max(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::JobStatus;
    use chrono::Utc;

    fn job(explicit_priority: i32, due_in_days: i64, customer_weight: f64) -> (Job, NaiveDate) {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let job = Job {
            job_id: "j1".to_string(),
            job_no: "J-001".to_string(),
            customer_code: "C01".to_string(),
            customer_weight,
            order_date: Some(today),
            due_date: Some(today + chrono::Duration::days(due_in_days)),
            promised_date: None,
            explicit_priority,
            priority_score: 0.0,
            status: JobStatus::Pending,
            locked: false,
            lock_reason: None,
            auto_scheduled: false,
            planned_start_date: None,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };
        (job, today)
    }

    #[test]
    fn test_score_idempotent() {
        let (j, today) = job(3, 10, 25.0);
        let a = PriorityEngine::compute_score(&j, 4, today);
        let b = PriorityEngine::compute_score(&j, 4, today);
        assert_eq!(a, b);
    }

    #[test]
    fn test_explicit_priority_dominates() {
        let (high, today) = job(1, 30, 0.0);
        let (low, _) = job(9, 30, 0.0);
        assert!(
            PriorityEngine::compute_score(&high, 0, today)
                > PriorityEngine::compute_score(&low, 0, today)
        );
    }

    #[test]
    fn test_due_date_tiers() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let d = |days: i64| Some(today + chrono::Duration::days(days));

        // 逾期加分随天数递增且封顶
        assert!(
            PriorityEngine::due_date_factor(d(-10), today)
                > PriorityEngine::due_date_factor(d(-1), today)
        );
        assert_eq!(PriorityEngine::due_date_factor(d(-100), today), OVERDUE_CAP);

        // 阶梯
        assert_eq!(PriorityEngine::due_date_factor(d(3), today), DUE_WITHIN_7D);
        assert_eq!(PriorityEngine::due_date_factor(d(10), today), DUE_WITHIN_14D);

        // 远期衰减到 0
        assert!(PriorityEngine::due_date_factor(d(20), today) < DUE_WITHIN_14D);
        assert_eq!(PriorityEngine::due_date_factor(d(365), today), 0.0);

        // 无交期不加分
        assert_eq!(PriorityEngine::due_date_factor(None, today), 0.0);
    }

    #[test]
    fn test_frequency_bonus_capped() {
        let (j, today) = job(5, 30, 0.0);
        let few = PriorityEngine::compute_score(&j, 2, today);
        let many = PriorityEngine::compute_score(&j, 100, today);
        assert!(many > few);
        assert_eq!(
            many,
            PriorityEngine::compute_score(&j, 10, today)
        );
    }
}
