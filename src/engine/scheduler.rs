// ==========================================
// 机加工车间排产系统 - 时段排产引擎
// ==========================================
// 职责: 为工单的全部工序寻找可行 (机台, 操作工, 时间窗) 并落库
// 红线: 单工单排产必须原子 - 任一工序排不下, 整单回滚不留残片;
//       工序按顺序号单调推进, 切割类工序后继开工须满足滞留期
// ==========================================

mod candidates;
mod window;

use crate::config::SchedulerConfig;
use crate::domain::job::{Job, JobOperation};
use crate::domain::slot::ScheduleSlot;
use crate::domain::types::{ConflictSeverity, JobStatus};
use crate::engine::calendar::CalendarProvider;
use crate::engine::conflict_validator::{ConflictValidator, ProposedSlot};
use crate::engine::dependency::DependencyChecker;
use crate::engine::error::{EngineResult, ScheduleError};
use crate::engine::priority::PriorityEngine;
use crate::repository::{ConflictLogRepository, JobRepository, RepositoryError, SlotRepository};
use candidates::ResourceCandidate;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

// ==========================================
// ScheduleRequest - 排产请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub job_id: String,
    /// 指定开工日期 (缺省按交期倒推)
    pub force_start_date: Option<NaiveDate>,
    /// 已排产工单先清空再重排
    pub force_reschedule: bool,
    /// 部分重排: 只清空并重排顺序号 >= 此值的工序,
    /// 之前的工序时段原样保留 (须配合 force_reschedule)
    pub from_sequence: Option<i32>,
}

impl ScheduleRequest {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            force_start_date: None,
            force_reschedule: false,
            from_sequence: None,
        }
    }
}

// ==========================================
// ScheduledOperation - 单工序排产结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledOperation {
    pub operation_id: String,
    pub op_name: String,
    pub seq_no: i32,
    /// 分块时段 (零工时工序为空)
    pub slots: Vec<ScheduleSlot>,
}

// ==========================================
// ScheduleOutcome - 整单排产结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub job_id: String,
    pub job_no: String,
    pub priority_score: f64,
    pub operations: Vec<ScheduledOperation>,
    pub start_at: Option<NaiveDateTime>,
    pub end_at: Option<NaiveDateTime>,
}

impl ScheduleOutcome {
    /// 实际落库的时段总数
    pub fn slot_count(&self) -> usize {
        self.operations.iter().map(|o| o.slots.len()).sum()
    }
}

// ==========================================
// SlotScheduler - 时段排产引擎
// ==========================================
pub struct SlotScheduler {
    conn: Arc<Mutex<Connection>>,
    config: SchedulerConfig,
    calendar: Arc<dyn CalendarProvider>,
    dependency: Arc<dyn DependencyChecker>,
    validator: ConflictValidator,
}

impl SlotScheduler {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: SchedulerConfig,
        calendar: Arc<dyn CalendarProvider>,
        dependency: Arc<dyn DependencyChecker>,
    ) -> Self {
        let validator = ConflictValidator::new(conn.clone(), config.clone(), calendar.clone());
        Self {
            conn,
            config,
            calendar,
            dependency,
            validator,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 整单排产 (独立事务)
    ///
    /// 失败时回滚全部时段, 并将业务失败原因写入 conflict_log
    pub fn schedule_job(&self, request: &ScheduleRequest) -> EngineResult<ScheduleOutcome> {
        let today = chrono::Local::now().date_naive();
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        match self.schedule_job_in(&tx, request, today) {
            Ok(outcome) => {
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                info!(
                    job_no = %outcome.job_no,
                    slots = outcome.slot_count(),
                    score = outcome.priority_score,
                    "工单排产成功"
                );
                Ok(outcome)
            }
            Err(e) => {
                drop(tx); // 回滚, 不留残片
                self.log_failure(&conn, &request.job_id, &e);
                Err(e)
            }
        }
    }

    /// 业务失败原因落库 (回滚后的自动提交连接)
    fn log_failure(&self, conn: &Connection, job_id: &str, error: &ScheduleError) {
        let reason = match error {
            ScheduleError::NoCapacity { .. } => "NO_CAPACITY",
            ScheduleError::DependencyBlocked { .. } => "DEPENDENCY_BLOCKED",
            ScheduleError::ValidationConflict { .. } => "VALIDATION_CONFLICT",
            _ => return,
        };
        let detail = error.to_string();
        if let Err(log_err) = ConflictLogRepository::insert_in(conn, job_id, None, reason, Some(&detail))
        {
            warn!(job_id, error = %log_err, "冲突日志写入失败");
        }
    }

    /// 整单排产 (事务内入口, 抢占引擎复用)
    pub(crate) fn schedule_job_in(
        &self,
        conn: &Connection,
        request: &ScheduleRequest,
        today: NaiveDate,
    ) -> EngineResult<ScheduleOutcome> {
        let job = JobRepository::find_by_id_in(conn, &request.job_id)?.ok_or_else(|| {
            ScheduleError::NotFound {
                entity: "Job".to_string(),
                id: request.job_id.clone(),
            }
        })?;

        if request.from_sequence.is_some() && !request.force_reschedule {
            return Err(ScheduleError::ValidationConflict {
                severity: ConflictSeverity::High,
                message: format!("工单 {} 部分重排须显式指定重排标志", job.job_no),
            });
        }

        match job.status {
            JobStatus::Completed => {
                return Err(ScheduleError::ValidationConflict {
                    severity: ConflictSeverity::Critical,
                    message: format!("工单 {} 已完工, 不可重排", job.job_no),
                });
            }
            JobStatus::Scheduled if !request.force_reschedule => {
                return Err(ScheduleError::ValidationConflict {
                    severity: ConflictSeverity::High,
                    message: format!("工单 {} 已排产, 重排需显式指定", job.job_no),
                });
            }
            JobStatus::Scheduled => {
                if job.locked {
                    return Err(ScheduleError::ValidationConflict {
                        severity: ConflictSeverity::Critical,
                        message: format!(
                            "工单 {} 已锁定 ({}), 不可清空重排",
                            job.job_no,
                            job.lock_reason.as_deref().unwrap_or("未注明原因")
                        ),
                    });
                }
                match request.from_sequence {
                    // 部分重排: 只清空指定顺序号起的时段, 前段原样保留
                    Some(from_seq) => {
                        SlotRepository::delete_from_seq_in(conn, &job.job_id, from_seq)?;
                    }
                    None => {
                        SlotRepository::delete_by_job_in(conn, &job.job_id)?;
                        JobRepository::reset_to_pending_in(conn, &job.job_id)?;
                    }
                }
            }
            _ => {}
        }

        let dep = self.dependency.can_job_be_scheduled(conn, &job.job_id)?;
        if !dep.can_schedule {
            return Err(ScheduleError::DependencyBlocked {
                blocking: dep.blocking_job_nos,
            });
        }

        let since = today - Duration::days(30);
        let recent = JobRepository::count_recent_jobs_for_customer_in(conn, &job.customer_code, since)?;
        let score = PriorityEngine::compute_score(&job, recent, today);

        // 锚点: 指定日期 > 交期倒推提前期, 且不早于今日
        let anchor_date = request
            .force_start_date
            .or_else(|| {
                job.effective_deadline()
                    .map(|d| d - Duration::days(self.config.lead_time_days))
            })
            .unwrap_or(today)
            .max(today);
        let earliest = anchor_date.and_time(NaiveTime::MIN);

        let operations = JobRepository::find_operations_in(conn, &job.job_id)?;
        if operations.is_empty() {
            return Err(ScheduleError::ValidationConflict {
                severity: ConflictSeverity::High,
                message: format!("工单 {} 无工艺路线", job.job_no),
            });
        }

        let mut scheduled = Vec::with_capacity(operations.len());
        let mut prev: Option<(&JobOperation, NaiveDateTime)> = None;
        for op in &operations {
            if let Some(from_seq) = request.from_sequence {
                if op.seq_no < from_seq {
                    // 保留段: 既有时段继续充当后继工序的顺序门
                    let kept = SlotRepository::find_by_operation_in(conn, &op.operation_id)?;
                    if let Some(kept_end) = kept.iter().map(|s| s.end_at).max() {
                        prev = Some((op, kept_end));
                    }
                    continue;
                }
            }
            if op.is_zero_duration() {
                debug!(op_name = %op.op_name, "零工时工序跳过排产");
                scheduled.push(ScheduledOperation {
                    operation_id: op.operation_id.clone(),
                    op_name: op.op_name.clone(),
                    seq_no: op.seq_no,
                    slots: vec![],
                });
                continue;
            }

            let lower = match prev {
                Some((prev_op, prev_end)) => {
                    let buffer = prev_op
                        .buffer_after_min(self.config.default_buffer_min, self.config.cutting_lag_min());
                    (prev_end + Duration::minutes(buffer)).max(earliest)
                }
                None => earliest,
            };

            let slots = self.schedule_operation_in(conn, &job, op, lower)?;
            // 工序至少一个时段 (零工时已前置剔除)
            if let Some(op_end) = slots.iter().map(|s| s.end_at).max() {
                prev = Some((op, op_end));
            }
            scheduled.push(ScheduledOperation {
                operation_id: op.operation_id.clone(),
                op_name: op.op_name.clone(),
                seq_no: op.seq_no,
                slots,
            });
        }

        let start_at = scheduled
            .iter()
            .flat_map(|o| o.slots.iter().map(|s| s.start_at))
            .min();
        let end_at = scheduled
            .iter()
            .flat_map(|o| o.slots.iter().map(|s| s.end_at))
            .max();

        // 部分重排时保留段的原计划开工日期优先
        let planned_start = if request.from_sequence.is_some() {
            job.planned_start_date
                .into_iter()
                .chain(start_at.map(|s| s.date()))
                .min()
                .unwrap_or(anchor_date)
        } else {
            start_at.map(|s| s.date()).unwrap_or(anchor_date)
        };
        JobRepository::record_schedule_success_in(conn, &job.job_id, score, planned_start)?;

        Ok(ScheduleOutcome {
            job_id: job.job_id.clone(),
            job_no: job.job_no.clone(),
            priority_score: score,
            operations: scheduled,
            start_at,
            end_at,
        })
    }

    /// 单工序排产: 依序尝试候选对, 首个可行者胜出
    fn schedule_operation_in(
        &self,
        conn: &Connection,
        job: &Job,
        op: &JobOperation,
        lower_bound: NaiveDateTime,
    ) -> EngineResult<Vec<ScheduleSlot>> {
        let candidates = candidates::collect_for_operation(conn, op, lower_bound)?;
        if candidates.is_empty() {
            return Err(ScheduleError::NoCapacity {
                job_id: job.job_id.clone(),
                detail: format!("工序 {} (seq={}) 无可用机台/操作工组合", op.op_name, op.seq_no),
            });
        }

        for candidate in &candidates {
            if let Some(chunks) = self.try_candidate_in(conn, job, op, candidate, lower_bound)? {
                let mut slots = Vec::with_capacity(chunks.len());
                for (idx, (start, end)) in chunks.iter().enumerate() {
                    let slot = ScheduleSlot::new(
                        job.job_id.clone(),
                        op.operation_id.clone(),
                        candidate.machine_id.clone(),
                        candidate.operator_id.clone(),
                        idx as i32 + 1,
                        *start,
                        *end,
                    );
                    SlotRepository::insert_in(conn, &slot)?;
                    slots.push(slot);
                }
                debug!(
                    op_name = %op.op_name,
                    machine = %candidate.machine_id,
                    operator = %candidate.operator_id,
                    chunks = slots.len(),
                    "工序排产命中候选"
                );
                return Ok(slots);
            }
        }

        Err(ScheduleError::NoCapacity {
            job_id: job.job_id.clone(),
            detail: format!(
                "工序 {} (seq={}) 在 {} 天前向搜索内无可行时间窗",
                op.op_name, op.seq_no, self.config.max_operator_search_days
            ),
        })
    }

    /// 在单个候选对上做逐日分块搜索
    ///
    /// 返回 None 表示该候选不可行 (换下一个候选), Err 表示基础设施错误
    fn try_candidate_in(
        &self,
        conn: &Connection,
        job: &Job,
        op: &JobOperation,
        candidate: &ResourceCandidate,
        lower_bound: NaiveDateTime,
    ) -> EngineResult<Option<Vec<(NaiveDateTime, NaiveDateTime)>>> {
        let granularity = self.config.slot_granularity_min;
        let mut remaining = candidate.effective_duration_min(op.est_duration_min);
        let mut chunks: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::new();

        let search_days = self
            .config
            .max_operator_search_days
            .min(self.config.max_lookahead_days);
        let search_end = lower_bound.date() + Duration::days(search_days);

        let mut date = lower_bound.date();
        while remaining > 0 && date <= search_end {
            let hours = self.calendar.working_hours(conn, &candidate.operator_id, date)?;
            let Some((win_start, win_end)) = hours.window_on(date) else {
                date += Duration::days(1);
                continue;
            };
            let from = window::align_up(win_start.max(lower_bound), granularity);
            if from >= win_end {
                date += Duration::days(1);
                continue;
            }

            let mut busy: Vec<(NaiveDateTime, NaiveDateTime)> =
                SlotRepository::find_machine_overlaps_in(conn, &candidate.machine_id, from, win_end)?
                    .into_iter()
                    .map(|s| (s.start_at, s.end_at))
                    .collect();
            busy.extend(
                SlotRepository::find_operator_overlaps_in(conn, &candidate.operator_id, from, win_end)?
                    .into_iter()
                    .map(|s| (s.start_at, s.end_at)),
            );

            for (free_start, free_end) in window::free_intervals(from, win_end, busy) {
                if remaining <= 0 {
                    break;
                }
                let chunk_start = window::align_up(free_start, granularity);
                let available = (free_end - chunk_start).num_minutes();
                if available < granularity.min(remaining) {
                    continue;
                }
                let take = remaining.min(available);
                chunks.push((chunk_start, chunk_start + Duration::minutes(take)));
                remaining -= take;
                if chunks.len() as i64 > self.config.max_chunks_per_operation {
                    debug!(
                        op_name = %op.op_name,
                        operator = %candidate.operator_id,
                        "分块数超上限, 放弃候选"
                    );
                    return Ok(None);
                }
            }
            date += Duration::days(1);
        }

        if remaining > 0 {
            return Ok(None);
        }

        // 提交前逐块过校验闸门
        for (start, end) in &chunks {
            let proposed = ProposedSlot {
                job_id: job.job_id.clone(),
                operation_id: op.operation_id.clone(),
                machine_id: candidate.machine_id.clone(),
                operator_id: candidate.operator_id.clone(),
                start_at: *start,
                end_at: *end,
            };
            let report = self.validator.validate_in(conn, &proposed)?;
            if report.has_critical() {
                debug!(
                    op_name = %op.op_name,
                    machine = %candidate.machine_id,
                    conflicts = report.conflicts.len(),
                    "候选时间窗未过校验, 放弃候选"
                );
                return Ok(None);
            }
            for warning in &report.warnings {
                warn!(job_no = %job.job_no, %warning.message, "排产告警");
            }
        }

        Ok(Some(chunks))
    }
}
