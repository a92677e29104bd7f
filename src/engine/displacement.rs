// ==========================================
// 机加工车间排产系统 - 插单抢占引擎
// ==========================================
// 职责: 高优先级工单排不下时, 按优先级差阈值抢占低优先级工单时段
// 红线: 先试常规排产, 失败才进入抢占; 抢占前必须捕获撤销快照;
//       保护期/锁定工单绝不可被抢占; 试算模式整体回滚不留痕
// ==========================================

use crate::config::SchedulerConfig;
use crate::domain::displacement::{DisplacementDetail, DisplacementImpact, DisplacementLog};
use crate::domain::types::{RescheduleOutcome, UndoActionType};
use crate::engine::error::{EngineResult, ScheduleError};
use crate::engine::scheduler::{ScheduleOutcome, ScheduleRequest, SlotScheduler};
use crate::engine::undo_service::UndoService;
use crate::repository::{
    CandidateSlotRow, DisplacementLogRepository, JobRepository, RepositoryError, SlotRepository,
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

// ==========================================
// DisplacementOptions - 抢占执行选项
// ==========================================
#[derive(Debug, Clone)]
pub struct DisplacementOptions {
    /// 试算模式: 完整执行后整体回滚, 不落任何记录
    pub dry_run: bool,
    /// 单次抢占的工单数上限
    pub max_displacements: usize,
}

impl Default for DisplacementOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_displacements: 10,
        }
    }
}

// ==========================================
// DisplacementCandidate - 可抢占工单 (按工单聚合)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacementCandidate {
    pub job_id: String,
    pub job_no: String,
    pub customer_code: String,
    pub priority_score: f64,
    /// 相对优先级差, 以被抢占方得分为基准: (高-低)/低
    pub relative_gap: f64,
    pub slot_count: usize,
    pub hours_freed: f64,
    pub earliest_start: NaiveDateTime,
    pub latest_end: NaiveDateTime,
}

// ==========================================
// DisplacementOpportunities - 可抢占容量盘点
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacementOpportunities {
    pub trigger_job_id: String,
    pub trigger_job_no: String,
    pub trigger_score: f64,
    pub threshold: f64,
    pub candidates: Vec<DisplacementCandidate>,
    pub total_hours_available: f64,
    /// 触发工单全部工序所需小时数
    pub required_hours: f64,
    /// 可释放容量是否覆盖所需
    pub sufficient: bool,
}

// ==========================================
// DisplacedJobOutcome - 单个被抢占工单的去向
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacedJobOutcome {
    pub job_id: String,
    pub job_no: String,
    pub outcome: RescheduleOutcome,
    pub new_start: Option<NaiveDateTime>,
    pub delay_hours: Option<f64>,
    pub message: Option<String>,
}

// ==========================================
// DisplacementResult - 抢占执行明细
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacementResult {
    pub log_id: String,
    pub dry_run: bool,
    pub displaced: Vec<DisplacedJobOutcome>,
    pub impact: DisplacementImpact,
    /// 非试算时的撤销入口
    pub undo_id: Option<String>,
}

// ==========================================
// ScheduleWithDisplacementResult - 带抢占的排产结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWithDisplacementResult {
    pub outcome: ScheduleOutcome,
    /// None = 常规排产已成功, 未触发抢占
    pub displacement: Option<DisplacementResult>,
}

// ==========================================
// DisplacementEngine - 插单抢占引擎
// ==========================================
pub struct DisplacementEngine {
    conn: Arc<Mutex<Connection>>,
    config: SchedulerConfig,
    scheduler: Arc<SlotScheduler>,
    undo: UndoService,
}

impl DisplacementEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: SchedulerConfig,
        scheduler: Arc<SlotScheduler>,
    ) -> Self {
        let undo = UndoService::new(conn.clone(), config.clone());
        Self {
            conn,
            config,
            scheduler,
            undo,
        }
    }

    /// 盘点触发工单可抢占的容量 (只读, 不做任何变更)
    pub fn find_opportunities(&self, trigger_job_id: &str) -> EngineResult<DisplacementOpportunities> {
        let today = chrono::Local::now().date_naive();
        let now = chrono::Local::now().naive_local();
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        self.find_opportunities_in(&conn, trigger_job_id, now, today)
    }

    fn find_opportunities_in(
        &self,
        conn: &Connection,
        trigger_job_id: &str,
        now: NaiveDateTime,
        today: NaiveDate,
    ) -> EngineResult<DisplacementOpportunities> {
        let trigger = JobRepository::find_by_id_in(conn, trigger_job_id)?.ok_or_else(|| {
            ScheduleError::NotFound {
                entity: "Job".to_string(),
                id: trigger_job_id.to_string(),
            }
        })?;
        let since = today - chrono::Duration::days(30);
        let recent =
            JobRepository::count_recent_jobs_for_customer_in(conn, &trigger.customer_code, since)?;
        let trigger_score =
            crate::engine::priority::PriorityEngine::compute_score(&trigger, recent, today);
        let required_min: i64 = JobRepository::find_operations_in(conn, trigger_job_id)?
            .iter()
            .map(|o| o.est_duration_min)
            .sum();
        let required_hours = required_min as f64 / 60.0;

        let mut candidates = Vec::new();
        let mut total_hours = 0.0;
        if trigger_score > 0.0 {
            let rows = SlotRepository::find_displacement_candidates_in(conn, now, trigger_score)?;
            let mut by_job: BTreeMap<String, Vec<CandidateSlotRow>> = BTreeMap::new();
            for row in rows {
                by_job.entry(row.slot.job_id.clone()).or_default().push(row);
            }
            for (job_id, rows) in by_job {
                match self.evaluate_candidate(conn, &job_id, &rows, trigger_score, today)? {
                    Some(candidate) => {
                        total_hours += candidate.hours_freed;
                        candidates.push(candidate);
                    }
                    None => continue,
                }
            }
            // 最低优先级最先被抢占
            candidates.sort_by(|a, b| {
                a.priority_score
                    .partial_cmp(&b.priority_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.earliest_start.cmp(&b.earliest_start))
            });
        }

        Ok(DisplacementOpportunities {
            trigger_job_id: trigger.job_id.clone(),
            trigger_job_no: trigger.job_no.clone(),
            trigger_score,
            threshold: self.config.displacement_threshold,
            candidates,
            total_hours_available: total_hours,
            required_hours,
            sufficient: total_hours >= required_hours,
        })
    }

    /// 单个工单的可抢占判定
    ///
    /// 拒绝条件: 相对优先级差不足阈值 / 交付保护期内 /
    /// 工单锁定 / 任一时段锁定 (已开工)
    fn evaluate_candidate(
        &self,
        conn: &Connection,
        job_id: &str,
        rows: &[CandidateSlotRow],
        trigger_score: f64,
        today: NaiveDate,
    ) -> EngineResult<Option<DisplacementCandidate>> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        if first.job_locked {
            debug!(job_no = %first.job_no, "候选工单已锁定, 跳过");
            return Ok(None);
        }

        // 相对差以低优先级一方为基准; 非正得分视为无穷差距
        let relative_gap = if first.priority_score > 0.0 {
            (trigger_score - first.priority_score) / first.priority_score
        } else {
            f64::INFINITY
        };
        if relative_gap < self.config.displacement_threshold {
            debug!(job_no = %first.job_no, gap = relative_gap, "优先级差不足阈值, 跳过");
            return Ok(None);
        }

        // 交付保护期: 承诺/交期临近的工单不可被抢占
        if let Some(deadline) = first.promised_date.or(first.due_date) {
            if (deadline - today).num_days() <= self.config.firm_zone_days {
                debug!(job_no = %first.job_no, %deadline, "处于交付保护期, 跳过");
                return Ok(None);
            }
        }

        // 任一时段已锁定 (如已开工) 则整单保护
        let all_slots = SlotRepository::find_by_job_in(conn, job_id)?;
        if all_slots.iter().any(|s| s.is_locked()) {
            debug!(job_no = %first.job_no, "存在已开工/锁定时段, 整单跳过");
            return Ok(None);
        }

        let minutes: i64 = rows.iter().map(|r| r.slot.duration_min()).sum();
        let earliest_start = rows.iter().map(|r| r.slot.start_at).min();
        let latest_end = rows.iter().map(|r| r.slot.end_at).max();
        let (Some(earliest_start), Some(latest_end)) = (earliest_start, latest_end) else {
            return Ok(None);
        };

        Ok(Some(DisplacementCandidate {
            job_id: job_id.to_string(),
            job_no: first.job_no.clone(),
            customer_code: first.customer_code.clone(),
            priority_score: first.priority_score,
            relative_gap,
            slot_count: rows.len(),
            hours_freed: minutes as f64 / 60.0,
            earliest_start,
            latest_end,
        }))
    }

    /// 带抢占的排产: 常规排产失败 (无产能) 时, 逐个抢占低优先级
    /// 工单直至触发工单排下, 再为被抢占工单尽力重排
    pub fn schedule_with_displacement(
        &self,
        request: &ScheduleRequest,
        options: &DisplacementOptions,
    ) -> EngineResult<ScheduleWithDisplacementResult> {
        let started = std::time::Instant::now();
        let today = chrono::Local::now().date_naive();
        let now = chrono::Local::now().naive_local();

        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let mut tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        // 1. 常规排产先行
        let first_error = {
            let sp = tx
                .savepoint()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            match self.scheduler.schedule_job_in(&sp, request, today) {
                Ok(outcome) => {
                    sp.commit()
                        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                    return Self::finish(tx, options.dry_run, outcome, None);
                }
                Err(e) if e.is_no_capacity() => e,
                Err(e) => return Err(e),
            }
        };
        debug!(job_id = %request.job_id, error = %first_error, "常规排产无产能, 进入抢占评估");

        // 2. 盘点可抢占容量
        let opportunities = self.find_opportunities_in(&tx, &request.job_id, now, today)?;
        if opportunities.candidates.is_empty() {
            return Err(first_error);
        }

        // 3. 撤销快照 + 审计头 (变更前)
        let undo_op = self.undo.create_operation_in(
            &tx,
            UndoActionType::Displacement,
            format!("插单抢占: 触发工单 {}", opportunities.trigger_job_no),
        )?;
        UndoService::capture_job_in(&tx, &undo_op.undo_id, &request.job_id)?;
        let mut log = DisplacementLog::new(
            request.job_id.clone(),
            self.config.displacement_threshold,
            options.dry_run,
        );
        DisplacementLogRepository::insert_log_in(&tx, &log)?;

        // 4. 逐个抢占, 每轮抢占后重试触发工单
        let mut displaced: Vec<(DisplacementCandidate, String)> = Vec::new(); // (候选, detail_id)
        let mut machines_affected: Vec<String> = Vec::new();
        let mut trigger_outcome: Option<ScheduleOutcome> = None;
        for candidate in opportunities
            .candidates
            .iter()
            .take(options.max_displacements)
        {
            UndoService::capture_job_in(&tx, &undo_op.undo_id, &candidate.job_id)?;

            for slot in SlotRepository::find_by_job_in(&tx, &candidate.job_id)? {
                if !machines_affected.contains(&slot.machine_id) {
                    machines_affected.push(slot.machine_id.clone());
                }
            }
            let machine_id = Self::primary_machine(&tx, &candidate.job_id)?;
            let detail = DisplacementDetail::new(
                log.log_id.clone(),
                candidate.job_id.clone(),
                machine_id,
                candidate.earliest_start,
                candidate.latest_end,
                candidate.hours_freed,
                format!(
                    "优先级差 {:.0}% >= 阈值 {:.0}%",
                    candidate.relative_gap * 100.0,
                    self.config.displacement_threshold * 100.0
                ),
            );
            DisplacementLogRepository::insert_detail_in(&tx, &detail)?;

            SlotRepository::delete_by_job_in(&tx, &candidate.job_id)?;
            JobRepository::reset_to_pending_in(&tx, &candidate.job_id)?;
            displaced.push((candidate.clone(), detail.detail_id.clone()));
            info!(
                job_no = %candidate.job_no,
                hours = candidate.hours_freed,
                "抢占低优先级工单时段"
            );

            let sp = tx
                .savepoint()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            match self.scheduler.schedule_job_in(&sp, request, today) {
                Ok(outcome) => {
                    sp.commit()
                        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                    trigger_outcome = Some(outcome);
                    break;
                }
                Err(e) if e.is_no_capacity() => continue,
                Err(e) => return Err(e),
            }
        }

        // 触发工单仍排不下: 整体回滚, 抢占不留痕
        let Some(outcome) = trigger_outcome else {
            return Err(ScheduleError::InsufficientDisplacement {
                required_hours: opportunities.required_hours,
                available_hours: opportunities.total_hours_available,
            });
        };

        // 5. 被抢占工单尽力重排 (单个失败不中止整体提交)
        let mut outcomes = Vec::with_capacity(displaced.len());
        for (candidate, detail_id) in &displaced {
            let job_outcome = self.reschedule_displaced(&mut tx, candidate, today);
            DisplacementLogRepository::update_detail_outcome_in(
                &tx,
                detail_id,
                job_outcome.outcome,
                job_outcome.new_start,
                job_outcome.delay_hours,
            )?;
            outcomes.push(job_outcome);
        }

        // 6. 审计收尾
        machines_affected.sort();
        let impact = Self::build_impact(
            &displaced,
            &outcomes,
            machines_affected,
            self.config.displacement_threshold,
        );
        log.success = true;
        log.displaced_count = displaced.len() as i32;
        log.total_hours_freed = impact.total_hours_freed;
        log.execution_ms = started.elapsed().as_millis() as i64;
        log = log.with_impact(&impact);
        DisplacementLogRepository::finalize_log_in(&tx, &log)?;

        info!(
            trigger = %opportunities.trigger_job_no,
            displaced = displaced.len(),
            dry_run = options.dry_run,
            "{}",
            impact.summary_text()
        );

        let result = DisplacementResult {
            log_id: log.log_id.clone(),
            dry_run: options.dry_run,
            displaced: outcomes,
            impact,
            undo_id: if options.dry_run {
                None
            } else {
                Some(undo_op.undo_id.clone())
            },
        };
        Self::finish(tx, options.dry_run, outcome, Some(result))
    }

    /// 提交或试算回滚
    fn finish(
        tx: rusqlite::Transaction<'_>,
        dry_run: bool,
        outcome: ScheduleOutcome,
        displacement: Option<DisplacementResult>,
    ) -> EngineResult<ScheduleWithDisplacementResult> {
        if dry_run {
            tx.rollback()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            debug!("试算模式, 全部变更已回滚");
        } else {
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        }
        Ok(ScheduleWithDisplacementResult {
            outcome,
            displacement,
        })
    }

    /// 被抢占工单的尽力重排 (保存点隔离, 失败不影响外层事务)
    fn reschedule_displaced(
        &self,
        tx: &mut rusqlite::Transaction<'_>,
        candidate: &DisplacementCandidate,
        today: NaiveDate,
    ) -> DisplacedJobOutcome {
        let request = ScheduleRequest::new(&candidate.job_id);
        let sp = match tx.savepoint() {
            Ok(sp) => sp,
            Err(e) => {
                return DisplacedJobOutcome {
                    job_id: candidate.job_id.clone(),
                    job_no: candidate.job_no.clone(),
                    outcome: RescheduleOutcome::Error,
                    new_start: None,
                    delay_hours: None,
                    message: Some(e.to_string()),
                };
            }
        };
        match self.scheduler.schedule_job_in(&sp, &request, today) {
            Ok(outcome) => {
                if let Err(e) = sp.commit() {
                    return DisplacedJobOutcome {
                        job_id: candidate.job_id.clone(),
                        job_no: candidate.job_no.clone(),
                        outcome: RescheduleOutcome::Error,
                        new_start: None,
                        delay_hours: None,
                        message: Some(e.to_string()),
                    };
                }
                let delay_hours = outcome
                    .start_at
                    .map(|s| (s - candidate.earliest_start).num_minutes() as f64 / 60.0);
                DisplacedJobOutcome {
                    job_id: candidate.job_id.clone(),
                    job_no: candidate.job_no.clone(),
                    outcome: RescheduleOutcome::Rescheduled,
                    new_start: outcome.start_at,
                    delay_hours,
                    message: None,
                }
            }
            Err(e) => {
                // 保存点随 drop 回滚, 工单保持待排产态
                let outcome = if e.is_no_capacity() {
                    RescheduleOutcome::Failed
                } else {
                    RescheduleOutcome::Error
                };
                warn!(job_no = %candidate.job_no, error = %e, "被抢占工单重排未成功");
                DisplacedJobOutcome {
                    job_id: candidate.job_id.clone(),
                    job_no: candidate.job_no.clone(),
                    outcome,
                    new_start: None,
                    delay_hours: None,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// 被抢占工单时段数最多的机台 (审计明细归属)
    fn primary_machine(conn: &Connection, job_id: &str) -> EngineResult<String> {
        let slots = SlotRepository::find_by_job_in(conn, job_id)?;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for slot in &slots {
            *counts.entry(slot.machine_id.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .max_by_key(|(_, n)| *n)
            .map(|(m, _)| m.to_string())
            .unwrap_or_default())
    }

    fn build_impact(
        displaced: &[(DisplacementCandidate, String)],
        outcomes: &[DisplacedJobOutcome],
        machines_affected: Vec<String>,
        threshold: f64,
    ) -> DisplacementImpact {
        let mut customers: Vec<String> = displaced
            .iter()
            .map(|(c, _)| c.customer_code.clone())
            .collect();
        customers.sort();
        customers.dedup();

        let delays: Vec<f64> = outcomes.iter().filter_map(|o| o.delay_hours).collect();
        let average_delay_hours = if delays.is_empty() {
            0.0
        } else {
            delays.iter().sum::<f64>() / delays.len() as f64
        };

        DisplacementImpact {
            customers_affected: customers,
            machines_affected,
            total_hours_freed: displaced.iter().map(|(c, _)| c.hours_freed).sum(),
            average_delay_hours,
            threshold_used: threshold,
        }
    }
}
