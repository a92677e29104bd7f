// ==========================================
// 机加工车间排产系统 - 可用性变更处理
// ==========================================
// 职责: 操作工临时不可用时, 标记受影响时段并尽力重排受影响工单
// 红线: 时段标记必须落库, 单个工单重排失败不回滚标记
// ==========================================

use crate::domain::types::{RescheduleOutcome, SlotStatus};
use crate::engine::error::{EngineResult, ScheduleError};
use crate::engine::scheduler::{ScheduleRequest, SlotScheduler};
use crate::domain::operator::WorkingHours;
use crate::repository::{JobRepository, OperatorRepository, RepositoryError, SlotRepository};
use chrono::{Duration, NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// ==========================================
// AffectedJob - 受影响工单的处理去向
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedJob {
    pub job_id: String,
    pub job_no: String,
    pub outcome: RescheduleOutcome,
    pub message: Option<String>,
}

// ==========================================
// ScheduleEvent / ScheduleEventPublisher - 排程事件外发
// ==========================================

/// 排程过程中可供外部订阅的事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ScheduleEvent {
    /// 操作工不可用处理完毕
    OperatorUnavailable {
        operator_id: String,
        date: NaiveDate,
        affected_jobs: Vec<AffectedJob>,
    },
}

/// 事件外发接口, 由集成方实现 (消息总线, 前端推送等)
pub trait ScheduleEventPublisher: Send + Sync {
    fn publish(&self, event: &ScheduleEvent);
}

/// 默认实现: 不外发任何事件
pub struct NoopEventPublisher;

impl ScheduleEventPublisher for NoopEventPublisher {
    fn publish(&self, _event: &ScheduleEvent) {}
}

// ==========================================
// AvailabilityChangeHandler - 可用性变更处理器
// ==========================================
pub struct AvailabilityChangeHandler {
    conn: Arc<Mutex<Connection>>,
    scheduler: Arc<SlotScheduler>,
    publisher: Arc<dyn ScheduleEventPublisher>,
}

impl AvailabilityChangeHandler {
    pub fn new(conn: Arc<Mutex<Connection>>, scheduler: Arc<SlotScheduler>) -> Self {
        Self::with_publisher(conn, scheduler, Arc::new(NoopEventPublisher))
    }

    pub fn with_publisher(
        conn: Arc<Mutex<Connection>>,
        scheduler: Arc<SlotScheduler>,
        publisher: Arc<dyn ScheduleEventPublisher>,
    ) -> Self {
        Self {
            conn,
            scheduler,
            publisher,
        }
    }

    /// 操作工在指定日期不可用
    ///
    /// 该日时段标记为 OPERATOR_UNAVAILABLE (不再占用时间轴),
    /// 受影响的未锁定工单整单清空重排; 锁定工单只标记不动排程
    pub fn on_operator_unavailable(
        &self,
        operator_id: &str,
        date: NaiveDate,
    ) -> EngineResult<Vec<AffectedJob>> {
        let today = chrono::Local::now().date_naive();
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let mut tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        // 日历先行置为非工作日, 重排不会再把同一操作工排回当日
        OperatorRepository::upsert_calendar_in(&tx, operator_id, date, &WorkingHours::non_working())?;

        let day_start = date.and_time(NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);
        let slots =
            SlotRepository::find_operator_slots_on_date_in(&tx, operator_id, day_start, day_end)?;

        let mut affected_job_ids: Vec<String> = Vec::new();
        for slot in &slots {
            SlotRepository::update_status_in(&tx, &slot.slot_id, SlotStatus::OperatorUnavailable)?;
            if !affected_job_ids.contains(&slot.job_id) {
                affected_job_ids.push(slot.job_id.clone());
            }
        }
        info!(
            operator_id,
            %date,
            slots = slots.len(),
            jobs = affected_job_ids.len(),
            "操作工不可用, 已标记受影响时段"
        );

        let mut results = Vec::with_capacity(affected_job_ids.len());
        for job_id in &affected_job_ids {
            results.push(self.reschedule_affected(&mut tx, job_id, today)?);
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        // 事务提交后才外发, 订阅方看到的一定是已落库的状态
        self.publisher.publish(&ScheduleEvent::OperatorUnavailable {
            operator_id: operator_id.to_string(),
            date,
            affected_jobs: results.clone(),
        });
        Ok(results)
    }

    /// 单个受影响工单的整单重排 (保存点隔离)
    fn reschedule_affected(
        &self,
        tx: &mut rusqlite::Transaction<'_>,
        job_id: &str,
        today: NaiveDate,
    ) -> EngineResult<AffectedJob> {
        let job = JobRepository::find_by_id_in(tx, job_id)?.ok_or_else(|| {
            ScheduleError::NotFound {
                entity: "Job".to_string(),
                id: job_id.to_string(),
            }
        })?;
        if job.locked {
            return Ok(AffectedJob {
                job_id: job.job_id,
                job_no: job.job_no,
                outcome: RescheduleOutcome::Failed,
                message: Some("工单已锁定, 仅标记不重排".to_string()),
            });
        }

        let sp = tx
            .savepoint()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        let request = ScheduleRequest {
            job_id: job_id.to_string(),
            force_start_date: None,
            force_reschedule: true,
            from_sequence: None,
        };
        match self.scheduler.schedule_job_in(&sp, &request, today) {
            Ok(_) => {
                sp.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(AffectedJob {
                    job_id: job.job_id,
                    job_no: job.job_no,
                    outcome: RescheduleOutcome::Rescheduled,
                    message: None,
                })
            }
            Err(e) if e.is_no_capacity() || matches!(e, ScheduleError::ValidationConflict { .. }) => {
                // 保存点回滚, 保留标记后的原状
                warn!(job_no = %job.job_no, error = %e, "受影响工单重排未成功");
                Ok(AffectedJob {
                    job_id: job.job_id,
                    job_no: job.job_no,
                    outcome: RescheduleOutcome::Failed,
                    message: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }
}
