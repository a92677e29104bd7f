// ==========================================
// 机加工车间排产系统 - 集成测试公共夹具
// ==========================================
// 提供: 临时库 + schema + 基础数据构造器 + 引擎装配
// ==========================================

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use machining_aps::config::SchedulerConfig;
use machining_aps::db;
use machining_aps::domain::{
    Job, JobOperation, JobStatus, Machine, MachineGroup, Operator, OperationKind, OperatorSkill,
    ScheduleSlot, WorkingHours,
};
use machining_aps::engine::{
    AvailabilityChangeHandler, ConflictValidator, DbCalendarProvider, DbDependencyChecker,
    DisplacementEngine, SlotScheduler, UndoService,
};
use machining_aps::repository::{
    JobRepository, MachineRepository, OperatorRepository, SlotRepository,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub struct TestEnv {
    pub conn: Arc<Mutex<Connection>>,
    pub config: SchedulerConfig,
    _tmp: TempDir,
}

impl TestEnv {
    /// 临时库 + schema + 默认配置
    pub fn new() -> Self {
        machining_aps::logging::init_test();
        let tmp = TempDir::new().expect("create tempdir");
        let db_path = tmp.path().join("test.db");
        let conn = db::open_sqlite_connection(db_path.to_str().expect("utf8 path"))
            .expect("open test db");
        db::init_schema(&conn).expect("init schema");
        Self {
            conn: Arc::new(Mutex::new(conn)),
            config: SchedulerConfig::default(),
            _tmp: tmp,
        }
    }

    pub fn today() -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    // ==========================================
    // 引擎装配
    // ==========================================

    pub fn scheduler(&self) -> Arc<SlotScheduler> {
        Arc::new(SlotScheduler::new(
            self.conn.clone(),
            self.config.clone(),
            Arc::new(DbCalendarProvider),
            Arc::new(DbDependencyChecker),
        ))
    }

    pub fn validator(&self) -> ConflictValidator {
        ConflictValidator::new(
            self.conn.clone(),
            self.config.clone(),
            Arc::new(DbCalendarProvider),
        )
    }

    pub fn displacement(&self) -> DisplacementEngine {
        DisplacementEngine::new(self.conn.clone(), self.config.clone(), self.scheduler())
    }

    pub fn undo_service(&self) -> UndoService {
        UndoService::new(self.conn.clone(), self.config.clone())
    }

    pub fn availability(&self) -> AvailabilityChangeHandler {
        AvailabilityChangeHandler::new(self.conn.clone(), self.scheduler())
    }

    // ==========================================
    // 基础数据构造器
    // ==========================================

    pub fn add_machine(&self, machine_id: &str, group_id: Option<&str>, active: bool) {
        MachineRepository::new(self.conn.clone())
            .insert(&Machine {
                machine_id: machine_id.to_string(),
                machine_group_id: group_id.map(str::to_string),
                name: format!("机台 {}", machine_id),
                efficiency: 1.0,
                is_inspection: false,
                active,
            })
            .expect("insert machine");
    }

    pub fn add_inspection_machine(&self, machine_id: &str) {
        MachineRepository::new(self.conn.clone())
            .insert(&Machine {
                machine_id: machine_id.to_string(),
                machine_group_id: None,
                name: format!("检验台 {}", machine_id),
                efficiency: 1.0,
                is_inspection: true,
                active: true,
            })
            .expect("insert inspection machine");
    }

    pub fn add_group(&self, group_id: &str, parent: Option<&str>) {
        MachineRepository::new(self.conn.clone())
            .insert_group(&MachineGroup {
                group_id: group_id.to_string(),
                parent_group_id: parent.map(str::to_string),
                name: format!("机台组 {}", group_id),
            })
            .expect("insert group");
    }

    /// 操作工 + 技能 + 从今天起连续 days 天的 08:00-16:00 白班
    pub fn add_operator(&self, operator_id: &str, skills: &[(&str, i32, i32)], days: i64) {
        let repo = OperatorRepository::new(self.conn.clone());
        repo.insert(&Operator {
            operator_id: operator_id.to_string(),
            name: format!("操作工 {}", operator_id),
            active: true,
        })
        .expect("insert operator");
        for (machine_id, proficiency, preference_rank) in skills {
            repo.insert_skill(&OperatorSkill {
                operator_id: operator_id.to_string(),
                machine_id: machine_id.to_string(),
                proficiency: *proficiency,
                preference_rank: *preference_rank,
            })
            .expect("insert skill");
        }
        for offset in 0..days {
            self.set_calendar_day(operator_id, Self::today() + Duration::days(offset), 8, 16);
        }
    }

    pub fn set_calendar_day(&self, operator_id: &str, date: NaiveDate, start_h: i32, end_h: i32) {
        OperatorRepository::new(self.conn.clone())
            .upsert_calendar(
                operator_id,
                date,
                &WorkingHours {
                    start_minute: start_h * 60,
                    end_minute: end_h * 60,
                    is_overnight: false,
                    is_working: true,
                },
            )
            .expect("upsert calendar");
    }

    pub fn set_overnight_calendar_day(&self, operator_id: &str, date: NaiveDate) {
        OperatorRepository::new(self.conn.clone())
            .upsert_calendar(
                operator_id,
                date,
                &WorkingHours {
                    start_minute: 22 * 60,
                    end_minute: 6 * 60,
                    is_overnight: true,
                    is_working: true,
                },
            )
            .expect("upsert overnight calendar");
    }

    /// 工单 (job_id == job_no, 计划开工日期 = 今天)
    pub fn add_job(&self, job_no: &str, spec: JobSpec) {
        let now = chrono::Utc::now().naive_utc();
        JobRepository::new(self.conn.clone())
            .insert(&Job {
                job_id: job_no.to_string(),
                job_no: job_no.to_string(),
                customer_code: spec.customer.to_string(),
                customer_weight: spec.customer_weight,
                order_date: Some(Self::today()),
                due_date: spec.due_in_days.map(|d| Self::today() + Duration::days(d)),
                promised_date: None,
                explicit_priority: spec.explicit_priority,
                priority_score: spec.priority_score,
                status: spec.status,
                locked: spec.locked,
                lock_reason: None,
                auto_scheduled: false,
                planned_start_date: Some(Self::today()),
                created_at: now,
                updated_at: now,
            })
            .expect("insert job");
    }

    pub fn add_operation(
        &self,
        job_no: &str,
        seq_no: i32,
        op_name: &str,
        machine_id: Option<&str>,
        group_id: Option<&str>,
        est_duration_min: i64,
    ) {
        let kind = if op_name.contains("检验") || op_name.contains("终检") {
            OperationKind::Inspection
        } else {
            OperationKind::Normal
        };
        JobRepository::new(self.conn.clone())
            .insert_operation(&JobOperation {
                operation_id: format!("{}-OP{}", job_no, seq_no),
                job_id: job_no.to_string(),
                seq_no,
                op_name: op_name.to_string(),
                op_kind: kind,
                machine_id: machine_id.map(str::to_string),
                machine_group_id: group_id.map(str::to_string),
                est_duration_min,
            })
            .expect("insert operation");
    }

    pub fn add_dependency(&self, job_no: &str, depends_on: &str) {
        JobRepository::new(self.conn.clone())
            .add_dependency(job_no, depends_on)
            .expect("insert dependency");
    }

    /// 手工落一个时段 (构造既有占用)
    pub fn add_slot(
        &self,
        job_no: &str,
        seq_no: i32,
        machine_id: &str,
        operator_id: &str,
        start: chrono::NaiveDateTime,
        end: chrono::NaiveDateTime,
    ) -> ScheduleSlot {
        let slot = ScheduleSlot::new(
            job_no.to_string(),
            format!("{}-OP{}", job_no, seq_no),
            machine_id.to_string(),
            operator_id.to_string(),
            1,
            start,
            end,
        );
        SlotRepository::new(self.conn.clone())
            .insert(&slot)
            .expect("insert slot");
        slot
    }

    // ==========================================
    // 断言辅助
    // ==========================================

    pub fn slots_of(&self, job_no: &str) -> Vec<ScheduleSlot> {
        SlotRepository::new(self.conn.clone())
            .find_by_job(job_no)
            .expect("query slots")
    }

    pub fn job(&self, job_no: &str) -> Job {
        JobRepository::new(self.conn.clone())
            .find_by_id(job_no)
            .expect("query job")
            .expect("job exists")
    }
}

/// 工单构造参数 (默认: 普通优先级 / 无交期 / 待排产)
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub customer: &'static str,
    pub customer_weight: f64,
    pub explicit_priority: i32,
    pub due_in_days: Option<i64>,
    pub priority_score: f64,
    pub status: JobStatus,
    pub locked: bool,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            customer: "C-DEFAULT",
            customer_weight: 0.0,
            explicit_priority: 5,
            due_in_days: None,
            priority_score: 0.0,
            status: JobStatus::Pending,
            locked: false,
        }
    }
}

/// 同机台/同操作工时段两两不重叠
pub fn assert_no_double_booking(slots: &[ScheduleSlot]) {
    for (i, a) in slots.iter().enumerate() {
        for b in slots.iter().skip(i + 1) {
            let same_resource = a.machine_id == b.machine_id || a.operator_id == b.operator_id;
            if same_resource {
                assert!(
                    !a.overlaps(b.start_at, b.end_at),
                    "时段重叠: {}({}~{}) 与 {}({}~{})",
                    a.slot_id,
                    a.start_at,
                    a.end_at,
                    b.slot_id,
                    b.start_at,
                    b.end_at
                );
            }
        }
    }
}
