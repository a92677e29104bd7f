// ==========================================
// 机加工车间排产系统 - 演示数据库生成器
// ==========================================
// 用法: seed_demo_db [db路径]
// 流程: 重建 schema -> 基础数据 -> 常规排产 -> 插单抢占演示
// ==========================================

use anyhow::{Context, Result};
use chrono::Duration;
use machining_aps::db;
use machining_aps::domain::{
    Job, JobOperation, JobStatus, Machine, MachineGroup, Operator, OperationKind, OperatorSkill,
    WorkingHours,
};
use machining_aps::engine::{
    DbCalendarProvider, DbDependencyChecker, DisplacementEngine, DisplacementOptions,
    ScheduleRequest, SlotScheduler,
};
use machining_aps::repository::{JobRepository, MachineRepository, OperatorRepository};
use machining_aps::config::SchedulerConfig;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::info;

fn main() -> Result<()> {
    machining_aps::logging::init();

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "machining_aps_demo.db".to_string());
    if std::path::Path::new(&db_path).exists() {
        std::fs::remove_file(&db_path).with_context(|| format!("删除旧演示库失败: {}", db_path))?;
    }

    let conn = db::open_sqlite_connection(&db_path).context("打开演示库失败")?;
    db::init_schema(&conn).context("初始化 schema 失败")?;
    let conn = Arc::new(Mutex::new(conn));

    seed_master_data(&conn)?;
    seed_jobs(&conn)?;

    let config = {
        let guard = conn.lock().expect("连接锁失效");
        SchedulerConfig::load_from(&guard)
    };
    let scheduler = Arc::new(SlotScheduler::new(
        conn.clone(),
        config.clone(),
        Arc::new(DbCalendarProvider),
        Arc::new(DbDependencyChecker),
    ));

    // 常规排产: 低优先级工单先占满窄产能
    for job_id in ["J-DEMO-001", "J-DEMO-002"] {
        let outcome = scheduler.schedule_job(&ScheduleRequest::new(job_id))?;
        info!(
            job_no = %outcome.job_no,
            slots = outcome.slot_count(),
            start = ?outcome.start_at,
            "演示工单排产完成"
        );
    }

    // 插单抢占: 高优先级急单挤占低优先级时段
    let displacement = DisplacementEngine::new(conn.clone(), config, scheduler);
    let result = displacement.schedule_with_displacement(
        &ScheduleRequest::new("J-DEMO-RUSH"),
        &DisplacementOptions::default(),
    )?;
    match &result.displacement {
        Some(d) => info!(
            log_id = %d.log_id,
            displaced = d.displaced.len(),
            undo_id = ?d.undo_id,
            "急单通过抢占排入: {}",
            d.impact.summary_text()
        ),
        None => info!("急单常规排产即成功, 未触发抢占"),
    }

    info!(db = %db_path, "演示库生成完毕");
    Ok(())
}

/// 机台组/机台/操作工/技能/班次日历
///
/// 刻意压窄产能: 卧加组虽有两台, 但仅卧加01有资质操作工,
/// 班次日历只放开 4 天, 使急单必须通过抢占才能排入
fn seed_master_data(conn: &Arc<Mutex<Connection>>) -> Result<()> {
    let machines = MachineRepository::new(conn.clone());
    machines.insert_group(&MachineGroup {
        group_id: "G-HMC".to_string(),
        parent_group_id: None,
        name: "卧式加工中心组".to_string(),
    })?;

    let specs = [
        ("M-SAW-01", None, "带锯床01", 1.0, false),
        ("M-HMC-01", Some("G-HMC"), "卧加01", 1.0, false),
        ("M-HMC-02", Some("G-HMC"), "卧加02", 1.2, false),
        ("M-INSP-01", None, "三坐标检验台", 1.0, true),
    ];
    for (id, group, name, efficiency, is_inspection) in specs {
        machines.insert(&Machine {
            machine_id: id.to_string(),
            machine_group_id: group.map(str::to_string),
            name: name.to_string(),
            efficiency,
            is_inspection,
            active: true,
        })?;
    }

    let operators = OperatorRepository::new(conn.clone());
    let people = [
        ("OP-A", "张伟", vec![("M-SAW-01", 5, 1)]),
        ("OP-B", "李娜", vec![("M-HMC-01", 5, 1)]),
        ("OP-C", "王强", vec![("M-INSP-01", 4, 1)]),
    ];
    let today = chrono::Local::now().date_naive();
    for (id, name, skills) in people {
        operators.insert(&Operator {
            operator_id: id.to_string(),
            name: name.to_string(),
            active: true,
        })?;
        for (machine_id, proficiency, preference_rank) in skills {
            operators.insert_skill(&OperatorSkill {
                operator_id: id.to_string(),
                machine_id: machine_id.to_string(),
                proficiency,
                preference_rank,
            })?;
        }
        // 连续 4 天白班 08:00-16:00, 其后无班次
        for offset in 0..4 {
            operators.upsert_calendar(
                id,
                today + Duration::days(offset),
                &WorkingHours {
                    start_minute: 8 * 60,
                    end_minute: 16 * 60,
                    is_overnight: false,
                    is_working: true,
                },
            )?;
        }
    }
    info!("基础数据就绪: 4 机台 / 3 操作工");
    Ok(())
}

/// 三个常规工单 + 一个高优先级急单
fn seed_jobs(conn: &Arc<Mutex<Connection>>) -> Result<()> {
    let jobs = JobRepository::new(conn.clone());
    let today = chrono::Local::now().date_naive();
    let now = chrono::Utc::now().naive_utc();

    let demo_jobs = [
        ("J-DEMO-001", "C-ALPHA", 6, 45, 10.0),
        ("J-DEMO-002", "C-BETA", 7, 50, 5.0),
        ("J-DEMO-RUSH", "C-VIP", 1, 6, 40.0),
    ];
    for (job_no, customer, explicit_priority, due_in_days, customer_weight) in demo_jobs {
        let job_id = job_no.to_string();
        jobs.insert(&Job {
            job_id: job_id.clone(),
            job_no: job_no.to_string(),
            customer_code: customer.to_string(),
            customer_weight,
            order_date: Some(today),
            due_date: Some(today + Duration::days(due_in_days)),
            promised_date: None,
            explicit_priority,
            priority_score: 0.0,
            status: JobStatus::Pending,
            locked: false,
            lock_reason: None,
            auto_scheduled: false,
            planned_start_date: Some(today),
            created_at: now,
            updated_at: now,
        })?;

        // 工艺路线: 锯切 -> 卧加 (组内寻机) -> 检验
        let route = [
            (1, "SAW", OperationKind::Normal, Some("M-SAW-01"), None, 120),
            (2, "HMC", OperationKind::Normal, None, Some("G-HMC"), 540),
            (3, "检验", OperationKind::Inspection, Some("M-INSP-01"), None, 60),
        ];
        for (seq_no, op_name, op_kind, machine_id, machine_group_id, est_duration_min) in route {
            jobs.insert_operation(&JobOperation {
                operation_id: format!("{}-OP{}", job_no, seq_no),
                job_id: job_id.clone(),
                seq_no,
                op_name: op_name.to_string(),
                op_kind,
                machine_id: machine_id.map(str::to_string),
                machine_group_id: machine_group_id.map(str::to_string),
                est_duration_min,
            })?;
        }
    }
    info!("演示工单就绪: 2 常规 + 1 急单");
    Ok(())
}
