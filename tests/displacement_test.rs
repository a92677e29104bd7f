// ==========================================
// 机加工车间排产系统 - 插单抢占引擎集成测试
// ==========================================

mod common;

use chrono::Duration;
use common::{JobSpec, TestEnv};
use machining_aps::engine::{DisplacementOptions, ScheduleError, ScheduleRequest};
use machining_aps::repository::{DisplacementLogRepository, JobRepository};
use machining_aps::{JobStatus, RescheduleOutcome};

/// 触发工单: 唯一客户 + 最高显式优先级 + 权重 98, 无交期
/// 得分 = 900 + 0 + 98 + 2(近30天1单) = 1000
fn add_trigger(env: &TestEnv, job_no: &str) {
    env.add_job(
        job_no,
        JobSpec {
            customer: "C-VIP",
            customer_weight: 98.0,
            explicit_priority: 1,
            ..JobSpec::default()
        },
    );
}

fn set_slot_locked(env: &TestEnv, job_no: &str) {
    let conn = env.conn.lock().expect("lock conn");
    conn.execute(
        "UPDATE schedule_slot SET locked = 1 WHERE job_id = ? AND chunk_no = 1",
        [job_no],
    )
    .expect("lock slot");
}

#[test]
fn test_opportunities_threshold_boundary() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_machine("M2", None, true);
    env.add_operator("O1", &[("M1", 5, 1), ("M2", 5, 2)], 7);
    // 触发工单得分 900 + 248 + 2 = 1150, 需排 480 分钟
    env.add_job(
        "J-H",
        JobSpec {
            customer: "C-VIP",
            customer_weight: 248.0,
            explicit_priority: 1,
            ..JobSpec::default()
        },
    );
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 480);
    let tomorrow = TestEnv::today() + Duration::days(1);

    // 刚好 15% 差距: (1150-1000)/1000 = 0.150
    env.add_job(
        "J-EDGE",
        JobSpec {
            priority_score: 1000.0,
            status: JobStatus::Scheduled,
            ..JobSpec::default()
        },
    );
    env.add_operation("J-EDGE", 1, "MILL", Some("M1"), None, 120);
    env.add_slot(
        "J-EDGE",
        1,
        "M1",
        "O1",
        tomorrow.and_hms_opt(8, 0, 0).unwrap(),
        tomorrow.and_hms_opt(10, 0, 0).unwrap(),
    );

    // 差 1 分即不足阈值: (1150-1001)/1001 ~= 0.149
    env.add_job(
        "J-NEAR",
        JobSpec {
            priority_score: 1001.0,
            status: JobStatus::Scheduled,
            ..JobSpec::default()
        },
    );
    env.add_operation("J-NEAR", 1, "MILL", Some("M2"), None, 120);
    env.add_slot(
        "J-NEAR",
        1,
        "M2",
        "O1",
        tomorrow.and_hms_opt(11, 0, 0).unwrap(),
        tomorrow.and_hms_opt(13, 0, 0).unwrap(),
    );

    let opp = env
        .displacement()
        .find_opportunities("J-H")
        .expect("find opportunities");

    assert_eq!(opp.trigger_score, 1150.0);
    assert_eq!(opp.threshold, 0.15);
    let names: Vec<&str> = opp.candidates.iter().map(|c| c.job_no.as_str()).collect();
    assert_eq!(names, vec!["J-EDGE"]);
    assert!((opp.candidates[0].relative_gap - 0.15).abs() < 1e-9);
    assert!((opp.total_hours_available - 2.0).abs() < 1e-9);
    // 可释放 2 小时不足所需 8 小时
    assert!((opp.required_hours - 8.0).abs() < 1e-9);
    assert!(!opp.sufficient);
}

#[test]
fn test_firm_zone_protects_near_deadline_jobs() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_machine("M2", None, true);
    env.add_operator("O1", &[("M1", 5, 1), ("M2", 5, 2)], 7);
    add_trigger(&env, "J-H");
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 480);
    let tomorrow = TestEnv::today() + Duration::days(1);

    // 交期 10 天, 落在 14 天保护期内
    env.add_job(
        "J-SOON",
        JobSpec {
            priority_score: 500.0,
            status: JobStatus::Scheduled,
            due_in_days: Some(10),
            ..JobSpec::default()
        },
    );
    env.add_operation("J-SOON", 1, "MILL", Some("M1"), None, 120);
    env.add_slot(
        "J-SOON",
        1,
        "M1",
        "O1",
        tomorrow.and_hms_opt(8, 0, 0).unwrap(),
        tomorrow.and_hms_opt(10, 0, 0).unwrap(),
    );

    // 交期 30 天, 保护期外
    env.add_job(
        "J-LATER",
        JobSpec {
            priority_score: 500.0,
            status: JobStatus::Scheduled,
            due_in_days: Some(30),
            ..JobSpec::default()
        },
    );
    env.add_operation("J-LATER", 1, "MILL", Some("M2"), None, 120);
    env.add_slot(
        "J-LATER",
        1,
        "M2",
        "O1",
        tomorrow.and_hms_opt(11, 0, 0).unwrap(),
        tomorrow.and_hms_opt(13, 0, 0).unwrap(),
    );

    let opp = env
        .displacement()
        .find_opportunities("J-H")
        .expect("find opportunities");
    let names: Vec<&str> = opp.candidates.iter().map(|c| c.job_no.as_str()).collect();
    assert_eq!(names, vec!["J-LATER"]);
    assert!((opp.total_hours_available - 2.0).abs() < 1e-9);
    assert!((opp.required_hours - 8.0).abs() < 1e-9);
    assert!(!opp.sufficient);
}

#[test]
fn test_sole_candidate_in_firm_zone_reports_insufficient() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    add_trigger(&env, "J-H");
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 480);
    let tomorrow = TestEnv::today() + Duration::days(1);

    // 唯一候选 5 天内交付, 受保护
    env.add_job(
        "J-ONLY",
        JobSpec {
            priority_score: 100.0,
            status: JobStatus::Scheduled,
            due_in_days: Some(5),
            ..JobSpec::default()
        },
    );
    env.add_operation("J-ONLY", 1, "MILL", Some("M1"), None, 120);
    env.add_slot(
        "J-ONLY",
        1,
        "M1",
        "O1",
        tomorrow.and_hms_opt(8, 0, 0).unwrap(),
        tomorrow.and_hms_opt(10, 0, 0).unwrap(),
    );

    let opp = env
        .displacement()
        .find_opportunities("J-H")
        .expect("find opportunities");
    assert!(opp.candidates.is_empty());
    assert_eq!(opp.total_hours_available, 0.0);
    assert!((opp.required_hours - 8.0).abs() < 1e-9);
    assert!(!opp.sufficient);
}

#[test]
fn test_locked_job_and_locked_slot_protected() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_machine("M2", None, true);
    env.add_operator("O1", &[("M1", 5, 1), ("M2", 5, 2)], 7);
    add_trigger(&env, "J-H");
    let tomorrow = TestEnv::today() + Duration::days(1);

    env.add_job(
        "J-LOCKED",
        JobSpec {
            priority_score: 100.0,
            status: JobStatus::Scheduled,
            ..JobSpec::default()
        },
    );
    JobRepository::new(env.conn.clone())
        .set_locked("J-LOCKED", true, Some("客户已确认交期"))
        .expect("lock job");
    env.add_operation("J-LOCKED", 1, "MILL", Some("M1"), None, 120);
    env.add_slot(
        "J-LOCKED",
        1,
        "M1",
        "O1",
        tomorrow.and_hms_opt(8, 0, 0).unwrap(),
        tomorrow.and_hms_opt(10, 0, 0).unwrap(),
    );

    // 工单未锁但首块时段已开工锁定, 整单保护
    env.add_job(
        "J-STARTED",
        JobSpec {
            priority_score: 100.0,
            status: JobStatus::Scheduled,
            ..JobSpec::default()
        },
    );
    env.add_operation("J-STARTED", 1, "MILL", Some("M2"), None, 120);
    env.add_slot(
        "J-STARTED",
        1,
        "M2",
        "O1",
        tomorrow.and_hms_opt(11, 0, 0).unwrap(),
        tomorrow.and_hms_opt(13, 0, 0).unwrap(),
    );
    set_slot_locked(&env, "J-STARTED");

    let opp = env
        .displacement()
        .find_opportunities("J-H")
        .expect("find opportunities");
    assert!(opp.candidates.is_empty());
    assert_eq!(opp.total_hours_available, 0.0);
}

/// 窄产能世界: 1 机台 1 操作工, 明天起 4 个工作日 (4x480 分钟)
/// 今天无班次, 保证全部时段都排在未来 (候选盘点以当前时刻为界)
fn narrow_world(env: &TestEnv) {
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 0);
    for offset in 1..=4 {
        env.set_calendar_day("O1", TestEnv::today() + Duration::days(offset), 8, 16);
    }
}

/// 低优先级工单占满全部 4 天产能
fn fill_with_low_priority(env: &TestEnv) {
    env.add_job(
        "J-LOW",
        JobSpec {
            customer: "C-LOW",
            explicit_priority: 9,
            ..JobSpec::default()
        },
    );
    env.add_operation("J-LOW", 1, "MILL", Some("M1"), None, 1920);
    env.scheduler()
        .schedule_job(&ScheduleRequest::new("J-LOW"))
        .expect("schedule low priority job");
    assert_eq!(env.slots_of("J-LOW").len(), 4);
}

#[test]
fn test_displacement_end_to_end() {
    let env = TestEnv::new();
    narrow_world(&env);
    fill_with_low_priority(&env);
    add_trigger(&env, "J-H");
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 480);

    let result = env
        .displacement()
        .schedule_with_displacement(&ScheduleRequest::new("J-H"), &DisplacementOptions::default())
        .expect("displacement");

    // 触发工单落库
    assert_eq!(result.outcome.slot_count(), 1);
    assert_eq!(env.job("J-H").status, JobStatus::Scheduled);

    let d = result.displacement.expect("displacement executed");
    assert!(!d.dry_run);
    assert!(d.undo_id.is_some());
    assert_eq!(d.displaced.len(), 1);
    assert_eq!(d.displaced[0].job_no, "J-LOW");
    // 腾出 4 天后剩余 3 天 (1440 分钟) 排不下 1920 分钟, 重排失败留待人工
    assert_eq!(d.displaced[0].outcome, RescheduleOutcome::Failed);
    assert_eq!(env.job("J-LOW").status, JobStatus::Pending);
    assert!(env.slots_of("J-LOW").is_empty());

    // 抢占日志完整, 且按触发工单可检索
    let repo = DisplacementLogRepository::new(env.conn.clone());
    let by_trigger = repo.find_logs_for_job("J-H").expect("query by trigger");
    assert_eq!(by_trigger.len(), 1);
    assert_eq!(by_trigger[0].log_id, d.log_id);
    let log = repo
        .find_log(&d.log_id)
        .expect("query log")
        .expect("log exists");
    assert!(log.success);
    assert_eq!(log.displaced_count, 1);
    assert!((log.total_hours_freed - 32.0).abs() < 1e-9);
    let details = repo.find_details(&d.log_id).expect("query details");
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].displaced_job_id, "J-LOW");
    assert_eq!(details[0].reschedule_outcome, Some(RescheduleOutcome::Failed));

    assert!((d.impact.total_hours_freed - 32.0).abs() < 1e-9);
    assert_eq!(d.impact.customers_affected, vec!["C-LOW".to_string()]);
    assert_eq!(d.impact.machines_affected, vec!["M1".to_string()]);
}

#[test]
fn test_displaced_job_rescheduled_to_later_window() {
    let env = TestEnv::new();
    // M1 明天起 3 天产能, 备用 M2 后天起 2 天;
    // 触发工单 1440 分钟在任何单一资源上都排不下, 只能抢占
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 0);
    for offset in 1..=3 {
        env.set_calendar_day("O1", TestEnv::today() + Duration::days(offset), 8, 16);
    }
    env.add_machine("M2", None, true);
    env.add_operator("O2", &[("M2", 5, 1)], 0);
    for offset in 2..=3 {
        env.set_calendar_day("O2", TestEnv::today() + Duration::days(offset), 8, 16);
    }

    // J-LOW 不指定机台, 同级候选按机台号先落 M1 首日
    env.add_job(
        "J-LOW",
        JobSpec {
            customer: "C-LOW",
            explicit_priority: 9,
            ..JobSpec::default()
        },
    );
    env.add_operation("J-LOW", 1, "MILL", None, None, 480);
    env.scheduler()
        .schedule_job(&ScheduleRequest::new("J-LOW"))
        .expect("schedule low priority job");
    assert_eq!(env.slots_of("J-LOW")[0].machine_id, "M1");

    add_trigger(&env, "J-H");
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 1440);

    let result = env
        .displacement()
        .schedule_with_displacement(&ScheduleRequest::new("J-H"), &DisplacementOptions::default())
        .expect("displacement");

    // 触发工单占满 M1 三天
    assert_eq!(result.outcome.slot_count(), 3);
    let d = result.displacement.expect("displacement executed");
    assert_eq!(d.displaced.len(), 1);
    assert_eq!(d.displaced[0].job_no, "J-LOW");
    assert_eq!(d.displaced[0].outcome, RescheduleOutcome::Rescheduled);

    // 整单迁到备用机台, 开工顺延一天
    let day2_start = (TestEnv::today() + Duration::days(2))
        .and_hms_opt(8, 0, 0)
        .unwrap();
    assert_eq!(d.displaced[0].new_start, Some(day2_start));
    assert!((d.displaced[0].delay_hours.unwrap() - 24.0).abs() < 1e-9);
    assert!((d.impact.average_delay_hours - 24.0).abs() < 1e-9);

    assert_eq!(env.job("J-LOW").status, JobStatus::Scheduled);
    let low_slots = env.slots_of("J-LOW");
    assert_eq!(low_slots.len(), 1);
    assert_eq!(low_slots[0].start_at, day2_start);
    assert_eq!(low_slots[0].machine_id, "M2");

    // 审计明细同步记录重排去向
    let repo = DisplacementLogRepository::new(env.conn.clone());
    let details = repo.find_details(&d.log_id).expect("query details");
    assert_eq!(details[0].reschedule_outcome, Some(RescheduleOutcome::Rescheduled));
    assert_eq!(details[0].new_start, Some(day2_start));
}

#[test]
fn test_dry_run_leaves_no_trace() {
    let env = TestEnv::new();
    narrow_world(&env);
    fill_with_low_priority(&env);
    add_trigger(&env, "J-H");
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 480);

    let options = DisplacementOptions {
        dry_run: true,
        ..DisplacementOptions::default()
    };
    let result = env
        .displacement()
        .schedule_with_displacement(&ScheduleRequest::new("J-H"), &options)
        .expect("dry run");

    // 试算报告完整
    let d = result.displacement.expect("displacement evaluated");
    assert!(d.dry_run);
    assert_eq!(d.displaced.len(), 1);
    assert!(d.undo_id.is_none());

    // 但数据库无任何痕迹
    assert_eq!(env.job("J-LOW").status, JobStatus::Scheduled);
    assert_eq!(env.slots_of("J-LOW").len(), 4);
    assert_eq!(env.job("J-H").status, JobStatus::Pending);
    assert!(env.slots_of("J-H").is_empty());
    let conn = env.conn.lock().expect("lock conn");
    let logs: i64 = conn
        .query_row("SELECT COUNT(*) FROM displacement_log", [], |r| r.get(0))
        .expect("count logs");
    let undos: i64 = conn
        .query_row("SELECT COUNT(*) FROM undo_operation", [], |r| r.get(0))
        .expect("count undos");
    assert_eq!(logs, 0);
    assert_eq!(undos, 0);
}

#[test]
fn test_insufficient_displacement_rolls_back() {
    let env = TestEnv::new();
    narrow_world(&env);
    fill_with_low_priority(&env);
    add_trigger(&env, "J-H");
    // 需求 2400 分钟超过全部日历产能, 抢占也无济于事
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 2400);

    let err = env
        .displacement()
        .schedule_with_displacement(&ScheduleRequest::new("J-H"), &DisplacementOptions::default())
        .unwrap_err();
    assert!(matches!(err, ScheduleError::InsufficientDisplacement { .. }));

    // 全量回滚: 被试探抢占的工单完好无损
    assert_eq!(env.job("J-LOW").status, JobStatus::Scheduled);
    assert_eq!(env.slots_of("J-LOW").len(), 4);
    assert!(env.slots_of("J-H").is_empty());
}

#[test]
fn test_no_candidates_surfaces_original_error() {
    let env = TestEnv::new();
    narrow_world(&env);
    // 产能被锁定工单占满, 无可抢占对象
    env.add_job(
        "J-LOW",
        JobSpec {
            customer: "C-LOW",
            explicit_priority: 9,
            locked: true,
            ..JobSpec::default()
        },
    );
    env.add_operation("J-LOW", 1, "MILL", Some("M1"), None, 1920);
    env.scheduler()
        .schedule_job(&ScheduleRequest::new("J-LOW"))
        .expect("schedule low priority job");
    add_trigger(&env, "J-H");
    env.add_operation("J-H", 1, "MILL", Some("M1"), None, 480);

    let err = env
        .displacement()
        .schedule_with_displacement(&ScheduleRequest::new("J-H"), &DisplacementOptions::default())
        .unwrap_err();
    assert!(err.is_no_capacity());
}
