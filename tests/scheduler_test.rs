// ==========================================
// 机加工车间排产系统 - 时段排产引擎集成测试
// ==========================================

mod common;

use chrono::Duration;
use common::{JobSpec, TestEnv};
use machining_aps::engine::{ScheduleError, ScheduleRequest};
use machining_aps::repository::ConflictLogRepository;
use machining_aps::JobStatus;

fn at(date: chrono::NaiveDate, h: u32, m: u32) -> chrono::NaiveDateTime {
    date.and_hms_opt(h, m, 0).unwrap()
}

#[test]
fn test_single_operation_schedules_at_shift_start() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 120);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    let today = TestEnv::today();
    assert_eq!(outcome.slot_count(), 1);
    assert_eq!(outcome.start_at, Some(at(today, 8, 0)));
    assert_eq!(outcome.end_at, Some(at(today, 10, 0)));

    let job = env.job("J1");
    assert_eq!(job.status, JobStatus::Scheduled);
    assert!(job.auto_scheduled);
    assert!(job.priority_score > 0.0);
    assert_eq!(job.planned_start_date, Some(today));
}

#[test]
fn test_sequence_buffer_between_operations() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);
    env.add_operation("J1", 2, "DRILL", Some("M1"), None, 60);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    let today = TestEnv::today();
    let drill = &outcome.operations[1].slots[0];
    // 前序 08:00-09:00 结束后加 15 分钟缓冲
    assert_eq!(drill.start_at, at(today, 9, 15));
    assert_eq!(drill.end_at, at(today, 10, 15));
}

#[test]
fn test_cutting_lag_delays_next_operation_24h() {
    let env = TestEnv::new();
    env.add_machine("M-SAW", None, true);
    env.add_machine("M-HMC", None, true);
    env.add_operator("O1", &[("M-SAW", 5, 1)], 7);
    env.add_operator("O2", &[("M-HMC", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "SAW", Some("M-SAW"), None, 120);
    env.add_operation("J1", 2, "HMC", Some("M-HMC"), None, 240);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    let today = TestEnv::today();
    let saw = &outcome.operations[0].slots[0];
    let hmc = &outcome.operations[1].slots[0];
    assert_eq!(saw.end_at, at(today, 10, 0));
    // 锯切完工后滞留 24 小时才可开下道工序
    assert_eq!(hmc.start_at, at(today + Duration::days(1), 10, 0));
}

#[test]
fn test_long_operation_chunks_across_non_working_day() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    let today = TestEnv::today();
    // 手工日历: 第 0/2/3 天上班, 第 1 天无班次
    env.add_operator("O1", &[("M1", 5, 1)], 1);
    env.set_calendar_day("O1", today + Duration::days(2), 8, 16);
    env.set_calendar_day("O1", today + Duration::days(3), 8, 16);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 1200); // 20 小时

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    let slots = &outcome.operations[0].slots;
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0].chunk_no, 1);
    assert_eq!(slots[0].start_at, at(today, 8, 0));
    assert_eq!(slots[0].end_at, at(today, 16, 0));
    // 无班次日被整天跳过
    assert_eq!(slots[1].start_at, at(today + Duration::days(2), 8, 0));
    assert_eq!(slots[2].start_at, at(today + Duration::days(3), 8, 0));
    assert_eq!(slots[2].end_at, at(today + Duration::days(3), 12, 0));
    let total: i64 = slots.iter().map(|s| s.duration_min()).sum();
    assert_eq!(total, 1200);
}

#[test]
fn test_zero_duration_operation_skipped() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);
    env.add_operation("J1", 2, "外协喷漆", Some("M1"), None, 0);
    env.add_operation("J1", 3, "DRILL", Some("M1"), None, 60);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    assert!(outcome.operations[1].slots.is_empty());
    assert_eq!(outcome.slot_count(), 2);
    // 零工时工序不推迟后续工序的时间轴
    let today = TestEnv::today();
    assert_eq!(outcome.operations[2].slots[0].start_at, at(today, 9, 15));
}

#[test]
fn test_force_start_date() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 10);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);

    let mut request = ScheduleRequest::new("J1");
    request.force_start_date = Some(TestEnv::today() + Duration::days(2));
    let outcome = env.scheduler().schedule_job(&request).expect("schedule");

    assert_eq!(
        outcome.start_at,
        Some(at(TestEnv::today() + Duration::days(2), 8, 0))
    );
}

#[test]
fn test_anchor_clamped_to_today() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);

    // 指定过去日期也不得排到今天之前
    let mut request = ScheduleRequest::new("J1");
    request.force_start_date = Some(TestEnv::today() - Duration::days(5));
    let outcome = env.scheduler().schedule_job(&request).expect("schedule");

    assert_eq!(outcome.start_at, Some(at(TestEnv::today(), 8, 0)));
}

#[test]
fn test_dependency_blocks_scheduling() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J-PRE", JobSpec::default());
    env.add_job("J-MAIN", JobSpec::default());
    env.add_operation("J-MAIN", 1, "MILL", Some("M1"), None, 60);
    env.add_dependency("J-MAIN", "J-PRE");

    let err = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J-MAIN"))
        .unwrap_err();
    match err {
        ScheduleError::DependencyBlocked { blocking } => {
            assert_eq!(blocking, vec!["J-PRE".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    // 失败原因落 conflict_log
    let logs = ConflictLogRepository::new(env.conn.clone())
        .find_by_job("J-MAIN")
        .expect("query conflict log");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].reason, "DEPENDENCY_BLOCKED");
}

#[test]
fn test_no_capacity_rolls_back_whole_job() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);
    // 全厂无检验台, 检验工序在任何机台上都排不下
    env.add_operation("J1", 2, "终检", None, None, 60);

    let err = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .unwrap_err();
    assert!(err.is_no_capacity());

    // 整单原子: 第一道已试排的时段必须随回滚消失
    assert!(env.slots_of("J1").is_empty());
    assert_eq!(env.job("J1").status, JobStatus::Pending);

    let logs = ConflictLogRepository::new(env.conn.clone())
        .find_by_job("J1")
        .expect("query conflict log");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].reason, "NO_CAPACITY");
}

#[test]
fn test_machine_group_substitution() {
    let env = TestEnv::new();
    env.add_group("G1", None);
    env.add_machine("M1", Some("G1"), false); // 停用
    env.add_machine("M2", Some("G1"), true);
    env.add_operator("O2", &[("M2", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", None, Some("G1"), 60);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    assert_eq!(outcome.operations[0].slots[0].machine_id, "M2");
}

#[test]
fn test_pinned_machine_without_operator_substituted_by_group_sibling() {
    let env = TestEnv::new();
    env.add_group("G1", None);
    env.add_machine("M1", Some("G1"), true); // 启用但无合格操作工
    env.add_machine("M2", Some("G1"), true);
    env.add_operator("O2", &[("M2", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    // 指定 M1, 无人可操作时同组 M2 顶替
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    assert_eq!(outcome.operations[0].slots[0].machine_id, "M2");
    assert_eq!(outcome.operations[0].slots[0].operator_id, "O2");
}

#[test]
fn test_unpinned_operation_falls_back_to_any_active_machine() {
    let env = TestEnv::new();
    env.add_machine("M1", None, false); // 停用, 不应被兜底选中
    env.add_machine("M2", None, true);
    env.add_operator("O2", &[("M2", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    // 未指定机台也未指定机台组
    env.add_operation("J1", 1, "MILL", None, None, 60);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    assert_eq!(outcome.operations[0].slots[0].machine_id, "M2");
}

#[test]
fn test_reschedule_requires_explicit_flag() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);

    let scheduler = env.scheduler();
    scheduler
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("first schedule");

    // 已排产工单不可静默重排
    let err = scheduler
        .schedule_job(&ScheduleRequest::new("J1"))
        .unwrap_err();
    assert!(matches!(err, ScheduleError::ValidationConflict { .. }));

    // 显式重排: 旧时段整体替换
    let mut request = ScheduleRequest::new("J1");
    request.force_reschedule = true;
    let outcome = scheduler.schedule_job(&request).expect("reschedule");
    assert_eq!(outcome.slot_count(), 1);
    assert_eq!(env.slots_of("J1").len(), 1);
}

#[test]
fn test_partial_reschedule_keeps_earlier_operations() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);
    env.add_operation("J1", 2, "DRILL", Some("M1"), None, 60);

    let scheduler = env.scheduler();
    scheduler
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("first schedule");
    let today = TestEnv::today();
    let tomorrow = today + Duration::days(1);

    // 只重排第 2 道起, 第 1 道保持原时段
    let mut request = ScheduleRequest::new("J1");
    request.force_reschedule = true;
    request.from_sequence = Some(2);
    request.force_start_date = Some(tomorrow);
    let outcome = scheduler.schedule_job(&request).expect("partial reschedule");

    assert_eq!(outcome.operations.len(), 1);
    assert_eq!(outcome.operations[0].seq_no, 2);
    assert_eq!(outcome.start_at, Some(at(tomorrow, 8, 0)));

    let slots = env.slots_of("J1");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].operation_id, "J1-OP1");
    assert_eq!(slots[0].start_at, at(today, 8, 0));
    assert_eq!(slots[0].end_at, at(today, 9, 0));
    assert_eq!(slots[1].operation_id, "J1-OP2");
    assert_eq!(slots[1].start_at, at(tomorrow, 8, 0));

    // 计划开工日期以保留段为准
    let job = env.job("J1");
    assert_eq!(job.status, JobStatus::Scheduled);
    assert_eq!(job.planned_start_date, Some(today));
}

#[test]
fn test_partial_reschedule_requires_reschedule_flag() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);

    let scheduler = env.scheduler();
    scheduler
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("first schedule");

    let mut request = ScheduleRequest::new("J1");
    request.from_sequence = Some(1);
    let err = scheduler.schedule_job(&request).unwrap_err();
    assert!(matches!(err, ScheduleError::ValidationConflict { .. }));
    assert_eq!(env.slots_of("J1").len(), 1);
}

#[test]
fn test_planned_start_date_does_not_anchor_scheduling() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    env.add_operator("O1", &[("M1", 5, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);
    {
        // 既有计划开工日期不参与锚点推算
        let conn = env.conn.lock().expect("lock conn");
        conn.execute(
            "UPDATE job SET planned_start_date = ? WHERE job_id = 'J1'",
            [TestEnv::today() + Duration::days(3)],
        )
        .expect("set planned start");
    }

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");

    assert_eq!(outcome.start_at, Some(at(TestEnv::today(), 8, 0)));
}

#[test]
fn test_preferred_operator_wins() {
    let env = TestEnv::new();
    env.add_machine("M1", None, true);
    // O-FAST 偏好序更小, 应优先被指派
    env.add_operator("O-SLOW", &[("M1", 5, 2)], 7);
    env.add_operator("O-FAST", &[("M1", 3, 1)], 7);
    env.add_job("J1", JobSpec::default());
    env.add_operation("J1", 1, "MILL", Some("M1"), None, 60);

    let outcome = env
        .scheduler()
        .schedule_job(&ScheduleRequest::new("J1"))
        .expect("schedule");
    assert_eq!(outcome.operations[0].slots[0].operator_id, "O-FAST");
}
