// ==========================================
// 机加工车间排产系统 - 班次日历协作方
// ==========================================
// 职责: 按 (操作工, 日期) 提供班次时间窗
// 说明: trait 接收调用方事务内的连接, 保证读一致性;
//       测试可注入固定日历实现
// ==========================================

use crate::domain::operator::WorkingHours;
use crate::engine::error::EngineResult;
use crate::repository::OperatorRepository;
use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::Connection;

/// 班次日历协作方
pub trait CalendarProvider: Send + Sync {
    /// 操作工在指定日期的班次时间窗; 非工作日返回 is_working=false
    fn working_hours(
        &self,
        conn: &Connection,
        operator_id: &str,
        date: NaiveDate,
    ) -> EngineResult<WorkingHours>;
}

// ==========================================
// DbCalendarProvider - 基于 operator_calendar 表
// ==========================================
#[derive(Debug, Default)]
pub struct DbCalendarProvider;

impl CalendarProvider for DbCalendarProvider {
    fn working_hours(
        &self,
        conn: &Connection,
        operator_id: &str,
        date: NaiveDate,
    ) -> EngineResult<WorkingHours> {
        Ok(OperatorRepository::working_hours_in(conn, operator_id, date)?)
    }
}

// ==========================================
// FixedWeekCalendarProvider - 固定周模式 (演示/测试)
// ==========================================
// 周一至周五固定班次, 周末休息; 不读日历表
#[derive(Debug, Clone)]
pub struct FixedWeekCalendarProvider {
    pub start_minute: i32,
    pub end_minute: i32,
}

impl FixedWeekCalendarProvider {
    /// 默认白班 08:00-16:00
    pub fn day_shift() -> Self {
        Self {
            start_minute: 8 * 60,
            end_minute: 16 * 60,
        }
    }
}

impl CalendarProvider for FixedWeekCalendarProvider {
    fn working_hours(
        &self,
        _conn: &Connection,
        _operator_id: &str,
        date: NaiveDate,
    ) -> EngineResult<WorkingHours> {
        let is_working = !matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        Ok(WorkingHours {
            start_minute: self.start_minute,
            end_minute: self.end_minute,
            is_overnight: false,
            is_working,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_fixed_week_provider() {
        let conn = crate::db::open_in_memory_connection().unwrap();
        let provider = FixedWeekCalendarProvider::day_shift();

        // 2026-03-02 周一 / 2026-03-07 周六
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();

        let weekday = provider.working_hours(&conn, "op1", monday).unwrap();
        assert!(weekday.is_working);
        assert_eq!(weekday.start_minute, 8 * 60);
        assert_eq!(weekday.end_minute, 16 * 60);

        let weekend = provider.working_hours(&conn, "op1", saturday).unwrap();
        assert!(!weekend.is_working);
    }
}
