// ==========================================
// 机加工车间排产系统 - 操作工领域模型
// ==========================================
// 职责: 操作工主数据、技能矩阵与班次时间窗
// 红线: 无日历行 = 非工作日; 跨夜班次结束时刻落在次日
// ==========================================

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// Operator - 操作工
// ==========================================
// 对齐: operator 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub operator_id: String,
    pub name: String,
    pub active: bool,
}

// ==========================================
// OperatorSkill - 技能矩阵行
// ==========================================
// 对齐: operator_skill 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSkill {
    pub operator_id: String,
    pub machine_id: String,
    pub proficiency: i32,     // 熟练度 (越大越熟练)
    pub preference_rank: i32, // 指派偏好序 (越小越优先)
}

// ==========================================
// WorkingHours - 单日班次时间窗
// ==========================================
// start_minute / end_minute 为相对当日 00:00 的分钟数
// 跨夜班次 (is_overnight=true) 的 end_minute 属于次日
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start_minute: i32,
    pub end_minute: i32,
    pub is_overnight: bool,
    pub is_working: bool,
}

impl WorkingHours {
    /// 非工作日
    pub fn non_working() -> Self {
        Self {
            start_minute: 0,
            end_minute: 0,
            is_overnight: false,
            is_working: false,
        }
    }

    /// 班次时长 (分钟)
    pub fn duration_min(&self) -> i64 {
        if !self.is_working {
            return 0;
        }
        if self.is_overnight {
            (1440 - self.start_minute + self.end_minute) as i64
        } else {
            (self.end_minute - self.start_minute).max(0) as i64
        }
    }

    /// 班次在指定日期上的绝对时间窗 [start, end)
    ///
    /// 非工作日返回 None; 跨夜班次的 end 落在次日
    pub fn window_on(&self, date: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
        if !self.is_working {
            return None;
        }
        let day_start = date.and_hms_opt(0, 0, 0)?;
        let start = day_start + Duration::minutes(self.start_minute as i64);
        let end = if self.is_overnight {
            day_start + Duration::days(1) + Duration::minutes(self.end_minute as i64)
        } else {
            day_start + Duration::minutes(self.end_minute as i64)
        };
        if end <= start {
            return None;
        }
        Some((start, end))
    }

    /// 时间段 [start, end) 是否完整落在本班次内
    pub fn covers(&self, date: NaiveDate, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        match self.window_on(date) {
            Some((win_start, win_end)) => start >= win_start && end <= win_end,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_shift_window() {
        let wh = WorkingHours {
            start_minute: 8 * 60,
            end_minute: 16 * 60,
            is_overnight: false,
            is_working: true,
        };
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let (s, e) = wh.window_on(date).unwrap();
        assert_eq!(s, date.and_hms_opt(8, 0, 0).unwrap());
        assert_eq!(e, date.and_hms_opt(16, 0, 0).unwrap());
        assert_eq!(wh.duration_min(), 480);
    }

    #[test]
    fn test_overnight_shift_window() {
        let wh = WorkingHours {
            start_minute: 22 * 60,
            end_minute: 6 * 60,
            is_overnight: true,
            is_working: true,
        };
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let (s, e) = wh.window_on(date).unwrap();
        assert_eq!(s, date.and_hms_opt(22, 0, 0).unwrap());
        let next = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert_eq!(e, next.and_hms_opt(6, 0, 0).unwrap());
        assert_eq!(wh.duration_min(), 480);

        // 跨夜窗口覆盖凌晨时段
        assert!(wh.covers(
            date,
            date.and_hms_opt(23, 0, 0).unwrap(),
            next.and_hms_opt(2, 0, 0).unwrap()
        ));
    }

    #[test]
    fn test_non_working_day() {
        let wh = WorkingHours::non_working();
        assert_eq!(wh.duration_min(), 0);
        assert!(wh
            .window_on(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap())
            .is_none());
    }
}
