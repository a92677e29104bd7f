// ==========================================
// 机加工车间排产系统 - 时间窗计算
// ==========================================
// 职责: 粒度对齐与班次窗口内的空闲区间扣除
// 红线: 全部半开区间 [start, end); 纯函数
// ==========================================

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

/// 上取整到粒度边界 (整点分钟网格)
pub(crate) fn align_up(t: NaiveDateTime, granularity_min: i64) -> NaiveDateTime {
    if granularity_min <= 1 {
        return t;
    }
    let minute_of_day = (t.hour() as i64) * 60 + (t.minute() as i64);
    if minute_of_day % granularity_min == 0 && t.second() == 0 && t.nanosecond() == 0 {
        return t;
    }
    let next = (minute_of_day / granularity_min + 1) * granularity_min;
    t.date().and_time(NaiveTime::MIN) + Duration::minutes(next)
}

/// 从窗口中扣除占用区间, 返回剩余空闲区间 (升序)
///
/// 占用区间可以无序、互相重叠或超出窗口边界
pub(crate) fn free_intervals(
    win_start: NaiveDateTime,
    win_end: NaiveDateTime,
    mut busy: Vec<(NaiveDateTime, NaiveDateTime)>,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut free = Vec::new();
    if win_end <= win_start {
        return free;
    }
    busy.sort_by_key(|b| b.0);

    let mut cursor = win_start;
    for (busy_start, busy_end) in busy {
        if busy_end <= cursor {
            continue;
        }
        if busy_start > cursor {
            free.push((cursor, busy_start.min(win_end)));
        }
        cursor = cursor.max(busy_end);
        if cursor >= win_end {
            return free;
        }
    }
    if cursor < win_end {
        free.push((cursor, win_end));
    }
    free
}
