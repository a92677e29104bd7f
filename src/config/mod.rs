// ==========================================
// 机加工车间排产系统 - 配置层
// ==========================================
// 职责: 排产参数的默认值与 config_kv 覆盖加载
// 说明: 缺失/非法的配置值一律回落默认值, 不中断排产
// ==========================================

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ==========================================
// 配置键 (config_kv.key)
// ==========================================
pub mod config_keys {
    pub const SLOT_GRANULARITY_MIN: &str = "slot_granularity_min";
    pub const DEFAULT_BUFFER_MIN: &str = "default_buffer_min";
    pub const CUTTING_LAG_HOURS: &str = "cutting_lag_hours";
    pub const LEAD_TIME_DAYS: &str = "lead_time_days";
    pub const MAX_LOOKAHEAD_DAYS: &str = "max_lookahead_days";
    pub const MAX_CHUNKS_PER_OPERATION: &str = "max_chunks_per_operation";
    pub const MAX_OPERATOR_SEARCH_DAYS: &str = "max_operator_search_days";
    pub const DISPLACEMENT_THRESHOLD: &str = "displacement_threshold";
    pub const FIRM_ZONE_DAYS: &str = "firm_zone_days";
    pub const UNDO_RETENTION_HOURS: &str = "undo_retention_hours";
}

// ==========================================
// SchedulerConfig - 排产参数
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 时间窗搜索粒度 (分钟)
    pub slot_granularity_min: i64,
    /// 相邻工序默认缓冲 (分钟)
    pub default_buffer_min: i64,
    /// 切割/水刀后滞留时间 (小时)
    pub cutting_lag_hours: i64,
    /// 交期倒推提前期 (天)
    pub lead_time_days: i64,
    /// 前向搜索上限 (天)
    pub max_lookahead_days: i64,
    /// 单工序最大分块数
    pub max_chunks_per_operation: i64,
    /// 单操作工连续搜索上限 (天)
    pub max_operator_search_days: i64,
    /// 抢占优先级差阈值 (相对值)
    pub displacement_threshold: f64,
    /// 交付保护期 (天)
    pub firm_zone_days: i64,
    /// 撤销保留窗口 (小时)
    pub undo_retention_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_granularity_min: 15,
            default_buffer_min: 15,
            cutting_lag_hours: 24,
            lead_time_days: 7,
            max_lookahead_days: 180,
            max_chunks_per_operation: 15,
            max_operator_search_days: 30,
            displacement_threshold: 0.15,
            firm_zone_days: 14,
            undo_retention_hours: 24,
        }
    }
}

fn read_raw(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM config_kv WHERE key = ?",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .ok()
    .flatten()
}

fn parse_i64(raw: Option<String>, default: i64) -> i64 {
    raw.as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn parse_f64(raw: Option<String>, default: f64) -> f64 {
    raw.as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

impl SchedulerConfig {
    /// 读取 config_kv 覆盖项, 缺失/非法值回落默认
    pub fn load_from(conn: &Connection) -> Self {
        use config_keys::*;
        let d = Self::default();
        Self {
            slot_granularity_min: parse_i64(read_raw(conn, SLOT_GRANULARITY_MIN), d.slot_granularity_min),
            default_buffer_min: parse_i64(read_raw(conn, DEFAULT_BUFFER_MIN), d.default_buffer_min),
            cutting_lag_hours: parse_i64(read_raw(conn, CUTTING_LAG_HOURS), d.cutting_lag_hours),
            lead_time_days: parse_i64(read_raw(conn, LEAD_TIME_DAYS), d.lead_time_days),
            max_lookahead_days: parse_i64(read_raw(conn, MAX_LOOKAHEAD_DAYS), d.max_lookahead_days),
            max_chunks_per_operation: parse_i64(
                read_raw(conn, MAX_CHUNKS_PER_OPERATION),
                d.max_chunks_per_operation,
            ),
            max_operator_search_days: parse_i64(
                read_raw(conn, MAX_OPERATOR_SEARCH_DAYS),
                d.max_operator_search_days,
            ),
            displacement_threshold: parse_f64(
                read_raw(conn, DISPLACEMENT_THRESHOLD),
                d.displacement_threshold,
            ),
            firm_zone_days: parse_i64(read_raw(conn, FIRM_ZONE_DAYS), d.firm_zone_days),
            undo_retention_hours: parse_i64(
                read_raw(conn, UNDO_RETENTION_HOURS),
                d.undo_retention_hours,
            ),
        }
    }

    /// 切割滞留时间 (分钟口径)
    pub fn cutting_lag_min(&self) -> i64 {
        self.cutting_lag_hours * 60
    }
}

/// 写入单个配置覆盖项
pub fn set_config_value(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        r#"INSERT INTO config_kv (key, value, updated_at) VALUES (?, ?, datetime('now'))
           ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')"#,
        [key, value],
    )?;
    Ok(())
}
