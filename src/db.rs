// ==========================================
// 机加工车间排产系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 集中建表语句，库/二进制/测试共用同一份 schema
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存数据库（测试/演示用）
pub fn open_in_memory_connection() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get(0)
    })?;
    Ok(v)
}

/// 初始化数据库 schema（幂等，可重复执行）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS job (
            job_id TEXT PRIMARY KEY,
            job_no TEXT NOT NULL UNIQUE,
            customer_code TEXT NOT NULL,
            customer_weight REAL NOT NULL DEFAULT 0,
            order_date TEXT,
            due_date TEXT,
            promised_date TEXT,
            explicit_priority INTEGER NOT NULL DEFAULT 5,
            priority_score REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'PENDING',
            locked INTEGER NOT NULL DEFAULT 0,
            lock_reason TEXT,
            auto_scheduled INTEGER NOT NULL DEFAULT 0,
            planned_start_date TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS job_operation (
            operation_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES job(job_id) ON DELETE CASCADE,
            seq_no INTEGER NOT NULL,
            op_name TEXT NOT NULL,
            op_kind TEXT NOT NULL DEFAULT 'NORMAL',
            machine_id TEXT,
            machine_group_id TEXT,
            est_duration_min INTEGER NOT NULL DEFAULT 0,
            UNIQUE (job_id, seq_no)
        );

        CREATE TABLE IF NOT EXISTS machine_group (
            group_id TEXT PRIMARY KEY,
            parent_group_id TEXT,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS machine (
            machine_id TEXT PRIMARY KEY,
            machine_group_id TEXT REFERENCES machine_group(group_id),
            name TEXT NOT NULL,
            efficiency REAL NOT NULL DEFAULT 1.0,
            is_inspection INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS operator (
            operator_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS operator_skill (
            operator_id TEXT NOT NULL REFERENCES operator(operator_id) ON DELETE CASCADE,
            machine_id TEXT NOT NULL REFERENCES machine(machine_id) ON DELETE CASCADE,
            proficiency INTEGER NOT NULL DEFAULT 1,
            preference_rank INTEGER NOT NULL DEFAULT 99,
            PRIMARY KEY (operator_id, machine_id)
        );

        CREATE TABLE IF NOT EXISTS operator_calendar (
            operator_id TEXT NOT NULL REFERENCES operator(operator_id) ON DELETE CASCADE,
            work_date TEXT NOT NULL,
            start_minute INTEGER NOT NULL,
            end_minute INTEGER NOT NULL,
            is_overnight INTEGER NOT NULL DEFAULT 0,
            is_working INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (operator_id, work_date)
        );

        CREATE TABLE IF NOT EXISTS job_dependency (
            job_id TEXT NOT NULL REFERENCES job(job_id) ON DELETE CASCADE,
            depends_on_job_id TEXT NOT NULL REFERENCES job(job_id) ON DELETE CASCADE,
            PRIMARY KEY (job_id, depends_on_job_id)
        );

        CREATE TABLE IF NOT EXISTS schedule_slot (
            slot_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES job(job_id) ON DELETE CASCADE,
            operation_id TEXT NOT NULL REFERENCES job_operation(operation_id) ON DELETE CASCADE,
            machine_id TEXT NOT NULL REFERENCES machine(machine_id),
            operator_id TEXT NOT NULL REFERENCES operator(operator_id),
            chunk_no INTEGER NOT NULL DEFAULT 1,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'SCHEDULED',
            locked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_slot_machine_time
            ON schedule_slot (machine_id, start_at, end_at);
        CREATE INDEX IF NOT EXISTS idx_slot_operator_time
            ON schedule_slot (operator_id, start_at, end_at);
        CREATE INDEX IF NOT EXISTS idx_slot_job ON schedule_slot (job_id);

        CREATE TABLE IF NOT EXISTS displacement_log (
            log_id TEXT PRIMARY KEY,
            trigger_job_id TEXT NOT NULL,
            executed_at TEXT NOT NULL,
            dry_run INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL DEFAULT 0,
            displaced_count INTEGER NOT NULL DEFAULT 0,
            total_hours_freed REAL NOT NULL DEFAULT 0,
            threshold_used REAL NOT NULL DEFAULT 0.15,
            execution_ms INTEGER NOT NULL DEFAULT 0,
            impact_json TEXT
        );

        CREATE TABLE IF NOT EXISTS displacement_detail (
            detail_id TEXT PRIMARY KEY,
            log_id TEXT NOT NULL REFERENCES displacement_log(log_id) ON DELETE CASCADE,
            displaced_job_id TEXT NOT NULL,
            machine_id TEXT NOT NULL,
            original_start TEXT NOT NULL,
            original_end TEXT NOT NULL,
            hours_freed REAL NOT NULL,
            reason TEXT NOT NULL,
            reschedule_outcome TEXT,
            new_start TEXT,
            delay_hours REAL
        );

        CREATE TABLE IF NOT EXISTS undo_operation (
            undo_id TEXT PRIMARY KEY,
            action_type TEXT NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            consumed INTEGER NOT NULL DEFAULT 0,
            consumed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS undo_snapshot (
            snapshot_id TEXT PRIMARY KEY,
            undo_id TEXT NOT NULL REFERENCES undo_operation(undo_id) ON DELETE CASCADE,
            job_id TEXT NOT NULL,
            operation_id TEXT NOT NULL,
            chunk_no INTEGER NOT NULL DEFAULT 1,
            was_scheduled INTEGER NOT NULL,
            machine_id TEXT,
            operator_id TEXT,
            start_at TEXT,
            end_at TEXT,
            duration_min INTEGER,
            job_status TEXT NOT NULL,
            auto_scheduled INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_snapshot_undo ON undo_snapshot (undo_id);

        CREATE TABLE IF NOT EXISTS conflict_log (
            conflict_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            operation_id TEXT,
            reason TEXT NOT NULL,
            detail TEXT,
            logged_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )
}
