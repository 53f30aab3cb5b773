// ==========================================
// SQLite 连接初始化
// ==========================================
// 目标:
// - 所有 Connection::open 的 PRAGMA 设置集中在一处
// - 所有连接统一 busy_timeout，避免并发写偶发 busy 错误
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码期望的 schema 版本
///
/// 版本检查仅用于告警，不做自动迁移。
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 对连接应用共享的 PRAGMA 配置
///
/// foreign_keys 和 busy_timeout 是逐连接设置，必须对每个
/// 连接单独应用。
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开一个已应用共享配置的 SQLite 连接
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema 版本；表不存在时返回 None
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

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
