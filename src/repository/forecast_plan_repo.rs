// ==========================================
// 预测立方体 - forecastplan 仓储
// ==========================================
// 职责: forecastplan 表的 CRUD，每个存储度量一列，每个
// (item, location, customer, bucket) 一行
// 红线: Repository 不含业务逻辑，所有查询参数化
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const UPSERT_BATCH_SIZE: usize = 10;

/// 一行持久化的 forecastplan 记录
///
/// `values` 按仓储创建时的列序为每个存储度量各持一项；
/// `None` 表示无条目。
#[derive(Debug, Clone)]
pub struct PlanRow {
    pub item: String,
    pub location: String,
    pub customer: String,
    pub startdate: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

/// forecastplan 仓储
///
/// 度量列在构造时固定；之后扩充的目录需要新建仓储实例。
pub struct ForecastPlanRepository {
    conn: Arc<Mutex<Connection>>,
    columns: Vec<String>,
}

impl ForecastPlanRepository {
    pub fn new(db_path: &str, columns: Vec<String>) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            columns,
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>, columns: Vec<String>) -> Self {
        Self { conn, columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建 forecastplan 表并补齐缺失的度量列。
    pub fn ensure_schema(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let measure_columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" REAL", c))
            .collect();
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS forecastplan (
                item_id TEXT NOT NULL,
                location_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                startdate TEXT NOT NULL,
                {},
                PRIMARY KEY (item_id, location_id, customer_id, startdate)
            )
            "#,
            measure_columns.join(",\n                ")
        );
        conn.execute(&create, [])?;
        // 迁移用旧目录建出来的表
        let mut stmt = conn.prepare("PRAGMA table_info(forecastplan)")?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        for column in &self.columns {
            if !existing.iter().any(|e| e == column) {
                conn.execute(
                    &format!("ALTER TABLE forecastplan ADD COLUMN \"{}\" REAL", column),
                    [],
                )?;
            }
        }
        Ok(())
    }

    /// 单个预测的全部行，按桶起始时间排序
    pub fn fetch(
        &self,
        item: &str,
        location: &str,
        customer: &str,
    ) -> RepositoryResult<Vec<PlanRow>> {
        let conn = self.get_conn()?;
        let column_list: Vec<String> = self.columns.iter().map(|c| format!("\"{}\"", c)).collect();
        let sql = format!(
            "SELECT startdate, {} FROM forecastplan \
             WHERE item_id = ?1 AND location_id = ?2 AND customer_id = ?3 \
             ORDER BY startdate",
            column_list.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let column_count = self.columns.len();
        let rows = stmt.query_map(params![item, location, customer], |row| {
            let startdate: String = row.get(0)?;
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(row.get::<_, Option<f64>>(i + 1)?);
            }
            Ok((startdate, values))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (startdate, values) = row?;
            let startdate = NaiveDateTime::parse_from_str(&startdate, DATE_FORMAT)
                .map_err(|e| {
                    RepositoryError::SchemaMismatch(format!(
                        "invalid startdate '{}': {}",
                        startdate, e
                    ))
                })?;
            out.push(PlanRow {
                item: item.to_string(),
                location: location.to_string(),
                customer: customer.to_string(),
                startdate,
                values,
            });
        }
        Ok(out)
    }

    /// 以小事务批量 upsert 行
    ///
    /// 失败的批次回滚并记日志，其余批次照常执行。所有值
    /// 均缺失的行改为删除。返回写入的行数。
    pub fn upsert(&self, rows: &[PlanRow]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let column_list: Vec<String> = self.columns.iter().map(|c| format!("\"{}\"", c)).collect();
        let placeholders: Vec<String> = (0..self.columns.len() + 4)
            .map(|i| format!("?{}", i + 1))
            .collect();
        let insert_sql = format!(
            "INSERT OR REPLACE INTO forecastplan \
             (item_id, location_id, customer_id, startdate, {}) VALUES ({})",
            column_list.join(", "),
            placeholders.join(", ")
        );
        let delete_sql = "DELETE FROM forecastplan \
             WHERE item_id = ?1 AND location_id = ?2 AND customer_id = ?3 AND startdate = ?4";
        let mut written = 0usize;
        for chunk in rows.chunks(UPSERT_BATCH_SIZE) {
            let tx = conn.unchecked_transaction()?;
            let mut failed = false;
            for row in chunk {
                let startdate = row.startdate.format(DATE_FORMAT).to_string();
                let result = if row.values.iter().all(Option::is_none) {
                    tx.execute(
                        delete_sql,
                        params![row.item, row.location, row.customer, startdate],
                    )
                } else {
                    let mut values: Vec<SqlValue> = vec![
                        SqlValue::Text(row.item.clone()),
                        SqlValue::Text(row.location.clone()),
                        SqlValue::Text(row.customer.clone()),
                        SqlValue::Text(startdate),
                    ];
                    for v in &row.values {
                        values.push(match v {
                            Some(v) => SqlValue::Real((v * 1e8).round() / 1e8),
                            None => SqlValue::Null,
                        });
                    }
                    tx.execute(&insert_sql, params_from_iter(values))
                };
                if let Err(e) = result {
                    warn!(
                        item = %row.item,
                        location = %row.location,
                        customer = %row.customer,
                        error = %e,
                        "failed to save forecastplan batch"
                    );
                    failed = true;
                    break;
                }
            }
            if failed {
                // 事务随 drop 自动回滚
                continue;
            }
            tx.commit()?;
            written += chunk.len();
        }
        Ok(written)
    }

    /// 删除单个预测的全部行
    pub fn delete_forecast(
        &self,
        item: &str,
        location: &str,
        customer: &str,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM forecastplan \
             WHERE item_id = ?1 AND location_id = ?2 AND customer_id = ?3",
            params![item, location, customer],
        )?;
        Ok(deleted)
    }

    /// 总行数，用于状态上报
    pub fn count_rows(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM forecastplan", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
