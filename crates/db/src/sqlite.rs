//! SQLite 드라이버
//!
//! `rusqlite`(bundled)로 파일 데이터베이스에 기록합니다.
//! 준비된 구문을 지원하며, 이 경우 raw 값도 BLOB으로 저장할 수 있습니다.

use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;

use ironlog_core::{PluginDefinition, Value};

use crate::backlog::Row;
use crate::config::DbSinkConfig;
use crate::driver::{DbDriver, escape_single_quotes};
use crate::error::DbError;
use crate::sink;
use crate::statement::StatementTemplate;

/// 플러그인 이름
pub const PLUGIN_NAME: &str = "SQLITE3";

/// SQLite 드라이버
#[derive(Debug, Default)]
pub struct SqliteDriver {
    conn: Option<Connection>,
    insert_sql: Option<String>,
    ip_as_string: bool,
    in_transaction: bool,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn conn(&self) -> Result<&Connection, DbError> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::Connection("database is not open".to_owned()))
    }

    fn to_sql(&self, value: Option<&Value>) -> SqlValue {
        match value {
            None => SqlValue::Null,
            Some(Value::Int8(v)) => SqlValue::Integer(i64::from(*v)),
            Some(Value::Int16(v)) => SqlValue::Integer(i64::from(*v)),
            Some(Value::Int32(v)) => SqlValue::Integer(i64::from(*v)),
            Some(Value::Int64(v)) => SqlValue::Integer(*v),
            Some(Value::UInt8(v)) => SqlValue::Integer(i64::from(*v)),
            Some(Value::UInt16(v)) => SqlValue::Integer(i64::from(*v)),
            Some(Value::UInt32(v)) => SqlValue::Integer(i64::from(*v)),
            // SQLite INTEGER는 부호 있는 64비트
            Some(Value::UInt64(v)) => match i64::try_from(*v) {
                Ok(n) => SqlValue::Integer(n),
                Err(_) => SqlValue::Text(v.to_string()),
            },
            Some(Value::Bool(v)) => SqlValue::Integer(i64::from(*v)),
            Some(Value::String(s)) => SqlValue::Text(s.clone()),
            Some(Value::Raw(bytes)) => SqlValue::Blob(bytes.to_vec()),
            Some(Value::Ipv4(addr)) if self.ip_as_string => SqlValue::Text(addr.to_string()),
            Some(Value::Ipv4(addr)) => SqlValue::Integer(i64::from(u32::from(*addr))),
        }
    }
}

impl DbDriver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite3"
    }

    fn open(&mut self, config: &DbSinkConfig) -> Result<(), DbError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = Connection::open(&config.db)
            .map_err(|e| DbError::Connection(format!("{}: {e}", config.db)))?;
        self.conn = Some(conn);
        self.in_transaction = false;
        Ok(())
    }

    fn close(&mut self) {
        self.in_transaction = false;
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "failed to close sqlite connection");
            }
        }
    }

    fn enumerate_schema(
        &mut self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<String>, DbError> {
        let pragma = match schema {
            Some(schema) => format!("PRAGMA {schema}.table_info({table})"),
            None => format!("PRAGMA table_info({table})"),
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&pragma)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(DbError::Config {
                field: "table".to_owned(),
                reason: format!("table '{table}' does not exist or has no columns"),
            });
        }
        Ok(columns)
    }

    fn prepare(&mut self, template: &StatementTemplate) -> Result<bool, DbError> {
        let sql = template.placeholder_statement();
        // 구문 오류를 연결 시점에 드러냄
        self.conn()?.prepare_cached(&sql)?;
        self.insert_sql = Some(sql);
        self.ip_as_string = template.ip_as_string();
        Ok(true)
    }

    fn begin(&mut self) -> Result<(), DbError> {
        self.conn()?.execute_batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> Result<(), DbError> {
        self.conn()?.execute_batch(statement)?;
        Ok(())
    }

    fn execute_row(&mut self, row: &Row) -> Result<(), DbError> {
        let sql = self.insert_sql.as_deref().ok_or(DbError::Unsupported {
            driver: "sqlite3".to_owned(),
            operation: "execute_row before prepare",
        })?;
        let params: Vec<SqlValue> = row.values.iter().map(|v| self.to_sql(v.as_ref())).collect();
        let mut stmt = self.conn()?.prepare_cached(sql)?;
        stmt.execute(rusqlite::params_from_iter(params))?;
        Ok(())
    }

    fn commit(&mut self, executed: usize) -> Result<usize, DbError> {
        if self.in_transaction {
            self.conn()?.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(executed)
    }

    fn rollback(&mut self) {
        if !self.in_transaction {
            return;
        }
        self.in_transaction = false;
        if let Some(conn) = &self.conn {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "sqlite rollback failed");
            }
        }
    }

    fn escape_string(&self, dest: &mut String, src: &str) -> usize {
        escape_single_quotes(dest, src)
    }
}

/// `SQLITE3` 플러그인 정의
pub fn definition() -> PluginDefinition {
    sink::definition(PLUGIN_NAME, || Box::new(SqliteDriver::new()))
}
