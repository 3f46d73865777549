//! 구문 생성: 행을 텍스트 INSERT 구문으로 직렬화
//!
//! [`StatementTemplate`]은 start 시점에 활성 키 목록으로 한 번 만들어지는 정적 앞부분
//! (`insert into flows (ip_saddr,ip_daddr) values (`)입니다.
//! [`StatementBuilder`]는 행마다 최악의 경우 폭으로 용량을 먼저 계산한 뒤,
//! 그 용량을 넘을 수 없는 [`StatementBuffer`]에 값을 기록합니다.
//!
//! # 값 표현
//! | 값 | 텍스트 |
//! |----|--------|
//! | 부재/무효 | `NULL` |
//! | 정수 | 10진수 |
//! | bool | `'0'` / `'1'` |
//! | 문자열 | 드라이버 이스케이프 후 작은따옴표 |
//! | IPv4 | 따옴표 문자열 또는 부호 없는 정수 (`ip_as_string`) |
//! | raw | 지원하지 않음, `NULL` (키마다 한 번 경고) |

use ironlog_core::{KeyDescriptor, Value};

use crate::backlog::Row;
use crate::driver::DbDriver;
use crate::error::StatementError;

const NULL: &str = "NULL";

/// INSERT 구문 템플릿
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementTemplate {
    qualified_table: String,
    columns: Vec<String>,
    prefix: String,
    ip_as_string: bool,
}

impl StatementTemplate {
    /// 활성(비활성이 아닌) 키로 템플릿을 만듭니다. 키 이름의 `.`은 `_`로 바뀝니다.
    pub fn new(
        table: &str,
        schema: Option<&str>,
        keys: &[KeyDescriptor],
        ip_as_string: bool,
    ) -> Self {
        let qualified_table = match schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table.to_owned(),
        };
        let columns: Vec<String> = keys
            .iter()
            .filter(|k| !k.inactive)
            .map(|k| k.name.replace('.', "_"))
            .collect();
        let prefix = format!(
            "insert into {} ({}) values (",
            qualified_table,
            columns.join(",")
        );

        Self {
            qualified_table,
            columns,
            prefix,
            ip_as_string,
        }
    }

    /// 값 목록 앞의 정적 부분
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 컬럼 이름 (활성 키 순서)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `schema.table` 또는 `table`
    pub fn qualified_table(&self) -> &str {
        &self.qualified_table
    }

    pub fn ip_as_string(&self) -> bool {
        self.ip_as_string
    }

    /// 준비된 구문용 `?` 자리표시자 구문
    pub fn placeholder_statement(&self) -> String {
        let marks = vec!["?"; self.columns.len()].join(",");
        format!(
            "insert into {} ({}) values ({})",
            self.qualified_table,
            self.columns.join(","),
            marks
        )
    }

    /// 행 하나를 직렬화하는 데 필요한 최대 바이트 수
    ///
    /// 각 값 뒤의 구분자(`,` 또는 종결자 `)`)를 포함하며, 값이 없는 경우에도
    /// 종결자 한 바이트를 확보합니다.
    pub fn capacity_for(&self, row: &Row) -> usize {
        let values: usize = row
            .values
            .iter()
            .map(|v| self.worst_case_width(v.as_ref()))
            .sum();
        self.prefix.len() + values + row.len().max(1)
    }

    fn worst_case_width(&self, value: Option<&Value>) -> usize {
        match value {
            None => NULL.len(),
            Some(Value::Int8(_)) => 4,
            Some(Value::Int16(_)) => 6,
            Some(Value::Int32(_)) => 11,
            Some(Value::Int64(_)) => 20,
            Some(Value::UInt8(_)) => 3,
            Some(Value::UInt16(_)) => 5,
            Some(Value::UInt32(_)) => 10,
            Some(Value::UInt64(_)) => 20,
            Some(Value::Bool(_)) => 3,
            Some(Value::String(s)) => quoted_width(s.len()),
            Some(Value::Ipv4(_)) if self.ip_as_string => quoted_width("255.255.255.255".len()),
            Some(Value::Ipv4(_)) => 10,
            Some(Value::Raw(_)) => NULL.len(),
        }
    }
}

/// 이스케이프로 최대 두 배가 되고 따옴표 두 개가 붙음
fn quoted_width(len: usize) -> usize {
    2 * len + 2
}

// ─── StatementBuffer ─────────────────────────────────────────────────

/// 용량이 고정된 추가 전용 텍스트 버퍼
#[derive(Debug)]
pub struct StatementBuffer {
    text: String,
    capacity: usize,
}

impl StatementBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            capacity,
        }
    }

    /// 문자열을 덧붙입니다. 용량을 넘으면 아무것도 쓰지 않고 에러를 반환합니다.
    pub fn push_str(&mut self, s: &str) -> Result<(), StatementError> {
        let needed = self.text.len() + s.len();
        if needed > self.capacity {
            return Err(StatementError::Overflow {
                capacity: self.capacity,
                needed,
            });
        }
        self.text.push_str(s);
        Ok(())
    }

    /// 값 목록을 닫습니다.
    ///
    /// 필드가 하나 이상 기록된 경우에만 마지막 구분자를 종결자로 바꾸고,
    /// 필드가 없으면 종결자만 덧붙입니다.
    pub fn terminate(&mut self, fields_written: usize) -> Result<(), StatementError> {
        if fields_written > 0 && self.text.ends_with(',') {
            self.text.pop();
        }
        self.push_str(")")
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

// ─── StatementBuilder ────────────────────────────────────────────────

/// 행 → 텍스트 구문 변환기
///
/// "raw 미지원" 경고는 키마다 한 번만 기록됩니다. 싱크가 start마다 새로 만듭니다.
#[derive(Debug)]
pub struct StatementBuilder {
    template: StatementTemplate,
    raw_warned: Vec<bool>,
}

impl StatementBuilder {
    pub fn new(template: StatementTemplate) -> Self {
        let raw_warned = vec![false; template.columns.len()];
        Self {
            template,
            raw_warned,
        }
    }

    pub fn template(&self) -> &StatementTemplate {
        &self.template
    }

    /// 행을 INSERT 구문으로 직렬화합니다.
    pub fn build(&mut self, row: &Row, driver: &dyn DbDriver) -> Result<String, StatementError> {
        let mut buf = StatementBuffer::with_capacity(self.template.capacity_for(row));
        buf.push_str(&self.template.prefix)?;

        let mut scratch = String::new();
        for (idx, value) in row.values.iter().enumerate() {
            match value {
                None => buf.push_str(NULL)?,
                Some(value) => self.write_value(&mut buf, &mut scratch, idx, value, driver)?,
            }
            buf.push_str(",")?;
        }

        buf.terminate(row.len())?;
        Ok(buf.into_string())
    }

    fn write_value(
        &mut self,
        buf: &mut StatementBuffer,
        scratch: &mut String,
        idx: usize,
        value: &Value,
        driver: &dyn DbDriver,
    ) -> Result<(), StatementError> {
        match value {
            Value::Int8(v) => buf.push_str(&v.to_string()),
            Value::Int16(v) => buf.push_str(&v.to_string()),
            Value::Int32(v) => buf.push_str(&v.to_string()),
            Value::Int64(v) => buf.push_str(&v.to_string()),
            Value::UInt8(v) => buf.push_str(&v.to_string()),
            Value::UInt16(v) => buf.push_str(&v.to_string()),
            Value::UInt32(v) => buf.push_str(&v.to_string()),
            Value::UInt64(v) => buf.push_str(&v.to_string()),
            Value::Bool(v) => buf.push_str(if *v { "'1'" } else { "'0'" }),
            Value::String(s) => write_quoted(buf, scratch, s, driver),
            Value::Ipv4(addr) if self.template.ip_as_string => {
                write_quoted(buf, scratch, &addr.to_string(), driver)
            }
            Value::Ipv4(addr) => buf.push_str(&u32::from(*addr).to_string()),
            Value::Raw(_) => {
                if let Some(warned) = self.raw_warned.get_mut(idx) {
                    if !*warned {
                        *warned = true;
                        tracing::warn!(
                            column = self.template.columns.get(idx).map(String::as_str),
                            "raw values are not supported in text statements, writing NULL"
                        );
                    }
                }
                buf.push_str(NULL)
            }
        }
    }
}

fn write_quoted(
    buf: &mut StatementBuffer,
    scratch: &mut String,
    src: &str,
    driver: &dyn DbDriver,
) -> Result<(), StatementError> {
    scratch.clear();
    scratch.push('\'');
    driver.escape_string(scratch, src);
    scratch.push('\'');
    buf.push_str(scratch)
}
