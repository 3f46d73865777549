//! 데이터베이스 드라이버 능력 집합
//!
//! [`DbDriver`]는 백엔드 하나의 연결/실행/이스케이프를 담당합니다.
//! 필수 연산(`open`, `close`, `enumerate_schema`, `execute`, `commit`, `escape_string`)은
//! trait 메서드로 강제되고, 선택 연산(`prepare`, `execute_row`, `begin`, `rollback`)은
//! 기본 구현을 가집니다.

use ironlog_core::KeyDescriptor;

use crate::backlog::Row;
use crate::config::DbSinkConfig;
use crate::error::DbError;
use crate::statement::StatementTemplate;

/// 데이터베이스 드라이버
pub trait DbDriver: Send {
    /// 드라이버 이름 (로그용)
    fn name(&self) -> &str;

    /// 연결을 엽니다.
    fn open(&mut self, config: &DbSinkConfig) -> Result<(), DbError>;

    /// 연결을 닫습니다. 열려 있지 않으면 아무것도 하지 않습니다.
    fn close(&mut self);

    /// 테이블의 컬럼 이름을 선언 순서대로 반환합니다.
    fn enumerate_schema(
        &mut self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<String>, DbError>;

    /// 준비된 구문을 만듭니다. 지원하지 않으면 `Ok(false)`를 반환하고 텍스트 구문을 사용합니다.
    fn prepare(&mut self, _template: &StatementTemplate) -> Result<bool, DbError> {
        Ok(false)
    }

    /// 배치 트랜잭션을 시작합니다.
    fn begin(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    /// 텍스트 구문 하나를 실행합니다.
    fn execute(&mut self, statement: &str) -> Result<(), DbError>;

    /// 준비된 구문으로 행 하나를 실행합니다.
    fn execute_row(&mut self, _row: &Row) -> Result<(), DbError> {
        Err(DbError::Unsupported {
            driver: self.name().to_owned(),
            operation: "execute_row",
        })
    }

    /// 이번 배치에서 실행한 `executed`개 행을 커밋하고, 실제 커밋된 행 수를 반환합니다.
    fn commit(&mut self, executed: usize) -> Result<usize, DbError>;

    /// 진행 중인 배치를 되돌립니다.
    fn rollback(&mut self) {}

    /// `src`를 백엔드 규칙에 맞게 이스케이프하여 `dest`에 덧붙이고 기록한 바이트 수를 반환합니다.
    ///
    /// 구문 버퍼 용량은 문자열 값마다 `2 * src.len()`바이트로 계산되므로 결과는 그 이하여야 합니다.
    /// 더 길어지면 해당 행은 구문을 만들 수 없어 버려집니다.
    fn escape_string(&self, dest: &mut String, src: &str) -> usize;
}

/// 작은따옴표를 두 번 써서 이스케이프합니다 (SQL 표준).
pub fn escape_single_quotes(dest: &mut String, src: &str) -> usize {
    let before = dest.len();
    for c in src.chars() {
        if c == '\'' {
            dest.push('\'');
        }
        dest.push(c);
    }
    dest.len() - before
}

/// 컬럼 이름을 입력 키 디스크립터로 변환합니다.
///
/// `_`는 `.`으로 바뀌고(`ip_saddr` → `ip.saddr`), `_`로 시작하는 컬럼(`_id` 등)은
/// 이름을 그대로 두고 비활성 키가 됩니다. 타입은 상위 출력 타입을 그대로 따릅니다.
pub fn columns_to_keys(columns: &[String]) -> Vec<KeyDescriptor> {
    columns
        .iter()
        .map(|column| {
            if column.starts_with('_') {
                KeyDescriptor::untyped(column.as_str()).inactive()
            } else {
                KeyDescriptor::untyped(column.replace('_', "."))
            }
        })
        .collect()
}
