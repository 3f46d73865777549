//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 익스포터는 설치하지 않으며, 레코더가 없으면 no-op 입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `ironlog_`
//! - 구성요소명: `stack_`, `source_`, `db_`, `output_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(ironlog_core::metrics::DB_ROWS_COMMITTED_TOTAL, "stage" => id).increment(n);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 스택 이름 레이블 키
pub const LABEL_STACK: &str = "stack";

/// 스테이지 인스턴스 ID 레이블 키
pub const LABEL_STAGE: &str = "stage";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Stack 메트릭 ───────────────────────────────────────────────────

/// Stack: 실행된 전파 사이클 수 (counter, label: stack)
pub const STACK_CYCLES_TOTAL: &str = "ironlog_stack_cycles_total";

/// Stack: interpret 에러 수 (counter, label: stage)
pub const STACK_STAGE_ERRORS_TOTAL: &str = "ironlog_stack_stage_errors_total";

// ─── Source 메트릭 ──────────────────────────────────────────────────

/// Source: 수신한 데이터그램 수 (counter)
pub const SOURCE_DATAGRAMS_TOTAL: &str = "ironlog_source_datagrams_total";

/// Source: 디코딩된 레코드 수 (counter)
pub const SOURCE_RECORDS_TOTAL: &str = "ironlog_source_records_total";

/// Source: 디코딩 실패 수 (counter)
pub const SOURCE_PARSE_ERRORS_TOTAL: &str = "ironlog_source_parse_errors_total";

// ─── DB Sink 메트릭 ─────────────────────────────────────────────────

/// DB: 백로그에 적재된 행 수 (counter, label: stage)
pub const DB_ROWS_BUFFERED_TOTAL: &str = "ironlog_db_rows_buffered_total";

/// DB: 커밋된 행 수 (counter, label: stage)
pub const DB_ROWS_COMMITTED_TOTAL: &str = "ironlog_db_rows_committed_total";

/// DB: 백로그 초과로 버려진 행 수 (counter, label: stage)
pub const DB_ROWS_DROPPED_TOTAL: &str = "ironlog_db_rows_dropped_total";

/// DB: 현재 백로그 행 수 (gauge, label: stage)
pub const DB_BACKLOG_ROWS: &str = "ironlog_db_backlog_rows";

/// DB: 재연결 시도 수 (counter, labels: stage, result)
pub const DB_RECONNECT_ATTEMPTS_TOTAL: &str = "ironlog_db_reconnect_attempts_total";

// ─── Output 메트릭 ──────────────────────────────────────────────────

/// Output: 기록된 라인 수 (counter, label: stage)
pub const OUTPUT_LINES_TOTAL: &str = "ironlog_output_lines_total";

/// Output: 기록 실패 수 (counter, label: stage)
pub const OUTPUT_WRITE_ERRORS_TOTAL: &str = "ironlog_output_write_errors_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 레코더 설치 여부와 관계없이 호출해도 안전합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Stack
    describe_counter!(
        STACK_CYCLES_TOTAL,
        "Total number of propagation cycles started by a source stage"
    );
    describe_counter!(
        STACK_STAGE_ERRORS_TOTAL,
        "Total number of stage interpret failures (propagation continued)"
    );

    // Source
    describe_counter!(
        SOURCE_DATAGRAMS_TOTAL,
        "Total number of datagrams received by the source socket"
    );
    describe_counter!(
        SOURCE_RECORDS_TOTAL,
        "Total number of packet records decoded from datagrams"
    );
    describe_counter!(
        SOURCE_PARSE_ERRORS_TOTAL,
        "Total number of datagrams rejected as truncated or malformed"
    );

    // DB Sink
    describe_counter!(
        DB_ROWS_BUFFERED_TOTAL,
        "Total number of rows appended to a database backlog"
    );
    describe_counter!(
        DB_ROWS_COMMITTED_TOTAL,
        "Total number of rows reported committed by a database driver"
    );
    describe_counter!(
        DB_ROWS_DROPPED_TOTAL,
        "Total number of rows discarded because the backlog was full"
    );
    describe_gauge!(DB_BACKLOG_ROWS, "Current number of rows waiting in a backlog");
    describe_counter!(
        DB_RECONNECT_ATTEMPTS_TOTAL,
        "Total number of database reconnect attempts"
    );

    // Output
    describe_counter!(OUTPUT_LINES_TOTAL, "Total number of formatted lines emitted");
    describe_counter!(
        OUTPUT_WRITE_ERRORS_TOTAL,
        "Total number of failed line writes"
    );
}
