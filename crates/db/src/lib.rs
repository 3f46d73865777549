//! Ironlog DB 싱크 엔진
//!
//! 파이프라인 끝에서 레코드를 관계형 데이터베이스 테이블에 기록하는 싱크 스테이지와
//! 그 구성 요소들입니다.
//!
//! - [`backlog`]: 커밋 대기 행 FIFO (상한 초과 시 새 행 버림)
//! - [`reconnect`]: Connected / PendingRetry / Disabled 상태 머신
//! - [`statement`]: 최악 길이 기반 INSERT 구문 직렬화
//! - [`driver`]: 백엔드 능력 집합 [`DbDriver`]
//! - [`sink`]: [`DbSink`] 스테이지
//! - [`sqlite`]: `rusqlite` 기반 [`SqliteDriver`]

pub mod backlog;
pub mod config;
pub mod driver;
pub mod error;
pub mod reconnect;
pub mod sink;
pub mod sqlite;
pub mod statement;

pub use backlog::{Backlog, PushOutcome, Row};
pub use config::DbSinkConfig;
pub use driver::{DbDriver, columns_to_keys, escape_single_quotes};
pub use error::{DbError, StatementError};
pub use reconnect::{ConnectionState, Gate, Reconnect};
pub use sink::DbSink;
pub use sqlite::SqliteDriver;
pub use statement::{StatementBuffer, StatementBuilder, StatementTemplate};
