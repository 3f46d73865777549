//! DB 싱크 스테이지: 행 버퍼링, 배치 커밋, 재연결
//!
//! [`DbSink`]는 드라이버 하나를 소유하는 [`Stage`] 구현입니다.
//!
//! # 사이클 처리
//! 1. 재연결 상태 머신이 이번 사이클을 처리할지 결정 (대기 중이면 이벤트 버림)
//! 2. 활성 입력 키 순서대로 [`Row`] 생성 후 백로그에 추가 (가득 차면 새 행 버림)
//! 3. 백로그가 `flush_threshold` 이상이면 가장 오래된 행부터
//!    최대 `max(3 * flush_threshold, 1024)`행 커밋
//! 4. 실행/커밋 실패 시 롤백 후 연결을 닫고 재연결 상태로 전환 (행은 유지)
//! 5. 구문으로 만들 수 없는 행은 기록 후 버리고 연결은 유지

use metrics::{counter, gauge};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ironlog_core::metrics as m;
use ironlog_core::{
    Inputs, IronlogError, KeyDescriptor, Outputs, PluginDefinition, Stage, StageConfig,
    StageContext, StageKind,
};

use crate::backlog::{Backlog, PushOutcome, Row};
use crate::config::DbSinkConfig;
use crate::driver::{DbDriver, columns_to_keys};
use crate::error::{DbError, StatementError};
use crate::reconnect::{ConnectionState, Gate, Reconnect};
use crate::statement::{StatementBuilder, StatementTemplate};

/// 데이터베이스 싱크 스테이지
pub struct DbSink {
    id: String,
    config: DbSinkConfig,
    driver: Box<dyn DbDriver>,
    backlog: Backlog,
    builder: Option<StatementBuilder>,
    /// 활성 입력 키 인덱스 (행 값 순서)
    active: Vec<usize>,
    prepared: bool,
    reconnect: Reconnect,
}

impl DbSink {
    /// 검증된 설정과 드라이버로 싱크를 생성합니다.
    pub fn new(config: DbSinkConfig, driver: Box<dyn DbDriver>) -> Result<Self, DbError> {
        config.validate()?;
        Ok(Self {
            id: String::new(),
            backlog: Backlog::new(config.max_backlog),
            reconnect: Reconnect::new(config.reconnect_interval()),
            config,
            driver,
            builder: None,
            active: Vec::new(),
            prepared: false,
        })
    }

    /// 스테이지 옵션을 [`DbSinkConfig`]로 해석하여 싱크를 생성합니다.
    pub fn from_stage_config(
        stage: &StageConfig,
        driver: Box<dyn DbDriver>,
    ) -> Result<Self, IronlogError> {
        let config: DbSinkConfig = stage.parse_options()?;
        Ok(Self::new(config, driver)?)
    }

    pub fn config(&self) -> &DbSinkConfig {
        &self.config
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnect.state()
    }

    /// 준비된 구문 모드 여부 (연결 시 드라이버가 결정)
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn connect(&mut self) -> Result<(), DbError> {
        self.driver.open(&self.config)?;
        self.prepared = match (&self.builder, self.config.prepared) {
            (Some(builder), true) => self.driver.prepare(builder.template())?,
            _ => false,
        };
        self.reconnect.on_connected();
        Ok(())
    }

    fn attempt_connect(&mut self, now: Instant) -> bool {
        match self.connect() {
            Ok(()) => {
                counter!(m::DB_RECONNECT_ATTEMPTS_TOTAL,
                    m::LABEL_STAGE => self.id.clone(), m::LABEL_RESULT => "success")
                .increment(1);
                info!(
                    stage = %self.id,
                    driver = self.driver.name(),
                    prepared = self.prepared,
                    "database connection established"
                );
                true
            }
            Err(e) => {
                counter!(m::DB_RECONNECT_ATTEMPTS_TOTAL,
                    m::LABEL_STAGE => self.id.clone(), m::LABEL_RESULT => "failure")
                .increment(1);
                warn!(stage = %self.id, error = %e, "can't establish database connection");
                self.driver.close();
                self.reconnect.on_failure(now);
                false
            }
        }
    }

    /// 가장 오래된 행부터 최대 `limit`행을 실행하고 커밋합니다.
    ///
    /// 드라이버가 커밋했다고 보고한 수만큼만 백로그에서 제거합니다.
    /// 구문으로 만들 수 없는 행은 그 앞까지 커밋한 뒤 버리고, 연결을 유지한 채 나머지를 이어서 처리합니다.
    /// 버린 행을 포함해 백로그에서 제거한 행 수를 반환합니다.
    fn commit(&mut self, limit: usize) -> Result<usize, DbError> {
        let mut removed = 0;
        while removed < limit && !self.backlog.is_empty() {
            let (committed, malformed) = self.commit_batch(limit - removed)?;
            removed += committed;
            let Some(err) = malformed else {
                break;
            };
            removed += self.backlog.remove_front(1);
            counter!(m::DB_ROWS_DROPPED_TOTAL, m::LABEL_STAGE => self.id.clone()).increment(1);
            warn!(stage = %self.id, error = %err, "dropping row that can't be rendered as a statement");
        }

        gauge!(m::DB_BACKLOG_ROWS, m::LABEL_STAGE => self.id.clone())
            .set(self.backlog.len() as f64);
        Ok(removed)
    }

    /// 트랜잭션 하나를 실행합니다. 구문 생성에 실패한 행이 있으면 그 앞에서 멈춥니다.
    ///
    /// 실패한 행이 백로그 맨 앞에 남았을 때만 그 에러를 함께 반환합니다.
    fn commit_batch(&mut self, limit: usize) -> Result<(usize, Option<StatementError>), DbError> {
        let Some(builder) = self.builder.as_mut() else {
            return Ok((0, None));
        };

        self.driver.begin()?;
        let mut executed = 0;
        let mut malformed = None;
        for row in self.backlog.iter().take(limit) {
            if self.prepared {
                self.driver.execute_row(row)?;
            } else {
                match builder.build(row, &*self.driver) {
                    Ok(statement) => self.driver.execute(&statement)?,
                    Err(e) => {
                        malformed = Some(e);
                        break;
                    }
                }
            }
            executed += 1;
        }

        let committed = self.driver.commit(executed)?;
        let removed = self.backlog.remove_front(committed);
        counter!(m::DB_ROWS_COMMITTED_TOTAL, m::LABEL_STAGE => self.id.clone())
            .increment(removed as u64);
        debug!(stage = %self.id, executed, committed = removed, "batch committed");
        Ok((removed, malformed.filter(|_| removed == executed)))
    }

    fn fail_connection(&mut self, now: Instant) {
        self.driver.rollback();
        self.driver.close();
        self.reconnect.on_failure(now);
    }
}

impl Stage for DbSink {
    /// 연결하여 테이블 컬럼을 읽고, 그 컬럼들로 입력 키를 교체합니다.
    fn configure(
        &mut self,
        ctx: &StageContext<'_>,
    ) -> Result<Option<Vec<KeyDescriptor>>, IronlogError> {
        self.id = ctx.id.to_owned();
        info!(stage = %self.id, driver = self.driver.name(), "(re)configuring");

        self.driver.open(&self.config)?;
        let columns = self
            .driver
            .enumerate_schema(&self.config.table, self.config.schema.as_deref());
        // configure에는 대응하는 정리 훅이 없으므로 항상 닫음
        self.driver.close();
        let columns = columns?;

        if columns.is_empty() {
            warn!(stage = %self.id, table = %self.config.table, "table has no columns");
        }
        Ok(Some(columns_to_keys(&columns)))
    }

    fn start(&mut self, ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        self.id = ctx.id.to_owned();
        self.active = ctx
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, k)| !k.inactive)
            .map(|(i, _)| i)
            .collect();
        self.builder = Some(StatementBuilder::new(StatementTemplate::new(
            &self.config.table,
            self.config.schema.as_deref(),
            ctx.inputs,
            self.config.ip_as_string,
        )));
        self.reconnect.reset();

        info!(stage = %self.id, columns = self.active.len(), "starting");
        // 시작 시 연결 실패는 치명적이지 않음: 재연결 상태 머신이 이어받음
        self.attempt_connect(Instant::now());
        Ok(())
    }

    fn stop(&mut self, ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        info!(stage = %ctx.id, backlog = self.backlog.len(), "stopping");

        if self.reconnect.is_connected() {
            while !self.backlog.is_empty() {
                match self.commit(self.config.max_commit()) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(stage = %ctx.id, error = %e, "final flush failed, rows kept in backlog");
                        self.driver.rollback();
                        break;
                    }
                }
            }
        }

        self.driver.close();
        self.reconnect.reset();
        Ok(())
    }

    fn interpret(
        &mut self,
        inputs: &Inputs<'_>,
        _outputs: &mut Outputs<'_>,
    ) -> Result<(), IronlogError> {
        let now = Instant::now();
        match self.reconnect.gate(now) {
            Gate::Skip => return Ok(()),
            Gate::Attempt => {
                if !self.attempt_connect(now) {
                    return Ok(());
                }
            }
            Gate::Proceed => {}
        }

        let row = Row::new(self.active.iter().map(|&i| inputs.get(i).cloned()).collect());
        match self.backlog.push(row) {
            PushOutcome::Dropped => {
                counter!(m::DB_ROWS_DROPPED_TOTAL, m::LABEL_STAGE => self.id.clone())
                    .increment(1);
                return Ok(());
            }
            PushOutcome::Accepted => {
                counter!(m::DB_ROWS_BUFFERED_TOTAL, m::LABEL_STAGE => self.id.clone())
                    .increment(1);
            }
        }

        if self.backlog.len() >= self.config.flush_threshold {
            if let Err(e) = self.commit(self.config.max_commit()) {
                warn!(
                    stage = %self.id,
                    error = %e,
                    backlog = self.backlog.len(),
                    "commit failed"
                );
                self.fail_connection(now);
                return Err(e.into());
            }
        }

        Ok(())
    }
}

/// 드라이버 생성 함수로 DB 싱크 플러그인 정의를 만듭니다.
///
/// 입력 키는 configure 시점에 테이블 컬럼으로부터 결정되므로 선언하지 않습니다.
pub fn definition<F>(name: &str, make_driver: F) -> PluginDefinition
where
    F: Fn() -> Box<dyn DbDriver> + Send + Sync + 'static,
{
    PluginDefinition::new(name, StageKind::Sink, move |stage: &StageConfig| {
        let sink = DbSink::from_stage_config(stage, make_driver())?;
        Ok(Box::new(sink) as Box<dyn Stage>)
    })
}
