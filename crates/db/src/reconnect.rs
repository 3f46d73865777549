//! 재연결 상태 머신
//!
//! ```text
//!                 connect ok
//!   PendingRetry ───────────▶ Connected
//!     ▲    │ │                    │
//!     │    │ └─ now < deadline    │ execute/commit 실패
//!     │    │    (이벤트 버림)      │
//!     └────┴──────────────────────┘  재연결 간격 있음
//!                   │
//!                   └──▶ Disabled   재연결 간격 없음 (종료 상태)
//! ```
//!
//! 타이머 스레드는 없습니다. 마감 시각은 스테이지에 도달한 다음 사이클에서만 검사합니다.
//! 시각은 `tokio::time::Instant`를 사용하므로 테스트에서 시간을 멈추고 진행시킬 수 있습니다.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 연결됨
    Connected,
    /// 연결 끊김, `deadline` 이후 재시도
    PendingRetry { deadline: Instant },
    /// 영구 비활성화 (재설정 전까지 no-op)
    Disabled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::PendingRetry { .. } => write!(f, "pending_retry"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// 사이클 진입 시 상태 머신이 내리는 결정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// 연결되어 있음, 이벤트 처리
    Proceed,
    /// 재연결을 시도해야 함
    Attempt,
    /// 이번 사이클은 no-op (이벤트 버림)
    Skip,
}

/// 재연결 상태 머신
#[derive(Debug, Clone)]
pub struct Reconnect {
    state: ConnectionState,
    interval: Option<Duration>,
}

impl Reconnect {
    /// 즉시 연결을 시도할 수 있는 상태로 생성합니다.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            state: ConnectionState::PendingRetry {
                deadline: Instant::now(),
            },
            interval,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// 현재 시각 기준으로 이번 사이클을 어떻게 처리할지 결정합니다.
    pub fn gate(&self, now: Instant) -> Gate {
        match self.state {
            ConnectionState::Connected => Gate::Proceed,
            ConnectionState::PendingRetry { deadline } if now >= deadline => Gate::Attempt,
            ConnectionState::PendingRetry { .. } | ConnectionState::Disabled => Gate::Skip,
        }
    }

    /// 연결 성공
    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// 연결/실행 실패. 재연결 간격이 있으면 마감 시각을 다시 잡고, 없으면 비활성화합니다.
    pub fn on_failure(&mut self, now: Instant) -> ConnectionState {
        self.state = match self.interval {
            Some(interval) => {
                tracing::error!(
                    retry_secs = interval.as_secs(),
                    "no connection to database, attempting to reconnect later"
                );
                ConnectionState::PendingRetry {
                    deadline: now + interval,
                }
            }
            None => {
                tracing::error!("no connection to database, permanently disabling stage");
                ConnectionState::Disabled
            }
        };
        self.state
    }

    /// 재설정 시 초기 상태로 되돌립니다.
    pub fn reset(&mut self) {
        self.state = ConnectionState::PendingRetry {
            deadline: Instant::now(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn new_machine_attempts_immediately() {
        let machine = Reconnect::new(Some(Duration::from_secs(30)));
        assert_eq!(machine.gate(Instant::now()), Gate::Attempt);
        assert!(!machine.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_schedules_retry_after_interval() {
        let mut machine = Reconnect::new(Some(Duration::from_secs(30)));
        let t0 = Instant::now();
        let state = machine.on_failure(t0);
        assert_eq!(
            state,
            ConnectionState::PendingRetry {
                deadline: t0 + Duration::from_secs(30)
            }
        );

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(machine.gate(Instant::now()), Gate::Skip);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(machine.gate(Instant::now()), Gate::Attempt);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_without_interval_disables() {
        let mut machine = Reconnect::new(None);
        assert_eq!(machine.on_failure(Instant::now()), ConnectionState::Disabled);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(machine.gate(Instant::now()), Gate::Skip);
    }

    #[test]
    fn connected_proceeds() {
        let mut machine = Reconnect::new(None);
        machine.on_connected();
        assert_eq!(machine.gate(Instant::now()), Gate::Proceed);
        assert_eq!(machine.state().to_string(), "connected");
    }

    #[test]
    fn reset_leaves_disabled_state() {
        let mut machine = Reconnect::new(None);
        machine.on_failure(Instant::now());
        machine.reset();
        assert_eq!(machine.gate(Instant::now()), Gate::Attempt);
    }
}
