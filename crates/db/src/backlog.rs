//! 행 백로그: 커밋 대기 중인 행의 유한 큐
//!
//! [`Row`]는 슬롯 값의 분리된 소유 사본이라 다음 전파 사이클 이후에도 유지됩니다.
//! [`Backlog`]는 삽입 순서를 보존하는 `VecDeque`이며, 가득 차면 새 행을 버립니다.
//!
//! # 오버플로우 경고
//! 경고는 한도 초과 상태로 진입할 때 한 번만 기록됩니다.
//! 백로그가 한도 아래로 내려가면 다시 경고할 수 있는 상태가 됩니다.

use std::collections::VecDeque;

use ironlog_core::Value;

/// 버퍼링된 한 행: 활성 입력 키 순서대로의 값 (부재는 `None`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub values: Vec<Option<Value>>,
}

impl Row {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// [`Backlog::push`] 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 큐 끝에 추가됨
    Accepted,
    /// 한도 초과로 버려짐
    Dropped,
}

/// 커밋 대기 행 큐
#[derive(Debug)]
pub struct Backlog {
    rows: VecDeque<Row>,
    max_backlog: usize,
    over_limit: bool,
    dropped: u64,
    overflow_warnings: u64,
}

impl Backlog {
    /// 최대 `max_backlog`행을 담는 백로그를 생성합니다.
    pub fn new(max_backlog: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(max_backlog.min(1024)),
            max_backlog,
            over_limit: false,
            dropped: 0,
            overflow_warnings: 0,
        }
    }

    /// 행을 추가합니다. 가득 차 있으면 새 행을 버립니다.
    pub fn push(&mut self, row: Row) -> PushOutcome {
        if self.rows.len() >= self.max_backlog {
            self.dropped += 1;
            if !self.over_limit {
                self.over_limit = true;
                self.overflow_warnings += 1;
                tracing::warn!(
                    max_backlog = self.max_backlog,
                    "over backlog limit, dropping rows"
                );
            }
            return PushOutcome::Dropped;
        }

        self.rows.push_back(row);
        PushOutcome::Accepted
    }

    /// 앞쪽(가장 오래된) 행을 최대 `count`개 제거하고 제거한 수를 반환합니다.
    pub fn remove_front(&mut self, count: usize) -> usize {
        let n = count.min(self.rows.len());
        self.rows.drain(..n);
        if self.over_limit && self.rows.len() < self.max_backlog {
            self.over_limit = false;
        }
        n
    }

    /// 앞쪽부터 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_backlog(&self) -> usize {
        self.max_backlog
    }

    /// 지금까지 버려진 행 수
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// 지금까지 기록된 오버플로우 경고 수
    pub fn overflow_warnings(&self) -> u64 {
        self.overflow_warnings
    }
}
