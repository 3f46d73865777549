//! 키 모델: 스테이지 간에 교환되는 타입이 지정된 이름 있는 값 슬롯
//!
//! 각 플러그인 정의는 입력/출력 [`KeyDescriptor`] 목록을 선언하고,
//! 스테이지 인스턴스는 출력 디스크립터마다 하나의 [`Slot`]을 소유합니다.
//!
//! # 유효성 비트
//! `valid == false`인 슬롯은 "이번 사이클에 데이터 없음"을 의미하며,
//! 0 이나 빈 문자열과 구분됩니다. 읽는 쪽은 무효 슬롯을 기본값으로 대체하지 않고
//! 항상 부재(`None`)로 취급해야 합니다.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

// ─── Export 메타데이터 ───────────────────────────────────────────────

/// IETF IPFIX 벤더 ID
pub const VENDOR_IETF: u32 = 0;
/// netfilter IPFIX 벤더 ID
pub const VENDOR_NETFILTER: u32 = 21373;

/// 다운스트림 익스포터용 (vendor, field id) 쌍
///
/// 코어는 이 값을 해석하지 않고 그대로 전달만 합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportField {
    /// 벤더 ID
    pub vendor: u32,
    /// 벤더 내 필드 ID
    pub field_id: u16,
}

// ─── KeyType ─────────────────────────────────────────────────────────

/// 키의 의미 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    /// UTF-8 문자열
    String,
    /// 불투명 바이트 블롭
    Raw,
    /// IPv4 주소
    Ipv4,
}

impl KeyType {
    /// 힙 소유 데이터를 담는 타입인지 여부
    pub fn is_owned(self) -> bool {
        matches!(self, Self::String | Self::Raw)
    }

    /// 정수 타입인지 여부
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Raw => "raw",
            Self::Ipv4 => "ipv4",
        };
        f.write_str(name)
    }
}

// ─── Value ───────────────────────────────────────────────────────────

/// 슬롯에 저장되는 타입이 지정된 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    String(String),
    Raw(Bytes),
    Ipv4(Ipv4Addr),
}

impl Value {
    /// 값의 의미 타입을 반환합니다.
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Int8(_) => KeyType::Int8,
            Self::Int16(_) => KeyType::Int16,
            Self::Int32(_) => KeyType::Int32,
            Self::Int64(_) => KeyType::Int64,
            Self::UInt8(_) => KeyType::UInt8,
            Self::UInt16(_) => KeyType::UInt16,
            Self::UInt32(_) => KeyType::UInt32,
            Self::UInt64(_) => KeyType::UInt64,
            Self::Bool(_) => KeyType::Bool,
            Self::String(_) => KeyType::String,
            Self::Raw(_) => KeyType::Raw,
            Self::Ipv4(_) => KeyType::Ipv4,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::UInt8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::UInt16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Raw(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Ipv4(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::UInt8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::UInt16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Raw(v)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(v: Ipv4Addr) -> Self {
        Self::Ipv4(v)
    }
}

// ─── KeyDescriptor ───────────────────────────────────────────────────

/// 키 디스크립터: 플러그인 정의 시점에 고정되는 불변 스키마 항목
///
/// 입력 디스크립터는 `key_type`이 `None`일 수 있으며(상위 타입을 그대로 수용),
/// 출력 디스크립터는 항상 타입을 가집니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    /// 점으로 구분된 계층형 이름 (예: `ip.saddr`)
    pub name: String,
    /// 의미 타입 (입력 키에서 `None`이면 모든 타입 허용)
    pub key_type: Option<KeyType>,
    /// 바인딩 실패 시 스택 구성을 실패시킬지 여부
    pub required: bool,
    /// 비활성 키 (바인딩/직렬화 대상에서 제외)
    pub inactive: bool,
    /// 익스포터용 메타데이터
    pub export: Option<ExportField>,
}

impl KeyDescriptor {
    /// 타입이 지정된 선택적(optional) 키를 생성합니다.
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type: Some(key_type),
            required: false,
            inactive: false,
            export: None,
        }
    }

    /// 타입 제약이 없는 입력 키를 생성합니다.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: None,
            required: false,
            inactive: false,
            export: None,
        }
    }

    /// 필수 키로 표시합니다.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// 비활성 키로 표시합니다.
    pub fn inactive(mut self) -> Self {
        self.inactive = true;
        self
    }

    /// 익스포트 메타데이터를 지정합니다.
    pub fn export(mut self, vendor: u32, field_id: u16) -> Self {
        self.export = Some(ExportField { vendor, field_id });
        self
    }
}

// ─── Slot ────────────────────────────────────────────────────────────

/// 값 슬롯: 출력 디스크립터 하나당 스테이지 인스턴스 하나가 소유
///
/// [`invalidate`](Slot::invalidate)는 저장된 값을 건드리지 않고 유효 비트만 지웁니다.
/// 문자열/블롭 같은 소유 데이터는 다음 [`write`](Slot::write) 또는
/// 슬롯이 drop될 때 해제됩니다.
#[derive(Debug, Clone)]
pub struct Slot {
    key_type: KeyType,
    value: Option<Value>,
    valid: bool,
}

impl Slot {
    /// 빈(무효) 슬롯을 생성합니다.
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            value: None,
            valid: false,
        }
    }

    /// 슬롯의 의미 타입을 반환합니다.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// 현재 값을 읽습니다. 무효 슬롯이면 `None`입니다.
    pub fn read(&self) -> Option<&Value> {
        if self.valid {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// 유효 여부를 반환합니다.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// 값을 기록하고 유효 비트를 설정합니다.
    ///
    /// 이전 값(소유 데이터 포함)은 새 값으로 교체되면서 해제됩니다.
    /// 슬롯 타입과 값 타입이 다르면 슬롯을 변경하지 않고 에러를 반환합니다.
    pub fn write(&mut self, value: Value) -> Result<(), KeyError> {
        let actual = value.key_type();
        if actual != self.key_type {
            return Err(KeyError::TypeMismatch {
                key: String::new(),
                expected: self.key_type.to_string(),
                actual: actual.to_string(),
            });
        }
        self.value = Some(value);
        self.valid = true;
        Ok(())
    }

    /// 유효 비트만 지웁니다.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// 상위 스테이지 출력 슬롯에 대한 읽기 전용 참조 (바인딩)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    /// 스택 내 스테이지 인덱스
    pub stage: usize,
    /// 해당 스테이지의 출력 슬롯 인덱스
    pub slot: usize,
}
