//! ULOG 패킷 레코드 디코딩 및 소스 스테이지
//!
//! 데이터그램 하나에 여러 레코드가 이어 붙어 올 수 있습니다.
//! 각 레코드는 고정 길이 헤더(빅 엔디언) 뒤에 `data_len` 바이트의 패킷이 옵니다.
//!
//! ```text
//! offset  size  field
//!      0     4  mark
//!      4     4  timestamp_sec
//!      8     4  timestamp_usec
//!     12     4  hook
//!     16    16  indev_name   (NUL 패딩)
//!     32    16  outdev_name  (NUL 패딩)
//!     48     4  data_len
//!     52    32  prefix       (NUL 패딩)
//!     84     1  mac_len
//!     85    80  mac
//!    165     -  payload[data_len]
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use metrics::counter;
use tracing::{debug, warn};

use ironlog_core::key::{VENDOR_IETF, VENDOR_NETFILTER};
use ironlog_core::metrics as m;
use ironlog_core::{
    Inputs, IronlogError, KeyDescriptor, KeyType, Outputs, ParseError, PipelineStack,
    PluginDefinition, Stage, StageConfig, StageContext, StageKind,
};

/// 플러그인 이름
pub const PLUGIN_NAME: &str = "ULOG";

/// 인터페이스 이름 필드 길이
pub const IFNAME_LEN: usize = 16;
/// prefix 필드 길이
pub const PREFIX_LEN: usize = 32;
/// MAC 헤더 최대 길이
pub const MAC_MAX_LEN: usize = 80;
/// 레코드 헤더 길이
pub const HEADER_LEN: usize = 16 + 2 * IFNAME_LEN + 4 + PREFIX_LEN + 1 + MAC_MAX_LEN;

const OFF_INDEV: usize = 16;
const OFF_OUTDEV: usize = OFF_INDEV + IFNAME_LEN;
const OFF_DATA_LEN: usize = OFF_OUTDEV + IFNAME_LEN;
const OFF_PREFIX: usize = OFF_DATA_LEN + 4;
const OFF_MAC_LEN: usize = OFF_PREFIX + PREFIX_LEN;
const OFF_MAC: usize = OFF_MAC_LEN + 1;

// =============================================================================
// 출력 키
// =============================================================================

/// 출력 키 인덱스
pub mod keys {
    pub const RAW_MAC: usize = 0;
    pub const RAW_PKT: usize = 1;
    pub const RAW_PKTLEN: usize = 2;
    pub const RAW_PKTCOUNT: usize = 3;
    pub const OOB_PREFIX: usize = 4;
    pub const OOB_TIME_SEC: usize = 5;
    pub const OOB_TIME_USEC: usize = 6;
    pub const OOB_MARK: usize = 7;
    pub const OOB_IN: usize = 8;
    pub const OOB_OUT: usize = 9;
}

/// ULOG 소스의 출력 키 (인덱스는 [`keys`] 상수와 일치)
pub fn output_keys() -> Vec<KeyDescriptor> {
    vec![
        KeyDescriptor::new("raw.mac", KeyType::String),
        KeyDescriptor::new("raw.pkt", KeyType::Raw).export(VENDOR_NETFILTER, 1),
        KeyDescriptor::new("raw.pktlen", KeyType::UInt32).export(VENDOR_IETF, 1),
        KeyDescriptor::new("raw.pktcount", KeyType::UInt32).export(VENDOR_IETF, 2),
        KeyDescriptor::new("oob.prefix", KeyType::String),
        KeyDescriptor::new("oob.time.sec", KeyType::UInt32).export(VENDOR_IETF, 22),
        KeyDescriptor::new("oob.time.usec", KeyType::UInt32),
        KeyDescriptor::new("oob.mark", KeyType::UInt32),
        KeyDescriptor::new("oob.in", KeyType::String),
        KeyDescriptor::new("oob.out", KeyType::String),
    ]
}

// =============================================================================
// 레코드
// =============================================================================

/// 디코딩된 ULOG 레코드
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UlogRecord {
    pub mark: u32,
    pub timestamp_sec: u32,
    pub timestamp_usec: u32,
    pub hook: u32,
    pub indev: String,
    pub outdev: String,
    pub prefix: String,
    /// MAC 헤더 (`mac_len` 바이트)
    pub mac: Bytes,
    /// IP 패킷
    pub payload: Bytes,
}

impl UlogRecord {
    /// 레코드 하나를 디코딩합니다. 레코드 전체 길이도 함께 반환합니다.
    ///
    /// `base`는 에러 메시지에 쓰이는 데이터그램 내 오프셋입니다.
    fn decode(buf: &Bytes, base: usize) -> Result<(Self, usize), ParseError> {
        if buf.len() < HEADER_LEN {
            return Err(ParseError::Truncated {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        let data_len = read_u32(buf, OFF_DATA_LEN) as usize;
        let mac_len = usize::from(buf[OFF_MAC_LEN]);
        if mac_len > MAC_MAX_LEN {
            return Err(ParseError::Failed {
                offset: base + OFF_MAC_LEN,
                reason: format!("mac_len {mac_len} exceeds {MAC_MAX_LEN}"),
            });
        }

        let total = HEADER_LEN + data_len;
        if buf.len() < total {
            return Err(ParseError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let record = Self {
            mark: read_u32(buf, 0),
            timestamp_sec: read_u32(buf, 4),
            timestamp_usec: read_u32(buf, 8),
            hook: read_u32(buf, 12),
            indev: read_cstr(&buf[OFF_INDEV..OFF_INDEV + IFNAME_LEN]),
            outdev: read_cstr(&buf[OFF_OUTDEV..OFF_OUTDEV + IFNAME_LEN]),
            prefix: read_cstr(&buf[OFF_PREFIX..OFF_PREFIX + PREFIX_LEN]),
            mac: buf.slice(OFF_MAC..OFF_MAC + mac_len),
            payload: buf.slice(HEADER_LEN..total),
        };
        Ok((record, total))
    }

    /// 와이어 형식으로 인코딩합니다. 고정 길이 필드를 넘는 문자열은 잘립니다.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// `buf` 뒤에 레코드를 덧붙입니다 (여러 레코드를 한 데이터그램에 담을 때 사용).
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.mark);
        buf.put_u32(self.timestamp_sec);
        buf.put_u32(self.timestamp_usec);
        buf.put_u32(self.hook);
        put_fixed(buf, self.indev.as_bytes(), IFNAME_LEN);
        put_fixed(buf, self.outdev.as_bytes(), IFNAME_LEN);
        buf.put_u32(self.payload.len() as u32);
        put_fixed(buf, self.prefix.as_bytes(), PREFIX_LEN);
        let mac_len = self.mac.len().min(MAC_MAX_LEN);
        buf.put_u8(mac_len as u8);
        put_fixed(buf, &self.mac[..mac_len], MAC_MAX_LEN);
        buf.put_slice(&self.payload);
    }

    /// `aa:bb:cc` 형식의 MAC 헤더 문자열 (MAC이 없으면 `None`)
    pub fn mac_string(&self) -> Option<String> {
        if self.mac.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.mac.iter().map(|b| format!("{b:02x}")).collect();
        Some(parts.join(":"))
    }

    /// 레코드 값을 소스 출력 슬롯에 기록합니다.
    ///
    /// 타임스탬프 초가 0이면 `oob.time.*`는 무효로 남습니다.
    pub fn fill_outputs(&self, out: &mut Outputs<'_>) -> Result<(), IronlogError> {
        if let Some(mac) = self.mac_string() {
            out.set(keys::RAW_MAC, mac)?;
        }
        out.set(keys::RAW_PKT, self.payload.clone())?;
        out.set(keys::RAW_PKTLEN, self.payload.len() as u32)?;
        out.set(keys::RAW_PKTCOUNT, 1u32)?;
        out.set(keys::OOB_PREFIX, self.prefix.as_str())?;
        if self.timestamp_sec != 0 {
            out.set(keys::OOB_TIME_SEC, self.timestamp_sec)?;
            out.set(keys::OOB_TIME_USEC, self.timestamp_usec)?;
        }
        out.set(keys::OOB_MARK, self.mark)?;
        out.set(keys::OOB_IN, self.indev.as_str())?;
        out.set(keys::OOB_OUT, self.outdev.as_str())?;
        Ok(())
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// NUL 패딩된 고정 길이 필드를 문자열로 읽습니다.
fn read_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn put_fixed(buf: &mut BytesMut, src: &[u8], width: usize) {
    let n = src.len().min(width);
    buf.put_slice(&src[..n]);
    buf.put_bytes(0, width - n);
}

// =============================================================================
// 데이터그램 디코딩
// =============================================================================

/// 데이터그램 안의 레코드를 순서대로 꺼내는 반복자
///
/// 디코딩 에러가 나면 에러를 한 번 내보내고 끝납니다.
pub struct Records {
    rest: Bytes,
    offset: usize,
    failed: bool,
}

/// 데이터그램을 레코드 반복자로 만듭니다.
pub fn records(datagram: Bytes) -> Records {
    Records {
        rest: datagram,
        offset: 0,
        failed: false,
    }
}

impl Iterator for Records {
    type Item = Result<UlogRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match UlogRecord::decode(&self.rest, self.offset) {
            Ok((record, consumed)) => {
                self.rest = self.rest.slice(consumed..);
                self.offset += consumed;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// 데이터그램 하나를 처리한 결과
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DatagramStats {
    /// 전파된 레코드 수
    pub records: usize,
    /// 스테이지 interpret 실패 수 합계
    pub stage_failures: usize,
    /// 디코딩 또는 진입 실패로 남은 바이트를 버렸는지 여부
    pub discarded: bool,
}

/// 데이터그램의 레코드마다 `origin` 스테이지에서 전파 사이클을 하나씩 실행합니다.
///
/// 디코딩에 실패한 레코드는 전파하지 않습니다. 그 앞의 레코드는 이미 처리된 상태로 남습니다.
pub fn ingest_datagram(stack: &mut PipelineStack, origin: usize, datagram: Bytes) -> DatagramStats {
    counter!(m::SOURCE_DATAGRAMS_TOTAL).increment(1);
    let mut stats = DatagramStats::default();

    for record in records(datagram) {
        match record {
            Ok(record) => {
                debug!(prefix = %record.prefix, len = record.payload.len(), "ulog packet received");
                match stack.ingest(origin, |out| record.fill_outputs(out)) {
                    Ok(failures) => {
                        stats.records += 1;
                        stats.stage_failures += failures;
                        counter!(m::SOURCE_RECORDS_TOTAL).increment(1);
                    }
                    Err(e) => {
                        warn!(stack = %stack.name(), error = %e, "failed to ingest record");
                        stats.discarded = true;
                        break;
                    }
                }
            }
            Err(e) => {
                counter!(m::SOURCE_PARSE_ERRORS_TOTAL).increment(1);
                warn!(stack = %stack.name(), error = %e, "malformed ulog datagram, discarding rest");
                stats.discarded = true;
            }
        }
    }
    stats
}

// =============================================================================
// 소스 스테이지
// =============================================================================

/// ULOG 소스 스테이지
///
/// 수신 소켓은 데몬 이벤트 루프가 소유합니다. 스테이지는 출력 슬롯의 주인일 뿐이며
/// 사이클은 [`ingest_datagram`]으로 시작됩니다.
#[derive(Debug, Default)]
pub struct UlogSource;

impl Stage for UlogSource {
    fn start(&mut self, ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        debug!(stage = %ctx.id, keys = ctx.outputs.len(), "ulog source ready");
        Ok(())
    }

    fn interpret(
        &mut self,
        _inputs: &Inputs<'_>,
        _outputs: &mut Outputs<'_>,
    ) -> Result<(), IronlogError> {
        Ok(())
    }
}

/// `ULOG` 플러그인 정의
pub fn definition() -> PluginDefinition {
    PluginDefinition::new(PLUGIN_NAME, StageKind::Source, |_: &StageConfig| {
        Ok(Box::new(UlogSource) as Box<dyn Stage>)
    })
    .declare_schema(vec![], output_keys())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> UlogRecord {
        UlogRecord {
            mark: 7,
            timestamp_sec: 1_700_000_000,
            timestamp_usec: 42,
            hook: 1,
            indev: "eth0".to_owned(),
            outdev: String::new(),
            prefix: "DROP: ".to_owned(),
            mac: Bytes::from_static(&[0x00, 0x1b, 0x21, 0xaa, 0xbb, 0xcc]),
            payload: Bytes::from_static(&[0x45, 0, 0, 20]),
        }
    }

    #[test]
    fn header_is_165_bytes() {
        assert_eq!(HEADER_LEN, 165);
        assert_eq!(OFF_MAC, 85);
        assert_eq!(sample().encode().len(), 165 + 4);
    }

    #[test]
    fn decodes_encoded_record() {
        let decoded: Vec<_> = records(sample().encode()).collect();
        assert_eq!(decoded, vec![Ok(sample())]);
    }

    #[test]
    fn concatenated_records_are_split() {
        let mut buf = BytesMut::new();
        sample().encode_into(&mut buf);
        let second = UlogRecord {
            mark: 8,
            payload: Bytes::new(),
            ..sample()
        };
        second.encode_into(&mut buf);

        let marks: Vec<u32> = records(buf.freeze())
            .map(|r| r.map(|r| r.mark))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(marks, vec![7, 8]);
    }

    #[test]
    fn short_header_is_truncated() {
        let err = records(Bytes::from_static(&[0u8; 100]))
            .next()
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::Truncated {
                needed: 165,
                available: 100
            }
        );
    }

    #[test]
    fn payload_beyond_datagram_is_truncated() {
        let encoded = sample().encode();
        let cut = encoded.slice(..encoded.len() - 2);
        let err = records(cut).next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::Truncated { needed: 169, available: 167 }));
    }

    #[test]
    fn oversized_mac_len_is_rejected() {
        let mut raw = BytesMut::from(&sample().encode()[..]);
        raw[OFF_MAC_LEN] = 81;
        let err = records(raw.freeze()).next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::Failed { offset: 84, .. }));
    }

    #[test]
    fn iteration_stops_after_error() {
        let mut buf = BytesMut::new();
        sample().encode_into(&mut buf);
        buf.put_slice(&[1, 2, 3]);
        let results: Vec<_> = records(buf.freeze()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn long_strings_are_cut_to_field_width() {
        let record = UlogRecord {
            indev: "a-very-long-interface-name".to_owned(),
            ..sample()
        };
        let (decoded, _) = UlogRecord::decode(&record.encode(), 0).unwrap();
        assert_eq!(decoded.indev, "a-very-long-inte");
    }

    #[test]
    fn mac_is_colon_separated() {
        assert_eq!(sample().mac_string().as_deref(), Some("00:1b:21:aa:bb:cc"));
        let no_mac = UlogRecord {
            mac: Bytes::new(),
            ..sample()
        };
        assert_eq!(no_mac.mac_string(), None);
    }

    #[test]
    fn output_keys_carry_export_metadata() {
        let keys = output_keys();
        assert_eq!(keys.len(), 10);
        assert_eq!(keys[keys::RAW_PKT].name, "raw.pkt");
        assert_eq!(keys[keys::OOB_TIME_SEC].export.map(|e| e.field_id), Some(22));
        assert_eq!(keys[keys::OOB_OUT].name, "oob.out");
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
            let len = data.len();
            let decoded = records(Bytes::from(data)).filter(Result::is_ok).count();
            prop_assert!(decoded <= len / HEADER_LEN);
        }
    }
}
