//! 방화벽 key=value 라인 포매터 (`ASTARO`)
//!
//! 로그 prefix로 이벤트 종류를 고르고, 입력 키를 `name="value"` 쌍으로 이어 붙입니다.
//!
//! ```text
//! id="2001" severity="info" sys="SecureNet" sub="packetfilter" name="Packet dropped"
//! action="drop" initf="eth0" srcip="10.0.0.1" dstip="10.0.0.2" proto="6" length="60"
//! tos="0x00" prec="0x00" ttl="64" srcport="40000" dstport="22" tcpflags="SYN"
//! ```

use chrono::Local;
use metrics::counter;
use tracing::{debug, info, warn};

use ironlog_core::metrics as m;
use ironlog_core::{
    Inputs, IronlogError, KeyDescriptor, Outputs, PluginDefinition, Stage, StageConfig,
    StageContext, StageKind, Value,
};

use crate::error::OutputError;
use crate::syslog::{LineWriter, SyslogSinkConfig, UdpLineWriter, format_rfc3164};

/// 플러그인 이름
pub const PLUGIN_NAME: &str = "ASTARO";

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;

// =============================================================================
// 로그 종류
// =============================================================================

/// prefix → 로그 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogType {
    pub prefix: &'static str,
    pub description: &'static str,
    pub id: u32,
    pub action: &'static str,
}

/// 첫 항목은 알 수 없는 prefix의 대체 항목
pub static LOG_TYPES: [LogType; 6] = [
    LogType { prefix: "LOG: ", description: "Packet logged", id: 2000, action: "log" },
    LogType { prefix: "DROP: ", description: "Packet dropped", id: 2001, action: "drop" },
    LogType { prefix: "ACCEPT: ", description: "Packet accepted", id: 2002, action: "accept" },
    LogType { prefix: "REJECT: ", description: "Packet rejected", id: 2003, action: "reject" },
    LogType { prefix: "INVALID_PKT: ", description: "Invalid packet", id: 2004, action: "invalid" },
    LogType {
        prefix: "IP-SPOOFING DROP: ",
        description: "Spoofed packet dropped",
        id: 2005,
        action: "drop",
    },
];

/// prefix와 정확히 일치하는 로그 종류, 없으면 첫 항목
pub fn log_type(prefix: &str) -> &'static LogType {
    LOG_TYPES
        .iter()
        .find(|t| t.prefix == prefix)
        .unwrap_or(&LOG_TYPES[0])
}

// =============================================================================
// 키 처리 테이블
// =============================================================================

/// 키별 출력 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    /// 출력하지 않음 (정적 부분이나 프로토콜별 부분에서 사용)
    Skip,
    /// 이름을 바꿔 기본 형식으로 출력
    Rename(&'static str),
    /// MAC 헤더 → dstmac/srcmac
    Mac,
    /// TOS → tos/prec
    Tos,
}

/// 입력 키 이름과 처리 방식 (입력 키 순서)
const FIELDS: [(&str, Handler); 23] = [
    ("oob.prefix", Handler::Skip),
    ("oob.logmark", Handler::Rename("fwrule")),
    ("oob.seq.local", Handler::Rename("seq")),
    ("oob.in", Handler::Rename("initf")),
    ("oob.out", Handler::Rename("outitf")),
    ("raw.mac", Handler::Mac),
    ("ip.saddr", Handler::Rename("srcip")),
    ("ip.daddr", Handler::Rename("dstip")),
    ("ip.protocol", Handler::Rename("proto")),
    ("raw.pktlen", Handler::Rename("length")),
    ("ip.tos", Handler::Tos),
    ("ip.ttl", Handler::Rename("ttl")),
    ("tcp.sport", Handler::Rename("srcport")),
    ("tcp.dport", Handler::Rename("dstport")),
    ("udp.sport", Handler::Rename("srcport")),
    ("udp.dport", Handler::Rename("dstport")),
    ("tcp.ack", Handler::Skip),
    ("tcp.psh", Handler::Skip),
    ("tcp.rst", Handler::Skip),
    ("tcp.syn", Handler::Skip),
    ("tcp.fin", Handler::Skip),
    ("icmp.type", Handler::Skip),
    ("icmp.code", Handler::Skip),
];

const KEY_PREFIX: usize = 0;
const KEY_PROTOCOL: usize = 8;
const KEY_TCP_FLAGS: [(usize, &str); 5] =
    [(16, "ACK"), (17, "PSH"), (18, "RST"), (19, "SYN"), (20, "FIN")];
const KEY_ICMP_TYPE: usize = 21;
const KEY_ICMP_CODE: usize = 22;

/// 입력 키 목록 (모두 선택, 타입은 상위 출력을 따름)
pub fn input_keys() -> Vec<KeyDescriptor> {
    FIELDS
        .iter()
        .map(|(name, _)| KeyDescriptor::untyped(*name))
        .collect()
}

// =============================================================================
// 포매터
// =============================================================================

/// 값 하나를 `name="value"`로 씁니다.
///
/// 16/32비트 정수 0은 생략하고, 문자열/주소/8비트 정수 외의 타입은 출력하지 않습니다.
fn print_key(parts: &mut Vec<String>, name: &str, value: &Value) {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Ipv4(addr) => addr.to_string(),
        Value::UInt8(v) => v.to_string(),
        Value::UInt16(v) if *v != 0 => v.to_string(),
        Value::UInt32(v) if *v != 0 => v.to_string(),
        _ => return,
    };
    parts.push(format!("{name}=\"{text}\""));
}

/// `aa:bb:cc:..` 문자열 또는 원시 바이트에서 옥텟을 꺼냅니다.
fn mac_octets(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Raw(bytes) => Some(bytes.to_vec()),
        Value::String(s) => s
            .split(':')
            .map(|octet| u8::from_str_radix(octet.trim(), 16).ok())
            .collect(),
        _ => None,
    }
}

fn join_mac(octets: &[u8]) -> String {
    octets
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn print_mac(parts: &mut Vec<String>, value: &Value) {
    let Some(octets) = mac_octets(value) else {
        return;
    };
    if octets.len() < 6 {
        return;
    }
    // 이더넷 헤더: 목적지 6바이트, 출발지 6바이트
    let src = if octets.len() >= 12 {
        join_mac(&octets[6..12])
    } else {
        "00:00:00:00:00:00".to_owned()
    };
    parts.push(format!("dstmac=\"{}\"", join_mac(&octets[..6])));
    parts.push(format!("srcmac=\"{src}\""));
}

fn print_tos(parts: &mut Vec<String>, value: &Value) {
    let Some(tos) = value.as_u8() else {
        return;
    };
    parts.push(format!("tos=\"0x{:02x}\"", tos & 0x1e));
    parts.push(format!("prec=\"0x{:02x}\"", tos & 0xe0));
}

/// 입력 값(입력 키 순서, 무효/미바인딩은 `None`)으로 라인 본문을 만듭니다.
///
/// `oob.prefix`가 없으면 `None`을 반환합니다.
pub fn format_event(values: &[Option<&Value>]) -> Option<String> {
    let get = |idx: usize| values.get(idx).copied().flatten();

    let prefix = get(KEY_PREFIX)?.as_str()?;
    let t = log_type(prefix);

    let mut parts = vec![
        format!("id=\"{}\"", t.id),
        "severity=\"info\"".to_owned(),
        "sys=\"SecureNet\"".to_owned(),
        "sub=\"packetfilter\"".to_owned(),
        format!("name=\"{}\"", t.description),
        format!("action=\"{}\"", t.action),
    ];

    for (idx, (_, handler)) in FIELDS.iter().enumerate() {
        let Some(value) = get(idx) else {
            continue;
        };
        match handler {
            Handler::Skip => {}
            Handler::Rename(name) => print_key(&mut parts, name, value),
            Handler::Mac => print_mac(&mut parts, value),
            Handler::Tos => print_tos(&mut parts, value),
        }
    }

    match get(KEY_PROTOCOL).and_then(Value::as_u8) {
        Some(PROTO_TCP) => {
            let flags: Vec<&str> = KEY_TCP_FLAGS
                .iter()
                .filter(|(idx, _)| get(*idx).and_then(Value::as_bool).unwrap_or(false))
                .map(|(_, name)| *name)
                .collect();
            parts.push(format!("tcpflags=\"{}\"", flags.join(" ")));
        }
        Some(PROTO_ICMP) => {
            if let Some(v) = get(KEY_ICMP_TYPE) {
                print_key(&mut parts, "type", v);
            }
            if let Some(v) = get(KEY_ICMP_CODE) {
                print_key(&mut parts, "code", v);
            }
        }
        _ => {}
    }

    Some(parts.join(" "))
}

// =============================================================================
// 스테이지
// =============================================================================

/// `ASTARO` 싱크 스테이지
pub struct AstaroSink {
    id: String,
    config: SyslogSinkConfig,
    pri: u8,
    writer: Box<dyn LineWriter>,
}

impl AstaroSink {
    pub fn new(config: SyslogSinkConfig, writer: Box<dyn LineWriter>) -> Result<Self, OutputError> {
        let pri = config.validate()?;
        Ok(Self {
            id: String::new(),
            config,
            pri,
            writer,
        })
    }

    /// PRI 값
    pub fn priority(&self) -> u8 {
        self.pri
    }
}

impl Stage for AstaroSink {
    fn start(&mut self, ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        self.id = ctx.id.to_owned();
        self.writer.open()?;
        info!(stage = %self.id, target = %self.config.target, pri = self.pri, "syslog output ready");
        Ok(())
    }

    fn stop(&mut self, ctx: &StageContext<'_>) -> Result<(), IronlogError> {
        debug!(stage = %ctx.id, "closing syslog output");
        self.writer.close();
        Ok(())
    }

    fn interpret(
        &mut self,
        inputs: &Inputs<'_>,
        _outputs: &mut Outputs<'_>,
    ) -> Result<(), IronlogError> {
        let values: Vec<Option<&Value>> = (0..inputs.len()).map(|i| inputs.get(i)).collect();
        let Some(body) = format_event(&values) else {
            return Ok(());
        };

        let line = format_rfc3164(
            self.pri,
            Local::now(),
            &self.config.hostname,
            &self.config.tag,
            std::process::id(),
            &body,
        );
        match self.writer.write_line(&line) {
            Ok(()) => {
                counter!(m::OUTPUT_LINES_TOTAL, m::LABEL_STAGE => self.id.clone()).increment(1);
                Ok(())
            }
            Err(e) => {
                counter!(m::OUTPUT_WRITE_ERRORS_TOTAL, m::LABEL_STAGE => self.id.clone())
                    .increment(1);
                warn!(stage = %self.id, error = %e, "failed to write syslog line");
                Err(e.into())
            }
        }
    }
}

/// writer 생성 함수로 `ASTARO` 플러그인 정의를 만듭니다.
pub fn definition_with<F>(make_writer: F) -> PluginDefinition
where
    F: Fn(&SyslogSinkConfig) -> Box<dyn LineWriter> + Send + Sync + 'static,
{
    PluginDefinition::new(PLUGIN_NAME, StageKind::Sink, move |stage: &StageConfig| {
        let config: SyslogSinkConfig = stage.parse_options()?;
        let writer = make_writer(&config);
        Ok(Box::new(AstaroSink::new(config, writer)?) as Box<dyn Stage>)
    })
    .declare_schema(input_keys(), vec![])
}

/// UDP syslog로 보내는 `ASTARO` 플러그인 정의
pub fn definition() -> PluginDefinition {
    definition_with(|config| Box::new(UdpLineWriter::new(config.target.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn values(pairs: &[(&str, Value)]) -> Vec<Option<Value>> {
        FIELDS
            .iter()
            .map(|(name, _)| {
                pairs
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
            })
            .collect()
    }

    fn format(pairs: &[(&str, Value)]) -> Option<String> {
        let owned = values(pairs);
        let refs: Vec<Option<&Value>> = owned.iter().map(Option::as_ref).collect();
        format_event(&refs)
    }

    #[test]
    fn fallback_log_type_for_unknown_prefix() {
        assert_eq!(log_type("DROP: ").id, 2001);
        assert_eq!(log_type("something else").id, 2000);
        assert_eq!(log_type("IP-SPOOFING DROP: ").action, "drop");
    }

    #[test]
    fn missing_prefix_skips_event() {
        assert_eq!(format(&[("ip.saddr", Value::Ipv4(Ipv4Addr::LOCALHOST))]), None);
    }

    #[test]
    fn tcp_event_line() {
        let line = format(&[
            ("oob.prefix", Value::from("DROP: ")),
            ("oob.in", Value::from("eth0")),
            ("oob.out", Value::from("")),
            ("ip.saddr", Value::Ipv4(Ipv4Addr::new(10, 0, 0, 1))),
            ("ip.daddr", Value::Ipv4(Ipv4Addr::new(10, 0, 0, 2))),
            ("ip.protocol", Value::UInt8(6)),
            ("raw.pktlen", Value::UInt32(60)),
            ("ip.tos", Value::UInt8(0x10)),
            ("ip.ttl", Value::UInt8(64)),
            ("tcp.sport", Value::UInt16(40000)),
            ("tcp.dport", Value::UInt16(22)),
            ("tcp.ack", Value::Bool(true)),
            ("tcp.syn", Value::Bool(true)),
            ("tcp.fin", Value::Bool(false)),
        ])
        .unwrap();

        assert_eq!(
            line,
            "id=\"2001\" severity=\"info\" sys=\"SecureNet\" sub=\"packetfilter\" \
             name=\"Packet dropped\" action=\"drop\" initf=\"eth0\" outitf=\"\" \
             srcip=\"10.0.0.1\" dstip=\"10.0.0.2\" proto=\"6\" length=\"60\" \
             tos=\"0x10\" prec=\"0x00\" ttl=\"64\" srcport=\"40000\" dstport=\"22\" \
             tcpflags=\"ACK SYN\""
        );
    }

    #[test]
    fn icmp_event_prints_type_and_code() {
        let line = format(&[
            ("oob.prefix", Value::from("ACCEPT: ")),
            ("ip.protocol", Value::UInt8(1)),
            ("icmp.type", Value::UInt8(8)),
            ("icmp.code", Value::UInt8(0)),
        ])
        .unwrap();
        assert!(line.ends_with("proto=\"1\" type=\"8\" code=\"0\""));
        assert!(!line.contains("tcpflags"));
    }

    #[test]
    fn zero_ports_are_omitted() {
        let line = format(&[
            ("oob.prefix", Value::from("LOG: ")),
            ("udp.sport", Value::UInt16(0)),
            ("udp.dport", Value::UInt16(53)),
        ])
        .unwrap();
        assert!(!line.contains("srcport"));
        assert!(line.contains("dstport=\"53\""));
    }

    #[test]
    fn mac_header_splits_destination_and_source() {
        let line = format(&[
            ("oob.prefix", Value::from("LOG: ")),
            (
                "raw.mac",
                Value::from("00:1b:21:aa:bb:cc:00:50:56:01:02:03:08:00"),
            ),
        ])
        .unwrap();
        assert!(line.contains("dstmac=\"00:1b:21:aa:bb:cc\" srcmac=\"00:50:56:01:02:03\""));
    }

    #[test]
    fn short_mac_uses_zero_source() {
        let line = format(&[
            ("oob.prefix", Value::from("LOG: ")),
            ("raw.mac", Value::from("00:1b:21:aa:bb:cc")),
        ])
        .unwrap();
        assert!(line.contains("srcmac=\"00:00:00:00:00:00\""));
    }

    #[test]
    fn input_key_order_matches_handlers() {
        let keys = input_keys();
        assert_eq!(keys.len(), FIELDS.len());
        assert_eq!(keys[KEY_PROTOCOL].name, "ip.protocol");
        assert_eq!(keys[KEY_ICMP_CODE].name, "icmp.code");
        assert!(KEY_TCP_FLAGS.iter().all(|(i, f)| keys[*i].name
            == format!("tcp.{}", f.to_lowercase())));
        assert!(keys.iter().all(|k| !k.required && k.key_type.is_none()));
    }

    proptest! {
        #[test]
        fn any_prefix_yields_known_type(prefix in ".{0,40}", dport in any::<u16>()) {
            let line = format(&[
                ("oob.prefix", Value::from(prefix.as_str())),
                ("ip.protocol", Value::UInt8(17)),
                ("udp.dport", Value::UInt16(dport)),
            ])
            .unwrap();
            let id = log_type(&prefix).id;
            let expected = format!("id=\"{id}\" severity=\"info\"");
            prop_assert!(line.starts_with(&expected));
            prop_assert_eq!(line.contains("dstport="), dport != 0);
        }
    }
}
