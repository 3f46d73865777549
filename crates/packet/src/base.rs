//! IPv4 / L4 헤더 디코딩 스테이지 (`BASE`)
//!
//! 소스가 내보낸 `raw.pkt`를 읽어 IP 헤더와 TCP/UDP/ICMP 헤더 필드를 출력 키로 씁니다.
//! 패킷에 해당하지 않는 키(예: UDP 패킷의 `tcp.*`)는 무효로 남습니다.

use std::net::Ipv4Addr;

use tracing::debug;

use ironlog_core::key::VENDOR_IETF;
use ironlog_core::{
    Inputs, IronlogError, KeyDescriptor, KeyType, Outputs, ParseError, PluginDefinition, Stage,
    StageConfig, StageKind, Value,
};

/// 플러그인 이름
pub const PLUGIN_NAME: &str = "BASE";

// =============================================================================
// 프로토콜 상수
// =============================================================================

/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_URG: u8 = 0x20;

const IPV4_MIN_HEADER: usize = 20;
const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;
const ICMP_MIN_HEADER: usize = 2;

// =============================================================================
// 디코딩 결과
// =============================================================================

/// IPv4 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub saddr: Ipv4Addr,
    pub daddr: Ipv4Addr,
    pub protocol: u8,
    pub tos: u8,
    pub ttl: u8,
    pub total_len: u16,
    /// 헤더 길이 (바이트)
    pub ihl: u8,
    pub id: u16,
    /// 프래그먼트 오프셋 (8바이트 단위)
    pub fragment_offset: u16,
}

/// TCP 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub sport: u16,
    pub dport: u16,
    pub seq: u32,
    pub window: u16,
    pub flags: u8,
}

impl TcpHeader {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// 전송 계층 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp(TcpHeader),
    Udp { sport: u16, dport: u16, len: u16 },
    Icmp { icmp_type: u8, code: u8 },
}

/// 디코딩된 패킷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket {
    pub ip: Ipv4Header,
    /// 첫 프래그먼트가 아니거나 헤더가 잘렸거나 다른 프로토콜이면 `None`
    pub transport: Option<Transport>,
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// IPv4 패킷을 디코딩합니다.
///
/// IPv4가 아니면 `Ok(None)`을 반환합니다. IP 헤더가 잘렸거나 헤더 길이가 잘못되면 에러입니다.
/// L4 헤더가 잘린 경우는 에러가 아니며 `transport`가 `None`이 됩니다.
pub fn decode(pkt: &[u8]) -> Result<Option<DecodedPacket>, ParseError> {
    if pkt.is_empty() {
        return Err(ParseError::Truncated {
            needed: IPV4_MIN_HEADER,
            available: 0,
        });
    }
    if pkt[0] >> 4 != 4 {
        return Ok(None);
    }
    if pkt.len() < IPV4_MIN_HEADER {
        return Err(ParseError::Truncated {
            needed: IPV4_MIN_HEADER,
            available: pkt.len(),
        });
    }

    let ihl = usize::from(pkt[0] & 0x0f) * 4;
    if ihl < IPV4_MIN_HEADER {
        return Err(ParseError::Failed {
            offset: 0,
            reason: format!("invalid IPv4 header length {ihl}"),
        });
    }
    if pkt.len() < ihl {
        return Err(ParseError::Truncated {
            needed: ihl,
            available: pkt.len(),
        });
    }

    let ip = Ipv4Header {
        tos: pkt[1],
        total_len: be16(pkt, 2),
        id: be16(pkt, 4),
        fragment_offset: be16(pkt, 6) & 0x1fff,
        ttl: pkt[8],
        protocol: pkt[9],
        saddr: Ipv4Addr::new(pkt[12], pkt[13], pkt[14], pkt[15]),
        daddr: Ipv4Addr::new(pkt[16], pkt[17], pkt[18], pkt[19]),
        ihl: ihl as u8,
    };

    let transport = if ip.fragment_offset == 0 {
        decode_transport(ip.protocol, &pkt[ihl..])
    } else {
        None
    };

    Ok(Some(DecodedPacket { ip, transport }))
}

fn decode_transport(protocol: u8, l4: &[u8]) -> Option<Transport> {
    match protocol {
        PROTO_TCP if l4.len() >= TCP_MIN_HEADER => Some(Transport::Tcp(TcpHeader {
            sport: be16(l4, 0),
            dport: be16(l4, 2),
            seq: be32(l4, 4),
            flags: l4[13],
            window: be16(l4, 14),
        })),
        PROTO_UDP if l4.len() >= UDP_HEADER => Some(Transport::Udp {
            sport: be16(l4, 0),
            dport: be16(l4, 2),
            len: be16(l4, 4),
        }),
        PROTO_ICMP if l4.len() >= ICMP_MIN_HEADER => Some(Transport::Icmp {
            icmp_type: l4[0],
            code: l4[1],
        }),
        _ => None,
    }
}

// =============================================================================
// 스테이지
// =============================================================================

/// 출력 키 인덱스
pub mod keys {
    pub const IP_SADDR: usize = 0;
    pub const IP_DADDR: usize = 1;
    pub const IP_PROTOCOL: usize = 2;
    pub const IP_TOS: usize = 3;
    pub const IP_TTL: usize = 4;
    pub const IP_TOTLEN: usize = 5;
    pub const IP_IHL: usize = 6;
    pub const IP_ID: usize = 7;
    pub const TCP_SPORT: usize = 8;
    pub const TCP_DPORT: usize = 9;
    pub const TCP_SEQ: usize = 10;
    pub const TCP_WINDOW: usize = 11;
    pub const TCP_ACK: usize = 12;
    pub const TCP_PSH: usize = 13;
    pub const TCP_RST: usize = 14;
    pub const TCP_SYN: usize = 15;
    pub const TCP_FIN: usize = 16;
    pub const TCP_URG: usize = 17;
    pub const UDP_SPORT: usize = 18;
    pub const UDP_DPORT: usize = 19;
    pub const UDP_LEN: usize = 20;
    pub const ICMP_TYPE: usize = 21;
    pub const ICMP_CODE: usize = 22;
}

pub fn input_keys() -> Vec<KeyDescriptor> {
    vec![KeyDescriptor::new("raw.pkt", KeyType::Raw).required()]
}

pub fn output_keys() -> Vec<KeyDescriptor> {
    vec![
        KeyDescriptor::new("ip.saddr", KeyType::Ipv4).export(VENDOR_IETF, 8),
        KeyDescriptor::new("ip.daddr", KeyType::Ipv4).export(VENDOR_IETF, 12),
        KeyDescriptor::new("ip.protocol", KeyType::UInt8).export(VENDOR_IETF, 4),
        KeyDescriptor::new("ip.tos", KeyType::UInt8).export(VENDOR_IETF, 5),
        KeyDescriptor::new("ip.ttl", KeyType::UInt8).export(VENDOR_IETF, 192),
        KeyDescriptor::new("ip.totlen", KeyType::UInt16).export(VENDOR_IETF, 190),
        KeyDescriptor::new("ip.ihl", KeyType::UInt8).export(VENDOR_IETF, 189),
        KeyDescriptor::new("ip.id", KeyType::UInt16).export(VENDOR_IETF, 54),
        KeyDescriptor::new("tcp.sport", KeyType::UInt16).export(VENDOR_IETF, 182),
        KeyDescriptor::new("tcp.dport", KeyType::UInt16).export(VENDOR_IETF, 183),
        KeyDescriptor::new("tcp.seq", KeyType::UInt32).export(VENDOR_IETF, 184),
        KeyDescriptor::new("tcp.window", KeyType::UInt16).export(VENDOR_IETF, 186),
        KeyDescriptor::new("tcp.ack", KeyType::Bool),
        KeyDescriptor::new("tcp.psh", KeyType::Bool),
        KeyDescriptor::new("tcp.rst", KeyType::Bool),
        KeyDescriptor::new("tcp.syn", KeyType::Bool),
        KeyDescriptor::new("tcp.fin", KeyType::Bool),
        KeyDescriptor::new("tcp.urg", KeyType::Bool),
        KeyDescriptor::new("udp.sport", KeyType::UInt16).export(VENDOR_IETF, 180),
        KeyDescriptor::new("udp.dport", KeyType::UInt16).export(VENDOR_IETF, 181),
        KeyDescriptor::new("udp.len", KeyType::UInt16),
        KeyDescriptor::new("icmp.type", KeyType::UInt8).export(VENDOR_IETF, 176),
        KeyDescriptor::new("icmp.code", KeyType::UInt8).export(VENDOR_IETF, 177),
    ]
}

/// 디코딩 결과를 출력 슬롯에 씁니다.
pub fn write_outputs(packet: &DecodedPacket, out: &mut Outputs<'_>) -> Result<(), IronlogError> {
    let ip = &packet.ip;
    out.set(keys::IP_SADDR, ip.saddr)?;
    out.set(keys::IP_DADDR, ip.daddr)?;
    out.set(keys::IP_PROTOCOL, ip.protocol)?;
    out.set(keys::IP_TOS, ip.tos)?;
    out.set(keys::IP_TTL, ip.ttl)?;
    out.set(keys::IP_TOTLEN, ip.total_len)?;
    out.set(keys::IP_IHL, ip.ihl)?;
    out.set(keys::IP_ID, ip.id)?;

    match packet.transport {
        Some(Transport::Tcp(tcp)) => {
            out.set(keys::TCP_SPORT, tcp.sport)?;
            out.set(keys::TCP_DPORT, tcp.dport)?;
            out.set(keys::TCP_SEQ, tcp.seq)?;
            out.set(keys::TCP_WINDOW, tcp.window)?;
            out.set(keys::TCP_ACK, tcp.has(TCP_ACK))?;
            out.set(keys::TCP_PSH, tcp.has(TCP_PSH))?;
            out.set(keys::TCP_RST, tcp.has(TCP_RST))?;
            out.set(keys::TCP_SYN, tcp.has(TCP_SYN))?;
            out.set(keys::TCP_FIN, tcp.has(TCP_FIN))?;
            out.set(keys::TCP_URG, tcp.has(TCP_URG))?;
        }
        Some(Transport::Udp { sport, dport, len }) => {
            out.set(keys::UDP_SPORT, sport)?;
            out.set(keys::UDP_DPORT, dport)?;
            out.set(keys::UDP_LEN, len)?;
        }
        Some(Transport::Icmp { icmp_type, code }) => {
            out.set(keys::ICMP_TYPE, icmp_type)?;
            out.set(keys::ICMP_CODE, code)?;
        }
        None => {}
    }
    Ok(())
}

/// `BASE` 스테이지
#[derive(Debug, Default)]
pub struct BaseDecoder;

impl Stage for BaseDecoder {
    fn interpret(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<(), IronlogError> {
        let Some(pkt) = inputs.get(0).and_then(Value::as_bytes) else {
            return Ok(());
        };
        match decode(pkt)? {
            Some(packet) => write_outputs(&packet, outputs),
            None => {
                debug!(version = pkt[0] >> 4, "not an IPv4 packet, skipping");
                Ok(())
            }
        }
    }
}

/// `BASE` 플러그인 정의
pub fn definition() -> PluginDefinition {
    PluginDefinition::new(PLUGIN_NAME, StageKind::Filter, |_: &StageConfig| {
        Ok(Box::new(BaseDecoder) as Box<dyn Stage>)
    })
    .declare_schema(input_keys(), output_keys())
}
