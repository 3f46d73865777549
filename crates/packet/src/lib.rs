//! Ironlog 패킷 스테이지
//!
//! - [`ulog`]: ULOG 레코드 디코딩, `ULOG` 소스 스테이지, 데이터그램 진입점
//! - [`base`]: IPv4/TCP/UDP/ICMP 헤더를 키로 풀어내는 `BASE` 스테이지

pub mod base;
pub mod ulog;

pub use base::{BaseDecoder, DecodedPacket, Ipv4Header, TcpHeader, Transport};
pub use ulog::{DatagramStats, Records, UlogRecord, UlogSource, ingest_datagram, records};
