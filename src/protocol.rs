//! MySQL client/server 프로토콜 패킷 처리
//!
//! 모든 패킷은 3바이트 길이 + 1바이트 시퀀스 번호 헤더 뒤에
//! 본문이 이어집니다. 이 계층은 패킷 경계만 다루고 본문 해석은
//! 호출자의 몫입니다.

use crate::error::{Result, StreamError};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// ERR 패킷 선두 바이트
const ERR_PACKET_MARKER: u8 = 0xff;
/// OK 패킷 선두 바이트
const OK_PACKET_MARKER: u8 = 0x00;
/// EOF 패킷 선두 바이트
const EOF_PACKET_MARKER: u8 = 0xfe;

/// MySQL 패킷 채널 (TCP 위의 패킷 경계 관리)
pub struct PacketChannel {
    stream: TcpStream,
}

impl PacketChannel {
    /// TCP 연결 수립
    pub async fn connect(hostname: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", hostname, port);
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            StreamError::ConnectionError(format!("failed to connect to {}: {}", addr, e))
        })?;

        debug!("connected to MySQL at {}", addr);
        Ok(PacketChannel { stream })
    }

    /// 패킷 하나 읽기 (헤더를 벗긴 본문 반환)
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| StreamError::FetchError(format!("failed to read packet header: {}", e)))?;

        let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let _sequence = header[3];

        let mut body = vec![0u8; length];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| StreamError::FetchError(format!("failed to read packet body: {}", e)))?;

        Ok(body)
    }

    /// 패킷 하나 쓰기
    pub async fn write_packet(&mut self, body: &[u8], sequence: u8) -> Result<()> {
        let length = body.len() as u32;
        let header = [
            (length & 0xff) as u8,
            ((length >> 8) & 0xff) as u8,
            ((length >> 16) & 0xff) as u8,
            sequence,
        ];

        self.stream
            .write_all(&header)
            .await
            .map_err(|e| StreamError::IoError(format!("failed to write packet header: {}", e)))?;
        self.stream
            .write_all(body)
            .await
            .map_err(|e| StreamError::IoError(format!("failed to write packet body: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| StreamError::IoError(format!("failed to flush: {}", e)))?;

        Ok(())
    }

    /// 세션 종료 (베스트 에포트)
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| StreamError::IoError(format!("failed to shutdown stream: {}", e)))
    }
}

/// 서버 인사 패킷 (initial handshake)
#[derive(Debug)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
}

impl Greeting {
    /// Initial handshake 패킷 파싱 (protocol version 10)
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);

        let protocol_version = read_u8(&mut cursor, "protocol version")?;
        let server_version = read_null_terminated(&mut cursor)?;
        let thread_id = read_u32(&mut cursor, "thread id")?;

        // scramble 전반부 8바이트 + 필러 1바이트
        let mut scramble = vec![0u8; 8];
        read_exact(&mut cursor, &mut scramble, "scramble part 1")?;
        read_u8(&mut cursor, "filler")?;

        let capabilities_lower = read_u16(&mut cursor, "capabilities lower")?;
        let server_collation = read_u8(&mut cursor, "collation")?;
        let server_status = read_u16(&mut cursor, "status flags")?;
        let capabilities_upper = read_u16(&mut cursor, "capabilities upper")?;
        let server_capabilities = (capabilities_upper as u32) << 16 | capabilities_lower as u32;

        let auth_data_len = read_u8(&mut cursor, "auth data length")?;
        let mut reserved = [0u8; 10];
        read_exact(&mut cursor, &mut reserved, "reserved")?;

        // scramble 후반부 (최소 13바이트, 마지막 null 바이트 제외)
        let part2_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut scramble_part2 = vec![0u8; part2_len];
        read_exact(&mut cursor, &mut scramble_part2, "scramble part 2")?;
        scramble.extend_from_slice(&scramble_part2[..part2_len - 1]);

        Ok(Greeting {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            server_capabilities,
            server_collation,
            server_status,
        })
    }
}

fn read_u8(cursor: &mut std::io::Cursor<&[u8]>, what: &str) -> Result<u8> {
    ReadBytesExt::read_u8(cursor)
        .map_err(|e| StreamError::ProtocolError(format!("failed to read {}: {}", what, e)))
}

fn read_u16(cursor: &mut std::io::Cursor<&[u8]>, what: &str) -> Result<u16> {
    ReadBytesExt::read_u16::<LittleEndian>(cursor)
        .map_err(|e| StreamError::ProtocolError(format!("failed to read {}: {}", what, e)))
}

fn read_u32(cursor: &mut std::io::Cursor<&[u8]>, what: &str) -> Result<u32> {
    ReadBytesExt::read_u32::<LittleEndian>(cursor)
        .map_err(|e| StreamError::ProtocolError(format!("failed to read {}: {}", what, e)))
}

fn read_exact(cursor: &mut std::io::Cursor<&[u8]>, buf: &mut [u8], what: &str) -> Result<()> {
    Read::read_exact(cursor, buf)
        .map_err(|e| StreamError::ProtocolError(format!("failed to read {}: {}", what, e)))
}

/// null로 끝나는 문자열 읽기
fn read_null_terminated(cursor: &mut std::io::Cursor<&[u8]>) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = read_u8(cursor, "string byte")?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes)
        .map_err(|e| StreamError::ProtocolError(format!("invalid UTF-8 in string: {}", e)))
}

/// ERR 패킷 여부
pub fn is_error_packet(data: &[u8]) -> bool {
    data.first() == Some(&ERR_PACKET_MARKER)
}

/// OK 패킷 여부
pub fn is_ok_packet(data: &[u8]) -> bool {
    data.first() == Some(&OK_PACKET_MARKER)
}

/// EOF 패킷 여부 (0xFE, 본문 9바이트 미만)
pub fn is_eof_packet(data: &[u8]) -> bool {
    data.first() == Some(&EOF_PACKET_MARKER) && data.len() < 9
}

/// ERR 패킷에서 에러 코드와 메시지 추출
pub fn parse_error_packet(data: &[u8]) -> (u16, String) {
    if data.len() < 3 {
        return (0, "malformed error packet".to_string());
    }
    let code = u16::from_le_bytes([data[1], data[2]]);
    // sql state marker('#') + 5바이트 상태 코드는 건너뜀
    let message_start = if data.len() > 9 && data[3] == b'#' { 9 } else { 3 };
    let message = String::from_utf8_lossy(&data[message_start.min(data.len())..]).to_string();
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_markers() {
        assert!(is_error_packet(&[0xff, 0x01]));
        assert!(!is_error_packet(&[0x00, 0x01]));
        assert!(is_ok_packet(&[0x00, 0x01]));
        assert!(!is_ok_packet(&[]));
        assert!(is_eof_packet(&[0xfe, 0x00, 0x00]));
        assert!(!is_eof_packet(&[0xfe; 20]));
    }

    #[test]
    fn test_parse_error_packet() {
        // 0xff + code 1236 + '#' + "HY000" + 메시지
        let mut packet = vec![0xff];
        packet.extend_from_slice(&1236u16.to_le_bytes());
        packet.push(b'#');
        packet.extend_from_slice(b"HY000");
        packet.extend_from_slice(b"Could not find first log file name");

        let (code, message) = parse_error_packet(&packet);
        assert_eq!(code, 1236);
        assert_eq!(message, "Could not find first log file name");
    }

    #[test]
    fn test_greeting_parse() {
        let mut data = Vec::new();
        data.push(10u8); // protocol version
        data.extend_from_slice(b"8.0.36\0");
        data.extend_from_slice(&7u32.to_le_bytes()); // thread id
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]); // scramble part 1
        data.push(0); // filler
        data.extend_from_slice(&0xf7ffu16.to_le_bytes()); // capabilities lower
        data.push(33); // collation
        data.extend_from_slice(&2u16.to_le_bytes()); // status
        data.extend_from_slice(&0x8000u16.to_le_bytes()); // capabilities upper
        data.push(21); // auth data length
        data.extend_from_slice(&[0u8; 10]); // reserved
        data.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0]); // part 2

        let greeting = Greeting::parse(&data).unwrap();
        assert_eq!(greeting.protocol_version, 10);
        assert_eq!(greeting.server_version, "8.0.36");
        assert_eq!(greeting.thread_id, 7);
        assert_eq!(greeting.scramble.len(), 20);
        assert_eq!(greeting.server_collation, 33);
    }
}
