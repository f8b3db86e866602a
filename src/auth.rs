//! MySQL 인증 처리 (mysql_native_password)

use crate::error::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::io::Write;

/// Client capability flags
pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 1;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const PROTOCOL_41: u32 = 512;
    pub const SECURE_CONNECTION: u32 = 32768;
    pub const MULTI_STATEMENTS: u32 = 1 << 16;
    pub const MULTI_RESULTS: u32 = 1 << 17;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
}

fn sha1(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Native password 스크램블 계산
///
/// XOR(SHA1(password), SHA1(scramble + SHA1(SHA1(password))))
pub fn scramble_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);

    let mut seed = scramble.to_vec();
    seed.extend_from_slice(&stage2);
    let stage3 = sha1(&seed);

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Handshake response 패킷 본문 생성
pub fn handshake_response(
    username: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8],
    collation: u8,
) -> Result<Vec<u8>> {
    let mut flags = capabilities::LONG_PASSWORD
        | capabilities::LONG_FLAG
        | capabilities::PROTOCOL_41
        | capabilities::SECURE_CONNECTION
        | capabilities::MULTI_STATEMENTS
        | capabilities::MULTI_RESULTS
        | capabilities::PLUGIN_AUTH;
    if database.is_some() {
        flags |= capabilities::CONNECT_WITH_DB;
    }

    let mut buffer = Vec::new();
    buffer.write_u32::<LittleEndian>(flags)?;
    buffer.write_u32::<LittleEndian>(0)?; // max packet size: 서버 기본값
    buffer.write_u8(collation)?;
    buffer.write_all(&[0u8; 23])?; // reserved

    buffer.write_all(username.as_bytes())?;
    buffer.write_u8(0)?;

    let auth_data = scramble_password(password, scramble);
    buffer.write_u8(auth_data.len() as u8)?;
    buffer.write_all(&auth_data)?;

    if let Some(db) = database {
        buffer.write_all(db.as_bytes())?;
        buffer.write_u8(0)?;
    }

    buffer.write_all(b"mysql_native_password")?;
    buffer.write_u8(0)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scramble_empty_password() {
        assert!(scramble_password("", &[1, 2, 3, 4]).is_empty());
    }

    #[test]
    fn test_scramble_length() {
        let scramble = [0x40, 0x3b, 0x57, 0x68, 0x3a, 0x77, 0x23, 0x29];
        let response = scramble_password("password", &scramble);
        assert_eq!(response.len(), 20); // SHA1 출력 길이
    }

    #[test]
    fn test_scramble_deterministic() {
        let scramble = [9u8; 20];
        assert_eq!(
            scramble_password("secret", &scramble),
            scramble_password("secret", &scramble)
        );
        assert_ne!(
            scramble_password("secret", &scramble),
            scramble_password("other", &scramble)
        );
    }

    #[test]
    fn test_handshake_response() {
        let scramble = [7u8; 20];
        let packet = handshake_response("repl", "password", Some("testdb"), &scramble, 33).unwrap();

        // capability flags + 고정 필드 + 사용자명/비밀번호/DB/플러그인명
        assert!(packet.len() > 50);
        let flags = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        assert_ne!(flags & capabilities::CONNECT_WITH_DB, 0);

        let without_db = handshake_response("repl", "password", None, &scramble, 33).unwrap();
        let flags = u32::from_le_bytes([
            without_db[0],
            without_db[1],
            without_db[2],
            without_db[3],
        ]);
        assert_eq!(flags & capabilities::CONNECT_WITH_DB, 0);
    }
}
