//! 소스 MySQL 접속 설정과 위치 조회 헬퍼
//!
//! 복제 스트림 자체는 `reader`가 저수준 프로토콜로 열지만,
//! 서버의 현재 binlog 위치 확인과 `binlog_format` 검증은
//! 일반 SQL 세션으로 수행합니다.

use crate::coordinates::BinlogCoordinates;
use crate::error::{Result, StreamError};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, SslOpts};
use std::time::Duration;

/// MySQL 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    /// 레플리카 등록에 사용할 고유 서버 ID
    pub server_id: u32,
    /// 전송 구간 암호화 사용 여부 (SQL 세션에 적용)
    pub use_tls: bool,
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 1,
            use_tls: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    fn build_opts(&self) -> Opts {
        let ssl_opts = if self.use_tls {
            Some(SslOpts::default())
        } else {
            None
        };

        OptsBuilder::default()
            .ip_or_hostname(self.hostname.clone())
            .tcp_port(self.port)
            .user(Some(self.username.clone()))
            .pass(Some(self.password.clone()))
            .db_name(self.database.clone())
            .ssl_opts(ssl_opts)
            .into()
    }
}

/// SQL 세션 래퍼 (위치 조회 전용)
pub struct MySqlConnection {
    conn: Conn,
}

impl MySqlConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn = Conn::new(config.build_opts()).await.map_err(|e| {
            StreamError::ConnectionError(format!("failed to connect to MySQL: {}", e))
        })?;

        Ok(MySqlConnection { conn })
    }

    /// 서버의 현재 binlog 파일/위치 조회
    ///
    /// 스트림 시작 좌표가 영속 상태에 없을 때 호출자가 사용합니다.
    pub async fn get_binlog_status(&mut self) -> Result<BinlogCoordinates> {
        let result: Vec<(String, u64, String, String, String)> = self
            .conn
            .query("SHOW MASTER STATUS")
            .await
            .map_err(|e| StreamError::QueryError(format!("failed to query binlog status: {}", e)))?;

        let (file, position, ..) = result
            .into_iter()
            .next()
            .ok_or_else(|| StreamError::QueryError("no binlog status available".to_string()))?;

        Ok(BinlogCoordinates::new(file, position))
    }

    /// Binlog 형식 확인 (row 이벤트 스트림에는 ROW 필요)
    pub async fn get_binlog_format(&mut self) -> Result<String> {
        let result: Vec<(String, String)> = self
            .conn
            .query("SHOW GLOBAL VARIABLES LIKE 'binlog_format'")
            .await
            .map_err(|e| StreamError::QueryError(format!("failed to query binlog format: {}", e)))?;

        result
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .ok_or_else(|| StreamError::QueryError("binlog_format not found".to_string()))
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| StreamError::ConnectionError(format!("failed to disconnect: {}", e)))
    }
}
