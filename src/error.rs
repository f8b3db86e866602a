//! Binlog 스트림 관련 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("빈 binlog 좌표로는 스트림을 시작할 수 없습니다")]
    EmptyCoordinates,

    #[error("이벤트 수신 에러: {0}")]
    FetchError(String),

    #[error("알 수 없는 이벤트 타입: {0}")]
    UnknownEventType(String),

    #[error("잘못된 UPDATE 이벤트 ({table}): 행 이미지 개수가 홀수입니다 ({images})")]
    MalformedUpdateEvent { table: String, images: usize },

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParse(String),

    #[error("프로토콜 에러: {0}")]
    ProtocolError(String),

    #[error("출력 채널이 닫혔습니다")]
    ChannelClosed,

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
