//! MySQL Binlog 변경 이벤트 수집 코어
//!
//! 온라인 스키마 변경 도구의 가장 낮은 계층입니다. 소스 MySQL에
//! 합성 레플리카로 붙어 binlog 이벤트를 해석하고, 행 변경을
//! 소스 순서 그대로 유계 채널로 내보내며, 스트림 소비 위치를
//! 다른 스레드가 조회할 수 있게 추적합니다.
//! 주요 기능:
//! - 복제 세션 수립 (핸드셰이크, 레플리카 등록)
//! - Binlog 이벤트 파싱 및 분류
//! - Row 이벤트 -> 변경 레코드 변환 (UPDATE 전/후 이미지 쌍 맞추기)
//! - 로테이션을 가로지르는 좌표 추적과 재개 지점 제공

pub mod auth;
pub mod binlog;
pub mod connection;
pub mod coordinates;
pub mod dml;
pub mod error;
pub mod events;
pub mod protocol;
pub mod reader;

pub use connection::{ConnectionConfig, MySqlConnection};
pub use coordinates::{BinlogCoordinates, CoordinateTracker};
pub use dml::{ChangeRecord, ColumnValues, DmlEvent, MutationKind};
pub use error::{Result, StreamError};
pub use events::{CellValue, EventType, FrameClass};
pub use reader::BinlogReader;
