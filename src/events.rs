//! MySQL Binlog 이벤트 타입 및 데이터 구조 정의

use crate::dml::MutationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MySQL Binlog 이벤트 타입 (헤더의 타입 코드)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// 쿼리 이벤트 (DDL, BEGIN/COMMIT)
    QueryEvent = 2,
    /// 스트림 정지
    StopEvent = 3,
    /// 로테이션 이벤트 (새 binlog 파일)
    RotateEvent = 4,
    /// 포맷 기술 이벤트 (binlog 파일 선두)
    FormatDescriptionEvent = 15,
    /// 트랜잭션 커밋 (XID)
    XidEvent = 16,
    /// 테이블 맵 이벤트 (table_id -> 스키마/테이블)
    TableMapEvent = 19,
    /// WRITE_ROWS v1 (INSERT)
    WriteRowsEventV1 = 23,
    /// UPDATE_ROWS v1 (UPDATE)
    UpdateRowsEventV1 = 24,
    /// DELETE_ROWS v1 (DELETE)
    DeleteRowsEventV1 = 25,
    /// 하트비트 (연결 유지)
    HeartbeatEvent = 27,
    /// Rows Query 이벤트 (원본 쿼리 문자열)
    RowsQueryEvent = 29,
    /// WRITE_ROWS v2 (INSERT)
    WriteRowsEventV2 = 30,
    /// UPDATE_ROWS v2 (UPDATE)
    UpdateRowsEventV2 = 31,
    /// DELETE_ROWS v2 (DELETE)
    DeleteRowsEventV2 = 32,
    /// GTID 이벤트
    GtidEvent = 33,
    /// 익명 GTID 이벤트
    AnonymousGtidEvent = 34,
    /// PREVIOUS_GTIDS 이벤트
    PreviousGtidsEvent = 35,
}

impl EventType {
    /// 타입 코드 매핑. 모르는 코드는 None (분류 단계에서 에러 처리)
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            2 => Some(EventType::QueryEvent),
            3 => Some(EventType::StopEvent),
            4 => Some(EventType::RotateEvent),
            15 => Some(EventType::FormatDescriptionEvent),
            16 => Some(EventType::XidEvent),
            19 => Some(EventType::TableMapEvent),
            23 => Some(EventType::WriteRowsEventV1),
            24 => Some(EventType::UpdateRowsEventV1),
            25 => Some(EventType::DeleteRowsEventV1),
            27 => Some(EventType::HeartbeatEvent),
            29 => Some(EventType::RowsQueryEvent),
            30 => Some(EventType::WriteRowsEventV2),
            31 => Some(EventType::UpdateRowsEventV2),
            32 => Some(EventType::DeleteRowsEventV2),
            33 => Some(EventType::GtidEvent),
            34 => Some(EventType::AnonymousGtidEvent),
            35 => Some(EventType::PreviousGtidsEvent),
            _ => None,
        }
    }
}

/// Binlog 이벤트 헤더 (고정 19 바이트)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입 코드 (원시 값)
    pub type_code: u8,
    /// 이벤트를 기록한 서버 ID
    pub server_id: u32,
    /// 이벤트 전체 길이 (헤더 포함, 바이트)
    pub event_length: u32,
    /// 이벤트 종료 위치 (파일 내 절대 바이트 오프셋)
    pub next_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
}

impl EventHeader {
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_u8(self.type_code)
    }
}

/// 로테이션 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateData {
    /// 새 파일에서의 시작 위치
    pub position: u64,
    /// 다음 바이너리 로그 파일명
    pub next_log_file: String,
}

/// 테이블 맵 이벤트 데이터 (row 이벤트 해석에 필요한 스키마 정보)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapData {
    /// 테이블 ID (이후 row 이벤트가 이 ID로 참조)
    pub table_id: u64,
    /// 데이터베이스명
    pub schema: String,
    /// 테이블명
    pub table: String,
    /// 컬럼 타입 코드들
    pub column_types: Vec<u8>,
    /// nullable 비트맵
    pub nullable_bitmap: Vec<u8>,
}

/// ROWS 이벤트 데이터 (INSERT/UPDATE/DELETE 공통)
///
/// UPDATE의 행 이미지는 [전, 후, 전, 후, ...] 순서의 평탄한
/// 나열로 도착합니다. 쌍 맞추기는 DML 변환기의 책임입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowsData {
    /// 테이블 ID (직전 테이블 맵 이벤트 참조)
    pub table_id: u64,
    /// 이벤트 플래그
    pub flags: u16,
    /// 컬럼 개수
    pub column_count: u64,
    /// 행 이미지들 (위치 기반 컬럼 값 나열)
    pub rows: Vec<Vec<CellValue>>,
}

/// 셀 값 (다양한 MySQL 타입 지원)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Date(String),
    Time(String),
    Decimal(String),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn as_string(&self) -> Option<String> {
        match self {
            CellValue::String(s) => Some(s.clone()),
            CellValue::Int64(i) => Some(i.to_string()),
            CellValue::UInt64(u) => Some(u.to_string()),
            CellValue::Double(d) => Some(d.to_string()),
            CellValue::DateTime(dt) => Some(dt.to_rfc3339()),
            CellValue::Null => Some("NULL".to_string()),
            _ => None,
        }
    }
}

/// 프레임 분류 결과
///
/// 닫힌 합 타입으로 두어 새 프레임 종류가 생기면 모든 처리
/// 지점에서 컴파일 타임에 매칭이 강제됩니다.
#[derive(Debug, Clone)]
pub enum FrameClass {
    /// 스트림이 새 binlog 파일로 이동
    Rotation(String),
    /// 행 변경 이벤트
    RowMutation {
        schema: String,
        table: String,
        kind: MutationKind,
        rows: Vec<Vec<CellValue>>,
    },
    /// 알려진 비-행 이벤트 (하트비트, 쿼리, GTID 등)
    Ignored,
}
