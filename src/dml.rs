//! Row 이벤트를 구조화된 변경 레코드로 변환
//!
//! 하나의 row 이벤트는 0개 이상의 변경 레코드를 만듭니다.
//! INSERT/DELETE는 행 이미지마다 하나, UPDATE는 인접한 두 이미지
//! (변경 전 WHERE + 변경 후 SET)가 하나의 레코드가 됩니다.

use crate::coordinates::BinlogCoordinates;
use crate::error::{Result, StreamError};
use crate::events::{CellValue, EventType};
use serde::{Deserialize, Serialize};

/// 행 변경의 종류
///
/// `NotDml`은 row 이벤트가 아닌 타입을 뜻하는 센티널로,
/// 구성된 `DmlEvent`에는 절대 실리지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    NotDml,
}

impl MutationKind {
    /// 이벤트 타입을 변경 종류로 매핑 (v1/v2 동일 취급)
    pub fn from_event_type(event_type: EventType) -> Self {
        match event_type {
            EventType::WriteRowsEventV1 | EventType::WriteRowsEventV2 => MutationKind::Insert,
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEventV2 => MutationKind::Update,
            EventType::DeleteRowsEventV1 | EventType::DeleteRowsEventV2 => MutationKind::Delete,
            _ => MutationKind::NotDml,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Insert => "INSERT",
            MutationKind::Update => "UPDATE",
            MutationKind::Delete => "DELETE",
            MutationKind::NotDml => "NODML",
        }
    }
}

/// 위치 기반 컬럼 값 나열 (이 계층에는 컬럼명이 없음)
///
/// 테이블 스키마와의 위치 대응은 호출자의 책임입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValues(pub Vec<CellValue>);

impl ColumnValues {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CellValue> {
        self.0.get(index)
    }
}

impl From<Vec<CellValue>> for ColumnValues {
    fn from(values: Vec<CellValue>) -> Self {
        ColumnValues(values)
    }
}

/// 하나의 커밋된 행 변경
///
/// INSERT는 `new_columns`만, DELETE는 `where_columns`만,
/// UPDATE는 같은 논리 행의 변경 전/후 이미지를 둘 다 가집니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmlEvent {
    /// 데이터베이스명
    pub schema: String,
    /// 테이블명
    pub table: String,
    /// 변경 종류
    pub kind: MutationKind,
    /// 변경 전 이미지 (UPDATE/DELETE)
    pub where_columns: Option<ColumnValues>,
    /// 변경 후 이미지 (INSERT/UPDATE)
    pub new_columns: Option<ColumnValues>,
}

impl DmlEvent {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, kind: MutationKind) -> Self {
        DmlEvent {
            schema: schema.into(),
            table: table.into(),
            kind,
            where_columns: None,
            new_columns: None,
        }
    }
}

/// 좌표가 찍힌 변경 레코드 (출력 채널의 단위)
///
/// 생성 이후 불변이며, 적용자(applier)가 채널에서 정확히 한 번
/// 소비합니다. 같은 프레임에서 나온 레코드는 모두 같은 좌표를
/// 가집니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// 레코드를 만든 프레임의 좌표
    pub coordinates: BinlogCoordinates,
    /// 변경 내용
    pub dml_event: DmlEvent,
}

/// Row 이벤트 하나를 변경 레코드들로 변환
///
/// UPDATE의 행 이미지는 짝수 인덱스가 변경 전, 홀수 인덱스가
/// 변경 후입니다. 이미지 개수가 홀수이면 마지막 이미지를 버리는
/// 대신 `MalformedUpdateEvent`로 실패합니다.
pub fn translate(
    coordinates: &BinlogCoordinates,
    schema: &str,
    table: &str,
    kind: MutationKind,
    rows: &[Vec<CellValue>],
) -> Result<Vec<ChangeRecord>> {
    let mut records = Vec::new();

    match kind {
        MutationKind::Insert | MutationKind::Delete => {
            for row in rows {
                let mut dml_event = DmlEvent::new(schema, table, kind);
                let values = ColumnValues::from(row.clone());
                if kind == MutationKind::Insert {
                    dml_event.new_columns = Some(values);
                } else {
                    dml_event.where_columns = Some(values);
                }
                records.push(ChangeRecord {
                    coordinates: coordinates.clone(),
                    dml_event,
                });
            }
        }
        MutationKind::Update => {
            if rows.len() % 2 != 0 {
                return Err(StreamError::MalformedUpdateEvent {
                    table: format!("{}.{}", schema, table),
                    images: rows.len(),
                });
            }
            for pair in rows.chunks_exact(2) {
                let mut dml_event = DmlEvent::new(schema, table, kind);
                dml_event.where_columns = Some(ColumnValues::from(pair[0].clone()));
                dml_event.new_columns = Some(ColumnValues::from(pair[1].clone()));
                records.push(ChangeRecord {
                    coordinates: coordinates.clone(),
                    dml_event,
                });
            }
        }
        MutationKind::NotDml => {
            return Err(StreamError::UnknownEventType(format!(
                "row event for {}.{} carries no DML kind",
                schema, table
            )));
        }
    }

    Ok(records)
}
