//! MySQL Binlog 이벤트 바이너리 파싱 및 프레임 분류
//!
//! 각 이벤트의 레이아웃:
//!   - Timestamp (4 bytes)
//!   - Type (1 byte)
//!   - Server ID (4 bytes)
//!   - Event Length (4 bytes)
//!   - Next Position (4 bytes)
//!   - Flags (2 bytes)
//!   - Event Data (variable)
//!
//! Row 이벤트는 직전 테이블 맵 이벤트의 table_id로 스키마/테이블을
//! 참조하므로, 분류기(`EventDecoder`)가 테이블 맵 캐시를 유지합니다.

use crate::dml::MutationKind;
use crate::error::{Result, StreamError};
use crate::events::{CellValue, EventHeader, EventType, FrameClass, RotateData, RowsData, TableMapData};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// 이벤트 헤더 고정 길이
pub const EVENT_HEADER_SIZE: usize = 19;

/// Binlog 이벤트 페이로드 파서
pub struct BinlogParser;

impl BinlogParser {
    /// 이벤트 헤더 파싱 (고정 19 바이트, little-endian)
    pub fn parse_header(data: &[u8]) -> Result<EventHeader> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(StreamError::BinlogParse(format!(
                "event header too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        Ok(EventHeader {
            timestamp: cursor.read_u32::<LittleEndian>()?,
            type_code: cursor.read_u8()?,
            server_id: cursor.read_u32::<LittleEndian>()?,
            event_length: cursor.read_u32::<LittleEndian>()?,
            next_pos: cursor.read_u32::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// ROTATE 이벤트 파싱: 8바이트 시작 위치 + 다음 파일명
    pub fn parse_rotate(data: &[u8]) -> Result<RotateData> {
        if data.len() < 8 {
            return Err(StreamError::BinlogParse("rotate event too short".to_string()));
        }

        let mut cursor = Cursor::new(data);
        let position = cursor.read_u64::<LittleEndian>()?;
        let next_log_file = String::from_utf8_lossy(&data[8..]).to_string();

        Ok(RotateData {
            position,
            next_log_file,
        })
    }

    /// TABLE_MAP 이벤트 파싱
    pub fn parse_table_map(data: &[u8]) -> Result<TableMapData> {
        let mut cursor = Cursor::new(data);

        let table_id = cursor.read_u48::<LittleEndian>()?;
        let _flags = cursor.read_u16::<LittleEndian>()?;

        let schema_len = cursor.read_u8()? as usize;
        let mut schema_bytes = vec![0u8; schema_len];
        cursor.read_exact(&mut schema_bytes)?;
        let schema = String::from_utf8_lossy(&schema_bytes).to_string();

        let table_len = cursor.read_u8()? as usize;
        let mut table_bytes = vec![0u8; table_len];
        cursor.read_exact(&mut table_bytes)?;
        let table = String::from_utf8_lossy(&table_bytes).to_string();

        let column_count = read_lcb(&mut cursor)? as usize;
        let mut column_types = vec![0u8; column_count];
        cursor.read_exact(&mut column_types)?;

        // 컬럼 메타데이터는 이 계층에서 쓰지 않으므로 건너뜀
        let metadata_length = read_lcb(&mut cursor)? as usize;
        let mut metadata = vec![0u8; metadata_length];
        cursor.read_exact(&mut metadata)?;

        let mut nullable_bitmap = vec![0u8; column_count.div_ceil(8)];
        cursor.read_exact(&mut nullable_bitmap)?;

        Ok(TableMapData {
            table_id,
            schema,
            table,
            column_types,
            nullable_bitmap,
        })
    }

    /// ROWS 이벤트 파싱 (WRITE/UPDATE/DELETE 공통)
    ///
    /// UPDATE 이벤트는 존재 비트맵 두 개(변경 전/후)를 가지며
    /// 행 이미지가 [전, 후, 전, 후, ...] 순서로 나열됩니다.
    /// 여기서는 평탄한 나열 그대로 반환하고, 쌍 맞추기와
    /// 홀수 개수 검증은 DML 변환기가 수행합니다.
    pub fn parse_rows(data: &[u8], is_update: bool) -> Result<RowsData> {
        let mut cursor = Cursor::new(data);

        let table_id = cursor.read_u48::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;

        let column_count = read_lcb(&mut cursor)?;
        let bitmap_bytes = (column_count as usize).div_ceil(8);

        let mut columns_present = vec![0u8; bitmap_bytes];
        cursor.read_exact(&mut columns_present)?;

        let columns_changed = if is_update {
            let mut bitmap = vec![0u8; bitmap_bytes];
            cursor.read_exact(&mut bitmap)?;
            Some(bitmap)
        } else {
            None
        };

        let mut rows = Vec::new();
        loop {
            // 바이트를 소비하지 않는 이미지가 나오면 남은 바이트가
            // 영원히 줄지 않으므로 잘못된 페이로드로 처리
            let before = cursor.position();
            let Some(image) = parse_row_image(&mut cursor, column_count as usize, &columns_present)?
            else {
                break;
            };
            if cursor.position() == before {
                return Err(StreamError::BinlogParse(
                    "row image consumed no bytes in rows event".to_string(),
                ));
            }
            rows.push(image);

            // UPDATE는 변경 전 이미지 뒤에 변경 후 이미지가 이어짐
            if let Some(ref changed) = columns_changed {
                let before = cursor.position();
                let Some(after) = parse_row_image(&mut cursor, column_count as usize, changed)?
                else {
                    break;
                };
                if cursor.position() == before {
                    return Err(StreamError::BinlogParse(
                        "row image consumed no bytes in rows event".to_string(),
                    ));
                }
                rows.push(after);
            }
        }

        Ok(RowsData {
            table_id,
            flags,
            column_count,
            rows,
        })
    }
}

/// LCB (Length-Coded Binary) 읽기
fn read_lcb(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let byte = cursor.read_u8()?;
    match byte {
        0..=0xfa => Ok(byte as u64),
        0xfb => Ok(0),
        0xfc => Ok(cursor.read_u16::<LittleEndian>()? as u64),
        0xfd => Ok(cursor.read_u24::<LittleEndian>()? as u64),
        0xfe => Ok(cursor.read_u64::<LittleEndian>()?),
        0xff => Err(StreamError::BinlogParse("invalid LCB prefix 0xff".to_string())),
    }
}

/// 행 이미지 하나 파싱
///
/// 커서가 데이터 끝이면 None. 비트맵에 없는 컬럼은 Null로 채움.
/// 셀 디코딩은 태그 바이트 기반의 단순화된 구현입니다.
fn parse_row_image(
    cursor: &mut Cursor<&[u8]>,
    column_count: usize,
    present_bitmap: &[u8],
) -> Result<Option<Vec<CellValue>>> {
    if cursor.position() as usize >= cursor.get_ref().len() {
        return Ok(None);
    }

    let mut row = Vec::with_capacity(column_count);
    for col_idx in 0..column_count {
        let byte_idx = col_idx / 8;
        let bit_idx = col_idx % 8;
        let is_present = present_bitmap
            .get(byte_idx)
            .map(|b| b & (1 << bit_idx) != 0)
            .unwrap_or(false);

        if !is_present {
            row.push(CellValue::Null);
            continue;
        }

        row.push(parse_cell(cursor)?);
    }

    Ok(Some(row))
}

/// 셀 값 하나 파싱 (태그 바이트 + 값)
fn parse_cell(cursor: &mut Cursor<&[u8]>) -> Result<CellValue> {
    let tag = cursor
        .read_u8()
        .map_err(|_| StreamError::BinlogParse("truncated row image".to_string()))?;

    let cell = match tag {
        0 => CellValue::Null,
        1 => CellValue::Int8(cursor.read_i8()?),
        2 => CellValue::Int16(cursor.read_i16::<LittleEndian>()?),
        4 => CellValue::Int32(cursor.read_i32::<LittleEndian>()?),
        8 => CellValue::Int64(cursor.read_i64::<LittleEndian>()?),
        16 => CellValue::Double(cursor.read_f64::<LittleEndian>()?),
        32 => {
            let len = read_lcb(cursor)? as usize;
            // 길이는 외부 입력이므로 할당 전에 남은 바이트와 대조
            let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
            if len > remaining {
                return Err(StreamError::BinlogParse(format!(
                    "string cell length {} exceeds {} remaining bytes",
                    len, remaining
                )));
            }
            let mut bytes = vec![0u8; len];
            cursor.read_exact(&mut bytes)?;
            CellValue::String(String::from_utf8_lossy(&bytes).to_string())
        }
        other => CellValue::Bytes(vec![other]),
    };

    Ok(cell)
}

/// 프레임 분류기
///
/// Row 이벤트 해석에 필요한 table_id -> 스키마/테이블 매핑을
/// 내부 캐시로 유지합니다. 테이블 맵 프레임은 캐시만 갱신하고
/// `Ignored`로 분류됩니다.
#[derive(Debug, Default)]
pub struct EventDecoder {
    table_map: HashMap<u64, TableMapData>,
}

impl EventDecoder {
    pub fn new() -> Self {
        EventDecoder::default()
    }

    /// 프레임 하나를 분류
    ///
    /// 알려진 비-행 이벤트는 `Ignored`, 매핑되지 않는 타입 코드는
    /// 데이터를 조용히 버리지 않도록 `UnknownEventType` 에러입니다.
    pub fn classify(&mut self, header: &EventHeader, payload: &[u8]) -> Result<FrameClass> {
        let Some(event_type) = header.event_type() else {
            return Err(StreamError::UnknownEventType(format!(
                "unmapped binlog event type code {}",
                header.type_code
            )));
        };

        match event_type {
            EventType::RotateEvent => {
                let rotate = BinlogParser::parse_rotate(payload)?;
                Ok(FrameClass::Rotation(rotate.next_log_file))
            }
            EventType::TableMapEvent => {
                let table_map = BinlogParser::parse_table_map(payload)?;
                self.table_map.insert(table_map.table_id, table_map);
                Ok(FrameClass::Ignored)
            }
            EventType::WriteRowsEventV1
            | EventType::WriteRowsEventV2
            | EventType::UpdateRowsEventV1
            | EventType::UpdateRowsEventV2
            | EventType::DeleteRowsEventV1
            | EventType::DeleteRowsEventV2 => {
                let kind = MutationKind::from_event_type(event_type);
                let rows_data =
                    BinlogParser::parse_rows(payload, kind == MutationKind::Update)?;

                let table_map = self.table_map.get(&rows_data.table_id).ok_or_else(|| {
                    StreamError::BinlogParse(format!(
                        "rows event references table_id {} without a table map",
                        rows_data.table_id
                    ))
                })?;

                Ok(FrameClass::RowMutation {
                    schema: table_map.schema.clone(),
                    table: table_map.table.clone(),
                    kind,
                    rows: rows_data.rows,
                })
            }
            EventType::QueryEvent
            | EventType::StopEvent
            | EventType::FormatDescriptionEvent
            | EventType::XidEvent
            | EventType::HeartbeatEvent
            | EventType::RowsQueryEvent
            | EventType::GtidEvent
            | EventType::AnonymousGtidEvent
            | EventType::PreviousGtidsEvent => Ok(FrameClass::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn header_bytes(type_code: u8, next_pos: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(1700000000).unwrap(); // timestamp
        buf.write_u8(type_code).unwrap();
        buf.write_u32::<LittleEndian>(99).unwrap(); // server_id
        buf.write_u32::<LittleEndian>(64).unwrap(); // event_length
        buf.write_u32::<LittleEndian>(next_pos).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap(); // flags
        buf
    }

    fn table_map_payload(table_id: u64, schema: &str, table: &str, columns: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u48::<LittleEndian>(table_id).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap(); // flags
        buf.write_u8(schema.len() as u8).unwrap();
        buf.write_all(schema.as_bytes()).unwrap();
        buf.write_u8(table.len() as u8).unwrap();
        buf.write_all(table.as_bytes()).unwrap();
        buf.write_u8(columns).unwrap(); // column_count (LCB, 한 바이트)
        buf.extend(std::iter::repeat(8).take(columns as usize)); // column_types
        buf.write_u8(0).unwrap(); // metadata_length (LCB)
        buf.extend(std::iter::repeat(0).take((columns as usize).div_ceil(8))); // nullable
        buf
    }

    fn rows_payload(table_id: u64, columns: u8, is_update: bool, images: &[&[i64]]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u48::<LittleEndian>(table_id).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap(); // flags
        buf.write_u8(columns).unwrap(); // column_count (LCB)
        let bitmap_bytes = (columns as usize).div_ceil(8);
        buf.extend(std::iter::repeat(0xff).take(bitmap_bytes)); // present
        if is_update {
            buf.extend(std::iter::repeat(0xff).take(bitmap_bytes)); // changed
        }
        for image in images {
            for value in *image {
                buf.write_u8(8).unwrap(); // Int64 태그
                buf.write_i64::<LittleEndian>(*value).unwrap();
            }
        }
        buf
    }

    #[test]
    fn test_parse_header() {
        let bytes = header_bytes(30, 4096);
        let header = BinlogParser::parse_header(&bytes).unwrap();
        assert_eq!(header.timestamp, 1700000000);
        assert_eq!(header.type_code, 30);
        assert_eq!(header.server_id, 99);
        assert_eq!(header.event_length, 64);
        assert_eq!(header.next_pos, 4096);
        assert_eq!(header.event_type(), Some(EventType::WriteRowsEventV2));
    }

    #[test]
    fn test_parse_header_too_short() {
        let err = BinlogParser::parse_header(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, StreamError::BinlogParse(_)));
    }

    #[test]
    fn test_parse_rotate() {
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(4).unwrap();
        payload.write_all(b"mysql-bin.000002").unwrap();

        let rotate = BinlogParser::parse_rotate(&payload).unwrap();
        assert_eq!(rotate.position, 4);
        assert_eq!(rotate.next_log_file, "mysql-bin.000002");
    }

    #[test]
    fn test_parse_table_map() {
        let payload = table_map_payload(42, "testdb", "users", 3);
        let table_map = BinlogParser::parse_table_map(&payload).unwrap();
        assert_eq!(table_map.table_id, 42);
        assert_eq!(table_map.schema, "testdb");
        assert_eq!(table_map.table, "users");
        assert_eq!(table_map.column_types.len(), 3);
    }

    #[test]
    fn test_parse_rows_write() {
        let payload = rows_payload(42, 2, false, &[&[1, 2], &[3, 4]]);
        let rows = BinlogParser::parse_rows(&payload, false).unwrap();
        assert_eq!(rows.table_id, 42);
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.rows[0], vec![CellValue::Int64(1), CellValue::Int64(2)]);
    }

    #[test]
    fn test_parse_rows_update_flat_images() {
        let payload = rows_payload(42, 1, true, &[&[10], &[11], &[20], &[21]]);
        let rows = BinlogParser::parse_rows(&payload, true).unwrap();
        // [전, 후, 전, 후] 평탄한 나열
        assert_eq!(rows.rows.len(), 4);
        assert_eq!(rows.rows[1], vec![CellValue::Int64(11)]);
    }

    #[test]
    fn test_parse_rows_rejects_zero_byte_image() {
        // 존재 비트맵이 모든 컬럼을 비웠는데 바이트가 남아 있으면
        // 이미지가 커서를 전진시키지 못함: 무한 반복 대신 에러
        let mut payload = Vec::new();
        payload.write_u48::<LittleEndian>(42).unwrap();
        payload.write_u16::<LittleEndian>(0).unwrap(); // flags
        payload.write_u8(1).unwrap(); // column_count
        payload.write_u8(0x00).unwrap(); // present bitmap: 컬럼 없음
        payload.write_u8(0xab).unwrap(); // 남은 잡음 바이트

        let err = BinlogParser::parse_rows(&payload, false).unwrap_err();
        assert!(matches!(err, StreamError::BinlogParse(_)));
    }

    #[test]
    fn test_parse_rows_rejects_zero_byte_update_image() {
        // UPDATE의 변경 후 비트맵이 비어 있는 경우도 동일
        let mut payload = Vec::new();
        payload.write_u48::<LittleEndian>(42).unwrap();
        payload.write_u16::<LittleEndian>(0).unwrap(); // flags
        payload.write_u8(1).unwrap(); // column_count
        payload.write_u8(0x01).unwrap(); // present bitmap
        payload.write_u8(0x00).unwrap(); // changed bitmap: 컬럼 없음
        payload.write_u8(8).unwrap(); // 변경 전 이미지: Int64 태그
        payload.write_i64::<LittleEndian>(1).unwrap();
        payload.write_u8(0xab).unwrap(); // 남은 잡음 바이트

        let err = BinlogParser::parse_rows(&payload, true).unwrap_err();
        assert!(matches!(err, StreamError::BinlogParse(_)));
    }

    #[test]
    fn test_string_cell_length_bounded_by_payload() {
        // 8바이트 LCB가 요구하는 거대 길이는 할당 전에 거부
        let mut data = vec![32u8, 0xfe];
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = parse_cell(&mut Cursor::new(data.as_slice())).unwrap_err();
        assert!(matches!(err, StreamError::BinlogParse(_)));

        // 남은 바이트보다 조금 큰 길이도 동일
        let data: &[u8] = &[32, 5, b'a', b'b'];
        let err = parse_cell(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, StreamError::BinlogParse(_)));

        // 정확히 맞는 길이는 정상 파싱
        let data: &[u8] = &[32, 2, b'o', b'k'];
        let cell = parse_cell(&mut Cursor::new(data)).unwrap();
        assert_eq!(cell, CellValue::String("ok".to_string()));
    }

    #[test]
    fn test_read_lcb() {
        let data: &[u8] = &[0x0a];
        assert_eq!(read_lcb(&mut Cursor::new(data)).unwrap(), 10);

        let data: &[u8] = &[0xfc, 0x34, 0x12];
        assert_eq!(read_lcb(&mut Cursor::new(data)).unwrap(), 0x1234);

        let data: &[u8] = &[0xff];
        assert!(read_lcb(&mut Cursor::new(data)).is_err());
    }

    #[test]
    fn test_classify_rotation() {
        let mut decoder = EventDecoder::new();
        let header = BinlogParser::parse_header(&header_bytes(4, 0)).unwrap();

        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(4).unwrap();
        payload.write_all(b"mysql-bin.000007").unwrap();

        match decoder.classify(&header, &payload).unwrap() {
            FrameClass::Rotation(file) => assert_eq!(file, "mysql-bin.000007"),
            other => panic!("unexpected class: {:?}", other),
        }
    }

    #[test]
    fn test_classify_rows_after_table_map() {
        let mut decoder = EventDecoder::new();

        let map_header = BinlogParser::parse_header(&header_bytes(19, 100)).unwrap();
        let class = decoder
            .classify(&map_header, &table_map_payload(7, "testdb", "orders", 2))
            .unwrap();
        assert!(matches!(class, FrameClass::Ignored));

        let rows_header = BinlogParser::parse_header(&header_bytes(30, 200)).unwrap();
        let payload = rows_payload(7, 2, false, &[&[5, 6]]);
        match decoder.classify(&rows_header, &payload).unwrap() {
            FrameClass::RowMutation {
                schema,
                table,
                kind,
                rows,
            } => {
                assert_eq!(schema, "testdb");
                assert_eq!(table, "orders");
                assert_eq!(kind, MutationKind::Insert);
                assert_eq!(rows.len(), 1);
            }
            other => panic!("unexpected class: {:?}", other),
        }
    }

    #[test]
    fn test_classify_rows_without_table_map() {
        let mut decoder = EventDecoder::new();
        let header = BinlogParser::parse_header(&header_bytes(32, 200)).unwrap();
        let payload = rows_payload(99, 1, false, &[&[1]]);

        let err = decoder.classify(&header, &payload).unwrap_err();
        assert!(matches!(err, StreamError::BinlogParse(_)));
    }

    #[test]
    fn test_classify_known_non_row_is_ignored() {
        let mut decoder = EventDecoder::new();
        for code in [2u8, 16, 27, 33] {
            let header = BinlogParser::parse_header(&header_bytes(code, 300)).unwrap();
            let class = decoder.classify(&header, &[]).unwrap();
            assert!(matches!(class, FrameClass::Ignored));
        }
    }

    #[test]
    fn test_classify_unknown_type_is_error() {
        let mut decoder = EventDecoder::new();
        // v0 row 이벤트(20)와 완전히 미지의 코드(200) 모두 에러
        for code in [20u8, 200] {
            let header = BinlogParser::parse_header(&header_bytes(code, 300)).unwrap();
            let err = decoder.classify(&header, &[]).unwrap_err();
            assert!(matches!(err, StreamError::UnknownEventType(_)));
        }
    }
}
