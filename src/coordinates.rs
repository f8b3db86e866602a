//! Binlog 스트림 좌표 추적
//!
//! 좌표는 binlog 파일명 + 바이트 위치의 쌍입니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치
//! 스트림 스레드가 좌표를 전진시키는 동안 다른 스레드가
//! 진행 상황(복제 지연 계산, 재시작 지점 저장)을 조회합니다.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 복제 스트림의 한 지점 (binlog 파일명 + 바이트 위치)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogCoordinates {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub log_file: String,
    /// 파일 내 바이트 위치
    pub log_pos: u64,
}

impl BinlogCoordinates {
    pub fn new(log_file: impl Into<String>, log_pos: u64) -> Self {
        BinlogCoordinates {
            log_file: log_file.into(),
            log_pos,
        }
    }

    /// 파일명이 비어 있으면 유효한 시작점이 아님
    pub fn is_empty(&self) -> bool {
        self.log_file.is_empty()
    }

    /// 파일명에서 시퀀스 번호 추출 ("mysql-bin.000123" -> 123)
    pub fn file_sequence(&self) -> Option<u64> {
        self.log_file.rsplit('.').next().and_then(|s| s.parse().ok())
    }

    /// 다른 좌표보다 앞이거나 같은 위치인지 비교
    ///
    /// 로테이션으로 파일명이 달라도 비교가 정의되어야 하므로
    /// 파일 시퀀스 번호를 우선 사용하고, 둘 중 하나라도 시퀀스가
    /// 없으면 파일명 사전순으로 비교합니다.
    pub fn smaller_than_or_equals(&self, other: &BinlogCoordinates) -> bool {
        !matches!(self.cmp(other), Ordering::Greater)
    }
}

impl Ord for BinlogCoordinates {
    fn cmp(&self, other: &Self) -> Ordering {
        let file_order = match (self.file_sequence(), other.file_sequence()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.log_file.cmp(&other.log_file),
        };
        file_order.then(self.log_pos.cmp(&other.log_pos))
    }
}

impl PartialOrd for BinlogCoordinates {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BinlogCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_pos)
    }
}

/// 스트림 소비 위치의 공유 커서
///
/// 스트림 펌프만 쓰기를 수행하고, 다른 스레드는 `snapshot()`으로
/// 복사본을 읽습니다. 모든 접근이 하나의 락 안에서 이루어지므로
/// 파일명과 위치가 반쯤 갱신된 상태는 관측되지 않습니다.
/// 락을 잡은 채로 I/O나 채널 전송을 하지 않습니다.
#[derive(Debug)]
pub struct CoordinateTracker {
    current: Mutex<BinlogCoordinates>,
}

impl CoordinateTracker {
    pub fn new(initial: BinlogCoordinates) -> Self {
        CoordinateTracker {
            current: Mutex::new(initial),
        }
    }

    /// 바이트 위치만 전진 (모든 이벤트 수신 시)
    pub fn advance_offset(&self, log_pos: u64) {
        self.current.lock().log_pos = log_pos;
    }

    /// 파일명만 변경 (로테이션 이벤트 수신 시)
    ///
    /// 위치는 초기화하지 않습니다. 다음 이벤트 헤더의 위치가
    /// 새 파일에서의 정확한 커서가 됩니다.
    pub fn advance_file(&self, log_file: impl Into<String>) {
        self.current.lock().log_file = log_file.into();
    }

    /// 현재 좌표의 복사본 반환 (다른 스레드에서 호출 가능)
    pub fn snapshot(&self) -> BinlogCoordinates {
        self.current.lock().clone()
    }

    /// 재연결 시 커서를 새 시작점으로 재설정
    pub fn reset(&self, coordinates: BinlogCoordinates) {
        *self.current.lock() = coordinates;
    }
}
