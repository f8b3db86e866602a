//! Binlog 스트림 리더
//!
//! 소스 MySQL에 합성 레플리카로 등록해 binlog 이벤트를 받아
//! 변경 레코드로 변환하고, 순서를 유지한 채 유계 출력 채널로
//! 내보냅니다. 채널이 가득 차면 전송이 블록되는 것이 유일한
//! 흐름 제어 장치입니다. 별도의 속도 제한은 없습니다.
//!
//! 재시도/재접속 정책은 이 계층에 없습니다. 펌프 루프의 반환값이
//! 유일한 종료 신호이며, 오케스트레이터가 `current_coordinates()`
//! 기준으로 재접속 여부를 결정합니다.

use crate::binlog::{BinlogParser, EventDecoder, EVENT_HEADER_SIZE};
use crate::connection::ConnectionConfig;
use crate::coordinates::{BinlogCoordinates, CoordinateTracker};
use crate::dml::{self, ChangeRecord, MutationKind};
use crate::error::{Result, StreamError};
use crate::events::{CellValue, FrameClass};
use crate::protocol::{self, Greeting, PacketChannel};
use crate::auth;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// COM_QUERY 명령어 코드
const COM_QUERY: u8 = 0x03;
/// COM_BINLOG_DUMP 명령어 코드
const COM_BINLOG_DUMP: u8 = 0x12;

/// 패킷 처리 결과 (펌프 루프의 계속/종료 구분)
#[derive(Debug)]
enum FrameOutcome {
    Continue,
    EndOfStream,
}

/// Binlog 스트림 리더
///
/// `connect`로 복제 세션을 열고, `stream_events`가 펌프 루프를
/// 돌립니다. 좌표 커서는 다른 스레드가 `tracker()` 복사본으로
/// 동시에 조회할 수 있습니다.
pub struct BinlogReader {
    config: ConnectionConfig,
    channel: Option<PacketChannel>,
    tracker: Arc<CoordinateTracker>,
    decoder: EventDecoder,
    /// 마지막으로 변환을 끝낸 프레임의 좌표
    ///
    /// 같은 좌표 구간을 다시 지날 때 이미 내보낸 프레임의 중복
    /// 방출을 막습니다. 프레임 단위로만 갱신되므로 프레임 중간에
    /// 중단되면 재개 시 그 프레임 전체가 다시 방출될 수 있습니다.
    last_applied_hint: BinlogCoordinates,
}

impl BinlogReader {
    pub fn new(config: ConnectionConfig) -> Self {
        BinlogReader {
            config,
            channel: None,
            tracker: Arc::new(CoordinateTracker::new(BinlogCoordinates::default())),
            decoder: EventDecoder::new(),
            last_applied_hint: BinlogCoordinates::default(),
        }
    }

    /// 복제 세션 수립
    ///
    /// 핸드셰이크, 인증, 체크섬 해제, 레플리카 등록(COM_BINLOG_DUMP)
    /// 순으로 진행합니다. 빈 좌표는 네트워크 접근 전에 거부합니다.
    pub async fn connect(&mut self, start: BinlogCoordinates) -> Result<()> {
        if start.is_empty() {
            return Err(StreamError::EmptyCoordinates);
        }

        info!("connecting binlog streamer at {}", start);

        let mut channel = PacketChannel::connect(&self.config.hostname, self.config.port).await?;

        let greeting_packet = channel.read_packet().await?;
        if protocol::is_error_packet(&greeting_packet) {
            let (code, message) = protocol::parse_error_packet(&greeting_packet);
            return Err(StreamError::ConnectionError(format!(
                "server refused connection ({}): {}",
                code, message
            )));
        }
        let greeting = Greeting::parse(&greeting_packet)?;
        debug!(
            "MySQL server version: {}, thread id: {}",
            greeting.server_version, greeting.thread_id
        );

        let auth_packet = auth::handshake_response(
            &self.config.username,
            &self.config.password,
            self.config.database.as_deref(),
            &greeting.scramble,
            greeting.server_collation,
        )?;
        channel.write_packet(&auth_packet, 1).await?;

        let auth_result = channel.read_packet().await?;
        if protocol::is_error_packet(&auth_result) {
            let (code, message) = protocol::parse_error_packet(&auth_result);
            return Err(StreamError::ConnectionError(format!(
                "authentication failed ({}): {}",
                code, message
            )));
        }

        // 이벤트 페이로드 뒤에 체크섬 바이트가 붙지 않도록 요청.
        // 변수를 모르는 구버전 서버는 거부할 수 있으므로 치명적이지 않음.
        let mut checksum_query = vec![COM_QUERY];
        checksum_query.extend_from_slice(b"SET @master_binlog_checksum='NONE'");
        channel.write_packet(&checksum_query, 0).await?;

        let checksum_result = channel.read_packet().await?;
        if protocol::is_error_packet(&checksum_result) {
            warn!("failed to disable binlog checksum, continuing");
        }

        let dump_command = binlog_dump_command(self.config.server_id, &start)?;
        channel.write_packet(&dump_command, 0).await?;
        info!(
            "registered as replica (server_id={}) dumping from {}",
            self.config.server_id, start
        );

        self.tracker.reset(start);
        self.decoder = EventDecoder::new();
        self.channel = Some(channel);
        Ok(())
    }

    /// 좌표 커서 공유 핸들 (상태 보고 스레드용)
    pub fn tracker(&self) -> Arc<CoordinateTracker> {
        Arc::clone(&self.tracker)
    }

    /// 현재 스트림 좌표의 복사본
    pub fn current_coordinates(&self) -> BinlogCoordinates {
        self.tracker.snapshot()
    }

    /// 펌프 루프: 정지 신호 또는 에러까지 이벤트를 소비
    ///
    /// 정지 술어는 매 수신 전에 평가되는 협조적 신호입니다.
    /// 진행 중인 수신은 끝까지 기다리므로, 종료 지연에 상한이
    /// 필요하면 연결 계층에 타임아웃을 둬야 합니다. 종료 시
    /// 출력 채널은 닫지 않습니다. 채널 수명은 호출자 소유입니다.
    pub async fn stream_events<F>(
        &mut self,
        can_stop: F,
        tx: &mpsc::Sender<ChangeRecord>,
    ) -> Result<()>
    where
        F: Fn() -> bool,
    {
        if can_stop() {
            return Ok(());
        }

        loop {
            if can_stop() {
                break;
            }

            let packet = match self.channel.as_mut() {
                Some(channel) => channel.read_packet().await?,
                None => {
                    return Err(StreamError::ConnectionError(
                        "stream_events called before connect".to_string(),
                    ))
                }
            };

            match self.process_packet(&packet, tx).await? {
                FrameOutcome::Continue => {}
                FrameOutcome::EndOfStream => {
                    info!("binlog stream ended (EOF from server)");
                    break;
                }
            }
        }

        debug!("done streaming events");
        Ok(())
    }

    /// 패킷 하나 처리: 좌표 전진, 분류, 변환, 채널 방출
    async fn process_packet(
        &mut self,
        packet: &[u8],
        tx: &mpsc::Sender<ChangeRecord>,
    ) -> Result<FrameOutcome> {
        if protocol::is_error_packet(packet) {
            let (code, message) = protocol::parse_error_packet(packet);
            return Err(StreamError::FetchError(format!(
                "server error {}: {}",
                code, message
            )));
        }
        if protocol::is_eof_packet(packet) {
            return Ok(FrameOutcome::EndOfStream);
        }

        // 선두의 OK 바이트를 벗기면 이벤트 데이터
        let event_data = packet.strip_prefix([0x00].as_slice()).unwrap_or(packet);
        let header = BinlogParser::parse_header(event_data)?;

        // 이벤트 종류와 무관하게 커서는 항상 전진.
        // 행 데이터가 없는 프레임도 바이트 오프셋은 소비함.
        self.tracker.advance_offset(header.next_pos as u64);

        let payload = &event_data[EVENT_HEADER_SIZE..];
        match self.decoder.classify(&header, payload)? {
            FrameClass::Rotation(next_log_file) => {
                info!(
                    "rotating binlog from {} to {}",
                    self.tracker.snapshot().log_file,
                    next_log_file
                );
                self.tracker.advance_file(next_log_file);
            }
            FrameClass::RowMutation {
                schema,
                table,
                kind,
                rows,
            } => {
                self.handle_row_mutation(&schema, &table, kind, &rows, tx)
                    .await?;
            }
            FrameClass::Ignored => {}
        }

        Ok(FrameOutcome::Continue)
    }

    /// 행 변경 프레임 하나를 레코드들로 변환해 방출
    ///
    /// 좌표가 힌트 이하이면 이미 처리한 구간이므로 건너뜁니다.
    /// 힌트는 프레임의 레코드가 모두 전송된 뒤에만 전진합니다.
    async fn handle_row_mutation(
        &mut self,
        schema: &str,
        table: &str,
        kind: MutationKind,
        rows: &[Vec<CellValue>],
        tx: &mpsc::Sender<ChangeRecord>,
    ) -> Result<()> {
        let coordinates = self.tracker.snapshot();
        if coordinates.smaller_than_or_equals(&self.last_applied_hint) {
            debug!("skipping handled event at {}", coordinates);
            return Ok(());
        }

        let records = dml::translate(&coordinates, schema, table, kind, rows)?;

        // 소비자가 동기식으로 처리하든 미리 당겨 받든 펌프는 모름.
        // 채널이 가득 차면 여기서 블록되는 것이 의도된 배압.
        for record in records {
            tx.send(record)
                .await
                .map_err(|_| StreamError::ChannelClosed)?;
        }

        self.last_applied_hint = coordinates;
        Ok(())
    }

    /// 복제 세션 종료
    ///
    /// 종료 경로에서 호출자가 할 수 있는 조치가 없으므로
    /// 하부 에러는 로그만 남기고 삼킵니다. 멱등합니다.
    pub async fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.shutdown().await {
                warn!("error closing binlog session: {}", e);
            }
        }
    }
}

/// COM_BINLOG_DUMP 명령어 생성
fn binlog_dump_command(server_id: u32, start: &BinlogCoordinates) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.write_u8(COM_BINLOG_DUMP)?;
    buffer.write_u32::<LittleEndian>(start.log_pos as u32)?;
    buffer.write_u16::<LittleEndian>(0)?; // flags: blocking dump
    buffer.write_u32::<LittleEndian>(server_id)?;
    buffer.write_all(start.log_file.as_bytes())?;
    Ok(buffer)
}
