/// Binlog 수집 코어 사용 예제
///
/// 서버의 현재 binlog 위치에서 스트림을 열고, 받은 변경 레코드를
/// JSON으로 출력합니다. Ctrl-C가 협조적 정지 신호가 됩니다.
use binlog_ingest::{BinlogReader, ConnectionConfig, MySqlConnection};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ConnectionConfig {
        hostname: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("DB_PORT")
            .unwrap_or_else(|_| "3306".to_string())
            .parse()
            .unwrap_or(3306),
        username: env::var("DB_USER").unwrap_or_else(|_| "repl".to_string()),
        password: env::var("DB_PASSWORD").unwrap_or_else(|_| "replpass".to_string()),
        database: env::var("DB_NAME").ok(),
        server_id: env::var("REPLICA_SERVER_ID")
            .unwrap_or_else(|_| "99999".to_string())
            .parse()
            .unwrap_or(99999),
        ..Default::default()
    };

    info!("connecting to {}:{}", config.hostname, config.port);

    // 시작 좌표 발견: 서버의 현재 binlog 위치
    let mut inspector = MySqlConnection::connect(&config).await?;
    let format = inspector.get_binlog_format().await?;
    if format != "ROW" {
        warn!("binlog_format is {}, row events require ROW", format);
    }
    let start = inspector.get_binlog_status().await?;
    inspector.close().await?;

    info!("streaming from {}", start);

    // 유계 출력 채널: 가득 차면 펌프가 블록되어 배압이 걸림
    let (tx, mut rx) = mpsc::channel(1024);

    let consumer = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            match serde_json::to_string(&record) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("failed to serialize record: {}", e),
            }
        }
    });

    // Ctrl-C -> 협조적 정지 신호
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("stop requested");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut reader = BinlogReader::new(config);
    reader.connect(start).await?;

    let tracker = reader.tracker();
    let result = reader
        .stream_events(|| stop.load(Ordering::Relaxed), &tx)
        .await;

    reader.close().await;
    info!("stopped at {}", tracker.snapshot());

    // 채널을 닫아 소비자 태스크를 끝냄 (채널 수명은 여기 소유)
    drop(tx);
    consumer.await?;

    result?;
    Ok(())
}
