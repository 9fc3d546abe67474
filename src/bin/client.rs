//! RDTP 클라이언트 - 다중 서버 청크 수신
//!
//! 파일 목록 조회 → 파일 선택 → 크기 조회 → 모든 서버에서 병렬 다운로드 → MD5 출력
//! - 서버 주소를 여러 개 주면 서버마다 링크 하나씩 사용
//! - Ctrl-C로 진행 중인 다운로드 취소
//!
//! 사용법:
//!   cargo run --release --bin rdtp-client -- [OPTIONS] <SERVER>...
//!
//! 예시:
//!   # 대화형
//!   cargo run --release --bin rdtp-client -- 127.0.0.1:9000 127.0.0.1:9001
//!
//!   # 파일 1번을 받아 저장하고 종료
//!   cargo run --release --bin rdtp-client -- 127.0.0.1:9000 --file-id 1 -o out.bin

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rdtp::{Client, Config, Error};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    /// 기본값
    Default,
    /// 저지연 LAN
    Lan,
    /// 손실이 많은 네트워크
    Lossy,
}

/// RDTP 클라이언트
#[derive(Parser, Debug)]
#[command(name = "rdtp-client")]
#[command(version)]
#[command(about = "RDTP client - fetches a file in chunks from one or more servers")]
struct Args {
    /// 서버 주소 (하나 이상)
    #[arg(required = true)]
    servers: Vec<SocketAddr>,

    /// 받을 파일 ID (지정하면 한 번만 받고 종료)
    #[arg(long)]
    file_id: Option<u8>,

    /// 저장 경로
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 설정 프리셋
    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// 초기 타임아웃 (ms)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// 청크 페이로드 크기 (바이트)
    #[arg(long)]
    payload: Option<usize>,

    /// 청크당 최대 시도 횟수
    #[arg(long)]
    attempts: Option<u32>,

    /// 로그 상세도 (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = match self.preset {
            Preset::Default => Config::default(),
            Preset::Lan => Config::lan(),
            Preset::Lossy => Config::lossy_network(),
        };
        if let Some(ms) = self.timeout_ms {
            config.initial_timeout = Duration::from_millis(ms);
        }
        if let Some(payload) = self.payload {
            config.max_payload = payload;
        }
        if let Some(attempts) = self.attempts {
            config.max_attempts = attempts;
        }
        config
    }
}

fn init_tracing(verbose: u8) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// 시그널이 오면 완료. 핸들러 설치에 실패하면 영원히 대기
async fn cancel_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

/// 파일 하나 다운로드. 취소/실패는 로그만 남기고 계속
async fn fetch(client: &Client, file_id: u8, output: Option<&Path>) -> rdtp::Result<bool> {
    let Some(size) = client.file_size(file_id).await? else {
        warn!("File {} not available (no size reply)", file_id);
        return Ok(false);
    };
    info!("File {}: {} bytes", file_id, size);

    let cancel = cancel_on(tokio::signal::ctrl_c());
    let download = match client
        .download_with(file_id, size, cancel, |progress| info!("{}", progress))
        .await
    {
        Ok(download) => download,
        Err(Error::Cancelled) => {
            warn!("Download cancelled");
            return Ok(false);
        }
        Err(e) => {
            warn!("Download failed: {}", e);
            return Ok(false);
        }
    };

    info!("Transfer complete!");
    info!("  {}", download.stats.summary());
    for link in &download.stats.link_stats {
        info!(
            "  Link {}: {} chunks, {} requests, {} timeouts, timeout {:?}",
            link.link_id, link.chunks, link.requests, link.timeouts, link.current_timeout
        );
    }
    info!("MD5: {}", download.digest_hex());

    if let Some(path) = output {
        download.save(path).await?;
        info!("Data saved to {:?}", path);
    }
    Ok(true)
}

async fn interactive(client: &Client, output: Option<&Path>) -> rdtp::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let files = client.list_files().await?;
        if files.is_empty() {
            warn!("No file list received");
        } else {
            info!("Available files:");
            for file in &files {
                info!("  [{}] {}", file.id, file.name);
            }
        }

        stdout.write_all(b"Enter file ID (q to quit): ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("q") {
            return Ok(());
        }
        match line.parse::<u8>() {
            Ok(file_id) => {
                fetch(client, file_id, output).await?;
            }
            Err(_) => warn!("Invalid file ID: {:?}", line),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    info!("RDTP Client starting...");
    let client = Client::connect(args.config(), &args.servers).await?;

    match args.file_id {
        Some(file_id) => {
            if !fetch(&client, file_id, args.output.as_deref()).await? {
                std::process::exit(1);
            }
        }
        None => interactive(&client, args.output.as_deref()).await?,
    }

    Ok(())
}
