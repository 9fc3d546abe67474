//! RDTP 서버 - 참조 응답자
//!
//! 메모리에 올린 파일로 목록/크기/범위 요청에 응답
//! - 파일을 지정하지 않으면 5000바이트 'A' 샘플 파일 하나를 제공
//! - 손실률 옵션으로 불안정 네트워크 흉내
//!
//! 사용법:
//!   cargo run --release --bin rdtp-server -- [OPTIONS]
//!
//! 예시:
//!   # 샘플 파일 제공
//!   cargo run --release --bin rdtp-server -- --bind 0.0.0.0:9000
//!
//!   # 파일 두 개 + 10% 손실
//!   cargo run --release --bin rdtp-server -- -f a.bin -f b.bin --loss 0.1

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rdtp::{HostedFile, Responder};

/// RDTP 참조 서버
#[derive(Parser, Debug)]
#[command(name = "rdtp-server")]
#[command(version)]
#[command(about = "RDTP reference responder - serves in-memory files over UDP")]
struct Args {
    /// 바인드 주소
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind: SocketAddr,

    /// 제공할 파일 (여러 번 지정 가능, ID는 1부터 순서대로)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,

    /// 응답 손실률 0.0~1.0
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// 로그 상세도 (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
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

async fn load_files(paths: &[PathBuf]) -> Result<Vec<HostedFile>, Box<dyn std::error::Error>> {
    if paths.is_empty() {
        return Ok(vec![HostedFile::new(1, "sample.txt", vec![b'A'; 5000])]);
    }

    let mut files = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let id = u8::try_from(i + 1).map_err(|_| "too many files (max 255)")?;
        let data = tokio::fs::read(path).await?;
        if u32::try_from(data.len()).is_err() {
            return Err(format!("{:?} is larger than 4 GiB", path).into());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(HostedFile::new(id, name, data));
    }
    Ok(files)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    info!("RDTP Server starting...");

    let files = load_files(&args.files).await?;
    for file in &files {
        info!("  [{}] {} ({} bytes)", file.id, file.name, file.data.len());
    }

    let responder = Responder::new(files).with_loss_rate(args.loss);
    if args.loss > 0.0 {
        info!("Simulated loss rate: {:.1}%", args.loss * 100.0);
    }

    let (local_addr, responder, handle) = responder.spawn(args.bind).await?;
    info!("Listening on {}", local_addr);

    tokio::select! {
        result = handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("응답자 종료: {}", e),
                Err(e) => warn!("응답자 태스크 실패: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    info!(
        "Responses served: {}, dropped: {}",
        responder.served(),
        responder.dropped()
    );
    Ok(())
}
