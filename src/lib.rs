//! # RDTP (Reliable Datagram Transfer Protocol)
//!
//! UDP 기반 다중 서버 청크 파일 수신 엔진
//!
//! ## 핵심 특징
//! - **청크 분할**: 파일을 고정 크기 범위로 나누어 요청
//! - **멀티 서버**: 서버마다 링크와 워커 하나, 공유 큐에서 작업을 나눠 가짐
//! - **적응형 타임아웃**: Jacobson/Karn RTT 추정과 지수 백오프
//! - **재큐잉**: 시도를 소진한 청크는 다른 링크가 다시 가져감
//! - **무결성 확인**: 인덱스 순서 재조립 후 MD5 다이제스트

pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod packet;
pub mod query;
pub mod queue;
pub mod reassembly;
pub mod responder;
pub mod rtt;
pub mod stats;
pub mod worker;

pub use chunk::{ChunkDescriptor, ChunkIndex, ChunkSlots, LinkId};
pub use client::{Client, Download};
pub use config::{Config, ServerErrorPolicy};
pub use error::{Error, Result};
pub use link::LinkEndpoint;
pub use packet::{FileEntry, Packet, PacketHeader, RequestKind};
pub use queue::WorkQueue;
pub use reassembly::{Assembled, FileDigest};
pub use responder::{HostedFile, Responder};
pub use rtt::RttEstimator;
pub use stats::{Progress, StatsAggregator, TransferStats};
pub use worker::{TransferWorker, WorkerReport};

/// 기본 최대 페이로드 (바이트)
pub const DEFAULT_MAX_PAYLOAD: usize = 1000;

/// 패킷 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 10;

/// UDP 데이터그램 최대 페이로드 (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65507;
