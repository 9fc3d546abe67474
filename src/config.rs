//! 프로토콜 설정

use std::time::Duration;

use crate::{Error, Result, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAX_DATAGRAM_SIZE};

/// 서버 에러 응답(kind > 100) 처리 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerErrorPolicy {
    /// 해당 청크만 포기 (재큐잉 없음, 전송은 나중에 Incomplete로 실패)
    #[default]
    AbortChunk,

    /// 일반 실패처럼 큐에 다시 넣음
    Requeue,

    /// 큐를 닫고 전송 전체를 중단
    AbortTransfer,
}

/// RDTP 클라이언트 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 최대 페이로드 (바이트)
    pub max_payload: usize,

    /// 초기 타임아웃 (EstimatedRTT 초기값)
    pub initial_timeout: Duration,

    /// 지수 백오프 상한
    pub max_timeout: Duration,

    /// 디스크립터 하나를 꺼냈을 때 최대 시도 횟수
    pub max_attempts: u32,

    /// 전송 전체의 재큐잉 허용 횟수 (None이면 무제한)
    pub max_requeues: Option<u64>,

    /// 서버 에러 처리 정책
    pub server_error_policy: ServerErrorPolicy,

    /// 목록/크기 질의 타임아웃 (재시도 없음)
    pub query_timeout: Duration,

    /// 진행 상황 보고 주기
    pub report_interval: Duration,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            initial_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(60),
            max_attempts: 10,
            max_requeues: None,
            server_error_policy: ServerErrorPolicy::AbortChunk,
            query_timeout: Duration::from_secs(3),
            report_interval: Duration::from_secs(1),
            recv_buffer_size: 2048,
        }
    }
}

impl Config {
    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_payload == 0 {
            return Err(Error::InvalidConfig("max_payload must be > 0".into()));
        }
        if self.max_payload + HEADER_SIZE > MAX_DATAGRAM_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_payload {} exceeds datagram limit",
                self.max_payload
            )));
        }
        if self.recv_buffer_size < self.max_payload + HEADER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size {} cannot hold a {} byte chunk",
                self.recv_buffer_size, self.max_payload
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be > 0".into()));
        }
        if self.initial_timeout.is_zero() {
            return Err(Error::InvalidConfig("initial_timeout must be > 0".into()));
        }
        if self.max_timeout < self.initial_timeout {
            return Err(Error::InvalidConfig(
                "max_timeout must be >= initial_timeout".into(),
            ));
        }
        Ok(())
    }

    /// 로컬망용 설정
    pub fn lan() -> Self {
        Self {
            initial_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(5),
            max_attempts: 5,
            report_interval: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            max_payload: 512,                 // 작은 청크
            initial_timeout: Duration::from_secs(2),
            max_timeout: Duration::from_secs(30),
            max_attempts: 10,
            max_requeues: Some(10_000),
            query_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
