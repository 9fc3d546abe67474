//! 에러 타입 정의

use thiserror::Error;

/// RDTP 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("잘못된 패킷: {len} bytes (헤더 10 bytes 미만)")]
    MalformedPacket { len: usize },

    #[error("서버 에러 신호: kind={code}")]
    ServerError { code: u8 },

    #[error("불완전한 전송: {received}/{expected} bytes, 누락 청크 {missing:?}")]
    Incomplete {
        received: usize,
        expected: usize,
        missing: Vec<usize>,
    },

    #[error("서버 링크 없음")]
    NoLinks,

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("채널 에러")]
    ChannelError,

    #[error("전송 취소됨")]
    Cancelled,

    #[error("워커 에러: {0}")]
    Worker(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
