//! 패킷 코덱
//!
//! 10바이트 고정 헤더 (big-endian) + 가변 페이로드
//!
//! | 필드 | 크기 |
//! |---|---|
//! | kind | 1 |
//! | file_id | 1 |
//! | range_start | 4 |
//! | range_end (포함) | 4 |
//!
//! 길이 필드는 없음. 페이로드 길이는 데이터그램 크기로 결정됨

use bincode::Options;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, HEADER_SIZE};

/// 이 값보다 큰 kind는 서버 에러 신호
pub const SERVER_ERROR_THRESHOLD: u8 = 100;

/// 요청/응답 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    /// 파일 목록
    ListFiles = 1,

    /// 파일 크기
    GetFileSize = 2,

    /// 바이트 범위
    GetRange = 3,
}

impl RequestKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ListFiles),
            2 => Some(Self::GetFileSize),
            3 => Some(Self::GetRange),
            _ => None,
        }
    }
}

/// 패킷 헤더
///
/// kind는 서버 에러 코드(>100)도 담아야 하므로 원시 u8로 보관
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// 요청 종류
    pub kind: u8,

    /// 파일 ID (ListFiles 응답에서는 파일 개수)
    pub file_id: u8,

    /// 범위 시작 오프셋
    pub range_start: u32,

    /// 범위 끝 오프셋 (포함)
    pub range_end: u32,
}

/// 헤더 직렬화 옵션: big-endian, 고정 폭 정수
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

impl PacketHeader {
    pub fn new(kind: u8, file_id: u8, range_start: u32, range_end: u32) -> Self {
        Self {
            kind,
            file_id,
            range_start,
            range_end,
        }
    }

    /// ListFiles 요청
    pub fn list_files() -> Self {
        Self::new(RequestKind::ListFiles as u8, 0, 0, 0)
    }

    /// GetFileSize 요청
    pub fn file_size(file_id: u8) -> Self {
        Self::new(RequestKind::GetFileSize as u8, file_id, 0, 0)
    }

    /// GetRange 요청
    pub fn range(file_id: u8, range_start: u32, range_end: u32) -> Self {
        Self::new(RequestKind::GetRange as u8, file_id, range_start, range_end)
    }

    /// 알려진 요청 종류
    pub fn request_kind(&self) -> Option<RequestKind> {
        RequestKind::from_u8(self.kind)
    }

    /// 서버 에러 신호 여부
    pub fn is_server_error(&self) -> bool {
        self.kind > SERVER_ERROR_THRESHOLD
    }

    /// 헤더만 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(wire_options().serialize(self)?)
    }
}

/// 디코딩된 패킷 (페이로드는 수신 버퍼를 빌림)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

/// 헤더 + 페이로드 인코딩
pub fn encode(header: &PacketHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    wire_options().serialize_into(&mut buf, header)?;
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// 데이터그램 디코딩
///
/// 필드 값 범위는 검증하지 않음
pub fn decode(bytes: &[u8]) -> Result<Packet<'_>> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::MalformedPacket { len: bytes.len() });
    }

    let header: PacketHeader = wire_options().deserialize(&bytes[..HEADER_SIZE])?;

    Ok(Packet {
        header,
        payload: &bytes[HEADER_SIZE..],
    })
}

/// 카탈로그 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: u8,
    pub name: String,
}

impl FileEntry {
    pub fn new(id: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// 카탈로그 페이로드 인코딩: (id, name, 0x00) 반복
pub fn encode_catalog(entries: &[FileEntry]) -> Vec<u8> {
    let capacity = entries.iter().map(|e| e.name.len() + 2).sum();
    let mut buf = BytesMut::with_capacity(capacity);

    for entry in entries {
        buf.put_u8(entry.id);
        buf.put_slice(entry.name.as_bytes());
        buf.put_u8(0);
    }

    buf.to_vec()
}

/// 카탈로그 페이로드 디코딩
///
/// `count`는 응답 헤더의 file_id 필드. 페이로드가 먼저 끝나면 거기서 멈춤
pub fn decode_catalog(count: u8, payload: &[u8]) -> Vec<FileEntry> {
    let mut entries = Vec::with_capacity(count as usize);
    let mut rest = payload;

    for _ in 0..count {
        if rest.is_empty() {
            break;
        }

        let id = rest.get_u8();
        let name_len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let name = String::from_utf8_lossy(&rest[..name_len]).into_owned();
        entries.push(FileEntry { id, name });

        // 이름 + 종료 바이트
        rest = &rest[(name_len + 1).min(rest.len())..];
    }

    entries
}

/// 파일 크기 페이로드 인코딩
pub fn encode_size(size: u32) -> [u8; 4] {
    size.to_be_bytes()
}

/// 파일 크기 페이로드 디코딩
pub fn decode_size(mut payload: &[u8]) -> Option<u32> {
    if payload.len() < 4 {
        return None;
    }
    Some(payload.get_u32())
}
