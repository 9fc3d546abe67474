//! 재조립과 무결성 확인
//!
//! 슬롯을 인덱스 순서로 이어 붙이고 전체 길이를 확인한 뒤 MD5 다이제스트 계산.
//! 길이가 맞지 않으면 부분 결과는 받아들이지 않음

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};

use crate::chunk::ChunkSlots;
use crate::{Error, Result};

/// MD5 다이제스트 (128비트)
pub type FileDigest = [u8; 16];

/// 재조립 결과
#[derive(Debug, Clone)]
pub struct Assembled {
    /// 파일 데이터
    pub data: Bytes,

    /// 전체 파일 다이제스트
    pub digest: FileDigest,
}

impl Assembled {
    /// 16진수 다이제스트
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// 바이트열 다이제스트
pub fn digest(data: &[u8]) -> FileDigest {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(data));
    out
}

/// 슬롯 재조립
pub fn reassemble(slots: &ChunkSlots, file_size: u32) -> Result<Assembled> {
    let expected = file_size as usize;
    let mut buf = BytesMut::with_capacity(expected);

    for entry in slots.iter().flatten() {
        buf.extend_from_slice(&entry.data);
    }

    if buf.len() != expected {
        return Err(Error::Incomplete {
            received: buf.len(),
            expected,
            missing: slots.missing(),
        });
    }

    let data = buf.freeze();
    let digest = digest(&data);
    Ok(Assembled { data, digest })
}
