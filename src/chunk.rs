//! 청크 계획과 슬롯
//!
//! - ChunkDescriptor: 파일의 연속 바이트 범위 (end 포함)
//! - ChunkSlots: 청크별 1회 쓰기 저장 칸

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;

/// 청크 인덱스
pub type ChunkIndex = usize;

/// 링크 ID
pub type LinkId = u8;

/// 청크 디스크립터 (전송당 1회 생성, 불변)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    /// 청크 인덱스
    pub index: ChunkIndex,

    /// 시작 오프셋
    pub range_start: u32,

    /// 끝 오프셋 (포함)
    pub range_end: u32,
}

impl ChunkDescriptor {
    /// 요청 바이트 수
    pub fn requested_len(&self) -> usize {
        (self.range_end - self.range_start) as usize + 1
    }
}

/// 파일 크기와 최대 페이로드로 디스크립터 목록 생성
///
/// 결과는 [0, file_size)를 겹침/빈틈 없이 오름차순으로 덮음
pub fn plan(file_size: u32, max_payload: usize) -> Vec<ChunkDescriptor> {
    if file_size == 0 || max_payload == 0 {
        return Vec::new();
    }

    let size = file_size as u64;
    let step = max_payload as u64;

    (0..size.div_ceil(step))
        .map(|index| {
            let start = index * step;
            let end = (start + step - 1).min(size - 1);
            ChunkDescriptor {
                index: index as ChunkIndex,
                range_start: start as u32,
                range_end: end as u32,
            }
        })
        .collect()
}

/// 채워진 슬롯 내용
#[derive(Debug, Clone)]
pub struct SlotEntry {
    /// 채운 링크
    pub link_id: LinkId,

    /// 페이로드
    pub data: Bytes,
}

/// 청크 슬롯 배열
///
/// 각 칸은 최대 한 번만 쓰이며 이후 절대 바뀌지 않음
#[derive(Debug)]
pub struct ChunkSlots {
    slots: Vec<OnceLock<SlotEntry>>,
    filled: AtomicUsize,
    filled_bytes: AtomicU64,
}

impl ChunkSlots {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            slots: (0..total_chunks).map(|_| OnceLock::new()).collect(),
            filled: AtomicUsize::new(0),
            filled_bytes: AtomicU64::new(0),
        }
    }

    /// 슬롯 쓰기. 이미 채워진 칸이면 false (기존 내용 유지)
    pub fn fill(&self, index: ChunkIndex, link_id: LinkId, data: Bytes) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };

        let len = data.len() as u64;
        if slot.set(SlotEntry { link_id, data }).is_err() {
            return false;
        }

        self.filled_bytes.fetch_add(len, Ordering::Relaxed);
        self.filled.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn is_filled(&self, index: ChunkIndex) -> bool {
        self.slots
            .get(index)
            .map(|slot| slot.get().is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, index: ChunkIndex) -> Option<&SlotEntry> {
        self.slots.get(index).and_then(|slot| slot.get())
    }

    /// 총 슬롯 수
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 채워진 슬롯 수
    pub fn filled_count(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    /// 채워진 바이트 (진행률 표시용 근사값)
    pub fn filled_bytes(&self) -> u64 {
        self.filled_bytes.load(Ordering::Relaxed)
    }

    pub fn is_complete(&self) -> bool {
        self.filled_count() == self.slots.len()
    }

    /// 비어 있는 슬롯 인덱스
    pub fn missing(&self) -> Vec<ChunkIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.get().is_none())
            .map(|(index, _)| index)
            .collect()
    }

    /// 인덱스 순서로 슬롯 순회 (빈 칸은 None)
    pub fn iter(&self) -> impl Iterator<Item = Option<&SlotEntry>> {
        self.slots.iter().map(|slot| slot.get())
    }
}
