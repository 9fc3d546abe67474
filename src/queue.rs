//! 작업 큐
//!
//! - 비차단 pop: 두 워커가 같은 디스크립터를 동시에 받지 않음
//! - push/requeue: 언제든 가능 (실패한 워커가 자기 디스크립터를 되돌릴 때 포함)
//! - ack: pop 한 번당 정확히 한 번
//! - wait_drained: 삽입된 모든 항목(재시도 포함)이 ack될 때까지 대기

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::chunk::ChunkDescriptor;
use crate::{Error, Result};

/// 청크 디스크립터 작업 큐
pub struct WorkQueue {
    tx: Sender<ChunkDescriptor>,
    rx: Receiver<ChunkDescriptor>,

    /// 삽입 수 - ack 수
    outstanding: AtomicUsize,

    /// 총 삽입 수 (초기 + 재시도)
    inserted: AtomicU64,

    /// 총 ack 수
    acked: AtomicU64,

    /// 재큐잉 수
    requeues: AtomicU64,

    /// 전송 전체 재큐잉 한도
    max_requeues: Option<u64>,

    /// 닫힘 플래그 (취소/전송 중단)
    closed: AtomicBool,

    /// push와 close 직렬화 (닫힌 뒤 채널에 항목이 남지 않음)
    gate: Mutex<()>,

    /// outstanding이 0이 될 때 알림
    drained: Notify,
}

impl WorkQueue {
    /// 빈 큐 생성
    pub fn new(max_requeues: Option<u64>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            outstanding: AtomicUsize::new(0),
            inserted: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            requeues: AtomicU64::new(0),
            max_requeues,
            closed: AtomicBool::new(false),
            gate: Mutex::new(()),
            drained: Notify::new(),
        }
    }

    /// 디스크립터 목록으로 채운 큐 생성
    pub fn with_descriptors(
        descriptors: impl IntoIterator<Item = ChunkDescriptor>,
        max_requeues: Option<u64>,
    ) -> Result<Self> {
        let queue = Self::new(max_requeues);
        for descriptor in descriptors {
            queue.push(descriptor)?;
        }
        Ok(queue)
    }

    /// 디스크립터 삽입
    pub fn push(&self, descriptor: ChunkDescriptor) -> Result<()> {
        let _gate = self.gate.lock();
        if self.is_closed() {
            return Err(Error::ChannelError);
        }

        // 전송 전에 카운트를 올려야 pop→ack가 먼저 끝나도 0 아래로 내려가지 않음
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(descriptor).is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::ChannelError);
        }
        self.inserted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 실패한 디스크립터 재삽입. 한도 초과나 닫힌 큐면 false
    pub fn requeue(&self, descriptor: ChunkDescriptor) -> bool {
        let limit = self.max_requeues.unwrap_or(u64::MAX);
        let granted = self
            .requeues
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok();
        if !granted {
            return false;
        }

        if self.push(descriptor).is_err() {
            // 삽입 실패 시 한도 반환
            self.requeues.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// 비차단 pop. 대기 항목이 없거나 닫혔으면 None
    pub fn pop(&self) -> Option<ChunkDescriptor> {
        if self.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// pop 완료 통지
    pub fn ack(&self) {
        let prev = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match prev {
            Ok(1) => {
                self.acked.fetch_add(1, Ordering::Relaxed);
                self.drained.notify_waiters();
            }
            Ok(_) => {
                self.acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => warn!("대응하는 삽입 없는 ack 무시"),
        }
    }

    /// 큐 닫기: 대기 항목을 모두 ack 처리하고 이후 pop은 None
    ///
    /// 이미 꺼내진 디스크립터는 각 워커가 끝까지 처리 후 ack
    pub fn close(&self) {
        let _gate = self.gate.lock();
        self.closed.store(true, Ordering::Release);
        while self.rx.try_recv().is_ok() {
            self.ack();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 모든 삽입이 ack될 때까지 대기
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // 카운트 확인 전에 등록해서 알림 유실 방지
            notified.as_mut().enable();

            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_drained(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0
    }

    /// 미완료 수 (삽입 - ack)
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn total_inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn total_acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn requeue_count(&self) -> u64 {
        self.requeues.load(Ordering::Relaxed)
    }
}
