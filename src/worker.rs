//! 전송 워커 (링크당 하나)
//!
//! - 큐에서 디스크립터를 꺼내 GetRange 요청/재시도/백오프 수행
//! - 성공하면 슬롯을 채우고 RTT 샘플 기록 (첫 시도만, Karn)
//! - 시도 소진 시 큐에 되돌림
//! - 꺼낸 디스크립터마다 ack는 정확히 한 번

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::chunk::{ChunkDescriptor, ChunkSlots, LinkId};
use crate::config::{Config, ServerErrorPolicy};
use crate::link::LinkEndpoint;
use crate::packet::{self, PacketHeader, RequestKind};
use crate::queue::WorkQueue;
use crate::rtt::RttEstimator;
use crate::stats::StatsAggregator;

/// 디스크립터 하나의 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// 이 워커가 슬롯을 채움
    Filled,

    /// 응답은 맞았지만 슬롯이 이미 채워져 있음
    AlreadyFilled,

    /// 시도 횟수 소진
    Exhausted,

    /// 서버 에러 신호 (kind > 100)
    ServerError(u8),
}

/// 워커 종료 보고
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// 링크 ID
    pub link_id: LinkId,

    /// 채운 청크 수
    pub filled: u64,

    /// 재큐잉한 디스크립터 수
    pub requeued: u64,

    /// 재큐잉이 거부되어 버려진 디스크립터 수
    pub dropped: u64,

    /// 마지막 서버 에러 코드
    pub server_error: Option<u8>,

    /// 종료 시점의 RTT 추정 상태
    pub estimator: RttEstimator,
}

/// 전송 워커
pub struct TransferWorker {
    link: LinkEndpoint,
    file_id: u8,
    queue: Arc<WorkQueue>,
    slots: Arc<ChunkSlots>,
    stats: Arc<StatsAggregator>,
    rtt: RttEstimator,
    max_attempts: u32,
    server_error_policy: ServerErrorPolicy,
    recv_buffer_size: usize,
}

impl TransferWorker {
    pub fn new(
        link: LinkEndpoint,
        file_id: u8,
        queue: Arc<WorkQueue>,
        slots: Arc<ChunkSlots>,
        stats: Arc<StatsAggregator>,
        config: &Config,
    ) -> Self {
        Self {
            link,
            file_id,
            queue,
            slots,
            stats,
            rtt: RttEstimator::new(config.initial_timeout, config.max_timeout),
            max_attempts: config.max_attempts,
            server_error_policy: config.server_error_policy,
            recv_buffer_size: config.recv_buffer_size,
        }
    }

    /// 큐가 빌 때까지 실행
    pub async fn run(mut self) -> WorkerReport {
        let link_id = self.link.id();
        let mut buf = vec![0u8; self.recv_buffer_size];
        let mut report = WorkerReport {
            link_id,
            filled: 0,
            requeued: 0,
            dropped: 0,
            server_error: None,
            estimator: self.rtt.clone(),
        };

        self.stats.record_link_timeout(link_id, self.rtt.current_timeout());

        while let Some(descriptor) = self.queue.pop() {
            if self.slots.is_filled(descriptor.index) {
                debug!("링크 {}: 청크 {} 이미 채워짐, 건너뜀", link_id, descriptor.index);
                self.queue.ack();
                continue;
            }

            match self.fetch(descriptor, &mut buf).await {
                Outcome::Filled => report.filled += 1,
                Outcome::AlreadyFilled => {}
                Outcome::Exhausted => {
                    if self.requeue(descriptor) {
                        report.requeued += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
                Outcome::ServerError(code) => {
                    self.stats.record_server_error();
                    report.server_error = Some(code);
                    match self.server_error_policy {
                        ServerErrorPolicy::AbortChunk => {
                            warn!(
                                "링크 {}: 서버 에러 {} - 청크 {} 포기",
                                link_id, code, descriptor.index
                            );
                            report.dropped += 1;
                        }
                        ServerErrorPolicy::Requeue => {
                            warn!(
                                "링크 {}: 서버 에러 {} - 청크 {} 재시도",
                                link_id, code, descriptor.index
                            );
                            if self.requeue(descriptor) {
                                report.requeued += 1;
                            } else {
                                report.dropped += 1;
                            }
                        }
                        ServerErrorPolicy::AbortTransfer => {
                            warn!("링크 {}: 서버 에러 {} - 전송 중단", link_id, code);
                            report.dropped += 1;
                            self.queue.close();
                        }
                    }
                }
            }

            self.queue.ack();
        }

        debug!(
            "링크 {} 워커 종료: filled={}, requeued={}, timeout={:?}",
            link_id,
            report.filled,
            report.requeued,
            self.rtt.current_timeout()
        );

        report.estimator = self.rtt;
        report
    }

    fn requeue(&self, descriptor: ChunkDescriptor) -> bool {
        if self.queue.requeue(descriptor) {
            self.stats.record_requeue();
            debug!("링크 {}: 청크 {} 재큐잉", self.link.id(), descriptor.index);
            true
        } else {
            warn!(
                "링크 {}: 청크 {} 재큐잉 거부 (한도 초과 또는 큐 닫힘)",
                self.link.id(),
                descriptor.index
            );
            false
        }
    }

    /// 디스크립터 하나에 대해 최대 max_attempts번 요청
    async fn fetch(&mut self, descriptor: ChunkDescriptor, buf: &mut [u8]) -> Outcome {
        let link_id = self.link.id();
        let header = PacketHeader::range(self.file_id, descriptor.range_start, descriptor.range_end);
        let request = match packet::encode(&header, &[]) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("요청 인코딩 실패: {}", e);
                return Outcome::Exhausted;
            }
        };

        for attempt in 1..=self.max_attempts {
            let sent_at = Instant::now();
            let deadline = sent_at + self.rtt.current_timeout();

            if let Err(e) = self.link.send(&request).await {
                warn!("링크 {}: 송신 에러: {}", link_id, e);
                tokio::time::sleep_until(deadline).await;
                self.on_timeout(descriptor, attempt);
                continue;
            }
            self.stats.record_request(link_id);

            // 같은 시도 안에서 마감까지 대기 (불일치 응답은 무시)
            loop {
                let len = match self.link.recv_until(buf, deadline).await {
                    Ok(Some(len)) => len,
                    Ok(None) => {
                        self.on_timeout(descriptor, attempt);
                        break;
                    }
                    Err(e) => {
                        warn!("링크 {}: 수신 에러: {}", link_id, e);
                        tokio::time::sleep_until(deadline).await;
                        self.on_timeout(descriptor, attempt);
                        break;
                    }
                };

                let packet = match packet::decode(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(_) => {
                        self.stats.record_malformed();
                        continue;
                    }
                };
                let reply = packet.header;

                if reply.kind == RequestKind::GetRange as u8 && reply.file_id == self.file_id {
                    if reply.range_start != descriptor.range_start || packet.payload.is_empty() {
                        self.stats.record_stale();
                        continue;
                    }

                    // 요청보다 긴 페이로드는 요청 범위까지만 사용
                    let wanted = descriptor.requested_len();
                    let payload = &packet.payload[..packet.payload.len().min(wanted)];
                    if payload.len() < wanted {
                        self.stats.record_short_payload();
                        debug!(
                            "청크 {}: 짧은 페이로드 {}/{} bytes",
                            descriptor.index,
                            payload.len(),
                            wanted
                        );
                    }

                    let sample = (attempt == 1).then(|| sent_at.elapsed());
                    if let Some(sample) = sample {
                        self.rtt.on_sample(sample);
                    }

                    let filled = self
                        .slots
                        .fill(descriptor.index, link_id, Bytes::copy_from_slice(payload));
                    self.stats.record_link_timeout(link_id, self.rtt.current_timeout());

                    if !filled {
                        debug!("청크 {}: 중복 응답, 슬롯 유지", descriptor.index);
                        return Outcome::AlreadyFilled;
                    }

                    self.stats.record_chunk(link_id, payload.len(), sample);
                    return Outcome::Filled;
                }

                if reply.is_server_error() {
                    return Outcome::ServerError(reply.kind);
                }

                self.stats.record_stale();
            }
        }

        Outcome::Exhausted
    }

    fn on_timeout(&mut self, descriptor: ChunkDescriptor, attempt: u32) {
        self.rtt.on_timeout();
        self.stats
            .record_timeout(self.link.id(), self.rtt.current_timeout());
        debug!(
            "링크 {}: 청크 {} 타임아웃 (시도 {}/{}), 새 타임아웃 {:?}",
            self.link.id(),
            descriptor.index,
            attempt,
            self.max_attempts,
            self.rtt.current_timeout()
        );
    }
}
