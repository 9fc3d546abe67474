//! 전송 통계
//!
//! 모든 워커가 공유하는 집계기. 갱신은 짧은 임계 구역 하나에서만 일어남

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::chunk::LinkId;

/// 링크별 최근 RTT 윈도우 크기
const LINK_RTT_WINDOW: usize = 10;

/// 링크별 통계
#[derive(Debug, Clone)]
pub struct LinkStats {
    /// 링크 ID
    pub link_id: LinkId,

    /// 보낸 요청 수
    pub requests: u64,

    /// 타임아웃 (= 재전송) 수
    pub timeouts: u64,

    /// 이 링크가 채운 청크 수
    pub chunks: u64,

    /// 수신 바이트
    pub bytes: u64,

    /// 현재 타임아웃
    pub current_timeout: Duration,

    /// 최근 RTT 샘플
    rtt_samples: VecDeque<Duration>,
}

impl LinkStats {
    pub fn new(link_id: LinkId) -> Self {
        Self {
            link_id,
            requests: 0,
            timeouts: 0,
            chunks: 0,
            bytes: 0,
            current_timeout: Duration::ZERO,
            rtt_samples: VecDeque::with_capacity(LINK_RTT_WINDOW),
        }
    }

    fn record_rtt(&mut self, rtt: Duration) {
        if self.rtt_samples.len() >= LINK_RTT_WINDOW {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(rtt);
    }

    /// 최근 평균 RTT
    pub fn average_rtt(&self) -> Option<Duration> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        Some(self.rtt_samples.iter().sum::<Duration>() / self.rtt_samples.len() as u32)
    }

    /// 손실률 (타임아웃 / 요청)
    pub fn loss_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.timeouts as f64 / self.requests as f64
    }
}

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 요청 파일 크기
    pub file_size: u64,

    /// 총 청크 수
    pub total_chunks: usize,

    /// 보낸 요청 수
    pub total_requests: u64,

    /// 수신 바이트 (슬롯에 기록된 페이로드)
    pub total_bytes: u64,

    /// 재전송 수 (타임아웃마다 1)
    pub retransmissions: u64,

    /// RTT 샘플 (첫 시도 응답만)
    pub rtt_samples: Vec<Duration>,

    /// 서버 에러 응답 수
    pub server_errors: u64,

    /// 요청 범위보다 짧은 페이로드 수
    pub short_payloads: u64,

    /// 무시된 오래된/불일치 응답 수
    pub stale_responses: u64,

    /// 10바이트 미만 데이터그램 수
    pub malformed_packets: u64,

    /// 재큐잉 수
    pub requeues: u64,

    /// 링크별 통계
    pub link_stats: Vec<LinkStats>,

    rtt_sum: Duration,
}

impl TransferStats {
    pub fn new(link_count: usize, file_size: u64, total_chunks: usize) -> Self {
        Self {
            start_time: Instant::now(),
            file_size,
            total_chunks,
            total_requests: 0,
            total_bytes: 0,
            retransmissions: 0,
            rtt_samples: Vec::new(),
            server_errors: 0,
            short_payloads: 0,
            stale_responses: 0,
            malformed_packets: 0,
            requeues: 0,
            link_stats: (0..link_count)
                .map(|i| LinkStats::new(i as LinkId))
                .collect(),
            rtt_sum: Duration::ZERO,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 평균 RTT
    pub fn average_rtt(&self) -> Option<Duration> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        Some(self.rtt_sum / self.rtt_samples.len() as u32)
    }

    /// 손실률 (재전송 / 요청)
    pub fn loss_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.total_requests as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {}/{} | Requests: {} | Retransmissions: {} | Avg RTT: {:.2} ms | Loss: {:.1}% | Throughput: {:.2} KB/s",
            self.elapsed().as_secs_f64(),
            self.total_bytes,
            self.file_size,
            self.total_requests,
            self.retransmissions,
            self.average_rtt().unwrap_or_default().as_secs_f64() * 1000.0,
            self.loss_rate() * 100.0,
            self.throughput() / 1024.0,
        )
    }

    fn link_mut(&mut self, link_id: LinkId) -> Option<&mut LinkStats> {
        self.link_stats.get_mut(link_id as usize)
    }
}

/// 진행 상황 (보고 루프용 근사 스냅샷)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// 채워진 바이트
    pub downloaded: u64,

    /// 파일 크기
    pub file_size: u64,

    /// 경과 시간
    pub elapsed: Duration,

    /// 평균 RTT
    pub average_rtt: Option<Duration>,

    /// 손실률 (0.0 ~ 1.0)
    pub loss_rate: f64,
}

impl Progress {
    /// 진행률 (%)
    pub fn percent(&self) -> f64 {
        if self.file_size == 0 {
            return 100.0;
        }
        self.downloaded as f64 / self.file_size as f64 * 100.0
    }

    /// 속도 (KB/s)
    pub fn speed_kbps(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.downloaded as f64 / 1024.0 / elapsed
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Progress: {:.1}% | Speed: {:.2} KB/s | Avg RTT: {:.2} ms | Loss: {:.1}%",
            self.percent(),
            self.speed_kbps(),
            self.average_rtt.unwrap_or_default().as_secs_f64() * 1000.0,
            self.loss_rate * 100.0,
        )
    }
}

/// 워커 간 공유 통계 집계기
#[derive(Debug)]
pub struct StatsAggregator {
    inner: Mutex<TransferStats>,
}

impl StatsAggregator {
    pub fn new(link_count: usize, file_size: u64, total_chunks: usize) -> Self {
        Self {
            inner: Mutex::new(TransferStats::new(link_count, file_size, total_chunks)),
        }
    }

    /// 요청 송신 기록
    pub fn record_request(&self, link_id: LinkId) {
        let mut stats = self.inner.lock();
        stats.total_requests += 1;
        if let Some(link) = stats.link_mut(link_id) {
            link.requests += 1;
        }
    }

    /// 타임아웃 기록 (재전송 1회)
    pub fn record_timeout(&self, link_id: LinkId, new_timeout: Duration) {
        let mut stats = self.inner.lock();
        stats.retransmissions += 1;
        if let Some(link) = stats.link_mut(link_id) {
            link.timeouts += 1;
            link.current_timeout = new_timeout;
        }
    }

    /// 슬롯 채움 기록. rtt는 첫 시도일 때만 Some
    pub fn record_chunk(&self, link_id: LinkId, bytes: usize, rtt: Option<Duration>) {
        let mut stats = self.inner.lock();
        stats.total_bytes += bytes as u64;
        if let Some(rtt) = rtt {
            stats.rtt_samples.push(rtt);
            stats.rtt_sum += rtt;
        }
        if let Some(link) = stats.link_mut(link_id) {
            link.chunks += 1;
            link.bytes += bytes as u64;
            if let Some(rtt) = rtt {
                link.record_rtt(rtt);
            }
        }
    }

    /// 링크 현재 타임아웃 갱신
    pub fn record_link_timeout(&self, link_id: LinkId, timeout: Duration) {
        if let Some(link) = self.inner.lock().link_mut(link_id) {
            link.current_timeout = timeout;
        }
    }

    pub fn record_stale(&self) {
        self.inner.lock().stale_responses += 1;
    }

    pub fn record_malformed(&self) {
        self.inner.lock().malformed_packets += 1;
    }

    pub fn record_server_error(&self) {
        self.inner.lock().server_errors += 1;
    }

    pub fn record_short_payload(&self) {
        self.inner.lock().short_payloads += 1;
    }

    pub fn record_requeue(&self) {
        self.inner.lock().requeues += 1;
    }

    /// 보고 루프용 근사 진행 상황 (샘플 복사 없음)
    pub fn progress(&self, downloaded: u64) -> Progress {
        let stats = self.inner.lock();
        Progress {
            downloaded,
            file_size: stats.file_size,
            elapsed: stats.elapsed(),
            average_rtt: stats.average_rtt(),
            loss_rate: stats.loss_rate(),
        }
    }

    /// 전체 통계 복사본
    pub fn snapshot(&self) -> TransferStats {
        self.inner.lock().clone()
    }

    /// 통계 리셋 (새 전송용)
    pub fn reset(&self, link_count: usize, file_size: u64, total_chunks: usize) {
        *self.inner.lock() = TransferStats::new(link_count, file_size, total_chunks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let stats = StatsAggregator::new(2, 5000, 5);

        stats.record_request(0);
        stats.record_timeout(0, Duration::from_secs(2));
        stats.record_request(0);
        stats.record_chunk(0, 1000, None);
        stats.record_request(1);
        stats.record_chunk(1, 1000, Some(Duration::from_millis(20)));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.retransmissions, 1);
        assert_eq!(snapshot.total_bytes, 2000);
        assert_eq!(snapshot.rtt_samples, vec![Duration::from_millis(20)]);
        assert_eq!(snapshot.average_rtt(), Some(Duration::from_millis(20)));
        assert!((snapshot.loss_rate() - 1.0 / 3.0).abs() < 1e-9);

        let link0 = &snapshot.link_stats[0];
        assert_eq!(link0.requests, 2);
        assert_eq!(link0.timeouts, 1);
        assert_eq!(link0.current_timeout, Duration::from_secs(2));
        assert_eq!(link0.average_rtt(), None);
        assert!((link0.loss_rate() - 0.5).abs() < 1e-9);

        assert_eq!(snapshot.link_stats[1].chunks, 1);
    }

    #[test]
    fn test_unknown_link_is_ignored() {
        let stats = StatsAggregator::new(1, 10, 1);
        stats.record_request(7);
        assert_eq!(stats.snapshot().total_requests, 1);
    }

    #[test]
    fn test_progress_and_reset() {
        let stats = StatsAggregator::new(1, 4000, 4);
        stats.record_request(0);
        stats.record_chunk(0, 1000, Some(Duration::from_millis(10)));

        let progress = stats.progress(1000);
        assert!((progress.percent() - 25.0).abs() < 1e-9);
        assert_eq!(progress.average_rtt, Some(Duration::from_millis(10)));
        assert!(progress.to_string().starts_with("Progress: 25.0%"));

        stats.reset(1, 10, 1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert!(snapshot.rtt_samples.is_empty());
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(StatsAggregator::new(4, 0, 0));

        let handles: Vec<_> = (0..4u8)
            .map(|link| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_request(link);
                        stats.record_timeout(link, Duration::from_secs(1));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 4000);
        assert_eq!(snapshot.retransmissions, 4000);
        assert!(snapshot.link_stats.iter().all(|l| l.requests == 1000));
    }
}
