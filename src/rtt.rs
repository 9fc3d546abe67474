//! 링크별 적응형 타임아웃 (Jacobson/Karn)
//!
//! 워커 하나가 독점 소유하므로 동기화 없음

use std::time::Duration;

/// EstimatedRTT 가중치
pub const ALPHA: f64 = 0.125;

/// DevRTT 가중치
pub const BETA: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    pub estimated_rtt: f64, // seconds
    pub deviation_rtt: f64, // seconds
    pub timeout: f64,       // seconds
    max_timeout: f64,
}

impl RttEstimator {
    pub fn new(initial_timeout: Duration, max_timeout: Duration) -> Self {
        let initial = initial_timeout.as_secs_f64();
        Self {
            estimated_rtt: initial,
            deviation_rtt: 0.0,
            timeout: initial,
            max_timeout: max_timeout.as_secs_f64().max(initial),
        }
    }

    // 호출 위치: 첫 시도에 대한 응답 수신 시 (재전송 요청은 샘플링 금지)
    pub fn on_sample(&mut self, sample: Duration) {
        let s = sample.as_secs_f64();

        self.estimated_rtt = (1.0 - ALPHA) * self.estimated_rtt + ALPHA * s;
        // 갱신된 estimated_rtt 기준 편차
        self.deviation_rtt =
            (1.0 - BETA) * self.deviation_rtt + BETA * (s - self.estimated_rtt).abs();
        self.timeout = (self.estimated_rtt + 4.0 * self.deviation_rtt).min(self.max_timeout);
    }

    // 호출 위치: 응답 대기 타임아웃
    pub fn on_timeout(&mut self) {
        self.timeout = (self.timeout * 2.0).min(self.max_timeout);
    }

    pub fn current_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn estimated(&self) -> Duration {
        Duration::from_secs_f64(self.estimated_rtt)
    }

    pub fn deviation(&self) -> Duration {
        Duration::from_secs_f64(self.deviation_rtt)
    }
}
