//! 클라이언트 (수신측)
//!
//! - 서버마다 링크 하나, 링크마다 워커 하나
//! - 링크는 다운로드마다 새로 바인드 (취소된 워커가 남아 있어도 소켓을 공유하지 않음)
//! - 목록/크기 질의는 별도 소켓 사용
//! - 보고 루프가 주기적으로 진행 상황을 읽고, 큐가 비면 재조립
//! - 취소 시 보고 루프는 즉시 반환하고 큐를 닫음 (진행 중인 요청은 끝까지 처리)

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::chunk::{self, ChunkSlots, LinkId};
use crate::config::ServerErrorPolicy;
use crate::link::LinkEndpoint;
use crate::packet::FileEntry;
use crate::queue::WorkQueue;
use crate::reassembly::{self, FileDigest};
use crate::stats::{Progress, StatsAggregator, TransferStats};
use crate::worker::{TransferWorker, WorkerReport};
use crate::{query, Config, Error, Result};

/// 완료된 다운로드
#[derive(Debug, Clone)]
pub struct Download {
    /// 파일 ID
    pub file_id: u8,

    /// 재조립된 파일
    pub data: Bytes,

    /// MD5 다이제스트
    pub digest: FileDigest,

    /// 최종 통계
    pub stats: TransferStats,

    /// 워커별 보고
    pub reports: Vec<WorkerReport>,
}

impl Download {
    /// 16진수 다이제스트
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// 파일로 저장
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path, &self.data).await?;
        Ok(())
    }
}

/// RDTP 클라이언트
pub struct Client {
    config: Config,
    servers: Vec<SocketAddr>,

    /// 질의 전용 링크 (첫 번째 서버)
    query_link: LinkEndpoint,
}

impl Client {
    /// 서버 목록 검증과 질의 링크 생성
    pub async fn connect(config: Config, servers: &[SocketAddr]) -> Result<Self> {
        config.validate()?;
        if servers.is_empty() {
            return Err(Error::NoLinks);
        }
        if servers.len() > LinkId::MAX as usize + 1 {
            return Err(Error::InvalidConfig(format!(
                "too many servers: {}",
                servers.len()
            )));
        }

        let query_link = LinkEndpoint::bind(0, servers[0]).await?;
        info!(
            "Query link bound to {} -> {}",
            query_link.local_addr()?,
            servers[0]
        );

        Ok(Self {
            config,
            servers: servers.to_vec(),
            query_link,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// 전송용 링크를 서버마다 새로 바인드
    async fn bind_links(&self) -> Result<Vec<LinkEndpoint>> {
        let mut links = Vec::with_capacity(self.servers.len());
        for (id, &server) in self.servers.iter().enumerate() {
            let link = LinkEndpoint::bind(id as LinkId, server).await?;
            debug!("Link {} bound to {} -> {}", id, link.local_addr()?, server);
            links.push(link);
        }
        Ok(links)
    }

    /// 파일 목록 (타임아웃이면 빈 목록)
    pub async fn list_files(&self) -> Result<Vec<FileEntry>> {
        query::list_files(&self.query_link, self.config.query_timeout).await
    }

    /// 파일 크기 (타임아웃이면 None)
    pub async fn file_size(&self, file_id: u8) -> Result<Option<u32>> {
        query::file_size(&self.query_link, file_id, self.config.query_timeout).await
    }

    /// 파일 다운로드 (진행 상황은 로그로 출력)
    pub async fn download(&self, file_id: u8, file_size: u32) -> Result<Download> {
        self.download_with(file_id, file_size, std::future::pending::<()>(), |progress| {
            info!("{}", progress)
        })
        .await
    }

    /// 취소 future와 진행 콜백을 지정한 다운로드
    pub async fn download_with<C, P>(
        &self,
        file_id: u8,
        file_size: u32,
        cancel: C,
        mut on_progress: P,
    ) -> Result<Download>
    where
        C: Future<Output = ()>,
        P: FnMut(&Progress),
    {
        let links = self.bind_links().await?;
        let descriptors = chunk::plan(file_size, self.config.max_payload);
        let total_chunks = descriptors.len();

        info!(
            "Downloading file {} ({} bytes, {} chunks, {} links)",
            file_id,
            file_size,
            total_chunks,
            links.len()
        );

        let queue = Arc::new(WorkQueue::with_descriptors(
            descriptors,
            self.config.max_requeues,
        )?);
        let slots = Arc::new(ChunkSlots::new(total_chunks));
        let stats = Arc::new(StatsAggregator::new(
            links.len(),
            file_size as u64,
            total_chunks,
        ));

        let handles: Vec<_> = links
            .into_iter()
            .map(|link| {
                let worker = TransferWorker::new(
                    link,
                    file_id,
                    queue.clone(),
                    slots.clone(),
                    stats.clone(),
                    &self.config,
                );
                tokio::spawn(worker.run())
            })
            .collect();

        // 보고 루프
        let drained = queue.wait_drained();
        tokio::pin!(drained);
        tokio::pin!(cancel);
        let mut ticker = tokio::time::interval(self.config.report_interval);

        loop {
            tokio::select! {
                biased;

                _ = &mut drained => break,
                _ = &mut cancel => {
                    warn!("Download of file {} cancelled", file_id);
                    queue.close();
                    return Err(Error::Cancelled);
                }
                _ = ticker.tick() => {
                    on_progress(&stats.progress(slots.filled_bytes()));
                }
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle.await.map_err(|e| Error::Worker(e.to_string()))?;
            reports.push(report);
        }

        on_progress(&stats.progress(slots.filled_bytes()));

        if self.config.server_error_policy == ServerErrorPolicy::AbortTransfer {
            if let Some(code) = reports.iter().find_map(|r| r.server_error) {
                return Err(Error::ServerError { code });
            }
        }

        let assembled = reassembly::reassemble(&slots, file_size)?;
        let stats = stats.snapshot();

        info!("Download complete: {}", stats.summary());
        info!("MD5: {}", assembled.digest_hex());

        Ok(Download {
            file_id,
            data: assembled.data,
            digest: assembled.digest,
            stats,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::packet::RequestKind;
    use crate::reassembly::digest;
    use crate::responder::{HostedFile, Responder};

    fn test_config() -> Config {
        Config {
            initial_timeout: Duration::from_millis(200),
            max_timeout: Duration::from_secs(2),
            report_interval: Duration::from_millis(50),
            ..Config::default()
        }
    }

    fn fixture() -> Vec<u8> {
        vec![b'A'; 5000]
    }

    async fn serve(responder: Responder) -> SocketAddr {
        let (addr, _, _) = responder.spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        addr
    }

    #[tokio::test]
    async fn test_lossless_single_link() {
        let addr = serve(Responder::new(vec![HostedFile::new(1, "odev.txt", fixture())])).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();

        assert_eq!(
            client.list_files().await.unwrap(),
            vec![FileEntry::new(1, "odev.txt")]
        );
        let size = client.file_size(1).await.unwrap().unwrap();
        assert_eq!(size, 5000);

        let download = client.download(1, size).await.unwrap();

        assert_eq!(download.data.len(), 5000);
        assert_eq!(download.digest, digest(&fixture()));
        assert_eq!(download.stats.total_chunks, 5);
        assert_eq!(download.stats.total_bytes, 5000);
        assert_eq!(download.stats.retransmissions, 0);
        assert_eq!(download.stats.rtt_samples.len(), 5);
        assert_eq!(download.reports[0].filled, 5);
    }

    #[tokio::test]
    async fn test_digest_is_reproducible() {
        let addr = serve(Responder::new(vec![HostedFile::new(1, "odev.txt", fixture())])).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();

        let first = client.download(1, 5000).await.unwrap();
        let second = client.download(1, 5000).await.unwrap();
        assert_eq!(first.digest_hex(), second.digest_hex());
        assert_eq!(first.digest_hex(), hex::encode(digest(&fixture())));
    }

    #[tokio::test]
    async fn test_lost_response_is_retried() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let responder = Responder::new(vec![HostedFile::new(1, "odev.txt", fixture())])
            .with_drop_filter(move |h| {
                h.request_kind() == Some(RequestKind::GetRange)
                    && h.range_start == 2000
                    && !flag.swap(true, Ordering::SeqCst)
            });
        let addr = serve(responder).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();

        let download = client.download(1, 5000).await.unwrap();

        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(download.stats.retransmissions, 1);
        assert_eq!(download.stats.total_requests, 6);
        assert!(download.stats.link_stats[0].timeouts == 1);
        assert_eq!(download.digest, digest(&fixture()));
    }

    #[tokio::test]
    async fn test_two_links_fill_each_slot_once() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let a = serve(Responder::new(vec![HostedFile::new(4, "pattern.bin", data.clone())])).await;
        let b = serve(Responder::new(vec![HostedFile::new(4, "pattern.bin", data.clone())])).await;
        let client = Client::connect(test_config(), &[a, b]).await.unwrap();
        assert_eq!(client.servers().len(), 2);

        let download = client.download(4, data.len() as u32).await.unwrap();

        assert_eq!(download.data.as_ref(), data.as_slice());
        assert_eq!(download.stats.total_chunks, 10);

        let filled: u64 = download.reports.iter().map(|r| r.filled).sum();
        assert_eq!(filled, 10);
        let per_link: u64 = download.stats.link_stats.iter().map(|l| l.chunks).sum();
        assert_eq!(per_link, 10);
        assert_eq!(download.stats.total_bytes, 10_000);
    }

    #[tokio::test]
    async fn test_random_loss_still_completes() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let lossy = serve(
            Responder::new(vec![HostedFile::new(1, "f", data.clone())]).with_loss_rate(0.2),
        )
        .await;
        let clean = serve(Responder::new(vec![HostedFile::new(1, "f", data.clone())])).await;
        let config = Config {
            initial_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_millis(400),
            max_attempts: 3,
            ..test_config()
        };
        let client = Client::connect(config, &[lossy, clean]).await.unwrap();

        let download = client.download(1, data.len() as u32).await.unwrap();
        assert_eq!(download.digest, digest(&data));
    }

    #[tokio::test]
    async fn test_short_final_chunk() {
        let data = vec![7u8; 2500];
        let addr = serve(Responder::new(vec![HostedFile::new(1, "f", data.clone())])).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();

        let download = client.download(1, 2500).await.unwrap();
        assert_eq!(download.data.len(), 2500);
        assert_eq!(download.stats.short_payloads, 0);
    }

    #[tokio::test]
    async fn test_size_larger_than_file_is_incomplete() {
        // 서버 파일은 2500 bytes지만 3000 bytes로 요청
        let addr = serve(Responder::new(vec![HostedFile::new(1, "f", vec![1u8; 2500])])).await;
        let config = Config {
            max_attempts: 1,
            max_requeues: Some(0),
            ..test_config()
        };
        let client = Client::connect(config, &[addr]).await.unwrap();

        match client.download(1, 3000).await {
            Err(Error::Incomplete {
                received, expected, ..
            }) => {
                assert_eq!(received, 2500);
                assert_eq!(expected, 3000);
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.data.len())),
        }
    }

    #[tokio::test]
    async fn test_server_error_abandons_chunks() {
        let addr = serve(Responder::new(vec![HostedFile::new(1, "f", fixture())])).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();

        match client.download(9, 3000).await {
            Err(Error::Incomplete { missing, .. }) => assert_eq!(missing, vec![0, 1, 2]),
            other => panic!("unexpected result: {:?}", other.map(|d| d.data.len())),
        }
    }

    #[tokio::test]
    async fn test_server_error_aborts_transfer() {
        let addr = serve(Responder::new(vec![HostedFile::new(1, "f", fixture())])).await;
        let config = Config {
            server_error_policy: ServerErrorPolicy::AbortTransfer,
            ..test_config()
        };
        let client = Client::connect(config, &[addr]).await.unwrap();

        assert!(matches!(
            client.download(9, 3000).await,
            Err(Error::ServerError { code: 101 })
        ));
    }

    #[tokio::test]
    async fn test_cancel_returns_immediately() {
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = Client::connect(test_config(), &[silent.local_addr().unwrap()])
            .await
            .unwrap();

        let mut reports = 0;
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            client.download_with(
                1,
                5000,
                tokio::time::sleep(Duration::from_millis(120)),
                |_| reports += 1,
            ),
        )
        .await
        .expect("cancel should end the reporting loop");

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(reports >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_reusable_after_cancel() {
        let dropping = Arc::new(AtomicBool::new(true));
        let flag = dropping.clone();
        let responder = Responder::new(vec![HostedFile::new(1, "odev.txt", fixture())])
            .with_drop_filter(move |h| {
                h.request_kind() == Some(RequestKind::GetRange) && flag.load(Ordering::SeqCst)
            });
        let addr = serve(responder).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();

        for _ in 0..3 {
            dropping.store(true, Ordering::SeqCst);
            let result = client
                .download_with(1, 5000, tokio::time::sleep(Duration::from_millis(50)), |_| {})
                .await;
            assert!(matches!(result, Err(Error::Cancelled)));

            // 취소된 워커는 아직 재시도 중
            dropping.store(false, Ordering::SeqCst);

            assert_eq!(
                client.list_files().await.unwrap(),
                vec![FileEntry::new(1, "odev.txt")]
            );
            assert_eq!(client.file_size(1).await.unwrap(), Some(5000));

            let download = client.download(1, 5000).await.unwrap();
            assert_eq!(download.stats.retransmissions, 0);
            assert_eq!(download.stats.stale_responses, 0);
            assert_eq!(download.digest, digest(&fixture()));
        }
    }

    #[tokio::test]
    async fn test_empty_file() {
        let addr = serve(Responder::new(vec![HostedFile::new(1, "empty", Vec::new())])).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();

        let download = client.download(1, 0).await.unwrap();
        assert!(download.data.is_empty());
        assert_eq!(download.digest_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_save_download() {
        let addr = serve(Responder::new(vec![HostedFile::new(1, "odev.txt", fixture())])).await;
        let client = Client::connect(test_config(), &[addr]).await.unwrap();
        let download = client.download(1, 5000).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odev.txt");
        download.save(&path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), fixture());
    }

    #[tokio::test]
    async fn test_connect_requires_servers() {
        assert!(matches!(
            Client::connect(Config::default(), &[]).await,
            Err(Error::NoLinks)
        ));
    }
}
