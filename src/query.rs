//! 목록/크기 질의
//!
//! 요청 한 번, 고정 타임아웃, 재시도 없음. 타임아웃은 "데이터 없음"으로 취급

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::link::LinkEndpoint;
use crate::packet::{self, FileEntry, PacketHeader, RequestKind};
use crate::Result;

/// 파일 목록 조회. 타임아웃이면 빈 목록
pub async fn list_files(link: &LinkEndpoint, timeout: Duration) -> Result<Vec<FileEntry>> {
    link.send_request(&PacketHeader::list_files()).await?;

    let mut buf = vec![0u8; 65535];
    let deadline = Instant::now() + timeout;

    while let Some(len) = link.recv_until(&mut buf, deadline).await? {
        let Ok(reply) = packet::decode(&buf[..len]) else {
            continue;
        };

        if reply.header.request_kind() == Some(RequestKind::ListFiles) {
            // 응답의 file_id 필드는 파일 개수
            return Ok(packet::decode_catalog(reply.header.file_id, reply.payload));
        }
        debug!("목록 응답 대기 중 무관한 패킷 무시: kind={}", reply.header.kind);
    }

    debug!("파일 목록 조회 타임아웃");
    Ok(Vec::new())
}

/// 파일 크기 조회. 타임아웃/불일치/서버 에러면 None
pub async fn file_size(link: &LinkEndpoint, file_id: u8, timeout: Duration) -> Result<Option<u32>> {
    link.send_request(&PacketHeader::file_size(file_id)).await?;

    let mut buf = vec![0u8; 2048];
    let deadline = Instant::now() + timeout;

    while let Some(len) = link.recv_until(&mut buf, deadline).await? {
        let Ok(reply) = packet::decode(&buf[..len]) else {
            continue;
        };
        let header = reply.header;

        if header.request_kind() == Some(RequestKind::GetFileSize) && header.file_id == file_id {
            return Ok(packet::decode_size(reply.payload));
        }
        if header.is_server_error() && header.file_id == file_id {
            debug!("파일 {} 크기 조회: 서버 에러 {}", file_id, header.kind);
            return Ok(None);
        }
    }

    debug!("파일 {} 크기 조회 타임아웃", file_id);
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    use crate::responder::{HostedFile, Responder};

    async fn start() -> LinkEndpoint {
        let responder = Responder::new(vec![HostedFile::new(1, "odev.txt", vec![b'A'; 5000])]);
        let (addr, _, _) = responder.spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        LinkEndpoint::bind(0, addr).await.unwrap()
    }

    #[tokio::test]
    async fn test_list_and_size() {
        let link = start().await;
        let timeout = Duration::from_secs(3);

        let files = list_files(&link, timeout).await.unwrap();
        assert_eq!(files, vec![FileEntry::new(1, "odev.txt")]);

        assert_eq!(file_size(&link, 1, timeout).await.unwrap(), Some(5000));
        assert_eq!(file_size(&link, 7, timeout).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_timeouts_mean_no_data() {
        // 응답하지 않는 서버
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let link = LinkEndpoint::bind(0, silent.local_addr().unwrap())
            .await
            .unwrap();
        let timeout = Duration::from_millis(50);

        assert!(list_files(&link, timeout).await.unwrap().is_empty());
        assert_eq!(file_size(&link, 1, timeout).await.unwrap(), None);
    }
}
