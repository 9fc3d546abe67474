//! 참조 응답자 (서버측)
//!
//! 메모리에 올린 파일로 목록/크기/범위 요청에 응답.
//! 손실 시뮬레이션용 드롭 필터와 무작위 손실률 지원

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::packet::{self, FileEntry, PacketHeader, RequestKind};
use crate::Result;

/// 알 수 없는 파일 ID
pub const ERR_UNKNOWN_FILE: u8 = 101;

/// 지원하지 않는 요청 종류
pub const ERR_UNSUPPORTED: u8 = 102;

/// 응답자가 보관하는 파일
#[derive(Debug, Clone)]
pub struct HostedFile {
    pub id: u8,
    pub name: String,
    pub data: Bytes,
}

impl HostedFile {
    pub fn new(id: u8, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            name: name.into(),
            data: data.into(),
        }
    }
}

/// 요청 헤더를 보고 응답을 버릴지 결정
pub type DropFilter = Arc<dyn Fn(&PacketHeader) -> bool + Send + Sync>;

/// 참조 응답자
pub struct Responder {
    files: Vec<HostedFile>,
    drop_filter: Option<DropFilter>,
    loss_rate: f64,
    served: AtomicU64,
    dropped: AtomicU64,
}

impl Responder {
    pub fn new(files: Vec<HostedFile>) -> Self {
        Self {
            files,
            drop_filter: None,
            loss_rate: 0.0,
            served: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// 드롭 필터 설정 (true면 응답 버림)
    pub fn with_drop_filter(
        mut self,
        filter: impl Fn(&PacketHeader) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.drop_filter = Some(Arc::new(filter));
        self
    }

    /// 무작위 응답 손실률 (0.0 ~ 1.0)
    pub fn with_loss_rate(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
        self
    }

    fn file(&self, id: u8) -> Option<&HostedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    /// 요청 하나에 대한 응답 생성. 10바이트 미만 요청은 무시
    pub fn handle(&self, request: &[u8]) -> Result<Option<Vec<u8>>> {
        let Ok(request) = packet::decode(request) else {
            return Ok(None);
        };
        let header = request.header;

        let response = match header.request_kind() {
            Some(RequestKind::ListFiles) => {
                let entries: Vec<FileEntry> = self
                    .files
                    .iter()
                    .map(|f| FileEntry::new(f.id, f.name.clone()))
                    .collect();
                let reply = PacketHeader::new(header.kind, entries.len() as u8, 0, 0);
                packet::encode(&reply, &packet::encode_catalog(&entries))?
            }
            Some(RequestKind::GetFileSize) => match self.file(header.file_id) {
                Some(file) => {
                    let reply = PacketHeader::file_size(file.id);
                    packet::encode(&reply, &packet::encode_size(file.data.len() as u32))?
                }
                None => error_reply(ERR_UNKNOWN_FILE, header.file_id)?,
            },
            Some(RequestKind::GetRange) => match self.file(header.file_id) {
                Some(file) => {
                    let len = file.data.len();
                    let start = (header.range_start as usize).min(len);
                    let end = (header.range_end as usize).saturating_add(1).clamp(start, len);
                    let reply =
                        PacketHeader::range(file.id, header.range_start, header.range_end);
                    packet::encode(&reply, &file.data[start..end])?
                }
                None => error_reply(ERR_UNKNOWN_FILE, header.file_id)?,
            },
            None => error_reply(ERR_UNSUPPORTED, header.file_id)?,
        };

        if self.should_drop(&header) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("응답 드롭: {:?}", header);
            return Ok(None);
        }

        self.served.fetch_add(1, Ordering::Relaxed);
        Ok(Some(response))
    }

    fn should_drop(&self, header: &PacketHeader) -> bool {
        if let Some(filter) = &self.drop_filter {
            if filter(header) {
                return true;
            }
        }
        self.loss_rate > 0.0 && rand::thread_rng().gen_bool(self.loss_rate)
    }

    /// 보낸 응답 수
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// 버린 응답 수
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 소켓에서 요청을 계속 처리
    pub async fn serve(self: Arc<Self>, socket: UdpSocket) -> Result<()> {
        let mut buf = vec![0u8; 65535];

        loop {
            let (len, addr) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    continue;
                }
            };

            match self.handle(&buf[..len]) {
                Ok(Some(response)) => {
                    if let Err(e) = socket.send_to(&response, addr).await {
                        warn!("송신 에러 ({}): {}", addr, e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("응답 생성 실패: {}", e),
            }
        }
    }

    /// 주소에 바인드하고 백그라운드 태스크로 실행
    pub async fn spawn(
        self,
        bind_addr: SocketAddr,
    ) -> Result<(SocketAddr, Arc<Self>, JoinHandle<Result<()>>)> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let responder = Arc::new(self);
        let handle = tokio::spawn(responder.clone().serve(socket));
        Ok((local_addr, responder, handle))
    }
}

fn error_reply(code: u8, file_id: u8) -> Result<Vec<u8>> {
    packet::encode(&PacketHeader::new(code, file_id, 0, 0), &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> Responder {
        Responder::new(vec![
            HostedFile::new(1, "odev.txt", vec![b'A'; 5000]),
            HostedFile::new(2, "digits.bin", (0u8..10).collect::<Vec<_>>()),
        ])
    }

    fn request(header: PacketHeader) -> Vec<u8> {
        packet::encode(&header, &[]).unwrap()
    }

    #[test]
    fn test_list_files() {
        let raw = responder()
            .handle(&request(PacketHeader::list_files()))
            .unwrap()
            .unwrap();
        let reply = packet::decode(&raw).unwrap();

        assert_eq!(reply.header.kind, 1);
        assert_eq!(reply.header.file_id, 2);
        assert_eq!(
            packet::decode_catalog(reply.header.file_id, reply.payload),
            vec![FileEntry::new(1, "odev.txt"), FileEntry::new(2, "digits.bin")]
        );
    }

    #[test]
    fn test_file_size() {
        let r = responder();
        let raw = r.handle(&request(PacketHeader::file_size(1))).unwrap().unwrap();
        let reply = packet::decode(&raw).unwrap();
        assert_eq!(reply.header.kind, 2);
        assert_eq!(reply.header.file_id, 1);
        assert_eq!(packet::decode_size(reply.payload), Some(5000));

        let raw = r.handle(&request(PacketHeader::file_size(9))).unwrap().unwrap();
        assert_eq!(packet::decode(&raw).unwrap().header.kind, ERR_UNKNOWN_FILE);
    }

    #[test]
    fn test_range_is_clipped() {
        let r = responder();

        let raw = r.handle(&request(PacketHeader::range(2, 3, 5))).unwrap().unwrap();
        let reply = packet::decode(&raw).unwrap();
        assert_eq!(reply.header, PacketHeader::range(2, 3, 5));
        assert_eq!(reply.payload, &[3, 4, 5]);

        // 파일 끝을 넘는 범위
        let raw = r.handle(&request(PacketHeader::range(2, 8, 20))).unwrap().unwrap();
        assert_eq!(packet::decode(&raw).unwrap().payload, &[8, 9]);

        let raw = r.handle(&request(PacketHeader::range(2, 50, 60))).unwrap().unwrap();
        assert!(packet::decode(&raw).unwrap().payload.is_empty());

        let raw = r
            .handle(&request(PacketHeader::range(2, 0, u32::MAX)))
            .unwrap()
            .unwrap();
        assert_eq!(packet::decode(&raw).unwrap().payload.len(), 10);
    }

    #[test]
    fn test_bad_requests() {
        let r = responder();
        assert!(r.handle(&[3, 1, 0]).unwrap().is_none());

        let raw = r
            .handle(&request(PacketHeader::new(42, 1, 0, 0)))
            .unwrap()
            .unwrap();
        assert_eq!(packet::decode(&raw).unwrap().header.kind, ERR_UNSUPPORTED);
    }

    #[test]
    fn test_drop_filter() {
        let r = responder().with_drop_filter(|h| h.kind == 3 && h.range_start == 0);

        assert!(r.handle(&request(PacketHeader::range(1, 0, 9))).unwrap().is_none());
        assert!(r.handle(&request(PacketHeader::range(1, 10, 19))).unwrap().is_some());
        assert_eq!(r.dropped(), 1);
        assert_eq!(r.served(), 1);
    }

    #[test]
    fn test_full_loss_rate() {
        let r = responder().with_loss_rate(1.0);
        assert!(r.handle(&request(PacketHeader::list_files())).unwrap().is_none());
    }
}
