//! 링크 (서버 하나당 UDP 소켓 하나)
//!
//! 전송 중에는 워커 하나만 사용. 소켓은 connect 하지 않고 송신자 주소로 걸러냄
//! (connect 된 소켓은 ICMP unreachable을 recv 에러로 돌려주기 때문)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::trace;

use crate::chunk::LinkId;
use crate::packet::{self, PacketHeader};
use crate::Result;

/// 링크 엔드포인트
#[derive(Debug, Clone)]
pub struct LinkEndpoint {
    /// 링크 ID
    id: LinkId,

    /// 로컬 소켓
    socket: Arc<UdpSocket>,

    /// 서버 주소
    remote_addr: SocketAddr,
}

impl LinkEndpoint {
    /// 서버 주소와 같은 주소 체계의 임의 포트에 바인드
    pub async fn bind(id: LinkId, remote_addr: SocketAddr) -> Result<Self> {
        let local_ip = match remote_addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self::bind_with(id, SocketAddr::new(local_ip, 0), remote_addr).await
    }

    /// 지정한 로컬 주소에 바인드
    pub async fn bind_with(
        id: LinkId,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(Self {
            id,
            socket: Arc::new(socket),
            remote_addr,
        })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 원시 데이터그램 송신
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.socket.send_to(bytes, self.remote_addr).await?;
        Ok(())
    }

    /// 요청 인코딩 후 송신
    pub async fn send_request(&self, header: &PacketHeader) -> Result<()> {
        let bytes = packet::encode(header, &[])?;
        self.send(&bytes).await
    }

    /// 서버에서 온 데이터그램 하나 수신 (다른 주소는 버림)
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let (len, from) = self.socket.recv_from(buf).await?;
            if from == self.remote_addr {
                return Ok(len);
            }
            trace!("링크 {}: 알 수 없는 송신자 {} 무시", self.id, from);
        }
    }

    /// 마감 시각까지 수신. 마감이 지나면 Ok(None)
    pub async fn recv_until(&self, buf: &mut [u8], deadline: Instant) -> Result<Option<usize>> {
        match tokio::time::timeout_at(deadline, self.recv(buf)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}
