use super::{resolve, NetAddr, Network};
use crate::error::{RelayError, Result};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
#[cfg(unix)]
use tokio::net::UnixDatagram;
use tracing::debug;

#[cfg(unix)]
use super::listener::UnlinkOnDrop;

enum SocketInner {
    Udp(UdpSocket),
    #[cfg(unix)]
    Unix(UnixDatagram),
}

/// 本地监听的数据报套接字（UDP 或 Unix 数据报）
pub struct DatagramSocket {
    inner: SocketInner,
    #[cfg(unix)]
    _unlink: Option<UnlinkOnDrop>,
}

impl DatagramSocket {
    /// 绑定本地地址
    pub async fn bind(network: Network, address: &str) -> Result<Self> {
        match network {
            Network::Udp | Network::Udp4 | Network::Udp6 => {
                let addrs = resolve(network, address)
                    .await
                    .map_err(|e| RelayError::listen(address, e))?;
                let socket = UdpSocket::bind(&addrs[..])
                    .await
                    .map_err(|e| RelayError::listen(address, e))?;
                debug!("Bound {} socket on {}", network, address);
                Ok(Self {
                    inner: SocketInner::Udp(socket),
                    #[cfg(unix)]
                    _unlink: None,
                })
            }
            #[cfg(unix)]
            Network::Unixgram => {
                let socket =
                    UnixDatagram::bind(address).map_err(|e| RelayError::listen(address, e))?;
                debug!("Bound unixgram socket on {}", address);
                Ok(Self {
                    inner: SocketInner::Unix(socket),
                    _unlink: Some(UnlinkOnDrop::new(address)),
                })
            }
            _ => Err(RelayError::UnsupportedNetwork(network.to_string())),
        }
    }

    /// 接收一个数据报，返回长度和发送方地址
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, NetAddr)> {
        match &self.inner {
            SocketInner::Udp(socket) => {
                let (n, addr) = socket.recv_from(buf).await?;
                Ok((n, NetAddr::Inet(addr)))
            }
            #[cfg(unix)]
            SocketInner::Unix(socket) => {
                let (n, addr) = socket.recv_from(buf).await?;
                Ok((n, NetAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf()))))
            }
        }
    }

    /// 向指定对端发送一个数据报
    pub async fn send_to(&self, buf: &[u8], peer: &NetAddr) -> io::Result<usize> {
        match (&self.inner, peer) {
            (SocketInner::Udp(socket), NetAddr::Inet(addr)) => socket.send_to(buf, addr).await,
            #[cfg(unix)]
            (SocketInner::Unix(socket), NetAddr::Unix(Some(path))) => {
                socket.send_to(buf, path).await
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot send to peer {}", peer),
            )),
        }
    }

    pub fn local_addr(&self) -> io::Result<NetAddr> {
        match &self.inner {
            SocketInner::Udp(socket) => socket.local_addr().map(NetAddr::Inet),
            #[cfg(unix)]
            SocketInner::Unix(socket) => {
                let addr = socket.local_addr()?;
                Ok(NetAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf())))
            }
        }
    }
}

enum StreamInner {
    Udp(UdpSocket),
    #[cfg(unix)]
    Unix(UnixDatagram),
}

/// 已连接的数据报套接字，作为 [`Connection`](super::Connection) 使用
///
/// 每次 read 返回一个数据报，每次 write 发送一个数据报。
pub struct DatagramStream {
    inner: StreamInner,
}

impl DatagramStream {
    /// 连接到第一个可用的 UDP 地址
    pub async fn connect_udp(addrs: &[SocketAddr]) -> io::Result<Self> {
        let mut last_err = None;
        for addr in addrs {
            let bind_addr: SocketAddr = if addr.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = match UdpSocket::bind(bind_addr).await {
                Ok(socket) => socket,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            match socket.connect(addr).await {
                Ok(()) => {
                    return Ok(Self {
                        inner: StreamInner::Udp(socket),
                    })
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to")
        }))
    }

    /// 连接到 Unix 数据报套接字（本端不绑定路径）
    #[cfg(unix)]
    pub fn connect_unix(path: &str) -> io::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(path)?;
        Ok(Self {
            inner: StreamInner::Unix(socket),
        })
    }
}

impl AsyncRead for DatagramStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &self.inner {
            StreamInner::Udp(socket) => socket.poll_recv(cx, buf),
            #[cfg(unix)]
            StreamInner::Unix(socket) => socket.poll_recv(cx, buf),
        }
    }
}

impl AsyncWrite for DatagramStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &self.inner {
            StreamInner::Udp(socket) => socket.poll_send(cx, buf),
            #[cfg(unix)]
            StreamInner::Unix(socket) => socket.poll_send(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_datagram_stream_keeps_boundaries() {
        let server = DatagramSocket::bind(Network::Udp, "127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap().as_inet().unwrap();

        let mut client = DatagramStream::connect_udp(&[server_addr]).await.unwrap();
        client.write_all(b"first").await.unwrap();
        client.write_all(b"second").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");
        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");

        server.send_to(b"reply", &peer).await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"reply");
    }

    #[tokio::test]
    async fn test_send_to_mismatched_peer() {
        let server = DatagramSocket::bind(Network::Udp, "127.0.0.1:0").await.unwrap();
        let err = server.send_to(b"x", &NetAddr::Unix(None)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_raw_ip_unsupported() {
        let result = DatagramSocket::bind(Network::Ip4, "127.0.0.1").await;
        assert!(matches!(result, Err(RelayError::UnsupportedNetwork(_))));
    }
}
