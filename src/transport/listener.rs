use super::{resolve, BoxedConnection, DatagramSocket, NetAddr, Network, TransportKind};
use crate::error::{RelayError, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// 监听句柄：流式监听器或数据报套接字，创建后类型不再改变
pub enum Listener {
    Stream(StreamListener),
    Datagram(Arc<DatagramSocket>),
}

impl Listener {
    pub fn kind(&self) -> TransportKind {
        match self {
            Listener::Stream(_) => TransportKind::Stream,
            Listener::Datagram(_) => TransportKind::Datagram,
        }
    }

    pub fn local_addr(&self) -> io::Result<NetAddr> {
        match self {
            Listener::Stream(listener) => listener.local_addr(),
            Listener::Datagram(socket) => socket.local_addr(),
        }
    }
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// 流式监听器（TCP 或 Unix），可选在接入连接上做 TLS 服务端握手
pub struct StreamListener {
    inner: ListenerInner,
    acceptor: Option<TlsAcceptor>,
    _unlink: Option<UnlinkOnDrop>,
}

impl StreamListener {
    /// 绑定本地地址
    pub async fn bind(
        network: Network,
        address: &str,
        acceptor: Option<TlsAcceptor>,
    ) -> Result<Self> {
        let (inner, unlink) = match network {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
                let addrs = resolve(network, address)
                    .await
                    .map_err(|e| RelayError::listen(address, e))?;
                let listener = TcpListener::bind(&addrs[..])
                    .await
                    .map_err(|e| RelayError::listen(address, e))?;
                (ListenerInner::Tcp(listener), None)
            }
            #[cfg(unix)]
            Network::Unix => {
                let listener =
                    UnixListener::bind(address).map_err(|e| RelayError::listen(address, e))?;
                (
                    ListenerInner::Unix(listener),
                    Some(UnlinkOnDrop::new(address)),
                )
            }
            _ => return Err(RelayError::UnsupportedNetwork(network.to_string())),
        };

        info!(
            "Listening on {}://{}{}",
            network,
            address,
            if acceptor.is_some() { " (TLS)" } else { "" }
        );

        Ok(Self {
            inner,
            acceptor,
            _unlink: unlink,
        })
    }

    /// 接受一个新的接入连接
    ///
    /// TLS 握手不在这里进行，而是由 [`Incoming::establish`] 在连接自己的任务中完成，
    /// 慢速客户端不会阻塞 accept 循环。
    pub async fn accept(&self) -> io::Result<Incoming> {
        let (stream, peer): (BoxedConnection, NetAddr) = match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }
                (Box::pin(stream), NetAddr::Inet(peer))
            }
            #[cfg(unix)]
            ListenerInner::Unix(listener) => {
                let (stream, peer) = listener.accept().await?;
                let peer = NetAddr::Unix(peer.as_pathname().map(|p| p.to_path_buf()));
                (Box::pin(stream), peer)
            }
        };

        Ok(Incoming {
            stream,
            peer,
            acceptor: self.acceptor.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<NetAddr> {
        match &self.inner {
            ListenerInner::Tcp(listener) => listener.local_addr().map(NetAddr::Inet),
            #[cfg(unix)]
            ListenerInner::Unix(listener) => {
                let addr = listener.local_addr()?;
                Ok(NetAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf())))
            }
        }
    }

    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }
}

/// 已接受但尚未完成 TLS 协商的连接
pub struct Incoming {
    stream: BoxedConnection,
    peer: NetAddr,
    acceptor: Option<TlsAcceptor>,
}

impl Incoming {
    pub fn peer_addr(&self) -> &NetAddr {
        &self.peer
    }

    /// 完成 TLS 服务端握手（如果监听器配置了 TLS）并返回可用的连接
    pub async fn establish(self) -> io::Result<BoxedConnection> {
        match self.acceptor {
            Some(acceptor) => {
                let tls_stream = acceptor.accept(self.stream).await?;
                debug!("TLS handshake completed with {}", self.peer);
                Ok(Box::pin(tls_stream))
            }
            None => Ok(self.stream),
        }
    }
}

/// 监听器关闭时删除其创建的 Unix 套接字文件
pub(crate) struct UnlinkOnDrop {
    path: PathBuf,
}

impl UnlinkOnDrop {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Drop for UnlinkOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Failed to remove socket file {:?}: {}", self.path, e);
        }
    }
}
