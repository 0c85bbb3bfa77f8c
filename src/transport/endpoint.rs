use super::{
    resolve, BoxedConnection, DatagramSocket, DatagramStream, Dialer, Listener, Network,
    StreamListener, TransportKind,
};
use crate::error::{RelayError, Result};
use crate::tls::TlsParams;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::OnceCell;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

/// 网络端点：转发的一侧（本地或远端）
///
/// 构造后只读。`dial` 建立出站连接，`listen` / `listen_packet` 创建本地监听。
#[derive(Clone)]
pub struct Endpoint {
    network: Network,
    address: String,
    tls: Option<Arc<TlsParams>>,
    /// 仅用于远端拨号
    timeout: Option<Duration>,
    connector: Arc<OnceCell<TlsConnector>>,
}

impl Endpoint {
    pub fn new(network: Network, address: impl Into<String>) -> Self {
        Self {
            network,
            address: address.into(),
            tls: None,
            timeout: None,
            connector: Arc::new(OnceCell::new()),
        }
    }

    /// 从网络类型字符串创建端点
    pub fn parse(network: &str, address: impl Into<String>) -> Result<Self> {
        Ok(Self::new(network.parse()?, address))
    }

    pub fn with_tls(mut self, params: TlsParams) -> Self {
        self.tls = Some(Arc::new(params));
        self.connector = Arc::new(OnceCell::new());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn tls(&self) -> Option<&TlsParams> {
        self.tls.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn kind(&self) -> TransportKind {
        self.network.kind()
    }

    /// 建立出站连接；配置了 TLS 时握手也包含在内，超时覆盖整个过程
    pub async fn dial(&self) -> Result<BoxedConnection> {
        match self.timeout {
            Some(duration) => tokio::time::timeout(duration, self.dial_inner())
                .await
                .map_err(|_| RelayError::timeout(duration))?,
            None => self.dial_inner().await,
        }
    }

    async fn dial_inner(&self) -> Result<BoxedConnection> {
        let address = self.address.as_str();
        let conn: BoxedConnection = match self.network {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
                let addrs = resolve(self.network, address)
                    .await
                    .map_err(|e| RelayError::dial(address, e))?;
                let stream = TcpStream::connect(&addrs[..])
                    .await
                    .map_err(|e| RelayError::dial(address, e))?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", address, e);
                }
                Box::pin(stream)
            }
            #[cfg(unix)]
            Network::Unix => {
                let stream = UnixStream::connect(address)
                    .await
                    .map_err(|e| RelayError::dial(address, e))?;
                Box::pin(stream)
            }
            Network::Udp | Network::Udp4 | Network::Udp6 => {
                let addrs = resolve(self.network, address)
                    .await
                    .map_err(|e| RelayError::dial(address, e))?;
                let stream = DatagramStream::connect_udp(&addrs)
                    .await
                    .map_err(|e| RelayError::dial(address, e))?;
                Box::pin(stream)
            }
            #[cfg(unix)]
            Network::Unixgram => {
                let stream =
                    DatagramStream::connect_unix(address).map_err(|e| RelayError::dial(address, e))?;
                Box::pin(stream)
            }
            _ => return Err(RelayError::UnsupportedNetwork(self.network.to_string())),
        };

        let Some(tls) = self.tls.as_deref() else {
            return Ok(conn);
        };

        if self.kind() == TransportKind::Datagram {
            warn!("DTLS is not supported, dialing {} without TLS", address);
            return Ok(conn);
        }

        let connector = self
            .connector
            .get_or_try_init(|| async { tls.client_config().map(TlsConnector::from) })
            .await?;
        let server_name = tls.server_name_for(address)?;
        let tls_stream = connector
            .connect(server_name, conn)
            .await
            .map_err(|e| RelayError::dial(address, e))?;

        debug!("TLS connection established to {}", address);
        Ok(Box::pin(tls_stream))
    }

    /// 创建流式监听器，仅适用于流式网络
    pub async fn listen(&self) -> Result<StreamListener> {
        if self.kind() != TransportKind::Stream {
            return Err(RelayError::WrongTransport {
                network: self.network.to_string(),
                expected: "stream",
            });
        }

        let acceptor = self
            .tls
            .as_deref()
            .map(|tls| tls.server_config().map(TlsAcceptor::from))
            .transpose()?;

        StreamListener::bind(self.network, &self.address, acceptor).await
    }

    /// 创建数据报套接字，仅适用于数据报网络；TLS 参数被忽略
    pub async fn listen_packet(&self) -> Result<DatagramSocket> {
        if self.kind() != TransportKind::Datagram {
            return Err(RelayError::WrongTransport {
                network: self.network.to_string(),
                expected: "datagram",
            });
        }

        if self.tls.is_some() {
            warn!("DTLS is not supported yet, ignoring TLS parameters for {}", self);
        }

        DatagramSocket::bind(self.network, &self.address).await
    }

    /// 根据网络类型创建对应的监听句柄
    pub async fn bind(&self) -> Result<Listener> {
        match self.kind() {
            TransportKind::Stream => self.listen().await.map(Listener::Stream),
            TransportKind::Datagram => self
                .listen_packet()
                .await
                .map(|socket| Listener::Datagram(Arc::new(socket))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("tls", &self.tls.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Dialer for Endpoint {
    async fn dial(&self) -> Result<BoxedConnection> {
        Endpoint::dial(self).await
    }

    fn kind(&self) -> TransportKind {
        Endpoint::kind(self)
    }
}
