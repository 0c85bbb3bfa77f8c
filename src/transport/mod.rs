mod datagram;
mod endpoint;
mod listener;

pub use datagram::{DatagramSocket, DatagramStream};
pub use endpoint::Endpoint;
pub use listener::{Incoming, Listener, StreamListener};

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// 传输类别：面向连接（流）或无连接（数据报）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stream,
    Datagram,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => write!(f, "stream"),
            TransportKind::Datagram => write!(f, "datagram"),
        }
    }
}

/// 地址族限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Any,
    V4,
    V6,
}

/// 网络类型，在构造 Endpoint 时解析一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Unix,
    UnixPacket,
    Udp,
    Udp4,
    Udp6,
    Ip,
    Ip4,
    Ip6,
    Unixgram,
}

impl Network {
    /// 该网络属于流式还是数据报传输
    pub fn kind(&self) -> TransportKind {
        match self {
            Network::Udp
            | Network::Udp4
            | Network::Udp6
            | Network::Ip
            | Network::Ip4
            | Network::Ip6
            | Network::Unixgram => TransportKind::Datagram,
            Network::Tcp | Network::Tcp4 | Network::Tcp6 | Network::Unix | Network::UnixPacket => {
                TransportKind::Stream
            }
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Network::Tcp4 | Network::Udp4 | Network::Ip4 => Family::V4,
            Network::Tcp6 | Network::Udp6 | Network::Ip6 => Family::V6,
            _ => Family::Any,
        }
    }

    /// Unix 域套接字（地址是文件路径）
    pub fn is_unix(&self) -> bool {
        matches!(
            self,
            Network::Unix | Network::UnixPacket | Network::Unixgram
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Unix => "unix",
            Network::UnixPacket => "unixpacket",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
            Network::Ip => "ip",
            Network::Ip4 => "ip4",
            Network::Ip6 => "ip6",
            Network::Unixgram => "unixgram",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        // 只有原始 IP 网络允许 "ip4:icmp" 这样的协议后缀；名称区分大小写
        let base = match s.split_once(':') {
            Some((base @ ("ip" | "ip4" | "ip6"), _)) => base,
            _ => s,
        };
        match base {
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            "unix" => Ok(Self::Unix),
            "unixpacket" => Ok(Self::UnixPacket),
            "udp" => Ok(Self::Udp),
            "udp4" => Ok(Self::Udp4),
            "udp6" => Ok(Self::Udp6),
            "ip" => Ok(Self::Ip),
            "ip4" => Ok(Self::Ip4),
            "ip6" => Ok(Self::Ip6),
            "unixgram" => Ok(Self::Unixgram),
            _ => Err(RelayError::UnsupportedNetwork(s.to_string())),
        }
    }
}

/// 将网络类型字符串分类为流或数据报
///
/// 全函数：任何不属于数据报集合的字符串都视为流式。
pub fn classify(network: &str) -> TransportKind {
    match network.parse::<Network>() {
        Ok(n) => n.kind(),
        Err(_) => TransportKind::Stream,
    }
}

/// 本地或对端地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetAddr {
    Inet(SocketAddr),
    /// Unix 域地址，未绑定的套接字没有路径
    Unix(Option<PathBuf>),
}

impl NetAddr {
    /// 能否按该地址回发数据报
    ///
    /// 未绑定路径的 Unix 数据报发送方无法回复，所有流量共享同一个隐式会话。
    pub fn is_addressable(&self) -> bool {
        match self {
            NetAddr::Inet(_) => true,
            NetAddr::Unix(path) => path.is_some(),
        }
    }

    /// 会话表中使用的键
    pub fn session_key(&self) -> String {
        match self {
            NetAddr::Inet(addr) => addr.to_string(),
            NetAddr::Unix(Some(path)) => path.display().to_string(),
            NetAddr::Unix(None) => String::new(),
        }
    }

    pub fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            NetAddr::Inet(addr) => Some(*addr),
            NetAddr::Unix(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            NetAddr::Unix(Some(path)) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddr::Inet(addr) => write!(f, "{}", addr),
            NetAddr::Unix(Some(path)) => write!(f, "{}", path.display()),
            NetAddr::Unix(None) => write!(f, "@"),
        }
    }
}

/// 双向字节流连接抽象
///
/// 统一封装 TCP、Unix、TLS 以及已连接的数据报套接字
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Connection
impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedConnection = Pin<Box<dyn Connection>>;

/// 拨号接口：建立到远端的连接
#[async_trait]
pub trait Dialer: Send + Sync {
    /// 建立一个新的出站连接
    async fn dial(&self) -> Result<BoxedConnection>;

    /// 出站连接是否保留消息边界
    fn kind(&self) -> TransportKind;
}

/// 解析主机地址，并按地址族过滤
pub(crate) async fn resolve(network: Network, address: &str) -> io::Result<Vec<SocketAddr>> {
    let address = normalize_host(network.family(), address);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address.as_ref())
        .await?
        .filter(|addr| match network.family() {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        })
        .collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no suitable address found for {} {}", network, address),
        ));
    }
    Ok(addrs)
}

/// ":7000" 这类省略主机的地址补全为未指定地址
fn normalize_host(family: Family, address: &str) -> std::borrow::Cow<'_, str> {
    if let Some(port) = address.strip_prefix(':') {
        let host = match family {
            Family::V6 => "[::]",
            _ => "0.0.0.0",
        };
        return format!("{}:{}", host, port).into();
    }
    address.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parse() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("udp6".parse::<Network>().unwrap(), Network::Udp6);
        assert!("UDP6".parse::<Network>().is_err());
        assert!("udp:x".parse::<Network>().is_err());
        assert_eq!("ip4:icmp".parse::<Network>().unwrap(), Network::Ip4);
        assert_eq!("unixgram".parse::<Network>().unwrap(), Network::Unixgram);
        assert!("sctp".parse::<Network>().is_err());
    }

    #[test]
    fn test_classify_is_total() {
        for network in ["udp", "udp4", "udp6", "ip", "ip4", "ip6", "unixgram", "ip6:58"] {
            assert_eq!(classify(network), TransportKind::Datagram, "{}", network);
        }
        for network in [
            "tcp", "tcp4", "tcp6", "unix", "unixpacket", "", "bogus", "UDP", "udp:x", "Unixgram",
        ] {
            assert_eq!(classify(network), TransportKind::Stream, "{}", network);
        }
    }

    #[test]
    fn test_network_family() {
        assert_eq!(Network::Tcp4.family(), Family::V4);
        assert_eq!(Network::Udp6.family(), Family::V6);
        assert_eq!(Network::Unix.family(), Family::Any);
        assert!(Network::Unixgram.is_unix());
        assert!(!Network::Udp.is_unix());
    }

    #[test]
    fn test_net_addr_session_key() {
        let inet = NetAddr::Inet("127.0.0.1:9000".parse().unwrap());
        assert!(inet.is_addressable());
        assert_eq!(inet.session_key(), "127.0.0.1:9000");

        let named = NetAddr::Unix(Some(PathBuf::from("/tmp/peer.sock")));
        assert!(named.is_addressable());
        assert_eq!(named.session_key(), "/tmp/peer.sock");

        let unnamed = NetAddr::Unix(None);
        assert!(!unnamed.is_addressable());
        assert_eq!(unnamed.session_key(), "");
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host(Family::Any, ":7000"), "0.0.0.0:7000");
        assert_eq!(normalize_host(Family::V6, ":7000"), "[::]:7000");
        assert_eq!(normalize_host(Family::Any, "localhost:7000"), "localhost:7000");
    }

    #[tokio::test]
    async fn test_resolve_filters_family() {
        let addrs = resolve(Network::Tcp4, "127.0.0.1:80").await.unwrap();
        assert!(addrs.iter().all(|a| a.is_ipv4()));

        let err = resolve(Network::Tcp6, "127.0.0.1:80").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }
}
