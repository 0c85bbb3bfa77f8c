/// 转发器错误类型
///
/// 使用 thiserror 定义精确的错误类型，让调用者能区分
/// "放弃单个连接" 与 "放弃整个转发" 两类失败
use std::io;
use std::time::Duration;
use thiserror::Error;

/// netforward 的主要错误类型
#[derive(Error, Debug)]
pub enum RelayError {
    /// 拨号失败（包括 TLS 握手失败），仅影响单个连接或会话
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 绑定本地地址失败
    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 流式监听器 accept 失败，终止整个转发
    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    /// 数据报套接字接收失败，终止整个转发
    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    /// 拨号超时
    #[error("Dial timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// 无法识别或当前平台不支持的网络类型
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// 在错误的传输类型上调用 listen / listen_packet
    #[error("Network '{network}' is not a {expected} network")]
    WrongTransport {
        network: String,
        expected: &'static str,
    },

    /// TLS 参数无法构造为 rustls 配置
    #[error("TLS error: {0}")]
    Tls(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 尚未调用 listen
    #[error("must listen first")]
    NotListening,

    /// 已经在监听
    #[error("already listening")]
    AlreadyListening,

    /// 转发器已关闭
    #[error("forwarder closed")]
    Closed,

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// 创建拨号失败错误
    pub fn dial(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Dial {
            addr: addr.into(),
            source,
        }
    }

    /// 创建监听失败错误
    pub fn listen(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Listen {
            addr: addr.into(),
            source,
        }
    }

    /// 创建超时错误
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 创建 TLS 错误
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// 检查是否为转发器关闭
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// 该错误是否终止整个转发（而不只是单个连接）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Accept(_) | Self::Receive(_) | Self::Closed | Self::NotListening
        )
    }
}
