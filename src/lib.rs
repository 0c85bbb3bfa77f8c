/// netforward 库入口
///
/// 传输层字节转发：TCP / UDP / Unix 套接字之间双向转发，可选 TLS。
pub mod buffer;
pub mod cli;
pub mod config;
pub mod error;
pub mod forward;
pub mod io_util;
pub mod stats;
pub mod tls;
pub mod transport;

// 重新导出常用类型
pub use buffer::{BufferPool, PooledBuffer, DEFAULT_BUFFER_SIZE};
pub use config::{EndpointConfig, RelayConfig, RelayOptions};
pub use error::{RelayError, Result};
pub use forward::{ForwarderOptions, NetForwarder, RelayContext};
pub use stats::{RelayStats, StatsSnapshot};
pub use tls::TlsParams;
pub use transport::{classify, Dialer, Endpoint, NetAddr, Network, TransportKind};
