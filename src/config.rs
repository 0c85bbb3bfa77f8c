use crate::buffer::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_IDLE};
use crate::error::RelayError;
use crate::forward::ForwarderOptions;
use crate::tls::TlsParams;
use crate::transport::{Endpoint, Network, TransportKind};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// 端点在转发中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// 本地监听端
    Local,
    /// 远端拨号端
    Remote,
}

impl EndpointRole {
    fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::Local => "local",
            EndpointRole::Remote => "remote",
        }
    }
}

/// 单个端点的配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// 网络类型（tcp, tcp4, tcp6, udp, udp4, udp6, unix, unixgram）
    #[serde(default = "default_network")]
    pub network: String,
    /// 地址（host:port 或 unix 套接字路径）
    pub address: String,
    /// 启用 TLS（设置了任何证书路径或 skip_verify 时自动启用）
    #[serde(default)]
    pub tls: bool,
    /// 本端证书链路径
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// 本端私钥路径
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// 验证远端服务器证书的 CA（仅远端）
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// 验证客户端证书的 CA，设置后强制客户端认证（仅本地）
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
    /// 跳过服务器证书验证（仅远端，仅用于测试）
    #[serde(default)]
    pub skip_verify: bool,
    /// 覆盖 SNI / 验证用的服务器名（仅远端）
    #[serde(default)]
    pub server_name: Option<String>,
    /// 拨号超时，毫秒（仅远端）
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 配置错误包装为 RelayError::Config，调用方可以通过 downcast 区分
fn invalid(msg: impl Into<String>) -> RelayError {
    RelayError::config_error(msg)
}

fn default_network() -> String {
    "tcp".to_string()
}

impl EndpointConfig {
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            ..Default::default()
        }
    }

    /// 是否需要 TLS
    pub fn tls_enabled(&self) -> bool {
        self.tls
            || self.skip_verify
            || self.cert_path.is_some()
            || self.key_path.is_some()
            || self.ca_path.is_some()
            || self.client_ca_path.is_some()
    }

    pub fn parsed_network(&self) -> anyhow::Result<Network> {
        self.network
            .parse::<Network>()
            .with_context(|| format!("Invalid network '{}'", self.network))
    }

    /// 验证端点配置
    pub fn validate(&self, role: EndpointRole) -> anyhow::Result<()> {
        let side = role.as_str();
        let network = self.parsed_network()?;

        if self.address.trim().is_empty() {
            bail!(invalid(format!("{}: address cannot be empty", side)));
        }

        match (&self.cert_path, &self.key_path) {
            (Some(_), Some(_)) | (None, None) => {}
            _ => bail!(invalid(format!(
                "{}: cert_path and key_path must both be set or both omitted",
                side
            ))),
        }

        match role {
            EndpointRole::Local => {
                if self.skip_verify {
                    bail!(invalid("local: skip_verify only applies to the remote endpoint"));
                }
                if self.timeout_ms.is_some() {
                    bail!(invalid("local: timeout_ms only applies to the remote endpoint"));
                }
                if self.ca_path.is_some() {
                    bail!(invalid(
                        "local: ca_path only applies to the remote endpoint, use client_ca_path"
                    ));
                }
                if self.server_name.is_some() {
                    bail!(invalid("local: server_name only applies to the remote endpoint"));
                }
                if self.tls_enabled() {
                    if network.kind() == TransportKind::Datagram {
                        warn!(
                            "local: DTLS is not supported yet, TLS settings for {} are ignored",
                            self.address
                        );
                    } else if self.cert_path.is_none() {
                        bail!(invalid("local: a TLS listener requires cert_path and key_path"));
                    }
                }
            }
            EndpointRole::Remote => {
                if self.client_ca_path.is_some() {
                    bail!(invalid("remote: client_ca_path only applies to the local endpoint"));
                }
                if self.timeout_ms == Some(0) {
                    bail!(invalid("remote: timeout_ms cannot be 0"));
                }
            }
        }

        Ok(())
    }

    /// 加载证书并构造 TLS 参数；未启用 TLS 时返回 None
    pub fn tls_params(&self) -> anyhow::Result<Option<TlsParams>> {
        if !self.tls_enabled() {
            return Ok(None);
        }

        let mut params = TlsParams::from_files(
            self.cert_path.as_deref(),
            self.key_path.as_deref(),
            self.ca_path.as_deref(),
            self.client_ca_path.as_deref(),
            self.skip_verify,
        )?;
        params.server_name = self.server_name.clone();
        Ok(Some(params))
    }

    /// 构造端点
    pub fn to_endpoint(&self, role: EndpointRole) -> anyhow::Result<Endpoint> {
        self.validate(role)?;

        let mut endpoint = Endpoint::new(self.parsed_network()?, self.address.clone());
        if let Some(params) = self
            .tls_params()
            .with_context(|| format!("Failed to load TLS settings for the {} endpoint", role.as_str()))?
        {
            endpoint = endpoint.with_tls(params);
        }
        if let Some(ms) = self.timeout_ms {
            endpoint = endpoint.with_timeout(Duration::from_millis(ms));
        }
        Ok(endpoint)
    }
}

/// 转发参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayOptions {
    /// 复制缓冲区大小（字节），也是单个数据报的最大长度
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 缓冲池保留的最大空闲缓冲区数量
    #[serde(default = "default_max_idle_buffers")]
    pub max_idle_buffers: usize,
    /// 数据报会话空闲超时（秒），不设置则不过期
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_max_idle_buffers() -> usize {
    DEFAULT_MAX_IDLE
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_idle_buffers: DEFAULT_MAX_IDLE,
            idle_timeout_secs: None,
        }
    }
}

impl RelayOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.buffer_size == 0 {
            bail!(invalid("relay: buffer_size must be greater than 0"));
        }
        if self.idle_timeout_secs == Some(0) {
            bail!(invalid(
                "relay: idle_timeout_secs cannot be 0, omit it to disable expiry"
            ));
        }
        Ok(())
    }

    pub fn forwarder_options(&self) -> ForwarderOptions {
        ForwarderOptions {
            buffer_size: self.buffer_size,
            max_idle_buffers: self.max_idle_buffers,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// 完整的转发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub local: EndpointConfig,
    pub remote: EndpointConfig,
    #[serde(default)]
    pub relay: RelayOptions,
}

impl RelayConfig {
    /// 从 TOML 文件加载并验证配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path))?;
        let config = Self::from_toml(&content).context("Failed to parse relay configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.local.validate(EndpointRole::Local)?;
        self.remote.validate(EndpointRole::Remote)?;
        self.relay.validate()
    }

    pub fn local_endpoint(&self) -> anyhow::Result<Endpoint> {
        self.local.to_endpoint(EndpointRole::Local)
    }

    pub fn remote_endpoint(&self) -> anyhow::Result<Endpoint> {
        self.remote.to_endpoint(EndpointRole::Remote)
    }
}
