use crate::config::{EndpointConfig, RelayConfig, RelayOptions};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "netforward")]
#[command(author, version, about = "Transport-level TCP/UDP/Unix/TLS relay", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// 未指定子命令时按 run 处理
    #[command(flatten)]
    pub run: RunArgs,

    /// 日志详细程度（-v info, -vv debug, -vvv trace）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行转发
    Run(RunArgs),
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
    /// 生成自签名证书（用于测试 TLS 端点）
    Cert {
        /// 证书输出路径
        #[arg(long, default_value = "cert.pem")]
        cert_out: String,

        /// 私钥输出路径
        #[arg(long, default_value = "key.pem")]
        key_out: String,

        /// 证书的 Common Name
        #[arg(long, default_value = "localhost")]
        common_name: String,

        /// 证书的 SubjectAltName（用逗号分隔多个）
        #[arg(long, value_delimiter = ',', value_name = "DNS,...")]
        alt_names: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// TOML 配置文件；设置后忽略下面的端点参数
    #[arg(short, long)]
    pub config: Option<String>,

    /// 本地网络类型
    #[arg(long, default_value = "tcp")]
    pub network: String,

    /// 本地监听地址
    #[arg(long, default_value = "localhost:7000")]
    pub address: String,

    /// 本地 TLS 证书
    #[arg(long, value_name = "PATH")]
    pub cert_file: Option<PathBuf>,

    /// 本地 TLS 私钥
    #[arg(long, value_name = "PATH")]
    pub key_file: Option<PathBuf>,

    /// 验证客户端证书的 CA（设置后要求客户端证书）
    #[arg(long, value_name = "PATH")]
    pub ca_file: Option<PathBuf>,

    /// 远端网络类型
    #[arg(long, default_value = "tcp")]
    pub remote_network: String,

    /// 远端地址
    #[arg(long, default_value = "localhost:8000")]
    pub remote_address: String,

    /// 连接远端使用的客户端证书
    #[arg(long, value_name = "PATH")]
    pub remote_cert_file: Option<PathBuf>,

    /// 连接远端使用的客户端私钥
    #[arg(long, value_name = "PATH")]
    pub remote_key_file: Option<PathBuf>,

    /// 验证远端证书的 CA
    #[arg(long, value_name = "PATH")]
    pub remote_ca_file: Option<PathBuf>,

    /// 使用 TLS 连接远端（未指定 CA 时使用系统证书）
    #[arg(long)]
    pub remote_tls: bool,

    /// 不验证远端证书（仅用于测试）
    #[arg(long)]
    pub remote_skip_verify: bool,

    /// 远端拨号超时（毫秒）
    #[arg(long, value_name = "MS")]
    pub remote_timeout: Option<u64>,

    /// 复制缓冲区大小（字节）
    #[arg(long, default_value_t = crate::buffer::DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// 数据报会话空闲超时（秒），默认不过期
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}

impl RunArgs {
    /// 加载配置文件，或由命令行参数构造配置
    pub fn to_config(&self) -> anyhow::Result<RelayConfig> {
        if let Some(path) = &self.config {
            return RelayConfig::load(path);
        }

        let config = RelayConfig {
            local: EndpointConfig {
                network: self.network.clone(),
                address: self.address.clone(),
                cert_path: self.cert_file.clone(),
                key_path: self.key_file.clone(),
                client_ca_path: self.ca_file.clone(),
                ..Default::default()
            },
            remote: EndpointConfig {
                network: self.remote_network.clone(),
                address: self.remote_address.clone(),
                tls: self.remote_tls,
                cert_path: self.remote_cert_file.clone(),
                key_path: self.remote_key_file.clone(),
                ca_path: self.remote_ca_file.clone(),
                skip_verify: self.remote_skip_verify,
                timeout_ms: self.remote_timeout,
                ..Default::default()
            },
            relay: RelayOptions {
                buffer_size: self.buffer_size,
                idle_timeout_secs: self.idle_timeout,
                ..Default::default()
            },
        };
        config.validate()?;
        Ok(config)
    }
}
