use crate::error::{RelayError, Result};
use anyhow::Context;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// 端点的 TLS 参数
///
/// 由配置层从文件加载，核心只读取这些字段来构造 rustls 配置。
#[derive(Debug, Default)]
pub struct TlsParams {
    /// 本端身份证书链
    pub certificates: Vec<CertificateDer<'static>>,
    /// 与证书对应的私钥
    pub private_key: Option<PrivateKeyDer<'static>>,
    /// 受信任的根证书；为空且未跳过验证时使用系统证书
    pub root_certs: Option<RootCertStore>,
    /// 客户端证书的信任根；设置后强制要求并验证客户端证书
    pub client_roots: Option<RootCertStore>,
    /// 不验证远端服务器证书（仅用于测试）
    pub skip_verify: bool,
    /// 覆盖用于验证的服务器名
    pub server_name: Option<String>,
}

impl TlsParams {
    /// 是否要求客户端证书
    pub fn requires_client_auth(&self) -> bool {
        self.client_roots.is_some()
    }

    fn identity(&self) -> Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        match &self.private_key {
            Some(key) if !self.certificates.is_empty() => {
                Some((self.certificates.clone(), key.clone_key()))
            }
            _ => None,
        }
    }

    /// 构造拨号使用的客户端配置
    pub fn client_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let root_store = match &self.root_certs {
            Some(roots) => roots.clone(),
            None if !self.skip_verify => native_root_store(),
            None => RootCertStore::empty(),
        };

        let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);
        let mut config = match self.identity() {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| RelayError::tls(format!("invalid client certificate: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        if self.skip_verify {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertificateVerification));
        }

        Ok(Arc::new(config))
    }

    /// 构造监听使用的服务端配置
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let (certs, key) = self.identity().ok_or_else(|| {
            RelayError::tls("a TLS listener requires a certificate and a private key")
        })?;

        let builder = rustls::ServerConfig::builder();
        let builder = match &self.client_roots {
            Some(roots) => {
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots.clone()))
                    .build()
                    .map_err(|e| RelayError::tls(format!("invalid client CA: {}", e)))?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let config = builder
            .with_single_cert(certs, key)
            .map_err(|e| RelayError::tls(format!("invalid server certificate: {}", e)))?;

        Ok(Arc::new(config))
    }

    /// 从拨号地址推导 SNI / 证书验证用的服务器名
    pub fn server_name_for(&self, address: &str) -> Result<ServerName<'static>> {
        let host = match &self.server_name {
            Some(name) => name.as_str(),
            None => host_of(address),
        };

        match ServerName::try_from(host.to_string()) {
            Ok(name) => Ok(name),
            // unix 路径之类的地址没有主机名，跳过验证时用占位名
            Err(_) if self.skip_verify => Ok(ServerName::try_from("localhost")
                .map_err(|e| RelayError::tls(e.to_string()))?),
            Err(e) => Err(RelayError::tls(format!(
                "cannot derive server name from '{}': {}",
                address, e
            ))),
        }
    }

    /// 从 PEM 文件加载 TLS 参数
    pub fn from_files(
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
        ca_path: Option<&Path>,
        client_ca_path: Option<&Path>,
        skip_verify: bool,
    ) -> anyhow::Result<Self> {
        let mut params = TlsParams {
            skip_verify,
            ..Default::default()
        };

        match (cert_path, key_path) {
            (Some(cert), Some(key)) => {
                params.certificates = load_certs(cert)?;
                params.private_key = Some(load_private_key(key)?);
            }
            (None, None) => {}
            _ => anyhow::bail!("cert_path and key_path must both be set"),
        }

        if let Some(ca) = ca_path {
            params.root_certs = Some(load_root_store(ca)?);
        }
        if let Some(client_ca) = client_ca_path {
            params.client_roots = Some(load_root_store(client_ca)?);
        }

        Ok(params)
    }
}

/// 去掉端口，得到地址中的主机部分
fn host_of(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// 加载 PEM 证书链
pub fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open cert file: {:?}", path))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates in {:?}", path))?;
    if certs.is_empty() {
        anyhow::bail!("No certificate found in {:?}", path);
    }
    Ok(certs)
}

/// 加载 PEM 私钥
pub fn load_private_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("Failed to open key file: {:?}", path))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .context("Failed to parse private key")?
        .with_context(|| format!("No private key found in {:?}", path))
}

/// 从 PEM 文件构造信任根
pub fn load_root_store(path: &Path) -> anyhow::Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(path)? {
        store
            .add(cert)
            .with_context(|| format!("Failed to add CA certificate from {:?}", path))?;
    }
    Ok(store)
}

fn native_root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("Failed to load a system CA certificate: {}", e);
    }
    let (added, ignored) = store.add_parsable_certificates(native.certs);
    if ignored > 0 {
        warn!("Ignored {} unparsable system CA certificates ({} added)", ignored, added);
    }
    store
}

/// 生成自签名证书和私钥并写入指定路径
pub fn generate_self_signed_cert(
    common_name: &str,
    alt_names: &[String],
    cert_out: &Path,
    key_out: &Path,
) -> anyhow::Result<()> {
    // rcgen 至少需要一个 SAN；确保包含 CN
    let mut names: Vec<String> = alt_names.to_vec();
    if !names.iter().any(|n| n == common_name) {
        names.push(common_name.to_string());
    }

    let cert =
        generate_simple_self_signed(names).context("Failed to generate self-signed certificate")?;
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    std::fs::write(cert_out, cert_pem)
        .with_context(|| format!("Failed to write certificate to {:?}", cert_out))?;
    std::fs::write(key_out, key_pem)
        .with_context(|| format!("Failed to write private key to {:?}", key_out))?;

    Ok(())
}

/// 不验证证书的验证器（仅用于测试）
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
