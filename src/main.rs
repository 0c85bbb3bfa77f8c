use anyhow::{Context, Result};
use clap::Parser;
use netforward::cli::{Cli, Commands, RunArgs};
use netforward::config::RelayConfig;
use netforward::forward::NetForwarder;
use netforward::tls;
use netforward::transport::Dialer;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level, RUST_LOG takes precedence
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("netforward v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Some(Commands::Run(args)) => run(args).await,
        None => run(&cli.run).await,
        Some(Commands::Check { config }) => check_config(config),
        Some(Commands::Cert {
            cert_out,
            key_out,
            common_name,
            alt_names,
        }) => generate_certificate(cert_out, key_out, common_name, alt_names),
    }
}

/// Run the relay until the listener fails or Ctrl-C is received
async fn run(args: &RunArgs) -> Result<()> {
    let config = args.to_config()?;
    let local = config.local_endpoint()?;
    let remote = config.remote_endpoint()?;

    let forwarder = NetForwarder::with_options(local, config.relay.forwarder_options());
    forwarder
        .listen()
        .await
        .with_context(|| format!("Failed to listen on {}", forwarder.local()))?;

    let bound = forwarder
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| forwarder.local().address().to_string());
    info!("Forwarding {} ({}) -> {}", forwarder.local(), bound, remote);

    let remote: Arc<dyn Dialer> = Arc::new(remote);
    tokio::select! {
        result = forwarder.forward(remote) => {
            if let Err(e) = result {
                error!("Forwarding stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            forwarder.close();
        }
    }

    Ok(())
}

/// Validate a configuration file and print a summary
fn check_config(path: &str) -> Result<()> {
    let config = RelayConfig::load(path)?;

    println!("Configuration OK: {}", path);
    println!(
        "  local:  {}://{}{}",
        config.local.network,
        config.local.address,
        if config.local.tls_enabled() { " (tls)" } else { "" }
    );
    println!(
        "  remote: {}://{}{}",
        config.remote.network,
        config.remote.address,
        if config.remote.tls_enabled() { " (tls)" } else { "" }
    );
    println!("  buffer size: {} bytes", config.relay.buffer_size);
    match config.relay.idle_timeout_secs {
        Some(secs) => println!("  idle timeout: {}s", secs),
        None => println!("  idle timeout: disabled"),
    }

    Ok(())
}

/// Generate self-signed TLS certificate
fn generate_certificate(
    cert_out: &str,
    key_out: &str,
    common_name: &str,
    alt_names: &[String],
) -> Result<()> {
    tls::generate_self_signed_cert(common_name, alt_names, Path::new(cert_out), Path::new(key_out))?;

    println!("Generated self-signed certificate: {}", cert_out);
    println!("Generated private key: {}", key_out);

    Ok(())
}
