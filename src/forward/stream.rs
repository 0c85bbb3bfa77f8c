use super::RelayContext;
use crate::error::{RelayError, Result};
use crate::io_util::copy_with_stats;
use crate::transport::{Dialer, Incoming, StreamListener};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// 接受本地连接并为每个连接启动一个双向转发任务
///
/// 只有 accept 失败（或转发器关闭）会结束循环并返回错误；
/// 单个连接的失败只记录日志，不影响其它连接。
pub async fn forward(
    remote: Arc<dyn Dialer>,
    listener: &StreamListener,
    ctx: &RelayContext,
) -> Result<()> {
    loop {
        let incoming = tokio::select! {
            _ = ctx.shutdown.cancelled() => return Err(RelayError::Closed),
            result = listener.accept() => result.map_err(RelayError::Accept)?,
        };

        let remote = Arc::clone(&remote);
        let task_ctx = ctx.clone();
        ctx.tasks.spawn(async move {
            let peer = incoming.peer_addr().clone();
            let result = handle_connection(incoming, remote, &task_ctx).await;
            if let Err(ref e) = result {
                warn!("{}: connection failed: {}", peer, e);
            }
            task_ctx.stats.task_finished(result.is_ok());
        });
    }
}

/// 转发单个连接
///
/// local -> remote 方向在独立任务中运行，remote -> local 方向在当前任务中运行。
/// 当前任务的方向结束后即返回，并终止另一方向（相当于关闭两端连接）。
async fn handle_connection(
    incoming: Incoming,
    remote: Arc<dyn Dialer>,
    ctx: &RelayContext,
) -> Result<()> {
    let peer = incoming.peer_addr().clone();
    let _guard = ctx.stats.connection_started();

    let local = incoming.establish().await?;

    let remote_conn = match remote.dial().await {
        Ok(conn) => conn,
        Err(e) => {
            ctx.stats.dial_failed();
            // 本地连接随 local 一起被丢弃关闭
            return Err(e);
        }
    };
    debug!("{}: connected to remote", peer);

    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote_conn);

    // local -> remote
    let stats = ctx.stats.clone();
    let pool = Arc::clone(&ctx.pool);
    let inbound_peer = peer.clone();
    let inbound = ctx.tasks.spawn(async move {
        let mut buf = pool.acquire();
        let result = copy_with_stats(&mut local_read, &mut remote_write, &mut buf, |n| {
            stats.add_bytes_inbound(n)
        })
        .await;
        // 本地读到 EOF 后半关闭远端写方向，让远端看到 EOF
        let _ = remote_write.shutdown().await;
        match result {
            Ok(bytes) => debug!("{}: local -> remote finished ({} bytes)", inbound_peer, bytes),
            Err(ref e) => warn!("{}: forward failed: {}", inbound_peer, e),
        }
        stats.task_finished(result.is_ok());
    });

    // remote -> local
    let result = {
        let mut buf = ctx.pool.acquire();
        copy_with_stats(&mut remote_read, &mut local_write, &mut buf, |n| {
            ctx.stats.add_bytes_outbound(n)
        })
        .await
    };
    let _ = local_write.shutdown().await;
    inbound.abort();

    let bytes = result?;
    debug!("{}: remote -> local finished ({} bytes)", peer, bytes);
    Ok(())
}
