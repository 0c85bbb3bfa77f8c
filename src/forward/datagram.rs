use super::{RelayContext, Session, SessionTable};
use crate::error::{RelayError, Result};
use crate::transport::{BoxedConnection, DatagramSocket, Dialer, NetAddr, TransportKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf};
use tokio::time::Instant;
use tracing::{debug, warn};

/// 从数据报套接字接收数据，按来源地址维护会话并转发给远端
///
/// 每个来源地址在首次出现时拨号一次远端，之后的数据报都复用该连接。
/// 只有接收失败（或转发器关闭）会结束循环；拨号和写入失败只影响当前数据报。
pub async fn forward(
    remote: Arc<dyn Dialer>,
    socket: Arc<DatagramSocket>,
    ctx: &RelayContext,
) -> Result<()> {
    let sessions = Arc::new(SessionTable::new());
    let remote_kind = remote.kind();
    let mut buf = ctx.pool.acquire();

    loop {
        let (n, peer) = tokio::select! {
            _ = ctx.shutdown.cancelled() => return Err(RelayError::Closed),
            result = socket.recv_from(&mut buf) => result.map_err(RelayError::Receive)?,
        };

        let session = match sessions.get(&peer.session_key()) {
            Some(session) => session,
            None => match open_session(&remote, &socket, &sessions, peer, ctx).await {
                Some(session) => session,
                // 拨号失败，丢弃该数据报
                None => continue,
            },
        };
        session.touch();

        let payload = &buf[..n];
        let mut writer = session.writer().lock().await;
        let result = match remote_kind {
            // 数据报远端：一次写入对应一个数据报
            TransportKind::Datagram => writer.write(payload).await,
            TransportKind::Stream => writer.write_all(payload).await.map(|_| n),
        };
        drop(writer);

        match result {
            Ok(written) if written < n => {
                ctx.stats.short_write();
                warn!("{}: short write to remote ({} of {} bytes)", session.peer(), written, n);
            }
            Ok(written) => ctx.stats.add_bytes_inbound(written as u64),
            Err(e) => warn!("{}: write to remote failed: {}", session.peer(), e),
        }
    }
}

/// 为新的来源地址拨号并登记会话，可寻址的来源会启动一个回程任务
async fn open_session(
    remote: &Arc<dyn Dialer>,
    socket: &Arc<DatagramSocket>,
    sessions: &Arc<SessionTable>,
    peer: NetAddr,
    ctx: &RelayContext,
) -> Option<Arc<Session>> {
    let conn = match remote.dial().await {
        Ok(conn) => conn,
        Err(e) => {
            ctx.stats.dial_failed();
            warn!("{}: dial failed: {}", peer, e);
            return None;
        }
    };

    let (reader, writer) = tokio::io::split(conn);
    let session = Arc::new(Session::new(
        sessions.next_id(),
        peer,
        writer,
        Some(ctx.stats.session_started()),
    ));
    let registered = sessions.insert(Arc::clone(&session));
    if registered.id() != session.id() {
        return Some(registered);
    }
    debug!("{}: new session #{}", session.peer(), session.id());

    if session.peer().is_addressable() {
        let socket = Arc::clone(socket);
        let sessions = Arc::clone(sessions);
        let task_ctx = ctx.clone();
        let reverse_session = Arc::clone(&session);
        ctx.tasks.spawn(async move {
            let result = reverse(reader, &reverse_session, &socket, &task_ctx).await;
            sessions.remove(reverse_session.key(), reverse_session.id());
            reverse_session.close().await;
            match result {
                Ok(()) => debug!("{}: session #{} closed", reverse_session.peer(), reverse_session.id()),
                Err(ref e) => debug!("{}: session #{} ended: {}", reverse_session.peer(), reverse_session.id(), e),
            }
            task_ctx.stats.task_finished(result.is_ok());
        });
    } else {
        // 无名 unix 来源无法回送，会话只用于单向转发
        debug!("{}: peer has no address, replies are dropped", session.peer());
        if ctx.idle_timeout.is_some() {
            let sessions = Arc::clone(sessions);
            let task_ctx = ctx.clone();
            let idle_session = Arc::clone(&session);
            ctx.tasks.spawn(async move {
                // 没有回程任务，单独等待空闲超时
                tokio::select! {
                    _ = task_ctx.shutdown.cancelled() => {}
                    _ = idle_expired(&idle_session, task_ctx.idle_timeout) => {
                        debug!("{}: session #{} idle, expiring", idle_session.peer(), idle_session.id());
                    }
                }
                drop(reader);
                sessions.remove(idle_session.key(), idle_session.id());
                idle_session.close().await;
                task_ctx.stats.task_finished(true);
            });
        }
    }

    Some(session)
}

/// 把远端返回的数据送回来源地址，直到远端关闭、出错、空闲超时或转发器关闭
async fn reverse(
    mut reader: ReadHalf<BoxedConnection>,
    session: &Session,
    socket: &DatagramSocket,
    ctx: &RelayContext,
) -> std::io::Result<()> {
    let mut buf = ctx.pool.acquire();
    loop {
        let n = tokio::select! {
            _ = ctx.shutdown.cancelled() => return Ok(()),
            _ = idle_expired(session, ctx.idle_timeout) => {
                debug!("{}: session #{} idle, expiring", session.peer(), session.id());
                return Ok(());
            }
            result = reader.read(&mut buf) => result?,
        };
        if n == 0 {
            return Ok(());
        }

        let written = socket.send_to(&buf[..n], session.peer()).await?;
        if written < n {
            ctx.stats.short_write();
            warn!("{}: short write to peer ({} of {} bytes)", session.peer(), written, n);
        }
        ctx.stats.add_bytes_outbound(written as u64);
        session.touch();
    }
}

/// 会话在 `timeout` 内没有任何流量时完成；未设置超时则永不完成
async fn idle_expired(session: &Session, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    loop {
        let deadline = session.last_active() + timeout;
        if Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep_until(deadline).await;
    }
}
