pub mod datagram;
mod session;
pub mod stream;

pub use session::{Session, SessionTable};

use crate::buffer::{BufferPool, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_IDLE};
use crate::error::{RelayError, Result};
use crate::stats::{RelayStats, StatsSnapshot};
use crate::transport::{Dialer, Endpoint, Listener, NetAddr};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// 转发器选项
#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    /// 缓冲池中每个缓冲区的大小
    pub buffer_size: usize,
    /// 缓冲池最多保留的空闲缓冲区数量
    pub max_idle_buffers: usize,
    /// 数据报会话空闲超时；None 表示会话只在远端连接出错时清理
    pub idle_timeout: Option<Duration>,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_idle_buffers: DEFAULT_MAX_IDLE,
            idle_timeout: None,
        }
    }
}

/// 单个转发实例共享的运行时依赖
///
/// 所有派生任务都通过 `tasks` 启动，完成情况汇报到 `stats`（只用于日志和测试）。
#[derive(Clone)]
pub struct RelayContext {
    pub pool: Arc<BufferPool>,
    pub stats: RelayStats,
    pub tasks: TaskTracker,
    pub shutdown: CancellationToken,
    pub idle_timeout: Option<Duration>,
}

impl RelayContext {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            stats: RelayStats::new(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// 转发监督者：绑定本地端点，把流量转发给远端 Dialer
///
/// 根据本地网络类型选择流式或数据报转发，并负责监听句柄的生命周期。
pub struct NetForwarder {
    local: Endpoint,
    listener: Mutex<Option<Arc<Listener>>>,
    ctx: RelayContext,
}

impl NetForwarder {
    pub fn new(local: Endpoint) -> Self {
        Self::with_options(local, ForwarderOptions::default())
    }

    pub fn with_options(local: Endpoint, options: ForwarderOptions) -> Self {
        let pool = Arc::new(BufferPool::with_max_idle(
            options.buffer_size,
            options.max_idle_buffers,
        ));
        Self::with_pool(local, pool, options.idle_timeout)
    }

    /// 使用外部提供的缓冲池（可以在多个转发器之间共享）
    pub fn with_pool(local: Endpoint, pool: Arc<BufferPool>, idle_timeout: Option<Duration>) -> Self {
        Self {
            local,
            listener: Mutex::new(None),
            ctx: RelayContext::new(pool).with_idle_timeout(idle_timeout),
        }
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    /// 绑定本地端点
    pub async fn listen(&self) -> Result<()> {
        if self.ctx.shutdown.is_cancelled() {
            return Err(RelayError::Closed);
        }
        if self.listener.lock().is_some() {
            return Err(RelayError::AlreadyListening);
        }

        let listener = self.local.bind().await?;

        let mut slot = self.listener.lock();
        if slot.is_some() {
            return Err(RelayError::AlreadyListening);
        }
        *slot = Some(Arc::new(listener));
        Ok(())
    }

    /// 实际绑定的本地地址（端口 0 时可用来获取分配的端口）
    pub fn local_addr(&self) -> Option<NetAddr> {
        self.listener
            .lock()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// 持续转发，直到监听器出错或转发器被关闭
    ///
    /// 单个连接或会话的失败只记录日志；返回值总是终止转发的那个错误。
    pub async fn forward(&self, remote: Arc<dyn Dialer>) -> Result<()> {
        let listener = match self.listener.lock().clone() {
            Some(listener) => listener,
            None if self.ctx.shutdown.is_cancelled() => return Err(RelayError::Closed),
            None => return Err(RelayError::NotListening),
        };

        let result = match listener.as_ref() {
            Listener::Stream(ln) => stream::forward(remote, ln, &self.ctx).await,
            Listener::Datagram(socket) => {
                datagram::forward(remote, Arc::clone(socket), &self.ctx).await
            }
        };

        let snapshot = self.ctx.stats.snapshot();
        info!(
            "Forwarding from {} stopped: connections={} sessions={} failed_dials={} in={}B out={}B",
            self.local,
            snapshot.total_connections,
            snapshot.total_sessions,
            snapshot.failed_dials,
            snapshot.bytes_inbound,
            snapshot.bytes_outbound
        );
        if let Err(ref e) = result {
            if !e.is_closed() {
                warn!("Forwarding from {} failed: {}", self.local, e);
            }
        }
        result
    }

    /// 关闭监听句柄，正在阻塞的 accept / receive 立即返回
    pub fn close(&self) {
        self.ctx.shutdown.cancel();
        self.ctx.tasks.close();
        if self.listener.lock().take().is_some() {
            info!("Closed listener on {}", self.local);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.shutdown.is_cancelled()
    }

    /// 等待所有派生任务结束（需先调用 close）
    pub async fn wait(&self) {
        self.ctx.tasks.wait().await;
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.ctx.pool
    }
}

impl Drop for NetForwarder {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
        self.ctx.tasks.close();
    }
}
