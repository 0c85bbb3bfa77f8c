/// 固定大小的字节缓冲池
///
/// 缓冲池作为显式对象传给转发器，所有复制循环共享同一个池

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// 复制循环默认使用的缓冲区大小（32 KiB）
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// 缓冲池默认保留的空闲缓冲区数量
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// 长度完全相同的字节缓冲区池
///
/// `acquire` 不会失败：池为空时直接分配新缓冲区。
/// 复用时不清零，调用方只能信任自己写入的字节或 read 返回的长度。
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    /// 创建缓冲区大小为 `buffer_size` 的池
    pub fn new(buffer_size: usize) -> Self {
        Self::with_max_idle(buffer_size, DEFAULT_MAX_IDLE)
    }

    /// 创建最多保留 `max_idle` 个空闲缓冲区的池
    pub fn with_max_idle(buffer_size: usize, max_idle: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be non-zero");
        Self {
            buffer_size,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 当前空闲的缓冲区数量
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// 取出一个缓冲区，没有空闲时分配新的
    pub fn acquire_raw(&self) -> Box<[u8]> {
        if let Some(buf) = self.idle.lock().pop() {
            return buf;
        }
        vec![0u8; self.buffer_size].into_boxed_slice()
    }

    /// 归还缓冲区
    ///
    /// 长度与池的配置不符说明缓冲区不是从本池取出的，直接 panic
    pub fn release(&self, buf: Box<[u8]>) {
        if buf.len() != self.buffer_size {
            panic!(
                "attempted to release buffer with invalid length {} (expected {})",
                buf.len(),
                self.buffer_size
            );
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// 取出一个缓冲区，drop 时自动归还
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        PooledBuffer {
            buf: Some(self.acquire_raw()),
            pool: Arc::clone(self),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

/// 从 [`BufferPool`] 取出的缓冲区
///
/// 只暴露切片，借出期间长度不会改变
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
