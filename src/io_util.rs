/// 转发用的 I/O 辅助函数
///
/// 相比 tokio::io::copy，这里使用调用方提供的缓冲区（来自缓冲池），
/// 并在每次复制后立即更新统计
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 拷贝数据直到 EOF，每次写入后调用 `on_chunk` 记录字节数
///
/// 返回复制的总字节数。读到 EOF 时不会关闭 writer，由调用方决定是否半关闭。
pub async fn copy_with_stats<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    mut on_chunk: F,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    let mut total = 0u64;

    loop {
        let n = match reader.read(buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;

        total += n as u64;
        on_chunk(n as u64);
    }

    Ok(total)
}
