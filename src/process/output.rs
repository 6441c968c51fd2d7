// src/process/output.rs

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Consume a child output pipe so OS buffers never fill, logging each line
/// at debug level.
pub fn drain_lines<R>(stream: &'static str, pid: Option<u32>, reader: Option<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(reader) = reader else {
        return;
    };

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(pid = ?pid, stream, "{}", line);
        }
    });
}
