//! Line-delimited frame source: one frame per line, from a file or stdin.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use crate::processor::RawFrame;
use crate::session::SessionInput;

/// Forward each non-blank line as a frame. A read failure is reported to the
/// session as a connection error before being returned.
pub async fn forward_lines<R>(reader: R, input: &mpsc::UnboundedSender<SessionInput>) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = LinesStream::new(BufReader::new(reader).lines());
    let mut forwarded = 0;

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = input.send(SessionInput::ConnectionError(e.to_string()));
                return Err(e).context("reading frame stream");
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if input.send(SessionInput::Frame(RawFrame::Text(line))).is_err() {
            tracing::debug!(forwarded, "session closed, stopping replay");
            break;
        }
        forwarded += 1;
    }

    tracing::debug!(forwarded, "frame stream ended");
    Ok(forwarded)
}

pub async fn replay_file(path: &Path, input: &mpsc::UnboundedSender<SessionInput>) -> Result<usize> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open frame log {}", path.display()))?;
    forward_lines(file, input).await
}
