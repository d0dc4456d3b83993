//! WebSocket client that ingests the raw H.264 byte stream from the backend
//! and feeds it to the transcoder, tee'ing a raw capture file alongside.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::ffmpeg::Transcoder;

/// Connect to the ingest socket, retrying a bounded number of times because
/// the backend may not have the stream ready the instant the prompt fires.
/// Unlike the signaling socket (which backs off exponentially and retries
/// forever), this is a short, bounded wait: if the stream never shows up the
/// video prompt fails outright.
pub async fn connect_with_retry(
    url: &str,
    attempts: u32,
    delay: Duration,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _response)) => {
                info!(attempt, "video ingest socket connected");
                return Ok(stream);
            }
            Err(err) => {
                warn!(attempt, attempts, %err, "video ingest connect attempt failed");
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(anyhow::anyhow!("failed to connect to video ingest socket after {attempts} attempts"))
        .context(last_err.map(|e| e.to_string()).unwrap_or_default())
}

/// Run the ingest loop: read binary frames from `stream`, write each to the
/// transcoder's stdin and append it to the raw capture file, until the
/// socket closes, the transcoder dies, or `shutdown` fires.
pub async fn run_ingest_loop(
    mut stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    transcoder: &mut Transcoder,
    capture_path: PathBuf,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let mut capture_file = tokio::fs::File::create(&capture_path)
        .await
        .with_context(|| format!("failed to create capture file {}", capture_path.display()))?;

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = &mut shutdown => {
                info!("video ingest loop cancelled");
                break;
            }
        };

        match msg {
            Some(Ok(Message::Binary(data))) => {
                capture_file.write_all(&data).await.ok();
                if let Err(err) = transcoder.feed(&data).await {
                    warn!(%err, "transcoder stopped accepting input, ending ingest");
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("video ingest socket closed by server");
                break;
            }
            Some(Ok(_)) => {
                // non-binary frames carry no video payload; ignore
            }
            Some(Err(err)) => {
                warn!(%err, "video ingest socket error");
                break;
            }
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_with_retry_fails_after_exhausting_attempts() {
        let result = connect_with_retry("ws://127.0.0.1:1/no-such-port", 2, Duration::from_millis(1)).await;
        assert!(result.is_err());
    }
}
