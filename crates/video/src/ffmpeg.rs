//! External ffmpeg process wrapper: raw H.264 Annex-B in, fragmented MP4 out.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tracing::{info, warn};

/// Chunk size used to read converted MP4 bytes from ffmpeg's stdout,
/// matching the reference converter's read granularity.
pub const READ_CHUNK_SIZE: usize = 8192;

/// Wraps a running `ffmpeg` child process that converts a raw H.264
/// Annex-B stream fed on stdin into fragmented MP4 on stdout, suitable for
/// progressive HTTP playback.
pub struct Transcoder {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Transcoder {
    /// Spawn ffmpeg. Fails with a descriptive error (surfaced to the user)
    /// if the binary is missing from PATH.
    pub fn spawn() -> Result<Self> {
        let mut child = tokio::process::Command::new("ffmpeg")
            .arg("-f")
            .arg("h264")
            .arg("-i")
            .arg("pipe:0")
            .arg("-vcodec")
            .arg("libx264")
            .arg("-preset")
            .arg("ultrafast")
            .arg("-tune")
            .arg("zerolatency")
            .arg("-profile:v")
            .arg("baseline")
            .arg("-level")
            .arg("3.0")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-g")
            .arg("30")
            .arg("-keyint_min")
            .arg("30")
            .arg("-movflags")
            .arg("frag_keyframe+empty_moov+default_base_moof")
            .arg("-f")
            .arg("mp4")
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to start ffmpeg. Make sure ffmpeg is installed and on PATH.")?;

        let stdin = child.stdin.take().context("failed to capture ffmpeg stdin")?;

        info!("transcoder process started");
        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    /// Write one chunk of raw H.264 to ffmpeg's stdin. Errors here (a dead
    /// process) are returned so the ingest loop can stop feeding.
    pub async fn feed(&mut self, data: &[u8]) -> Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.write_all(data).await.context("failed to write to ffmpeg stdin")?;
            stdin.flush().await.ok();
        }
        Ok(())
    }

    /// Take ownership of the stdout handle for the reader task. May only be
    /// called once.
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Close stdin, wait up to 5s for ffmpeg to exit, then kill if it hasn't.
    pub async fn stop(&mut self) {
        self.stdin.take();
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "transcoder exited"),
            Ok(Err(err)) => warn!(%err, "error waiting for transcoder to exit"),
            Err(_) => {
                warn!("transcoder did not exit within 5s, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// Read converted MP4 bytes from `stdout` in fixed-size chunks, publishing
/// each to the fan-out queue, until the process closes the pipe.
pub async fn read_transcoded_output(
    mut stdout: tokio::process::ChildStdout,
    queue: crate::queue::Mp4QueueSender,
) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                info!("transcoder stdout closed");
                break;
            }
            Ok(n) => {
                queue.publish(bytes::Bytes::copy_from_slice(&buf[..n]));
            }
            Err(err) => {
                warn!(%err, "error reading transcoder stdout");
                break;
            }
        }
    }
    queue.end_of_stream();
}

#[cfg(test)]
mod tests {
    use super::READ_CHUNK_SIZE;

    #[test]
    fn read_chunk_size_matches_reference_converter() {
        assert_eq!(READ_CHUNK_SIZE, 8192);
    }
}
