//! Orchestrates ingest socket, transcoder, fan-out queue, and embedded HTTP
//! server for the lifetime of one stream-verification prompt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ffmpeg::{read_transcoded_output, Transcoder};
use crate::http::VideoHttpServer;
use crate::ingest::{connect_with_retry, run_ingest_loop};
use crate::queue::{mp4_fanout_queue, response_channel};

pub struct VideoPipelineHandle {
    http: VideoHttpServer,
    ingest_shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    ingest_task: tokio::task::JoinHandle<()>,
    reader_task: tokio::task::JoinHandle<()>,
    response_rx: mpsc::Receiver<i64>,
}

impl VideoPipelineHandle {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.http.local_addr()
    }

    /// Wait for the user's radio-button choice submitted through the
    /// embedded HTTP form.
    pub async fn next_response(&mut self) -> Option<i64> {
        self.response_rx.recv().await
    }

    /// Signal the ingest loop to stop and wait for it to run the
    /// transcoder's graceful close-stdin -> wait 5s -> kill sequence before
    /// tearing down the reader task and HTTP server. Falls back to aborting
    /// the ingest task if it does not wind down promptly.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.ingest_shutdown {
            let _ = shutdown.send(());
        }
        if tokio::time::timeout(Duration::from_secs(6), &mut self.ingest_task).await.is_err() {
            warn!("video ingest task did not stop within 6s, aborting");
            self.ingest_task.abort();
        }
        self.reader_task.abort();
        self.http.stop();
    }
}

pub struct VideoPipelineConfig {
    pub http_port: u16,
    pub ingest_ws_url: String,
    pub ingest_connect_attempts: u32,
    pub ingest_retry_delay: Duration,
    pub capture_path: PathBuf,
    pub prompt_text: String,
    pub prompt_options: HashMap<String, i64>,
}

/// Start the full video pipeline: HTTP server first (so the URL can be
/// handed to the user immediately), then the ingest socket with its bounded
/// retry, feeding a freshly spawned transcoder.
pub async fn start(config: VideoPipelineConfig) -> Result<VideoPipelineHandle> {
    let mp4_queue = mp4_fanout_queue();
    let (response_tx, response_rx) = response_channel();

    let http = VideoHttpServer::start(
        config.http_port,
        config.prompt_text,
        config.prompt_options,
        mp4_queue.clone(),
        response_tx,
    )
    .await
    .context("failed to start embedded video verification HTTP server")?;

    let mut transcoder = Transcoder::spawn().context("failed to start video transcoder")?;
    let stdout = transcoder.take_stdout().context("transcoder stdout unavailable")?;

    let reader_queue = mp4_queue.clone();
    let reader_task = tokio::spawn(async move {
        read_transcoded_output(stdout, reader_queue).await;
    });

    let stream = connect_with_retry(
        &config.ingest_ws_url,
        config.ingest_connect_attempts,
        config.ingest_retry_delay,
    )
    .await
    .context("failed to connect to video ingest socket")?;

    let capture_path = config.capture_path;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let ingest_task = tokio::spawn(async move {
        if let Err(err) = run_ingest_loop(stream, &mut transcoder, capture_path, shutdown_rx).await {
            warn!(%err, "video ingest loop ended with error");
        }
        transcoder.stop().await;
    });

    info!("video pipeline started");
    Ok(VideoPipelineHandle {
        http,
        ingest_shutdown: Some(shutdown_tx),
        ingest_task,
        reader_task,
        response_rx,
    })
}
