//! Error taxonomy for the session. Domain errors are typed with `thiserror`;
//! the command boundary (`main`) wraps everything in `anyhow::Error` and
//! prints a single `Error: ...` line before exiting 1, matching the
//! reference server's `anyhow`-at-the-edge style.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("video pipeline error: {0}")]
    VideoPipeline(String),

    #[error("WebRTC signaling error: {0}")]
    WebRtc(String),
}
