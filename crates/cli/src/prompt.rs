//! Prompt dispatcher: answers exactly one interactive request per call,
//! always within the request's timeout, always sending exactly one
//! `prompt_response`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use th_protocol::config::CliConfig;
use th_protocol::messages::{
    ImageVerificationPromptRequest, OptionsSelectPromptRequest, PromptRequest, PromptResponse,
    PromptResponseValue, StatusCode, TextInputPromptRequest,
};
use th_video::peer::VerificationPeer;
use th_video::pipeline::{self, VideoPipelineConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::colorize::colorize_error;
use crate::rest::RestClient;

const MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024;
const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["txt", "log"];

pub struct PromptDispatcher {
    pub config: CliConfig,
    pub rest: RestClient,
}

impl PromptDispatcher {
    pub fn new(config: CliConfig, rest: RestClient) -> Self {
        Self { config, rest }
    }

    pub async fn handle_options(&self, req: OptionsSelectPromptRequest) -> PromptResponse {
        let deadline = Duration::from_secs_f64(req.timeout.max(0.0));
        let message_id = req.message_id;
        match tokio::time::timeout(deadline, prompt_for_option(&req.prompt, &req.options)).await {
            Ok(Some(value)) => ok_response(message_id, PromptResponseValue::Int(value)),
            Ok(None) => cancelled_response(message_id),
            Err(_) => timeout_response(message_id),
        }
    }

    pub async fn handle_text(&self, req: TextInputPromptRequest) -> PromptResponse {
        let deadline = Duration::from_secs_f64(req.timeout.max(0.0));
        let message_id = req.message_id;
        let regex = match req.regex_pattern.as_deref() {
            Some(pattern) => match regex::Regex::new(&anchor_pattern(pattern)) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(%err, pattern, "invalid regex_pattern in text prompt, accepting any input");
                    None
                }
            },
            None => None,
        };

        match tokio::time::timeout(deadline, prompt_for_text(&req.prompt, regex.as_ref())).await {
            Ok(Some(text)) => ok_response(message_id, PromptResponseValue::Text(text)),
            Ok(None) => cancelled_response(message_id),
            Err(_) => timeout_response(message_id),
        }
    }

    pub async fn handle_file_upload(&self, req: PromptRequest) -> PromptResponse {
        let deadline = Duration::from_secs_f64(req.timeout.max(0.0));
        let message_id = req.message_id;

        let path = match tokio::time::timeout(deadline, prompt_for_file_path(&req.prompt)).await {
            Ok(Some(path)) => path,
            Ok(None) => return cancelled_response(message_id),
            Err(_) => return timeout_response(message_id),
        };

        if path.as_os_str().is_empty() {
            // Empty input means "skip" in the reference client.
            return ok_response(message_id, PromptResponseValue::Text(String::new()));
        }

        if !is_valid_upload(&path).await {
            println!("{}", colorize_error("file is not readable, too large, or has an unsupported extension"));
            return ok_response(message_id, PromptResponseValue::Text(String::new()));
        }

        let uploaded = self.rest.upload_file(&path).await;
        let value = if uploaded { "SUCCESS".to_string() } else { String::new() };
        ok_response(message_id, PromptResponseValue::Text(value))
    }

    pub async fn handle_image(&self, req: ImageVerificationPromptRequest, capture_dir: &Path) -> PromptResponse {
        if let Err(err) = save_image_from_hex(&req.image_hex_str, req.message_id, capture_dir).await {
            warn!(%err, "failed to persist verification image");
        }

        let as_options = OptionsSelectPromptRequest {
            prompt: req.prompt,
            timeout: req.timeout,
            message_id: req.message_id,
            options: req.options,
        };
        self.handle_options(as_options).await
    }

    /// Stream (live-video) verification: start the video pipeline, announce
    /// the URL, open a browser, wait for the user's choice or timeout, then
    /// always tear the pipeline down before returning — even on timeout or
    /// error, matching the reference client's lifecycle ordering.
    pub async fn handle_stream_verification(&self, req: OptionsSelectPromptRequest) -> PromptResponse {
        let message_id = req.message_id;
        let deadline = Duration::from_secs_f64(req.timeout.max(0.0));

        let capture_path = PathBuf::from(&self.config.video.capture_dir).join(format!("{}.bin", req.message_id));
        if let Some(parent) = capture_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let pipeline_config = VideoPipelineConfig {
            http_port: self.config.video.http_port,
            ingest_ws_url: self.config.server.video_ingest_ws_url(),
            ingest_connect_attempts: self.config.video.ingest_connect_attempts,
            ingest_retry_delay: Duration::from_millis(self.config.video.ingest_retry_delay_ms),
            capture_path,
            prompt_text: req.prompt.clone(),
            prompt_options: req.options.clone(),
        };

        let mut handle = match pipeline::start(pipeline_config).await {
            Ok(h) => h,
            Err(err) => {
                let err = crate::error::CliError::VideoPipeline(err.to_string());
                println!("{}", colorize_error(&err.to_string()));
                return invalid_response(message_id);
            }
        };

        println!("Please verify the video at: http://{}:{}/", self.config.server.hostname, handle.local_addr().port());
        open_browser(&format!("http://{}:{}/", self.config.server.hostname, handle.local_addr().port()));

        let outcome = tokio::time::timeout(deadline, handle.next_response()).await;
        handle.stop().await;

        match outcome {
            Ok(Some(value)) => ok_response(message_id, PromptResponseValue::Int(value)),
            Ok(None) => invalid_response(message_id),
            Err(_) => timeout_response(message_id),
        }
    }

    /// Two-way-talk / push-AV verification: treated as an options-select
    /// prompt, with a pre-warmed WebRTC peer (if available) negotiating in
    /// the background so the remote controller can establish media. If the
    /// peer failed to initialize, the prompt still answers from standard
    /// input.
    pub async fn handle_two_way_talk(&self, req: OptionsSelectPromptRequest, peer: Option<&VerificationPeer>) -> PromptResponse {
        if peer.is_none() {
            warn!("two-way-talk prompt without an available WebRTC peer; browser-only verification will not function");
        }
        self.handle_options(req).await
    }
}

fn anchor_pattern(pattern: &str) -> String {
    if pattern.starts_with('^') && pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("^(?:{pattern})$")
    }
}

async fn prompt_for_option(prompt: &str, options: &HashMap<String, i64>) -> Option<i64> {
    loop {
        println!("{prompt}");
        for (label, value) in options.iter() {
            println!("  [{value}] {label}");
        }
        print!("> ");
        let Some(line) = read_line().await else { return None };
        let trimmed = line.trim();
        if let Ok(parsed) = trimmed.parse::<i64>() {
            if options.values().any(|v| *v == parsed) {
                return Some(parsed);
            }
        }
        println!("{}", colorize_error("invalid selection, please try again"));
    }
}

async fn prompt_for_text(prompt: &str, regex: Option<&regex::Regex>) -> Option<String> {
    loop {
        println!("{prompt}");
        print!("> ");
        let Some(line) = read_line().await else { return None };
        let trimmed = line.trim().to_string();
        match regex {
            Some(re) if !re.is_match(&trimmed) => {
                println!("{}", colorize_error("input does not match the required format, please try again"));
            }
            _ => return Some(trimmed),
        }
    }
}

async fn prompt_for_file_path(prompt: &str) -> Option<PathBuf> {
    println!("{prompt}");
    println!("(enter a path to a .txt or .log file, or leave empty to skip)");
    print!("> ");
    let line = read_line().await?;
    Some(PathBuf::from(line.trim()))
}

async fn read_line() -> Option<String> {
    use tokio::io::AsyncWriteExt;
    tokio::io::stdout().flush().await.ok();
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(_) => None,
    }
}

async fn is_valid_upload(path: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else { return false };
    if !metadata.is_file() || metadata.len() > MAX_FILE_SIZE_BYTES {
        return false;
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    ALLOWED_UPLOAD_EXTENSIONS.contains(&ext.as_str())
}

async fn save_image_from_hex(hex_str: &str, message_id: i64, capture_dir: &Path) -> Result<()> {
    let bytes = decode_hex(hex_str)?;
    tokio::fs::create_dir_all(capture_dir).await?;
    let path = capture_dir.join(format!("verification_{message_id}.png"));
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

fn decode_hex(hex_str: &str) -> Result<Vec<u8>> {
    if hex_str.len() % 2 != 0 {
        anyhow::bail!("hex string has odd length");
    }
    (0..hex_str.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex_str[i..i + 2], 16).map_err(anyhow::Error::from))
        .collect()
}

fn open_browser(url: &str) {
    #[cfg(target_os = "linux")]
    let opener = "xdg-open";
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(target_os = "windows")]
    let opener = "cmd";

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let result = std::process::Command::new(opener).arg(url).spawn();
    #[cfg(target_os = "windows")]
    let result = std::process::Command::new(opener).args(["/C", "start", url]).spawn();

    if let Err(err) = result {
        warn!(%err, "failed to auto-open browser for video verification");
    }
}

fn ok_response(message_id: i64, value: PromptResponseValue) -> PromptResponse {
    info!(%message_id, "prompt answered");
    PromptResponse {
        response: value,
        status_code: StatusCode::Ok,
        message_id,
    }
}

fn cancelled_response(message_id: i64) -> PromptResponse {
    PromptResponse {
        response: PromptResponseValue::default(),
        status_code: StatusCode::Cancelled,
        message_id,
    }
}

fn timeout_response(message_id: i64) -> PromptResponse {
    warn!(%message_id, "prompt timed out");
    PromptResponse {
        response: PromptResponseValue::Int(0),
        status_code: StatusCode::Timeout,
        message_id,
    }
}

fn invalid_response(message_id: i64) -> PromptResponse {
    PromptResponse {
        response: PromptResponseValue::default(),
        status_code: StatusCode::Invalid,
        message_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_pattern_wraps_unanchored_regex() {
        assert_eq!(anchor_pattern("yes|no"), "^(?:yes|no)$");
    }

    #[test]
    fn anchor_pattern_leaves_already_anchored_regex() {
        assert_eq!(anchor_pattern("^yes|no$"), "^yes|no$");
    }

    #[test]
    fn anchored_regex_rejects_partial_match() {
        let re = regex::Regex::new(&anchor_pattern("[A-Z]+")).unwrap();
        assert!(re.is_match("ABC"));
        assert!(!re.is_match("ABC123"));
    }

    #[test]
    fn decode_hex_round_trips() {
        let bytes = decode_hex("48656c6c6f").unwrap();
        assert_eq!(bytes, b"Hello");
    }

    #[test]
    fn decode_hex_rejects_odd_length() {
        assert!(decode_hex("abc").is_err());
    }
}
