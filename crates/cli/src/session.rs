//! Session controller: owns the event-stream connection for one test run
//! execution, renders state transitions to the terminal, tracks per-case
//! step errors for the two-way-talk warning banner, and dispatches prompts
//! as they arrive.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use th_protocol::config::CliConfig;
use th_protocol::messages::{SocketMessage, TestState, TestUpdate, TestUpdateBody};
use th_video::peer::VerificationPeer;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use crate::colorize::{colorize_error, colorize_hierarchy_prefix, colorize_state, Hierarchy};
use crate::error::CliError;
use crate::prompt::PromptDispatcher;

const WEBRTC_INDICATORS: &[&str] = &[
    "browserpeerconnection",
    "webrtc",
    "browser peer",
    "ws://backend/api/v1/ws/webrtc",
    "create_browser_peer",
];

enum Outcome {
    Continue,
    Respond(SocketMessage),
    Terminate,
}

pub struct TestRunSession {
    config: CliConfig,
    run_tree: Value,
    dispatcher: PromptDispatcher,
    /// `(suite_index, case_index)` -> accumulated step error strings, used to
    /// decide whether a failed case is actually an unsupported browser-only
    /// (WebRTC two-way-talk) test.
    step_errors: HashMap<(usize, usize), Vec<String>>,
}

impl TestRunSession {
    pub fn new(config: CliConfig, run_tree: Value, dispatcher: PromptDispatcher) -> Self {
        Self {
            config,
            run_tree,
            dispatcher,
            step_errors: HashMap::new(),
        }
    }

    /// Connect to the event socket and process updates until the run
    /// reaches a terminal state or the server closes the connection.
    pub async fn run(&mut self) -> Result<()> {
        let url = self.config.server.event_ws_url();
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|err| CliError::Transport(format!("failed to connect to event socket at {url}: {err}")))?;
        let (mut write, mut read) = ws_stream.split();

        let peer = match VerificationPeer::new().await {
            Ok(peer) => Some(Arc::new(peer)),
            Err(err) => {
                let err = CliError::WebRtc(err.to_string());
                warn!(%err, "two-way-talk prompts will be degraded to plain options-select");
                None
            }
        };

        let signaling_task = peer.clone().map(|peer| {
            let url = self.config.server.signaling_ws_url();
            tokio::spawn(async move {
                if let Err(err) = peer.run_signaling(&url).await {
                    warn!(%err, "WebRTC signaling loop ended with error");
                }
            })
        });

        let run_result = loop {
            let incoming = tokio::select! {
                incoming = read.next() => incoming,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("{}", colorize_error("received interrupt, cancelling session"));
                    break Ok(());
                }
            };

            let incoming = match incoming {
                Some(incoming) => incoming,
                None => break Ok(()),
            };

            let message = match incoming {
                Ok(message) => message,
                Err(err) => break Err(err).context("event socket read error"),
            };

            let outcome = match message {
                Message::Text(text) => self.handle_text(&text, peer.as_deref()).await,
                Message::Binary(_) => {
                    eprintln!(
                        "{}",
                        colorize_error("failed to parse incoming websocket message: got bytes, expected text")
                    );
                    Outcome::Continue
                }
                Message::Close(_) => Outcome::Terminate,
                _ => Outcome::Continue,
            };

            match outcome {
                Outcome::Continue => {}
                Outcome::Respond(response) => {
                    let payload = match serde_json::to_string(&response).context("failed to serialize prompt response") {
                        Ok(payload) => payload,
                        Err(err) => break Err(err),
                    };
                    if let Err(err) = write.send(Message::Text(payload.into())).await.context("failed to send prompt response") {
                        break Err(err);
                    }
                }
                Outcome::Terminate => break Ok(()),
            }
        };

        // Same teardown regardless of whether the loop ended on a terminal
        // run state, a closed socket, or Ctrl-C.
        let _ = write.close().await;
        if let Some(peer) = &peer {
            let _ = peer.close().await;
        }
        if let Some(task) = signaling_task {
            task.abort();
        }
        run_result
    }

    async fn handle_text(&mut self, text: &str, peer: Option<&VerificationPeer>) -> Outcome {
        let parsed: SocketMessage = match serde_json::from_str(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                eprintln!("{}", colorize_error(&format!("received invalid socket message: {text}")));
                eprintln!("{}", colorize_error(&err.to_string()));
                return Outcome::Continue;
            }
        };

        match parsed {
            SocketMessage::TestUpdate(update) => {
                let terminal_run = self.handle_test_update(&update);
                if terminal_run {
                    Outcome::Terminate
                } else {
                    Outcome::Continue
                }
            }
            SocketMessage::OptionsSelectRequest(req) => {
                Outcome::Respond(SocketMessage::PromptResponse(self.dispatcher.handle_options(req).await))
            }
            SocketMessage::TextInputRequest(req) => {
                Outcome::Respond(SocketMessage::PromptResponse(self.dispatcher.handle_text(req).await))
            }
            SocketMessage::StreamVerificationRequest(req) => Outcome::Respond(SocketMessage::PromptResponse(
                self.dispatcher.handle_stream_verification(req).await,
            )),
            SocketMessage::ImageVerificationRequest(req) => {
                let capture_dir = std::path::PathBuf::from(&self.dispatcher.config.video.capture_dir);
                Outcome::Respond(SocketMessage::PromptResponse(
                    self.dispatcher.handle_image(req, &capture_dir).await,
                ))
            }
            SocketMessage::TwoWayTalkVerificationRequest(req) | SocketMessage::PushAvStreamVerificationRequest(req) => {
                Outcome::Respond(SocketMessage::PromptResponse(self.dispatcher.handle_two_way_talk(req, peer).await))
            }
            SocketMessage::FileUploadRequest(req) => {
                Outcome::Respond(SocketMessage::PromptResponse(self.dispatcher.handle_file_upload(req).await))
            }
            SocketMessage::TestLogRecords(records) => {
                for record in records {
                    log_record(&record.level, &record.message);
                }
                Outcome::Continue
            }
            // The CLI enforces its own prompt timeouts; the server's
            // time_out_notification is informational only.
            SocketMessage::TimeOutNotification(_) => Outcome::Continue,
            SocketMessage::PromptResponse(_) => Outcome::Continue,
        }
    }

    /// Returns `true` once the run itself has reached a terminal state.
    fn handle_test_update(&mut self, update: &TestUpdate) -> bool {
        match &update.body {
            TestUpdateBody::Step(step) => {
                self.log_step_update(step);
                false
            }
            TestUpdateBody::Case(case) => {
                self.log_case_update(case);
                false
            }
            TestUpdateBody::Suite(suite) => {
                self.log_suite_update(suite);
                false
            }
            TestUpdateBody::Run(run) => {
                let label = colorize_hierarchy_prefix("Test Run", Hierarchy::Run);
                println!("{label} {}", colorize_state(run.state));
                run.state != TestState::Executing
            }
        }
    }

    fn log_suite_update(&self, update: &th_protocol::messages::TestSuiteUpdate) {
        let title = self.suite_title(update.test_suite_execution_index).unwrap_or_else(|| "suite".to_string());
        let label = colorize_hierarchy_prefix(&title, Hierarchy::Suite);
        println!("  - {label} {}", colorize_state(update.state));
    }

    fn log_case_update(&mut self, update: &th_protocol::messages::TestCaseUpdate) {
        let (title, public_id) = self
            .case_title_and_public_id(update.test_suite_execution_index, update.test_case_execution_index)
            .unwrap_or_else(|| ("case".to_string(), String::new()));
        let label = colorize_hierarchy_prefix(&title, Hierarchy::Case);
        println!("      - {label} {}", colorize_state(update.state));

        if matches!(update.state, TestState::Failed | TestState::Error) {
            let case_key = (update.test_suite_execution_index, update.test_case_execution_index);
            let mut all_errors = update.errors.clone().unwrap_or_default();
            if let Some(step_errors) = self.step_errors.get(&case_key) {
                all_errors.extend(step_errors.iter().cloned());
            }

            let mut is_webrtc_test = public_id == "TC_WEBRTC_1_6";
            if !is_webrtc_test && !all_errors.is_empty() {
                let joined = all_errors.join(" ").to_lowercase();
                is_webrtc_test = WEBRTC_INDICATORS.iter().any(|indicator| joined.contains(indicator));
            }

            if is_webrtc_test {
                println!();
                eprintln!("{}", colorize_error("TWO-WAY TALK TEST NOT SUPPORTED IN CLI"));
                eprintln!("{}", colorize_error(&format!("   {title} requires a browser WebRTC implementation.")));
                eprintln!("{}", colorize_error("   This test cannot run from the CLI. Please use the Web UI."));
                println!();
            }

            self.step_errors.remove(&case_key);
        }
    }

    fn log_step_update(&mut self, update: &th_protocol::messages::TestStepUpdate) {
        if let Some(title) = self.step_title(
            update.test_suite_execution_index,
            update.test_case_execution_index,
            update.test_step_execution_index,
        ) {
            let label = colorize_hierarchy_prefix(&title, Hierarchy::Step);
            println!("            - {label} {}", colorize_state(update.state));
        }

        if let Some(errors) = &update.errors {
            if !errors.is_empty() {
                let case_key = (update.test_suite_execution_index, update.test_case_execution_index);
                self.step_errors.entry(case_key).or_default().extend(errors.iter().cloned());
            }
        }
    }

    fn suite(&self, suite_index: usize) -> Option<&Value> {
        self.run_tree.get("test_suite_executions")?.get(suite_index)
    }

    fn case(&self, suite_index: usize, case_index: usize) -> Option<&Value> {
        self.suite(suite_index)?.get("test_case_executions")?.get(case_index)
    }

    fn step(&self, suite_index: usize, case_index: usize, step_index: usize) -> Option<&Value> {
        self.case(suite_index, case_index)?.get("test_step_executions")?.get(step_index)
    }

    fn suite_title(&self, suite_index: usize) -> Option<String> {
        self.suite(suite_index)?
            .get("test_suite_metadata")?
            .get("title")?
            .as_str()
            .map(str::to_string)
    }

    fn case_title_and_public_id(&self, suite_index: usize, case_index: usize) -> Option<(String, String)> {
        let case = self.case(suite_index, case_index)?;
        let metadata = case.get("test_case_metadata")?;
        let title = metadata.get("title")?.as_str()?.to_string();
        let public_id = metadata.get("public_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
        Some((title, public_id))
    }

    fn step_title(&self, suite_index: usize, case_index: usize, step_index: usize) -> Option<String> {
        self.step(suite_index, case_index, step_index)?.get("title")?.as_str().map(str::to_string)
    }
}

fn log_record(level: &str, message: &str) {
    match level.to_uppercase().as_str() {
        "DEBUG" | "TRACE" => tracing::debug!("{message}"),
        "WARNING" | "WARN" => tracing::warn!("{message}"),
        "ERROR" | "CRITICAL" => tracing::error!("{message}"),
        _ => tracing::info!("{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run_tree() -> Value {
        serde_json::json!({
            "test_suite_executions": [{
                "test_suite_metadata": {"title": "Onboarding Suite"},
                "test_case_executions": [{
                    "test_case_metadata": {"title": "TC-WEBRTC-1.6", "public_id": "TC_WEBRTC_1_6"},
                    "test_step_executions": [{"title": "Open camera stream"}]
                }]
            }]
        })
    }

    fn dummy_dispatcher() -> PromptDispatcher {
        PromptDispatcher::new(CliConfig::default(), crate::rest::RestClient::new(&CliConfig::default().server))
    }

    #[test]
    fn title_lookups_navigate_the_run_tree() {
        let session = TestRunSession::new(CliConfig::default(), sample_run_tree(), dummy_dispatcher());
        assert_eq!(session.suite_title(0).as_deref(), Some("Onboarding Suite"));
        assert_eq!(
            session.case_title_and_public_id(0, 0),
            Some(("TC-WEBRTC-1.6".to_string(), "TC_WEBRTC_1_6".to_string()))
        );
        assert_eq!(session.step_title(0, 0, 0).as_deref(), Some("Open camera stream"));
    }

    #[test]
    fn missing_indices_return_none_rather_than_panicking() {
        let session = TestRunSession::new(CliConfig::default(), sample_run_tree(), dummy_dispatcher());
        assert_eq!(session.suite_title(5), None);
        assert_eq!(session.step_title(0, 0, 9), None);
    }

    #[test]
    fn step_errors_accumulate_per_case_key() {
        let mut session = TestRunSession::new(CliConfig::default(), sample_run_tree(), dummy_dispatcher());
        let step = th_protocol::messages::TestStepUpdate {
            state: TestState::Failed,
            errors: Some(vec!["boom".to_string()]),
            failures: None,
            test_suite_execution_index: 0,
            test_case_execution_index: 0,
            test_step_execution_index: 0,
        };
        session.log_step_update(&step);
        assert_eq!(session.step_errors.get(&(0, 0)).unwrap(), &vec!["boom".to_string()]);
    }

    #[test]
    fn run_update_is_terminal_only_when_not_executing() {
        let mut session = TestRunSession::new(CliConfig::default(), sample_run_tree(), dummy_dispatcher());
        let executing = TestUpdate {
            test_type: "test_run".to_string(),
            body: TestUpdateBody::Run(th_protocol::messages::TestRunUpdate {
                state: TestState::Executing,
                errors: None,
                failures: None,
                test_run_execution_id: 1,
            }),
        };
        assert!(!session.handle_test_update(&executing));

        let passed = TestUpdate {
            test_type: "test_run".to_string(),
            body: TestUpdateBody::Run(th_protocol::messages::TestRunUpdate {
                state: TestState::Passed,
                errors: None,
                failures: None,
                test_run_execution_id: 1,
            }),
        };
        assert!(session.handle_test_update(&passed));
    }
}
