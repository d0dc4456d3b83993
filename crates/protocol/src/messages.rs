use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a run, suite, case, or step.
///
/// Mirrors the eight states the certification backend reports over the
/// event socket. Transitions are monotonic only in the terminal direction:
/// a case may revisit `Executing` after `PendingActuation`, but never leaves
/// a terminal state once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    Pending,
    PendingActuation,
    Executing,
    Passed,
    Failed,
    Error,
    NotApplicable,
    Cancelled,
}

impl TestState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TestState::Pending | TestState::PendingActuation | TestState::Executing)
    }
}

/// Outcome attached to a `prompt_response`.
///
/// Serializes as a plain integer on the wire (`0`, `-1`, `-2`, `-3`), matching
/// the backend's `IntEnum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Timeout,
    Invalid,
}

impl StatusCode {
    fn as_i32(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Cancelled => -1,
            StatusCode::Timeout => -2,
            StatusCode::Invalid => -3,
        }
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(StatusCode::Ok),
            -1 => Some(StatusCode::Cancelled),
            -2 => Some(StatusCode::Timeout),
            -3 => Some(StatusCode::Invalid),
            _ => None,
        }
    }
}

impl Serialize for StatusCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i32::deserialize(deserializer)?;
        StatusCode::from_i32(v).ok_or_else(|| serde::de::Error::custom(format!("unknown status_code {v}")))
    }
}

/// A single transition reported for the run, one of its suites, cases, or steps.
/// Each level carries the indices of its parents, accumulating as you descend
/// (a step update carries suite, case, and step indices).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestUpdateBody {
    Step(TestStepUpdate),
    Case(TestCaseUpdate),
    Suite(TestSuiteUpdate),
    Run(TestRunUpdate),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunUpdate {
    pub state: TestState,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub failures: Option<Vec<String>>,
    pub test_run_execution_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteUpdate {
    pub state: TestState,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub failures: Option<Vec<String>>,
    pub test_suite_execution_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseUpdate {
    pub state: TestState,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub failures: Option<Vec<String>>,
    pub test_suite_execution_index: usize,
    pub test_case_execution_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStepUpdate {
    pub state: TestState,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub failures: Option<Vec<String>>,
    pub test_suite_execution_index: usize,
    pub test_case_execution_index: usize,
    pub test_step_execution_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestUpdate {
    pub test_type: String,
    pub body: TestUpdateBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogRecord {
    pub level: String,
    pub timestamp: String,
    pub message: String,
    #[serde(default)]
    pub test_suite_execution_id: Option<i64>,
    #[serde(default)]
    pub test_case_execution_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOutNotification {
    pub message_id: i64,
}

/// Fields every interactive prompt carries, regardless of kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    pub timeout: f64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsSelectPromptRequest {
    pub prompt: String,
    pub timeout: f64,
    pub message_id: i64,
    /// Display label -> integer value to send back on selection.
    pub options: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextInputPromptRequest {
    pub prompt: String,
    pub timeout: f64,
    pub message_id: i64,
    #[serde(default)]
    pub placeholder_text: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub regex_pattern: Option<String>,
}

/// A still image the user is shown before choosing among `options`, encoded
/// as a hex string of the raw image bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVerificationPromptRequest {
    pub prompt: String,
    pub timeout: f64,
    pub message_id: i64,
    pub options: HashMap<String, i64>,
    pub image_hex_str: String,
}

/// Value sent back for a prompt: either an option's integer id or free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptResponseValue {
    Int(i64),
    Text(String),
}

impl Default for PromptResponseValue {
    fn default() -> Self {
        PromptResponseValue::Text(String::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub response: PromptResponseValue,
    pub status_code: StatusCode,
    pub message_id: i64,
}

/// The full event-socket envelope. Adjacently tagged on `type`/`payload`: the
/// wire `type` field picks the handler, `payload` carries the kind-specific
/// body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SocketMessage {
    TestUpdate(TestUpdate),
    OptionsSelectRequest(OptionsSelectPromptRequest),
    TextInputRequest(TextInputPromptRequest),
    StreamVerificationRequest(OptionsSelectPromptRequest),
    ImageVerificationRequest(ImageVerificationPromptRequest),
    TwoWayTalkVerificationRequest(OptionsSelectPromptRequest),
    PushAvStreamVerificationRequest(OptionsSelectPromptRequest),
    FileUploadRequest(PromptRequest),
    TestLogRecords(Vec<TestLogRecord>),
    TimeOutNotification(TimeOutNotification),
    PromptResponse(PromptResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_round_trips_as_integer() {
        let json = serde_json::to_string(&StatusCode::Timeout).unwrap();
        assert_eq!(json, "-2");
        let parsed: StatusCode = serde_json::from_str("-2").unwrap();
        assert_eq!(parsed, StatusCode::Timeout);
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        let err = serde_json::from_str::<StatusCode>("7");
        assert!(err.is_err());
    }

    #[test]
    fn test_update_body_picks_most_specific_variant() {
        let step_json = r#"{
            "state": "passed",
            "test_suite_execution_index": 0,
            "test_case_execution_index": 1,
            "test_step_execution_index": 2
        }"#;
        let body: TestUpdateBody = serde_json::from_str(step_json).unwrap();
        assert!(matches!(body, TestUpdateBody::Step(_)));

        let run_json = r#"{"state": "executing", "test_run_execution_id": 42}"#;
        let body: TestUpdateBody = serde_json::from_str(run_json).unwrap();
        assert!(matches!(body, TestUpdateBody::Run(_)));
    }

    #[test]
    fn socket_message_dispatches_on_type_tag() {
        let json = r#"{
            "type": "options_select_request",
            "payload": {
                "prompt": "Pick one",
                "timeout": 30.0,
                "message_id": 101,
                "options": {"Yes": 1, "No": 0}
            }
        }"#;
        let msg: SocketMessage = serde_json::from_str(json).unwrap();
        match msg {
            SocketMessage::OptionsSelectRequest(req) => {
                assert_eq!(req.options.get("Yes"), Some(&1));
            }
            _ => panic!("expected OptionsSelectRequest"),
        }
    }

    #[test]
    fn prompt_response_serializes_status_as_int() {
        let resp = PromptResponse {
            response: PromptResponseValue::Int(1),
            status_code: StatusCode::Ok,
            message_id: 101,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""status_code":0"#));
        assert!(json.contains(r#""response":1"#));
    }

    #[test]
    fn socket_message_carries_test_log_records() {
        let json = r#"{
            "type": "test_log_records",
            "payload": [
                {"level": "INFO", "timestamp": "2026-01-01T00:00:00", "message": "hello"}
            ]
        }"#;
        let msg: SocketMessage = serde_json::from_str(json).unwrap();
        match msg {
            SocketMessage::TestLogRecords(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].message, "hello");
            }
            _ => panic!("expected TestLogRecords"),
        }
    }
}
