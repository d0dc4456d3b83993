//! Thin REST client: enough surface to create and start a run, fetch its
//! history, check runner status, abort, and upload a file during a
//! file-upload prompt. The full catalog/PICS/project REST surface is out of
//! scope; these are the calls the core session loop actually needs.

use anyhow::{Context, Result};
use th_protocol::config::ServerConfig;

pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(server: &ServerConfig) -> Self {
        Self {
            base_url: server.base_http_url(),
            http: reqwest::Client::new(),
        }
    }

    /// Create a new test run execution for the given (already-normalized)
    /// test ids, returning the backend-assigned run id.
    pub async fn create_run(&self, test_ids: &[String], title: Option<&str>, project_id: Option<i64>) -> Result<i64> {
        let body = serde_json::json!({
            "test_ids": test_ids,
            "title": title,
            "project_id": project_id,
        });
        let resp = self
            .http
            .post(format!("{}/api/v1/test_run_executions/", self.base_url))
            .json(&body)
            .send()
            .await
            .context("failed to create test run")?;
        let resp = resp.error_for_status().context("create_run returned an error status")?;
        let parsed: serde_json::Value = resp.json().await.context("invalid create_run response body")?;
        parsed
            .get("id")
            .and_then(|v| v.as_i64())
            .context("create_run response missing integer id")
    }

    pub async fn start_run(&self, run_id: i64) -> Result<()> {
        self.http
            .post(format!("{}/api/v1/test_run_executions/{run_id}/start", self.base_url))
            .send()
            .await
            .context("failed to start test run")?
            .error_for_status()
            .context("start_run returned an error status")?;
        Ok(())
    }

    pub async fn run_history(&self, run_id: i64) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(format!("{}/api/v1/test_run_executions/{run_id}", self.base_url))
            .send()
            .await
            .context("failed to fetch run history")?
            .error_for_status()
            .context("run_history returned an error status")?;
        resp.json().await.context("invalid run_history response body")
    }

    pub async fn runner_status(&self) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(format!("{}/api/v1/test_runner/state", self.base_url))
            .send()
            .await
            .context("failed to fetch runner status")?
            .error_for_status()
            .context("runner_status returned an error status")?;
        resp.json().await.context("invalid runner_status response body")
    }

    pub async fn abort_testing(&self) -> Result<()> {
        self.http
            .post(format!("{}/api/v1/test_runner/abort-testing", self.base_url))
            .send()
            .await
            .context("failed to abort testing")?
            .error_for_status()
            .context("abort_testing returned an error status")?;
        Ok(())
    }

    /// Upload a file for a file-upload prompt. Returns true on HTTP 200,
    /// matching the reference client's "SUCCESS vs empty" contract. Network
    /// failures are swallowed here (the caller always answers the prompt
    /// regardless of upload outcome).
    pub async fn upload_file(&self, path: &std::path::Path) -> bool {
        let Ok(bytes) = tokio::fs::read(path).await else {
            return false;
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/api/v1/test_run_executions/file_upload/", self.base_url);
        match self.http.post(url).multipart(form).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
