//! SonarQube submission and quality gate lookup.

use super::checked;
use crate::config::ScannerConfig;
use crate::errors::{DeployflowError, Result};
use crate::stages::{GateStatus, QualityScanner, ReportHandle};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Submits with the `sonar-scanner` CLI and reads gates over HTTP.
#[derive(Debug, Clone)]
pub struct SonarScanner {
    client: reqwest::Client,
    base_url: String,
    project_key: String,
    binary: String,
}

#[derive(Debug, Deserialize)]
struct ProjectStatusResponse {
    #[serde(rename = "projectStatus")]
    project_status: ProjectStatus,
}

#[derive(Debug, Deserialize)]
struct ProjectStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    task: Task,
}

#[derive(Debug, Deserialize)]
struct Task {
    status: String,
}

impl SonarScanner {
    /// Creates a scanner for the project in `config`.
    #[must_use]
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url(),
            project_key: config.project_key.clone(),
            binary: "sonar-scanner".to_string(),
        }
    }

    /// Uses a specific scanner binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Token-as-username basic auth, as the scanner API expects.
    fn authorization(token: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{token}:")))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "scanner request");
        let response = self
            .client
            .get(&url)
            .query(query)
            .header(AUTHORIZATION, Self::authorization(token))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DeployflowError::tool("scanner api", e.to_string()))?;
        response
            .json::<T>()
            .await
            .map_err(|e| DeployflowError::tool("scanner api", e.to_string()))
    }
}

fn task_id(output: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"api/ce/task\?id=([A-Za-z0-9_-]+)").ok())
        .as_ref()?
        .captures(output)
        .map(|c| c[1].to_string())
}

fn gate_from(status: &str) -> GateStatus {
    match status {
        "OK" => GateStatus::Passed,
        "ERROR" => GateStatus::Failed,
        _ => GateStatus::Pending,
    }
}

#[async_trait]
impl QualityScanner for SonarScanner {
    async fn submit(&self, source: &Path, token: &str) -> Result<ReportHandle> {
        let args = vec![
            format!("-Dsonar.projectKey={}", self.project_key),
            format!("-Dsonar.host.url={}", self.base_url),
            format!("-Dsonar.projectBaseDir={}", source.display()),
        ];
        let out = checked(&self.binary, &args, &[("SONAR_TOKEN", token)], Some(source)).await?;
        let task_id = task_id(&out.stdout);
        info!(project = %self.project_key, task = ?task_id, "analysis submitted");
        Ok(ReportHandle {
            project_key: self.project_key.clone(),
            task_id,
        })
    }

    async fn gate_status(&self, handle: &ReportHandle, token: &str) -> Result<GateStatus> {
        if let Some(id) = &handle.task_id {
            let task: TaskResponse = self
                .get_json("/api/ce/task", &[("id", id.as_str())], token)
                .await?;
            match task.task.status.as_str() {
                "SUCCESS" => {}
                "PENDING" | "IN_PROGRESS" => return Ok(GateStatus::Pending),
                other => {
                    return Err(DeployflowError::tool(
                        "scanner analysis",
                        format!("task {id} ended {other}"),
                    ));
                }
            }
        }

        let status: ProjectStatusResponse = self
            .get_json(
                "/api/qualitygates/project_status",
                &[("projectKey", handle.project_key.as_str())],
                token,
            )
            .await?;
        Ok(gate_from(&status.project_status.status))
    }
}
