//! Placement service client
//!
//! One scheduling request places `count` objects at once and answers with
//! exactly one result per object, in request order.

use crate::error::{ControlPlaneError, Result};
use async_trait::async_trait;
use nimbus_cloud::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Placement constraints shared by every object of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub kind: ResourceKind,
    pub owner_project_id: String,
    pub manager_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Placement chosen for one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Host (or other placement target) local id
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub storage_id: Option<String>,
}

/// Outcome for one object: `{"candidate": {...}}` or `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleResult {
    Candidate(Candidate),
    Error(String),
}

#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn do_schedule(&self, input: &ScheduleInput, count: usize) -> Result<Vec<ScheduleResult>>;
}

#[derive(Serialize)]
struct ScheduleRequest<'a> {
    scheduler: &'a ScheduleInput,
    count: usize,
}

#[derive(Deserialize)]
struct ScheduleResponse {
    #[serde(default)]
    candidates: Vec<ScheduleResult>,
}

/// Scheduler reached over HTTP (`POST {endpoint}/scheduler`)
pub struct HttpSchedulerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSchedulerClient {
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ControlPlaneError::InvalidParameter(format!("scheduler client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    async fn do_schedule(&self, input: &ScheduleInput, count: usize) -> Result<Vec<ScheduleResult>> {
        let url = format!("{}/scheduler", self.endpoint);
        tracing::debug!("Requesting {} placement(s) for {} from {}", count, input.kind, url);

        let response = self
            .client
            .post(&url)
            .json(&ScheduleRequest {
                scheduler: input,
                count,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ControlPlaneError::Schedule(e.to_string()))?;

        let body: ScheduleResponse = response
            .json()
            .await
            .map_err(|e| ControlPlaneError::Schedule(format!("invalid scheduler response: {}", e)))?;
        Ok(body.candidates)
    }
}

/// Stand-in used when no placement service is configured
#[derive(Debug, Default)]
pub struct UnavailableScheduler;

#[async_trait]
impl SchedulerClient for UnavailableScheduler {
    async fn do_schedule(&self, _input: &ScheduleInput, _count: usize) -> Result<Vec<ScheduleResult>> {
        Err(ControlPlaneError::Schedule(
            "no scheduler endpoint configured".to_string(),
        ))
    }
}
