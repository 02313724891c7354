//! HTTP gateway for the planning API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::deadline_task::DeadlineTask;
use crate::models::planning_task::{CreatePlanningTask, PlanningTask, UpdatePlanningTask};
use crate::models::project::Project;
use crate::models::quarter::DateRange;
use crate::models::user::User;

#[derive(Debug, Clone, Error)]
pub enum PlanningApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl PlanningApiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Client-side deadline applied to a request; a hung call surfaces as
/// [`PlanningApiError::Timeout`] instead of blocking its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Single-record and settings lookups.
    Quick,
    /// List fetches and planning-task writes.
    Standard,
    /// Bulk operations.
    Long,
}

/// Per-class deadlines, injected so tests can pin their own values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub quick: Duration,
    pub standard: Duration,
    pub long: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            quick: Duration::from_secs(10),
            standard: Duration::from_secs(30),
            long: Duration::from_secs(120),
        }
    }
}

impl CallTimeouts {
    fn get(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Quick => self.quick,
            CallClass::Standard => self.standard,
            CallClass::Long => self.long,
        }
    }
}

/// The remote operations the sync layer consumes. One call here is exactly
/// one network request; retry policy belongs to the caller.
#[async_trait]
pub trait PlanningApi: Send + Sync {
    async fn fetch_users(&self) -> Result<Vec<User>, PlanningApiError>;

    async fn fetch_projects(&self) -> Result<Vec<Project>, PlanningApiError>;

    async fn fetch_planning_tasks(
        &self,
        range: &DateRange,
    ) -> Result<Vec<PlanningTask>, PlanningApiError>;

    async fn fetch_deadline_tasks(
        &self,
        range: &DateRange,
    ) -> Result<Vec<DeadlineTask>, PlanningApiError>;

    /// `Ok(None)` when the key has never been set.
    async fn fetch_user_setting(&self, key: &str) -> Result<Option<String>, PlanningApiError>;

    /// `Ok(None)` when the key has never been set.
    async fn fetch_app_setting(&self, key: &str) -> Result<Option<String>, PlanningApiError>;

    async fn save_user_setting(&self, key: &str, value: &str) -> Result<(), PlanningApiError>;

    async fn create_planning_task(
        &self,
        input: &CreatePlanningTask,
    ) -> Result<PlanningTask, PlanningApiError>;

    async fn update_planning_task(
        &self,
        id: Uuid,
        patch: &UpdatePlanningTask,
    ) -> Result<PlanningTask, PlanningApiError>;

    async fn delete_planning_task(&self, id: Uuid) -> Result<(), PlanningApiError>;
}

/// Wire shape of the settings endpoints.
#[derive(Debug, Serialize, Deserialize)]
struct SettingBody {
    value: String,
}

/// Reqwest-backed implementation of [`PlanningApi`].
#[derive(Debug, Clone)]
pub struct PlanningApiClient {
    http: Client,
    base_url: String,
    timeouts: CallTimeouts,
    bearer_token: Option<String>,
}

impl PlanningApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PlanningApiError> {
        Self::with_timeouts(base_url, CallTimeouts::default())
    }

    pub fn with_timeouts(
        base_url: impl Into<String>,
        timeouts: CallTimeouts,
    ) -> Result<Self, PlanningApiError> {
        let http = Client::builder()
            .user_agent(concat!("blockplan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlanningApiError::Transport(e.to_string()))?;

        let base_url = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeouts,
            bearer_token: None,
        })
    }

    /// Attach `token` as a bearer `Authorization` header on every request.
    /// Session lifecycle (obtaining and renewing the token) lives with the
    /// caller.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        class: CallClass,
    ) -> Result<T, PlanningApiError> {
        let res = self
            .authorize(req)
            .timeout(self.timeouts.get(class))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<T>()
                .await
                .map_err(|e| PlanningApiError::Decode(e.to_string())),
            s => {
                let body = res.text().await.unwrap_or_default();
                Err(classify_status(s, &body))
            }
        }
    }

    async fn send_no_content(
        &self,
        req: RequestBuilder,
        class: CallClass,
    ) -> Result<(), PlanningApiError> {
        let res = self
            .authorize(req)
            .timeout(self.timeouts.get(class))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => Ok(()),
            s => {
                let body = res.text().await.unwrap_or_default();
                Err(classify_status(s, &body))
            }
        }
    }

    async fn fetch_setting(&self, path: String) -> Result<Option<String>, PlanningApiError> {
        match self
            .send_json::<SettingBody>(self.http.get(self.url(&path)), CallClass::Quick)
            .await
        {
            Ok(body) => Ok(Some(body.value)),
            // A key that has never been written is an empty value, not a failure.
            Err(PlanningApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PlanningApi for PlanningApiClient {
    async fn fetch_users(&self) -> Result<Vec<User>, PlanningApiError> {
        self.send_json(self.http.get(self.url("/users")), CallClass::Standard)
            .await
    }

    async fn fetch_projects(&self) -> Result<Vec<Project>, PlanningApiError> {
        self.send_json(self.http.get(self.url("/projects")), CallClass::Standard)
            .await
    }

    async fn fetch_planning_tasks(
        &self,
        range: &DateRange,
    ) -> Result<Vec<PlanningTask>, PlanningApiError> {
        let req = self.http.get(self.url("/planning-tasks")).query(&[
            ("startDate", range.start_param()),
            ("endDate", range.end_param()),
        ]);
        self.send_json(req, CallClass::Standard).await
    }

    async fn fetch_deadline_tasks(
        &self,
        range: &DateRange,
    ) -> Result<Vec<DeadlineTask>, PlanningApiError> {
        let req = self.http.get(self.url("/deadline-tasks")).query(&[
            ("startDate", range.start_param()),
            ("endDate", range.end_param()),
        ]);
        self.send_json(req, CallClass::Standard).await
    }

    async fn fetch_user_setting(&self, key: &str) -> Result<Option<String>, PlanningApiError> {
        self.fetch_setting(format!("/settings/user/{key}")).await
    }

    async fn fetch_app_setting(&self, key: &str) -> Result<Option<String>, PlanningApiError> {
        self.fetch_setting(format!("/settings/app/{key}")).await
    }

    async fn save_user_setting(&self, key: &str, value: &str) -> Result<(), PlanningApiError> {
        let req = self
            .http
            .put(self.url(&format!("/settings/user/{key}")))
            .json(&SettingBody {
                value: value.to_string(),
            });
        self.send_no_content(req, CallClass::Quick).await
    }

    async fn create_planning_task(
        &self,
        input: &CreatePlanningTask,
    ) -> Result<PlanningTask, PlanningApiError> {
        let req = self.http.post(self.url("/planning-tasks")).json(input);
        self.send_json(req, CallClass::Standard).await
    }

    async fn update_planning_task(
        &self,
        id: Uuid,
        patch: &UpdatePlanningTask,
    ) -> Result<PlanningTask, PlanningApiError> {
        let req = self
            .http
            .put(self.url(&format!("/planning-tasks/{id}")))
            .json(patch);
        self.send_json(req, CallClass::Standard).await
    }

    async fn delete_planning_task(&self, id: Uuid) -> Result<(), PlanningApiError> {
        let req = self.http.delete(self.url(&format!("/planning-tasks/{id}")));
        self.send_no_content(req, CallClass::Standard).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> PlanningApiError {
    if e.is_timeout() {
        PlanningApiError::Timeout
    } else {
        PlanningApiError::Transport(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> PlanningApiError {
    match status {
        StatusCode::UNAUTHORIZED => PlanningApiError::Unauthorized,
        StatusCode::NOT_FOUND => PlanningApiError::NotFound,
        s => PlanningApiError::Http {
            status: s.as_u16(),
            message: error_message(body),
        },
    }
}

/// Pull the server-provided message out of an error body, falling back to
/// the raw text.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if !parsed.message.is_empty() {
            return parsed.message;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "request failed".to_string()
    } else {
        trimmed.to_string()
    }
}
