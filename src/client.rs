//! REST client for the workflow backend.
//!
//! Wraps the AI conversion and save endpoints, the workflow/step/comment/activity
//! resources and the Supabase password login. Every authenticated call sends the
//! stored bearer token; a 401 purges local credentials.

use crate::config::Config;
use crate::storage::{StorageError, Store};
use crate::workflow::{
    ActivityLog, Comment, GeneratedWorkflow, NewComment, NewStep, NewWorkflow, SavedWorkflow,
    StepStatus, StepUpdate, UserProfile, Workflow, WorkflowStatus, WorkflowStep, WorkflowUpdate,
};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors surfaced to the user as status text
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not authenticated. Please login first.")]
    NotAuthenticated,
    #[error("Session expired. Please login again.")]
    SessionExpired,
    #[error("Cannot connect to server. Make sure the backend is running at {0}")]
    Unreachable(String),
    #[error("server error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("AI generation failed: {0}")]
    Generation(String),
    #[error("unexpected response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Transport(reqwest::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Tone presets understood by the rewrite endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RewriteTone {
    #[default]
    ClearEnterprise,
    Technical,
    Simple,
}

#[derive(Debug, Clone)]
struct SupabaseAuth {
    url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: SupabaseUser,
}

#[derive(Deserialize)]
struct SupabaseUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

/// Client for the workflow REST API.
#[derive(Clone)]
pub struct WorkflowClient {
    http: Client,
    store: Store,
    base_url: String,
    supabase: Option<SupabaseAuth>,
}

impl WorkflowClient {
    /// Build a client from configuration. The token is read from `store` on every call.
    pub fn new(config: &Config, store: Store) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .map_err(ClientError::Transport)?;

        let supabase = config.supabase().ok().map(|(url, anon_key)| SupabaseAuth {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        });

        Ok(Self {
            http,
            store,
            base_url: config.api.base_url.clone(),
            supabase,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The configured base URL, unless overridden through `setConfig`
    pub fn base_url(&self) -> Result<String, ClientError> {
        let settings = self.store.settings()?;
        Ok(settings
            .api_base_url
            .unwrap_or_else(|| self.base_url.clone())
            .trim_end_matches('/')
            .to_string())
    }

    fn endpoint(&self, path: &str, query: &[(&str, Option<&str>)]) -> Result<Url, ClientError> {
        let raw = format!("{}{}", self.base_url()?, path);
        let mut url = Url::parse(&raw).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", raw, e)))?;
        let present: Vec<(&str, &str)> = query
            .iter()
            .filter_map(|(k, v)| v.map(|v| (*k, v)))
            .collect();
        if !present.is_empty() {
            url.query_pairs_mut().extend_pairs(present);
        }
        Ok(url)
    }

    /// Make an authenticated API request and decode the JSON body
    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Value, ClientError> {
        let token = self.store.jwt()?.ok_or(ClientError::NotAuthenticated)?;

        tracing::debug!(%method, %url, "api request");
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("backend rejected token, clearing credentials");
            self.store.clear_credentials()?;
            return Err(ClientError::SessionExpired);
        }

        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: error_detail(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn transport_error(&self, error: reqwest::Error) -> ClientError {
        if error.is_connect() || error.is_timeout() {
            ClientError::Unreachable(self.base_url().unwrap_or_else(|_| self.base_url.clone()))
        } else {
            ClientError::Transport(error)
        }
    }

    async fn get(&self, path: &str, query: &[(&str, Option<&str>)]) -> Result<Value, ClientError> {
        let url = self.endpoint(path, query)?;
        self.request::<Value>(Method::GET, url, None).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Value, ClientError> {
        let url = self.endpoint(path, &[])?;
        self.request(method, url, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let url = self.endpoint(path, &[])?;
        let value = self.request::<Value>(Method::DELETE, url, None).await?;
        check_success(&value)
    }

    /// Convert raw text into a structured workflow
    pub async fn convert(&self, raw_text: &str) -> Result<GeneratedWorkflow, ClientError> {
        let value = self
            .send_json(Method::POST, "/ai/convert", &json!({ "raw_text": raw_text }))
            .await?;

        if value.get("success").and_then(Value::as_bool) != Some(true) {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("AI generation failed");
            return Err(ClientError::Generation(error.to_string()));
        }

        let workflow = value
            .get("workflow")
            .filter(|w| !w.is_null())
            .ok_or_else(|| ClientError::Generation("no workflow returned".to_string()))?;
        if workflow.get("title").and_then(Value::as_str).is_none() {
            return Err(ClientError::Generation(
                "generated workflow has no title".to_string(),
            ));
        }

        serde_json::from_value(workflow.clone()).map_err(|e| ClientError::Generation(e.to_string()))
    }

    /// Persist a generated workflow and its steps in one call
    pub async fn save_workflow(
        &self,
        workflow: &GeneratedWorkflow,
    ) -> Result<SavedWorkflow, ClientError> {
        let value = self
            .send_json(Method::POST, "/ai/save-workflow", workflow)
            .await?;
        check_success(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Rewrite a single step's text in the given tone
    pub async fn rewrite_step(&self, text: &str, tone: RewriteTone) -> Result<String, ClientError> {
        let value = self
            .send_json(
                Method::POST,
                "/ai/rewrite",
                &json!({ "step_text": text, "tone": tone }),
            )
            .await?;
        check_success(&value)?;
        value
            .get("rewritten_text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Rejected("no rewritten text returned".to_string()))
    }

    /// Probe the current session
    pub async fn current_user(&self) -> Result<UserProfile, ClientError> {
        let value = self.get("/users/me", &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Password login against Supabase; stores the session on success
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let auth = self
            .supabase
            .as_ref()
            .ok_or_else(|| ClientError::Rejected("Supabase is not configured".to_string()))?;

        let url = format!("{}/auth/v1/token?grant_type=password", auth.url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &auth.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ClientError::Unreachable(auth.url.clone())
                } else {
                    ClientError::Transport(e)
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(ClientError::Transport)?;
        if !status.is_success() {
            return Err(ClientError::Rejected(error_detail(&text)));
        }

        let token: TokenResponse = serde_json::from_str(&text)?;
        let user = UserProfile {
            id: token.user.id,
            email: token.user.email,
            name: None,
            created_at: token.user.created_at,
        };
        self.store
            .set_session(&token.access_token, token.refresh_token.as_deref(), &user)?;
        tracing::info!(user = %user.id, "logged in");
        Ok(user)
    }

    // ── Workflows ───────────────────────────────────────────────────────────

    pub async fn list_workflows(&self, org_id: Option<&str>) -> Result<Vec<Workflow>, ClientError> {
        let value = self.get("/workflows/", &[("org_id", org_id)]).await?;
        unwrap_envelope(value, &["workflows"])
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow, ClientError> {
        let value = self.get(&format!("/workflows/{}", id), &[]).await?;
        unwrap_envelope(value, &["workflow", "data"])
    }

    pub async fn create_workflow(&self, workflow: &NewWorkflow) -> Result<Workflow, ClientError> {
        let value = self.send_json(Method::POST, "/workflows/", workflow).await?;
        unwrap_envelope(value, &["data", "workflow"])
    }

    pub async fn update_workflow(
        &self,
        id: &str,
        update: &WorkflowUpdate,
    ) -> Result<Workflow, ClientError> {
        let value = self
            .send_json(Method::PUT, &format!("/workflows/{}", id), update)
            .await?;
        unwrap_envelope(value, &["workflow", "data"])
    }

    pub async fn set_workflow_status(
        &self,
        id: &str,
        status: WorkflowStatus,
    ) -> Result<Workflow, ClientError> {
        let update = WorkflowUpdate {
            status: Some(status),
            ..Default::default()
        };
        let value = self
            .send_json(Method::PATCH, &format!("/workflows/{}", id), &update)
            .await?;
        unwrap_envelope(value, &["workflow", "data"])
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/workflows/{}", id)).await
    }

    // ── Steps ───────────────────────────────────────────────────────────────

    pub async fn list_steps(&self, workflow_id: &str) -> Result<Vec<WorkflowStep>, ClientError> {
        let value = self
            .get("/steps/", &[("workflow_id", Some(workflow_id))])
            .await?;
        unwrap_envelope(value, &["steps"])
    }

    pub async fn create_step(&self, step: &NewStep) -> Result<WorkflowStep, ClientError> {
        let value = self.send_json(Method::POST, "/steps/", step).await?;
        unwrap_envelope(value, &["step", "data"])
    }

    pub async fn update_step(
        &self,
        step_id: &str,
        update: &StepUpdate,
    ) -> Result<WorkflowStep, ClientError> {
        let value = self
            .send_json(Method::PUT, &format!("/steps/{}", step_id), update)
            .await?;
        unwrap_envelope(value, &["step", "data"])
    }

    pub async fn set_step_status(
        &self,
        step_id: &str,
        status: StepStatus,
    ) -> Result<WorkflowStep, ClientError> {
        let value = self
            .send_json(
                Method::PATCH,
                &format!("/steps/{}/status", step_id),
                &json!({ "status": status }),
            )
            .await?;
        unwrap_envelope(value, &["step", "data"])
    }

    pub async fn delete_step(&self, step_id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/steps/{}", step_id)).await
    }

    // ── Comments ────────────────────────────────────────────────────────────

    pub async fn list_comments(
        &self,
        workflow_id: Option<&str>,
        step_id: Option<&str>,
    ) -> Result<Vec<Comment>, ClientError> {
        let value = self
            .get(
                "/comments/",
                &[("workflow_id", workflow_id), ("step_id", step_id)],
            )
            .await?;
        unwrap_envelope(value, &["comments"])
    }

    pub async fn create_comment(&self, comment: &NewComment) -> Result<Comment, ClientError> {
        let value = self.send_json(Method::POST, "/comments/", comment).await?;
        unwrap_envelope(value, &["data", "comment"])
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/comments/{}", comment_id)).await
    }

    // ── Activity ────────────────────────────────────────────────────────────

    pub async fn list_activity(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<ActivityLog>, ClientError> {
        let value = self
            .get("/activity-logs/", &[("workflow_id", workflow_id)])
            .await?;
        unwrap_envelope(value, &["activities"])
    }
}

/// Take the payload from the first present envelope key, or the value itself
fn unwrap_envelope<T: DeserializeOwned>(value: Value, keys: &[&str]) -> Result<T, ClientError> {
    check_success(&value)?;
    let inner = match value {
        Value::Object(mut map) => keys
            .iter()
            .find_map(|key| map.remove(*key).filter(|v| !v.is_null()))
            .unwrap_or(Value::Object(map)),
        other => other,
    };
    Ok(serde_json::from_value(inner)?)
}

fn check_success(value: &Value) -> Result<(), ClientError> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(ClientError::Rejected(error.to_string()));
    }
    Ok(())
}

/// Pull a readable message out of an error body
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "error_description", "msg", "error", "message"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}
