//! Workflow types - the AI-generated workflow and the backend's entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured workflow produced by the AI conversion endpoint.
///
/// Only `title` is required; a payload without one is rejected as a failed
/// generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedWorkflow {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<GeneratedStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedStep {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Result of the atomic save endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedWorkflow {
    pub workflow_id: String,
    #[serde(default)]
    pub steps_created: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Option<Vec<WorkflowStep>>,
    #[serde(default)]
    pub comments_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub workflow_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "order")]
    pub step_order: i32,
    pub status: StepStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub context_url: Option<String>,
    #[serde(default)]
    pub context_text: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Workflow,
    Step,
    Comment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// created, updated, completed or deleted
    pub action: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// The authenticated user as reported by `/users/me`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "user_id")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewWorkflow {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewStep {
    pub workflow_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StepUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_workflow_requires_title_only() {
        let wf: GeneratedWorkflow =
            serde_json::from_str(r#"{"title": "Onboard", "steps": [{"title": "Sign"}]}"#).unwrap();
        assert_eq!(wf.description, "");
        assert_eq!(wf.steps[0].role, None);

        assert!(serde_json::from_str::<GeneratedWorkflow>(r#"{"steps": []}"#).is_err());
    }

    #[test]
    fn step_accepts_backend_order_field() {
        let step: WorkflowStep = serde_json::from_str(
            r#"{"id":"s1","workflow_id":"w1","title":"Do","order":2,"status":"in_progress"}"#,
        )
        .unwrap();
        assert_eq!(step.step_order, 2);
        assert_eq!(step.status, StepStatus::InProgress);
    }

    #[test]
    fn user_profile_accepts_user_id() {
        let user: UserProfile =
            serde_json::from_str(r#"{"success":true,"user_id":"u1","email":"a@b.c"}"#).unwrap();
        assert_eq!(user.id, "u1");
    }
}
