//! Message router between the UI surfaces, the page extractor and the backend.
//!
//! Requests are `{action, ...payload}` objects; every reply is
//! `{success, ...result}` or `{success: false, error}`. Page capabilities are
//! registered once at startup instead of being probed per message.

use crate::client::WorkflowClient;
use crate::content::{
    DocumentContent, EmailContent, ExtractionResult, FormDescriptor, HasContent, PageMetadata,
    TableDescriptor,
};
use crate::extractor::Page;
use crate::normalize::{to_text, TextOptions, MIN_CONTENT_CHARS};
use crate::storage::{ExtensionSettings, Store};
use crate::workflow::{GeneratedWorkflow, UserProfile, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

const UNKNOWN_ACTION: &str = "Unknown action";
const PAGE_NOT_REGISTERED: &str = "Content extractor not registered";
const SELECTION_NOT_REGISTERED: &str = "Selection mode not registered";
const GENERATION_IN_FLIGHT: &str = "A workflow is already being generated";
pub const NOT_ENOUGH_CONTENT: &str = "Not enough content found on this page";

/// Inbound messages, tagged by `action`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    Ping,
    EnableSelectionMode,
    DisableSelectionMode,
    GetSelection,
    ExtractContent {
        #[serde(default)]
        options: TextOptions,
    },
    ExtractDocument,
    ExtractForms,
    ExtractTables,
    ExtractEmail,
    GetMetadata,
    GenerateWorkflow {
        content: String,
    },
    GenerateFromSelection {
        content: String,
    },
    SaveWorkflow {
        workflow: GeneratedWorkflow,
    },
    VerifyAuth,
    GetWorkflows,
    SelectionModeCancelled,
    #[serde(rename_all = "camelCase")]
    SetConfig {
        api_base_url: Option<String>,
    },
}

impl Request {
    /// Every action name the router understands
    pub const ACTIONS: &'static [&'static str] = &[
        "ping",
        "enableSelectionMode",
        "disableSelectionMode",
        "getSelection",
        "extractContent",
        "extractDocument",
        "extractForms",
        "extractTables",
        "extractEmail",
        "getMetadata",
        "generateWorkflow",
        "generateFromSelection",
        "saveWorkflow",
        "verifyAuth",
        "getWorkflows",
        "selectionModeCancelled",
        "setConfig",
    ];
}

/// Reply payloads, flattened next to `success`
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Status {
        status: &'static str,
    },
    Selection {
        selection: String,
    },
    #[serde(rename_all = "camelCase")]
    Content {
        extracted: Box<ExtractionResult>,
        text_content: String,
        has_content: HasContent,
    },
    Document {
        document: DocumentContent,
    },
    Forms {
        forms: Vec<FormDescriptor>,
    },
    Tables {
        tables: Vec<TableDescriptor>,
    },
    Email {
        email: EmailContent,
    },
    Metadata {
        metadata: PageMetadata,
    },
    Workflow {
        workflow: GeneratedWorkflow,
    },
    Saved {
        workflow_id: String,
        steps_created: usize,
    },
    User {
        user: UserProfile,
    },
    Workflows {
        workflows: Vec<Workflow>,
    },
    Empty {},
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Response {
    pub fn ok(payload: Payload) -> Self {
        Self {
            success: true,
            error: None,
            payload,
        }
    }

    pub fn ack() -> Self {
        Self::ok(Payload::Empty {})
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            payload: Payload::Empty {},
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self)
            .unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }))
    }
}

/// Turns selection mode on and off in whatever surface hosts it
pub trait SelectionControl: Send + Sync {
    fn enable(&self) -> Result<(), String>;
    fn disable(&self) -> Result<(), String>;
}

/// Clears the in-flight flag when generation ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Router {
    client: WorkflowClient,
    page: Option<Mutex<Page>>,
    selection: Option<Box<dyn SelectionControl>>,
    generating: AtomicBool,
}

impl Router {
    pub fn new(client: WorkflowClient) -> Self {
        Self {
            client,
            page: None,
            selection: None,
            generating: AtomicBool::new(false),
        }
    }

    /// Register the page that extraction actions read from
    pub fn with_page(mut self, page: Page) -> Self {
        self.page = Some(Mutex::new(page));
        self
    }

    /// Register the surface that hosts selection mode
    pub fn with_selection_control(mut self, control: impl SelectionControl + 'static) -> Self {
        self.selection = Some(Box::new(control));
        self
    }

    pub fn client(&self) -> &WorkflowClient {
        &self.client
    }

    pub fn store(&self) -> &Store {
        self.client.store()
    }

    /// Update the registered page's selection
    pub fn set_selection(&self, selection: &str) -> Result<(), String> {
        self.page()?.set_selection(selection);
        Ok(())
    }

    /// Route a raw JSON message. Unknown actions get an explicit error reply.
    pub async fn dispatch_value(&self, message: Value) -> Value {
        let response = match serde_json::from_value::<Request>(message.clone()) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => match message.get("action").and_then(Value::as_str) {
                Some(action) if Request::ACTIONS.contains(&action) => {
                    Response::fail(format!("Invalid {} request: {}", action, e))
                }
                _ => {
                    tracing::warn!(message = %message, "unknown action");
                    Response::fail(UNKNOWN_ACTION)
                }
            },
        };
        response.to_value()
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        tracing::info!(action = ?action_name(&request), "received message");

        match request {
            Request::Ping => Response::ok(Payload::Status { status: "ready" }),
            Request::EnableSelectionMode => self.toggle_selection(true),
            Request::DisableSelectionMode => self.toggle_selection(false),
            Request::GetSelection => self.read_page(|page| Payload::Selection {
                selection: page.selection(),
            }),
            Request::ExtractContent { options } => self.read_page(|page| {
                let extracted = page.extract_all();
                let text_content = to_text(&extracted, &options);
                Payload::Content {
                    has_content: extracted.has_content,
                    extracted: Box::new(extracted),
                    text_content,
                }
            }),
            Request::ExtractDocument => self.read_page(|page| Payload::Document {
                document: page.extract_document(),
            }),
            Request::ExtractForms => self.read_page(|page| Payload::Forms {
                forms: page.extract_forms(),
            }),
            Request::ExtractTables => self.read_page(|page| Payload::Tables {
                tables: page.extract_tables(),
            }),
            Request::ExtractEmail => self.read_page(|page| Payload::Email {
                email: page.extract_email(),
            }),
            Request::GetMetadata => self.read_page(|page| Payload::Metadata {
                metadata: page.metadata(),
            }),
            Request::GenerateWorkflow { content } | Request::GenerateFromSelection { content } => {
                self.generate(&content).await
            }
            Request::SaveWorkflow { workflow } => self.save(&workflow).await,
            Request::VerifyAuth => match self.client.current_user().await {
                Ok(user) => Response::ok(Payload::User { user }),
                Err(e) => Response::fail(e.to_string()),
            },
            Request::GetWorkflows => match self.client.list_workflows(None).await {
                Ok(workflows) => Response::ok(Payload::Workflows { workflows }),
                Err(e) => Response::fail(e.to_string()),
            },
            Request::SelectionModeCancelled => Response::ack(),
            // Only a non-empty URL replaces the stored one
            Request::SetConfig { api_base_url } => match api_base_url.filter(|u| !u.is_empty()) {
                Some(url) => {
                    let settings = ExtensionSettings {
                        api_base_url: Some(url),
                    };
                    match self.store().set_settings(&settings) {
                        Ok(()) => Response::ack(),
                        Err(e) => Response::fail(e.to_string()),
                    }
                }
                None => Response::ack(),
            },
        }
    }

    /// Extract the registered page and convert its normalized text.
    ///
    /// Pages with less than [`MIN_CONTENT_CHARS`] of text are refused before
    /// anything reaches the backend.
    pub async fn generate_from_page(&self, options: &TextOptions) -> Response {
        let (text, has_content) = match self.page() {
            Ok(page) => {
                let extracted = page.extract_all();
                (to_text(&extracted, options), extracted.has_content)
            }
            Err(e) => return Response::fail(e),
        };

        if text.chars().count() < MIN_CONTENT_CHARS {
            tracing::warn!(chars = text.chars().count(), "page has too little content");
            return Response::fail(NOT_ENOUGH_CONTENT);
        }
        tracing::info!(sections = ?has_content.labels(), "extracted page");
        self.generate(&text).await
    }

    fn page(&self) -> Result<MutexGuard<'_, Page>, String> {
        self.page
            .as_ref()
            .ok_or_else(|| PAGE_NOT_REGISTERED.to_string())?
            .lock()
            .map_err(|_| "page state poisoned".to_string())
    }

    fn read_page(&self, f: impl FnOnce(&Page) -> Payload) -> Response {
        match self.page() {
            Ok(page) => Response::ok(f(&page)),
            Err(e) => Response::fail(e),
        }
    }

    fn toggle_selection(&self, enable: bool) -> Response {
        let Some(control) = &self.selection else {
            return Response::fail(SELECTION_NOT_REGISTERED);
        };
        let result = if enable {
            control.enable()
        } else {
            control.disable()
        };
        match result {
            Ok(()) => Response::ack(),
            Err(e) => Response::fail(e),
        }
    }

    fn begin_generation(&self) -> Option<InFlight<'_>> {
        self.generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(&self.generating))
    }

    /// Convert raw text and keep the result as the pending workflow
    async fn generate(&self, content: &str) -> Response {
        if content.trim().is_empty() {
            return Response::fail("No content to generate a workflow from");
        }
        let Some(_guard) = self.begin_generation() else {
            tracing::warn!("rejected duplicate generation request");
            return Response::fail(GENERATION_IN_FLIGHT);
        };

        tracing::info!(chars = content.len(), "generating workflow");
        if let Err(e) = self.store().set_pending_content(content) {
            return Response::fail(e.to_string());
        }

        match self.client.convert(content).await {
            Ok(workflow) => match self.store().set_pending_workflow(&workflow) {
                Ok(()) => Response::ok(Payload::Workflow { workflow }),
                Err(e) => Response::fail(e.to_string()),
            },
            Err(e) => Response::fail(e.to_string()),
        }
    }

    async fn save(&self, workflow: &GeneratedWorkflow) -> Response {
        tracing::info!(title = %workflow.title, "saving workflow");
        match self.client.save_workflow(workflow).await {
            Ok(saved) => {
                if let Err(e) = self.store().clear_pending_workflow() {
                    tracing::warn!(error = %e, "failed to clear pending workflow");
                }
                Response::ok(Payload::Saved {
                    workflow_id: saved.workflow_id,
                    steps_created: saved.steps_created,
                })
            }
            Err(e) => Response::fail(e.to_string()),
        }
    }
}

fn action_name(request: &Request) -> Option<String> {
    serde_json::to_value(request)
        .ok()?
        .get("action")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{client_for, FakeBackend};
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;

    struct RecordingControl(Arc<Mutex<Vec<bool>>>);

    impl SelectionControl for RecordingControl {
        fn enable(&self) -> Result<(), String> {
            self.0.lock().unwrap().push(true);
            Ok(())
        }
        fn disable(&self) -> Result<(), String> {
            self.0.lock().unwrap().push(false);
            Ok(())
        }
    }

    fn page() -> Page {
        Page::parse(
            r#"<html><head><title>Orders</title></head><body>
                 <h1>Orders</h1>
                 <table><tr><th>Name</th><th>Age</th></tr><tr><td>Alice</td><td>30</td></tr></table>
               </body></html>"#,
            "https://shop.example.com/orders",
        )
    }

    async fn router(backend: &FakeBackend) -> Router {
        Router::new(client_for(backend, Some("tok"))).with_page(page())
    }

    #[tokio::test]
    async fn unknown_action_is_reported() {
        let backend = FakeBackend::start().await;
        let router = router(&backend).await;

        let reply = router.dispatch_value(json!({"action": "launchRockets"})).await;
        assert_eq!(reply, json!({"success": false, "error": "Unknown action"}));

        let reply = router.dispatch_value(json!({"no": "action"})).await;
        assert_eq!(reply["error"], "Unknown action");
    }

    #[tokio::test]
    async fn malformed_known_action_is_not_unknown() {
        let backend = FakeBackend::start().await;
        let router = router(&backend).await;

        let reply = router.dispatch_value(json!({"action": "generateWorkflow"})).await;
        assert_eq!(reply["success"], false);
        assert!(reply["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid generateWorkflow request"));
    }

    #[tokio::test]
    async fn ping_and_extract_content() {
        let backend = FakeBackend::start().await;
        let router = router(&backend).await;

        let reply = router.dispatch_value(json!({"action": "ping"})).await;
        assert_eq!(reply, json!({"success": true, "status": "ready"}));

        let reply = router
            .dispatch_value(json!({"action": "extractContent", "options": {"includeDocument": false}}))
            .await;
        assert_eq!(reply["success"], true);
        assert_eq!(reply["hasContent"]["tables"], true);
        let text = reply["textContent"].as_str().unwrap();
        assert!(text.contains("Headers: Name | Age"));
        assert!(text.contains("Alice | 30"));
        assert!(!text.contains("=== DOCUMENT STRUCTURE ==="));
        assert_eq!(reply["extracted"]["metadata"]["title"], "Orders");
    }

    #[tokio::test]
    async fn extraction_without_page_fails_fast() {
        let backend = FakeBackend::start().await;
        let router = Router::new(client_for(&backend, Some("tok")));

        let reply = router.dispatch(Request::ExtractForms).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some(PAGE_NOT_REGISTERED));

        let reply = router.dispatch(Request::EnableSelectionMode).await;
        assert_eq!(reply.error.as_deref(), Some(SELECTION_NOT_REGISTERED));
    }

    #[tokio::test]
    async fn selection_control_and_selection_passthrough() {
        let backend = FakeBackend::start().await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let router = router(&backend)
            .await
            .with_selection_control(RecordingControl(calls.clone()));

        assert!(router.dispatch(Request::EnableSelectionMode).await.success);
        assert!(router.dispatch(Request::DisableSelectionMode).await.success);
        assert_eq!(*calls.lock().unwrap(), vec![true, false]);

        router.set_selection("  chosen words ").unwrap();
        let reply = router.dispatch(Request::GetSelection).await.to_value();
        assert_eq!(reply["selection"], "chosen words");
    }

    #[tokio::test]
    async fn generation_persists_pending_workflow_and_content() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "/ai/convert",
            StatusCode::OK,
            json!({"success": true, "workflow": {"title": "Refund", "description": "", "steps": []}}),
        );
        let router = router(&backend).await;

        let reply = router
            .dispatch(Request::GenerateFromSelection {
                content: "refund steps".into(),
            })
            .await
            .to_value();
        assert_eq!(reply["success"], true);
        assert_eq!(reply["workflow"]["title"], "Refund");

        let store = router.store();
        assert_eq!(store.pending_workflow().unwrap().unwrap().title, "Refund");
        assert_eq!(store.pending_content().unwrap().as_deref(), Some("refund steps"));
    }

    #[tokio::test]
    async fn duplicate_generation_is_rejected() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "/ai/convert",
            StatusCode::OK,
            json!({"success": true, "workflow": {"title": "Slow"}}),
        );
        backend.delay(Duration::from_millis(200));
        let router = router(&backend).await;

        let first = router.dispatch(Request::GenerateWorkflow {
            content: "one".into(),
        });
        let second = router.dispatch(Request::GenerateWorkflow {
            content: "two".into(),
        });
        let (first, second) = tokio::join!(first, second);

        assert!(first.success);
        assert_eq!(second.error.as_deref(), Some(GENERATION_IN_FLIGHT));
        assert_eq!(backend.hits(), 1);

        // The flag is released once the first call completes
        let third = router
            .dispatch(Request::GenerateWorkflow {
                content: "three".into(),
            })
            .await;
        assert!(third.success);
    }

    #[tokio::test]
    async fn generation_failure_is_surfaced() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "/ai/convert",
            StatusCode::OK,
            json!({"success": false, "error": "model unavailable"}),
        );
        let router = router(&backend).await;

        let reply = router
            .dispatch(Request::GenerateWorkflow {
                content: "text".into(),
            })
            .await;
        assert_eq!(
            reply.error.as_deref(),
            Some("AI generation failed: model unavailable")
        );
        assert!(router.store().pending_workflow().unwrap().is_none());
    }

    #[tokio::test]
    async fn save_clears_pending_workflow() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "/ai/save-workflow",
            StatusCode::OK,
            json!({"success": true, "workflow_id": "w1", "steps_created": 1}),
        );
        let router = router(&backend).await;
        let workflow = GeneratedWorkflow {
            title: "Pending".into(),
            description: String::new(),
            steps: vec![],
        };
        router.store().set_pending_workflow(&workflow).unwrap();

        let reply = router
            .dispatch_value(json!({"action": "saveWorkflow", "workflow": workflow}))
            .await;
        assert_eq!(
            reply,
            json!({"success": true, "workflow_id": "w1", "steps_created": 1})
        );
        assert!(router.store().pending_workflow().unwrap().is_none());
    }

    #[tokio::test]
    async fn verify_auth_reports_expired_session() {
        let backend = FakeBackend::start().await;
        backend.respond("/users/me", StatusCode::UNAUTHORIZED, json!({}));
        let router = router(&backend).await;

        let reply = router.dispatch(Request::VerifyAuth).await;
        assert_eq!(
            reply.error.as_deref(),
            Some("Session expired. Please login again.")
        );
        assert!(!router.store().is_authenticated().unwrap());
    }

    #[tokio::test]
    async fn set_config_and_cancellation_ack() {
        let backend = FakeBackend::start().await;
        let router = router(&backend).await;

        let reply = router
            .dispatch_value(json!({"action": "setConfig", "apiBaseUrl": "http://10.0.0.2/api/v1"}))
            .await;
        assert_eq!(reply, json!({"success": true}));
        assert_eq!(
            router.store().settings().unwrap().api_base_url.as_deref(),
            Some("http://10.0.0.2/api/v1")
        );

        let reply = router
            .dispatch_value(json!({"action": "selectionModeCancelled"}))
            .await;
        assert_eq!(reply, json!({"success": true}));
    }

    #[tokio::test]
    async fn set_config_without_url_keeps_override() {
        let backend = FakeBackend::start().await;
        let router = router(&backend).await;

        router
            .dispatch_value(json!({"action": "setConfig", "apiBaseUrl": "http://10.0.0.2/api/v1"}))
            .await;
        let reply = router.dispatch_value(json!({"action": "setConfig"})).await;
        assert_eq!(reply, json!({"success": true}));
        let reply = router
            .dispatch_value(json!({"action": "setConfig", "apiBaseUrl": ""}))
            .await;
        assert_eq!(reply, json!({"success": true}));

        assert_eq!(
            router.store().settings().unwrap().api_base_url.as_deref(),
            Some("http://10.0.0.2/api/v1")
        );
    }

    #[tokio::test]
    async fn extraction_methods_reach_the_registered_page() {
        let backend = FakeBackend::start().await;
        let router = router(&backend).await;

        let reply = router.dispatch(Request::ExtractTables).await.to_value();
        assert_eq!(reply["tables"][0]["headers"], json!(["Name", "Age"]));
        let reply = router.dispatch(Request::GetMetadata).await.to_value();
        assert_eq!(reply["metadata"]["url"], "https://shop.example.com/orders");
    }

    #[tokio::test]
    async fn thin_page_is_refused_without_backend_call() {
        let backend = FakeBackend::start().await;
        let page = Page::parse("<html><body></body></html>", "https://a.io/");
        let router = Router::new(client_for(&backend, Some("tok"))).with_page(page);

        let reply = router.generate_from_page(&TextOptions::default()).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some(NOT_ENOUGH_CONTENT));
        assert_eq!(backend.hits(), 0);
        assert_eq!(router.store().pending_content().unwrap(), None);
    }

    #[tokio::test]
    async fn substantial_page_goes_to_conversion() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "/ai/convert",
            StatusCode::OK,
            json!({"success": true, "workflow": {"title": "Orders", "description": "", "steps": []}}),
        );
        let router = router(&backend).await;

        let reply = router.generate_from_page(&TextOptions::default()).await;
        assert!(reply.success, "{:?}", reply.error);
        assert_eq!(backend.hits(), 1);

        let request = backend.last_request().unwrap();
        assert_eq!(request.path, "/ai/convert");
        let sent = request.body["raw_text"].as_str().unwrap().to_string();
        assert!(sent.chars().count() >= MIN_CONTENT_CHARS);
        assert!(sent.contains("Alice"));
        assert_eq!(router.store().pending_content().unwrap(), Some(sent));
    }
}
