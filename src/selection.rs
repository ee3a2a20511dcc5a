//! Selection capture state machine.
//!
//! `SelectionMode` owns the toolbar state and talks to two injected
//! collaborators: a [`SelectionHost`] that knows the current selection, and an
//! [`Outbox`] that carries requests to the router. Timers are deadlines checked
//! by [`SelectionMode::tick`], so the machine never sleeps on its own.

use crate::router::{Payload, Request, Response};
use std::time::{Duration, Instant};

/// Preview length before truncation
pub const PREVIEW_LIMIT: usize = 200;
/// How long a notice stays visible
pub const NOTICE_DURATION: Duration = Duration::from_secs(3);
/// Delay between a finished generation and leaving selection mode
pub const CLOSE_DELAY: Duration = Duration::from_secs(2);

const GENERATE_LABEL: &str = "Generate Workflow";
const GENERATING_LABEL: &str = "Generating...";
const DISCONNECTED: &str = "Extension was reloaded. Please refresh the page and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Inactive,
    Active,
    ActiveWithSelection,
    Generating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
    Other,
}

/// What the floating toolbar currently shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolbar {
    pub preview: Option<String>,
    pub generate_enabled: bool,
    pub button_label: &'static str,
}

impl Toolbar {
    fn idle() -> Self {
        Self {
            preview: None,
            generate_enabled: false,
            button_label: GENERATE_LABEL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub kind: NoticeKind,
    pub expires_at: Instant,
}

/// The document side: selection text and cursor styling
pub trait SelectionHost {
    fn selection(&self) -> String;

    /// Switch the selection cursor on or off
    fn set_selecting(&mut self, active: bool);

    /// Whether messages can still reach the router
    fn connected(&self) -> bool {
        true
    }
}

/// Where requests bound for the router go
pub trait Outbox {
    fn send(&mut self, request: Request);

    /// Keep the latest selection for other surfaces to pick up
    fn remember_selection(&mut self, _selection: &str) {}
}

pub struct SelectionMode<H, O> {
    host: H,
    outbox: O,
    state: SelectionState,
    toolbar: Option<Toolbar>,
    notice: Option<Notice>,
    close_at: Option<Instant>,
}

impl<H: SelectionHost, O: Outbox> SelectionMode<H, O> {
    pub fn new(host: H, outbox: O) -> Self {
        Self {
            host,
            outbox,
            state: SelectionState::Inactive,
            toolbar: None,
            notice: None,
            close_at: None,
        }
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != SelectionState::Inactive
    }

    pub fn toolbar(&self) -> Option<&Toolbar> {
        self.toolbar.as_ref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    /// Show the toolbar. Enabling twice is a no-op.
    pub fn enable(&mut self) {
        if self.is_active() {
            return;
        }
        self.state = SelectionState::Active;
        self.toolbar = Some(Toolbar::idle());
        self.close_at = None;
        self.host.set_selecting(true);
        tracing::debug!("selection mode enabled");
    }

    /// Tear down the toolbar and drop any pending close
    pub fn disable(&mut self) {
        if !self.is_active() {
            return;
        }
        self.state = SelectionState::Inactive;
        self.toolbar = None;
        self.close_at = None;
        self.host.set_selecting(false);
        tracing::debug!("selection mode disabled");
    }

    /// Re-read the selection after the pointer is released
    pub fn on_mouse_up(&mut self, in_toolbar: bool) {
        if in_toolbar
            || !matches!(
                self.state,
                SelectionState::Active | SelectionState::ActiveWithSelection
            )
        {
            return;
        }

        let selection = self.host.selection();
        let selection = selection.trim();
        let Some(toolbar) = self.toolbar.as_mut() else {
            return;
        };

        if selection.is_empty() {
            toolbar.preview = None;
            toolbar.generate_enabled = false;
            self.state = SelectionState::Active;
        } else {
            toolbar.preview = Some(preview(selection));
            toolbar.generate_enabled = true;
            self.state = SelectionState::ActiveWithSelection;
            self.outbox.remember_selection(selection);
        }
    }

    pub fn on_key(&mut self, key: Key, now: Instant) {
        match key {
            Key::Escape => self.cancel(),
            Key::Enter => {
                self.generate(now);
            }
            Key::Other => {}
        }
    }

    /// Leave selection mode and tell the router, once
    pub fn cancel(&mut self) {
        if !self.is_active() {
            return;
        }
        self.disable();
        self.outbox.send(Request::SelectionModeCancelled);
    }

    /// Send the trimmed selection for generation. Returns whether a request went out.
    pub fn generate(&mut self, now: Instant) -> bool {
        if !matches!(
            self.state,
            SelectionState::Active | SelectionState::ActiveWithSelection
        ) {
            return false;
        }

        let content = self.host.selection().trim().to_string();
        if content.is_empty() {
            return false;
        }

        if !self.host.connected() {
            tracing::warn!("router unreachable, generation not sent");
            self.show(DISCONNECTED, NoticeKind::Error, now);
            return false;
        }

        self.state = SelectionState::Generating;
        if let Some(toolbar) = self.toolbar.as_mut() {
            toolbar.generate_enabled = false;
            toolbar.button_label = GENERATING_LABEL;
        }
        self.outbox.send(Request::GenerateFromSelection { content });
        true
    }

    /// Report the router's answer and schedule the return to `Inactive`
    pub fn finish_generation(&mut self, response: &Response, now: Instant) {
        match (response.success, &response.payload) {
            (true, Payload::Workflow { workflow }) => self.show(
                &format!("Workflow \"{}\" created", workflow.title),
                NoticeKind::Success,
                now,
            ),
            (true, _) => self.show("Workflow created", NoticeKind::Success, now),
            (false, _) => {
                let error = response
                    .error
                    .as_deref()
                    .unwrap_or("Failed to generate workflow");
                self.show(&format!("Error: {}", error), NoticeKind::Error, now)
            }
        }

        if self.state == SelectionState::Generating {
            if let Some(toolbar) = self.toolbar.as_mut() {
                toolbar.button_label = GENERATE_LABEL;
            }
            self.close_at = Some(now + CLOSE_DELAY);
        }
    }

    /// Fire any deadlines that have passed
    pub fn tick(&mut self, now: Instant) {
        if self.close_at.is_some_and(|at| at <= now) {
            self.disable();
        }
        if self.notice.as_ref().is_some_and(|n| n.expires_at <= now) {
            self.notice = None;
        }
    }

    pub fn show(&mut self, text: &str, kind: NoticeKind, now: Instant) {
        self.notice = Some(Notice {
            text: text.to_string(),
            kind,
            expires_at: now + NOTICE_DURATION,
        });
    }
}

/// Truncate to the preview limit, counted in characters
pub fn preview(selection: &str) -> String {
    match selection.char_indices().nth(PREVIEW_LIMIT) {
        Some((cut, _)) => format!("{}...", &selection[..cut]),
        None => selection.to_string(),
    }
}
