//! Terminal selection UI using ratatui.
//!
//! The page text is listed line by line. A selection is a contiguous range of
//! lines marked with the keyboard or dragged with the mouse; the toolbar and
//! notices come straight from [`SelectionMode`].

use crate::router::{Payload, Request, Response, Router, SelectionControl};
use crate::selection::{Key, NoticeKind, Outbox, SelectionHost, SelectionMode};
use crate::workflow::GeneratedWorkflow;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{DefaultTerminal, Frame};
use std::ops::RangeInclusive;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HINTS: &str = "space/v mark · Enter/g generate · Esc cancel · q quit";

/// Requests from the router to show or hide selection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    Enable,
    Disable,
}

/// Router-side handle on the terminal UI
pub struct ChannelControl(UnboundedSender<UiCommand>);

impl ChannelControl {
    pub fn new() -> (Self, UnboundedReceiver<UiCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    fn send(&self, command: UiCommand) -> Result<(), String> {
        self.0
            .send(command)
            .map_err(|_| "selection UI is not running".to_string())
    }
}

impl SelectionControl for ChannelControl {
    fn enable(&self) -> Result<(), String> {
        self.send(UiCommand::Enable)
    }

    fn disable(&self) -> Result<(), String> {
        self.send(UiCommand::Disable)
    }
}

/// Page text plus a line-range selection
pub struct TerminalPage {
    title: String,
    lines: Vec<String>,
    cursor: usize,
    anchor: Option<usize>,
    selecting: bool,
    router: Weak<Router>,
}

impl TerminalPage {
    pub fn new(title: impl Into<String>, lines: Vec<String>, router: &Arc<Router>) -> Self {
        Self {
            title: title.into(),
            lines,
            cursor: 0,
            anchor: None,
            selecting: false,
            router: Arc::downgrade(router),
        }
    }

    pub fn selected_range(&self) -> Option<RangeInclusive<usize>> {
        let anchor = self.anchor?;
        Some(anchor.min(self.cursor)..=anchor.max(self.cursor))
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.lines.is_empty() {
            return;
        }
        let last = self.lines.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
    }

    /// Start marking at the cursor, or clear the current mark
    pub fn toggle_mark(&mut self) {
        self.anchor = match self.anchor {
            Some(_) => None,
            None => Some(self.cursor),
        };
    }

    fn press(&mut self, line: usize) {
        self.cursor = line;
        self.anchor = Some(line);
    }

    fn drag(&mut self, line: usize) {
        self.cursor = line;
    }
}

impl SelectionHost for TerminalPage {
    fn selection(&self) -> String {
        self.selected_range()
            .and_then(|range| self.lines.get(range))
            .map(|lines| lines.join("\n"))
            .unwrap_or_default()
    }

    fn set_selecting(&mut self, active: bool) {
        self.selecting = active;
        if !active {
            self.anchor = None;
        }
    }

    fn connected(&self) -> bool {
        self.router.strong_count() > 0
    }
}

/// Hands requests to the router on background tasks; generation results come
/// back through `results`. Holds the router weakly, like [`TerminalPage`], so
/// dropping the owner disconnects both.
pub struct RouterOutbox {
    router: Weak<Router>,
    results: UnboundedSender<Response>,
}

impl RouterOutbox {
    pub fn new(router: &Arc<Router>) -> (Self, UnboundedReceiver<Response>) {
        let (results, rx) = mpsc::unbounded_channel();
        let outbox = Self {
            router: Arc::downgrade(router),
            results,
        };
        (outbox, rx)
    }
}

impl Outbox for RouterOutbox {
    fn send(&mut self, request: Request) {
        let Some(router) = self.router.upgrade() else {
            tracing::warn!(action = ?request, "router is gone, request dropped");
            return;
        };
        let results = self.results.clone();
        let reply_expected = matches!(request, Request::GenerateFromSelection { .. });

        tokio::spawn(async move {
            let response = router.dispatch(request).await;
            if reply_expected {
                let _ = results.send(response);
            }
        });
    }

    fn remember_selection(&mut self, selection: &str) {
        let Some(router) = self.router.upgrade() else {
            return;
        };
        if let Err(e) = router.set_selection(selection) {
            tracing::warn!(error = %e, "could not update page selection");
        }
        if let Err(e) = router.store().set_pending_selection(selection) {
            tracing::warn!(error = %e, "could not persist selection");
        }
    }
}

type Mode = SelectionMode<TerminalPage, RouterOutbox>;

/// Run the selection UI until the user quits or selection mode closes.
///
/// Returns the workflow generated during the session, if any.
pub async fn run(
    router: Arc<Router>,
    title: String,
    lines: Vec<String>,
    mut commands: UnboundedReceiver<UiCommand>,
) -> anyhow::Result<Option<GeneratedWorkflow>> {
    let page = TerminalPage::new(title, lines, &router);
    let (outbox, mut results) = RouterOutbox::new(&router);
    let mut mode = SelectionMode::new(page, outbox);

    let mut terminal = ratatui::init();
    execute!(std::io::stdout(), EnableMouseCapture)?;

    let outcome = event_loop(&mut terminal, &mut mode, &mut commands, &mut results);

    if let Err(e) = execute!(std::io::stdout(), DisableMouseCapture) {
        tracing::warn!(error = %e, "failed to release mouse capture");
    }
    ratatui::restore();
    outcome
}

fn event_loop(
    terminal: &mut DefaultTerminal,
    mode: &mut Mode,
    commands: &mut UnboundedReceiver<UiCommand>,
    results: &mut UnboundedReceiver<Response>,
) -> anyhow::Result<Option<GeneratedWorkflow>> {
    let mut created = None;
    let mut opened = false;
    let mut list_state = ListState::default();

    loop {
        let now = Instant::now();

        while let Ok(command) = commands.try_recv() {
            match command {
                UiCommand::Enable => {
                    mode.enable();
                    opened = true;
                }
                UiCommand::Disable => mode.disable(),
            }
        }
        while let Ok(response) = results.try_recv() {
            if let Payload::Workflow { workflow } = &response.payload {
                created = Some(workflow.clone());
            }
            mode.finish_generation(&response, now);
        }
        mode.tick(now);

        // Closed and nothing left to show
        if opened && !mode.is_active() && mode.notice().is_none() {
            return Ok(created);
        }

        let mut page_area = Rect::default();
        terminal.draw(|frame| page_area = draw(frame, mode, &mut list_state))?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if handle_key(mode, key, Instant::now()) {
                    return Ok(created);
                }
            }
            Event::Mouse(mouse) => handle_mouse(mode, mouse, page_area, list_state.offset()),
            _ => {}
        }
    }
}

/// Returns true when the user asked to quit
fn handle_key(mode: &mut Mode, key: KeyEvent, now: Instant) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Esc => mode.on_key(Key::Escape, now),
        KeyCode::Enter => mode.on_key(Key::Enter, now),
        KeyCode::Char('g') => {
            mode.generate(now);
        }
        KeyCode::Up | KeyCode::Char('k') => {
            mode.host_mut().move_cursor(-1);
            mode.on_mouse_up(false);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            mode.host_mut().move_cursor(1);
            mode.on_mouse_up(false);
        }
        KeyCode::Char(' ') | KeyCode::Char('v') => {
            mode.host_mut().toggle_mark();
            mode.on_mouse_up(false);
        }
        _ => mode.on_key(Key::Other, now),
    }
    false
}

fn handle_mouse(mode: &mut Mode, mouse: MouseEvent, page_area: Rect, offset: usize) {
    let inner = page_area.inner(ratatui::layout::Margin::new(1, 1));
    let on_page = mouse.row >= inner.y
        && mouse.row < inner.y + inner.height
        && mouse.column >= inner.x
        && mouse.column < inner.x + inner.width;
    let line = offset + mouse.row.saturating_sub(inner.y) as usize;
    let in_range = line < mode.host().lines.len();

    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) if on_page && in_range => {
            mode.host_mut().press(line)
        }
        MouseEventKind::Drag(MouseButton::Left) if on_page && in_range => {
            mode.host_mut().drag(line)
        }
        MouseEventKind::Up(MouseButton::Left) => mode.on_mouse_up(!on_page),
        MouseEventKind::ScrollUp => mode.host_mut().move_cursor(-3),
        MouseEventKind::ScrollDown => mode.host_mut().move_cursor(3),
        _ => {}
    }
}

/// Render the page, toolbar and notice; returns the page area for hit testing
fn draw(frame: &mut Frame, mode: &Mode, list_state: &mut ListState) -> Rect {
    let [page_area, toolbar_area, notice_area] = Layout::vertical([
        Constraint::Min(3),
        Constraint::Length(5),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let page = mode.host();
    let range = page.selected_range();
    let marked = Style::default().bg(Color::Blue).fg(Color::White);
    let items: Vec<ListItem> = page
        .lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let style = match &range {
                Some(range) if range.contains(&i) => marked,
                _ => Style::default(),
            };
            ListItem::new(line.as_str()).style(style)
        })
        .collect();

    let border = if page.selecting {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let list = List::new(items)
        .block(Block::bordered().title(page.title.as_str()).border_style(border))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    list_state.select((!page.lines.is_empty()).then_some(page.cursor));
    frame.render_stateful_widget(list, page_area, list_state);

    if let Some(toolbar) = mode.toolbar() {
        let preview = match &toolbar.preview {
            Some(text) => Line::from(text.as_str()),
            None => Line::styled(
                "Select text on the page to preview it here",
                Style::default().fg(Color::DarkGray),
            ),
        };
        let button = if toolbar.generate_enabled {
            Style::default().fg(Color::Black).bg(Color::Green)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let controls = Line::from(vec![
            Span::styled(format!(" {} ", toolbar.button_label), button),
            Span::raw("  "),
            Span::styled(HINTS, Style::default().fg(Color::DarkGray)),
        ]);

        let panel = Paragraph::new(vec![preview, controls])
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title("Workflow capture"));
        frame.render_widget(panel, toolbar_area);
    }

    if let Some(notice) = mode.notice() {
        let color = match notice.kind {
            NoticeKind::Info => Color::Cyan,
            NoticeKind::Success => Color::Green,
            NoticeKind::Error => Color::Red,
        };
        frame.render_widget(
            Paragraph::new(notice.text.as_str()).style(Style::default().fg(color)),
            notice_area,
        );
    }

    page_area
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WorkflowClient;
    use crate::config::Config;
    use crate::storage::Store;

    fn router() -> Arc<Router> {
        let client = WorkflowClient::new(&Config::default(), Store::temporary().unwrap()).unwrap();
        Arc::new(Router::new(client))
    }

    fn lines() -> Vec<String> {
        ["Open the ticket", "Check the order", "Issue the refund", "Close the ticket"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn selection_spans_anchor_to_cursor_in_either_direction() {
        let router = router();
        let mut page = TerminalPage::new("Support", lines(), &router);
        assert_eq!(page.selection(), "");

        page.move_cursor(2);
        page.toggle_mark();
        page.move_cursor(-1);
        assert_eq!(page.selection(), "Check the order\nIssue the refund");

        page.move_cursor(10);
        assert_eq!(page.cursor, 3);
        assert_eq!(page.selection(), "Issue the refund\nClose the ticket");

        page.toggle_mark();
        assert_eq!(page.selection(), "");
    }

    #[test]
    fn leaving_selection_mode_clears_the_mark() {
        let router = router();
        let mut page = TerminalPage::new("Support", lines(), &router);
        page.press(1);
        page.drag(2);
        assert_eq!(page.selected_range(), Some(1..=2));

        page.set_selecting(false);
        assert_eq!(page.selected_range(), None);
    }

    #[tokio::test]
    async fn session_disconnects_when_router_owner_drops() {
        let router = router();
        let page = TerminalPage::new("Support", lines(), &router);
        let (outbox, mut results) = RouterOutbox::new(&router);
        let mut mode = SelectionMode::new(page, outbox);
        assert!(mode.host().connected());

        mode.enable();
        mode.host_mut().press(0);
        mode.host_mut().drag(1);
        mode.on_mouse_up(false);
        drop(router);

        assert!(!mode.host().connected());
        assert!(!mode.generate(Instant::now()));
        assert_eq!(
            mode.notice().map(|n| n.text.as_str()),
            Some("Extension was reloaded. Please refresh the page and try again.")
        );
        assert!(mode.is_active());

        mode.cancel();
        tokio::task::yield_now().await;
        assert!(results.try_recv().is_err());
    }

    #[test]
    fn channel_control_forwards_commands() {
        let (control, mut rx) = ChannelControl::new();
        control.enable().unwrap();
        control.disable().unwrap();
        assert_eq!(rx.try_recv().unwrap(), UiCommand::Enable);
        assert_eq!(rx.try_recv().unwrap(), UiCommand::Disable);

        drop(rx);
        assert!(control.enable().is_err());
    }

    #[tokio::test]
    async fn outbox_remembers_selection_in_page_and_store() {
        let client = WorkflowClient::new(&Config::default(), Store::temporary().unwrap()).unwrap();
        let page = crate::extractor::Page::parse("<p>hi</p>", "https://example.com/");
        let router = Arc::new(Router::new(client).with_page(page));
        let (mut outbox, _results) = RouterOutbox::new(&router);

        outbox.remember_selection("Check the order");

        assert_eq!(
            router.store().pending_selection().unwrap().as_deref(),
            Some("Check the order")
        );
        let reply = router.dispatch(Request::GetSelection).await.to_value();
        assert_eq!(reply["selection"], "Check the order");
    }
}
