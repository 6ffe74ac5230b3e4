use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::collections::HashMap;

use crate::actions::Action;
use crate::screen::{truncate, Status};
use crate::session::{format_duration, Session};
use crate::store::PastSession;

/// Theme colors
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bg: Color::Rgb(30, 30, 30),
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

impl Theme {
    fn status_icon(&self, status: Status) -> Span<'static> {
        let (icon, color) = match status {
            Status::Running => ("● ", self.warning),
            Status::Waiting => ("● ", self.success),
            Status::Permission => ("? ", self.error),
            Status::Confirm => ("? ", self.accent),
            Status::TaskDone => ("✓ ", self.success),
            Status::Unknown => ("○ ", self.dim),
        };
        Span::styled(icon, Style::default().fg(color))
    }

    fn status_color(&self, status: Status) -> Color {
        match status {
            Status::Running => self.warning,
            Status::Waiting | Status::TaskDone => self.success,
            Status::Permission => self.error,
            Status::Confirm => self.accent,
            Status::Unknown => self.dim,
        }
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Typing `[host:]name [first message]`
    Creating,
    /// Confirming a kill
    Confirming,
    /// Typing a message for the selected session
    Sending,
    /// Browsing past sessions
    Resuming,
    /// Typing a filter for the session list, or for the resume list when `resume` is set
    Filtering { resume: bool },
}

/// Main application state
pub struct App {
    /// Sessions in display order
    pub sessions: Vec<Session>,
    /// Auto-forward nudge counts of the sessions that have it enabled
    pub auto_forward: HashMap<String, u32>,
    pub list_state: ListState,
    /// Status line message and whether it is an error
    pub message: Option<(String, bool)>,
    pub theme: Theme,
    pub input_mode: InputMode,
    pub input_buffer: String,
    /// Preview text and the session key or transcript id it belongs to
    pub preview: Option<(String, String)>,
    pub resumable: Vec<PastSession>,
    pub resume_state: ListState,
    /// Filter applied to the session list
    pub session_filter: String,
    /// Filter applied to the resume list
    pub resume_filter: String,
    pub pending_actions: Vec<Action>,
}

impl App {
    pub fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            sessions: Vec::new(),
            auto_forward: HashMap::new(),
            list_state,
            message: None,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            preview: None,
            resumable: Vec::new(),
            resume_state: ListState::default(),
            session_filter: String::new(),
            resume_filter: String::new(),
            pending_actions: Vec::new(),
        }
    }

    /// Sessions that pass the session filter, in display order
    pub fn visible_sessions(&self) -> Vec<&Session> {
        self.sessions
            .iter()
            .filter(|s| {
                matches_filter(
                    &self.session_filter,
                    &[s.name.as_str(), s.display_name().as_str(), s.work_dir.as_str()],
                )
            })
            .collect()
    }

    /// Past sessions that pass the resume filter
    pub fn visible_past(&self) -> Vec<&PastSession> {
        self.resumable
            .iter()
            .filter(|p| {
                matches_filter(
                    &self.resume_filter,
                    &[p.key.as_str(), p.work_dir.as_str(), p.first_message.as_str()],
                )
            })
            .collect()
    }

    pub fn selected_session(&self) -> Option<&Session> {
        let i = self.list_state.selected()?;
        self.visible_sessions().get(i).copied()
    }

    pub fn selected_past(&self) -> Option<&PastSession> {
        let i = self.resume_state.selected()?;
        self.visible_past().get(i).copied()
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Replace the session list, keeping the selection on the same session
    /// when it is still there.
    pub fn set_sessions(&mut self, sessions: Vec<Session>, auto_forward: HashMap<String, u32>) {
        let selected_key = self.selected_session().map(Session::key);
        self.sessions = sessions;
        self.auto_forward = auto_forward;

        let visible = self.visible_sessions();
        let index = selected_key
            .and_then(|key| visible.iter().position(|s| s.key() == key))
            .or_else(|| self.list_state.selected())
            .map(|i| i.min(visible.len().saturating_sub(1)));
        self.list_state.select(index.or(Some(0)));
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::Mouse(mouse) => {
                self.handle_mouse(mouse);
                Ok(false)
            }
            Action::PreviewLoaded { key, text } => {
                self.preview = Some((key, text));
                Ok(false)
            }
            Action::ResumeListed(past) => {
                if past.is_empty() {
                    self.info("No sessions to resume");
                    return Ok(false);
                }
                self.resumable = past;
                self.resume_filter.clear();
                self.resume_state.select(Some(0));
                self.input_mode = InputMode::Resuming;
                self.request_past_preview();
                Ok(false)
            }
            Action::SessionKilled { key, transcript } => {
                match transcript {
                    Some(_) => self.info(format!("Killed {}, saved for resume", key)),
                    None => self.info(format!("Killed {}", key)),
                }
                Ok(false)
            }
            Action::Info(msg) => {
                self.info(msg);
                Ok(false)
            }
            Action::Error(msg) => {
                self.message = Some((msg, true));
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn info(&mut self, msg: impl Into<String>) {
        self.message = Some((msg.into(), false));
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.message.is_some() && self.input_mode == InputMode::Normal {
            self.message = None;
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Creating | InputMode::Sending => self.handle_text_key(key),
            InputMode::Confirming => self.handle_confirming_key(key),
            InputMode::Resuming => self.handle_resuming_key(key),
            InputMode::Filtering { resume } => self.handle_filter_key(key, resume),
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if self.input_mode != InputMode::Normal {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollDown => self.next_session(),
            MouseEventKind::ScrollUp => self.previous_session(),
            _ => {}
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.next_session(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_session(),
            KeyCode::Char('/') => self.input_mode = InputMode::Filtering { resume: false },
            KeyCode::Esc if !self.session_filter.is_empty() => {
                self.session_filter.clear();
                self.list_state.select(Some(0));
                self.request_preview();
            }
            KeyCode::Enter => {
                if let Some(session) = self.selected_session() {
                    self.pending_actions.push(Action::AttachSession(session.key()));
                }
            }
            KeyCode::Char('n') => {
                self.input_mode = InputMode::Creating;
                self.input_buffer.clear();
            }
            KeyCode::Char('d') => {
                if self.selected_session().is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            KeyCode::Char('s') => {
                if self.selected_session().is_some() {
                    self.input_mode = InputMode::Sending;
                    self.input_buffer.clear();
                }
            }
            KeyCode::Char('a') => {
                if let Some(session) = self.selected_session() {
                    self.pending_actions.push(Action::ToggleAutoForward(session.key()));
                }
            }
            KeyCode::Char('p') => self.request_preview(),
            KeyCode::Char('r') => self.pending_actions.push(Action::ShowResume { killed_only: false }),
            KeyCode::Char('R') => self.pending_actions.push(Action::ShowResume { killed_only: true }),
            _ => {}
        }
        Ok(false)
    }

    fn handle_text_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let input = std::mem::take(&mut self.input_buffer);
                if let Some(action) = self.submit_input(input.trim()) {
                    self.pending_actions.push(action);
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn submit_input(&self, input: &str) -> Option<Action> {
        if input.is_empty() {
            return None;
        }
        match self.input_mode {
            InputMode::Creating => {
                let (target, message) = match input.split_once(char::is_whitespace) {
                    Some((target, rest)) => (target, Some(rest.trim().to_string())),
                    None => (input, None),
                };
                Some(Action::CreateSession {
                    target: target.to_string(),
                    message: message.filter(|m| !m.is_empty()),
                })
            }
            InputMode::Sending => self.selected_session().map(|s| Action::SendText {
                key: s.key(),
                text: input.to_string(),
            }),
            _ => None,
        }
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(session) = self.selected_session() {
                    self.pending_actions.push(Action::KillSession(session.key()));
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_resuming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                let len = self.visible_past().len();
                step(&mut self.resume_state, len, true);
                self.request_past_preview();
            }
            KeyCode::Char('k') | KeyCode::Up => {
                let len = self.visible_past().len();
                step(&mut self.resume_state, len, false);
                self.request_past_preview();
            }
            KeyCode::Char('/') => self.input_mode = InputMode::Filtering { resume: true },
            KeyCode::Enter => {
                if let Some(past) = self.selected_past().cloned() {
                    self.pending_actions.push(Action::ResumeSession(past));
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc | KeyCode::Char('q') => {
                self.resume_filter.clear();
                self.input_mode = InputMode::Normal;
                self.request_preview();
            }
            _ => {}
        }
        Ok(false)
    }

    /// Edit a filter. Enter keeps it, Esc clears it; both return to the list.
    fn handle_filter_key(&mut self, key: KeyEvent, resume: bool) -> Result<bool> {
        let back = if resume { InputMode::Resuming } else { InputMode::Normal };
        let filter = if resume { &mut self.resume_filter } else { &mut self.session_filter };
        match key.code {
            KeyCode::Enter => {
                self.input_mode = back;
                return Ok(false);
            }
            KeyCode::Esc => {
                filter.clear();
                self.input_mode = back;
            }
            KeyCode::Char(c) => filter.push(c),
            KeyCode::Backspace => {
                filter.pop();
            }
            _ => return Ok(false),
        }

        if resume {
            self.resume_state.select(Some(0));
            self.request_past_preview();
        } else {
            self.list_state.select(Some(0));
            self.request_preview();
        }
        Ok(false)
    }

    fn request_preview(&mut self) {
        if let Some(session) = self.selected_session() {
            let key = session.key();
            self.pending_actions.push(Action::LoadPreview(key));
        }
    }

    fn request_past_preview(&mut self) {
        if let Some(past) = self.selected_past().cloned() {
            self.pending_actions.push(Action::LoadTranscriptPreview(past));
        }
    }

    fn next_session(&mut self) {
        let len = self.visible_sessions().len();
        step(&mut self.list_state, len, true);
        self.request_preview();
    }

    fn previous_session(&mut self) {
        let len = self.visible_sessions().len();
        step(&mut self.list_state, len, false);
        self.request_preview();
    }

    /// Preview text if it belongs to `key`
    fn preview_for(&self, key: &str) -> Option<&str> {
        self.preview
            .as_ref()
            .filter(|(k, _)| k == key)
            .map(|(_, text)| text.as_str())
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        if matches!(
            self.input_mode,
            InputMode::Resuming | InputMode::Filtering { resume: true }
        ) {
            self.render_resume(frame, chunks[1]);
        } else {
            self.render_main(frame, chunks[1]);
        }
        self.render_footer(frame, chunks[2]);

        match self.input_mode {
            InputMode::Creating => self.render_input_dialog(
                frame,
                " New Session ",
                "[host:]name [first message]",
                "Press Enter to create, Esc to cancel",
            ),
            InputMode::Sending => self.render_input_dialog(
                frame,
                " Send ",
                "Message:",
                "Press Enter to send, Esc to cancel",
            ),
            InputMode::Confirming => self.render_confirm_dialog(frame),
            InputMode::Normal | InputMode::Resuming | InputMode::Filtering { .. } => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let attention = self
            .sessions
            .iter()
            .filter(|s| s.status.needs_attention())
            .count();
        let mut spans = vec![
            Span::styled(
                " agent-herder ",
                Style::default().fg(self.theme.accent).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ {} sessions", self.sessions.len()),
                Style::default().fg(self.theme.dim),
            ),
        ];
        if attention > 0 {
            spans.push(Span::styled(
                format!(" │ {} need attention", attention),
                Style::default().fg(self.theme.warning),
            ));
        }
        let title = Paragraph::new(Line::from(spans)).style(Style::default().bg(self.theme.bg)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(55), // Session list
                Constraint::Percentage(45), // Detail pane
            ])
            .split(area);

        self.render_session_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn session_line(&self, session: &Session) -> Line<'static> {
        let mut spans = vec![
            self.theme.status_icon(session.status),
            Span::styled(format!("{:<16}", session.name), Style::default().fg(self.theme.fg)),
        ];
        if !session.is_local() {
            spans.push(Span::styled(
                format!("@{} ", session.host),
                Style::default().fg(self.theme.dim),
            ));
        }
        spans.push(Span::styled(
            format!("{:>7} ", format_duration(session.duration)),
            Style::default().fg(self.theme.dim),
        ));
        if !session.mode.is_empty() {
            spans.push(Span::styled(
                format!("[{}] ", session.mode),
                Style::default().fg(self.theme.accent),
            ));
        }
        if let Some(count) = self.auto_forward.get(&session.key()) {
            spans.push(Span::styled(
                format!("AF{} ", count),
                Style::default().fg(self.theme.success),
            ));
        }
        spans.push(Span::styled(
            truncate(&session.last_action, 40),
            Style::default().fg(self.theme.dim),
        ));
        Line::from(spans)
    }

    fn render_session_list(&mut self, frame: &mut Frame, area: Rect) {
        let visible = self.visible_sessions();
        let items: Vec<ListItem> = if self.sessions.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No sessions found. Press 'n' to create one.",
                Style::default().fg(self.theme.dim),
            )))]
        } else if visible.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                format!("  No sessions match '{}'", self.session_filter),
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            visible
                .into_iter()
                .map(|session| ListItem::new(self.session_line(session)))
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(list_title("Sessions", &self.session_filter))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn field(&self, label: &str, value: String, color: Color) -> Line<'static> {
        Line::from(vec![
            Span::styled(format!("{}: ", label), Style::default().fg(self.theme.dim)),
            Span::styled(value, Style::default().fg(color)),
        ])
    }

    fn render_detail_pane(&self, frame: &mut Frame, area: Rect) {
        let Some(session) = self.selected_session() else {
            let content = vec![
                Line::from(Span::styled("No session selected", Style::default().fg(self.theme.dim))),
                Line::from(""),
                Line::from(Span::styled(
                    "Press 'n' to create a new session",
                    Style::default().fg(self.theme.dim),
                )),
            ];
            let detail = Paragraph::new(content).block(
                Block::default()
                    .title(" Details ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            );
            frame.render_widget(detail, area);
            return;
        };

        let fg = self.theme.fg;
        let mut content = vec![
            self.field("Name", session.display_name(), fg),
            self.field("Status", session.status.to_string(), self.theme.status_color(session.status)),
            self.field("Up", format_duration(session.duration), fg),
            self.field("Clients", session.attached_clients.to_string(), fg),
        ];
        for (label, value) in [
            ("Dir", &session.work_dir),
            ("Mode", &session.mode),
            ("Changes", &session.changes),
            ("PR", &session.pr),
            ("Context", &session.context),
        ] {
            if !value.is_empty() {
                content.push(self.field(label, value.clone(), fg));
            }
        }
        let af = match self.auto_forward.get(&session.key()) {
            Some(count) => format!("on ({} sent)", count),
            None => "off".to_string(),
        };
        content.push(self.field("Auto-forward", af, fg));

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(content.len() as u16 + 2), Constraint::Min(0)])
            .split(area);

        let detail = Paragraph::new(content).block(
            Block::default()
                .title(" Details ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(detail, chunks[0]);

        self.render_preview(frame, chunks[1], self.preview_for(&session.key()));
    }

    fn render_preview(&self, frame: &mut Frame, area: Rect, text: Option<&str>) {
        let text = text.unwrap_or("Press 'p' to load a preview");
        // keep the bottom of the text in view
        let visible = area.height.saturating_sub(2) as usize;
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(visible);
        let body: Vec<Line> = lines[start..]
            .iter()
            .map(|l| Line::from(Span::styled(l.to_string(), Style::default().fg(self.theme.fg))))
            .collect();

        let preview = Paragraph::new(body).wrap(Wrap { trim: false }).block(
            Block::default()
                .title(" Preview ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(preview, area);
    }

    fn render_resume(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area);

        let items: Vec<ListItem> = self
            .visible_past()
            .into_iter()
            .map(|past| {
                let when = past
                    .last_seen
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:<20}", past.key), Style::default().fg(self.theme.fg)),
                    Span::styled(format!("{} ", when), Style::default().fg(self.theme.dim)),
                    Span::styled(truncate(&past.first_message, 40), Style::default().fg(self.theme.dim)),
                ]))
            })
            .collect();

        let list = List::new(items)
            .block(
                Block::default()
                    .title(list_title("Resume", &self.resume_filter))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.accent)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");
        frame.render_stateful_widget(list, chunks[0], &mut self.resume_state);

        let preview = self
            .selected_past()
            .and_then(|past| self.preview_for(&past.transcript_id));
        self.render_preview(frame, chunks[1], preview);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text = match self.input_mode {
            InputMode::Resuming => " j/k: Navigate │ /: Filter │ Enter: Resume │ Esc: Back ",
            _ => " q: Quit │ j/k: Navigate │ /: Filter │ Enter: Attach │ n: New │ s: Send │ d: Kill │ a: Auto-forward │ p: Preview │ r/R: Resume all/killed ",
        };

        let content = if let InputMode::Filtering { resume } = self.input_mode {
            let filter = if resume { &self.resume_filter } else { &self.session_filter };
            Line::from(Span::styled(
                format!(" /{}_  (Enter: keep │ Esc: clear)", filter),
                Style::default().fg(self.theme.accent),
            ))
        } else if let Some((ref msg, is_error)) = self.message {
            let color = if is_error { self.theme.error } else { self.theme.success };
            Line::from(Span::styled(format!(" {} ", msg), Style::default().fg(color)))
        } else {
            Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim)))
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_input_dialog(&self, frame: &mut Frame, title: &str, prompt: &str, hint: &str) {
        let area = centered_rect(60, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(title.to_string())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(prompt.to_string(), Style::default().fg(self.theme.fg))),
            Line::from(""),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default().fg(self.theme.accent).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(hint.to_string(), Style::default().fg(self.theme.dim))),
        ];

        frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), inner);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Confirm Kill ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let session_name = self
            .selected_session()
            .map(Session::display_name)
            .unwrap_or_else(|| "unknown".to_string());

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("Kill session '{}'?", session_name),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Its transcript is kept and can be resumed with 'r'.",
                Style::default().fg(self.theme.warning),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }
}

/// Case-insensitive substring match against any of `fields`. An empty filter matches everything.
fn matches_filter(filter: &str, fields: &[&str]) -> bool {
    if filter.is_empty() {
        return true;
    }
    let needle = filter.to_lowercase();
    fields.iter().any(|field| field.to_lowercase().contains(&needle))
}

fn list_title(name: &str, filter: &str) -> String {
    if filter.is_empty() {
        format!(" {} ", name)
    } else {
        format!(" {} [/{}] ", name, filter)
    }
}

/// Move a list selection one step, wrapping at both ends.
fn step(state: &mut ListState, len: usize, forward: bool) {
    if len == 0 {
        return;
    }
    let i = match state.selected() {
        Some(i) if forward => (i + 1) % len,
        Some(0) => len - 1,
        Some(i) => (i - 1).min(len - 1),
        None => 0,
    };
    state.select(Some(i));
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};

    fn key(code: KeyCode) -> Action {
        Action::KeyPress(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_action(key(KeyCode::Char(c))).unwrap();
        }
    }

    fn session(host: &str, name: &str, status: Status) -> Session {
        Session {
            name: name.to_string(),
            full_name: format!("herd-{}", name),
            host: host.to_string(),
            status,
            ..Default::default()
        }
    }

    fn app_with(sessions: Vec<Session>) -> App {
        let mut app = App::new();
        app.set_sessions(sessions, HashMap::new());
        app
    }

    #[test]
    fn test_quit_keys() {
        let mut app = App::new();
        assert!(app.handle_action(key(KeyCode::Char('q'))).unwrap());
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(app.handle_action(Action::KeyPress(ctrl_c)).unwrap());
    }

    #[test]
    fn test_navigation_wraps_and_requests_preview() {
        let mut app = app_with(vec![
            session("", "a", Status::Waiting),
            session("box", "b", Status::Running),
        ]);
        app.handle_action(key(KeyCode::Up)).unwrap();
        assert_eq!(app.selected_session().unwrap().key(), "box:herd-b");
        app.handle_action(key(KeyCode::Char('j'))).unwrap();
        assert_eq!(app.selected_session().unwrap().key(), "herd-a");

        let actions = app.take_pending_actions();
        assert!(matches!(&actions[..], [Action::LoadPreview(a), Action::LoadPreview(b)]
            if a == "box:herd-b" && b == "herd-a"));
    }

    #[test]
    fn test_selection_follows_session_across_refresh() {
        let mut app = app_with(vec![session("", "a", Status::Waiting), session("", "b", Status::Waiting)]);
        app.handle_action(key(KeyCode::Down)).unwrap();
        assert_eq!(app.selected_session().unwrap().name, "b");

        app.set_sessions(
            vec![session("", "b", Status::Permission), session("", "a", Status::Waiting)],
            HashMap::new(),
        );
        assert_eq!(app.selected_session().unwrap().name, "b");

        app.set_sessions(vec![session("", "a", Status::Waiting)], HashMap::new());
        assert_eq!(app.selected_session().unwrap().name, "a");
    }

    #[test]
    fn test_create_with_host_and_message() {
        let mut app = App::new();
        app.handle_action(key(KeyCode::Char('n'))).unwrap();
        assert_eq!(app.input_mode, InputMode::Creating);
        type_text(&mut app, "box:api fix the  build");
        app.handle_action(key(KeyCode::Enter)).unwrap();

        assert_eq!(app.input_mode, InputMode::Normal);
        let actions = app.take_pending_actions();
        assert!(matches!(&actions[..], [Action::CreateSession { target, message: Some(m) }]
            if target == "box:api" && m == "fix the  build"));
    }

    #[test]
    fn test_create_without_message_and_cancel() {
        let mut app = App::new();
        app.handle_action(key(KeyCode::Char('n'))).unwrap();
        type_text(&mut app, "api");
        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert!(matches!(&app.take_pending_actions()[..], [Action::CreateSession { target, message: None }]
            if target == "api"));

        app.handle_action(key(KeyCode::Char('n'))).unwrap();
        type_text(&mut app, "web");
        app.handle_action(key(KeyCode::Esc)).unwrap();
        assert!(app.take_pending_actions().is_empty());
        assert!(app.input_buffer.is_empty());
    }

    #[test]
    fn test_kill_requires_confirmation() {
        let mut app = app_with(vec![session("box", "api", Status::Waiting)]);
        app.handle_action(key(KeyCode::Char('d'))).unwrap();
        app.handle_action(key(KeyCode::Char('n'))).unwrap();
        assert!(app.take_pending_actions().is_empty());

        app.handle_action(key(KeyCode::Char('d'))).unwrap();
        app.handle_action(key(KeyCode::Char('y'))).unwrap();
        assert!(matches!(&app.take_pending_actions()[..], [Action::KillSession(k)] if k == "box:herd-api"));
    }

    #[test]
    fn test_send_toggle_and_attach() {
        let mut app = app_with(vec![session("", "api", Status::Waiting)]);
        app.handle_action(key(KeyCode::Char('s'))).unwrap();
        type_text(&mut app, "keep going");
        app.handle_action(key(KeyCode::Enter)).unwrap();
        app.handle_action(key(KeyCode::Char('a'))).unwrap();
        app.handle_action(key(KeyCode::Enter)).unwrap();

        let actions = app.take_pending_actions();
        assert!(matches!(&actions[..], [
            Action::SendText { key, text },
            Action::ToggleAutoForward(t),
            Action::AttachSession(a),
        ] if key == "herd-api" && text == "keep going" && t == "herd-api" && a == "herd-api"));
    }

    #[test]
    fn test_resume_flow() {
        let mut app = App::new();
        app.handle_action(key(KeyCode::Char('r'))).unwrap();
        assert!(matches!(&app.take_pending_actions()[..], [Action::ShowResume { killed_only: false }]));

        let past = |key: &str, id: &str| PastSession {
            key: key.to_string(),
            transcript_id: id.to_string(),
            work_dir: "/src".to_string(),
            first_message: String::new(),
            last_seen: None,
            killed: true,
        };
        app.handle_action(Action::ResumeListed(vec![past("herd-a", "t1"), past("herd-b", "t2")]))
            .unwrap();
        assert_eq!(app.input_mode, InputMode::Resuming);
        app.handle_action(key(KeyCode::Down)).unwrap();
        app.handle_action(key(KeyCode::Enter)).unwrap();

        assert_eq!(app.input_mode, InputMode::Normal);
        let actions = app.take_pending_actions();
        assert!(matches!(actions.last(), Some(Action::ResumeSession(p)) if p.transcript_id == "t2"));
    }

    #[test]
    fn test_empty_resume_list_stays_normal() {
        let mut app = App::new();
        app.handle_action(Action::ResumeListed(Vec::new())).unwrap();
        assert_eq!(app.input_mode, InputMode::Normal);
        assert!(app.message.is_some());
    }

    #[test]
    fn test_filter_sessions_by_name_and_dir() {
        let mut sessions = vec![
            session("", "api", Status::Waiting),
            session("box", "web", Status::Running),
            session("", "docs", Status::Waiting),
        ];
        sessions[2].work_dir = "/home/me/Website".to_string();
        let mut app = app_with(sessions);

        app.handle_action(key(KeyCode::Char('/'))).unwrap();
        assert_eq!(app.input_mode, InputMode::Filtering { resume: false });
        type_text(&mut app, "WEB");
        let names: Vec<&str> = app.visible_sessions().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["web", "docs"]);
        assert_eq!(app.selected_session().unwrap().name, "web");

        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(app.session_filter, "WEB");
        app.handle_action(key(KeyCode::Down)).unwrap();
        assert_eq!(app.selected_session().unwrap().name, "docs");
        app.handle_action(key(KeyCode::Down)).unwrap();
        assert_eq!(app.selected_session().unwrap().name, "web");

        app.take_pending_actions();
        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert!(matches!(&app.take_pending_actions()[..], [Action::AttachSession(k)] if k == "box:herd-web"));

        // Esc in the list drops the filter
        app.handle_action(key(KeyCode::Esc)).unwrap();
        assert!(app.session_filter.is_empty());
        assert_eq!(app.visible_sessions().len(), 3);
    }

    #[test]
    fn test_filter_cancel_clears_and_refresh_keeps_filter() {
        let mut app = app_with(vec![session("", "api", Status::Waiting), session("", "web", Status::Waiting)]);
        app.handle_action(key(KeyCode::Char('/'))).unwrap();
        type_text(&mut app, "zzz");
        assert!(app.selected_session().is_none());
        app.handle_action(key(KeyCode::Backspace)).unwrap();
        assert_eq!(app.session_filter, "zz");
        app.handle_action(key(KeyCode::Esc)).unwrap();
        assert_eq!(app.input_mode, InputMode::Normal);
        assert!(app.session_filter.is_empty());

        app.handle_action(key(KeyCode::Char('/'))).unwrap();
        type_text(&mut app, "we");
        app.handle_action(key(KeyCode::Enter)).unwrap();
        app.set_sessions(
            vec![session("", "api", Status::Permission), session("", "web", Status::Waiting)],
            HashMap::new(),
        );
        assert_eq!(app.visible_sessions().len(), 1);
        assert_eq!(app.selected_session().unwrap().name, "web");
    }

    #[test]
    fn test_filter_resume_list_by_first_message() {
        let mut app = App::new();
        let past = |key: &str, id: &str, first: &str| PastSession {
            key: key.to_string(),
            transcript_id: id.to_string(),
            work_dir: "/src".to_string(),
            first_message: first.to_string(),
            last_seen: None,
            killed: true,
        };
        app.handle_action(Action::ResumeListed(vec![
            past("herd-a", "t1", "Fix the login form"),
            past("herd-b", "t2", "write release notes"),
            past("box:herd-c", "t3", "login rate limits"),
        ]))
        .unwrap();

        app.handle_action(key(KeyCode::Char('/'))).unwrap();
        assert_eq!(app.input_mode, InputMode::Filtering { resume: true });
        type_text(&mut app, "Login");
        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert_eq!(app.input_mode, InputMode::Resuming);
        assert_eq!(app.visible_past().len(), 2);

        app.handle_action(key(KeyCode::Down)).unwrap();
        app.take_pending_actions();
        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert!(matches!(&app.take_pending_actions()[..], [Action::ResumeSession(p)] if p.transcript_id == "t3"));
        assert_eq!(app.input_mode, InputMode::Normal);
    }

    #[test]
    fn test_render_shows_filter() {
        let mut app = app_with(vec![session("", "api", Status::Waiting), session("", "web", Status::Waiting)]);
        app.handle_action(key(KeyCode::Char('/'))).unwrap();
        type_text(&mut app, "ap");

        let mut terminal = Terminal::new(TestBackend::new(140, 30)).unwrap();
        terminal.draw(|f| app.render(f)).unwrap();
        let text: String = terminal.backend().buffer().content().iter().map(|c| c.symbol()).collect();

        assert!(text.contains("Sessions [/ap]"));
        assert!(text.contains("/ap_"));
        assert!(!text.contains("web"));
    }

    #[test]
    fn test_render_shows_sessions_and_markers() {
        let mut sessions = vec![session("", "api", Status::Permission), session("box", "web", Status::Running)];
        sessions[0].mode = "plan".to_string();
        let mut app = App::new();
        app.set_sessions(sessions, HashMap::from([("herd-api".to_string(), 2)]));

        let mut terminal = Terminal::new(TestBackend::new(140, 30)).unwrap();
        terminal.draw(|f| app.render(f)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();

        assert!(text.contains("api"));
        assert!(text.contains("@box"));
        assert!(text.contains("[plan]"));
        assert!(text.contains("AF2"));
        assert!(text.contains("1 need attention"));
    }
}
