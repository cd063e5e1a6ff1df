//! Interactive duplex session.
//!
//! A [`Session`] owns the write half of one connection together with the
//! terminal state: the input line, the message log and the layout. It
//! processes one [`SessionEvent`] at a time; the background receiver feeds
//! inbound frames into the same queue as terminal input, so everything the
//! session sees arrives as a single ordered stream.

use crate::application::duplex::FrameSender;
use crate::domain::entities::{Frame, LogEntry};
use crate::domain::errors::ConnectionError;
use anyhow::Result;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything the event loop reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Resize { width: u16, height: u16 },
    Key(KeyInput),
    Inbound(Frame),
    Disconnected(ConnectionError),
}

/// Terminal input, already stripped of terminal-specific encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Paste(String),
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
    Submit,
    Quit,
    ScrollUp(usize),
    ScrollDown(usize),
    PageUp,
    PageDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Maximum characters in the input line
    pub input_limit: usize,
    /// Oldest log entries are evicted beyond this; `None` keeps everything
    pub log_capacity: Option<usize>,
    /// How long shutdown waits for the receiver task before aborting it
    pub shutdown_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            input_limit: 240,
            log_capacity: None,
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Single-line editable text with a character cursor
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    chars: Vec<char>,
    cursor: usize,
    limit: usize,
}

impl InputBuffer {
    pub fn new(limit: usize) -> Self {
        Self { chars: Vec::new(), cursor: 0, limit }
    }

    pub fn insert(&mut self, c: char) {
        if c == '\n' || c == '\r' || self.chars.len() >= self.limit {
            return;
        }
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.chars.remove(self.cursor);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.chars.len() {
            self.chars.remove(self.cursor);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.chars.len());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.chars.len();
    }

    pub fn clear(&mut self) {
        self.chars.clear();
        self.cursor = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Cursor position in characters
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }
}

/// Append-only scrollback, optionally bounded
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    capacity: Option<usize>,
}

impl MessageLog {
    pub fn new(capacity: Option<usize>) -> Self {
        Self { entries: VecDeque::new(), capacity }
    }

    /// Returns true when an old entry was evicted to make room
    pub fn push(&mut self, entry: LogEntry) -> bool {
        self.entries.push_back(entry);
        match self.capacity {
            Some(cap) if self.entries.len() > cap.max(1) => {
                self.entries.pop_front();
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    #[cfg(test)]
    pub fn count(&self, kind: crate::domain::entities::LogKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

/// Terminal dimensions, updated only on resize and read during render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewLayout {
    pub width: u16,
    pub height: u16,
}

impl ViewLayout {
    /// Title line plus a bordered one-line input box
    pub const HEADER_ROWS: u16 = 4;

    /// Visible log lines inside the viewport borders
    pub fn log_lines(&self) -> u16 {
        self.height.saturating_sub(Self::HEADER_ROWS).saturating_sub(2)
    }
}

impl Default for ViewLayout {
    fn default() -> Self {
        Self { width: 80, height: 24 }
    }
}

pub struct Session<S: FrameSender> {
    connection: S,
    target: String,
    state: SessionState,
    input: InputBuffer,
    log: MessageLog,
    layout: ViewLayout,
    /// Entries scrolled back from the newest; zero follows new output
    scroll_back: usize,
    receiver: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl<S: FrameSender> Session<S> {
    /// Starts an `Active` session over an already opened connection
    pub fn new(connection: S, target: impl Into<String>, settings: &SessionSettings) -> Self {
        Self {
            connection,
            target: target.into(),
            state: SessionState::Active,
            input: InputBuffer::new(settings.input_limit),
            log: MessageLog::new(settings.log_capacity),
            layout: ViewLayout::default(),
            scroll_back: 0,
            receiver: None,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }

    /// Hands the background receiver to the session, which stops it on shutdown
    pub fn attach_receiver(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.receiver.replace(handle) {
            warn!("replacing a running receiver task");
            previous.abort();
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn input(&self) -> &InputBuffer {
        &self.input
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn layout(&self) -> ViewLayout {
        self.layout
    }

    pub fn scroll_back(&self) -> usize {
        self.scroll_back
    }

    /// Processes one event to completion. Events after `Active` are ignored.
    pub async fn handle(&mut self, event: SessionEvent) {
        if !self.is_active() {
            return;
        }
        match event {
            SessionEvent::Resize { width, height } => {
                self.layout = ViewLayout { width, height };
            }
            SessionEvent::Key(key) => self.handle_key(key).await,
            SessionEvent::Inbound(frame) => self.append(LogEntry::received(frame.into_inner())),
            SessionEvent::Disconnected(err) => {
                warn!(error = %err, "connection lost");
                self.append(LogEntry::notice(err.to_string()));
                self.state = SessionState::Closing;
            }
        }
    }

    async fn handle_key(&mut self, key: KeyInput) {
        match key {
            KeyInput::Char(c) => self.input.insert(c),
            KeyInput::Paste(text) => text.chars().for_each(|c| self.input.insert(c)),
            KeyInput::Backspace => self.input.backspace(),
            KeyInput::Delete => self.input.delete(),
            KeyInput::Left => self.input.left(),
            KeyInput::Right => self.input.right(),
            KeyInput::Home => self.input.home(),
            KeyInput::End => self.input.end(),
            KeyInput::Submit => self.submit().await,
            KeyInput::Quit => {
                debug!("quit requested");
                self.state = SessionState::Closing;
            }
            KeyInput::ScrollUp(n) => self.scroll_up(n),
            KeyInput::ScrollDown(n) => self.scroll_down(n),
            KeyInput::PageUp => self.scroll_up(self.page()),
            KeyInput::PageDown => self.scroll_down(self.page()),
        }
    }

    /// Sends the input line. On failure the line is kept and the session closes.
    async fn submit(&mut self) {
        if self.input.is_empty() {
            return;
        }
        let text = self.input.text();
        match self.connection.send(Frame::new(text.clone())).await {
            Ok(()) => {
                self.append(LogEntry::sent(text));
                self.input.clear();
            }
            Err(err) => {
                warn!(error = %err, "send failed");
                self.append(LogEntry::notice(err.to_string()));
                self.state = SessionState::Closing;
            }
        }
    }

    fn append(&mut self, entry: LogEntry) {
        let evicted = self.log.push(entry);
        if self.scroll_back > 0 && !evicted {
            // keep the viewport on the same entries while scrolled back
            self.scroll_back += 1;
        }
        self.scroll_back = self.scroll_back.min(self.max_scroll());
    }

    fn page(&self) -> usize {
        usize::from(self.layout.log_lines().max(1))
    }

    fn max_scroll(&self) -> usize {
        self.log.len().saturating_sub(1)
    }

    fn scroll_up(&mut self, n: usize) {
        self.scroll_back = (self.scroll_back + n).min(self.max_scroll());
    }

    fn scroll_down(&mut self, n: usize) {
        self.scroll_back = self.scroll_back.saturating_sub(n);
    }

    /// Closes the connection and stops the receiver.
    ///
    /// Safe to call in any state; the connection is closed at most once.
    pub async fn shutdown(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.state = SessionState::Closing;
        self.connection.close().await;

        if let Some(mut handle) = self.receiver.take() {
            if tokio::time::timeout(self.shutdown_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!("receiver did not stop in time, aborting it");
                handle.abort();
            }
        }
        self.state = SessionState::Terminated;
        debug!(target_url = %self.target, "session terminated");
    }
}

/// Drives `session` until it leaves `Active`, then shuts it down.
///
/// `render` runs once before the first event and after every processed
/// event, and once more after shutdown so the final notice is visible.
pub async fn run_event_loop<S, F>(
    session: &mut Session<S>,
    events: &mut mpsc::Receiver<SessionEvent>,
    mut render: F,
) -> Result<()>
where
    S: FrameSender,
    F: FnMut(&Session<S>) -> Result<()>,
{
    let outcome = drive(session, events, &mut render).await;
    session.shutdown().await;
    outcome?;
    render(session)
}

async fn drive<S, F>(
    session: &mut Session<S>,
    events: &mut mpsc::Receiver<SessionEvent>,
    render: &mut F,
) -> Result<()>
where
    S: FrameSender,
    F: FnMut(&Session<S>) -> Result<()>,
{
    render(session)?;
    while session.is_active() {
        let event = match events.recv().await {
            Some(event) => event,
            None => SessionEvent::Disconnected(ConnectionError::Closed(None)),
        };
        session.handle(event).await;
        render(session)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::duplex::MockFrameSender;
    use crate::domain::entities::LogKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(sender: MockFrameSender) -> Session<MockFrameSender> {
        Session::new(sender, "ws://test", &SessionSettings::default())
    }

    async fn type_text(session: &mut Session<MockFrameSender>, text: &str) {
        for c in text.chars() {
            session.handle(SessionEvent::Key(KeyInput::Char(c))).await;
        }
    }

    fn texts(session: &Session<MockFrameSender>) -> Vec<(LogKind, String)> {
        session.log().iter().map(|e| (e.kind, e.text.clone())).collect()
    }

    #[tokio::test]
    async fn successful_send_logs_text_and_clears_input() {
        let mut sender = MockFrameSender::new();
        sender
            .expect_send()
            .withf(|frame| frame.0 == "hulaki")
            .times(1)
            .returning(|_| Ok(()));
        let mut session = session(sender);

        type_text(&mut session, "hulaki").await;
        session.handle(SessionEvent::Key(KeyInput::Submit)).await;

        assert!(session.input().is_empty());
        assert_eq!(session.input().cursor(), 0);
        assert_eq!(texts(&session), vec![(LogKind::Sent, "hulaki".to_string())]);
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn empty_submit_sends_nothing() {
        let mut sender = MockFrameSender::new();
        sender.expect_send().never();
        let mut session = session(sender);

        session.handle(SessionEvent::Key(KeyInput::Submit)).await;
        assert!(session.log().is_empty());
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn failed_send_keeps_input_and_starts_closing() {
        let mut sender = MockFrameSender::new();
        sender
            .expect_send()
            .times(1)
            .returning(|_| Err(ConnectionError::Send("broken pipe".into())));
        let mut session = session(sender);

        type_text(&mut session, "hello").await;
        session.handle(SessionEvent::Key(KeyInput::Submit)).await;

        assert_eq!(session.input().text(), "hello");
        assert_eq!(
            texts(&session),
            vec![(LogKind::Notice, "failed to send message: broken pipe".to_string())]
        );
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn log_preserves_arrival_and_submission_order() {
        let mut sender = MockFrameSender::new();
        sender.expect_send().returning(|_| Ok(()));
        let mut session = session(sender);

        session.handle(SessionEvent::Inbound(Frame::new("a"))).await;
        type_text(&mut session, "mine").await;
        session.handle(SessionEvent::Key(KeyInput::Submit)).await;
        session.handle(SessionEvent::Inbound(Frame::new("b"))).await;
        session.handle(SessionEvent::Inbound(Frame::new("c"))).await;

        assert_eq!(
            texts(&session),
            vec![
                (LogKind::Received, "a".to_string()),
                (LogKind::Sent, "mine".to_string()),
                (LogKind::Received, "b".to_string()),
                (LogKind::Received, "c".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn editing_keys_move_the_cursor() {
        let mut session = session(MockFrameSender::new());
        type_text(&mut session, "helo").await;
        session.handle(SessionEvent::Key(KeyInput::Left)).await;
        session.handle(SessionEvent::Key(KeyInput::Char('l'))).await;
        session.handle(SessionEvent::Key(KeyInput::Home)).await;
        session.handle(SessionEvent::Key(KeyInput::Delete)).await;
        session.handle(SessionEvent::Key(KeyInput::End)).await;
        session.handle(SessionEvent::Key(KeyInput::Backspace)).await;

        assert_eq!(session.input().text(), "ell");
        assert_eq!(session.input().cursor(), 3);
    }

    #[tokio::test]
    async fn input_respects_the_character_limit() {
        let settings = SessionSettings { input_limit: 3, ..SessionSettings::default() };
        let mut session = Session::new(MockFrameSender::new(), "ws://test", &settings);
        session
            .handle(SessionEvent::Key(KeyInput::Paste("abcdef".into())))
            .await;
        assert_eq!(session.input().text(), "abc");
    }

    #[tokio::test]
    async fn resize_updates_layout_only() {
        let mut session = session(MockFrameSender::new());
        session
            .handle(SessionEvent::Resize { width: 120, height: 40 })
            .await;
        assert_eq!(session.layout(), ViewLayout { width: 120, height: 40 });
        assert_eq!(session.layout().log_lines(), 34);
        assert!(session.log().is_empty());
    }

    #[tokio::test]
    async fn disconnect_is_logged_and_ends_the_session() {
        let mut session = session(MockFrameSender::new());
        session
            .handle(SessionEvent::Disconnected(ConnectionError::Closed(None)))
            .await;
        session.handle(SessionEvent::Inbound(Frame::new("late"))).await;

        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(texts(&session), vec![(LogKind::Notice, "connection closed".to_string())]);
    }

    #[tokio::test]
    async fn quit_terminates_and_closes_exactly_once() {
        let mut sender = MockFrameSender::new();
        sender.expect_close().times(1).returning(|| ());
        let mut session = session(sender);

        session.handle(SessionEvent::Key(KeyInput::Quit)).await;
        assert_eq!(session.state(), SessionState::Closing);

        session.shutdown().await;
        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn shutdown_aborts_a_stuck_receiver() {
        let mut sender = MockFrameSender::new();
        sender.expect_close().times(1).returning(|| ());
        let settings = SessionSettings {
            shutdown_timeout: Duration::from_millis(20),
            ..SessionSettings::default()
        };
        let mut session = Session::new(sender, "ws://test", &settings);
        session.attach_receiver(tokio::spawn(std::future::pending::<()>()));

        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn bounded_log_evicts_oldest_entries() {
        let settings = SessionSettings { log_capacity: Some(2), ..SessionSettings::default() };
        let mut session = Session::new(MockFrameSender::new(), "ws://test", &settings);
        for text in ["1", "2", "3"] {
            session.handle(SessionEvent::Inbound(Frame::new(text))).await;
        }
        let kept: Vec<_> = session.log().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(kept, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn scrolled_view_stays_put_while_messages_arrive() {
        let mut session = session(MockFrameSender::new());
        for i in 0..5 {
            session.handle(SessionEvent::Inbound(Frame::new(i.to_string()))).await;
        }
        session.handle(SessionEvent::Key(KeyInput::ScrollUp(2))).await;
        session.handle(SessionEvent::Inbound(Frame::new("5"))).await;
        assert_eq!(session.scroll_back(), 3);

        session.handle(SessionEvent::Key(KeyInput::ScrollDown(10))).await;
        session.handle(SessionEvent::Inbound(Frame::new("6"))).await;
        assert_eq!(session.scroll_back(), 0);

        session.handle(SessionEvent::Key(KeyInput::ScrollUp(100))).await;
        assert_eq!(session.scroll_back(), 6);
    }

    #[tokio::test]
    async fn event_loop_renders_after_every_event_and_exits_on_quit() {
        let mut sender = MockFrameSender::new();
        sender.expect_send().times(1).returning(|_| Ok(()));
        sender.expect_close().times(1).returning(|| ());
        let mut session = session(sender);

        let (tx, mut rx) = mpsc::channel(16);
        for event in [
            SessionEvent::Inbound(Frame::new("hi")),
            SessionEvent::Key(KeyInput::Char('x')),
            SessionEvent::Key(KeyInput::Submit),
            SessionEvent::Key(KeyInput::Quit),
            SessionEvent::Inbound(Frame::new("after quit")),
        ] {
            tx.send(event).await.unwrap();
        }

        let renders = Arc::new(AtomicUsize::new(0));
        let counter = renders.clone();
        run_event_loop(&mut session, &mut rx, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        // initial + four events + final
        assert_eq!(renders.load(Ordering::SeqCst), 6);
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.log().count(LogKind::Received), 1);
        assert_eq!(session.log().count(LogKind::Sent), 1);
    }

    #[tokio::test]
    async fn event_loop_ends_when_every_producer_is_gone() {
        let mut sender = MockFrameSender::new();
        sender.expect_close().times(1).returning(|| ());
        let mut session = session(sender);

        let (tx, mut rx) = mpsc::channel::<SessionEvent>(1);
        drop(tx);
        run_event_loop(&mut session, &mut rx, |_| Ok(())).await.unwrap();

        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(
            session.log().last(),
            Some(&LogEntry::notice("connection closed"))
        );
    }
}
