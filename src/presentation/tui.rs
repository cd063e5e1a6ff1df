//! Full-screen terminal for the interactive WebSocket session.

use crate::application::duplex::{FrameSender, spawn_receiver};
use crate::application::session::{KeyInput, Session, SessionEvent, ViewLayout, run_event_loop};
use crate::domain::entities::{LogEntry, LogKind};
use crate::infrastructure::config::WebSocketConfig;
use crate::infrastructure::websocket::WebSocketConnection;

use anyhow::{Result, anyhow};
use crossterm::event::{
    DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture, Event,
    EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph};
use ratatui::{Frame, Terminal};
use std::io::{self, Stdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use unicode_width::UnicodeWidthChar;

type Tui = Terminal<CrosstermBackend<Stdout>>;

const ACCENT: Color = Color::Rgb(0x8a, 0x2b, 0xe2);
const LABEL: Color = Color::Rgb(0x14, 0xff, 0x82);
const CURSOR: Color = Color::Rgb(0xff, 0x14, 0x93);
const MOUSE_SCROLL_STEP: usize = 3;

/// Runs an interactive session over `connection` until the user quits or
/// the connection fails. Returns the last notice shown, if any.
pub async fn run(
    mut connection: WebSocketConnection,
    config: &WebSocketConfig,
) -> Result<Option<String>> {
    let reader = connection
        .take_reader()
        .ok_or_else(|| anyhow!("connection is already being read"))?;
    let target = connection.target().to_string();
    let (events_tx, mut events_rx) = mpsc::channel(config.queue_capacity());

    let mut session = Session::new(connection, target, &config.session_settings());
    session.attach_receiver(spawn_receiver(reader, events_tx.clone()));

    let mut terminal = match setup_terminal() {
        Ok(terminal) => terminal,
        Err(e) => {
            session.shutdown().await;
            return Err(e);
        }
    };
    if let Ok(size) = terminal.size() {
        session
            .handle(SessionEvent::Resize { width: size.width, height: size.height })
            .await;
    }

    let pump = spawn_input_pump(events_tx);
    let outcome = run_event_loop(&mut session, &mut events_rx, |session| {
        terminal.draw(|frame| render(frame, session))?;
        Ok(())
    })
    .await;
    pump.abort();

    let restored = restore_terminal(&mut terminal);
    outcome?;
    restored?;

    Ok(session
        .log()
        .last()
        .filter(|entry| entry.kind == LogKind::Notice)
        .map(|entry| entry.text.clone()))
}

fn setup_terminal() -> Result<Tui> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture, EnableBracketedPaste)?;
    Terminal::new(CrosstermBackend::new(stdout)).map_err(|e| {
        let _ = disable_raw_mode();
        anyhow!("Failed to initialise terminal: {}", e)
    })
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
        DisableBracketedPaste
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Forwards terminal input into the session queue
fn spawn_input_pump(events: mpsc::Sender<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = EventStream::new();
        while let Some(next) = stream.next().await {
            let event = match next {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "terminal input failed");
                    let _ = events.send(SessionEvent::Key(KeyInput::Quit)).await;
                    return;
                }
            };
            if let Some(event) = map_event(event) {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
        debug!("terminal input ended");
    })
}

/// Translates a terminal event; events with no meaning here map to `None`
pub fn map_event(event: Event) -> Option<SessionEvent> {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => {
            map_key(key).map(SessionEvent::Key)
        }
        Event::Paste(text) => Some(SessionEvent::Key(KeyInput::Paste(text))),
        Event::Resize(width, height) => Some(SessionEvent::Resize { width, height }),
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::ScrollUp => {
                Some(SessionEvent::Key(KeyInput::ScrollUp(MOUSE_SCROLL_STEP)))
            }
            MouseEventKind::ScrollDown => {
                Some(SessionEvent::Key(KeyInput::ScrollDown(MOUSE_SCROLL_STEP)))
            }
            _ => None,
        },
        _ => None,
    }
}

fn map_key(key: KeyEvent) -> Option<KeyInput> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let input = match key.code {
        KeyCode::Char('c') | KeyCode::Char('d') if ctrl => KeyInput::Quit,
        KeyCode::Esc => KeyInput::Quit,
        KeyCode::Enter => KeyInput::Submit,
        KeyCode::Char(_) if ctrl || key.modifiers.contains(KeyModifiers::ALT) => return None,
        KeyCode::Char(c) => KeyInput::Char(c),
        KeyCode::Backspace => KeyInput::Backspace,
        KeyCode::Delete => KeyInput::Delete,
        KeyCode::Left => KeyInput::Left,
        KeyCode::Right => KeyInput::Right,
        KeyCode::Home => KeyInput::Home,
        KeyCode::End => KeyInput::End,
        KeyCode::Up => KeyInput::ScrollUp(1),
        KeyCode::Down => KeyInput::ScrollDown(1),
        KeyCode::PageUp => KeyInput::PageUp,
        KeyCode::PageDown => KeyInput::PageDown,
        _ => return None,
    };
    Some(input)
}

/// Draws the title line, input box and message log
///
/// The drawing area is the session's last known terminal size, clipped to
/// the frame.
pub fn render<S: FrameSender>(frame: &mut Frame, session: &Session<S>) {
    let layout = session.layout();
    let area = frame.area().intersection(Rect::new(0, 0, layout.width, layout.height));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(ViewLayout::HEADER_ROWS - 1),
            Constraint::Min(0),
        ])
        .split(area);

    let title = Line::from(vec![
        Span::styled("Send a message:", Style::default().fg(LABEL).add_modifier(Modifier::BOLD)),
        Span::styled(
            format!("  {}  (Enter to send, Esc to quit)", session.target()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(Paragraph::new(title), chunks[0]);

    render_input(frame, session, chunks[1]);
    render_log(frame, session, chunks[2]);
}

fn render_input<S: FrameSender>(frame: &mut Frame, session: &Session<S>, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(ACCENT));
    let inner_width = usize::from(area.width.saturating_sub(2)).max(1);

    let input = session.input();
    let chars: Vec<char> = input.text().chars().collect();
    let (offset, column) = input_window(&chars, input.cursor(), inner_width);
    let content = if input.is_empty() {
        Line::from(Span::styled("msg...", Style::default().fg(Color::DarkGray)))
    } else {
        let mut used = 0;
        let visible: String = chars[offset..]
            .iter()
            .take_while(|c| {
                used += char_width(**c);
                used <= inner_width
            })
            .collect();
        Line::from(visible)
    };
    frame.render_widget(Paragraph::new(content).block(block), area);

    if session.is_active() && area.height >= 3 {
        let column = u16::try_from(column).unwrap_or(u16::MAX);
        let x = area.x.saturating_add(1).saturating_add(column);
        frame.set_cursor_position((x, area.y + 1));
    }
}

/// First visible character and the cursor's column, scrolling long input
/// horizontally so the cursor stays inside `width` columns
fn input_window(chars: &[char], cursor: usize, width: usize) -> (usize, usize) {
    let cursor = cursor.min(chars.len());
    let mut offset = 0;
    let mut column: usize = chars[..cursor].iter().map(|c| char_width(*c)).sum();
    while column > width.saturating_sub(1) && offset < cursor {
        column -= char_width(chars[offset]);
        offset += 1;
    }
    (offset, column)
}

fn char_width(c: char) -> usize {
    UnicodeWidthChar::width(c).unwrap_or(0)
}

fn render_log<S: FrameSender>(frame: &mut Frame, session: &Session<S>, area: Rect) {
    let title = match session.scroll_back() {
        0 => " messages ".to_string(),
        n => format!(" messages (scrolled back {}) ", n),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(ACCENT))
        .title(title);

    let visible = usize::from(area.height.saturating_sub(2));
    let width = usize::from(area.width.saturating_sub(2)).max(1);
    let log = session.log();
    let end = log.len().saturating_sub(session.scroll_back());

    if log.is_empty() {
        let waiting = Line::from(Span::styled(
            "no messages yet",
            Style::default().fg(Color::DarkGray),
        ));
        frame.render_widget(Paragraph::new(waiting).block(block), area);
        return;
    }

    let mut lines: Vec<Line> = Vec::new();
    for entry in log.iter().take(end).rev() {
        if lines.len() >= visible {
            break;
        }
        let mut entry_lines = entry_lines(entry, width);
        entry_lines.reverse();
        lines.extend(entry_lines);
    }
    lines.truncate(visible);
    lines.reverse();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Splits one entry into prefixed, width-limited display lines
fn entry_lines(entry: &LogEntry, width: usize) -> Vec<Line<'static>> {
    let style = match entry.kind {
        LogKind::Sent => Style::default().fg(Color::Cyan),
        LogKind::Received => Style::default().fg(Color::White),
        LogKind::Notice => Style::default().fg(CURSOR).add_modifier(Modifier::BOLD),
    };
    let text_width = width.saturating_sub(2).max(1);

    let mut lines = Vec::new();
    for (index, raw_line) in entry.text.split('\n').enumerate() {
        for (chunk_index, chunk) in wrap_to_width(raw_line, text_width).into_iter().enumerate() {
            let prefix = if index == 0 && chunk_index == 0 {
                format!("{} ", entry.kind.prefix())
            } else {
                "  ".to_string()
            };
            lines.push(Line::from(vec![
                Span::styled(prefix, style.add_modifier(Modifier::DIM)),
                Span::styled(chunk, style),
            ]));
        }
    }
    lines
}

/// Splits `text` into pieces at most `width` columns wide; a glyph wider
/// than `width` gets a piece of its own
fn wrap_to_width(text: &str, width: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = char_width(c);
        if used + w > width && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(c);
        used += w;
    }
    pieces.push(current);
    pieces
}
