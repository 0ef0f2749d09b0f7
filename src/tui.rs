use std::time::{Duration, Instant};

use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use tracing::{info, warn};

use crate::clipboard::ClipboardMonitor;
use crate::config::AppPaths;
use crate::coordinator::QueryPhase;
use crate::daemon::{self, POLL_INTERVAL};
use crate::engine::Engine;
use crate::errors::{ClipError, Result};
use crate::storage::models::{Item, ItemContent, ItemId};

const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, PartialEq)]
enum Mode {
    Normal,
    Search,
    ConfirmDelete(ItemId),
    ConfirmClear,
}

struct App {
    list_state: ListState,
    mode: Mode,
    search_query: String,
    status: String,
    status_time: Option<Instant>,
    preview_scroll: u16,
    should_quit: bool,
}

impl App {
    fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        Self {
            list_state,
            mode: Mode::Normal,
            search_query: String::new(),
            status: String::new(),
            status_time: None,
            preview_scroll: 0,
            should_quit: false,
        }
    }

    fn set_status(&mut self, msg: String) {
        self.status = msg;
        self.status_time = Some(Instant::now());
    }

    fn clear_status(&mut self) {
        self.status.clear();
        self.status_time = None;
    }

    fn selected<'a>(&self, engine: &'a Engine) -> Option<&'a Item> {
        self.list_state
            .selected()
            .and_then(|i| engine.displayed_items().get(i))
    }

    fn select_by(&mut self, engine: &Engine, delta: isize) {
        let len = engine.displayed_items().len();
        if len == 0 {
            return;
        }
        let current = self.list_state.selected().unwrap_or(0) as isize;
        let new = (current + delta).clamp(0, len as isize - 1) as usize;
        self.list_state.select(Some(new));
        self.preview_scroll = 0;
    }

    fn select_first(&mut self, engine: &Engine) {
        if !engine.displayed_items().is_empty() {
            self.list_state.select(Some(0));
            self.preview_scroll = 0;
        }
    }

    fn select_last(&mut self, engine: &Engine) {
        let len = engine.displayed_items().len();
        if len > 0 {
            self.list_state.select(Some(len - 1));
            self.preview_scroll = 0;
        }
    }

    fn clamp_selection(&mut self, engine: &Engine) {
        let len = engine.displayed_items().len();
        if len == 0 {
            self.list_state.select(None);
        } else {
            match self.list_state.selected() {
                Some(i) if i >= len => self.list_state.select(Some(len - 1)),
                Some(_) => {}
                None => self.list_state.select(Some(0)),
            }
        }
    }

    fn copy_selected(&mut self, engine: &mut Engine, monitor: &mut ClipboardMonitor) {
        let Some(id) = self.selected(engine).map(|item| item.id) else {
            return;
        };
        match engine.copy_out(id) {
            Ok(Some(token)) => {
                monitor.acknowledge(token);
                self.set_status(format!("Copied {}", id.short()));
            }
            Ok(None) => self.set_status(format!("{} is gone", id.short())),
            Err(e) => self.set_status(format!("Copy failed: {e}")),
        }
    }

    fn request_delete(&mut self, engine: &Engine) {
        let Some(id) = self.selected(engine).map(|item| item.id) else {
            return;
        };
        self.mode = Mode::ConfirmDelete(id);
        self.set_status(format!("Delete {}? [y/n]", id.short()));
    }

    fn confirm_delete(&mut self, engine: &mut Engine, id: ItemId) {
        if engine.remove(id) {
            self.set_status(format!("Deleted {}", id.short()));
        } else {
            self.set_status(format!("{} not found", id.short()));
        }
    }

    fn request_clear(&mut self, engine: &Engine) {
        self.mode = Mode::ConfirmClear;
        self.set_status(format!(
            "Remove all {} item(s), pinned included? [y/n]",
            engine.items().len()
        ));
    }

    fn toggle_pin(&mut self, engine: &mut Engine) {
        let Some(id) = self.selected(engine).map(|item| item.id) else {
            return;
        };
        engine.toggle_pin(id);
        let verb = if engine.get(id).is_some_and(|i| i.is_pinned) {
            "Pinned"
        } else {
            "Unpinned"
        };
        self.set_status(format!("{verb} {}", id.short()));
    }

    fn change_limit(&mut self, engine: &mut Engine, delta: i64) {
        let requested = engine.retention_limit() as i64 + delta;
        let applied = engine.set_retention_limit(requested);
        self.set_status(format!("Keeping last {applied} unpinned item(s)"));
    }

    fn update_query(&mut self, engine: &mut Engine) {
        engine.set_query(&self.search_query);
        self.list_state.select(Some(0));
        self.preview_scroll = 0;
    }
}

fn format_age(dt: chrono::DateTime<Utc>) -> String {
    let dur = Utc::now() - dt;
    if dur.num_seconds() < 60 {
        "now".to_string()
    } else if dur.num_minutes() < 60 {
        format!("{}m", dur.num_minutes())
    } else if dur.num_hours() < 24 {
        format!("{}h", dur.num_hours())
    } else {
        format!("{}d", dur.num_days())
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{truncated}…")
    } else {
        truncated
    }
}

fn label(text: &'static str) -> Span<'static> {
    Span::styled(text, Style::new().fg(Color::DarkGray))
}

// ── UI rendering ───────────────────────────────────────────────────

fn draw(frame: &mut Frame, app: &mut App, engine: &mut Engine) {
    let [title_area, body_area, help_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let stats = engine.stats();
    let title = format!(
        " clipstack · {} items · {} pinned · {} · keep {} ",
        stats.total_items,
        stats.pinned_items,
        format_bytes(stats.total_size),
        stats.retention_limit
    );
    frame.render_widget(
        Paragraph::new(title).style(Style::new().fg(Color::Black).bg(Color::Cyan)),
        title_area,
    );

    let [list_area, preview_area] =
        Layout::horizontal([Constraint::Percentage(40), Constraint::Percentage(60)])
            .areas(body_area);

    let items: Vec<ListItem> = engine
        .displayed_items()
        .iter()
        .map(|item| {
            let (type_ch, preview) = match &item.content {
                ItemContent::Text(text) => ("T", truncate_chars(&text.replace('\n', "↵"), 30)),
                ItemContent::Image(bytes) => ("I", format!("image {}", format_bytes(bytes.len()))),
            };
            let pin = if item.is_pinned { "*" } else { " " };
            ListItem::new(format!(
                "{} {}{} {:>4}  {}",
                item.id.short(),
                type_ch,
                pin,
                format_age(item.timestamp),
                preview
            ))
        })
        .collect();

    let searching = matches!(engine.phase(), QueryPhase::Computing(_));
    let list_title = match (&app.mode, app.search_query.is_empty()) {
        (Mode::Search, _) => format!(
            "Search: {}_{}",
            app.search_query,
            if searching { " …" } else { "" }
        ),
        (_, false) => format!("Results for \"{}\"", app.search_query),
        _ => "History".to_string(),
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(list_title))
        .highlight_style(
            Style::new()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");

    frame.render_stateful_widget(list, list_area, &mut app.list_state);

    let selected = app.selected(engine).cloned();
    let preview_content = match selected {
        Some(item) => {
            let mut lines = vec![
                Line::from(vec![label("ID:      "), Span::raw(item.id.to_string())]),
                Line::from(vec![label("Type:    "), Span::raw(item.kind().as_str())]),
                Line::from(vec![label("Pinned:  "), Span::raw(item.is_pinned.to_string())]),
                Line::from(vec![
                    label("Size:    "),
                    Span::raw(format_bytes(item.content.size_bytes())),
                ]),
                Line::from(vec![
                    label("Seen:    "),
                    Span::raw(item.timestamp.format("%Y-%m-%d %H:%M").to_string()),
                ]),
                Line::raw("─────────────────────────"),
            ];
            match &item.content {
                ItemContent::Text(text) => {
                    lines.extend(text.lines().map(|line| Line::raw(line.to_string())));
                }
                ItemContent::Image(_) => {
                    let dims = match engine.image_dimensions(item.id) {
                        Some((w, h)) => format!("{w}x{h}"),
                        None => "unreadable".to_string(),
                    };
                    lines.push(Line::from(vec![label("Dims:    "), Span::raw(dims)]));
                }
            }
            lines
        }
        None if engine.items().is_empty() => vec![Line::raw("History is empty")],
        None => vec![Line::raw("No matches")],
    };

    let preview_title = if app.preview_scroll > 0 {
        format!("Preview [scroll: {}]", app.preview_scroll)
    } else {
        "Preview".to_string()
    };

    let preview = Paragraph::new(preview_content)
        .block(Block::default().borders(Borders::ALL).title(preview_title))
        .wrap(Wrap { trim: false })
        .scroll((app.preview_scroll, 0));

    frame.render_widget(preview, preview_area);

    if let Some(t) = app.status_time
        && t.elapsed() > Duration::from_secs(3)
        && matches!(app.mode, Mode::Normal)
    {
        app.clear_status();
    }

    let help_text = match app.mode {
        Mode::Normal if app.status.is_empty() => {
            " [q]uit [/]search [Enter]copy [p]in [d]el [C]lear all [+/-]limit [J/K]scroll"
                .to_string()
        }
        Mode::Normal | Mode::ConfirmDelete(_) | Mode::ConfirmClear => {
            format!(" {} ", app.status)
        }
        Mode::Search => " Type to search (live) · [Enter] done · [Esc] clear".to_string(),
    };

    frame.render_widget(
        Paragraph::new(help_text).style(Style::new().fg(Color::Black).bg(Color::White)),
        help_area,
    );
}

// ── Event handling ─────────────────────────────────────────────────

fn handle_key(app: &mut App, engine: &mut Engine, monitor: &mut ClipboardMonitor, key: KeyEvent) {
    if key.kind != KeyEventKind::Press {
        return;
    }

    match app.mode {
        Mode::Normal => {
            let shifted = key.modifiers.contains(KeyModifiers::SHIFT);
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                KeyCode::Char('J') if shifted => {
                    app.preview_scroll = app.preview_scroll.saturating_add(1);
                }
                KeyCode::Char('K') if shifted => {
                    app.preview_scroll = app.preview_scroll.saturating_sub(1);
                }
                KeyCode::Char('j') | KeyCode::Down => app.select_by(engine, 1),
                KeyCode::Char('k') | KeyCode::Up => app.select_by(engine, -1),
                KeyCode::PageDown => app.select_by(engine, 10),
                KeyCode::PageUp => app.select_by(engine, -10),
                KeyCode::Char('g') | KeyCode::Home => app.select_first(engine),
                KeyCode::Char('G') | KeyCode::End => app.select_last(engine),
                KeyCode::Enter => app.copy_selected(engine, monitor),
                KeyCode::Char('d') => app.request_delete(engine),
                KeyCode::Char('C') => app.request_clear(engine),
                KeyCode::Char('p') => app.toggle_pin(engine),
                KeyCode::Char('+') | KeyCode::Char('=') => app.change_limit(engine, 1),
                KeyCode::Char('-') => app.change_limit(engine, -1),
                KeyCode::Char('/') => {
                    app.mode = Mode::Search;
                    app.clear_status();
                }
                _ => {}
            }
        }
        Mode::ConfirmDelete(id) => {
            app.mode = Mode::Normal;
            match key.code {
                KeyCode::Char('y') => app.confirm_delete(engine, id),
                _ => app.set_status("Delete cancelled".to_string()),
            }
        }
        Mode::ConfirmClear => {
            app.mode = Mode::Normal;
            match key.code {
                KeyCode::Char('y') => {
                    let removed = engine.clear_all();
                    app.set_status(format!("Cleared {removed} item(s)"));
                }
                _ => app.set_status("Clear cancelled".to_string()),
            }
        }
        Mode::Search => match key.code {
            KeyCode::Esc => {
                app.mode = Mode::Normal;
                app.search_query.clear();
                app.update_query(engine);
            }
            KeyCode::Enter => app.mode = Mode::Normal,
            KeyCode::Backspace => {
                app.search_query.pop();
                app.update_query(engine);
            }
            KeyCode::Char(c) => {
                app.search_query.push(c);
                app.update_query(engine);
            }
            _ => {}
        },
    }

    app.clamp_selection(engine);
}

fn tick(app: &mut App, engine: &mut Engine, monitor: &mut ClipboardMonitor, last_poll: &mut Instant) {
    if last_poll.elapsed() >= POLL_INTERVAL {
        *last_poll = Instant::now();
        daemon::poll_once(monitor, engine);
    }
    if engine.poll_results() {
        app.clamp_selection(engine);
    }
}

// ── Entry point ────────────────────────────────────────────────────

pub fn run(paths: &AppPaths) -> Result<()> {
    let _owner = daemon::claim_owner(paths)?;
    let mut engine = Engine::open(paths)?;
    let mut monitor = ClipboardMonitor::from_current();
    let mut app = App::new();
    app.clamp_selection(&engine);
    info!("tui started");

    let mut terminal = ratatui::init();
    let mut last_poll = Instant::now()
        .checked_sub(POLL_INTERVAL)
        .unwrap_or_else(Instant::now);

    let result = (|| {
        loop {
            tick(&mut app, &mut engine, &mut monitor, &mut last_poll);
            terminal.draw(|frame| draw(frame, &mut app, &mut engine))?;
            if event::poll(TICK)?
                && let Event::Key(key) = event::read()?
            {
                handle_key(&mut app, &mut engine, &mut monitor, key);
            }
            if app.should_quit {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    })();

    ratatui::restore();
    engine.flush();

    if let Err(e) = &result {
        warn!(error = %e, "terminal error");
    }
    result.map_err(|e| ClipError::Daemon(e.to_string()))
}
