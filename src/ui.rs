use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use pantry_monitor::db::{self, Item, ItemHistoryEntry, Scan, Statistics};
use pantry_monitor::ChangeKind;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::collections::HashMap;
use std::io;

const SCAN_ROWS: usize = 50;
const PAGE_JUMP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Inventory,
    Scans,
    Statistics,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Inventory => Page::Scans,
            Page::Scans => Page::Statistics,
            Page::Statistics => Page::Inventory,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Inventory => Page::Statistics,
            Page::Scans => Page::Inventory,
            Page::Statistics => Page::Scans,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Inventory => "Inventory",
            Page::Scans => "Scans",
            Page::Statistics => "Statistics",
        }
    }
}

pub struct App {
    pub items: Vec<Item>,
    pub scans: Vec<Scan>,
    pub stats: Statistics,
    pub history: HashMap<i64, Vec<ItemHistoryEntry>>,
    pub now: DateTime<Utc>,
    pub item_state: TableState,
    pub scan_state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
}

impl App {
    pub fn new(
        items: Vec<Item>,
        scans: Vec<Scan>,
        stats: Statistics,
        history: HashMap<i64, Vec<ItemHistoryEntry>>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut item_state = TableState::default();
        if !items.is_empty() {
            item_state.select(Some(0));
        }

        let mut scan_state = TableState::default();
        if !scans.is_empty() {
            scan_state.select(Some(0));
        }

        Self {
            items,
            scans,
            stats,
            history,
            now,
            item_state,
            scan_state,
            current_page: Page::Inventory,
            show_detail: false,
        }
    }

    /// Snapshot of everything the screens show; the TUI never writes
    pub fn load(conn: &Connection, now: DateTime<Utc>) -> Result<Self> {
        let items = db::get_current_inventory(conn)?;
        let scans = db::get_recent_scans(conn, SCAN_ROWS)?;
        let stats = db::get_statistics(conn, now)?;

        let mut history = HashMap::new();
        for item in &items {
            history.insert(item.id, db::get_item_history(conn, &item.name)?);
        }

        Ok(Self::new(items, scans, stats, history, now))
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_item(&self) -> Option<&Item> {
        self.item_state.selected().and_then(|i| self.items.get(i))
    }

    pub fn selected_history(&self) -> &[ItemHistoryEntry] {
        self.selected_item()
            .and_then(|item| self.history.get(&item.id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    /// Table state and row count for the visible page
    fn active_table(&mut self) -> Option<(&mut TableState, usize)> {
        match self.current_page {
            Page::Inventory => Some((&mut self.item_state, self.items.len())),
            Page::Scans => Some((&mut self.scan_state, self.scans.len())),
            Page::Statistics => None,
        }
    }

    pub fn next(&mut self) {
        if let Some((state, len)) = self.active_table() {
            if len == 0 {
                return;
            }
            let i = match state.selected() {
                Some(i) if i >= len - 1 => 0,
                Some(i) => i + 1,
                None => 0,
            };
            state.select(Some(i));
        }
    }

    pub fn previous(&mut self) {
        if let Some((state, len)) = self.active_table() {
            if len == 0 {
                return;
            }
            let i = match state.selected() {
                Some(0) => len - 1,
                Some(i) => i - 1,
                None => 0,
            };
            state.select(Some(i));
        }
    }

    pub fn page_down(&mut self) {
        if let Some((state, len)) = self.active_table() {
            if len == 0 {
                return;
            }
            let i = state.selected().map_or(0, |i| (i + PAGE_JUMP).min(len - 1));
            state.select(Some(i));
        }
    }

    pub fn page_up(&mut self) {
        if let Some((state, len)) = self.active_table() {
            if len == 0 {
                return;
            }
            let i = state.selected().map_or(0, |i| i.saturating_sub(PAGE_JUMP));
            state.select(Some(i));
        }
    }

    pub fn first(&mut self) {
        if let Some((state, len)) = self.active_table() {
            if len > 0 {
                state.select(Some(0));
            }
        }
    }

    pub fn last(&mut self) {
        if let Some((state, len)) = self.active_table() {
            if len > 0 {
                state.select(Some(len - 1));
            }
        }
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter if app.current_page == Page::Inventory => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail && app.current_page == Page::Inventory {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);

        render_inventory(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        match app.current_page {
            Page::Inventory => render_inventory(f, chunks[1], app),
            Page::Scans => render_scans(f, chunks[1], app),
            Page::Statistics => render_statistics(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn header_cell(title: &str) -> Cell<'_> {
    Cell::from(title).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Inventory, Page::Scans, Page::Statistics];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Items: {}", app.stats.active_items),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Scans: {}", app.stats.total_scans),
        Style::default().fg(Color::Cyan),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("${:.4}", app.stats.total_api_cost),
        Style::default().fg(Color::Green),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Pantry Monitor "),
    );

    f.render_widget(header, area);
}

fn render_inventory(f: &mut Frame, area: Rect, app: &mut App) {
    let header = Row::new(["Name", "Qty", "Category", "First seen", "Last seen", "Days"].map(header_cell))
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let now = app.now;
    let rows = app.items.iter().map(|item| {
        let qty_color = if item.quantity > 1 { Color::Green } else { Color::White };
        Row::new(vec![
            Cell::from(truncate(&item.name, 40)),
            Cell::from(item.quantity.to_string()).style(Style::default().fg(qty_color)),
            Cell::from(item.category.clone().unwrap_or_else(|| "Uncategorized".to_string())),
            Cell::from(local_time(item.first_seen)),
            Cell::from(local_time(item.last_seen)),
            Cell::from(item.days_in_pantry(now).to_string()),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(42),
            Constraint::Length(5),
            Constraint::Length(16),
            Constraint::Length(17),
            Constraint::Length(17),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Current Inventory "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.item_state);
}

fn render_scans(f: &mut Frame, area: Rect, app: &mut App) {
    let header = Row::new(["#", "Scanned", "Cost", "Tokens in", "Tokens out", "Image"].map(header_cell))
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.scans.iter().map(|scan| {
        Row::new(vec![
            Cell::from(scan.id.to_string()),
            Cell::from(local_time(scan.scanned_at)),
            Cell::from(format!("${:.6}", scan.api_cost)).style(Style::default().fg(Color::Green)),
            Cell::from(scan.input_tokens.to_string()),
            Cell::from(scan.output_tokens.to_string()),
            Cell::from(scan.image_ref.clone().unwrap_or_default()),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(17),
            Constraint::Length(11),
            Constraint::Length(10),
            Constraint::Length(11),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Recent Scans "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.scan_state);
}

fn kind_color(kind: ChangeKind) -> Color {
    match kind {
        ChangeKind::Added => Color::Green,
        ChangeKind::Removed => Color::Red,
        ChangeKind::QuantityChanged => Color::Yellow,
    }
}

fn render_statistics(f: &mut Frame, area: Rect, app: &App) {
    let stats = &app.stats;
    let label = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);

    let mut content = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("  Total scans:       ", label),
            Span::raw(stats.total_scans.to_string()),
        ]),
        Line::from(vec![
            Span::styled("  Active items:      ", label),
            Span::raw(stats.active_items.to_string()),
        ]),
        Line::from(vec![
            Span::styled("  Total API cost:    ", label),
            Span::styled(format!("${:.6}", stats.total_api_cost), Style::default().fg(Color::Green)),
        ]),
        Line::from(vec![
            Span::styled("  Changes this week: ", label),
            Span::raw(stats.changes_last_week.to_string()),
        ]),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        Line::from(""),
        Line::from(Span::styled(
            "  LAST 7 DAYS",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )),
        Line::from(""),
    ];

    for kind in [ChangeKind::Added, ChangeKind::Removed, ChangeKind::QuantityChanged] {
        let count = stats.change_breakdown.get(kind.as_str()).copied().unwrap_or(0);
        content.push(Line::from(vec![
            Span::styled(format!("  {:<18} ", kind.as_str()), Style::default().fg(kind_color(kind))),
            Span::raw(count.to_string()),
        ]));
    }

    let panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Statistics "),
    );

    f.render_widget(panel, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let Some(item) = app.selected_item() else {
        let empty = Paragraph::new("  No item selected")
            .block(Block::default().borders(Borders::ALL).title(" Item Details "));
        f.render_widget(empty, area);
        return;
    };

    let label = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let mut content = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("  Name: ", label),
            Span::styled(wrap_text(&item.name, 35), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::styled("  Quantity: ", label),
            Span::raw(item.quantity.to_string()),
        ]),
        Line::from(vec![
            Span::styled("  In pantry: ", label),
            Span::raw(format!("{} days", item.days_in_pantry(app.now))),
        ]),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        Line::from(""),
        Line::from(Span::styled(
            "  HISTORY",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )),
        Line::from(""),
    ];

    let history = app.selected_history();
    if history.is_empty() {
        content.push(Line::from(Span::styled(
            "  (no recorded changes)",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for entry in history {
        content.push(Line::from(vec![
            Span::raw(format!("  {}  ", local_time(entry.scan_date))),
            Span::styled(entry.kind.as_str(), Style::default().fg(kind_color(entry.kind))),
        ]));
        if let Some(details) = &entry.details {
            content.push(Line::from(Span::styled(
                format!("    {}", truncate(details, 40)),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }
    }

    content.push(Line::from(""));
    content.push(Line::from(Span::styled(
        "  Press Enter to close",
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )));

    let detail_panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" Item Details "),
    );

    f.render_widget(detail_panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (selected, total) = match app.current_page {
        Page::Inventory => (app.item_state.selected(), app.items.len()),
        Page::Scans => (app.scan_state.selected(), app.scans.len()),
        Page::Statistics => (None, 0),
    };

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected.map(|i| i + 1).unwrap_or(0), total),
        Style::default().fg(Color::Cyan),
    )];

    let keys = [
        ("Enter", " Details | "),
        ("Tab", " Page | "),
        ("↑/↓", " Nav | "),
        ("PgUp/PgDn", " Fast | "),
    ];
    status_spans.push(Span::raw(" | "));
    for (key, action) in keys {
        status_spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(action));
    }
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn wrap_text(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if !current_line.is_empty() && current_line.chars().count() + word.chars().count() + 1 > width {
            lines.push(std::mem::take(&mut current_line));
        }
        if !current_line.is_empty() {
            current_line.push(' ');
        }
        current_line.push_str(word);
    }
    if !current_line.is_empty() {
        lines.push(current_line);
    }

    lines.join("\n  ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pantry_monitor::{InventoryReconciler, NewScan};
    use pantry_monitor::extractor::ChangeSet;

    fn loaded_app() -> App {
        let mut conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let now = Utc::now();
        InventoryReconciler::new()
            .record_comparison(
                &mut conn,
                &NewScan::default(),
                &ChangeSet {
                    added: vec!["Rice".to_string(), "Oats".to_string(), "Tea".to_string()],
                    ..Default::default()
                },
                now - Duration::days(2),
            )
            .unwrap();
        App::load(&conn, now).unwrap()
    }

    #[test]
    fn test_load_reads_inventory_and_history() {
        let app = loaded_app();

        assert_eq!(app.items.len(), 3);
        assert_eq!(app.items[0].name, "Oats", "ordered by name");
        assert_eq!(app.scans.len(), 1);
        assert_eq!(app.stats.active_items, 3);
        assert_eq!(app.selected_history().len(), 1);
        assert_eq!(app.selected_history()[0].kind, ChangeKind::Added);
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = loaded_app();

        app.previous();
        assert_eq!(app.item_state.selected(), Some(2));
        app.next();
        assert_eq!(app.item_state.selected(), Some(0));
        app.page_down();
        assert_eq!(app.item_state.selected(), Some(2));
        app.page_up();
        assert_eq!(app.item_state.selected(), Some(0));
    }

    #[test]
    fn test_navigation_follows_page() {
        let mut app = loaded_app();
        app.next_page();
        assert_eq!(app.current_page, Page::Scans);

        app.next();
        assert_eq!(app.scan_state.selected(), Some(0), "single scan stays selected");
        assert_eq!(app.item_state.selected(), Some(0));

        app.next_page();
        app.next_page();
        assert_eq!(app.current_page, Page::Inventory);
        app.previous_page();
        assert_eq!(app.current_page, Page::Statistics);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Café au lait pods", 8), "Café ...");
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("one two three", 7), "one two\n  three");
        assert_eq!(wrap_text("single", 3), "single");
    }
}
