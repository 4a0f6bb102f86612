mod app;

use std::io;
use std::time::{Duration, Instant};

use app::{format_metric, format_num, format_pct, format_usd, truncate, AppState, ConnectionStatus};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let _ = dotenvy::dotenv();
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut table_state = TableState::default();
    table_state.select(None);

    let result = run_loop(&mut terminal, &mut app, &client, &mut table_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    table_state: &mut TableState,
) -> io::Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| render(f, app, table_state))?;

        let timeout = REFRESH_INTERVAL.checked_sub(last_tick.elapsed()).unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = Instant::now();
                        }
                        KeyCode::Tab => {
                            app.next_metric();
                            table_state.select(None);
                            app.refresh(client).await;
                            last_tick = Instant::now();
                        }
                        KeyCode::Enter => {
                            if let Some(id) = table_state.selected().and_then(|i| app.player_at(i)) {
                                app.fetch_detail(client, id).await;
                            }
                        }
                        KeyCode::Esc => app.close_detail(),
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.rankings.len().saturating_sub(1);
                            let next = table_state.selected().map_or(0, |i| (i + 1).min(max));
                            table_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = table_state.selected().map_or(0, |i| i.saturating_sub(1));
                            table_state.select(Some(prev));
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= REFRESH_INTERVAL {
            app.refresh(client).await;
            last_tick = Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, table_state: &mut TableState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    render_body(f, app, table_state, chunks[1]);
    render_footer(f, app, chunks[2]);
}

fn title(text: String) -> Span<'static> {
    Span::styled(text, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
}

fn bordered<'a>(title_text: String) -> Block<'a> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title(title_text))
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let mut spans = vec![
        title(" TP Dashboard  ".to_string()),
        Span::styled(status_text, Style::default().fg(status_color)),
    ];
    if let Some(s) = &app.summary {
        for text in [
            format!("{} players", s.players),
            format!("{} total cap", format_usd(Some(s.total_market_cap))),
            format!("{:.0} TP", s.total_tp),
        ] {
            spans.push(Span::raw("  │  "));
            spans.push(Span::styled(text, Style::default().fg(Color::White)));
        }
    }
    if let Some(sync) = app.health.as_ref().and_then(|h| h.last_price_sync) {
        spans.push(Span::raw("  │  "));
        spans.push(Span::styled(
            format!("prices @ {}", sync.format("%H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let paragraph = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)));
    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, table_state: &mut TableState, area: Rect) {
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    render_rankings_table(f, app, table_state, halves[0]);
    render_detail(f, app, halves[1]);
}

fn header_row(labels: &[&'static str]) -> Row<'static> {
    Row::new(
        labels
            .iter()
            .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))),
    )
    .height(1)
}

fn render_rankings_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let rows: Vec<Row> = app
        .rankings
        .iter()
        .map(|r| {
            let s = &r.summary;
            let change_color = match s.price_change_pct {
                Some(c) if c > 0.0 => Color::Green,
                Some(c) if c < 0.0 => Color::Red,
                _ => Color::DarkGray,
            };
            Row::new(vec![
                Cell::from(r.rank.to_string()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(truncate(&s.display_name, 22)),
                Cell::from(s.team.clone().unwrap_or_default()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(format_usd(s.latest_price)),
                Cell::from(format_pct(s.price_change_pct)).style(Style::default().fg(change_color)),
                Cell::from(format_metric(app.metric, r.value)).style(Style::default().fg(Color::Cyan)),
            ])
        })
        .collect();

    let metric_label = app.metric.to_string();
    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Min(12),
            Constraint::Length(5),
            Constraint::Length(9),
            Constraint::Length(8),
            Constraint::Length(12),
        ],
    )
    .header(header_row(&["#", "Player", "Team", "Price", "Δ", "Value"]))
    .block(bordered(format!(" RANKINGS: {} ", metric_label.to_uppercase())))
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, state);
}

fn render_detail(f: &mut Frame, app: &AppState, area: Rect) {
    let Some(detail) = &app.detail else {
        let hint = Paragraph::new(Line::from(Span::styled(
            " Select a player and press Enter",
            Style::default().fg(Color::DarkGray),
        )))
        .block(bordered(" PLAYER ".to_string()));
        f.render_widget(hint, area);
        return;
    };

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(area);

    let s = &detail.summary;
    let label = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let lines = vec![
        Line::from(vec![
            label("Price "),
            Span::raw(format_usd(s.latest_price)),
            Span::raw("   "),
            label("Cap "),
            Span::raw(format_usd(s.market_cap)),
            Span::raw("   "),
            label("Holders "),
            Span::raw(s.holders.map_or("—".to_string(), |h| h.to_string())),
        ]),
        Line::from(vec![
            label("Change "),
            Span::raw(format_pct(s.price_change_pct)),
            Span::raw("   "),
            label("Volatility "),
            Span::raw(format_num(s.volatility, 2)),
        ]),
        Line::from(vec![
            label("Matches "),
            Span::raw(s.matches.to_string()),
            Span::raw("   "),
            label("TP rate "),
            Span::raw(format!("{:.1}%", s.tp_rate)),
            Span::raw("   "),
            label("Total TP "),
            Span::raw(format!("{:.1}", s.total_tp)),
        ]),
        Line::from(vec![
            label("Avg score "),
            Span::raw(format_num(s.average_score, 1)),
            Span::raw("   "),
            label("Best rank "),
            Span::raw(s.best_ranking.map_or("—".to_string(), |r| r.to_string())),
            Span::raw("   "),
            label("TP/$ "),
            Span::raw(format_num(s.tp_per_dollar, 1)),
        ]),
        Line::from(vec![label("Price samples "), Span::raw(detail.prices.len().to_string())]),
    ];
    let name = format!(
        " {} ({}) ",
        detail.player.display_name,
        detail.player.position.as_deref().unwrap_or("?")
    );
    f.render_widget(Paragraph::new(lines).block(bordered(name)), parts[0]);

    // Most recent matches first, with the running TP total alongside.
    let rows: Vec<Row> = detail
        .performance
        .iter()
        .zip(detail.cumulative_tp.iter())
        .rev()
        .map(|(p, c)| {
            Row::new(vec![
                Cell::from(p.match_date.format("%Y-%m-%d").to_string()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(format_num(p.raw_score, 1)),
                Cell::from(p.ranking.map_or("—".to_string(), |r| r.to_string())),
                Cell::from(format_num(p.reward, 1)).style(Style::default().fg(Color::Green)),
                Cell::from(format!("{:.1}", c.cumulative_tp)).style(Style::default().fg(Color::Cyan)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(7),
            Constraint::Length(5),
            Constraint::Length(7),
            Constraint::Min(7),
        ],
    )
    .header(header_row(&["Date", "Score", "Rank", "TP", "Cum."]))
    .block(bordered(" RECENT MATCHES ".to_string()));

    f.render_widget(table, parts[1]);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let mut spans = vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("move  "),
        Span::styled("[Tab] ", Style::default().fg(Color::Yellow)),
        Span::raw("metric  "),
    ];
    if app.showing_detail() {
        spans.push(Span::styled("[Esc] ", Style::default().fg(Color::Yellow)));
        spans.push(Span::raw("close  "));
    } else {
        spans.push(Span::styled("[Enter] ", Style::default().fg(Color::Yellow)));
        spans.push(Span::raw("detail  "));
    }
    spans.push(Span::styled(
        format!("auto-refresh: {}s", REFRESH_INTERVAL.as_secs()),
        Style::default().fg(Color::DarkGray),
    ));

    f.render_widget(Paragraph::new(Line::from(spans)).style(Style::default().fg(Color::White)), area);
}
