use anyhow::Result;
use cashbacks::entities::ColorTheme;
use cashbacks::store::{CashbacksStore, Intent, Label, Page, SettingsRow, State};
use cashbacks::CashbackService;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io;

/// Colors for the current theme.
#[derive(Debug, Clone, Copy)]
struct Palette {
    accent: Color,
    text: Color,
    muted: Color,
    highlight_bg: Color,
    header_bg: Color,
}

impl Palette {
    fn for_settings(theme: ColorTheme, dynamic_color: bool) -> Self {
        let accent = if dynamic_color { Color::Magenta } else { Color::Cyan };
        match theme {
            ColorTheme::Light => Palette {
                accent,
                text: Color::Black,
                muted: Color::Gray,
                highlight_bg: Color::Gray,
                header_bg: Color::White,
            },
            ColorTheme::Dark | ColorTheme::System => Palette {
                accent,
                text: Color::White,
                muted: Color::DarkGray,
                highlight_bg: Color::DarkGray,
                header_bg: Color::DarkGray,
            },
        }
    }
}

pub fn run_ui(service: &CashbackService) -> Result<()> {
    let mut store = CashbacksStore::new();
    store.accept(service, Intent::Refresh);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut store, service);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    store: &mut CashbacksStore,
    service: &CashbackService,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, store.state()))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let Some(intent) = key_to_intent(store.state(), key) else {
                continue;
            };
            if let Some(Label::Quit) = store.accept(service, intent) {
                return Ok(());
            }
        }
    }
}

/// Map a key press to an intent given what the screen is showing.
fn key_to_intent(state: &State, key: KeyEvent) -> Option<Intent> {
    if state.pending_delete.is_some() {
        return match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Some(Intent::ConfirmDelete),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(Intent::CancelDelete),
            _ => None,
        };
    }

    if state.search.editing {
        return match key.code {
            KeyCode::Enter => Some(Intent::SubmitSearch),
            KeyCode::Esc => Some(Intent::ClearSearch),
            KeyCode::Backspace => Some(Intent::SearchBackspace),
            KeyCode::Char(c) => Some(Intent::SearchInput(c)),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char('q') => Some(Intent::Quit),
        KeyCode::Esc if state.search.applied.is_some() => Some(Intent::ClearSearch),
        KeyCode::Esc => Some(Intent::Quit),
        KeyCode::Tab if key.modifiers.contains(KeyModifiers::SHIFT) => Some(Intent::PreviousPage),
        KeyCode::Tab | KeyCode::Right => Some(Intent::NextPage),
        KeyCode::BackTab | KeyCode::Left => Some(Intent::PreviousPage),
        KeyCode::Down | KeyCode::Char('j') => Some(Intent::SelectNext),
        KeyCode::Up | KeyCode::Char('k') => Some(Intent::SelectPrevious),
        KeyCode::Char('/') => Some(Intent::StartSearch),
        KeyCode::Char('r') => Some(Intent::Refresh),
        KeyCode::Char('d') | KeyCode::Delete => Some(Intent::RequestDelete),
        KeyCode::Enter if state.page == Page::Settings => match state.selected_setting()? {
            SettingsRow::ColorTheme => Some(Intent::CycleTheme),
            SettingsRow::DynamicColor => Some(Intent::ToggleDynamicColor),
            SettingsRow::AutoDeleteExpired => Some(Intent::ToggleAutoDelete),
        },
        KeyCode::Enter => Some(Intent::ToggleDetail),
        KeyCode::Char('t') => Some(Intent::CycleTheme),
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &State) {
    let palette = Palette::for_settings(state.settings.color_theme, state.settings.dynamic_color);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Tabs
            Constraint::Min(0),    // Page
            Constraint::Length(3), // Search / status
        ])
        .split(f.size());

    render_header(f, chunks[0], state, palette);

    let detail_available = state.page != Page::Settings && state.row_count() > 0;
    if state.show_detail && detail_available {
        let content = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);
        render_page(f, content[0], state, palette);
        render_detail_panel(f, content[1], state, palette);
    } else {
        render_page(f, chunks[1], state, palette);
    }

    render_status_bar(f, chunks[2], state, palette);
}

fn render_header(f: &mut Frame, area: Rect, state: &State, palette: Palette) {
    let mut spans = vec![];
    for (i, page) in Page::ALL.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" │ "));
        }
        let style = if *page == state.page {
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(palette.muted)
        };
        spans.push(Span::styled(page.title(), style));
    }

    if let Some(query) = &state.search.applied {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(
            format!("Filter: \"{}\"", query),
            Style::default().fg(Color::Green),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.accent))
            .title(" Cashbacks "),
    );
    f.render_widget(header, area);
}

fn render_page(f: &mut Frame, area: Rect, state: &State, palette: Palette) {
    let today = chrono::Local::now().date_naive();

    let (headers, widths, rows): (Vec<&str>, Vec<Constraint>, Vec<Row>) = match state.page {
        Page::Cashbacks => (
            vec!["Owner", "Amount", "Card", "Period", "Comment"],
            vec![
                Constraint::Length(24),
                Constraint::Length(12),
                Constraint::Length(22),
                Constraint::Length(25),
                Constraint::Min(10),
            ],
            state
                .cashbacks
                .iter()
                .map(|details| {
                    let cb = &details.cashback;
                    let color = if cb.is_expired(today) { palette.muted } else { Color::Green };
                    Row::new(vec![
                        Cell::from(truncate(&details.owner_name, 22)),
                        Cell::from(cb.display_amount()).style(Style::default().fg(color)),
                        Cell::from(truncate(&details.card_name, 20)),
                        Cell::from(format_period(cb.start_date, cb.expiration_date)),
                        Cell::from(truncate(&cb.comment, 40)),
                    ])
                })
                .collect(),
        ),
        Page::Cards => (
            vec!["Name", "Number", "System", "Limit / month"],
            vec![
                Constraint::Length(24),
                Constraint::Length(16),
                Constraint::Length(18),
                Constraint::Min(10),
            ],
            state
                .cards
                .iter()
                .map(|card| {
                    Row::new(vec![
                        Cell::from(truncate(&card.name, 22)),
                        Cell::from(card.masked_number()),
                        Cell::from(card.payment_system.map(|p| p.as_str()).unwrap_or("-")),
                        Cell::from(
                            card.max_cashbacks_number
                                .map(|max| max.to_string())
                                .unwrap_or_else(|| "∞".to_string()),
                        ),
                    ])
                })
                .collect(),
        ),
        Page::Categories => (
            vec!["Name", "Shops", "Cashbacks"],
            vec![Constraint::Length(30), Constraint::Length(10), Constraint::Min(10)],
            state
                .categories
                .iter()
                .map(|category| {
                    Row::new(vec![
                        Cell::from(truncate(&category.name, 28)),
                        Cell::from(category.shops_count.to_string()),
                        Cell::from(category.cashbacks_count.to_string()),
                    ])
                })
                .collect(),
        ),
        Page::Shops => (
            vec!["Name", "Category", "Cashbacks"],
            vec![Constraint::Length(30), Constraint::Length(26), Constraint::Min(10)],
            state
                .shops
                .iter()
                .map(|shop| {
                    Row::new(vec![
                        Cell::from(truncate(&shop.name, 28)),
                        Cell::from(truncate(&shop.category_name, 24)),
                        Cell::from(shop.cashbacks_count.to_string()),
                    ])
                })
                .collect(),
        ),
        Page::Settings => (
            vec!["Setting", "Value"],
            vec![Constraint::Length(34), Constraint::Min(10)],
            SettingsRow::ALL
                .iter()
                .map(|row| {
                    let (name, value) = setting_line(*row, state);
                    Row::new(vec![Cell::from(name), Cell::from(value)])
                })
                .collect(),
        ),
    };

    let header = Row::new(headers.into_iter().map(|h| {
        Cell::from(h).style(Style::default().fg(palette.accent).add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().bg(palette.header_bg))
    .height(1);

    let title = format!(" {} ({}) ", state.page.title(), state.row_count());
    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.text))
                .title(title),
        )
        .highlight_style(
            Style::default()
                .bg(palette.highlight_bg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("→ ");

    let mut table_state = TableState::default();
    if state.row_count() > 0 {
        table_state.select(Some(state.selected));
    }
    f.render_stateful_widget(table, area, &mut table_state);
}

fn setting_line(row: SettingsRow, state: &State) -> (&'static str, String) {
    let on_off = |flag: bool| if flag { "On" } else { "Off" }.to_string();
    match row {
        SettingsRow::ColorTheme => ("Color theme", state.settings.color_theme.as_str().to_string()),
        SettingsRow::DynamicColor => ("Dynamic color", on_off(state.settings.dynamic_color)),
        SettingsRow::AutoDeleteExpired => (
            "Delete expired cashbacks automatically",
            on_off(state.settings.auto_delete_expired_cashbacks),
        ),
    }
}

fn render_detail_panel(f: &mut Frame, area: Rect, state: &State, palette: Palette) {
    let label = |text: &'static str| Span::styled(text, Style::default().fg(palette.accent));

    let lines: Vec<Line> = match state.page {
        Page::Cashbacks => match state.selected_cashback() {
            Some(details) => {
                let cb = &details.cashback;
                vec![
                    Line::from(vec![label(cb.owner.kind()), Span::raw(format!(": {}", details.owner_name))]),
                    Line::from(vec![label("Amount"), Span::raw(format!(": {}", cb.display_amount()))]),
                    Line::from(vec![
                        label("Card"),
                        Span::raw(format!(": {} {}", details.card_name, mask(&details.card_number))),
                    ]),
                    Line::from(vec![
                        label("Period"),
                        Span::raw(format!(": {}", format_period(cb.start_date, cb.expiration_date))),
                    ]),
                    Line::from(""),
                    Line::from(cb.comment.clone()),
                ]
            }
            None => vec![],
        },
        Page::Cards => match state.selected_card() {
            Some(card) => vec![
                Line::from(vec![label("Name"), Span::raw(format!(": {}", card.name))]),
                Line::from(vec![label("Number"), Span::raw(format!(": {}", card.masked_number()))]),
                Line::from(vec![label("Holder"), Span::raw(format!(": {}", card.holder))]),
                Line::from(vec![label("Valid thru"), Span::raw(format!(": {}", card.validity_period))]),
                Line::from(vec![
                    label("Payment system"),
                    Span::raw(format!(": {}", card.payment_system.map(|p| p.as_str()).unwrap_or("-"))),
                ]),
            ],
            None => vec![],
        },
        Page::Categories => match state.selected_category() {
            Some(category) => vec![
                Line::from(vec![label("Name"), Span::raw(format!(": {}", category.name))]),
                Line::from(vec![label("Shops"), Span::raw(format!(": {}", category.shops_count))]),
                Line::from(vec![label("Cashbacks"), Span::raw(format!(": {}", category.cashbacks_count))]),
            ],
            None => vec![],
        },
        Page::Shops => match state.selected_shop() {
            Some(shop) => vec![
                Line::from(vec![label("Name"), Span::raw(format!(": {}", shop.name))]),
                Line::from(vec![label("Category"), Span::raw(format!(": {}", shop.category_name))]),
                Line::from(vec![label("Cashbacks"), Span::raw(format!(": {}", shop.cashbacks_count))]),
            ],
            None => vec![],
        },
        Page::Settings => vec![],
    };

    let panel = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.accent))
            .title(" Details "),
    );
    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, state: &State, palette: Palette) {
    let key = |text: &'static str| Span::styled(text, Style::default().fg(Color::Yellow));

    let spans = if state.search.editing {
        vec![
            Span::styled(" Search: ", Style::default().fg(palette.accent)),
            Span::raw(format!("{}▏", state.search.input)),
            Span::raw("  "),
            key("Enter"),
            Span::raw(" apply | "),
            key("Esc"),
            Span::raw(" clear"),
        ]
    } else if let Some(message) = &state.last_message {
        vec![Span::styled(format!(" {}", message), Style::default().fg(palette.text))]
    } else {
        vec![
            Span::raw(" "),
            key("Tab"),
            Span::raw(" Page | "),
            key("↑/↓"),
            Span::raw(" Nav | "),
            key("Enter"),
            Span::raw(" Details | "),
            key("/"),
            Span::raw(" Search | "),
            key("d"),
            Span::raw(" Delete | "),
            Span::styled("q", Style::default().fg(Color::Red)),
            Span::raw(" Quit"),
        ]
    };

    let status = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.text)),
    );
    f.render_widget(status, area);
}

fn format_period(start: Option<chrono::NaiveDate>, end: Option<chrono::NaiveDate>) -> String {
    match (start, end) {
        (Some(s), Some(e)) => format!("{} – {}", s.format("%d.%m.%Y"), e.format("%d.%m.%Y")),
        (Some(s), None) => format!("from {}", s.format("%d.%m.%Y")),
        (None, Some(e)) => format!("until {}", e.format("%d.%m.%Y")),
        (None, None) => "always".to_string(),
    }
}

fn mask(number: &str) -> String {
    if number.len() < 4 {
        return String::new();
    }
    format!("•••• {}", &number[number.len() - 4..])
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
