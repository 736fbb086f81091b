use std::error::Error;
use std::fs::File;
use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use candle_sync::window::pointer_fraction;
use candle_sync::{
    ApiClient, Candle, ConnectionState, DebugInfo, Indicator, Interval, LiquidationLevel,
    LiquidationSnapshot, PriceWindow, SubscriptionKey, SymbolCatalog, SyncConfig, SyncController,
};
use chrono::Utc;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, MouseEvent,
        MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Sparkline},
    Frame, Terminal,
};
use rustls::crypto::ring::default_provider;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Spread of the fallback price grid around the reference price
const GRID_SPREAD: f64 = 0.10;
const GRID_POINTS: usize = 151;
/// Fraction of the window span moved per arrow key
const PAN_STEP: f64 = 0.1;
const DRAW_INTERVAL: Duration = Duration::from_millis(50);
const WINDOW_CHANNEL_SIZE: usize = 8;

// ============================================================================
// STARTUP
// ============================================================================

/// Logs go to `CANDLE_SYNC_LOG` when set; otherwise nothing is installed so the
/// terminal stays clean.
fn init_logging() -> Result<(), Box<dyn Error>> {
    let Ok(path) = std::env::var("CANDLE_SYNC_LOG") else {
        return Ok(());
    };

    let file = File::create(&path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Initial subscription from `CANDLE_SYNC_SYMBOL`, `_INTERVAL`, `_LIMIT`, `_INDICATORS`
fn initial_key() -> SubscriptionKey {
    let symbol = env_or("CANDLE_SYNC_SYMBOL", "BTCUSDT").to_uppercase();
    let interval = env_or("CANDLE_SYNC_INTERVAL", "1h");
    let limit = env_or("CANDLE_SYNC_LIMIT", "300").parse().unwrap_or(300);

    let indicators = env_or("CANDLE_SYNC_INDICATORS", "")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            let indicator = Indicator::from_name(name);
            if indicator.is_none() {
                warn!(name, "unknown indicator, skipping");
            }
            indicator
        })
        .collect::<Vec<_>>();

    SubscriptionKey::new(symbol, interval.as_str(), limit).with_indicators(indicators)
}

/// Liquidation dataset from `CANDLE_SYNC_LIQUIDATION_FILE`, or an empty price
/// grid around the symbol's last price.
async fn load_window(
    api: &ApiClient,
    symbol: &str,
) -> Result<PriceWindow, Box<dyn Error + Send + Sync>> {
    let snapshot = match std::env::var("CANDLE_SYNC_LIQUIDATION_FILE") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<LiquidationSnapshot>(&raw)?
        }
        Err(_) => {
            let price = api.reference_price(symbol).await?;
            LiquidationSnapshot::price_grid(price, GRID_SPREAD, GRID_POINTS)
        }
    };
    Ok(PriceWindow::from_snapshot(snapshot)?)
}

// ============================================================================
// APP STATE
// ============================================================================

/// Finished background load of the liquidation window
#[derive(Debug)]
struct WindowLoad {
    symbol: String,
    result: Result<PriceWindow, String>,
}

struct App {
    controller: SyncController,
    api: ApiClient,
    catalog: SymbolCatalog,
    key: SubscriptionKey,
    window: Option<PriceWindow>,
    window_loading: bool,
    window_tx: mpsc::Sender<WindowLoad>,
    window_rx: mpsc::Receiver<WindowLoad>,
    /// Why the liquidation panel is empty, or the last action's outcome
    note: Option<String>,
    /// Where the liquidation panel was last drawn, for mouse hit-testing
    window_area: Rect,
}

impl App {
    fn intervals(&self) -> Vec<String> {
        if self.catalog.timeframes().is_empty() {
            Interval::KNOWN.iter().map(|i| i.to_string()).collect()
        } else {
            self.catalog
                .timeframes()
                .iter()
                .map(|tf| tf.interval.clone())
                .collect()
        }
    }

    fn activate(&mut self, key: SubscriptionKey) {
        match self.controller.activate(key.clone()) {
            Ok(mode) => {
                info!(%key, %mode, "subscription activated");
                self.key = key;
                self.note = None;
            }
            Err(error) => self.note = Some(error.to_string()),
        }
    }

    fn cycle_interval(&mut self, step: isize) {
        let intervals = self.intervals();
        let current = intervals
            .iter()
            .position(|i| i == self.key.interval.as_str())
            .unwrap_or(0);
        let next = cycle(current, intervals.len(), step);

        let mut key = self.key.clone();
        key.interval = Interval::new(intervals[next].as_str());
        self.activate(key);
    }

    fn cycle_symbol(&mut self, step: isize) {
        let symbols = self.catalog.symbols();
        if symbols.is_empty() {
            self.note = Some("symbol list unavailable".to_string());
            return;
        }
        let current = symbols
            .iter()
            .position(|s| s.as_str() == self.key.symbol.as_str())
            .unwrap_or(0);
        let symbol = symbols[cycle(current, symbols.len(), step)].clone();

        let mut key = self.key.clone();
        key.symbol = symbol.into();
        self.activate(key);
        self.reload_window();
    }

    /// Fetch the liquidation window off the input loop; see [`App::drain_window_loads`]
    fn reload_window(&mut self) {
        let api = self.api.clone();
        let symbol = self.key.symbol.to_string();
        let window_tx = self.window_tx.clone();
        self.window_loading = true;

        tokio::spawn(async move {
            let result = load_window(&api, &symbol)
                .await
                .map_err(|error| error.to_string());
            let _ = window_tx.send(WindowLoad { symbol, result }).await;
        });
    }

    fn drain_window_loads(&mut self) {
        while let Ok(load) = self.window_rx.try_recv() {
            if load.symbol != self.key.symbol.as_str() {
                debug!(symbol = %load.symbol, "discarding window load for previous symbol");
                continue;
            }

            self.window_loading = false;
            match load.result {
                Ok(window) => self.window = Some(window),
                Err(error) => {
                    warn!(%error, "liquidation window unavailable");
                    self.window = None;
                    self.note = Some(format!("liquidation window: {error}"));
                }
            }
        }
    }

    fn on_mouse(&mut self, mouse: MouseEvent) {
        let delta_y = match mouse.kind {
            MouseEventKind::ScrollUp => -1.0,
            MouseEventKind::ScrollDown => 1.0,
            _ => return,
        };
        let area = inner(self.window_area);
        if !area.contains(Position::new(mouse.column, mouse.row)) {
            return;
        }
        if let Some(window) = self.window.as_mut() {
            // top row is the highest price
            let from_bottom = area.height - 1 - (mouse.row - area.y);
            let fraction = pointer_fraction(from_bottom, area.height);
            window.wheel(fraction, delta_y);
        }
    }

    /// Returns false when the app should quit
    fn on_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Tab | KeyCode::Char(']') => self.cycle_interval(1),
            KeyCode::BackTab | KeyCode::Char('[') => self.cycle_interval(-1),
            KeyCode::Char('n') => self.cycle_symbol(1),
            KeyCode::Char('p') => self.cycle_symbol(-1),
            KeyCode::Char('r') => self.activate(self.key.clone()),
            KeyCode::Char('d') => {
                self.controller.deactivate();
                self.note = Some("sync paused, press r to resume".to_string());
            }
            KeyCode::Char('l') => self.reload_window(),
            KeyCode::Up => self.pan(PAN_STEP),
            KeyCode::Down => self.pan(-PAN_STEP),
            KeyCode::Char('+') | KeyCode::Char('=') => self.zoom_center(-1.0),
            KeyCode::Char('-') => self.zoom_center(1.0),
            _ => {}
        }
        true
    }

    fn pan(&mut self, fraction: f64) {
        if let Some(window) = self.window.as_mut() {
            window.pan(fraction);
        }
    }

    fn zoom_center(&mut self, delta_y: f64) {
        if let Some(window) = self.window.as_mut() {
            window.wheel(0.5, delta_y);
        }
    }
}

fn cycle(current: usize, len: usize, step: isize) -> usize {
    (current as isize + step).rem_euclid(len.max(1) as isize) as usize
}

fn inner(area: Rect) -> Rect {
    Block::default().borders(Borders::ALL).inner(area)
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging()?;

    let controller = SyncController::from_config(SyncConfig::from_env()?);
    let api = ApiClient::from_config(controller.config());

    let mut catalog = SymbolCatalog::new();
    if let Err(error) = catalog.ensure_loaded(&api).await {
        warn!(%error, "symbol catalog unavailable");
    }

    let key = initial_key();
    let (window_tx, window_rx) = mpsc::channel(WINDOW_CHANNEL_SIZE);
    let mut app = App {
        controller,
        api,
        catalog,
        key: key.clone(),
        window: None,
        window_loading: false,
        window_tx,
        window_rx,
        note: None,
        window_area: Rect::default(),
    };
    app.activate(key);
    app.reload_window();

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app).await;

    app.controller.deactivate();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn Error>> {
    let mut last_draw = Instant::now() - DRAW_INTERVAL;

    loop {
        if event::poll(Duration::from_millis(5))? {
            match event::read()? {
                Event::Key(key) => {
                    if !app.on_key(key) {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => app.on_mouse(mouse),
                _ => {}
            }
        }

        app.drain_window_loads();

        if last_draw.elapsed() >= DRAW_INTERVAL {
            let info = app.controller.debug_info();
            let candles = app.controller.reader().tail(200);
            terminal.draw(|f| render_ui(f, app, &info, &candles))?;
            last_draw = Instant::now();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// RENDER
// ============================================================================

fn render_ui(f: &mut Frame, app: &mut App, info: &DebugInfo, candles: &[Candle]) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Body
            Constraint::Length(3), // Help
        ])
        .split(f.area());

    render_header(f, rows[0], info);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[1]);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(9), // Debug
            Constraint::Length(5), // Close sparkline
            Constraint::Min(5),    // Candle tail
        ])
        .split(body[0]);

    render_debug(f, left[0], info, app.note.as_deref());
    render_sparkline(f, left[1], candles);
    render_candles(f, left[2], candles);

    app.window_area = body[1];
    render_liquidation(f, body[1], app.window.as_ref(), app.window_loading);

    render_help(f, rows[2]);
}

fn panel(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
}

fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::Disconnected => Color::DarkGray,
        ConnectionState::Error => Color::Red,
    }
}

fn render_header(f: &mut Frame, area: Rect, info: &DebugInfo) {
    let key = info
        .subscription_key
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    let mode = info
        .transport_mode
        .map(|mode| mode.to_string())
        .unwrap_or_else(|| "idle".to_string());

    let unlisted = info
        .subscription_key
        .as_ref()
        .is_some_and(|key| !key.interval.is_known());

    let mut spans = vec![
        Span::styled("CANDLE SYNC ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!("{key}  ")),
        Span::styled(
            format!("● {}", info.connection_state),
            Style::default().fg(state_color(info.connection_state)),
        ),
        Span::raw(format!("  via {mode}  {}", Utc::now().format("%H:%M:%S UTC"))),
    ];
    if unlisted {
        spans.push(Span::styled(
            "  unlisted interval",
            Style::default().fg(Color::Yellow),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)).block(panel("Status")), area);
}

fn render_debug(f: &mut Frame, area: Rect, info: &DebugInfo, note: Option<&str>) {
    let label = Style::default().fg(Color::DarkGray);
    let field = |name: &'static str, value: String| {
        Line::from(vec![Span::styled(format!("{name:<12}"), label), Span::raw(value)])
    };

    let mut lines = vec![
        field("api base", info.api_base.to_string()),
        field("state", info.connection_state.to_string()),
        field(
            "transport",
            info.transport_mode
                .map(|mode| mode.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        field("candles", info.candle_count.to_string()),
        field(
            "last error",
            info.last_error.clone().unwrap_or_else(|| "-".to_string()),
        ),
    ];
    if let Some(note) = note {
        lines.push(Line::from(Span::styled(
            note.to_string(),
            Style::default().fg(Color::Yellow),
        )));
    }

    f.render_widget(Paragraph::new(lines).block(panel("Debug")), area);
}

fn render_sparkline(f: &mut Frame, area: Rect, candles: &[Candle]) {
    let width = inner(area).width as usize;
    let closes: Vec<f64> = candles
        .iter()
        .rev()
        .take(width)
        .rev()
        .map(|c| c.close)
        .collect();

    let (min, max) = closes
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| (lo.min(*c), hi.max(*c)));
    let span = (max - min).max(f64::EPSILON);
    let sparkline_data: Vec<u64> = closes
        .iter()
        .map(|c| (((c - min) / span) * 100.0).round() as u64 + 1)
        .collect();

    let sparkline = Sparkline::default()
        .block(panel("Close"))
        .data(&sparkline_data)
        .style(Style::default().fg(Color::Rgb(100, 149, 237)))
        .max(101);
    f.render_widget(sparkline, area);
}

fn render_candles(f: &mut Frame, area: Rect, candles: &[Candle]) {
    let visible = inner(area).height.saturating_sub(1) as usize;
    let header = Line::from(Span::styled(
        format!(
            "{:<12} {:>11} {:>11} {:>11} {:>11} {:>12}  {}",
            "time", "open", "high", "low", "close", "volume", "indicators"
        ),
        Style::default().fg(Color::DarkGray),
    ));

    let mut lines = vec![header];
    lines.extend(candles.iter().rev().take(visible).map(|candle| {
        let time = candle
            .time_utc()
            .map(|t| t.format("%m-%d %H:%M").to_string())
            .unwrap_or_else(|| candle.time.to_string());
        let color = if candle.close >= candle.open {
            Color::Green
        } else {
            Color::Red
        };
        let indicators = candle
            .indicators
            .iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| format!("{name}={v:.2}")))
            .take(3)
            .collect::<Vec<_>>()
            .join(" ");

        Line::from(vec![
            Span::raw(format!("{time:<12} ")),
            Span::styled(
                format!(
                    "{:>11.2} {:>11.2} {:>11.2} {:>11.2}",
                    candle.open, candle.high, candle.low, candle.close
                ),
                Style::default().fg(color),
            ),
            Span::raw(format!(" {:>12.2}  {indicators}", candle.volume)),
        ])
    }));

    f.render_widget(Paragraph::new(lines).block(panel("Candles (newest first)")), area);
}

/// Levels inside the window bucketed into one row per price slice, top row highest
fn render_liquidation(f: &mut Frame, area: Rect, window: Option<&PriceWindow>, loading: bool) {
    let Some(window) = window else {
        let text = if loading {
            "loading liquidation data..."
        } else {
            "no liquidation data (press l to reload)"
        };
        let message = Paragraph::new(text)
            .style(Style::default().fg(Color::DarkGray))
            .block(panel("Liquidations"));
        f.render_widget(message, area);
        return;
    };

    let range = window.range();
    let title = format!(
        "Liquidations {:.2} - {:.2}  scale x{:.1}",
        range.min_price,
        range.max_price,
        window.display_scale()
    );
    let area_inner = inner(area);
    let rows = area_inner.height.max(1) as usize;
    let bucket_span = range.span() / rows as f64;

    let mut buckets = vec![0.0f64; rows];
    for level in window.visible_levels() {
        let from_top = ((range.max_price - level.price) / bucket_span) as usize;
        buckets[from_top.min(rows - 1)] += level_volume(level);
    }
    let peak = buckets.iter().copied().fold(0.0, f64::max).max(f64::EPSILON);
    let reference_row = (((range.max_price - window.reference()) / bucket_span) as usize).min(rows - 1);

    let label_width = 12usize;
    let bar_width = (area_inner.width as usize).saturating_sub(label_width + 1);
    let lines: Vec<Line> = buckets
        .iter()
        .enumerate()
        .map(|(row, volume)| {
            let price = range.max_price - (row as f64 + 0.5) * bucket_span;
            let filled = ((volume / peak) * bar_width as f64).round() as usize;
            let style = if row == reference_row {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Magenta)
            };
            Line::from(vec![
                Span::styled(format!("{price:>label_width$.2} "), style),
                Span::styled("█".repeat(filled), style),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(lines).block(panel(&title)), area);
}

fn level_volume(level: &LiquidationLevel) -> f64 {
    if level.total > 0.0 {
        level.total
    } else {
        level.exchange_total()
    }
}

fn render_help(f: &mut Frame, area: Rect) {
    let help = "q quit  tab/[ ] interval  n/p symbol  r reconnect  d pause  \
                wheel/+/- zoom  ↑/↓ pan  l reload liquidations";
    f.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(Color::DarkGray))
            .block(panel("Keys")),
        area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(symbol: &str) -> App {
        let config = SyncConfig::default();
        let api = ApiClient::from_config(&config);
        let (window_tx, window_rx) = mpsc::channel(WINDOW_CHANNEL_SIZE);
        App {
            controller: SyncController::from_config(config),
            api,
            catalog: SymbolCatalog::new(),
            key: SubscriptionKey::new(symbol, "1h", 100),
            window: None,
            window_loading: true,
            window_tx,
            window_rx,
            note: None,
            window_area: Rect::default(),
        }
    }

    fn grid(reference: f64) -> PriceWindow {
        PriceWindow::from_snapshot(LiquidationSnapshot::price_grid(reference, 0.1, 11)).unwrap()
    }

    #[test]
    fn test_window_load_for_previous_symbol_is_dropped() {
        let mut app = app("ETHUSDT");

        app.window_tx
            .try_send(WindowLoad {
                symbol: "BTCUSDT".to_string(),
                result: Ok(grid(60_000.0)),
            })
            .unwrap();
        app.drain_window_loads();
        assert!(app.window.is_none());
        assert!(app.window_loading);

        app.window_tx
            .try_send(WindowLoad {
                symbol: "ETHUSDT".to_string(),
                result: Ok(grid(3_000.0)),
            })
            .unwrap();
        app.drain_window_loads();
        assert_eq!(app.window.as_ref().map(PriceWindow::reference), Some(3_000.0));
        assert!(!app.window_loading);
    }

    #[test]
    fn test_window_load_failure_is_noted() {
        let mut app = app("ETHUSDT");
        app.window = Some(grid(3_000.0));

        app.window_tx
            .try_send(WindowLoad {
                symbol: "ETHUSDT".to_string(),
                result: Err("HTTP 404: unknown symbol".to_string()),
            })
            .unwrap();
        app.drain_window_loads();

        assert!(app.window.is_none());
        assert_eq!(
            app.note.as_deref(),
            Some("liquidation window: HTTP 404: unknown symbol")
        );
    }

    #[test]
    fn test_cycle_wraps_both_ways() {
        assert_eq!(cycle(0, 3, -1), 2);
        assert_eq!(cycle(2, 3, 1), 0);
        assert_eq!(cycle(0, 0, 1), 0);
    }
}
