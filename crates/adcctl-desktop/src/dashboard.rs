use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use adcctl_core::{
    AdcController, AdcError, Attenuation, Channel, ChannelAccumulator, ChannelMask,
    ContinuousRequest, SessionKind,
};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{Level, LevelFilter, Metadata, Record};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};

use crate::sim_hal::SimulatedAdc;

type Controller = AdcController<SimulatedAdc>;

const INPUT_STEP_MV: u32 = 50;
const INPUT_MAX_MV: u32 = 3300;
const ONESHOT_SAMPLES: u32 = 16;
const TIME_CRITICAL_SAMPLES: u32 = 4;
const STREAM_SAMPLES_PER_CHANNEL: u32 = 32;
const STREAM_RATE_HZ: u32 = 20_000;
const MAX_LOGS: usize = 100;

static STREAM_ACCUMULATOR: ChannelAccumulator = ChannelAccumulator::new();

fn on_stream_frame(frame: &[u8]) -> bool {
    STREAM_ACCUMULATOR.accumulate(frame);
    false
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

// Extension trait for log::Level to provide UI rendering methods
trait LevelExt {
    fn color(&self) -> Color;
    fn prefix(&self) -> &str;
}

impl LevelExt for Level {
    fn color(&self) -> Color {
        match *self {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Cyan,
            Level::Debug => Color::Gray,
            Level::Trace => Color::DarkGray,
        }
    }

    fn prefix(&self) -> &str {
        match *self {
            Level::Error => "[ERROR]",
            Level::Warn => "[WARN] ",
            Level::Info => "[INFO] ",
            Level::Debug => "[DEBUG]",
            Level::Trace => "[TRACE]",
        }
    }
}

// Logger implementation that sends logs to the dashboard
pub struct TuiLogger {
    tx: Sender<LogEntry>,
    max_level: LevelFilter,
}

impl log::Log for TuiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let entry = LogEntry {
                level: record.level(),
                message: format!("{}", record.args()),
            };
            // Ignore send errors (dashboard might have shut down)
            let _ = self.tx.send(entry);
        }
    }

    fn flush(&self) {}
}

/// Install the dashboard logger; returns the receiving end of its log feed.
pub fn init_logging(max_level: LevelFilter) -> Receiver<LogEntry> {
    let (tx, rx) = channel();
    if log::set_boxed_logger(Box::new(TuiLogger { tx, max_level })).is_ok() {
        log::set_max_level(max_level);
    }
    rx
}

/// Readings last taken for one channel.
#[derive(Clone, Copy, Debug, Default)]
struct ChannelReadout {
    oneshot_mv: Option<u16>,
    stream_mv: Option<u16>,
    time_critical_raw: Option<u16>,
}

struct Dashboard<'a> {
    controller: &'a Controller,
    logs: Vec<LogEntry>,
    rx: Receiver<LogEntry>,
    selected: usize,
    attenuation: Attenuation,
    stream_mask: ChannelMask,
    streaming: Option<ChannelMask>,
    time_critical: Option<Channel>,
    readouts: [ChannelReadout; Channel::ALL.len()],
    should_quit: bool,
}

impl<'a> Dashboard<'a> {
    fn new(controller: &'a Controller, rx: Receiver<LogEntry>) -> Self {
        Self {
            controller,
            logs: Vec::new(),
            rx,
            selected: 0,
            attenuation: Attenuation::default(),
            stream_mask: [Channel::Ch0, Channel::Ch1].into_iter().collect(),
            streaming: None,
            time_critical: None,
            readouts: Default::default(),
            should_quit: false,
        }
    }

    fn selected_channel(&self) -> Channel {
        Channel::ALL[self.selected]
    }

    fn collect_messages(&mut self) {
        while let Ok(entry) = self.rx.try_recv() {
            self.logs.push(entry);
            if self.logs.len() > MAX_LOGS {
                self.logs.remove(0);
            }
        }
    }

    fn adjust_input(&mut self, increase: bool) {
        let channel = self.selected_channel();
        let adc = self.controller.hal();
        let mv = adc.input_mv(channel);
        let mv = if increase {
            (mv + INPUT_STEP_MV).min(INPUT_MAX_MV)
        } else {
            mv.saturating_sub(INPUT_STEP_MV)
        };
        adc.set_input_mv(channel, mv);
    }

    fn cycle_attenuation(&mut self) {
        self.attenuation = match self.attenuation {
            Attenuation::Db0 => Attenuation::Db2_5,
            Attenuation::Db2_5 => Attenuation::Db6,
            Attenuation::Db6 => Attenuation::Db12,
            Attenuation::Db12 => Attenuation::Db0,
        };
        log::info!("Attenuation set to {:?}", self.attenuation);
    }

    fn toggle_in_mask(&mut self) {
        let channel = self.selected_channel();
        self.stream_mask = if self.stream_mask.contains(channel) {
            self.stream_mask.without(channel)
        } else {
            self.stream_mask.with(channel)
        };
    }

    fn sample_selected(&mut self) -> Result<(), AdcError> {
        let channel = self.selected_channel();
        let raw = self
            .controller
            .sample_once(channel, self.attenuation, ONESHOT_SAMPLES)?;
        let mut samples = [raw];
        self.controller
            .calibrate(channel, self.attenuation, &mut samples)?;
        log::info!("{}: raw {} -> {} mV", channel, raw, samples[0]);
        self.readouts[self.selected].oneshot_mv = Some(samples[0]);
        Ok(())
    }

    fn toggle_stream(&mut self) -> Result<(), AdcError> {
        if let Some(mask) = self.streaming.take() {
            return self.controller.stop_continuous(mask);
        }
        let request = ContinuousRequest {
            channel_mask: self.stream_mask,
            attenuation: self.attenuation,
            samples_per_channel: STREAM_SAMPLES_PER_CHANNEL,
            sample_rate_hz: STREAM_RATE_HZ,
            frame_callback: Some(on_stream_frame),
        };
        STREAM_ACCUMULATOR.reset();
        self.controller.start_continuous(&request)?;
        self.streaming = Some(self.stream_mask);
        Ok(())
    }

    fn toggle_time_critical(&mut self) -> Result<(), AdcError> {
        if let Some(channel) = self.time_critical.take() {
            return self.controller.release_time_critical(channel);
        }
        let channel = self.selected_channel();
        self.controller
            .setup_time_critical(channel, self.attenuation)?;
        self.time_critical = Some(channel);
        Ok(())
    }

    fn reinit(&mut self) -> Result<(), AdcError> {
        self.streaming = None;
        self.time_critical = None;
        self.controller.reinit()
    }

    /// Pull fresh values from whichever session is live.
    fn tick(&mut self) -> Result<(), AdcError> {
        if let Some(mask) = self.streaming {
            for channel in mask.iter() {
                if let Some(raw) = STREAM_ACCUMULATOR.take_average(channel) {
                    let mut samples = [raw];
                    self.controller
                        .calibrate(channel, self.attenuation, &mut samples)?;
                    self.readouts[channel.index() as usize].stream_mv = Some(samples[0]);
                }
            }
        }
        if let Some(channel) = self.time_critical {
            let raw = self
                .controller
                .sample_time_critical(channel, TIME_CRITICAL_SAMPLES)?;
            self.readouts[channel.index() as usize].time_critical_raw = Some(raw);
        }
        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> Result<(), AdcError> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                log::info!("Ctrl+C pressed, shutting down");
                self.should_quit = true;
            }
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => self.selected = (self.selected + 1).min(Channel::ALL.len() - 1),
            KeyCode::Left | KeyCode::Char('-') => self.adjust_input(false),
            KeyCode::Right | KeyCode::Char('+') | KeyCode::Char('=') => self.adjust_input(true),
            KeyCode::Char(' ') => self.toggle_in_mask(),
            KeyCode::Char('a') => self.cycle_attenuation(),
            KeyCode::Char('s') => self.sample_selected()?,
            KeyCode::Char('c') => self.toggle_stream()?,
            KeyCode::Char('t') => self.toggle_time_critical()?,
            KeyCode::Char('f') => {
                log::warn!("Next hardware call will fail");
                self.controller.hal().inject_fault();
            }
            KeyCode::Char('r') => self.reinit()?,
            _ => {}
        }
        Ok(())
    }

    fn report(&mut self, result: Result<(), AdcError>) {
        let Err(e) = result else {
            return;
        };
        if e.requires_reinit() {
            log::error!("{} (press R to re-initialize)", e);
        } else {
            log::warn!("{}", e);
        }
    }
}

/// Run the dashboard on the calling thread until the user quits.
pub fn run(controller: &Controller, rx: Receiver<LogEntry>) -> Result<(), io::Error> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut dashboard = Dashboard::new(controller, rx);
    log::info!("ADC dashboard started");

    while !dashboard.should_quit {
        dashboard.collect_messages();
        let result = dashboard.tick();
        dashboard.report(result);

        terminal.draw(|f| ui(f, &dashboard))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                let result = dashboard.handle_key(key.code, key.modifiers);
                dashboard.report(result);
            }
        }
    }

    // Leave the unit idle
    let _ = controller.reinit();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

fn ui(f: &mut Frame, state: &Dashboard) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                               // Status
            Constraint::Length(Channel::ALL.len() as u16 + 2),   // Channels
            Constraint::Min(6),                                  // Logs
            Constraint::Length(3),                               // Help
        ])
        .split(f.area());

    render_status(f, chunks[0], state);
    render_channels(f, chunks[1], state);
    render_logs(f, chunks[2], state);

    let help = Paragraph::new(
        "↑/↓: Channel | ←/→: Input | Space: Stream mask | A: Atten | S: One-shot | C: Stream | T: Time-critical | F: Fault | R: Reinit | Q: Quit",
    )
    .style(Style::default().fg(Color::Gray))
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, chunks[3]);
}

fn render_status(f: &mut Frame, area: Rect, state: &Dashboard) {
    let snapshot = state.controller.snapshot();
    let slot = state.controller.frame_slot();
    let session = match snapshot.session {
        SessionKind::Idle => "idle".to_string(),
        SessionKind::Reserved => format!("reserved {}", snapshot.active_mask),
        SessionKind::OneShot => format!("one-shot {}", snapshot.active_mask),
        SessionKind::TimeCritical(channel) => format!("time-critical {}", channel),
        SessionKind::Continuous => format!("continuous {}", snapshot.active_mask),
    };
    let text = format!(
        "Session: {} | Attenuation: {:?} | Stream mask: {} | Frames: {} delivered, {} dropped",
        session,
        state.attenuation,
        state.stream_mask,
        slot.delivered_frames(),
        slot.dropped_frames()
    );
    let status = Paragraph::new(text)
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL).title("ADC1"));
    f.render_widget(status, area);
}

fn render_channels(f: &mut Frame, area: Rect, state: &Dashboard) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Channel inputs (adjust with ←/→ or +/-)");

    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Length(1); Channel::ALL.len()])
        .split(inner);

    let adc = state.controller.hal();
    for (i, channel) in Channel::ALL.iter().enumerate() {
        let style = if i == state.selected {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };

        let input = adc.input_mv(*channel);
        let readout = state.readouts[i];
        let marker = if state.stream_mask.contains(*channel) { "*" } else { " " };
        let label = format!(
            "{}{} in {:4} mV | one-shot {} | stream {} | tc {}",
            marker,
            channel,
            input,
            fmt_reading(readout.oneshot_mv, "mV"),
            fmt_reading(readout.stream_mv, "mV"),
            fmt_reading(readout.time_critical_raw, "raw"),
        );

        let gauge = Gauge::default()
            .gauge_style(style)
            .ratio((input as f64 / INPUT_MAX_MV as f64).clamp(0.0, 1.0))
            .label(label);

        f.render_widget(gauge, rows[i]);
    }
}

fn fmt_reading(value: Option<u16>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:4} {}", v, unit),
        None => "   -".to_string(),
    }
}

fn render_logs(f: &mut Frame, area: Rect, state: &Dashboard) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Logs (scrolls automatically)");

    let inner = block.inner(area);
    f.render_widget(block, area);

    // Show last N logs that fit in the area
    let max_logs = inner.height as usize;
    let start_idx = state.logs.len().saturating_sub(max_logs);

    let log_items: Vec<ListItem> = state.logs[start_idx..]
        .iter()
        .map(|log| {
            let content = Line::from(vec![
                Span::styled(log.level.prefix(), Style::default().fg(log.level.color())),
                Span::raw(" "),
                Span::raw(&log.message),
            ]);
            ListItem::new(content)
        })
        .collect();

    f.render_widget(List::new(log_items), inner);
}
