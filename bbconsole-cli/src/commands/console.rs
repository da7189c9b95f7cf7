//! Interactive console session command.
//!
//! Resolves the target peripheral (argument, config, or interactive pick),
//! drives a [`SessionController`] over the BLE transport, and bridges the
//! terminal: raw-mode keyboard input is accumulated into lines and written
//! through the session; inbound notifications go straight to stdout.

use std::cell::RefCell;
use std::io::{self, Write as _};
use std::rc::Rc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use dialoguer::{Confirm, Select};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

use bbconsole::{
    Error, Mode, OwnerToken, Peripheral, PresenceTracker, SessionController, SessionObserver,
    Status, default_name_filter,
};

use crate::ble::{self, BleNotice, BleTransport};
use crate::config::Config;
use crate::{Cli, was_interrupted};

/// How long to scan while resolving the connect target.
const RESOLVE_SCAN_TIME: Duration = Duration::from_secs(8);

/// How long to wait for negotiation to settle.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Default)]
struct ConsoleState {
    done: bool,
}

/// Observer printing session activity to the terminal.
///
/// Device output goes to stdout; status lines go to stderr. Send progress
/// is rendered as an indicatif bar instead of one status line per ack.
struct TerminalObserver {
    state: Rc<RefCell<ConsoleState>>,
    progress: Option<ProgressBar>,
    quiet: bool,
}

impl TerminalObserver {
    fn clear_progress(&mut self) {
        if let Some(bar) = self.progress.take() {
            bar.finish_and_clear();
        }
    }
}

impl SessionObserver for TerminalObserver {
    fn on_status(&mut self, status: &Status) {
        if let Status::Sending(pct) = status {
            let bar = self.progress.get_or_insert_with(new_progress_bar);
            bar.set_position(u64::from(*pct));
            return;
        }
        self.clear_progress();
        if !self.quiet {
            status_line(&status.to_string());
        }
    }

    fn on_data(&mut self, data: &[u8]) {
        // Raw mode needs explicit carriage returns.
        let text = String::from_utf8_lossy(data).replace('\n', "\r\n");
        print!("{text}");
        io::stdout().flush().ok();
    }

    fn on_reboot(&mut self) {
        self.clear_progress();
        status_line("Device rebooting, disconnecting from console");
    }

    fn on_disconnected(&mut self) {
        self.clear_progress();
        self.state.borrow_mut().done = true;
    }
}

fn new_progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}%")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    bar
}

/// Clear the current terminal line and print a dimmed status message.
fn status_line(message: &str) {
    eprint!("\r\x1b[2K{}\r\n", style(message).dim());
    io::stderr().flush().ok();
}

/// Run the interactive console session.
pub(crate) fn cmd_console(cli: &Cli, config: &mut Config) -> Result<()> {
    let (transport, notices) = ble::spawn()?;

    let requested = cli
        .device
        .clone()
        .or_else(|| config.connection.device.clone());
    let target = resolve_target(cli, &transport, &notices, requested.as_deref())?;

    if requested.is_none() && !cli.non_interactive {
        let remember = Confirm::new()
            .with_prompt(format!("Remember {} as the default device?", target.name))
            .default(false)
            .interact()
            .unwrap_or(false);
        if remember {
            config.remember_device(target.id.as_str())?;
        }
    }

    let state = Rc::new(RefCell::new(ConsoleState::default()));
    let mut session = SessionController::new(transport);
    session.set_observer(Box::new(TerminalObserver {
        state: Rc::clone(&state),
        progress: None,
        quiet: cli.quiet,
    }));

    session.connect(&target, OwnerToken::new())?;
    wait_for_session(&mut session, &notices, &state, &target)?;

    if session.mode() == Mode::Recovery {
        eprintln!(
            "{} {} is stuck in its bootloader; only a firmware re-flash can recover it.",
            style("⚠").yellow(),
            target.name
        );
        session.disconnect()?;
        drain_until_done(&mut session, &notices, &state);
        return Ok(());
    }

    if !cli.quiet {
        eprintln!(
            "{}",
            style("Type to send lines. .run and .stop are shortcuts; .quit exits.").dim()
        );
    }

    terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
    let _raw_guard = RawModeGuard;

    let mut line = String::new();
    loop {
        if state.borrow().done {
            break;
        }
        if was_interrupted() {
            session.disconnect()?;
        }
        pump(&mut session, &notices)?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent {
                code, modifiers, ..
            }) = event::read()?
            {
                match (code, modifiers) {
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                        session.disconnect()?;
                    },
                    (KeyCode::Enter, _) => {
                        print!("\r\n");
                        io::stdout().flush().ok();
                        let text = std::mem::take(&mut line);
                        submit(&mut session, &text);
                    },
                    (KeyCode::Backspace, _) => {
                        if line.pop().is_some() {
                            print!("\x08 \x08");
                            io::stdout().flush().ok();
                        }
                    },
                    (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                        line.push(c);
                        print!("{c}");
                        io::stdout().flush().ok();
                    },
                    _ => {},
                }
            }
        }
    }

    Ok(())
}

/// Dispatch one entered line through the session.
fn submit(session: &mut SessionController<BleTransport>, line: &str) {
    let text = match line.trim() {
        ".quit" | ".exit" => {
            let _ = session.disconnect();
            return;
        },
        ".run" => "run\n".to_string(),
        // The interpreter has no stop command; deleting line 1 is the
        // conventional way to halt a running program.
        ".stop" => "1\n".to_string(),
        _ => format!("{line}\n"),
    };
    match session.write(&text) {
        Ok(()) => {},
        Err(Error::Encoding) => status_line("line dropped: console text must be ASCII"),
        Err(e) => status_line(&format!("write failed: {e}")),
    }
}

/// Feed pending transport completions into the session without blocking.
fn pump(session: &mut SessionController<BleTransport>, notices: &Receiver<BleNotice>) -> Result<()> {
    loop {
        match notices.try_recv() {
            Ok(BleNotice::Transport(event)) => session.handle_event(event)?,
            Ok(BleNotice::Sighting(peripheral)) => {
                debug!("console: ignoring sighting of {}", peripheral.name);
            },
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Disconnected) => bail!("BLE worker stopped"),
        }
    }
}

/// Pump events until negotiation settles into console or recovery mode.
fn wait_for_session(
    session: &mut SessionController<BleTransport>,
    notices: &Receiver<BleNotice>,
    state: &Rc<RefCell<ConsoleState>>,
    target: &Peripheral,
) -> Result<()> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        if was_interrupted() {
            session.disconnect()?;
            bail!("interrupted");
        }
        if Instant::now() >= deadline {
            session.disconnect()?;
            bail!("timed out connecting to {}", target.name);
        }

        pump(session, notices)?;
        match session.status() {
            Status::Connected(_) => return Ok(()),
            Status::RecoveryMode => return Ok(()),
            Status::Unsupported => {
                return Err(Error::UnsupportedDevice(target.name.clone()).into());
            },
            Status::Failed => return Err(Error::ConnectFailed(target.name.clone()).into()),
            _ => {},
        }
        if state.borrow().done {
            bail!("connection to {} dropped during negotiation", target.name);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Pump remaining events until the disconnect confirmation lands.
fn drain_until_done(
    session: &mut SessionController<BleTransport>,
    notices: &Receiver<BleNotice>,
    state: &Rc<RefCell<ConsoleState>>,
) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !state.borrow().done && Instant::now() < deadline {
        if pump(session, notices).is_err() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Find the connect target: scan, match the request, or prompt the operator.
fn resolve_target(
    cli: &Cli,
    transport: &BleTransport,
    notices: &Receiver<BleNotice>,
    requested: Option<&str>,
) -> Result<Peripheral> {
    transport.start_scan()?;
    if !cli.quiet {
        match requested {
            Some(requested) => eprintln!(
                "{} Scanning for {}...",
                style("🔍").cyan(),
                style(requested).cyan()
            ),
            None => eprintln!("{} Scanning for console devices...", style("🔍").cyan()),
        }
    }

    let mut tracker = PresenceTracker::new();
    if requested.is_none() {
        tracker.set_filter(Some(Box::new(default_name_filter)));
    }

    let deadline = Instant::now() + RESOLVE_SCAN_TIME;
    let mut found = None;
    while Instant::now() < deadline {
        if was_interrupted() {
            let _ = transport.stop_scan();
            bail!("interrupted");
        }
        match notices.recv_timeout(Duration::from_millis(250)) {
            Ok(BleNotice::Sighting(peripheral)) => {
                let is_match = requested
                    .is_some_and(|r| peripheral.id.as_str() == r || peripheral.name == r);
                tracker.on_sighting(peripheral.clone());
                if is_match {
                    found = Some(peripheral);
                    break;
                }
            },
            Ok(BleNotice::Transport(event)) => debug!("resolve: ignoring {event:?}"),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => bail!("BLE worker stopped"),
        }
    }
    let _ = transport.stop_scan();

    if let Some(peripheral) = found {
        return Ok(peripheral);
    }
    if let Some(requested) = requested {
        bail!("device '{requested}' not found");
    }

    let live = tracker.list();
    if live.is_empty() {
        bail!("no console devices found");
    }
    if cli.non_interactive {
        if live.len() == 1 {
            return Ok(live[0].clone());
        }
        bail!("multiple devices found; specify one with --device");
    }

    let items: Vec<String> = live
        .iter()
        .map(|p| format!("{}  {} dBm  {}", p.name, p.rssi, p.id))
        .collect();
    let selection = Select::new()
        .with_prompt("Select a device")
        .items(&items)
        .default(0)
        .interact()
        .context("device selection cancelled")?;
    Ok(live[selection].clone())
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}
