//! Session control: the single active connection.
//!
//! A [`SessionController`] owns at most one connection at a time. It drives
//! the [`Negotiation`](crate::negotiate::Negotiation) machine from transport
//! events, enables the [`FrameWriter`](crate::writer::FrameWriter) once the
//! console is live, and reports everything the operator surface needs
//! through [`SessionObserver`] callbacks and [`Status`] labels.
//!
//! All mutation happens on the single context that feeds
//! [`SessionController::handle_event`], so the one-session invariant is the
//! only mutual exclusion required. Late callbacks for a previous target are
//! detected by comparing the event's peripheral against the active session
//! and dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::negotiate::{Action, ConsoleHandles, FailureReason, Mode, Negotiation, Outcome, Step};
use crate::transport::{Peripheral, PeripheralId, Transport, TransportEvent};
use crate::writer::{AckOutcome, FrameWriter, WriteDisposition};

/// Free-text status labels surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// No session.
    NotConnected,
    /// Connect requested, negotiation running.
    Connecting,
    /// Live console session with the named peripheral.
    Connected(String),
    /// Recovery (firmware-update only) session.
    RecoveryMode,
    /// Frames in flight; percentage acknowledged so far.
    Sending(u8),
    /// Set by an external firmware-upgrade collaborator.
    UpgradeAvailable,
    /// The peripheral exposes no service this tool understands.
    Unsupported,
    /// Connect or probe failure.
    Failed,
}

impl Status {
    /// The operator-facing "connected" predicate: a live console session or
    /// one with an upgrade offer pending.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_) | Self::UpgradeAvailable)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("Not connected"),
            Self::Connecting => f.write_str("Connecting..."),
            Self::Connected(name) => write!(f, "Connected {name}"),
            Self::RecoveryMode => f.write_str("Recovery mode"),
            Self::Sending(pct) => write!(f, "Sending...{pct}%"),
            Self::UpgradeAvailable => f.write_str("Upgrade available"),
            Self::Unsupported => f.write_str("Unsupported"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of the component that owns the active session.
///
/// Only the owner may disconnect implicitly on resignation, so one idle
/// view cannot tear down another view's live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Mint a fresh, process-unique token.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Presentation-layer hooks. All methods default to no-ops.
pub trait SessionObserver {
    /// The status label changed.
    fn on_status(&mut self, status: &Status) {
        let _ = status;
    }

    /// A connect attempt concluded.
    fn on_connect_complete(&mut self, success: bool) {
        let _ = success;
    }

    /// Inbound console data (already past the veto filter).
    fn on_data(&mut self, data: &[u8]) {
        let _ = data;
    }

    /// A reboot command is about to disconnect the session.
    fn on_reboot(&mut self) {}

    /// The session ended (requested or not).
    fn on_disconnected(&mut self) {}
}

/// No-op observer used until the presentation layer installs one.
struct NullObserver;

impl SessionObserver for NullObserver {}

/// Veto predicate over inbound notifications; return `false` to suppress
/// the data from the operator surface.
pub type NotifyFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

struct ActiveSession {
    peripheral: Peripheral,
    owner: OwnerToken,
    negotiation: Negotiation,
    writer: FrameWriter,
    handles: Option<ConsoleHandles>,
}

/// Owns the single active session and the wiring between negotiation, the
/// frame writer and the transport.
pub struct SessionController<T: Transport> {
    transport: T,
    observer: Box<dyn SessionObserver>,
    notify_filter: Option<NotifyFilter>,
    status: Status,
    session: Option<ActiveSession>,
    pending: Option<(Peripheral, OwnerToken)>,
}

impl<T: Transport> SessionController<T> {
    /// Create a controller over the given transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            observer: Box::new(NullObserver),
            notify_filter: None,
            status: Status::NotConnected,
            session: None,
            pending: None,
        }
    }

    /// Install the presentation-layer observer.
    pub fn set_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observer = observer;
    }

    /// Install or clear the inbound-notification veto predicate.
    pub fn set_notify_filter(&mut self, filter: Option<NotifyFilter>) {
        self.notify_filter = filter;
    }

    /// Current status label.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// The operator-facing connected predicate.
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Negotiated mode of the active session.
    pub fn mode(&self) -> Mode {
        self.session
            .as_ref()
            .map_or(Mode::None, |s| s.negotiation.mode())
    }

    /// The active session's peripheral, if any.
    pub fn current(&self) -> Option<&Peripheral> {
        self.session.as_ref().map(|s| &s.peripheral)
    }

    /// Connect to `peripheral`, tearing down any existing session first.
    ///
    /// When a session is active the old link is disconnected and the new
    /// connect is issued only once the transport confirms the teardown;
    /// connect attempts never interleave. A reconnect while that teardown
    /// is still outstanding retargets the queued connect.
    pub fn connect(&mut self, peripheral: &Peripheral, owner: OwnerToken) -> Result<()> {
        if let Some(old) = self.session.take() {
            info!(
                "replacing session {} with {}",
                old.peripheral.name, peripheral.name
            );
            self.pending = Some((peripheral.clone(), owner));
            self.set_status(Status::NotConnected);
            return self.transport.disconnect(&old.peripheral.id);
        }
        if let Some((queued, _)) = &self.pending {
            info!(
                "retargeting queued connect from {} to {}",
                queued.name, peripheral.name
            );
            self.pending = Some((peripheral.clone(), owner));
            return Ok(());
        }
        self.begin_connect(peripheral.clone(), owner)
    }

    /// Disconnect the active session, if any.
    ///
    /// Session state clears immediately, so re-entrant calls are no-ops;
    /// the observer's `on_disconnected` fires once the transport confirms.
    pub fn disconnect(&mut self) -> Result<()> {
        self.pending = None;
        match self.session.take() {
            Some(old) => {
                self.set_status(Status::NotConnected);
                self.transport.disconnect(&old.peripheral.id)
            },
            None => {
                self.observer.on_disconnected();
                Ok(())
            },
        }
    }

    /// Disconnect only if `owner` owns the active session.
    ///
    /// Called when an owning component resigns (loses focus, shuts down).
    pub fn resign(&mut self, owner: OwnerToken) -> Result<()> {
        match &self.session {
            Some(session) if session.owner == owner => self.disconnect(),
            _ => Ok(()),
        }
    }

    /// Frame `text` and write it to the console output characteristic.
    ///
    /// Rejected unless the session negotiated console mode.
    pub fn write(&mut self, text: &str) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        let handles = match session.negotiation.mode() {
            Mode::Console => session.handles.ok_or(Error::NotConnected)?,
            Mode::Recovery => return Err(Error::RecoveryMode),
            Mode::None => return Err(Error::NotConnected),
        };

        let id = session.peripheral.id.clone();
        let transport = &mut self.transport;
        let disposition = session.writer.write(text, &mut |frame| {
            transport.write_characteristic(&id, handles.output, frame)
        })?;

        if disposition == WriteDisposition::RebootNow {
            // Interactive reboot with nothing in flight: disconnect now.
            self.observer.on_reboot();
            self.disconnect()?;
        }
        Ok(())
    }

    /// Mark the session as having a firmware upgrade offer pending.
    ///
    /// Called by the external upgrade collaborator; the upgrade itself is
    /// not this crate's business.
    pub fn mark_upgrade_available(&mut self) {
        if self.status.is_connected() {
            self.set_status(Status::UpgradeAvailable);
        }
    }

    /// Feed one transport completion event.
    ///
    /// Events for anything but the active session are discarded after the
    /// identity check (except the disconnect confirmation that releases a
    /// pending connect).
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        if let TransportEvent::Disconnected { id } = &event {
            return self.on_disconnected(id);
        }

        let Some(session) = self.session.as_mut() else {
            debug!("stale event dropped (no session): {event:?}");
            return Ok(());
        };
        if *event.peripheral() != session.peripheral.id {
            debug!(
                "stale event for {} dropped (active: {})",
                event.peripheral(),
                session.peripheral.id
            );
            return Ok(());
        }

        match event {
            TransportEvent::ConnectResult { success, .. } => {
                let step = session.negotiation.on_connect_result(success);
                self.apply_step(step)
            },
            TransportEvent::ServicesDiscovered { services, .. } => {
                let step = session.negotiation.on_services(&services);
                self.apply_step(step)
            },
            TransportEvent::CharacteristicRead { value, .. } => {
                let step = session.negotiation.on_read(value.as_deref());
                self.apply_step(step)
            },
            TransportEvent::WriteAcknowledged { .. } => self.on_write_ack(),
            TransportEvent::Notification { handle, data, .. } => {
                let is_input = session
                    .handles
                    .is_some_and(|handles| handles.input == handle);
                if is_input {
                    let display = self
                        .notify_filter
                        .as_mut()
                        .is_none_or(|filter| filter(&data));
                    if display {
                        self.observer.on_data(&data);
                    }
                }
                Ok(())
            },
            TransportEvent::Disconnected { .. } => unreachable!("handled above"),
        }
    }

    fn begin_connect(&mut self, peripheral: Peripheral, owner: OwnerToken) -> Result<()> {
        self.set_status(Status::Connecting);
        let mut session = ActiveSession {
            peripheral,
            owner,
            negotiation: Negotiation::new(),
            writer: FrameWriter::new(),
            handles: None,
        };
        let step = session.negotiation.begin();
        self.session = Some(session);
        self.apply_step(step)
    }

    fn on_disconnected(&mut self, id: &PeripheralId) -> Result<()> {
        if let Some(session) = &self.session {
            if session.peripheral.id == *id {
                // Unrequested drop of the live session.
                warn!("session to {} dropped", session.peripheral.name);
                self.session = None;
                self.set_status(Status::NotConnected);
                self.observer.on_disconnected();
                return Ok(());
            }
            debug!("stale disconnect for {id} dropped");
            return Ok(());
        }

        if let Some((peripheral, owner)) = self.pending.take() {
            // Teardown of the previous target confirmed; start the queued
            // connect.
            return self.begin_connect(peripheral, owner);
        }

        self.observer.on_disconnected();
        Ok(())
    }

    fn on_write_ack(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.negotiation.mode() != Mode::Console {
            // Recovery-mode writes belong to the upgrade collaborator.
            return Ok(());
        }

        match session.writer.on_ack() {
            AckOutcome::Progress(pct) => {
                self.set_status(Status::Sending(pct));
                Ok(())
            },
            AckOutcome::Settled => {
                let name = session.peripheral.name.clone();
                self.set_status(Status::Connected(name));
                Ok(())
            },
            AckOutcome::Reboot => {
                // Everything queued ahead of the reboot frame is confirmed
                // delivered; cut the link before its own ack arrives.
                self.observer.on_reboot();
                self.disconnect()
            },
        }
    }

    fn apply_step(&mut self, step: Step) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let id = session.peripheral.id.clone();
        let name = session.peripheral.name.clone();

        for action in &step.actions {
            match action {
                Action::Connect => self.transport.connect(&id)?,
                Action::DiscoverServices => self.transport.discover_services(&id)?,
                Action::Read(handle) => self.transport.read_characteristic(&id, *handle)?,
                Action::Subscribe(handle) => self.transport.subscribe(&id, *handle)?,
                Action::Disconnect => self.transport.disconnect(&id)?,
            }
        }

        match step.outcome {
            None => Ok(()),
            Some(Outcome::Console(handles)) => {
                if let Some(session) = self.session.as_mut() {
                    session.handles = Some(handles);
                }
                self.set_status(Status::Connected(name));
                self.observer.on_connect_complete(true);
                Ok(())
            },
            Some(Outcome::Recovery) => {
                self.set_status(Status::RecoveryMode);
                self.observer.on_connect_complete(true);
                Ok(())
            },
            Some(Outcome::Failed(reason)) => {
                self.session = None;
                self.pending = None;
                let status = match reason {
                    FailureReason::Unsupported => Status::Unsupported,
                    FailureReason::Connect | FailureReason::Probe => Status::Failed,
                };
                self.set_status(status);
                self.observer.on_connect_complete(false);
                Ok(())
            },
        }
    }

    fn set_status(&mut self, status: Status) {
        if self.status != status {
            debug!("status: {status}");
            self.status = status;
            self.observer.on_status(&self.status);
        }
    }
}
