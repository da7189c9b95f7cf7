//! # bbconsole
//!
//! A library for talking to BLE line-console devices (BlueBasic and
//! BlueBattery families).
//!
//! This crate provides the host-side core for discovering, connecting to and
//! exchanging text with a console peripheral, including:
//!
//! - Presence tracking over scan sightings (liveness window, name filter)
//! - Connection negotiation (console probe, recovery-mode fallback)
//! - Output framing with reboot sequencing against write acknowledgements
//! - A single-session controller with status reporting
//!
//! ## Design
//!
//! The core is transport-agnostic and synchronous: it issues operations
//! through the [`Transport`] trait and consumes [`TransportEvent`]
//! completions on one logical context. BLE stacks, async runtimes and
//! terminals live in the embedding application, which implements
//! [`Transport`] and pumps events into the [`SessionController`].
//!
//! ## Features
//!
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use bbconsole::{OwnerToken, Peripheral, PeripheralId, SessionController};
//! # use bbconsole::{Handle, Result, Transport};
//! # struct MyTransport;
//! # impl Transport for MyTransport {
//! #     fn connect(&mut self, _: &PeripheralId) -> Result<()> { Ok(()) }
//! #     fn discover_services(&mut self, _: &PeripheralId) -> Result<()> { Ok(()) }
//! #     fn read_characteristic(&mut self, _: &PeripheralId, _: Handle) -> Result<()> { Ok(()) }
//! #     fn write_characteristic(&mut self, _: &PeripheralId, _: Handle, _: &[u8]) -> Result<()> { Ok(()) }
//! #     fn subscribe(&mut self, _: &PeripheralId, _: Handle) -> Result<()> { Ok(()) }
//! #     fn disconnect(&mut self, _: &PeripheralId) -> Result<()> { Ok(()) }
//! # }
//! # fn next_event() -> Option<bbconsole::TransportEvent> { None }
//!
//! fn main() -> Result<()> {
//!     let mut session = SessionController::new(MyTransport);
//!     let owner = OwnerToken::new();
//!
//!     let device = Peripheral {
//!         id: PeripheralId::new("hci0/dev_AA_BB_CC_DD_EE_FF"),
//!         name: "BASIC#AA:BB".to_string(),
//!         rssi: -52,
//!     };
//!     session.connect(&device, owner)?;
//!
//!     // Pump transport completions until the session settles.
//!     while let Some(event) = next_event() {
//!         session.handle_event(event)?;
//!         if session.is_connected() {
//!             session.write("list\n")?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod negotiate;
pub mod presence;
pub mod session;
pub mod transport;
pub mod uuids;
pub mod writer;

// Re-exports for convenience
pub use {
    error::{Error, Result},
    negotiate::{ConsoleHandles, FailureReason, Mode, Negotiation, Outcome, Phase},
    presence::{
        DEFAULT_LIVENESS_WINDOW, DEFAULT_NAME_PREFIXES, PresenceTracker, default_name_filter,
        signal_bars,
    },
    session::{OwnerToken, SessionController, SessionObserver, Status},
    transport::{Handle, Peripheral, PeripheralId, ServiceMap, Transport, TransportEvent},
    writer::{AckOutcome, FRAME_CAPACITY, FrameWriter, WriteDisposition},
};
