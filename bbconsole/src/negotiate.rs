//! Connection negotiation state machine.
//!
//! After a connect request, a peripheral is driven through capability
//! discovery to one of three terminal states: console-ready, recovery-ready
//! (bootloader, firmware-update service only) or failed. The machine is an
//! explicit phase enum plus event methods; it performs no I/O itself.
//! Each event returns the [`Action`]s the caller must issue on the
//! transport, so cancellation is structural: drop the machine and no
//! further actions can be produced.
//!
//! A device can expose the console service and still be stuck in its
//! bootloader. The probe step distinguishes the two with a one-shot read of
//! the input characteristic: a live console has data there, a stuck one
//! does not.

use log::debug;

use crate::transport::{Handle, ServiceMap};
use crate::uuids;

/// Negotiated session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// No mode negotiated (yet).
    #[default]
    None,
    /// Line console is live; text I/O enabled.
    Console,
    /// Only the firmware-update service is available.
    Recovery,
}

/// Console characteristic handles captured during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleHandles {
    /// Device-to-host (notify/read) characteristic.
    pub input: Handle,
    /// Host-to-device (write-with-response) characteristic.
    pub output: Handle,
}

/// Why negotiation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The transport could not bring the link up.
    Connect,
    /// Neither the console nor the firmware-update service is present, or
    /// the console service is missing a required characteristic.
    Unsupported,
    /// The console probe returned no data and there is no firmware-update
    /// service to fall back to.
    Probe,
}

/// Negotiation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No connect requested yet.
    Idle,
    /// Waiting for the transport connect result.
    Connecting,
    /// Waiting for the service list.
    DiscoveringServices,
    /// Waiting for the one-shot probe read of the input characteristic.
    ProbingConsole,
    /// Terminal: live console.
    ConsoleReady,
    /// Terminal: firmware-update (recovery) mode.
    RecoveryReady,
    /// Terminal: negotiation failed.
    Failed(FailureReason),
}

/// Transport operations the caller must issue after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Request the connection.
    Connect,
    /// Request service discovery.
    DiscoverServices,
    /// Issue the one-shot probe read.
    Read(Handle),
    /// Subscribe to console input notifications.
    Subscribe(Handle),
    /// Tear the connection down.
    Disconnect,
}

/// Terminal result of a negotiation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Console mode reached; text I/O may start.
    Console(ConsoleHandles),
    /// Recovery mode reached; only the firmware-update collaborator may act.
    Recovery,
    /// Negotiation failed.
    Failed(FailureReason),
}

/// Result of feeding one event into the machine: actions to issue, plus the
/// terminal outcome once one is reached.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Step {
    /// Transport operations to issue, in order.
    pub actions: Vec<Action>,
    /// Terminal outcome, if this event concluded the negotiation.
    pub outcome: Option<Outcome>,
}

impl Step {
    fn none() -> Self {
        Self::default()
    }

    fn actions(actions: Vec<Action>) -> Self {
        Self {
            actions,
            outcome: None,
        }
    }

    fn done(actions: Vec<Action>, outcome: Outcome) -> Self {
        Self {
            actions,
            outcome: Some(outcome),
        }
    }
}

/// The capability-discovery state machine for a single peripheral.
#[derive(Debug)]
pub struct Negotiation {
    phase: Phase,
    console: Option<ConsoleHandles>,
    oad_present: bool,
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiation {
    /// Create a machine in [`Phase::Idle`].
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            console: None,
            oad_present: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Negotiated mode, [`Mode::None`] until a terminal success.
    pub fn mode(&self) -> Mode {
        match self.phase {
            Phase::ConsoleReady => Mode::Console,
            Phase::RecoveryReady => Mode::Recovery,
            _ => Mode::None,
        }
    }

    /// Console handles, present once console mode is reached.
    pub fn console_handles(&self) -> Option<ConsoleHandles> {
        match self.phase {
            Phase::ConsoleReady => self.console,
            _ => None,
        }
    }

    /// Start the run: request the transport connect.
    pub fn begin(&mut self) -> Step {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Connecting;
                Step::actions(vec![Action::Connect])
            },
            _ => {
                debug!("negotiation: begin() in {:?} ignored", self.phase);
                Step::none()
            },
        }
    }

    /// Feed the transport connect result.
    pub fn on_connect_result(&mut self, success: bool) -> Step {
        match self.phase {
            Phase::Connecting if success => {
                self.phase = Phase::DiscoveringServices;
                Step::actions(vec![Action::DiscoverServices])
            },
            Phase::Connecting => self.fail(FailureReason::Connect, false),
            _ => self.ignore("connect result"),
        }
    }

    /// Feed the discovered service list.
    ///
    /// Decision order: console service first (probe it), else the
    /// firmware-update service (recovery), else unsupported.
    pub fn on_services(&mut self, services: &ServiceMap) -> Step {
        if self.phase != Phase::DiscoveringServices {
            return self.ignore("service list");
        }

        self.oad_present = services.contains_key(&uuids::OAD_SERVICE);

        if let Some(chars) = services.get(&uuids::CONSOLE_SERVICE) {
            let input = chars.get(&uuids::INPUT_CHARACTERISTIC);
            let output = chars.get(&uuids::OUTPUT_CHARACTERISTIC);
            match (input, output) {
                (Some(&input), Some(&output)) => {
                    self.console = Some(ConsoleHandles { input, output });
                    self.phase = Phase::ProbingConsole;
                    Step::actions(vec![Action::Read(input)])
                },
                _ => {
                    debug!("negotiation: console service missing characteristics");
                    self.fail(FailureReason::Unsupported, true)
                },
            }
        } else if self.oad_present {
            self.phase = Phase::RecoveryReady;
            Step::done(Vec::new(), Outcome::Recovery)
        } else {
            self.fail(FailureReason::Unsupported, true)
        }
    }

    /// Feed the probe read result. An empty value counts as no data.
    pub fn on_read(&mut self, value: Option<&[u8]>) -> Step {
        if self.phase != Phase::ProbingConsole {
            return self.ignore("probe read");
        }

        match (value, self.console) {
            (Some(data), Some(handles)) if !data.is_empty() => {
                self.phase = Phase::ConsoleReady;
                Step::done(
                    vec![Action::Subscribe(handles.input)],
                    Outcome::Console(handles),
                )
            },
            (_, _) if self.oad_present => {
                // The console service exists but the firmware never booted;
                // fall back to recovery mode.
                self.phase = Phase::RecoveryReady;
                Step::done(Vec::new(), Outcome::Recovery)
            },
            (_, _) => self.fail(FailureReason::Probe, true),
        }
    }

    fn fail(&mut self, reason: FailureReason, teardown: bool) -> Step {
        self.phase = Phase::Failed(reason);
        let actions = if teardown {
            vec![Action::Disconnect]
        } else {
            Vec::new()
        };
        Step::done(actions, Outcome::Failed(reason))
    }

    fn ignore(&self, what: &str) -> Step {
        debug!("negotiation: late {} in {:?} ignored", what, self.phase);
        Step::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Handle;
    use std::collections::BTreeMap;

    fn service_map(services: &[(uuid::Uuid, &[(uuid::Uuid, Handle)])]) -> ServiceMap {
        services
            .iter()
            .map(|(svc, chars)| (*svc, chars.iter().copied().collect::<BTreeMap<_, _>>()))
            .collect()
    }

    fn console_map(with_oad: bool) -> ServiceMap {
        let mut services = vec![(
            uuids::CONSOLE_SERVICE,
            &[
                (uuids::INPUT_CHARACTERISTIC, Handle(1)),
                (uuids::OUTPUT_CHARACTERISTIC, Handle(2)),
            ][..],
        )];
        if with_oad {
            services.push((uuids::OAD_SERVICE, &[][..]));
        }
        service_map(&services)
    }

    fn started() -> Negotiation {
        let mut n = Negotiation::new();
        assert_eq!(n.begin().actions, vec![Action::Connect]);
        n
    }

    #[test]
    fn test_connect_failure_terminates_without_teardown() {
        let mut n = started();
        let step = n.on_connect_result(false);
        assert_eq!(step.outcome, Some(Outcome::Failed(FailureReason::Connect)));
        assert!(step.actions.is_empty());
        assert_eq!(n.phase(), Phase::Failed(FailureReason::Connect));
    }

    #[test]
    fn test_live_console_reaches_console_ready() {
        let mut n = started();
        let step = n.on_connect_result(true);
        assert_eq!(step.actions, vec![Action::DiscoverServices]);

        let step = n.on_services(&console_map(false));
        assert_eq!(step.actions, vec![Action::Read(Handle(1))]);
        assert_eq!(n.phase(), Phase::ProbingConsole);

        let step = n.on_read(Some(b"OK\n"));
        assert_eq!(step.actions, vec![Action::Subscribe(Handle(1))]);
        assert_eq!(
            step.outcome,
            Some(Outcome::Console(ConsoleHandles {
                input: Handle(1),
                output: Handle(2),
            }))
        );
        assert_eq!(n.mode(), Mode::Console);
        assert!(n.console_handles().is_some());
    }

    #[test]
    fn test_oad_only_goes_straight_to_recovery_without_probe() {
        let mut n = started();
        n.on_connect_result(true);

        let step = n.on_services(&service_map(&[(uuids::OAD_SERVICE, &[][..])]));
        assert_eq!(step.outcome, Some(Outcome::Recovery));
        // Recovery is decided from the service list alone; no read issued.
        assert!(step.actions.is_empty());
        assert_eq!(n.phase(), Phase::RecoveryReady);
        assert_eq!(n.mode(), Mode::Recovery);
    }

    #[test]
    fn test_empty_probe_with_oad_falls_back_to_recovery() {
        let mut n = started();
        n.on_connect_result(true);
        n.on_services(&console_map(true));

        let step = n.on_read(None);
        assert_eq!(step.outcome, Some(Outcome::Recovery));
        assert!(step.actions.is_empty());
        assert_eq!(n.phase(), Phase::RecoveryReady);
    }

    #[test]
    fn test_empty_probe_without_oad_fails_and_tears_down() {
        let mut n = started();
        n.on_connect_result(true);
        n.on_services(&console_map(false));

        let step = n.on_read(None);
        assert_eq!(step.outcome, Some(Outcome::Failed(FailureReason::Probe)));
        assert_eq!(step.actions, vec![Action::Disconnect]);
    }

    #[test]
    fn test_zero_length_probe_counts_as_no_data() {
        let mut n = started();
        n.on_connect_result(true);
        n.on_services(&console_map(true));

        let step = n.on_read(Some(b""));
        assert_eq!(step.outcome, Some(Outcome::Recovery));
    }

    #[test]
    fn test_neither_service_is_unsupported() {
        let mut n = started();
        n.on_connect_result(true);

        let step = n.on_services(&service_map(&[(uuids::DEVICE_INFO_SERVICE, &[][..])]));
        assert_eq!(
            step.outcome,
            Some(Outcome::Failed(FailureReason::Unsupported))
        );
        assert_eq!(step.actions, vec![Action::Disconnect]);
    }

    #[test]
    fn test_console_service_missing_characteristic_is_unsupported() {
        let mut n = started();
        n.on_connect_result(true);

        let map = service_map(&[(
            uuids::CONSOLE_SERVICE,
            &[(uuids::INPUT_CHARACTERISTIC, Handle(1))][..],
        )]);
        let step = n.on_services(&map);
        assert_eq!(
            step.outcome,
            Some(Outcome::Failed(FailureReason::Unsupported))
        );
    }

    #[test]
    fn test_out_of_phase_events_are_ignored() {
        let mut n = started();
        // Service list before the connect result: dropped.
        assert_eq!(n.on_services(&console_map(false)), Step::default());
        // Probe read before any services: dropped.
        assert_eq!(n.on_read(Some(b"x")), Step::default());
        assert_eq!(n.phase(), Phase::Connecting);
    }
}
