//! Live discovery listing command.
//!
//! Sightings flow into a [`PresenceTracker`]; the terminal listing is
//! redrawn whenever the live set changes and entries silently expire once
//! their liveness window lapses.

use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use console::{Term, style};
use log::trace;

use bbconsole::{Peripheral, PresenceTracker, default_name_filter, signal_bars};

use crate::ble::{self, BleNotice};
use crate::config::Config;
use crate::{Cli, was_interrupted};

/// Run the scan listing until Ctrl-C or the optional timeout.
pub(crate) fn cmd_scan(
    cli: &Cli,
    config: &Config,
    all: bool,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let (transport, notices) = ble::spawn()?;

    let mut tracker = PresenceTracker::new();
    if let Some(secs) = config.scan.window_secs {
        tracker = tracker.with_window(Duration::from_secs(secs));
    }
    if !(all || config.scan.show_all) {
        tracker.set_filter(Some(Box::new(default_name_filter)));
    }

    transport.start_scan()?;
    if !cli.quiet && !json {
        eprintln!(
            "{} Scanning for console devices... press Ctrl-C to stop",
            style("🔍").cyan()
        );
    }

    let deadline = timeout_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let term = Term::stderr();
    let mut drawn = 0usize;

    loop {
        if was_interrupted() {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        match notices.recv_timeout(Duration::from_millis(250)) {
            Ok(BleNotice::Sighting(peripheral)) => {
                let changed = tracker.on_sighting(peripheral);
                if changed && !json {
                    drawn = redraw(&term, &tracker.list(), drawn)?;
                }
            },
            Ok(BleNotice::Transport(event)) => {
                trace!("scan: ignoring transport event {event:?}");
            },
            Err(RecvTimeoutError::Timeout) => {
                // Liveness windows may have lapsed with no new sightings.
                let live = tracker.list();
                if !json && live.len() != drawn {
                    drawn = redraw(&term, &live, drawn)?;
                }
            },
            Err(RecvTimeoutError::Disconnected) => bail!("BLE worker stopped"),
        }
    }

    let _ = transport.stop_scan();

    if json {
        let listing: Vec<serde_json::Value> = tracker
            .list()
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id.as_str(),
                    "name": p.name,
                    "rssi": p.rssi,
                    "bars": signal_bars(p.rssi),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&listing).unwrap_or_default()
        );
    }

    Ok(())
}

/// Repaint the listing in place and return the number of lines drawn.
fn redraw(term: &Term, live: &[Peripheral], previous: usize) -> Result<usize> {
    term.clear_last_lines(previous)?;
    for peripheral in live {
        eprintln!(
            "  {} {:<24} {} {:>4} dBm  {}",
            style("•").green(),
            style(&peripheral.name).cyan(),
            bars_glyph(signal_bars(peripheral.rssi)),
            peripheral.rssi,
            style(peripheral.id.as_str()).dim()
        );
    }
    Ok(live.len())
}

/// Render 0..=5 signal bars as a fixed-width glyph.
fn bars_glyph(bars: u8) -> String {
    let filled = usize::from(bars.min(5));
    format!("[{}{}]", "#".repeat(filled), "-".repeat(5 - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bars_glyph_width_is_constant() {
        for bars in 0..=5u8 {
            assert_eq!(bars_glyph(bars).len(), 7);
        }
    }

    #[test]
    fn test_bars_glyph_extremes() {
        assert_eq!(bars_glyph(0), "[-----]");
        assert_eq!(bars_glyph(5), "[#####]");
        // Out-of-range input clamps instead of panicking.
        assert_eq!(bars_glyph(9), "[#####]");
    }
}
