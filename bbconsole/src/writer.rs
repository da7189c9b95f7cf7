//! Output framing for console writes.
//!
//! Operator text (typed or pasted) is split into bounded-size transport
//! frames and written with-response. The writer tracks how many frames are
//! in flight so the session can show send progress, and it watches for the
//! `reboot` command so the disconnect only fires once everything queued
//! ahead of it has been acknowledged.

use log::debug;

use crate::error::{Error, Result};

/// Wire frame capacity in encoded bytes.
pub const FRAME_CAPACITY: usize = 20;

/// Lines starting with this marker are dropped before framing.
const COMMENT_MARKER: &str = "//";

/// The exact frame content that schedules a device reboot.
///
/// Detection is by lower-cased equality against a single flushed frame.
/// A `reboot` that straddles a frame boundary (typed one keystroke past the
/// capacity, or with extra whitespace) is not recognized; devices in the
/// field depend on this rule, so it is preserved as-is.
const REBOOT_FRAME: &str = "reboot\n";

/// What a completed write burst scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Frames were queued (possibly none); nothing special scheduled.
    Queued,
    /// A reboot frame went out while earlier frames are still outstanding;
    /// the disconnect fires once those are acknowledged.
    RebootScheduled,
    /// A reboot frame went out with nothing else outstanding; disconnect
    /// immediately.
    RebootNow,
}

/// Outcome of processing one write acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Acknowledgements still outstanding; progress percentage so far.
    Progress(u8),
    /// Every queued frame is acknowledged; counters were reset.
    Settled,
    /// The scheduled reboot boundary was reached; disconnect now.
    Reboot,
}

enum Flushed {
    Plain,
    RebootScheduled,
    RebootNow,
}

/// Fragments text into transport frames and sequences reboots against
/// acknowledgements.
///
/// `queued` counts frames handed to the transport, `acked` frames the
/// peripheral confirmed. `acked <= queued` always holds; when they meet,
/// both reset to zero.
#[derive(Debug, Default)]
pub struct FrameWriter {
    queued: usize,
    acked: usize,
    reboot_at: Option<usize>,
}

impl FrameWriter {
    /// Create a writer with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame `text` and hand each frame to `sink` in order.
    ///
    /// Comment lines (`//` prefix) are dropped entirely. Remaining text is
    /// accumulated character by character and flushed as one frame on every
    /// newline or once the accumulator's encoded length exceeds
    /// [`FRAME_CAPACITY`]` - 1`; a non-empty remainder is flushed at the end
    /// of the burst. Short newline-terminated lines are batched into single
    /// frames, never split.
    ///
    /// Returns [`Error::Encoding`] if the accumulator cannot be encoded as
    /// 7-bit ASCII; the burst aborts, unflushed content is discarded and
    /// the counters reset (frames already handed to `sink` are not rolled
    /// back).
    ///
    /// A reboot frame with nothing else outstanding ends the burst: any
    /// text after it in the same `write()` call is discarded, since the
    /// device is disconnecting and could not receive it anyway.
    pub fn write(
        &mut self,
        text: &str,
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<WriteDisposition> {
        // A paste may carry a whole program; throw away comment lines
        // before framing so they never hit the wire.
        let kept: Vec<&str> = text
            .split('\n')
            .filter(|line| !line.starts_with(COMMENT_MARKER))
            .collect();
        let filtered = kept.join("\n");

        let mut disposition = WriteDisposition::Queued;
        let mut pending = String::new();

        for ch in filtered.chars() {
            pending.push(ch);
            if ch == '\n' || pending.encode_utf16().count() > FRAME_CAPACITY - 1 {
                match self.flush(&mut pending, sink)? {
                    Flushed::Plain => {},
                    Flushed::RebootScheduled => disposition = WriteDisposition::RebootScheduled,
                    Flushed::RebootNow => return Ok(WriteDisposition::RebootNow),
                }
            }
        }

        if !pending.is_empty() {
            match self.flush(&mut pending, sink)? {
                Flushed::Plain => {},
                Flushed::RebootScheduled => disposition = WriteDisposition::RebootScheduled,
                Flushed::RebootNow => return Ok(WriteDisposition::RebootNow),
            }
        }

        Ok(disposition)
    }

    fn flush(
        &mut self,
        pending: &mut String,
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<Flushed> {
        if !pending.is_ascii() {
            debug!("write burst aborted: non-ASCII content in {pending:?}");
            pending.clear();
            self.reset();
            return Err(Error::Encoding);
        }

        sink(pending.as_bytes())?;
        self.queued += 1;

        let flushed = if pending.to_lowercase() == REBOOT_FRAME {
            if self.queued > 1 {
                // Fire the disconnect once everything queued ahead of the
                // reboot frame is acknowledged, before its own ack.
                self.reboot_at = Some(self.queued - 1);
                Flushed::RebootScheduled
            } else {
                self.reset();
                Flushed::RebootNow
            }
        } else {
            Flushed::Plain
        };

        pending.clear();
        Ok(flushed)
    }

    /// Process one write acknowledgement from the transport.
    ///
    /// Acknowledgements arrive in write-issue order and are matched by
    /// count, never by content.
    pub fn on_ack(&mut self) -> AckOutcome {
        self.acked += 1;

        if self.reboot_at == Some(self.acked) {
            self.reset();
            return AckOutcome::Reboot;
        }

        if self.acked < self.queued {
            #[allow(clippy::cast_possible_truncation)] // 0..=100
            AckOutcome::Progress((100 * self.acked / self.queued) as u8)
        } else {
            self.reset();
            AckOutcome::Settled
        }
    }

    /// Frames handed to the transport in the current burst.
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Frames the peripheral has acknowledged in the current burst.
    pub fn acked(&self) -> usize {
        self.acked
    }

    /// Whether a reboot disconnect is waiting on acknowledgements.
    pub fn reboot_pending(&self) -> bool {
        self.reboot_at.is_some()
    }

    /// Whether any frames are still awaiting acknowledgement.
    pub fn in_flight(&self) -> bool {
        self.acked < self.queued
    }

    fn reset(&mut self) {
        self.queued = 0;
        self.acked = 0;
        self.reboot_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(writer: &mut FrameWriter, text: &str) -> (Result<WriteDisposition>, Vec<Vec<u8>>) {
        let mut frames = Vec::new();
        let result = writer.write(text, &mut |frame| {
            frames.push(frame.to_vec());
            Ok(())
        });
        (result, frames)
    }

    #[test]
    fn test_comment_lines_are_dropped() {
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, "// comment\nhello\n");
        assert_eq!(result.unwrap(), WriteDisposition::Queued);
        assert_eq!(frames, vec![b"hello\n".to_vec()]);
        assert_eq!(writer.queued(), 1);
    }

    #[test]
    fn test_long_run_splits_at_capacity() {
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, &"x".repeat(25));
        assert_eq!(result.unwrap(), WriteDisposition::Queued);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 20);
        assert_eq!(frames[1].len(), 5);
    }

    #[test]
    fn test_short_lines_flush_per_newline() {
        let mut writer = FrameWriter::new();
        let (_, frames) = collect(&mut writer, "hi\nyo\n");
        assert_eq!(frames, vec![b"hi\n".to_vec(), b"yo\n".to_vec()]);
    }

    #[test]
    fn test_reboot_with_outstanding_frames_is_deferred() {
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, "a\nb\nc\nreboot\n");
        assert_eq!(result.unwrap(), WriteDisposition::RebootScheduled);
        assert_eq!(frames.len(), 4);
        assert!(writer.reboot_pending());

        assert_eq!(writer.on_ack(), AckOutcome::Progress(25));
        assert_eq!(writer.on_ack(), AckOutcome::Progress(50));
        // Disconnect fires once the three earlier frames are acknowledged,
        // before the reboot frame's own ack is processed.
        assert_eq!(writer.on_ack(), AckOutcome::Reboot);
        assert!(!writer.reboot_pending());
        assert_eq!(writer.queued(), 0);
        assert_eq!(writer.acked(), 0);
    }

    #[test]
    fn test_reboot_alone_disconnects_immediately() {
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, "reboot\n");
        assert_eq!(result.unwrap(), WriteDisposition::RebootNow);
        assert_eq!(frames, vec![b"reboot\n".to_vec()]);
        assert_eq!(writer.queued(), 0);
        assert_eq!(writer.acked(), 0);
    }

    #[test]
    fn test_text_after_lone_reboot_is_dropped() {
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, "reboot\nlist\n");
        assert_eq!(result.unwrap(), WriteDisposition::RebootNow);
        // The device is disconnecting; nothing after the reboot frame is
        // framed or queued.
        assert_eq!(frames, vec![b"reboot\n".to_vec()]);
        assert_eq!(writer.queued(), 0);
    }

    #[test]
    fn test_reboot_match_is_case_insensitive() {
        let mut writer = FrameWriter::new();
        let (result, _) = collect(&mut writer, "REBOOT\n");
        assert_eq!(result.unwrap(), WriteDisposition::RebootNow);
    }

    #[test]
    fn test_reboot_without_newline_is_not_recognized() {
        // Known limitation carried over for compatibility: only the exact
        // "reboot\n" frame triggers the disconnect sequencing.
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, "reboot");
        assert_eq!(result.unwrap(), WriteDisposition::Queued);
        assert_eq!(frames, vec![b"reboot".to_vec()]);
    }

    #[test]
    fn test_non_ascii_aborts_with_zeroed_counters() {
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, "héllo\n");
        assert!(matches!(result, Err(Error::Encoding)));
        assert!(frames.is_empty());
        assert_eq!(writer.queued(), 0);
        assert_eq!(writer.acked(), 0);
    }

    #[test]
    fn test_non_ascii_after_queued_frames_keeps_sent_frames() {
        let mut writer = FrameWriter::new();
        let (result, frames) = collect(&mut writer, "ok\nhé\n");
        assert!(matches!(result, Err(Error::Encoding)));
        // The first frame already went out; it is not rolled back.
        assert_eq!(frames, vec![b"ok\n".to_vec()]);
        assert_eq!(writer.queued(), 0);
    }

    #[test]
    fn test_acks_settle_and_reset() {
        let mut writer = FrameWriter::new();
        let (_, frames) = collect(&mut writer, "a\nb\n");
        assert_eq!(frames.len(), 2);
        assert!(writer.in_flight());

        assert_eq!(writer.on_ack(), AckOutcome::Progress(50));
        assert_eq!(writer.on_ack(), AckOutcome::Settled);
        assert!(!writer.in_flight());
        assert_eq!(writer.queued(), 0);
    }
}
