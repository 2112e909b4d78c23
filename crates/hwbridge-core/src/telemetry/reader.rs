//! Inbound stream reader
//!
//! Consumes [`LinkEvent`]s from the link task, reassembles frames across
//! chunk boundaries and routes each frame: telemetry to the store, ack lines
//! to the dispatcher's ack slot. Every inbound byte goes through here, so a
//! telemetry line arriving between a command and its ack can never be
//! mistaken for the ack.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{TelemetryRecord, TelemetryStore};
use crate::protocol::{FrameAccumulator, InboundFrame, LinkEvent};

/// Acks held for the dispatcher; further acks are dropped until it drains them
pub const ACK_SLOT_CAPACITY: usize = 4;

/// Frame parser and router for the inbound stream
pub struct StreamReader {
    accumulator: FrameAccumulator,
    store: Arc<TelemetryStore>,
    acks: mpsc::Sender<String>,
    ack_tokens: Vec<String>,
    dropped: Arc<AtomicU64>,
}

impl StreamReader {
    /// Reader that stores telemetry in `store` and hands ack lines to `acks`
    pub fn new(
        store: Arc<TelemetryStore>,
        acks: mpsc::Sender<String>,
        ack_tokens: Vec<String>,
    ) -> Self {
        Self {
            accumulator: FrameAccumulator::new(),
            store,
            acks,
            ack_tokens,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Feed a chunk of raw bytes; returns how many telemetry records it completed
    pub fn ingest(&mut self, chunk: &[u8]) -> usize {
        self.accumulator.extend(chunk);
        let mut stored = 0;
        while let Some(raw) = self.accumulator.next_frame() {
            if self.route(&raw) {
                stored += 1;
            }
        }
        stored
    }

    /// Route one frame; returns `true` when it produced a telemetry record
    fn route(&mut self, raw: &str) -> bool {
        match InboundFrame::parse(raw, &self.ack_tokens) {
            Ok(InboundFrame::Telemetry { channel, value }) => {
                debug!(channel, %value, "telemetry");
                self.store.push(TelemetryRecord::new(channel, value));
                true
            }
            Ok(InboundFrame::Ack(line)) => {
                debug!(ack = %line, "ack received");
                if let Err(TrySendError::Full(line)) = self.acks.try_send(line) {
                    debug!(ack = %line, "ack slot full, dropping unsolicited ack");
                }
                false
            }
            Ok(InboundFrame::Notice(line)) => {
                info!(notice = %line, "device notice");
                false
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(frame = %raw, error = %e, "failed to parse frame");
                false
            }
        }
    }

    /// Discard a partial frame left over from a lost link
    pub fn reset(&mut self) {
        if !self.accumulator.is_empty() {
            debug!(
                len = self.accumulator.len(),
                "discarding partial frame after link loss"
            );
        }
        self.accumulator.clear();
    }

    /// Number of malformed frames dropped so far
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle to the dropped-frame counter, readable after the
    /// reader has moved into its task
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    /// Bytes buffered while waiting for a terminator
    pub fn pending_bytes(&self) -> usize {
        self.accumulator.len()
    }

    /// Process link events until `cancel` fires or the link task goes away
    pub async fn run(mut self, mut events: mpsc::Receiver<LinkEvent>, cancel: CancellationToken) {
        info!("stream reader starting");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                event = events.recv() => match event {
                    Some(LinkEvent::Data(bytes)) => {
                        self.ingest(&bytes);
                    }
                    Some(LinkEvent::Opened) | Some(LinkEvent::Lost) => self.reset(),
                    None => break,
                },
            }
        }
        info!(dropped = self.dropped_frames(), "stream reader stopped");
    }
}
