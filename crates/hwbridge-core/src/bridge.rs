//! Bridge
//!
//! The composition root of the transport core. A [`Bridge`] is built once at
//! startup, owns the three background tasks, and is shared by handle with
//! every caller:
//!
//! ```text
//!  callers ──submit──▶ command queue ──▶ Dispatcher ──WriteLine──▶ LinkManager ──▶ port
//!     ▲                                     ▲                          │
//!     └──await_response── ResponseTable ◀───┘ ack slot ◀── StreamReader ◀── LinkEvent
//!                                                              │
//!  callers ──recent_values──▶ TelemetryStore ◀─────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::dispatch::{
    Awaited, CommandResponse, CorrelationKey, Dispatcher, PendingCommand, QueuedCommand,
    ResponseTable,
};
use crate::error::BridgeError;
use crate::protocol::{
    Command, CommandCode, Connector, LinkManager, LinkState, SerialConnector, TelemetryValue,
};
use crate::telemetry::{StreamReader, TelemetryStore, ACK_SLOT_CAPACITY};

const LINK_REQUEST_CAPACITY: usize = 16;
const LINK_EVENT_CAPACITY: usize = 64;

/// Handle to a running bridge
pub struct Bridge {
    queue: mpsc::UnboundedSender<QueuedCommand>,
    telemetry: Arc<TelemetryStore>,
    responses: Arc<ResponseTable>,
    dropped_frames: Arc<AtomicU64>,
    link_state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Start the link, reader and dispatcher tasks on the current runtime
    pub fn start(
        config: BridgeConfig,
        connector: impl Connector + 'static,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let telemetry = Arc::new(TelemetryStore::new(config.ring_capacity));
        let responses = Arc::new(ResponseTable::new());
        let cancel = CancellationToken::new();

        let (link_tx, link_rx) = mpsc::channel(LINK_REQUEST_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::channel(ACK_SLOT_CAPACITY);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let manager = LinkManager::new(Box::new(connector), &config);
        let link_state = manager.subscribe();
        info!(port = %manager.port_name(), baud = config.baud_rate, "starting bridge");

        let reader = StreamReader::new(telemetry.clone(), ack_tx, config.ack_tokens.clone());
        let dropped_frames = reader.dropped_counter();
        let dispatcher = Dispatcher::new(
            link_tx,
            ack_rx,
            responses.clone(),
            config.settle_delay(),
            config.ack_timeout(),
        );

        let tasks = vec![
            tokio::spawn(manager.run(link_rx, event_tx, cancel.clone())),
            tokio::spawn(reader.run(event_rx, cancel.clone())),
            tokio::spawn(dispatcher.run(queue_rx, cancel.clone())),
        ];

        Ok(Self {
            queue: queue_tx,
            telemetry,
            responses,
            dropped_frames,
            link_state,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    /// Start a bridge on the serial port named in `config`
    pub fn open_serial(config: BridgeConfig) -> Result<Self, BridgeError> {
        if config.port_name.is_empty() {
            return Err(BridgeError::Config("port_name is not set".into()));
        }
        let connector = SerialConnector::new(config.port_name.clone(), config.baud_rate)
            .with_timeout(config.read_timeout());
        Self::start(config, connector)
    }

    /// Enqueue a command and return immediately.
    ///
    /// With a key, the response is recorded under it; the key must be unused.
    pub fn submit(
        &self,
        code: impl Into<CommandCode>,
        value: i32,
        key: Option<CorrelationKey>,
    ) -> Result<(), BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Stopped);
        }
        let command = Command::new(code, value);
        if let Some(key) = &key {
            self.responses
                .register(PendingCommand::new(key.clone(), command))?;
        }
        debug!(code = command.code.code(), value, key = ?key.as_ref().map(|k| k.as_str()), "queued command");
        self.queue
            .send(QueuedCommand { command, key })
            .map_err(|rejected| {
                if let Some(key) = &rejected.0.key {
                    self.responses
                        .record(key, CommandResponse::Undelivered("bridge stopped".into()));
                }
                BridgeError::Stopped
            })
    }

    /// Enqueue a command under a freshly generated key
    pub fn enqueue_write(
        &self,
        code: impl Into<CommandCode>,
        value: i32,
    ) -> Result<CorrelationKey, BridgeError> {
        let code = code.into();
        let key = CorrelationKey::generate(key_prefix(code));
        self.submit(code, value, Some(key.clone()))?;
        Ok(key)
    }

    /// Wait for the response recorded under `key`
    pub async fn await_response(&self, key: &CorrelationKey, timeout: Duration) -> Awaited {
        self.responses.wait(key, timeout).await
    }

    /// Enqueue a command and wait for its response
    pub async fn request(
        &self,
        code: impl Into<CommandCode>,
        value: i32,
        timeout: Duration,
    ) -> Result<Awaited, BridgeError> {
        let key = self.enqueue_write(code, value)?;
        Ok(self.await_response(&key, timeout).await)
    }

    /// Recent values of a telemetry channel, most recent last
    pub fn recent_values(&self, channel: u16) -> Vec<TelemetryValue> {
        self.telemetry.recent_values(channel)
    }

    /// Shared telemetry history
    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    /// Shared response table
    pub fn responses(&self) -> &Arc<ResponseTable> {
        &self.responses
    }

    /// Malformed inbound frames discarded since startup
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        *self.link_state.borrow()
    }

    /// Watch link state transitions
    pub fn watch_link_state(&self) -> watch::Receiver<LinkState> {
        self.link_state.clone()
    }

    /// Commands submitted with a key and not yet answered or abandoned
    pub fn pending_count(&self) -> usize {
        self.responses.pending_count()
    }

    /// `false` once [`Bridge::shutdown`] has been called
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop all tasks and close the link; waits for the tasks to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
        info!("bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn key_prefix(code: CommandCode) -> &'static str {
    match code {
        CommandCode::Buzzer => "beep",
        CommandCode::Servo => "servo",
        CommandCode::DigitalOutput => "output",
        CommandCode::Raw(_) => "cmd",
    }
}
