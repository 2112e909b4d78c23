//! Link management
//!
//! [`LinkManager`] owns the one open link to the device. It is driven by a
//! single task ([`LinkManager::run`]) that opens the port, serves write
//! requests from the dispatcher, forwards every received chunk to the stream
//! reader, and reopens the port after any failure. Nothing else touches the
//! physical handle, so outbound writes can never interleave.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::serial::port_holder;
use super::{Connector, Link, LinkError, FRAME_TERMINATORS};
use crate::config::BridgeConfig;

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No handle
    Closed,
    /// Open in progress
    Opening,
    /// Handle open and usable
    Open,
    /// An I/O operation failed; the handle is about to be closed
    Error,
}

/// Request served by the link task
#[derive(Debug)]
pub enum LinkRequest {
    /// Write one frame; the result is sent back once it has been flushed
    WriteLine {
        /// Frame bytes
        bytes: Vec<u8>,
        /// Write outcome
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
}

/// Notification from the link task to the stream reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A fresh handle was opened
    Opened,
    /// Raw bytes read from the device
    Data(Vec<u8>),
    /// The handle was closed after a failure; partial frames are void
    Lost,
}

/// Owner of the physical link
pub struct LinkManager {
    connector: Box<dyn Connector>,
    link: Option<Box<dyn Link>>,
    state: watch::Sender<LinkState>,
    read_timeout: Duration,
    retry_delay: Duration,
    chunk_size: usize,
}

impl LinkManager {
    /// Create a manager in the `Closed` state
    pub fn new(connector: Box<dyn Connector>, config: &BridgeConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Closed);
        Self {
            connector,
            link: None,
            state,
            read_timeout: config.read_timeout(),
            retry_delay: config.retry_delay(),
            chunk_size: config.read_chunk_size.max(1),
        }
    }

    /// Name of the managed port
    pub fn port_name(&self) -> &str {
        self.connector.port_name()
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(port = %self.port_name(), ?previous, ?state, "link state changed");
        }
    }

    fn fail(&self, err: LinkError) -> LinkError {
        self.set_state(LinkState::Error);
        err
    }

    /// Open the port if it is not open already
    pub async fn open(&mut self) -> Result<(), LinkError> {
        if self.link.is_some() {
            return Ok(());
        }
        self.set_state(LinkState::Opening);
        match self.connector.connect().await {
            Ok(link) => {
                self.link = Some(link);
                self.set_state(LinkState::Open);
                info!(port = %self.port_name(), "opened link");
                Ok(())
            }
            Err(e) => {
                self.set_state(LinkState::Closed);
                Err(e)
            }
        }
    }

    /// Write one frame, appending a newline when it carries no terminator
    pub async fn write_line(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let link = self.link.as_mut().ok_or(LinkError::NotOpen)?;
        let mut frame = bytes.to_vec();
        if !frame.last().is_some_and(|b| FRAME_TERMINATORS.contains(b)) {
            frame.push(b'\n');
        }
        match link.write_all(&frame).await {
            Ok(()) => {
                debug!(port = %self.connector.port_name(), frame = %String::from_utf8_lossy(&frame).trim_end(), "wrote frame");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Read whatever is available within the read timeout (possibly nothing)
    pub async fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let link = self.link.as_mut().ok_or(LinkError::NotOpen)?;
        let mut buf = vec![0u8; self.chunk_size];
        match link.read(&mut buf, self.read_timeout).await {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Release the handle
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                debug!(port = %self.port_name(), error = %e, "error while closing link");
            }
        }
        self.set_state(LinkState::Closed);
    }

    /// Drive the link until `cancel` fires.
    ///
    /// Open failures and I/O errors never end the loop: the handle is
    /// closed, the reader is told the stream was lost, and the port is
    /// reopened after the retry delay.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<LinkRequest>,
        events: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) {
        info!(port = %self.port_name(), "link task starting");

        while !cancel.is_cancelled() {
            if self.link.is_none() {
                match self.open().await {
                    Ok(()) => {
                        let _ = events.send(LinkEvent::Opened).await;
                    }
                    Err(e) => {
                        warn!(port = %self.port_name(), error = %e, "could not open port");
                        if e.is_busy() {
                            let port = self.port_name().to_string();
                            tokio::spawn(async move {
                                if let Some(holder) = port_holder(&port).await {
                                    warn!(%port, "port appears held by:\n{}", holder);
                                }
                            });
                        }
                        if !self.wait_retry(&mut requests, &cancel).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                req = requests.recv() => match req {
                    Some(LinkRequest::WriteLine { bytes, reply }) => {
                        let result = self.write_line(&bytes).await;
                        let failure = result.as_ref().err().map(|e| e.to_string());
                        let _ = reply.send(result);
                        if let Some(error) = failure {
                            warn!(port = %self.port_name(), %error, "write failed");
                            if !self.recover(&events, &mut requests, &cancel).await {
                                break;
                            }
                        }
                    }
                    None => {
                        debug!("request channel closed, exiting link task");
                        break;
                    }
                },

                chunk = self.read_available() => match chunk {
                    Ok(bytes) if bytes.is_empty() => {}
                    Ok(bytes) => {
                        trace!(len = bytes.len(), "read chunk");
                        let _ = events.send(LinkEvent::Data(bytes)).await;
                    }
                    Err(e) => {
                        warn!(port = %self.port_name(), error = %e, "read failed");
                        if !self.recover(&events, &mut requests, &cancel).await {
                            break;
                        }
                    }
                },
            }
        }

        self.close().await;
        info!(port = %self.port_name(), "link task stopped");
    }

    /// Close after a failure and wait out the retry delay.
    /// Returns `false` when the task should exit.
    async fn recover(
        &mut self,
        events: &mpsc::Sender<LinkEvent>,
        requests: &mut mpsc::Receiver<LinkRequest>,
        cancel: &CancellationToken,
    ) -> bool {
        self.close().await;
        let _ = events.send(LinkEvent::Lost).await;
        info!(
            port = %self.port_name(),
            retry_ms = self.retry_delay.as_millis() as u64,
            "port closed, will retry"
        );
        self.wait_retry(requests, cancel).await
    }

    /// Sleep for the retry delay, failing any write that arrives meanwhile.
    /// Returns `false` when cancelled or when the request channel closed.
    async fn wait_retry(
        &mut self,
        requests: &mut mpsc::Receiver<LinkRequest>,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = Instant::now() + self.retry_delay;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return false,

                _ = tokio::time::sleep_until(deadline) => return true,

                req = requests.recv() => match req {
                    Some(LinkRequest::WriteLine { reply, .. }) => {
                        let _ = reply.send(Err(LinkError::NotOpen));
                    }
                    None => return false,
                },
            }
        }
    }
}
