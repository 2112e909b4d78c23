//! Link abstraction
//!
//! [`Link`] is a single open byte channel to the device; [`Connector`] knows
//! how to (re)open one. The link manager only talks to these traits, so the
//! same loop drives a real serial port, the demo simulator or a test fake.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialStream;

use super::LinkError;

/// An open, exclusively owned byte channel to the device
#[async_trait]
pub trait Link: Send {
    /// Write all bytes and flush them out
    async fn write_all(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Read whatever arrives within `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived; an error means the link is gone.
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError>;

    /// Release the underlying handle
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Opens links to one configured endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Identifier of the endpoint, used in logs
    fn port_name(&self) -> &str;

    /// Open a fresh link
    async fn connect(&self) -> Result<Box<dyn Link>, LinkError>;
}

/// Serial port wrapper implementing [`Link`]
pub struct SerialLink {
    port: Option<SerialStream>,
}

impl SerialLink {
    /// Wrap an opened port
    pub fn new(port: SerialStream) -> Self {
        Self { port: Some(port) }
    }

    fn port_mut(&mut self) -> Result<&mut SerialStream, LinkError> {
        self.port.as_mut().ok_or(LinkError::NotOpen)
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let port = self.port_mut()?;
        port.write_all(data).await?;
        port.flush().await?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        let port = self.port_mut()?;
        match tokio::time::timeout(timeout, port.read(buf)).await {
            Err(_) => Ok(0),
            // A zero-length read on a tty means the device went away
            Ok(Ok(0)) => Err(LinkError::Disconnected),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Ok(Err(e)) => Err(LinkError::Io(e)),
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.port = None;
        Ok(())
    }
}
