//! Shared test fixtures: a scripted in-memory device

#![allow(dead_code)]

use async_trait::async_trait;
use hwbridge_core::config::BridgeConfig;
use hwbridge_core::protocol::{Connector, Link, LinkError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// What the fake device hands to the next read
enum Inbound {
    Bytes(Vec<u8>),
    /// Fail the read as if the cable was pulled
    Fail,
}

#[derive(Default)]
struct Shared {
    written: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<VecDeque<Inbound>>,
    replies: Mutex<HashMap<u16, String>>,
    opens: AtomicUsize,
    refuse_opens: AtomicUsize,
    arrived: Notify,
}

/// Scripted device reachable through [`Connector`]
#[derive(Clone, Default)]
pub struct FakeDevice {
    shared: Arc<Shared>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes for the host to read
    pub fn push(&self, bytes: impl AsRef<[u8]>) {
        self.shared
            .inbound
            .lock()
            .unwrap()
            .push_back(Inbound::Bytes(bytes.as_ref().to_vec()));
        self.shared.arrived.notify_one();
    }

    /// Make the next read fail
    pub fn fail_read(&self) {
        self.shared.inbound.lock().unwrap().push_back(Inbound::Fail);
        self.shared.arrived.notify_one();
    }

    /// Answer every command with `code` by sending `line`
    pub fn reply_to(&self, code: u16, line: &str) {
        self.shared
            .replies
            .lock()
            .unwrap()
            .insert(code, line.to_string());
    }

    /// Refuse the next `count` open attempts
    pub fn refuse_opens(&self, count: usize) {
        self.shared.refuse_opens.store(count, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Frames written by the host, as text
    pub fn written(&self) -> Vec<String> {
        self.shared
            .written
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }
}

#[async_trait]
impl Connector for FakeDevice {
    fn port_name(&self) -> &str {
        "fake"
    }

    async fn connect(&self) -> Result<Box<dyn Link>, LinkError> {
        let refused = self
            .shared
            .refuse_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LinkError::PortUnavailable {
                port: "fake".into(),
                reason: "No such file or directory".into(),
            });
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLink {
            shared: self.shared.clone(),
        }))
    }
}

struct FakeLink {
    shared: Arc<Shared>,
}

impl FakeLink {
    fn take(&self, buf: &mut [u8]) -> Option<Result<usize, LinkError>> {
        let mut inbound = self.shared.inbound.lock().unwrap();
        match inbound.pop_front()? {
            Inbound::Fail => Some(Err(LinkError::Disconnected)),
            Inbound::Bytes(mut bytes) => {
                if bytes.len() > buf.len() {
                    let rest = bytes.split_off(buf.len());
                    inbound.push_front(Inbound::Bytes(rest));
                }
                buf[..bytes.len()].copy_from_slice(&bytes);
                Some(Ok(bytes.len()))
            }
        }
    }
}

#[async_trait]
impl Link for FakeLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.shared.written.lock().unwrap().push(data.to_vec());
        let text = String::from_utf8_lossy(data);
        let code = text
            .split(',')
            .next()
            .and_then(|code| code.trim().parse::<u16>().ok());
        let reply = code.and_then(|code| self.shared.replies.lock().unwrap().get(&code).cloned());
        if let Some(reply) = reply {
            self.shared
                .inbound
                .lock()
                .unwrap()
                .push_back(Inbound::Bytes(reply.into_bytes()));
            self.shared.arrived.notify_one();
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        if let Some(result) = self.take(buf) {
            return result;
        }
        let _ = tokio::time::timeout(timeout, self.shared.arrived.notified()).await;
        self.take(buf).unwrap_or(Ok(0))
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Config with short delays so tests run quickly
pub fn fast_config() -> BridgeConfig {
    BridgeConfig {
        port_name: "fake".into(),
        read_timeout_ms: 10,
        retry_delay_ms: 20,
        settle_delay_ms: 5,
        ack_timeout_ms: 300,
        ..BridgeConfig::default()
    }
}

/// Poll `check` until it holds or `within` elapses
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
