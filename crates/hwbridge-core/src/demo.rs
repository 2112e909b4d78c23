//! Demo Mode - simulated board for running without hardware
//!
//! [`SimulatedDevice`] behaves like the reference firmware: it prints
//! `READY` after opening, acknowledges buzzer, servo and digital output
//! commands with `A`, rejects anything else with `E`, and streams a jittery
//! IR distance reading on channel 40 every 200 ms.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::protocol::{
    Command, CommandCode, Connector, FrameAccumulator, Link, LinkError, READY_BANNER,
};
use crate::telemetry::CHANNEL_IR_DISTANCE;

/// Interval between streamed IR samples
pub const DEMO_STREAM_INTERVAL: Duration = Duration::from_millis(200);

/// Observable state of the simulated board
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemoState {
    /// Every command received, in order
    pub commands: Vec<Command>,
    /// Last angle the servo was moved to
    pub servo_angle: Option<i32>,
    /// Digital output level
    pub output_on: bool,
    /// Buzzer commands received
    pub beeps: usize,
    /// Number of times the board was (re)opened
    pub opens: usize,
}

/// Connector for the simulated board
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DemoState>>,
    stream_interval: Option<Duration>,
    seed: Option<u64>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Board streaming at the default interval with an entropy-seeded source
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DemoState::default())),
            stream_interval: Some(DEMO_STREAM_INTERVAL),
            seed: None,
        }
    }

    /// Deterministic jitter
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Change the IR stream rate; `None` disables streaming
    pub fn with_stream_interval(mut self, interval: Option<Duration>) -> Self {
        self.stream_interval = interval;
        self
    }

    /// Snapshot of the board state
    pub fn state(&self) -> DemoState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for SimulatedDevice {
    fn port_name(&self) -> &str {
        "demo"
    }

    async fn connect(&self) -> Result<Box<dyn Link>, LinkError> {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .opens += 1;
        Ok(Box::new(SimulatedLink::new(
            self.state.clone(),
            self.stream_interval,
            rng,
        )))
    }
}

/// One open session with the simulated board
struct SimulatedLink {
    state: Arc<Mutex<DemoState>>,
    inbound: FrameAccumulator,
    outbox: VecDeque<u8>,
    stream_interval: Option<Duration>,
    next_sample: Instant,
    distance_cm: f64,
    rng: StdRng,
}

impl SimulatedLink {
    fn new(state: Arc<Mutex<DemoState>>, stream_interval: Option<Duration>, rng: StdRng) -> Self {
        let mut outbox = VecDeque::new();
        outbox.extend(format!("{}\r\n", READY_BANNER).into_bytes());
        Self {
            state,
            inbound: FrameAccumulator::new(),
            outbox,
            stream_interval,
            next_sample: Instant::now() + stream_interval.unwrap_or_default(),
            distance_cm: 30.0,
            rng,
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        let reply = match parse_command(frame) {
            Some(command) => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.commands.push(command);
                match command.code {
                    CommandCode::Buzzer => {
                        state.beeps += 1;
                        "A"
                    }
                    CommandCode::Servo => {
                        state.servo_angle = Some(command.value.clamp(0, 180));
                        "A"
                    }
                    CommandCode::DigitalOutput => {
                        state.output_on = command.value != 0;
                        "A"
                    }
                    CommandCode::Raw(_) => "E",
                }
            }
            None => "E",
        };
        debug!(frame, reply, "demo board handled command");
        self.outbox.extend(format!("{}\r\n", reply).into_bytes());
    }

    /// Random walk around 30 cm, kept inside the sensor's 10-80 cm range
    fn sample(&mut self) {
        let step: f64 = self.rng.gen_range(-1.5..1.5);
        self.distance_cm = (self.distance_cm + step).clamp(10.0, 80.0);
        let frame = format!("{},{:.1};", CHANNEL_IR_DISTANCE, self.distance_cm);
        self.outbox.extend(frame.into_bytes());
    }

    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

fn parse_command(frame: &str) -> Option<Command> {
    let (code, value) = frame.split_once(',')?;
    let code: u16 = code.trim().parse().ok()?;
    let value: i32 = value.trim().parse().ok()?;
    Some(Command::new(code, value))
}

#[async_trait]
impl Link for SimulatedLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        for frame in self.inbound.push(data) {
            self.handle_frame(&frame);
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        if !self.outbox.is_empty() {
            return Ok(self.drain_into(buf));
        }
        let deadline = Instant::now() + timeout;
        match self.stream_interval {
            Some(interval) if self.next_sample <= deadline => {
                tokio::time::sleep_until(self.next_sample).await;
                self.next_sample += interval;
                self.sample();
                Ok(self.drain_into(buf))
            }
            _ => {
                tokio::time::sleep_until(deadline).await;
                Ok(0)
            }
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.outbox.clear();
        self.inbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_text(link: &mut Box<dyn Link>) -> String {
        let mut buf = [0u8; 64];
        let n = link.read(&mut buf, Duration::from_millis(10)).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_banner_then_acks() {
        let device = SimulatedDevice::new()
            .with_seed(7)
            .with_stream_interval(None);
        let mut link = device.connect().await.unwrap();
        assert_eq!(read_text(&mut link).await, "READY\r\n");

        link.write_all(b"20,90;").await.unwrap();
        assert_eq!(read_text(&mut link).await, "A\r\n");
        link.write_all(b"99,1;").await.unwrap();
        assert_eq!(read_text(&mut link).await, "E\r\n");
        assert_eq!(read_text(&mut link).await, "");

        let state = device.state();
        assert_eq!(state.servo_angle, Some(90));
        assert_eq!(state.commands.len(), 2);
        assert_eq!(state.opens, 1);
    }

    #[tokio::test]
    async fn test_split_command_is_reassembled() {
        let device = SimulatedDevice::new().with_stream_interval(None);
        let mut link = device.connect().await.unwrap();
        read_text(&mut link).await;

        link.write_all(b"30,").await.unwrap();
        link.write_all(b"1;").await.unwrap();
        assert_eq!(read_text(&mut link).await, "A\r\n");
        assert!(device.state().output_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_ir_distance() {
        let device = SimulatedDevice::new()
            .with_seed(1)
            .with_stream_interval(Some(Duration::from_millis(200)));
        let mut link = device.connect().await.unwrap();
        read_text(&mut link).await;

        let mut buf = [0u8; 64];
        let n = link.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        let frame = String::from_utf8_lossy(&buf[..n]).into_owned();
        let value: f64 = frame
            .strip_prefix("40,")
            .and_then(|rest| rest.strip_suffix(';'))
            .unwrap()
            .parse()
            .unwrap();
        assert!((10.0..=80.0).contains(&value), "distance {} out of range", value);
    }
}
