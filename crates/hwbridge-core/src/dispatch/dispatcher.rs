//! Outbound command dispatcher
//!
//! A single worker drains the command queue in submission order. Each
//! command is written through the link task and then given one ack window
//! before the next command is touched, so at most one command is ever in
//! flight on the link.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CommandResponse, CorrelationKey, ResponseTable};
use crate::protocol::{Command, LinkRequest};

/// Entry in the command queue
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// Frame to write
    pub command: Command,
    /// Where to record the response; `None` for fire-and-forget commands
    pub key: Option<CorrelationKey>,
}

/// Sequential command worker
pub struct Dispatcher {
    link: mpsc::Sender<LinkRequest>,
    acks: mpsc::Receiver<String>,
    responses: Arc<ResponseTable>,
    settle_delay: Duration,
    ack_timeout: Duration,
}

impl Dispatcher {
    /// Worker writing through `link` and reading answers from `acks`
    pub fn new(
        link: mpsc::Sender<LinkRequest>,
        acks: mpsc::Receiver<String>,
        responses: Arc<ResponseTable>,
        settle_delay: Duration,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            link,
            acks,
            responses,
            settle_delay,
            ack_timeout,
        }
    }

    /// Write one command and collect its ack
    pub async fn dispatch(&mut self, command: &Command) -> CommandResponse {
        // Acks that showed up after their own window belong to nobody
        let mut stale = 0;
        while self.acks.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded stale acks");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = LinkRequest::WriteLine {
            bytes: command.to_frame(),
            reply: reply_tx,
        };
        if self.link.send(request).await.is_err() {
            return CommandResponse::Undelivered("link task stopped".into());
        }
        match reply_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return CommandResponse::Undelivered(e.to_string()),
            Err(_) => return CommandResponse::Undelivered("link task stopped".into()),
        }

        tokio::time::sleep(self.settle_delay).await;

        match tokio::time::timeout(self.ack_timeout, self.acks.recv()).await {
            Ok(Some(line)) => CommandResponse::Ack(line),
            Ok(None) | Err(_) => CommandResponse::Silent,
        }
    }

    fn finish(&self, queued: &QueuedCommand, response: CommandResponse) {
        let code = queued.command.code.code();
        match &response {
            CommandResponse::Ack(line) => {
                debug!(code, value = queued.command.value, ack = %line, "command acknowledged")
            }
            CommandResponse::Silent => {
                debug!(code, value = queued.command.value, "no ack within window")
            }
            CommandResponse::Undelivered(reason) => {
                warn!(code, value = queued.command.value, %reason, "command not delivered")
            }
        }
        if let Some(key) = &queued.key {
            self.responses.record(key, response);
        }
    }

    /// Process the queue until `cancel` fires or every sender is gone
    pub async fn run(
        mut self,
        mut queue: mpsc::UnboundedReceiver<QueuedCommand>,
        cancel: CancellationToken,
    ) {
        info!("command dispatcher starting");
        loop {
            let queued = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                queued = queue.recv() => match queued {
                    Some(queued) => queued,
                    None => break,
                },
            };

            let response = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.finish(&queued, CommandResponse::Undelivered("bridge stopped".into()));
                    break;
                }

                response = self.dispatch(&queued.command) => response,
            };
            self.finish(&queued, response);
        }

        // Release waiters of commands that will never be sent
        queue.close();
        while let Ok(queued) = queue.try_recv() {
            if let Some(key) = &queued.key {
                self.responses
                    .record(key, CommandResponse::Undelivered("bridge stopped".into()));
            }
        }
        info!("command dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::PendingCommand;
    use crate::protocol::{CommandCode, LinkError};

    struct Harness {
        dispatcher: Dispatcher,
        link_rx: mpsc::Receiver<LinkRequest>,
        ack_tx: mpsc::Sender<String>,
    }

    fn harness(ack_timeout_ms: u64) -> Harness {
        let (link_tx, link_rx) = mpsc::channel(4);
        let (ack_tx, ack_rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(
            link_tx,
            ack_rx,
            Arc::new(ResponseTable::new()),
            Duration::from_millis(5),
            Duration::from_millis(ack_timeout_ms),
        );
        Harness {
            dispatcher,
            link_rx,
            ack_tx,
        }
    }

    /// Answer the next write request with `result`, acking with `ack` if given
    fn serve_one(
        mut link_rx: mpsc::Receiver<LinkRequest>,
        ack_tx: mpsc::Sender<String>,
        result: Result<(), LinkError>,
        ack: Option<&'static str>,
    ) -> tokio::task::JoinHandle<Vec<u8>> {
        tokio::spawn(async move {
            let LinkRequest::WriteLine { bytes, reply } = link_rx.recv().await.unwrap();
            let _ = reply.send(result);
            if let Some(ack) = ack {
                ack_tx.try_send(ack.to_string()).unwrap();
            }
            bytes
        })
    }

    #[tokio::test]
    async fn test_dispatch_collects_ack() {
        let Harness {
            mut dispatcher,
            link_rx,
            ack_tx,
        } = harness(200);
        let link = serve_one(link_rx, ack_tx, Ok(()), Some("A"));

        let response = dispatcher
            .dispatch(&Command::new(CommandCode::Servo, 90))
            .await;
        assert_eq!(response, CommandResponse::Ack("A".into()));
        assert_eq!(link.await.unwrap(), b"20,90;");
    }

    #[tokio::test]
    async fn test_stale_ack_is_not_reused() {
        let Harness {
            mut dispatcher,
            link_rx,
            ack_tx,
        } = harness(50);
        ack_tx.try_send("A".into()).unwrap();
        let link = serve_one(link_rx, ack_tx.clone(), Ok(()), None);

        let response = dispatcher
            .dispatch(&Command::new(CommandCode::Buzzer, 500))
            .await;
        assert_eq!(response, CommandResponse::Silent);
        link.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_is_undelivered() {
        let Harness {
            mut dispatcher,
            link_rx,
            ack_tx,
        } = harness(50);
        let link = serve_one(link_rx, ack_tx, Err(LinkError::NotOpen), None);

        let response = dispatcher
            .dispatch(&Command::new(CommandCode::DigitalOutput, 1))
            .await;
        assert!(matches!(response, CommandResponse::Undelivered(_)));
        link.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_queued_waiters() {
        let Harness {
            dispatcher,
            link_rx: _link_rx,
            ack_tx: _ack_tx,
        } = harness(50);
        let responses = dispatcher.responses.clone();
        let key = CorrelationKey::new("q1").unwrap();
        let command = Command::new(CommandCode::Servo, 10);
        responses
            .register(PendingCommand::new(key.clone(), command))
            .unwrap();

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        queue_tx
            .send(QueuedCommand {
                command,
                key: Some(key.clone()),
            })
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        dispatcher.run(queue_rx, cancel).await;

        assert_eq!(
            responses.get(&key),
            Some(CommandResponse::Undelivered("bridge stopped".into()))
        );
    }
}
