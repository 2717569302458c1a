//! Push channel carrying the output of a running file.
//!
//! A channel is opened by [`RemoteStore::run_file`](crate::RemoteStore::run_file),
//! handed to a message handler with [`PushChannel::on_message`], and closed
//! with `close()`. The transport behind it (server-sent events, a test harness)
//! only needs a [`PushSender`].

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::RunEvent;

/// Buffer size used by transports that do not pick their own.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Producing side of a push channel.
#[derive(Debug, Clone)]
pub struct PushSender {
    tx: mpsc::Sender<RunEvent>,
    closed: CancellationToken,
}

impl PushSender {
    /// Deliver an event. Returns `false` once the channel is closed.
    pub async fn send(&self, event: RunEvent) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Resolves when the consumer closes the channel.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Consuming side of a push channel.
#[derive(Debug)]
pub struct PushChannel {
    rx: mpsc::Receiver<RunEvent>,
    closed: CancellationToken,
}

impl PushChannel {
    /// Create a connected sender/channel pair.
    pub fn pair(capacity: usize) -> (PushSender, PushChannel) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        (
            PushSender {
                tx,
                closed: closed.clone(),
            },
            PushChannel { rx, closed },
        )
    }

    /// Next event, or `None` once the channel is closed or the producer is gone.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Close the channel. The producer observes it through `PushSender::closed`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Spawn a task feeding every event to `handler` until a terminal event
    /// arrives or the channel is closed.
    ///
    /// If the producer disappears without a completion message the handler
    /// receives [`RunEvent::Disconnected`]. Must be called inside a tokio
    /// runtime.
    pub fn on_message<F>(mut self, mut handler: F) -> ChannelHandle
    where
        F: FnMut(RunEvent) + Send + 'static,
    {
        let closed = self.closed.clone();
        let task = tokio::spawn(async move {
            loop {
                match self.recv().await {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        handler(event);
                        if terminal {
                            break;
                        }
                    }
                    None => {
                        if !self.closed.is_cancelled() {
                            handler(RunEvent::Disconnected);
                        }
                        break;
                    }
                }
            }
            self.closed.cancel();
            debug!("push channel handler finished");
        });
        ChannelHandle { closed, task }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Handle to a channel whose messages are being dispatched to a handler.
#[derive(Debug)]
pub struct ChannelHandle {
    closed: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Close the channel; the handler receives no further events.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait for the dispatch task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunCompletion;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_handler_sees_events_until_completion() {
        let (tx, channel) = PushChannel::pair(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = channel.on_message(move |event| sink.lock().unwrap().push(event));

        assert!(tx.send(RunEvent::Output("a".into())).await);
        let done = RunEvent::Completed(RunCompletion {
            success: true,
            return_code: Some(0),
        });
        assert!(tx.send(done.clone()).await);
        handle.join().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![RunEvent::Output("a".into()), done]
        );
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let (tx, channel) = PushChannel::pair(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = channel.on_message(move |event| sink.lock().unwrap().push(event));

        handle.close();
        assert!(!tx.send(RunEvent::Output("late".into())).await);
        handle.join().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_producer_reports_disconnect() {
        let (tx, channel) = PushChannel::pair(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = channel.on_message(move |event| sink.lock().unwrap().push(event));

        drop(tx);
        handle.join().await;
        assert_eq!(*seen.lock().unwrap(), vec![RunEvent::Disconnected]);
    }
}
