// src/bot/outbound.rs - Rate-limited outbound chat replies

use log::{debug, error, info};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use super::shutdown::ShutdownSignal;
use crate::platforms::PlatformConnection;

const BATCH_SEPARATOR: &str = " | ";

/// Queues replies and sends them in batches, at most one send per interval
pub struct OutboundSender {
    pending: Mutex<VecDeque<String>>,
    batch_size: usize,
    max_message_length: usize,
    min_interval: Duration,
}

impl OutboundSender {
    pub fn new(batch_size: usize, max_message_length: usize, min_interval: Duration) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            batch_size: batch_size.max(1),
            max_message_length: max_message_length.max(1),
            min_interval,
        }
    }

    pub async fn enqueue(&self, text: String) {
        self.pending.lock().await.push_back(text);
    }

    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Pop up to `batch_size` replies joined into one message. The first
    /// reply is always taken; later ones only while the message stays short enough.
    async fn next_batch(&self) -> Option<String> {
        let mut pending = self.pending.lock().await;
        let mut message = pending.pop_front()?;
        let mut count = 1;

        while count < self.batch_size {
            let fits = match pending.front() {
                Some(next) => {
                    message.chars().count() + BATCH_SEPARATOR.len() + next.chars().count()
                        <= self.max_message_length
                }
                None => false,
            };
            if !fits {
                break;
            }
            if let Some(next) = pending.pop_front() {
                message.push_str(BATCH_SEPARATOR);
                message.push_str(&next);
                count += 1;
            }
        }

        Some(message)
    }

    /// Send one batch. Send failures are logged and the batch is dropped so
    /// later replies are not held up. Returns whether anything was sent.
    pub async fn send_next_batch(&self, connection: &dyn PlatformConnection, channel: &str) -> bool {
        let message = match self.next_batch().await {
            Some(message) => message,
            None => return false,
        };

        match connection.send_message(channel, &message).await {
            Ok(()) => debug!("Sent reply to {}: {}", channel, message),
            Err(e) => error!("Failed to send reply to {}: {}", channel, e),
        }
        true
    }

    /// Send loop. Runs until shutdown, then flushes what is left.
    pub async fn run(self: Arc<Self>, connection: Arc<dyn PlatformConnection>, channel: String, shutdown: ShutdownSignal) {
        info!("Outbound reply sender started for {}", channel);
        let mut shutdown_receiver = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = sleep(self.min_interval) => {
                    self.send_next_batch(connection.as_ref(), &channel).await;
                }
                _ = shutdown_receiver.recv() => {
                    while self.send_next_batch(connection.as_ref(), &channel).await {}
                    break;
                }
            }
        }

        info!("Outbound reply sender stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::InboundEvent;
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    /// Connection double that records sent messages
    #[derive(Default)]
    pub(crate) struct RecordingConnection {
        pub sent: Arc<Mutex<Vec<(String, String)>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl PlatformConnection for RecordingConnection {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send_message(&self, channel: &str, message: &str) -> Result<()> {
            self.sent.lock().await.push((channel.to_string(), message.to_string()));
            if self.fail {
                Err(anyhow::anyhow!("send failed"))
            } else {
                Ok(())
            }
        }

        fn platform_name(&self) -> &str {
            "recording"
        }

        async fn is_connected(&self) -> bool {
            true
        }

        fn get_message_receiver(&self) -> Option<broadcast::Receiver<InboundEvent>> {
            let (_sender, receiver) = broadcast::channel(1);
            Some(receiver)
        }

        fn get_channels(&self) -> Vec<String> {
            vec!["test".to_string()]
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_batches_respect_size() {
        let sender = OutboundSender::new(2, 200, Duration::from_millis(10));
        for text in ["a", "b", "c"] {
            sender.enqueue(text.to_string()).await;
        }
        let connection = RecordingConnection::default();

        assert!(sender.send_next_batch(&connection, "chat").await);
        assert!(sender.send_next_batch(&connection, "chat").await);
        assert!(!sender.send_next_batch(&connection, "chat").await);

        let sent = connection.sent.lock().await;
        assert_eq!(sent[0].1, "a | b");
        assert_eq!(sent[1].1, "c");
    }

    #[tokio::test]
    async fn test_batches_respect_length() {
        let sender = OutboundSender::new(5, 10, Duration::from_millis(10));
        sender.enqueue("12345678".to_string()).await;
        sender.enqueue("xy".to_string()).await;
        let connection = RecordingConnection::default();

        sender.send_next_batch(&connection, "chat").await;
        assert_eq!(connection.sent.lock().await[0].1, "12345678");
        assert_eq!(sender.pending().await, 1);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_block_next() {
        let sender = OutboundSender::new(1, 200, Duration::from_millis(10));
        sender.enqueue("first".to_string()).await;
        sender.enqueue("second".to_string()).await;
        let connection = RecordingConnection { fail: true, ..Default::default() };

        assert!(sender.send_next_batch(&connection, "chat").await);
        assert!(sender.send_next_batch(&connection, "chat").await);
        assert_eq!(connection.sent.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_rate_limited_and_flushes_on_shutdown() {
        let sender = Arc::new(OutboundSender::new(1, 200, Duration::from_secs(2)));
        for text in ["one", "two", "three"] {
            sender.enqueue(text.to_string()).await;
        }
        let connection = Arc::new(RecordingConnection::default());
        let shutdown = ShutdownSignal::new();

        let task = tokio::spawn(Arc::clone(&sender).run(
            connection.clone() as Arc<dyn PlatformConnection>,
            "chat".to_string(),
            shutdown.clone(),
        ));

        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(connection.sent.lock().await.len(), 1);

        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(connection.sent.lock().await.len(), 3);
    }
}
