// src/bot/effects.rs - Append-only effect queues drained by independent workers

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::outbound::OutboundSender;
use super::shutdown::ShutdownSignal;
use crate::types::{Effect, UserKey};

/// Append-only buffer. Draining swaps the contents out under one lock
/// acquisition so slow I/O never runs with the lock held.
pub struct EffectQueue<T> {
    buffer: Mutex<Vec<T>>,
}

impl<T> EffectQueue<T> {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, item: T) {
        self.buffer.lock().await.push(item);
    }

    pub async fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.buffer.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }
}

impl<T> Default for EffectQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The two engine output queues: full chat history, and everything else
/// (action log lines, replies, ban list changes)
#[derive(Default)]
pub struct EffectQueues {
    pub history: EffectQueue<Effect>,
    pub actions: EffectQueue<Effect>,
}

impl EffectQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, effect: Effect) {
        match effect {
            Effect::LogFull { .. } => self.history.push(effect).await,
            other => self.actions.push(other).await,
        }
    }

    pub async fn enqueue_all(&self, effects: impl IntoIterator<Item = Effect>) {
        for effect in effects {
            self.enqueue(effect).await;
        }
    }
}

/// Destination for a drained batch of effects
#[async_trait]
pub trait EffectSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, effects: Vec<Effect>) -> Result<()>;
}

/// Persistent ban list kept outside the engine
#[async_trait]
pub trait BanListStore: Send + Sync {
    async fn add_banned(&self, user_key: &UserKey) -> Result<()>;

    async fn remove_banned(&self, user_key: &UserKey) -> Result<()>;
}

/// Appends `author: text` lines for log effects
pub struct FileLogSink {
    name: String,
    path: PathBuf,
}

impl FileLogSink {
    pub fn new<P: AsRef<Path>>(name: &str, path: P) -> Self {
        Self {
            name: name.to_string(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty the file, creating it if needed
    pub async fn truncate(&self) -> Result<()> {
        fs::write(&self.path, b"")
            .await
            .with_context(|| format!("Failed to truncate {}", self.path.display()))
    }

    pub async fn append_lines(&self, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let mut content = String::new();
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EffectSink for FileLogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, effects: Vec<Effect>) -> Result<()> {
        let lines: Vec<String> = effects.iter().filter_map(Effect::log_line).collect();
        self.append_lines(&lines).await
    }
}

/// Routes action-queue effects to the action log, the outbound sender and the ban store
pub struct ActionDispatcher {
    action_log: FileLogSink,
    outbound: Option<Arc<OutboundSender>>,
    ban_store: Option<Arc<dyn BanListStore>>,
}

impl ActionDispatcher {
    pub fn new(action_log: FileLogSink) -> Self {
        Self {
            action_log,
            outbound: None,
            ban_store: None,
        }
    }

    pub fn with_outbound(mut self, outbound: Arc<OutboundSender>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn with_ban_store(mut self, ban_store: Arc<dyn BanListStore>) -> Self {
        self.ban_store = Some(ban_store);
        self
    }
}

#[async_trait]
impl EffectSink for ActionDispatcher {
    fn name(&self) -> &str {
        "actions"
    }

    async fn deliver(&self, effects: Vec<Effect>) -> Result<()> {
        let mut lines = Vec::new();

        for effect in effects {
            match effect {
                Effect::LogAction { .. } | Effect::LogFull { .. } => {
                    if let Some(line) = effect.log_line() {
                        lines.push(line);
                    }
                }
                Effect::Reply(text) => match &self.outbound {
                    Some(outbound) => outbound.enqueue(text).await,
                    None => debug!("No outbound sender, dropping reply: {}", text),
                },
                Effect::BanRequest(user_key) => {
                    if let Some(store) = &self.ban_store {
                        if let Err(e) = store.add_banned(&user_key).await {
                            error!("Failed to persist ban for {}: {}", user_key, e);
                        }
                    }
                }
                Effect::UnbanRequest(user_key) => {
                    if let Some(store) = &self.ban_store {
                        if let Err(e) = store.remove_banned(&user_key).await {
                            error!("Failed to persist unban for {}: {}", user_key, e);
                        }
                    }
                }
            }
        }

        self.action_log.append_lines(&lines).await
    }
}

/// Drain one queue into its sink. Failures are logged and the batch is dropped.
pub async fn drain_once(queue: &EffectQueue<Effect>, sink: &dyn EffectSink) -> usize {
    let batch = queue.drain().await;
    let count = batch.len();
    if count == 0 {
        return 0;
    }

    if let Err(e) = sink.deliver(batch).await {
        error!("Sink '{}' failed to deliver {} effects: {}", sink.name(), count, e);
    } else {
        debug!("Sink '{}' delivered {} effects", sink.name(), count);
    }
    count
}

/// Drain `queue` into `sink` on a fixed cadence until shutdown, then once more
pub async fn run_drain_worker(
    queue: Arc<EffectQueues>,
    select: fn(&EffectQueues) -> &EffectQueue<Effect>,
    sink: Arc<dyn EffectSink>,
    period: Duration,
    shutdown: ShutdownSignal,
) {
    info!("Effect drain worker '{}' started", sink.name());
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut shutdown_receiver = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                drain_once(select(&queue), sink.as_ref()).await;
                if shutdown.is_requested() {
                    break;
                }
            }
            _ = shutdown_receiver.recv() => {
                let flushed = drain_once(select(&queue), sink.as_ref()).await;
                if flushed > 0 {
                    warn!("Flushed {} pending effects to '{}' on shutdown", flushed, sink.name());
                }
                break;
            }
        }
    }

    info!("Effect drain worker '{}' stopped", sink.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MemoryBanStore {
        banned: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl BanListStore for MemoryBanStore {
        async fn add_banned(&self, user_key: &UserKey) -> Result<()> {
            self.banned.lock().unwrap().push(user_key.clone());
            Ok(())
        }

        async fn remove_banned(&self, user_key: &UserKey) -> Result<()> {
            self.banned.lock().unwrap().retain(|key| key != user_key);
            Ok(())
        }
    }

    fn full(author: &str, text: &str) -> Effect {
        Effect::LogFull { author: author.to_string(), text: text.to_string() }
    }

    fn action(author: &str, text: &str) -> Effect {
        Effect::LogAction { author: author.to_string(), text: text.to_string() }
    }

    #[tokio::test]
    async fn test_enqueue_routes_by_kind() {
        let queues = EffectQueues::new();
        queues
            .enqueue_all(vec![full("a", "hi"), action("a", "!swap"), Effect::Reply("ok".to_string())])
            .await;

        assert_eq!(queues.history.len().await, 1);
        assert_eq!(queues.actions.len().await, 2);
    }

    #[tokio::test]
    async fn test_drain_swaps_out_contents() {
        let queue = EffectQueue::new();
        queue.push(1).await;
        queue.push(2).await;

        assert_eq!(queue.drain().await, vec![1, 2]);
        assert!(queue.is_empty().await);
        queue.push(3).await;
        assert_eq!(queue.drain().await, vec![3]);
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let sink = FileLogSink::new("history", dir.path().join("chat.txt"));
        sink.truncate().await.unwrap();

        sink.deliver(vec![full("Alice", "hello"), Effect::Reply("skipped".to_string())]).await.unwrap();
        sink.deliver(vec![full("Bob", "!swap")]).await.unwrap();

        let content = fs::read_to_string(sink.path()).await.unwrap();
        assert_eq!(content, "Alice: hello\nBob: !swap\n");
    }

    #[tokio::test]
    async fn test_action_dispatcher_routes_effects() {
        let dir = tempdir().unwrap();
        let outbound = Arc::new(OutboundSender::new(5, 200, Duration::from_secs(1)));
        let bans = Arc::new(MemoryBanStore::default());
        let dispatcher = ActionDispatcher::new(FileLogSink::new("actions", dir.path().join("swaps.txt")))
            .with_outbound(Arc::clone(&outbound))
            .with_ban_store(bans.clone() as Arc<dyn BanListStore>);

        dispatcher
            .deliver(vec![
                action("Dana", "!swap Tetris"),
                Effect::Reply("@Dana swapping".to_string()),
                Effect::BanRequest("mallory".to_string()),
                Effect::BanRequest("eve".to_string()),
                Effect::UnbanRequest("eve".to_string()),
            ])
            .await
            .unwrap();

        let log = fs::read_to_string(dir.path().join("swaps.txt")).await.unwrap();
        assert_eq!(log, "Dana: !swap Tetris\n");
        assert_eq!(outbound.pending().await, 1);
        assert_eq!(*bans.banned.lock().unwrap(), vec!["mallory".to_string()]);
    }

    #[tokio::test]
    async fn test_drain_worker_flushes_on_shutdown() {
        let dir = tempdir().unwrap();
        let queues = Arc::new(EffectQueues::new());
        let sink = Arc::new(FileLogSink::new("history", dir.path().join("chat.txt")));
        let shutdown = ShutdownSignal::new();

        let worker = tokio::spawn(run_drain_worker(
            Arc::clone(&queues),
            |queues| &queues.history,
            sink.clone() as Arc<dyn EffectSink>,
            Duration::from_secs(3600),
            shutdown.clone(),
        ));
        tokio::task::yield_now().await;

        queues.enqueue(full("Alice", "late message")).await;
        shutdown.trigger();
        worker.await.unwrap();

        let content = fs::read_to_string(sink.path()).await.unwrap();
        assert_eq!(content, "Alice: late message\n");
    }
}
