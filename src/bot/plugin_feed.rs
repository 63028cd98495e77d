// src/bot/plugin_feed.rs - Tail the result file written by the display plugin

use anyhow::{Context, Result};
use futures_util::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use regex::Regex;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::{sleep, Duration};

/// One `user: result` line reported by the plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEvent {
    pub user: String,
    pub result: String,
}

/// Lazy, restartable feed of plugin results.
///
/// The file is polled for growth. When it shrinks (the plugin truncated it)
/// reading starts over from the beginning. Lines that do not look like
/// `user: result` are skipped.
pub struct PluginFeed {
    path: PathBuf,
    poll_interval: Duration,
    skip_existing: bool,
    pattern: Regex,
}

impl PluginFeed {
    pub fn new<P: AsRef<Path>>(path: P, poll_interval: Duration) -> Result<Self> {
        let pattern = Regex::new(r"^\s*([^:\s][^:]*?)\s*:\s*(\S.*?)\s*$").context("Invalid plugin line pattern")?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            poll_interval,
            skip_existing: true,
            pattern,
        })
    }

    /// Also yield lines already in the file when the feed starts
    pub fn from_start(mut self) -> Self {
        self.skip_existing = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse_line(&self, line: &str) -> Option<PluginEvent> {
        let captures = self.pattern.captures(line)?;
        Some(PluginEvent {
            user: captures.get(1)?.as_str().to_string(),
            result: captures.get(2)?.as_str().to_string(),
        })
    }

    pub fn into_stream(self) -> BoxStream<'static, PluginEvent> {
        info!("Watching plugin results in {}", self.path.display());
        let tail = Tail {
            offset: None,
            partial: Vec::new(),
            pending: VecDeque::new(),
            feed: self,
        };

        stream::unfold(tail, |mut tail| async move {
            loop {
                if let Some(event) = tail.pending.pop_front() {
                    return Some((event, tail));
                }
                if let Err(e) = tail.poll().await {
                    warn!("Failed to read plugin feed {}: {}", tail.feed.path.display(), e);
                }
                if tail.pending.is_empty() {
                    sleep(tail.feed.poll_interval).await;
                }
            }
        })
        .boxed()
    }
}

struct Tail {
    feed: PluginFeed,
    offset: Option<u64>,
    /// Bytes after the last newline, decoded once the line is complete
    partial: Vec<u8>,
    pending: VecDeque<PluginEvent>,
}

impl Tail {
    async fn poll(&mut self) -> Result<()> {
        let length = match fs::metadata(&self.feed.path).await {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                debug!("Plugin feed {} does not exist yet", self.feed.path.display());
                if self.offset.is_none() {
                    self.offset = Some(0);
                }
                return Ok(());
            }
        };

        let offset = match self.offset {
            Some(offset) if length < offset => {
                info!("Plugin feed {} was truncated, restarting", self.feed.path.display());
                self.partial.clear();
                0
            }
            Some(offset) => offset,
            None if self.feed.skip_existing => {
                self.offset = Some(length);
                return Ok(());
            }
            None => 0,
        };

        if length == offset {
            self.offset = Some(offset);
            return Ok(());
        }

        let mut file = File::open(&self.feed.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = Vec::new();
        let read = file.read_to_end(&mut buffer).await?;
        self.offset = Some(offset + read as u64);

        self.partial.extend_from_slice(&buffer);
        while let Some(newline) = self.partial.iter().position(|&byte| byte == b'\n') {
            let bytes: Vec<u8> = self.partial.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&bytes);
            match self.feed.parse_line(&line) {
                Some(event) => self.pending.push_back(event),
                None if line.trim().is_empty() => {}
                None => debug!("Skipping plugin line: {}", line.trim_end()),
            }
        }
        Ok(())
    }
}
