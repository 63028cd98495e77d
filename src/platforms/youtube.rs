use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{sleep, Duration};
use url::Url;

use crate::platforms::PlatformConnection;
use crate::types::InboundEvent;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// YouTube API response structures
#[derive(Debug, Deserialize)]
struct YouTubeResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "pollingIntervalMillis")]
    polling_interval_millis: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LiveChatMessage {
    snippet: LiveChatMessageSnippet,
    #[serde(rename = "authorDetails")]
    author_details: AuthorDetails,
}

#[derive(Debug, Deserialize)]
struct LiveChatMessageSnippet {
    /// Missing for non-text events such as deletions
    #[serde(rename = "displayMessage")]
    display_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorDetails {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    snippet: SendMessageSnippet,
}

#[derive(Debug, Serialize)]
struct SendMessageSnippet {
    #[serde(rename = "liveChatId")]
    live_chat_id: String,
    #[serde(rename = "textMessageDetails")]
    text_message_details: TextMessageDetails,
    #[serde(rename = "type")]
    message_type: String,
}

#[derive(Debug, Serialize)]
struct TextMessageDetails {
    #[serde(rename = "messageText")]
    message_text: String,
}

/// Configuration for YouTube Live Chat connection
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub api_key: String,
    /// Needed only for sending replies
    pub oauth_token: Option<String>,
    /// Discovered from `video_id` when not set
    pub live_chat_id: Option<String>,
    pub video_id: Option<String>,
    pub polling_interval_ms: u64,
}

impl YouTubeConfig {
    /// Load YouTube configuration from environment variables. `default_video_id`
    /// (from bot.yaml) is used when `YOUTUBE_VIDEO_ID` is not set.
    pub fn from_env(default_video_id: &str) -> Result<Self> {
        let api_key = env::var("YOUTUBE_API_KEY")
            .context("YOUTUBE_API_KEY environment variable not set")?;

        let oauth_token = env::var("YOUTUBE_OAUTH_TOKEN").ok().filter(|token| !token.is_empty());
        if oauth_token.is_none() {
            warn!("YOUTUBE_OAUTH_TOKEN not set, chat replies will fail");
        }

        let live_chat_id = env::var("YOUTUBE_LIVE_CHAT_ID").ok().filter(|id| !id.is_empty());
        let video_id = env::var("YOUTUBE_VIDEO_ID")
            .ok()
            .or_else(|| Some(default_video_id.to_string()))
            .filter(|id| !id.is_empty());

        if live_chat_id.is_none() && video_id.is_none() {
            return Err(anyhow!(
                "Set YOUTUBE_LIVE_CHAT_ID, YOUTUBE_VIDEO_ID or video_id in bot.yaml"
            ));
        }

        let polling_interval_ms = env::var("YOUTUBE_POLLING_INTERVAL")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(5000);

        if let Some(ref vid_id) = video_id {
            info!("Monitoring video: {}", vid_id);
        }

        Ok(Self {
            api_key,
            oauth_token,
            live_chat_id,
            video_id,
            polling_interval_ms,
        })
    }
}

/// Exponential backoff, capped
fn next_backoff(current: Duration) -> Duration {
    std::cmp::min(current * 2, MAX_BACKOFF)
}

fn parse_messages(body: &str) -> Result<(Vec<InboundEvent>, Option<String>, Option<u64>)> {
    let response: YouTubeResponse<LiveChatMessage> =
        serde_json::from_str(body).context("Failed to parse YouTube Live Chat response")?;

    let received_at = Utc::now();
    let events = response
        .items
        .into_iter()
        .filter_map(|item| {
            let text = item.snippet.display_message?;
            Some(InboundEvent::new(item.author_details.display_name, text, received_at))
        })
        .collect();

    Ok((events, response.next_page_token, response.polling_interval_millis))
}

/// Shared polling state, cloned into the poller task
#[derive(Clone)]
struct Poller {
    config: YouTubeConfig,
    http_client: reqwest::Client,
    live_chat_id: Arc<RwLock<Option<String>>>,
    next_page_token: Arc<RwLock<Option<String>>>,
    is_connected: Arc<RwLock<bool>>,
    sender: broadcast::Sender<InboundEvent>,
}

impl Poller {
    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", API_BASE, path))?;
        url.query_pairs_mut().extend_pairs(params.iter());
        Ok(url)
    }

    /// Live chat id, discovering it from the video on first use
    async fn live_chat_id(&self) -> Result<String> {
        if let Some(id) = self.live_chat_id.read().await.clone() {
            return Ok(id);
        }

        let video_id = self
            .config
            .video_id
            .clone()
            .context("No live chat id and no video id to discover it from")?;
        let url = self.url(
            "videos",
            &[
                ("part", "liveStreamingDetails"),
                ("id", video_id.as_str()),
                ("key", self.config.api_key.as_str()),
            ],
        )?;

        let response: YouTubeResponse<serde_json::Value> = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to look up live stream")?
            .error_for_status()?
            .json()
            .await?;

        let live_chat_id = response
            .items
            .first()
            .and_then(|video| video.get("liveStreamingDetails"))
            .and_then(|details| details.get("activeLiveChatId"))
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .with_context(|| format!("Could not find active live chat for video: {}", video_id))?;

        info!("Auto-discovered live chat ID: {}", live_chat_id);
        *self.live_chat_id.write().await = Some(live_chat_id.clone());
        Ok(live_chat_id)
    }

    /// Fetch the next page of messages. Returns the events and the server's
    /// suggested polling interval.
    async fn poll_messages(&self) -> Result<(Vec<InboundEvent>, Option<u64>)> {
        let live_chat_id = self.live_chat_id().await?;
        let page_token = self.next_page_token.read().await.clone();

        let mut params = vec![
            ("liveChatId", live_chat_id.as_str()),
            ("part", "snippet,authorDetails"),
            ("key", self.config.api_key.as_str()),
        ];
        if let Some(token) = page_token.as_deref() {
            params.push(("pageToken", token));
        }
        let url = self.url("liveChat/messages", &params)?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to poll YouTube Live Chat API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("YouTube API error {}: {}", status, error_text));
        }

        let body = response.text().await?;
        let (events, next_page_token, polling_interval) = parse_messages(&body)?;
        *self.next_page_token.write().await = next_page_token;
        Ok((events, polling_interval))
    }

    /// Poll until disconnected. Errors never stop the loop; they only back off.
    async fn run(self) {
        info!("YouTube Live Chat message poller started");
        let base_interval = Duration::from_millis(self.config.polling_interval_ms);
        let mut backoff = base_interval;
        let mut first_page = true;

        while *self.is_connected.read().await {
            let delay = match self.poll_messages().await {
                Ok((events, suggested)) => {
                    backoff = base_interval;
                    if first_page {
                        first_page = false;
                        debug!("Skipping {} messages sent before the bot started", events.len());
                    } else {
                        for event in events {
                            debug!("YouTube message from {}: {}", event.author, event.text);
                            if self.sender.send(event).is_err() {
                                debug!("No subscribers for YouTube messages");
                            }
                        }
                    }
                    suggested.map_or(base_interval, |ms| base_interval.max(Duration::from_millis(ms)))
                }
                Err(e) => {
                    error!("Failed to poll YouTube messages: {:#}", e);
                    backoff = next_backoff(backoff);
                    warn!("Retrying YouTube poll in {:?}", backoff);
                    backoff
                }
            };

            sleep(delay).await;
        }

        warn!("YouTube Live Chat message poller stopped");
    }
}

/// YouTube Live Chat connection implementation
pub struct YouTubeConnection {
    poller: Poller,
}

impl YouTubeConnection {
    pub fn new(config: YouTubeConfig) -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            poller: Poller {
                live_chat_id: Arc::new(RwLock::new(config.live_chat_id.clone())),
                config,
                http_client: reqwest::Client::new(),
                next_page_token: Arc::new(RwLock::new(None)),
                is_connected: Arc::new(RwLock::new(false)),
                sender,
            },
        }
    }
}

#[async_trait]
impl PlatformConnection for YouTubeConnection {
    /// Start the poller. Connection problems are retried inside the poller,
    /// so this only fails if it is already running.
    async fn connect(&mut self) -> Result<()> {
        let mut connected = self.poller.is_connected.write().await;
        if *connected {
            return Err(anyhow!("YouTube poller is already running"));
        }
        *connected = true;
        drop(connected);

        tokio::spawn(self.poller.clone().run());
        info!("YouTube Live Chat connection established");
        Ok(())
    }

    async fn send_message(&self, _channel: &str, message: &str) -> Result<()> {
        let oauth_token = self
            .poller
            .config
            .oauth_token
            .as_deref()
            .context("Cannot send YouTube messages without YOUTUBE_OAUTH_TOKEN")?;

        let request = SendMessageRequest {
            snippet: SendMessageSnippet {
                live_chat_id: self.poller.live_chat_id().await?,
                text_message_details: TextMessageDetails {
                    message_text: message.to_string(),
                },
                message_type: "textMessageEvent".to_string(),
            },
        };

        let url = self.poller.url("liveChat/messages", &[("part", "snippet")])?;
        let response = self
            .poller
            .http_client
            .post(url)
            .bearer_auth(oauth_token)
            .json(&request)
            .send()
            .await
            .context("Failed to send YouTube Live Chat message")?;

        if response.status().is_success() {
            debug!("Sent YouTube message: {}", message);
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            Err(anyhow!("Failed to send YouTube message {}: {}", status, error_text))
        }
    }

    fn platform_name(&self) -> &str {
        "youtube"
    }

    async fn is_connected(&self) -> bool {
        *self.poller.is_connected.read().await
    }

    fn get_message_receiver(&self) -> Option<broadcast::Receiver<InboundEvent>> {
        Some(self.poller.sender.subscribe())
    }

    fn get_channels(&self) -> Vec<String> {
        self.poller
            .config
            .live_chat_id
            .clone()
            .or_else(|| self.poller.config.video_id.clone())
            .into_iter()
            .collect()
    }

    async fn disconnect(&self) -> Result<()> {
        *self.poller.is_connected.write().await = false;
        info!("Disconnected from YouTube Live Chat");
        Ok(())
    }
}
