use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::InboundEvent;

pub mod youtube;

/// Live chat transport. Implementations keep retrying dropped connections
/// themselves and publish parsed events in arrival order.
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Connect to the platform and start receiving events
    async fn connect(&mut self) -> Result<()>;

    /// Send a message to the specified channel
    async fn send_message(&self, channel: &str, message: &str) -> Result<()>;

    /// Get the platform identifier (e.g., "youtube")
    fn platform_name(&self) -> &str;

    /// Check if the connection is healthy
    async fn is_connected(&self) -> bool;

    /// Get a receiver for incoming events
    fn get_message_receiver(&self) -> Option<broadcast::Receiver<InboundEvent>>;

    /// Get list of channels this connection is active in
    fn get_channels(&self) -> Vec<String>;

    /// Stop receiving events
    async fn disconnect(&self) -> Result<()>;
}
