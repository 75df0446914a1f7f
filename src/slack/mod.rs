pub mod rtm;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Read-side transport failures. `Timeout` and `Closed` are the signals
/// that make the supervisor reconnect; `Protocol` covers frame-level noise
/// that is not a connection loss.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("read timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// An event from the RTM stream. Slack sends many event shapes over the
/// same socket, so every field is optional and unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RtmEvent {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub subtype: Option<String>,
    pub channel: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
    pub bot_id: Option<String>,
    pub previous_message: Option<MessageStub>,
    pub message: Option<MessageStub>,
}

/// Nested message payload carried by edit and delete events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageStub {
    pub user: Option<String>,
    pub text: Option<String>,
    pub bot_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub image_48: String,
}

/// One entry of the `users.list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The Slack boundary: event stream plus the metadata and posting calls the
/// relay needs. A metadata call that Slack answers with `ok: false` is an
/// `Err` carrying Slack's error string.
#[async_trait]
pub trait Transport: Send {
    /// Establish (or re-establish) the event stream.
    async fn connect(&mut self) -> Result<()>;

    /// Pull the next batch of events, bounded by a read timeout.
    async fn read_events(&mut self) -> Result<Vec<RtmEvent>, TransportError>;

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        username: &str,
        icon_url: &str,
    ) -> Result<()>;

    async fn team_info(&self) -> Result<TeamInfo>;

    /// Public-channel metadata.
    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo>;

    /// Private-channel metadata, the fallback when `channel_info` fails.
    async fn group_info(&self, channel: &str) -> Result<ChannelInfo>;

    async fn user_info(&self, user: &str) -> Result<UserInfo>;

    async fn list_users(&self) -> Result<Vec<UserSummary>>;
}
