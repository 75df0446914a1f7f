use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ChannelInfo, RtmEvent, TeamInfo, Transport, TransportError, UserInfo, UserSummary};

const API_BASE: &str = "https://slack.com/api";

/// Silence on the socket beyond this means the connection is dead: Slack
/// pings well inside this window.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Real Slack client: Web API over HTTP plus the RTM WebSocket stream.
pub struct RtmClient {
    token: String,
    http: reqwest::Client,
    ws: Option<WsStream>,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    ok: bool,
    error: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeamResponse {
    ok: bool,
    error: Option<String>,
    team: Option<TeamInfo>,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<ChannelInfo>,
}

#[derive(Debug, Deserialize)]
struct GroupResponse {
    ok: bool,
    error: Option<String>,
    group: Option<ChannelInfo>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    ok: bool,
    error: Option<String>,
    user: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UsersListResponse {
    ok: bool,
    error: Option<String>,
    members: Option<Vec<UserSummary>>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

fn check_ok(ok: bool, error: Option<String>, method: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        anyhow::bail!(
            "slack api {method} failed: {}",
            error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

impl RtmClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            http: reqwest::Client::new(),
            ws: None,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = format!("{API_BASE}/{method}");
        debug!("calling slack api: {method}");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await
            .with_context(|| format!("request to {method} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("slack api {method} returned {status}");
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to parse {method} response"))
    }
}

#[async_trait]
impl Transport for RtmClient {
    async fn connect(&mut self) -> Result<()> {
        let response: ConnectResponse = self.call("rtm.connect", &[]).await?;
        check_ok(response.ok, response.error, "rtm.connect")?;
        let url = response.url.context("rtm.connect returned no url")?;

        let (ws, _) = connect_async(url.as_str())
            .await
            .context("websocket connection failed")?;
        info!("rtm stream connected");
        self.ws = Some(ws);
        Ok(())
    }

    async fn read_events(&mut self) -> Result<Vec<RtmEvent>, TransportError> {
        let ws = self.ws.as_mut().ok_or(TransportError::Closed)?;
        loop {
            let frame = tokio::time::timeout(READ_TIMEOUT, ws.next())
                .await
                .map_err(|_| TransportError::Timeout)?;
            match frame {
                None | Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                Some(Err(WsError::ConnectionClosed))
                | Some(Err(WsError::AlreadyClosed))
                | Some(Err(WsError::Io(_))) => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Protocol(e.to_string())),
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<RtmEvent>(&text) {
                    Ok(event) => return Ok(vec![event]),
                    Err(e) => {
                        warn!("skipping unparseable rtm frame: {e}");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                // Binary and pong frames carry no events.
                Some(Ok(_)) => {}
            }
        }
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        username: &str,
        icon_url: &str,
    ) -> Result<()> {
        let params = [
            ("channel", channel),
            ("text", text),
            ("username", username),
            ("icon_url", icon_url),
        ];
        let response: PostMessageResponse = self.call("chat.postMessage", &params).await?;
        check_ok(response.ok, response.error, "chat.postMessage")
    }

    async fn team_info(&self) -> Result<TeamInfo> {
        let response: TeamResponse = self.call("team.info", &[]).await?;
        check_ok(response.ok, response.error, "team.info")?;
        response.team.context("team.info returned no team")
    }

    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo> {
        let response: ChannelResponse = self.call("channels.info", &[("channel", channel)]).await?;
        check_ok(response.ok, response.error, "channels.info")?;
        response.channel.context("channels.info returned no channel")
    }

    async fn group_info(&self, channel: &str) -> Result<ChannelInfo> {
        let response: GroupResponse = self.call("groups.info", &[("channel", channel)]).await?;
        check_ok(response.ok, response.error, "groups.info")?;
        response.group.context("groups.info returned no group")
    }

    async fn user_info(&self, user: &str) -> Result<UserInfo> {
        let response: UserResponse = self.call("users.info", &[("user", user)]).await?;
        check_ok(response.ok, response.error, "users.info")?;
        response.user.context("users.info returned no user")
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let response: UsersListResponse = self.call("users.list", &[]).await?;
        check_ok(response.ok, response.error, "users.list")?;
        response.members.context("users.list returned no members")
    }
}
