use std::time::Duration;

use thiserror::Error;
use tracing::{error, warn};

use crate::entities::{BotIdentity, EntityResolver, Team};
use crate::relay::RelayDispatcher;
use crate::slack::{Transport, TransportError};

/// Causes that terminate the process. `main` maps each to its exit code.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("connection failed: {0:#}")]
    Connect(anyhow::Error),
    #[error("bot identity not found: {0:#}")]
    Identity(anyhow::Error),
}

/// Owns the connect/poll/reconnect cycle and feeds events to the
/// dispatcher. Everything runs on one task; a reconnect blocks polling
/// until it completes, and a failed reconnect is fatal.
pub struct Supervisor<T> {
    transport: T,
    dispatcher: RelayDispatcher,
    bot_name: String,
    poll_interval: Duration,
    team: Team,
    bot: BotIdentity,
}

async fn establish<T: Transport>(
    transport: &mut T,
    resolver: &mut EntityResolver,
    bot_name: &str,
) -> Result<(Team, BotIdentity), FatalError> {
    transport.connect().await.map_err(FatalError::Connect)?;
    let team = resolver
        .resolve_team(&*transport, None)
        .await
        .map_err(FatalError::Connect)?;
    let bot = resolver
        .resolve_bot(&*transport, &team, bot_name)
        .await
        .map_err(FatalError::Identity)?;
    warn!("connected bot: {} (<@{}>)", bot.name, bot.id);
    Ok((team, bot))
}

impl<T: Transport> Supervisor<T> {
    /// Connect and resolve the team and bot identity. There is no retry:
    /// a failure here is fatal.
    pub async fn connect(
        mut transport: T,
        mut dispatcher: RelayDispatcher,
        bot_name: String,
        poll_interval: Duration,
    ) -> Result<Self, FatalError> {
        let (team, bot) = establish(&mut transport, dispatcher.resolver_mut(), &bot_name).await?;
        Ok(Self {
            transport,
            dispatcher,
            bot_name,
            poll_interval,
            team,
            bot,
        })
    }

    async fn reconnect(&mut self) -> Result<(), FatalError> {
        let (team, bot) = establish(
            &mut self.transport,
            self.dispatcher.resolver_mut(),
            &self.bot_name,
        )
        .await?;
        self.team = team;
        self.bot = bot;
        Ok(())
    }

    /// One poll cycle: read a batch and dispatch it, reconnecting on a
    /// timeout or closed connection. Events in flight during a drop are
    /// lost; there is no backlog replay.
    pub async fn step(&mut self) -> Result<(), FatalError> {
        match self.transport.read_events().await {
            Ok(events) => {
                for event in events {
                    if let Err(e) = self
                        .dispatcher
                        .handle_event(&self.transport, &self.team, &self.bot, &event)
                        .await
                    {
                        error!("error handling event: {e:#}");
                    }
                }
            }
            Err(e @ (TransportError::Timeout | TransportError::Closed)) => {
                warn!("event read failed: {e}");
                warn!("reconnecting to slack..");
                self.reconnect().await?;
            }
            Err(TransportError::Protocol(e)) => {
                // Frame-level noise, not a connection loss.
                warn!("transport protocol error: {e}");
            }
        }
        Ok(())
    }

    pub async fn run(mut self) -> Result<(), FatalError> {
        loop {
            self.step().await?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
