use anyhow::{Context, Result};
use tracing::debug;

use crate::cache::BoundedCache;
use crate::slack::Transport;

#[derive(Debug, Clone)]
pub struct Team {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    /// Display name; public channels carry a `#` prefix, private ones none.
    pub name: String,
    pub is_private: bool,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub image: String,
    /// `name@team`, the identity shown on relayed messages.
    pub full_name: String,
}

#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Direct-mention token that marks commands, `<@id>`.
    pub command_prefix: String,
}

/// Cache-then-fetch resolution of Slack identifiers to display metadata.
///
/// Each entity kind has its own bounded cache; channels and users are keyed
/// by `"{team}~{id}"` so identical ids on different teams cannot collide.
pub struct EntityResolver {
    teams: BoundedCache<String, Team>,
    channels: BoundedCache<String, Channel>,
    users: BoundedCache<String, User>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self {
            teams: BoundedCache::default(),
            channels: BoundedCache::default(),
            users: BoundedCache::default(),
        }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            teams: BoundedCache::new(capacity),
            channels: BoundedCache::new(capacity),
            users: BoundedCache::new(capacity),
        }
    }

    pub async fn resolve_team(
        &mut self,
        transport: &dyn Transport,
        known_id: Option<&str>,
    ) -> Result<Team> {
        if let Some(id) = known_id {
            if let Some(team) = self.teams.get(&id.to_string()) {
                return Ok(team.clone());
            }
        }
        let info = transport.team_info().await.context("team lookup failed")?;
        let id = known_id.unwrap_or(&info.id).to_string();
        let team = Team {
            id: id.clone(),
            name: info.name,
        };
        debug!("resolved team {} ({})", team.name, team.id);
        self.teams.put(id, team.clone());
        Ok(team)
    }

    /// Resolve a channel, falling back to the private-channel lookup when
    /// the public one fails. Both failing aborts the caller's event.
    pub async fn resolve_channel(
        &mut self,
        transport: &dyn Transport,
        team: &Team,
        channel_id: &str,
    ) -> Result<Channel> {
        let key = format!("{}~{}", team.id, channel_id);
        if let Some(channel) = self.channels.get(&key) {
            return Ok(channel.clone());
        }
        let (info, is_private) = match transport.channel_info(channel_id).await {
            Ok(info) => (info, false),
            Err(e) => {
                debug!("public lookup of {channel_id} failed ({e:#}), trying private");
                let info = transport
                    .group_info(channel_id)
                    .await
                    .with_context(|| format!("channel {channel_id} could not be resolved"))?;
                (info, true)
            }
        };
        let name = if is_private {
            info.name
        } else {
            format!("#{}", info.name)
        };
        let channel = Channel {
            id: channel_id.to_string(),
            name,
            is_private,
        };
        debug!("resolved channel {} ({})", channel.name, channel.id);
        self.channels.put(key, channel.clone());
        Ok(channel)
    }

    pub async fn resolve_user(
        &mut self,
        transport: &dyn Transport,
        team: &Team,
        user_id: &str,
    ) -> Result<User> {
        let key = format!("{}~{}", team.id, user_id);
        if let Some(user) = self.users.get(&key) {
            return Ok(user.clone());
        }
        let info = transport
            .user_info(user_id)
            .await
            .with_context(|| format!("user {user_id} could not be resolved"))?;
        let user = User {
            id: user_id.to_string(),
            full_name: format!("{}@{}", info.name, team.name),
            name: info.name,
            image: info.profile.image_48,
        };
        debug!("resolved user {} ({})", user.full_name, user.id);
        self.users.put(key, user.clone());
        Ok(user)
    }

    /// Find the bot's own identity by scanning the user listing for the
    /// configured account name. The bot cannot operate without it.
    pub async fn resolve_bot(
        &mut self,
        transport: &dyn Transport,
        team: &Team,
        name: &str,
    ) -> Result<BotIdentity> {
        let members = transport.list_users().await.context("user listing failed")?;
        for member in members {
            if member.name == name {
                let user = self.resolve_user(transport, team, &member.id).await?;
                return Ok(BotIdentity {
                    command_prefix: format!("<@{}>", user.id),
                    id: user.id,
                    name: user.name,
                    image: user.image,
                });
            }
        }
        anyhow::bail!("unable to find bot identity for {name:?}")
    }
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}
